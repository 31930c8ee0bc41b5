//! Raw frames and the pre-event ring buffer.
//!
//! - `RawFrame`: immutable RGB8 frame with its capture time and sequence number.
//! - `FrameBuffer`: bounded ring buffer holding the most recent N frames.
//! - `SharedFrameBuffer`: the buffer behind a single lock, so a snapshot taken
//!   at trigger time never observes a half-completed eviction.
//!
//! Frames are shared as `Arc<RawFrame>`: once handed to the buffer a frame is
//! never mutated, and snapshots are cheap copies of the handles.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Hard cap on buffered frames (60 seconds at 30 fps).
pub const MAX_BUFFER_FRAMES: usize = 1800;

/// Bytes per pixel of the RGB8 layout used throughout the pipeline.
pub const RGB8_CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// RawFrame
// ----------------------------------------------------------------------------

/// One decoded frame. Pixel data is tightly packed RGB8, row-major.
#[derive(Debug)]
pub struct RawFrame {
    sequence: u64,
    captured_at: DateTime<Local>,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RawFrame {
    pub fn new(
        sequence: u64,
        captured_at: DateTime<Local>,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        let expected = width as usize * height as usize * RGB8_CHANNELS;
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame {} has {} bytes, expected {} for {}x{} RGB8",
                sequence,
                pixels.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self {
            sequence,
            captured_at,
            width,
            height,
            pixels,
        })
    }

    /// Uniformly filled frame; handy for sources that have nothing to show yet.
    pub fn filled(
        sequence: u64,
        captured_at: DateTime<Local>,
        width: u32,
        height: u32,
        value: u8,
    ) -> Result<Self> {
        let len = width as usize * height as usize * RGB8_CHANNELS;
        Self::new(sequence, captured_at, width, height, vec![value; len])
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

// ----------------------------------------------------------------------------
// FrameBuffer
// ----------------------------------------------------------------------------

/// Number of frames needed to hold `pre_event` seconds at `fps`.
pub fn capacity_for(fps: u32, pre_event: Duration) -> usize {
    (f64::from(fps) * pre_event.as_secs_f64()).ceil() as usize
}

/// Bounded ring buffer of the most recent frames, oldest first.
#[derive(Debug)]
pub struct FrameBuffer {
    buffer: VecDeque<Arc<RawFrame>>,
    capacity: usize,
}

impl FrameBuffer {
    /// Allocate the full buffer up front. Failing here is fatal for the
    /// caller: without it the pre-event guarantee cannot be honoured.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(anyhow!("frame buffer capacity must be > 0"));
        }
        if capacity > MAX_BUFFER_FRAMES {
            return Err(anyhow!(
                "frame buffer capacity {} exceeds MAX_BUFFER_FRAMES ({})",
                capacity,
                MAX_BUFFER_FRAMES
            ));
        }
        let mut buffer = VecDeque::new();
        buffer
            .try_reserve_exact(capacity)
            .map_err(|e| anyhow!("frame buffer allocation failed: {}", e))?;
        Ok(Self { buffer, capacity })
    }

    /// Append a frame, evicting the oldest when full.
    pub fn push(&mut self, frame: Arc<RawFrame>) {
        while self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(frame);
    }

    /// Current contents in arrival order. The buffer is left untouched.
    pub fn snapshot(&self) -> Vec<Arc<RawFrame>> {
        self.buffer.iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<&Arc<RawFrame>> {
        self.buffer.back()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Memory usage estimate.
    pub fn memory_bytes(&self) -> usize {
        self.buffer.iter().map(|f| f.byte_len()).sum()
    }
}

/// `FrameBuffer` behind one mutex. Push and snapshot are each a single
/// critical section.
#[derive(Clone, Debug)]
pub struct SharedFrameBuffer {
    inner: Arc<Mutex<FrameBuffer>>,
}

impl SharedFrameBuffer {
    pub fn new(buffer: FrameBuffer) -> Self {
        Self {
            inner: Arc::new(Mutex::new(buffer)),
        }
    }

    pub fn with_capacity(capacity: usize) -> Result<Self> {
        Ok(Self::new(FrameBuffer::with_capacity(capacity)?))
    }

    pub fn push(&self, frame: Arc<RawFrame>) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("frame buffer lock poisoned"))?;
        guard.push(frame);
        Ok(())
    }

    pub fn snapshot(&self) -> Result<Vec<Arc<RawFrame>>> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("frame buffer lock poisoned"))?;
        Ok(guard.snapshot())
    }

    pub fn latest(&self) -> Result<Option<Arc<RawFrame>>> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("frame buffer lock poisoned"))?;
        Ok(guard.latest().cloned())
    }

    /// Poison the lock by panicking while holding it.
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let inner = Arc::clone(&self.inner);
        let _ = std::thread::spawn(move || {
            let _guard = inner.lock().unwrap();
            panic!("frame buffer poisoned on purpose");
        })
        .join();
    }

    /// `(len, capacity, memory_bytes)` read under one lock.
    pub fn fill(&self) -> Result<(usize, usize, usize)> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("frame buffer lock poisoned"))?;
        Ok((guard.len(), guard.capacity(), guard.memory_bytes()))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
