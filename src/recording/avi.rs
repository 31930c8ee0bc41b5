//! Minimal AVI (RIFF) muxer for motion-JPEG video.
//!
//! Layout written by `AviMjpegWriter`:
//!
//! ```text
//! RIFF 'AVI '
//!   LIST 'hdrl'
//!     avih            main header (frame period, frame count, size)
//!     LIST 'strl'
//!       strh 'vids'   stream header, handler 'MJPG', rate = fps
//!       strf          BITMAPINFOHEADER, compression 'MJPG'
//!   LIST 'movi'
//!     00dc ...        one JPEG image per chunk, padded to even length
//!   idx1              one key-frame entry per chunk
//! ```
//!
//! The header is reserved up front and patched once the frame count, frame
//! size and largest chunk are known.

use anyhow::{anyhow, Result};
use std::io::{Seek, SeekFrom, Write};

const AVIF_HASINDEX: u32 = 0x10;
const AVIIF_KEYFRAME: u32 = 0x10;
const MAIN_HEADER_LEN: u32 = 56;
const STREAM_HEADER_LEN: u32 = 56;
const BITMAP_INFO_LEN: u32 = 40;
const STRL_LEN: u32 = 4 + (8 + STREAM_HEADER_LEN) + (8 + BITMAP_INFO_LEN);
const HDRL_LEN: u32 = 4 + (8 + MAIN_HEADER_LEN) + (8 + STRL_LEN);
/// Offset of the `movi` list's fourcc; `idx1` offsets are relative to it.
const MOVI_FOURCC_OFFSET: u64 = 12 + 8 + HDRL_LEN as u64 + 8;
/// First byte after the reserved header.
pub const HEADER_LEN: u64 = MOVI_FOURCC_OFFSET + 4;

struct IndexEntry {
    offset: u32,
    size: u32,
}

/// Streams JPEG frames into an AVI container over any seekable sink.
pub struct AviMjpegWriter<W: Write + Seek> {
    out: W,
    fps: u32,
    resolution: Option<(u32, u32)>,
    index: Vec<IndexEntry>,
    /// Bytes written inside the `movi` list after its fourcc.
    movi_bytes: u64,
    max_chunk: u32,
}

impl<W: Write + Seek> AviMjpegWriter<W> {
    pub fn new(mut out: W, fps: u32) -> Result<Self> {
        if fps == 0 {
            return Err(anyhow!("AVI frame rate must be greater than zero"));
        }
        out.seek(SeekFrom::Start(0))?;
        out.write_all(&[0u8; HEADER_LEN as usize])?;
        Ok(Self {
            out,
            fps,
            resolution: None,
            index: Vec::new(),
            movi_bytes: 0,
            max_chunk: 0,
        })
    }

    pub fn frames(&self) -> u64 {
        self.index.len() as u64
    }

    /// Append one baseline JPEG image of `width`x`height`.
    pub fn write_frame(&mut self, jpeg: &[u8], width: u32, height: u32) -> Result<()> {
        match self.resolution {
            None => self.resolution = Some((width, height)),
            Some(expected) if expected != (width, height) => {
                return Err(anyhow!(
                    "AVI frame is {}x{}, stream is {}x{}",
                    width,
                    height,
                    expected.0,
                    expected.1
                ));
            }
            Some(_) => {}
        }

        let size = u32::try_from(jpeg.len()).map_err(|_| anyhow!("JPEG frame too large"))?;
        let padded = u64::from(size) + u64::from(size % 2);
        let offset = u32::try_from(4 + self.movi_bytes)
            .map_err(|_| anyhow!("AVI clip exceeds the 4 GiB RIFF limit"))?;
        if HEADER_LEN + self.movi_bytes + 8 + padded > u64::from(u32::MAX) {
            return Err(anyhow!("AVI clip exceeds the 4 GiB RIFF limit"));
        }

        self.out.write_all(b"00dc")?;
        self.out.write_all(&size.to_le_bytes())?;
        self.out.write_all(jpeg)?;
        if size % 2 == 1 {
            self.out.write_all(&[0])?;
        }
        self.index.push(IndexEntry { offset, size });
        self.movi_bytes += 8 + padded;
        self.max_chunk = self.max_chunk.max(size);
        Ok(())
    }

    /// Write the index, patch the header and hand the sink back.
    pub fn finish(mut self) -> Result<W> {
        let frames = u32::try_from(self.index.len()).map_err(|_| anyhow!("too many AVI frames"))?;
        let (width, height) = self.resolution.unwrap_or((0, 0));

        let mut idx = Vec::with_capacity(8 + self.index.len() * 16);
        idx.extend_from_slice(b"idx1");
        put_u32(&mut idx, frames * 16);
        for entry in &self.index {
            idx.extend_from_slice(b"00dc");
            put_u32(&mut idx, AVIIF_KEYFRAME);
            put_u32(&mut idx, entry.offset);
            put_u32(&mut idx, entry.size);
        }
        self.out.write_all(&idx)?;

        let movi_len = u32::try_from(4 + self.movi_bytes)
            .map_err(|_| anyhow!("AVI clip exceeds the 4 GiB RIFF limit"))?;
        let riff_len = u32::try_from(
            HEADER_LEN - 8 + self.movi_bytes + idx.len() as u64,
        )
        .map_err(|_| anyhow!("AVI clip exceeds the 4 GiB RIFF limit"))?;

        let header = self.header(riff_len, movi_len, frames, width, height);
        self.out.seek(SeekFrom::Start(0))?;
        self.out.write_all(&header)?;
        self.out.seek(SeekFrom::End(0))?;
        self.out.flush()?;
        Ok(self.out)
    }

    fn header(&self, riff_len: u32, movi_len: u32, frames: u32, width: u32, height: u32) -> Vec<u8> {
        let micros_per_frame = 1_000_000 / self.fps;
        let bytes_per_sec = self.max_chunk.saturating_mul(self.fps);
        let buffer_size = self.max_chunk.saturating_add(8);

        let mut h = Vec::with_capacity(HEADER_LEN as usize);
        h.extend_from_slice(b"RIFF");
        put_u32(&mut h, riff_len);
        h.extend_from_slice(b"AVI ");

        h.extend_from_slice(b"LIST");
        put_u32(&mut h, HDRL_LEN);
        h.extend_from_slice(b"hdrl");

        h.extend_from_slice(b"avih");
        put_u32(&mut h, MAIN_HEADER_LEN);
        put_u32(&mut h, micros_per_frame);
        put_u32(&mut h, bytes_per_sec);
        put_u32(&mut h, 0); // padding granularity
        put_u32(&mut h, AVIF_HASINDEX);
        put_u32(&mut h, frames);
        put_u32(&mut h, 0); // initial frames
        put_u32(&mut h, 1); // streams
        put_u32(&mut h, buffer_size);
        put_u32(&mut h, width);
        put_u32(&mut h, height);
        h.extend_from_slice(&[0u8; 16]);

        h.extend_from_slice(b"LIST");
        put_u32(&mut h, STRL_LEN);
        h.extend_from_slice(b"strl");

        h.extend_from_slice(b"strh");
        put_u32(&mut h, STREAM_HEADER_LEN);
        h.extend_from_slice(b"vids");
        h.extend_from_slice(b"MJPG");
        put_u32(&mut h, 0); // flags
        put_u16(&mut h, 0); // priority
        put_u16(&mut h, 0); // language
        put_u32(&mut h, 0); // initial frames
        put_u32(&mut h, 1); // scale
        put_u32(&mut h, self.fps); // rate
        put_u32(&mut h, 0); // start
        put_u32(&mut h, frames);
        put_u32(&mut h, buffer_size);
        put_u32(&mut h, u32::MAX); // quality: default
        put_u32(&mut h, 0); // sample size
        put_u16(&mut h, 0);
        put_u16(&mut h, 0);
        put_u16(&mut h, clamp_u16(width));
        put_u16(&mut h, clamp_u16(height));

        h.extend_from_slice(b"strf");
        put_u32(&mut h, BITMAP_INFO_LEN);
        put_u32(&mut h, BITMAP_INFO_LEN);
        put_u32(&mut h, width);
        put_u32(&mut h, height);
        put_u16(&mut h, 1); // planes
        put_u16(&mut h, 24); // bit count
        h.extend_from_slice(b"MJPG");
        put_u32(&mut h, width.saturating_mul(height).saturating_mul(3));
        h.extend_from_slice(&[0u8; 16]);

        h.extend_from_slice(b"LIST");
        put_u32(&mut h, movi_len);
        h.extend_from_slice(b"movi");
        h
    }
}

fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn clamp_u16(value: u32) -> u16 {
    u16::try_from(value).unwrap_or(u16::MAX)
}
