//! Zone Sentry
//!
//! Alert orchestration and evidence capture for object-detection video
//! streams: decides when detections inside configured zones become alerts,
//! records pre-event plus post-event footage for each alert, keeps an
//! append-only detection log, and notifies external parties off the frame
//! loop.
//!
//! # Architecture
//!
//! Every frame flows through `pipeline::AlertPipeline` sequentially:
//!
//! 1. **Ring buffer**: the frame is pushed into a bounded pre-event buffer.
//! 2. **Recording**: an active session appends the frame or closes on time.
//! 3. **Classification**: detector output is mapped to zones and alert classes.
//! 4. **Logging**: one CSV row per classified detection, before any debouncing.
//! 5. **Debouncing**: at most one accepted trigger per cooldown window; an
//!    accepted trigger opens a recording seeded with the buffer snapshot.
//!
//! Finalized clips are handed to `dispatch::NotificationDispatcher`, whose
//! worker thread owns the transport, so a slow broker never stalls capture.
//!
//! # Module Structure
//!
//! - `clock`: injectable wall clock and elapsed-time guards
//! - `zone`: named rectangular zones and point membership
//! - `frame`: `RawFrame`, `FrameBuffer`, `SharedFrameBuffer`
//! - `detect`: detector boundary, backends, `DetectionClassifier`
//! - `alert`: `AlertDebouncer`
//! - `recording`: `Recorder` state machine and clip stores
//! - `log` / `storage`: detection log rows and daily CSV partitions
//! - `transport` / `dispatch`: notifiers and the background dispatcher
//! - `ingest`: synthetic frame source
//! - `runner`: paced daemon frame loop
//! - `config`: `SentryConfig` loading and validation

pub mod alert;
pub mod clock;
pub mod config;
pub mod detect;
pub mod dispatch;
pub mod frame;
pub mod ingest;
pub mod log;
pub mod pipeline;
pub mod recording;
pub mod runner;
pub mod storage;
pub mod transport;
pub mod zone;

pub use alert::{AlertDebouncer, AlertInput, TriggerAccepted};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SentryConfig;
pub use detect::{
    BoundingBox, ClassifiedDetection, Detection, DetectionClassifier, DetectorBackend,
    ScriptedBackend, StubBackend,
};
pub use dispatch::{DispatchStats, NotificationDispatcher};
pub use frame::{FrameBuffer, RawFrame, SharedFrameBuffer, MAX_BUFFER_FRAMES};
pub use ingest::{open_source, FrameSource, SourceConfig, SyntheticSource};
pub use log::{DetectionLogEntry, CSV_HEADER};
pub use pipeline::{AlertPipeline, FrameReport, PipelineParts, PipelineStats, Suppression};
pub use recording::{
    AviMjpegWriter, ClipArtifact, ClipStore, ClipWriter, FilesystemClipStore, InMemoryClipStore, Recorder,
    RecordingSession, StartOutcome,
};
pub use runner::{run_frames, LoopExit, LoopSettings, LoopSummary};
pub use storage::{DailyCsvLog, DetectionLogStore, InMemoryDetectionLog};
pub use transport::{AlertNotification, ChannelNotifier, LogNotifier, MqttNotifier, Notifier};
pub use zone::{Point, Rect, Zone, ZoneRegistry, ZoneShape, OUTSIDE_ZONE};
