//! Versemotion Export Pipeline
//!
//! Orchestrates a full lyrics-video export: staged frames are encoded into
//! fixed-size batch segments, the segments are concatenated (optionally with
//! an audio track) into the deliverable, and every phase is mirrored out to
//! registered observers.
//!
//! # Pipeline Architecture
//!
//! ```text
//! renderer frames ──▶ FrameStore (session staging)
//!                          │
//!                          ▼
//!        ┌──────────────────────────────────────┐
//!        │            ExportPipeline            │
//!        │  queue (FIFO) ─▶ per-job phases:     │
//!        │  preparing ▶ capturing ▶ batches ▶   │
//!        │  composition ▶ finalizing            │
//!        └───────┬──────────────────┬───────────┘
//!                │ encode_batch     │ compose_final
//!                ▼                  ▼
//!          EncoderBackend (external process)
//!                          │
//!                          ▼
//!                     output.mp4
//! ```

pub mod events;
pub mod job;
pub mod orchestrator;
pub mod service;

pub use events::{
    batch_progress, checkpoints, ExportEvent, ExportPhase, ObserverSet, ProgressUpdate,
};
pub use job::{
    enforce_continuity, partition_batches, BatchRange, ExportOptions, ExportRequest,
};
pub use orchestrator::ExportPipeline;
pub use service::ExportService;
