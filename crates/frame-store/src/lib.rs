//! Versemotion Frame Store
//!
//! Durable, session-scoped staging for the export pipeline: raw RGBA frames
//! arrive from the renderer, are converted to PNG and written atomically,
//! consumed by batch encoding, and reclaimed when the batch (or the whole
//! session) is done with them.
//!
//! # Architecture
//!
//! ```text
//! renderer ──save_frame──▶ ┌───────────────────────────────┐
//!                          │           FrameStore          │
//!                          │  session registry (id → dirs) │
//!                          │  retry-encode → tmp → rename  │
//!                          │  verify → frames/frame_N.png  │
//!                          └──────────────┬────────────────┘
//!                                         │ cleanup_frames / cleanup_session
//!                             orphan sweep (retention window)
//! ```

pub mod encode;
pub mod session;
pub mod stats;
pub mod store;

pub use session::*;
pub use stats::{StorageStats, directory_size};
pub use store::{spawn_sweeper, FrameStore, MAX_FRAME_DIMENSION, MIN_FRAME_FILE_BYTES};
