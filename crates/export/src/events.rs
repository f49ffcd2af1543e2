//! Export phases, progress notifications, and observer fan-out.
//!
//! The pipeline never talks to a specific transport: any number of
//! registered endpoints (an in-process callback, a channel bridge, an RPC
//! proxy) receive the same [`ExportEvent`] stream.

use std::path::PathBuf;
use std::sync::Mutex;

use serde::Serialize;

use versemotion_encoder::EncodeProgress;

/// Phase of an export job's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportPhase {
    Preparing,
    Capturing,
    BatchCreation,
    Composition,
    Finalizing,
    Completed,
    Failed,
    Cancelled,
}

impl ExportPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preparing => "preparing",
            Self::Capturing => "capturing",
            Self::BatchCreation => "batch_creation",
            Self::Composition => "composition",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Fixed overall-progress checkpoints per phase (percent).
pub mod checkpoints {
    pub const PREPARING: f64 = 2.0;
    pub const CAPTURING: f64 = 8.0;
    pub const BATCH_START: f64 = 10.0;
    pub const BATCH_END: f64 = 75.0;
    pub const COMPOSE_START: f64 = 80.0;
    pub const COMPOSE_END: f64 = 92.0;
    pub const FINALIZING: f64 = 96.0;
    pub const COMPLETE: f64 = 100.0;
}

/// Overall percentage while encoding batch `done` of `total`, with `intra`
/// being the in-flight batch's own completion ratio in `[0, 1]`.
pub fn batch_progress(done: u32, total: u32, intra: f64) -> f64 {
    if total == 0 {
        return checkpoints::BATCH_END;
    }
    let span = checkpoints::BATCH_END - checkpoints::BATCH_START;
    let fraction = (f64::from(done) + intra.clamp(0.0, 1.0)) / f64::from(total);
    checkpoints::BATCH_START + span * fraction.clamp(0.0, 1.0)
}

/// One progress notification mirrored out of the orchestrator.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub session_id: String,
    pub phase: ExportPhase,

    /// Overall 0-100 estimate with fixed per-phase checkpoints.
    pub percent: f64,

    /// One-based index of the batch currently encoding.
    pub current_batch: Option<u32>,
    pub total_batches: Option<u32>,

    /// Latest raw encoder status snapshot, when one is available.
    pub encoder: Option<EncodeProgress>,
}

/// Notification fanned out to every registered observer.
#[derive(Debug, Clone, Serialize)]
pub enum ExportEvent {
    Progress(ProgressUpdate),
    Completed {
        session_id: String,
        output_path: PathBuf,
    },
    Failed {
        session_id: String,
        code: String,
        message: String,
    },
}

/// Registry of observer endpoints.
#[derive(Default)]
pub struct ObserverSet {
    observers: Mutex<Vec<Box<dyn Fn(&ExportEvent) + Send + Sync>>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Box<dyn Fn(&ExportEvent) + Send + Sync>) {
        self.lock().push(observer);
    }

    pub fn emit(&self, event: &ExportEvent) {
        for observer in self.lock().iter() {
            observer(event);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[allow(clippy::type_complexity)]
    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Box<dyn Fn(&ExportEvent) + Send + Sync>>> {
        self.observers.lock().unwrap_or_else(|p| p.into_inner())
    }
}
