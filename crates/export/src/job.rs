//! Export job model and batch partitioning.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use versemotion_common::{GapPolicy, VersemotionError, VersemotionResult};
use versemotion_encoder::QualityTier;
use versemotion_frame_store::{frame_file_name, SessionInfo};

/// Output options for one user-requested export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Output resolution. Frames are expected to be rendered at this size.
    pub width: u32,
    pub height: u32,

    /// Output frame rate.
    pub fps: u32,

    pub quality: QualityTier,

    /// Number of staged frames in the session, indices `[0, total_frames)`.
    pub total_frames: u64,

    /// Frames per intermediate segment; falls back to the configured default.
    pub batch_size: Option<u32>,

    /// Optional audio track muxed during composition.
    pub audio_path: Option<PathBuf>,

    /// Final deliverable. Relative paths land in the session output directory.
    pub output_path: PathBuf,
}

impl ExportOptions {
    pub fn resolved_output(&self, session: &SessionInfo) -> PathBuf {
        if self.output_path.is_absolute() {
            self.output_path.clone()
        } else {
            session.output_dir.join(&self.output_path)
        }
    }
}

/// One entry in the export queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRequest {
    pub session_id: String,
    pub options: ExportOptions,
}

/// A contiguous half-open range of frame indices assigned to one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRange {
    pub index: u32,

    /// First frame in the range (inclusive).
    pub start_frame: u64,

    /// One past the last frame (exclusive).
    pub end_frame: u64,
}

impl BatchRange {
    pub fn frame_count(&self) -> u64 {
        self.end_frame.saturating_sub(self.start_frame)
    }

    /// Canonical filenames of the frames this batch consumes.
    pub fn frame_names(&self) -> Vec<String> {
        (self.start_frame..self.end_frame)
            .map(frame_file_name)
            .collect()
    }
}

/// Split `[0, total_frames)` into contiguous batches of `batch_size` frames
/// (the final batch may be shorter).
pub fn partition_batches(total_frames: u64, batch_size: u32) -> Vec<BatchRange> {
    let batch_size = u64::from(batch_size.max(1));
    let mut batches = Vec::new();
    let mut start = 0u64;
    while start < total_frames {
        let end = (start + batch_size).min(total_frames);
        batches.push(BatchRange {
            index: batches.len() as u32,
            start_frame: start,
            end_frame: end,
        });
        start = end;
    }
    batches
}

/// Check that consecutive batches line up exactly.
///
/// A discontinuity means frames would be silently skipped or doubled in the
/// final output. Policy decides whether that is a warning or a hard abort.
pub fn enforce_continuity(batches: &[BatchRange], policy: GapPolicy) -> VersemotionResult<()> {
    for pair in batches.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.start_frame != prev.end_frame {
            match policy {
                GapPolicy::Warn => {
                    tracing::warn!(
                        batch = next.index,
                        expected_start = prev.end_frame,
                        actual_start = next.start_frame,
                        "Batch range discontinuity; encoding continues with missing content"
                    );
                }
                GapPolicy::Abort => {
                    return Err(VersemotionError::validation(format!(
                        "batch {} starts at frame {} but batch {} ended at {}",
                        next.index, next.start_frame, prev.index, prev.end_frame
                    )));
                }
            }
        }
    }
    Ok(())
}
