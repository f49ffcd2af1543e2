//! Export session records and on-disk naming conventions.
//!
//! Each export session owns one directory tree under the store root:
//!
//! ```text
//! <temp_root>/session_<id>/
//!   frames/   frame_000000.png, frame_000001.png, ...
//!   batches/  batch_0000.mp4, batch_0001.mp4, ...
//!   output/   final deliverable
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Printf-style pattern the external encoder uses to read the frame sequence.
pub const FRAME_FILE_PATTERN: &str = "frame_%06d.png";

/// A session's directory layout plus lifecycle timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Caller-supplied session identifier.
    pub id: String,

    /// Session root directory.
    pub root: PathBuf,

    /// Staged frame images.
    pub frames_dir: PathBuf,

    /// Intermediate batch segments.
    pub batches_dir: PathBuf,

    /// Final output artifacts.
    pub output_dir: PathBuf,

    /// When the session record was created.
    pub created_at: DateTime<Utc>,

    /// Refreshed on every frame write or batch operation.
    pub last_access: DateTime<Utc>,
}

impl SessionInfo {
    /// Build the record for a session rooted under `store_root`.
    pub fn new(store_root: &Path, id: impl Into<String>) -> Self {
        let id = id.into();
        let root = store_root.join(session_dir_name(&id));
        let now = Utc::now();
        Self {
            frames_dir: root.join("frames"),
            batches_dir: root.join("batches"),
            output_dir: root.join("output"),
            root,
            id,
            created_at: now,
            last_access: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_access = Utc::now();
    }

    /// Canonical path for the frame with the given zero-based index.
    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.frames_dir.join(frame_file_name(index))
    }

    /// Canonical path for the segment produced by the given batch index.
    pub fn batch_path(&self, index: u32) -> PathBuf {
        self.batches_dir.join(batch_file_name(index))
    }
}

/// Directory name for a session id.
pub fn session_dir_name(id: &str) -> String {
    format!("session_{id}")
}

/// Zero-padded canonical frame filename.
pub fn frame_file_name(index: u64) -> String {
    format!("frame_{index:06}.png")
}

/// Zero-padded canonical batch segment filename.
pub fn batch_file_name(index: u32) -> String {
    format!("batch_{index:04}.mp4")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_are_zero_padded() {
        assert_eq!(frame_file_name(0), "frame_000000.png");
        assert_eq!(frame_file_name(1234), "frame_001234.png");
        assert_eq!(batch_file_name(7), "batch_0007.mp4");
    }

    #[test]
    fn session_layout_has_three_subdirectories() {
        let info = SessionInfo::new(Path::new("/tmp/store"), "abc");
        assert_eq!(info.root, Path::new("/tmp/store/session_abc"));
        assert_eq!(info.frames_dir, info.root.join("frames"));
        assert_eq!(info.batches_dir, info.root.join("batches"));
        assert_eq!(info.output_dir, info.root.join("output"));
    }

    #[test]
    fn frame_path_uses_canonical_name() {
        let info = SessionInfo::new(Path::new("/tmp/store"), "abc");
        assert!(info
            .frame_path(42)
            .ends_with("session_abc/frames/frame_000042.png"));
    }
}
