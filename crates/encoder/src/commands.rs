//! Argument construction for the two encoder job shapes.
//!
//! Job 1 encodes a contiguous frame range into one intermediate segment;
//! job 2 concatenates the segments (optionally muxing an audio track) into
//! the final deliverable. Both force constant frame rate, a web-safe 8-bit
//! pixel format, and streaming-friendly (moov-atom-first) output layout.

use std::path::{Path, PathBuf};

use versemotion_common::VersemotionResult;
use versemotion_frame_store::FRAME_FILE_PATTERN;

use crate::quality::QualityTier;

/// Filename of the concat list written next to the batch segments.
pub const CONCAT_MANIFEST_NAME: &str = "concat_manifest.txt";

/// Encode the frame range `[start_frame, end_frame)` into one segment.
#[derive(Debug, Clone)]
pub struct BatchEncodeJob {
    /// Directory holding the staged frame images.
    pub frames_dir: PathBuf,

    /// First frame index in the range (inclusive).
    pub start_frame: u64,

    /// One past the last frame index (exclusive).
    pub end_frame: u64,

    /// Input and output frame rate.
    pub fps: u32,

    /// Output resolution (frames are rendered at this size already).
    pub width: u32,
    pub height: u32,

    pub quality: QualityTier,

    /// Segment file to produce.
    pub output_path: PathBuf,
}

impl BatchEncodeJob {
    pub fn frame_count(&self) -> u64 {
        self.end_frame.saturating_sub(self.start_frame)
    }
}

/// Concatenate batch segments into the final output file.
#[derive(Debug, Clone)]
pub struct ComposeJob {
    /// Segment files in playback order.
    pub segments: Vec<PathBuf>,

    /// Directory the concat manifest is written into (inside the session).
    pub manifest_dir: PathBuf,

    /// Optional audio track; output is truncated to the shorter stream.
    pub audio_path: Option<PathBuf>,

    /// Final deliverable path.
    pub output_path: PathBuf,
}

impl ComposeJob {
    /// Where the concat manifest for this job lives.
    pub fn manifest_path(&self) -> PathBuf {
        self.manifest_dir.join(CONCAT_MANIFEST_NAME)
    }
}

/// Argument vector for a batch encode.
pub fn batch_encode_args(job: &BatchEncodeJob) -> Vec<String> {
    let pattern = job.frames_dir.join(FRAME_FILE_PATTERN);
    vec![
        "-framerate".to_string(),
        job.fps.to_string(),
        "-start_number".to_string(),
        job.start_frame.to_string(),
        "-i".to_string(),
        pattern.display().to_string(),
        "-frames:v".to_string(),
        job.frame_count().to_string(),
        "-vsync".to_string(),
        "cfr".to_string(),
        "-r".to_string(),
        job.fps.to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        job.quality.preset().to_string(),
        "-crf".to_string(),
        job.quality.crf().to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        "-y".to_string(),
        job.output_path.display().to_string(),
    ]
}

/// Argument vector for the final concatenation.
pub fn compose_args(manifest: &Path, job: &ComposeJob) -> Vec<String> {
    let mut args = vec![
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        manifest.display().to_string(),
    ];

    match &job.audio_path {
        Some(audio) => {
            // Copy the video stream untouched, re-encode audio to AAC, and
            // truncate to the shorter of the two streams.
            args.extend([
                "-i".to_string(),
                audio.display().to_string(),
                "-c:v".to_string(),
                "copy".to_string(),
                "-c:a".to_string(),
                "aac".to_string(),
                "-b:a".to_string(),
                "128k".to_string(),
                "-shortest".to_string(),
            ]);
        }
        None => {
            args.extend(["-c".to_string(), "copy".to_string()]);
        }
    }

    args.extend([
        "-movflags".to_string(),
        "+faststart".to_string(),
        "-y".to_string(),
        job.output_path.display().to_string(),
    ]);
    args
}

/// Write the newline-delimited list-of-files manifest for a compose job.
pub async fn write_concat_manifest(job: &ComposeJob) -> VersemotionResult<PathBuf> {
    let mut body = String::new();
    for segment in &job.segments {
        body.push_str(&format!("file '{}'\n", escape_concat_path(segment)));
    }

    let manifest = job.manifest_path();
    tokio::fs::write(&manifest, body).await?;
    Ok(manifest)
}

/// Escape a path for a single-quoted concat manifest entry.
fn escape_concat_path(path: &Path) -> String {
    path.display().to_string().replace('\'', "'\\''")
}
