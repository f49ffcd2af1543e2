//! ffmpeg-backed implementation of [`EncoderBackend`].
//!
//! We intentionally drive the system `ffmpeg` binary rather than linking
//! codec libraries: the binary is what the authoring tool ships against, and
//! it keeps the build free of native codec headers.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use versemotion_common::{VersemotionError, VersemotionResult};
use versemotion_frame_store::frame_file_name;

use crate::backend::EncoderBackend;
use crate::commands::{
    batch_encode_args, compose_args, write_concat_manifest, BatchEncodeJob, ComposeJob,
};
use crate::process::EncoderProcess;
use crate::progress::{ProgressParser, ProgressSink};

/// Segments smaller than this trigger the size-sanity warning outright.
const MIN_PLAUSIBLE_SEGMENT_BYTES: u64 = 1024;

/// Factor by which the actual segment size may deviate from the rough
/// estimate before the sanity check logs a warning.
const SIZE_SANITY_FACTOR: f64 = 20.0;

/// Adapter around a system-installed ffmpeg binary.
///
/// Owns at most one in-flight child process at a time; the slot holds the
/// cancel signal for whichever invocation is currently running.
pub struct FfmpegEncoder {
    binary: PathBuf,
    active: Mutex<Option<Arc<Notify>>>,
}

impl FfmpegEncoder {
    /// Use `ffmpeg` from the search path.
    pub fn new() -> Self {
        Self::with_binary("ffmpeg")
    }

    /// Use an explicit encoder binary path.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            active: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<Notify>>> {
        // Recover from a poisoned lock; the slot only holds a cancel signal.
        self.active.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn run_process(
        &self,
        args: Vec<String>,
        expected_frames: u64,
        sink: Option<ProgressSink>,
    ) -> VersemotionResult<()> {
        let cancel = Arc::new(Notify::new());
        {
            let mut slot = self.slot();
            if slot.is_some() {
                return Err(VersemotionError::encoder_failed(
                    "another encoder process is already in flight",
                ));
            }
            *slot = Some(cancel.clone());
        }

        let mut process = EncoderProcess::new(&self.binary, args);
        let result = process
            .run(cancel, ProgressParser::new(expected_frames), sink)
            .await;
        *self.slot() = None;
        result.map(|_| ())
    }
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl EncoderBackend for FfmpegEncoder {
    async fn verify_available(&self) -> VersemotionResult<()> {
        let status = tokio::process::Command::new(&self.binary)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                VersemotionError::encoder_unavailable(format!(
                    "{} not reachable: {e}",
                    self.binary.display()
                ))
            })?;
        if !status.success() {
            return Err(VersemotionError::encoder_unavailable(format!(
                "{} -version exited with {status}",
                self.binary.display()
            )));
        }
        Ok(())
    }

    async fn encode_batch(
        &self,
        job: &BatchEncodeJob,
        progress: Option<ProgressSink>,
    ) -> VersemotionResult<PathBuf> {
        preflight_frames(job).await;

        tracing::info!(
            start = job.start_frame,
            end = job.end_frame,
            fps = job.fps,
            quality = %job.quality,
            output = %job.output_path.display(),
            "Encoding batch segment"
        );
        self.run_process(batch_encode_args(job), job.frame_count(), progress)
            .await?;

        check_segment_size(job).await;
        Ok(job.output_path.clone())
    }

    async fn compose_final(
        &self,
        job: &ComposeJob,
        progress: Option<ProgressSink>,
    ) -> VersemotionResult<PathBuf> {
        let manifest = write_concat_manifest(job).await?;
        tracing::info!(
            segments = job.segments.len(),
            audio = job.audio_path.is_some(),
            output = %job.output_path.display(),
            "Composing final output"
        );
        self.run_process(compose_args(&manifest, job), 0, progress)
            .await?;
        Ok(job.output_path.clone())
    }

    async fn cancel(&self) -> VersemotionResult<()> {
        if let Some(cancel) = self.slot().as_ref() {
            cancel.notify_one();
            tracing::info!("Cancellation signalled to in-flight encoder process");
        }
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.slot().is_some()
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

/// Check every expected frame file exists before invoking the encoder.
/// Missing frames are warnings only; the encoder will simply run short.
async fn preflight_frames(job: &BatchEncodeJob) {
    let mut missing = 0u64;
    let mut first_missing: Option<PathBuf> = None;
    for index in job.start_frame..job.end_frame {
        let path = job.frames_dir.join(frame_file_name(index));
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            if first_missing.is_none() {
                first_missing = Some(path);
            }
            missing += 1;
        }
    }
    if missing > 0 {
        tracing::warn!(
            missing,
            expected = job.frame_count(),
            first = %first_missing.unwrap_or_default().display(),
            "Frame files missing before batch encode; segment will run short"
        );
    }
}

/// Re-stat the produced segment and log (never fail) when its size is far
/// from a rough bits-per-pixel estimate.
async fn check_segment_size(job: &BatchEncodeJob) {
    let actual = match tokio::fs::metadata(&job.output_path).await {
        Ok(meta) => meta.len(),
        Err(e) => {
            tracing::warn!(path = %job.output_path.display(), error = %e, "Could not stat produced segment");
            return;
        }
    };

    let expected = expected_segment_bytes(job);
    let suspicious = actual < MIN_PLAUSIBLE_SEGMENT_BYTES
        || (actual as f64) < expected / SIZE_SANITY_FACTOR
        || (actual as f64) > expected * SIZE_SANITY_FACTOR;
    if suspicious {
        tracing::warn!(
            actual_bytes = actual,
            expected_bytes = expected as u64,
            path = %job.output_path.display(),
            "Segment size far from estimate"
        );
    } else {
        tracing::debug!(actual_bytes = actual, "Segment size within expectations");
    }
}

fn expected_segment_bytes(job: &BatchEncodeJob) -> f64 {
    let pixels_per_frame = job.width as f64 * job.height as f64;
    job.frame_count() as f64 * pixels_per_frame * job.quality.bits_per_pixel() / 8.0
}

/// Convenience probe used by callers that only need a yes/no answer.
pub async fn is_encoder_on_path(binary: &Path) -> bool {
    FfmpegEncoder::with_binary(binary)
        .verify_available()
        .await
        .is_ok()
}
