//! Abstract interface over the external encoding process.
//!
//! The orchestrator only ever talks to this trait; the production
//! implementation shells out to ffmpeg, and tests substitute a stub.

use std::path::PathBuf;

use versemotion_common::VersemotionResult;

use crate::commands::{BatchEncodeJob, ComposeJob};
use crate::progress::ProgressSink;

#[async_trait::async_trait]
pub trait EncoderBackend: Send + Sync {
    /// Probe the encoder binary. Called once at service initialization;
    /// failure blocks all export work.
    async fn verify_available(&self) -> VersemotionResult<()>;

    /// Encode one contiguous frame range into an intermediate segment.
    async fn encode_batch(
        &self,
        job: &BatchEncodeJob,
        progress: Option<ProgressSink>,
    ) -> VersemotionResult<PathBuf>;

    /// Concatenate segments (plus optional audio) into the final file.
    async fn compose_final(
        &self,
        job: &ComposeJob,
        progress: Option<ProgressSink>,
    ) -> VersemotionResult<PathBuf>;

    /// Terminate the in-flight child process, if any.
    async fn cancel(&self) -> VersemotionResult<()>;

    /// True iff a child process handle is currently held.
    fn is_busy(&self) -> bool;

    /// Backend name for logs.
    fn name(&self) -> &str;
}
