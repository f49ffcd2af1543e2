//! External encoder process lifecycle.
//!
//! One `EncoderProcess` wraps one child-process invocation and moves through
//! `NotStarted -> Running -> {Exited(code) | Killed}`. The status stream is
//! drained concurrently (the child must never stall on a full pipe) and fed
//! through a [`ProgressParser`]; the full captured text is embedded in the
//! error when the process fails.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::Notify;

use versemotion_common::{VersemotionError, VersemotionResult};

use crate::progress::{ProgressParser, ProgressSink};

/// Maximum status-stream characters embedded in a failure error.
const TRANSCRIPT_TAIL_CHARS: usize = 4000;

/// Lifecycle of one external encoder invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running,
    Exited(i32),
    Killed,
}

/// Captured output of a successfully completed process.
#[derive(Debug)]
pub struct ProcessOutput {
    /// Full status-stream text produced by the child.
    pub transcript: String,
}

/// One invocation of the external encoder binary.
pub struct EncoderProcess {
    binary: PathBuf,
    args: Vec<String>,
    state: ProcessState,
}

impl EncoderProcess {
    pub fn new(binary: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            args,
            state: ProcessState::NotStarted,
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Spawn the child and drive it to completion.
    ///
    /// `cancel` kills the child mid-flight; that path resolves to
    /// [`VersemotionError::Cancelled`]. Spawn failure is `EncoderUnavailable`;
    /// a non-zero exit is `EncoderFailed` with the captured status text.
    pub async fn run(
        &mut self,
        cancel: Arc<Notify>,
        mut parser: ProgressParser,
        sink: Option<ProgressSink>,
    ) -> VersemotionResult<ProcessOutput> {
        if self.state != ProcessState::NotStarted {
            return Err(VersemotionError::encoder_failed(
                "encoder process handle already consumed",
            ));
        }

        tracing::debug!(binary = %self.binary.display(), args = ?self.args, "Spawning encoder");
        let mut child = Command::new(&self.binary)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                VersemotionError::encoder_unavailable(format!(
                    "failed to spawn {}: {e}",
                    self.binary.display()
                ))
            })?;
        self.state = ProcessState::Running;

        let stderr = child.stderr.take().ok_or_else(|| {
            VersemotionError::encoder_failed("failed to capture encoder status stream")
        })?;

        // Drain the status stream concurrently so the child never blocks on a
        // full pipe, scanning each chunk as it arrives.
        let reader = tokio::spawn(async move {
            let mut stderr = stderr;
            let mut transcript = String::new();
            let mut buf = vec![0u8; 8192];
            loop {
                match stderr.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                        transcript.push_str(&chunk);
                        if parser.ingest(&chunk) {
                            if let Some(sink) = &sink {
                                sink(parser.snapshot().clone());
                            }
                        }
                    }
                    Err(_) => break,
                }
            }
            transcript
        });

        let mut killed = false;
        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| {
                VersemotionError::encoder_failed(format!("failed to wait for encoder: {e}"))
            })?,
            _ = cancel.notified() => {
                killed = true;
                child.start_kill().ok();
                child.wait().await.map_err(|e| {
                    VersemotionError::encoder_failed(format!(
                        "failed to reap killed encoder: {e}"
                    ))
                })?
            }
        };

        let transcript = reader
            .await
            .unwrap_or_else(|_| "<status stream reader failed>".to_string());

        if killed {
            self.state = ProcessState::Killed;
            tracing::info!("Encoder process terminated by request");
            return Err(VersemotionError::cancelled(
                "encoder process terminated by request",
            ));
        }

        let code = status.code().unwrap_or(-1);
        self.state = ProcessState::Exited(code);
        if !status.success() {
            return Err(VersemotionError::encoder_failed(format!(
                "encoder exited with status {status}: {}",
                tail(&transcript, TRANSCRIPT_TAIL_CHARS)
            )));
        }

        Ok(ProcessOutput { transcript })
    }
}

fn tail(text: &str, max_chars: usize) -> &str {
    let text = text.trim();
    match text.char_indices().rev().nth(max_chars.saturating_sub(1)) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}
