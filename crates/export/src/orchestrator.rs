//! End-to-end sequencing of export jobs.
//!
//! One pipeline instance owns the FIFO job queue and drives each job through
//! `Preparing -> Capturing -> BatchCreation -> Composition -> Finalizing`.
//! Batches are encoded strictly in index order and each batch's consumed
//! frames are deleted only after its segment is verified, which bounds peak
//! disk usage to roughly one batch of raw frames.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use versemotion_common::{ExportDefaults, VersemotionError, VersemotionResult};
use versemotion_encoder::{
    BatchEncodeJob, ComposeJob, EncoderBackend, ProgressSink,
};
use versemotion_frame_store::{FrameStore, SessionInfo};

use crate::events::{batch_progress, checkpoints, ExportEvent, ExportPhase, ObserverSet, ProgressUpdate};
use crate::job::{enforce_continuity, partition_batches, ExportOptions, ExportRequest};

/// Segments below this size are treated as truncated encoder output.
const MIN_SEGMENT_BYTES: u64 = 256;

/// Queue owner and job driver. Exactly one job encodes at a time.
pub struct ExportPipeline {
    store: Arc<FrameStore>,
    encoder: Arc<dyn EncoderBackend>,
    observers: Arc<ObserverSet>,
    defaults: ExportDefaults,
    queue: Mutex<VecDeque<ExportRequest>>,
    draining: AtomicBool,
    cancelled: AtomicBool,
    active_session: Mutex<Option<String>>,
}

impl ExportPipeline {
    pub fn new(
        store: Arc<FrameStore>,
        encoder: Arc<dyn EncoderBackend>,
        observers: Arc<ObserverSet>,
        defaults: ExportDefaults,
    ) -> Self {
        Self {
            store,
            encoder,
            observers,
            defaults,
            queue: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            active_session: Mutex::new(None),
        }
    }

    /// Append a job to the queue and make sure a drain loop is running.
    /// Returns the queue length after insertion.
    pub fn enqueue(self: Arc<Self>, request: ExportRequest) -> usize {
        // A fresh request lifts any previous cancellation.
        self.cancelled.store(false, Ordering::SeqCst);

        let depth = {
            let mut queue = self.lock_queue();
            queue.push_back(request);
            queue.len()
        };

        if !self.draining.swap(true, Ordering::SeqCst) {
            let pipeline = Arc::clone(&self);
            tokio::spawn(async move { pipeline.drain().await });
        }
        depth
    }

    pub fn queue_size(&self) -> usize {
        self.lock_queue().len()
    }

    pub fn is_processing(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub fn active_session(&self) -> Option<String> {
        self.lock_active().clone()
    }

    /// Cancel the in-flight job and every queued one.
    ///
    /// The active encoder process is killed; queued jobs never start; every
    /// affected session is cleaned up settle-all style (one failure never
    /// blocks the others). Cancellation is not reported as an error.
    pub async fn cancel_all(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Err(e) = self.encoder.cancel().await {
            tracing::warn!(error = %e, "Failed to signal encoder cancellation");
        }

        // The active job observes the killed process (or the stop flag) and
        // cleans its own session up on the way out; here we settle the
        // queued jobs that will never run.
        let abandoned: Vec<ExportRequest> = self.lock_queue().drain(..).collect();
        for request in abandoned {
            if let Err(e) = self.store.cleanup_session(&request.session_id).await {
                tracing::warn!(session = %request.session_id, error = %e, "Cleanup of queued session failed");
            }
            self.emit_progress(&request.session_id, ExportPhase::Cancelled, 0.0, None, None);
        }
    }

    /// Process queued jobs strictly FIFO until the queue stays empty.
    async fn drain(self: Arc<Self>) {
        loop {
            let next = self.lock_queue().pop_front();
            match next {
                Some(request) => {
                    if self.cancelled.load(Ordering::SeqCst) {
                        // Flag flipped between enqueue and pickup; the job
                        // never starts and its session is reclaimed.
                        if let Err(e) = self.store.cleanup_session(&request.session_id).await {
                            tracing::warn!(session = %request.session_id, error = %e, "Cleanup of cancelled session failed");
                        }
                        self.emit_progress(
                            &request.session_id,
                            ExportPhase::Cancelled,
                            0.0,
                            None,
                            None,
                        );
                        continue;
                    }

                    *self.lock_active() = Some(request.session_id.clone());
                    let result = self.run_job(&request).await;
                    *self.lock_active() = None;
                    self.confirm_removed(&request.session_id);

                    match result {
                        Ok(output_path) => {
                            self.emit_progress(
                                &request.session_id,
                                ExportPhase::Completed,
                                checkpoints::COMPLETE,
                                None,
                                None,
                            );
                            self.observers.emit(&ExportEvent::Completed {
                                session_id: request.session_id.clone(),
                                output_path,
                            });
                        }
                        Err(e) if e.is_cancelled() => {
                            tracing::info!(session = %request.session_id, "Export cancelled");
                            self.cleanup_after_abort(&request.session_id).await;
                            self.emit_progress(
                                &request.session_id,
                                ExportPhase::Cancelled,
                                0.0,
                                None,
                                None,
                            );
                        }
                        Err(e) => {
                            tracing::error!(session = %request.session_id, error = %e, "Export failed");
                            self.cleanup_after_abort(&request.session_id).await;
                            self.observers.emit(&ExportEvent::Failed {
                                session_id: request.session_id.clone(),
                                code: e.code().to_string(),
                                message: e.to_string(),
                            });
                        }
                    }
                }
                None => {
                    self.draining.store(false, Ordering::SeqCst);
                    // A job enqueued after the final pop but before the flag
                    // cleared would otherwise be stranded until the next
                    // enqueue; re-check and re-enter if we win the guard back.
                    if !self.lock_queue().is_empty()
                        && !self.draining.swap(true, Ordering::SeqCst)
                    {
                        continue;
                    }
                    break;
                }
            }
        }
    }

    /// Drive one job through all phases. Any error aborts the job; the drain
    /// loop turns it into a `Failed` (or `Cancelled`) notification plus
    /// session cleanup.
    async fn run_job(&self, request: &ExportRequest) -> VersemotionResult<PathBuf> {
        let session_id = &request.session_id;
        let options = &request.options;

        // Preparing: session ensured to exist.
        self.emit_progress(session_id, ExportPhase::Preparing, checkpoints::PREPARING, None, None);
        let session = self.ensure_session(session_id).await?;

        // Capturing: handoff checkpoint. The renderer has already staged its
        // frames through save_frame; verify what actually arrived.
        self.emit_progress(session_id, ExportPhase::Capturing, checkpoints::CAPTURING, None, None);
        self.verify_staged_frames(&session, options).await;

        // BatchCreation: encode contiguous ranges strictly in order.
        let batch_size = options.batch_size.unwrap_or(self.defaults.batch_size);
        let batches = partition_batches(options.total_frames, batch_size);
        if batches.is_empty() {
            return Err(VersemotionError::validation(
                "export requested with zero frames",
            ));
        }
        enforce_continuity(&batches, self.defaults.gap_policy)?;

        let total_batches = batches.len() as u32;
        let mut segments = Vec::with_capacity(batches.len());
        for batch in &batches {
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(VersemotionError::cancelled("export cancelled"));
            }

            self.emit_batch_progress(session_id, batch.index, total_batches, 0.0, None);
            let encode_job = BatchEncodeJob {
                frames_dir: session.frames_dir.clone(),
                start_frame: batch.start_frame,
                end_frame: batch.end_frame,
                fps: options.fps,
                width: options.width,
                height: options.height,
                quality: options.quality,
                output_path: session.batch_path(batch.index),
            };
            let sink = self.batch_sink(session_id, batch.index, total_batches);
            let segment = self.encoder.encode_batch(&encode_job, Some(sink)).await?;

            self.verify_segment(&segment).await?;

            // The segment is durable; the raw frames it consumed can go.
            self.store
                .cleanup_frames(session_id, &batch.frame_names())
                .await?;
            segments.push(segment);
        }

        // Composition: join the segments (and optional audio).
        self.emit_progress(session_id, ExportPhase::Composition, checkpoints::COMPOSE_START, None, None);
        let compose_job = ComposeJob {
            segments,
            manifest_dir: session.batches_dir.clone(),
            audio_path: options.audio_path.clone(),
            output_path: options.resolved_output(&session),
        };
        let sink = self.compose_sink(session_id);
        let output_path = self
            .encoder
            .compose_final(&compose_job, Some(sink))
            .await?;

        // Finalizing: drop transient state and report the deliverable.
        self.emit_progress(session_id, ExportPhase::Finalizing, checkpoints::FINALIZING, None, None);
        match tokio::fs::remove_file(compose_job.manifest_path()).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(error = %e, "Failed to remove concat manifest"),
        }
        self.store.touch_session(session_id).await;

        tracing::info!(session = %session_id, output = %output_path.display(), "Export complete");
        Ok(output_path)
    }

    async fn ensure_session(&self, session_id: &str) -> VersemotionResult<SessionInfo> {
        match self.store.session_info(session_id).await {
            Ok(session) => Ok(session),
            Err(_) => self.store.create_session(session_id).await,
        }
    }

    async fn verify_staged_frames(&self, session: &SessionInfo, options: &ExportOptions) {
        let mut present = 0u64;
        for index in 0..options.total_frames {
            if tokio::fs::try_exists(session.frame_path(index))
                .await
                .unwrap_or(false)
            {
                present += 1;
            }
        }
        if present < options.total_frames {
            tracing::warn!(
                session = %session.id,
                present,
                expected = options.total_frames,
                "Staged frames missing at capture handoff"
            );
        }
    }

    async fn verify_segment(&self, segment: &PathBuf) -> VersemotionResult<()> {
        let meta = tokio::fs::metadata(segment).await.map_err(|e| {
            VersemotionError::encoder_failed(format!(
                "segment {} missing after encode: {e}",
                segment.display()
            ))
        })?;
        if meta.len() < MIN_SEGMENT_BYTES {
            return Err(VersemotionError::encoder_failed(format!(
                "segment {} is only {} bytes",
                segment.display(),
                meta.len()
            )));
        }
        Ok(())
    }

    /// Best-effort session cleanup after a failed or cancelled job.
    async fn cleanup_after_abort(&self, session_id: &str) {
        if let Err(e) = self.store.cleanup_session(session_id).await {
            tracing::warn!(session = %session_id, error = %e, "Session cleanup after abort failed");
        }
    }

    /// Confirmation removal: the job was popped before processing, so any
    /// remaining entry under the same session id is stale.
    fn confirm_removed(&self, session_id: &str) {
        let mut queue = self.lock_queue();
        let before = queue.len();
        queue.retain(|r| r.session_id != session_id);
        if queue.len() != before {
            tracing::warn!(session = %session_id, "Removed stale queue entries at job completion");
        }
    }

    fn batch_sink(&self, session_id: &str, batch_index: u32, total_batches: u32) -> ProgressSink {
        let observers = Arc::clone(&self.observers);
        let session_id = session_id.to_string();
        Arc::new(move |snapshot| {
            observers.emit(&ExportEvent::Progress(ProgressUpdate {
                session_id: session_id.clone(),
                phase: ExportPhase::BatchCreation,
                percent: batch_progress(batch_index, total_batches, snapshot.ratio),
                current_batch: Some(batch_index + 1),
                total_batches: Some(total_batches),
                encoder: Some(snapshot),
            }));
        })
    }

    fn compose_sink(&self, session_id: &str) -> ProgressSink {
        let observers = Arc::clone(&self.observers);
        let session_id = session_id.to_string();
        Arc::new(move |snapshot| {
            let span = checkpoints::COMPOSE_END - checkpoints::COMPOSE_START;
            observers.emit(&ExportEvent::Progress(ProgressUpdate {
                session_id: session_id.clone(),
                phase: ExportPhase::Composition,
                percent: checkpoints::COMPOSE_START + span * snapshot.ratio,
                current_batch: None,
                total_batches: None,
                encoder: Some(snapshot),
            }));
        })
    }

    fn emit_batch_progress(
        &self,
        session_id: &str,
        batch_index: u32,
        total_batches: u32,
        intra: f64,
        encoder: Option<versemotion_encoder::EncodeProgress>,
    ) {
        self.observers.emit(&ExportEvent::Progress(ProgressUpdate {
            session_id: session_id.to_string(),
            phase: ExportPhase::BatchCreation,
            percent: batch_progress(batch_index, total_batches, intra),
            current_batch: Some(batch_index + 1),
            total_batches: Some(total_batches),
            encoder,
        }));
    }

    fn emit_progress(
        &self,
        session_id: &str,
        phase: ExportPhase,
        percent: f64,
        current_batch: Option<u32>,
        total_batches: Option<u32>,
    ) {
        self.observers.emit(&ExportEvent::Progress(ProgressUpdate {
            session_id: session_id.to_string(),
            phase,
            percent,
            current_batch,
            total_batches,
            encoder: None,
        }));
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<ExportRequest>> {
        self.queue.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<String>> {
        self.active_session.lock().unwrap_or_else(|p| p.into_inner())
    }
}
