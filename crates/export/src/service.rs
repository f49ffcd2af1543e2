//! Public-facing export facade.
//!
//! The only entry point the shell/UI process calls. One `ExportService` is
//! constructed at process start, handed to callers explicitly, and torn down
//! with [`ExportService::dispose`] at shutdown; there is no ambient global
//! state anywhere in the pipeline.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use versemotion_common::{AppConfig, VersemotionResult};
use versemotion_encoder::{BatchEncodeJob, ComposeJob, EncoderBackend};
use versemotion_frame_store::{spawn_sweeper, FrameStore, SessionInfo, StorageStats};

use crate::events::{ExportEvent, ObserverSet};
use crate::job::{BatchRange, ExportOptions, ExportRequest};
use crate::orchestrator::ExportPipeline;

pub struct ExportService {
    store: Arc<FrameStore>,
    encoder: Arc<dyn EncoderBackend>,
    observers: Arc<ObserverSet>,
    pipeline: Arc<ExportPipeline>,
    sweeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ExportService {
    /// Build the service and start the orphan sweeper.
    pub async fn new(
        config: AppConfig,
        encoder: Arc<dyn EncoderBackend>,
    ) -> VersemotionResult<Self> {
        let store = Arc::new(FrameStore::new(config.storage.clone()).await?);
        let observers = Arc::new(ObserverSet::new());
        let pipeline = Arc::new(ExportPipeline::new(
            Arc::clone(&store),
            Arc::clone(&encoder),
            Arc::clone(&observers),
            config.export.clone(),
        ));
        let sweeper = spawn_sweeper(Arc::clone(&store));

        Ok(Self {
            store,
            encoder,
            observers,
            pipeline,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    /// Verify the external encoder is reachable before accepting any work.
    pub async fn initialize(&self) -> VersemotionResult<()> {
        self.encoder.verify_available().await?;
        tracing::info!(backend = self.encoder.name(), "Export service ready");
        Ok(())
    }

    /// Register an observer for progress/completion/error notifications.
    pub fn subscribe(&self, observer: impl Fn(&ExportEvent) + Send + Sync + 'static) {
        self.observers.register(Box::new(observer));
    }

    pub async fn create_session(&self, session_id: &str) -> VersemotionResult<SessionInfo> {
        self.store.create_session(session_id).await
    }

    /// Persist one rendered RGBA frame into the session's staging area.
    pub async fn save_frame_image(
        &self,
        session_id: &str,
        frame_name: &str,
        pixels: Vec<u8>,
        width: u32,
        height: u32,
    ) -> VersemotionResult<PathBuf> {
        self.store
            .save_frame(session_id, frame_name, pixels, width, height)
            .await
    }

    /// Encode a single batch directly, outside the queued pipeline. Used by
    /// callers that drive batching themselves while frames stream in.
    pub async fn create_batch_video(
        &self,
        session_id: &str,
        batch: BatchRange,
        options: &ExportOptions,
    ) -> VersemotionResult<PathBuf> {
        let session = self.store.session_info(session_id).await?;
        let job = BatchEncodeJob {
            frames_dir: session.frames_dir.clone(),
            start_frame: batch.start_frame,
            end_frame: batch.end_frame,
            fps: options.fps,
            width: options.width,
            height: options.height,
            quality: options.quality,
            output_path: session.batch_path(batch.index),
        };
        let segment = self.encoder.encode_batch(&job, None).await?;
        self.store.touch_session(session_id).await;
        Ok(segment)
    }

    /// Concatenate already-produced segments directly, outside the queue.
    pub async fn compose_final_video(
        &self,
        session_id: &str,
        segments: Vec<PathBuf>,
        options: &ExportOptions,
    ) -> VersemotionResult<PathBuf> {
        let session = self.store.session_info(session_id).await?;
        let job = ComposeJob {
            segments,
            manifest_dir: session.batches_dir.clone(),
            audio_path: options.audio_path.clone(),
            output_path: options.resolved_output(&session),
        };
        let output = self.encoder.compose_final(&job, None).await?;
        match tokio::fs::remove_file(job.manifest_path()).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(error = %e, "Failed to remove concat manifest"),
        }
        self.store.touch_session(session_id).await;
        Ok(output)
    }

    pub async fn cleanup_temp_session(&self, session_id: &str) -> VersemotionResult<()> {
        self.store.cleanup_session(session_id).await
    }

    pub async fn storage_stats(
        &self,
        session_id: Option<&str>,
    ) -> VersemotionResult<StorageStats> {
        self.store.storage_stats(session_id).await
    }

    /// Queue a full export. Returns the queue depth after insertion.
    pub fn queue_video_export(&self, request: ExportRequest) -> usize {
        Arc::clone(&self.pipeline).enqueue(request)
    }

    /// Cancel the in-flight export and everything queued behind it.
    pub async fn cancel_current_processing(&self) {
        self.pipeline.cancel_all().await;
    }

    pub fn is_processing(&self) -> bool {
        self.pipeline.is_processing() || self.encoder.is_busy()
    }

    pub fn queue_size(&self) -> usize {
        self.pipeline.queue_size()
    }

    /// Cancel everything in flight and release all sessions. Invoked at
    /// process shutdown.
    pub async fn dispose(&self) {
        self.pipeline.cancel_all().await;
        let removed = self.store.cleanup_all().await;
        tracing::info!(sessions = removed, "Export service disposed");

        let handle = self
            .sweeper
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}
