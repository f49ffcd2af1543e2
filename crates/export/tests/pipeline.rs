//! End-to-end pipeline scenarios against a scriptable stub encoder backend.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use versemotion_common::{AppConfig, VersemotionError, VersemotionResult};
use versemotion_encoder::{
    BatchEncodeJob, ComposeJob, EncoderBackend, ProgressSink, QualityTier,
};
use versemotion_export::{
    ExportEvent, ExportOptions, ExportPhase, ExportRequest, ExportService,
};
use versemotion_frame_store::frame_file_name;

#[derive(Clone, Debug)]
struct BatchCall {
    start: u64,
    end: u64,
    output: PathBuf,
    frames_present: usize,
}

#[derive(Clone, Debug)]
struct ComposeCall {
    segments: Vec<PathBuf>,
    output: PathBuf,
    audio: Option<PathBuf>,
}

/// Test double for the external encoder: writes fake segment files, records
/// every call, honors cancellation, and can be scripted to fail.
struct StubEncoder {
    batch_calls: Mutex<Vec<BatchCall>>,
    compose_calls: Mutex<Vec<ComposeCall>>,
    op_log: Mutex<Vec<String>>,
    batches_started: AtomicUsize,
    cancelled: AtomicBool,
    batch_delay_ms: u64,
    fail_segment_containing: Option<String>,
}

impl StubEncoder {
    fn with_config(batch_delay_ms: u64, fail_segment_containing: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            batch_calls: Mutex::new(Vec::new()),
            compose_calls: Mutex::new(Vec::new()),
            op_log: Mutex::new(Vec::new()),
            batches_started: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
            batch_delay_ms,
            fail_segment_containing,
        })
    }

    fn new(batch_delay_ms: u64) -> Arc<Self> {
        Self::with_config(batch_delay_ms, None)
    }

    fn failing_on(batch_delay_ms: u64, segment_substring: &str) -> Arc<Self> {
        Self::with_config(batch_delay_ms, Some(segment_substring.to_string()))
    }

    fn batch_calls(&self) -> Vec<BatchCall> {
        self.batch_calls.lock().unwrap().clone()
    }

    fn compose_calls(&self) -> Vec<ComposeCall> {
        self.compose_calls.lock().unwrap().clone()
    }

    fn op_log(&self) -> Vec<String> {
        self.op_log.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl EncoderBackend for StubEncoder {
    async fn verify_available(&self) -> VersemotionResult<()> {
        Ok(())
    }

    async fn encode_batch(
        &self,
        job: &BatchEncodeJob,
        _progress: Option<ProgressSink>,
    ) -> VersemotionResult<PathBuf> {
        self.batches_started.fetch_add(1, Ordering::SeqCst);

        let steps = self.batch_delay_ms / 10 + 1;
        for _ in 0..steps {
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(VersemotionError::cancelled("stub encoder killed"));
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        if let Some(substring) = &self.fail_segment_containing {
            if job.output_path.to_string_lossy().contains(substring.as_str()) {
                return Err(VersemotionError::encoder_failed("scripted stub failure"));
            }
        }

        let frames_present = std::fs::read_dir(&job.frames_dir)
            .map(|entries| entries.count())
            .unwrap_or(0);
        tokio::fs::write(&job.output_path, vec![0u8; 4096]).await?;

        self.batch_calls.lock().unwrap().push(BatchCall {
            start: job.start_frame,
            end: job.end_frame,
            output: job.output_path.clone(),
            frames_present,
        });
        self.op_log
            .lock()
            .unwrap()
            .push(format!("batch:{}", job.output_path.display()));
        Ok(job.output_path.clone())
    }

    async fn compose_final(
        &self,
        job: &ComposeJob,
        _progress: Option<ProgressSink>,
    ) -> VersemotionResult<PathBuf> {
        if let Some(parent) = job.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&job.output_path, vec![0u8; 8192]).await?;

        self.compose_calls.lock().unwrap().push(ComposeCall {
            segments: job.segments.clone(),
            output: job.output_path.clone(),
            audio: job.audio_path.clone(),
        });
        self.op_log
            .lock()
            .unwrap()
            .push(format!("compose:{}", job.output_path.display()));
        Ok(job.output_path.clone())
    }

    async fn cancel(&self) -> VersemotionResult<()> {
        self.cancelled.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_busy(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "stub"
    }
}

type Events = Arc<Mutex<Vec<ExportEvent>>>;

async fn setup(root: &Path, stub: Arc<StubEncoder>) -> (ExportService, Events) {
    let mut config = AppConfig::default();
    config.storage.temp_root = root.join("store");

    let service = ExportService::new(config, stub as Arc<dyn EncoderBackend>)
        .await
        .unwrap();
    service.initialize().await.unwrap();

    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    service.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
    (service, events)
}

fn options(total_frames: u64, output: &str) -> ExportOptions {
    ExportOptions {
        width: 8,
        height: 8,
        fps: 30,
        quality: QualityTier::Medium,
        total_frames,
        batch_size: None,
        audio_path: None,
        output_path: PathBuf::from(output),
    }
}

async fn stage_frames(service: &ExportService, session_id: &str, count: u64) {
    service.create_session(session_id).await.unwrap();
    for index in 0..count {
        service
            .save_frame_image(
                session_id,
                &frame_file_name(index),
                vec![200u8; 8 * 8 * 4],
                8,
                8,
            )
            .await
            .unwrap();
    }
}

async fn wait_for(mut cond: impl FnMut() -> bool) {
    for _ in 0..750 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met within timeout");
}

fn completed_sessions(events: &Events) -> Vec<String> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            ExportEvent::Completed { session_id, .. } => Some(session_id.clone()),
            _ => None,
        })
        .collect()
}

fn failed_sessions(events: &Events) -> Vec<(String, String)> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            ExportEvent::Failed {
                session_id, code, ..
            } => Some((session_id.clone(), code.clone())),
            _ => None,
        })
        .collect()
}

fn phases_seen(events: &Events) -> Vec<ExportPhase> {
    events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|event| match event {
            ExportEvent::Progress(update) => Some(update.phase),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn full_export_produces_ordered_segments_and_final_output() {
    let dir = tempfile::tempdir().unwrap();
    let stub = StubEncoder::new(0);
    let (service, events) = setup(dir.path(), Arc::clone(&stub)).await;

    stage_frames(&service, "e2e", 120).await;
    service.queue_video_export(ExportRequest {
        session_id: "e2e".to_string(),
        options: options(120, "final.mp4"),
    });

    wait_for(|| completed_sessions(&events).contains(&"e2e".to_string())).await;

    // Exactly 4 contiguous batches of 30, encoded in order.
    let batches = stub.batch_calls();
    let ranges: Vec<(u64, u64)> = batches.iter().map(|b| (b.start, b.end)).collect();
    assert_eq!(ranges, vec![(0, 30), (30, 60), (60, 90), (90, 120)]);

    // Frame cleanup is per-batch: each encode sees only the not-yet-consumed
    // frames of its own and later batches.
    let seen: Vec<usize> = batches.iter().map(|b| b.frames_present).collect();
    assert_eq!(seen, vec![120, 90, 60, 30]);

    // One compose call over the four segments, in order.
    let composes = stub.compose_calls();
    assert_eq!(composes.len(), 1);
    assert_eq!(
        composes[0].segments,
        batches.iter().map(|b| b.output.clone()).collect::<Vec<_>>()
    );
    assert!(composes[0].audio.is_none());
    assert!(composes[0].output.is_file());

    // Phase sequence was mirrored to observers.
    let phases = phases_seen(&events);
    for phase in [
        ExportPhase::Preparing,
        ExportPhase::Capturing,
        ExportPhase::BatchCreation,
        ExportPhase::Composition,
        ExportPhase::Finalizing,
        ExportPhase::Completed,
    ] {
        assert!(phases.contains(&phase), "missing phase {phase:?}");
    }

    // All staged frames were consumed during batch creation.
    let session_root = dir.path().join("store").join("session_e2e");
    let frames_left = std::fs::read_dir(session_root.join("frames"))
        .unwrap()
        .count();
    assert_eq!(frames_left, 0);

    // Explicit cleanup removes the whole staging tree.
    service.cleanup_temp_session("e2e").await.unwrap();
    assert!(!session_root.exists());
    assert!(!service.is_processing());
}

#[tokio::test]
async fn cancellation_stops_future_batches_and_removes_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let stub = StubEncoder::new(300);
    let (service, events) = setup(dir.path(), Arc::clone(&stub)).await;

    stage_frames(&service, "cancel-me", 120).await;
    service.queue_video_export(ExportRequest {
        session_id: "cancel-me".to_string(),
        options: options(120, "final.mp4"),
    });

    // Let the first batch get in flight, then cancel.
    let started = Arc::clone(&stub);
    wait_for(move || started.batches_started.load(Ordering::SeqCst) >= 1).await;
    service.cancel_current_processing().await;
    wait_for(|| !service.is_processing()).await;

    // No segment completed after the cancel point.
    assert!(stub.batch_calls().is_empty());
    assert!(stub.compose_calls().is_empty());

    // Session directory is gone and no failure was reported.
    assert!(!dir.path().join("store").join("session_cancel-me").exists());
    assert!(failed_sessions(&events).is_empty());
    assert!(completed_sessions(&events).is_empty());
    assert!(phases_seen(&events).contains(&ExportPhase::Cancelled));
}

#[tokio::test]
async fn queued_jobs_run_strictly_fifo_without_interleaving() {
    let dir = tempfile::tempdir().unwrap();
    let stub = StubEncoder::new(30);
    let (service, events) = setup(dir.path(), Arc::clone(&stub)).await;

    stage_frames(&service, "job_a", 60).await;
    stage_frames(&service, "job_b", 60).await;

    service.queue_video_export(ExportRequest {
        session_id: "job_a".to_string(),
        options: options(60, "a.mp4"),
    });
    service.queue_video_export(ExportRequest {
        session_id: "job_b".to_string(),
        options: options(60, "b.mp4"),
    });

    wait_for(|| completed_sessions(&events).len() == 2).await;
    assert_eq!(completed_sessions(&events), vec!["job_a", "job_b"]);

    // Every operation of job_a precedes every operation of job_b.
    let log = stub.op_log();
    let last_a = log
        .iter()
        .rposition(|op| op.contains("session_job_a"))
        .unwrap();
    let first_b = log
        .iter()
        .position(|op| op.contains("session_job_b"))
        .unwrap();
    assert!(
        last_a < first_b,
        "job_b started before job_a finished: {log:?}"
    );
}

#[tokio::test]
async fn one_failed_job_does_not_halt_the_queue() {
    let dir = tempfile::tempdir().unwrap();
    let stub = StubEncoder::failing_on(0, "session_bad/batches/batch_0001");
    let (service, events) = setup(dir.path(), Arc::clone(&stub)).await;

    stage_frames(&service, "bad", 60).await;
    stage_frames(&service, "good", 30).await;

    service.queue_video_export(ExportRequest {
        session_id: "bad".to_string(),
        options: options(60, "bad.mp4"),
    });
    service.queue_video_export(ExportRequest {
        session_id: "good".to_string(),
        options: options(30, "good.mp4"),
    });

    wait_for(|| {
        !failed_sessions(&events).is_empty()
            && completed_sessions(&events).contains(&"good".to_string())
    })
    .await;

    let failed = failed_sessions(&events);
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, "bad");
    assert_eq!(failed[0].1, "encoder_failed");

    // The failed session was cleaned up automatically; the good one ran.
    assert!(!dir.path().join("store").join("session_bad").exists());
    assert_eq!(completed_sessions(&events), vec!["good"]);
}

#[tokio::test]
async fn storage_stats_track_staged_frames() {
    let dir = tempfile::tempdir().unwrap();
    let stub = StubEncoder::new(0);
    let (service, _events) = setup(dir.path(), stub).await;

    stage_frames(&service, "stats", 10).await;
    let stats = service.storage_stats(Some("stats")).await.unwrap();
    assert!(stats.used_bytes > 0);

    let store_wide = service.storage_stats(None).await.unwrap();
    assert!(store_wide.used_bytes >= stats.used_bytes);
}
