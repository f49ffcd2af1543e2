//! Session-scoped, crash-safe persistence of frame images.
//!
//! The store owns the session registry: every other component references
//! sessions by identifier only. Frame writes are atomic (unique temp file +
//! rename), verified after the fact, and the only place in the pipeline with
//! automatic retry. Orphaned session directories left behind by crashed
//! processes are reclaimed by a periodic sweep.

use std::collections::{HashMap, HashSet};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::Mutex;

use versemotion_common::{StorageConfig, VersemotionError, VersemotionResult};

use crate::encode;
use crate::session::{session_dir_name, SessionInfo};
use crate::stats::{self, StorageStats};

/// Frames larger than this on either axis are rejected outright.
pub const MAX_FRAME_DIMENSION: u32 = 8192;

/// Absolute floor for a written frame file; anything smaller is treated as
/// corrupt output from the codec.
pub const MIN_FRAME_FILE_BYTES: u64 = 64;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Durable staging area for export sessions.
pub struct FrameStore {
    root: PathBuf,
    config: StorageConfig,
    sessions: Mutex<HashMap<String, SessionInfo>>,
}

impl FrameStore {
    /// Open (creating if needed) the store rooted at `config.temp_root`.
    pub async fn new(config: StorageConfig) -> VersemotionResult<Self> {
        let root = config.temp_root.clone();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| io_with_path(e, &root))?;
        Ok(Self {
            root,
            config,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Create the session directory tree and register the session.
    ///
    /// Calling twice with the same id overwrites the in-memory record;
    /// already-existing directories are tolerated.
    pub async fn create_session(&self, session_id: &str) -> VersemotionResult<SessionInfo> {
        let info = SessionInfo::new(&self.root, session_id);
        for dir in [&info.frames_dir, &info.batches_dir, &info.output_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| io_with_path(e, dir))?;
        }
        tracing::info!(session = session_id, root = %info.root.display(), "Session created");
        self.sessions
            .lock()
            .await
            .insert(session_id.to_string(), info.clone());
        Ok(info)
    }

    /// Look up a registered session.
    pub async fn session_info(&self, session_id: &str) -> VersemotionResult<SessionInfo> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| VersemotionError::session(format!("unknown session '{session_id}'")))
    }

    /// Refresh a session's last-access timestamp.
    pub async fn touch_session(&self, session_id: &str) {
        if let Some(info) = self.sessions.lock().await.get_mut(session_id) {
            info.touch();
        }
    }

    /// Identifiers of all currently registered sessions.
    pub async fn active_sessions(&self) -> Vec<String> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    /// Validate, convert, and durably persist one RGBA frame.
    ///
    /// The pixel payload must be exactly `width * height * 4` bytes. The PNG
    /// is encoded with a bounded retry loop, written to a uniquely named temp
    /// file in the frames directory, atomically renamed to `frame_name`, and
    /// then re-opened to verify size and header metadata. No partial file is
    /// ever visible under the canonical name.
    pub async fn save_frame(
        &self,
        session_id: &str,
        frame_name: &str,
        pixels: Vec<u8>,
        width: u32,
        height: u32,
    ) -> VersemotionResult<PathBuf> {
        validate_frame(frame_name, &pixels, width, height)?;

        // Sessions may be created lazily by the first frame submission.
        let existing = {
            let mut sessions = self.sessions.lock().await;
            sessions.get_mut(session_id).map(|info| {
                info.touch();
                info.frames_dir.clone()
            })
        };
        let frames_dir = match existing {
            Some(dir) => dir,
            None => self.create_session(session_id).await?.frames_dir,
        };

        let retries = self.config.frame_write_retries;
        let png = tokio::task::spawn_blocking(move || {
            encode::encode_with_retry(retries, encode::RETRY_BACKOFF, || {
                encode::encode_rgba_png(&pixels, width, height)
            })
        })
        .await
        .map_err(|e| VersemotionError::frame_write(format!("encode task failed: {e}")))??;

        let final_path = frames_dir.join(frame_name);
        let tmp_path = frames_dir.join(format!(
            "{frame_name}.tmp-{}-{}",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        if let Err(e) = tokio::fs::write(&tmp_path, &png).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(VersemotionError::frame_write(format!(
                "failed to write {}: {e}",
                tmp_path.display()
            )));
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(VersemotionError::frame_write(format!(
                "failed to publish {}: {e}",
                final_path.display()
            )));
        }

        let verify_path = final_path.clone();
        let verified = tokio::task::spawn_blocking(move || {
            verify_frame_file(&verify_path, width, height)
        })
        .await
        .map_err(|e| VersemotionError::verification(format!("verification task failed: {e}")))?;
        if let Err(e) = verified {
            let _ = tokio::fs::remove_file(&final_path).await;
            return Err(e);
        }

        tracing::trace!(session = session_id, frame = frame_name, "Frame persisted");
        Ok(final_path)
    }

    /// Best-effort removal of consumed frame files. Individual failures are
    /// logged and never abort the batch that requested the cleanup.
    pub async fn cleanup_frames(
        &self,
        session_id: &str,
        frame_names: &[String],
    ) -> VersemotionResult<()> {
        let frames_dir = {
            let mut sessions = self.sessions.lock().await;
            let info = sessions.get_mut(session_id).ok_or_else(|| {
                VersemotionError::session(format!("unknown session '{session_id}'"))
            })?;
            info.touch();
            info.frames_dir.clone()
        };

        let mut removed = 0usize;
        for name in frame_names {
            match tokio::fs::remove_file(frames_dir.join(name)).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(session = session_id, frame = %name, error = %e, "Failed to delete consumed frame");
                }
            }
        }
        tracing::debug!(session = session_id, removed, "Consumed frames cleaned up");
        Ok(())
    }

    /// Recursively remove a session's directory tree.
    ///
    /// The registry entry is dropped even when directory removal fails; the
    /// failure itself is surfaced to the caller.
    pub async fn cleanup_session(&self, session_id: &str) -> VersemotionResult<()> {
        let root = self
            .sessions
            .lock()
            .await
            .remove(session_id)
            .map(|info| info.root)
            .unwrap_or_else(|| self.root.join(session_dir_name(session_id)));

        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => {
                tracing::info!(session = session_id, "Session removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_with_path(e, &root)),
        }
    }

    /// Settle-all cleanup of every registered session; one session's failure
    /// never blocks the others. Returns the number of sessions removed.
    pub async fn cleanup_all(&self) -> usize {
        let ids = self.active_sessions().await;
        let mut removed = 0usize;
        for id in ids {
            match self.cleanup_session(&id).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(session = %id, error = %e, "Session cleanup failed");
                }
            }
        }
        removed
    }

    /// Storage usage for one session, or the whole store root when `None`.
    pub async fn storage_stats(
        &self,
        session_id: Option<&str>,
    ) -> VersemotionResult<StorageStats> {
        let scope = match session_id {
            Some(id) => match self.sessions.lock().await.get(id) {
                Some(info) => info.root.clone(),
                None => self.root.join(session_dir_name(id)),
            },
            None => self.root.clone(),
        };
        let used = stats::directory_size(scope).await?;
        let (total, free) = stats::fs_capacity(&self.root);
        Ok(StorageStats::from_parts(total, free, used))
    }

    /// Remove session directories whose modification time exceeds the
    /// retention window. Sessions registered in this process are skipped:
    /// this is a defense against directories leaked by crashed processes,
    /// not against live exports.
    pub async fn sweep_orphans(&self) -> VersemotionResult<usize> {
        let retention = self.config.retention();
        let active: HashSet<String> = self
            .sessions
            .lock()
            .await
            .keys()
            .map(|id| session_dir_name(id))
            .collect();

        let mut read_dir = match tokio::fs::read_dir(&self.root).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0usize;
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with("session_") || active.contains(&name) {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_dir() {
                continue;
            }
            let Ok(modified) = meta.modified() else {
                continue;
            };
            let idle = SystemTime::now()
                .duration_since(modified)
                .unwrap_or_default();
            if idle < retention {
                continue;
            }

            match tokio::fs::remove_dir_all(entry.path()).await {
                Ok(()) => {
                    tracing::info!(dir = %name, idle_secs = idle.as_secs(), "Swept orphaned session");
                    removed += 1;
                }
                Err(e) => {
                    tracing::warn!(dir = %name, error = %e, "Failed to sweep orphaned session");
                }
            }
        }
        Ok(removed)
    }
}

/// Run an orphan sweep immediately and then on every sweep interval.
pub fn spawn_sweeper(store: Arc<FrameStore>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(store.config.sweep_interval());
        loop {
            interval.tick().await;
            match store.sweep_orphans().await {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "Orphan sweep removed stale sessions");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Orphan sweep failed"),
            }
        }
    })
}

fn validate_frame(
    frame_name: &str,
    pixels: &[u8],
    width: u32,
    height: u32,
) -> VersemotionResult<()> {
    if frame_name.is_empty()
        || frame_name.contains('/')
        || frame_name.contains('\\')
        || frame_name.contains("..")
    {
        return Err(VersemotionError::validation(format!(
            "invalid frame name '{frame_name}'"
        )));
    }
    if width == 0 || height == 0 || width > MAX_FRAME_DIMENSION || height > MAX_FRAME_DIMENSION {
        return Err(VersemotionError::validation(format!(
            "frame dimensions {width}x{height} outside (0, {MAX_FRAME_DIMENSION}]"
        )));
    }
    let expected = width as usize * height as usize * 4;
    if pixels.len() != expected {
        return Err(VersemotionError::validation(format!(
            "pixel payload is {} bytes, expected {expected} for {width}x{height} rgba",
            pixels.len()
        )));
    }
    Ok(())
}

/// Re-open a freshly written frame and check it is a well-formed RGBA8 PNG
/// with the requested dimensions.
fn verify_frame_file(path: &Path, width: u32, height: u32) -> VersemotionResult<()> {
    use image::codecs::png::PngDecoder;
    use image::ImageDecoder;

    let meta = std::fs::metadata(path)?;
    if meta.len() == 0 {
        return Err(VersemotionError::verification(format!(
            "{} is empty after write",
            path.display()
        )));
    }
    if meta.len() < MIN_FRAME_FILE_BYTES {
        return Err(VersemotionError::verification(format!(
            "{} is {} bytes, below the {MIN_FRAME_FILE_BYTES}-byte floor",
            path.display(),
            meta.len()
        )));
    }

    let reader = BufReader::new(std::fs::File::open(path)?);
    let decoder = PngDecoder::new(reader)
        .map_err(|e| VersemotionError::verification(format!("unreadable png header: {e}")))?;
    let (decoded_w, decoded_h) = decoder.dimensions();
    if (decoded_w, decoded_h) != (width, height) {
        return Err(VersemotionError::verification(format!(
            "decoded dimensions {decoded_w}x{decoded_h} do not match requested {width}x{height}"
        )));
    }
    if decoder.color_type() != image::ColorType::Rgba8 {
        return Err(VersemotionError::verification(format!(
            "unexpected color type {:?}, wanted rgba8",
            decoder.color_type()
        )));
    }
    Ok(())
}

fn io_with_path(e: std::io::Error, path: &Path) -> VersemotionError {
    VersemotionError::Io(std::io::Error::new(
        e.kind(),
        format!("{}: {e}", path.display()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::frame_file_name;

    fn test_config(root: &Path, retention_hours: u64) -> StorageConfig {
        StorageConfig {
            temp_root: root.to_path_buf(),
            retention_hours,
            sweep_interval_minutes: 30,
            frame_write_retries: 5,
        }
    }

    fn rgba(width: u32, height: u32) -> Vec<u8> {
        vec![128u8; width as usize * height as usize * 4]
    }

    #[tokio::test]
    async fn create_session_builds_directory_tree() {
        let dir = tempfile::tempdir().unwrap();
        let store = FrameStore::new(test_config(dir.path(), 24)).await.unwrap();

        let info = store.create_session("abc").await.unwrap();
        assert!(info.frames_dir.is_dir());
        assert!(info.batches_dir.is_dir());
        assert!(info.output_dir.is_dir());

        // Calling again tolerates existing directories.
        store.create_session("abc").await.unwrap();
    }

    #[tokio::test]
    async fn save_frame_persists_and_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let store = FrameStore::new(test_config(dir.path(), 24)).await.unwrap();
        store.create_session("s1").await.unwrap();

        let path = store
            .save_frame("s1", &frame_file_name(0), rgba(8, 6), 8, 6)
            .await
            .unwrap();
        assert!(path.is_file());

        let decoded = image::open(&path).unwrap();
        assert_eq!(decoded.width(), 8);
        assert_eq!(decoded.height(), 6);
    }

    #[tokio::test]
    async fn save_frame_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FrameStore::new(test_config(dir.path(), 24)).await.unwrap();
        let info = store.create_session("s1").await.unwrap();

        store
            .save_frame("s1", &frame_file_name(0), rgba(4, 4), 4, 4)
            .await
            .unwrap();

        let mut names = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&info.frames_dir).await.unwrap();
        while let Some(entry) = read_dir.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec![frame_file_name(0)]);
    }

    #[tokio::test]
    async fn save_frame_rejects_payload_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = FrameStore::new(test_config(dir.path(), 24)).await.unwrap();
        let info = store.create_session("s1").await.unwrap();

        let err = store
            .save_frame("s1", &frame_file_name(0), vec![0u8; 10], 4, 4)
            .await
            .unwrap_err();
        assert!(matches!(err, VersemotionError::Validation { .. }));

        // Nothing was written, not even a temp file.
        let mut read_dir = tokio::fs::read_dir(&info.frames_dir).await.unwrap();
        assert!(read_dir.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_frame_rejects_out_of_range_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let store = FrameStore::new(test_config(dir.path(), 24)).await.unwrap();

        for (w, h) in [(0u32, 4u32), (4, 0), (MAX_FRAME_DIMENSION + 1, 4)] {
            let err = store
                .save_frame("s1", "frame_000000.png", Vec::new(), w, h)
                .await
                .unwrap_err();
            assert!(matches!(err, VersemotionError::Validation { .. }));
        }
    }

    #[tokio::test]
    async fn save_frame_creates_session_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let store = FrameStore::new(test_config(dir.path(), 24)).await.unwrap();

        store
            .save_frame("lazy", &frame_file_name(0), rgba(4, 4), 4, 4)
            .await
            .unwrap();
        let info = store.session_info("lazy").await.unwrap();
        assert!(info.frames_dir.is_dir());
    }

    #[tokio::test]
    async fn cleanup_frames_is_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        let store = FrameStore::new(test_config(dir.path(), 24)).await.unwrap();
        store.create_session("s1").await.unwrap();

        for i in 0..3u64 {
            store
                .save_frame("s1", &frame_file_name(i), rgba(4, 4), 4, 4)
                .await
                .unwrap();
        }

        store
            .cleanup_frames(
                "s1",
                &[
                    frame_file_name(0),
                    frame_file_name(1),
                    "frame_999999.png".to_string(),
                ],
            )
            .await
            .unwrap();

        let info = store.session_info("s1").await.unwrap();
        assert!(!info.frame_path(0).exists());
        assert!(!info.frame_path(1).exists());
        assert!(info.frame_path(2).exists());
    }

    #[tokio::test]
    async fn cleanup_session_removes_directory_and_registration() {
        let dir = tempfile::tempdir().unwrap();
        let store = FrameStore::new(test_config(dir.path(), 24)).await.unwrap();
        let info = store.create_session("s1").await.unwrap();

        store.cleanup_session("s1").await.unwrap();
        assert!(!info.root.exists());
        assert!(store.session_info("s1").await.is_err());

        // Cleaning an already-removed session is not an error.
        store.cleanup_session("s1").await.unwrap();
    }

    #[tokio::test]
    async fn storage_stats_sums_session_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FrameStore::new(test_config(dir.path(), 24)).await.unwrap();
        let info = store.create_session("s1").await.unwrap();

        tokio::fs::write(info.frames_dir.join("raw.bin"), vec![0u8; 2048])
            .await
            .unwrap();
        tokio::fs::write(info.batches_dir.join("seg.bin"), vec![0u8; 1024])
            .await
            .unwrap();

        let stats = store.storage_stats(Some("s1")).await.unwrap();
        assert_eq!(stats.used_bytes, 3072);

        let whole = store.storage_stats(None).await.unwrap();
        assert!(whole.used_bytes >= 3072);
    }

    #[tokio::test]
    async fn sweep_removes_only_idle_unregistered_sessions() {
        let dir = tempfile::tempdir().unwrap();

        // Zero retention: any unregistered session directory is idle enough.
        let store = FrameStore::new(test_config(dir.path(), 0)).await.unwrap();
        let orphan = dir.path().join("session_orphan");
        tokio::fs::create_dir_all(orphan.join("frames"))
            .await
            .unwrap();
        let active = store.create_session("active").await.unwrap();

        let removed = store.sweep_orphans().await.unwrap();
        assert_eq!(removed, 1);
        assert!(!orphan.exists());
        assert!(active.root.exists());
    }

    #[tokio::test]
    async fn sweep_keeps_sessions_younger_than_retention() {
        let dir = tempfile::tempdir().unwrap();
        let store = FrameStore::new(test_config(dir.path(), 1000)).await.unwrap();
        let young = dir.path().join("session_young");
        tokio::fs::create_dir_all(&young).await.unwrap();

        let removed = store.sweep_orphans().await.unwrap();
        assert_eq!(removed, 0);
        assert!(young.exists());
    }
}
