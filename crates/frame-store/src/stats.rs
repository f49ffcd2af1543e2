//! Storage accounting: recursive directory sizing and filesystem capacity.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use versemotion_common::{VersemotionError, VersemotionResult};

/// Snapshot of store/session storage usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageStats {
    /// Capacity of the filesystem holding the store root.
    pub total_space: u64,

    /// Free space available on that filesystem.
    pub free_space: u64,

    /// Recursive size of the queried scope (one session or the whole store).
    pub used_bytes: u64,

    /// `used_bytes` as a percentage of `total_space` (0 when unknown).
    pub usage_percent: f64,
}

/// Recursively sum file sizes under `path`, descending into subdirectories
/// in parallel. A missing path counts as zero. Concurrent writers make the
/// result a best-effort snapshot, not a transactional figure.
pub async fn directory_size(path: PathBuf) -> VersemotionResult<u64> {
    let mut read_dir = match tokio::fs::read_dir(&path).await {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut total = 0u64;
    let mut subdirs = tokio::task::JoinSet::new();
    while let Some(entry) = read_dir.next_entry().await? {
        let meta = match entry.metadata().await {
            Ok(meta) => meta,
            // Entry vanished between listing and stat; skip it.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        if meta.is_dir() {
            subdirs.spawn(boxed_directory_size(entry.path()));
        } else {
            total += meta.len();
        }
    }

    while let Some(joined) = subdirs.join_next().await {
        total += joined
            .map_err(|e| VersemotionError::session(format!("directory sizing task failed: {e}")))??;
    }
    Ok(total)
}

fn boxed_directory_size(
    path: PathBuf,
) -> Pin<Box<dyn Future<Output = VersemotionResult<u64>> + Send>> {
    Box::pin(directory_size(path))
}

/// Total and free bytes of the filesystem containing `path`.
/// Returns zeros when the platform or the path cannot be queried.
#[cfg(unix)]
pub fn fs_capacity(path: &Path) -> (u64, u64) {
    use std::os::unix::ffi::OsStrExt;

    let Ok(cpath) = std::ffi::CString::new(path.as_os_str().as_bytes()) else {
        return (0, 0);
    };
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(cpath.as_ptr(), &mut stat) };
    if rc != 0 {
        return (0, 0);
    }
    let block = stat.f_frsize as u64;
    (stat.f_blocks as u64 * block, stat.f_bavail as u64 * block)
}

#[cfg(not(unix))]
pub fn fs_capacity(_path: &Path) -> (u64, u64) {
    (0, 0)
}

impl StorageStats {
    pub fn from_parts(total_space: u64, free_space: u64, used_bytes: u64) -> Self {
        let usage_percent = if total_space > 0 {
            used_bytes as f64 / total_space as f64 * 100.0
        } else {
            0.0
        };
        Self {
            total_space,
            free_space,
            used_bytes,
            usage_percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sums_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.bin"), vec![0u8; 100])
            .await
            .unwrap();
        let sub = dir.path().join("nested").join("deeper");
        tokio::fs::create_dir_all(&sub).await.unwrap();
        tokio::fs::write(sub.join("b.bin"), vec![0u8; 250])
            .await
            .unwrap();

        let size = directory_size(dir.path().to_path_buf()).await.unwrap();
        assert_eq!(size, 350);
    }

    #[tokio::test]
    async fn missing_directory_counts_as_zero() {
        let size = directory_size(PathBuf::from("/nonexistent/versemotion-test"))
            .await
            .unwrap();
        assert_eq!(size, 0);
    }

    #[test]
    fn usage_percent_guards_division_by_zero() {
        let stats = StorageStats::from_parts(0, 0, 500);
        assert_eq!(stats.usage_percent, 0.0);

        let stats = StorageStats::from_parts(1000, 600, 250);
        assert!((stats.usage_percent - 25.0).abs() < 1e-9);
    }

    #[cfg(unix)]
    #[test]
    fn fs_capacity_reports_nonzero_for_temp() {
        let (total, _free) = fs_capacity(Path::new("/tmp"));
        assert!(total > 0);
    }
}
