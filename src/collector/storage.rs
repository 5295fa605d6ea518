//! Filesystem usage probe measured against a configured quota

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use walkdir::WalkDir;

use super::sources::{DiskUsage, ProbeError, StorageProbe};

/// Sums file sizes under a data directory
pub struct DirectoryUsageProbe {
    root: PathBuf,
    quota_bytes: u64,
}

impl DirectoryUsageProbe {
    pub fn new(root: impl Into<PathBuf>, quota_bytes: u64) -> Self {
        Self {
            root: root.into(),
            quota_bytes,
        }
    }
}

#[async_trait]
impl StorageProbe for DirectoryUsageProbe {
    async fn usage(&self) -> Result<DiskUsage, ProbeError> {
        if self.quota_bytes == 0 {
            return Err(ProbeError::Unavailable("storage quota is zero".to_string()));
        }
        let root = self.root.clone();
        let used_bytes = tokio::task::spawn_blocking(move || directory_size(&root))
            .await
            .map_err(|e| ProbeError::Unavailable(format!("size walk aborted: {}", e)))??;

        Ok(DiskUsage {
            used_bytes,
            quota_bytes: self.quota_bytes,
        })
    }
}

/// Total size of regular files under `root`. Entries that disappear or
/// cannot be read mid-walk are skipped; only a missing root is an error.
fn directory_size(root: &Path) -> std::io::Result<u64> {
    std::fs::metadata(root)?;

    let mut total = 0;
    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        match entry.metadata() {
            Ok(metadata) => total += metadata.len(),
            Err(e) => tracing::debug!(
                path = %entry.path().display(),
                error = %e,
                "Skipping file that could not be sized"
            ),
        }
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_directory_usage() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), vec![0u8; 600]).unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/b.bin"), vec![0u8; 400]).unwrap();

        let probe = DirectoryUsageProbe::new(dir.path(), 4_000);
        let usage = probe.usage().await.unwrap();
        assert_eq!(usage.used_bytes, 1_000);
        assert_eq!(usage.quota_bytes, 4_000);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unsizable_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), vec![0u8; 250]).unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone.bin"), dir.path().join("dangling")).unwrap();

        let probe = DirectoryUsageProbe::new(dir.path(), 1_000);
        let usage = probe.usage().await.unwrap();
        assert_eq!(usage.used_bytes, 250);
    }

    #[tokio::test]
    async fn test_missing_directory_fails() {
        let probe = DirectoryUsageProbe::new("/definitely/not/here", 10);
        assert!(matches!(probe.usage().await, Err(ProbeError::Io(_))));
    }
}
