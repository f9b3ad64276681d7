//! Artifact store: unique output paths under a working directory.
//!
//! Names combine the local timestamp (second resolution), a process-wide counter and a
//! random suffix, so jobs started in the same second never collide.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// A rendered image on disk.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    /// File name used for the attachment.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "render.png".to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("creating artifact directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Working directory for rendered images plus the set of paths currently handed out.
pub struct ArtifactStore {
    dir: PathBuf,
    counter: AtomicU64,
    reserved: Mutex<HashSet<PathBuf>>,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            counter: AtomicU64::new(0),
            reserved: Mutex::new(HashSet::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the working directory if it does not exist.
    pub async fn ensure_dir(&self) -> Result<(), ArtifactError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| ArtifactError::CreateDir {
                path: self.dir.clone(),
                source,
            })
    }

    /// Reserve a fresh `.png` path. The directory is created on first use.
    pub async fn reserve(&self) -> Result<PathBuf, ArtifactError> {
        self.ensure_dir().await?;
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let salt = uuid::Uuid::new_v4().simple().to_string();
        let path = self
            .dir
            .join(format!("{}-{:04}-{}.png", stamp, seq, &salt[..8]));
        self.lock_reserved().insert(path.clone());
        Ok(path)
    }

    pub fn is_reserved(&self, path: &Path) -> bool {
        self.lock_reserved().contains(path)
    }

    pub fn reserved_count(&self) -> usize {
        self.lock_reserved().len()
    }

    pub async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    /// Drop the reservation and delete the file. A missing file is fine; other errors are logged.
    pub async fn release(&self, path: &Path) {
        self.lock_reserved().remove(path);
        match tokio::fs::remove_file(path).await {
            Ok(()) => log::debug!("released artifact {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("failed to delete artifact {}: {}", path.display(), e),
        }
    }

    /// Drop the reservation but leave the file on disk.
    pub fn retain(&self, path: &Path) {
        self.lock_reserved().remove(path);
    }

    fn lock_reserved(&self) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
        self.reserved.lock().unwrap_or_else(|e| e.into_inner())
    }
}
