// src/lock.rs
//! Single-run guard: an advisory exclusive lock on `<state_dir>/scout.lock`.
//!
//! The OS drops the lock when the process exits, so a crashed run never
//! leaves a stale lock behind. The JSON inside the file is diagnostics only.

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const LOCK_FILE_NAME: &str = "scout.lock";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMetadata {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

impl LockMetadata {
    pub fn current() -> Self {
        Self {
            pid: std::process::id(),
            started_at: Utc::now(),
        }
    }
}

impl std::fmt::Display for LockMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pid {} since {}", self.pid, self.started_at.to_rfc3339())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Holder metadata is `None` when the file could not be read or parsed.
    #[error("another run holds {path} ({})", .holder.as_ref().map(|m| m.to_string()).unwrap_or_else(|| "holder unknown".into()))]
    AlreadyHeld {
        path: PathBuf,
        holder: Option<LockMetadata>,
    },
    #[error("lock i/o at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Held for the lifetime of a run; released on drop.
pub struct RunLock {
    file: File,
    path: PathBuf,
    metadata: LockMetadata,
}

impl RunLock {
    pub fn acquire(state_dir: &Path) -> Result<Self, LockError> {
        let path = state_dir.join(LOCK_FILE_NAME);
        let io = |source| LockError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(state_dir).map_err(io)?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(io)?;

        if let Err(e) = file.try_lock_exclusive() {
            if e.kind() == fs2::lock_contended_error().kind() {
                let holder = read_metadata(&mut file);
                return Err(LockError::AlreadyHeld { path, holder });
            }
            return Err(io(e));
        }

        let metadata = LockMetadata::current();
        let json = serde_json::to_vec(&metadata).map_err(|e| io(std::io::Error::other(e)))?;
        file.set_len(0)
            .and_then(|_| file.seek(SeekFrom::Start(0)))
            .and_then(|_| file.write_all(&json))
            .and_then(|_| file.sync_all())
            .map_err(io)?;

        tracing::debug!(target: "lock", path = %path.display(), pid = metadata.pid, "run lock acquired");
        Ok(Self {
            file,
            path,
            metadata,
        })
    }

    pub fn metadata(&self) -> &LockMetadata {
        &self.metadata
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_metadata(file: &mut File) -> Option<LockMetadata> {
    let mut buf = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut buf).ok()?;
    serde_json::from_str(&buf).ok()
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        tracing::debug!(target: "lock", path = %self.path.display(), "run lock released");
    }
}
