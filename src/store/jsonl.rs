// src/store/jsonl.rs
//! Append-only JSON-lines file with confirmed writes.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::StoreError;

pub(crate) struct JsonlLog {
    path: PathBuf,
}

impl JsonlLog {
    pub(crate) fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;
        let log = Self { path };
        log.truncate_torn_tail()?;
        Ok(log)
    }

    /// A record without its trailing newline was never confirmed to the caller.
    /// Cut it off so the next append starts on a clean line.
    fn truncate_torn_tail(&self) -> Result<(), StoreError> {
        let bytes = fs::read(&self.path).map_err(|e| StoreError::io(&self.path, e))?;
        if bytes.is_empty() || bytes.ends_with(b"\n") {
            return Ok(());
        }
        let keep = bytes.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
        tracing::warn!(
            target: "store",
            path = %self.path.display(),
            dropped_bytes = bytes.len() - keep,
            "truncating unconfirmed trailing record"
        );
        let f = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|e| StoreError::io(&self.path, e))?;
        f.set_len(keep as u64)
            .and_then(|_| f.sync_all())
            .map_err(|e| StoreError::io(&self.path, e))
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record. A torn last line (crash mid-append) is skipped;
    /// a bad line anywhere else is corruption.
    pub(crate) fn read_all<T: DeserializeOwned>(&self) -> Result<Vec<T>, StoreError> {
        let f = File::open(&self.path).map_err(|e| StoreError::io(&self.path, e))?;
        let lines: Vec<String> = BufReader::new(f)
            .lines()
            .collect::<Result<_, _>>()
            .map_err(|e| StoreError::io(&self.path, e))?;

        let last = lines.len();
        let mut out = Vec::with_capacity(last);
        for (i, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(v) => out.push(v),
                Err(e) if i + 1 == last => {
                    tracing::warn!(
                        target: "store",
                        path = %self.path.display(),
                        error = %e,
                        "skipping torn trailing record"
                    );
                }
                Err(e) => {
                    return Err(StoreError::Corrupt {
                        path: self.path.clone(),
                        line: i + 1,
                        source: e,
                    })
                }
            }
        }
        Ok(out)
    }

    /// Append one record and sync it to disk before returning.
    pub(crate) fn append<T: Serialize>(&self, rec: &T) -> Result<(), StoreError> {
        let mut line = serde_json::to_string(rec)
            .map_err(|e| StoreError::Unavailable(format!("serialize record: {e}")))?;
        line.push('\n');
        let mut f = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::io(&self.path, e))?;
        f.write_all(line.as_bytes())
            .and_then(|_| f.sync_data())
            .map_err(|e| StoreError::io(&self.path, e))
    }

    /// Replace the whole file (used by pruning): write a temp file, sync, rename.
    pub(crate) fn rewrite<T: Serialize>(&self, recs: &[T]) -> Result<(), StoreError> {
        let mut buf = String::new();
        for r in recs {
            let line = serde_json::to_string(r)
                .map_err(|e| StoreError::Unavailable(format!("serialize record: {e}")))?;
            buf.push_str(&line);
            buf.push('\n');
        }
        write_atomic(&self.path, buf.as_bytes())
    }
}

/// Write-then-rename so readers see either the old or the new content.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    let mut f = File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
    f.write_all(bytes)
        .and_then(|_| f.sync_all())
        .map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))?;
    if let Some(dir) = path.parent() {
        // Directory fsync makes the rename durable; not supported everywhere.
        if let Ok(d) = File::open(dir) {
            let _ = d.sync_all();
        }
    }
    Ok(())
}
