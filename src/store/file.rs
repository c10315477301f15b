// src/store/file.rs
//! File-backed state under one directory:
//!
//! ```text
//! <state_dir>/fingerprints.jsonl   FingerprintRecord per line, append-only
//! <state_dir>/journal.jsonl        digest journal (seen + summary records)
//! <state_dir>/deliveries.jsonl     delivered idempotency tokens
//! <state_dir>/digest_markers.json  one DigestMarker per period, plus any
//!                                  unconfirmed digest window
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::jsonl::{write_atomic, JsonlLog};
use super::{
    DeliveryLog, DigestJournal, DigestMarker, FingerprintRecord, FingerprintStore, JournalEntry,
    MarkerStore, PendingWindow,
};
use crate::digest::Period;
use crate::error::StoreError;
use crate::ingest::types::Fingerprint;

fn lock<'a, T>(m: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>, StoreError> {
    m.lock()
        .map_err(|_| StoreError::Unavailable(format!("{what} lock poisoned")))
}

const FINGERPRINTS_FILE: &str = "fingerprints.jsonl";
const MARKERS_FILE: &str = "digest_markers.json";
const JOURNAL_FILE: &str = "journal.jsonl";
const DELIVERIES_FILE: &str = "deliveries.jsonl";
const STATE_FILES: [&str; 4] = [FINGERPRINTS_FILE, MARKERS_FILE, JOURNAL_FILE, DELIVERIES_FILE];

/// All four stores rooted at one state directory.
#[derive(Clone)]
pub struct FileStore {
    pub fingerprints: Arc<FileFingerprintStore>,
    pub markers: Arc<FileMarkerStore>,
    pub journal: Arc<FileDigestJournal>,
    pub deliveries: Arc<FileDeliveryLog>,
}

impl FileStore {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        let store = Self {
            fingerprints: Arc::new(FileFingerprintStore::open(dir.join(FINGERPRINTS_FILE))?),
            markers: Arc::new(FileMarkerStore::open(dir.join(MARKERS_FILE))?),
            journal: Arc::new(FileDigestJournal::open(dir.join(JOURNAL_FILE))?),
            deliveries: Arc::new(FileDeliveryLog::open(dir.join(DELIVERIES_FILE))?),
        };
        tracing::debug!(target: "store", dir = %dir.display(), "state opened");
        Ok(store)
    }

    /// Open a throwaway copy of the state in `dir`. Reads see the real history;
    /// writes land in the returned temp directory, removed when it drops.
    pub fn open_scratch(dir: &Path) -> Result<(tempfile::TempDir, Self), StoreError> {
        let scratch = tempfile::Builder::new()
            .prefix("scout-dry-run-")
            .tempdir()
            .map_err(|e| StoreError::io(std::env::temp_dir(), e))?;
        for name in STATE_FILES {
            let src = dir.join(name);
            match fs::copy(&src, scratch.path().join(name)) {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(src, e)),
            }
        }
        let store = Self::open(scratch.path())?;
        tracing::info!(
            target: "store",
            dir = %dir.display(),
            scratch = %scratch.path().display(),
            "state copied for dry run"
        );
        Ok((scratch, store))
    }
}

// ------------------------------------------------------------
// Fingerprints
// ------------------------------------------------------------

pub struct FileFingerprintStore {
    log: JsonlLog,
    index: Mutex<HashMap<Fingerprint, FingerprintRecord>>,
}

impl FileFingerprintStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let log = JsonlLog::open(path)?;
        let mut index = HashMap::new();
        for rec in log.read_all::<FingerprintRecord>()? {
            index.entry(rec.fingerprint.clone()).or_insert(rec);
        }
        tracing::debug!(target: "store", path = %log.path().display(), records = index.len(), "fingerprints loaded");
        Ok(Self {
            log,
            index: Mutex::new(index),
        })
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(lock(&self.index, "fingerprint")?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

impl FingerprintStore for FileFingerprintStore {
    fn contains(&self, fp: &Fingerprint) -> Result<bool, StoreError> {
        Ok(lock(&self.index, "fingerprint")?.contains_key(fp))
    }

    fn record(&self, fp: &Fingerprint, source_id: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        // Held across the append: writes are serialized and the index only
        // shows a fingerprint once it is on disk.
        let mut index = lock(&self.index, "fingerprint")?;
        if index.contains_key(fp) {
            return Ok(false);
        }
        let rec = FingerprintRecord {
            fingerprint: fp.clone(),
            first_seen_at: now,
            source_id: source_id.to_string(),
        };
        self.log.append(&rec)?;
        index.insert(fp.clone(), rec);
        Ok(true)
    }

    fn prune(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut index = lock(&self.index, "fingerprint")?;
        let mut keep: Vec<FingerprintRecord> = index
            .values()
            .filter(|r| r.first_seen_at >= older_than)
            .cloned()
            .collect();
        let removed = index.len() - keep.len();
        if removed == 0 {
            return Ok(0);
        }
        keep.sort_by(|a, b| {
            a.first_seen_at
                .cmp(&b.first_seen_at)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });
        self.log.rewrite(&keep)?;
        index.retain(|_, r| r.first_seen_at >= older_than);
        Ok(removed)
    }
}

// ------------------------------------------------------------
// Digest markers
// ------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
struct MarkerFile {
    #[serde(default)]
    markers: Vec<DigestMarker>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pending: Vec<PendingWindow>,
}

pub struct FileMarkerStore {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileMarkerStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self {
            path: path.into(),
            guard: Mutex::new(()),
        };
        store.read()?;
        Ok(store)
    }

    fn read(&self) -> Result<MarkerFile, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(s) if s.trim().is_empty() => Ok(MarkerFile::default()),
            Ok(s) => serde_json::from_str(&s).map_err(|e| StoreError::Corrupt {
                path: self.path.clone(),
                line: e.line(),
                source: e,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MarkerFile::default()),
            Err(e) => Err(StoreError::io(&self.path, e)),
        }
    }

    fn write(&self, file: &MarkerFile) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(file)
            .map_err(|e| StoreError::Unavailable(format!("serialize markers: {e}")))?;
        write_atomic(&self.path, &bytes)
    }
}

impl MarkerStore for FileMarkerStore {
    fn load(&self, period: Period) -> Result<Option<DigestMarker>, StoreError> {
        let _g = lock(&self.guard, "marker")?;
        Ok(self.read()?.markers.into_iter().find(|m| m.period == period))
    }

    fn advance(
        &self,
        period: Period,
        expected: Option<DateTime<Utc>>,
        to: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let _g = lock(&self.guard, "marker")?;
        let mut file = self.read()?;
        let current = file
            .markers
            .iter()
            .find(|m| m.period == period)
            .map(|m| m.last_emitted_at);
        if current != expected {
            return Ok(false);
        }
        file.markers.retain(|m| m.period != period);
        file.markers.push(DigestMarker {
            period,
            last_emitted_at: to,
        });
        file.markers.sort_by_key(|m| m.period);
        file.pending.retain(|p| p.period != period);
        self.write(&file)?;
        Ok(true)
    }

    fn pending(&self, period: Period) -> Result<Option<PendingWindow>, StoreError> {
        let _g = lock(&self.guard, "marker")?;
        Ok(self.read()?.pending.into_iter().find(|p| p.period == period))
    }

    fn set_pending(&self, window: &PendingWindow) -> Result<(), StoreError> {
        let _g = lock(&self.guard, "marker")?;
        let mut file = self.read()?;
        file.pending.retain(|p| p.period != window.period);
        file.pending.push(*window);
        file.pending.sort_by_key(|p| p.period);
        self.write(&file)
    }
}

// ------------------------------------------------------------
// Digest journal
// ------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum JournalRecord {
    Seen(JournalEntry),
    Summary {
        fingerprint: Fingerprint,
        summary: String,
    },
}

pub struct FileDigestJournal {
    log: JsonlLog,
    entries: Mutex<HashMap<Fingerprint, JournalEntry>>,
}

impl FileDigestJournal {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let log = JsonlLog::open(path)?;
        let mut entries: HashMap<Fingerprint, JournalEntry> = HashMap::new();
        for rec in log.read_all::<JournalRecord>()? {
            match rec {
                JournalRecord::Seen(e) => {
                    entries.entry(e.fingerprint.clone()).or_insert(e);
                }
                JournalRecord::Summary {
                    fingerprint,
                    summary,
                } => {
                    if let Some(e) = entries.get_mut(&fingerprint) {
                        e.summary = Some(summary);
                    }
                }
            }
        }
        Ok(Self {
            log,
            entries: Mutex::new(entries),
        })
    }
}

impl DigestJournal for FileDigestJournal {
    fn append(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        let mut entries = lock(&self.entries, "journal")?;
        if entries.contains_key(&entry.fingerprint) {
            return Ok(());
        }
        self.log.append(&JournalRecord::Seen(entry.clone()))?;
        entries.insert(entry.fingerprint.clone(), entry.clone());
        Ok(())
    }

    fn attach_summary(&self, fp: &Fingerprint, summary: &str) -> Result<(), StoreError> {
        let mut entries = lock(&self.entries, "journal")?;
        let Some(entry) = entries.get_mut(fp) else {
            return Ok(());
        };
        self.log.append(&JournalRecord::Summary {
            fingerprint: fp.clone(),
            summary: summary.to_string(),
        })?;
        entry.summary = Some(summary.to_string());
        Ok(())
    }

    fn window(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<JournalEntry>, StoreError> {
        let entries = lock(&self.entries, "journal")?;
        let mut out: Vec<JournalEntry> = entries
            .values()
            .filter(|e| e.first_seen_at > after && e.first_seen_at <= until)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.first_seen_at
                .cmp(&b.first_seen_at)
                .then_with(|| a.fingerprint.cmp(&b.fingerprint))
        });
        Ok(out)
    }

    fn prune(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut entries = lock(&self.entries, "journal")?;
        let mut keep: Vec<JournalEntry> = entries
            .values()
            .filter(|e| e.first_seen_at >= older_than)
            .cloned()
            .collect();
        let removed = entries.len() - keep.len();
        if removed == 0 {
            return Ok(0);
        }
        keep.sort_by(|a, b| a.first_seen_at.cmp(&b.first_seen_at));
        let recs: Vec<JournalRecord> = keep.into_iter().map(JournalRecord::Seen).collect();
        self.log.rewrite(&recs)?;
        entries.retain(|_, e| e.first_seen_at >= older_than);
        Ok(removed)
    }
}

// ------------------------------------------------------------
// Delivery log
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Delivery {
    token: String,
    delivered_at: DateTime<Utc>,
}

pub struct FileDeliveryLog {
    log: JsonlLog,
    tokens: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl FileDeliveryLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let log = JsonlLog::open(path)?;
        let tokens = log
            .read_all::<Delivery>()?
            .into_iter()
            .map(|d| (d.token, d.delivered_at))
            .collect();
        Ok(Self {
            log,
            tokens: Mutex::new(tokens),
        })
    }
}

impl DeliveryLog for FileDeliveryLog {
    fn is_delivered(&self, token: &str) -> Result<bool, StoreError> {
        Ok(lock(&self.tokens, "delivery")?.contains_key(token))
    }

    fn mark_delivered(&self, token: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tokens = lock(&self.tokens, "delivery")?;
        if tokens.contains_key(token) {
            return Ok(());
        }
        self.log.append(&Delivery {
            token: token.to_string(),
            delivered_at: now,
        })?;
        tokens.insert(token.to_string(), now);
        Ok(())
    }

    fn prune(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut tokens = lock(&self.tokens, "delivery")?;
        let mut keep: Vec<Delivery> = tokens
            .iter()
            .filter(|(_, at)| **at >= older_than)
            .map(|(t, at)| Delivery {
                token: t.clone(),
                delivered_at: *at,
            })
            .collect();
        let removed = tokens.len() - keep.len();
        if removed == 0 {
            return Ok(0);
        }
        keep.sort_by(|a, b| a.delivered_at.cmp(&b.delivered_at));
        self.log.rewrite(&keep)?;
        tokens.retain(|_, at| *at >= older_than);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::fingerprint::fingerprint;
    use chrono::{Duration, TimeZone};

    fn t(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 14, h, 0, 0).unwrap()
    }

    #[test]
    fn fingerprints_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let fp = fingerprint("url:https://x.test/a");
        {
            let s = FileStore::open(dir.path()).unwrap();
            assert!(s.fingerprints.record(&fp, "azure", t(9)).unwrap());
            assert!(!s.fingerprints.record(&fp, "m365", t(10)).unwrap());
        }
        let s = FileStore::open(dir.path()).unwrap();
        assert!(s.fingerprints.contains(&fp).unwrap());
        assert_eq!(s.fingerprints.len().unwrap(), 1);
    }

    #[test]
    fn prune_keeps_records_inside_horizon() {
        let dir = tempfile::tempdir().unwrap();
        let s = FileStore::open(dir.path()).unwrap();
        let old = fingerprint("old");
        let fresh = fingerprint("fresh");
        s.fingerprints.record(&old, "a", t(1) - Duration::days(100)).unwrap();
        s.fingerprints.record(&fresh, "a", t(1)).unwrap();
        assert_eq!(s.fingerprints.prune(t(1) - Duration::days(90)).unwrap(), 1);

        let reopened = FileStore::open(dir.path()).unwrap();
        assert!(!reopened.fingerprints.contains(&old).unwrap());
        assert!(reopened.fingerprints.contains(&fresh).unwrap());
    }

    #[test]
    fn marker_advance_is_compare_and_set() {
        let dir = tempfile::tempdir().unwrap();
        let s = FileStore::open(dir.path()).unwrap();
        assert_eq!(s.markers.load(Period::Daily).unwrap(), None);
        assert!(s.markers.advance(Period::Daily, None, t(9)).unwrap());
        // stale expectation loses
        assert!(!s.markers.advance(Period::Daily, None, t(10)).unwrap());
        assert!(s.markers.advance(Period::Daily, Some(t(9)), t(10)).unwrap());

        let reopened = FileStore::open(dir.path()).unwrap();
        let m = reopened.markers.load(Period::Daily).unwrap().unwrap();
        assert_eq!(m.last_emitted_at, t(10));
        assert_eq!(reopened.markers.load(Period::Weekly).unwrap(), None);
    }

    #[test]
    fn journal_merges_summaries_on_reload() {
        let dir = tempfile::tempdir().unwrap();
        let fp = fingerprint("url:https://x.test/a");
        let entry = JournalEntry {
            fingerprint: fp.clone(),
            source_id: "azure".into(),
            source_name: "Azure Blog".into(),
            title: "Title".into(),
            url: Some("https://x.test/a".into()),
            excerpt: "Body".into(),
            summary: None,
            first_seen_at: t(9),
        };
        {
            let s = FileStore::open(dir.path()).unwrap();
            s.journal.append(&entry).unwrap();
            s.journal.attach_summary(&fp, "AI summary").unwrap();
        }
        let s = FileStore::open(dir.path()).unwrap();
        let w = s.journal.window(t(8), t(9)).unwrap();
        assert_eq!(w.len(), 1);
        assert_eq!(w[0].summary.as_deref(), Some("AI summary"));
        // exclusive lower bound
        assert!(s.journal.window(t(9), t(12)).unwrap().is_empty());
    }

    #[test]
    fn scratch_copy_reads_history_and_keeps_writes_away() {
        let dir = tempfile::tempdir().unwrap();
        let seen = fingerprint("url:https://x.test/seen");
        {
            let s = FileStore::open(dir.path()).unwrap();
            s.fingerprints.record(&seen, "azure", t(8)).unwrap();
            s.markers.advance(Period::Daily, None, t(8)).unwrap();
        }
        let before: Vec<_> = STATE_FILES
            .iter()
            .map(|n| fs::read(dir.path().join(n)).ok())
            .collect();

        {
            let (_scratch, s) = FileStore::open_scratch(dir.path()).unwrap();
            assert!(s.fingerprints.contains(&seen).unwrap());
            assert!(s.fingerprints.record(&fingerprint("new"), "azure", t(9)).unwrap());
            assert!(s.markers.advance(Period::Daily, Some(t(8)), t(9)).unwrap());
            s.deliveries.mark_delivered("item:new", t(9)).unwrap();
            s.journal
                .append(&JournalEntry {
                    fingerprint: fingerprint("new"),
                    source_id: "azure".into(),
                    source_name: "Azure Blog".into(),
                    title: "New".into(),
                    url: None,
                    excerpt: String::new(),
                    summary: None,
                    first_seen_at: t(9),
                })
                .unwrap();
        }

        let after: Vec<_> = STATE_FILES
            .iter()
            .map(|n| fs::read(dir.path().join(n)).ok())
            .collect();
        assert_eq!(before, after);
        let s = FileStore::open(dir.path()).unwrap();
        assert!(!s.fingerprints.contains(&fingerprint("new")).unwrap());
        assert_eq!(s.markers.load(Period::Daily).unwrap().unwrap().last_emitted_at, t(8));
    }

    #[test]
    fn concurrent_records_of_one_fingerprint_write_one_line() {
        let dir = tempfile::tempdir().unwrap();
        let fp = fingerprint("url:https://x.test/raced");
        let store = Arc::new(FileFingerprintStore::open(dir.path().join(FINGERPRINTS_FILE)).unwrap());

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                let fp = fp.clone();
                std::thread::spawn(move || store.record(&fp, &format!("source-{i}"), t(9)).unwrap())
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
        drop(store);

        let text = fs::read_to_string(dir.path().join(FINGERPRINTS_FILE)).unwrap();
        assert_eq!(text.lines().filter(|l| !l.trim().is_empty()).count(), 1);
        let reopened = FileFingerprintStore::open(dir.path().join(FINGERPRINTS_FILE)).unwrap();
        assert_eq!(reopened.len().unwrap(), 1);
    }

    #[test]
    fn pending_window_survives_reopen_and_clears_on_advance() {
        let dir = tempfile::tempdir().unwrap();
        let w = PendingWindow {
            period: Period::Weekly,
            from: None,
            until: t(9),
        };
        {
            let s = FileStore::open(dir.path()).unwrap();
            s.markers.set_pending(&w).unwrap();
        }
        let s = FileStore::open(dir.path()).unwrap();
        assert_eq!(s.markers.pending(Period::Weekly).unwrap(), Some(w));
        assert_eq!(s.markers.pending(Period::Daily).unwrap(), None);
        assert!(s.markers.advance(Period::Weekly, None, t(9)).unwrap());
        assert_eq!(s.markers.pending(Period::Weekly).unwrap(), None);
    }

    #[test]
    fn delivery_log_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let s = FileStore::open(dir.path()).unwrap();
            s.deliveries.mark_delivered("item:abc", t(9)).unwrap();
        }
        let s = FileStore::open(dir.path()).unwrap();
        assert!(s.deliveries.is_delivered("item:abc").unwrap());
        assert!(!s.deliveries.is_delivered("item:def").unwrap());
    }
}
