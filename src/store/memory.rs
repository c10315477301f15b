// src/store/memory.rs
//! In-process store implementing every state trait. Backs tests and dry
//! runs; `set_unavailable(true)` simulates a persistence outage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::{
    DeliveryLog, DigestJournal, DigestMarker, FingerprintRecord, FingerprintStore, JournalEntry,
    MarkerStore, PendingWindow,
};
use crate::digest::Period;
use crate::error::StoreError;
use crate::ingest::types::Fingerprint;

#[derive(Default)]
struct State {
    fingerprints: HashMap<Fingerprint, FingerprintRecord>,
    markers: HashMap<Period, DateTime<Utc>>,
    pending: HashMap<Period, PendingWindow>,
    journal: HashMap<Fingerprint, JournalEntry>,
    deliveries: HashMap<String, DateTime<Utc>>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    fn with<R>(&self, f: impl FnOnce(&mut State) -> R) -> Result<R, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        let mut g = self
            .state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))?;
        Ok(f(&mut g))
    }

    pub fn fingerprint_records(&self) -> Vec<FingerprintRecord> {
        self.with(|s| s.fingerprints.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn journal_entries(&self) -> Vec<JournalEntry> {
        self.with(|s| s.journal.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl FingerprintStore for MemoryStore {
    fn contains(&self, fp: &Fingerprint) -> Result<bool, StoreError> {
        self.with(|s| s.fingerprints.contains_key(fp))
    }

    fn record(&self, fp: &Fingerprint, source_id: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        self.with(|s| {
            if s.fingerprints.contains_key(fp) {
                return false;
            }
            s.fingerprints.insert(
                fp.clone(),
                FingerprintRecord {
                    fingerprint: fp.clone(),
                    first_seen_at: now,
                    source_id: source_id.to_string(),
                },
            );
            true
        })
    }

    fn prune(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        self.with(|s| {
            let before = s.fingerprints.len();
            s.fingerprints.retain(|_, r| r.first_seen_at >= older_than);
            before - s.fingerprints.len()
        })
    }
}

impl MarkerStore for MemoryStore {
    fn load(&self, period: Period) -> Result<Option<DigestMarker>, StoreError> {
        self.with(|s| {
            s.markers.get(&period).map(|at| DigestMarker {
                period,
                last_emitted_at: *at,
            })
        })
    }

    fn advance(
        &self,
        period: Period,
        expected: Option<DateTime<Utc>>,
        to: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.with(|s| {
            if s.markers.get(&period).copied() != expected {
                return false;
            }
            s.markers.insert(period, to);
            s.pending.remove(&period);
            true
        })
    }

    fn pending(&self, period: Period) -> Result<Option<PendingWindow>, StoreError> {
        self.with(|s| s.pending.get(&period).copied())
    }

    fn set_pending(&self, window: &PendingWindow) -> Result<(), StoreError> {
        self.with(|s| {
            s.pending.insert(window.period, *window);
        })
    }
}

impl DigestJournal for MemoryStore {
    fn append(&self, entry: &JournalEntry) -> Result<(), StoreError> {
        self.with(|s| {
            s.journal
                .entry(entry.fingerprint.clone())
                .or_insert_with(|| entry.clone());
        })
    }

    fn attach_summary(&self, fp: &Fingerprint, summary: &str) -> Result<(), StoreError> {
        self.with(|s| {
            if let Some(e) = s.journal.get_mut(fp) {
                e.summary = Some(summary.to_string());
            }
        })
    }

    fn window(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<JournalEntry>, StoreError> {
        self.with(|s| {
            let mut out: Vec<JournalEntry> = s
                .journal
                .values()
                .filter(|e| e.first_seen_at > after && e.first_seen_at <= until)
                .cloned()
                .collect();
            out.sort_by(|a, b| {
                a.first_seen_at
                    .cmp(&b.first_seen_at)
                    .then_with(|| a.fingerprint.cmp(&b.fingerprint))
            });
            out
        })
    }

    fn prune(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        self.with(|s| {
            let before = s.journal.len();
            s.journal.retain(|_, e| e.first_seen_at >= older_than);
            before - s.journal.len()
        })
    }
}

impl DeliveryLog for MemoryStore {
    fn is_delivered(&self, token: &str) -> Result<bool, StoreError> {
        self.with(|s| s.deliveries.contains_key(token))
    }

    fn mark_delivered(&self, token: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.with(|s| {
            s.deliveries.entry(token.to_string()).or_insert(now);
        })
    }

    fn prune(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        self.with(|s| {
            let before = s.deliveries.len();
            s.deliveries.retain(|_, at| *at >= older_than);
            before - s.deliveries.len()
        })
    }
}
