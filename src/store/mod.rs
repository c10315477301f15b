// src/store/mod.rs
//! Durable state that outlives a run: seen fingerprints, digest markers,
//! the digest journal and the delivery log.
//!
//! Every write is confirmed (flushed and synced) before the call returns, so a
//! record that a later reader observes was durably written first.

pub mod file;
mod jsonl;
pub mod memory;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::Period;
use crate::error::StoreError;
use crate::ingest::types::{Fingerprint, Item};

pub use file::FileStore;
pub use memory::MemoryStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    pub fingerprint: Fingerprint,
    pub first_seen_at: DateTime<Utc>,
    pub source_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestMarker {
    pub period: Period,
    pub last_emitted_at: DateTime<Utc>,
}

/// Digest window frozen at assembly. It stays authoritative while the marker
/// still equals `from`, so a re-send after a crash carries the same entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWindow {
    pub period: Period,
    pub from: Option<DateTime<Utc>>,
    pub until: DateTime<Utc>,
}

/// Pending-digest entry, written when an item is first seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub fingerprint: Fingerprint,
    pub source_id: String,
    pub source_name: String,
    pub title: String,
    pub url: Option<String>,
    pub excerpt: String,
    #[serde(default)]
    pub summary: Option<String>,
    pub first_seen_at: DateTime<Utc>,
}

impl JournalEntry {
    pub fn from_item(item: &Item, first_seen_at: DateTime<Utc>) -> Self {
        Self {
            fingerprint: item.fingerprint.clone(),
            source_id: item.source_id.clone(),
            source_name: item.source_name.clone(),
            title: item.title.clone(),
            url: item.url.clone(),
            excerpt: item.body_excerpt.clone(),
            summary: item.summary.clone(),
            first_seen_at,
        }
    }
}

/// Persistent record of previously seen item identities.
pub trait FingerprintStore: Send + Sync {
    fn contains(&self, fp: &Fingerprint) -> Result<bool, StoreError>;
    /// Idempotent. Returns `true` when the fingerprint was new and is now durable,
    /// `false` when it was already present (no-op).
    fn record(&self, fp: &Fingerprint, source_id: &str, now: DateTime<Utc>) -> Result<bool, StoreError>;
    /// Drop records first seen strictly before `older_than`. Returns the count removed.
    fn prune(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// One marker per period; advanced only after confirmed digest delivery.
pub trait MarkerStore: Send + Sync {
    fn load(&self, period: Period) -> Result<Option<DigestMarker>, StoreError>;
    /// Atomic compare-and-set: moves the marker to `to` only if its current
    /// value still equals `expected`. Returns whether the marker moved.
    /// A successful move drops the period's pending window.
    fn advance(
        &self,
        period: Period,
        expected: Option<DateTime<Utc>>,
        to: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
    fn pending(&self, period: Period) -> Result<Option<PendingWindow>, StoreError>;
    /// Durable before it returns; replaces any earlier window for the period.
    fn set_pending(&self, window: &PendingWindow) -> Result<(), StoreError>;
}

/// Durable accumulation of items pending inclusion in digests.
pub trait DigestJournal: Send + Sync {
    fn append(&self, entry: &JournalEntry) -> Result<(), StoreError>;
    fn attach_summary(&self, fp: &Fingerprint, summary: &str) -> Result<(), StoreError>;
    /// Entries with `after < first_seen_at <= until`, oldest first.
    fn window(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<JournalEntry>, StoreError>;
    fn prune(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// Local memory of idempotency tokens already accepted by the tracker.
pub trait DeliveryLog: Send + Sync {
    fn is_delivered(&self, token: &str) -> Result<bool, StoreError>;
    fn mark_delivered(&self, token: &str, now: DateTime<Utc>) -> Result<(), StoreError>;
    fn prune(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError>;
}

/// The four state handles a run needs, behind trait objects.
#[derive(Clone)]
pub struct Stores {
    pub fingerprints: Arc<dyn FingerprintStore>,
    pub markers: Arc<dyn MarkerStore>,
    pub journal: Arc<dyn DigestJournal>,
    pub deliveries: Arc<dyn DeliveryLog>,
}

impl Stores {
    /// One in-memory store serving every role.
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            fingerprints: store.clone(),
            markers: store.clone(),
            journal: store.clone(),
            deliveries: store,
        }
    }
}

impl From<FileStore> for Stores {
    fn from(f: FileStore) -> Self {
        Self {
            fingerprints: f.fingerprints,
            markers: f.markers,
            journal: f.journal,
            deliveries: f.deliveries,
        }
    }
}

/// Smallest horizon accepted for pruning.
pub const MIN_RETENTION_DAYS: i64 = 1;
pub const DEFAULT_RETENTION_DAYS: i64 = 90;
/// Largest horizon accepted (about a century).
pub const MAX_RETENTION_DAYS: i64 = 36_500;

/// Retention window. Records younger than the horizon are never pruned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    horizon: Duration,
}

impl Retention {
    pub fn days(days: i64) -> anyhow::Result<Self> {
        if days < MIN_RETENTION_DAYS {
            anyhow::bail!("retention horizon must be at least {MIN_RETENTION_DAYS} day(s), got {days}");
        }
        if days > MAX_RETENTION_DAYS {
            anyhow::bail!("retention horizon must be at most {MAX_RETENTION_DAYS} days, got {days}");
        }
        Ok(Self {
            horizon: Duration::days(days),
        })
    }

    pub fn horizon(&self) -> Duration {
        self.horizon
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.horizon
    }
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            horizon: Duration::days(DEFAULT_RETENTION_DAYS),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub fingerprints: usize,
    pub journal: usize,
    pub deliveries: usize,
}

impl PruneReport {
    pub fn total(&self) -> usize {
        self.fingerprints + self.journal + self.deliveries
    }
}

/// Maintenance pass over all append-only stores.
pub fn prune_all(
    retention: Retention,
    now: DateTime<Utc>,
    fingerprints: &dyn FingerprintStore,
    journal: &dyn DigestJournal,
    deliveries: &dyn DeliveryLog,
) -> Result<PruneReport, StoreError> {
    let cutoff = retention.cutoff(now);
    let report = PruneReport {
        fingerprints: fingerprints.prune(cutoff)?,
        journal: journal.prune(cutoff)?,
        deliveries: deliveries.prune(cutoff)?,
    };
    tracing::info!(
        target: "store",
        %cutoff,
        fingerprints = report.fingerprints,
        journal = report.journal,
        deliveries = report.deliveries,
        "retention prune"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retention_rejects_tiny_horizons() {
        assert!(Retention::days(0).is_err());
        assert!(Retention::days(-5).is_err());
        assert!(Retention::days(i64::MAX).is_err());
        let r = Retention::days(90).unwrap();
        let now = Utc::now();
        assert_eq!(now - r.cutoff(now), Duration::days(90));
    }
}
