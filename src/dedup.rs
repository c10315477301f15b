// src/dedup.rs
//! Filters a batch against the fingerprint store and against itself.
//!
//! "Seen" means collected: a fingerprint is recorded the moment its item is
//! kept, before summarization or publishing, and is never reprocessed.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use metrics::counter;

use crate::error::StoreError;
use crate::ingest::types::{Fingerprint, Item};
use crate::store::{DigestJournal, FingerprintStore, JournalEntry};

#[derive(Debug, Default)]
pub struct DedupOutcome {
    /// Genuinely new items, in input order.
    pub fresh: Vec<Item>,
    /// Dropped because the store already knew them.
    pub seen_before: usize,
    /// Dropped because an earlier item in the same batch had the same fingerprint.
    pub in_batch: usize,
}

impl DedupOutcome {
    pub fn dropped(&self) -> usize {
        self.seen_before + self.in_batch
    }
}

pub struct Deduplicator<'a> {
    store: &'a dyn FingerprintStore,
    journal: Option<&'a dyn DigestJournal>,
}

impl<'a> Deduplicator<'a> {
    pub fn new(store: &'a dyn FingerprintStore) -> Self {
        Self {
            store,
            journal: None,
        }
    }

    /// Also append each fresh item to the digest journal right after its
    /// fingerprint is recorded.
    pub fn with_journal(mut self, journal: &'a dyn DigestJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn filter_new(&self, items: Vec<Item>, now: DateTime<Utc>) -> Result<DedupOutcome, StoreError> {
        let mut in_flight: HashSet<Fingerprint> = HashSet::with_capacity(items.len());
        let mut out = DedupOutcome::default();

        for item in items {
            if !in_flight.insert(item.fingerprint.clone()) {
                tracing::debug!(
                    target: "dedup",
                    fingerprint = item.fingerprint.short(),
                    source = %item.source_id,
                    "duplicate within batch"
                );
                out.in_batch += 1;
                continue;
            }
            if self.store.contains(&item.fingerprint)? {
                out.seen_before += 1;
                continue;
            }
            // record() reports whether we won; a concurrent writer may have beaten us.
            if !self.store.record(&item.fingerprint, &item.source_id, now)? {
                out.seen_before += 1;
                continue;
            }
            if let Some(j) = self.journal {
                j.append(&JournalEntry::from_item(&item, now))?;
            }
            out.fresh.push(item);
        }

        counter!("scout_items_new_total").increment(out.fresh.len() as u64);
        counter!("scout_items_duplicate_total").increment(out.dropped() as u64);
        tracing::info!(
            target: "dedup",
            fresh = out.fresh.len(),
            seen_before = out.seen_before,
            in_batch = out.in_batch,
            "dedup done"
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::fingerprint::fingerprint;
    use crate::store::MemoryStore;

    fn item(title: &str, key: &str) -> Item {
        Item {
            source_id: "s".into(),
            source_name: "S".into(),
            natural_key: key.into(),
            title: title.into(),
            body_excerpt: String::new(),
            published_at: None,
            url: None,
            summary: None,
            fingerprint: fingerprint(key),
        }
    }

    #[test]
    fn second_pass_yields_nothing() {
        let store = MemoryStore::new();
        let d = Deduplicator::new(&store);
        let batch = vec![item("a", "k1"), item("b", "k2")];
        let now = Utc::now();
        assert_eq!(d.filter_new(batch.clone(), now).unwrap().fresh.len(), 2);
        let again = d.filter_new(batch, now).unwrap();
        assert!(again.fresh.is_empty());
        assert_eq!(again.seen_before, 2);
    }

    #[test]
    fn store_failure_propagates() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let err = Deduplicator::new(&store)
            .filter_new(vec![item("a", "k1")], Utc::now())
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
