// src/pipeline.rs
//! One end-to-end run: collect, filter, dedup, summarize, publish items,
//! emit due digests, prune.
//!
//! Partial failures (a source, an item summary, a card) land in the
//! [`RunReport`]. Only persistence failures abort the run, as
//! [`RunError::PersistenceUnavailable`].

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use tokio::time::Instant;

use crate::dedup::Deduplicator;
use crate::digest::{DigestIntervals, DigestScheduler, Due, Period};
use crate::error::RunError;
use crate::ingest::types::{Fingerprint, SourceProvider};
use crate::ingest::{collect_all, is_relevant, SourceFailure, SourceTally};
use crate::publish::{digest_card, item_card, PublishOutcome, Publisher};
use crate::store::{prune_all, PruneReport, Retention, Stores};
use crate::summarize::SummarizerGateway;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Collect,
    Dedup,
    Summarize,
    Publish,
    Digest,
    Prune,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Collect => "collect",
            Stage::Dedup => "dedup",
            Stage::Summarize => "summarize",
            Stage::Publish => "publish",
            Stage::Digest => "digest",
            Stage::Prune => "prune",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    pub stage: Stage,
    pub fingerprint: Fingerprint,
    pub title: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DigestStatus {
    Emitted { items: usize, token: String },
    /// The sink already held this digest; marker advanced all the same.
    AlreadyDelivered { items: usize, token: String },
    NotDue { next_due_at: DateTime<Utc> },
    /// Due, but nothing was collected in the window.
    Empty,
    Failed { error: String },
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub collected: usize,
    pub filtered: usize,
    pub malformed: usize,
    pub new: usize,
    pub duplicates_seen: usize,
    pub duplicates_in_batch: usize,
    pub summarized: usize,
    pub failed_summary: usize,
    pub published: usize,
    pub duplicate_posts: usize,
    pub failed_publish: usize,
    pub digests: Vec<(Period, DigestStatus)>,
    pub pruned: Option<PruneReport>,
    pub prune_error: Option<String>,
    pub per_source: Vec<SourceTally>,
    pub source_failures: Vec<SourceFailure>,
    pub item_failures: Vec<ItemFailure>,
    /// Stage at which the run stopped because its time budget ran out.
    pub aborted_at: Option<Stage>,
}

impl RunReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            collected: 0,
            filtered: 0,
            malformed: 0,
            new: 0,
            duplicates_seen: 0,
            duplicates_in_batch: 0,
            summarized: 0,
            failed_summary: 0,
            published: 0,
            duplicate_posts: 0,
            failed_publish: 0,
            digests: Vec::new(),
            pruned: None,
            prune_error: None,
            per_source: Vec::new(),
            source_failures: Vec::new(),
            item_failures: Vec::new(),
            aborted_at: None,
        }
    }

    pub fn digest_status(&self, period: Period) -> Option<&DigestStatus> {
        self.digests.iter().find(|(p, _)| *p == period).map(|(_, s)| s)
    }

    pub fn digest_emitted(&self) -> bool {
        self.digests.iter().any(|(_, s)| {
            matches!(
                s,
                DigestStatus::Emitted { .. } | DigestStatus::AlreadyDelivered { .. }
            )
        })
    }

    /// Anything that did not go through cleanly.
    pub fn has_failures(&self) -> bool {
        !self.source_failures.is_empty()
            || !self.item_failures.is_empty()
            || self.aborted_at.is_some()
            || self.prune_error.is_some()
            || self
                .digests
                .iter()
                .any(|(_, s)| matches!(s, DigestStatus::Failed { .. }))
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "run at {}", self.started_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(
            f,
            "  collected {} (filtered {}, malformed {}), new {}, duplicates {} (+{} in batch)",
            self.collected,
            self.filtered,
            self.malformed,
            self.new,
            self.duplicates_seen,
            self.duplicates_in_batch
        )?;
        writeln!(
            f,
            "  summarized {}, failed-summary {}",
            self.summarized, self.failed_summary
        )?;
        writeln!(
            f,
            "  published {}, duplicate-posts {}, failed-publish {}",
            self.published, self.duplicate_posts, self.failed_publish
        )?;
        for (period, status) in &self.digests {
            let s = match status {
                DigestStatus::Emitted { items, .. } => format!("emitted ({items} items)"),
                DigestStatus::AlreadyDelivered { items, .. } => {
                    format!("already delivered ({items} items)")
                }
                DigestStatus::NotDue { next_due_at } => {
                    format!("not due (next {})", next_due_at.format("%Y-%m-%d %H:%M UTC"))
                }
                DigestStatus::Empty => "due, nothing to send".to_string(),
                DigestStatus::Failed { error } => format!("FAILED: {error}"),
            };
            writeln!(f, "  {period} digest: {s}")?;
        }
        if let Some(p) = &self.pruned {
            writeln!(
                f,
                "  pruned {} (fingerprints {}, journal {}, deliveries {})",
                p.total(),
                p.fingerprints,
                p.journal,
                p.deliveries
            )?;
        }
        if let Some(e) = &self.prune_error {
            writeln!(f, "  prune FAILED: {e}")?;
        }
        for t in &self.per_source {
            writeln!(f, "  source {}: {} items", t.source_id, t.collected)?;
        }
        for s in &self.source_failures {
            writeln!(f, "  source {} FAILED: {}", s.source_id, s.error)?;
        }
        for i in &self.item_failures {
            writeln!(f, "  {} {} [{}]: {}", i.stage, i.fingerprint.short(), i.title, i.error)?;
        }
        if let Some(stage) = self.aborted_at {
            writeln!(f, "  run time budget exhausted, stopped before {stage}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub concurrency: usize,
    pub max_items_per_source: Option<usize>,
    pub keywords: Vec<String>,
    pub publish_items: bool,
    pub run_timeout: Option<Duration>,
    pub intervals: DigestIntervals,
    /// `None` disables pruning at the end of a run.
    pub prune: Option<Retention>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_items_per_source: None,
            keywords: Vec::new(),
            publish_items: true,
            run_timeout: None,
            intervals: DigestIntervals::default(),
            prune: None,
        }
    }
}

pub struct Pipeline {
    providers: Vec<Box<dyn SourceProvider>>,
    stores: Stores,
    gateway: SummarizerGateway,
    publisher: Publisher,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        providers: Vec<Box<dyn SourceProvider>>,
        stores: Stores,
        gateway: SummarizerGateway,
        publisher: Publisher,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            providers,
            stores,
            gateway,
            publisher,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<RunReport, RunError> {
        crate::metrics::ensure_described();
        let deadline = self.settings.run_timeout.map(|t| Instant::now() + t);
        let out_of_time = |stage: Stage, report: &mut RunReport| -> bool {
            match deadline {
                Some(d) if Instant::now() >= d => {
                    tracing::warn!(target: "pipeline", %stage, "run time budget exhausted, skipping remaining stages");
                    report.aborted_at = Some(stage);
                    true
                }
                _ => false,
            }
        };

        let mut report = RunReport::new(now);
        tracing::info!(
            target: "pipeline",
            sources = self.providers.len(),
            summarizer = self.gateway.provider_name(),
            sink = self.publisher.sink_name(),
            "run started"
        );

        // collect
        let collection = collect_all(
            &self.providers,
            self.settings.concurrency,
            self.settings.max_items_per_source,
        )
        .await;
        report.collected = collection.items.len();
        report.malformed = collection.malformed();
        report.per_source = collection.tallies;
        report.source_failures = collection.failures;

        let (relevant, irrelevant): (Vec<_>, Vec<_>) = collection
            .items
            .into_iter()
            .partition(|i| is_relevant(&i.title, &i.body_excerpt, &self.settings.keywords));
        report.filtered = irrelevant.len();
        counter!("scout_items_filtered_total").increment(irrelevant.len() as u64);

        // dedup
        if out_of_time(Stage::Dedup, &mut report) {
            return Ok(report);
        }
        let dedup = Deduplicator::new(self.stores.fingerprints.as_ref())
            .with_journal(self.stores.journal.as_ref())
            .filter_new(relevant, now)?;
        report.new = dedup.fresh.len();
        report.duplicates_seen = dedup.seen_before;
        report.duplicates_in_batch = dedup.in_batch;

        // summarize
        if out_of_time(Stage::Summarize, &mut report) {
            return Ok(report);
        }
        let outcomes = self.gateway.summarize_all(dedup.fresh).await;
        let mut items = Vec::with_capacity(outcomes.len());
        for o in outcomes {
            match (&o.item.summary, &o.failure) {
                (Some(s), _) => {
                    report.summarized += 1;
                    self.stores.journal.attach_summary(&o.item.fingerprint, s)?;
                }
                (None, failure) => {
                    report.failed_summary += 1;
                    report.item_failures.push(ItemFailure {
                        stage: Stage::Summarize,
                        fingerprint: o.item.fingerprint.clone(),
                        title: o.item.title.clone(),
                        error: failure
                            .as_ref()
                            .map(|e| e.to_string())
                            .unwrap_or_else(|| "no summary".into()),
                    });
                }
            }
            items.push(o.item);
        }

        // publish items
        if self.settings.publish_items {
            if out_of_time(Stage::Publish, &mut report) {
                return Ok(report);
            }
            for item in &items {
                let card = item_card(item, now);
                match self.publisher.publish(&card, now).await? {
                    PublishOutcome::Delivered { .. } => report.published += 1,
                    PublishOutcome::Duplicate => report.duplicate_posts += 1,
                    PublishOutcome::Failed { error, .. } => {
                        report.failed_publish += 1;
                        report.item_failures.push(ItemFailure {
                            stage: Stage::Publish,
                            fingerprint: item.fingerprint.clone(),
                            title: item.title.clone(),
                            error: error.to_string(),
                        });
                    }
                }
            }
        }

        // digests
        if out_of_time(Stage::Digest, &mut report) {
            return Ok(report);
        }
        let scheduler = DigestScheduler::new(
            self.stores.markers.as_ref(),
            self.stores.journal.as_ref(),
            self.settings.intervals,
        );
        for (period, _) in self.settings.intervals.enabled() {
            let status = self.run_digest(&scheduler, period, now).await?;
            report.digests.push((period, status));
        }

        // prune
        if let Some(retention) = self.settings.prune {
            if out_of_time(Stage::Prune, &mut report) {
                return Ok(report);
            }
            match prune_all(
                retention,
                now,
                self.stores.fingerprints.as_ref(),
                self.stores.journal.as_ref(),
                self.stores.deliveries.as_ref(),
            ) {
                Ok(p) => report.pruned = Some(p),
                // Every durable write of this run already happened.
                Err(e) => {
                    tracing::warn!(target: "pipeline", error = %e, "retention prune failed");
                    report.prune_error = Some(e.to_string());
                }
            }
        }

        crate::metrics::mark_run_finished(Utc::now());
        tracing::info!(
            target: "pipeline",
            collected = report.collected,
            new = report.new,
            published = report.published,
            failed_publish = report.failed_publish,
            digest_emitted = report.digest_emitted(),
            "run finished"
        );
        Ok(report)
    }

    async fn run_digest(
        &self,
        scheduler: &DigestScheduler<'_>,
        period: Period,
        now: DateTime<Utc>,
    ) -> Result<DigestStatus, RunError> {
        if let Due::NotDue { next_due_at } = scheduler.check(period, now)? {
            tracing::debug!(target: "digest", %period, %next_due_at, "not due");
            return Ok(DigestStatus::NotDue { next_due_at });
        }
        let Some(digest) = scheduler.assemble(period, now)? else {
            tracing::info!(target: "digest", %period, "due but empty, marker left in place");
            return Ok(DigestStatus::Empty);
        };
        let card = digest_card(&digest);
        let items = digest.entries.len();
        let token = card.idempotency_token.clone();
        let status = match self.publisher.publish(&card, now).await? {
            PublishOutcome::Delivered { .. } => {
                scheduler.confirm(&digest)?;
                DigestStatus::Emitted { items, token }
            }
            PublishOutcome::Duplicate => {
                scheduler.confirm(&digest)?;
                DigestStatus::AlreadyDelivered { items, token }
            }
            PublishOutcome::Failed { error, .. } => {
                return Ok(DigestStatus::Failed {
                    error: error.to_string(),
                })
            }
        };
        counter!("scout_digests_emitted_total", "period" => period.as_str()).increment(1);
        Ok(status)
    }
}
