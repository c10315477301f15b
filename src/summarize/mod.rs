// src/summarize/mod.rs
//! Summarizer gateway: wraps a fallible, rate-limited summarization backend
//! with per-item retry, a request timeout and failure isolation.

pub mod excerpt;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use metrics::counter;

use crate::error::ExternalError;
use crate::ingest::types::Item;
use crate::retry::{Exhausted, RetryPolicy};

pub use excerpt::ExcerptSummarizer;
pub use openai::OpenAiSummarizer;

/// Black-box summarization backend.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, title: &str, text: &str) -> Result<String, ExternalError>;
    /// Backend name for logs and the run report.
    fn provider_name(&self) -> &'static str;
}

pub type DynSummarizer = Arc<dyn Summarizer>;

/// Default cap on summary length (chars).
pub const DEFAULT_SUMMARY_MAX_CHARS: usize = 600;

/// Single line, collapsed whitespace, capped at `max_chars` on a char boundary.
pub fn clean_summary(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let cut: String = collapsed.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", cut.trim_end())
}

/// Per-item result; the item is always handed back, summarized or not.
#[derive(Debug, Clone)]
pub struct SummaryOutcome {
    pub item: Item,
    pub failure: Option<Exhausted>,
}

impl SummaryOutcome {
    pub fn is_summarized(&self) -> bool {
        self.item.summary.is_some()
    }
}

pub struct SummarizerGateway {
    inner: DynSummarizer,
    policy: RetryPolicy,
    request_timeout: Duration,
    concurrency: usize,
    max_chars: usize,
}

impl SummarizerGateway {
    pub fn new(inner: DynSummarizer, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            request_timeout: Duration::from_secs(20),
            concurrency: 4,
            max_chars: DEFAULT_SUMMARY_MAX_CHARS,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn with_max_chars(mut self, n: usize) -> Self {
        self.max_chars = n.max(16);
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }

    async fn attempt(&self, item: &Item) -> Result<String, ExternalError> {
        let input = item.summary_input();
        let call = self.inner.summarize(&item.title, &input);
        let raw = match tokio::time::timeout(self.request_timeout, call).await {
            Ok(res) => res?,
            Err(_) => {
                return Err(ExternalError::transient(format!(
                    "summarizer timed out after {:?}",
                    self.request_timeout
                )))
            }
        };
        let cleaned = clean_summary(&raw, self.max_chars);
        if cleaned.is_empty() {
            return Err(ExternalError::permanent("summarizer returned an empty summary"));
        }
        Ok(cleaned)
    }

    /// Summarize one item. Failures leave `summary` absent; the item is never dropped.
    pub async fn summarize(&self, mut item: Item) -> SummaryOutcome {
        let label = format!("summarize {}", item.fingerprint.short());
        let res = self.policy.run(&label, |_| self.attempt(&item)).await;
        match res {
            Ok((summary, attempts)) => {
                tracing::debug!(
                    target: "summarize",
                    fingerprint = item.fingerprint.short(),
                    attempts,
                    provider = self.provider_name(),
                    "summarized"
                );
                counter!("scout_summaries_total", "outcome" => "ok").increment(1);
                item.summary = Some(summary);
                SummaryOutcome { item, failure: None }
            }
            Err(exhausted) => {
                tracing::warn!(
                    target: "summarize",
                    fingerprint = item.fingerprint.short(),
                    title = %item.title,
                    error = %exhausted,
                    "summary unavailable, item passes through without one"
                );
                counter!("scout_summaries_total", "outcome" => "failed").increment(1);
                SummaryOutcome {
                    item,
                    failure: Some(exhausted),
                }
            }
        }
    }

    /// Summarize independently, at most `concurrency` in flight; output keeps input order.
    pub async fn summarize_all(&self, items: Vec<Item>) -> Vec<SummaryOutcome> {
        stream::iter(items)
            .map(|item| self.summarize(item))
            .buffered(self.concurrency)
            .collect()
            .await
    }
}
