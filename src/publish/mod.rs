// src/publish/mod.rs
//! Delivery of item and digest cards to the tracker.
//!
//! Idempotency is layered: the local [`DeliveryLog`] short-circuits tokens we
//! already know were accepted, and the sink itself is asked to detect a token
//! it already holds (a card created before a crash, confirmed too late).

pub mod log_sink;
pub mod planka;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;

use crate::digest::Digest;
use crate::error::{ExternalError, StoreError};
use crate::ingest::types::Item;
use crate::retry::RetryPolicy;
use crate::store::DeliveryLog;

pub use log_sink::LogSink;
pub use planka::PlankaSink;

/// Prefix of the line that carries the idempotency token in a card description.
pub const TOKEN_LINE_PREFIX: &str = "scout-id: ";
/// Card names cut the title at this many chars.
pub const CARD_TITLE_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardKind {
    Item,
    Digest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardRequest {
    pub idempotency_token: String,
    pub name: String,
    pub description: String,
    pub kind: CardKind,
}

/// What the sink did with a create request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkOutcome {
    Created,
    /// The sink already holds a card with this token.
    Duplicate,
}

/// Tracker boundary: create a card keyed by an idempotency token.
#[async_trait]
pub trait TrackerSink: Send + Sync {
    async fn create_card(&self, card: &CardRequest) -> Result<SinkOutcome, ExternalError>;
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered { attempts: u32 },
    Duplicate,
    Failed { attempts: u32, error: ExternalError },
}

impl PublishOutcome {
    /// Delivered now or earlier; either way the card exists.
    pub fn is_confirmed(&self) -> bool {
        !matches!(self, PublishOutcome::Failed { .. })
    }
}

pub fn item_token(item: &Item) -> String {
    format!("item:{}", item.fingerprint)
}

fn truncate_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

/// `[Azure Blog] <title, 80 chars>` with source link and found date.
pub fn item_card(item: &Item, found_at: DateTime<Utc>) -> CardRequest {
    let token = item_token(item);
    let body = match &item.summary {
        Some(s) => s.clone(),
        None if item.body_excerpt.is_empty() => "(no summary available)".to_string(),
        None => format!("(excerpt, no summary available) {}", item.body_excerpt),
    };
    let link = item.url.as_deref().unwrap_or("n/a");
    let description = format!(
        "{body}\n\n🔗 Source: {link}\n📅 Found: {}\n\n{TOKEN_LINE_PREFIX}{token}",
        found_at.format("%Y-%m-%d %H:%M UTC")
    );
    CardRequest {
        idempotency_token: token,
        name: format!(
            "[{}] {}",
            item.source_name,
            truncate_chars(&item.title, CARD_TITLE_CHARS)
        ),
        description,
        kind: CardKind::Item,
    }
}

pub fn digest_card(digest: &Digest) -> CardRequest {
    let token = digest.idempotency_token();
    CardRequest {
        description: format!(
            "{}\n{TOKEN_LINE_PREFIX}{token}",
            digest.render_body()
        ),
        idempotency_token: token,
        name: digest.title(),
        kind: CardKind::Digest,
    }
}

pub struct Publisher {
    sink: Arc<dyn TrackerSink>,
    deliveries: Arc<dyn DeliveryLog>,
    policy: RetryPolicy,
}

impl Publisher {
    pub fn new(sink: Arc<dyn TrackerSink>, deliveries: Arc<dyn DeliveryLog>, policy: RetryPolicy) -> Self {
        Self {
            sink,
            deliveries,
            policy,
        }
    }

    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }

    /// Deliver one card. Sink failures land in the outcome; only the delivery
    /// log (persistence) can make this return `Err`.
    pub async fn publish(&self, card: &CardRequest, now: DateTime<Utc>) -> Result<PublishOutcome, StoreError> {
        let token = &card.idempotency_token;
        if self.deliveries.is_delivered(token)? {
            tracing::debug!(target: "publish", %token, "already delivered, skipping");
            counter!("scout_publish_total", "outcome" => "duplicate").increment(1);
            return Ok(PublishOutcome::Duplicate);
        }

        let label = format!("publish {token}");
        let res = self.policy.run(&label, |_| self.sink.create_card(card)).await;
        let outcome = match res {
            Ok((SinkOutcome::Created, attempts)) => {
                self.deliveries.mark_delivered(token, now)?;
                tracing::info!(target: "publish", %token, name = %card.name, attempts, "card created");
                counter!("scout_publish_total", "outcome" => "delivered").increment(1);
                PublishOutcome::Delivered { attempts }
            }
            Ok((SinkOutcome::Duplicate, _)) => {
                self.deliveries.mark_delivered(token, now)?;
                tracing::info!(target: "publish", %token, "sink already holds this card");
                counter!("scout_publish_total", "outcome" => "duplicate").increment(1);
                PublishOutcome::Duplicate
            }
            Err(exhausted) => {
                tracing::warn!(
                    target: "publish",
                    %token,
                    sink = self.sink.name(),
                    error = %exhausted,
                    "card not delivered"
                );
                counter!("scout_publish_total", "outcome" => "failed").increment(1);
                PublishOutcome::Failed {
                    attempts: exhausted.attempts,
                    error: exhausted.error,
                }
            }
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::fingerprint::fingerprint;
    use chrono::TimeZone;

    fn sample(summary: Option<&str>) -> Item {
        Item {
            source_id: "azure".into(),
            source_name: "Azure Blog".into(),
            natural_key: "url:https://a/1".into(),
            title: "x".repeat(120),
            body_excerpt: "Body text".into(),
            published_at: None,
            url: Some("https://a/1".into()),
            summary: summary.map(String::from),
            fingerprint: fingerprint("url:https://a/1"),
        }
    }

    #[test]
    fn item_card_layout() {
        let at = Utc.with_ymd_and_hms(2025, 5, 2, 9, 30, 0).unwrap();
        let c = item_card(&sample(Some("Short summary.")), at);
        assert_eq!(c.name, format!("[Azure Blog] {}", "x".repeat(80)));
        assert!(c.description.starts_with("Short summary.\n\n🔗 Source: https://a/1\n📅 Found: 2025-05-02 09:30 UTC"));
        assert!(c.description.ends_with(&format!("scout-id: {}", c.idempotency_token)));
        assert_eq!(c.kind, CardKind::Item);
    }

    #[test]
    fn missing_summary_falls_back_to_marked_excerpt() {
        let c = item_card(&sample(None), Utc::now());
        assert!(c.description.starts_with("(excerpt, no summary available) Body text"));
    }
}
