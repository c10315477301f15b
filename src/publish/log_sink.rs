// src/publish/log_sink.rs
use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{CardRequest, SinkOutcome, TrackerSink};
use crate::error::ExternalError;

/// Dry-run sink: logs cards instead of posting them. Remembers tokens for the
/// life of the process so repeated cards show up as duplicates.
#[derive(Default)]
pub struct LogSink {
    seen: Mutex<HashSet<String>>,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrackerSink for LogSink {
    async fn create_card(&self, card: &CardRequest) -> Result<SinkOutcome, ExternalError> {
        let mut seen = self
            .seen
            .lock()
            .map_err(|_| ExternalError::permanent("log sink lock poisoned"))?;
        if !seen.insert(card.idempotency_token.clone()) {
            return Ok(SinkOutcome::Duplicate);
        }
        tracing::info!(
            target: "publish",
            kind = ?card.kind,
            name = %card.name,
            token = %card.idempotency_token,
            "dry run: card not posted"
        );
        tracing::debug!(target: "publish", description = %card.description, "dry run card body");
        Ok(SinkOutcome::Created)
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
