// src/publish/planka.rs
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{CardKind, CardRequest, SinkOutcome, TrackerSink, TOKEN_LINE_PREFIX};
use crate::config::PlankaConfig;
use crate::error::ExternalError;

/// Planka REST sink. `base_url` is the API root (`PLANKA_URL`).
pub struct PlankaSink {
    cfg: PlankaConfig,
    client: Client,
}

#[derive(Serialize)]
struct CreateCard<'a> {
    name: &'a str,
    description: &'a str,
    #[serde(rename = "listId")]
    list_id: &'a str,
    position: u32,
}

#[derive(Deserialize, Default)]
struct BoardResp {
    #[serde(default)]
    included: Included,
}

#[derive(Deserialize, Default)]
struct Included {
    #[serde(default)]
    cards: Vec<BoardCard>,
}

#[derive(Deserialize)]
struct BoardCard {
    #[serde(default)]
    description: Option<String>,
}

impl PlankaSink {
    pub fn new(cfg: PlankaConfig, timeout: Duration) -> Result<Self, ExternalError> {
        let client = Client::builder()
            .user_agent(concat!("m365-scout/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| ExternalError::permanent(format!("build http client: {e}")))?;
        Ok(Self { cfg, client })
    }

    fn list_for(&self, kind: CardKind) -> &str {
        match kind {
            CardKind::Item => &self.cfg.todo_list_id,
            CardKind::Digest => &self.cfg.digest_list_id,
        }
    }

    /// Scan the board for a card already carrying `token`.
    async fn board_has_token(&self, token: &str) -> Result<bool, ExternalError> {
        let url = format!("{}/boards/{}", self.cfg.base_url, self.cfg.board_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.cfg.token)
            .send()
            .await
            .map_err(|e| ExternalError::from_reqwest(&e, "planka board"))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ExternalError::from_status(status, "planka board"));
        }
        let board: BoardResp = resp
            .json()
            .await
            .map_err(|e| ExternalError::transient(format!("planka board body: {e}")))?;
        let needle = format!("{TOKEN_LINE_PREFIX}{token}");
        Ok(board
            .included
            .cards
            .iter()
            .filter_map(|c| c.description.as_deref())
            .any(|d| d.lines().any(|l| l.trim() == needle)))
    }
}

#[async_trait]
impl TrackerSink for PlankaSink {
    async fn create_card(&self, card: &CardRequest) -> Result<SinkOutcome, ExternalError> {
        if self.board_has_token(&card.idempotency_token).await? {
            return Ok(SinkOutcome::Duplicate);
        }
        let list_id = self.list_for(card.kind);
        let url = format!("{}/lists/{}/cards", self.cfg.base_url, list_id);
        let body = CreateCard {
            name: &card.name,
            description: &card.description,
            list_id,
            position: 1,
        };
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.cfg.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExternalError::from_reqwest(&e, "planka create"))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ExternalError::from_status(status, "planka create"));
        }
        Ok(SinkOutcome::Created)
    }

    fn name(&self) -> &'static str {
        "planka"
    }
}
