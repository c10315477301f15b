// src/config/planka.rs
use anyhow::{bail, Context};
use std::env;

/// Tracker credentials and target lists, read from the environment.
#[derive(Clone)]
pub struct PlankaConfig {
    /// API base, e.g. `https://planka.example.com/api`. No trailing slash.
    pub base_url: String,
    pub token: String,
    pub board_id: String,
    pub todo_list_id: String,
    /// Where digest cards go; defaults to the todo list.
    pub digest_list_id: String,
}

impl std::fmt::Debug for PlankaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlankaConfig")
            .field("base_url", &self.base_url)
            .field("token_len", &self.token.len())
            .field("board_id", &self.board_id)
            .field("todo_list_id", &self.todo_list_id)
            .field("digest_list_id", &self.digest_list_id)
            .finish()
    }
}

fn required(name: &str) -> anyhow::Result<String> {
    let v = env::var(name).with_context(|| format!("missing required env var {name}"))?;
    let v = v.trim().to_string();
    if v.is_empty() {
        bail!("env var {name} is set but empty");
    }
    Ok(v)
}

impl PlankaConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url = required("PLANKA_URL")?;
        let parsed = url::Url::parse(&base_url)
            .with_context(|| format!("PLANKA_URL is not a valid URL: {base_url}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("PLANKA_URL must be http(s), got {}", parsed.scheme());
        }
        let todo_list_id = required("PLANKA_TODO_LIST_ID")?;
        let digest_list_id = env::var("PLANKA_DIGEST_LIST_ID")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| todo_list_id.clone());

        let cfg = Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: required("PLANKA_TOKEN")?,
            board_id: required("PLANKA_BOARD_ID")?,
            todo_list_id,
            digest_list_id,
        };
        tracing::debug!(target: "config", planka = ?cfg, "planka config loaded");
        Ok(cfg)
    }
}
