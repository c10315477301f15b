// src/summarize/openai.rs
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Summarizer;
use crate::error::ExternalError;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const SYSTEM_PROMPT: &str = "You summarize Microsoft product news for a team backlog. \
Return two or three plain sentences, neutral tone, no emojis, no markdown. \
Say what changed and who it affects. Output only the summary.";

/// OpenAI Chat Completions summarizer. Bearer-authenticated with `OPENAI_API_KEY`.
pub struct OpenAiSummarizer {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiSummarizer {
    /// `base_url` lets tests point at a local mock server.
    pub fn new(
        api_key: impl Into<String>,
        model: Option<&str>,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ExternalError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ExternalError::permanent("OPENAI_API_KEY is empty"));
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("m365-scout/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()
            .map_err(|e| ExternalError::permanent(format!("build http client: {e}")))?;
        let base = base_url.unwrap_or(DEFAULT_BASE_URL).trim_end_matches('/');
        Ok(Self {
            http,
            api_key,
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
            endpoint: format!("{base}/chat/completions"),
        })
    }

    /// Reads the key from `OPENAI_API_KEY`.
    pub fn from_env(
        model: Option<&str>,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ExternalError> {
        let key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
        Self::new(key, model, base_url, timeout)
    }
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct Resp {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, title: &str, text: &str) -> Result<String, ExternalError> {
        let user = format!("Title: {title}\n\n{text}");
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                Msg {
                    role: "user",
                    content: &user,
                },
            ],
            temperature: 0.2,
            max_tokens: 220,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| ExternalError::from_reqwest(&e, "openai request"))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ExternalError::from_status(status, "openai"));
        }
        let body: Resp = resp
            .json()
            .await
            .map_err(|e| ExternalError::permanent(format!("openai response: {e}")))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ExternalError::permanent("openai returned no choices"))?;
        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(ExternalError::permanent("openai rejected the content (content_filter)"));
        }
        Ok(choice.message.content.unwrap_or_default())
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}
