// src/config/mod.rs
//! Run configuration.
//!
//! Lookup order:
//! 1) `$SCOUT_CONFIG_PATH` (must exist)
//! 2) `config/scout.toml`
//! 3) `config/scout.json`
//! 4) built-in defaults
//!
//! Tracker credentials never live here; see [`planka::PlankaConfig`].

pub mod planka;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::digest::DigestIntervals;
use crate::ingest::types::FeedSource;
use crate::retry::RetryPolicy;
use crate::store::Retention;

pub use planka::PlankaConfig;

const ENV_PATH: &str = "SCOUT_CONFIG_PATH";
/// Longest accepted digest interval.
pub const MAX_DIGEST_INTERVAL_DAYS: i64 = 366;

fn default_state_dir() -> PathBuf {
    PathBuf::from("state")
}
fn default_concurrency() -> usize {
    4
}
fn default_true() -> bool {
    true
}
fn default_run_timeout_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScoutConfig {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Upper bound on concurrent feed fetches and summarizer calls.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub max_items_per_source: Option<usize>,
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,
    /// Post a card per new item (digests are posted either way).
    #[serde(default = "default_true")]
    pub publish_items: bool,
    #[serde(default = "default_run_timeout_secs")]
    pub run_timeout_secs: u64,
    #[serde(default = "default_sources")]
    pub sources: Vec<FeedSource>,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub summarizer: SummarizerSettings,
    #[serde(default)]
    pub digest: DigestSettings,
    #[serde(default)]
    pub retention: RetentionSettings,
}

impl Default for ScoutConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            concurrency: default_concurrency(),
            max_items_per_source: None,
            keywords: default_keywords(),
            publish_items: true,
            run_timeout_secs: default_run_timeout_secs(),
            sources: default_sources(),
            retry: RetrySettings::default(),
            summarizer: SummarizerSettings::default(),
            digest: DigestSettings::default(),
            retention: RetentionSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummarizerKind {
    Openai,
    Excerpt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerSettings {
    pub provider: SummarizerKind,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub request_timeout_secs: u64,
    pub max_chars: usize,
}

impl Default for SummarizerSettings {
    fn default() -> Self {
        Self {
            provider: SummarizerKind::Openai,
            model: None,
            base_url: None,
            request_timeout_secs: 20,
            max_chars: crate::summarize::DEFAULT_SUMMARY_MAX_CHARS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestSettings {
    pub daily_enabled: bool,
    pub daily_interval_hours: i64,
    pub weekly_enabled: bool,
    pub weekly_interval_days: i64,
}

impl Default for DigestSettings {
    fn default() -> Self {
        Self {
            daily_enabled: true,
            daily_interval_hours: 24,
            weekly_enabled: true,
            weekly_interval_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionSettings {
    pub horizon_days: i64,
    pub prune_on_run: bool,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            horizon_days: crate::store::DEFAULT_RETENTION_DAYS,
            prune_on_run: true,
        }
    }
}

fn feed(id: &str, name: &str, url: &str) -> FeedSource {
    FeedSource {
        id: id.into(),
        name: name.into(),
        url: url.into(),
    }
}

pub fn default_sources() -> Vec<FeedSource> {
    vec![
        feed("techcommunity", "Microsoft Tech Community", "https://techcommunity.microsoft.com/rss-feeds"),
        feed("powerplatform", "Power Platform Blog", "https://powerplatform.microsoft.com/en-us/blog/feed/"),
        feed("m365", "Microsoft 365 Blog", "https://www.microsoft.com/en-us/microsoft-365/blog/feed/"),
        feed("azure", "Azure Blog", "https://azure.microsoft.com/en-us/blog/feed/"),
        feed(
            "learn",
            "Microsoft Learn",
            "https://docs.microsoft.com/api/search/rss?search=Power%20Platform&locale=en-us",
        ),
        feed("dynamics365", "Dynamics 365 Blog", "https://cloudblogs.microsoft.com/dynamics365/feed/"),
    ]
}

pub fn default_keywords() -> Vec<String> {
    [
        "power platform", "copilot", "power apps", "power automate", "power bi",
        "dynamics 365", "m365", "microsoft 365", "ai", "agent", "automation",
        "low-code", "no-code", "sharepoint", "teams", "azure", "microsoft",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl ScoutConfig {
    /// Load from an explicit path. Format picked by extension (`.json`, else TOML).
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let is_json = path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        let cfg: Self = if is_json {
            serde_json::from_str(&content)
                .with_context(|| format!("parsing JSON config {}", path.display()))?
        } else {
            toml::from_str(&content)
                .with_context(|| format!("parsing TOML config {}", path.display()))?
        };
        cfg.validated()
    }

    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_PATH} points to non-existent path {}", pb.display()));
            }
            return Self::load_from(&pb);
        }
        for candidate in ["config/scout.toml", "config/scout.json"] {
            let pb = PathBuf::from(candidate);
            if pb.exists() {
                return Self::load_from(&pb);
            }
        }
        tracing::info!(target: "config", "no config file found, using built-in defaults");
        Self::default().validated()
    }

    fn validated(mut self) -> Result<Self> {
        if self.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.run_timeout_secs == 0 {
            bail!("run_timeout_secs must be positive");
        }
        if self.summarizer.request_timeout_secs == 0 {
            bail!("summarizer.request_timeout_secs must be positive");
        }
        Retention::days(self.retention.horizon_days).context("retention.horizon_days")?;
        let d = &self.digest;
        if d.daily_enabled && !(1..=MAX_DIGEST_INTERVAL_DAYS * 24).contains(&d.daily_interval_hours) {
            bail!(
                "digest.daily_interval_hours must be between 1 and {}, got {}",
                MAX_DIGEST_INTERVAL_DAYS * 24,
                d.daily_interval_hours
            );
        }
        if d.weekly_enabled && !(1..=MAX_DIGEST_INTERVAL_DAYS).contains(&d.weekly_interval_days) {
            bail!(
                "digest.weekly_interval_days must be between 1 and {MAX_DIGEST_INTERVAL_DAYS}, got {}",
                d.weekly_interval_days
            );
        }
        if self.sources.is_empty() {
            bail!("at least one source is required");
        }
        let mut ids = HashSet::new();
        for s in &self.sources {
            if s.id.trim().is_empty() {
                bail!("source {:?} has an empty id", s.name);
            }
            if !ids.insert(s.id.as_str()) {
                bail!("duplicate source id {:?}", s.id);
            }
            let u = url::Url::parse(&s.url)
                .with_context(|| format!("source {:?} has an invalid url", s.id))?;
            if !matches!(u.scheme(), "http" | "https") {
                bail!("source {:?} url must be http(s)", s.id);
            }
        }
        self.keywords = clean_keywords(std::mem::take(&mut self.keywords));
        Ok(self)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.base_delay_ms),
            Duration::from_millis(self.retry.max_delay_ms.max(self.retry.base_delay_ms)),
        )
    }

    pub fn digest_intervals(&self) -> DigestIntervals {
        let d = &self.digest;
        // Out-of-range values are rejected by `validated`; `try_*` keeps an
        // unvalidated config from panicking here.
        DigestIntervals {
            daily: d
                .daily_enabled
                .then(|| chrono::Duration::try_hours(d.daily_interval_hours))
                .flatten(),
            weekly: d
                .weekly_enabled
                .then(|| chrono::Duration::try_days(d.weekly_interval_days))
                .flatten(),
        }
    }

    pub fn retention(&self) -> Result<Retention> {
        Retention::days(self.retention.horizon_days)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

/// Trim, lowercase, drop empties and duplicates; keeps first-seen order.
fn clean_keywords(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty() && seen.insert(k.clone()))
        .collect()
}
