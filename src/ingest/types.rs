// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ExternalError;

/// A configured feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeedSource {
    /// Stable identifier, used in fingerprints of weak items and in reports.
    pub id: String,
    /// Display name, used as the card prefix (`[Azure Blog] ...`).
    pub name: String,
    pub url: String,
}

/// One entry as the feed adapter returns it, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawItem {
    pub title: Option<String>,
    pub link: Option<String>,
    /// Source-assigned identifier (RSS `guid`, Atom `id`).
    pub guid: Option<String>,
    /// Source-asserted; advisory only.
    pub published_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
}

/// Lowercase hex SHA-256 of an item's natural key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for logs. Values read back from a damaged state
    /// file may not be hex; those are shown whole.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical news item flowing through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub source_id: String,
    pub source_name: String,
    pub natural_key: String,
    pub title: String,
    pub body_excerpt: String,
    pub published_at: Option<DateTime<Utc>>,
    pub url: Option<String>,
    /// Set by the summarizer gateway; absent until summarization succeeds.
    pub summary: Option<String>,
    pub fingerprint: Fingerprint,
}

impl Item {
    /// Text handed to the summarizer.
    pub fn summary_input(&self) -> String {
        if self.body_excerpt.is_empty() {
            self.title.clone()
        } else {
            format!("{}\n\n{}", self.title, self.body_excerpt)
        }
    }
}

/// "Produces items" capability; the pipeline never branches on source type.
#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    async fn fetch_latest(&self) -> Result<Vec<RawItem>, ExternalError>;
    fn source(&self) -> &FeedSource;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_fingerprint_never_splits_a_char() {
        let hex = Fingerprint::from_hex("0123456789abcdef");
        assert_eq!(hex.short(), "0123456789ab");
        assert_eq!(Fingerprint::from_hex("abc").short(), "abc");
        // 11 ASCII bytes then a 3-byte char straddling the cut.
        let damaged = Fingerprint::from_hex("0123456789a€x");
        assert_eq!(damaged.short(), "0123456789a€x");
    }
}
