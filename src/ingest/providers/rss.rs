// src/ingest/providers/rss.rs
//! Uniform feed adapter: RSS 2.0 or Atom 1.0, from HTTP or an in-memory fixture.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::error::ExternalError;
use crate::ingest::types::{FeedSource, RawItem, SourceProvider};

// ---- RSS 2.0 ----

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    guid: Option<TextNode>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

// ---- Atom 1.0 ----

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    title: Option<TextNode>,
    id: Option<String>,
    #[serde(rename = "link", default)]
    link: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
    summary: Option<TextNode>,
    content: Option<TextNode>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

/// Element whose attributes we ignore (`<title type="html">`, `<guid isPermaLink>`).
#[derive(Debug, Deserialize)]
struct TextNode {
    #[serde(rename = "$text", default)]
    value: Option<String>,
}

impl TextNode {
    fn into_text(self) -> Option<String> {
        self.value
    }
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    OffsetDateTime::parse(ts.trim(), &Rfc2822)
        .ok()
        .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), 0))
}

fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// XML only knows five named entities; feeds routinely ship HTML ones.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", "&#160;")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

/// Parse an RSS or Atom document into raw entries.
pub fn parse_feed(xml: &str) -> Result<Vec<RawItem>, ExternalError> {
    let xml = scrub_html_entities_for_xml(xml);

    let rss_err = match from_str::<Rss>(&xml) {
        Ok(rss) => {
            return Ok(rss
                .channel
                .item
                .into_iter()
                .map(|it| RawItem {
                    title: it.title,
                    link: it.link,
                    guid: it.guid.and_then(TextNode::into_text),
                    published_at: it.pub_date.as_deref().and_then(parse_rfc2822),
                    summary: it.description,
                })
                .collect())
        }
        Err(e) => e,
    };

    match from_str::<AtomFeed>(&xml) {
        Ok(feed) if xml.contains("<feed") => Ok(feed
            .entry
            .into_iter()
            .map(|e| {
                let link = e
                    .link
                    .iter()
                    .find(|l| l.rel.as_deref().map_or(true, |r| r == "alternate"))
                    .or_else(|| e.link.first())
                    .and_then(|l| l.href.clone());
                let published_at = e
                    .published
                    .as_deref()
                    .or(e.updated.as_deref())
                    .and_then(parse_rfc3339);
                RawItem {
                    title: e.title.and_then(TextNode::into_text),
                    link,
                    guid: e.id,
                    published_at,
                    summary: e
                        .summary
                        .and_then(TextNode::into_text)
                        .or_else(|| e.content.and_then(TextNode::into_text)),
                }
            })
            .collect()),
        Ok(_) => Err(ExternalError::permanent(format!(
            "malformed feed: {rss_err}"
        ))),
        Err(atom_err) => Err(ExternalError::permanent(format!(
            "malformed feed (rss: {rss_err}; atom: {atom_err})"
        ))),
    }
}

pub struct RssProvider {
    source: FeedSource,
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http { client: reqwest::Client },
}

impl RssProvider {
    /// Serve a fixed document; used by tests and offline runs.
    pub fn from_fixture(source: FeedSource, xml: &str) -> Self {
        Self {
            source,
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    pub fn from_url(source: FeedSource, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("m365-scout/0.1 (+feed aggregator)")
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            source,
            mode: Mode::Http { client },
        }
    }

    async fn fetch_body(&self, client: &reqwest::Client) -> Result<String, ExternalError> {
        let ctx = format!("fetch {}", self.source.id);
        let resp = client
            .get(&self.source.url)
            .send()
            .await
            .map_err(|e| ExternalError::from_reqwest(&e, &ctx))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ExternalError::from_status(status, &ctx));
        }
        resp.text()
            .await
            .map_err(|e| ExternalError::from_reqwest(&e, &ctx))
    }
}

#[async_trait]
impl SourceProvider for RssProvider {
    async fn fetch_latest(&self) -> Result<Vec<RawItem>, ExternalError> {
        let items = match &self.mode {
            Mode::Fixture(s) => parse_feed(s)?,
            Mode::Http { client } => {
                let body = self.fetch_body(client).await?;
                parse_feed(&body)?
            }
        };
        counter!("scout_feed_entries_total", "source" => self.source.id.clone())
            .increment(items.len() as u64);
        Ok(items)
    }

    fn source(&self) -> &FeedSource {
        &self.source
    }
}
