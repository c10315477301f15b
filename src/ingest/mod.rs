// src/ingest/mod.rs
pub mod fingerprint;
pub mod providers;
pub mod types;

use std::time::Instant;

use futures::stream::{self, StreamExt};
use metrics::{counter, histogram};

use crate::ingest::fingerprint::{canonical_url, fingerprint, fold_for_key, natural_key};
use crate::ingest::types::{FeedSource, Item, RawItem, SourceProvider};

/// Title length cap (chars).
pub const TITLE_MAX_CHARS: usize = 300;
/// Excerpt length cap (chars).
pub const EXCERPT_MAX_CHARS: usize = 1500;

/// Normalize text: decode entities, strip tags, fold quotes, collapse whitespace, cap length.
pub fn normalize_text(s: &str, max_chars: usize) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace (incl. nbsp)
    static RE_WS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"[\s\u{00A0}]+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 5) Length cap
    if out.chars().count() > max_chars {
        out = out.chars().take(max_chars).collect::<String>().trim_end().to_string();
    }

    out
}

/// Whole-word, case-insensitive keyword match over title + excerpt.
/// An empty keyword list lets everything through.
pub fn is_relevant(title: &str, excerpt: &str, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let hay = format!(" {} ", fold_for_key(&format!("{title} {excerpt}")));
    keywords.iter().any(|k| {
        let k = fold_for_key(k);
        !k.is_empty() && hay.contains(&format!(" {k} "))
    })
}

/// Map a raw entry onto the canonical shape. `None` means the entry carries
/// neither a usable link nor a title and cannot be identified.
pub fn normalize_item(source: &FeedSource, raw: &RawItem) -> Option<Item> {
    let title = normalize_text(raw.title.as_deref().unwrap_or_default(), TITLE_MAX_CHARS);
    let body_excerpt = normalize_text(raw.summary.as_deref().unwrap_or_default(), EXCERPT_MAX_CHARS);
    let url = raw.link.as_deref().and_then(canonical_url);

    let key = natural_key(&source.id, url.as_deref(), raw.guid.as_deref(), &title)?;
    let title = if title.is_empty() {
        url.clone().unwrap_or_else(|| "(untitled)".to_string())
    } else {
        title
    };

    Some(Item {
        source_id: source.id.clone(),
        source_name: source.name.clone(),
        fingerprint: fingerprint(&key),
        natural_key: key,
        title,
        body_excerpt,
        published_at: raw.published_at,
        url,
        summary: None,
    })
}

/// Per-source fetch failure; never aborts collection from other sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub source_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTally {
    pub source_id: String,
    pub collected: usize,
    pub malformed: usize,
}

/// Result of one collection pass, in source order.
#[derive(Debug, Default)]
pub struct Collection {
    pub items: Vec<Item>,
    pub tallies: Vec<SourceTally>,
    pub failures: Vec<SourceFailure>,
}

impl Collection {
    pub fn malformed(&self) -> usize {
        self.tallies.iter().map(|t| t.malformed).sum()
    }
}

/// Pull every source once, at most `concurrency` at a time. Output keeps the
/// configured source order so that "first wins" dedup is deterministic.
pub async fn collect_all(
    providers: &[Box<dyn SourceProvider>],
    concurrency: usize,
    max_items_per_source: Option<usize>,
) -> Collection {
    crate::metrics::ensure_described();

    let pulls = stream::iter(providers.iter())
        .map(|p| async move {
            let t0 = Instant::now();
            let res = p.fetch_latest().await;
            histogram!("scout_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
            (p.source(), res)
        })
        .buffered(concurrency.max(1))
        .collect::<Vec<_>>()
        .await;

    let mut out = Collection::default();
    for (source, res) in pulls {
        match res {
            Ok(raw) => {
                let take = max_items_per_source.unwrap_or(usize::MAX);
                let mut tally = SourceTally {
                    source_id: source.id.clone(),
                    collected: 0,
                    malformed: 0,
                };
                for r in raw.iter().take(take) {
                    match normalize_item(source, r) {
                        Some(item) => {
                            tally.collected += 1;
                            out.items.push(item);
                        }
                        None => tally.malformed += 1,
                    }
                }
                tracing::info!(
                    target: "ingest",
                    source = %source.id,
                    collected = tally.collected,
                    malformed = tally.malformed,
                    "source pulled"
                );
                counter!("scout_items_collected_total", "source" => source.id.clone())
                    .increment(tally.collected as u64);
                out.tallies.push(tally);
            }
            Err(e) => {
                tracing::warn!(target: "ingest", source = %source.id, error = %e, "source error");
                counter!("scout_source_errors_total", "source" => source.id.clone()).increment(1);
                out.failures.push(SourceFailure {
                    source_id: source.id.clone(),
                    error: e.to_string(),
                });
            }
        }
    }
    out
}
