// src/ingest/fingerprint.rs
//! Deterministic item identity: canonical URL, natural key, SHA-256 fingerprint.
//! Pure functions of content; no clock, no randomness.

use sha2::{Digest, Sha256};
use url::Url;

use super::types::Fingerprint;

/// Query parameters that only track the click and never identify content.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_cid", "mc_eid", "ocid", "wt.mc_id"];

/// Canonical form of a link, or `None` for anything that is not http(s).
///
/// Lowercases scheme and host (the `url` crate does this), drops default
/// ports, fragments, `utm_*` and other tracking params, and the trailing `/`.
pub fn canonical_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| {
            let k = k.to_ascii_lowercase();
            !k.starts_with("utm_") && !TRACKING_PARAMS.contains(&k.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let mut s = url.to_string();
    if url.query().is_none() && s.ends_with('/') {
        s.pop();
    }
    Some(s)
}

/// Lowercase, punctuation-free, single-spaced form used inside keys.
pub fn fold_for_key(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Natural key precedence: canonical URL, then source guid, then folded title.
/// Returns `None` when nothing identifies the entry.
pub fn natural_key(
    source_id: &str,
    canonical: Option<&str>,
    guid: Option<&str>,
    title: &str,
) -> Option<String> {
    if let Some(u) = canonical {
        return Some(format!("url:{u}"));
    }
    if let Some(g) = guid.map(str::trim).filter(|g| !g.is_empty()) {
        return Some(format!("guid:{source_id}:{g}"));
    }
    let folded = fold_for_key(title);
    if folded.is_empty() {
        None
    } else {
        Some(format!("title:{source_id}:{folded}"))
    }
}

pub fn fingerprint(natural_key: &str) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(natural_key.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    Fingerprint::from_hex(out)
}
