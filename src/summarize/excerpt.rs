// src/summarize/excerpt.rs
use async_trait::async_trait;

use super::Summarizer;
use crate::error::ExternalError;
use crate::ingest::normalize_text;

/// Length of the extractive summary before the ellipsis.
pub const EXCERPT_SUMMARY_CHARS: usize = 300;

/// Extractive fallback: cleaned text, cut at 300 chars with "..." appended.
/// Works offline and never fails transiently.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExcerptSummarizer;

pub fn extractive_summary(text: &str) -> String {
    let clean = normalize_text(text, usize::MAX);
    if clean.chars().count() <= EXCERPT_SUMMARY_CHARS {
        return clean;
    }
    let cut: String = clean.chars().take(EXCERPT_SUMMARY_CHARS).collect();
    format!("{}...", cut.trim_end())
}

#[async_trait]
impl Summarizer for ExcerptSummarizer {
    async fn summarize(&self, title: &str, text: &str) -> Result<String, ExternalError> {
        // `text` starts with the title; summarize the body when there is one.
        let body = text
            .strip_prefix(title)
            .map(str::trim_start)
            .filter(|b| !b.is_empty())
            .unwrap_or(text);
        let out = extractive_summary(body);
        if out.is_empty() {
            return Err(ExternalError::permanent("nothing to summarize"));
        }
        Ok(out)
    }

    fn provider_name(&self) -> &'static str {
        "excerpt"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_kept_whole() {
        assert_eq!(extractive_summary("<p>Hello <b>world</b></p>"), "Hello world");
    }

    #[test]
    fn long_text_is_cut_with_ellipsis() {
        let long = "abc ".repeat(200);
        let s = extractive_summary(&long);
        assert!(s.ends_with("..."));
        assert!(s.chars().count() <= EXCERPT_SUMMARY_CHARS + 3);
    }

    #[tokio::test]
    async fn body_preferred_over_title() {
        let s = ExcerptSummarizer
            .summarize("Title", "Title\n\nThe body text.")
            .await
            .unwrap();
        assert_eq!(s, "The body text.");
    }
}
