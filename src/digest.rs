// src/digest.rs
//! Digest scheduling per period.
//!
//! `check` only reads the marker; `confirm` moves it, and only after the
//! publisher reported the digest as delivered. A crash anywhere in between
//! leaves the marker where it was, so the next run is still due and resends
//! the same frozen journal window.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::{DigestJournal, JournalEntry, MarkerStore, PendingWindow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Daily,
    Weekly,
}

impl Period {
    pub const ALL: [Period; 2] = [Period::Daily, Period::Weekly];

    pub fn as_str(self) -> &'static str {
        match self {
            Period::Daily => "daily",
            Period::Weekly => "weekly",
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Due {
    Due,
    NotDue { next_due_at: DateTime<Utc> },
}

/// Interval per period; a period without an interval is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DigestIntervals {
    pub daily: Option<Duration>,
    pub weekly: Option<Duration>,
}

impl Default for DigestIntervals {
    fn default() -> Self {
        Self {
            daily: Some(Duration::hours(24)),
            weekly: Some(Duration::days(7)),
        }
    }
}

impl DigestIntervals {
    pub fn get(&self, period: Period) -> Option<Duration> {
        match period {
            Period::Daily => self.daily,
            Period::Weekly => self.weekly,
        }
    }

    pub fn enabled(&self) -> impl Iterator<Item = (Period, Duration)> + '_ {
        Period::ALL
            .into_iter()
            .filter_map(move |p| self.get(p).map(|d| (p, d)))
    }
}

/// An assembled digest, not yet delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    pub period: Period,
    /// Marker value at assembly; `None` before the first confirmed digest.
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: DateTime<Utc>,
    pub entries: Vec<JournalEntry>,
}

impl Digest {
    /// Stable until the marker moves. The window behind it is frozen, so a
    /// re-send the sink recognizes carries the same entries.
    pub fn idempotency_token(&self) -> String {
        let start = self
            .window_start
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "initial".to_string());
        format!("digest:{}:{}", self.period, start)
    }

    pub fn title(&self) -> String {
        let label = match self.period {
            Period::Daily => "Daily digest",
            Period::Weekly => "Weekly digest",
        };
        format!(
            "{} {} ({} items)",
            label,
            self.window_end.format("%Y-%m-%d"),
            self.entries.len()
        )
    }

    /// Plain-text body with entries grouped by source name.
    pub fn render_body(&self) -> String {
        let mut groups: BTreeMap<&str, Vec<&JournalEntry>> = BTreeMap::new();
        for e in &self.entries {
            groups.entry(e.source_name.as_str()).or_default().push(e);
        }

        let mut out = String::new();
        let since = self
            .window_start
            .map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
            .unwrap_or_else(|| "first digest".to_string());
        let _ = writeln!(
            out,
            "{} items since {}, up to {}",
            self.entries.len(),
            since,
            self.window_end.format("%Y-%m-%d %H:%M UTC")
        );
        for (source, entries) in groups {
            let _ = writeln!(out, "\n## {source}");
            for e in entries {
                let _ = writeln!(out, "- {}", e.title);
                if let Some(s) = &e.summary {
                    let _ = writeln!(out, "  {s}");
                }
                if let Some(u) = &e.url {
                    let _ = writeln!(out, "  {u}");
                }
            }
        }
        out
    }
}

pub struct DigestScheduler<'a> {
    markers: &'a dyn MarkerStore,
    journal: &'a dyn DigestJournal,
    intervals: DigestIntervals,
}

impl<'a> DigestScheduler<'a> {
    pub fn new(
        markers: &'a dyn MarkerStore,
        journal: &'a dyn DigestJournal,
        intervals: DigestIntervals,
    ) -> Self {
        Self {
            markers,
            journal,
            intervals,
        }
    }

    pub fn intervals(&self) -> DigestIntervals {
        self.intervals
    }

    /// Read-only. A disabled period is never due.
    pub fn check(&self, period: Period, now: DateTime<Utc>) -> Result<Due, StoreError> {
        let Some(interval) = self.intervals.get(period) else {
            return Ok(Due::NotDue {
                next_due_at: DateTime::<Utc>::MAX_UTC,
            });
        };
        match self.markers.load(period)? {
            None => Ok(Due::Due),
            Some(m) if now - m.last_emitted_at >= interval => Ok(Due::Due),
            Some(m) => Ok(Due::NotDue {
                next_due_at: m.last_emitted_at + interval,
            }),
        }
    }

    /// Collect journal entries since the marker. `None` when the window is empty.
    ///
    /// Before any digest was confirmed the window reaches back to the start of
    /// the journal. The window end is frozen on first assembly and reused until
    /// the marker moves, so the token always names the same set of entries.
    pub fn assemble(&self, period: Period, now: DateTime<Utc>) -> Result<Option<Digest>, StoreError> {
        let window_start = self.markers.load(period)?.map(|m| m.last_emitted_at);
        let after = window_start.unwrap_or(DateTime::<Utc>::MIN_UTC);

        if let Some(p) = self.markers.pending(period)?.filter(|p| p.from == window_start) {
            let entries = self.journal.window(after, p.until)?;
            if !entries.is_empty() {
                tracing::info!(
                    target: "digest",
                    %period,
                    until = %p.until,
                    entries = entries.len(),
                    "resending unconfirmed digest window"
                );
                return Ok(Some(Digest {
                    period,
                    window_start,
                    window_end: p.until,
                    entries,
                }));
            }
        }

        let entries = self.journal.window(after, now)?;
        tracing::debug!(
            target: "digest",
            %period,
            since = ?window_start,
            until = %now,
            entries = entries.len(),
            "digest window"
        );
        if entries.is_empty() {
            return Ok(None);
        }
        self.markers.set_pending(&PendingWindow {
            period,
            from: window_start,
            until: now,
        })?;
        Ok(Some(Digest {
            period,
            window_start,
            window_end: now,
            entries,
        }))
    }

    /// Advance the marker to the digest's window end. Call only after delivery
    /// was confirmed. Returns `false` if another writer moved the marker first.
    pub fn confirm(&self, digest: &Digest) -> Result<bool, StoreError> {
        let moved = self
            .markers
            .advance(digest.period, digest.window_start, digest.window_end)?;
        if moved {
            tracing::info!(
                target: "digest",
                period = %digest.period,
                marker = %digest.window_end,
                items = digest.entries.len(),
                "digest marker advanced"
            );
        } else {
            tracing::warn!(
                target: "digest",
                period = %digest.period,
                "digest marker moved concurrently, not advanced"
            );
        }
        Ok(moved)
    }
}
