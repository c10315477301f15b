// src/metrics.rs
//! Run metrics. Without an installed recorder every macro call is a no-op,
//! so library code records unconditionally.

use std::path::Path;

use anyhow::Context;
use metrics::{describe_counter, describe_gauge, describe_histogram, gauge, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

/// Describe every metric once per process.
pub fn ensure_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_histogram!("scout_fetch_ms", Unit::Milliseconds, "Feed fetch latency");
        describe_counter!("scout_feed_entries_total", "Raw entries parsed from feeds");
        describe_counter!("scout_items_collected_total", "Normalized items per source");
        describe_counter!("scout_items_filtered_total", "Items dropped by the keyword filter");
        describe_counter!("scout_source_errors_total", "Feed fetch failures per source");
        describe_counter!("scout_items_new_total", "Items not seen before");
        describe_counter!("scout_items_duplicate_total", "Items dropped as already seen");
        describe_counter!("scout_summaries_total", "Summaries by outcome");
        describe_counter!("scout_publish_total", "Card deliveries by outcome");
        describe_counter!("scout_digests_emitted_total", "Digests delivered per period");
        describe_gauge!("scout_last_run_timestamp_seconds", Unit::Seconds, "Unix time of the last finished run");
    });
}

/// Install the Prometheus recorder for this process.
pub fn install() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("prometheus: install recorder")?;
    ensure_described();
    Ok(handle)
}

pub fn mark_run_finished(at: chrono::DateTime<chrono::Utc>) {
    gauge!("scout_last_run_timestamp_seconds").set(at.timestamp() as f64);
}

/// Write the exposition to `path` for a textfile collector. Written to a temp
/// file first so the collector never reads a half-written file.
pub fn write_textfile(handle: &PrometheusHandle, path: &Path) -> anyhow::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let tmp = path.with_extension("prom.tmp");
    std::fs::write(&tmp, handle.render()).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}
