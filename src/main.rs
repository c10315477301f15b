//! m365-scout: one collection run.
//! Pulls the configured feeds, posts new items and due digests to Planka, then exits.
//!
//! Exit status: 0 when the run went through cleanly, 1 when the report lists
//! failures or the run could not complete, 2 when another run holds the lock.
//!
//! `SCOUT_DRY_RUN=1` logs cards instead of posting them and works on a scratch
//! copy of the state, so a later real run still sees every item as new.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;

use m365_scout::config::{PlankaConfig, ScoutConfig, SummarizerKind};
use m365_scout::ingest::providers::RssProvider;
use m365_scout::ingest::types::SourceProvider;
use m365_scout::lock::{LockError, RunLock};
use m365_scout::publish::{LogSink, PlankaSink, Publisher, TrackerSink};
use m365_scout::store::{FileStore, Stores};
use m365_scout::summarize::{DynSummarizer, ExcerptSummarizer, OpenAiSummarizer, SummarizerGateway};
use m365_scout::{logging, Pipeline, PipelineSettings};

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .is_some_and(|v| matches!(v.trim(), "1" | "true" | "yes"))
}

fn build_summarizer(cfg: &ScoutConfig) -> anyhow::Result<DynSummarizer> {
    let s = &cfg.summarizer;
    match s.provider {
        SummarizerKind::Excerpt => Ok(Arc::new(ExcerptSummarizer)),
        SummarizerKind::Openai => {
            let timeout = Duration::from_secs(s.request_timeout_secs);
            match OpenAiSummarizer::from_env(s.model.as_deref(), s.base_url.as_deref(), timeout) {
                Ok(ai) => Ok(Arc::new(ai)),
                Err(e) => {
                    tracing::warn!(target: "summarize", error = %e, "openai unavailable, using excerpt summaries");
                    Ok(Arc::new(ExcerptSummarizer))
                }
            }
        }
    }
}

fn build_sink(dry_run: bool) -> anyhow::Result<Arc<dyn TrackerSink>> {
    if dry_run {
        tracing::info!(target: "publish", "dry run: cards are logged, not posted");
        return Ok(Arc::new(LogSink::new()));
    }
    let planka = PlankaConfig::from_env().context("planka configuration")?;
    let sink = PlankaSink::new(planka, Duration::from_secs(10)).context("planka client")?;
    Ok(Arc::new(sink))
}

async fn run() -> anyhow::Result<i32> {
    let cfg = ScoutConfig::load_default().context("loading configuration")?;
    let dry_run = env_flag("SCOUT_DRY_RUN");
    let metrics_file = std::env::var("SCOUT_METRICS_FILE").ok().map(PathBuf::from);
    let prom = match &metrics_file {
        Some(_) => Some(m365_scout::metrics::install()?),
        None => None,
    };

    let _lock = match RunLock::acquire(&cfg.state_dir) {
        Ok(l) => l,
        Err(e @ LockError::AlreadyHeld { .. }) => {
            tracing::error!(target: "lock", error = %e, "refusing to start a concurrent run");
            return Ok(2);
        }
        Err(e) => return Err(e).context("acquiring run lock"),
    };

    let (_scratch, store) = if dry_run {
        let (dir, store) = FileStore::open_scratch(&cfg.state_dir).context("copying state for dry run")?;
        (Some(dir), store)
    } else {
        (None, FileStore::open(&cfg.state_dir).context("opening state")?)
    };
    let policy = cfg.retry_policy();

    let providers: Vec<Box<dyn SourceProvider>> = cfg
        .sources
        .iter()
        .cloned()
        .map(|s| Box::new(RssProvider::from_url(s, Duration::from_secs(10))) as Box<dyn SourceProvider>)
        .collect();

    let gateway = SummarizerGateway::new(build_summarizer(&cfg)?, policy)
        .with_timeout(Duration::from_secs(cfg.summarizer.request_timeout_secs))
        .with_concurrency(cfg.concurrency)
        .with_max_chars(cfg.summarizer.max_chars);
    let publisher = Publisher::new(build_sink(dry_run)?, store.deliveries.clone(), policy);

    let settings = PipelineSettings {
        concurrency: cfg.concurrency,
        max_items_per_source: cfg.max_items_per_source,
        keywords: cfg.keywords.clone(),
        publish_items: cfg.publish_items,
        run_timeout: Some(cfg.run_timeout()),
        intervals: cfg.digest_intervals(),
        prune: if cfg.retention.prune_on_run {
            Some(cfg.retention()?)
        } else {
            None
        },
    };
    let pipeline = Pipeline::new(providers, Stores::from(store), gateway, publisher, settings);

    let report = pipeline.run_once(Utc::now()).await;

    if let (Some(handle), Some(path)) = (&prom, &metrics_file) {
        if let Err(e) = m365_scout::metrics::write_textfile(handle, path) {
            tracing::warn!(error = %e, "metrics textfile not written");
        }
    }

    let report = report.context("run aborted")?;
    println!("{report}");
    Ok(if report.has_failures() { 1 } else { 0 })
}

#[tokio::main]
async fn main() {
    // .env in local runs; absent in production.
    let _ = dotenvy::dotenv();
    logging::init();

    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "m365-scout failed");
            eprintln!("m365-scout: {e:#}");
            1
        }
    };
    std::process::exit(code);
}
