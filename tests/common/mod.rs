// tests/common/mod.rs
// Scripted collaborators shared by the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use m365_scout::error::ExternalError;
use m365_scout::ingest::types::{FeedSource, RawItem, SourceProvider};
use m365_scout::publish::{CardRequest, Publisher, SinkOutcome, TrackerSink};
use m365_scout::retry::RetryPolicy;
use m365_scout::store::{MemoryStore, Stores};
use m365_scout::summarize::{Summarizer, SummarizerGateway};
use m365_scout::{Pipeline, PipelineSettings};

pub fn source(id: &str) -> FeedSource {
    FeedSource {
        id: id.into(),
        name: format!("{id} blog"),
        url: format!("https://{id}.example/feed"),
    }
}

pub fn raw(title: &str, link: &str) -> RawItem {
    RawItem {
        title: Some(title.into()),
        link: Some(link.into()),
        summary: Some(format!("{title} body")),
        ..RawItem::default()
    }
}

/// Zero-delay policy so retry tests run instantly.
pub fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::ZERO, Duration::ZERO)
}

pub struct StaticProvider {
    pub source: FeedSource,
    pub result: Result<Vec<RawItem>, ExternalError>,
}

impl StaticProvider {
    pub fn ok(id: &str, items: Vec<RawItem>) -> Box<dyn SourceProvider> {
        Box::new(Self {
            source: source(id),
            result: Ok(items),
        })
    }

    pub fn failing(id: &str, err: ExternalError) -> Box<dyn SourceProvider> {
        Box::new(Self {
            source: source(id),
            result: Err(err),
        })
    }
}

#[async_trait]
impl SourceProvider for StaticProvider {
    async fn fetch_latest(&self) -> Result<Vec<RawItem>, ExternalError> {
        self.result.clone()
    }
    fn source(&self) -> &FeedSource {
        &self.source
    }
}

/// Echoes the title back as the summary.
pub struct EchoSummarizer;

#[async_trait]
impl Summarizer for EchoSummarizer {
    async fn summarize(&self, title: &str, _text: &str) -> Result<String, ExternalError> {
        Ok(format!("Summary of {title}"))
    }
    fn provider_name(&self) -> &'static str {
        "echo"
    }
}

/// Never answers within any sane timeout.
pub struct HangingSummarizer {
    pub calls: AtomicU32,
}

impl HangingSummarizer {
    pub fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Summarizer for HangingSummarizer {
    async fn summarize(&self, _title: &str, _text: &str) -> Result<String, ExternalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok("late".into())
    }
    fn provider_name(&self) -> &'static str {
        "hanging"
    }
}

/// Replays scripted results, then succeeds.
pub struct ScriptedSink {
    script: Mutex<VecDeque<Result<SinkOutcome, ExternalError>>>,
    pub cards: Mutex<Vec<CardRequest>>,
    pub calls: AtomicU32,
}

impl ScriptedSink {
    pub fn new(script: Vec<Result<SinkOutcome, ExternalError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            cards: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        })
    }

    pub fn ok() -> Arc<Self> {
        Self::new(Vec::new())
    }

    /// Queue one more scripted result.
    pub fn push(&self, r: Result<SinkOutcome, ExternalError>) {
        self.script.lock().unwrap().push_back(r);
    }

    pub fn delivered(&self) -> Vec<CardRequest> {
        self.cards.lock().unwrap().clone()
    }
}

#[async_trait]
impl TrackerSink for ScriptedSink {
    async fn create_card(&self, card: &CardRequest) -> Result<SinkOutcome, ExternalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let res = next.unwrap_or(Ok(SinkOutcome::Created));
        if matches!(res, Ok(SinkOutcome::Created)) {
            self.cards.lock().unwrap().push(card.clone());
        }
        res
    }
    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub fn pipeline(
    providers: Vec<Box<dyn SourceProvider>>,
    store: Arc<MemoryStore>,
    summarizer: Arc<dyn Summarizer>,
    sink: Arc<dyn TrackerSink>,
    settings: PipelineSettings,
) -> Pipeline {
    let stores = Stores::memory(store);
    let gateway = SummarizerGateway::new(summarizer, fast_policy(3))
        .with_timeout(Duration::from_millis(20));
    let publisher = Publisher::new(sink, stores.deliveries.clone(), fast_policy(3));
    Pipeline::new(providers, stores, gateway, publisher, settings)
}
