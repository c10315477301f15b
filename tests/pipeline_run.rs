// tests/pipeline_run.rs
mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, TimeZone, Utc};

use m365_scout::digest::Period;
use m365_scout::error::{ExternalError, RunError};
use m365_scout::pipeline::{DigestStatus, Stage};
use m365_scout::publish::{CardKind, SinkOutcome};
use m365_scout::digest::{DigestIntervals, DigestScheduler};
use m365_scout::ingest::fingerprint::fingerprint;
use m365_scout::store::{DeliveryLog, DigestJournal, JournalEntry, MarkerStore, MemoryStore};
use m365_scout::PipelineSettings;

use common::{pipeline, raw, EchoSummarizer, HangingSummarizer, ScriptedSink, StaticProvider};

fn two_sources() -> Vec<Box<dyn m365_scout::ingest::types::SourceProvider>> {
    vec![
        StaticProvider::ok(
            "azure",
            vec![
                raw("Copilot in Azure goes GA", "https://azure.example/copilot"),
                raw("Azure region news", "https://azure.example/region"),
            ],
        ),
        StaticProvider::ok(
            "teams",
            vec![
                // Same story as the first azure entry, linked with tracking params.
                raw("Copilot in Azure", "https://azure.example/copilot?utm_source=teams"),
                raw("Teams meeting recap", "https://teams.example/recap"),
            ],
        ),
    ]
}

#[tokio::test]
async fn full_run_then_idle_rerun() {
    let store = Arc::new(MemoryStore::new());
    let sink = ScriptedSink::ok();
    let p = pipeline(
        two_sources(),
        store.clone(),
        Arc::new(EchoSummarizer),
        sink.clone(),
        PipelineSettings::default(),
    );
    let t0 = Utc.with_ymd_and_hms(2025, 10, 14, 8, 0, 0).unwrap();

    let r1 = p.run_once(t0).await.unwrap();
    assert_eq!(r1.collected, 4);
    assert_eq!(r1.new, 3);
    assert_eq!(r1.duplicates_in_batch, 1);
    assert_eq!(r1.summarized, 3);
    assert_eq!(r1.published, 3);
    assert!(matches!(
        r1.digest_status(Period::Daily),
        Some(DigestStatus::Emitted { items: 3, .. })
    ));
    assert!(matches!(
        r1.digest_status(Period::Weekly),
        Some(DigestStatus::Emitted { items: 3, .. })
    ));
    assert!(!r1.has_failures());

    let cards = sink.delivered();
    assert_eq!(cards.iter().filter(|c| c.kind == CardKind::Item).count(), 3);
    let digest = cards.iter().find(|c| c.kind == CardKind::Digest).unwrap();
    assert!(digest.description.contains("Summary of Copilot in Azure goes GA"));
    assert!(cards[0].name.starts_with("[azure blog] "));

    let r2 = p.run_once(t0 + Duration::hours(1)).await.unwrap();
    assert_eq!(r2.new, 0);
    assert_eq!(r2.duplicates_seen, 3);
    assert_eq!(r2.published, 0);
    assert!(matches!(
        r2.digest_status(Period::Daily),
        Some(DigestStatus::NotDue { .. })
    ));
    assert_eq!(sink.delivered().len(), cards.len());

    let text = r1.to_string();
    assert!(text.contains("published 3"), "{text}");
    assert!(text.contains("daily digest: emitted (3 items)"), "{text}");
}

#[tokio::test]
async fn hung_summarizer_still_publishes_item_without_summary() {
    let store = Arc::new(MemoryStore::new());
    let sink = ScriptedSink::ok();
    let summarizer = Arc::new(HangingSummarizer::new());
    let p = pipeline(
        vec![StaticProvider::ok(
            "a",
            vec![raw("Copilot one", "https://a.example/1")],
        )],
        store.clone(),
        summarizer.clone(),
        sink.clone(),
        PipelineSettings::default(),
    );

    let r = p.run_once(Utc::now()).await.unwrap();
    assert_eq!(summarizer.calls.load(Ordering::SeqCst), 3);
    assert_eq!(r.failed_summary, 1);
    assert_eq!(r.summarized, 0);
    assert_eq!(r.published, 1);
    assert_eq!(r.item_failures.len(), 1);
    assert_eq!(r.item_failures[0].stage, Stage::Summarize);

    let card = &sink.delivered()[0];
    assert!(card
        .description
        .starts_with("(excerpt, no summary available) Copilot one body"));
}

#[tokio::test]
async fn failed_digest_keeps_marker_and_is_retried_next_run() {
    let store = Arc::new(MemoryStore::new());
    let sink = ScriptedSink::new(vec![
        Err(ExternalError::permanent("board locked")),
        Err(ExternalError::permanent("board locked")),
    ]);
    let settings = PipelineSettings {
        publish_items: false,
        ..PipelineSettings::default()
    };
    let p = pipeline(
        vec![StaticProvider::ok("a", vec![raw("Copilot", "https://a.example/1")])],
        store.clone(),
        Arc::new(EchoSummarizer),
        sink.clone(),
        settings,
    );
    let t0 = Utc.with_ymd_and_hms(2025, 10, 14, 8, 0, 0).unwrap();

    let r1 = p.run_once(t0).await.unwrap();
    assert!(matches!(
        r1.digest_status(Period::Daily),
        Some(DigestStatus::Failed { .. })
    ));
    assert!(r1.has_failures());
    assert!(store.load(Period::Daily).unwrap().is_none());
    assert!(store.load(Period::Weekly).unwrap().is_none());

    let t1 = t0 + Duration::minutes(10);
    let r2 = p.run_once(t1).await.unwrap();
    match r2.digest_status(Period::Daily) {
        Some(DigestStatus::Emitted { items, token }) => {
            assert_eq!(*items, 1);
            assert_eq!(token, "digest:daily:initial");
        }
        other => panic!("expected emitted daily digest, got {other:?}"),
    }
    // The resent digest is the window frozen at t0.
    assert_eq!(store.load(Period::Daily).unwrap().unwrap().last_emitted_at, t0);

    let r3 = p.run_once(t1 + Duration::minutes(10)).await.unwrap();
    assert!(matches!(
        r3.digest_status(Period::Daily),
        Some(DigestStatus::NotDue { .. })
    ));
}

#[tokio::test]
async fn digest_already_on_board_is_confirmed_not_reposted() {
    let store = Arc::new(MemoryStore::new());
    let sink = ScriptedSink::new(vec![Ok(SinkOutcome::Duplicate)]);
    let settings = PipelineSettings {
        publish_items: false,
        intervals: m365_scout::digest::DigestIntervals {
            daily: Some(Duration::hours(24)),
            weekly: None,
        },
        ..PipelineSettings::default()
    };
    let p = pipeline(
        vec![StaticProvider::ok("a", vec![raw("Copilot", "https://a.example/1")])],
        store.clone(),
        Arc::new(EchoSummarizer),
        sink.clone(),
        settings,
    );
    let now = Utc::now();
    let r = p.run_once(now).await.unwrap();
    assert!(matches!(
        r.digest_status(Period::Daily),
        Some(DigestStatus::AlreadyDelivered { .. })
    ));
    assert!(r.digest_emitted());
    assert!(sink.delivered().is_empty());
    assert_eq!(store.load(Period::Daily).unwrap().unwrap().last_emitted_at, now);
    assert!(r.digest_status(Period::Weekly).is_none());
}

#[tokio::test]
async fn due_digest_with_nothing_new_is_not_sent() {
    let store = Arc::new(MemoryStore::new());
    let sink = ScriptedSink::ok();
    let p = pipeline(
        vec![StaticProvider::ok("a", vec![])],
        store.clone(),
        Arc::new(EchoSummarizer),
        sink.clone(),
        PipelineSettings::default(),
    );
    let r = p.run_once(Utc::now()).await.unwrap();
    assert_eq!(r.digest_status(Period::Daily), Some(&DigestStatus::Empty));
    assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
    assert!(store.load(Period::Daily).unwrap().is_none());
}

#[tokio::test]
async fn item_publish_failure_is_isolated() {
    let store = Arc::new(MemoryStore::new());
    // First item: server errors until attempts run out; everything after succeeds.
    let sink = ScriptedSink::new(vec![
        Err(ExternalError::transient("HTTP 502")),
        Err(ExternalError::transient("HTTP 502")),
        Err(ExternalError::transient("HTTP 502")),
    ]);
    let p = pipeline(
        vec![StaticProvider::ok(
            "a",
            vec![
                raw("Copilot one", "https://a.example/1"),
                raw("Copilot two", "https://a.example/2"),
            ],
        )],
        store.clone(),
        Arc::new(EchoSummarizer),
        sink.clone(),
        PipelineSettings::default(),
    );
    let r = p.run_once(Utc::now()).await.unwrap();
    assert_eq!(r.failed_publish, 1);
    assert_eq!(r.published, 1);
    assert_eq!(r.item_failures[0].stage, Stage::Publish);
    assert!(matches!(
        r.digest_status(Period::Daily),
        Some(DigestStatus::Emitted { items: 2, .. })
    ));
}

#[tokio::test]
async fn source_failure_and_keyword_filter_show_in_report() {
    let store = Arc::new(MemoryStore::new());
    let sink = ScriptedSink::ok();
    let settings = PipelineSettings {
        keywords: vec!["copilot".into()],
        ..PipelineSettings::default()
    };
    let p = pipeline(
        vec![
            StaticProvider::ok(
                "a",
                vec![
                    raw("Copilot arrives", "https://a.example/1"),
                    raw("Quarterly earnings", "https://a.example/2"),
                ],
            ),
            StaticProvider::failing("b", ExternalError::transient("dns")),
        ],
        store.clone(),
        Arc::new(EchoSummarizer),
        sink.clone(),
        settings,
    );
    let r = p.run_once(Utc::now()).await.unwrap();
    assert_eq!(r.collected, 2);
    assert_eq!(r.filtered, 1);
    assert_eq!(r.new, 1);
    assert_eq!(r.source_failures.len(), 1);
    // Filtered items are not remembered as seen.
    assert_eq!(store.fingerprint_records().len(), 1);
    assert!(r.to_string().contains("source b FAILED"));
}

#[tokio::test]
async fn persistence_outage_aborts_before_any_delivery() {
    let store = Arc::new(MemoryStore::new());
    store.set_unavailable(true);
    let sink = ScriptedSink::ok();
    let p = pipeline(
        vec![StaticProvider::ok("a", vec![raw("Copilot", "https://a.example/1")])],
        store.clone(),
        Arc::new(EchoSummarizer),
        sink.clone(),
        PipelineSettings::default(),
    );
    let err = p.run_once(Utc::now()).await.unwrap_err();
    assert!(matches!(err, RunError::PersistenceUnavailable(_)));
    assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn exhausted_time_budget_stops_between_stages() {
    let store = Arc::new(MemoryStore::new());
    let sink = ScriptedSink::ok();
    let settings = PipelineSettings {
        run_timeout: Some(StdDuration::ZERO),
        ..PipelineSettings::default()
    };
    let p = pipeline(
        vec![StaticProvider::ok("a", vec![raw("Copilot", "https://a.example/1")])],
        store.clone(),
        Arc::new(EchoSummarizer),
        sink.clone(),
        settings,
    );
    let r = p.run_once(Utc::now()).await.unwrap();
    assert_eq!(r.collected, 1);
    assert_eq!(r.aborted_at, Some(Stage::Dedup));
    assert!(store.fingerprint_records().is_empty());
    assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
}

fn daily_only() -> PipelineSettings {
    PipelineSettings {
        publish_items: false,
        intervals: DigestIntervals {
            daily: Some(Duration::hours(24)),
            weekly: None,
        },
        ..PipelineSettings::default()
    }
}

fn journal_entry(title: &str, at: chrono::DateTime<Utc>) -> JournalEntry {
    JournalEntry {
        fingerprint: fingerprint(&format!("title:a:{title}")),
        source_id: "a".into(),
        source_name: "a blog".into(),
        title: title.into(),
        url: None,
        excerpt: String::new(),
        summary: None,
        first_seen_at: at,
    }
}

#[tokio::test]
async fn digest_delivered_but_unconfirmed_does_not_swallow_later_items() {
    let store = Arc::new(MemoryStore::new());
    let t0 = Utc.with_ymd_and_hms(2025, 10, 14, 8, 0, 0).unwrap();
    store.append(&journal_entry("first", t0)).unwrap();

    // Previous run: digest accepted by the tracker, process died before the
    // marker moved.
    let digest = DigestScheduler::new(store.as_ref(), store.as_ref(), daily_only().intervals)
        .assemble(Period::Daily, t0)
        .unwrap()
        .unwrap();
    store.mark_delivered(&digest.idempotency_token(), t0).unwrap();

    store.append(&journal_entry("second", t0 + Duration::hours(1))).unwrap();

    let sink = ScriptedSink::ok();
    let p = pipeline(
        vec![StaticProvider::ok("a", vec![])],
        store.clone(),
        Arc::new(EchoSummarizer),
        sink.clone(),
        daily_only(),
    );

    let r1 = p.run_once(t0 + Duration::hours(2)).await.unwrap();
    assert!(matches!(
        r1.digest_status(Period::Daily),
        Some(DigestStatus::AlreadyDelivered { items: 1, .. })
    ));
    assert_eq!(store.load(Period::Daily).unwrap().unwrap().last_emitted_at, t0);
    assert_eq!(sink.calls.load(Ordering::SeqCst), 0);

    let r2 = p.run_once(t0 + Duration::hours(25)).await.unwrap();
    assert!(matches!(
        r2.digest_status(Period::Daily),
        Some(DigestStatus::Emitted { items: 1, .. })
    ));
    let cards = sink.delivered();
    assert_eq!(cards.len(), 1);
    assert!(cards[0].description.contains("- second"));
    assert!(!cards[0].description.contains("- first"));
}

#[tokio::test]
async fn first_digest_failing_past_its_interval_still_carries_old_items() {
    let store = Arc::new(MemoryStore::new());
    let sink = ScriptedSink::new(vec![Err(ExternalError::permanent("board locked"))]);
    let p = pipeline(
        vec![StaticProvider::ok("a", vec![raw("Copilot", "https://a.example/1")])],
        store.clone(),
        Arc::new(EchoSummarizer),
        sink.clone(),
        daily_only(),
    );
    let t0 = Utc.with_ymd_and_hms(2025, 10, 14, 8, 0, 0).unwrap();

    let r1 = p.run_once(t0).await.unwrap();
    assert!(matches!(
        r1.digest_status(Period::Daily),
        Some(DigestStatus::Failed { .. })
    ));

    let r2 = p.run_once(t0 + Duration::hours(25)).await.unwrap();
    assert_eq!(r2.new, 0);
    assert!(matches!(
        r2.digest_status(Period::Daily),
        Some(DigestStatus::Emitted { items: 1, .. })
    ));
    assert!(sink.delivered()[0].description.contains("Copilot"));
}
