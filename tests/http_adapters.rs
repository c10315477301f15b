// tests/http_adapters.rs
mod common;

use std::sync::Arc;
use std::time::Duration;

use m365_scout::config::PlankaConfig;
use m365_scout::ingest::fingerprint::fingerprint;
use m365_scout::ingest::types::Item;
use m365_scout::publish::{CardKind, CardRequest, PlankaSink, SinkOutcome, TrackerSink};
use m365_scout::summarize::{OpenAiSummarizer, Summarizer, SummarizerGateway};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::fast_policy;

fn planka(server: &MockServer) -> PlankaSink {
    let cfg = PlankaConfig {
        base_url: server.uri(),
        token: "tok".into(),
        board_id: "b1".into(),
        todo_list_id: "todo".into(),
        digest_list_id: "digests".into(),
    };
    PlankaSink::new(cfg, Duration::from_secs(5)).unwrap()
}

fn card(token: &str, kind: CardKind) -> CardRequest {
    CardRequest {
        idempotency_token: token.into(),
        name: "[Azure Blog] Copilot".into(),
        description: format!("Body\n\nscout-id: {token}"),
        kind,
    }
}

async fn board_with(server: &MockServer, descriptions: &[&str]) {
    let cards: Vec<_> = descriptions
        .iter()
        .map(|d| json!({ "id": "1", "name": "x", "description": d }))
        .collect();
    Mock::given(method("GET"))
        .and(path("/boards/b1"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "item": { "id": "b1" },
            "included": { "cards": cards }
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn planka_creates_card_in_todo_list() {
    let server = MockServer::start().await;
    board_with(&server, &["unrelated card", "scout-id: item:other"]).await;
    Mock::given(method("POST"))
        .and(path("/lists/todo/cards"))
        .and(header("authorization", "Bearer tok"))
        .and(body_partial_json(json!({
            "name": "[Azure Blog] Copilot",
            "listId": "todo",
            "position": 1
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "item": { "id": "c1" } })))
        .expect(1)
        .mount(&server)
        .await;

    let out = planka(&server)
        .create_card(&card("item:abc", CardKind::Item))
        .await
        .unwrap();
    assert_eq!(out, SinkOutcome::Created);
}

#[tokio::test]
async fn planka_routes_digests_to_digest_list() {
    let server = MockServer::start().await;
    board_with(&server, &[]).await;
    Mock::given(method("POST"))
        .and(path("/lists/digests/cards"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let out = planka(&server)
        .create_card(&card("digest:daily:initial", CardKind::Digest))
        .await
        .unwrap();
    assert_eq!(out, SinkOutcome::Created);
}

#[tokio::test]
async fn planka_reports_existing_token_as_duplicate() {
    let server = MockServer::start().await;
    board_with(&server, &["Body\n\n🔗 Source: x\n\nscout-id: item:abc"]).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let out = planka(&server)
        .create_card(&card("item:abc", CardKind::Item))
        .await
        .unwrap();
    assert_eq!(out, SinkOutcome::Duplicate);
}

#[tokio::test]
async fn planka_status_classification() {
    let server = MockServer::start().await;
    board_with(&server, &[]).await;
    Mock::given(method("POST"))
        .and(path("/lists/todo/cards"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let err = planka(&server)
        .create_card(&card("item:abc", CardKind::Item))
        .await
        .unwrap_err();
    assert!(err.is_transient(), "{err}");

    let server = MockServer::start().await;
    board_with(&server, &[]).await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422))
        .mount(&server)
        .await;
    let err = planka(&server)
        .create_card(&card("item:abc", CardKind::Item))
        .await
        .unwrap_err();
    assert!(!err.is_transient(), "{err}");
}

fn openai(server: &MockServer) -> OpenAiSummarizer {
    OpenAiSummarizer::new("sk-test", Some("gpt-4o-mini"), Some(server.uri().as_str()), Duration::from_secs(5))
        .unwrap()
}

fn completion(content: &str, finish: &str) -> serde_json::Value {
    json!({
        "id": "chatcmpl-1",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": finish
        }]
    })
}

#[tokio::test]
async fn openai_returns_message_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({ "model": "gpt-4o-mini" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Copilot reaches GA.", "stop")))
        .expect(1)
        .mount(&server)
        .await;

    let s = openai(&server).summarize("Title", "Body").await.unwrap();
    assert_eq!(s, "Copilot reaches GA.");
}

#[tokio::test]
async fn openai_content_filter_and_client_errors_are_permanent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("", "content_filter")))
        .mount(&server)
        .await;
    let err = openai(&server).summarize("t", "b").await.unwrap_err();
    assert!(!err.is_transient());

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    let err = openai(&server).summarize("t", "b").await.unwrap_err();
    assert!(!err.is_transient());
}

#[tokio::test]
async fn gateway_retries_rate_limits_then_gives_up() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let gw = SummarizerGateway::new(Arc::new(openai(&server)), fast_policy(3));
    let item = Item {
        source_id: "a".into(),
        source_name: "A".into(),
        natural_key: "url:https://a/1".into(),
        title: "Copilot".into(),
        body_excerpt: "Body".into(),
        published_at: None,
        url: Some("https://a/1".into()),
        summary: None,
        fingerprint: fingerprint("url:https://a/1"),
    };
    let out = gw.summarize(item).await;
    assert!(!out.is_summarized());
    let failure = out.failure.unwrap();
    assert_eq!(failure.attempts, 3);
    assert!(failure.error.is_transient());
}

#[test]
fn openai_requires_a_key() {
    assert!(OpenAiSummarizer::new("  ", None, None, Duration::from_secs(1)).is_err());
}
