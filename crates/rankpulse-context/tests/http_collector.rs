//! Integration tests for `HttpSourceCollector` against a local `wiremock`
//! server, including the retry loop around it.

use std::sync::atomic::AtomicU32;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rankpulse_context::{
    collect_with_retry, CallBudget, HttpSourceCollector, RetryPolicy, SourceCollector,
    SourceError, SourceRequest,
};
use rankpulse_core::{EventType, SourceFailure, SourceResult, TimeWindow};
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request() -> SourceRequest {
    SourceRequest {
        event_id: Uuid::nil(),
        entity_id: "sku-1".to_string(),
        category_id: "blenders".to_string(),
        event_type: EventType::RankSurge,
        window: TimeWindow {
            start: Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 2, 11, 0, 0, 0).unwrap(),
        },
    }
}

fn collector(server: &MockServer) -> HttpSourceCollector {
    HttpSourceCollector::new(
        "news",
        format!("{}/items", server.uri()),
        Duration::from_secs(5),
    )
    .expect("failed to build test collector")
}

fn items_json(n: usize) -> serde_json::Value {
    let items: Vec<_> = (0..n)
        .map(|i| {
            json!({
                "id": format!("n{i}"),
                "title": format!("Headline {i}"),
                "score": 0.9,
                "url": "https://news.example/story"
            })
        })
        .collect();
    json!({ "items": items })
}

// ---------------------------------------------------------------------------
// Single attempts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sends_event_query_and_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("entity_id", "sku-1"))
        .and(query_param("category_id", "blenders"))
        .and(query_param("event_type", "RANK_SURGE"))
        .and(query_param("start", "2026-02-01T00:00:00Z"))
        .and(query_param("end", "2026-02-11T00:00:00Z"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items_json(2)))
        .expect(1)
        .mount(&server)
        .await;

    let items = collector(&server)
        .with_api_key(Some("secret".to_string()))
        .collect(&request())
        .await
        .unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].id, "n0");
    assert_eq!(items[0].score, Some(0.9));
    assert!(items[0].body.is_none());
}

#[tokio::test]
async fn truncates_to_max_items() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items_json(5)))
        .mount(&server)
        .await;

    let items = collector(&server)
        .with_max_items(Some(3))
        .collect(&request())
        .await
        .unwrap();
    assert_eq!(items.len(), 3);
}

#[tokio::test]
async fn too_many_requests_is_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&server)
        .await;

    let err = collector(&server).collect(&request()).await.unwrap_err();
    assert!(matches!(
        err,
        SourceError::RateLimited {
            retry_after_secs: 7,
            ..
        }
    ));
    assert!(err.is_retriable());
}

#[tokio::test]
async fn not_found_is_not_retriable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = collector(&server).collect(&request()).await.unwrap_err();
    assert!(matches!(
        err,
        SourceError::UnexpectedStatus { status: 404, .. }
    ));
    assert!(!err.is_retriable());
}

#[tokio::test]
async fn malformed_body_is_a_deserialize_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = collector(&server).collect(&request()).await.unwrap_err();
    assert!(matches!(err, SourceError::Deserialize { .. }));
}

// ---------------------------------------------------------------------------
// With retries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn server_error_then_success_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(items_json(1)))
        .mount(&server)
        .await;

    let budget = CallBudget::new(10);
    let attempts = AtomicU32::new(0);
    let result = collect_with_retry(
        &collector(&server),
        &request(),
        RetryPolicy {
            max_retries: 2,
            backoff_base_ms: 1,
        },
        Duration::from_secs(5),
        &budget,
        &attempts,
    )
    .await;

    assert!(result.is_ok());
    assert_eq!(result.attempts(), 2);
    assert_eq!(budget.attempted(), 2);
}

#[tokio::test]
async fn persistent_server_errors_exhaust_retries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let budget = CallBudget::new(10);
    let attempts = AtomicU32::new(0);
    let result = collect_with_retry(
        &collector(&server),
        &request(),
        RetryPolicy {
            max_retries: 2,
            backoff_base_ms: 1,
        },
        Duration::from_secs(5),
        &budget,
        &attempts,
    )
    .await;

    assert!(matches!(
        result,
        SourceResult::Failed {
            reason: SourceFailure::RetriesExhausted,
            attempts: 3,
            ..
        }
    ));
}
