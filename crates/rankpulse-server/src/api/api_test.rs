use axum::body::{to_bytes, Body};
use axum::http::Request;
use chrono::{TimeZone, Utc};
use rankpulse_core::{EventDetector, EventState, Severity, Snapshot};
use tower::ServiceExt;

use super::events::{build_filter, EventsQuery};
use super::snapshots::validate_snapshot;
use super::*;

fn dev_auth() -> AuthState {
    AuthState::new(&[], true).expect("auth")
}

fn snap(rank: i32, day: u32) -> Snapshot {
    Snapshot {
        entity_id: "sku-42".to_string(),
        category_id: "headphones".to_string(),
        rank,
        price: None,
        rating: None,
        review_count: Some(120),
        stock_status: None,
        observed_at: Utc.with_ymd_and_hms(2026, 9, day, 12, 0, 0).unwrap(),
    }
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body bytes");
    serde_json::from_slice(&body).expect("json parse")
}

/// Detects and stores a 40 -> 8 rank jump; returns the event id.
async fn seed_event(pool: &sqlx::PgPool) -> uuid::Uuid {
    let event = EventDetector::default()
        .detect(Some(&snap(40, 1)), &snap(8, 2), Utc::now())
        .remove(0);
    rankpulse_db::insert_event_if_absent(pool, &event)
        .await
        .expect("insert event");
    event.id
}

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

#[test]
fn normalize_limit_applies_defaults_and_bounds() {
    assert_eq!(normalize_limit(None), 50);
    assert_eq!(normalize_limit(Some(0)), 1);
    assert_eq!(normalize_limit(Some(1_000)), 200);
    assert_eq!(normalize_limit(Some(25)), 25);
}

#[test]
fn api_error_codes_map_to_statuses() {
    let cases = [
        ("validation_error", StatusCode::BAD_REQUEST),
        ("not_found", StatusCode::NOT_FOUND),
        ("conflict", StatusCode::CONFLICT),
        ("internal_error", StatusCode::INTERNAL_SERVER_ERROR),
    ];
    for (code, status) in cases {
        let response = ApiError::new("req-1", code, "msg").into_response();
        assert_eq!(response.status(), status, "code {code}");
    }
}

#[test]
fn min_severity_expands_to_levels_at_or_above() {
    let filter = build_filter(
        "req-1",
        EventsQuery {
            min_severity: Some("HIGH".to_string()),
            ..EventsQuery::default()
        },
    )
    .expect("filter");
    assert_eq!(filter.severities, vec![Severity::High, Severity::Critical]);
}

#[test]
fn severity_list_is_narrowed_by_min_severity() {
    let filter = build_filter(
        "req-1",
        EventsQuery {
            severity: Some("low, critical".to_string()),
            min_severity: Some("medium".to_string()),
            state: Some("failed,detected".to_string()),
            ..EventsQuery::default()
        },
    )
    .expect("filter");
    assert_eq!(filter.severities, vec![Severity::Critical]);
    assert_eq!(filter.states, vec![EventState::Failed, EventState::Detected]);
}

#[test]
fn unknown_filter_values_are_rejected() {
    let err = build_filter(
        "req-1",
        EventsQuery {
            state: Some("PENDING".to_string()),
            ..EventsQuery::default()
        },
    )
    .unwrap_err();
    assert_eq!(err.error.code, "validation_error");
    assert!(err.error.message.contains("PENDING"));
}

#[test]
fn inverted_time_range_is_rejected() {
    let err = build_filter(
        "req-1",
        EventsQuery {
            from: Some(Utc.with_ymd_and_hms(2026, 9, 2, 0, 0, 0).unwrap()),
            to: Some(Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap()),
            ..EventsQuery::default()
        },
    )
    .unwrap_err();
    assert_eq!(err.error.code, "validation_error");
}

#[test]
fn snapshot_validation_rejects_non_positive_rank() {
    assert!(validate_snapshot("req-1", &snap(1, 1)).is_ok());
    let err = validate_snapshot("req-1", &snap(0, 1)).unwrap_err();
    assert!(err.error.message.contains("rank"));
}

// ---------------------------------------------------------------------------
// Routes (with DB)
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../migrations")]
async fn health_reports_database_ok(pool: sqlx::PgPool) {
    let app = build_app(AppState { pool }, dev_auth());
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/health")
                .header("x-request-id", "req-health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-request-id"], "req-health");
    let json = body_json(response).await;
    assert_eq!(json["data"]["database"], "ok");
    assert_eq!(json["meta"]["request_id"], "req-health");
}

#[sqlx::test(migrations = "../../migrations")]
async fn posting_the_same_snapshot_twice_inserts_once(pool: sqlx::PgPool) {
    let body = serde_json::to_string(&snap(12, 3)).expect("serialize");

    for expected in [StatusCode::CREATED, StatusCode::OK] {
        let app = build_app(AppState { pool: pool.clone() }, dev_auth());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/snapshots")
                    .header("content-type", "application/json")
                    .body(Body::from(body.clone()))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), expected);
    }

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM snapshots")
        .fetch_one(&pool)
        .await
        .expect("count");
    assert_eq!(count, 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn list_events_filters_by_severity(pool: sqlx::PgPool) {
    let id = seed_event(&pool).await;

    let app = build_app(AppState { pool: pool.clone() }, dev_auth());
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/events?min_severity=critical&state=DETECTED")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let data = json["data"].as_array().expect("data array");
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["id"], id.to_string());
    assert_eq!(data[0]["event_type"], "RANK_SURGE");

    let app = build_app(AppState { pool }, dev_auth());
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/events?state=FAILED")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    let json = body_json(response).await;
    assert!(json["data"].as_array().expect("data array").is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
async fn unknown_event_is_404_and_bad_id_is_400(pool: sqlx::PgPool) {
    let app = build_app(AppState { pool: pool.clone() }, dev_auth());
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/events/{}", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "not_found");

    let app = build_app(AppState { pool }, dev_auth());
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/events/not-a-uuid/bundle")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[sqlx::test(migrations = "../../migrations")]
async fn requeue_of_a_detected_event_is_a_conflict(pool: sqlx::PgPool) {
    let id = seed_event(&pool).await;

    let app = build_app(AppState { pool }, dev_auth());
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/v1/events/{id}/requeue"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[sqlx::test(migrations = "../../migrations")]
async fn protected_routes_require_a_bearer_token(pool: sqlx::PgPool) {
    let auth = AuthState::new(&["secret-token".to_string()], false).expect("auth");

    let app = build_app(AppState { pool: pool.clone() }, auth.clone());
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/events")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let app = build_app(AppState { pool }, auth);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/events")
                .header("authorization", "Bearer secret-token")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
}
