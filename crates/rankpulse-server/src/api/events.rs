//! Read interface over detected events, their context and insights, plus the
//! operator requeue action.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use rankpulse_core::{ContextBundle, EventState, Insight, RankingEvent, Severity};
use rankpulse_db::{DbError, EventFilter};
use serde::Deserialize;
use uuid::Uuid;

use crate::middleware::RequestId;

use super::{map_db_error, normalize_limit, ApiError, ApiResponse, AppState};

#[derive(Debug, Default, Deserialize)]
pub(super) struct EventsQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Lowest severity to include.
    pub min_severity: Option<String>,
    /// Comma-separated severities.
    pub severity: Option<String>,
    /// Comma-separated states.
    pub state: Option<String>,
    pub entity_id: Option<String>,
    pub category_id: Option<String>,
    pub limit: Option<i64>,
}

fn parse_list<T, F>(req_id: &str, field: &str, raw: &str, parse: F) -> Result<Vec<T>, ApiError>
where
    F: Fn(&str) -> Option<T>,
{
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            parse(s).ok_or_else(|| {
                ApiError::new(
                    req_id,
                    "validation_error",
                    format!("unknown {field} '{s}'"),
                )
            })
        })
        .collect()
}

fn parse_severity(s: &str) -> Option<Severity> {
    s.to_ascii_lowercase().parse().ok()
}

fn parse_state(s: &str) -> Option<EventState> {
    s.to_ascii_uppercase().parse().ok()
}

pub(super) fn build_filter(req_id: &str, query: EventsQuery) -> Result<EventFilter, ApiError> {
    if let (Some(from), Some(to)) = (query.from, query.to) {
        if from > to {
            return Err(ApiError::new(
                req_id,
                "validation_error",
                "'from' must not be after 'to'",
            ));
        }
    }

    let mut severities = match query.severity.as_deref() {
        Some(raw) => parse_list(req_id, "severity", raw, parse_severity)?,
        None => Vec::new(),
    };
    if let Some(raw) = query.min_severity.as_deref() {
        let min = parse_severity(raw).ok_or_else(|| {
            ApiError::new(
                req_id,
                "validation_error",
                format!("unknown min_severity '{raw}'"),
            )
        })?;
        severities = if severities.is_empty() {
            min.at_or_above()
        } else {
            severities.into_iter().filter(|s| *s >= min).collect()
        };
        if severities.is_empty() {
            return Err(ApiError::new(
                req_id,
                "validation_error",
                "severity and min_severity exclude every level",
            ));
        }
    }

    let states = match query.state.as_deref() {
        Some(raw) => parse_list(req_id, "state", raw, parse_state)?,
        None => Vec::new(),
    };

    Ok(EventFilter {
        from: query.from,
        to: query.to,
        severities,
        states,
        entity_id: query.entity_id,
        category_id: query.category_id,
        limit: normalize_limit(query.limit),
    })
}

fn parse_event_id(req_id: &str, raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| {
        ApiError::new(
            req_id,
            "validation_error",
            format!("'{raw}' is not a valid event id"),
        )
    })
}

pub(super) async fn list_events(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<ApiResponse<Vec<RankingEvent>>>, ApiError> {
    let filter = build_filter(&req_id.0, query)?;
    let events = rankpulse_db::list_events(&state.pool, &filter)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse::new(events, req_id.0)))
}

pub(super) async fn get_event(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<RankingEvent>>, ApiError> {
    let id = parse_event_id(&req_id.0, &id)?;
    let event = rankpulse_db::get_event(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?
        .ok_or_else(|| ApiError::new(req_id.0.clone(), "not_found", "event not found"))?;
    Ok(Json(ApiResponse::new(event, req_id.0)))
}

pub(super) async fn get_bundle(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<ContextBundle>>, ApiError> {
    let id = parse_event_id(&req_id.0, &id)?;
    let bundle = rankpulse_db::get_bundle(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?
        .ok_or_else(|| {
            ApiError::new(
                req_id.0.clone(),
                "not_found",
                "no context has been collected for this event",
            )
        })?;
    Ok(Json(ApiResponse::new(bundle, req_id.0)))
}

pub(super) async fn get_insight(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Insight>>, ApiError> {
    let id = parse_event_id(&req_id.0, &id)?;
    let insight = rankpulse_db::get_current_insight(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?
        .ok_or_else(|| {
            ApiError::new(
                req_id.0.clone(),
                "not_found",
                "no insight has been generated for this event",
            )
        })?;
    Ok(Json(ApiResponse::new(insight, req_id.0)))
}

/// Every insight generated for the event, newest first.
pub(super) async fn list_insights(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<Insight>>>, ApiError> {
    let id = parse_event_id(&req_id.0, &id)?;
    if rankpulse_db::get_event(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?
        .is_none()
    {
        return Err(ApiError::new(req_id.0, "not_found", "event not found"));
    }
    let insights = rankpulse_db::list_insights_for_event(&state.pool, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse::new(insights, req_id.0)))
}

pub(super) async fn requeue_event(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<RankingEvent>>, ApiError> {
    let id = parse_event_id(&req_id.0, &id)?;
    match rankpulse_db::requeue_failed_event(&state.pool, id).await {
        Ok(event) => {
            tracing::info!(event_id = %id, request_id = %req_id.0, "failed event requeued");
            Ok(Json(ApiResponse::new(event, req_id.0)))
        }
        Err(DbError::StaleTransition { .. }) => Err(ApiError::new(
            req_id.0,
            "conflict",
            "only FAILED events can be requeued",
        )),
        Err(DbError::NotFound) => Err(ApiError::new(req_id.0, "not_found", "event not found")),
        Err(e) => Err(map_db_error(req_id.0, &e)),
    }
}
