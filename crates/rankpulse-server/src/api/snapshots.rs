use axum::{extract::State, http::StatusCode, Extension, Json};
use rankpulse_core::Snapshot;
use serde::Serialize;

use crate::middleware::RequestId;

use super::{map_db_error, ApiError, ApiResponse, AppState};

#[derive(Debug, Serialize)]
pub(super) struct CreateSnapshotResponse {
    /// `false` when a snapshot with the same series and `observed_at` was
    /// already stored.
    pub inserted: bool,
}

pub(super) fn validate_snapshot(req_id: &str, snapshot: &Snapshot) -> Result<(), ApiError> {
    if snapshot.entity_id.trim().is_empty() || snapshot.category_id.trim().is_empty() {
        return Err(ApiError::new(
            req_id,
            "validation_error",
            "entity_id and category_id must not be empty",
        ));
    }
    if snapshot.rank <= 0 {
        return Err(ApiError::new(
            req_id,
            "validation_error",
            format!("rank must be positive, got {}", snapshot.rank),
        ));
    }
    if snapshot.review_count.is_some_and(|n| n < 0) {
        return Err(ApiError::new(
            req_id,
            "validation_error",
            "review_count must not be negative",
        ));
    }
    Ok(())
}

/// Appends one snapshot. Detection runs on the next pipeline pass.
pub(super) async fn create_snapshot(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Json(snapshot): Json<Snapshot>,
) -> Result<(StatusCode, Json<ApiResponse<CreateSnapshotResponse>>), ApiError> {
    validate_snapshot(&req_id.0, &snapshot)?;

    let inserted = rankpulse_db::insert_snapshot(&state.pool, &snapshot)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;

    tracing::debug!(
        series = %snapshot.series_key(),
        observed_at = %snapshot.observed_at,
        inserted,
        "snapshot received"
    );

    let status = if inserted {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(ApiResponse::new(
            CreateSnapshotResponse { inserted },
            req_id.0,
        )),
    ))
}
