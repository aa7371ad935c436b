//! Override management endpoints.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use crate::overrides::{Override, OverrideType};
use crate::overrides_repo::OverridesRepository;
use crate::web::AppState;

use super::{DataListResponse, DataResponse, json_error};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertOverrideRequest {
    pub client_id: Uuid,
    pub technician_id: Uuid,
    #[serde(rename = "type")]
    pub override_type: String,
    #[serde(default)]
    pub effective_from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub effective_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Handler for POST /admin/scheduling/overrides
pub async fn upsert_override(
    State(state): State<AppState>,
    Json(body): Json<UpsertOverrideRequest>,
) -> impl IntoResponse {
    let Some(override_type) = OverrideType::parse(&body.override_type) else {
        return json_error(
            StatusCode::BAD_REQUEST,
            "type must be LOCKED_ASSIGNMENT, MANUAL_ASSIGNMENT or BLOCK_PAIR",
        )
        .into_response();
    };
    if let (Some(from), Some(to)) = (body.effective_from, body.effective_to)
        && from > to
    {
        return json_error(StatusCode::BAD_REQUEST, "effectiveFrom is after effectiveTo")
            .into_response();
    }

    let mut value = Override::new(body.client_id, body.technician_id, override_type);
    value.effective_from = body.effective_from;
    value.effective_to = body.effective_to;
    value.notes = body.notes;

    match OverridesRepository::new(state.pool.clone()).upsert(value).await {
        Ok(saved) => Json(DataResponse { data: saved }).into_response(),
        Err(e) => {
            error!("Failed to save override: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to save override")
                .into_response()
        }
    }
}

/// Handler for GET /admin/scheduling/overrides
pub async fn list_overrides(State(state): State<AppState>) -> impl IntoResponse {
    match OverridesRepository::new(state.pool.clone()).list().await {
        Ok(overrides) => Json(DataListResponse { data: overrides }).into_response(),
        Err(e) => {
            error!("Failed to list overrides: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to list overrides")
                .into_response()
        }
    }
}

/// Handler for GET /admin/scheduling/overrides/{id}
pub async fn get_override(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match OverridesRepository::new(state.pool.clone()).get_by_id(id).await {
        Ok(Some(value)) => Json(DataResponse { data: value }).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "Override not found").into_response(),
        Err(e) => {
            error!("Failed to load override: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to load override")
                .into_response()
        }
    }
}

/// Handler for DELETE /admin/scheduling/overrides/{id}
pub async fn delete_override(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match OverridesRepository::new(state.pool.clone()).delete_by_id(id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => json_error(StatusCode::NOT_FOUND, "Override not found").into_response(),
        Err(e) => {
            error!("Failed to delete override: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to delete override")
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairParams {
    pub client_id: Uuid,
    pub technician_id: Uuid,
}

/// Handler for DELETE /admin/scheduling/overrides?clientId=..&technicianId=..
pub async fn delete_override_by_pair(
    State(state): State<AppState>,
    Query(params): Query<PairParams>,
) -> impl IntoResponse {
    match OverridesRepository::new(state.pool.clone())
        .delete_by_pair(params.client_id, params.technician_id)
        .await
    {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => json_error(StatusCode::NOT_FOUND, "Override not found").into_response(),
        Err(e) => {
            error!("Failed to delete override: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to delete override")
                .into_response()
        }
    }
}
