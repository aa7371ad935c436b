//! CRM sync endpoints.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::error;

use crate::web::AppState;

use super::{DataResponse, json_error};

/// Handler for POST /admin/scheduling/sync-clients
pub async fn sync_clients(State(state): State<AppState>) -> impl IntoResponse {
    match state.sync.sync_clients().await {
        Ok(run) => Json(DataResponse { data: run }).into_response(),
        Err(e) => {
            error!("Client sync failed: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "client sync failed").into_response()
        }
    }
}

/// Handler for GET /admin/scheduling/sync-clients/status
pub async fn sync_clients_status(State(state): State<AppState>) -> impl IntoResponse {
    match state.sync.latest_run().await {
        Ok(Some(run)) => Json(DataResponse { data: run }).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "no sync run recorded").into_response(),
        Err(e) => {
            error!("Failed to load sync status: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to load sync status")
                .into_response()
        }
    }
}
