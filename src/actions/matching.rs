//! Matching endpoints: trigger runs, read status, list unmatched clients.

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::error;
use uuid::Uuid;

use crate::matching::{MatchRunError, MatchStatus};
use crate::validation::ReviewReason;
use crate::web::AppState;

use super::{DataListResponse, DataResponse, json_error};

/// Handler for POST /admin/matching/run-matching
pub async fn run_matching(State(state): State<AppState>) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    match state.match_service.run_matching(&cancel).await {
        Ok(summary) => Json(DataResponse { data: summary }).into_response(),
        Err(MatchRunError::AlreadyRunning) => {
            json_error(StatusCode::CONFLICT, "a match run is already in progress")
                .into_response()
        }
        Err(e @ (MatchRunError::NoClients | MatchRunError::NoTechnicians)) => {
            json_error(StatusCode::BAD_REQUEST, &e.to_string()).into_response()
        }
        Err(e) => {
            error!("Match run failed: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "match run failed").into_response()
        }
    }
}

/// Handler for GET /admin/matching/matching-status
pub async fn matching_status(State(state): State<AppState>) -> impl IntoResponse {
    match state.match_service.latest_run().await {
        Ok(Some(run)) => Json(DataResponse {
            data: run.summary(),
        })
        .into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "no match run recorded").into_response(),
        Err(e) => {
            error!("Failed to load match status: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to load status")
                .into_response()
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmatchedClient {
    pub client_id: Uuid,
    pub client_name: String,
    pub status: MatchStatus,
    pub reasons: Vec<ReviewReason>,
}

/// Handler for GET /admin/matching/unmatched
///
/// Clients left standby or unlocatable in the latest run, with the
/// validator's structured reasons.
pub async fn unmatched_clients(State(state): State<AppState>) -> impl IntoResponse {
    let run = match state.match_service.latest_run().await {
        Ok(Some(run)) => run,
        Ok(None) => {
            return json_error(StatusCode::NOT_FOUND, "no match run recorded").into_response();
        }
        Err(e) => {
            error!("Failed to load latest run: {e}");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to load run")
                .into_response();
        }
    };

    let unmatched: Vec<UnmatchedClient> = run
        .assignments()
        .into_iter()
        .filter(|a| {
            matches!(
                a.status,
                MatchStatus::Standby | MatchStatus::NoLocation | MatchStatus::NeedsReview
            )
        })
        .map(|a| UnmatchedClient {
            client_id: a.client_id,
            client_name: a.client_name,
            status: a.status,
            reasons: a.explain.reasons,
        })
        .collect();

    Json(DataListResponse { data: unmatched }).into_response()
}
