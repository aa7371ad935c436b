//! Simulation and approval workflow endpoints.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::proposals::{ApprovalError, MatchProposal, ProposalStatus};
use crate::simulation::SimulationError;
use crate::web::AppState;

use super::{DataListResponse, DataResponse, json_error};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddClientRequest {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Handler for POST /admin/simulation/add-client
pub async fn add_client(
    State(state): State<AppState>,
    Json(body): Json<AddClientRequest>,
) -> impl IntoResponse {
    if body.name.trim().is_empty() || body.address.trim().is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "name and address are required")
            .into_response();
    }

    match state
        .simulation
        .add_client(body.name.trim(), &body.address, body.notes)
        .await
    {
        Ok(client) => Json(DataResponse { data: client }).into_response(),
        Err(SimulationError::Geocode(e)) => {
            json_error(StatusCode::BAD_REQUEST, &format!("address did not geocode: {e}"))
                .into_response()
        }
        Err(e) => {
            error!("Failed to add client: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to add client")
                .into_response()
        }
    }
}

/// Handler for POST /admin/simulation/run
pub async fn run_simulation(State(state): State<AppState>) -> impl IntoResponse {
    match state.simulation.run_simulation().await {
        Ok(result) => Json(DataResponse { data: result }).into_response(),
        Err(e) => {
            error!("Simulation run failed: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "simulation run failed")
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProposalListParams {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalItem {
    #[serde(flatten)]
    pub proposal: MatchProposal,
    pub client_name: String,
    pub technician_name: String,
}

/// Handler for GET /admin/simulation/proposals?status=...
pub async fn list_proposals(
    State(state): State<AppState>,
    Query(params): Query<ProposalListParams>,
) -> impl IntoResponse {
    let filter = match params.status.as_deref() {
        None | Some("") => None,
        Some(raw) => match ProposalStatus::parse(raw) {
            Some(parsed) => Some(parsed),
            None => {
                return json_error(StatusCode::BAD_REQUEST, "unknown proposal status")
                    .into_response();
            }
        },
    };

    match state.simulation.list_proposals(filter).await {
        Ok(views) => {
            let items: Vec<ProposalItem> = views
                .into_iter()
                .map(|v| ProposalItem {
                    proposal: v.proposal,
                    client_name: v.client_name,
                    technician_name: v.technician_name,
                })
                .collect();
            Json(DataListResponse { data: items }).into_response()
        }
        Err(e) => {
            error!("Failed to list proposals: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to list proposals")
                .into_response()
        }
    }
}

/// Map approval failures onto the API contract: 404 for missing entities,
/// 409 with a distinguishing message for invariant conflicts.
fn approval_error_response(e: ApprovalError) -> Response {
    match e {
        ApprovalError::NotFound => {
            json_error(StatusCode::NOT_FOUND, "not found").into_response()
        }
        ApprovalError::ClientAlreadyPaired => {
            json_error(StatusCode::CONFLICT, "client-already-paired").into_response()
        }
        ApprovalError::TechnicianLocked => {
            json_error(StatusCode::CONFLICT, "technician-locked").into_response()
        }
        ApprovalError::ProposalNotProposed => {
            json_error(StatusCode::CONFLICT, "proposal-not-proposed").into_response()
        }
        ApprovalError::NoActivePairing => {
            json_error(StatusCode::CONFLICT, "no-active-pairing").into_response()
        }
        ApprovalError::Database(e) => {
            error!("Approval operation failed: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "operation failed").into_response()
        }
    }
}

/// Handler for POST /admin/simulation/approve/{id}
pub async fn approve_proposal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.simulation.approve_proposal(id).await {
        Ok(pairing) => Json(DataResponse { data: pairing }).into_response(),
        Err(e) => approval_error_response(e),
    }
}

/// Handler for POST /admin/simulation/reject/{id}
pub async fn reject_proposal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.simulation.reject_proposal(id).await {
        Ok(proposal) => Json(DataResponse { data: proposal }).into_response(),
        Err(e) => approval_error_response(e),
    }
}

/// Handler for POST /admin/simulation/defer/{id}
pub async fn defer_proposal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.simulation.defer_proposal(id).await {
        Ok(proposal) => Json(DataResponse { data: proposal }).into_response(),
        Err(e) => approval_error_response(e),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReopenResponse {
    pub technician_id: Uuid,
    pub pairings_closed: u64,
}

/// Handler for POST /admin/technicians/{id}/reopen
pub async fn reopen_technician(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.simulation.reopen_technician(id).await {
        Ok(closed) => Json(DataResponse {
            data: ReopenResponse {
                technician_id: id,
                pairings_closed: closed,
            },
        })
        .into_response(),
        Err(e) => approval_error_response(e),
    }
}
