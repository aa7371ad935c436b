//! Location endpoints: manual pins and stored geocode lookup.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{error, warn};
use uuid::Uuid;

use crate::clients_repo::ClientsRepository;
use crate::geocodes::{Geocode, Point};
use crate::technicians_repo::TechniciansRepository;
use crate::travel_time::EntityKind;
use crate::web::AppState;

use super::{DataResponse, json_error};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLocationRequest {
    pub entity_type: String,
    pub entity_id: Uuid,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Handler for POST /location/update
///
/// A manual pin: writes ROOFTOP precision at full confidence and
/// invalidates cached travel times for the entity.
pub async fn update_location(
    State(state): State<AppState>,
    Json(body): Json<UpdateLocationRequest>,
) -> impl IntoResponse {
    let Some(kind) = EntityKind::parse(&body.entity_type) else {
        return json_error(
            StatusCode::BAD_REQUEST,
            "entityType must be \"client\" or \"technician\"",
        )
        .into_response();
    };

    let point = Point::new(body.lat, body.lng);
    if !point.is_valid() {
        return json_error(
            StatusCode::BAD_REQUEST,
            "lat must be -90..90 and lng -180..180",
        )
        .into_response();
    }
    if !point.is_plausibly_continental_us() {
        return json_error(
            StatusCode::BAD_REQUEST,
            "coordinates are outside the continental US",
        )
        .into_response();
    }

    let geocode = Geocode::manual_pin(point, body.notes.clone());

    let (updated, old_point) = match kind {
        EntityKind::Client => {
            let repo = ClientsRepository::new(state.pool.clone());
            let old = match repo.get_by_id(body.entity_id).await {
                Ok(Some(client)) => client.point(),
                Ok(None) => {
                    return json_error(StatusCode::NOT_FOUND, "Client not found").into_response();
                }
                Err(e) => {
                    error!("Failed to load client: {e}");
                    return json_error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Failed to update location",
                    )
                    .into_response();
                }
            };
            (repo.update_geocode(body.entity_id, geocode.clone()).await, old)
        }
        EntityKind::Technician => {
            let repo = TechniciansRepository::new(state.pool.clone());
            let old = match repo.get_by_id(body.entity_id).await {
                Ok(Some(technician)) => technician.point(),
                Ok(None) => {
                    return json_error(StatusCode::NOT_FOUND, "Technician not found")
                        .into_response();
                }
                Err(e) => {
                    error!("Failed to load technician: {e}");
                    return json_error(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Failed to update location",
                    )
                    .into_response();
                }
            };
            (repo.update_geocode(body.entity_id, geocode.clone()).await, old)
        }
    };

    match updated {
        Ok(true) => {}
        Ok(false) => {
            return json_error(StatusCode::NOT_FOUND, "Entity not found").into_response();
        }
        Err(e) => {
            error!("Failed to store manual pin: {e}");
            return json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to update location",
            )
            .into_response();
        }
    }

    // Travel times cached under the entity's previous position are now lies.
    for stale_point in [old_point, Some(point)].into_iter().flatten() {
        if let Err(e) = state.travel.invalidate_for_entity(kind, stale_point).await {
            warn!("Cache invalidation after manual pin failed: {e}");
        }
    }

    Json(DataResponse { data: geocode }).into_response()
}

/// Handler for GET /location/{entity_type}/{entity_id}
pub async fn get_location(
    State(state): State<AppState>,
    Path((entity_type, entity_id)): Path<(String, Uuid)>,
) -> impl IntoResponse {
    let Some(kind) = EntityKind::parse(&entity_type) else {
        return json_error(
            StatusCode::BAD_REQUEST,
            "entityType must be \"client\" or \"technician\"",
        )
        .into_response();
    };

    let geocode = match kind {
        EntityKind::Client => ClientsRepository::new(state.pool.clone())
            .get_by_id(entity_id)
            .await
            .map(|c| c.and_then(|c| c.geocode)),
        EntityKind::Technician => TechniciansRepository::new(state.pool.clone())
            .get_by_id(entity_id)
            .await
            .map(|t| t.and_then(|t| t.geocode)),
    };

    match geocode {
        Ok(Some(geocode)) => Json(DataResponse { data: geocode }).into_response(),
        Ok(None) => json_error(StatusCode::NOT_FOUND, "No stored location").into_response(),
        Err(e) => {
            error!("Failed to load location: {e}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load location")
                .into_response()
        }
    }
}
