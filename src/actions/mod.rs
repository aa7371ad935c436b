pub mod locations;
pub mod matching;
pub mod overrides;
pub mod simulation;
pub mod status;
pub mod sync;

pub use locations::*;
pub use matching::*;
pub use overrides::*;
pub use simulation::*;
pub use status::*;
pub use sync::*;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Serialize;
use serde_json::json;

/// Standard wrapper for single resource responses
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataResponse<T> {
    pub data: T,
}

/// Standard wrapper for list responses
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataListResponse<T> {
    pub data: Vec<T>,
}

/// Helper function to create consistent JSON error responses
pub fn json_error(status: StatusCode, message: &str) -> impl IntoResponse {
    (
        status,
        Json(json!({
            "errors": message
        })),
    )
}
