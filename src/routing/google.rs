//! Google Distance Matrix API backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::geocodes::Point;
use crate::travel_time::{TrafficModel, TravelMode};

use super::{RouteError, RouteLeg, RouteProvider};

const DEFAULT_BASE_URL: &str = "https://maps.googleapis.com/maps/api/distancematrix/json";

#[derive(Debug, Deserialize)]
struct MatrixResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    rows: Vec<MatrixRow>,
}

#[derive(Debug, Deserialize)]
struct MatrixRow {
    #[serde(default)]
    elements: Vec<MatrixElement>,
}

#[derive(Debug, Deserialize)]
struct MatrixElement {
    status: String,
    #[serde(default)]
    duration: Option<ValueField>,
    #[serde(default)]
    duration_in_traffic: Option<ValueField>,
    #[serde(default)]
    distance: Option<ValueField>,
}

#[derive(Debug, Deserialize)]
struct ValueField {
    value: i64,
}

pub struct GoogleDistanceBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GoogleDistanceBackend {
    pub fn new(api_key: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            api_key: api_key.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

fn traffic_model_param(traffic: TrafficModel) -> &'static str {
    match traffic {
        TrafficModel::Pessimistic => "pessimistic",
        TrafficModel::BestGuess => "best_guess",
        TrafficModel::Optimistic => "optimistic",
    }
}

#[async_trait]
impl RouteProvider for GoogleDistanceBackend {
    async fn route(
        &self,
        origin: Point,
        dest: Point,
        mode: TravelMode,
        departure: DateTime<Utc>,
        traffic: TrafficModel,
    ) -> Result<RouteLeg, RouteError> {
        debug!(
            "Distance matrix query {} -> {} ({}, departs {})",
            origin.latitude, dest.latitude, mode.as_str(), departure
        );

        let mut params: Vec<(&str, String)> = vec![
            (
                "origins",
                format!("{},{}", origin.latitude, origin.longitude),
            ),
            (
                "destinations",
                format!("{},{}", dest.latitude, dest.longitude),
            ),
            ("mode", mode.as_str().to_string()),
            ("departure_time", departure.timestamp().to_string()),
            ("units", "metric".to_string()),
            ("key", self.api_key.clone()),
        ];
        // Traffic models only apply to driving requests.
        if mode == TravelMode::Driving {
            params.push(("traffic_model", traffic_model_param(traffic).to_string()));
        }

        let response = self
            .client
            .get(&self.base_url)
            .query(&params)
            .send()
            .await
            .map_err(|e| RouteError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(RouteError::Transient(format!("provider returned {status}")));
        }
        if !status.is_success() {
            return Err(RouteError::Provider(format!("provider returned {status}")));
        }

        let body: MatrixResponse = response
            .json()
            .await
            .map_err(|e| RouteError::Transient(format!("bad response body: {e}")))?;

        match body.status.as_str() {
            "OK" => {}
            "OVER_QUERY_LIMIT" | "OVER_DAILY_LIMIT" => return Err(RouteError::QuotaExhausted),
            "REQUEST_DENIED" | "INVALID_REQUEST" => {
                return Err(RouteError::Provider(
                    body.error_message.unwrap_or_else(|| body.status.clone()),
                ));
            }
            other => return Err(RouteError::Transient(format!("provider status {other}"))),
        }

        let element = body
            .rows
            .into_iter()
            .next()
            .and_then(|row| row.elements.into_iter().next())
            .ok_or(RouteError::NoRoute)?;

        match element.status.as_str() {
            "OK" => {}
            "ZERO_RESULTS" | "NOT_FOUND" => return Err(RouteError::NoRoute),
            other => return Err(RouteError::Transient(format!("element status {other}"))),
        }

        // Traffic-aware figures are only present for driving; fall back to
        // the static duration otherwise.
        let duration = element
            .duration_in_traffic
            .or(element.duration)
            .ok_or(RouteError::NoRoute)?;
        if duration.value < 0 {
            return Err(RouteError::Provider(format!(
                "negative duration {}",
                duration.value
            )));
        }

        Ok(RouteLeg {
            duration_sec: duration.value as u32,
            distance_meters: element
                .distance
                .and_then(|d| u32::try_from(d.value).ok()),
        })
    }

    fn is_live(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
        "status": "OK",
        "rows": [
            {
                "elements": [
                    {
                        "status": "OK",
                        "duration": { "value": 1380, "text": "23 mins" },
                        "duration_in_traffic": { "value": 1710, "text": "29 mins" },
                        "distance": { "value": 9120, "text": "9.1 km" }
                    }
                ]
            }
        ]
    }"#;

    #[test]
    fn matrix_fixture_parses() {
        let parsed: MatrixResponse = serde_json::from_str(FIXTURE).unwrap();
        assert_eq!(parsed.status, "OK");
        let element = &parsed.rows[0].elements[0];
        assert_eq!(element.status, "OK");
        assert_eq!(element.duration_in_traffic.as_ref().unwrap().value, 1710);
        assert_eq!(element.distance.as_ref().unwrap().value, 9120);
    }

    #[test]
    fn element_without_traffic_duration_parses() {
        let parsed: MatrixResponse = serde_json::from_str(
            r#"{"status":"OK","rows":[{"elements":[{"status":"OK","duration":{"value":900},"distance":{"value":4000}}]}]}"#,
        )
        .unwrap();
        let element = &parsed.rows[0].elements[0];
        assert!(element.duration_in_traffic.is_none());
        assert_eq!(element.duration.as_ref().unwrap().value, 900);
    }

    #[test]
    fn traffic_model_params() {
        assert_eq!(traffic_model_param(TrafficModel::Pessimistic), "pessimistic");
        assert_eq!(traffic_model_param(TrafficModel::BestGuess), "best_guess");
        assert_eq!(traffic_model_param(TrafficModel::Optimistic), "optimistic");
    }
}
