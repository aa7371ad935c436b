//! Google Geocoding API backend.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::geocodes::Point;

use super::{ComponentFilter, GeocodeBackend, GeocodeError, ProviderHit};

const DEFAULT_BASE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    results: Vec<GeocodeResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
    #[serde(default)]
    formatted_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
    location_type: String,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

pub struct GoogleGeocodeBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GoogleGeocodeBackend {
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

    #[cfg(test)]
    fn with_base_url(api_key: &str, base_url: String) -> Self {
        let mut backend = Self::new(api_key);
        backend.base_url = base_url;
        backend
    }
}

/// Render the component filter in the provider's `a:b|c:d` form.
fn components_param(filter: &ComponentFilter) -> String {
    let mut parts = Vec::new();
    if let Some(ref zip) = filter.postal_code {
        parts.push(format!("postal_code:{zip}"));
    }
    if let Some(ref area) = filter.administrative_area {
        parts.push(format!("administrative_area:{area}"));
    }
    if let Some(ref locality) = filter.locality {
        parts.push(format!("locality:{locality}"));
    }
    if let Some(ref country) = filter.country {
        parts.push(format!("country:{country}"));
    }
    parts.join("|")
}

#[async_trait]
impl GeocodeBackend for GoogleGeocodeBackend {
    async fn lookup(
        &self,
        address: &str,
        components: Option<&ComponentFilter>,
    ) -> Result<ProviderHit, GeocodeError> {
        debug!("Geocoding address with Google: {}", address);

        let mut params: Vec<(&str, String)> = vec![
            ("address", address.to_string()),
            ("key", self.api_key.clone()),
        ];
        if let Some(filter) = components
            && !filter.is_empty()
        {
            params.push(("components", components_param(filter)));
        }

        let response = self
            .client
            .get(&self.base_url)
            .query(&params)
            .send()
            .await
            .map_err(|e| GeocodeError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(GeocodeError::Transient(format!(
                "provider returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(GeocodeError::Provider(format!(
                "provider returned {status}"
            )));
        }

        let body: GeocodeResponse = response
            .json()
            .await
            .map_err(|e| GeocodeError::Transient(format!("bad response body: {e}")))?;

        match body.status.as_str() {
            "OK" => {}
            "ZERO_RESULTS" => return Err(GeocodeError::ZeroResults(address.to_string())),
            "OVER_QUERY_LIMIT" => return Err(GeocodeError::OverQueryLimit),
            "REQUEST_DENIED" | "INVALID_REQUEST" => {
                return Err(GeocodeError::Provider(
                    body.error_message
                        .unwrap_or_else(|| body.status.clone()),
                ));
            }
            other => {
                return Err(GeocodeError::Transient(format!(
                    "provider status {other}"
                )));
            }
        }

        let result = body
            .results
            .into_iter()
            .next()
            .ok_or_else(|| GeocodeError::ZeroResults(address.to_string()))?;

        let point = Point::new(result.geometry.location.lat, result.geometry.location.lng);
        if !point.is_valid() {
            return Err(GeocodeError::Provider(format!(
                "provider returned out-of-range coordinate ({}, {})",
                point.latitude, point.longitude
            )));
        }

        Ok(ProviderHit {
            point,
            location_type: result.geometry.location_type,
            formatted_address: result.formatted_address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
        "status": "OK",
        "results": [
            {
                "formatted_address": "123 Main St, Brooklyn, NY 11201, USA",
                "geometry": {
                    "location": { "lat": 40.6928, "lng": -73.9903 },
                    "location_type": "ROOFTOP"
                }
            }
        ]
    }"#;

    #[test]
    fn response_fixture_parses() {
        let parsed: GeocodeResponse = serde_json::from_str(FIXTURE).unwrap();
        assert_eq!(parsed.status, "OK");
        assert_eq!(parsed.results.len(), 1);
        let geometry = &parsed.results[0].geometry;
        assert_eq!(geometry.location_type, "ROOFTOP");
        assert!((geometry.location.lat - 40.6928).abs() < 1e-9);
    }

    #[test]
    fn zero_results_fixture_parses_without_results() {
        let parsed: GeocodeResponse =
            serde_json::from_str(r#"{"status": "ZERO_RESULTS", "results": []}"#).unwrap();
        assert_eq!(parsed.status, "ZERO_RESULTS");
        assert!(parsed.results.is_empty());
    }

    #[test]
    fn components_param_renders_pipe_separated() {
        let filter = ComponentFilter {
            postal_code: Some("11201".to_string()),
            administrative_area: Some("NY".to_string()),
            locality: Some("Brooklyn".to_string()),
            country: Some("US".to_string()),
        };
        assert_eq!(
            components_param(&filter),
            "postal_code:11201|administrative_area:NY|locality:Brooklyn|country:US"
        );
    }

    #[test]
    fn backend_construction_overrides_base_url() {
        let backend = GoogleGeocodeBackend::with_base_url("k", "http://localhost:1".to_string());
        assert_eq!(backend.base_url, "http://localhost:1");
    }
}
