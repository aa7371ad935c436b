//! CRM source: the external canonical system clients are synced from.
//!
//! Two implementations: the HTTP export client and an error-returning
//! unconfigured variant, chosen at startup. The sync logic only sees the
//! trait.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::Settings;

/// One active client as exported by the CRM.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrmClientRecord {
    pub crm_id: String,
    pub name: String,
    #[serde(default)]
    pub address_line: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    /// Service-area label, e.g. a borough.
    #[serde(default)]
    pub area_label: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CrmExportResponse {
    clients: Vec<CrmClientRecord>,
}

#[async_trait]
pub trait CrmSource: Send + Sync {
    async fn fetch_active_clients(&self) -> Result<Vec<CrmClientRecord>>;
}

pub struct HttpCrmSource {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpCrmSource {
    pub fn new(base_url: &str, api_token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        }
    }

    /// Pick the configured source from settings.
    pub fn from_settings(settings: &Settings) -> Box<dyn CrmSource> {
        match settings.crm_base_url.as_deref() {
            Some(base_url) => Box::new(Self::new(base_url, settings.crm_api_token.clone())),
            None => Box::new(UnconfiguredCrmSource),
        }
    }
}

#[async_trait]
impl CrmSource for HttpCrmSource {
    async fn fetch_active_clients(&self) -> Result<Vec<CrmClientRecord>> {
        let url = format!("{}/clients/active", self.base_url);
        debug!("Fetching active clients from {url}");

        let mut request = self.client.get(&url);
        if let Some(ref token) = self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| anyhow!("CRM request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(anyhow!("CRM returned {}", response.status()));
        }

        let body: CrmExportResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("CRM response did not parse: {e}"))?;

        debug!("CRM returned {} active clients", body.clients.len());
        Ok(body.clients)
    }
}

/// Used when no CRM endpoint is configured; every sync attempt fails with a
/// clear message and the rest of the system keeps serving the last
/// successful snapshot.
pub struct UnconfiguredCrmSource;

#[async_trait]
impl CrmSource for UnconfiguredCrmSource {
    async fn fetch_active_clients(&self) -> Result<Vec<CrmClientRecord>> {
        Err(anyhow!("CRM_BASE_URL is not configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_fixture_parses() {
        let body = r#"{
            "clients": [
                {
                    "crmId": "CRM-001",
                    "name": "A. Client",
                    "addressLine": "123 Main St",
                    "city": "Brooklyn",
                    "state": "NY",
                    "zip": "11201",
                    "areaLabel": "Brooklyn",
                    "latitude": 40.6928,
                    "longitude": -73.9903
                },
                { "crmId": "CRM-002", "name": "B. Client" }
            ]
        }"#;
        let parsed: CrmExportResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.clients.len(), 2);
        assert_eq!(parsed.clients[0].crm_id, "CRM-001");
        assert_eq!(parsed.clients[0].latitude, Some(40.6928));
        assert!(parsed.clients[1].address_line.is_none());
    }

    #[tokio::test]
    async fn unconfigured_source_errors() {
        let err = UnconfiguredCrmSource
            .fetch_active_clients()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("CRM_BASE_URL"));
    }
}
