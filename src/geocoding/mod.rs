//! Geocoding service: address text in, coordinate + precision + confidence
//! out.
//!
//! The service wraps a provider backend behind a trait so the live Google
//! endpoint and the error-returning unconfigured variant are
//! interchangeable at construction time. Requests are spaced ~100 ms apart,
//! retried with exponential backoff, and short-circuited after a run of
//! consecutive provider failures.

mod google;

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::addresses::{self, GeocodeMethod, NormalizedAddress};
use crate::areas;
use crate::config::Settings;
use crate::geocodes::{
    Geocode, GeocodePrecision, GeocodeSource, Point, confidence_for,
};

pub use google::GoogleGeocodeBackend;

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("geocoding provider credential is not configured")]
    NoApiKey,
    #[error("geocoding provider over query limit")]
    OverQueryLimit,
    #[error("no geocoding results for {0:?}")]
    ZeroResults(String),
    #[error("geocoding provider transient failure: {0}")]
    Transient(String),
    #[error("geocoding provider error: {0}")]
    Provider(String),
    #[error("geocoder suspended after repeated provider failures")]
    CircuitOpen,
}

impl GeocodeError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GeocodeError::OverQueryLimit | GeocodeError::Transient(_)
        )
    }
}

/// Structured component filter sent alongside the address text to pin the
/// provider to a postal code / state / locality combination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentFilter {
    pub postal_code: Option<String>,
    pub administrative_area: Option<String>,
    pub locality: Option<String>,
    pub country: Option<String>,
}

impl ComponentFilter {
    pub fn is_empty(&self) -> bool {
        self.postal_code.is_none()
            && self.administrative_area.is_none()
            && self.locality.is_none()
            && self.country.is_none()
    }
}

/// Raw provider hit before precision/confidence interpretation.
#[derive(Debug, Clone)]
pub struct ProviderHit {
    pub point: Point,
    /// Provider location type string, e.g. "ROOFTOP". Mapped verbatim.
    pub location_type: String,
    pub formatted_address: Option<String>,
}

#[async_trait]
pub trait GeocodeBackend: Send + Sync {
    async fn lookup(
        &self,
        address: &str,
        components: Option<&ComponentFilter>,
    ) -> Result<ProviderHit, GeocodeError>;
}

/// Backend used when no provider credential is configured. Every lookup
/// fails fast with a non-retryable error; nothing is ever fabricated.
pub struct UnconfiguredBackend;

#[async_trait]
impl GeocodeBackend for UnconfiguredBackend {
    async fn lookup(
        &self,
        _address: &str,
        _components: Option<&ComponentFilter>,
    ) -> Result<ProviderHit, GeocodeError> {
        Err(GeocodeError::NoApiKey)
    }
}

const MAX_RETRIES: u32 = 3;
const FAILURE_THRESHOLD: u32 = 5;

#[derive(Clone)]
pub struct Geocoder {
    backend: Arc<dyn GeocodeBackend>,
    min_spacing: Duration,
    last_request: Arc<Mutex<Option<Instant>>>,
    consecutive_failures: Arc<AtomicU32>,
}

impl Geocoder {
    pub fn new(backend: Arc<dyn GeocodeBackend>, min_spacing: Duration) -> Self {
        Self {
            backend,
            min_spacing,
            last_request: Arc::new(Mutex::new(None)),
            consecutive_failures: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Build from settings: live Google backend when a key is configured,
    /// the unconfigured backend otherwise.
    pub fn from_settings(settings: &Settings) -> Self {
        let backend: Arc<dyn GeocodeBackend> = match settings.google_api_key.as_deref() {
            Some(key) => {
                debug!("Geocoder using Google backend");
                Arc::new(GoogleGeocodeBackend::new(key))
            }
            None => {
                warn!("GOOGLE_MAPS_API_KEY not set, geocoding unavailable");
                Arc::new(UnconfiguredBackend)
            }
        };
        Self::new(backend, Duration::from_millis(settings.geocode_spacing_ms))
    }

    /// Minimum spacing between provider requests.
    async fn enforce_spacing(&self) {
        let mut last_request = self.last_request.lock().await;
        if let Some(last) = *last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_spacing {
                tokio::time::sleep(self.min_spacing - elapsed).await;
            }
        }
        *last_request = Some(Instant::now());
    }

    /// Geocode raw address text, normalizing internally.
    pub async fn geocode_text(&self, text: &str) -> Result<Geocode, GeocodeError> {
        let normalized = addresses::normalize(text);
        self.geocode(&normalized).await
    }

    /// Geocode a normalized address.
    pub async fn geocode(&self, addr: &NormalizedAddress) -> Result<Geocode, GeocodeError> {
        if addr.is_empty() {
            return Err(GeocodeError::ZeroResults(addr.raw.clone()));
        }
        if self.consecutive_failures.load(Ordering::Relaxed) >= FAILURE_THRESHOLD {
            return Err(GeocodeError::CircuitOpen);
        }

        let components = component_filter(addr);
        let mut last_error = GeocodeError::Provider("no attempts made".to_string());

        for attempt in 0..=MAX_RETRIES {
            self.enforce_spacing().await;
            metrics::counter!("geocoding.provider.requests").increment(1);

            match self
                .backend
                .lookup(&addr.canonical_string, components.as_ref())
                .await
            {
                Ok(hit) => {
                    self.consecutive_failures.store(0, Ordering::Relaxed);
                    return Ok(self.interpret(addr, hit));
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        "Geocoding attempt {} failed for {:?}: {}",
                        attempt + 1,
                        addr.canonical_string,
                        e
                    );
                    last_error = e;
                    if attempt < MAX_RETRIES {
                        let delay = Duration::from_millis(1000 * 2_u64.pow(attempt));
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(e) => {
                    // Zero results and credential problems are answers, not
                    // provider outages; they do not trip the breaker.
                    return Err(e);
                }
            }
        }

        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("geocoding.provider.exhausted_retries").increment(1);
        Err(last_error)
    }

    fn interpret(&self, addr: &NormalizedAddress, hit: ProviderHit) -> Geocode {
        let precision = GeocodePrecision::parse(&hit.location_type).unwrap_or_else(|| {
            warn!(
                "Unknown provider location type {:?}, treating as APPROXIMATE",
                hit.location_type
            );
            GeocodePrecision::Approximate
        });
        let confidence = confidence_for(precision, addr.method, addr.quality);
        Geocode {
            point: hit.point,
            precision,
            confidence,
            source: GeocodeSource::from_method(addr.method),
            address_used: Some(addr.canonical_string.clone()),
            updated_at: chrono::Utc::now(),
        }
    }
}

/// Decide which structured component filter, if any, to send.
///
/// When ZIP and state are both known and the city is a recognized major
/// urban subdivision, the full filter disambiguates same-ZIP sub-areas.
/// ZIP-only queries are at least pinned to the US.
fn component_filter(addr: &NormalizedAddress) -> Option<ComponentFilter> {
    if let (Some(zip), Some(state)) = (addr.zip.as_deref(), addr.state.as_deref())
        && let Some(city) = addr.city.as_deref()
        && areas::is_major_subdivision(city)
    {
        return Some(ComponentFilter {
            postal_code: Some(zip.to_string()),
            administrative_area: Some(state.to_string()),
            locality: Some(city.to_string()),
            country: Some("US".to_string()),
        });
    }
    if addr.method == GeocodeMethod::ZipOnly {
        return Some(ComponentFilter {
            country: Some("US".to_string()),
            ..ComponentFilter::default()
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addresses::normalize;

    struct FixtureBackend {
        location_type: &'static str,
        calls: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl GeocodeBackend for FixtureBackend {
        async fn lookup(
            &self,
            _address: &str,
            _components: Option<&ComponentFilter>,
        ) -> Result<ProviderHit, GeocodeError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(ProviderHit {
                point: Point::new(40.6782, -73.9442),
                location_type: self.location_type.to_string(),
                formatted_address: Some("Brooklyn, NY, USA".to_string()),
            })
        }
    }

    fn fixture_geocoder(location_type: &'static str) -> Geocoder {
        Geocoder::new(
            Arc::new(FixtureBackend {
                location_type,
                calls: AtomicU32::new(0),
            }),
            Duration::from_millis(0),
        )
    }

    #[tokio::test]
    async fn stable_precision_and_confidence_under_fixture() {
        let geocoder = fixture_geocoder("ROOFTOP");
        let addr = normalize("123 Main St, Brooklyn, NY 11201");
        let first = geocoder.geocode(&addr).await.unwrap();
        let second = geocoder.geocode(&addr).await.unwrap();
        assert_eq!(first.precision, GeocodePrecision::Rooftop);
        assert_eq!(first.confidence, 1.0);
        assert_eq!(first.precision, second.precision);
        assert_eq!(first.confidence, second.confidence);
        assert_eq!(first.source, GeocodeSource::FullAddress);
    }

    #[tokio::test]
    async fn unknown_location_type_maps_to_approximate() {
        let geocoder = fixture_geocoder("SOMETHING_NEW");
        let g = geocoder.geocode(&normalize("Brooklyn, NY")).await.unwrap();
        assert_eq!(g.precision, GeocodePrecision::Approximate);
    }

    #[tokio::test]
    async fn empty_address_is_zero_results() {
        let geocoder = fixture_geocoder("ROOFTOP");
        let err = geocoder.geocode(&normalize("  ")).await.unwrap_err();
        assert!(matches!(err, GeocodeError::ZeroResults(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn unconfigured_backend_fails_fast() {
        let geocoder = Geocoder::new(Arc::new(UnconfiguredBackend), Duration::from_millis(0));
        let err = geocoder
            .geocode(&normalize("123 Main St, Brooklyn, NY 11201"))
            .await
            .unwrap_err();
        assert!(matches!(err, GeocodeError::NoApiKey));
        assert!(!err.is_retryable());
    }

    #[test]
    fn component_filter_for_known_subdivision() {
        let addr = normalize("123 Main St, Brooklyn, NY 11201");
        let filter = component_filter(&addr).unwrap();
        assert_eq!(filter.postal_code.as_deref(), Some("11201"));
        assert_eq!(filter.administrative_area.as_deref(), Some("NY"));
        assert_eq!(filter.locality.as_deref(), Some("Brooklyn"));
        assert_eq!(filter.country.as_deref(), Some("US"));
    }

    #[test]
    fn component_filter_zip_only_restricts_country() {
        let addr = normalize("11201");
        let filter = component_filter(&addr).unwrap();
        assert_eq!(filter.country.as_deref(), Some("US"));
        assert!(filter.postal_code.is_none());
    }

    #[test]
    fn no_component_filter_for_plain_city_state() {
        let addr = normalize("Poughkeepsie, NY");
        assert!(component_filter(&addr).is_none());
    }
}
