//! Shared fixtures: in-memory cache store, scripted route providers and
//! entity builders. No test in this suite touches a network or a database.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use dispatch::clients::{Client, ClientSource};
use dispatch::config::Settings;
use dispatch::geocodes::{Geocode, GeocodePrecision, GeocodeSource, Point, haversine_distance_meters};
use dispatch::routing::{RouteError, RouteLeg, RouteProvider};
use dispatch::technicians::{Technician, TransportMode};
use dispatch::travel_time::{EntityKind, TimeBucket, TrafficModel, TravelMode, TravelTimeEntry};
use dispatch::travel_time_cache::CacheStore;

pub fn test_settings() -> Settings {
    Settings {
        database_url: "postgres://unused".to_string(),
        expected_project_name: "dispatch-test".to_string(),
        bind_address: "127.0.0.1".to_string(),
        port: 0,
        google_api_key: None,
        crm_base_url: None,
        crm_api_token: None,
        max_travel_minutes: 30,
        peak_bucket_name: "weekday_2to8".to_string(),
        peak_sample_times: TimeBucket::parse_sample_times("14:30,16:30,18:30"),
        traffic_model: TrafficModel::Pessimistic,
        travel_time_ttl_days: 14,
        provider_concurrency: 5,
        geocode_spacing_ms: 0,
        scheduler_enabled: false,
        scheduler_cron_local: None,
        utc_offset: FixedOffset::east_opt(0).unwrap(),
    }
}

pub fn rooftop_geocode(lat: f64, lng: f64) -> Geocode {
    Geocode {
        point: Point::new(lat, lng),
        precision: GeocodePrecision::Rooftop,
        confidence: 1.0,
        source: GeocodeSource::FullAddress,
        address_used: None,
        updated_at: Utc::now(),
    }
}

pub fn approximate_geocode(lat: f64, lng: f64) -> Geocode {
    Geocode {
        point: Point::new(lat, lng),
        precision: GeocodePrecision::Approximate,
        confidence: 0.3,
        source: GeocodeSource::CityState,
        address_used: None,
        updated_at: Utc::now(),
    }
}

pub fn client_at(name: &str, lat: f64, lng: f64) -> Client {
    let mut client = Client::new(name.to_string(), ClientSource::CrmImport);
    client.geocode = Some(rooftop_geocode(lat, lng));
    client
}

pub fn technician_at(name: &str, lat: f64, lng: f64, mode: TransportMode) -> Technician {
    let mut technician = Technician::new(name.to_string(), mode);
    technician.zip_code = Some("11201".to_string());
    technician.geocode = Some(rooftop_geocode(lat, lng));
    technician
}

type Key = (String, String, EntityKind, EntityKind, TravelMode, String);

/// HashMap-backed stand-in for the travel_time_cache table.
#[derive(Default)]
pub struct InMemoryStore {
    rows: Mutex<HashMap<Key, TravelTimeEntry>>,
}

impl InMemoryStore {
    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl CacheStore for InMemoryStore {
    async fn find(
        &self,
        origin_hash: &str,
        dest_hash: &str,
        origin_kind: EntityKind,
        dest_kind: EntityKind,
        mode: TravelMode,
        bucket: &str,
    ) -> anyhow::Result<Option<TravelTimeEntry>> {
        let key = (
            origin_hash.to_string(),
            dest_hash.to_string(),
            origin_kind,
            dest_kind,
            mode,
            bucket.to_string(),
        );
        Ok(self.rows.lock().unwrap().get(&key).cloned())
    }

    async fn upsert(&self, entry: TravelTimeEntry) -> anyhow::Result<()> {
        let key = (
            entry.origin_hash.clone(),
            entry.dest_hash.clone(),
            entry.origin_type,
            entry.dest_type,
            entry.mode,
            entry.bucket.clone(),
        );
        self.rows.lock().unwrap().insert(key, entry);
        Ok(())
    }

    async fn invalidate_hash(&self, hash: &str) -> anyhow::Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|k, _| k.0 != hash && k.1 != hash);
        Ok((before - rows.len()) as u64)
    }

    async fn invalidate_entity_hash(&self, kind: EntityKind, hash: &str) -> anyhow::Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|k, _| !((k.0 == hash && k.2 == kind) || (k.1 == hash && k.3 == kind)));
        Ok((before - rows.len()) as u64)
    }
}

/// Live provider with one fixed duration per mode, counting every call.
pub struct CountingProvider {
    pub driving_sec: u32,
    pub transit_sec: u32,
    calls: AtomicU32,
}

impl CountingProvider {
    pub fn new(driving_sec: u32, transit_sec: u32) -> Self {
        Self {
            driving_sec,
            transit_sec,
            calls: AtomicU32::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RouteProvider for CountingProvider {
    async fn route(
        &self,
        _origin: Point,
        _dest: Point,
        mode: TravelMode,
        _departure: DateTime<Utc>,
        _traffic: TrafficModel,
    ) -> Result<RouteLeg, RouteError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let duration_sec = match mode {
            TravelMode::Driving => self.driving_sec,
            TravelMode::Transit => self.transit_sec,
        };
        Ok(RouteLeg {
            duration_sec,
            distance_meters: Some(duration_sec * 10),
        })
    }

    fn is_live(&self) -> bool {
        true
    }
}

/// Live provider whose durations scale with straight-line distance, so
/// geography decides candidate ordering.
pub struct DistanceProvider;

#[async_trait]
impl RouteProvider for DistanceProvider {
    async fn route(
        &self,
        origin: Point,
        dest: Point,
        mode: TravelMode,
        _departure: DateTime<Utc>,
        _traffic: TrafficModel,
    ) -> Result<RouteLeg, RouteError> {
        let distance = haversine_distance_meters(origin, dest);
        let speed = match mode {
            TravelMode::Driving => 11.0,
            TravelMode::Transit => 7.0,
        };
        Ok(RouteLeg {
            duration_sec: (distance / speed).round() as u32,
            distance_meters: Some(distance.round() as u32),
        })
    }

    fn is_live(&self) -> bool {
        true
    }
}
