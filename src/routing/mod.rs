//! Travel-time providers.
//!
//! Two interchangeable implementations sit behind `RouteProvider`: the live
//! Google Distance Matrix backend and an offline Haversine estimator used
//! when no credential is configured. Estimates from the offline provider are
//! never persisted to the cache.

mod google;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::geocodes::{Point, haversine_distance_meters};
use crate::travel_time::{TrafficModel, TravelMode};

pub use google::GoogleDistanceBackend;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("routing provider credential is not configured")]
    NotConfigured,
    #[error("routing provider quota exhausted")]
    QuotaExhausted,
    #[error("no route between the given points")]
    NoRoute,
    #[error("routing provider transient failure: {0}")]
    Transient(String),
    #[error("routing provider error: {0}")]
    Provider(String),
}

/// One routed leg at a specific departure time.
#[derive(Debug, Clone, Copy)]
pub struct RouteLeg {
    pub duration_sec: u32,
    pub distance_meters: Option<u32>,
}

#[async_trait]
pub trait RouteProvider: Send + Sync {
    async fn route(
        &self,
        origin: Point,
        dest: Point,
        mode: TravelMode,
        departure: DateTime<Utc>,
        traffic: TrafficModel,
    ) -> Result<RouteLeg, RouteError>;

    /// Whether results come from a live provider. Offline estimates are
    /// returned to callers but never written to the cache.
    fn is_live(&self) -> bool;
}

/// Offline estimator: great-circle distance over a mode-specific average
/// speed. Traffic model and departure time are ignored.
pub struct HaversineEstimator;

#[async_trait]
impl RouteProvider for HaversineEstimator {
    async fn route(
        &self,
        origin: Point,
        dest: Point,
        mode: TravelMode,
        _departure: DateTime<Utc>,
        _traffic: TrafficModel,
    ) -> Result<RouteLeg, RouteError> {
        let distance = haversine_distance_meters(origin, dest);
        let duration = (distance / mode.fallback_speed_mps()).round() as u32;
        Ok(RouteLeg {
            duration_sec: duration,
            distance_meters: Some(distance.round() as u32),
        })
    }

    fn is_live(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn haversine_estimator_scales_with_mode() {
        let origin = Point::new(40.70, -73.99);
        let dest = Point::new(40.75, -73.99);
        let now = Utc::now();
        let driving = HaversineEstimator
            .route(origin, dest, TravelMode::Driving, now, TrafficModel::Pessimistic)
            .await
            .unwrap();
        let transit = HaversineEstimator
            .route(origin, dest, TravelMode::Transit, now, TrafficModel::Pessimistic)
            .await
            .unwrap();
        assert!(transit.duration_sec > driving.duration_sec);
        assert_eq!(driving.distance_meters, transit.distance_meters);
        // ~5.5 km apart; driving at ~11 m/s is on the order of 500 s.
        assert!((300..1200).contains(&driving.duration_sec));
    }

    #[test]
    fn estimator_is_not_live() {
        assert!(!HaversineEstimator.is_live());
    }
}
