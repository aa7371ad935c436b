//! Travel-time cache service.
//!
//! Lookup order: fresh cache row (active bucket, then legacy bucket names),
//! otherwise sample the routing provider once per configured departure time
//! and persist the aggregate. When only the offline estimator is available
//! the estimate is returned but never persisted.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, FixedOffset, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::geocodes::Point;
use crate::routing::{RouteError, RouteProvider};
use crate::travel_time::{
    EntityKind, LEGACY_BUCKET_NAMES, RouteSample, TimeBucket, TravelMode, TravelTimeEntry,
    TravelTimeStats, coord_hash, next_sample_departures,
};
use crate::travel_time_repo::TravelTimeRepository;

#[derive(Debug, Error)]
pub enum TravelTimeError {
    /// Provider quota is gone; the caller should stop issuing external
    /// queries for the rest of its run.
    #[error("routing provider quota exhausted")]
    Quota,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Persistence interface for cache rows. The diesel repository is the live
/// implementation; tests swap in an in-memory map.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn find(
        &self,
        origin_hash: &str,
        dest_hash: &str,
        origin_kind: EntityKind,
        dest_kind: EntityKind,
        mode: TravelMode,
        bucket: &str,
    ) -> anyhow::Result<Option<TravelTimeEntry>>;

    async fn upsert(&self, entry: TravelTimeEntry) -> anyhow::Result<()>;

    async fn invalidate_hash(&self, hash: &str) -> anyhow::Result<u64>;

    async fn invalidate_entity_hash(&self, kind: EntityKind, hash: &str) -> anyhow::Result<u64>;
}

#[async_trait]
impl CacheStore for TravelTimeRepository {
    async fn find(
        &self,
        origin_hash: &str,
        dest_hash: &str,
        origin_kind: EntityKind,
        dest_kind: EntityKind,
        mode: TravelMode,
        bucket: &str,
    ) -> anyhow::Result<Option<TravelTimeEntry>> {
        TravelTimeRepository::find(self, origin_hash, dest_hash, origin_kind, dest_kind, mode, bucket)
            .await
    }

    async fn upsert(&self, entry: TravelTimeEntry) -> anyhow::Result<()> {
        TravelTimeRepository::upsert(self, entry).await
    }

    async fn invalidate_hash(&self, hash: &str) -> anyhow::Result<u64> {
        TravelTimeRepository::invalidate_hash(self, hash).await
    }

    async fn invalidate_entity_hash(&self, kind: EntityKind, hash: &str) -> anyhow::Result<u64> {
        TravelTimeRepository::invalidate_entity_hash(self, kind, hash).await
    }
}

/// Result of one lookup, including how it was satisfied so the matcher can
/// account for provider calls and cache hits.
#[derive(Debug, Clone)]
pub struct TravelTimeOutcome {
    pub stats: TravelTimeStats,
    pub mode: TravelMode,
    pub bucket: String,
    pub sample_durations: Vec<u32>,
    pub from_cache: bool,
    /// True when the figure came from the offline estimator.
    pub estimated: bool,
    pub api_calls: u32,
}

#[derive(Clone)]
pub struct TravelTimeService {
    store: Arc<dyn CacheStore>,
    provider: Arc<dyn RouteProvider>,
    bucket: TimeBucket,
    ttl: ChronoDuration,
    utc_offset: FixedOffset,
    /// Global in-flight cap for provider calls. Waiters queue FIFO so burst
    /// load cannot exhaust the provider quota.
    gate: Arc<Semaphore>,
}

impl TravelTimeService {
    pub fn new(
        store: Arc<dyn CacheStore>,
        provider: Arc<dyn RouteProvider>,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            provider,
            bucket: settings.peak_bucket(),
            ttl: ChronoDuration::days(settings.travel_time_ttl_days),
            utc_offset: settings.utc_offset,
            gate: Arc::new(Semaphore::new(settings.provider_concurrency)),
        }
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket.name
    }

    /// Fetch or compute the travel time between two points.
    ///
    /// `Ok(None)` means no figure could be produced (all samples failed, or
    /// the offline estimator declined); the pair simply yields no candidate.
    pub async fn travel_time(
        &self,
        origin: Point,
        origin_kind: EntityKind,
        dest: Point,
        dest_kind: EntityKind,
        mode: TravelMode,
    ) -> Result<Option<TravelTimeOutcome>, TravelTimeError> {
        let origin_hash = coord_hash(origin);
        let dest_hash = coord_hash(dest);
        let now = Utc::now();

        // Active bucket first, then legacy names so renames do not
        // cold-start the cache.
        let mut bucket_names = vec![self.bucket.name.as_str()];
        bucket_names.extend(LEGACY_BUCKET_NAMES.iter().copied());
        for name in bucket_names {
            let found = self
                .store
                .find(&origin_hash, &dest_hash, origin_kind, dest_kind, mode, name)
                .await?;
            if let Some(entry) = found
                && entry.is_fresh(now)
            {
                metrics::counter!("travel_time.cache.hit").increment(1);
                return Ok(Some(TravelTimeOutcome {
                    stats: entry.stats,
                    mode,
                    bucket: entry.bucket,
                    sample_durations: entry.sample_durations,
                    from_cache: true,
                    estimated: false,
                    api_calls: 0,
                }));
            }
        }
        metrics::counter!("travel_time.cache.miss").increment(1);

        if !self.provider.is_live() {
            return Ok(self.estimate_offline(origin, dest, mode).await);
        }

        let departures = next_sample_departures(now, self.utc_offset, &self.bucket.sample_times);
        let mut samples: Vec<RouteSample> = Vec::with_capacity(departures.len());
        let mut api_calls = 0u32;

        for departure in departures {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| TravelTimeError::Other(anyhow::anyhow!("provider gate closed")))?;
            api_calls += 1;
            metrics::counter!("travel_time.provider.requests").increment(1);

            match self
                .provider
                .route(origin, dest, mode, departure, self.bucket.traffic_model)
                .await
            {
                Ok(leg) => samples.push(RouteSample {
                    departure,
                    duration_sec: leg.duration_sec,
                    distance_meters: leg.distance_meters,
                }),
                Err(RouteError::QuotaExhausted) => {
                    metrics::counter!("travel_time.provider.quota_exhausted").increment(1);
                    return Err(TravelTimeError::Quota);
                }
                Err(e) => {
                    warn!(
                        "Travel time sample failed ({} -> {}, {} at {}): {}",
                        origin_hash,
                        dest_hash,
                        mode.as_str(),
                        departure,
                        e
                    );
                }
            }
        }

        let Some(entry) = TravelTimeEntry::from_samples(
            origin,
            dest,
            origin_kind,
            dest_kind,
            mode,
            &self.bucket.name,
            &samples,
            self.ttl,
        ) else {
            return Ok(None);
        };

        self.store.upsert(entry.clone()).await?;
        debug!(
            "Cached travel time {} -> {} ({}): pessimistic {}s over {} samples",
            entry.origin_hash,
            entry.dest_hash,
            mode.as_str(),
            entry.stats.duration_sec_pessimistic,
            entry.sample_durations.len()
        );

        Ok(Some(TravelTimeOutcome {
            stats: entry.stats,
            mode,
            bucket: entry.bucket,
            sample_durations: entry.sample_durations,
            from_cache: false,
            estimated: false,
            api_calls,
        }))
    }

    /// Offline estimate, computed but never persisted.
    async fn estimate_offline(
        &self,
        origin: Point,
        dest: Point,
        mode: TravelMode,
    ) -> Option<TravelTimeOutcome> {
        match self
            .provider
            .route(origin, dest, mode, Utc::now(), self.bucket.traffic_model)
            .await
        {
            Ok(leg) => Some(TravelTimeOutcome {
                stats: TravelTimeStats {
                    duration_sec_avg: leg.duration_sec,
                    duration_sec_median: leg.duration_sec,
                    duration_sec_pessimistic: leg.duration_sec,
                    distance_meters: leg.distance_meters,
                },
                mode,
                bucket: self.bucket.name.clone(),
                sample_durations: vec![leg.duration_sec],
                from_cache: false,
                estimated: true,
                api_calls: 0,
            }),
            Err(e) => {
                warn!("Offline travel-time estimate failed: {e}");
                None
            }
        }
    }

    /// Invalidate every cache row touching an entity's coordinate, in both
    /// origin and destination roles.
    pub async fn invalidate_for_entity(
        &self,
        kind: EntityKind,
        point: Point,
    ) -> Result<u64, TravelTimeError> {
        let hash = coord_hash(point);
        let deleted = self.store.invalidate_entity_hash(kind, &hash).await?;
        if deleted > 0 {
            debug!("Invalidated {deleted} travel-time rows for {} {hash}", kind.as_str());
        }
        Ok(deleted)
    }

    /// Invalidate by hash alone, for bulk location edits with no entity id.
    pub async fn invalidate_for_point(&self, point: Point) -> Result<u64, TravelTimeError> {
        let hash = coord_hash(point);
        Ok(self.store.invalidate_hash(&hash).await?)
    }
}

#[cfg(test)]
pub mod testing {
    //! In-memory store and counting provider for cache tests.

    use super::*;
    use chrono::{DateTime, Utc};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::travel_time::TrafficModel;

    type Key = (String, String, EntityKind, EntityKind, TravelMode, String);

    #[derive(Default)]
    pub struct InMemoryStore {
        rows: Mutex<HashMap<Key, TravelTimeEntry>>,
    }

    impl InMemoryStore {
        pub fn len(&self) -> usize {
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

        async fn invalidate_entity_hash(
            &self,
            kind: EntityKind,
            hash: &str,
        ) -> anyhow::Result<u64> {
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|k, _| !((k.0 == hash && k.2 == kind) || (k.1 == hash && k.3 == kind)));
            Ok((before - rows.len()) as u64)
        }
    }

    /// Provider returning a fixed duration per mode, counting calls.
    pub struct FixedProvider {
        pub driving_sec: u32,
        pub transit_sec: u32,
        pub calls: AtomicU32,
        pub live: bool,
    }

    impl FixedProvider {
        pub fn new(driving_sec: u32, transit_sec: u32) -> Self {
            Self {
                driving_sec,
                transit_sec,
                calls: AtomicU32::new(0),
                live: true,
            }
        }

        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::Relaxed)
        }
    }

    #[async_trait]
    impl RouteProvider for FixedProvider {
        async fn route(
            &self,
            _origin: Point,
            _dest: Point,
            mode: TravelMode,
            _departure: DateTime<Utc>,
            _traffic: TrafficModel,
        ) -> Result<crate::routing::RouteLeg, RouteError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let duration_sec = match mode {
                TravelMode::Driving => self.driving_sec,
                TravelMode::Transit => self.transit_sec,
            };
            Ok(crate::routing::RouteLeg {
                duration_sec,
                distance_meters: Some(duration_sec * 10),
            })
        }

        fn is_live(&self) -> bool {
            self.live
        }
    }

    /// Provider that always reports quota exhaustion.
    pub struct QuotaProvider;

    #[async_trait]
    impl RouteProvider for QuotaProvider {
        async fn route(
            &self,
            _origin: Point,
            _dest: Point,
            _mode: TravelMode,
            _departure: DateTime<Utc>,
            _traffic: TrafficModel,
        ) -> Result<crate::routing::RouteLeg, RouteError> {
            Err(RouteError::QuotaExhausted)
        }

        fn is_live(&self) -> bool {
            true
        }
    }
}
