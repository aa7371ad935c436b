//! Travel-time domain types: transport modes, sampling buckets, coordinate
//! hashing and sample aggregation.
//!
//! Travel times are sampled at several departure times inside a peak window
//! and collapsed into a pessimistic figure the matcher budgets against.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geocodes::Point;

/// Transport mode a travel time was computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TravelMode {
    Driving,
    Transit,
}

impl TravelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TravelMode::Driving => "driving",
            TravelMode::Transit => "transit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "driving" => Some(TravelMode::Driving),
            "transit" => Some(TravelMode::Transit),
            _ => None,
        }
    }

    /// Average speed used by the offline Haversine estimator, in m/s.
    pub fn fallback_speed_mps(&self) -> f64 {
        match self {
            TravelMode::Driving => 11.0, // ~25 mph urban average
            TravelMode::Transit => 7.0,
        }
    }
}

/// Traffic model requested from the routing provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficModel {
    Pessimistic,
    BestGuess,
    Optimistic,
}

impl TrafficModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficModel::Pessimistic => "pessimistic",
            TrafficModel::BestGuess => "best_guess",
            TrafficModel::Optimistic => "optimistic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pessimistic" => Some(TrafficModel::Pessimistic),
            "best_guess" => Some(TrafficModel::BestGuess),
            "optimistic" => Some(TrafficModel::Optimistic),
            _ => None,
        }
    }
}

/// Which id space a cached endpoint belongs to. Technician and client ids
/// could otherwise collide in the hash-keyed cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Technician,
    Client,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Technician => "technician",
            EntityKind::Client => "client",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "technician" => Some(EntityKind::Technician),
            "client" => Some(EntityKind::Client),
            _ => None,
        }
    }
}

/// Cache key hash: coordinates rounded to 3 decimal places (~100 m grid).
/// Nearby addresses share cache rows, which is the point.
pub fn coord_hash(p: Point) -> String {
    format!("{:.3},{:.3}", p.latitude, p.longitude)
}

pub const DEFAULT_BUCKET_NAME: &str = "weekday_2to8";
pub const DEFAULT_SAMPLE_TIMES: &str = "14:30,16:30,18:30";

/// Bucket names that previously keyed cache rows. Tried on read after the
/// active bucket so a rename does not cold-start the cache.
pub const LEGACY_BUCKET_NAMES: [&str; 2] = ["weekday_afternoon", "weekday_peak"];

/// A sampling bucket: a named weekday time-of-day window plus the traffic
/// model its samples were requested with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeBucket {
    pub name: String,
    pub sample_times: Vec<NaiveTime>,
    pub traffic_model: TrafficModel,
}

impl TimeBucket {
    pub fn new(name: &str, sample_times: Vec<NaiveTime>, traffic_model: TrafficModel) -> Self {
        Self {
            name: name.to_string(),
            sample_times,
            traffic_model,
        }
    }

    /// Parse "14:30,16:30,18:30". Unparseable entries are dropped; an empty
    /// result falls back to the defaults.
    pub fn parse_sample_times(raw: &str) -> Vec<NaiveTime> {
        let mut times: Vec<NaiveTime> = raw
            .split(',')
            .filter_map(|t| NaiveTime::parse_from_str(t.trim(), "%H:%M").ok())
            .collect();
        if times.is_empty() {
            times = Self::parse_sample_times_strict(DEFAULT_SAMPLE_TIMES);
        }
        times.sort();
        times
    }

    fn parse_sample_times_strict(raw: &str) -> Vec<NaiveTime> {
        raw.split(',')
            .map(|t| NaiveTime::parse_from_str(t.trim(), "%H:%M").expect("default sample times"))
            .collect()
    }
}

/// Departure instants for the next sampling day: the next weekday whose last
/// configured sample time is still in the future, in the configured local
/// offset.
pub fn next_sample_departures(
    now: DateTime<Utc>,
    offset: FixedOffset,
    sample_times: &[NaiveTime],
) -> Vec<DateTime<Utc>> {
    if sample_times.is_empty() {
        return Vec::new();
    }
    let last = *sample_times.iter().max().expect("non-empty");
    let local_now = now.with_timezone(&offset);
    let mut day = local_now.date_naive();
    // Skip today if the window already closed, then land on a weekday.
    if local_now.time() >= last {
        day = day.succ_opt().expect("date overflow");
    }
    while matches!(day.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun) {
        day = day.succ_opt().expect("date overflow");
    }
    sample_times
        .iter()
        .filter_map(|t| {
            day.and_time(*t)
                .and_local_timezone(offset)
                .single()
                .map(|dt| dt.with_timezone(&Utc))
        })
        .collect()
}

/// One successful routing sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSample {
    pub departure: DateTime<Utc>,
    pub duration_sec: u32,
    pub distance_meters: Option<u32>,
}

/// Aggregated sample statistics. `pessimistic >= avg >= 0` by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TravelTimeStats {
    pub duration_sec_avg: u32,
    pub duration_sec_median: u32,
    pub duration_sec_pessimistic: u32,
    pub distance_meters: Option<u32>,
}

/// Collapse samples: mean, median, and pessimistic = max(max, median * 1.1).
/// Returns `None` when every sample failed.
pub fn aggregate_samples(samples: &[RouteSample]) -> Option<TravelTimeStats> {
    if samples.is_empty() {
        return None;
    }
    let mut durations: Vec<u32> = samples.iter().map(|s| s.duration_sec).collect();
    durations.sort_unstable();

    let sum: u64 = durations.iter().map(|d| u64::from(*d)).sum();
    let avg = (sum as f64 / durations.len() as f64).round() as u32;

    let median = if durations.len() % 2 == 1 {
        durations[durations.len() / 2]
    } else {
        let hi = durations[durations.len() / 2];
        let lo = durations[durations.len() / 2 - 1];
        ((f64::from(lo) + f64::from(hi)) / 2.0).round() as u32
    };

    let max = *durations.last().expect("non-empty");
    let padded_median = (f64::from(median) * 1.1).round() as u32;
    let pessimistic = max.max(padded_median);

    let distances: Vec<u32> = samples.iter().filter_map(|s| s.distance_meters).collect();
    let distance_meters = if distances.is_empty() {
        None
    } else {
        let dsum: u64 = distances.iter().map(|d| u64::from(*d)).sum();
        Some((dsum as f64 / distances.len() as f64).round() as u32)
    };

    Some(TravelTimeStats {
        duration_sec_avg: avg,
        duration_sec_median: median,
        duration_sec_pessimistic: pessimistic,
        distance_meters,
    })
}

/// A cached travel-time estimate between two ~100 m grid cells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TravelTimeEntry {
    pub id: Uuid,
    pub origin_hash: String,
    pub dest_hash: String,
    pub origin_type: EntityKind,
    pub dest_type: EntityKind,
    pub mode: TravelMode,
    pub bucket: String,
    pub stats: TravelTimeStats,
    pub sample_times: Vec<DateTime<Utc>>,
    pub sample_durations: Vec<u32>,
    pub computed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TravelTimeEntry {
    pub fn from_samples(
        origin: Point,
        dest: Point,
        origin_type: EntityKind,
        dest_type: EntityKind,
        mode: TravelMode,
        bucket: &str,
        samples: &[RouteSample],
        ttl: Duration,
    ) -> Option<Self> {
        let stats = aggregate_samples(samples)?;
        let now = Utc::now();
        Some(Self {
            id: Uuid::new_v4(),
            origin_hash: coord_hash(origin),
            dest_hash: coord_hash(dest),
            origin_type,
            dest_type,
            mode,
            bucket: bucket.to_string(),
            stats,
            sample_times: samples.iter().map(|s| s.departure).collect(),
            sample_durations: samples.iter().map(|s| s.duration_sec).collect(),
            computed_at: now,
            expires_at: now + ttl,
        })
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Database row for the travel-time cache table.
#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::travel_time_cache)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TravelTimeCacheModel {
    pub id: Uuid,
    pub origin_hash: String,
    pub dest_hash: String,
    pub origin_type: String,
    pub dest_type: String,
    pub mode: String,
    pub bucket: String,
    pub duration_sec_avg: i32,
    pub duration_sec_median: i32,
    pub duration_sec_pessimistic: i32,
    pub distance_meters: Option<i32>,
    pub sample_times: serde_json::Value,
    pub sample_durations: serde_json::Value,
    pub computed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<TravelTimeEntry> for TravelTimeCacheModel {
    fn from(e: TravelTimeEntry) -> Self {
        Self {
            id: e.id,
            origin_hash: e.origin_hash,
            dest_hash: e.dest_hash,
            origin_type: e.origin_type.as_str().to_string(),
            dest_type: e.dest_type.as_str().to_string(),
            mode: e.mode.as_str().to_string(),
            bucket: e.bucket,
            duration_sec_avg: e.stats.duration_sec_avg as i32,
            duration_sec_median: e.stats.duration_sec_median as i32,
            duration_sec_pessimistic: e.stats.duration_sec_pessimistic as i32,
            distance_meters: e.stats.distance_meters.map(|d| d as i32),
            sample_times: serde_json::to_value(&e.sample_times)
                .unwrap_or(serde_json::Value::Null),
            sample_durations: serde_json::to_value(&e.sample_durations)
                .unwrap_or(serde_json::Value::Null),
            computed_at: e.computed_at,
            expires_at: e.expires_at,
        }
    }
}

impl TryFrom<TravelTimeCacheModel> for TravelTimeEntry {
    type Error = anyhow::Error;

    fn try_from(m: TravelTimeCacheModel) -> Result<Self, Self::Error> {
        let origin_type = EntityKind::parse(&m.origin_type)
            .ok_or_else(|| anyhow::anyhow!("unknown origin_type {}", m.origin_type))?;
        let dest_type = EntityKind::parse(&m.dest_type)
            .ok_or_else(|| anyhow::anyhow!("unknown dest_type {}", m.dest_type))?;
        let mode = TravelMode::parse(&m.mode)
            .ok_or_else(|| anyhow::anyhow!("unknown mode {}", m.mode))?;
        let sample_times: Vec<DateTime<Utc>> =
            serde_json::from_value(m.sample_times).unwrap_or_default();
        let sample_durations: Vec<u32> =
            serde_json::from_value(m.sample_durations).unwrap_or_default();
        Ok(Self {
            id: m.id,
            origin_hash: m.origin_hash,
            dest_hash: m.dest_hash,
            origin_type,
            dest_type,
            mode,
            bucket: m.bucket,
            stats: TravelTimeStats {
                duration_sec_avg: m.duration_sec_avg.max(0) as u32,
                duration_sec_median: m.duration_sec_median.max(0) as u32,
                duration_sec_pessimistic: m.duration_sec_pessimistic.max(0) as u32,
                distance_meters: m.distance_meters.map(|d| d.max(0) as u32),
            },
            sample_times,
            sample_durations,
            computed_at: m.computed_at,
            expires_at: m.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(duration: u32, distance: Option<u32>) -> RouteSample {
        RouteSample {
            departure: Utc::now(),
            duration_sec: duration,
            distance_meters: distance,
        }
    }

    #[test]
    fn hash_rounds_to_three_decimals() {
        let h = coord_hash(Point::new(40.70012, -73.98987));
        assert_eq!(h, "40.700,-73.990");
    }

    #[test]
    fn hash_collapses_nearby_points() {
        let a = coord_hash(Point::new(40.7001, -73.9899));
        let b = coord_hash(Point::new(40.7004, -73.9901));
        assert_eq!(a, b);
    }

    #[test]
    fn aggregation_mean_median_pessimistic() {
        let stats =
            aggregate_samples(&[sample(1200, Some(8000)), sample(1500, Some(8200)), sample(1800, None)])
                .unwrap();
        assert_eq!(stats.duration_sec_avg, 1500);
        assert_eq!(stats.duration_sec_median, 1500);
        // max(1800, round(1500 * 1.1) = 1650) = 1800
        assert_eq!(stats.duration_sec_pessimistic, 1800);
        assert_eq!(stats.distance_meters, Some(8100));
    }

    #[test]
    fn pessimistic_pads_tight_clusters() {
        let stats = aggregate_samples(&[sample(1000, None), sample(1010, None), sample(1020, None)])
            .unwrap();
        // Samples agree, so the padded median dominates the max.
        assert_eq!(stats.duration_sec_pessimistic, 1111);
        assert!(stats.duration_sec_pessimistic >= stats.duration_sec_avg);
    }

    #[test]
    fn even_sample_count_takes_middle_mean() {
        let stats = aggregate_samples(&[sample(100, None), sample(300, None)]).unwrap();
        assert_eq!(stats.duration_sec_median, 200);
        assert_eq!(stats.duration_sec_avg, 200);
    }

    #[test]
    fn empty_samples_aggregate_to_none() {
        assert!(aggregate_samples(&[]).is_none());
    }

    #[test]
    fn sample_time_parsing_drops_garbage() {
        let times = TimeBucket::parse_sample_times("14:30, bogus ,18:30");
        assert_eq!(times.len(), 2);
        assert_eq!(times[0], NaiveTime::from_hms_opt(14, 30, 0).unwrap());
    }

    #[test]
    fn sample_time_parsing_falls_back_to_defaults() {
        let times = TimeBucket::parse_sample_times("not,a,time");
        assert_eq!(times.len(), 3);
    }

    #[test]
    fn departures_use_same_day_before_window_closes() {
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        // Wednesday 2025-01-15 10:00 local.
        let now = offset
            .with_ymd_and_hms(2025, 1, 15, 10, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let times = TimeBucket::parse_sample_times(DEFAULT_SAMPLE_TIMES);
        let departures = next_sample_departures(now, offset, &times);
        assert_eq!(departures.len(), 3);
        let first_local = departures[0].with_timezone(&offset);
        assert_eq!(first_local.date_naive(), now.with_timezone(&offset).date_naive());
    }

    #[test]
    fn departures_skip_weekends() {
        let offset = FixedOffset::west_opt(5 * 3600).unwrap();
        // Friday 2025-01-17 19:00 local: window closed, next weekday is Monday.
        let now = offset
            .with_ymd_and_hms(2025, 1, 17, 19, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let times = TimeBucket::parse_sample_times(DEFAULT_SAMPLE_TIMES);
        let departures = next_sample_departures(now, offset, &times);
        let first_local = departures[0].with_timezone(&offset);
        assert_eq!(first_local.weekday(), chrono::Weekday::Mon);
        assert_eq!(first_local.date_naive().to_string(), "2025-01-20");
    }

    #[test]
    fn cache_model_round_trip() {
        let entry = TravelTimeEntry::from_samples(
            Point::new(40.7, -73.99),
            Point::new(40.65, -73.95),
            EntityKind::Technician,
            EntityKind::Client,
            TravelMode::Driving,
            DEFAULT_BUCKET_NAME,
            &[sample(1200, Some(9000)), sample(1400, Some(9100))],
            Duration::days(14),
        )
        .unwrap();
        let model: TravelTimeCacheModel = entry.clone().into();
        let back = TravelTimeEntry::try_from(model).unwrap();
        assert_eq!(back.stats, entry.stats);
        assert_eq!(back.origin_hash, entry.origin_hash);
        assert_eq!(back.sample_durations, entry.sample_durations);
        assert_eq!(back.mode, TravelMode::Driving);
    }
}
