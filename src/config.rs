//! Runtime configuration, read once from the environment at startup.

use anyhow::{Result, anyhow};
use chrono::{FixedOffset, NaiveTime};
use std::env;
use std::str::FromStr;
use tracing::warn;

use crate::travel_time::{
    DEFAULT_BUCKET_NAME, DEFAULT_SAMPLE_TIMES, TimeBucket, TrafficModel,
};

pub const DEFAULT_MAX_TRAVEL_MINUTES: u32 = 30;
pub const DEFAULT_TRAVEL_TIME_TTL_DAYS: i64 = 14;
pub const DEFAULT_PROVIDER_CONCURRENCY: usize = 5;
pub const DEFAULT_GEOCODE_SPACING_MS: u64 = 100;

/// Local time-of-day for the nightly scheduler, parsed from "HH:MM".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronTime {
    pub hour: u32,
    pub minute: u32,
}

impl CronTime {
    pub fn parse(s: &str) -> Option<Self> {
        let (h, m) = s.trim().split_once(':')?;
        let hour: u32 = h.parse().ok()?;
        let minute: u32 = m.parse().ok()?;
        if hour > 23 || minute > 59 {
            return None;
        }
        Some(Self { hour, minute })
    }
}

/// Fixed UTC offset from a "+HH:MM" / "-HH:MM" string.
pub fn parse_utc_offset(s: &str) -> Option<FixedOffset> {
    let s = s.trim();
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => (1, s),
    };
    let (h, m) = rest.split_once(':')?;
    let hours: i32 = h.parse().ok()?;
    let minutes: i32 = m.parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub expected_project_name: String,
    pub bind_address: String,
    pub port: u16,
    pub google_api_key: Option<String>,
    pub crm_base_url: Option<String>,
    pub crm_api_token: Option<String>,
    pub max_travel_minutes: u32,
    pub peak_bucket_name: String,
    pub peak_sample_times: Vec<NaiveTime>,
    pub traffic_model: TrafficModel,
    pub travel_time_ttl_days: i64,
    pub provider_concurrency: usize,
    pub geocode_spacing_ms: u64,
    pub scheduler_enabled: bool,
    pub scheduler_cron_local: Option<CronTime>,
    pub utc_offset: FixedOffset,
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a numeric/enum-ish variable; invalid values warn and fall back to
/// the default rather than failing startup.
fn parsed_or_default<T: FromStr + Copy>(name: &str, default: T) -> T {
    match optional(name) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Invalid {name}={raw:?}, using default");
            default
        }),
    }
}

impl Settings {
    /// Load settings from the environment. Only `DATABASE_URL` and
    /// `EXPECTED_PROJECT_NAME` are hard requirements; everything else has a
    /// usable default or degrades a feature (no Google key: offline
    /// estimates, no CRM URL: sync unavailable).
    pub fn from_env() -> Result<Self> {
        let database_url = optional("DATABASE_URL")
            .ok_or_else(|| anyhow!("DATABASE_URL must be set"))?;
        let expected_project_name = optional("EXPECTED_PROJECT_NAME")
            .ok_or_else(|| anyhow!("EXPECTED_PROJECT_NAME must be set"))?;

        let traffic_model = match optional("TRAFFIC_MODEL") {
            None => TrafficModel::Pessimistic,
            Some(raw) => TrafficModel::parse(raw.trim()).unwrap_or_else(|| {
                warn!("Invalid TRAFFIC_MODEL={raw:?}, using pessimistic");
                TrafficModel::Pessimistic
            }),
        };

        let peak_sample_times = TimeBucket::parse_sample_times(
            &optional("PEAK_SAMPLE_TIMES").unwrap_or_else(|| DEFAULT_SAMPLE_TIMES.to_string()),
        );

        let scheduler_cron_local = optional("SCHEDULER_CRON_LOCAL").and_then(|raw| {
            let parsed = CronTime::parse(&raw);
            if parsed.is_none() {
                warn!("Invalid SCHEDULER_CRON_LOCAL={raw:?}, scheduler disabled");
            }
            parsed
        });

        let utc_offset = match optional("TIMEZONE") {
            None => FixedOffset::east_opt(0).expect("utc offset"),
            Some(raw) => parse_utc_offset(&raw).unwrap_or_else(|| {
                warn!("Invalid TIMEZONE={raw:?}, using UTC");
                FixedOffset::east_opt(0).expect("utc offset")
            }),
        };

        Ok(Self {
            database_url,
            expected_project_name,
            bind_address: optional("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parsed_or_default("PORT", 8080),
            google_api_key: optional("GOOGLE_MAPS_API_KEY"),
            crm_base_url: optional("CRM_BASE_URL"),
            crm_api_token: optional("CRM_API_TOKEN"),
            max_travel_minutes: parsed_or_default("MAX_TRAVEL_MINUTES", DEFAULT_MAX_TRAVEL_MINUTES),
            peak_bucket_name: optional("PEAK_BUCKET_NAME")
                .unwrap_or_else(|| DEFAULT_BUCKET_NAME.to_string()),
            peak_sample_times,
            traffic_model,
            travel_time_ttl_days: parsed_or_default(
                "TRAVEL_TIME_TTL_DAYS",
                DEFAULT_TRAVEL_TIME_TTL_DAYS,
            ),
            provider_concurrency: parsed_or_default(
                "TRAVEL_TIME_CONCURRENCY",
                DEFAULT_PROVIDER_CONCURRENCY,
            ),
            geocode_spacing_ms: parsed_or_default(
                "GEOCODE_SPACING_MS",
                DEFAULT_GEOCODE_SPACING_MS,
            ),
            scheduler_enabled: optional("SCHEDULER_ENABLED")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            scheduler_cron_local,
            utc_offset,
        })
    }

    /// The active sampling bucket.
    pub fn peak_bucket(&self) -> TimeBucket {
        TimeBucket::new(
            &self.peak_bucket_name,
            self.peak_sample_times.clone(),
            self.traffic_model,
        )
    }

    pub fn max_travel_seconds(&self) -> u32 {
        self.max_travel_minutes * 60
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn set(name: &str, value: &str) {
        unsafe {
            env::set_var(name, value);
        }
    }

    fn unset(name: &str) {
        unsafe {
            env::remove_var(name);
        }
    }

    fn with_required_env<T>(f: impl FnOnce() -> T) -> T {
        set("DATABASE_URL", "postgres://localhost/dispatch_test");
        set("EXPECTED_PROJECT_NAME", "dispatch-test");
        let out = f();
        unset("DATABASE_URL");
        unset("EXPECTED_PROJECT_NAME");
        out
    }

    #[test]
    fn cron_time_parsing() {
        assert_eq!(CronTime::parse("02:30"), Some(CronTime { hour: 2, minute: 30 }));
        assert_eq!(CronTime::parse("23:59"), Some(CronTime { hour: 23, minute: 59 }));
        assert_eq!(CronTime::parse("24:00"), None);
        assert_eq!(CronTime::parse("2"), None);
        assert_eq!(CronTime::parse("ab:cd"), None);
    }

    #[test]
    fn utc_offset_parsing() {
        assert_eq!(
            parse_utc_offset("-05:00"),
            FixedOffset::west_opt(5 * 3600)
        );
        assert_eq!(
            parse_utc_offset("+09:30"),
            FixedOffset::east_opt(9 * 3600 + 30 * 60)
        );
        assert_eq!(parse_utc_offset("nonsense"), None);
        assert_eq!(parse_utc_offset("-25:00"), None);
    }

    #[test]
    #[serial]
    fn missing_database_url_fails() {
        unset("DATABASE_URL");
        unset("EXPECTED_PROJECT_NAME");
        assert!(Settings::from_env().is_err());
    }

    #[test]
    #[serial]
    fn defaults_applied() {
        with_required_env(|| {
            for name in [
                "MAX_TRAVEL_MINUTES",
                "PEAK_BUCKET_NAME",
                "PEAK_SAMPLE_TIMES",
                "TRAFFIC_MODEL",
                "TRAVEL_TIME_TTL_DAYS",
                "SCHEDULER_ENABLED",
                "TIMEZONE",
            ] {
                unset(name);
            }
            let s = Settings::from_env().unwrap();
            assert_eq!(s.max_travel_minutes, 30);
            assert_eq!(s.peak_bucket_name, "weekday_2to8");
            assert_eq!(s.peak_sample_times.len(), 3);
            assert_eq!(s.traffic_model, TrafficModel::Pessimistic);
            assert_eq!(s.travel_time_ttl_days, 14);
            assert!(!s.scheduler_enabled);
            assert_eq!(s.utc_offset.local_minus_utc(), 0);
        });
    }

    #[test]
    #[serial]
    fn invalid_numbers_fall_back() {
        with_required_env(|| {
            set("MAX_TRAVEL_MINUTES", "not-a-number");
            set("TRAFFIC_MODEL", "chaotic");
            let s = Settings::from_env().unwrap();
            assert_eq!(s.max_travel_minutes, 30);
            assert_eq!(s.traffic_model, TrafficModel::Pessimistic);
            unset("MAX_TRAVEL_MINUTES");
            unset("TRAFFIC_MODEL");
        });
    }

    #[test]
    #[serial]
    fn overrides_respected() {
        with_required_env(|| {
            set("MAX_TRAVEL_MINUTES", "45");
            set("TRAFFIC_MODEL", "best_guess");
            set("SCHEDULER_ENABLED", "true");
            set("SCHEDULER_CRON_LOCAL", "01:15");
            set("TIMEZONE", "-05:00");
            let s = Settings::from_env().unwrap();
            assert_eq!(s.max_travel_minutes, 45);
            assert_eq!(s.traffic_model, TrafficModel::BestGuess);
            assert!(s.scheduler_enabled);
            assert_eq!(s.scheduler_cron_local, Some(CronTime { hour: 1, minute: 15 }));
            assert_eq!(s.utc_offset.local_minus_utc(), -5 * 3600);
            for name in [
                "MAX_TRAVEL_MINUTES",
                "TRAFFIC_MODEL",
                "SCHEDULER_ENABLED",
                "SCHEDULER_CRON_LOCAL",
                "TIMEZONE",
            ] {
                unset(name);
            }
            s
        });
    }
}
