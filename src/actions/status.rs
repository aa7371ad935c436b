//! Service status endpoint: version and uptime.

use axum::{Json, response::IntoResponse};
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Instant;

use super::DataResponse;

static SERVER_START_TIME: OnceLock<Instant> = OnceLock::new();

/// Initialize the server start time (called when the server starts).
pub fn init_server_start_time() {
    SERVER_START_TIME.get_or_init(Instant::now);
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusInfo {
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub uptime_human: String,
}

fn format_duration(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if days > 0 {
        format!("{days}d {hours}h {minutes}m {secs}s")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}

/// Handler for GET /status
pub async fn service_status() -> impl IntoResponse {
    let uptime_seconds = SERVER_START_TIME
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0);

    Json(DataResponse {
        data: StatusInfo {
            version: env!("CARGO_PKG_VERSION"),
            uptime_seconds,
            uptime_human: format_duration(uptime_seconds),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(5), "5s");
        assert_eq!(format_duration(65), "1m 5s");
        assert_eq!(format_duration(3661), "1h 1m 1s");
        assert_eq!(format_duration(90061), "1d 1h 1m 1s");
    }
}
