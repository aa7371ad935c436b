//! Match run ledger: one row per matching pass, with inputs, outcome
//! counters and provider/cache accounting. The full assignment list rides
//! along as JSON metadata so the unmatched view can be served without
//! another table.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::matching::{Assignment, MatchingResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRun {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub client_count: i32,
    pub technician_count: i32,
    pub matched_count: i32,
    pub locked_count: i32,
    pub auto_count: i32,
    pub manual_count: i32,
    pub blocked_count: i32,
    pub standby_count: i32,
    pub no_location_count: i32,
    pub needs_review_count: i32,
    pub api_calls: i32,
    pub cache_hits: i32,
    pub cache_hit_rate: f64,
    pub metadata: Option<serde_json::Value>,
}

/// Compact summary for API responses and the scheduling-meta sentinel row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRunSummary {
    pub match_run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub client_count: i32,
    pub technician_count: i32,
    pub matched: i32,
    pub locked: i32,
    pub auto: i32,
    pub manual: i32,
    pub blocked: i32,
    pub standby: i32,
    pub no_location: i32,
    pub needs_review: i32,
    pub api_calls: i32,
    pub cache_hits: i32,
    pub cache_hit_rate: f64,
    pub canceled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RunMetadata {
    canceled: bool,
    assignments: Vec<Assignment>,
}

impl MatchRun {
    pub fn from_result(
        started_at: DateTime<Utc>,
        client_count: usize,
        technician_count: usize,
        result: &MatchingResult,
    ) -> Self {
        let metadata = serde_json::to_value(RunMetadata {
            canceled: result.canceled,
            assignments: result.assignments.clone(),
        })
        .ok();
        Self {
            id: Uuid::new_v4(),
            started_at,
            ended_at: Some(Utc::now()),
            client_count: client_count as i32,
            technician_count: technician_count as i32,
            matched_count: result.matched_count as i32,
            locked_count: result.locked_count as i32,
            auto_count: result.auto_count as i32,
            manual_count: result.manual_count as i32,
            blocked_count: result.blocked_count as i32,
            standby_count: result.standby_count as i32,
            no_location_count: result.no_location_count as i32,
            needs_review_count: result.needs_review_count as i32,
            api_calls: result.api_calls as i32,
            cache_hits: result.cache_hits as i32,
            cache_hit_rate: result.cache_hit_rate(),
            metadata,
        }
    }

    pub fn assignments(&self) -> Vec<Assignment> {
        self.metadata
            .as_ref()
            .and_then(|m| serde_json::from_value::<RunMetadata>(m.clone()).ok())
            .map(|m| m.assignments)
            .unwrap_or_default()
    }

    pub fn was_canceled(&self) -> bool {
        self.metadata
            .as_ref()
            .and_then(|m| serde_json::from_value::<RunMetadata>(m.clone()).ok())
            .map(|m| m.canceled)
            .unwrap_or(false)
    }

    pub fn summary(&self) -> MatchRunSummary {
        MatchRunSummary {
            match_run_id: self.id,
            started_at: self.started_at,
            ended_at: self.ended_at,
            client_count: self.client_count,
            technician_count: self.technician_count,
            matched: self.matched_count,
            locked: self.locked_count,
            auto: self.auto_count,
            manual: self.manual_count,
            blocked: self.blocked_count,
            standby: self.standby_count,
            no_location: self.no_location_count,
            needs_review: self.needs_review_count,
            api_calls: self.api_calls,
            cache_hits: self.cache_hits,
            cache_hit_rate: self.cache_hit_rate,
            canceled: self.was_canceled(),
        }
    }
}

/// Diesel row for the match_runs table.
#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::match_runs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MatchRunModel {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub client_count: i32,
    pub technician_count: i32,
    pub matched_count: i32,
    pub locked_count: i32,
    pub auto_count: i32,
    pub manual_count: i32,
    pub blocked_count: i32,
    pub standby_count: i32,
    pub no_location_count: i32,
    pub needs_review_count: i32,
    pub api_calls: i32,
    pub cache_hits: i32,
    pub cache_hit_rate: f64,
    pub metadata: Option<serde_json::Value>,
}

impl From<MatchRun> for MatchRunModel {
    fn from(r: MatchRun) -> Self {
        Self {
            id: r.id,
            started_at: r.started_at,
            ended_at: r.ended_at,
            client_count: r.client_count,
            technician_count: r.technician_count,
            matched_count: r.matched_count,
            locked_count: r.locked_count,
            auto_count: r.auto_count,
            manual_count: r.manual_count,
            blocked_count: r.blocked_count,
            standby_count: r.standby_count,
            no_location_count: r.no_location_count,
            needs_review_count: r.needs_review_count,
            api_calls: r.api_calls,
            cache_hits: r.cache_hits,
            cache_hit_rate: r.cache_hit_rate,
            metadata: r.metadata,
        }
    }
}

impl From<MatchRunModel> for MatchRun {
    fn from(m: MatchRunModel) -> Self {
        Self {
            id: m.id,
            started_at: m.started_at,
            ended_at: m.ended_at,
            client_count: m.client_count,
            technician_count: m.technician_count,
            matched_count: m.matched_count,
            locked_count: m.locked_count,
            auto_count: m.auto_count,
            manual_count: m.manual_count,
            blocked_count: m.blocked_count,
            standby_count: m.standby_count,
            no_location_count: m.no_location_count,
            needs_review_count: m.needs_review_count,
            api_calls: m.api_calls,
            cache_hits: m.cache_hits,
            cache_hit_rate: m.cache_hit_rate,
            metadata: m.metadata,
        }
    }
}

/// Diesel row for the match_suggestions table.
#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::match_suggestions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MatchSuggestionModel {
    pub id: Uuid,
    pub match_run_id: Uuid,
    pub client_id: Uuid,
    pub technician_id: Uuid,
    pub rank: i32,
    pub duration_sec: i32,
    pub mode: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::MatchingResult;

    #[test]
    fn run_from_result_copies_counters() {
        let result = MatchingResult {
            matched_count: 3,
            locked_count: 1,
            auto_count: 2,
            standby_count: 1,
            api_calls: 9,
            cache_hits: 3,
            ..MatchingResult::default()
        };
        let run = MatchRun::from_result(Utc::now(), 4, 5, &result);
        assert_eq!(run.client_count, 4);
        assert_eq!(run.technician_count, 5);
        assert_eq!(run.matched_count, 3);
        assert_eq!(run.api_calls, 9);
        assert!((run.cache_hit_rate - 0.25).abs() < 1e-9);
        assert!(!run.was_canceled());
        assert!(run.assignments().is_empty());
    }

    #[test]
    fn summary_reflects_run() {
        let result = MatchingResult {
            matched_count: 1,
            ..MatchingResult::default()
        };
        let run = MatchRun::from_result(Utc::now(), 1, 1, &result);
        let summary = run.summary();
        assert_eq!(summary.match_run_id, run.id);
        assert_eq!(summary.matched, 1);
    }
}
