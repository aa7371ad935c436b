//! Matcher: constrained best-first assignment of clients to technicians
//! under a travel-time budget.
//!
//! The strategy is greedy by design: clients are processed in input order
//! and each consumes its best technician. Greedy keeps results transparent
//! (every assignment is explainable in isolation) and incremental; a global
//! minimum-cost bipartite variant remains a documented alternative.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clients::Client;
use crate::geocodes::{Geocode, METERS_PER_MILE, Point};
use crate::geocoding::Geocoder;
use crate::overrides::{OverrideSet, OverrideType};
use crate::technicians::Technician;
use crate::travel_time::{EntityKind, TravelMode, coord_hash};
use crate::travel_time_cache::{TravelTimeError, TravelTimeOutcome, TravelTimeService};
use crate::validation::{self, MatchSide, ReviewReason};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Matched,
    Standby,
    NoLocation,
    NeedsReview,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Matched => "matched",
            MatchStatus::Standby => "standby",
            MatchStatus::NoLocation => "no_location",
            MatchStatus::NeedsReview => "needs_review",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentSource {
    Auto,
    Locked,
    Manual,
}

impl AssignmentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentSource::Auto => "AUTO",
            AssignmentSource::Locked => "LOCKED",
            AssignmentSource::Manual => "MANUAL",
        }
    }
}

/// Transparency record carried by every assignment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchExplain {
    pub mode: Option<TravelMode>,
    pub bucket: Option<String>,
    pub sample_durations: Vec<u32>,
    pub from_cache: bool,
    pub estimated: bool,
    pub reasons: Vec<ReviewReason>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub client_id: Uuid,
    pub client_name: String,
    pub technician_id: Option<Uuid>,
    pub technician_name: Option<String>,
    pub travel_time_seconds: Option<u32>,
    pub distance_miles: Option<f64>,
    pub status: MatchStatus,
    pub source: AssignmentSource,
    pub quality: Option<f64>,
    pub explain: MatchExplain,
}

impl Assignment {
    pub fn travel_time_minutes(&self) -> Option<f64> {
        self.travel_time_seconds.map(|s| f64::from(s) / 60.0)
    }
}

/// Top-N ranking per client, persisted for operator display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub client_id: Uuid,
    pub technician_id: Uuid,
    pub rank: i32,
    pub duration_sec: u32,
    pub mode: TravelMode,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MatchingResult {
    pub assignments: Vec<Assignment>,
    pub suggestions: Vec<Suggestion>,
    pub api_calls: u32,
    pub cache_hits: u32,
    pub matched_count: u32,
    pub locked_count: u32,
    pub auto_count: u32,
    pub manual_count: u32,
    pub blocked_count: u32,
    pub standby_count: u32,
    pub no_location_count: u32,
    pub needs_review_count: u32,
    /// True when the run was cancelled; assignments cover the clients
    /// processed before the cancellation point.
    pub canceled: bool,
    /// Geocodes computed during the run, for the caller to persist.
    #[serde(skip)]
    pub geocode_updates: Vec<(EntityKind, Uuid, Geocode)>,
}

impl MatchingResult {
    pub fn cache_hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.api_calls;
        if lookups == 0 {
            0.0
        } else {
            f64::from(self.cache_hits) / f64::from(lookups)
        }
    }
}

#[derive(Debug, Error)]
pub enum MatchRunError {
    #[error("no clients to match")]
    NoClients,
    #[error("no technicians to match")]
    NoTechnicians,
    #[error("a match run is already in progress")]
    AlreadyRunning,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

struct Candidate {
    technician_id: Uuid,
    technician_name: String,
    duration_sec: u32,
    technician_confidence: f64,
    distance_meters: Option<u32>,
    mode: TravelMode,
    outcome: TravelTimeOutcome,
}

pub struct MatchEngine<'a> {
    travel: &'a TravelTimeService,
    geocoder: &'a Geocoder,
    max_travel_seconds: u32,
}

impl<'a> MatchEngine<'a> {
    pub fn new(travel: &'a TravelTimeService, geocoder: &'a Geocoder, max_travel_seconds: u32) -> Self {
        Self {
            travel,
            geocoder,
            max_travel_seconds,
        }
    }

    /// Run one matching pass. Clients are consumed in input order;
    /// technicians are consumed as they are assigned. Per-pair failures are
    /// logged and skipped; only empty input aborts the run.
    pub async fn run(
        &self,
        mut clients: Vec<Client>,
        mut technicians: Vec<Technician>,
        overrides: &OverrideSet,
        cancel: &CancellationToken,
    ) -> Result<MatchingResult, MatchRunError> {
        if clients.is_empty() {
            return Err(MatchRunError::NoClients);
        }
        if technicians.is_empty() {
            return Err(MatchRunError::NoTechnicians);
        }

        info!(
            "Match run: {} clients, {} technicians, budget {}s",
            clients.len(),
            technicians.len(),
            self.max_travel_seconds
        );

        let mut result = MatchingResult::default();
        let mut consumed_technicians: HashSet<Uuid> = HashSet::new();
        let mut consumed_clients: HashSet<Uuid> = HashSet::new();
        let mut quota_exhausted = false;

        self.apply_forced_overrides(
            &clients,
            &technicians,
            overrides,
            &mut result,
            &mut consumed_clients,
            &mut consumed_technicians,
            &mut quota_exhausted,
        )
        .await;

        for client_idx in 0..clients.len() {
            if cancel.is_cancelled() {
                warn!("Match run cancelled; returning partial results");
                result.canceled = true;
                break;
            }
            if consumed_clients.contains(&clients[client_idx].id) {
                continue;
            }

            if !clients[client_idx].has_location_hint() {
                self.push_no_location(&clients[client_idx], &mut result);
                continue;
            }

            if self
                .ensure_client_coords(&mut clients[client_idx], &mut result)
                .await
                .is_none()
            {
                self.push_no_location(&clients[client_idx], &mut result);
                continue;
            }
            let client = &clients[client_idx];
            let client_point = client.point().expect("ensured above");

            let mut candidates: Vec<Candidate> = Vec::new();
            for tech_idx in 0..technicians.len() {
                if consumed_technicians.contains(&technicians[tech_idx].id) {
                    continue;
                }
                if overrides.is_blocked(client.id, technicians[tech_idx].id) {
                    result.blocked_count += 1;
                    continue;
                }
                let Some(tech_point) = self
                    .ensure_technician_coords(&mut technicians[tech_idx], &mut result)
                    .await
                else {
                    continue;
                };
                if quota_exhausted {
                    // Unreached pairs fall through to standby.
                    continue;
                }

                let technician = &technicians[tech_idx];
                if let Some((mode, outcome)) = self
                    .best_route(
                        tech_point,
                        client_point,
                        technician.transport_mode.allowed_modes(),
                        Some(self.max_travel_seconds),
                        &mut result,
                        &mut quota_exhausted,
                    )
                    .await
                {
                    candidates.push(Candidate {
                        technician_id: technician.id,
                        technician_name: technician.display_name.clone(),
                        duration_sec: outcome.stats.duration_sec_pessimistic,
                        technician_confidence: technician.geocode_confidence(),
                        distance_meters: outcome.stats.distance_meters,
                        mode,
                        outcome,
                    });
                }
            }

            // Lexicographic: shortest trip, then surest technician geocode,
            // then shortest distance.
            candidates.sort_by(|a, b| {
                a.duration_sec
                    .cmp(&b.duration_sec)
                    .then(
                        b.technician_confidence
                            .partial_cmp(&a.technician_confidence)
                            .unwrap_or(std::cmp::Ordering::Equal),
                    )
                    .then(
                        a.distance_meters
                            .unwrap_or(u32::MAX)
                            .cmp(&b.distance_meters.unwrap_or(u32::MAX)),
                    )
            });

            for (rank, candidate) in candidates.iter().take(3).enumerate() {
                result.suggestions.push(Suggestion {
                    client_id: client.id,
                    technician_id: candidate.technician_id,
                    rank: rank as i32 + 1,
                    duration_sec: candidate.duration_sec,
                    mode: candidate.mode,
                });
            }

            match candidates.into_iter().next() {
                Some(best) => {
                    debug!(
                        "Matched client {} to technician {} ({}s by {})",
                        client.display_name,
                        best.technician_name,
                        best.duration_sec,
                        best.mode.as_str()
                    );
                    consumed_technicians.insert(best.technician_id);
                    result.auto_count += 1;
                    result.assignments.push(Assignment {
                        client_id: client.id,
                        client_name: client.display_name.clone(),
                        technician_id: Some(best.technician_id),
                        technician_name: Some(best.technician_name),
                        travel_time_seconds: Some(best.duration_sec),
                        distance_miles: best
                            .distance_meters
                            .map(|m| f64::from(m) / METERS_PER_MILE),
                        status: MatchStatus::Matched,
                        source: AssignmentSource::Auto,
                        quality: None,
                        explain: MatchExplain {
                            mode: Some(best.mode),
                            bucket: Some(best.outcome.bucket),
                            sample_durations: best.outcome.sample_durations,
                            from_cache: best.outcome.from_cache,
                            estimated: best.outcome.estimated,
                            reasons: Vec::new(),
                        },
                    });
                }
                None => {
                    result.standby_count += 1;
                    result.assignments.push(Assignment {
                        client_id: client.id,
                        client_name: client.display_name.clone(),
                        technician_id: None,
                        technician_name: None,
                        travel_time_seconds: None,
                        distance_miles: None,
                        status: MatchStatus::Standby,
                        source: AssignmentSource::Auto,
                        quality: None,
                        explain: MatchExplain::default(),
                    });
                }
            }
        }

        self.validate_assignments(&clients, &technicians, &mut result);

        result.matched_count = result
            .assignments
            .iter()
            .filter(|a| a.status == MatchStatus::Matched)
            .count() as u32;

        info!(
            "Match run complete: {} matched, {} standby, {} no-location, {} needs-review \
             ({} api calls, {} cache hits)",
            result.matched_count,
            result.standby_count,
            result.no_location_count,
            result.needs_review_count,
            result.api_calls,
            result.cache_hits
        );

        Ok(result)
    }

    /// Apply forced (locked/manual) overrides before auto-matching. Forced
    /// assignments ignore the travel budget; travel time is computed only
    /// for display, and only when both sides already have coordinates.
    #[allow(clippy::too_many_arguments)]
    async fn apply_forced_overrides(
        &self,
        clients: &[Client],
        technicians: &[Technician],
        overrides: &OverrideSet,
        result: &mut MatchingResult,
        consumed_clients: &mut HashSet<Uuid>,
        consumed_technicians: &mut HashSet<Uuid>,
        quota_exhausted: &mut bool,
    ) {
        for (client_id, technician_id, override_type) in overrides.forced_pairs() {
            if consumed_clients.contains(client_id)
                || consumed_technicians.contains(technician_id)
            {
                warn!(
                    "Skipping forced override ({client_id}, {technician_id}): \
                     entity already consumed"
                );
                continue;
            }
            let Some(client) = clients.iter().find(|c| c.id == *client_id) else {
                continue;
            };
            let Some(technician) = technicians.iter().find(|t| t.id == *technician_id) else {
                continue;
            };

            let mut explain = MatchExplain::default();
            let mut travel_time_seconds = None;
            let mut distance_miles = None;

            if !*quota_exhausted
                && let (Some(client_point), Some(tech_point)) =
                    (client.point(), technician.point())
            {
                let best = self
                    .best_route(
                        tech_point,
                        client_point,
                        technician.transport_mode.allowed_modes(),
                        None,
                        result,
                        quota_exhausted,
                    )
                    .await;
                if let Some((mode, outcome)) = best {
                    travel_time_seconds = Some(outcome.stats.duration_sec_pessimistic);
                    distance_miles = outcome
                        .stats
                        .distance_meters
                        .map(|m| f64::from(m) / METERS_PER_MILE);
                    explain = MatchExplain {
                        mode: Some(mode),
                        bucket: Some(outcome.bucket),
                        sample_durations: outcome.sample_durations,
                        from_cache: outcome.from_cache,
                        estimated: outcome.estimated,
                        reasons: Vec::new(),
                    };
                }
            }

            let source = match override_type {
                OverrideType::ManualAssignment => {
                    result.manual_count += 1;
                    AssignmentSource::Manual
                }
                _ => {
                    result.locked_count += 1;
                    AssignmentSource::Locked
                }
            };

            consumed_clients.insert(*client_id);
            consumed_technicians.insert(*technician_id);
            result.assignments.push(Assignment {
                client_id: *client_id,
                client_name: client.display_name.clone(),
                technician_id: Some(*technician_id),
                technician_name: Some(technician.display_name.clone()),
                travel_time_seconds,
                distance_miles,
                status: MatchStatus::Matched,
                source,
                quality: None,
                explain,
            });
        }
    }

    /// Best mode for one pair: smallest pessimistic duration among the
    /// technician's allowed modes, optionally under a budget.
    async fn best_route(
        &self,
        origin: Point,
        dest: Point,
        allowed: &[TravelMode],
        budget_seconds: Option<u32>,
        result: &mut MatchingResult,
        quota_exhausted: &mut bool,
    ) -> Option<(TravelMode, TravelTimeOutcome)> {
        let mut best: Option<(TravelMode, TravelTimeOutcome)> = None;

        for mode in allowed {
            if *quota_exhausted {
                break;
            }
            match self
                .travel
                .travel_time(origin, EntityKind::Technician, dest, EntityKind::Client, *mode)
                .await
            {
                Ok(Some(outcome)) => {
                    result.api_calls += outcome.api_calls;
                    if outcome.from_cache {
                        result.cache_hits += 1;
                    }
                    let duration = outcome.stats.duration_sec_pessimistic;
                    if budget_seconds.is_some_and(|b| duration > b) {
                        continue;
                    }
                    let better = best
                        .as_ref()
                        .is_none_or(|(_, b)| duration < b.stats.duration_sec_pessimistic);
                    if better {
                        best = Some((*mode, outcome));
                    }
                }
                Ok(None) => continue,
                Err(TravelTimeError::Quota) => {
                    warn!("Routing quota exhausted; remaining pairs go to standby");
                    *quota_exhausted = true;
                }
                Err(TravelTimeError::Other(e)) => {
                    warn!("Travel time lookup failed for pair: {e}");
                }
            }
        }

        best
    }

    /// Geocode a client missing coordinates (or flagged stale). Returns the
    /// usable point, or None when the client cannot be located.
    async fn ensure_client_coords(
        &self,
        client: &mut Client,
        result: &mut MatchingResult,
    ) -> Option<Point> {
        if let Some(point) = client.point()
            && !client.coords_stale
        {
            return Some(point);
        }
        let old_point = client.point();
        let text = client
            .address_text()
            .or_else(|| client.area_label.clone())?;

        match self.geocoder.geocode_text(&text).await {
            Ok(geocode) => {
                let point = geocode.point;
                // A moved coordinate leaves poisoned cache rows behind.
                if let Some(old) = old_point
                    && coord_hash(old) != coord_hash(point)
                {
                    if let Err(e) = self
                        .travel
                        .invalidate_for_entity(EntityKind::Client, old)
                        .await
                    {
                        warn!("Cache invalidation failed for client {}: {e}", client.id);
                    }
                }
                client.geocode = Some(geocode.clone());
                client.coords_stale = false;
                result
                    .geocode_updates
                    .push((EntityKind::Client, client.id, geocode));
                Some(point)
            }
            Err(e) => {
                warn!("Geocoding failed for client {}: {e}", client.display_name);
                // Stale coordinates are still better than none.
                old_point
            }
        }
    }

    async fn ensure_technician_coords(
        &self,
        technician: &mut Technician,
        result: &mut MatchingResult,
    ) -> Option<Point> {
        if let Some(point) = technician.point() {
            return Some(point);
        }
        let text = technician.address_text()?;

        match self.geocoder.geocode_text(&text).await {
            Ok(geocode) => {
                let point = geocode.point;
                technician.geocode = Some(geocode.clone());
                result
                    .geocode_updates
                    .push((EntityKind::Technician, technician.id, geocode));
                Some(point)
            }
            Err(e) => {
                warn!(
                    "Geocoding failed for technician {}: {e}",
                    technician.display_name
                );
                None
            }
        }
    }

    fn push_no_location(&self, client: &Client, result: &mut MatchingResult) {
        result.no_location_count += 1;
        result.assignments.push(Assignment {
            client_id: client.id,
            client_name: client.display_name.clone(),
            technician_id: None,
            technician_name: None,
            travel_time_seconds: None,
            distance_miles: None,
            status: MatchStatus::NoLocation,
            source: AssignmentSource::Auto,
            quality: None,
            explain: MatchExplain::default(),
        });
    }

    /// Validation pass: annotate every computed match and demote auto
    /// matches with review-severity reasons. Forced assignments keep their
    /// matched status; operators chose them knowingly.
    fn validate_assignments(
        &self,
        clients: &[Client],
        technicians: &[Technician],
        result: &mut MatchingResult,
    ) {
        let client_by_id: HashMap<Uuid, &Client> = clients.iter().map(|c| (c.id, c)).collect();
        let technician_by_id: HashMap<Uuid, &Technician> =
            technicians.iter().map(|t| (t.id, t)).collect();

        for assignment in &mut result.assignments {
            if assignment.status != MatchStatus::Matched {
                continue;
            }
            let Some(travel_seconds) = assignment.travel_time_seconds else {
                continue;
            };
            let client = client_by_id.get(&assignment.client_id);
            let technician = assignment
                .technician_id
                .and_then(|id| technician_by_id.get(&id));

            let client_side = client
                .map(|c| MatchSide {
                    geocode: c.geocode.as_ref(),
                    area_label: c.area_label.as_deref().or(c.city.as_deref()),
                })
                .unwrap_or_default();
            let technician_side = technician
                .map(|t| MatchSide {
                    geocode: t.geocode.as_ref(),
                    area_label: t.city.as_deref().or(t.area_label.as_deref()),
                })
                .unwrap_or_default();

            let reasons = validation::validate_match(
                travel_seconds,
                assignment.distance_miles,
                client_side,
                technician_side,
            );
            assignment.quality = Some(validation::quality_score(
                client.and_then(|c| c.geocode.as_ref()),
                technician.and_then(|t| t.geocode.as_ref()),
            ));

            if assignment.source == AssignmentSource::Auto
                && validation::has_review_reason(&reasons)
            {
                debug!(
                    "Demoting match for client {} to needs-review: {:?}",
                    assignment.client_name, reasons
                );
                assignment.status = MatchStatus::NeedsReview;
                result.needs_review_count += 1;
                result.auto_count = result.auto_count.saturating_sub(1);
            }
            assignment.explain.reasons = reasons;
        }
    }
}
