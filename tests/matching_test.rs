//! End-to-end matcher scenarios over fixture providers: override
//! precedence, mode selection, budget enforcement, cache accounting and
//! validator demotion.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use dispatch::geocoding::{Geocoder, UnconfiguredBackend};
use dispatch::matching::{AssignmentSource, MatchEngine, MatchRunError, MatchStatus, MatchingResult};
use dispatch::overrides::{Override, OverrideSet, OverrideType};
use dispatch::technicians::TransportMode;
use dispatch::travel_time::TravelMode;
use dispatch::travel_time_cache::TravelTimeService;

use common::*;

fn offline_geocoder() -> Geocoder {
    Geocoder::new(Arc::new(UnconfiguredBackend), Duration::from_millis(0))
}

async fn run_engine(
    service: &TravelTimeService,
    clients: Vec<dispatch::Client>,
    technicians: Vec<dispatch::Technician>,
    overrides: OverrideSet,
) -> Result<MatchingResult, MatchRunError> {
    let geocoder = offline_geocoder();
    let engine = MatchEngine::new(service, &geocoder, 30 * 60);
    engine
        .run(clients, technicians, &overrides, &CancellationToken::new())
        .await
}

fn service_with(provider: Arc<dyn dispatch::routing::RouteProvider>) -> TravelTimeService {
    TravelTimeService::new(Arc::new(InMemoryStore::default()), provider, &test_settings())
}

#[tokio::test]
async fn locked_override_wins_regardless_of_budget() {
    // 55-minute trips are far over the 30-minute budget.
    let service = service_with(Arc::new(CountingProvider::new(3300, 3300)));
    let technician = technician_at("T", 40.70, -73.99, TransportMode::Car);
    let client = client_at("C", 40.50, -73.50);
    let overrides = OverrideSet::from_overrides(
        vec![Override::new(
            client.id,
            technician.id,
            OverrideType::LockedAssignment,
        )],
        Utc::now(),
    );

    let result = run_engine(&service, vec![client.clone()], vec![technician.clone()], overrides)
        .await
        .unwrap();

    assert_eq!(result.assignments.len(), 1);
    let assignment = &result.assignments[0];
    assert_eq!(assignment.client_id, client.id);
    assert_eq!(assignment.technician_id, Some(technician.id));
    assert_eq!(assignment.source, AssignmentSource::Locked);
    assert_eq!(assignment.status, MatchStatus::Matched);
    // Constant 3300 s samples aggregate to a padded median of 3630 s.
    assert_eq!(assignment.travel_time_seconds, Some(3630));
    assert_eq!(result.locked_count, 1);
    assert_eq!(result.auto_count, 0);
    assert_eq!(result.matched_count, 1);
}

#[tokio::test]
async fn blocked_pair_goes_to_standby() {
    let service = service_with(Arc::new(CountingProvider::new(1200, 1200)));
    let technician = technician_at("T", 40.70, -73.99, TransportMode::Car);
    let client = client_at("C", 40.69, -73.98);
    let overrides = OverrideSet::from_overrides(
        vec![Override::new(client.id, technician.id, OverrideType::BlockPair)],
        Utc::now(),
    );

    let result = run_engine(&service, vec![client.clone()], vec![technician], overrides)
        .await
        .unwrap();

    assert_eq!(result.assignments.len(), 1);
    let assignment = &result.assignments[0];
    assert_eq!(assignment.technician_id, None);
    assert_eq!(assignment.status, MatchStatus::Standby);
    assert_eq!(result.blocked_count, 1);
    assert_eq!(result.matched_count, 0);
}

#[tokio::test]
async fn block_and_lock_conflict_resolves_to_block() {
    let service = service_with(Arc::new(CountingProvider::new(1200, 1200)));
    let technician = technician_at("T", 40.70, -73.99, TransportMode::Car);
    let client = client_at("C", 40.69, -73.98);
    let overrides = OverrideSet::from_overrides(
        vec![
            Override::new(client.id, technician.id, OverrideType::LockedAssignment),
            Override::new(client.id, technician.id, OverrideType::BlockPair),
        ],
        Utc::now(),
    );

    let result = run_engine(&service, vec![client], vec![technician], overrides)
        .await
        .unwrap();

    assert_eq!(result.locked_count, 0);
    assert_eq!(result.blocked_count, 1);
    assert_eq!(result.assignments[0].status, MatchStatus::Standby);
}

#[tokio::test]
async fn both_mode_technician_takes_faster_transit() {
    // Driving 25 min, transit 20 min; pessimistic padding keeps the order.
    let service = service_with(Arc::new(CountingProvider::new(1500, 1200)));
    let technician = technician_at("T", 40.70, -73.99, TransportMode::Both);
    let client = client_at("C", 40.68, -73.96);

    let result = run_engine(
        &service,
        vec![client],
        vec![technician],
        OverrideSet::default(),
    )
    .await
    .unwrap();

    let assignment = &result.assignments[0];
    assert_eq!(assignment.status, MatchStatus::Matched);
    assert_eq!(assignment.explain.mode, Some(TravelMode::Transit));
    assert_eq!(assignment.travel_time_seconds, Some(1320));
    assert_eq!(result.auto_count, 1);
}

#[tokio::test]
async fn over_budget_technician_leaves_client_standby() {
    // 35-minute trips exceed the 30-minute cap even before padding.
    let service = service_with(Arc::new(CountingProvider::new(2100, 2100)));
    let technician = technician_at("T", 40.70, -73.99, TransportMode::Car);
    let client = client_at("C", 40.40, -73.70);

    let result = run_engine(
        &service,
        vec![client],
        vec![technician],
        OverrideSet::default(),
    )
    .await
    .unwrap();

    assert_eq!(result.assignments[0].status, MatchStatus::Standby);
    assert_eq!(result.standby_count, 1);
    assert_eq!(result.matched_count, 0);
}

#[tokio::test]
async fn technician_serves_at_most_one_client() {
    let service = service_with(Arc::new(CountingProvider::new(1200, 1200)));
    let technician = technician_at("T", 40.70, -73.99, TransportMode::Car);
    let first = client_at("C1", 40.69, -73.98);
    let second = client_at("C2", 40.68, -73.97);

    let result = run_engine(
        &service,
        vec![first.clone(), second.clone()],
        vec![technician.clone()],
        OverrideSet::default(),
    )
    .await
    .unwrap();

    let first_assignment = result
        .assignments
        .iter()
        .find(|a| a.client_id == first.id)
        .unwrap();
    let second_assignment = result
        .assignments
        .iter()
        .find(|a| a.client_id == second.id)
        .unwrap();
    assert_eq!(first_assignment.technician_id, Some(technician.id));
    assert_eq!(first_assignment.status, MatchStatus::Matched);
    assert_eq!(second_assignment.status, MatchStatus::Standby);
}

#[tokio::test]
async fn nearest_technician_is_chosen_and_suggestions_ranked() {
    let service = service_with(Arc::new(DistanceProvider));
    let near = technician_at("Near", 40.695, -73.985, TransportMode::Car);
    let far = technician_at("Far", 40.75, -73.90, TransportMode::Car);
    let client = client_at("C", 40.69, -73.98);

    let result = run_engine(
        &service,
        vec![client.clone()],
        vec![far.clone(), near.clone()],
        OverrideSet::default(),
    )
    .await
    .unwrap();

    let assignment = &result.assignments[0];
    assert_eq!(assignment.technician_id, Some(near.id));

    let ranked: Vec<_> = result
        .suggestions
        .iter()
        .filter(|s| s.client_id == client.id)
        .collect();
    assert!(!ranked.is_empty());
    assert_eq!(ranked[0].rank, 1);
    assert_eq!(ranked[0].technician_id, near.id);
    if let Some(second) = ranked.get(1) {
        assert_eq!(second.technician_id, far.id);
        assert!(second.duration_sec >= ranked[0].duration_sec);
    }
}

#[tokio::test]
async fn client_without_location_hint_is_no_location() {
    let service = service_with(Arc::new(CountingProvider::new(1200, 1200)));
    let technician = technician_at("T", 40.70, -73.99, TransportMode::Car);
    let blank =
        dispatch::Client::new("Nowhere".to_string(), dispatch::clients::ClientSource::CrmImport);

    let result = run_engine(
        &service,
        vec![blank],
        vec![technician],
        OverrideSet::default(),
    )
    .await
    .unwrap();

    assert_eq!(result.assignments[0].status, MatchStatus::NoLocation);
    assert_eq!(result.no_location_count, 1);
}

#[tokio::test]
async fn second_run_is_served_from_cache() {
    let provider = Arc::new(CountingProvider::new(1200, 1200));
    let store = Arc::new(InMemoryStore::default());
    let service = TravelTimeService::new(store, provider.clone(), &test_settings());

    let technician = technician_at("T", 40.70, -73.99, TransportMode::Car);
    let client = client_at("C", 40.69, -73.98);

    let first = run_engine(
        &service,
        vec![client.clone()],
        vec![technician.clone()],
        OverrideSet::default(),
    )
    .await
    .unwrap();
    assert_eq!(first.api_calls, 3, "one provider call per sample time");
    assert_eq!(first.cache_hits, 0);
    let calls_after_first = provider.call_count();

    let second = run_engine(
        &service,
        vec![client],
        vec![technician],
        OverrideSet::default(),
    )
    .await
    .unwrap();
    assert_eq!(second.api_calls, 0);
    assert_eq!(second.cache_hits, 1);
    assert_eq!(provider.call_count(), calls_after_first);
    assert_eq!(
        second.assignments[0].travel_time_seconds,
        first.assignments[0].travel_time_seconds
    );
}

#[tokio::test]
async fn low_quality_geocodes_demote_to_needs_review() {
    let service = service_with(Arc::new(CountingProvider::new(1200, 1200)));
    let mut technician = technician_at("T", 40.70, -73.99, TransportMode::Car);
    technician.geocode = Some(approximate_geocode(40.70, -73.99));
    let mut client = client_at("C", 40.69, -73.98);
    client.geocode = Some(approximate_geocode(40.69, -73.98));

    let result = run_engine(
        &service,
        vec![client],
        vec![technician],
        OverrideSet::default(),
    )
    .await
    .unwrap();

    let assignment = &result.assignments[0];
    assert_eq!(assignment.status, MatchStatus::NeedsReview);
    assert!(!assignment.explain.reasons.is_empty());
    assert_eq!(result.needs_review_count, 1);
    assert_eq!(result.auto_count, 0);
    assert_eq!(result.matched_count, 0);
}

#[tokio::test]
async fn empty_inputs_abort_the_run() {
    let service = service_with(Arc::new(CountingProvider::new(1200, 1200)));

    let err = run_engine(&service, vec![], vec![], OverrideSet::default())
        .await
        .unwrap_err();
    assert!(matches!(err, MatchRunError::NoClients));

    let err = run_engine(
        &service,
        vec![client_at("C", 40.69, -73.98)],
        vec![],
        OverrideSet::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, MatchRunError::NoTechnicians));
}
