//! Orchestration around the match engine: load inputs from the store, run
//! the engine, persist geocodes, the run ledger and suggestions.

use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::clients_repo::ClientsRepository;
use crate::config::Settings;
use crate::geocoding::Geocoder;
use crate::match_runs::{MatchRun, MatchRunSummary};
use crate::match_runs_repo::MatchRunsRepository;
use crate::matching::{MatchEngine, MatchRunError, MatchingResult};
use crate::overrides::OverrideSet;
use crate::overrides_repo::OverridesRepository;
use crate::scheduling_meta_repo::SchedulingMetaRepository;
use crate::technicians_repo::TechniciansRepository;
use crate::travel_time::EntityKind;
use crate::travel_time_cache::TravelTimeService;
use crate::web::PgPool;

/// Releases the in-progress flag when a run finishes, however it finishes.
struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct MatchService {
    clients_repo: ClientsRepository,
    technicians_repo: TechniciansRepository,
    overrides_repo: OverridesRepository,
    match_runs_repo: MatchRunsRepository,
    meta_repo: SchedulingMetaRepository,
    travel: Arc<TravelTimeService>,
    geocoder: Arc<Geocoder>,
    max_travel_seconds: u32,
    running: Arc<AtomicBool>,
}

impl MatchService {
    pub fn new(
        pool: PgPool,
        travel: Arc<TravelTimeService>,
        geocoder: Arc<Geocoder>,
        settings: &Settings,
    ) -> Self {
        Self {
            clients_repo: ClientsRepository::new(pool.clone()),
            technicians_repo: TechniciansRepository::new(pool.clone()),
            overrides_repo: OverridesRepository::new(pool.clone()),
            match_runs_repo: MatchRunsRepository::new(pool.clone()),
            meta_repo: SchedulingMetaRepository::new(pool),
            travel,
            geocoder,
            max_travel_seconds: settings.max_travel_seconds(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run one matching pass over all unpaired clients and active
    /// technicians, and persist the outcome. Only one run at a time per
    /// process; a concurrent trigger is refused.
    pub async fn run_matching(
        &self,
        cancel: &CancellationToken,
    ) -> Result<MatchRunSummary, MatchRunError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(MatchRunError::AlreadyRunning);
        }
        let _guard = RunGuard(self.running.clone());

        let started_at = Utc::now();
        let clients = self.clients_repo.unpaired().await?;
        let technicians = self.technicians_repo.active().await?;
        let overrides =
            OverrideSet::from_overrides(self.overrides_repo.list().await?, started_at);

        let client_count = clients.len();
        let technician_count = technicians.len();

        let engine = MatchEngine::new(&self.travel, &self.geocoder, self.max_travel_seconds);
        let result = engine.run(clients, technicians, &overrides, cancel).await?;

        self.persist_geocodes(&result).await;

        let run = MatchRun::from_result(started_at, client_count, technician_count, &result);
        let summary = run.summary();
        let run_id = run.id;
        self.match_runs_repo.insert(run).await?;
        if let Err(e) = self
            .match_runs_repo
            .insert_suggestions(run_id, &result.suggestions)
            .await
        {
            warn!("Failed to persist match suggestions: {e}");
        }

        match serde_json::to_value(&summary) {
            Ok(summary_json) => {
                if let Err(e) = self
                    .meta_repo
                    .record_matching_run(started_at, summary_json)
                    .await
                {
                    warn!("Failed to record run in scheduling meta: {e}");
                }
            }
            Err(e) => warn!("Failed to serialize run summary: {e}"),
        }

        metrics::counter!("matching.runs").increment(1);
        metrics::histogram!("matching.run_duration_ms")
            .record((Utc::now() - started_at).num_milliseconds() as f64);

        info!(
            "Match run {run_id} persisted: {} matched / {} clients",
            summary.matched, summary.client_count
        );
        Ok(summary)
    }

    /// Write back geocodes computed during the run. Failures are logged and
    /// skipped; the coordinates will simply be computed again next run.
    async fn persist_geocodes(&self, result: &MatchingResult) {
        for (kind, entity_id, geocode) in &result.geocode_updates {
            let outcome = match kind {
                EntityKind::Client => {
                    self.clients_repo
                        .update_geocode(*entity_id, geocode.clone())
                        .await
                }
                EntityKind::Technician => {
                    self.technicians_repo
                        .update_geocode(*entity_id, geocode.clone())
                        .await
                }
            };
            if let Err(e) = outcome {
                error!("Failed to persist geocode for {} {entity_id}: {e}", kind.as_str());
            }
        }
    }

    pub async fn latest_run(&self) -> anyhow::Result<Option<MatchRun>> {
        self.match_runs_repo.latest().await
    }
}
