//! Operator-facing simulation and approval workflow, distinct from bulk
//! matching: single clients are added by hand, proposals are generated per
//! simulation run, and operators approve, reject or defer them one by one.

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::addresses;
use crate::clients::{Client, ClientSource};
use crate::clients_repo::ClientsRepository;
use crate::config::Settings;
use crate::geocodes::METERS_PER_MILE;
use crate::geocoding::{GeocodeError, Geocoder};
use crate::pairings::Pairing;
use crate::pairings_repo::PairingsRepository;
use crate::proposals::{ApprovalError, MatchProposal, ProposalStatus};
use crate::proposals_repo::{ProposalsRepository, ProposalView};
use crate::technicians_repo::TechniciansRepository;
use crate::travel_time::EntityKind;
use crate::travel_time_cache::{TravelTimeError, TravelTimeService};
use crate::web::PgPool;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("could not geocode address: {0}")]
    Geocode(#[from] GeocodeError),
    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

/// Outcome of one simulation run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub simulation_run_id: Uuid,
    pub clients_considered: usize,
    pub technicians_considered: usize,
    pub proposals_created: usize,
    pub proposals_expired: u64,
    /// Non-fatal per-client problems; the run itself still succeeded.
    pub errors: Vec<String>,
}

#[derive(Clone)]
pub struct SimulationService {
    clients_repo: ClientsRepository,
    technicians_repo: TechniciansRepository,
    proposals_repo: ProposalsRepository,
    pairings_repo: PairingsRepository,
    travel: Arc<TravelTimeService>,
    geocoder: Arc<Geocoder>,
    max_travel_seconds: u32,
}

impl SimulationService {
    pub fn new(
        pool: PgPool,
        travel: Arc<TravelTimeService>,
        geocoder: Arc<Geocoder>,
        settings: &Settings,
    ) -> Self {
        Self {
            clients_repo: ClientsRepository::new(pool.clone()),
            technicians_repo: TechniciansRepository::new(pool.clone()),
            proposals_repo: ProposalsRepository::new(pool.clone()),
            pairings_repo: PairingsRepository::new(pool),
            travel,
            geocoder,
            max_travel_seconds: settings.max_travel_seconds(),
        }
    }

    /// Add a client by hand. The address must geocode; a client that cannot
    /// be placed on the map is useless to the simulation workflow.
    pub async fn add_client(
        &self,
        name: &str,
        address: &str,
        notes: Option<String>,
    ) -> Result<Client, SimulationError> {
        let normalized = addresses::normalize(address);
        let geocode = self.geocoder.geocode(&normalized).await?;

        let mut client = Client::new(name.to_string(), ClientSource::ManualEntry);
        client.street1 = normalized.street.clone();
        client.city = normalized.city.clone();
        client.state = normalized.state.clone();
        client.zip_code = normalized.zip.clone();
        client.area_label = normalized.city;
        client.notes = notes;
        client.needs_location_verification = geocode.needs_verification();
        client.geocode = Some(geocode);

        let client = self.clients_repo.insert(client).await?;
        info!("Added client {} ({})", client.display_name, client.id);
        Ok(client)
    }

    /// Propose the best technician for every unpaired, located client.
    ///
    /// Each client's previous `proposed` proposals are expired first;
    /// deferred ones are left for later review. Technicians are not
    /// consumed across proposals: the approval transaction is what
    /// ultimately enforces exclusivity.
    pub async fn run_simulation(&self) -> Result<SimulationResult, SimulationError> {
        let simulation_run_id = Uuid::new_v4();
        let clients = self.clients_repo.unpaired_with_coords().await?;
        let technicians = self.technicians_repo.available_with_coords().await?;

        let mut result = SimulationResult {
            simulation_run_id,
            clients_considered: clients.len(),
            technicians_considered: technicians.len(),
            proposals_created: 0,
            proposals_expired: 0,
            errors: Vec::new(),
        };

        info!(
            "Simulation {simulation_run_id}: {} clients, {} technicians",
            clients.len(),
            technicians.len()
        );

        'clients: for client in &clients {
            result.proposals_expired += self
                .proposals_repo
                .expire_open_for_client(client.id)
                .await?;

            let Some(client_point) = client.point() else {
                continue;
            };

            let mut best: Option<(Uuid, u32, Option<u32>)> = None;
            for technician in &technicians {
                let Some(tech_point) = technician.point() else {
                    continue;
                };
                let mut best_mode: Option<(u32, Option<u32>)> = None;
                for mode in technician.transport_mode.allowed_modes() {
                    match self
                        .travel
                        .travel_time(
                            tech_point,
                            EntityKind::Technician,
                            client_point,
                            EntityKind::Client,
                            *mode,
                        )
                        .await
                    {
                        Ok(Some(outcome)) => {
                            let duration = outcome.stats.duration_sec_pessimistic;
                            if duration <= self.max_travel_seconds
                                && best_mode.is_none_or(|(d, _)| duration < d)
                            {
                                best_mode = Some((duration, outcome.stats.distance_meters));
                            }
                        }
                        Ok(None) => continue,
                        Err(TravelTimeError::Quota) => {
                            warn!("Routing quota exhausted during simulation");
                            result
                                .errors
                                .push("routing quota exhausted; run incomplete".to_string());
                            break 'clients;
                        }
                        Err(TravelTimeError::Other(e)) => {
                            result.errors.push(format!(
                                "travel time failed for client {} / technician {}: {e}",
                                client.id, technician.id
                            ));
                        }
                    }
                }
                if let Some((duration, distance)) = best_mode
                    && best.is_none_or(|(_, d, _)| duration < d)
                {
                    best = Some((technician.id, duration, distance));
                }
            }

            if let Some((technician_id, duration_sec, distance_meters)) = best {
                let proposal = MatchProposal::new(
                    client.id,
                    technician_id,
                    f64::from(duration_sec) / 60.0,
                    distance_meters.map(|m| m as i32),
                    simulation_run_id,
                );
                self.proposals_repo.insert(proposal).await?;
                result.proposals_created += 1;
            }
        }

        info!(
            "Simulation {simulation_run_id} complete: {} proposals, {} expired, {} errors",
            result.proposals_created,
            result.proposals_expired,
            result.errors.len()
        );
        Ok(result)
    }

    pub async fn list_proposals(
        &self,
        filter: Option<ProposalStatus>,
    ) -> Result<Vec<ProposalView>, SimulationError> {
        Ok(self.proposals_repo.list(filter).await?)
    }

    pub async fn approve_proposal(&self, proposal_id: Uuid) -> Result<Pairing, ApprovalError> {
        let pairing = self.pairings_repo.approve_proposal(proposal_id).await?;
        info!(
            "Approved proposal {proposal_id}: pairing {} (client {}, technician {})",
            pairing.id, pairing.client_id, pairing.technician_id
        );
        Ok(pairing)
    }

    pub async fn reject_proposal(&self, proposal_id: Uuid) -> Result<MatchProposal, ApprovalError> {
        self.proposals_repo
            .decide(proposal_id, ProposalStatus::Rejected)
            .await
    }

    pub async fn defer_proposal(&self, proposal_id: Uuid) -> Result<MatchProposal, ApprovalError> {
        self.proposals_repo
            .decide(proposal_id, ProposalStatus::Deferred)
            .await
    }

    /// End all of a technician's active pairings and make them available
    /// again. Subsequent simulation runs may re-propose them.
    pub async fn reopen_technician(&self, technician_id: Uuid) -> Result<u64, ApprovalError> {
        let closed = self.pairings_repo.reopen_technician(technician_id).await?;
        info!("Reopened technician {technician_id}: {closed} pairings closed");
        Ok(closed)
    }

    /// Miles figure for API responses.
    pub fn meters_to_miles(meters: i32) -> f64 {
        f64::from(meters) / METERS_PER_MILE
    }
}
