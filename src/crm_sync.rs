//! CRM → canonical sync: pull active clients, detect address drift,
//! re-geocode where needed, and invalidate travel-time cache rows for moved
//! coordinates.

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::addresses;
use crate::clients::{Client, ClientSource};
use crate::clients_repo::ClientsRepository;
use crate::crm::{CrmClientRecord, CrmSource};
use crate::geocodes::{Geocode, GeocodeSource, Point};
use crate::geocoding::Geocoder;
use crate::sync_runs_repo::{SyncRun, SyncRunStatus, SyncRunsRepository};
use crate::travel_time::{EntityKind, coord_hash};
use crate::travel_time_cache::TravelTimeService;
use crate::web::PgPool;

pub struct SyncService {
    clients_repo: ClientsRepository,
    sync_runs_repo: SyncRunsRepository,
    source: Box<dyn CrmSource>,
    geocoder: Arc<Geocoder>,
    travel: Arc<TravelTimeService>,
}

/// What changed for one synced record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordOutcome {
    Upserted,
    Skipped,
}

impl SyncService {
    pub fn new(
        pool: PgPool,
        source: Box<dyn CrmSource>,
        geocoder: Arc<Geocoder>,
        travel: Arc<TravelTimeService>,
    ) -> Self {
        Self {
            clients_repo: ClientsRepository::new(pool.clone()),
            sync_runs_repo: SyncRunsRepository::new(pool),
            source,
            geocoder,
            travel,
        }
    }

    /// Run one full sync. The run itself only fails on storage errors; an
    /// unreachable CRM closes the run as `failed` and the system keeps
    /// operating on the last successful snapshot.
    pub async fn sync_clients(&self) -> Result<SyncRun> {
        let run_id = self.sync_runs_repo.open().await?;
        info!("Client sync {run_id} started");

        let records = match self.source.fetch_active_clients().await {
            Ok(records) => records,
            Err(e) => {
                error!("Client sync {run_id} failed to fetch from CRM: {e}");
                self.sync_runs_repo
                    .close(
                        run_id,
                        SyncRunStatus::Failed,
                        (0, 0, 0),
                        &[format!("fetch failed: {e}")],
                    )
                    .await?;
                return Ok(self
                    .sync_runs_repo
                    .latest()
                    .await?
                    .expect("run just closed"));
            }
        };

        let mut upserted = 0;
        let mut skipped = 0;
        let mut failed = 0;
        let mut errors: Vec<String> = Vec::new();

        for record in records {
            let crm_id = record.crm_id.clone();
            match self.sync_one(record).await {
                Ok(RecordOutcome::Upserted) => upserted += 1,
                Ok(RecordOutcome::Skipped) => skipped += 1,
                Err(e) => {
                    failed += 1;
                    warn!("Sync failed for CRM record {crm_id}: {e}");
                    errors.push(format!("{crm_id}: {e}"));
                }
            }
        }

        self.sync_runs_repo
            .close(
                run_id,
                SyncRunStatus::Succeeded,
                (upserted, skipped, failed),
                &errors,
            )
            .await?;

        info!(
            "Client sync {run_id} finished: {upserted} upserted, {skipped} skipped, \
             {failed} failed"
        );
        Ok(self
            .sync_runs_repo
            .latest()
            .await?
            .expect("run just closed"))
    }

    async fn sync_one(&self, record: CrmClientRecord) -> Result<RecordOutcome> {
        let existing = self.clients_repo.get_by_crm_id(&record.crm_id).await?;

        let new_point = match (record.latitude, record.longitude) {
            (Some(lat), Some(lng)) => Some(Point::new(lat, lng)),
            _ => None,
        };

        let (address_changed, coords_changed, old_point, mut client, is_new) = match existing {
            Some(existing) => {
                let address_changed = existing.street1.as_deref()
                    != record.address_line.as_deref()
                    || existing.zip_code.as_deref() != record.zip.as_deref()
                    || existing.area_label.as_deref() != record.area_label.as_deref();
                let old_point = existing.point();
                let coords_changed = match (new_point, old_point) {
                    (Some(new), Some(old)) => coord_hash(new) != coord_hash(old),
                    (Some(_), None) => true,
                    _ => false,
                };
                (address_changed, coords_changed, old_point, existing, false)
            }
            None => {
                let mut client = Client::new(record.name.clone(), ClientSource::CrmImport);
                client.crm_id = Some(record.crm_id.clone());
                (true, new_point.is_some(), None, client, true)
            }
        };

        client.display_name = record.name;
        client.crm_id = Some(record.crm_id);
        client.street1 = record.address_line;
        client.city = record.city;
        client.state = record.state;
        client.zip_code = record.zip;
        client.area_label = record.area_label;

        if !address_changed && !coords_changed && !is_new {
            return Ok(RecordOutcome::Skipped);
        }

        if let Some(point) = new_point {
            client.geocode = Some(Geocode {
                point,
                precision: crate::geocodes::GeocodePrecision::Rooftop,
                confidence: 1.0,
                source: GeocodeSource::CrmImport,
                address_used: client.address_text(),
                updated_at: chrono::Utc::now(),
            });
            client.coords_stale = false;
        } else if client.geocode.is_none() || address_changed {
            // No coordinates from the CRM, and the address either is new or
            // moved: compute our own.
            let normalized = addresses::normalize_components(
                client.street1.as_deref(),
                client.city.as_deref(),
                client.state.as_deref(),
                client.zip_code.as_deref(),
            );
            match self.geocoder.geocode(&normalized).await {
                Ok(geocode) => {
                    client.needs_location_verification = geocode.needs_verification();
                    client.geocode = Some(geocode);
                    client.coords_stale = false;
                }
                Err(e) => {
                    warn!(
                        "Re-geocode failed for client {} during sync: {e}",
                        client.display_name
                    );
                    client.geocode = None;
                    client.needs_location_verification = true;
                    client.coords_stale = address_changed;
                }
            }
        }

        // A moved coordinate leaves stale cache rows on both sides.
        if coords_changed
            && let Some(old) = old_point
        {
            if let Err(e) = self
                .travel
                .invalidate_for_entity(EntityKind::Client, old)
                .await
            {
                warn!("Cache invalidation failed for client {}: {e}", client.id);
            }
        }

        if is_new {
            self.clients_repo.insert(client).await?;
        } else {
            self.clients_repo.update(client).await?;
        }
        Ok(RecordOutcome::Upserted)
    }

    pub async fn latest_run(&self) -> Result<Option<SyncRun>> {
        self.sync_runs_repo.latest().await
    }
}
