//! Repository for pairings, including the atomic approval and reopen
//! transactions.
//!
//! Approve and reopen serialize per technician and per client through
//! `SELECT ... FOR UPDATE` row locks inside a single transaction, so the
//! one-active-pairing invariants hold even across processes.

use anyhow::Result;
use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use crate::clients::PairingStatus;
use crate::pairings::{Pairing, PairingModel, PairingState};
use crate::proposals::{ApprovalError, MatchProposalModel, ProposalStatus};
use crate::technicians::AvailabilityStatus;
use crate::web::PgPool;

#[derive(Clone)]
pub struct PairingsRepository {
    pool: PgPool,
}

impl PairingsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn active_for_technician(&self, technician: Uuid) -> Result<Vec<Pairing>> {
        use crate::schema::pairings::dsl::*;

        let pool = self.pool.clone();

        let models = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let models = pairings
                .filter(technician_id.eq(technician))
                .filter(status.eq(PairingState::Active.as_str()))
                .select(PairingModel::as_select())
                .load::<PairingModel>(&mut conn)?;

            Ok::<Vec<PairingModel>, anyhow::Error>(models)
        })
        .await??;

        Ok(models.into_iter().map(Into::into).collect())
    }

    pub async fn active_for_client(&self, client: Uuid) -> Result<Vec<Pairing>> {
        use crate::schema::pairings::dsl::*;

        let pool = self.pool.clone();

        let models = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let models = pairings
                .filter(client_id.eq(client))
                .filter(status.eq(PairingState::Active.as_str()))
                .select(PairingModel::as_select())
                .load::<PairingModel>(&mut conn)?;

            Ok::<Vec<PairingModel>, anyhow::Error>(models)
        })
        .await??;

        Ok(models.into_iter().map(Into::into).collect())
    }

    /// Approve a proposal: atomically mark it approved, create the active
    /// pairing, pair the client and lock the technician.
    ///
    /// Exactly one of two concurrent calls for the same proposal succeeds;
    /// the loser sees the status flip under its row lock and gets
    /// `ProposalNotProposed`.
    pub async fn approve_proposal(&self, proposal_id: Uuid) -> Result<Pairing, ApprovalError> {
        use crate::schema::clients;
        use crate::schema::match_proposals;
        use crate::schema::pairings;
        use crate::schema::technicians;

        let pool = self.pool.clone();

        let pairing_model = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| ApprovalError::Database(e.into()))?;

            conn.transaction::<PairingModel, ApprovalError, _>(|conn| {
                let proposal = match_proposals::table
                    .filter(match_proposals::id.eq(proposal_id))
                    .for_update()
                    .select(MatchProposalModel::as_select())
                    .first::<MatchProposalModel>(conn)
                    .optional()?
                    .ok_or(ApprovalError::NotFound)?;

                let current =
                    ProposalStatus::parse(&proposal.status).ok_or(ApprovalError::NotFound)?;
                if !current.is_decidable() {
                    return Err(ApprovalError::ProposalNotProposed);
                }

                // Serialize against other approvals/reopens touching the
                // same client or technician.
                let locked_client: Option<Uuid> = clients::table
                    .filter(clients::id.eq(proposal.client_id))
                    .for_update()
                    .select(clients::id)
                    .first::<Uuid>(conn)
                    .optional()?;
                if locked_client.is_none() {
                    return Err(ApprovalError::NotFound);
                }
                let locked_technician: Option<Uuid> = technicians::table
                    .filter(technicians::id.eq(proposal.technician_id))
                    .for_update()
                    .select(technicians::id)
                    .first::<Uuid>(conn)
                    .optional()?;
                if locked_technician.is_none() {
                    return Err(ApprovalError::NotFound);
                }

                let client_active: i64 = pairings::table
                    .filter(pairings::client_id.eq(proposal.client_id))
                    .filter(pairings::status.eq(PairingState::Active.as_str()))
                    .count()
                    .get_result(conn)?;
                if client_active > 0 {
                    return Err(ApprovalError::ClientAlreadyPaired);
                }

                let technician_active: i64 = pairings::table
                    .filter(pairings::technician_id.eq(proposal.technician_id))
                    .filter(pairings::status.eq(PairingState::Active.as_str()))
                    .count()
                    .get_result(conn)?;
                if technician_active > 0 {
                    return Err(ApprovalError::TechnicianLocked);
                }

                let now = Utc::now();
                let pairing = PairingModel {
                    id: Uuid::new_v4(),
                    client_id: proposal.client_id,
                    technician_id: proposal.technician_id,
                    proposal_id: Some(proposal.id),
                    status: PairingState::Active.as_str().to_string(),
                    created_at: now,
                    ended_at: None,
                };
                diesel::insert_into(pairings::table)
                    .values(&pairing)
                    .execute(conn)?;

                diesel::update(
                    match_proposals::table.filter(match_proposals::id.eq(proposal.id)),
                )
                .set((
                    match_proposals::status.eq(ProposalStatus::Approved.as_str()),
                    match_proposals::updated_at.eq(now),
                ))
                .execute(conn)?;

                diesel::update(clients::table.filter(clients::id.eq(proposal.client_id)))
                    .set((
                        clients::pairing_status.eq(PairingStatus::Paired.as_str()),
                        clients::paired_technician_id.eq(Some(proposal.technician_id)),
                        clients::updated_at.eq(now),
                    ))
                    .execute(conn)?;

                diesel::update(
                    technicians::table.filter(technicians::id.eq(proposal.technician_id)),
                )
                .set((
                    technicians::availability_status
                        .eq(AvailabilityStatus::Locked.as_str()),
                    technicians::updated_at.eq(now),
                ))
                .execute(conn)?;

                Ok(pairing)
            })
        })
        .await
        .map_err(|e| ApprovalError::Database(e.into()))??;

        Ok(pairing_model.into())
    }

    /// Reopen a technician: atomically deactivate all of their active
    /// pairings, unpair the affected clients and free the technician.
    /// Returns the number of pairings closed.
    pub async fn reopen_technician(&self, technician: Uuid) -> Result<u64, ApprovalError> {
        use crate::schema::clients;
        use crate::schema::pairings;
        use crate::schema::technicians;

        let pool = self.pool.clone();

        let closed = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| ApprovalError::Database(e.into()))?;

            conn.transaction::<u64, ApprovalError, _>(|conn| {
                let locked_technician: Option<Uuid> = technicians::table
                    .filter(technicians::id.eq(technician))
                    .for_update()
                    .select(technicians::id)
                    .first::<Uuid>(conn)
                    .optional()?;
                if locked_technician.is_none() {
                    return Err(ApprovalError::NotFound);
                }

                let active: Vec<PairingModel> = pairings::table
                    .filter(pairings::technician_id.eq(technician))
                    .filter(pairings::status.eq(PairingState::Active.as_str()))
                    .for_update()
                    .select(PairingModel::as_select())
                    .load::<PairingModel>(conn)?;
                if active.is_empty() {
                    return Err(ApprovalError::NoActivePairing);
                }

                let now = Utc::now();
                diesel::update(
                    pairings::table
                        .filter(pairings::technician_id.eq(technician))
                        .filter(pairings::status.eq(PairingState::Active.as_str())),
                )
                .set((
                    pairings::status.eq(PairingState::Inactive.as_str()),
                    pairings::ended_at.eq(Some(now)),
                ))
                .execute(conn)?;

                for pairing in &active {
                    diesel::update(clients::table.filter(clients::id.eq(pairing.client_id)))
                        .set((
                            clients::pairing_status.eq(PairingStatus::Unpaired.as_str()),
                            clients::paired_technician_id.eq(None::<Uuid>),
                            clients::updated_at.eq(now),
                        ))
                        .execute(conn)?;
                }

                diesel::update(technicians::table.filter(technicians::id.eq(technician)))
                    .set((
                        technicians::availability_status
                            .eq(AvailabilityStatus::Available.as_str()),
                        technicians::updated_at.eq(now),
                    ))
                    .execute(conn)?;

                Ok(active.len() as u64)
            })
        })
        .await
        .map_err(|e| ApprovalError::Database(e.into()))??;

        Ok(closed)
    }
}
