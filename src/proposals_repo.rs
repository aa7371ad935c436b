//! Repository for match proposals.

use anyhow::Result;
use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use crate::proposals::{ApprovalError, MatchProposal, MatchProposalModel, ProposalStatus};
use crate::web::PgPool;

/// Proposal joined with display names for the operator UI.
#[derive(Debug, Clone)]
pub struct ProposalView {
    pub proposal: MatchProposal,
    pub client_name: String,
    pub technician_name: String,
}

#[derive(Clone)]
pub struct ProposalsRepository {
    pool: PgPool,
}

impl ProposalsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, proposal_id: Uuid) -> Result<Option<MatchProposal>> {
        use crate::schema::match_proposals::dsl::*;

        let pool = self.pool.clone();

        let model = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let model = match_proposals
                .filter(id.eq(proposal_id))
                .select(MatchProposalModel::as_select())
                .first::<MatchProposalModel>(&mut conn)
                .optional()?;

            Ok::<Option<MatchProposalModel>, anyhow::Error>(model)
        })
        .await??;

        Ok(model.map(Into::into))
    }

    pub async fn insert(&self, proposal: MatchProposal) -> Result<MatchProposal> {
        use crate::schema::match_proposals::dsl::*;

        let pool = self.pool.clone();
        let model: MatchProposalModel = proposal.clone().into();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            diesel::insert_into(match_proposals)
                .values(&model)
                .execute(&mut conn)?;

            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(proposal)
    }

    /// Proposals filtered by status (all when `None`), newest first, with
    /// client and technician names joined in.
    pub async fn list(&self, filter: Option<ProposalStatus>) -> Result<Vec<ProposalView>> {
        use crate::schema::clients;
        use crate::schema::match_proposals::dsl::*;
        use crate::schema::technicians;

        let pool = self.pool.clone();

        let rows = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let mut query = match_proposals
                .inner_join(clients::table.on(clients::id.eq(client_id)))
                .inner_join(technicians::table.on(technicians::id.eq(technician_id)))
                .into_boxed();

            if let Some(wanted) = filter {
                query = query.filter(status.eq(wanted.as_str()));
            }

            let rows = query
                .order(created_at.desc())
                .select((
                    MatchProposalModel::as_select(),
                    clients::display_name,
                    technicians::display_name,
                ))
                .load::<(MatchProposalModel, String, String)>(&mut conn)?;

            Ok::<Vec<(MatchProposalModel, String, String)>, anyhow::Error>(rows)
        })
        .await??;

        Ok(rows
            .into_iter()
            .map(|(model, client_name, technician_name)| ProposalView {
                proposal: model.into(),
                client_name,
                technician_name,
            })
            .collect())
    }

    /// Expire a client's open proposals ahead of a new simulation run.
    /// Deferred proposals are left untouched so they stay reviewable.
    pub async fn expire_open_for_client(&self, client: Uuid) -> Result<u64> {
        use crate::schema::match_proposals::dsl::*;

        let pool = self.pool.clone();

        let rows = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let rows = diesel::update(
                match_proposals
                    .filter(client_id.eq(client))
                    .filter(status.eq(ProposalStatus::Proposed.as_str())),
            )
            .set((
                status.eq(ProposalStatus::Expired.as_str()),
                updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)?;

            Ok::<usize, anyhow::Error>(rows)
        })
        .await??;

        Ok(rows as u64)
    }

    /// Move a decidable proposal to `rejected` or `deferred`. Runs in a
    /// transaction with a row lock so a concurrent approval cannot race the
    /// status check.
    pub async fn decide(
        &self,
        proposal_id: Uuid,
        decision: ProposalStatus,
    ) -> Result<MatchProposal, ApprovalError> {
        use crate::schema::match_proposals::dsl::*;

        debug_assert!(matches!(
            decision,
            ProposalStatus::Rejected | ProposalStatus::Deferred
        ));

        let pool = self.pool.clone();

        let model = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().map_err(|e| ApprovalError::Database(e.into()))?;

            conn.transaction::<MatchProposalModel, ApprovalError, _>(|conn| {
                let model = match_proposals
                    .filter(id.eq(proposal_id))
                    .for_update()
                    .select(MatchProposalModel::as_select())
                    .first::<MatchProposalModel>(conn)
                    .optional()?
                    .ok_or(ApprovalError::NotFound)?;

                let current =
                    ProposalStatus::parse(&model.status).ok_or(ApprovalError::NotFound)?;
                if !current.is_decidable() {
                    return Err(ApprovalError::ProposalNotProposed);
                }

                diesel::update(match_proposals.filter(id.eq(proposal_id)))
                    .set((
                        status.eq(decision.as_str()),
                        updated_at.eq(Utc::now()),
                    ))
                    .execute(conn)?;

                let mut updated = model;
                updated.status = decision.as_str().to_string();
                Ok(updated)
            })
        })
        .await
        .map_err(|e| ApprovalError::Database(e.into()))??;

        Ok(model.into())
    }
}
