//! Match proposals: tentative pairings awaiting an operator decision.
//!
//! Transition table:
//!
//! ```text
//! proposed ─ approve ─▶ approved   (terminal, spawns a pairing)
//! proposed ─ reject ──▶ rejected   (terminal)
//! proposed ─ defer ───▶ deferred   (survives future simulation runs)
//! proposed ─ simulate ▶ expired    (terminal)
//! deferred ─ approve ─▶ approved
//! deferred ─ reject ──▶ rejected
//! ```

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Failures of the approval workflow's state-changing operations. The
/// conflict variants map to distinct 409 messages on the API surface.
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("proposal not found")]
    NotFound,
    #[error("client already has an active pairing")]
    ClientAlreadyPaired,
    #[error("technician is locked by an active pairing")]
    TechnicianLocked,
    #[error("proposal is not in a decidable state")]
    ProposalNotProposed,
    #[error("technician has no active pairing")]
    NoActivePairing,
    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

impl From<diesel::result::Error> for ApprovalError {
    fn from(e: diesel::result::Error) -> Self {
        ApprovalError::Database(e.into())
    }
}

impl ApprovalError {
    /// Conflict-class errors, distinguished on the API surface.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ApprovalError::ClientAlreadyPaired
                | ApprovalError::TechnicianLocked
                | ApprovalError::ProposalNotProposed
                | ApprovalError::NoActivePairing
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Proposed,
    Approved,
    Rejected,
    Expired,
    Deferred,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Proposed => "proposed",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Expired => "expired",
            ProposalStatus::Deferred => "deferred",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "proposed" => Some(ProposalStatus::Proposed),
            "approved" => Some(ProposalStatus::Approved),
            "rejected" => Some(ProposalStatus::Rejected),
            "expired" => Some(ProposalStatus::Expired),
            "deferred" => Some(ProposalStatus::Deferred),
            _ => None,
        }
    }

    /// Whether an operator decision (approve/reject) may be applied.
    /// Deferred proposals stay decidable; everything else is terminal.
    pub fn is_decidable(&self) -> bool {
        matches!(self, ProposalStatus::Proposed | ProposalStatus::Deferred)
    }

    /// Whether a new simulation run expires this proposal. Deferred
    /// proposals are deliberately left alone for later review.
    pub fn expires_on_resimulation(&self) -> bool {
        matches!(self, ProposalStatus::Proposed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchProposal {
    pub id: Uuid,
    pub client_id: Uuid,
    pub technician_id: Uuid,
    pub travel_time_minutes: f64,
    pub distance_meters: Option<i32>,
    pub status: ProposalStatus,
    pub simulation_run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MatchProposal {
    pub fn new(
        client_id: Uuid,
        technician_id: Uuid,
        travel_time_minutes: f64,
        distance_meters: Option<i32>,
        simulation_run_id: Uuid,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            client_id,
            technician_id,
            travel_time_minutes,
            distance_meters,
            status: ProposalStatus::Proposed,
            simulation_run_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Diesel row for the match_proposals table.
#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::match_proposals)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MatchProposalModel {
    pub id: Uuid,
    pub client_id: Uuid,
    pub technician_id: Uuid,
    pub travel_time_minutes: f64,
    pub distance_meters: Option<i32>,
    pub status: String,
    pub simulation_run_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<MatchProposal> for MatchProposalModel {
    fn from(p: MatchProposal) -> Self {
        Self {
            id: p.id,
            client_id: p.client_id,
            technician_id: p.technician_id,
            travel_time_minutes: p.travel_time_minutes,
            distance_meters: p.distance_meters,
            status: p.status.as_str().to_string(),
            simulation_run_id: p.simulation_run_id,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

impl From<MatchProposalModel> for MatchProposal {
    fn from(m: MatchProposalModel) -> Self {
        Self {
            id: m.id,
            client_id: m.client_id,
            technician_id: m.technician_id,
            travel_time_minutes: m.travel_time_minutes,
            distance_meters: m.distance_meters,
            status: ProposalStatus::parse(&m.status).unwrap_or(ProposalStatus::Expired),
            simulation_run_id: m.simulation_run_id,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decidable_states() {
        assert!(ProposalStatus::Proposed.is_decidable());
        assert!(ProposalStatus::Deferred.is_decidable());
        assert!(!ProposalStatus::Approved.is_decidable());
        assert!(!ProposalStatus::Rejected.is_decidable());
        assert!(!ProposalStatus::Expired.is_decidable());
    }

    #[test]
    fn only_proposed_expires_on_resimulation() {
        assert!(ProposalStatus::Proposed.expires_on_resimulation());
        assert!(!ProposalStatus::Deferred.expires_on_resimulation());
        assert!(!ProposalStatus::Approved.expires_on_resimulation());
    }

    #[test]
    fn status_round_trips() {
        for s in [
            ProposalStatus::Proposed,
            ProposalStatus::Approved,
            ProposalStatus::Rejected,
            ProposalStatus::Expired,
            ProposalStatus::Deferred,
        ] {
            assert_eq!(ProposalStatus::parse(s.as_str()), Some(s));
        }
    }
}
