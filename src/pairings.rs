//! Pairings: durable 1:1 assignments produced by an approval.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingState {
    Active,
    Inactive,
}

impl PairingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PairingState::Active => "active",
            PairingState::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(PairingState::Active),
            "inactive" => Some(PairingState::Inactive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pairing {
    pub id: Uuid,
    pub client_id: Uuid,
    pub technician_id: Uuid,
    pub proposal_id: Option<Uuid>,
    pub status: PairingState,
    pub created_at: DateTime<Utc>,
    /// Set exactly when the pairing goes inactive.
    pub ended_at: Option<DateTime<Utc>>,
}

/// Diesel row for the pairings table.
#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::pairings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PairingModel {
    pub id: Uuid,
    pub client_id: Uuid,
    pub technician_id: Uuid,
    pub proposal_id: Option<Uuid>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl From<Pairing> for PairingModel {
    fn from(p: Pairing) -> Self {
        Self {
            id: p.id,
            client_id: p.client_id,
            technician_id: p.technician_id,
            proposal_id: p.proposal_id,
            status: p.status.as_str().to_string(),
            created_at: p.created_at,
            ended_at: p.ended_at,
        }
    }
}

impl From<PairingModel> for Pairing {
    fn from(m: PairingModel) -> Self {
        Self {
            id: m.id,
            client_id: m.client_id,
            technician_id: m.technician_id,
            proposal_id: m.proposal_id,
            status: PairingState::parse(&m.status).unwrap_or(PairingState::Inactive),
            created_at: m.created_at,
            ended_at: m.ended_at,
        }
    }
}
