//! Operator overrides: rules that force, allow, or forbid a specific
//! (client, technician) pair, optionally within an effective window.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideType {
    LockedAssignment,
    ManualAssignment,
    BlockPair,
}

impl OverrideType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverrideType::LockedAssignment => "LOCKED_ASSIGNMENT",
            OverrideType::ManualAssignment => "MANUAL_ASSIGNMENT",
            OverrideType::BlockPair => "BLOCK_PAIR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LOCKED_ASSIGNMENT" => Some(OverrideType::LockedAssignment),
            "MANUAL_ASSIGNMENT" => Some(OverrideType::ManualAssignment),
            "BLOCK_PAIR" => Some(OverrideType::BlockPair),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Override {
    pub id: Uuid,
    pub client_id: Uuid,
    pub technician_id: Uuid,
    pub override_type: OverrideType,
    pub effective_from: Option<DateTime<Utc>>,
    pub effective_to: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Override {
    pub fn new(client_id: Uuid, technician_id: Uuid, override_type: OverrideType) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_id,
            technician_id,
            override_type,
            effective_from: None,
            effective_to: None,
            notes: None,
            created_at: Utc::now(),
        }
    }

    /// Open bounds are unbounded on that side.
    pub fn is_effective_at(&self, at: DateTime<Utc>) -> bool {
        if let Some(from) = self.effective_from
            && at < from
        {
            return false;
        }
        if let Some(to) = self.effective_to
            && at > to
        {
            return false;
        }
        true
    }
}

/// Diesel row for the match_overrides table.
#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::match_overrides)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OverrideModel {
    pub id: Uuid,
    pub client_id: Uuid,
    pub technician_id: Uuid,
    pub override_type: String,
    pub effective_from: Option<DateTime<Utc>>,
    pub effective_to: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Override> for OverrideModel {
    fn from(o: Override) -> Self {
        Self {
            id: o.id,
            client_id: o.client_id,
            technician_id: o.technician_id,
            override_type: o.override_type.as_str().to_string(),
            effective_from: o.effective_from,
            effective_to: o.effective_to,
            notes: o.notes,
            created_at: o.created_at,
        }
    }
}

impl TryFrom<OverrideModel> for Override {
    type Error = anyhow::Error;

    fn try_from(m: OverrideModel) -> Result<Self, Self::Error> {
        let override_type = OverrideType::parse(&m.override_type)
            .ok_or_else(|| anyhow::anyhow!("unknown override type {}", m.override_type))?;
        Ok(Self {
            id: m.id,
            client_id: m.client_id,
            technician_id: m.technician_id,
            override_type,
            effective_from: m.effective_from,
            effective_to: m.effective_to,
            notes: m.notes,
            created_at: m.created_at,
        })
    }
}

/// Overrides currently in effect, indexed for the matcher's hot path.
///
/// A pair that is both forced and blocked in overlapping windows is an
/// operator data error; the block wins and the conflict is logged.
#[derive(Debug, Default)]
pub struct OverrideSet {
    forced: Vec<(Uuid, Uuid, OverrideType)>,
    blocked: HashSet<(Uuid, Uuid)>,
    /// Forced pairs dropped because the same pair was blocked.
    pub conflicts: Vec<(Uuid, Uuid)>,
}

impl OverrideSet {
    pub fn from_overrides(overrides: Vec<Override>, at: DateTime<Utc>) -> Self {
        let mut forced: Vec<(Uuid, Uuid, OverrideType)> = Vec::new();
        let mut blocked: HashSet<(Uuid, Uuid)> = HashSet::new();

        for o in overrides.into_iter().filter(|o| o.is_effective_at(at)) {
            match o.override_type {
                OverrideType::LockedAssignment | OverrideType::ManualAssignment => {
                    forced.push((o.client_id, o.technician_id, o.override_type));
                }
                OverrideType::BlockPair => {
                    blocked.insert((o.client_id, o.technician_id));
                }
            }
        }

        let mut conflicts = Vec::new();
        forced.retain(|(client_id, technician_id, _)| {
            if blocked.contains(&(*client_id, *technician_id)) {
                error!(
                    "Override conflict: pair (client {client_id}, technician {technician_id}) \
                     is both forced and blocked; the block wins"
                );
                conflicts.push((*client_id, *technician_id));
                false
            } else {
                true
            }
        });

        Self {
            forced,
            blocked,
            conflicts,
        }
    }

    /// Forced pairs (locked and manual) in insertion order.
    pub fn forced_pairs(&self) -> &[(Uuid, Uuid, OverrideType)] {
        &self.forced
    }

    pub fn is_blocked(&self, client_id: Uuid, technician_id: Uuid) -> bool {
        self.blocked.contains(&(client_id, technician_id))
    }

    pub fn is_empty(&self) -> bool {
        self.forced.is_empty() && self.blocked.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn effective_window_bounds() {
        let now = Utc::now();
        let mut o = Override::new(Uuid::new_v4(), Uuid::new_v4(), OverrideType::BlockPair);
        assert!(o.is_effective_at(now));

        o.effective_from = Some(now + Duration::days(1));
        assert!(!o.is_effective_at(now));

        o.effective_from = Some(now - Duration::days(1));
        o.effective_to = Some(now + Duration::days(1));
        assert!(o.is_effective_at(now));

        o.effective_to = Some(now - Duration::hours(1));
        assert!(!o.is_effective_at(now));
    }

    #[test]
    fn block_wins_over_lock_in_overlap() {
        let client = Uuid::new_v4();
        let tech = Uuid::new_v4();
        let set = OverrideSet::from_overrides(
            vec![
                Override::new(client, tech, OverrideType::LockedAssignment),
                Override::new(client, tech, OverrideType::BlockPair),
            ],
            Utc::now(),
        );
        assert!(set.forced_pairs().is_empty());
        assert!(set.is_blocked(client, tech));
        assert_eq!(set.conflicts, vec![(client, tech)]);
    }

    #[test]
    fn expired_overrides_are_ignored() {
        let client = Uuid::new_v4();
        let tech = Uuid::new_v4();
        let mut o = Override::new(client, tech, OverrideType::BlockPair);
        o.effective_to = Some(Utc::now() - Duration::days(1));
        let set = OverrideSet::from_overrides(vec![o], Utc::now());
        assert!(!set.is_blocked(client, tech));
        assert!(set.is_empty());
    }

    #[test]
    fn non_overlapping_lock_and_block_do_not_conflict() {
        let client = Uuid::new_v4();
        let tech = Uuid::new_v4();
        let now = Utc::now();
        let locked = Override::new(client, tech, OverrideType::LockedAssignment);
        let mut block = Override::new(client, tech, OverrideType::BlockPair);
        block.effective_from = Some(now + Duration::days(7));
        let set = OverrideSet::from_overrides(vec![locked, block], now);
        assert_eq!(set.forced_pairs().len(), 1);
        assert!(!set.is_blocked(client, tech));
        assert!(set.conflicts.is_empty());
    }
}
