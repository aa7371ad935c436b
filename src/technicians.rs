//! Technician entity: a mobile service worker with a home location and a
//! transport mode.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geocodes::{Geocode, Point};
use crate::travel_time::TravelMode;

/// How a technician travels to clients. `Both` lets the matcher pick the
/// faster of driving and transit per pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    Car,
    Transit,
    Both,
}

impl TransportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Car => "car",
            TransportMode::Transit => "transit",
            TransportMode::Both => "both",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "car" => Some(TransportMode::Car),
            "transit" => Some(TransportMode::Transit),
            "both" => Some(TransportMode::Both),
            _ => None,
        }
    }

    pub fn allowed_modes(&self) -> &'static [TravelMode] {
        match self {
            TransportMode::Car => &[TravelMode::Driving],
            TransportMode::Transit => &[TravelMode::Transit],
            TransportMode::Both => &[TravelMode::Driving, TravelMode::Transit],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityStatus {
    Available,
    Locked,
}

impl AvailabilityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AvailabilityStatus::Available => "available",
            AvailabilityStatus::Locked => "locked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(AvailabilityStatus::Available),
            "locked" => Some(AvailabilityStatus::Locked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Technician {
    pub id: Uuid,
    pub display_name: String,
    pub street1: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub area_label: Option<String>,
    pub transport_mode: TransportMode,
    pub is_active: bool,
    pub availability_status: AvailabilityStatus,
    pub geocode: Option<Geocode>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Technician {
    pub fn new(display_name: String, transport_mode: TransportMode) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            display_name,
            street1: None,
            city: None,
            state: None,
            zip_code: None,
            area_label: None,
            transport_mode,
            is_active: true,
            availability_status: AvailabilityStatus::Available,
            geocode: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn point(&self) -> Option<Point> {
        self.geocode.as_ref().map(|g| g.point)
    }

    pub fn geocode_confidence(&self) -> f64 {
        self.geocode.as_ref().map(|g| g.confidence).unwrap_or(0.0)
    }

    pub fn address_text(&self) -> Option<String> {
        let parts: Vec<&str> = [
            self.street1.as_deref(),
            self.city.as_deref(),
            self.state.as_deref(),
            self.zip_code.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(", "))
        }
    }
}

/// Diesel row for the technicians table.
#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::technicians)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TechnicianModel {
    pub id: Uuid,
    pub display_name: String,
    pub street1: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub area_label: Option<String>,
    pub transport_mode: String,
    pub is_active: bool,
    pub availability_status: String,
    pub geocode_lat: Option<f64>,
    pub geocode_lng: Option<f64>,
    pub geocode_precision: Option<String>,
    pub geocode_confidence: Option<f64>,
    pub geocode_source: Option<String>,
    pub geocode_address_used: Option<String>,
    pub geocode_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TechnicianModel> for Technician {
    fn from(m: TechnicianModel) -> Self {
        let geocode = Geocode::from_columns(
            m.geocode_lat,
            m.geocode_lng,
            m.geocode_precision.as_deref(),
            m.geocode_confidence,
            m.geocode_source.as_deref(),
            m.geocode_address_used,
            m.geocode_updated_at,
        );
        Self {
            id: m.id,
            display_name: m.display_name,
            street1: m.street1,
            city: m.city,
            state: m.state,
            zip_code: m.zip_code,
            area_label: m.area_label,
            transport_mode: TransportMode::parse(&m.transport_mode).unwrap_or(TransportMode::Car),
            is_active: m.is_active,
            availability_status: AvailabilityStatus::parse(&m.availability_status)
                .unwrap_or(AvailabilityStatus::Available),
            geocode,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

impl From<Technician> for TechnicianModel {
    fn from(t: Technician) -> Self {
        let (lat, lng) = match t.geocode.as_ref() {
            Some(g) => (Some(g.point.latitude), Some(g.point.longitude)),
            None => (None, None),
        };
        Self {
            id: t.id,
            display_name: t.display_name,
            street1: t.street1,
            city: t.city,
            state: t.state,
            zip_code: t.zip_code,
            area_label: t.area_label,
            transport_mode: t.transport_mode.as_str().to_string(),
            is_active: t.is_active,
            availability_status: t.availability_status.as_str().to_string(),
            geocode_lat: lat,
            geocode_lng: lng,
            geocode_precision: t.geocode.as_ref().map(|g| g.precision.as_str().to_string()),
            geocode_confidence: t.geocode.as_ref().map(|g| g.confidence),
            geocode_source: t.geocode.as_ref().map(|g| g.source.as_str().to_string()),
            geocode_updated_at: t.geocode.as_ref().map(|g| g.updated_at),
            geocode_address_used: t.geocode.and_then(|g| g.address_used),
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_modes_per_transport() {
        assert_eq!(TransportMode::Car.allowed_modes(), &[TravelMode::Driving]);
        assert_eq!(TransportMode::Transit.allowed_modes(), &[TravelMode::Transit]);
        assert_eq!(
            TransportMode::Both.allowed_modes(),
            &[TravelMode::Driving, TravelMode::Transit]
        );
    }

    #[test]
    fn status_round_trips() {
        for s in [AvailabilityStatus::Available, AvailabilityStatus::Locked] {
            assert_eq!(AvailabilityStatus::parse(s.as_str()), Some(s));
        }
        for m in [TransportMode::Car, TransportMode::Transit, TransportMode::Both] {
            assert_eq!(TransportMode::parse(m.as_str()), Some(m));
        }
    }
}
