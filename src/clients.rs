//! Client entity: a stationary service recipient with a service location.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geocodes::{Geocode, Point};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingStatus {
    Unpaired,
    Paired,
}

impl PairingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PairingStatus::Unpaired => "unpaired",
            PairingStatus::Paired => "paired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unpaired" => Some(PairingStatus::Unpaired),
            "paired" => Some(PairingStatus::Paired),
            _ => None,
        }
    }
}

/// How a client row entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientSource {
    ManualEntry,
    CrmImport,
    CsvImport,
}

impl ClientSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientSource::ManualEntry => "manual_entry",
            ClientSource::CrmImport => "crm_import",
            ClientSource::CsvImport => "csv_import",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual_entry" => Some(ClientSource::ManualEntry),
            "crm_import" => Some(ClientSource::CrmImport),
            "csv_import" => Some(ClientSource::CsvImport),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: Uuid,
    pub display_name: String,
    pub street1: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    /// Service-area label (borough or equivalent), often from the CRM.
    pub area_label: Option<String>,
    pub notes: Option<String>,
    pub source: ClientSource,
    pub crm_id: Option<String>,
    pub pairing_status: PairingStatus,
    pub paired_technician_id: Option<Uuid>,
    /// Address changed upstream but fresh coordinates have not been
    /// computed yet.
    pub coords_stale: bool,
    pub needs_location_verification: bool,
    pub geocode: Option<Geocode>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Client {
    pub fn new(display_name: String, source: ClientSource) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            display_name,
            street1: None,
            city: None,
            state: None,
            zip_code: None,
            area_label: None,
            notes: None,
            source,
            crm_id: None,
            pairing_status: PairingStatus::Unpaired,
            paired_technician_id: None,
            coords_stale: false,
            needs_location_verification: false,
            geocode: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn point(&self) -> Option<Point> {
        self.geocode.as_ref().map(|g| g.point)
    }

    /// Joined address text for geocoding or display.
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

    /// Whether the matcher has anything at all to locate this client by:
    /// coordinates, an area/zip hint, or a geocodable address.
    pub fn has_location_hint(&self) -> bool {
        self.geocode.is_some()
            || self.zip_code.as_deref().is_some_and(|z| !z.trim().is_empty())
            || self
                .area_label
                .as_deref()
                .is_some_and(|a| !a.trim().is_empty())
            || self.address_text().is_some()
    }
}

/// Diesel row for the clients table. Full-row updates must clear columns
/// that went back to NULL (dropped coordinates), hence treat_none_as_null.
#[derive(Debug, Clone, Queryable, Selectable, Insertable, AsChangeset)]
#[diesel(table_name = crate::schema::clients)]
#[diesel(check_for_backend(diesel::pg::Pg))]
#[diesel(treat_none_as_null = true)]
pub struct ClientModel {
    pub id: Uuid,
    pub display_name: String,
    pub street1: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub area_label: Option<String>,
    pub notes: Option<String>,
    pub source: String,
    pub crm_id: Option<String>,
    pub pairing_status: String,
    pub paired_technician_id: Option<Uuid>,
    pub coords_stale: bool,
    pub needs_location_verification: bool,
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

impl From<ClientModel> for Client {
    fn from(m: ClientModel) -> Self {
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
            notes: m.notes,
            source: ClientSource::parse(&m.source).unwrap_or(ClientSource::CrmImport),
            crm_id: m.crm_id,
            pairing_status: PairingStatus::parse(&m.pairing_status)
                .unwrap_or(PairingStatus::Unpaired),
            paired_technician_id: m.paired_technician_id,
            coords_stale: m.coords_stale,
            needs_location_verification: m.needs_location_verification,
            geocode,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

impl From<Client> for ClientModel {
    fn from(c: Client) -> Self {
        let (lat, lng) = match c.geocode.as_ref() {
            Some(g) => (Some(g.point.latitude), Some(g.point.longitude)),
            None => (None, None),
        };
        Self {
            id: c.id,
            display_name: c.display_name,
            street1: c.street1,
            city: c.city,
            state: c.state,
            zip_code: c.zip_code,
            area_label: c.area_label,
            notes: c.notes,
            source: c.source.as_str().to_string(),
            crm_id: c.crm_id,
            pairing_status: c.pairing_status.as_str().to_string(),
            paired_technician_id: c.paired_technician_id,
            coords_stale: c.coords_stale,
            needs_location_verification: c.needs_location_verification,
            geocode_lat: lat,
            geocode_lng: lng,
            geocode_precision: c.geocode.as_ref().map(|g| g.precision.as_str().to_string()),
            geocode_confidence: c.geocode.as_ref().map(|g| g.confidence),
            geocode_source: c.geocode.as_ref().map(|g| g.source.as_str().to_string()),
            geocode_updated_at: c.geocode.as_ref().map(|g| g.updated_at),
            geocode_address_used: c.geocode.and_then(|g| g.address_used),
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocodes::{GeocodePrecision, GeocodeSource};

    #[test]
    fn address_text_joins_present_parts() {
        let mut c = Client::new("Test Client".to_string(), ClientSource::ManualEntry);
        c.street1 = Some("123 Main St".to_string());
        c.city = Some("Brooklyn".to_string());
        c.state = Some("NY".to_string());
        assert_eq!(c.address_text().as_deref(), Some("123 Main St, Brooklyn, NY"));
    }

    #[test]
    fn location_hint_from_zip_alone() {
        let mut c = Client::new("Z".to_string(), ClientSource::CrmImport);
        assert!(!c.has_location_hint());
        c.zip_code = Some("11201".to_string());
        assert!(c.has_location_hint());
    }

    #[test]
    fn model_round_trip_preserves_geocode() {
        let mut c = Client::new("RT".to_string(), ClientSource::CrmImport);
        c.geocode = Some(Geocode {
            point: Point::new(40.7, -73.95),
            precision: GeocodePrecision::Rooftop,
            confidence: 1.0,
            source: GeocodeSource::FullAddress,
            address_used: Some("123 Main St, Brooklyn, NY 11201, USA".to_string()),
            updated_at: Utc::now(),
        });
        let model: ClientModel = c.clone().into();
        let back: Client = model.into();
        let g = back.geocode.unwrap();
        assert_eq!(g.precision, GeocodePrecision::Rooftop);
        assert_eq!(g.source, GeocodeSource::FullAddress);
        assert_eq!(g.point, Point::new(40.7, -73.95));
    }
}
