//! Geocode value types: coordinates, precision tiers, confidence scoring.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::addresses::GeocodeMethod;

/// WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub latitude: f64,
    pub longitude: f64,
}

impl Point {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Rough bounds check for the continental US, used to reject obviously
    /// swapped or misplaced manual pins.
    pub fn is_plausibly_continental_us(&self) -> bool {
        (24.0..=50.0).contains(&self.latitude) && (-125.0..=-66.0).contains(&self.longitude)
    }
}

/// Distance between two points using the Haversine formula, in meters.
pub fn haversine_distance_meters(a: Point, b: Point) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;

    let lat1_rad = a.latitude.to_radians();
    let lat2_rad = b.latitude.to_radians();
    let delta_lat = (b.latitude - a.latitude).to_radians();
    let delta_lon = (b.longitude - a.longitude).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

pub const METERS_PER_MILE: f64 = 1_609.344;

/// Precision tiers, inherited verbatim from the geocoding provider's model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GeocodePrecision {
    Rooftop,
    RangeInterpolated,
    GeometricCenter,
    Approximate,
}

impl GeocodePrecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeocodePrecision::Rooftop => "ROOFTOP",
            GeocodePrecision::RangeInterpolated => "RANGE_INTERPOLATED",
            GeocodePrecision::GeometricCenter => "GEOMETRIC_CENTER",
            GeocodePrecision::Approximate => "APPROXIMATE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ROOFTOP" => Some(GeocodePrecision::Rooftop),
            "RANGE_INTERPOLATED" => Some(GeocodePrecision::RangeInterpolated),
            "GEOMETRIC_CENTER" => Some(GeocodePrecision::GeometricCenter),
            "APPROXIMATE" => Some(GeocodePrecision::Approximate),
            _ => None,
        }
    }

    /// Base confidence before address-quality adjustments.
    pub fn base_confidence(&self) -> f64 {
        match self {
            GeocodePrecision::Rooftop => 1.0,
            GeocodePrecision::RangeInterpolated => 0.8,
            GeocodePrecision::GeometricCenter => 0.6,
            GeocodePrecision::Approximate => 0.3,
        }
    }
}

/// Where a stored geocode came from. For provider-geocoded rows this records
/// the method used (strongest available address form); other variants mark
/// operator pins and bulk imports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeocodeSource {
    FullAddress,
    ZipOnly,
    CityState,
    ManualPin,
    CrmImport,
    CsvImport,
    HrmImport,
}

impl GeocodeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeocodeSource::FullAddress => "full_address",
            GeocodeSource::ZipOnly => "zip_only",
            GeocodeSource::CityState => "city_state",
            GeocodeSource::ManualPin => "manual_pin",
            GeocodeSource::CrmImport => "crm_import",
            GeocodeSource::CsvImport => "csv_import",
            GeocodeSource::HrmImport => "hrm_import",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "full_address" => Some(GeocodeSource::FullAddress),
            "zip_only" => Some(GeocodeSource::ZipOnly),
            "city_state" => Some(GeocodeSource::CityState),
            "manual_pin" => Some(GeocodeSource::ManualPin),
            "crm_import" => Some(GeocodeSource::CrmImport),
            "csv_import" => Some(GeocodeSource::CsvImport),
            "hrm_import" => Some(GeocodeSource::HrmImport),
            _ => None,
        }
    }

    pub fn from_method(method: GeocodeMethod) -> Self {
        match method {
            GeocodeMethod::FullAddress => GeocodeSource::FullAddress,
            // Raw canonical strings geocode like weak city/state queries.
            GeocodeMethod::CityState | GeocodeMethod::Raw => GeocodeSource::CityState,
            GeocodeMethod::ZipOnly => GeocodeSource::ZipOnly,
        }
    }
}

/// An immutable geocoding outcome attached to a client or technician.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geocode {
    pub point: Point,
    pub precision: GeocodePrecision,
    pub confidence: f64,
    pub source: GeocodeSource,
    pub address_used: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Geocode {
    /// Whether this geocode should be surfaced for operator review.
    ///
    /// Manual pins are trusted as placed. Everything else needs verification
    /// unless it is a rooftop hit from a full address with decent confidence.
    pub fn needs_verification(&self) -> bool {
        if self.source == GeocodeSource::ManualPin {
            return false;
        }
        self.precision == GeocodePrecision::Approximate
            || self.confidence < 0.5
            || self.source != GeocodeSource::FullAddress
            || self.precision != GeocodePrecision::Rooftop
    }

    /// Rehydrate from the nullable column septet entities store geocodes in.
    /// Rows with coordinates but missing bookkeeping (legacy imports) come
    /// back as low-confidence approximate CRM imports.
    pub fn from_columns(
        lat: Option<f64>,
        lng: Option<f64>,
        precision: Option<&str>,
        confidence: Option<f64>,
        source: Option<&str>,
        address_used: Option<String>,
        updated_at: Option<DateTime<Utc>>,
    ) -> Option<Self> {
        let (lat, lng) = (lat?, lng?);
        Some(Self {
            point: Point::new(lat, lng),
            precision: precision
                .and_then(GeocodePrecision::parse)
                .unwrap_or(GeocodePrecision::Approximate),
            confidence: confidence.unwrap_or(0.0),
            source: source
                .and_then(GeocodeSource::parse)
                .unwrap_or(GeocodeSource::CrmImport),
            address_used,
            updated_at: updated_at.unwrap_or_else(Utc::now),
        })
    }

    pub fn manual_pin(point: Point, address_used: Option<String>) -> Self {
        Self {
            point,
            precision: GeocodePrecision::Rooftop,
            confidence: 1.0,
            source: GeocodeSource::ManualPin,
            address_used,
            updated_at: Utc::now(),
        }
    }
}

/// Confidence for a provider result: base(precision), discounted for rooftop
/// hits on low-quality addresses, and pinned to 0.6 for the common
/// ZIP-centroid case.
pub fn confidence_for(precision: GeocodePrecision, method: GeocodeMethod, quality: f64) -> f64 {
    if method == GeocodeMethod::ZipOnly && precision == GeocodePrecision::GeometricCenter {
        return 0.6;
    }
    let mut confidence = precision.base_confidence();
    if precision == GeocodePrecision::Rooftop && quality < 0.5 {
        confidence *= 0.8;
    }
    confidence
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_known_distance() {
        // Lower Manhattan to downtown Brooklyn, roughly 2.6 km.
        let a = Point::new(40.7128, -74.0060);
        let b = Point::new(40.6925, -73.9900);
        let d = haversine_distance_meters(a, b);
        assert!((2_000.0..3_500.0).contains(&d), "got {d}");
    }

    #[test]
    fn precision_round_trips() {
        for p in [
            GeocodePrecision::Rooftop,
            GeocodePrecision::RangeInterpolated,
            GeocodePrecision::GeometricCenter,
            GeocodePrecision::Approximate,
        ] {
            assert_eq!(GeocodePrecision::parse(p.as_str()), Some(p));
        }
        assert_eq!(GeocodePrecision::parse("rooftop"), None);
    }

    #[test]
    fn confidence_base_values() {
        assert_eq!(
            confidence_for(GeocodePrecision::Rooftop, GeocodeMethod::FullAddress, 0.9),
            1.0
        );
        assert_eq!(
            confidence_for(
                GeocodePrecision::RangeInterpolated,
                GeocodeMethod::FullAddress,
                0.9
            ),
            0.8
        );
        assert_eq!(
            confidence_for(GeocodePrecision::Approximate, GeocodeMethod::CityState, 0.4),
            0.3
        );
    }

    #[test]
    fn rooftop_on_poor_address_is_discounted() {
        let c = confidence_for(GeocodePrecision::Rooftop, GeocodeMethod::FullAddress, 0.4);
        assert!((c - 0.8).abs() < 1e-9);
    }

    #[test]
    fn zip_centroid_is_pinned() {
        let c = confidence_for(GeocodePrecision::GeometricCenter, GeocodeMethod::ZipOnly, 0.15);
        assert_eq!(c, 0.6);
    }

    #[test]
    fn manual_pins_never_need_verification() {
        let g = Geocode::manual_pin(Point::new(40.7, -73.9), None);
        assert!(!g.needs_verification());
    }

    #[test]
    fn rooftop_full_address_is_trusted() {
        let g = Geocode {
            point: Point::new(40.7, -73.9),
            precision: GeocodePrecision::Rooftop,
            confidence: 1.0,
            source: GeocodeSource::FullAddress,
            address_used: None,
            updated_at: Utc::now(),
        };
        assert!(!g.needs_verification());
    }

    #[test]
    fn weaker_results_need_verification() {
        let base = Geocode {
            point: Point::new(40.7, -73.9),
            precision: GeocodePrecision::Rooftop,
            confidence: 1.0,
            source: GeocodeSource::FullAddress,
            address_used: None,
            updated_at: Utc::now(),
        };
        let interpolated = Geocode {
            precision: GeocodePrecision::RangeInterpolated,
            ..base.clone()
        };
        assert!(interpolated.needs_verification());
        let zip_only = Geocode {
            source: GeocodeSource::ZipOnly,
            ..base.clone()
        };
        assert!(zip_only.needs_verification());
        let low_confidence = Geocode {
            confidence: 0.4,
            ..base
        };
        assert!(low_confidence.needs_verification());
    }

    #[test]
    fn continental_us_bounds() {
        assert!(Point::new(40.7, -73.9).is_plausibly_continental_us());
        assert!(!Point::new(51.5, -0.1).is_plausibly_continental_us());
        assert!(!Point::new(-40.7, 73.9).is_plausibly_continental_us());
    }
}
