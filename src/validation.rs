//! Post-hoc match validation: plausibility checks on distance/time ratios
//! and geocode quality.
//!
//! Reasons are structured codes, not strings. Review-severity reasons
//! demote an auto match to needs-review; warnings only annotate.

use serde::{Deserialize, Serialize};

use crate::areas;
use crate::geocodes::{Geocode, GeocodePrecision, GeocodeSource};

const LOW_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    /// Distance under 0.2 mi but travel over 20 minutes: a geocode is
    /// probably wrong.
    ShortDistanceLongTravel,
    /// Distance over 60 mi but travel under 45 minutes: the route is
    /// probably wrong.
    LongDistanceShortTravel,
    BothSidesApproximate,
    BothSidesLowConfidence,
    /// ZIP-centroid geocoding and the two sides' area labels disagree.
    ZipOnlyAreaMismatch,
    OneSideApproximate,
    OneSideLowConfidence,
    /// Average speed under 5 mph: possible routing anomaly.
    LowAverageSpeed,
    /// ZIP-centroid geocoding, but the area labels agree.
    ZipOnlyAreasAgree,
}

impl ReviewReason {
    /// Review-severity reasons demote the match; the rest are warnings.
    pub fn is_review(&self) -> bool {
        matches!(
            self,
            ReviewReason::ShortDistanceLongTravel
                | ReviewReason::LongDistanceShortTravel
                | ReviewReason::BothSidesApproximate
                | ReviewReason::BothSidesLowConfidence
                | ReviewReason::ZipOnlyAreaMismatch
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewReason::ShortDistanceLongTravel => "short_distance_long_travel",
            ReviewReason::LongDistanceShortTravel => "long_distance_short_travel",
            ReviewReason::BothSidesApproximate => "both_sides_approximate",
            ReviewReason::BothSidesLowConfidence => "both_sides_low_confidence",
            ReviewReason::ZipOnlyAreaMismatch => "zip_only_area_mismatch",
            ReviewReason::OneSideApproximate => "one_side_approximate",
            ReviewReason::OneSideLowConfidence => "one_side_low_confidence",
            ReviewReason::LowAverageSpeed => "low_average_speed",
            ReviewReason::ZipOnlyAreasAgree => "zip_only_areas_agree",
        }
    }
}

/// One side of a match as the validator sees it.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchSide<'a> {
    pub geocode: Option<&'a Geocode>,
    /// Service-area label (client side) or home city (technician side).
    pub area_label: Option<&'a str>,
}

impl MatchSide<'_> {
    fn precision(&self) -> Option<GeocodePrecision> {
        self.geocode.map(|g| g.precision)
    }

    fn confidence(&self) -> Option<f64> {
        self.geocode.map(|g| g.confidence)
    }

    fn is_zip_only(&self) -> bool {
        self.geocode
            .is_some_and(|g| g.source == GeocodeSource::ZipOnly)
    }
}

/// Validate one computed match. Missing coordinates on either side are
/// deliberately NOT a reason: the travel time was computed, so coordinates
/// existed at compute time even if they were never persisted.
pub fn validate_match(
    travel_seconds: u32,
    distance_miles: Option<f64>,
    client: MatchSide<'_>,
    technician: MatchSide<'_>,
) -> Vec<ReviewReason> {
    let mut reasons = Vec::new();
    let travel_minutes = f64::from(travel_seconds) / 60.0;

    if let Some(miles) = distance_miles {
        if miles < 0.2 && travel_minutes > 20.0 {
            reasons.push(ReviewReason::ShortDistanceLongTravel);
        }
        if miles > 60.0 && travel_minutes < 45.0 {
            reasons.push(ReviewReason::LongDistanceShortTravel);
        }
        if travel_seconds > 0 {
            let mph = miles / (f64::from(travel_seconds) / 3600.0);
            if mph > 0.0 && mph < 5.0 {
                reasons.push(ReviewReason::LowAverageSpeed);
            }
        }
    }

    let client_approximate = client.precision() == Some(GeocodePrecision::Approximate);
    let technician_approximate = technician.precision() == Some(GeocodePrecision::Approximate);
    match (client_approximate, technician_approximate) {
        (true, true) => reasons.push(ReviewReason::BothSidesApproximate),
        (true, false) | (false, true) => reasons.push(ReviewReason::OneSideApproximate),
        _ => {}
    }

    let client_low = client.confidence().is_some_and(|c| c < LOW_CONFIDENCE);
    let technician_low = technician.confidence().is_some_and(|c| c < LOW_CONFIDENCE);
    match (client_low, technician_low) {
        (true, true) => reasons.push(ReviewReason::BothSidesLowConfidence),
        (true, false) | (false, true) => reasons.push(ReviewReason::OneSideLowConfidence),
        _ => {}
    }

    if client.is_zip_only() || technician.is_zip_only() {
        match (client.area_label, technician.area_label) {
            (Some(a), Some(b)) if !areas::areas_equivalent(a, b) => {
                reasons.push(ReviewReason::ZipOnlyAreaMismatch);
            }
            _ => reasons.push(ReviewReason::ZipOnlyAreasAgree),
        }
    }

    reasons
}

pub fn has_review_reason(reasons: &[ReviewReason]) -> bool {
    reasons.iter().any(ReviewReason::is_review)
}

/// Composite quality score for a match in [0, 1].
pub fn quality_score(client: Option<&Geocode>, technician: Option<&Geocode>) -> f64 {
    let confidences: Vec<f64> = [client, technician]
        .into_iter()
        .flatten()
        .map(|g| g.confidence)
        .collect();
    if confidences.is_empty() {
        return 0.0;
    }
    let mut score = confidences.iter().sum::<f64>() / confidences.len() as f64;

    for side in [client, technician].into_iter().flatten() {
        if side.precision == GeocodePrecision::Approximate {
            score *= 0.7;
        }
        if side.source == GeocodeSource::ZipOnly {
            score *= 0.8;
        }
        if side.source == GeocodeSource::ManualPin {
            score = (score * 1.2).min(1.0);
        }
    }
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocodes::Point;
    use chrono::Utc;

    fn geocode(precision: GeocodePrecision, confidence: f64, source: GeocodeSource) -> Geocode {
        Geocode {
            point: Point::new(40.7, -73.9),
            precision,
            confidence,
            source,
            address_used: None,
            updated_at: Utc::now(),
        }
    }

    fn good() -> Geocode {
        geocode(GeocodePrecision::Rooftop, 1.0, GeocodeSource::FullAddress)
    }

    fn side(g: &Geocode) -> MatchSide<'_> {
        MatchSide {
            geocode: Some(g),
            area_label: None,
        }
    }

    #[test]
    fn clean_match_has_no_reasons() {
        let c = good();
        let t = good();
        let reasons = validate_match(25 * 60, Some(8.0), side(&c), side(&t));
        assert!(reasons.is_empty());
    }

    #[test]
    fn short_distance_long_travel_is_review() {
        let c = good();
        let t = good();
        let reasons = validate_match(25 * 60, Some(0.1), side(&c), side(&t));
        assert!(reasons.contains(&ReviewReason::ShortDistanceLongTravel));
        assert!(has_review_reason(&reasons));
    }

    #[test]
    fn long_distance_short_travel_is_review() {
        let c = good();
        let t = good();
        let reasons = validate_match(30 * 60, Some(80.0), side(&c), side(&t));
        assert!(reasons.contains(&ReviewReason::LongDistanceShortTravel));
    }

    #[test]
    fn one_sided_approximate_is_warning_only() {
        let c = geocode(GeocodePrecision::Approximate, 0.8, GeocodeSource::FullAddress);
        let t = good();
        let reasons = validate_match(20 * 60, Some(5.0), side(&c), side(&t));
        assert!(reasons.contains(&ReviewReason::OneSideApproximate));
        assert!(!has_review_reason(&reasons));
    }

    #[test]
    fn both_sides_approximate_is_review() {
        let c = geocode(GeocodePrecision::Approximate, 0.8, GeocodeSource::CityState);
        let t = geocode(GeocodePrecision::Approximate, 0.7, GeocodeSource::CityState);
        let reasons = validate_match(20 * 60, Some(5.0), side(&c), side(&t));
        assert!(reasons.contains(&ReviewReason::BothSidesApproximate));
        assert!(has_review_reason(&reasons));
    }

    #[test]
    fn both_sides_low_confidence_is_review() {
        let c = geocode(GeocodePrecision::GeometricCenter, 0.4, GeocodeSource::CityState);
        let t = geocode(GeocodePrecision::GeometricCenter, 0.3, GeocodeSource::CityState);
        let reasons = validate_match(20 * 60, Some(5.0), side(&c), side(&t));
        assert!(reasons.contains(&ReviewReason::BothSidesLowConfidence));
    }

    #[test]
    fn zip_only_area_mismatch_is_review() {
        let c = geocode(GeocodePrecision::GeometricCenter, 0.6, GeocodeSource::ZipOnly);
        let t = good();
        let client_side = MatchSide {
            geocode: Some(&c),
            area_label: Some("Brooklyn"),
        };
        let tech_side = MatchSide {
            geocode: Some(&t),
            area_label: Some("Queens"),
        };
        let reasons = validate_match(20 * 60, Some(5.0), client_side, tech_side);
        assert!(reasons.contains(&ReviewReason::ZipOnlyAreaMismatch));
        assert!(has_review_reason(&reasons));
    }

    #[test]
    fn zip_only_with_alias_match_is_warning() {
        let c = geocode(GeocodePrecision::GeometricCenter, 0.6, GeocodeSource::ZipOnly);
        let t = good();
        let client_side = MatchSide {
            geocode: Some(&c),
            area_label: Some("Kings County"),
        };
        let tech_side = MatchSide {
            geocode: Some(&t),
            area_label: Some("Brooklyn"),
        };
        let reasons = validate_match(20 * 60, Some(5.0), client_side, tech_side);
        assert!(reasons.contains(&ReviewReason::ZipOnlyAreasAgree));
        assert!(!has_review_reason(&reasons));
    }

    #[test]
    fn crawl_speed_is_warning() {
        let c = good();
        let t = good();
        // 2 miles in 55 minutes is about 2.2 mph.
        let reasons = validate_match(55 * 60, Some(2.0), side(&c), side(&t));
        assert!(reasons.contains(&ReviewReason::LowAverageSpeed));
        assert!(!has_review_reason(&reasons));
    }

    #[test]
    fn missing_coordinates_alone_are_not_flagged() {
        let reasons = validate_match(20 * 60, Some(5.0), MatchSide::default(), MatchSide::default());
        assert!(reasons.is_empty());
    }

    #[test]
    fn quality_score_average_and_penalties() {
        let c = good();
        let t = good();
        assert_eq!(quality_score(Some(&c), Some(&t)), 1.0);

        let approx = geocode(GeocodePrecision::Approximate, 0.6, GeocodeSource::CityState);
        let score = quality_score(Some(&approx), Some(&t));
        assert!((score - 0.8 * 0.7).abs() < 1e-9);

        let zip = geocode(GeocodePrecision::GeometricCenter, 0.6, GeocodeSource::ZipOnly);
        let score = quality_score(Some(&zip), Some(&t));
        assert!((score - 0.8 * 0.8).abs() < 1e-9);
    }

    #[test]
    fn manual_pin_boost_is_capped() {
        let pin = geocode(GeocodePrecision::Rooftop, 1.0, GeocodeSource::ManualPin);
        let t = good();
        assert_eq!(quality_score(Some(&pin), Some(&t)), 1.0);
    }
}
