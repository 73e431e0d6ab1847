#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geographic types shared by the geocoder and the pipeline.
//!
//! Regions are expressed the way map views express them: a center plus a
//! north-south and east-west extent in meters. [`Region::bounding_box`]
//! converts that to degrees for services that take a view box.

use dispatch_feed_models::{Incident, LocationKey};
use serde::{Deserialize, Serialize};

/// Meters per degree of latitude (mean).
const METERS_PER_DEGREE: f64 = 111_320.0;

/// A WGS84 point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl Coordinate {
    /// Creates a coordinate.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Returns `true` if both components are finite and within WGS84 range.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

/// North-south and east-west extent of a region, in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionSpan {
    /// Total north-south extent.
    pub latitudinal_meters: f64,
    /// Total east-west extent.
    pub longitudinal_meters: f64,
}

impl RegionSpan {
    /// A square span of `meters` on each side.
    #[must_use]
    pub const fn square(meters: f64) -> Self {
        Self {
            latitudinal_meters: meters,
            longitudinal_meters: meters,
        }
    }
}

/// A map region: center plus span.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// Center of the region.
    pub center: Coordinate,
    /// Extent of the region.
    pub span: RegionSpan,
}

/// Axis-aligned bounding box in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Western longitude.
    pub west: f64,
    /// Southern latitude.
    pub south: f64,
    /// Eastern longitude.
    pub east: f64,
    /// Northern latitude.
    pub north: f64,
}

impl BoundingBox {
    /// Returns `true` if `point` lies inside (or on the edge of) the box.
    #[must_use]
    pub fn contains(&self, point: Coordinate) -> bool {
        (self.south..=self.north).contains(&point.latitude)
            && (self.west..=self.east).contains(&point.longitude)
    }
}

impl Region {
    /// Creates a region.
    #[must_use]
    pub const fn new(center: Coordinate, span: RegionSpan) -> Self {
        Self { center, span }
    }

    /// Converts the region to a bounding box in degrees.
    ///
    /// Uses a spherical approximation; longitude degrees shrink with the
    /// cosine of the center latitude. Latitudes are clamped to ±90.
    #[must_use]
    pub fn bounding_box(&self) -> BoundingBox {
        let half_lat = self.span.latitudinal_meters / 2.0 / METERS_PER_DEGREE;
        let cos_lat = self.center.latitude.to_radians().cos().max(1e-6);
        let half_lon = self.span.longitudinal_meters / 2.0 / (METERS_PER_DEGREE * cos_lat);

        BoundingBox {
            west: self.center.longitude - half_lon,
            south: (self.center.latitude - half_lat).max(-90.0),
            east: self.center.longitude + half_lon,
            north: (self.center.latitude + half_lat).min(90.0),
        }
    }

    /// Returns `true` if `point` lies inside the region.
    #[must_use]
    pub fn contains(&self, point: Coordinate) -> bool {
        self.bounding_box().contains(point)
    }
}

/// Extent of the region shown around a single resolved marker.
pub const MARKER_SPAN_METERS: f64 = 500.0;

/// An incident paired with a geocoded coordinate.
///
/// Equality is by [`LocationKey`] only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedLocation {
    /// The incident this position belongs to.
    pub incident: Incident,
    /// Geocoded position of [`Incident::location_text`].
    pub coordinate: Coordinate,
}

impl ResolvedLocation {
    /// Pairs an incident with a coordinate.
    #[must_use]
    pub const fn new(incident: Incident, coordinate: Coordinate) -> Self {
        Self {
            incident,
            coordinate,
        }
    }

    /// Cross-cycle key of the underlying incident.
    #[must_use]
    pub const fn key(&self) -> LocationKey {
        self.incident.key()
    }

    /// Region a detail map zooms to for this marker.
    #[must_use]
    pub const fn marker_region(&self) -> Region {
        Region::new(self.coordinate, RegionSpan::square(MARKER_SPAN_METERS))
    }
}

impl PartialEq for ResolvedLocation {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ResolvedLocation {}

impl std::hash::Hash for ResolvedLocation {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seattle() -> Coordinate {
        Coordinate::new(47.609_722, -122.333_056)
    }

    #[test]
    fn bounding_box_is_centered() {
        let bbox = Region::new(seattle(), RegionSpan::square(90_000.0)).bounding_box();
        assert!(((bbox.north + bbox.south) / 2.0 - seattle().latitude).abs() < 1e-9);
        assert!(((bbox.east + bbox.west) / 2.0 - seattle().longitude).abs() < 1e-9);
        // 45 km either side is roughly 0.404 degrees of latitude.
        assert!((bbox.north - bbox.south - 0.808_5).abs() < 1e-3);
        // Longitude degrees are shorter at 47.6 N, so the box is wider.
        assert!(bbox.east - bbox.west > bbox.north - bbox.south);
    }

    #[test]
    fn bounding_box_clamps_at_the_pole() {
        let region = Region::new(Coordinate::new(89.9, 0.0), RegionSpan::square(100_000.0));
        assert!((region.bounding_box().north - 90.0).abs() < f64::EPSILON);
    }

    #[test]
    fn region_contains_center_not_far_points() {
        let region = Region::new(seattle(), RegionSpan::square(50_000.0));
        assert!(region.contains(seattle()));
        assert!(!region.contains(Coordinate::new(45.5152, -122.6784)));
    }

    #[test]
    fn validates_coordinates() {
        assert!(seattle().is_valid());
        assert!(!Coordinate::new(91.0, 0.0).is_valid());
        assert!(!Coordinate::new(0.0, f64::NAN).is_valid());
    }

    #[test]
    fn marker_region_is_500m() {
        let incident = dispatch_feed_models::Incident {
            id: 0,
            generation: 1,
            is_active: true,
            timestamp: dispatch_feed_models::NaiveDateTime::default(),
            incident_id: "F1".to_string(),
            severity_level: 1,
            units: vec![],
            location_text: "1100 3rd Ave".to_string(),
            label: "Aid Response".to_string(),
        };
        let resolved = ResolvedLocation::new(incident.clone(), seattle());
        assert_eq!(resolved.marker_region().center, seattle());
        assert!((resolved.marker_region().span.latitudinal_meters - 500.0).abs() < f64::EPSILON);

        let moved = ResolvedLocation::new(incident, Coordinate::new(0.0, 0.0));
        assert_eq!(resolved, moved);
    }
}
