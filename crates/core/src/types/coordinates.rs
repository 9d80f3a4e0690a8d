//! Geographic coordinates and bounding boxes.

use serde::{Deserialize, Serialize};

/// Tolerance used when comparing stored coordinates against expected ones.
pub const COORDINATE_TOLERANCE: f64 = 1e-6;

/// Mean Earth radius used for great-circle distances.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A WGS84 latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Whether both axes are within `tolerance` of `other`.
    #[must_use]
    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        (self.latitude - other.latitude).abs() <= tolerance
            && (self.longitude - other.longitude).abs() <= tolerance
    }

    /// Whether the point falls inside Brazil's bounding box.
    ///
    /// Providers occasionally resolve ambiguous street names to another
    /// country; such results are discarded.
    #[must_use]
    pub fn is_within_brazil(&self) -> bool {
        BRAZIL.contains(self)
    }

    /// Finite and within the latitude/longitude ranges.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Great-circle (haversine) distance in kilometres.
    #[must_use]
    pub fn distance_km(&self, other: &Self) -> f64 {
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lng = (other.longitude - self.longitude).to_radians();
        let a = (d_lat / 2.0).sin().powi(2)
            + self.latitude.to_radians().cos()
                * other.latitude.to_radians().cos()
                * (d_lng / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
    }

    /// Offset both axes by the given deltas.
    #[must_use]
    pub fn offset(&self, d_latitude: f64, d_longitude: f64) -> Self {
        Self::new(self.latitude + d_latitude, self.longitude + d_longitude)
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

/// An axis-aligned box in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl BoundingBox {
    /// Square box extending `radius` degrees from `center` on each axis.
    #[must_use]
    pub fn around(center: Coordinates, radius: f64) -> Self {
        Self {
            north: center.latitude + radius,
            south: center.latitude - radius,
            east: center.longitude + radius,
            west: center.longitude - radius,
        }
    }

    /// Inclusive containment check.
    #[must_use]
    pub fn contains(&self, point: &Coordinates) -> bool {
        (self.south..=self.north).contains(&point.latitude)
            && (self.west..=self.east).contains(&point.longitude)
    }
}

/// Brazil, including offshore islands close to the coast.
pub const BRAZIL: BoundingBox = BoundingBox {
    north: 5.3,
    south: -33.8,
    east: -28.8,
    west: -73.8,
};
