//! Great-circle distance between latitude/longitude points.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Mean Earth radius in metres (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// A latitude/longitude pair in decimal degrees.
///
/// No range validation is performed; out-of-range values are carried as-is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude in degrees, positive north.
    pub latitude: f64,
    /// Longitude in degrees, positive east.
    pub longitude: f64,
}

impl Coordinate {
    /// Create a coordinate.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Parse a `"lat, lng"` string.
    ///
    /// Only the first two comma-separated parts are read, so a trailing
    /// altitude (`"lat, lng, alt"`) is ignored. Returns `None` if either of
    /// them is missing or not a finite number.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.split(',');
        let lat = parts.next()?.trim().parse::<f64>().ok()?;
        let lng = parts.next()?.trim().parse::<f64>().ok()?;
        if !lat.is_finite() || !lng.is_finite() {
            return None;
        }
        Some(Self::new(lat, lng))
    }

    /// Distance to another coordinate in metres.
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> f64 {
        distance(*self, *other)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}, {:.6}", self.latitude, self.longitude)
    }
}

/// Haversine distance between two coordinates, in metres.
///
/// Symmetric, zero for identical points, and accurate to well under a metre
/// at the few-kilometre scale proximity decisions are made at.
#[must_use]
pub fn distance(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Rounding can push h a hair past 1.0 for antipodal points.
    let c = 2.0 * h.sqrt().min(1.0).asin();
    EARTH_RADIUS_M * c
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_same_point_is_zero() {
        let p = Coordinate::new(-27.526_338_1, 153.095_416_3);
        assert!(distance(p, p).abs() < f64::EPSILON);
    }

    #[test]
    fn test_hundred_metres_north() {
        let origin = Coordinate::new(-27.526_338_1, 153.095_416_3);
        let north = Coordinate::new(-27.525_44, 153.095_416_3);
        let d = distance(origin, north);
        assert!((d - 100.0).abs() < 2.0, "got {d}");
    }

    #[test]
    fn test_known_city_pair() {
        // Brisbane to Sydney, roughly 730 km.
        let brisbane = Coordinate::new(-27.4698, 153.0251);
        let sydney = Coordinate::new(-33.8688, 151.2093);
        let km = distance(brisbane, sydney) / 1000.0;
        assert!((km - 732.0).abs() < 5.0, "got {km}");
    }

    #[test]
    fn test_parse_trims_whitespace() {
        assert_eq!(Coordinate::parse(" 1.0 ,  2.0 "), Some(Coordinate::new(1.0, 2.0)));
        assert_eq!(
            Coordinate::parse("-27.5263381, 153.0954163"),
            Some(Coordinate::new(-27.526_338_1, 153.095_416_3))
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(Coordinate::parse("bad,data"), None);
        assert_eq!(Coordinate::parse("1.0"), None);
        assert_eq!(Coordinate::parse(""), None);
        assert_eq!(Coordinate::parse("NaN, 2.0"), None);
    }

    #[test]
    fn test_parse_ignores_trailing_altitude() {
        assert_eq!(
            Coordinate::parse("1.0, 2.0, 35.5"),
            Some(Coordinate::new(1.0, 2.0))
        );
        assert_eq!(Coordinate::parse("1.0, 2.0,"), Some(Coordinate::new(1.0, 2.0)));
    }

    #[test]
    fn test_parse_keeps_out_of_range_values() {
        assert_eq!(
            Coordinate::parse("123.0, 500.0"),
            Some(Coordinate::new(123.0, 500.0))
        );
    }

    proptest! {
        #[test]
        fn distance_is_symmetric(
            lat1 in -90.0f64..90.0, lon1 in -180.0f64..180.0,
            lat2 in -90.0f64..90.0, lon2 in -180.0f64..180.0,
        ) {
            let a = Coordinate::new(lat1, lon1);
            let b = Coordinate::new(lat2, lon2);
            prop_assert!((distance(a, b) - distance(b, a)).abs() < 1e-6);
        }

        #[test]
        fn distance_to_self_is_zero(lat in -90.0f64..90.0, lon in -180.0f64..180.0) {
            let a = Coordinate::new(lat, lon);
            prop_assert!(distance(a, a).abs() < 1e-9);
        }
    }
}
