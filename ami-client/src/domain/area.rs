use serde::Serialize;
use time::UtcOffset;

use super::meter::GeoPoint;

/// A service territory readings are generated for.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ServiceArea {
    pub name: &'static str,
    /// Short code used as the prefix of synthetic meter ids.
    pub code: &'static str,
    pub latitude: f64,
    pub longitude: f64,
    pub utc_offset_hours: i8,
}

pub const SERVICE_AREAS: &[ServiceArea] = &[
    ServiceArea { name: "TEXAS_GULF_COAST", code: "TGC", latitude: 29.7604, longitude: -95.3698, utc_offset_hours: -6 },
    ServiceArea { name: "CALIFORNIA_CENTRAL_VALLEY", code: "CCV", latitude: 36.7378, longitude: -119.7871, utc_offset_hours: -8 },
    ServiceArea { name: "PACIFIC_NORTHWEST", code: "PNW", latitude: 47.6062, longitude: -122.3321, utc_offset_hours: -8 },
    ServiceArea { name: "MIDWEST_PLAINS", code: "MWP", latitude: 41.2565, longitude: -95.9345, utc_offset_hours: -6 },
    ServiceArea { name: "NORTHEAST_CORRIDOR", code: "NEC", latitude: 40.7128, longitude: -74.0060, utc_offset_hours: -5 },
    ServiceArea { name: "SOUTHEAST_ATLANTIC", code: "SEA", latitude: 33.7490, longitude: -84.3880, utc_offset_hours: -5 },
];

impl ServiceArea {
    pub fn lookup(name: &str) -> Option<&'static ServiceArea> {
        SERVICE_AREAS
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name.trim()))
    }

    pub fn reference_point(&self) -> GeoPoint {
        GeoPoint {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    pub fn utc_offset(&self) -> UtcOffset {
        UtcOffset::from_hms(self.utc_offset_hours, 0, 0).unwrap_or(UtcOffset::UTC)
    }
}
