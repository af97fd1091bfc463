use serde::Serialize;
use time::OffsetDateTime;

use super::meter::{CustomerSegment, GeoPoint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataQuality {
    Valid,
    Anomaly,
    Outage,
}

impl DataQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "VALID",
            Self::Anomaly => "ANOMALY",
            Self::Outage => "OUTAGE",
        }
    }
}

/// One synthesized interval reading. Created, serialized, sent and dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub meter_id: String,
    pub transformer_id: String,
    pub circuit_id: String,
    pub substation_id: String,
    pub timestamp: OffsetDateTime,
    pub usage_kwh: f64,
    pub voltage: f64,
    pub power_factor: f64,
    pub temperature_c: f64,
    pub segment: CustomerSegment,
    pub service_area: String,
    pub geo: Option<GeoPoint>,
    pub is_outage: bool,
    pub data_quality: DataQuality,
    pub production_matched: bool,
    pub emission_pattern: String,
}
