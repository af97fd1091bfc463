use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CustomerSegment {
    Residential,
    Commercial,
    Industrial,
}

impl CustomerSegment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Residential => "RESIDENTIAL",
            Self::Commercial => "COMMERCIAL",
            Self::Industrial => "INDUSTRIAL",
        }
    }

    /// Usage multiplier applied on top of the hour-of-day base load.
    pub fn usage_multiplier(&self) -> f64 {
        match self {
            Self::Residential => 1.0,
            Self::Commercial => 5.0,
            Self::Industrial => 15.0,
        }
    }
}

impl fmt::Display for CustomerSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown customer segment '{0}'")]
pub struct UnknownSegment(pub String);

impl FromStr for CustomerSegment {
    type Err = UnknownSegment;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RESIDENTIAL" => Ok(Self::Residential),
            "COMMERCIAL" => Ok(Self::Commercial),
            "INDUSTRIAL" => Ok(Self::Industrial),
            other => Err(UnknownSegment(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// A meter resolved once per job and held for the job's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterIdentity {
    pub meter_id: String,
    pub transformer_id: String,
    pub circuit_id: String,
    pub substation_id: String,
    pub segment: CustomerSegment,
    pub geo: Option<GeoPoint>,
    /// True when the identity came from the infrastructure catalog.
    pub production_matched: bool,
}
