use std::sync::Arc;

use ami_client::domain::{CustomerSegment, GeoPoint, MeterIdentity, ServiceArea};
use serde::{Deserialize, Serialize};

use crate::session::Warehouse;

/// Maximum distance, in degrees, of a synthetic meter from its area's reference point.
const GEO_JITTER_DEGREES: f64 = 0.25;

/// Where a job's meter fleet comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeterSource {
    #[default]
    Synthetic,
    Catalog { table: String },
}

/// Deterministic synthetic meter for fleet index `i`.
pub fn synthetic_meter(i: usize, area: &ServiceArea, segment_filter: Option<CustomerSegment>) -> MeterIdentity {
    let segment = segment_filter.unwrap_or(match i % 10 {
        0 => CustomerSegment::Commercial,
        1 => CustomerSegment::Industrial,
        _ => CustomerSegment::Residential,
    });

    let code = area.code;
    MeterIdentity {
        meter_id: format!("{code}-MTR-{i:07}"),
        transformer_id: format!("{code}-XFMR-{:05}", i / 8),
        circuit_id: format!("{code}-CKT-{:04}", i / 200),
        substation_id: format!("{code}-SUB-{:03}", i / 2000),
        segment,
        geo: Some(jittered_point(area, i)),
        production_matched: false,
    }
}

pub fn synthetic_fleet(count: usize, area: &ServiceArea, segment_filter: Option<CustomerSegment>) -> Vec<MeterIdentity> {
    (0..count).map(|i| synthetic_meter(i, area, segment_filter)).collect()
}

fn unit_interval(bytes: &[u8]) -> f64 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[..4]);
    f64::from(u32::from_le_bytes(word)) / f64::from(u32::MAX)
}

fn jittered_point(area: &ServiceArea, i: usize) -> GeoPoint {
    let mut hasher = blake3::Hasher::new();
    hasher.update(area.code.as_bytes());
    hasher.update(&(i as u64).to_le_bytes());
    let digest = hasher.finalize();
    let bytes = digest.as_bytes();

    let dlat = (unit_interval(&bytes[0..4]) - 0.5) * 2.0 * GEO_JITTER_DEGREES;
    let dlon = (unit_interval(&bytes[4..8]) - 0.5) * 2.0 * GEO_JITTER_DEGREES;
    GeoPoint {
        latitude: area.latitude + dlat,
        longitude: area.longitude + dlon,
    }
}

/// Resolves the bounded set of meters a job reports for.
#[derive(Clone)]
pub struct FleetResolver {
    warehouse: Option<Arc<dyn Warehouse>>,
}

impl FleetResolver {
    pub fn new(warehouse: Arc<dyn Warehouse>) -> Self {
        Self {
            warehouse: Some(warehouse),
        }
    }

    pub fn synthetic_only() -> Self {
        Self { warehouse: None }
    }

    /// Never fails: catalog problems fall back to a synthetic fleet.
    pub async fn resolve(
        &self,
        count: usize,
        source: &MeterSource,
        area: &ServiceArea,
        segment_filter: Option<CustomerSegment>,
    ) -> Vec<MeterIdentity> {
        let table = match source {
            MeterSource::Synthetic => return synthetic_fleet(count, area, segment_filter),
            MeterSource::Catalog { table } => table,
        };
        if count == 0 {
            return Vec::new();
        }

        let Some(warehouse) = &self.warehouse else {
            tracing::warn!(table = %table, "no warehouse configured for catalog fleet, using synthetic meters");
            metrics::counter!("ami_fleet_catalog_fallback_total").increment(1);
            return synthetic_fleet(count, area, segment_filter);
        };

        match warehouse.sample_meters(table, count, segment_filter).await {
            Ok(mut meters) if !meters.is_empty() => {
                meters.truncate(count);
                tracing::info!(table = %table, meters = meters.len(), "resolved meter fleet from catalog");
                meters
            }
            Ok(_) => {
                tracing::warn!(table = %table, "catalog returned no meters, using synthetic meters");
                metrics::counter!("ami_fleet_catalog_fallback_total").increment(1);
                synthetic_fleet(count, area, segment_filter)
            }
            Err(e) => {
                tracing::warn!(table = %table, error = %e, "catalog meter lookup failed, using synthetic meters");
                metrics::counter!("ami_fleet_catalog_fallback_total").increment(1);
                synthetic_fleet(count, area, segment_filter)
            }
        }
    }
}
