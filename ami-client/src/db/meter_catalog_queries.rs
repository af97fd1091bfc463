use sqlx::PgPool;

use super::{ObjectName, QueryError};
use crate::domain::{CustomerSegment, GeoPoint, MeterIdentity};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CatalogMeterRow {
    pub meter_id: String,
    pub transformer_id: Option<String>,
    pub circuit_id: Option<String>,
    pub substation_id: Option<String>,
    pub customer_segment: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl CatalogMeterRow {
    pub fn into_identity(self) -> MeterIdentity {
        let segment = self
            .customer_segment
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(CustomerSegment::Residential);

        // Only a complete coordinate pair counts as a location.
        let geo = match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(GeoPoint { latitude, longitude }),
            _ => None,
        };

        MeterIdentity {
            meter_id: self.meter_id,
            transformer_id: self.transformer_id.unwrap_or_else(|| "UNKNOWN".to_string()),
            circuit_id: self.circuit_id.unwrap_or_else(|| "UNKNOWN".to_string()),
            substation_id: self.substation_id.unwrap_or_else(|| "UNKNOWN".to_string()),
            segment,
            geo,
            production_matched: true,
        }
    }
}

/// Random sample of up to `limit` meters from an infrastructure catalog table.
pub async fn sample_meters(
    pool: &PgPool,
    table: &str,
    limit: usize,
    segment: Option<CustomerSegment>,
) -> Result<Vec<CatalogMeterRow>, QueryError> {
    let table = ObjectName::parse(table)?;

    let filter = if segment.is_some() {
        "WHERE UPPER(customer_segment) = $2"
    } else {
        ""
    };
    let sql = format!(
        r#"
        SELECT
            meter_id,
            transformer_id,
            circuit_id,
            substation_id,
            customer_segment,
            latitude,
            longitude
        FROM {table}
        {filter}
        ORDER BY RANDOM()
        LIMIT $1
        "#
    );

    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut query = sqlx::query_as::<_, CatalogMeterRow>(&sql).bind(limit);
    if let Some(segment) = segment {
        query = query.bind(segment.as_str());
    }

    Ok(query.fetch_all(pool).await?)
}
