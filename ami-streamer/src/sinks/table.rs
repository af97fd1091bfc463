use std::sync::Arc;

use ami_client::{db::ObjectName, domain::Reading};
use serde::Deserialize;
use time::OffsetDateTime;

use super::wire::timestamp_ntz;
use crate::{
    jobs::SinkKind,
    pipeline::{DeliveryError, DeliveryReceipt, Destination, SetupError},
    session::{Warehouse, WarehouseError},
};

const COLUMNS: &[&str] = &[
    "METER_ID",
    "TRANSFORMER_ID",
    "CIRCUIT_ID",
    "SUBSTATION_ID",
    "READING_TIMESTAMP",
    "USAGE_KWH",
    "VOLTAGE",
    "POWER_FACTOR",
    "TEMPERATURE_C",
    "CUSTOMER_SEGMENT",
    "SERVICE_AREA",
    "LATITUDE",
    "LONGITUDE",
    "IS_OUTAGE",
    "DATA_QUALITY",
    "PRODUCTION_MATCHED",
    "EMISSION_PATTERN",
];

/// How a warehouse reads backslashes inside single-quoted literals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringEscaping {
    /// Backslash is an ordinary character (Postgres with
    /// `standard_conforming_strings=on`).
    #[default]
    Standard,
    /// Backslash starts an escape sequence (Snowflake).
    Backslash,
}

/// A value inlined into an INSERT statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlLiteral<'a> {
    Null,
    Bool(bool),
    Number(f64),
    Text(&'a str),
    Timestamp(OffsetDateTime),
}

impl SqlLiteral<'_> {
    pub fn render(&self, escaping: StringEscaping) -> String {
        match self {
            SqlLiteral::Null => "NULL".to_string(),
            SqlLiteral::Bool(true) => "TRUE".to_string(),
            SqlLiteral::Bool(false) => "FALSE".to_string(),
            SqlLiteral::Number(v) if v.is_finite() => v.to_string(),
            SqlLiteral::Number(_) => "NULL".to_string(),
            SqlLiteral::Text(s) => {
                let mut out = String::with_capacity(s.len() + 2);
                out.push('\'');
                for c in s.chars() {
                    match c {
                        '\'' => out.push_str("''"),
                        '\\' if escaping == StringEscaping::Backslash => out.push_str("\\\\"),
                        c => out.push(c),
                    }
                }
                out.push('\'');
                out
            }
            SqlLiteral::Timestamp(ts) => format!("TIMESTAMP '{}'", timestamp_ntz(*ts).replace('T', " ")),
        }
    }
}

fn row_literals(r: &Reading) -> [SqlLiteral<'_>; 17] {
    use SqlLiteral::*;
    [
        Text(&r.meter_id),
        Text(&r.transformer_id),
        Text(&r.circuit_id),
        Text(&r.substation_id),
        Timestamp(r.timestamp),
        Number(r.usage_kwh),
        Number(r.voltage),
        Number(r.power_factor),
        Number(r.temperature_c),
        Text(r.segment.as_str()),
        Text(&r.service_area),
        r.geo.map_or(Null, |g| Number(g.latitude)),
        r.geo.map_or(Null, |g| Number(g.longitude)),
        Bool(r.is_outage),
        Text(r.data_quality.as_str()),
        Bool(r.production_matched),
        Text(&r.emission_pattern),
    ]
}

/// One multi-row INSERT for the whole batch.
pub fn insert_statement(table: &ObjectName, batch: &[Reading], escaping: StringEscaping) -> String {
    let mut sql = format!("INSERT INTO {table} ({}) VALUES ", COLUMNS.join(", "));
    for (i, r) in batch.iter().enumerate() {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for (j, v) in row_literals(r).iter().enumerate() {
            if j > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&v.render(escaping));
        }
        sql.push(')');
    }
    sql
}

/// Inserts each batch into a warehouse table.
pub struct TableSink {
    warehouse: Arc<dyn Warehouse>,
    target: Option<String>,
    escaping: StringEscaping,
    table: Option<ObjectName>,
}

impl TableSink {
    pub fn new(warehouse: Arc<dyn Warehouse>, target: Option<String>, escaping: StringEscaping) -> Self {
        Self {
            warehouse,
            target,
            escaping,
            table: None,
        }
    }
}

#[async_trait::async_trait]
impl Destination for TableSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Table
    }

    async fn setup(&mut self) -> Result<(), SetupError> {
        let target = self.target.as_deref().ok_or(SetupError::MissingParameter("target"))?;
        let table = ObjectName::parse(target).map_err(|e| SetupError::InvalidParameter(e.to_string()))?;
        self.warehouse.execute(&format!("SELECT 1 FROM {table} LIMIT 0")).await?;
        tracing::info!(table = %table, "table sink ready");
        self.table = Some(table);
        Ok(())
    }

    async fn deliver(&mut self, batch: &[Reading]) -> Result<DeliveryReceipt, DeliveryError> {
        let table = self
            .table
            .as_ref()
            .ok_or_else(|| WarehouseError::Query("table sink used before setup".to_string()))?;
        self.warehouse.execute(&insert_statement(table, batch, self.escaping)).await?;
        Ok(DeliveryReceipt {
            rows: batch.len(),
            batches: 1,
        })
    }
}
