//! Serialized shapes of a [`Reading`].
//!
//! The raw object sink writes a flat record with upper-case column keys, one
//! JSON array per object. The staging sinks write one nested record per line.

use ami_client::domain::Reading;
use serde::Serialize;
use time::{OffsetDateTime, UtcOffset};

/// `YYYY-MM-DDTHH:MM:SS.ffffff` in UTC, no offset suffix.
pub fn timestamp_ntz(ts: OffsetDateTime) -> String {
    let ts = ts.to_offset(UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:06}",
        ts.year(),
        u8::from(ts.month()),
        ts.day(),
        ts.hour(),
        ts.minute(),
        ts.second(),
        ts.microsecond()
    )
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct FlatRecord<'a> {
    pub meter_id: &'a str,
    pub transformer_id: &'a str,
    pub circuit_id: &'a str,
    pub substation_id: &'a str,
    pub reading_timestamp: String,
    pub usage_kwh: Option<f64>,
    pub voltage: Option<f64>,
    pub power_factor: Option<f64>,
    pub temperature_c: Option<f64>,
    pub customer_segment: &'static str,
    pub service_area: &'a str,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_outage: bool,
    pub data_quality: &'static str,
    pub production_matched: bool,
    pub emission_pattern: &'a str,
}

impl<'a> From<&'a Reading> for FlatRecord<'a> {
    fn from(r: &'a Reading) -> Self {
        Self {
            meter_id: &r.meter_id,
            transformer_id: &r.transformer_id,
            circuit_id: &r.circuit_id,
            substation_id: &r.substation_id,
            reading_timestamp: timestamp_ntz(r.timestamp),
            usage_kwh: finite(r.usage_kwh),
            voltage: finite(r.voltage),
            power_factor: finite(r.power_factor),
            temperature_c: finite(r.temperature_c),
            customer_segment: r.segment.as_str(),
            service_area: &r.service_area,
            latitude: r.geo.map(|g| g.latitude),
            longitude: r.geo.map(|g| g.longitude),
            is_outage: r.is_outage,
            data_quality: r.data_quality.as_str(),
            production_matched: r.production_matched,
            emission_pattern: &r.emission_pattern,
        }
    }
}

/// A whole batch as one JSON array.
pub fn flat_array(batch: &[Reading]) -> Result<Vec<u8>, serde_json::Error> {
    let records: Vec<FlatRecord<'_>> = batch.iter().map(FlatRecord::from).collect();
    serde_json::to_vec(&records)
}

#[derive(Debug, Serialize)]
pub struct Header<'a> {
    pub message_id: String,
    pub event_time: String,
    pub service_area: &'a str,
    pub emission_pattern: &'a str,
}

#[derive(Debug, Serialize)]
pub struct MeterSection<'a> {
    pub meter_id: &'a str,
    pub transformer_id: &'a str,
    pub circuit_id: &'a str,
    pub substation_id: &'a str,
    pub customer_segment: &'static str,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct ReadingSection {
    pub usage_kwh: Option<f64>,
    pub voltage: Option<f64>,
    pub power_factor: Option<f64>,
    pub temperature_c: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct QualitySection {
    pub is_outage: bool,
    pub data_quality: &'static str,
}

#[derive(Debug, Serialize)]
pub struct Metadata<'a> {
    pub job_id: &'a str,
    pub production_matched: bool,
    pub generated_at: String,
}

#[derive(Debug, Serialize)]
pub struct NestedRecord<'a> {
    pub header: Header<'a>,
    pub meter: MeterSection<'a>,
    pub reading: ReadingSection,
    pub quality: QualitySection,
    pub metadata: Metadata<'a>,
}

impl<'a> NestedRecord<'a> {
    pub fn new(r: &'a Reading, job_id: &'a str, generated_at: OffsetDateTime) -> Self {
        Self {
            header: Header {
                message_id: uuid::Uuid::new_v4().to_string(),
                event_time: timestamp_ntz(r.timestamp),
                service_area: &r.service_area,
                emission_pattern: &r.emission_pattern,
            },
            meter: MeterSection {
                meter_id: &r.meter_id,
                transformer_id: &r.transformer_id,
                circuit_id: &r.circuit_id,
                substation_id: &r.substation_id,
                customer_segment: r.segment.as_str(),
                latitude: r.geo.map(|g| g.latitude),
                longitude: r.geo.map(|g| g.longitude),
            },
            reading: ReadingSection {
                usage_kwh: finite(r.usage_kwh),
                voltage: finite(r.voltage),
                power_factor: finite(r.power_factor),
                temperature_c: finite(r.temperature_c),
            },
            quality: QualitySection {
                is_outage: r.is_outage,
                data_quality: r.data_quality.as_str(),
            },
            metadata: Metadata {
                job_id,
                production_matched: r.production_matched,
                generated_at: timestamp_ntz(generated_at),
            },
        }
    }
}

/// Newline-delimited nested records, trailing newline included.
pub fn ndjson(batch: &[Reading], job_id: &str) -> Result<Vec<u8>, serde_json::Error> {
    let now = OffsetDateTime::now_utc();
    let mut out = Vec::with_capacity(batch.len() * 512);
    for r in batch {
        serde_json::to_writer(&mut out, &NestedRecord::new(r, job_id, now))?;
        out.push(b'\n');
    }
    Ok(out)
}

/// `{prefix}/{YYYY}/{MM}/{DD}/{HH}/{kind}_{job}_{seq:06}_{uuid}.json`
pub fn object_key(prefix: &str, kind: &str, job_id: &str, seq: u64, now: OffsetDateTime) -> String {
    let now = now.to_offset(UtcOffset::UTC);
    let prefix = prefix.trim_matches('/');
    let name = format!(
        "{:04}/{:02}/{:02}/{:02}/{}_{}_{:06}_{}.json",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        kind,
        job_id,
        seq,
        uuid::Uuid::new_v4().simple()
    );
    if prefix.is_empty() {
        name
    } else {
        format!("{prefix}/{name}")
    }
}
