//! The per-job worker loop shared by every sink.
//!
//! A job resolves its fleet once, sets up its [`Destination`], then repeats:
//! check the registry for a stop request, synthesize a batch, deliver it,
//! record the outcome, sleep. Delivery failures are counted and followed by a
//! fixed backoff; only setup failures end a job early.

use std::time::Duration;

use ami_client::domain::{CustomerSegment, EmissionPattern, MeterIdentity, Reading, ServiceArea};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    generator::{synthesize, FleetResolver, MeterSource},
    jobs::SinkKind,
    registry::{JobRegistry, JobStatus},
    session::WarehouseError,
    storage::StorageError,
};

#[derive(thiserror::Error, Debug)]
pub enum DeliveryError {
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("local file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum SetupError {
    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub rows: usize,
    /// Statements executed or objects written for the batch.
    pub batches: usize,
}

/// Where a job's batches go.
#[async_trait::async_trait]
pub trait Destination: Send {
    fn kind(&self) -> SinkKind;

    /// One-time preparation before the first batch. Errors here are fatal.
    async fn setup(&mut self) -> Result<(), SetupError> {
        Ok(())
    }

    async fn deliver(&mut self, batch: &[Reading]) -> Result<DeliveryReceipt, DeliveryError>;

    /// Runs after every successful delivery. Returns the number of ingestion
    /// pipeline refreshes it issued.
    async fn after_delivery(&mut self) -> usize {
        0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CadenceSpec {
    Rate { rows_per_second: u32 },
    Fixed { batch_size: usize, interval_ms: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub batch_size: usize,
    pub interval: Duration,
}

impl CadenceSpec {
    pub fn cadence(&self) -> Option<Cadence> {
        match *self {
            CadenceSpec::Rate { rows_per_second } if rows_per_second > 0 => Some(Cadence {
                batch_size: rows_per_second as usize,
                interval: Duration::from_secs(1),
            }),
            CadenceSpec::Fixed {
                batch_size,
                interval_ms,
            } if batch_size > 0 && interval_ms > 0 => Some(Cadence {
                batch_size,
                interval: Duration::from_millis(interval_ms),
            }),
            _ => None,
        }
    }
}

/// Per-adapter retry state: ATTEMPTING -> BACKOFF -> ATTEMPTING, forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Attempting,
    Backoff(Duration),
}

impl DeliveryState {
    pub fn after<T, E>(outcome: &Result<T, E>, backoff: Duration) -> Self {
        match outcome {
            Ok(_) => DeliveryState::Attempting,
            Err(_) => DeliveryState::Backoff(backoff),
        }
    }

    /// How long to wait before the next iteration.
    pub fn pause(&self, interval: Duration) -> Duration {
        match self {
            DeliveryState::Attempting => interval,
            DeliveryState::Backoff(d) => *d,
        }
    }
}

/// Readings for the next interval: the reporting share of the fleet, capped
/// at `batch_size`, taken round-robin so every meter reports over time.
pub fn next_batch<R: Rng + ?Sized>(
    rng: &mut R,
    fleet: &[MeterIdentity],
    cursor: &mut usize,
    batch_size: usize,
    area: &ServiceArea,
    pattern: &EmissionPattern,
    now: OffsetDateTime,
) -> Vec<Reading> {
    if fleet.is_empty() {
        return Vec::new();
    }

    let n = batch_size.min(pattern.reporting_count(fleet.len()));
    let start = *cursor % fleet.len();
    let batch = (0..n)
        .map(|k| synthesize(rng, &fleet[(start + k) % fleet.len()], area, pattern, now))
        .collect();
    *cursor = (start + n) % fleet.len();
    batch
}

/// Everything a worker needs besides its destination.
pub struct JobContext {
    pub job_id: String,
    pub registry: JobRegistry,
    pub fleet: FleetResolver,
    pub area: &'static ServiceArea,
    pub pattern: &'static EmissionPattern,
    pub meter_count: usize,
    pub meter_source: MeterSource,
    pub segment_filter: Option<CustomerSegment>,
    pub cadence: Cadence,
    pub backoff: Duration,
}

fn stop_observed(registry: &JobRegistry, job_id: &str) -> bool {
    !matches!(registry.status(job_id), Some(JobStatus::Starting | JobStatus::Running))
}

fn finish_stopped(registry: &JobRegistry, job_id: &str) {
    match registry.transition(job_id, JobStatus::Stopped) {
        Ok(_) => tracing::info!(job_id, "job stopped"),
        Err(e) => tracing::debug!(job_id, error = %e, "job left registry before stopping"),
    }
}

/// Drive one job until it is stopped, removed, or fails setup.
pub async fn run_job(ctx: JobContext, mut destination: Box<dyn Destination>) {
    let JobContext {
        job_id,
        registry,
        fleet,
        area,
        pattern,
        meter_count,
        meter_source,
        segment_filter,
        cadence,
        backoff,
    } = ctx;
    let job_id = job_id.as_str();
    let sink = destination.kind().as_str();

    let meters = fleet.resolve(meter_count, &meter_source, area, segment_filter).await;
    registry.set_fleet_size(job_id, meters.len());

    if stop_observed(&registry, job_id) {
        finish_stopped(&registry, job_id);
        return;
    }

    if let Err(e) = destination.setup().await {
        tracing::error!(job_id, sink, error = %e, "job setup failed");
        metrics::counter!("ami_jobs_failed_total").increment(1);
        registry.fail(job_id, e.to_string());
        return;
    }

    if registry.transition(job_id, JobStatus::Running).is_ok() {
        tracing::info!(
            job_id,
            sink,
            meters = meters.len(),
            batch_size = cadence.batch_size,
            interval_ms = cadence.interval.as_millis() as u64,
            "job running"
        );
    }

    let mut rng = StdRng::from_entropy();
    let mut cursor = 0usize;

    loop {
        match registry.status(job_id) {
            None => {
                tracing::info!(job_id, "job removed from registry, worker exiting");
                return;
            }
            Some(JobStatus::Stopping) => break,
            Some(_) => {}
        }

        let batch = next_batch(
            &mut rng,
            &meters,
            &mut cursor,
            cadence.batch_size,
            area,
            pattern,
            OffsetDateTime::now_utc(),
        );

        let state = if batch.is_empty() {
            DeliveryState::Attempting
        } else {
            let started = std::time::Instant::now();
            let outcome = destination.deliver(&batch).await;
            match &outcome {
                Ok(receipt) => {
                    registry.record_delivery(job_id, receipt.rows, receipt.batches);
                    metrics::counter!("ami_rows_delivered_total", "sink" => sink).increment(receipt.rows as u64);
                    metrics::counter!("ami_batches_delivered_total", "sink" => sink).increment(receipt.batches as u64);
                    metrics::histogram!("ami_delivery_latency_seconds", "sink" => sink)
                        .record(started.elapsed().as_secs_f64());
                    tracing::debug!(job_id, sink, rows = receipt.rows, "batch delivered");

                    let refreshed = destination.after_delivery().await;
                    if refreshed > 0 {
                        registry.record_refreshes(job_id, refreshed);
                    }
                }
                Err(e) => {
                    tracing::warn!(job_id, sink, error = %e, backoff_ms = backoff.as_millis() as u64, "batch delivery failed");
                    metrics::counter!("ami_delivery_errors_total", "sink" => sink).increment(1);
                    registry.record_error(job_id, e.to_string());
                }
            }
            DeliveryState::after(&outcome, backoff)
        };

        tokio::time::sleep(state.pause(cadence.interval)).await;
    }

    finish_stopped(&registry, job_id);
}
