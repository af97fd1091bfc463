//! Shared job registry.
//!
//! One coarse lock covers every read-modify-write so status and counters are
//! never observed half-updated. The lock is never held across an await.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use serde::Serialize;
use time::OffsetDateTime;

use crate::jobs::JobConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl JobStatus {
    /// Allowed moves: forward only, never back to an earlier state.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Starting, Running) | (Starting | Running, Stopping) | (Starting | Running, Failed) | (Stopping, Stopped)
        )
    }

    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Starting | JobStatus::Running | JobStatus::Stopping)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStats {
    pub total_rows: u64,
    pub batches: u64,
    pub errors: u64,
    pub pipeline_refreshes: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_activity: Option<OffsetDateTime>,
    pub last_error: Option<String>,
}

impl JobStats {
    fn new(start_time: OffsetDateTime) -> Self {
        Self {
            total_rows: 0,
            batches: 0,
            errors: 0,
            pipeline_refreshes: 0,
            start_time,
            last_activity: None,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub job_id: String,
    pub status: JobStatus,
    pub config: JobConfig,
    pub stats: JobStats,
    pub fleet_size: Option<usize>,
    pub failure_reason: Option<String>,
}

impl JobRecord {
    pub fn new(job_id: impl Into<String>, config: JobConfig) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Starting,
            config,
            stats: JobStats::new(OffsetDateTime::now_utc()),
            fleet_size: None,
            failure_reason: None,
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum TransitionError {
    #[error("job {0} not found")]
    NotFound(String),
    #[error("job cannot move from {from:?} to {to:?}")]
    Rejected { from: JobStatus, to: JobStatus },
}

/// Cloneable handle to the job map; every worker holds one.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<Mutex<HashMap<String, JobRecord>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when a record with the same id already exists.
    pub fn insert(&self, record: JobRecord) -> bool {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(&record.job_id) {
            return false;
        }
        jobs.insert(record.job_id.clone(), record);
        true
    }

    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.jobs.lock().get(job_id).cloned()
    }

    pub fn status(&self, job_id: &str) -> Option<JobStatus> {
        self.jobs.lock().get(job_id).map(|r| r.status)
    }

    pub fn list(&self) -> Vec<JobRecord> {
        let mut records: Vec<_> = self.jobs.lock().values().cloned().collect();
        records.sort_by(|a, b| a.stats.start_time.cmp(&b.stats.start_time).then_with(|| a.job_id.cmp(&b.job_id)));
        records
    }

    pub fn list_active(&self) -> Vec<JobRecord> {
        self.list().into_iter().filter(|r| r.status.is_active()).collect()
    }

    pub fn remove(&self, job_id: &str) -> Option<JobRecord> {
        self.jobs.lock().remove(job_id)
    }

    pub fn transition(&self, job_id: &str, next: JobStatus) -> Result<JobStatus, TransitionError> {
        let mut jobs = self.jobs.lock();
        let record = jobs
            .get_mut(job_id)
            .ok_or_else(|| TransitionError::NotFound(job_id.to_string()))?;

        let from = record.status;
        if !from.can_transition_to(next) {
            return Err(TransitionError::Rejected { from, to: next });
        }
        record.status = next;
        Ok(from)
    }

    /// Advisory stop. Returns true only if this call moved the job to STOPPING.
    pub fn request_stop(&self, job_id: &str) -> bool {
        self.transition(job_id, JobStatus::Stopping).is_ok()
    }

    /// Mark a job dead after a setup failure. A job already asked to stop
    /// ends as STOPPED instead.
    pub fn fail(&self, job_id: &str, reason: impl Into<String>) -> Option<JobStatus> {
        let mut jobs = self.jobs.lock();
        let record = jobs.get_mut(job_id)?;
        let next = if record.status == JobStatus::Stopping {
            JobStatus::Stopped
        } else {
            JobStatus::Failed
        };
        if record.status.can_transition_to(next) {
            record.status = next;
            record.failure_reason = Some(reason.into());
        }
        Some(record.status)
    }

    pub fn set_fleet_size(&self, job_id: &str, size: usize) {
        if let Some(record) = self.jobs.lock().get_mut(job_id) {
            record.fleet_size = Some(size);
        }
    }

    pub fn record_delivery(&self, job_id: &str, rows: usize, batches: usize) {
        if let Some(record) = self.jobs.lock().get_mut(job_id) {
            let stats = &mut record.stats;
            stats.total_rows = stats.total_rows.saturating_add(rows as u64);
            stats.batches = stats.batches.saturating_add(batches as u64);
            stats.last_activity = Some(OffsetDateTime::now_utc());
        }
    }

    pub fn record_error(&self, job_id: &str, error: impl Into<String>) {
        if let Some(record) = self.jobs.lock().get_mut(job_id) {
            let stats = &mut record.stats;
            stats.errors = stats.errors.saturating_add(1);
            stats.last_error = Some(error.into());
            stats.last_activity = Some(OffsetDateTime::now_utc());
        }
    }

    pub fn record_refreshes(&self, job_id: &str, refreshes: usize) {
        if let Some(record) = self.jobs.lock().get_mut(job_id) {
            record.stats.pipeline_refreshes = record.stats.pipeline_refreshes.saturating_add(refreshes as u64);
        }
    }
}
