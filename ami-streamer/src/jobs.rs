//! Control plane: validates job configurations, spawns one worker per job
//! and answers status queries from the shared registry.

use std::{sync::Arc, time::Duration};

use ami_client::domain::{CustomerSegment, EmissionPattern, ServiceArea};
use serde::{Deserialize, Serialize};

use crate::{
    generator::{FleetResolver, MeterSource},
    pipeline::{run_job, CadenceSpec, JobContext},
    registry::{JobRecord, JobRegistry},
    sinks::DestinationBuilder,
    storage::StorageCredentials,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    Table,
    ObjectStorage,
    ManagedStage,
    ExternalStage,
}

impl SinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Table => "table",
            SinkKind::ObjectStorage => "object_storage",
            SinkKind::ManagedStage => "managed_stage",
            SinkKind::ExternalStage => "external_stage",
        }
    }
}

fn default_pattern() -> String {
    "UNIFORM".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfig {
    pub sink: SinkKind,
    /// Table, bucket or managed stage, depending on the sink.
    #[serde(default)]
    pub target: Option<String>,
    /// Key prefix for object and managed-stage sinks.
    #[serde(default)]
    pub prefix: Option<String>,
    pub meter_count: usize,
    pub cadence: CadenceSpec,
    pub area: String,
    #[serde(default = "default_pattern")]
    pub emission_pattern: String,
    #[serde(default)]
    pub meter_source: MeterSource,
    #[serde(default)]
    pub segment_filter: Option<CustomerSegment>,
    /// External stage name for the external-stage sink.
    #[serde(default)]
    pub staging_pointer: Option<String>,
    #[serde(default)]
    pub storage: Option<StorageCredentials>,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum JobError {
    #[error("unknown service area '{0}'")]
    UnknownArea(String),
    #[error("unknown emission pattern '{0}'")]
    UnknownPattern(String),
    #[error("invalid job configuration: {0}")]
    InvalidConfig(String),
}

pub struct JobManager {
    registry: JobRegistry,
    fleet: FleetResolver,
    destinations: Arc<dyn DestinationBuilder>,
    backoff: Duration,
}

impl JobManager {
    pub fn new(
        registry: JobRegistry,
        fleet: FleetResolver,
        destinations: Arc<dyn DestinationBuilder>,
        backoff: Duration,
    ) -> Self {
        Self {
            registry,
            fleet,
            destinations,
            backoff,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Validate `config`, register the job as STARTING and spawn its worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_job(&self, config: JobConfig) -> Result<String, JobError> {
        let area = ServiceArea::lookup(&config.area).ok_or_else(|| JobError::UnknownArea(config.area.clone()))?;
        let pattern = EmissionPattern::lookup(&config.emission_pattern)
            .ok_or_else(|| JobError::UnknownPattern(config.emission_pattern.clone()))?;
        let cadence = config
            .cadence
            .cadence()
            .ok_or_else(|| JobError::InvalidConfig("cadence must have a positive batch size and interval".into()))?;

        let job_id = uuid::Uuid::new_v4().to_string();
        let destination = self.destinations.build(&job_id, &config);
        let ctx = JobContext {
            job_id: job_id.clone(),
            registry: self.registry.clone(),
            fleet: self.fleet.clone(),
            area,
            pattern,
            meter_count: config.meter_count,
            meter_source: config.meter_source.clone(),
            segment_filter: config.segment_filter,
            cadence,
            backoff: self.backoff,
        };

        let sink = config.sink.as_str();
        if !self.registry.insert(JobRecord::new(job_id.clone(), config)) {
            return Err(JobError::InvalidConfig(format!("job id {job_id} already registered")));
        }
        metrics::counter!("ami_jobs_started_total").increment(1);
        tracing::info!(job_id = %job_id, sink, area = area.name, pattern = pattern.name, "job starting");

        let worker = tokio::spawn(run_job(ctx, destination));
        let registry = self.registry.clone();
        let supervised_id = job_id.clone();
        tokio::spawn(async move {
            if let Err(e) = worker.await {
                tracing::error!(job_id = %supervised_id, error = %e, "job worker aborted");
                metrics::counter!("ami_jobs_failed_total").increment(1);
                registry.fail(&supervised_id, format!("worker aborted: {e}"));
            }
        });

        Ok(job_id)
    }

    /// Advisory and idempotent: unknown or finished jobs are left alone.
    pub fn stop_job(&self, job_id: &str) -> bool {
        let requested = self.registry.request_stop(job_id);
        if requested {
            tracing::info!(job_id, "stop requested");
        }
        requested
    }

    pub fn get_status(&self, job_id: &str) -> Option<JobRecord> {
        self.registry.get(job_id)
    }

    pub fn list_active_jobs(&self) -> Vec<JobRecord> {
        self.registry.list_active()
    }

    pub fn list_jobs(&self) -> Vec<JobRecord> {
        self.registry.list()
    }

    /// Drop a record. A worker still running for it exits at its next check.
    pub fn remove_job(&self, job_id: &str) -> Option<JobRecord> {
        self.registry.remove(job_id)
    }

    /// Request stop for every active job; returns how many were asked.
    pub fn stop_all(&self) -> usize {
        self.registry
            .list_active()
            .iter()
            .filter(|r| self.registry.request_stop(&r.job_id))
            .count()
    }

    /// Wait until no job is active, up to `timeout`. Returns whether the
    /// registry drained in time.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let drained = async {
            while !self.registry.list_active().is_empty() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use ami_client::domain::Reading;

    use super::*;
    use crate::{
        pipeline::{DeliveryError, DeliveryReceipt, Destination, SetupError},
        registry::JobStatus,
        session::WarehouseError,
    };

    pub(crate) fn table_config() -> JobConfig {
        JobConfig {
            sink: SinkKind::Table,
            target: Some("AMI.RAW.READINGS".into()),
            prefix: None,
            meter_count: 100,
            cadence: CadenceSpec::Rate { rows_per_second: 50 },
            area: "TEXAS_GULF_COAST".into(),
            emission_pattern: "UNIFORM".into(),
            meter_source: MeterSource::Synthetic,
            segment_filter: None,
            staging_pointer: None,
            storage: None,
        }
    }

    #[derive(Default)]
    struct Script {
        delivered: AtomicUsize,
        fail_setup: AtomicBool,
        fail_delivery: AtomicBool,
        panic_on_deliver: AtomicBool,
    }

    struct ScriptedDestination(Arc<Script>);

    #[async_trait::async_trait]
    impl Destination for ScriptedDestination {
        fn kind(&self) -> SinkKind {
            SinkKind::Table
        }

        async fn setup(&mut self) -> Result<(), SetupError> {
            if self.0.fail_setup.load(Ordering::SeqCst) {
                return Err(SetupError::MissingParameter("target"));
            }
            Ok(())
        }

        async fn deliver(&mut self, batch: &[Reading]) -> Result<DeliveryReceipt, DeliveryError> {
            if self.0.panic_on_deliver.load(Ordering::SeqCst) {
                panic!("destination exploded");
            }
            if self.0.fail_delivery.load(Ordering::SeqCst) {
                return Err(WarehouseError::Query("destination unreachable".into()).into());
            }
            self.0.delivered.fetch_add(batch.len(), Ordering::SeqCst);
            Ok(DeliveryReceipt {
                rows: batch.len(),
                batches: 1,
            })
        }
    }

    struct ScriptedBuilder(Arc<Script>);

    impl DestinationBuilder for ScriptedBuilder {
        fn build(&self, _job_id: &str, _config: &JobConfig) -> Box<dyn Destination> {
            Box::new(ScriptedDestination(self.0.clone()))
        }
    }

    fn manager() -> (JobManager, Arc<Script>) {
        let script = Arc::new(Script::default());
        let manager = JobManager::new(
            JobRegistry::new(),
            FleetResolver::synthetic_only(),
            Arc::new(ScriptedBuilder(script.clone())),
            Duration::from_secs(2),
        );
        (manager, script)
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_unknown_area_pattern_and_cadence() {
        let (manager, _) = manager();

        let mut cfg = table_config();
        cfg.area = "ATLANTIS".into();
        assert_eq!(manager.start_job(cfg), Err(JobError::UnknownArea("ATLANTIS".into())));

        let mut cfg = table_config();
        cfg.emission_pattern = "RANDOM".into();
        assert_eq!(manager.start_job(cfg), Err(JobError::UnknownPattern("RANDOM".into())));

        let mut cfg = table_config();
        cfg.cadence = CadenceSpec::Rate { rows_per_second: 0 };
        assert!(matches!(manager.start_job(cfg), Err(JobError::InvalidConfig(_))));

        assert!(manager.list_jobs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn job_runs_until_stopped() {
        let (manager, script) = manager();
        let id = manager.start_job(table_config()).unwrap();
        assert_eq!(manager.get_status(&id).unwrap().status, JobStatus::Starting);

        tokio::time::sleep(Duration::from_millis(4_500)).await;
        let record = manager.get_status(&id).unwrap();
        assert_eq!(record.status, JobStatus::Running);
        assert_eq!(record.fleet_size, Some(100));
        assert!(record.stats.total_rows >= 200);
        assert_eq!(record.stats.errors, 0);
        assert_eq!(script.delivered.load(Ordering::SeqCst) as u64, record.stats.total_rows);

        assert!(manager.stop_job(&id));
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(manager.get_status(&id).unwrap().status, JobStatus::Stopped);
        assert!(manager.list_active_jobs().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_stop_never_reaches_running() {
        let (manager, script) = manager();
        let id = manager.start_job(table_config()).unwrap();
        assert!(manager.stop_job(&id));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(manager.get_status(&id).unwrap().status, JobStatus::Stopped);
        assert_eq!(script.delivered.load(Ordering::SeqCst), 0);
        assert!(!manager.stop_job(&id));
        assert!(!manager.stop_job("no-such-job"));
    }

    #[tokio::test(start_paused = true)]
    async fn setup_failure_marks_job_failed() {
        let (manager, script) = manager();
        script.fail_setup.store(true, Ordering::SeqCst);
        let id = manager.start_job(table_config()).unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        let record = manager.get_status(&id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.failure_reason.unwrap().contains("target"));
        assert_eq!(script.delivered.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delivery_failures_count_errors_but_keep_running() {
        let (manager, script) = manager();
        script.fail_delivery.store(true, Ordering::SeqCst);
        let id = manager.start_job(table_config()).unwrap();

        tokio::time::sleep(Duration::from_secs(9)).await;
        let first = manager.get_status(&id).unwrap();
        assert_eq!(first.status, JobStatus::Running);
        assert!(first.stats.errors >= 4, "errors = {}", first.stats.errors);
        assert_eq!(first.stats.total_rows, 0);

        tokio::time::sleep(Duration::from_secs(4)).await;
        let later = manager.get_status(&id).unwrap();
        assert!(later.stats.errors > first.stats.errors);
        assert_eq!(later.status, JobStatus::Running);

        script.fail_delivery.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(manager.get_status(&id).unwrap().stats.total_rows > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_worker_is_marked_failed() {
        let (manager, script) = manager();
        script.panic_on_deliver.store(true, Ordering::SeqCst);
        let id = manager.start_job(table_config()).unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        let record = manager.get_status(&id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.failure_reason.unwrap().contains("aborted"));
    }

    #[tokio::test(start_paused = true)]
    async fn removed_job_worker_exits_and_stop_all_covers_the_rest() {
        let (manager, _) = manager();
        let a = manager.start_job(table_config()).unwrap();
        let b = manager.start_job(table_config()).unwrap();
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        assert!(manager.remove_job(&a).is_some());
        assert!(manager.get_status(&a).is_none());

        assert_eq!(manager.stop_all(), 1);
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(manager.get_status(&b).unwrap().status, JobStatus::Stopped);
        assert_eq!(manager.stop_all(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_idle_returns_once_workers_have_stopped() {
        let (manager, _) = manager();
        manager.start_job(table_config()).unwrap();
        manager.start_job(table_config()).unwrap();
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        assert!(!manager.wait_idle(Duration::from_millis(200)).await);

        manager.stop_all();
        assert!(manager.wait_idle(Duration::from_secs(5)).await);
        assert!(manager
            .list_jobs()
            .iter()
            .all(|r| r.status == JobStatus::Stopped));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let cfg: JobConfig = serde_json::from_value(serde_json::json!({
            "sink": "external_stage",
            "meter_count": 10,
            "cadence": { "mode": "fixed", "batch_size": 5, "interval_ms": 250 },
            "area": "PACIFIC_NORTHWEST",
            "staging_pointer": "AMI.RAW.EXT_STAGE",
            "segment_filter": "INDUSTRIAL",
            "meter_source": { "kind": "catalog", "table": "AMI.REF.METERS" }
        }))
        .unwrap();

        assert_eq!(cfg.sink, SinkKind::ExternalStage);
        assert_eq!(cfg.emission_pattern, "UNIFORM");
        assert_eq!(cfg.segment_filter, Some(CustomerSegment::Industrial));
        assert_eq!(
            cfg.meter_source,
            MeterSource::Catalog {
                table: "AMI.REF.METERS".into()
            }
        );
        assert!(cfg.storage.is_none());
    }
}
