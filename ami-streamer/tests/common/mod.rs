#![allow(dead_code)]

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use ami_client::{
    db::pipeline_queries::PipelineDefinition,
    domain::{CustomerSegment, MeterIdentity},
};
use ami_streamer::{
    generator::{FleetResolver, MeterSource},
    jobs::{JobConfig, JobManager, SinkKind},
    pipeline::CadenceSpec,
    registry::JobRegistry,
    session::{SessionFactory, Warehouse, WarehouseError},
    sinks::{SinkBuilder, SinkSettings},
    storage::{ObjectStorage, StorageConnector, StorageCredentials, StorageError},
};
use bytes::Bytes;
use parking_lot::Mutex;

#[derive(Default)]
pub struct WarehouseState {
    pub statements: Vec<String>,
    pub reject_inserts: bool,
    pub catalog_error: bool,
    pub expire_next: usize,
    pub pipelines: Vec<PipelineDefinition>,
    pub refreshed: Vec<String>,
    pub stage_url: Option<String>,
}

/// Warehouse double recording every statement it receives.
#[derive(Default)]
pub struct ScriptedWarehouse {
    pub state: Mutex<WarehouseState>,
}

impl ScriptedWarehouse {
    pub fn inserts(&self) -> usize {
        self.state
            .lock()
            .statements
            .iter()
            .filter(|s| s.starts_with("INSERT"))
            .count()
    }

    fn take_expiry(&self) -> Result<(), WarehouseError> {
        let mut state = self.state.lock();
        if state.expire_next > 0 {
            state.expire_next -= 1;
            return Err(WarehouseError::AuthExpired("session token expired".into()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Warehouse for ScriptedWarehouse {
    async fn execute(&self, sql: &str) -> Result<u64, WarehouseError> {
        self.take_expiry()?;
        let mut state = self.state.lock();
        if state.reject_inserts && sql.starts_with("INSERT") {
            return Err(WarehouseError::Query("network unreachable".into()));
        }
        state.statements.push(sql.to_string());
        Ok(0)
    }

    async fn sample_meters(
        &self,
        _table: &str,
        _limit: usize,
        _segment: Option<CustomerSegment>,
    ) -> Result<Vec<MeterIdentity>, WarehouseError> {
        if self.state.lock().catalog_error {
            return Err(WarehouseError::Query("object does not exist".into()));
        }
        Ok(Vec::new())
    }

    async fn list_pipelines(&self, _scope: &str) -> Result<Vec<PipelineDefinition>, WarehouseError> {
        Ok(self.state.lock().pipelines.clone())
    }

    async fn refresh_pipeline(&self, name: &str) -> Result<(), WarehouseError> {
        self.state.lock().refreshed.push(name.to_string());
        Ok(())
    }

    async fn stage_url(&self, _stage: &str) -> Result<Option<String>, WarehouseError> {
        Ok(self.state.lock().stage_url.clone())
    }
}

/// Hands out one shared warehouse and counts connects.
pub struct SharedFactory {
    pub warehouse: Arc<ScriptedWarehouse>,
    pub connects: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl SessionFactory for SharedFactory {
    async fn connect(&self) -> Result<Arc<dyn Warehouse>, WarehouseError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.warehouse.clone())
    }
}

#[derive(Default)]
pub struct InMemoryBucket {
    pub objects: Mutex<BTreeMap<String, Bytes>>,
}

#[async_trait::async_trait]
impl ObjectStorage for InMemoryBucket {
    fn bucket(&self) -> &str {
        "ami-ext"
    }

    async fn put(&self, key: &str, body: Bytes, _content_type: &str) -> Result<(), StorageError> {
        self.objects.lock().insert(key.to_string(), body);
        Ok(())
    }

    async fn head_bucket(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

pub struct InMemoryConnector(pub Arc<InMemoryBucket>);

#[async_trait::async_trait]
impl StorageConnector for InMemoryConnector {
    async fn connect(
        &self,
        _bucket: &str,
        _credentials: &StorageCredentials,
    ) -> Result<Arc<dyn ObjectStorage>, StorageError> {
        Ok(self.0.clone())
    }
}

pub fn manager(warehouse: Arc<dyn Warehouse>, bucket: Arc<InMemoryBucket>) -> JobManager {
    let builder = SinkBuilder::new(
        warehouse.clone(),
        Arc::new(InMemoryConnector(bucket)),
        SinkSettings {
            default_scope: Some("AMI.RAW".into()),
            ..SinkSettings::default()
        },
    );
    JobManager::new(
        JobRegistry::new(),
        FleetResolver::new(warehouse),
        Arc::new(builder),
        Duration::from_secs(2),
    )
}

pub fn table_job(meters: usize, rate: u32) -> JobConfig {
    JobConfig {
        sink: SinkKind::Table,
        target: Some("AMI.RAW.READINGS".into()),
        prefix: None,
        meter_count: meters,
        cadence: CadenceSpec::Rate { rows_per_second: rate },
        area: "TEXAS_GULF_COAST".into(),
        emission_pattern: "UNIFORM".into(),
        meter_source: MeterSource::Synthetic,
        segment_filter: None,
        staging_pointer: None,
        storage: None,
    }
}
