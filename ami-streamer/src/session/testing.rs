use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use ami_client::{
    db::pipeline_queries::PipelineDefinition,
    domain::{CustomerSegment, MeterIdentity},
};
use parking_lot::Mutex;

use super::{SessionFactory, Warehouse, WarehouseError};

#[derive(Default)]
struct FakeState {
    executed: Vec<String>,
    fail_execute: bool,
    fail_catalog: bool,
    expire_next: usize,
    closed: bool,
    catalog: Vec<MeterIdentity>,
    pipelines: Vec<PipelineDefinition>,
    refreshed: Vec<String>,
    stage_url: Option<String>,
}

/// In-memory warehouse that records what it is asked to do.
#[derive(Default)]
pub struct FakeWarehouse {
    state: Mutex<FakeState>,
}

impl FakeWarehouse {
    pub fn fail_execute(&self, fail: bool) {
        self.state.lock().fail_execute = fail;
    }

    pub fn fail_catalog(&self, fail: bool) {
        self.state.lock().fail_catalog = fail;
    }

    pub fn expire_next(&self, n: usize) {
        self.state.lock().expire_next = n;
    }

    pub fn set_catalog(&self, meters: impl IntoIterator<Item = MeterIdentity>) {
        self.state.lock().catalog = meters.into_iter().collect();
    }

    pub fn set_pipelines(&self, pipelines: Vec<PipelineDefinition>) {
        self.state.lock().pipelines = pipelines;
    }

    pub fn set_stage_url(&self, url: Option<&str>) {
        self.state.lock().stage_url = url.map(str::to_string);
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.lock().executed.clone()
    }

    pub fn refreshed(&self) -> Vec<String> {
        self.state.lock().refreshed.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn check_expiry(state: &mut FakeState) -> Result<(), WarehouseError> {
        if state.expire_next > 0 {
            state.expire_next -= 1;
            return Err(WarehouseError::AuthExpired("token expired".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Warehouse for FakeWarehouse {
    async fn execute(&self, sql: &str) -> Result<u64, WarehouseError> {
        let mut state = self.state.lock();
        Self::check_expiry(&mut state)?;
        if state.fail_execute {
            return Err(WarehouseError::Query("destination unreachable".to_string()));
        }
        state.executed.push(sql.to_string());
        Ok(1)
    }

    async fn sample_meters(
        &self,
        _table: &str,
        limit: usize,
        segment: Option<CustomerSegment>,
    ) -> Result<Vec<MeterIdentity>, WarehouseError> {
        let mut state = self.state.lock();
        Self::check_expiry(&mut state)?;
        if state.fail_catalog {
            return Err(WarehouseError::Query("catalog table missing".to_string()));
        }
        Ok(state
            .catalog
            .iter()
            .filter(|m| segment.map_or(true, |s| m.segment == s))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_pipelines(&self, _scope: &str) -> Result<Vec<PipelineDefinition>, WarehouseError> {
        let mut state = self.state.lock();
        Self::check_expiry(&mut state)?;
        Ok(state.pipelines.clone())
    }

    async fn refresh_pipeline(&self, name: &str) -> Result<(), WarehouseError> {
        let mut state = self.state.lock();
        Self::check_expiry(&mut state)?;
        state.refreshed.push(name.to_string());
        Ok(())
    }

    async fn stage_url(&self, _stage: &str) -> Result<Option<String>, WarehouseError> {
        let mut state = self.state.lock();
        Self::check_expiry(&mut state)?;
        Ok(state.stage_url.clone())
    }

    async fn close(&self) {
        self.state.lock().closed = true;
    }
}

#[derive(Default)]
pub struct FakeSessionFactory {
    pub connects: Arc<AtomicUsize>,
    pub sessions: Arc<Mutex<Vec<Arc<FakeWarehouse>>>>,
}

#[async_trait::async_trait]
impl SessionFactory for FakeSessionFactory {
    async fn connect(&self) -> Result<Arc<dyn Warehouse>, WarehouseError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(FakeWarehouse::default());
        self.sessions.lock().push(session.clone());
        Ok(session)
    }
}
