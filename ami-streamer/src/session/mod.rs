//! Warehouse sessions.
//!
//! Every SQL-speaking component goes through [`Warehouse`]. The
//! [`SessionProvider`] hands out one shared session and swaps it out when a
//! call reports [`WarehouseError::AuthExpired`]; any other error propagates
//! untouched.

pub mod pg;
#[cfg(test)]
pub(crate) mod testing;

use std::{future::Future, sync::Arc};

use ami_client::{
    db::pipeline_queries::PipelineDefinition,
    domain::{CustomerSegment, MeterIdentity},
};
use tokio::sync::Mutex;

#[derive(thiserror::Error, Debug, Clone)]
pub enum WarehouseError {
    /// The session's credentials are no longer accepted, or the session was
    /// already replaced by a fresh one.
    #[error("warehouse session expired: {0}")]
    AuthExpired(String),
    #[error("warehouse connection failed: {0}")]
    Connect(String),
    #[error("warehouse statement failed: {0}")]
    Query(String),
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),
}

#[async_trait::async_trait]
pub trait Warehouse: Send + Sync {
    /// Run a statement that returns no rows of interest; yields rows affected.
    async fn execute(&self, sql: &str) -> Result<u64, WarehouseError>;

    async fn sample_meters(
        &self,
        table: &str,
        limit: usize,
        segment: Option<CustomerSegment>,
    ) -> Result<Vec<MeterIdentity>, WarehouseError>;

    async fn list_pipelines(&self, scope: &str) -> Result<Vec<PipelineDefinition>, WarehouseError>;

    async fn refresh_pipeline(&self, name: &str) -> Result<(), WarehouseError>;

    async fn stage_url(&self, stage: &str) -> Result<Option<String>, WarehouseError>;

    /// Release the session. Best-effort; never fails.
    async fn close(&self) {}
}

#[async_trait::async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn Warehouse>, WarehouseError>;
}

/// Lazily connected, process-wide warehouse session.
///
/// Reconnection is single-flight: the first caller to see an expired session
/// replaces it while holding the lock, and later callers holding the same
/// stale handle pick up the replacement instead of connecting again.
/// Once closed, the provider never connects again.
pub struct SessionProvider {
    factory: Box<dyn SessionFactory>,
    current: Mutex<Slot>,
}

#[derive(Default)]
struct Slot {
    session: Option<Arc<dyn Warehouse>>,
    closed: bool,
}

impl Slot {
    fn ensure_open(&self) -> Result<(), WarehouseError> {
        if self.closed {
            return Err(WarehouseError::Connect("warehouse session provider is closed".to_string()));
        }
        Ok(())
    }
}

impl SessionProvider {
    pub fn new(factory: impl SessionFactory + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            current: Mutex::new(Slot::default()),
        }
    }

    pub async fn get_session(&self) -> Result<Arc<dyn Warehouse>, WarehouseError> {
        let mut current = self.current.lock().await;
        current.ensure_open()?;
        if let Some(session) = current.session.as_ref() {
            return Ok(session.clone());
        }

        let session = self.factory.connect().await?;
        tracing::info!("warehouse session established");
        current.session = Some(session.clone());
        Ok(session)
    }

    async fn replace_stale(&self, stale: &Arc<dyn Warehouse>) -> Result<Arc<dyn Warehouse>, WarehouseError> {
        let mut current = self.current.lock().await;
        current.ensure_open()?;
        if let Some(live) = current.session.as_ref() {
            if !Arc::ptr_eq(live, stale) {
                return Ok(live.clone());
            }
        }

        if let Some(old) = current.session.take() {
            old.close().await;
        }

        metrics::counter!("ami_session_reconnects_total").increment(1);
        let fresh = self.factory.connect().await?;
        tracing::info!("warehouse session re-established after expiry");
        current.session = Some(fresh.clone());
        Ok(fresh)
    }

    /// Run `op` against the live session, retrying once on a fresh session
    /// if the first attempt reports an expired one.
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T, WarehouseError>
    where
        F: Fn(Arc<dyn Warehouse>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, WarehouseError>> + Send,
        T: Send,
    {
        let session = self.get_session().await?;
        match op(session.clone()).await {
            Err(WarehouseError::AuthExpired(reason)) => {
                tracing::warn!(reason = %reason, "warehouse session expired, reconnecting");
                let fresh = self.replace_stale(&session).await?;
                op(fresh).await
            }
            other => other,
        }
    }

    /// Close the session at process shutdown. Later calls fail with
    /// [`WarehouseError::Connect`] instead of reconnecting.
    pub async fn close(&self) {
        let mut current = self.current.lock().await;
        current.closed = true;
        if let Some(session) = current.session.take() {
            session.close().await;
            tracing::info!("warehouse session closed");
        }
    }
}

#[async_trait::async_trait]
impl Warehouse for SessionProvider {
    async fn execute(&self, sql: &str) -> Result<u64, WarehouseError> {
        self.run(|s| async move { s.execute(sql).await }).await
    }

    async fn sample_meters(
        &self,
        table: &str,
        limit: usize,
        segment: Option<CustomerSegment>,
    ) -> Result<Vec<MeterIdentity>, WarehouseError> {
        self.run(|s| async move { s.sample_meters(table, limit, segment).await })
            .await
    }

    async fn list_pipelines(&self, scope: &str) -> Result<Vec<PipelineDefinition>, WarehouseError> {
        self.run(|s| async move { s.list_pipelines(scope).await }).await
    }

    async fn refresh_pipeline(&self, name: &str) -> Result<(), WarehouseError> {
        self.run(|s| async move { s.refresh_pipeline(name).await }).await
    }

    async fn stage_url(&self, stage: &str) -> Result<Option<String>, WarehouseError> {
        self.run(|s| async move { s.stage_url(stage).await }).await
    }

    async fn close(&self) {
        SessionProvider::close(self).await;
    }
}
