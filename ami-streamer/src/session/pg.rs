use std::{path::PathBuf, str::FromStr, sync::Arc};

use ami_client::{
    db::{meter_catalog_queries, pipeline_queries, pipeline_queries::PipelineDefinition, QueryError},
    domain::{CustomerSegment, MeterIdentity},
};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};

use super::{SessionFactory, Warehouse, WarehouseError};

/// Error codes the warehouse uses for rejected or expired credentials.
const AUTH_EXPIRED_CODES: &[&str] = &["28000", "28P01", "390114"];

pub(crate) fn classify_sqlx(e: sqlx::Error) -> WarehouseError {
    match &e {
        sqlx::Error::Database(db) if db.code().is_some_and(|c| AUTH_EXPIRED_CODES.contains(&c.as_ref())) => {
            WarehouseError::AuthExpired(e.to_string())
        }
        // A closed pool means this handle was retired by a reconnect.
        sqlx::Error::PoolClosed => WarehouseError::AuthExpired(e.to_string()),
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut => {
            WarehouseError::Connect(e.to_string())
        }
        _ => WarehouseError::Query(e.to_string()),
    }
}

fn classify(e: QueryError) -> WarehouseError {
    match e {
        QueryError::InvalidIdentifier(name) => WarehouseError::InvalidIdentifier(name),
        QueryError::Sqlx(e) => classify_sqlx(e),
    }
}

/// Warehouse session over the Postgres wire protocol.
pub struct PgSession {
    pool: PgPool,
}

impl PgSession {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Warehouse for PgSession {
    async fn execute(&self, sql: &str) -> Result<u64, WarehouseError> {
        sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected())
            .map_err(classify_sqlx)
    }

    async fn sample_meters(
        &self,
        table: &str,
        limit: usize,
        segment: Option<CustomerSegment>,
    ) -> Result<Vec<MeterIdentity>, WarehouseError> {
        let rows = meter_catalog_queries::sample_meters(&self.pool, table, limit, segment)
            .await
            .map_err(classify)?;
        Ok(rows.into_iter().map(|r| r.into_identity()).collect())
    }

    async fn list_pipelines(&self, scope: &str) -> Result<Vec<PipelineDefinition>, WarehouseError> {
        pipeline_queries::list_pipelines(&self.pool, scope)
            .await
            .map_err(classify)
    }

    async fn refresh_pipeline(&self, name: &str) -> Result<(), WarehouseError> {
        pipeline_queries::refresh_pipeline(&self.pool, name)
            .await
            .map_err(classify)
    }

    async fn stage_url(&self, stage: &str) -> Result<Option<String>, WarehouseError> {
        pipeline_queries::stage_url(&self.pool, stage)
            .await
            .map_err(classify)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Builds [`PgSession`]s, re-reading the session token on every connect so a
/// reconnect after expiry picks up the rotated credential.
pub struct PgSessionFactory {
    uri: String,
    token_path: Option<PathBuf>,
    max_connections: u32,
}

impl PgSessionFactory {
    pub fn new(uri: impl Into<String>, token_path: Option<PathBuf>, max_connections: u32) -> Self {
        Self {
            uri: uri.into(),
            token_path,
            max_connections,
        }
    }
}

#[async_trait::async_trait]
impl SessionFactory for PgSessionFactory {
    async fn connect(&self) -> Result<Arc<dyn Warehouse>, WarehouseError> {
        let mut options =
            PgConnectOptions::from_str(&self.uri).map_err(|e| WarehouseError::Connect(format!("invalid warehouse uri: {e}")))?;

        if let Some(path) = &self.token_path {
            let token = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| WarehouseError::Connect(format!("failed to read session token {}: {e}", path.display())))?;
            options = options.password(token.trim());
        }

        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| WarehouseError::Connect(e.to_string()))?;

        Ok(Arc::new(PgSession::new(pool)))
    }
}
