use std::{io::Write, sync::Arc};

use ami_client::{db::ObjectName, domain::Reading};
use tempfile::NamedTempFile;
use time::{OffsetDateTime, UtcOffset};

use super::wire::ndjson;
use crate::{
    jobs::SinkKind,
    pipeline::{DeliveryError, DeliveryReceipt, Destination, SetupError},
    session::{Warehouse, WarehouseError},
};

/// Stages NDJSON files into a warehouse-managed stage with `PUT`.
///
/// Each batch is written to a named temp file which is removed when the
/// handle drops, whether or not the upload succeeded.
pub struct ManagedStageSink {
    warehouse: Arc<dyn Warehouse>,
    target: Option<String>,
    prefix: String,
    job_id: String,
    stage: Option<ObjectName>,
    seq: u64,
}

impl ManagedStageSink {
    pub fn new(warehouse: Arc<dyn Warehouse>, target: Option<String>, prefix: String, job_id: String) -> Self {
        Self {
            warehouse,
            target,
            prefix,
            job_id,
            stage: None,
            seq: 0,
        }
    }

    fn stage_path(&self, stage: &ObjectName, now: OffsetDateTime) -> String {
        let now = now.to_offset(UtcOffset::UTC);
        let prefix = self.prefix.trim_matches('/');
        let hour = format!(
            "{:04}/{:02}/{:02}/{:02}",
            now.year(),
            u8::from(now.month()),
            now.day(),
            now.hour()
        );
        if prefix.is_empty() {
            format!("@{stage}/{hour}")
        } else {
            format!("@{stage}/{prefix}/{hour}")
        }
    }
}

/// Writes `body` to a fresh named temp file on the blocking pool.
async fn write_temp(prefix: String, body: Vec<u8>) -> std::io::Result<NamedTempFile> {
    tokio::task::spawn_blocking(move || -> std::io::Result<NamedTempFile> {
        let mut file = tempfile::Builder::new().prefix(&prefix).suffix(".ndjson").tempfile()?;
        file.write_all(&body)?;
        file.flush()?;
        Ok(file)
    })
    .await
    .map_err(std::io::Error::other)?
}

pub fn put_statement(local: &std::path::Path, stage_path: &str) -> String {
    let local = local.to_string_lossy().replace('\\', "/").replace('\'', "''");
    format!("PUT 'file://{local}' {stage_path} AUTO_COMPRESS=TRUE OVERWRITE=TRUE")
}

#[async_trait::async_trait]
impl Destination for ManagedStageSink {
    fn kind(&self) -> SinkKind {
        SinkKind::ManagedStage
    }

    async fn setup(&mut self) -> Result<(), SetupError> {
        let target = self.target.as_deref().ok_or(SetupError::MissingParameter("target"))?;
        let stage = ObjectName::parse(target).map_err(|e| SetupError::InvalidParameter(e.to_string()))?;
        self.warehouse
            .execute(&format!("CREATE STAGE IF NOT EXISTS {stage}"))
            .await?;
        tracing::info!(stage = %stage, "managed stage sink ready");
        self.stage = Some(stage);
        Ok(())
    }

    async fn deliver(&mut self, batch: &[Reading]) -> Result<DeliveryReceipt, DeliveryError> {
        let stage = self
            .stage
            .as_ref()
            .ok_or_else(|| WarehouseError::Query("stage sink used before setup".to_string()))?;

        let body = ndjson(batch, &self.job_id)?;
        let file = write_temp(format!("stage_{}_{:06}_", self.job_id, self.seq + 1), body).await?;

        let sql = put_statement(file.path(), &self.stage_path(stage, OffsetDateTime::now_utc()));
        self.warehouse.execute(&sql).await?;
        self.seq += 1;
        tracing::debug!(stage = %stage, rows = batch.len(), "staged ndjson batch");

        Ok(DeliveryReceipt {
            rows: batch.len(),
            batches: 1,
        })
    }
}
