use std::sync::Arc;

use ami_client::domain::Reading;
use bytes::Bytes;
use time::OffsetDateTime;

use super::wire::{flat_array, object_key};
use crate::{
    jobs::SinkKind,
    pipeline::{DeliveryError, DeliveryReceipt, Destination, SetupError},
    storage::{ObjectStorage, StorageConnector, StorageCredentials, StorageError},
};

/// Writes every batch as one JSON array object under a prefix.
pub struct ObjectRawSink {
    connector: Arc<dyn StorageConnector>,
    credentials: StorageCredentials,
    bucket: Option<String>,
    prefix: String,
    job_id: String,
    store: Option<Arc<dyn ObjectStorage>>,
    seq: u64,
}

impl ObjectRawSink {
    pub fn new(
        connector: Arc<dyn StorageConnector>,
        credentials: StorageCredentials,
        bucket: Option<String>,
        prefix: String,
        job_id: String,
    ) -> Self {
        Self {
            connector,
            credentials,
            bucket,
            prefix,
            job_id,
            store: None,
            seq: 0,
        }
    }
}

#[async_trait::async_trait]
impl Destination for ObjectRawSink {
    fn kind(&self) -> SinkKind {
        SinkKind::ObjectStorage
    }

    async fn setup(&mut self) -> Result<(), SetupError> {
        let bucket = self
            .bucket
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .ok_or(SetupError::MissingParameter("target"))?;

        let store = self.connector.connect(bucket, &self.credentials).await?;
        store.head_bucket().await?;
        tracing::info!(bucket, prefix = %self.prefix, "object storage sink ready");
        self.store = Some(store);
        Ok(())
    }

    async fn deliver(&mut self, batch: &[Reading]) -> Result<DeliveryReceipt, DeliveryError> {
        let Some(store) = &self.store else {
            return Err(StorageError::Config("object sink used before setup".into()).into());
        };

        let body = flat_array(batch)?;
        let key = object_key(&self.prefix, "raw", &self.job_id, self.seq + 1, OffsetDateTime::now_utc());
        store.put(&key, Bytes::from(body), "application/json").await?;
        self.seq += 1;
        tracing::debug!(bucket = store.bucket(), key = %key, rows = batch.len(), "uploaded raw batch");

        Ok(DeliveryReceipt {
            rows: batch.len(),
            batches: 1,
        })
    }
}
