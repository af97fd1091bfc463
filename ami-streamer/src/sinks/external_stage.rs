use std::sync::Arc;

use ami_client::{db::ObjectName, domain::Reading};
use bytes::Bytes;
use time::OffsetDateTime;

use super::wire::{ndjson, object_key};
use crate::{
    jobs::SinkKind,
    pipeline::{DeliveryError, DeliveryReceipt, Destination, SetupError},
    session::Warehouse,
    storage::{ObjectStorage, StorageConnector, StorageCredentials, StorageError},
};

/// Bucket and key prefix behind an external stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageLocation {
    pub bucket: String,
    pub prefix: String,
}

impl StageLocation {
    pub fn url(&self) -> String {
        if self.prefix.is_empty() {
            format!("s3://{}", self.bucket)
        } else {
            format!("s3://{}/{}", self.bucket, self.prefix)
        }
    }

    /// Prefix with a trailing `/`, or empty for a bucket root.
    fn dir(&self) -> String {
        if self.prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.prefix)
        }
    }

    /// Whether objects written under `self` are visible to a reader of
    /// `reader`: same bucket, and `reader` is `self` or one of its parents.
    fn is_read_by(&self, reader: &StageLocation) -> bool {
        self.bucket.eq_ignore_ascii_case(&reader.bucket) && self.dir().starts_with(&reader.dir())
    }
}

/// Accepts `s3://bucket/prefix/` as well as the list form the catalog
/// reports, `["s3://bucket/prefix/"]`.
pub fn parse_stage_url(raw: &str) -> Result<StageLocation, String> {
    let first = raw
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches(|c| c == '"' || c == '\'');

    let url = url::Url::parse(first).map_err(|e| format!("invalid stage url '{raw}': {e}"))?;
    if !url.scheme().eq_ignore_ascii_case("s3") {
        return Err(format!("unsupported stage url scheme '{}'", url.scheme()));
    }
    let bucket = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| format!("stage url '{raw}' has no bucket"))?;

    Ok(StageLocation {
        bucket: bucket.to_string(),
        prefix: url.path().trim_matches('/').to_string(),
    })
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.'
}

fn is_url_end(c: char) -> bool {
    c.is_whitespace() || matches!(c, '\'' | '"' | ')' | ',' | ';')
}

/// Every `s3://` location spelled out in a pipeline definition.
fn literal_locations(definition: &str) -> impl Iterator<Item = StageLocation> + '_ {
    let lower = definition.to_ascii_lowercase();
    let starts: Vec<usize> = lower.match_indices("s3://").map(|(i, _)| i).collect();
    starts.into_iter().filter_map(move |start| {
        let rest = &definition[start..];
        let end = rest.find(is_url_end).unwrap_or(rest.len());
        parse_stage_url(&rest[..end]).ok()
    })
}

/// Whether a pipeline definition reads from `stage` or its location.
pub fn references_stage(definition: &str, stage: &ObjectName, location: &StageLocation) -> bool {
    if literal_locations(definition).any(|reader| location.is_read_by(&reader)) {
        return true;
    }

    let upper = definition.to_ascii_uppercase();
    upper.match_indices('@').any(|(at, _)| {
        let token: String = upper[at + 1..].chars().take_while(|c| is_ident_char(*c)).collect();
        let Ok(referenced) = ObjectName::parse(&token) else {
            return false;
        };
        let same = |a: &Option<String>, b: &Option<String>| match (a, b) {
            (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
            _ => true,
        };
        referenced.name.eq_ignore_ascii_case(&stage.name)
            && same(&referenced.schema, &stage.schema)
            && same(&referenced.database, &stage.database)
    })
}

/// Writes NDJSON straight to the bucket behind a customer-managed stage,
/// then refreshes the ingestion pipelines reading from it every
/// `refresh_every` uploads.
pub struct ExternalStageSink {
    warehouse: Arc<dyn Warehouse>,
    connector: Arc<dyn StorageConnector>,
    credentials: StorageCredentials,
    pointer: Option<String>,
    default_scope: Option<String>,
    job_id: String,
    refresh_every: usize,

    location: Option<StageLocation>,
    store: Option<Arc<dyn ObjectStorage>>,
    pipelines: Vec<String>,
    uploads_since_refresh: usize,
    seq: u64,
}

pub struct ExternalStageParams {
    pub staging_pointer: Option<String>,
    pub default_scope: Option<String>,
    pub credentials: StorageCredentials,
    pub job_id: String,
    pub refresh_every: usize,
}

impl ExternalStageSink {
    pub fn new(warehouse: Arc<dyn Warehouse>, connector: Arc<dyn StorageConnector>, params: ExternalStageParams) -> Self {
        Self {
            warehouse,
            connector,
            credentials: params.credentials,
            pointer: params.staging_pointer,
            default_scope: params.default_scope,
            job_id: params.job_id,
            refresh_every: params.refresh_every.max(1),
            location: None,
            store: None,
            pipelines: Vec::new(),
            uploads_since_refresh: 0,
            seq: 0,
        }
    }

    pub fn pipelines(&self) -> &[String] {
        &self.pipelines
    }

    pub fn uploads_since_refresh(&self) -> usize {
        self.uploads_since_refresh
    }

    async fn discover_pipelines(&self, stage: &ObjectName, location: &StageLocation) -> Vec<String> {
        let Some(scope) = stage.scope().or_else(|| self.default_scope.clone()) else {
            tracing::warn!(stage = %stage, "no scope for pipeline discovery, uploads will not trigger refreshes");
            return Vec::new();
        };

        match self.warehouse.list_pipelines(&scope).await {
            Ok(all) => all
                .into_iter()
                .filter(|p| references_stage(&p.definition, stage, location))
                .map(|p| p.name)
                .collect(),
            Err(e) => {
                tracing::warn!(scope = %scope, error = %e, "pipeline discovery failed, continuing without refreshes");
                Vec::new()
            }
        }
    }
}

#[async_trait::async_trait]
impl Destination for ExternalStageSink {
    fn kind(&self) -> SinkKind {
        SinkKind::ExternalStage
    }

    async fn setup(&mut self) -> Result<(), SetupError> {
        let pointer = self
            .pointer
            .as_deref()
            .ok_or(SetupError::MissingParameter("staging_pointer"))?;
        let stage = ObjectName::parse(pointer).map_err(|e| SetupError::InvalidParameter(e.to_string()))?;

        let raw_url = self
            .warehouse
            .stage_url(&stage.to_string())
            .await?
            .ok_or_else(|| SetupError::InvalidParameter(format!("stage {stage} has no external url")))?;
        let location = parse_stage_url(&raw_url).map_err(SetupError::InvalidParameter)?;

        let store = self.connector.connect(&location.bucket, &self.credentials).await?;
        store.head_bucket().await?;

        self.pipelines = self.discover_pipelines(&stage, &location).await;
        tracing::info!(
            stage = %stage,
            bucket = %location.bucket,
            prefix = %location.prefix,
            pipelines = ?self.pipelines,
            "external stage sink ready"
        );

        self.location = Some(location);
        self.store = Some(store);
        Ok(())
    }

    async fn deliver(&mut self, batch: &[Reading]) -> Result<DeliveryReceipt, DeliveryError> {
        let (Some(store), Some(location)) = (&self.store, &self.location) else {
            return Err(StorageError::Config("external stage sink used before setup".into()).into());
        };

        let body = ndjson(batch, &self.job_id)?;
        let key = object_key(&location.prefix, "ndjson", &self.job_id, self.seq + 1, OffsetDateTime::now_utc());
        store.put(&key, Bytes::from(body), "application/x-ndjson").await?;
        self.seq += 1;
        self.uploads_since_refresh += 1;
        tracing::debug!(bucket = %location.bucket, key = %key, rows = batch.len(), "uploaded ndjson batch");

        Ok(DeliveryReceipt {
            rows: batch.len(),
            batches: 1,
        })
    }

    async fn after_delivery(&mut self) -> usize {
        if self.uploads_since_refresh < self.refresh_every {
            return 0;
        }
        self.uploads_since_refresh = 0;

        let warehouse = &self.warehouse;
        let outcomes = futures::future::join_all(self.pipelines.iter().map(|pipeline| async move {
            (pipeline, warehouse.refresh_pipeline(pipeline).await)
        }))
        .await;

        let mut refreshed = 0;
        for (pipeline, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    refreshed += 1;
                    metrics::counter!("ami_pipeline_refresh_total").increment(1);
                    tracing::debug!(pipeline = %pipeline, "refreshed ingestion pipeline");
                }
                Err(e) => {
                    metrics::counter!("ami_pipeline_refresh_errors_total").increment(1);
                    tracing::warn!(pipeline = %pipeline, error = %e, "pipeline refresh failed");
                }
            }
        }
        refreshed
    }
}
