pub mod external_stage;
pub mod managed_stage;
pub mod object_raw;
pub mod table;
pub mod wire;

use std::sync::Arc;

pub use external_stage::{ExternalStageParams, ExternalStageSink};
pub use managed_stage::ManagedStageSink;
pub use object_raw::ObjectRawSink;
pub use table::{StringEscaping, TableSink};

use crate::{
    jobs::{JobConfig, SinkKind},
    pipeline::Destination,
    session::Warehouse,
    storage::{StorageConnector, StorageCredentials},
};

/// Process-wide defaults applied to every job's destination.
#[derive(Debug, Clone)]
pub struct SinkSettings {
    pub raw_prefix: String,
    pub stage_prefix: String,
    pub refresh_every_uploads: usize,
    pub default_scope: Option<String>,
    pub default_credentials: StorageCredentials,
    pub string_escaping: StringEscaping,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            raw_prefix: "ami/raw".to_string(),
            stage_prefix: "ami/ndjson".to_string(),
            refresh_every_uploads: 5,
            default_scope: None,
            default_credentials: StorageCredentials::default(),
            string_escaping: StringEscaping::default(),
        }
    }
}

/// Turns a job's configuration into the destination its worker drives.
pub trait DestinationBuilder: Send + Sync {
    fn build(&self, job_id: &str, config: &JobConfig) -> Box<dyn Destination>;
}

pub struct SinkBuilder {
    warehouse: Arc<dyn Warehouse>,
    connector: Arc<dyn StorageConnector>,
    settings: SinkSettings,
}

impl SinkBuilder {
    pub fn new(warehouse: Arc<dyn Warehouse>, connector: Arc<dyn StorageConnector>, settings: SinkSettings) -> Self {
        Self {
            warehouse,
            connector,
            settings,
        }
    }

    fn credentials(&self, config: &JobConfig) -> StorageCredentials {
        config
            .storage
            .as_ref()
            .map(|c| c.or(&self.settings.default_credentials))
            .unwrap_or_else(|| self.settings.default_credentials.clone())
    }
}

impl DestinationBuilder for SinkBuilder {
    fn build(&self, job_id: &str, config: &JobConfig) -> Box<dyn Destination> {
        match config.sink {
            SinkKind::Table => Box::new(TableSink::new(
                self.warehouse.clone(),
                config.target.clone(),
                self.settings.string_escaping,
            )),
            SinkKind::ObjectStorage => Box::new(ObjectRawSink::new(
                self.connector.clone(),
                self.credentials(config),
                config.target.clone(),
                config.prefix.clone().unwrap_or_else(|| self.settings.raw_prefix.clone()),
                job_id.to_string(),
            )),
            SinkKind::ManagedStage => Box::new(ManagedStageSink::new(
                self.warehouse.clone(),
                config.target.clone(),
                config.prefix.clone().unwrap_or_else(|| self.settings.stage_prefix.clone()),
                job_id.to_string(),
            )),
            SinkKind::ExternalStage => Box::new(ExternalStageSink::new(
                self.warehouse.clone(),
                self.connector.clone(),
                ExternalStageParams {
                    staging_pointer: config.staging_pointer.clone(),
                    default_scope: self.settings.default_scope.clone(),
                    credentials: self.credentials(config),
                    job_id: job_id.to_string(),
                    refresh_every: self.settings.refresh_every_uploads,
                },
            )),
        }
    }
}
