use serde::Deserialize;
use std::{fs, path::PathBuf, time::Duration};

use crate::{
    sinks::{SinkSettings, StringEscaping},
    storage::StorageCredentials,
};

fn default_max_connections() -> u32 {
    4
}

fn default_backoff_ms() -> u64 {
    2_000
}

fn default_refresh_every() -> usize {
    5
}

fn default_raw_prefix() -> String {
    "ami/raw".to_string()
}

fn default_stage_prefix() -> String {
    "ami/ndjson".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_control_addr() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct WarehouseConfig {
    pub uri: String,
    /// File holding the session token; re-read on every reconnect.
    #[serde(default)]
    pub token_path: Option<PathBuf>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Scope used for pipeline discovery when a staging pointer is unqualified.
    #[serde(default)]
    pub default_scope: Option<String>,
    /// Backslash handling for literals inlined by the table sink.
    #[serde(default)]
    pub string_escaping: StringEscaping,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_control_addr")]
    pub bind_addr: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_control_addr(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamingConfig {
    #[serde(default = "default_backoff_ms")]
    pub delivery_backoff_ms: u64,
    #[serde(default = "default_refresh_every")]
    pub refresh_every_uploads: usize,
    #[serde(default = "default_raw_prefix")]
    pub raw_prefix: String,
    #[serde(default = "default_stage_prefix")]
    pub stage_prefix: String,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            delivery_backoff_ms: default_backoff_ms(),
            refresh_every_uploads: default_refresh_every(),
            raw_prefix: default_raw_prefix(),
            stage_prefix: default_stage_prefix(),
        }
    }
}

impl StreamingConfig {
    /// Fixed pause after a failed delivery, kept within 1..=5 seconds.
    pub fn delivery_backoff(&self) -> Duration {
        Duration::from_millis(self.delivery_backoff_ms.clamp(1_000, 5_000))
    }
}

#[derive(Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub role_arn: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            role_arn: None,
        }
    }
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "***"))
            .field("role_arn", &self.role_arn)
            .finish()
    }
}

impl StorageConfig {
    pub fn default_credentials(&self) -> StorageCredentials {
        StorageCredentials {
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            role_arn: self.role_arn.clone(),
            region: Some(self.region.clone()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("AMI_STREAMER_CONFIG").unwrap_or_else(|_| "ami-streamer.toml".to_string());
        let contents = fs::read_to_string(&path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        Ok(cfg)
    }

    pub fn sink_settings(&self) -> SinkSettings {
        SinkSettings {
            raw_prefix: self.streaming.raw_prefix.clone(),
            stage_prefix: self.streaming.stage_prefix.clone(),
            refresh_every_uploads: self.streaming.refresh_every_uploads.max(1),
            default_scope: self.warehouse.default_scope.clone(),
            default_credentials: self.storage.default_credentials(),
            string_escaping: self.warehouse.string_escaping,
        }
    }
}
