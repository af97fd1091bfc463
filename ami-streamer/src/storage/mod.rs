//! Object storage used by the raw and external-stage sinks.

pub mod s3;
pub mod sts;

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub use s3::{ObjectStoreBucket, S3Connector};

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("storage client configuration error: {0}")]
    Config(String),
    #[error("failed to obtain storage credentials: {0}")]
    Credentials(String),
    #[error("bucket '{bucket}' is not reachable: {reason}")]
    Unreachable { bucket: String, reason: String },
    #[error("storage request failed: {0}")]
    Request(String),
}

/// Credentials a job may carry for its bucket. Secrets never serialize.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageCredentials {
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default, skip_serializing)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub role_arn: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

impl std::fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "***"))
            .field("role_arn", &self.role_arn)
            .field("region", &self.region)
            .finish()
    }
}

/// How a storage client authenticates, in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource<'a> {
    AssumeRole {
        access_key_id: &'a str,
        secret_access_key: &'a str,
        role_arn: &'a str,
    },
    StaticKeys {
        access_key_id: &'a str,
        secret_access_key: &'a str,
    },
    Ambient,
}

fn non_empty(v: &Option<String>) -> Option<&str> {
    v.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl StorageCredentials {
    pub fn source(&self) -> CredentialSource<'_> {
        let keys = non_empty(&self.access_key_id).zip(non_empty(&self.secret_access_key));
        match (keys, non_empty(&self.role_arn)) {
            (Some((access_key_id, secret_access_key)), Some(role_arn)) => CredentialSource::AssumeRole {
                access_key_id,
                secret_access_key,
                role_arn,
            },
            (Some((access_key_id, secret_access_key)), None) => CredentialSource::StaticKeys {
                access_key_id,
                secret_access_key,
            },
            (None, _) => CredentialSource::Ambient,
        }
    }

    /// Fill unset fields from `defaults`. Keys are taken as a pair.
    pub fn or(&self, defaults: &StorageCredentials) -> StorageCredentials {
        let has_keys = non_empty(&self.access_key_id).is_some() && non_empty(&self.secret_access_key).is_some();
        let (access_key_id, secret_access_key) = if has_keys {
            (self.access_key_id.clone(), self.secret_access_key.clone())
        } else {
            (defaults.access_key_id.clone(), defaults.secret_access_key.clone())
        };

        StorageCredentials {
            access_key_id,
            secret_access_key,
            role_arn: self.role_arn.clone().or_else(|| defaults.role_arn.clone()),
            region: self.region.clone().or_else(|| defaults.region.clone()),
        }
    }
}

/// A client bound to one bucket.
#[async_trait::async_trait]
pub trait ObjectStorage: Send + Sync {
    fn bucket(&self) -> &str;

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), StorageError>;

    /// Verify the bucket exists and the credentials can see it.
    async fn head_bucket(&self) -> Result<(), StorageError>;
}

#[async_trait::async_trait]
pub trait StorageConnector: Send + Sync {
    async fn connect(
        &self,
        bucket: &str,
        credentials: &StorageCredentials,
    ) -> Result<Arc<dyn ObjectStorage>, StorageError>;
}
