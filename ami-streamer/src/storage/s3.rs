use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use object_store::{
    aws::AmazonS3Builder, path::Path, Attribute, Attributes, ObjectStore, PutOptions, PutPayload,
};

use super::{
    sts::StsClient, CredentialSource, ObjectStorage, StorageConnector, StorageCredentials, StorageError,
};

/// [`ObjectStorage`] over any `object_store` backend.
pub struct ObjectStoreBucket {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl ObjectStoreBucket {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }
}

#[async_trait::async_trait]
impl ObjectStorage for ObjectStoreBucket {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<(), StorageError> {
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };

        self.store
            .put_opts(&Path::from(key), PutPayload::from(body), opts)
            .await
            .map(|_| ())
            .map_err(|e| StorageError::Request(e.to_string()))
    }

    async fn head_bucket(&self) -> Result<(), StorageError> {
        // Listing needs the bucket to exist and be readable; one page is enough.
        let mut listing = self.store.list(None);
        match listing.next().await {
            Some(Err(e)) => Err(StorageError::Unreachable {
                bucket: self.bucket.clone(),
                reason: e.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

/// Connects to S3-compatible buckets, resolving credentials by priority:
/// role assumption with explicit keys, explicit keys, then the ambient
/// provider chain.
pub struct S3Connector {
    default_region: String,
    endpoint: Option<String>,
    sts: StsClient,
}

impl S3Connector {
    pub fn new(default_region: impl Into<String>, endpoint: Option<String>) -> Self {
        Self {
            default_region: default_region.into(),
            endpoint,
            sts: StsClient::new(),
        }
    }
}

#[async_trait::async_trait]
impl StorageConnector for S3Connector {
    async fn connect(
        &self,
        bucket: &str,
        credentials: &StorageCredentials,
    ) -> Result<Arc<dyn ObjectStorage>, StorageError> {
        let region = credentials
            .region
            .clone()
            .unwrap_or_else(|| self.default_region.clone());

        let builder = match credentials.source() {
            CredentialSource::AssumeRole {
                access_key_id,
                secret_access_key,
                role_arn,
            } => {
                let session_name = format!("ami-streamer-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
                let temp = self
                    .sts
                    .assume_role(access_key_id, secret_access_key, role_arn, &region, &session_name)
                    .await?;
                tracing::info!(bucket, role_arn, "using temporary credentials from role assumption");
                AmazonS3Builder::new()
                    .with_access_key_id(temp.access_key_id)
                    .with_secret_access_key(temp.secret_access_key)
                    .with_token(temp.session_token)
            }
            CredentialSource::StaticKeys {
                access_key_id,
                secret_access_key,
            } => {
                tracing::info!(bucket, "using explicit storage keys");
                AmazonS3Builder::new()
                    .with_access_key_id(access_key_id)
                    .with_secret_access_key(secret_access_key)
            }
            CredentialSource::Ambient => {
                tracing::info!(bucket, "using ambient storage credentials");
                AmazonS3Builder::from_env()
            }
        };

        let mut builder = builder.with_bucket_name(bucket).with_region(&region);
        if let Some(endpoint) = &self.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store = builder.build().map_err(|e| StorageError::Config(e.to_string()))?;
        Ok(Arc::new(ObjectStoreBucket::new(Arc::new(store), bucket)))
    }
}
