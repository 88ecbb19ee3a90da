//! S3 storage provider built on `object_store`

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use k8s_openapi::api::core::v1::Secret;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use tracing::{debug, info};

use super::{ExecutorError, StorageProvider};
use crate::crd::S3StorageSpec;

/// Secret keys holding the S3 credentials
pub const ACCESS_KEY: &str = "accessKey";
pub const SECRET_KEY: &str = "secretKey";

#[derive(Clone, Default)]
pub struct S3Credentials {
    pub access_key: String,
    pub secret_key: String,
}

impl S3Credentials {
    /// Read `accessKey` / `secretKey` from a secret's `data` (or `stringData`)
    pub fn from_secret(secret: &Secret) -> Self {
        let read = |key: &str| -> String {
            secret
                .data
                .as_ref()
                .and_then(|data| data.get(key))
                .map(|value| String::from_utf8_lossy(&value.0).trim().to_string())
                .or_else(|| {
                    secret
                        .string_data
                        .as_ref()
                        .and_then(|data| data.get(key))
                        .map(|value| value.trim().to_string())
                })
                .unwrap_or_default()
        };
        Self {
            access_key: read(ACCESS_KEY),
            secret_key: read(SECRET_KEY),
        }
    }
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"****")
            .finish()
    }
}

pub struct S3Storage {
    bucket: String,
    store: Arc<dyn ObjectStore>,
}

impl S3Storage {
    pub fn new(spec: &S3StorageSpec, credentials: S3Credentials) -> Result<Self, ExecutorError> {
        if credentials.access_key.is_empty() || credentials.secret_key.is_empty() {
            return Err(ExecutorError::InvalidConfig(format!(
                "credentials secret {:?} must contain {} and {}",
                spec.credentials_secret.name, ACCESS_KEY, SECRET_KEY
            )));
        }

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&spec.bucket)
            .with_region(&spec.region)
            .with_access_key_id(credentials.access_key)
            .with_secret_access_key(credentials.secret_key)
            .with_virtual_hosted_style_request(!spec.force_path_style);

        if let Some(endpoint) = spec.endpoint.as_deref().filter(|e| !e.is_empty()) {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        Ok(Self {
            bucket: spec.bucket.clone(),
            store: Arc::new(builder.build()?),
        })
    }

    /// Wrap an arbitrary object store
    pub fn with_store(bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            bucket: bucket.into(),
            store,
        }
    }
}

#[async_trait]
impl StorageProvider for S3Storage {
    async fn store(&self, key: &str, content: Bytes) -> Result<(), ExecutorError> {
        info!(bucket = %self.bucket, key, bytes = content.len(), "Uploading backup");
        self.store
            .put(&Path::from(key), PutPayload::from_bytes(content))
            .await?;
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Bytes, ExecutorError> {
        debug!(bucket = %self.bucket, key, "Downloading backup");
        let content = self.store.get(&Path::from(key)).await?.bytes().await?;
        Ok(content)
    }
}
