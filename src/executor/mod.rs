//! Backup executors and storage providers
//!
//! An executor produces and consumes database dumps; a storage provider moves
//! them to and from durable storage. Both are selected by name from the
//! resource spec through a [`ProviderFactory`].

mod mysqldump;
mod s3;

pub use mysqldump::{MysqlConnection, MysqldumpExecutor};
pub use s3::{ACCESS_KEY, S3Credentials, S3Storage, SECRET_KEY};

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::crd::{BackupExecutorSpec, StorageProviderSpec};

pub const MYSQLDUMP: &str = "mysqldump";
pub const S3: &str = "s3";

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: &'static str,
        status: String,
        stderr: String,
    },

    #[error("object storage error: {0}")]
    Storage(#[from] object_store::Error),

    #[error("unknown provider {0:?}")]
    UnknownProvider(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result of a backup run
#[derive(Debug, Clone)]
pub struct BackupArtifact {
    pub content: Bytes,
    /// Storage key, `<prefix>.<timestamp>.sql.gz`
    pub location: String,
}

#[async_trait]
pub trait BackupExecutor: Send + Sync {
    /// Dump the configured databases. `prefix` is usually `<cluster>/<backup>`.
    async fn backup(&self, prefix: &str) -> Result<BackupArtifact, ExecutorError>;

    async fn restore(&self, content: Bytes) -> Result<(), ExecutorError>;
}

#[async_trait]
pub trait StorageProvider: Send + Sync {
    async fn store(&self, key: &str, content: Bytes) -> Result<(), ExecutorError>;

    async fn retrieve(&self, key: &str) -> Result<Bytes, ExecutorError>;
}

/// Name of the executor configured in `spec`
pub fn executor_name(spec: &BackupExecutorSpec) -> Option<&'static str> {
    spec.mysqldump.as_ref().map(|_| MYSQLDUMP)
}

/// Name of the storage provider configured in `spec`
pub fn storage_name(spec: &StorageProviderSpec) -> Option<&'static str> {
    spec.s3.as_ref().map(|_| S3)
}

/// Builds executors and storage providers from resource specs
pub trait ProviderFactory: Send + Sync {
    fn executor(&self, spec: &BackupExecutorSpec) -> Result<Arc<dyn BackupExecutor>, ExecutorError>;

    fn storage(
        &self,
        spec: &StorageProviderSpec,
        credentials: S3Credentials,
    ) -> Result<Arc<dyn StorageProvider>, ExecutorError>;
}

/// Factory for the built-in `mysqldump` executor and `s3` storage
#[derive(Clone, Debug)]
pub struct DefaultProviders {
    connection: MysqlConnection,
}

impl DefaultProviders {
    pub fn new(connection: MysqlConnection) -> Self {
        Self { connection }
    }
}

impl ProviderFactory for DefaultProviders {
    fn executor(&self, spec: &BackupExecutorSpec) -> Result<Arc<dyn BackupExecutor>, ExecutorError> {
        match (executor_name(spec), spec.mysqldump.as_ref()) {
            (Some(MYSQLDUMP), Some(mysqldump)) => {
                let databases = mysqldump.databases.iter().map(|d| d.name.clone()).collect();
                Ok(Arc::new(MysqldumpExecutor::new(
                    self.connection.clone(),
                    databases,
                )))
            }
            (name, _) => Err(ExecutorError::UnknownProvider(
                name.unwrap_or_default().to_string(),
            )),
        }
    }

    fn storage(
        &self,
        spec: &StorageProviderSpec,
        credentials: S3Credentials,
    ) -> Result<Arc<dyn StorageProvider>, ExecutorError> {
        match (storage_name(spec), spec.s3.as_ref()) {
            (Some(S3), Some(s3)) => Ok(Arc::new(S3Storage::new(s3, credentials)?)),
            (name, _) => Err(ExecutorError::UnknownProvider(
                name.unwrap_or_default().to_string(),
            )),
        }
    }
}
