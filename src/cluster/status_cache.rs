//! Last-known cluster status shared between the manager and the liveness probe

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::innodb::{ClusterStatus, InstanceStatus};

/// Holder for the most recent [`ClusterStatus`].
///
/// Cloning the cache shares the holder. Values are copied on the way in and
/// on the way out, so callers never observe later writes through a value they
/// already hold.
#[derive(Clone, Default)]
pub struct StatusCache {
    inner: Arc<Mutex<Option<ClusterStatus>>>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, status: &ClusterStatus) {
        *self.inner.lock().await = Some(status.deep_copy());
    }

    pub async fn get(&self) -> Option<ClusterStatus> {
        self.inner.lock().await.as_ref().map(ClusterStatus::deep_copy)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LivenessError {
    #[error("cluster status is not yet known")]
    Unknown,

    #[error("instance {name} is {status}, not ONLINE")]
    NotOnline {
        name: String,
        status: InstanceStatus,
    },
}

/// Healthy iff the local instance was `ONLINE` in the last cached status
#[derive(Clone)]
pub struct LivenessProbe {
    cache: StatusCache,
    instance_name: String,
}

impl LivenessProbe {
    pub fn new(cache: StatusCache, instance_name: impl Into<String>) -> Self {
        Self {
            cache,
            instance_name: instance_name.into(),
        }
    }

    pub async fn check(&self) -> Result<(), LivenessError> {
        let status = self.cache.get().await.ok_or(LivenessError::Unknown)?;
        match status.get_instance_status(&self.instance_name) {
            InstanceStatus::Online => Ok(()),
            other => Err(LivenessError::NotOnline {
                name: self.instance_name.clone(),
                status: other,
            }),
        }
    }
}
