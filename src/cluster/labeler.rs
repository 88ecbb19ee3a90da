//! Primary-only pod role labeler

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::ResourceStore;
use crate::crd::{ROLE_LABEL, ROLE_PRIMARY, ROLE_SECONDARY};
use crate::innodb::ClusterStatus;

/// Work that runs only while the local member is the primary.
///
/// `run` receives every status the manager observes through `updates` and
/// must return promptly once `cancel` fires.
#[async_trait]
pub trait PrimaryWorker: Send + Sync + 'static {
    async fn run(&self, cancel: CancellationToken, updates: watch::Receiver<ClusterStatus>);
}

/// Pod name behind a topology host such as `mysql-1.mysql`
pub fn pod_name_for(host: &str) -> &str {
    host.split('.').next().unwrap_or(host)
}

/// Labels every topology member's pod with its current role
pub struct PodRoleLabeler {
    store: Arc<dyn ResourceStore>,
    namespace: String,
}

impl PodRoleLabeler {
    pub fn new(store: Arc<dyn ResourceStore>, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into(),
        }
    }

    async fn label(&self, status: &ClusterStatus) {
        let primary = match status.get_primary_addr() {
            Ok(addr) => addr,
            Err(e) => {
                warn!(error = %e, "Skipping pod labels");
                return;
            }
        };

        for instance in status.default_replica_set.topology.values() {
            let role = if primary.starts_with(instance.name()) {
                ROLE_PRIMARY
            } else {
                ROLE_SECONDARY
            };
            let pod = pod_name_for(instance.name());

            match self
                .store
                .label_pod(&self.namespace, pod, ROLE_LABEL, role)
                .await
            {
                Ok(()) => debug!(pod, role, "Labeled pod"),
                Err(e) if e.is_not_found() => debug!(pod, "Pod no longer exists"),
                Err(e) => warn!(pod, role, error = %e, "Failed to label pod"),
            }
        }
    }
}

#[async_trait]
impl PrimaryWorker for PodRoleLabeler {
    async fn run(&self, cancel: CancellationToken, mut updates: watch::Receiver<ClusterStatus>) {
        info!(namespace = %self.namespace, "Starting pod role labeler");

        let initial = updates.borrow_and_update().clone();
        self.label(&initial).await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = updates.borrow_and_update().clone();
                    self.label(&status).await;
                }
            }
        }

        info!(namespace = %self.namespace, "Pod role labeler stopped");
    }
}
