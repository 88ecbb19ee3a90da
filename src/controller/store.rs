//! Declarative resource store
//!
//! Every mutation goes through [`ResourceStore`]; watch caches are only used to
//! decide what to sync. Writes carry the object's `resourceVersion`, so a
//! concurrent writer makes the API server reject the update with a conflict,
//! which the engine retries.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::controller::error::{Error, Result};
use crate::crd::{MySQLBackup, MySQLCluster, MySQLRestore};

/// Field manager used for every write
pub const FIELD_MANAGER: &str = "mysql-operator";

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_backup(&self, namespace: &str, name: &str) -> Result<MySQLBackup>;

    /// Persist `spec.scheduledMember`
    async fn update_backup_spec(&self, backup: &MySQLBackup) -> Result<MySQLBackup>;

    async fn update_backup_status(&self, backup: &MySQLBackup) -> Result<MySQLBackup>;

    async fn get_restore(&self, namespace: &str, name: &str) -> Result<MySQLRestore>;

    /// Persist `spec.scheduledMember`
    async fn update_restore_spec(&self, restore: &MySQLRestore) -> Result<MySQLRestore>;

    async fn update_restore_status(&self, restore: &MySQLRestore) -> Result<MySQLRestore>;

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<MySQLCluster>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret>;

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>>;

    async fn pod_exists(&self, namespace: &str, name: &str) -> Result<bool>;

    /// Set a single label on a pod, leaving other labels untouched
    async fn label_pod(&self, namespace: &str, name: &str, key: &str, value: &str)
    -> Result<()>;
}

/// [`ResourceStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get<K>(&self, namespace: &str, name: &str) -> Result<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        self.api::<K>(namespace)
            .get_opt(name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{} {}/{}", K::kind(&()), namespace, name)))
    }

    async fn patch_spec<K>(&self, obj: &K, spec: serde_json::Value) -> Result<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        let namespace = obj.namespace().ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let patch = json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "spec": spec,
        });
        let updated = self
            .api::<K>(&namespace)
            .patch(
                &obj.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(updated)
    }

    async fn patch_status<K>(&self, obj: &K, status: serde_json::Value) -> Result<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        let namespace = obj.namespace().ok_or(Error::MissingObjectKey(".metadata.namespace"))?;
        let patch = json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "status": status,
        });
        let updated = self
            .api::<K>(&namespace)
            .patch_status(
                &obj.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(updated)
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get_backup(&self, namespace: &str, name: &str) -> Result<MySQLBackup> {
        self.get(namespace, name).await
    }

    async fn update_backup_spec(&self, backup: &MySQLBackup) -> Result<MySQLBackup> {
        let spec = json!({ "scheduledMember": backup.spec.scheduled_member });
        self.patch_spec(backup, spec).await
    }

    async fn update_backup_status(&self, backup: &MySQLBackup) -> Result<MySQLBackup> {
        let status = serde_json::to_value(&backup.status)?;
        self.patch_status(backup, status).await
    }

    async fn get_restore(&self, namespace: &str, name: &str) -> Result<MySQLRestore> {
        self.get(namespace, name).await
    }

    async fn update_restore_spec(&self, restore: &MySQLRestore) -> Result<MySQLRestore> {
        let spec = json!({ "scheduledMember": restore.spec.scheduled_member });
        self.patch_spec(restore, spec).await
    }

    async fn update_restore_status(&self, restore: &MySQLRestore) -> Result<MySQLRestore> {
        let status = serde_json::to_value(&restore.status)?;
        self.patch_status(restore, status).await
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<MySQLCluster> {
        self.get(namespace, name).await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        self.get(namespace, name).await
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>> {
        let pods = self
            .api::<Pod>(namespace)
            .list(&ListParams::default().labels(selector))
            .await?;
        Ok(pods.items)
    }

    async fn pod_exists(&self, namespace: &str, name: &str) -> Result<bool> {
        let pod = self.api::<Pod>(namespace).get_opt(name).await?;
        Ok(pod.is_some())
    }

    async fn label_pod(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: &str,
    ) -> Result<()> {
        let patch = json!({
            "metadata": { "labels": { key: value } }
        });
        self.api::<Pod>(namespace)
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
