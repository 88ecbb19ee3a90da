pub mod cluster;
pub mod config;
pub mod controller;
pub mod crd;
pub mod executor;
pub mod health;
pub mod innodb;

pub use cluster::{ClusterManager, Instance, LivenessProbe, StatusCache};
pub use config::{AgentConfig, ConfigError, OperatorConfig};
pub use controller::{Context, Engine, Error, Result};
pub use crd::{MySQLBackup, MySQLCluster, MySQLRestore};
pub use health::{HealthState, Metrics};

use std::sync::Arc;

use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cluster::{ManagerContext, MysqlAdminProbe, PodRoleLabeler};
use crate::config::ControllerConfig;
use crate::controller::{
    BackupAgentHandler, BackupOperatorHandler, EventFilter, KubeEventPublisher, KubeStore,
    RestoreAgentHandler, RestoreOperatorHandler, SyncHandler, agent_filter, operator_filter,
};
use crate::executor::{DefaultProviders, MysqlConnection};
use crate::innodb::ProcessShellFactory;

/// Namespaced or cluster-wide API depending on scope
fn scoped_api<T>(client: Client, namespace: Option<&str>) -> Api<T>
where
    T: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <T as Resource>::DynamicType: Default,
    T: Clone + DeserializeOwned + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    }
}

/// Build an engine for `K` and run it until `cancel` fires
async fn run_engine<K>(
    name: &str,
    api: Api<K>,
    handler: Arc<dyn SyncHandler>,
    filter: EventFilter<K>,
    config: &ControllerConfig,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
) -> Result<()>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + std::fmt::Debug
        + Send
        + Sync
        + 'static,
{
    Engine::new(name, handler)
        .with_backoff(config.backoff.clone())
        .with_workers(config.workers)
        .with_cache_sync_timeout(config.cache_sync_timeout)
        .with_metrics(metrics)
        .run(api, filter, cancel)
        .await
}

/// Run the operator-side backup and restore controllers.
///
/// Returns when `cancel` fires, or with the first startup error.
pub async fn run_operator(
    client: Client,
    config: &OperatorConfig,
    health: Arc<HealthState>,
    cancel: CancellationToken,
) -> Result<()> {
    let namespace = config.namespace.as_deref();
    info!(
        scope = namespace.unwrap_or("cluster-wide"),
        "Starting backup and restore controllers"
    );

    let ctx = Context::new(
        Arc::new(KubeStore::new(client.clone())),
        Arc::new(KubeEventPublisher::new(client.clone(), "mysql-operator")),
        health.metrics.clone(),
    );

    health.set_ready(true).await;

    let backups = run_engine(
        "backup-operator",
        scoped_api::<MySQLBackup>(client.clone(), namespace),
        Arc::new(BackupOperatorHandler::new(ctx.clone())),
        operator_filter(),
        &config.controller,
        health.metrics.clone(),
        cancel.clone(),
    );
    let restores = run_engine(
        "restore-operator",
        scoped_api::<MySQLRestore>(client, namespace),
        Arc::new(RestoreOperatorHandler::new(ctx)),
        operator_filter(),
        &config.controller,
        health.metrics.clone(),
        cancel.clone(),
    );

    let result = tokio::try_join!(backups, restores);
    cancel.cancel();
    result.map(|_| ())
}

/// Run everything the per-pod agent hosts: the cluster manager loop and the
/// agent-side backup and restore controllers.
///
/// `cache` must be the same holder the health server's liveness probe reads.
pub async fn run_agent(
    client: Client,
    instance: Instance,
    config: &AgentConfig,
    health: Arc<HealthState>,
    cache: StatusCache,
    cancel: CancellationToken,
) -> Result<()> {
    let hostname = instance.pod_name();
    let namespace = instance.namespace.clone();
    info!(
        instance = %instance.name(),
        cluster = %instance.cluster_name,
        "Starting agent"
    );

    let store = Arc::new(KubeStore::new(client.clone()));
    let connection = MysqlConnection::local(instance.root_password());
    let providers = Arc::new(DefaultProviders::new(connection.clone()));
    let ctx = Context::new(
        store.clone(),
        Arc::new(KubeEventPublisher::new(client.clone(), "mysql-agent")),
        health.metrics.clone(),
    );

    let manager_ctx = ManagerContext {
        shells: Arc::new(ProcessShellFactory),
        store: store.clone(),
        database: Arc::new(MysqlAdminProbe::new(connection)),
        cache,
        metrics: health.metrics.clone(),
        primary_worker: Arc::new(PodRoleLabeler::new(store, namespace.clone())),
    };
    let mut manager =
        ClusterManager::new(instance, manager_ctx, cancel.clone()).with_health(health.clone());
    let sync_interval = config.sync_interval;
    let manager_cancel = cancel.clone();
    let manager = async move {
        manager.run(manager_cancel, sync_interval).await;
        Ok::<(), Error>(())
    };

    let backups = run_engine(
        "backup-agent",
        Api::<MySQLBackup>::namespaced(client.clone(), &namespace),
        Arc::new(BackupAgentHandler::new(
            ctx.clone(),
            providers.clone(),
            hostname.clone(),
        )),
        agent_filter(hostname.clone()),
        &config.controller,
        health.metrics.clone(),
        cancel.clone(),
    );
    let restores = run_engine(
        "restore-agent",
        Api::<MySQLRestore>::namespaced(client, &namespace),
        Arc::new(RestoreAgentHandler::new(ctx, providers, hostname.clone())),
        agent_filter(hostname),
        &config.controller,
        health.metrics.clone(),
        cancel.clone(),
    );

    let result = tokio::try_join!(manager, backups, restores);
    cancel.cancel();
    result.map(|_| ())
}
