//! Cluster membership state machine

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::{
    Error, Instance, LocalDatabase, PrimaryWorker, Result, StatusCache, order_seeds,
};
use crate::controller::ResourceStore;
use crate::health::{HealthState, MemberCounter, Metrics};
use crate::innodb::{
    ClusterStatus, InstanceStatus, MySqlShell, ReplicaSetStatus, ShellError, ShellFactory,
    ShellOptions,
};

/// Collaborators of a [`ClusterManager`]
pub struct ManagerContext {
    pub shells: Arc<dyn ShellFactory>,
    pub store: Arc<dyn ResourceStore>,
    pub database: Arc<dyn LocalDatabase>,
    pub cache: StatusCache,
    pub metrics: Arc<Metrics>,
    pub primary_worker: Arc<dyn PrimaryWorker>,
}

/// State of the primary-only worker
enum Leadership {
    Inactive,
    Active {
        cancel: CancellationToken,
        updates: watch::Sender<ClusterStatus>,
        handle: JoinHandle<()>,
    },
}

pub struct ClusterManager {
    instance: Instance,
    local: Arc<dyn MySqlShell>,
    ctx: ManagerContext,
    health: Option<Arc<HealthState>>,
    leadership: Leadership,
    root: CancellationToken,
}

impl ClusterManager {
    /// `root` is the process-wide cancellation token; the primary worker runs
    /// under a child of it.
    pub fn new(instance: Instance, ctx: ManagerContext, root: CancellationToken) -> Self {
        let local = ctx.shells.connect(&instance.shell_uri());
        Self {
            instance,
            local,
            ctx,
            health: None,
            leadership: Leadership::Inactive,
            root,
        }
    }

    /// Report each sync result as the process readiness
    pub fn with_health(mut self, health: Arc<HealthState>) -> Self {
        self.health = Some(health);
        self
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Whether the primary-only worker is currently running
    pub fn is_primary_worker_active(&self) -> bool {
        matches!(self.leadership, Leadership::Active { .. })
    }

    /// Sync every `interval` until `cancel` fires
    pub async fn run(&mut self, cancel: CancellationToken, interval: Duration) {
        info!(
            instance = %self.instance.name(),
            interval_secs = interval.as_secs(),
            "Starting cluster manager"
        );

        loop {
            let ready = self.sync().await;
            if let Some(health) = &self.health {
                health.set_ready(ready).await;
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        self.stop_primary_worker();
        info!(instance = %self.instance.name(), "Cluster manager stopped");
    }

    /// One reconciliation pass. Returns whether the local member is ready.
    ///
    /// Failed corrective actions are logged and counted; the next pass starts
    /// over from the observed topology.
    #[instrument(skip(self), fields(instance = %self.instance.name(), cluster = %self.instance.cluster_name))]
    pub async fn sync(&mut self) -> bool {
        if !self.ctx.database.is_reachable().await {
            debug!("Local database is not reachable yet");
            return false;
        }

        let status = match self.get_cluster_status().await {
            Ok(status) => status,
            Err(Error::NoClusterFound { local }) if self.instance.is_bootstrap_member() => {
                match self.bootstrap(&local).await {
                    Ok(status) => status,
                    Err(e) => {
                        error!(error = %e, "Failed to bootstrap cluster");
                        return false;
                    }
                }
            }
            Err(e) => {
                info!(error = %e, "Waiting for the cluster to be created");
                return false;
            }
        };

        self.ctx.cache.set(&status).await;

        let name = self.instance.name();
        let member_status = status.get_instance_status(&name);
        self.ctx.metrics.record_instance_status(
            &self.instance.pod_name(),
            &self.instance.cluster_name,
            member_status.as_str(),
        );

        if status.default_replica_set.status == ReplicaSetStatus::NoQuorum {
            warn!(
                status_text = %status.default_replica_set.status_text,
                "Replica set has no quorum"
            );
            self.count(|m| &m.no_quorum);
        }

        let ready = match member_status {
            InstanceStatus::Online => {
                debug!("Instance is online");
                true
            }
            InstanceStatus::Recovering => {
                info!("Instance is recovering");
                false
            }
            InstanceStatus::Missing => self.handle_missing(&status).await,
            InstanceStatus::NotFound => self.handle_not_found(&status).await,
            InstanceStatus::Unreachable => {
                info!("Instance is unreachable from the group");
                false
            }
            other => {
                warn!(status = %other, "Instance in unknown state");
                false
            }
        };

        if ready && !self.instance.multi_master {
            self.evaluate_leadership(&status);
        }

        ready
    }

    /// Status from the local shell, falling back to the seeds
    async fn get_cluster_status(&self) -> Result<ClusterStatus> {
        let local = match self.local.get_cluster_status().await {
            Ok(status) => return Ok(status),
            Err(e) => e,
        };
        debug!(error = %local, "Local instance has no cluster status, trying seeds");

        for seed in order_seeds(&self.instance.seeds, &self.instance.name()) {
            let member = match self.instance.from_seed(&seed) {
                Ok(member) => member,
                Err(e) => {
                    warn!(seed = %seed, error = %e, "Ignoring malformed seed");
                    continue;
                }
            };

            match self
                .ctx
                .store
                .pod_exists(&self.instance.namespace, &member.pod_name())
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    debug!(pod = %member.pod_name(), "Seed pod does not exist, skipping");
                    continue;
                }
                Err(e) => {
                    warn!(pod = %member.pod_name(), error = %e, "Failed to look up seed pod");
                    continue;
                }
            }

            let shell = self.ctx.shells.connect(&member.shell_uri());
            match shell.get_cluster_status().await {
                Ok(status) => {
                    debug!(seed = %member.name(), "Got cluster status from seed");
                    return Ok(status);
                }
                Err(e) => debug!(seed = %member.name(), error = %e, "Seed has no cluster status"),
            }
        }

        Err(Error::NoClusterFound { local })
    }

    /// Create the cluster, or reboot it when the local instance still carries
    /// metadata from a group that went down completely.
    async fn bootstrap(&self, local: &ShellError) -> Result<ClusterStatus> {
        if local.suggests_reboot() {
            info!("Rebooting cluster from complete outage");
            let status = self.local.reboot_cluster_from_complete_outage().await?;
            info!("Cluster rebooted");
            return Ok(status);
        }

        info!(multi_master = self.instance.multi_master, "Creating cluster");
        let created = match self.security_options() {
            Ok(opts) => {
                let opts = if self.instance.multi_master {
                    opts.with("multiPrimary", "true").with("force", "true")
                } else {
                    opts
                };
                self.local.create_cluster(&opts).await.map_err(Error::from)
            }
            Err(e) => Err(e),
        };

        match created {
            Ok(status) => {
                self.count(|m| &m.cluster_create);
                info!("Cluster created");
                Ok(status)
            }
            Err(e) => {
                self.count(|m| &m.cluster_create_errors);
                Err(e)
            }
        }
    }

    async fn handle_missing(&self, status: &ClusterStatus) -> bool {
        let primary = match self.primary_shell(status) {
            Ok(shell) => shell,
            Err(e) => {
                error!(error = %e, "Cannot reach primary for missing instance");
                return false;
            }
        };
        let uri = self.instance.shell_uri();

        let state = match primary.check_instance_state(&uri).await {
            Ok(state) => state,
            Err(e) => {
                error!(error = %e, "Failed to check instance state");
                return false;
            }
        };

        if state.can_rejoin_cluster() {
            info!("Rejoining instance to cluster");
            let rejoined = match self.security_options() {
                Ok(opts) => primary
                    .rejoin_instance_to_cluster(&uri, &opts)
                    .await
                    .map_err(Error::from),
                Err(e) => Err(e),
            };
            match rejoined {
                Ok(()) => {
                    self.count(|m| &m.instance_rejoin);
                    true
                }
                Err(e) => {
                    self.count(|m| &m.instance_rejoin_errors);
                    error!(error = %e, "Failed to rejoin instance");
                    false
                }
            }
        } else {
            info!(
                reason = %state.reason,
                state = %state.state,
                "Instance cannot rejoin, removing it from the cluster"
            );
            let opts = ShellOptions::new().with("force", "true");
            match primary.remove_instance_from_cluster(&uri, &opts).await {
                Ok(()) => true,
                Err(e) => {
                    error!(error = %e, "Failed to remove instance");
                    false
                }
            }
        }
    }

    async fn handle_not_found(&self, status: &ClusterStatus) -> bool {
        info!("Adding instance to cluster");
        let added = match (self.primary_shell(status), self.security_options()) {
            (Ok(primary), Ok(opts)) => primary
                .add_instance_to_cluster(&self.instance.shell_uri(), &opts)
                .await
                .map_err(Error::from),
            (Err(e), _) | (_, Err(e)) => Err(e),
        };

        match added {
            Ok(()) => {
                self.count(|m| &m.instance_add);
                true
            }
            Err(e) => {
                self.count(|m| &m.instance_add_errors);
                error!(error = %e, "Failed to add instance");
                false
            }
        }
    }

    /// Start or stop the primary worker to match the observed primary
    fn evaluate_leadership(&mut self, status: &ClusterStatus) {
        let primary = match status.get_primary_addr() {
            Ok(addr) => addr,
            Err(e) => {
                warn!(error = %e, "Cannot determine primary");
                return;
            }
        };
        let is_primary = primary.starts_with(&self.instance.name());

        match (&self.leadership, is_primary) {
            (Leadership::Active { updates, .. }, true) => {
                updates.send_replace(status.deep_copy());
            }
            (Leadership::Inactive, true) => self.start_primary_worker(status),
            (Leadership::Active { .. }, false) => {
                info!(primary = %primary, "No longer primary");
                self.stop_primary_worker();
            }
            (Leadership::Inactive, false) => {}
        }
    }

    fn start_primary_worker(&mut self, status: &ClusterStatus) {
        info!("Instance is primary, starting primary worker");
        let cancel = self.root.child_token();
        let (updates, receiver) = watch::channel(status.deep_copy());

        let worker = self.ctx.primary_worker.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { worker.run(token, receiver).await });

        self.leadership = Leadership::Active {
            cancel,
            updates,
            handle,
        };
    }

    fn stop_primary_worker(&mut self) {
        if let Leadership::Active { cancel, handle, .. } =
            std::mem::replace(&mut self.leadership, Leadership::Inactive)
        {
            cancel.cancel();
            if handle.is_finished() {
                warn!("Primary worker had already exited");
            }
            debug!("Primary worker cancelled");
        }
    }

    fn primary_shell(&self, status: &ClusterStatus) -> Result<Arc<dyn MySqlShell>> {
        let primary = status.get_primary_addr()?;
        Ok(self.ctx.shells.connect(&self.instance.shell_uri_for(&primary)))
    }

    /// Options shared by create, add and rejoin
    fn security_options(&self) -> Result<ShellOptions> {
        Ok(ShellOptions::new()
            .with("ipWhitelist", self.instance.whitelist_cidr()?)
            .with("memberSslMode", "REQUIRED"))
    }

    fn count<F>(&self, family: F)
    where
        F: Fn(&Metrics) -> &MemberCounter,
    {
        Metrics::inc(
            family(&self.ctx.metrics),
            &self.instance.pod_name(),
            &self.instance.cluster_name,
        );
    }
}
