//! Health server for Kubernetes probes and Prometheus metrics
//!
//! Provides HTTP endpoints for:
//! - `/healthz` - Liveness probe. On the agent this reflects the local
//!   instance's last-known group membership status.
//! - `/readyz` - Readiness probe
//! - `/metrics` - Prometheus metrics

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::cluster::LivenessProbe;

/// Labels identifying a cluster member
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct MemberLabels {
    pub pod: String,
    pub cluster: String,
}

impl MemberLabels {
    pub fn new(pod: &str, cluster: &str) -> Self {
        Self {
            pod: pod.to_string(),
            cluster: cluster.to_string(),
        }
    }
}

impl EncodeLabelSet for MemberLabels {
    fn encode(&self, mut encoder: LabelSetEncoder) -> Result<(), std::fmt::Error> {
        ("pod", self.pod.as_str()).encode(encoder.encode_label())?;
        ("cluster", self.cluster.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Member labels plus the observed instance status
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct InstanceStatusLabels {
    pub pod: String,
    pub cluster: String,
    pub status: String,
}

impl EncodeLabelSet for InstanceStatusLabels {
    fn encode(&self, mut encoder: LabelSetEncoder) -> Result<(), std::fmt::Error> {
        ("pod", self.pod.as_str()).encode(encoder.encode_label())?;
        ("cluster", self.cluster.as_str()).encode(encoder.encode_label())?;
        ("status", self.status.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for reconciler engine metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ControllerLabels {
    pub controller: String,
}

impl EncodeLabelSet for ControllerLabels {
    fn encode(&self, mut encoder: LabelSetEncoder) -> Result<(), std::fmt::Error> {
        ("controller", self.controller.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Counter family labelled by pod and cluster
pub type MemberCounter = Family<MemberLabels, Counter>;

/// Shared metrics state
pub struct Metrics {
    // Cluster manager
    pub cluster_create: MemberCounter,
    pub cluster_create_errors: MemberCounter,
    pub instance_add: MemberCounter,
    pub instance_add_errors: MemberCounter,
    pub instance_rejoin: MemberCounter,
    pub instance_rejoin_errors: MemberCounter,
    pub no_quorum: MemberCounter,
    pub instance_status: Family<InstanceStatusLabels, Counter>,

    // Backup and restore
    pub backup_success: MemberCounter,
    pub restore_success: MemberCounter,

    // Reconciler engines
    pub syncs_total: Family<ControllerLabels, Counter>,
    pub sync_errors_total: Family<ControllerLabels, Counter>,
    pub sync_duration_seconds: Family<ControllerLabels, Histogram>,

    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("mysql_operator");

        let mut member_counter = |name: &str, help: &str| {
            let family = MemberCounter::default();
            registry.register(name, help, family.clone());
            family
        };

        let cluster_create = member_counter("cluster_create", "Clusters created by this member");
        let cluster_create_errors =
            member_counter("cluster_create_errors", "Failed cluster creations");
        let instance_add = member_counter("instance_add", "Instances added to the cluster");
        let instance_add_errors = member_counter("instance_add_errors", "Failed instance adds");
        let instance_rejoin =
            member_counter("instance_rejoin", "Instances rejoined to the cluster");
        let instance_rejoin_errors =
            member_counter("instance_rejoin_errors", "Failed instance rejoins");
        let no_quorum = member_counter("no_quorum", "Observations of a replica set without quorum");
        let backup_success = member_counter("backup_success", "Backups completed successfully");
        let restore_success = member_counter("restore_success", "Restores completed successfully");

        let instance_status = Family::<InstanceStatusLabels, Counter>::default();
        registry.register(
            "instance_status",
            "Observations of the local instance per membership status",
            instance_status.clone(),
        );

        let syncs_total = Family::<ControllerLabels, Counter>::default();
        registry.register(
            "syncs",
            "Total number of reconciler syncs",
            syncs_total.clone(),
        );

        let sync_errors_total = Family::<ControllerLabels, Counter>::default();
        registry.register(
            "sync_errors",
            "Total number of failed reconciler syncs",
            sync_errors_total.clone(),
        );

        let sync_duration_seconds =
            Family::<ControllerLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "sync_duration_seconds",
            "Duration of reconciler syncs in seconds",
            sync_duration_seconds.clone(),
        );

        Self {
            cluster_create,
            cluster_create_errors,
            instance_add,
            instance_add_errors,
            instance_rejoin,
            instance_rejoin_errors,
            no_quorum,
            instance_status,
            backup_success,
            restore_success,
            syncs_total,
            sync_errors_total,
            sync_duration_seconds,
            registry,
        }
    }

    /// Record one reconciler sync
    pub fn record_sync(&self, controller: &str, ok: bool, duration_secs: f64) {
        let labels = ControllerLabels {
            controller: controller.to_string(),
        };
        self.syncs_total.get_or_create(&labels).inc();
        if !ok {
            self.sync_errors_total.get_or_create(&labels).inc();
        }
        self.sync_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Count one observation of the local instance's status
    pub fn record_instance_status(&self, pod: &str, cluster: &str, status: &str) {
        let labels = InstanceStatusLabels {
            pod: pod.to_string(),
            cluster: cluster.to_string(),
            status: status.to_string(),
        };
        self.instance_status.get_or_create(&labels).inc();
    }

    /// Increment `family` for the given member
    pub fn inc(family: &MemberCounter, pod: &str, cluster: &str) {
        family.get_or_create(&MemberLabels::new(pod, cluster)).inc();
    }

    /// Encode metrics to Prometheus text format
    ///
    /// Returns an empty string if encoding fails.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(e) = encode(&mut buffer, &self.registry) {
            tracing::error!("Failed to encode metrics: {}", e);
            return String::new();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    ready: RwLock<bool>,
    pub metrics: Arc<Metrics>,
    liveness: Option<LivenessProbe>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Arc::new(Metrics::new()),
            liveness: None,
        }
    }

    /// Tie `/healthz` to the local instance's membership status
    pub fn with_liveness(mut self, probe: LivenessProbe) -> Self {
        self.liveness = Some(probe);
        self
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }

    /// Without a liveness probe the process counts as alive if it can answer
    pub async fn is_live(&self) -> Result<(), String> {
        match &self.liveness {
            Some(probe) => probe.check().await.map_err(|e| e.to_string()),
            None => Ok(()),
        }
    }
}

async fn healthz(State(state): State<Arc<HealthState>>) -> Response {
    match state.is_live().await {
        Ok(()) => (StatusCode::OK, "ok").into_response(),
        Err(message) => (StatusCode::SERVICE_UNAVAILABLE, message).into_response(),
    }
}

async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve health and metrics endpoints on `0.0.0.0:<port>` until `cancel` fires
pub async fn run_health_server(
    state: Arc<HealthState>,
    port: u16,
    cancel: CancellationToken,
) -> Result<(), std::io::Error> {
    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Health server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
}
