use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use mysql_operator::health::{HealthState, run_health_server};
use mysql_operator::{OperatorConfig, run_operator};

/// Lease configuration
const LEASE_NAME: &str = "mysql-operator-leader";
const LEASE_TTL_SECS: u64 = 15;
const LEASE_RENEW_INTERVAL_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install the TLS crypto provider before any TLS operations
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
        && rustls::crypto::CryptoProvider::get_default().is_none()
    {
        return Err("Failed to install rustls crypto provider and no provider is available".into());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mysql_operator=info".parse()?)
                .add_directive("kube=info".parse()?)
                .add_directive("kube_leader_election=info".parse()?),
        )
        .init();

    info!("Starting mysql-operator");

    let config = OperatorConfig::from_env()?;
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let pod_name = std::env::var("POD_NAME").unwrap_or_else(|_| {
        warn!("POD_NAME not set, using hostname");
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    });
    let namespace = std::env::var("POD_NAMESPACE").unwrap_or_else(|_| {
        warn!("POD_NAMESPACE not set, using 'default'");
        "default".to_string()
    });

    let cancel = CancellationToken::new();
    let health_state = Arc::new(HealthState::new());

    // Probes must answer even while waiting for leadership
    let health_handle = {
        let health_state = health_state.clone();
        let cancel = cancel.clone();
        let port = config.controller.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port, cancel).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let lease_params = || LeaseLockParams {
        holder_id: pod_name.clone(),
        lease_name: LEASE_NAME.to_string(),
        lease_ttl: Duration::from_secs(LEASE_TTL_SECS),
    };

    info!(
        holder_id = %pod_name,
        namespace = %namespace,
        lease_name = LEASE_NAME,
        "Waiting to acquire leadership"
    );
    let lease_lock = LeaseLock::new(client.clone(), &namespace, lease_params());
    loop {
        tokio::select! {
            _ = shutdown_signal() => {
                info!("Received shutdown signal before acquiring leadership");
                cancel.cancel();
                let _ = health_handle.await;
                return Ok(());
            }
            result = lease_lock.try_acquire_or_renew() => match result {
                Ok(result) if result.acquired_lease => {
                    info!("Acquired leadership");
                    break;
                }
                Ok(_) => info!("Another instance is leader, waiting..."),
                Err(e) => warn!("Failed to acquire lease: {}, retrying...", e),
            },
        }
        tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)).await;
    }

    // Losing the lease stops every controller; Kubernetes restarts the pod
    let lost_leadership = Arc::new(AtomicBool::new(false));
    {
        let lost_leadership = lost_leadership.clone();
        let cancel = cancel.clone();
        let lease_lock = LeaseLock::new(client.clone(), &namespace, lease_params());
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_secs(LEASE_RENEW_INTERVAL_SECS)) => {}
                }

                let renewed = match lease_lock.try_acquire_or_renew().await {
                    Ok(result) => result.acquired_lease,
                    Err(e) => {
                        error!("Failed to renew lease: {}", e);
                        false
                    }
                };
                if !renewed {
                    error!("Lost leadership, shutting down");
                    lost_leadership.store(true, Ordering::SeqCst);
                    cancel.cancel();
                    break;
                }
            }
        });
    }

    {
        let cancel = cancel.clone();
        let health_state = health_state.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("Received shutdown signal, initiating graceful shutdown");
            health_state.set_ready(false).await;
            cancel.cancel();
        });
    }

    let result = run_operator(client, &config, health_state, cancel.clone()).await;
    cancel.cancel();
    let _ = health_handle.await;

    if let Err(e) = result {
        error!("Controllers failed: {}", e);
        return Err(e.into());
    }
    if lost_leadership.load(Ordering::SeqCst) {
        return Err("lost leadership".into());
    }

    info!("Operator stopped");
    Ok(())
}

/// Wait for SIGTERM or SIGINT
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
