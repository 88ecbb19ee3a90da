use std::sync::Arc;

use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use mysql_operator::health::{HealthState, run_health_server};
use mysql_operator::{AgentConfig, Instance, LivenessProbe, StatusCache, run_agent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
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
                .add_directive("kube=info".parse()?),
        )
        .init();

    let instance = Instance::from_env()?;
    let config = AgentConfig::from_env()?;
    info!(instance = ?instance, "Starting mysql-agent");

    let cancel = CancellationToken::new();
    let cache = StatusCache::new();
    let health_state = Arc::new(
        HealthState::new().with_liveness(LivenessProbe::new(cache.clone(), instance.name())),
    );

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

    let client = Client::try_default().await?;
    let result = run_agent(client, instance, &config, health_state, cache, cancel.clone()).await;
    cancel.cancel();
    let _ = health_handle.await;

    if let Err(e) = result {
        error!("Agent failed: {}", e);
        return Err(e.into());
    }

    info!("Agent stopped");
    Ok(())
}

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
