//! Envoy Kubernetes Operator
//!
//! Main entry point for the operator. Parses flags, builds the Kubernetes
//! client, and runs the Envoy controller until a shutdown signal arrives.

use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use envoy_operator::{config::OperatorConfig, controllers, metrics};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OperatorConfig::parse();

    init_tracing();

    info!("Starting Envoy Operator");

    // Fails the process with a non-zero exit when no credential source resolves
    let client = config.client().await.map_err(|e| {
        error!(error = %e, "Failed to create Kubernetes client");
        e
    })?;
    info!("Connected to Kubernetes API server");

    let metrics_handle = tokio::spawn(metrics::serve(config.metrics_port));
    info!("Metrics server starting on port {}", config.metrics_port);

    let shutdown = CancellationToken::new();
    let controller = tokio::spawn(controllers::run_envoy_controller(
        client,
        config.controller_settings(),
        shutdown.clone(),
    ));
    tokio::pin!(controller);

    tokio::select! {
        result = &mut controller => {
            match result {
                Ok(Ok(())) => error!("Envoy controller exited unexpectedly"),
                Ok(Err(e)) => error!(error = %e, "Envoy controller failed"),
                Err(e) => error!(error = %e, "Envoy controller task panicked"),
            }
            anyhow::bail!("Envoy controller stopped");
        }
        result = metrics_handle => {
            match result {
                Ok(Ok(())) => error!("Metrics server exited unexpectedly"),
                Ok(Err(e)) => error!(error = %e, "Metrics server failed"),
                Err(e) => error!(error = %e, "Metrics server task panicked"),
            }
            shutdown.cancel();
            let _ = controller.await;
            anyhow::bail!("Metrics server stopped");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
        }
    }

    // Let the controller drain in-flight reconciles
    shutdown.cancel();
    if let Ok(Err(e)) = controller.await {
        error!(error = %e, "Envoy controller failed during shutdown");
    }

    info!("Envoy Operator stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for CTRL+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
