//! Reflector binary: wires the CLI, logging, metrics server, and the
//! controller together and runs until a shutdown signal arrives.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use reflector::cli::Cli;
use reflector::client::KubeClusterClient;
use reflector::metrics;
use reflector::queue::WorkQueue;
use reflector::reflector::Reflector;
use reflector::server::{start_server, ServerState};
use reflector::watch::{SecretStore, SecretWatcher};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.verbose {
        "reflector=debug"
    } else {
        "reflector=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive.into()),
        )
        .init();

    info!(
        version = %reflector::version::long_version(),
        namespace = %cli.namespace,
        "starting reflector"
    );

    metrics::register_metrics().context("failed to register metrics")?;

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let client = kube::Client::try_default()
        .await
        .context("unable to create kubernetes client")?;

    let server_state = ServerState::new();
    let mut server = None;
    if cli.metrics {
        let state = Arc::clone(&server_state);
        let address = cli.metrics_addr.clone();
        let server_cancel = cancel.clone();
        let shutdown = cancel.clone();
        server = Some(tokio::spawn(async move {
            if let Err(err) = start_server(&address, state, server_cancel).await {
                error!(error = %err, "error while running metrics server");
                // a dead metrics server takes the process down with it
                shutdown.cancel();
            }
        }));
    }

    let store = SecretStore::new();
    let queue = WorkQueue::new();
    let watcher = SecretWatcher::new(
        client.clone(),
        cli.namespace.clone(),
        Arc::clone(&store),
        Arc::clone(&queue),
    );
    let controller = Reflector::new(
        Arc::new(KubeClusterClient::new(client)),
        Box::new(watcher),
        Arc::clone(&store),
        queue,
        cli.reflector_config(),
    );

    // readiness follows the cache: flip once the initial listing lands
    {
        let store = Arc::clone(&store);
        let state = Arc::clone(&server_state);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if store.wait_for_sync(&cancel).await.is_ok() {
                state.set_ready();
            }
        });
    }

    let result = controller.start(cancel.clone()).await;
    cancel.cancel();
    if let Some(server) = server {
        let _ = server.await;
    }

    result.context("error while running reflector")?;
    info!("reflector stopped");
    Ok(())
}

/// Cancels the root token on SIGINT or SIGTERM.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(sigterm) => sigterm,
                Err(err) => {
                    error!(error = %err, "unable to listen for SIGTERM");
                    let _ = ctrl_c.await;
                    cancel.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("shutdown signal received");
        cancel.cancel();
    });
}
