//! CommNode worker - Main entry point.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use commnode_worker::{
    cli::{Cli, Command},
    config::WorkerConfig,
    container::{CONTAINER_LABEL, DockerRuntime, stop_labelled_containers},
    control::{control_router, serve},
    instance::LifecycleManager,
    server_api::HttpApiConnector,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load .env if present
    let _ = dotenvy::dotenv();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("commnode_worker=info,tower_http=info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut config = WorkerConfig::resolve().context("Failed to load configuration")?;
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }

    let runtime = Arc::new(
        DockerRuntime::connect(&config.docker)
            .await
            .context("Failed to connect to Docker")?,
    );

    // Servers from a previous run still hold ports in our range.
    let stopped = stop_labelled_containers(runtime.as_ref(), CONTAINER_LABEL)
        .await
        .context("Failed to stop stale server containers")?;
    if stopped > 0 {
        tracing::info!("Stopped {} stale server container(s)", stopped);
    }

    if cli.effective_command() == Command::Cleanup {
        return Ok(());
    }

    let connector = HttpApiConnector::new(config.credentials.clone())
        .context("Failed to build server API client")?;
    let manager = Arc::new(LifecycleManager::new(
        runtime,
        Arc::new(connector),
        config.container.clone(),
        config.instance.clone(),
    ));

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;

    let on_signal = Arc::clone(&manager);
    serve(listener, control_router(Arc::clone(&manager)), async move {
        shutdown_signal().await;
        tracing::info!("Shutdown requested");
        on_signal.shutdown();
    })
    .await
    .context("Control surface failed")?;

    // Covers the server exiting for any other reason.
    manager.shutdown();
    if !manager.wait_for_instances(config.shutdown_grace).await {
        tracing::warn!(
            remaining = manager.active_instances(),
            "Servers still stopping after {:?}, exiting anyway",
            config.shutdown_grace
        );
    }

    tracing::info!("Worker stopped");
    Ok(())
}

/// Resolve on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
