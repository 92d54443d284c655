//! manager-node: serves the distributed request manager over ZeroMQ.
//!
//! Loads configuration from the environment (`.env` honoured), recovers the
//! requests found under the data directory, answers submitters and executing
//! nodes, and reconciles request statuses on a fixed interval.
//!
//! ```bash
//! manager-node --data-dir /var/lib/taskgrid --port 1664
//! MANAGER_HOST=0.0.0.0 manager-node
//! manager-node --ipc manager
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use taskgrid_core::{load_dotenv, Config};
use taskgrid_manager::wire::{Endpoint, ManagerServer, ManagerService};
use taskgrid_manager::RequestManager;
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(name = "manager-node", version, about)]
struct Cli {
    /// Directory holding one sub-directory per project.
    #[arg(long, env = "MANAGER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// TCP host to bind to.
    #[arg(long, env = "MANAGER_HOST")]
    host: Option<String>,

    /// TCP port to bind to.
    #[arg(long, env = "MANAGER_PORT")]
    port: Option<u16>,

    /// Serve on an IPC socket with this name instead of TCP.
    #[arg(long)]
    ipc: Option<String>,

    /// Seconds between two reconciliation passes (0 = disabled).
    #[arg(long, env = "MANAGER_SYNC_INTERVAL_SECS")]
    sync_interval: Option<u64>,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.data_dir {
            config.manager.data_dir = dir.clone();
        }
        if let Some(host) = &self.host {
            config.manager.host = host.clone();
        }
        if let Some(port) = self.port {
            config.manager.port = port;
        }
        if let Some(secs) = self.sync_interval {
            config.manager.sync_interval_secs = secs;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let mut config = Config::from_env();
    cli.apply(&mut config);
    config.log_summary();

    let data_dir = config.manager.data_dir.clone();
    let manager = Arc::new(tokio::task::spawn_blocking(move || RequestManager::open(data_dir)).await??);
    tracing::info!(
        root = %manager.root().display(),
        active = manager.num_active(),
        waiting = manager.waiting_ids().len(),
        "request manager ready"
    );

    let endpoint = match &cli.ipc {
        Some(name) => Endpoint::ipc(name.clone()),
        None => Endpoint::from_config(&config.manager),
    };
    let service = Arc::new(ManagerService::new(Arc::clone(&manager)));
    let server = ManagerServer::bind(endpoint, service).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let sync_interval = config.manager.sync_interval();
    if !sync_interval.is_zero() {
        let manager = Arc::clone(&manager);
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sync_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown.changed() => break,
                }
                let manager = Arc::clone(&manager);
                match tokio::task::spawn_blocking(move || manager.sync_statuses()).await {
                    Ok(report) if !report.is_empty() => tracing::debug!(?report, "reconciliation pass"),
                    Ok(_) => {}
                    Err(e) => tracing::error!(error = %e, "reconciliation pass panicked"),
                }
            }
        });
    }

    server.run(shutdown_rx).await?;

    tracing::info!("manager-node exited cleanly");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
