//! coordinator — cluster metadata service and re-replication controller.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::{broadcast, mpsc};

use coordinator::controller::Controller;
use coordinator::files::FileIndex;
use coordinator::heartbeat_monitor::HeartbeatMonitor;
use coordinator::node_registry::NodeRegistry;
use coordinator::replication_index::ReplicationIndex;
use coordinator::server::{self, CoordinatorState};

use storage_core::ClusterConfig;

fn print_usage() {
    println!("Usage: coordinator [options]");
    println!();
    println!("Options:");
    println!("  --host <host>     Bind host (default: 0.0.0.0)");
    println!("  --port <port>     Bind port (default: 5000)");
    println!("  --config <path>   Path to a cluster.toml config file");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help") {
        print_usage();
        return Ok(());
    }

    let mut host = "0.0.0.0".to_string();
    let mut port: u16 = 5000;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--host" => {
                i += 1;
                host = args.get(i).context("--host requires a value")?.clone();
            }
            "--port" => {
                i += 1;
                port = args
                    .get(i)
                    .context("--port requires a value")?
                    .parse()
                    .context("--port must be a number")?;
            }
            "--config" => {
                i += 1;
                let path = args.get(i).context("--config requires a value")?;
                std::env::set_var("STORAGE_CONFIG", path);
            }
            other => bail!("unknown option: {other}"),
        }
        i += 1;
    }

    let config = ClusterConfig::load().context("failed to load config")?;
    let listen_addr = format!("{host}:{port}");

    let registry = Arc::new(NodeRegistry::new());
    let index = Arc::new(ReplicationIndex::new());
    let files = Arc::new(FileIndex::new());
    let monitor = Arc::new(HeartbeatMonitor::new(Duration::from_secs(
        config.monitoring.failure_timeout_secs,
    )));

    let (repair_tx, repair_rx) = mpsc::channel(256);

    let state = Arc::new(CoordinatorState {
        registry: registry.clone(),
        index: index.clone(),
        files: files.clone(),
        monitor: monitor.clone(),
        placement_strategy: config.replication.placement_strategy,
        min_factor: config.replication.min_factor,
        default_factor: config.replication.default_factor,
        repair_events: repair_tx,
        upload_seq: AtomicU64::new(0),
    });

    let controller = Controller::new(
        registry.clone(),
        index.clone(),
        files.clone(),
        config.replication.placement_strategy,
        config.monitoring.enable_auto_recovery,
    );

    let (shutdown_tx, _) = broadcast::channel(1);

    let controller_task = tokio::spawn(controller.run(repair_rx));
    let heartbeat_task = tokio::spawn(server::run_heartbeat_check(
        state.clone(),
        config.monitoring.recovery_check_interval_secs,
        shutdown_tx.subscribe(),
    ));
    let server_task = tokio::spawn(server::run(listen_addr, state, shutdown_tx.subscribe()));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
        r = server_task => {
            tracing::error!(?r, "coordinator server task exited unexpectedly");
        }
    }

    let _ = shutdown_tx.send(());
    let _ = heartbeat_task.await;
    controller_task.abort();
    Ok(())
}
