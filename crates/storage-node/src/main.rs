//! storage-node — one data-plane member of the cluster.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::broadcast;

use storage_core::ClusterConfig;
use storage_node::bandwidth::BandwidthLedger;
use storage_node::chunk_store::ChunkStore;
use storage_node::{heartbeat, server, NodeState};

fn print_usage() {
    println!("Usage: storage-node <node_id> --port <port> [options]");
    println!();
    println!("Options:");
    println!("  --host <host>               Bind host (default: 0.0.0.0)");
    println!("  --port <port>                Bind port (required)");
    println!("  --storage <GiB>              Declared capacity in GiB (default: 100)");
    println!("  --bandwidth <bps>            Declared link capacity in bits/sec (default: 1e9)");
    println!("  --coordinator-host <host>    Coordinator host (default: localhost)");
    println!("  --coordinator-port <port>    Coordinator port (default: 5000)");
    println!("  --config <path>              Path to a cluster.toml config file");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("--help") || args.is_empty() {
        print_usage();
        return Ok(());
    }

    let node_id = args[0].clone();
    let mut host = "0.0.0.0".to_string();
    let mut port: Option<u16> = None;
    let mut storage_gib: u64 = 100;
    let mut bandwidth_bps: u64 = 1_000_000_000;
    let mut coordinator_host = "localhost".to_string();
    let mut coordinator_port: u16 = 5000;

    if let Ok(path) = std::env::var("STORAGE_CONFIG") {
        std::env::set_var("STORAGE_CONFIG", path);
    }

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--host" => {
                i += 1;
                host = args.get(i).context("--host requires a value")?.clone();
            }
            "--port" => {
                i += 1;
                port = Some(args.get(i).context("--port requires a value")?.parse().context("--port must be a number")?);
            }
            "--storage" => {
                i += 1;
                storage_gib = args.get(i).context("--storage requires a value")?.parse().context("--storage must be a number")?;
            }
            "--bandwidth" => {
                i += 1;
                bandwidth_bps = args.get(i).context("--bandwidth requires a value")?.parse().context("--bandwidth must be a number")?;
            }
            "--coordinator-host" => {
                i += 1;
                coordinator_host = args.get(i).context("--coordinator-host requires a value")?.clone();
            }
            "--coordinator-port" => {
                i += 1;
                coordinator_port = args.get(i).context("--coordinator-port requires a value")?.parse().context("--coordinator-port must be a number")?;
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

    let port = port.context("--port is required")?;
    let config = ClusterConfig::load().context("failed to load config")?;

    let listen_addr = format!("{host}:{port}");
    let coordinator_addr = format!("{coordinator_host}:{coordinator_port}");
    let capacity_bytes = storage_gib * 1024 * 1024 * 1024;

    let data_dir = config.storage.data_dir.join(&node_id);
    let store = ChunkStore::new(
        data_dir,
        capacity_bytes,
        config.storage.verify_on_write,
        config.storage.verify_on_read,
    )?;

    let state = Arc::new(NodeState {
        node_id: node_id.clone(),
        store,
        bandwidth: BandwidthLedger::new(bandwidth_bps),
    });

    register_with_coordinator(&node_id, &listen_addr, capacity_bytes, &coordinator_addr).await?;

    let (shutdown_tx, _) = broadcast::channel(1);

    let heartbeat_task = tokio::spawn(heartbeat::run(
        node_id.clone(),
        coordinator_addr.clone(),
        state.clone(),
        config.monitoring.heartbeat_interval_secs,
        shutdown_tx.subscribe(),
    ));

    let server_task = tokio::spawn(server::run(listen_addr, state, shutdown_tx.subscribe()));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!(node_id, "shutdown signal received");
        }
        r = server_task => {
            tracing::error!(?r, "server task exited unexpectedly");
        }
    }

    let _ = shutdown_tx.send(());
    let _ = heartbeat_task.await;
    Ok(())
}

async fn register_with_coordinator(
    node_id: &str,
    listen_addr: &str,
    capacity_bytes: u64,
    coordinator_addr: &str,
) -> Result<()> {
    use storage_core::wire::{Envelope, MessageType};

    let envelope = Envelope::new(
        MessageType::RegisterNode,
        serde_json::json!({
            "node_id": node_id,
            "address": listen_addr,
            "capacity_bytes": capacity_bytes,
        }),
    )
    .with_sender(node_id.to_string());

    let reply = storage_core::client::roundtrip(coordinator_addr, envelope)
        .await
        .context("failed to register with coordinator")?;

    if reply.envelope.msg_type != MessageType::NodeRegistered {
        bail!("coordinator rejected registration: {:?}", reply.envelope.data);
    }
    tracing::info!(node_id, coordinator_addr, "registered with coordinator");
    Ok(())
}
