//! Cluster integration test harness.
//!
//! Spawns real `coordinator` and `storage-node` binaries on localhost TCP
//! and drives them with the wire-protocol client helpers from
//! `storage-core`. No network-namespace infrastructure is required here
//! since the transport is plain TCP, not a UDP discovery mesh — these
//! tests only need `cargo build` to have produced the binaries under
//! `target/debug/`.
//!
//! Daemon-spawning tests are serialized via DAEMON_LOCK so they don't
//! collide on bind ports when run concurrently by the test harness.

// Child processes are killed via .kill(); waiting on them isn't useful once killed.
#![allow(clippy::zombie_processes)]

use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;

use storage_core::wire::{Envelope, MessageType};

static DAEMON_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

static NEXT_PORT: std::sync::atomic::AtomicU16 = std::sync::atomic::AtomicU16::new(17800);

fn alloc_port() -> u16 {
    NEXT_PORT.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
}

// ── Binary paths ──────────────────────────────────────────────────────────────

fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).parent().unwrap().parent().unwrap().to_path_buf()
}

fn coordinator_path() -> PathBuf {
    workspace_root().join("target/debug/coordinator")
}

fn storage_node_path() -> PathBuf {
    workspace_root().join("target/debug/storage-node")
}

fn binaries_available() -> bool {
    coordinator_path().exists() && storage_node_path().exists()
}

fn skip_unless_ready() -> bool {
    if !binaries_available() {
        eprintln!("SKIP: binaries not built — run `cargo build` first");
        return false;
    }
    true
}

// ── Process helpers ───────────────────────────────────────────────────────────

fn spawn_coordinator(port: u16, failure_timeout_secs: u64, recovery_check_secs: u64) -> Child {
    let mut cmd = Command::new(coordinator_path());
    cmd.args(["--port", &port.to_string()]);
    cmd.env("RUST_LOG", "warn");
    cmd.env("STORAGE_MONITORING__FAILURE_TIMEOUT_SECS", failure_timeout_secs.to_string());
    cmd.env("STORAGE_MONITORING__RECOVERY_CHECK_INTERVAL_SECS", recovery_check_secs.to_string());
    cmd.spawn().expect("failed to spawn coordinator")
}

fn spawn_storage_node(
    node_id: &str,
    port: u16,
    coordinator_port: u16,
    storage_gib: u64,
    bandwidth_bps: u64,
) -> Child {
    spawn_storage_node_with_heartbeat(node_id, port, coordinator_port, storage_gib, bandwidth_bps, 3)
}

fn spawn_storage_node_with_heartbeat(
    node_id: &str,
    port: u16,
    coordinator_port: u16,
    storage_gib: u64,
    bandwidth_bps: u64,
    heartbeat_interval_secs: u64,
) -> Child {
    let mut cmd = Command::new(storage_node_path());
    cmd.arg(node_id);
    cmd.args(["--port", &port.to_string()]);
    cmd.args(["--coordinator-port", &coordinator_port.to_string()]);
    cmd.args(["--storage", &storage_gib.to_string()]);
    cmd.args(["--bandwidth", &bandwidth_bps.to_string()]);
    cmd.env("RUST_LOG", "warn");
    cmd.env("STORAGE_MONITORING__HEARTBEAT_INTERVAL_SECS", heartbeat_interval_secs.to_string());
    cmd.env(
        "STORAGE_STORAGE__DATA_DIR",
        format!("/tmp/cluster-test-{}-{}", std::process::id(), node_id),
    );
    cmd.spawn().expect("failed to spawn storage-node")
}

async fn wait_for_port(port: u16, max_attempts: u32) -> Result<()> {
    for attempt in 1..=max_attempts {
        if tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
            return Ok(());
        }
        if attempt < max_attempts {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
    bail!("port {port} not ready after {max_attempts} attempts")
}

fn cleanup(children: &mut [Child]) {
    for child in children.iter_mut() {
        let _ = child.kill();
    }
}

// ── Client helpers ────────────────────────────────────────────────────────────

async fn coordinator_roundtrip(coordinator_addr: &str, msg_type: MessageType, data: serde_json::Value) -> Result<storage_core::wire::Frame> {
    storage_core::client::roundtrip(coordinator_addr, Envelope::new(msg_type, data))
        .await
        .context("roundtrip to coordinator failed")
}

async fn upload_and_store(
    coordinator_addr: &str,
    node_addrs: &std::collections::HashMap<String, String>,
    filename: &str,
    data: &[u8],
    replication_factor: u32,
) -> Result<String> {
    let ack = coordinator_roundtrip(
        coordinator_addr,
        MessageType::UploadFile,
        serde_json::json!({
            "filename": filename,
            "file_size": data.len() as u64,
            "replication_factor": replication_factor,
        }),
    )
    .await?;
    if ack.envelope.msg_type != MessageType::UploadAck {
        bail!("upload rejected: {:?}", ack.envelope.data);
    }

    let file_id = ack.envelope.data["file_id"].as_str().unwrap().to_string();
    let chunk_size = ack.envelope.data["chunk_size"].as_u64().unwrap();
    let nodes: Vec<String> = ack.envelope.data["nodes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();

    for (chunk_id, bytes, hash) in storage_core::chunker::split(data, chunk_size) {
        for node_id in &nodes {
            let addr = node_addrs.get(node_id).context("unknown node address")?;
            storage_node::server::store_chunk_at(addr, &file_id, chunk_id, Bytes::copy_from_slice(bytes), &hash)
                .await
                .context("store_chunk_at failed")?;

            let registered = coordinator_roundtrip(
                coordinator_addr,
                MessageType::RegisterChunk,
                serde_json::json!({ "file_id": file_id, "chunk_id": chunk_id, "node_id": node_id }),
            )
            .await?;
            if registered.envelope.msg_type != MessageType::ChunkRegistered {
                bail!("chunk registration rejected: {:?}", registered.envelope.data);
            }
        }
    }

    Ok(file_id)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn upload_fans_out_to_replication_factor_nodes() {
    if !skip_unless_ready() {
        return;
    }
    let _guard = DAEMON_LOCK.lock().unwrap();

    let coord_port = alloc_port();
    let mut children = vec![spawn_coordinator(coord_port, 30, 5)];
    wait_for_port(coord_port, 25).await.expect("coordinator did not start");

    let coordinator_addr = format!("127.0.0.1:{coord_port}");
    let mut node_addrs = std::collections::HashMap::new();
    for i in 0..4 {
        let node_id = format!("node-{i}");
        let port = alloc_port();
        children.push(spawn_storage_node(&node_id, port, coord_port, 1, 1_000_000_000));
        wait_for_port(port, 25).await.expect("storage node did not start");
        node_addrs.insert(node_id, format!("127.0.0.1:{port}"));
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    let data = vec![7u8; 2 * 1024 * 1024];
    let file_id = upload_and_store(&coordinator_addr, &node_addrs, "payload.bin", &data, 3)
        .await
        .expect("upload failed");

    let download = coordinator_roundtrip(
        &coordinator_addr,
        MessageType::DownloadFile,
        serde_json::json!({ "file_id": file_id }),
    )
    .await
    .expect("download request failed");

    assert_eq!(download.envelope.msg_type, MessageType::FileData);
    let chunks = &download.envelope.data["chunks"];
    for (_, entry) in chunks.as_object().unwrap() {
        let replicas = entry["nodes"].as_array().unwrap().len();
        assert_eq!(replicas, 3, "each chunk should have 3 replicas");
    }

    cleanup(&mut children);
}

#[tokio::test]
async fn failed_node_triggers_re_replication() {
    if !skip_unless_ready() {
        return;
    }
    let _guard = DAEMON_LOCK.lock().unwrap();

    let coord_port = alloc_port();
    let mut children = vec![spawn_coordinator(coord_port, 2, 1)];
    wait_for_port(coord_port, 25).await.expect("coordinator did not start");

    let coordinator_addr = format!("127.0.0.1:{coord_port}");
    let mut node_addrs = std::collections::HashMap::new();
    for i in 0..4 {
        let node_id = format!("node-{i}");
        let port = alloc_port();
        children.push(spawn_storage_node_with_heartbeat(&node_id, port, coord_port, 1, 1_000_000_000, 1));
        wait_for_port(port, 25).await.expect("storage node did not start");
        node_addrs.insert(node_id.clone(), format!("127.0.0.1:{port}"));
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    let data = vec![9u8; 512 * 1024];
    let file_id = upload_and_store(&coordinator_addr, &node_addrs, "small.bin", &data, 3)
        .await
        .expect("upload failed");

    // Kill one of the four nodes; the other three still cover the file
    // but the coordinator no longer hears its heartbeats.
    children[1].kill().expect("failed to kill storage node");

    // Failure timeout is 2s with heartbeats every 1s; give the monitor
    // and controller several ticks to detect the failure and repair.
    tokio::time::sleep(Duration::from_secs(6)).await;

    let download = coordinator_roundtrip(
        &coordinator_addr,
        MessageType::DownloadFile,
        serde_json::json!({ "file_id": file_id }),
    )
    .await
    .expect("download request failed");

    assert_eq!(download.envelope.msg_type, MessageType::FileData, "file should remain fully available");
    let chunks = &download.envelope.data["chunks"];
    for (_, entry) in chunks.as_object().unwrap() {
        let replicas = entry["nodes"].as_array().unwrap().len();
        assert!(replicas >= 3, "re-replication should restore the replica count, got {replicas}");
    }

    cleanup(&mut children);
}

#[tokio::test]
async fn corrupted_chunk_upload_is_rejected() {
    if !skip_unless_ready() {
        return;
    }
    let _guard = DAEMON_LOCK.lock().unwrap();

    let coord_port = alloc_port();
    let mut children = vec![spawn_coordinator(coord_port, 30, 5)];
    wait_for_port(coord_port, 25).await.expect("coordinator did not start");

    let node_port = alloc_port();
    children.push(spawn_storage_node("solo", node_port, coord_port, 1, 1_000_000_000));
    wait_for_port(node_port, 25).await.expect("storage node did not start");
    tokio::time::sleep(Duration::from_millis(300)).await;

    let node_addr = format!("127.0.0.1:{node_port}");
    let envelope = Envelope::new(
        MessageType::StoreChunk,
        serde_json::json!({ "file_id": "f1", "chunk_id": 0, "content_hash": "0".repeat(64) }),
    );
    let reply = storage_core::client::roundtrip_with_payload(&node_addr, envelope, Bytes::from_static(b"actual bytes"))
        .await
        .expect("store request failed to send");

    assert_eq!(reply.envelope.msg_type, MessageType::Error);
    assert_eq!(reply.envelope.data["code"].as_str(), Some("CHECKSUM_MISMATCH"));

    cleanup(&mut children);
}

#[tokio::test]
async fn total_node_loss_reports_data_lost_on_download() {
    if !skip_unless_ready() {
        return;
    }
    let _guard = DAEMON_LOCK.lock().unwrap();

    let coord_port = alloc_port();
    let mut children = vec![spawn_coordinator(coord_port, 2, 1)];
    wait_for_port(coord_port, 25).await.expect("coordinator did not start");

    let coordinator_addr = format!("127.0.0.1:{coord_port}");
    let node_port = alloc_port();
    children.push(spawn_storage_node_with_heartbeat("only-node", node_port, coord_port, 1, 1_000_000_000, 1));
    wait_for_port(node_port, 25).await.expect("storage node did not start");
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut node_addrs = std::collections::HashMap::new();
    node_addrs.insert("only-node".to_string(), format!("127.0.0.1:{node_port}"));

    let data = vec![3u8; 1024];
    let file_id = upload_and_store(&coordinator_addr, &node_addrs, "lonely.bin", &data, 1)
        .await
        .expect("upload failed");

    children[1].kill().expect("failed to kill the only replica's node");
    tokio::time::sleep(Duration::from_secs(6)).await;

    let download = coordinator_roundtrip(
        &coordinator_addr,
        MessageType::DownloadFile,
        serde_json::json!({ "file_id": file_id }),
    )
    .await
    .expect("download request failed");

    assert_eq!(download.envelope.msg_type, MessageType::Error);
    assert_eq!(download.envelope.data["code"].as_str(), Some("DATA_LOST"));

    cleanup(&mut children);
}

#[tokio::test]
async fn nonexistent_file_id_is_not_found() {
    if !skip_unless_ready() {
        return;
    }
    let _guard = DAEMON_LOCK.lock().unwrap();

    let coord_port = alloc_port();
    let mut children = vec![spawn_coordinator(coord_port, 30, 5)];
    wait_for_port(coord_port, 25).await.expect("coordinator did not start");
    let coordinator_addr = format!("127.0.0.1:{coord_port}");

    let download = coordinator_roundtrip(
        &coordinator_addr,
        MessageType::DownloadFile,
        serde_json::json!({ "file_id": "0000000000000000" }),
    )
    .await
    .expect("download request failed");

    assert_eq!(download.envelope.msg_type, MessageType::Error);
    assert_eq!(download.envelope.data["code"].as_str(), Some("NOT_FOUND"));

    cleanup(&mut children);
}
