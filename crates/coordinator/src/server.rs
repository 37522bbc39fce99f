//! Coordinator TCP server and message dispatch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};

use storage_core::chunker;
use storage_core::config::PlacementStrategy;
use storage_core::placement::{select as select_placement, PlacementCandidate};
use storage_core::wire::{read_frame, write_frame, Envelope, Frame, MessageType, WireError, WireErrorCode};

use crate::controller::ReRepEvent;
use crate::files::{derive_file_id, FileDescriptor, FileIndex};
use crate::heartbeat_monitor::{HeartbeatMonitor, Transition};
use crate::node_registry::{NodeRegistry, NodeStatus};
use crate::replication_index::ReplicationIndex;

pub struct CoordinatorState {
    pub registry: Arc<NodeRegistry>,
    pub index: Arc<ReplicationIndex>,
    pub files: Arc<FileIndex>,
    pub monitor: Arc<HeartbeatMonitor>,
    pub placement_strategy: PlacementStrategy,
    pub min_factor: u32,
    pub default_factor: u32,
    pub repair_events: mpsc::Sender<ReRepEvent>,
    pub upload_seq: AtomicU64,
}

pub async fn run(
    listen_addr: String,
    state: Arc<CoordinatorState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&listen_addr).await?;
    tracing::info!(addr = %listen_addr, "coordinator listening");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("coordinator accept loop shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (stream, peer_addr) = match accepted {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let state = state.clone();
                let conn_shutdown = shutdown.resubscribe();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, state, conn_shutdown).await {
                        tracing::debug!(%peer_addr, error = %e, "connection closed");
                    }
                });
            }
        }
    }
}

/// Background tick that scans for missed heartbeats and feeds the
/// re-replication controller on failure.
pub async fn run_heartbeat_check(
    state: Arc<CoordinatorState>,
    interval_secs: u64,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("heartbeat check ticker shutting down");
                return;
            }
            _ = ticker.tick() => {
                for transition in state.monitor.check_all() {
                    if let Transition::Failed(node_id) = transition {
                        state.registry.set_status(&node_id, NodeStatus::Failed);
                        tracing::warn!(node_id, "node marked FAILED");
                        if state.repair_events.send(ReRepEvent { failed_node_id: node_id }).await.is_err() {
                            tracing::error!("re-replication controller channel closed");
                        }
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    state: Arc<CoordinatorState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), WireError> {
    loop {
        let frame = tokio::select! {
            _ = shutdown.recv() => return Ok(()),
            frame = read_frame(&mut stream) => frame,
        };

        let frame = match frame {
            Ok(f) => f,
            Err(WireError::Closed) => return Ok(()),
            Err(e) => return Err(e),
        };

        let reply = dispatch(&state, frame).await;
        write_frame(&mut stream, &reply).await?;
    }
}

async fn dispatch(state: &Arc<CoordinatorState>, frame: Frame) -> Frame {
    let request_id = frame.envelope.request_id.clone();
    match frame.envelope.msg_type {
        MessageType::RegisterNode => handle_register_node(state, frame),
        MessageType::Heartbeat => handle_heartbeat(state, frame),
        MessageType::RegisterChunk => handle_register_chunk(state, frame),
        MessageType::UploadFile => handle_upload_file(state, frame),
        MessageType::DownloadFile => handle_download_file(state, frame),
        MessageType::DiscoverNodes => handle_discover_nodes(state, request_id),
        MessageType::GetStatus => handle_get_status(state, request_id),
        other => Frame::new(Envelope::error(
            WireErrorCode::ProtocolError,
            format!("coordinator does not accept {other:?}"),
            request_id,
        )),
    }
}

fn handle_register_node(state: &Arc<CoordinatorState>, frame: Frame) -> Frame {
    let request_id = frame.envelope.request_id.clone();
    let node_id = frame.envelope.data.get("node_id").and_then(|v| v.as_str()).unwrap_or_default();
    let address = frame.envelope.data.get("address").and_then(|v| v.as_str()).unwrap_or_default();
    let capacity = frame.envelope.data.get("capacity_bytes").and_then(|v| v.as_u64()).unwrap_or(0);

    state.registry.register(node_id, address, capacity);
    state.monitor.receive_heartbeat(node_id);
    tracing::info!(node_id, address, "node registered");

    Frame::new(Envelope {
        msg_type: MessageType::NodeRegistered,
        data: serde_json::json!({ "node_id": node_id }),
        sender_id: None,
        request_id,
    })
}

fn handle_heartbeat(state: &Arc<CoordinatorState>, frame: Frame) -> Frame {
    let request_id = frame.envelope.request_id.clone();
    let node_id = frame.envelope.data.get("node_id").and_then(|v| v.as_str()).unwrap_or_default();
    let used_bytes = frame.envelope.data.get("used_bytes").and_then(|v| v.as_u64()).unwrap_or(0);

    state.registry.update_usage(node_id, used_bytes);
    if let Some(Transition::Recovered(id)) = state.monitor.receive_heartbeat(node_id) {
        state.registry.set_status(&id, NodeStatus::Healthy);
        tracing::info!(node_id = %id, "node recovered");
    } else {
        state.registry.set_status(node_id, NodeStatus::Healthy);
    }

    Frame::new(Envelope {
        msg_type: MessageType::HeartbeatAck,
        data: serde_json::json!({}),
        sender_id: None,
        request_id,
    })
}

fn handle_register_chunk(state: &Arc<CoordinatorState>, frame: Frame) -> Frame {
    let request_id = frame.envelope.request_id.clone();
    let file_id = frame.envelope.data.get("file_id").and_then(|v| v.as_str()).unwrap_or_default();
    let chunk_id = frame.envelope.data.get("chunk_id").and_then(|v| v.as_u64()).unwrap_or(0);
    let node_id = frame.envelope.data.get("node_id").and_then(|v| v.as_str()).unwrap_or_default();

    let Some(descriptor) = state.files.get(file_id) else {
        return Frame::new(Envelope::error(WireErrorCode::NotFound, "unknown file_id", request_id));
    };
    if chunk_id >= descriptor.chunk_count {
        return Frame::new(Envelope::error(WireErrorCode::NotFound, "chunk_id out of range", request_id));
    }

    state.index.register(file_id, chunk_id, node_id);

    Frame::new(Envelope {
        msg_type: MessageType::ChunkRegistered,
        data: serde_json::json!({ "file_id": file_id, "chunk_id": chunk_id }),
        sender_id: None,
        request_id,
    })
}

fn handle_upload_file(state: &Arc<CoordinatorState>, frame: Frame) -> Frame {
    let request_id = frame.envelope.request_id.clone();
    let filename = frame.envelope.data.get("filename").and_then(|v| v.as_str()).unwrap_or_default();
    let file_size = frame.envelope.data.get("file_size").and_then(|v| v.as_u64()).unwrap_or(0);
    let replication_factor = frame
        .envelope
        .data
        .get("replication_factor")
        .and_then(|v| v.as_u64())
        .unwrap_or(state.default_factor as u64) as u32;

    let chunk_size = chunker::chunk_size_for(file_size);
    let chunk_count = chunker::chunk_count(file_size, chunk_size);

    let seq = state.upload_seq.fetch_add(1, Ordering::SeqCst);
    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() + seq as u128;
    let file_id = derive_file_id(filename, timestamp);

    let candidates: Vec<PlacementCandidate> = state
        .registry
        .healthy()
        .into_iter()
        .map(|n| PlacementCandidate {
            node_id: n.node_id,
            capacity_bytes: n.capacity_bytes,
            used_bytes: n.used_bytes,
        })
        .collect();

    let nodes = select_placement(&candidates, replication_factor as usize, &[], chunk_size, state.placement_strategy);
    if nodes.is_empty() && replication_factor > 0 {
        return Frame::new(Envelope::error(WireErrorCode::NoCapacity, "no eligible storage nodes", request_id));
    }

    state.files.insert(FileDescriptor {
        file_id: file_id.clone(),
        filename: filename.to_string(),
        total_size: file_size,
        chunk_size,
        chunk_count,
        replication_factor,
    });

    let node_addresses: Vec<String> = nodes.iter().filter_map(|n| state.registry.address_of(n)).collect();

    Frame::new(Envelope {
        msg_type: MessageType::UploadAck,
        data: serde_json::json!({
            "file_id": file_id,
            "chunk_size": chunk_size,
            "chunk_count": chunk_count,
            "nodes": nodes,
            "node_addresses": node_addresses,
        }),
        sender_id: None,
        request_id,
    })
}

fn handle_download_file(state: &Arc<CoordinatorState>, frame: Frame) -> Frame {
    let request_id = frame.envelope.request_id.clone();
    let file_id = frame.envelope.data.get("file_id").and_then(|v| v.as_str()).unwrap_or_default();

    let Some(descriptor) = state.files.get(file_id) else {
        return Frame::new(Envelope::error(WireErrorCode::NotFound, "unknown file_id", request_id));
    };

    let healthy_ids: std::collections::HashSet<String> =
        state.registry.healthy().into_iter().map(|n| n.node_id).collect();

    let mut chunk_map = serde_json::Map::new();
    let mut unavailable = Vec::new();
    for chunk_id in 0..descriptor.chunk_count {
        let locations = state.index.locations(file_id, chunk_id);
        let healthy_locations: Vec<String> = locations.intersection(&healthy_ids).cloned().collect();
        if healthy_locations.is_empty() {
            unavailable.push(chunk_id);
        }
        let addresses: Vec<String> =
            healthy_locations.iter().filter_map(|n| state.registry.address_of(n)).collect();
        chunk_map.insert(
            chunk_id.to_string(),
            serde_json::json!({ "nodes": healthy_locations, "addresses": addresses }),
        );
    }

    if !unavailable.is_empty() {
        return Frame::new(Envelope {
            msg_type: MessageType::Error,
            data: serde_json::json!({
                "code": WireErrorCode::DataLost.as_str(),
                "message": format!("{} of {} chunks have no surviving replica", unavailable.len(), descriptor.chunk_count),
                "file_id": file_id,
                "unavailable_chunks": unavailable,
                "chunks": chunk_map,
            }),
            sender_id: None,
            request_id,
        });
    }

    Frame::new(Envelope {
        msg_type: MessageType::FileData,
        data: serde_json::json!({
            "file_id": file_id,
            "filename": descriptor.filename,
            "total_size": descriptor.total_size,
            "chunk_size": descriptor.chunk_size,
            "chunk_count": descriptor.chunk_count,
            "chunks": chunk_map,
        }),
        sender_id: None,
        request_id,
    })
}

fn handle_discover_nodes(state: &Arc<CoordinatorState>, request_id: Option<String>) -> Frame {
    let nodes = state.registry.all();
    Frame::new(Envelope {
        msg_type: MessageType::NodesList,
        data: serde_json::json!({ "nodes": nodes }),
        sender_id: None,
        request_id,
    })
}

fn handle_get_status(state: &Arc<CoordinatorState>, request_id: Option<String>) -> Frame {
    let nodes = state.registry.all();
    let healthy_count = nodes.iter().filter(|n| n.status == NodeStatus::Healthy).count();
    let failed_count = nodes.iter().filter(|n| n.status == NodeStatus::Failed).count();
    let total_capacity: u64 = nodes.iter().map(|n| n.capacity_bytes).sum();
    let total_used: u64 = nodes.iter().map(|n| n.used_bytes).sum();

    let mut under_replicated = 0u64;
    let mut data_lost = 0u64;
    for file in state.files.all_file_ids() {
        if let Some(descriptor) = state.files.get(&file) {
            for chunk_id in 0..descriptor.chunk_count {
                let count = state.index.replica_count(&file, chunk_id);
                if count == 0 {
                    data_lost += 1;
                } else if (count as u32) < state.min_factor {
                    under_replicated += 1;
                }
            }
        }
    }

    Frame::new(Envelope {
        msg_type: MessageType::StatusResponse,
        data: serde_json::json!({
            "total_nodes": nodes.len(),
            "healthy_nodes": healthy_count,
            "failed_nodes": failed_count,
            "total_capacity_bytes": total_capacity,
            "total_used_bytes": total_used,
            "total_files": state.files.len(),
            "total_chunks": state.files.total_chunks(),
            "under_replicated": under_replicated,
            "data_lost": data_lost,
        }),
        sender_id: None,
        request_id,
    })
}
