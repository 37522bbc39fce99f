//! Storage node TCP server: one accept loop, one task per connection.

use std::sync::Arc;

use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use storage_core::client::roundtrip;
use storage_core::wire::{read_frame, write_frame, Envelope, Frame, MessageType, WireError, WireErrorCode};

use crate::bandwidth::{BandwidthLedger, Direction};
use crate::chunk_store::{ChunkStore, StoreError};

pub struct NodeState {
    pub node_id: String,
    pub store: ChunkStore,
    pub bandwidth: BandwidthLedger,
}

pub async fn run(
    listen_addr: String,
    state: Arc<NodeState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&listen_addr).await?;
    tracing::info!(node_id = %state.node_id, addr = %listen_addr, "storage node listening");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!(node_id = %state.node_id, "accept loop shutting down");
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
                    if let Err(e) = handle_connection(stream, state.clone(), conn_shutdown).await {
                        tracing::debug!(node_id = %state.node_id, %peer_addr, error = %e, "connection closed");
                    }
                });
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    state: Arc<NodeState>,
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
            Err(e) => {
                tracing::debug!(node_id = %state.node_id, error = %e, "protocol error, closing connection");
                return Err(e);
            }
        };

        let reply = dispatch(&state, frame).await;
        write_frame(&mut stream, &reply).await?;
    }
}

async fn dispatch(state: &Arc<NodeState>, frame: Frame) -> Frame {
    let request_id = frame.envelope.request_id.clone();
    match frame.envelope.msg_type {
        MessageType::StoreChunk => handle_store_chunk(state, frame),
        MessageType::GetChunk => handle_get_chunk(state, frame),
        MessageType::ReplicateChunk => handle_replicate_chunk(state, frame).await,
        MessageType::GetStatus => handle_get_status(state, request_id),
        other => Frame::new(Envelope::error(
            WireErrorCode::ProtocolError,
            format!("storage node does not accept {other:?}"),
            request_id,
        )),
    }
}

fn handle_store_chunk(state: &Arc<NodeState>, frame: Frame) -> Frame {
    let request_id = frame.envelope.request_id.clone();
    let file_id = frame.envelope.data.get("file_id").and_then(|v| v.as_str()).unwrap_or_default();
    let chunk_id = frame.envelope.data.get("chunk_id").and_then(|v| v.as_u64()).unwrap_or(0);
    let expected_hash = frame.envelope.data.get("content_hash").and_then(|v| v.as_str());

    let key = (file_id.to_string(), chunk_id, Direction::Inbound);
    let _reservation = match state.bandwidth.reserve(key) {
        Ok(r) => r,
        Err(_) => {
            return Frame::new(Envelope::error(WireErrorCode::NoBandwidth, "no bandwidth available", request_id));
        }
    };

    match state.store.store(file_id, chunk_id, &frame.payload, expected_hash) {
        Ok(hash) => Frame::new(Envelope {
            msg_type: MessageType::ChunkStored,
            data: serde_json::json!({ "file_id": file_id, "chunk_id": chunk_id, "content_hash": hash, "size": frame.payload.len() }),
            sender_id: Some(state.node_id.clone()),
            request_id,
        }),
        Err(StoreError::ChecksumMismatch { .. }) => {
            Frame::new(Envelope::error(WireErrorCode::ChecksumMismatch, "checksum mismatch", request_id))
        }
        Err(StoreError::InsufficientStorage { .. }) => {
            Frame::new(Envelope::error(WireErrorCode::InsufficientStorage, "insufficient storage", request_id))
        }
        Err(e) => Frame::new(Envelope::error(WireErrorCode::Transient, e.to_string(), request_id)),
    }
}

fn handle_get_chunk(state: &Arc<NodeState>, frame: Frame) -> Frame {
    let request_id = frame.envelope.request_id.clone();
    let file_id = frame.envelope.data.get("file_id").and_then(|v| v.as_str()).unwrap_or_default();
    let chunk_id = frame.envelope.data.get("chunk_id").and_then(|v| v.as_u64()).unwrap_or(0);

    let key = (file_id.to_string(), chunk_id, Direction::Outbound);
    let _reservation = match state.bandwidth.reserve(key) {
        Ok(r) => r,
        Err(_) => {
            return Frame::new(Envelope::error(WireErrorCode::NoBandwidth, "no bandwidth available", request_id));
        }
    };

    match state.store.get(file_id, chunk_id) {
        Ok((bytes, hash)) => Frame::with_payload(
            Envelope {
                msg_type: MessageType::ChunkData,
                data: serde_json::json!({ "file_id": file_id, "chunk_id": chunk_id, "content_hash": hash }),
                sender_id: Some(state.node_id.clone()),
                request_id,
            },
            bytes,
        ),
        Err(StoreError::NotFound(_, _)) => {
            Frame::new(Envelope::error(WireErrorCode::NotFound, "chunk not found", request_id))
        }
        Err(StoreError::ChecksumMismatch { .. }) => {
            Frame::new(Envelope::error(WireErrorCode::ChecksumMismatch, "checksum mismatch on read", request_id))
        }
        Err(e) => Frame::new(Envelope::error(WireErrorCode::Transient, e.to_string(), request_id)),
    }
}

async fn handle_replicate_chunk(state: &Arc<NodeState>, frame: Frame) -> Frame {
    let request_id = frame.envelope.request_id.clone();
    let file_id = frame.envelope.data.get("file_id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let chunk_id = frame.envelope.data.get("chunk_id").and_then(|v| v.as_u64()).unwrap_or(0);
    let src_addr = frame.envelope.data.get("src_addr").and_then(|v| v.as_str()).unwrap_or_default().to_string();

    let pull = Envelope::new(
        MessageType::GetChunk,
        serde_json::json!({ "file_id": file_id, "chunk_id": chunk_id }),
    );

    let fetched = match roundtrip(&src_addr, pull).await {
        Ok(f) => f,
        Err(e) => {
            return Frame::new(Envelope::error(WireErrorCode::Transient, format!("pull from {src_addr} failed: {e}"), request_id));
        }
    };

    if fetched.envelope.msg_type != MessageType::ChunkData {
        return Frame::new(Envelope::error(WireErrorCode::Transient, "source did not return chunk data", request_id));
    }

    let expected_hash = fetched.envelope.data.get("content_hash").and_then(|v| v.as_str());

    let key = (file_id.clone(), chunk_id, Direction::Inbound);
    let _reservation = match state.bandwidth.reserve(key) {
        Ok(r) => r,
        Err(_) => {
            return Frame::new(Envelope::error(WireErrorCode::NoBandwidth, "no bandwidth available", request_id));
        }
    };

    match state.store.store(&file_id, chunk_id, &fetched.payload, expected_hash) {
        Ok(hash) => Frame::new(Envelope {
            msg_type: MessageType::ChunkStored,
            data: serde_json::json!({ "file_id": file_id, "chunk_id": chunk_id, "content_hash": hash }),
            sender_id: Some(state.node_id.clone()),
            request_id,
        }),
        Err(StoreError::ChecksumMismatch { .. }) => {
            Frame::new(Envelope::error(WireErrorCode::ChecksumMismatch, "checksum mismatch", request_id))
        }
        Err(e) => Frame::new(Envelope::error(WireErrorCode::Transient, e.to_string(), request_id)),
    }
}

fn handle_get_status(state: &Arc<NodeState>, request_id: Option<String>) -> Frame {
    Frame::new(Envelope {
        msg_type: MessageType::StatusResponse,
        data: serde_json::json!({
            "node_id": state.node_id,
            "used_bytes": state.store.used_bytes(),
            "capacity_bytes": state.store.capacity_bytes(),
            "chunk_count": state.store.chunk_count(),
            "bandwidth_in_use_bps": state.bandwidth.in_use_bps(),
            "bandwidth_total_bps": state.bandwidth.total_bps(),
        }),
        sender_id: Some(state.node_id.clone()),
        request_id,
    })
}

/// Used by the client side of STORE_CHUNK fan-out (cluster-ctl) and by
/// REGISTER_CHUNK callbacks to the coordinator.
pub async fn store_chunk_at(
    node_addr: &str,
    file_id: &str,
    chunk_id: u64,
    data: Bytes,
    content_hash: &str,
) -> Result<(), WireError> {
    let envelope = Envelope::new(
        MessageType::StoreChunk,
        serde_json::json!({ "file_id": file_id, "chunk_id": chunk_id, "content_hash": content_hash }),
    );
    let reply = storage_core::client::roundtrip_with_payload(node_addr, envelope, data).await?;
    match reply.envelope.msg_type {
        MessageType::ChunkStored => Ok(()),
        _ => Err(WireError::Closed),
    }
}
