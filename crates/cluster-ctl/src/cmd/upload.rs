//! `upload` — chunk a local file and fan it out to storage nodes.

use anyhow::{bail, Context, Result};
use bytes::Bytes;

use storage_core::chunker;
use storage_core::wire::{Envelope, MessageType};
use storage_node::server::store_chunk_at;

pub async fn cmd_upload(coordinator_addr: &str, path: &str, replication_factor: Option<u32>) -> Result<()> {
    let data = std::fs::read(path).with_context(|| format!("failed to read {path}"))?;
    let filename = std::path::Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
        .to_string();

    let mut request = serde_json::json!({
        "filename": filename,
        "file_size": data.len() as u64,
    });
    if let Some(factor) = replication_factor {
        request["replication_factor"] = serde_json::json!(factor);
    }

    let ack = storage_core::client::roundtrip(coordinator_addr, Envelope::new(MessageType::UploadFile, request))
        .await
        .context("upload request to coordinator failed")?;

    if ack.envelope.msg_type != MessageType::UploadAck {
        bail!("coordinator rejected upload: {:?}", ack.envelope.data);
    }

    let file_id = ack.envelope.data.get("file_id").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    let chunk_size = ack.envelope.data.get("chunk_size").and_then(|v| v.as_u64()).unwrap_or(0);
    let node_addresses: Vec<String> = ack
        .envelope
        .data
        .get("node_addresses")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();
    let nodes: Vec<String> = ack
        .envelope
        .data
        .get("nodes")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    if node_addresses.is_empty() {
        bail!("coordinator assigned no storage nodes for this upload");
    }

    let chunks = chunker::split(&data, chunk_size);
    println!("uploading {filename} as file_id={file_id}, {} chunk(s) x{} replica(s)", chunks.len(), node_addresses.len());

    for (chunk_id, bytes, content_hash) in chunks {
        let payload = Bytes::copy_from_slice(bytes);
        for (addr, node_id) in node_addresses.iter().zip(nodes.iter()) {
            store_chunk_at(addr, &file_id, chunk_id, payload.clone(), &content_hash)
                .await
                .with_context(|| format!("failed to store chunk {chunk_id} on {addr}"))?;

            let registered = storage_core::client::roundtrip(
                coordinator_addr,
                Envelope::new(
                    MessageType::RegisterChunk,
                    serde_json::json!({ "file_id": file_id, "chunk_id": chunk_id, "node_id": node_id }),
                ),
            )
            .await
            .context("chunk registration failed")?;

            if registered.envelope.msg_type != MessageType::ChunkRegistered {
                bail!("coordinator rejected chunk registration: {:?}", registered.envelope.data);
            }
        }
    }

    println!("upload complete: {file_id}");
    Ok(())
}
