//! `download` — fetch every chunk of a file and reassemble it on disk.

use anyhow::{bail, Context, Result};

use storage_core::chunker;
use storage_core::wire::{Envelope, MessageType};

pub async fn cmd_download(coordinator_addr: &str, file_id: &str, out_path: &str) -> Result<()> {
    let reply = storage_core::client::roundtrip(
        coordinator_addr,
        Envelope::new(MessageType::DownloadFile, serde_json::json!({ "file_id": file_id })),
    )
    .await
    .context("download request to coordinator failed")?;

    if reply.envelope.msg_type == MessageType::Error {
        bail!("coordinator could not serve file: {:?}", reply.envelope.data);
    }
    if reply.envelope.msg_type != MessageType::FileData {
        bail!("coordinator returned unexpected reply: {:?}", reply.envelope.data);
    }

    let chunk_count = reply.envelope.data.get("chunk_count").and_then(|v| v.as_u64()).unwrap_or(0);
    let chunks = reply.envelope.data.get("chunks").cloned().unwrap_or_default();

    let mut out = Vec::new();
    for chunk_id in 0..chunk_count {
        let key = chunk_id.to_string();
        let entry = chunks.get(key.as_str()).context("missing chunk entry in coordinator response")?;
        let addresses: Vec<String> = entry
            .get("addresses")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();

        let mut fetched = None;
        for addr in &addresses {
            let envelope = Envelope::new(
                MessageType::GetChunk,
                serde_json::json!({ "file_id": file_id, "chunk_id": chunk_id }),
            );
            match storage_core::client::roundtrip(addr, envelope).await {
                Ok(frame) if frame.envelope.msg_type == MessageType::ChunkData => {
                    let expected_hash = frame.envelope.data.get("content_hash").and_then(|v| v.as_str());
                    if let Some(expected) = expected_hash {
                        if !chunker::verify(&frame.payload, expected) {
                            continue;
                        }
                    }
                    fetched = Some(frame.payload);
                    break;
                }
                _ => continue,
            }
        }

        let bytes = fetched.with_context(|| format!("chunk {chunk_id} unavailable from any node"))?;
        out.extend_from_slice(&bytes);
    }

    std::fs::write(out_path, &out).with_context(|| format!("failed to write {out_path}"))?;
    println!("downloaded {file_id} -> {out_path} ({} bytes)", out.len());
    Ok(())
}
