//! `status` and `nodes` — cluster-wide health summary.

use anyhow::{bail, Result};

use storage_core::wire::{Envelope, MessageType};

pub async fn cmd_status(coordinator_addr: &str) -> Result<()> {
    let reply = storage_core::client::roundtrip(
        coordinator_addr,
        Envelope::new(MessageType::GetStatus, serde_json::json!({})),
    )
    .await?;

    if reply.envelope.msg_type != MessageType::StatusResponse {
        bail!("coordinator returned unexpected reply: {:?}", reply.envelope.data);
    }

    let d = &reply.envelope.data;
    println!("Cluster status");
    println!("  nodes            : {} total, {} healthy, {} failed",
        d.get("total_nodes").and_then(|v| v.as_u64()).unwrap_or(0),
        d.get("healthy_nodes").and_then(|v| v.as_u64()).unwrap_or(0),
        d.get("failed_nodes").and_then(|v| v.as_u64()).unwrap_or(0));
    println!("  capacity         : {} used / {} bytes",
        d.get("total_used_bytes").and_then(|v| v.as_u64()).unwrap_or(0),
        d.get("total_capacity_bytes").and_then(|v| v.as_u64()).unwrap_or(0));
    println!("  files            : {}", d.get("total_files").and_then(|v| v.as_u64()).unwrap_or(0));
    println!("  chunks           : {}", d.get("total_chunks").and_then(|v| v.as_u64()).unwrap_or(0));
    println!("  under-replicated : {}", d.get("under_replicated").and_then(|v| v.as_u64()).unwrap_or(0));
    println!("  data lost        : {}", d.get("data_lost").and_then(|v| v.as_u64()).unwrap_or(0));
    Ok(())
}
