//! `nodes` — list every node the coordinator knows about.

use anyhow::{bail, Result};

use storage_core::wire::{Envelope, MessageType};

pub async fn cmd_nodes(coordinator_addr: &str) -> Result<()> {
    let reply = storage_core::client::roundtrip(
        coordinator_addr,
        Envelope::new(MessageType::DiscoverNodes, serde_json::json!({})),
    )
    .await?;

    if reply.envelope.msg_type != MessageType::NodesList {
        bail!("coordinator returned unexpected reply: {:?}", reply.envelope.data);
    }

    let nodes = reply.envelope.data.get("nodes").and_then(|v| v.as_array()).cloned().unwrap_or_default();
    if nodes.is_empty() {
        println!("No nodes registered.");
        return Ok(());
    }

    for node in nodes {
        let node_id = node.get("node_id").and_then(|v| v.as_str()).unwrap_or("?");
        let address = node.get("address").and_then(|v| v.as_str()).unwrap_or("?");
        let status = node.get("status").and_then(|v| v.as_str()).unwrap_or("?");
        let used = node.get("used_bytes").and_then(|v| v.as_u64()).unwrap_or(0);
        let capacity = node.get("capacity_bytes").and_then(|v| v.as_u64()).unwrap_or(0);
        println!("{node_id:<20} {status:<8} {address:<22} {used}/{capacity} bytes");
    }
    Ok(())
}
