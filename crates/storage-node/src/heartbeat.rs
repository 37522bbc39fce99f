//! Periodic heartbeat emitter — one long-lived task per node, cancelled
//! via the shared shutdown broadcast.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use storage_core::client::roundtrip;
use storage_core::wire::{Envelope, MessageType};

use crate::server::NodeState;

pub async fn run(
    node_id: String,
    coordinator_addr: String,
    state: Arc<NodeState>,
    interval_secs: u64,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!(node_id, "heartbeat emitter shutting down");
                return;
            }
            _ = ticker.tick() => {
                let envelope = Envelope::new(
                    MessageType::Heartbeat,
                    serde_json::json!({
                        "node_id": node_id,
                        "used_bytes": state.store.used_bytes(),
                        "capacity_bytes": state.store.capacity_bytes(),
                        "chunk_count": state.store.chunk_count(),
                    }),
                )
                .with_sender(node_id.clone());

                match roundtrip(&coordinator_addr, envelope).await {
                    Ok(_) => tracing::trace!(node_id, "heartbeat acked"),
                    Err(e) => tracing::warn!(node_id, error = %e, "heartbeat failed, coordinator may be unreachable"),
                }
            }
        }
    }
}
