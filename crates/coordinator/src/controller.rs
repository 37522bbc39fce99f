//! Re-replication controller — restores replication factor after a
//! node failure.
//!
//! Failure events arrive over a channel rather than a stored callback
//! list, so the controller never runs inside the heartbeat monitor's
//! own lock. Repairs for distinct chunks run concurrently, bounded by
//! a semaphore (the same bounded-worker shape the teacher's compute
//! executor uses for task polling); repairs for the same chunk are
//! serialized by an in-flight guard set so two overlapping failures
//! can never double-schedule one chunk.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashSet;
use tokio::sync::{mpsc, Semaphore};

use storage_core::config::PlacementStrategy;
use storage_core::placement::{select as select_placement, PlacementCandidate};
use storage_core::wire::{Envelope, MessageType};

use crate::files::FileIndex;
use crate::node_registry::NodeRegistry;
use crate::replication_index::{ChunkKey, ReplicationIndex};

const MAX_CONCURRENT_REPAIRS: usize = 8;
const MAX_RETRIES: u32 = 1;

pub struct ReRepEvent {
    pub failed_node_id: String,
}

pub struct Controller {
    registry: Arc<NodeRegistry>,
    index: Arc<ReplicationIndex>,
    files: Arc<FileIndex>,
    strategy: PlacementStrategy,
    enabled: bool,
    in_flight: Arc<DashSet<ChunkKey>>,
}

impl Controller {
    pub fn new(
        registry: Arc<NodeRegistry>,
        index: Arc<ReplicationIndex>,
        files: Arc<FileIndex>,
        strategy: PlacementStrategy,
        enabled: bool,
    ) -> Self {
        Self {
            registry,
            index,
            files,
            strategy,
            enabled,
            in_flight: Arc::new(DashSet::new()),
        }
    }

    pub async fn run(self, mut events: mpsc::Receiver<ReRepEvent>) {
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_REPAIRS));
        while let Some(event) = events.recv().await {
            let affected = self.index.unregister_node(&event.failed_node_id);
            tracing::info!(node_id = %event.failed_node_id, chunks = affected.len(), "node failed, diagnosing replicas");

            if !self.enabled {
                continue;
            }

            for chunk_key in affected {
                if !self.in_flight.insert(chunk_key.clone()) {
                    continue;
                }
                let registry = self.registry.clone();
                let index = self.index.clone();
                let files = self.files.clone();
                let strategy = self.strategy;
                let failed_node = event.failed_node_id.clone();
                let in_flight = self.in_flight.clone();
                let permit = semaphore.clone().acquire_owned().await.unwrap();

                tokio::spawn(async move {
                    let _permit = permit;
                    repair_chunk(&registry, &index, &files, &chunk_key, &failed_node, strategy).await;
                    in_flight.remove(&chunk_key);
                });
            }
        }
    }
}

async fn repair_chunk(
    registry: &NodeRegistry,
    index: &ReplicationIndex,
    files: &FileIndex,
    chunk_key: &ChunkKey,
    failed_node: &str,
    strategy: PlacementStrategy,
) {
    let (file_id, chunk_id) = chunk_key.clone();
    let Some(descriptor) = files.get(&file_id) else {
        tracing::warn!(file_id, "repair requested for unknown file");
        return;
    };

    let survivors: HashSet<String> = index.locations(&file_id, chunk_id);
    if survivors.is_empty() {
        tracing::error!(file_id, chunk_id, "DATA_LOST: no surviving replicas");
        return;
    }

    if survivors.len() as u32 >= descriptor.replication_factor {
        return;
    }

    let needed = descriptor.replication_factor - survivors.len() as u32;
    let source = survivors.iter().next().cloned().unwrap();
    let Some(source_addr) = registry.address_of(&source) else {
        tracing::warn!(file_id, chunk_id, source, "source node has no known address");
        return;
    };

    let mut exclude: Vec<String> = survivors.into_iter().collect();
    exclude.push(failed_node.to_string());

    let candidates: Vec<PlacementCandidate> = registry
        .healthy()
        .into_iter()
        .map(|n| PlacementCandidate {
            node_id: n.node_id,
            capacity_bytes: n.capacity_bytes,
            used_bytes: n.used_bytes,
        })
        .collect();

    let recipients = select_placement(&candidates, needed as usize, &exclude, descriptor.chunk_size, strategy);
    if recipients.is_empty() {
        tracing::warn!(file_id, chunk_id, "no eligible recipients for re-replication, deferring");
        return;
    }

    for recipient in recipients {
        let Some(recipient_addr) = registry.address_of(&recipient) else { continue };
        let mut attempt = 0;
        loop {
            attempt += 1;
            let envelope = Envelope::new(
                MessageType::ReplicateChunk,
                serde_json::json!({ "file_id": file_id, "chunk_id": chunk_id, "src_addr": source_addr }),
            );
            match storage_core::client::roundtrip(&recipient_addr, envelope).await {
                Ok(frame) if frame.envelope.msg_type == MessageType::ChunkStored => {
                    index.register(&file_id, chunk_id, &recipient);
                    tracing::info!(file_id, chunk_id, recipient, "re-replication succeeded");
                    break;
                }
                Ok(frame) => {
                    tracing::warn!(file_id, chunk_id, recipient, reply = ?frame.envelope.data, "re-replication rejected");
                    if attempt > MAX_RETRIES {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(file_id, chunk_id, recipient, error = %e, "re-replication attempt failed");
                    if attempt > MAX_RETRIES {
                        break;
                    }
                }
            }
        }
    }
}
