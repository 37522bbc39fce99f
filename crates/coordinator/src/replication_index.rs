//! Replication index — maps each chunk to the set of nodes holding it.
//!
//! Keyed the same way the teacher's idempotent task store keys its
//! entries: a concurrent map over a composite key, with set-valued
//! entries so register/unregister are naturally idempotent.

use dashmap::DashMap;
use std::collections::HashSet;

pub type ChunkKey = (String, u64);

#[derive(Default)]
pub struct ReplicationIndex {
    locations: DashMap<ChunkKey, HashSet<String>>,
}

impl ReplicationIndex {
    pub fn new() -> Self {
        Self { locations: DashMap::new() }
    }

    /// Idempotent: registering the same node twice for the same chunk
    /// leaves the set unchanged.
    pub fn register(&self, file_id: &str, chunk_id: u64, node_id: &str) {
        self.locations
            .entry((file_id.to_string(), chunk_id))
            .or_default()
            .insert(node_id.to_string());
    }

    /// Idempotent: unregistering an absent node is a no-op.
    pub fn unregister(&self, file_id: &str, chunk_id: u64, node_id: &str) {
        if let Some(mut set) = self.locations.get_mut(&(file_id.to_string(), chunk_id)) {
            set.remove(node_id);
        }
    }

    /// Remove every chunk location pointing at `node_id`, returning the
    /// (file_id, chunk_id) pairs that were affected.
    pub fn unregister_node(&self, node_id: &str) -> Vec<ChunkKey> {
        let mut affected = Vec::new();
        for mut entry in self.locations.iter_mut() {
            if entry.value_mut().remove(node_id) {
                affected.push(entry.key().clone());
            }
        }
        affected
    }

    pub fn locations(&self, file_id: &str, chunk_id: u64) -> HashSet<String> {
        self.locations
            .get(&(file_id.to_string(), chunk_id))
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    pub fn chunks_on(&self, node_id: &str) -> Vec<ChunkKey> {
        self.locations
            .iter()
            .filter(|e| e.value().contains(node_id))
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn replica_count(&self, file_id: &str, chunk_id: u64) -> usize {
        self.locations(file_id, chunk_id).len()
    }

    pub fn all_chunks(&self) -> Vec<ChunkKey> {
        self.locations.iter().map(|e| e.key().clone()).collect()
    }
}
