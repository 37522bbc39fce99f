//! Node registry — the coordinator's table of known storage nodes.
//!
//! Backed by a lock-free concurrent map rather than one coarse mutex,
//! so registration, heartbeat updates, and placement reads never
//! contend with each other.

use dashmap::DashMap;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeStatus {
    Offline,
    Healthy,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeRecord {
    pub node_id: String,
    pub address: String,
    pub capacity_bytes: u64,
    pub used_bytes: u64,
    pub status: NodeStatus,
}

#[derive(Default)]
pub struct NodeRegistry {
    nodes: DashMap<String, NodeRecord>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self { nodes: DashMap::new() }
    }

    /// Idempotent: re-registering an existing node_id updates its
    /// address/capacity in place rather than creating a duplicate.
    pub fn register(&self, node_id: &str, address: &str, capacity_bytes: u64) {
        self.nodes
            .entry(node_id.to_string())
            .and_modify(|r| {
                r.address = address.to_string();
                r.capacity_bytes = capacity_bytes;
            })
            .or_insert_with(|| NodeRecord {
                node_id: node_id.to_string(),
                address: address.to_string(),
                capacity_bytes,
                used_bytes: 0,
                status: NodeStatus::Healthy,
            });
    }

    pub fn update_usage(&self, node_id: &str, used_bytes: u64) {
        if let Some(mut record) = self.nodes.get_mut(node_id) {
            record.used_bytes = used_bytes;
        }
    }

    pub fn set_status(&self, node_id: &str, status: NodeStatus) {
        if let Some(mut record) = self.nodes.get_mut(node_id) {
            record.status = status;
        }
    }

    pub fn get(&self, node_id: &str) -> Option<NodeRecord> {
        self.nodes.get(node_id).map(|r| r.clone())
    }

    pub fn address_of(&self, node_id: &str) -> Option<String> {
        self.nodes.get(node_id).map(|r| r.address.clone())
    }

    pub fn all(&self) -> Vec<NodeRecord> {
        self.nodes.iter().map(|r| r.value().clone()).collect()
    }

    pub fn healthy(&self) -> Vec<NodeRecord> {
        self.nodes
            .iter()
            .filter(|r| r.status == NodeStatus::Healthy)
            .map(|r| r.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
