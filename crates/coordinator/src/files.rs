//! File index — frozen-at-creation metadata for every uploaded file.

use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize)]
pub struct FileDescriptor {
    pub file_id: String,
    pub filename: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub chunk_count: u64,
    pub replication_factor: u32,
}

#[derive(Default)]
pub struct FileIndex {
    files: DashMap<String, FileDescriptor>,
}

impl FileIndex {
    pub fn new() -> Self {
        Self { files: DashMap::new() }
    }

    pub fn insert(&self, descriptor: FileDescriptor) {
        self.files.insert(descriptor.file_id.clone(), descriptor);
    }

    pub fn get(&self, file_id: &str) -> Option<FileDescriptor> {
        self.files.get(file_id).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn total_chunks(&self) -> u64 {
        self.files.iter().map(|r| r.chunk_count).sum()
    }

    pub fn all_file_ids(&self) -> Vec<String> {
        self.files.iter().map(|r| r.key().clone()).collect()
    }
}

/// Derive a file_id from filename and a caller-supplied timestamp. Two
/// uploads of the same filename get different ids because of the
/// timestamp salt — this cluster does not deduplicate file content.
pub fn derive_file_id(filename: &str, timestamp_nanos: u128) -> String {
    let mut hasher = Sha256::new();
    hasher.update(filename.as_bytes());
    hasher.update(timestamp_nanos.to_be_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..16].to_string()
}
