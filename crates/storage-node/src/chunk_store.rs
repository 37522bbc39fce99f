//! Content-addressed chunk store, one directory per node.
//!
//! Chunks are keyed by (file_id, chunk_id) on disk, named by the pair
//! so a node can look one up without scanning; the content hash is
//! verified against the bytes on every write and, when configured, on
//! every read. Layout:
//!
//!   {data_dir}/{file_id}/{chunk_id}.chunk
//!
//! Writes are atomic: write to a temp file, fsync, then rename.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashSet;
use memmap2::Mmap;

use storage_core::chunker;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("insufficient storage: need {needed} bytes, {available} available")]
    InsufficientStorage { needed: u64, available: u64 },
    #[error("checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },
    #[error("chunk not found: {0}/{1}")]
    NotFound(String, u64),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A node's local chunk storage plus capacity accounting.
pub struct ChunkStore {
    root: PathBuf,
    capacity_bytes: u64,
    used_bytes: AtomicU64,
    present: DashSet<(String, u64)>,
    hashes: dashmap::DashMap<(String, u64), String>,
    verify_on_write: bool,
    verify_on_read: bool,
}

impl ChunkStore {
    pub fn new(
        root: impl Into<PathBuf>,
        capacity_bytes: u64,
        verify_on_write: bool,
        verify_on_read: bool,
    ) -> std::io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            capacity_bytes,
            used_bytes: AtomicU64::new(0),
            present: DashSet::new(),
            hashes: dashmap::DashMap::new(),
            verify_on_write,
            verify_on_read,
        })
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    pub fn used_bytes(&self) -> u64 {
        self.used_bytes.load(Ordering::SeqCst)
    }

    pub fn free_bytes(&self) -> u64 {
        self.capacity_bytes.saturating_sub(self.used_bytes())
    }

    pub fn chunk_count(&self) -> usize {
        self.present.len()
    }

    pub fn has(&self, file_id: &str, chunk_id: u64) -> bool {
        self.present.contains(&(file_id.to_string(), chunk_id))
    }

    /// Store a chunk's bytes. Verifies content hash against `expected_hash`
    /// (when `verify_on_write` is enabled) and enforces the capacity limit.
    /// Returns the content hash actually stored.
    pub fn store(
        &self,
        file_id: &str,
        chunk_id: u64,
        data: &[u8],
        expected_hash: Option<&str>,
    ) -> Result<String, StoreError> {
        let computed = chunker::content_hash(data);
        if self.verify_on_write {
            if let Some(expected) = expected_hash {
                if expected != computed {
                    return Err(StoreError::ChecksumMismatch {
                        expected: expected.to_string(),
                        computed,
                    });
                }
            }
        }

        let needed = data.len() as u64;
        if !self.has(file_id, chunk_id) {
            let free = self.free_bytes();
            if needed > free {
                return Err(StoreError::InsufficientStorage { needed, available: free });
            }
        }

        let dir = self.root.join(file_id);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{chunk_id}.chunk"));
        let tmp_path = dir.join(format!("{chunk_id}.chunk.tmp"));
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;

        let key = (file_id.to_string(), chunk_id);
        if self.present.insert(key.clone()) {
            self.used_bytes.fetch_add(needed, Ordering::SeqCst);
        }
        self.hashes.insert(key, computed.clone());

        Ok(computed)
    }

    /// Read a chunk's bytes back. When `verify_on_read` is enabled, the
    /// freshly recomputed hash is compared against the hash recorded at
    /// `store()` time, so bit rot or other in-place corruption on disk
    /// is caught rather than silently served.
    pub fn get(&self, file_id: &str, chunk_id: u64) -> Result<(bytes::Bytes, String), StoreError> {
        if !self.has(file_id, chunk_id) {
            return Err(StoreError::NotFound(file_id.to_string(), chunk_id));
        }
        let path = self.chunk_path(file_id, chunk_id);
        let file = fs::File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let computed = chunker::content_hash(&mmap);

        if self.verify_on_read {
            let key = (file_id.to_string(), chunk_id);
            if let Some(stored) = self.hashes.get(&key) {
                if *stored != computed {
                    return Err(StoreError::ChecksumMismatch {
                        expected: stored.clone(),
                        computed,
                    });
                }
            }
        }

        Ok((bytes::Bytes::copy_from_slice(&mmap), computed))
    }

    fn chunk_path(&self, file_id: &str, chunk_id: u64) -> PathBuf {
        self.root.join(file_id).join(format!("{chunk_id}.chunk"))
    }
}

pub fn default_data_dir(node_id: &str) -> PathBuf {
    Path::new("./data").join(node_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(capacity: u64) -> ChunkStore {
        let dir = std::env::temp_dir().join(format!("storage-node-test-{}", std::process::id()))
            .join(format!("{:?}", std::time::Instant::now()));
        ChunkStore::new(dir, capacity, true, true).unwrap()
    }

    #[test]
    fn store_and_get_round_trips() {
        let store = temp_store(1024 * 1024);
        let data = b"chunk bytes";
        let hash = storage_core::chunker::content_hash(data);
        store.store("file-1", 0, data, Some(&hash)).unwrap();
        let (bytes, computed) = store.get("file-1", 0).unwrap();
        assert_eq!(bytes.as_ref(), data);
        assert_eq!(computed, hash);
    }

    #[test]
    fn checksum_mismatch_is_rejected() {
        let store = temp_store(1024 * 1024);
        let result = store.store("file-1", 0, b"actual bytes", Some("deadbeef"));
        assert!(matches!(result, Err(StoreError::ChecksumMismatch { .. })));
    }

    #[test]
    fn insufficient_storage_is_rejected() {
        let store = temp_store(4);
        let result = store.store("file-1", 0, b"too many bytes", None);
        assert!(matches!(result, Err(StoreError::InsufficientStorage { .. })));
    }

    #[test]
    fn used_bytes_tracks_stored_chunks() {
        let store = temp_store(1024);
        store.store("file-1", 0, b"12345", None).unwrap();
        assert_eq!(store.used_bytes(), 5);
        store.store("file-1", 1, b"123", None).unwrap();
        assert_eq!(store.used_bytes(), 8);
    }

    #[test]
    fn get_missing_chunk_is_not_found() {
        let store = temp_store(1024);
        assert!(matches!(store.get("nope", 0), Err(StoreError::NotFound(_, _))));
    }

    #[test]
    fn in_place_corruption_is_caught_on_read() {
        let store = temp_store(1024 * 1024);
        store.store("file-1", 0, b"original bytes", None).unwrap();

        // Simulate bit rot: overwrite the bytes on disk without going
        // through store(), so the recorded hash no longer matches.
        fs::write(store.chunk_path("file-1", 0), b"corrupted!!!!!").unwrap();

        let result = store.get("file-1", 0);
        assert!(matches!(result, Err(StoreError::ChecksumMismatch { .. })));
    }
}
