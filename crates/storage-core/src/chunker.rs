//! Chunking and content integrity.
//!
//! Splits whole-file byte buffers into ordered, content-hashed chunks.
//! Chunk size is picked from total file size so small files don't pay
//! per-chunk overhead and huge files don't produce an unmanageable
//! chunk count.

use sha2::{Digest, Sha256};

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;

pub const SMALL_FILE_THRESHOLD: u64 = 10 * MIB;
pub const MEDIUM_FILE_THRESHOLD: u64 = 100 * MIB;

pub const SMALL_CHUNK_SIZE: u64 = 512 * KIB;
pub const MEDIUM_CHUNK_SIZE: u64 = 2 * MIB;
pub const LARGE_CHUNK_SIZE: u64 = 10 * MIB;

/// Pick the chunk size for a file of `total_size` bytes, per the
/// size-tiered table: small files get small chunks so the replication
/// factor doesn't dominate their storage cost; large files get large
/// chunks so the chunk count stays bounded.
pub fn chunk_size_for(total_size: u64) -> u64 {
    if total_size < SMALL_FILE_THRESHOLD {
        SMALL_CHUNK_SIZE
    } else if total_size < MEDIUM_FILE_THRESHOLD {
        MEDIUM_CHUNK_SIZE
    } else {
        LARGE_CHUNK_SIZE
    }
}

/// Number of chunks a file of `total_size` splits into under `chunk_size`.
pub fn chunk_count(total_size: u64, chunk_size: u64) -> u64 {
    if total_size == 0 {
        return 0;
    }
    total_size.div_ceil(chunk_size)
}

/// Hex-encoded SHA-256 of `data`.
pub fn content_hash(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    hex::encode(digest)
}

/// Verify that `data` hashes to `expected` (hex-encoded SHA-256).
pub fn verify(data: &[u8], expected: &str) -> bool {
    content_hash(data) == expected
}

/// Split `data` into ordered chunks of `chunk_size`, the last possibly
/// shorter. Returns `(chunk_id, bytes, content_hash)` triples.
pub fn split(data: &[u8], chunk_size: u64) -> Vec<(u64, &[u8], String)> {
    if data.is_empty() {
        return Vec::new();
    }
    let chunk_size = chunk_size as usize;
    data.chunks(chunk_size)
        .enumerate()
        .map(|(idx, bytes)| (idx as u64, bytes, content_hash(bytes)))
        .collect()
}
