//! Shard reader capability (spec §6.3): the sole external collaborator
//! the weight loader depends on. Weight acquisition and caching live
//! outside this crate; callers supply an implementation of this trait
//! backed by disk, an object store, or an in-memory map for tests.

use crate::utils::error::Result;

/// Reads raw tensor bytes from a keyed or content-addressable store.
pub trait ShardReader: Send + Sync {
    /// Read `length` bytes starting at `offset` from shard `shard_id`.
    fn read(&self, shard_id: &str, offset: u64, length: u64) -> Result<Vec<u8>>;
}

/// An in-memory `ShardReader` over pre-loaded shard bytes, used by tests
/// and by callers that have already materialized weights in memory.
pub struct MemoryShardReader {
    shards: std::collections::HashMap<String, Vec<u8>>,
}

impl MemoryShardReader {
    pub fn new() -> Self {
        Self {
            shards: std::collections::HashMap::new(),
        }
    }

    pub fn with_shard(mut self, shard_id: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.shards.insert(shard_id.into(), bytes);
        self
    }
}

impl Default for MemoryShardReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ShardReader for MemoryShardReader {
    fn read(&self, shard_id: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
        use crate::utils::error::DopplerError;

        let bytes = self.shards.get(shard_id).ok_or_else(|| {
            DopplerError::IoFailure(format!("unknown shard id {shard_id}"))
        })?;
        let start = offset as usize;
        let end = start + length as usize;
        if end > bytes.len() {
            return Err(DopplerError::IoFailure(format!(
                "shard {shard_id} read [{start}..{end}) out of bounds (len {})",
                bytes.len()
            )));
        }
        Ok(bytes[start..end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_slice_of_known_shard() {
        let reader = MemoryShardReader::new().with_shard("s0", vec![1, 2, 3, 4, 5]);
        let out = reader.read("s0", 1, 3).unwrap();
        assert_eq!(out, vec![2, 3, 4]);
    }

    #[test]
    fn unknown_shard_is_io_failure() {
        let reader = MemoryShardReader::new();
        assert!(reader.read("missing", 0, 1).is_err());
    }

    #[test]
    fn out_of_bounds_read_is_io_failure() {
        let reader = MemoryShardReader::new().with_shard("s0", vec![1, 2, 3]);
        assert!(reader.read("s0", 0, 10).is_err());
    }
}
