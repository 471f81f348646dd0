//! Index & cache (C4) — `id -> ItemLocation` map, the in-memory cache
//! vector, and the hole sets consumed by `fill_holes`.
//!
//! Mirrors the shape of the teacher's `FileIndex`/`FileIndexRecord` pair
//! (`index/mod.rs`), generalized from "list of chunk refs per file" to
//! "single on-disk location per record".

use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Per-record location: which block holds it on disk, and where (if
/// anywhere) it lives in the in-memory cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemLocation {
    pub block: u64,
    pub cached: bool,
    pub cache_index: i64,
}

impl ItemLocation {
    pub fn on_disk(block: u64) -> Self {
        Self {
            block,
            cached: false,
            cache_index: -1,
        }
    }
}

/// Ordered in-memory mirror of the lowest-indexed blocks on disk.
#[derive(Debug, Default)]
pub struct Cache {
    records: Vec<Value>,
}

impl Cache {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, i: usize) -> &Value {
        &self.records[i]
    }

    pub fn get_mut(&mut self, i: usize) -> &mut Value {
        &mut self.records[i]
    }

    pub fn set(&mut self, i: usize, record: Value) {
        self.records[i] = record;
    }

    /// Append `record`, returning the slot index it now occupies.
    pub fn push(&mut self, record: Value) -> usize {
        self.records.push(record);
        self.records.len() - 1
    }

    /// Remove and return the tail-most record.
    pub fn pop(&mut self) -> Option<Value> {
        self.records.pop()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.records.iter()
    }
}

/// The full in-memory index: `id -> ItemLocation`, the cache vector, and the
/// hole sets awaiting `fill_holes` compaction.
#[derive(Debug, Default)]
pub struct Index {
    pub locations: HashMap<String, ItemLocation>,
    pub cache: Cache,
    pub block_holes: HashSet<u64>,
    pub cache_holes: HashSet<u64>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&ItemLocation> {
        self.locations.get(id)
    }

    /// Cache capacity in record slots, derived from `max_cache_size / block_size`.
    pub fn cache_capacity(max_cache_size: u64, block_size: u64) -> usize {
        if block_size == 0 {
            return 0;
        }
        (max_cache_size / block_size) as usize
    }

    /// The `n` highest-index live blocks, skipping anything already in
    /// `block_holes`, used by `fill_holes` to find donor blocks for holes.
    pub fn last_n_live_blocks(&self, n: usize, blocks: u64) -> Vec<u64> {
        let mut out = Vec::with_capacity(n);
        let mut b = blocks;
        while out.len() < n && b > 0 {
            b -= 1;
            if !self.block_holes.contains(&b) {
                out.push(b);
            }
        }
        out
    }

    /// The tail-most live cache indices, used by `fill_holes` to plug cache
    /// holes left below the new (shrunk) cache length.
    pub fn last_n_live_cache_indices(&self, n: usize) -> Vec<usize> {
        let mut out = Vec::with_capacity(n);
        let mut c = self.cache.len();
        while out.len() < n && c > 0 {
            c -= 1;
            if !self.cache_holes.contains(&(c as u64)) {
                out.push(c);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_capacity_floors() {
        assert_eq!(Index::cache_capacity(200, 64), 3);
        assert_eq!(Index::cache_capacity(128 * 1024 * 1024, 64), 2 * 1024 * 1024);
        assert_eq!(Index::cache_capacity(100, 0), 0);
    }

    #[test]
    fn last_n_live_blocks_skips_holes() {
        let mut idx = Index::new();
        idx.block_holes.insert(5);
        idx.block_holes.insert(7);
        let live = idx.last_n_live_blocks(3, 8);
        assert_eq!(live, vec![6, 4, 3]);
    }
}
