//! Mutation engine (C7) — insert, remove, update, resize, and the hole-fill
//! compaction that keeps the block array dense after removals.
//!
//! Every function here takes the three pieces of engine state explicitly
//! (`Index`, `BlockFile`, `Header`) rather than bundling them into a struct,
//! mirroring the free-function shape of [`crate::scan`]; [`crate::db`] owns
//! the actual fields and threads them through.

use serde_json::Value;
use uuid::{NoContext, Timestamp, Uuid};

use crate::block;
use crate::error::{JinnError, Result};
use crate::file::BlockFile;
use crate::header::Header;
use crate::index::{Index, ItemLocation};
use crate::query;
use crate::scan::{self, ScanControl};

/// No network interface is available to this engine, so `_id` generation
/// uses a fixed node id rather than a real MAC address — UUID v1 here is
/// about k-sortable, time-ordered ids, not host identification.
const NODE_ID: [u8; 6] = [0x4a, 0x69, 0x6e, 0x6e, 0x00, 0x01];

fn generate_id() -> String {
    let ts = Timestamp::now(NoContext);
    Uuid::new_v1(ts, &NODE_ID).to_string()
}

fn ensure_id(record: &mut Value) -> Result<String> {
    if let Some(existing) = record.get("_id").and_then(|v| v.as_str()) {
        return Ok(existing.to_string());
    }
    if !record.is_object() {
        return Err(JinnError::InvalidArgument("record must be a JSON object".into()));
    }
    let id = generate_id();
    record
        .as_object_mut()
        .expect("checked above")
        .insert("_id".to_string(), Value::String(id.clone()));
    Ok(id)
}

pub(crate) fn read_record_at(
    index: &Index,
    file: &mut BlockFile,
    header: &Header,
    block: u64,
) -> Result<Value> {
    if block < index.cache.len() as u64 {
        return Ok(index.cache.get(block as usize).clone());
    }
    let mut buf = vec![0u8; header.block_size as usize];
    file.read_block(block, header.block_size, &mut buf)?;
    block::decode_block(&buf, block, header.compressed())
}

fn write_record_at(
    index: &mut Index,
    file: &mut BlockFile,
    header: &Header,
    block: u64,
    record: &Value,
) -> Result<()> {
    let buf = block::encode_block(record, header.block_size, header.compressed())?;
    file.write_block(block, header.block_size, &buf)?;
    if block < index.cache.len() as u64 {
        index.cache.set(block as usize, record.clone());
    }
    Ok(())
}

/// Insert a single record, assigning it a fresh `_id` if it doesn't already
/// carry a string one. If a record with that `_id` already exists, it is
/// overwritten in place at its current block instead of appending a new
/// one. Returns the id.
pub fn insert_one(
    index: &mut Index,
    file: &mut BlockFile,
    header: &mut Header,
    max_cache_size: u64,
    mut record: Value,
) -> Result<String> {
    let id = ensure_id(&mut record)?;
    let needed = block::encoded_length(&record, header.compressed())?;

    if needed as u64 > header.block_size {
        if header.blocks == 0 {
            // Cold-database shortcut: nothing has ever been written, so
            // there is no data to relocate — just adopt the larger stride.
            header.block_size = block::next_pow2(needed);
        } else {
            resize(index, file, header, max_cache_size, block::next_pow2(needed))?;
        }
    }

    // Look up the existing location first: an insert with an `_id` already
    // in the index overwrites that block rather than appending a new one.
    let existing = index.locations.get(&id).copied();
    let block = match existing {
        Some(loc) => loc.block,
        None => header.blocks,
    };

    let buf = block::encode_block(&record, header.block_size, header.compressed())?;
    file.write_block(block, header.block_size, &buf)?;

    let (cached, cache_index) = match existing {
        Some(loc) if loc.cached => {
            index.cache.set(loc.cache_index as usize, record);
            (true, loc.cache_index)
        }
        Some(loc) => (false, loc.cache_index),
        None => {
            header.blocks += 1;
            let capacity = Index::cache_capacity(max_cache_size, header.block_size);
            if index.cache.len() as u64 == block && (index.cache.len()) < capacity {
                (true, index.cache.push(record) as i64)
            } else {
                (false, -1)
            }
        }
    };

    index
        .locations
        .insert(id.clone(), ItemLocation { block, cached, cache_index });
    Ok(id)
}

/// Insert records one at a time (spec's insert-of-array default concurrency
/// is 1 — there is no batching win here, every insert may trigger its own
/// resize).
pub fn insert_many(
    index: &mut Index,
    file: &mut BlockFile,
    header: &mut Header,
    max_cache_size: u64,
    records: Vec<Value>,
) -> Result<Vec<String>> {
    records
        .into_iter()
        .map(|r| insert_one(index, file, header, max_cache_size, r))
        .collect()
}

/// Remove records by id. Marks every hole up front, then runs a single
/// `fill_holes` + cache rebalance pass — cheaper than compacting after each
/// individual removal. Ids are looked up before marking so unknown ids are
/// silently skipped, matching the "sorted delegate-to-find" removal path:
/// callers that remove by query first find the matching ids, then hand
/// them here.
pub fn remove_many(
    index: &mut Index,
    file: &mut BlockFile,
    header: &mut Header,
    max_cache_size: u64,
    ids: &[String],
) -> Result<usize> {
    let mut with_loc: Vec<(String, ItemLocation)> = ids
        .iter()
        .filter_map(|id| index.locations.get(id).map(|l| (id.clone(), *l)))
        .collect();
    // Highest block first: fewer tail-to-hole moves for fill_holes to do.
    with_loc.sort_by(|a, b| b.1.block.cmp(&a.1.block));

    let mut removed = 0;
    for (id, loc) in with_loc {
        index.locations.remove(&id);
        index.block_holes.insert(loc.block);
        if loc.cached {
            index.cache_holes.insert(loc.cache_index as u64);
        }
        removed += 1;
    }

    fill_holes(index, file, header)?;
    rebalance_cache(index, file, header, max_cache_size)?;
    Ok(removed)
}

pub fn remove_one(
    index: &mut Index,
    file: &mut BlockFile,
    header: &mut Header,
    max_cache_size: u64,
    id: &str,
) -> Result<bool> {
    Ok(remove_many(index, file, header, max_cache_size, std::slice::from_ref(&id.to_string()))? > 0)
}

/// Find every id whose record matches `query`, cache first then
/// out-of-core, via the scan engine.
pub fn find_ids_matching(
    index: &Index,
    file: &mut BlockFile,
    header: &Header,
    concurrency: usize,
    predicate: &Value,
) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    scan::iterate(index, file, header, concurrency, |record| {
        if query::matches(record, predicate) {
            if let Some(id) = record.get("_id").and_then(|v| v.as_str()) {
                ids.push(id.to_string());
            }
        }
        ScanControl::Continue
    })?;
    Ok(ids)
}

pub fn remove_matching(
    index: &mut Index,
    file: &mut BlockFile,
    header: &mut Header,
    max_cache_size: u64,
    concurrency: usize,
    predicate: &Value,
) -> Result<usize> {
    let ids = find_ids_matching(index, file, header, concurrency, predicate)?;
    remove_many(index, file, header, max_cache_size, &ids)
}

/// Apply an update document to one record, identified by id. Returns
/// `false` if the id doesn't exist.
pub fn update_one(
    index: &mut Index,
    file: &mut BlockFile,
    header: &mut Header,
    max_cache_size: u64,
    id: &str,
    update: &Value,
) -> Result<bool> {
    let Some(loc) = index.locations.get(id).copied() else {
        return Ok(false);
    };

    let mut record = read_record_at(index, file, header, loc.block)?;
    query::apply_update(&mut record, update)?;

    let needed = block::encoded_length(&record, header.compressed())?;
    if needed as u64 > header.block_size {
        resize(index, file, header, max_cache_size, block::next_pow2(needed))?;
    }

    // Re-fetch: a resize may have changed this id's cached/cache_index
    // fields (cache capacity shrinks as block_size grows) even though its
    // block index never moves.
    let loc = index.locations.get(id).copied().expect("id still present");
    write_record_at(index, file, header, loc.block, &record)?;
    Ok(true)
}

pub fn update_matching(
    index: &mut Index,
    file: &mut BlockFile,
    header: &mut Header,
    max_cache_size: u64,
    concurrency: usize,
    predicate: &Value,
    update: &Value,
) -> Result<usize> {
    let ids = find_ids_matching(index, file, header, concurrency, predicate)?;
    let mut updated = 0;
    for id in &ids {
        if update_one(index, file, header, max_cache_size, id, update)? {
            updated += 1;
        }
    }
    Ok(updated)
}

/// Change the store's block stride. Every record is re-encoded at the new
/// size; the move direction depends on which way the stride is changing,
/// because this happens in place against a single file with no scratch
/// copy:
///
/// - Growing: offsets only get larger, so a block's new position can land
///   past a block that hasn't been relocated yet. Moving tail-first (high
///   index to low) guarantees block `i`'s new offset never overlaps block
///   `j < i`'s still-unread old offset.
/// - Shrinking: offsets only get smaller, so the risk runs the other way.
///   Moving head-first (low index to high) guarantees block `i`'s new
///   offset never overlaps block `j > i`'s still-unread old offset.
pub fn resize(
    index: &mut Index,
    file: &mut BlockFile,
    header: &mut Header,
    max_cache_size: u64,
    new_block_size: u64,
) -> Result<()> {
    let old_block_size = header.block_size;
    if new_block_size == old_block_size {
        return Ok(());
    }
    let blocks = header.blocks;
    let growing = new_block_size > old_block_size;
    log::debug!(
        "resizing {} blocks from {old_block_size}B to {new_block_size}B ({})",
        blocks,
        if growing { "growing, tail-first" } else { "shrinking, head-first" }
    );

    if growing {
        file.truncate_to(blocks, new_block_size)?;
        for i in (0..blocks).rev() {
            relocate_block(file, header.compressed(), i, old_block_size, new_block_size)?;
        }
    } else {
        for i in 0..blocks {
            relocate_block(file, header.compressed(), i, old_block_size, new_block_size)?;
        }
        file.truncate_to(blocks, new_block_size)?;
    }

    header.block_size = new_block_size;
    rebuild_cache_mirror(index, file, header)?;
    rebalance_cache(index, file, header, max_cache_size)?;
    Ok(())
}

fn relocate_block(
    file: &mut BlockFile,
    compressed: bool,
    i: u64,
    old_block_size: u64,
    new_block_size: u64,
) -> Result<()> {
    let mut buf = vec![0u8; old_block_size as usize];
    file.read_block(i, old_block_size, &mut buf)?;
    let record = block::decode_block(&buf, i, compressed)?;
    let new_buf = block::encode_block(&record, new_block_size, compressed)?;
    file.write_block(i, new_block_size, &new_buf)?;
    Ok(())
}

/// After a resize the cache's contents are stale (still encoded against
/// the old stride's worth of capacity bookkeeping) even though the values
/// themselves didn't change; re-read the blocks it's supposed to mirror
/// straight from disk.
fn rebuild_cache_mirror(index: &mut Index, file: &mut BlockFile, header: &Header) -> Result<()> {
    let mirrored = index.cache.len().min(header.blocks as usize) as u64;
    for b in 0..mirrored {
        let mut buf = vec![0u8; header.block_size as usize];
        file.read_block(b, header.block_size, &mut buf)?;
        let record = block::decode_block(&buf, b, header.compressed())?;
        index.cache.set(b as usize, record);
    }
    Ok(())
}

/// Evict or promote cache entries so the cache length matches what
/// `max_cache_size / block_size` now allows. Eviction always drops the
/// tail slot (cache mirrors blocks `[0, cache.len())`); promotion always
/// loads the next block past the current tail.
fn rebalance_cache(
    index: &mut Index,
    file: &mut BlockFile,
    header: &Header,
    max_cache_size: u64,
) -> Result<()> {
    let capacity = Index::cache_capacity(max_cache_size, header.block_size);

    while index.cache.len() > capacity {
        let evicted_block = index.cache.len() as u64 - 1;
        index.cache.pop();
        index.cache_holes.remove(&evicted_block);
        if let Some(loc) = index
            .locations
            .values_mut()
            .find(|l| l.block == evicted_block)
        {
            loc.cached = false;
            loc.cache_index = -1;
        }
    }

    while (index.cache.len() as u64) < capacity && (index.cache.len() as u64) < header.blocks {
        let b = index.cache.len() as u64;
        if index.block_holes.contains(&b) {
            break;
        }
        let mut buf = vec![0u8; header.block_size as usize];
        file.read_block(b, header.block_size, &mut buf)?;
        let record = block::decode_block(&buf, b, header.compressed())?;
        let id = record.get("_id").and_then(|v| v.as_str()).map(str::to_string);
        let slot = index.cache.push(record) as i64;
        if let Some(id) = id {
            if let Some(loc) = index.locations.get_mut(&id) {
                loc.cached = true;
                loc.cache_index = slot;
            }
        }
    }

    Ok(())
}

/// Compact the block array: every hole in `block_holes` is either trimmed
/// straight off the tail (if it already sits there) or filled by moving
/// the current tail record into it, one hole at a time, shrinking
/// `header.blocks` by exactly one per iteration. This is the "safer"
/// one-to-one reformulation — each hole consumes at most one live record
/// moved from the tail, rather than compacting many holes against many
/// tail records in a single batched pass.
pub fn fill_holes(index: &mut Index, file: &mut BlockFile, header: &mut Header) -> Result<()> {
    if !index.block_holes.is_empty() {
        log::debug!("compacting {} hole(s) out of {} blocks", index.block_holes.len(), header.blocks);
    }
    loop {
        if header.blocks == 0 {
            break;
        }
        let tail = header.blocks - 1;

        if index.block_holes.remove(&tail) {
            if tail < index.cache.len() as u64 {
                index.cache.pop();
            }
            index.cache_holes.remove(&tail);
            header.blocks -= 1;
            continue;
        }

        let Some(&hole) = index.block_holes.iter().min() else {
            break;
        };

        let record = read_record_at(index, file, header, tail)?;
        write_record_at(index, file, header, hole, &record)?;
        index.block_holes.remove(&hole);
        index.cache_holes.remove(&hole);

        if let Some(id) = record.get("_id").and_then(|v| v.as_str()) {
            let cached = hole < index.cache.len() as u64;
            index.locations.insert(
                id.to_string(),
                ItemLocation {
                    block: hole,
                    cached,
                    cache_index: if cached { hole as i64 } else { -1 },
                },
            );
        }

        if tail < index.cache.len() as u64 {
            index.cache.pop();
        }
        header.blocks -= 1;
    }

    file.truncate_to(header.blocks, header.block_size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::NamedTempFile;

    fn fresh() -> (Index, BlockFile, Header) {
        let tmp = NamedTempFile::new().unwrap();
        (Index::new(), BlockFile::new(tmp.reopen().unwrap()), Header::new(64, false))
    }

    #[test]
    fn insert_assigns_id_and_caches_when_room() {
        let (mut index, mut file, mut header) = fresh();
        let id = insert_one(&mut index, &mut file, &mut header, 1024, json!({"x": 1})).unwrap();
        assert!(!id.is_empty());
        assert_eq!(header.blocks, 1);
        let loc = index.get(&id).unwrap();
        assert!(loc.cached);
        assert_eq!(index.cache.get(0)["x"], json!(1));
    }

    #[test]
    fn insert_with_existing_id_overwrites_in_place() {
        let (mut index, mut file, mut header) = fresh();
        let id = insert_one(&mut index, &mut file, &mut header, 4096, json!({"_id": "a", "v": 1})).unwrap();
        assert_eq!(header.blocks, 1);

        let id2 = insert_one(&mut index, &mut file, &mut header, 4096, json!({"_id": "a", "v": 2})).unwrap();
        assert_eq!(id, id2);
        assert_eq!(header.blocks, 1, "overwrite must not allocate a new block");

        let loc = *index.get(&id).unwrap();
        assert_eq!(loc.block, 0);
        let record = read_record_at(&index, &mut file, &header, loc.block).unwrap();
        assert_eq!(record["v"], json!(2));
    }

    #[test]
    fn insert_triggers_cold_resize_for_oversize_record() {
        let (mut index, mut file, mut header) = fresh();
        header.block_size = 8;
        let big = json!({"x": "this record is much longer than eight bytes"});
        let id = insert_one(&mut index, &mut file, &mut header, 4096, big.clone()).unwrap();
        assert!(header.block_size >= block::encoded_length(&big, false).unwrap() as u64);
        let loc = index.get(&id).unwrap();
        assert_eq!(loc.block, 0);
    }

    #[test]
    fn remove_compacts_and_shrinks_block_count() {
        let (mut index, mut file, mut header) = fresh();
        let mut ids = Vec::new();
        for i in 0..4 {
            ids.push(insert_one(&mut index, &mut file, &mut header, 4096, json!({"n": i})).unwrap());
        }
        assert_eq!(header.blocks, 4);

        remove_one(&mut index, &mut file, &mut header, 4096, &ids[1]).unwrap();
        assert_eq!(header.blocks, 3);
        assert!(index.get(&ids[1]).is_none());

        // the moved tail record (originally at block 3) should now be
        // reachable at the vacated slot.
        let moved_loc = *index.get(&ids[3]).unwrap();
        let record = read_record_at(&index, &mut file, &header, moved_loc.block).unwrap();
        assert_eq!(record["n"], json!(3));
    }

    #[test]
    fn update_applies_directive_and_can_grow_block_size() {
        let (mut index, mut file, mut header) = fresh();
        header.block_size = 32;
        let id = insert_one(&mut index, &mut file, &mut header, 4096, json!({"n": 1})).unwrap();

        let ok = update_one(
            &mut index,
            &mut file,
            &mut header,
            4096,
            &id,
            &json!({"$set": {"long_field": "this value is deliberately long enough to force a resize"}}),
        )
        .unwrap();
        assert!(ok);

        let loc = *index.get(&id).unwrap();
        let record = read_record_at(&index, &mut file, &header, loc.block).unwrap();
        assert_eq!(record["n"], json!(1));
        assert!(header.block_size > 32);
    }

    #[test]
    fn resize_growing_preserves_all_records() {
        let (mut index, mut file, mut header) = fresh();
        header.block_size = 32;
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(insert_one(&mut index, &mut file, &mut header, 4096, json!({"n": i})).unwrap());
        }
        resize(&mut index, &mut file, &mut header, 4096, 128).unwrap();
        for (i, id) in ids.iter().enumerate() {
            let loc = *index.get(id).unwrap();
            let record = read_record_at(&index, &mut file, &header, loc.block).unwrap();
            assert_eq!(record["n"], json!(i));
        }
    }

    #[test]
    fn remove_matching_deletes_by_query() {
        let (mut index, mut file, mut header) = fresh();
        header.block_size = 64;
        for i in 0..5 {
            insert_one(&mut index, &mut file, &mut header, 4096, json!({"n": i})).unwrap();
        }
        let removed = remove_matching(
            &mut index,
            &mut file,
            &mut header,
            4096,
            4,
            &json!({"n": {"$gte": 3}}),
        )
        .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(header.blocks, 3);
    }
}
