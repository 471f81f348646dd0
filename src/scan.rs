//! Scan engine (C6) — visits every live record, cache first, then
//! out-of-core, in ascending block-index order.
//!
//! "Concurrency" here is a bounded read-ahead window, not real threads: the
//! engine has a single owner and a single file handle, so the only thing a
//! `concurrency` knob can buy is overlapping the next block's read with the
//! current block's handler. The window preserves block-index order even
//! though it reads ahead of what it has delivered.

use std::collections::VecDeque;
use serde_json::Value;

use crate::block;
use crate::error::Result;
use crate::file::BlockFile;
use crate::header::Header;
use crate::index::Index;

/// Returned by the scan callback: keep going, or stop early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanControl {
    Continue,
    Stop,
}

/// Visit every live record. Returns `Ok(true)` if the scan ran to
/// completion, `Ok(false)` if `handler` returned [`ScanControl::Stop`].
pub fn iterate<F>(
    index: &Index,
    file: &mut BlockFile,
    header: &Header,
    concurrency: usize,
    mut handler: F,
) -> Result<bool>
where
    F: FnMut(&Value) -> ScanControl,
{
    for i in 0..index.cache.len() {
        if index.cache_holes.contains(&(i as u64)) {
            continue;
        }
        if handler(index.cache.get(i)) == ScanControl::Stop {
            return Ok(false);
        }
    }

    if header.blocks as usize > index.cache.len() {
        return iterate_out_of_core(index, file, header, index.cache.len() as u64, concurrency, handler);
    }

    Ok(true)
}

/// Visit blocks `[start_block, header.blocks)` that aren't holes, reading up
/// to `concurrency` blocks ahead of the one currently being delivered.
fn iterate_out_of_core<F>(
    index: &Index,
    file: &mut BlockFile,
    header: &Header,
    start_block: u64,
    concurrency: usize,
    mut handler: F,
) -> Result<bool>
where
    F: FnMut(&Value) -> ScanControl,
{
    let concurrency = concurrency.max(1);
    let mut buf = vec![0u8; header.block_size as usize];
    let mut window: VecDeque<Value> = VecDeque::with_capacity(concurrency);
    let mut read_cursor = start_block;

    loop {
        while window.len() < concurrency && read_cursor < header.blocks {
            let b = read_cursor;
            read_cursor += 1;
            if index.block_holes.contains(&b) {
                continue;
            }
            file.read_block(b, header.block_size, &mut buf)?;
            let record = block::decode_block(&buf, b, header.compressed())?;
            window.push_back(record);
        }

        let Some(record) = window.pop_front() else {
            break;
        };
        if handler(&record) == ScanControl::Stop {
            return Ok(false);
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::NamedTempFile;

    fn write_store(records: &[Value], block_size: u64, cached: usize) -> (BlockFile, Header, Index) {
        let tmp = NamedTempFile::new().unwrap();
        let mut file = BlockFile::new(tmp.reopen().unwrap());
        let mut header = Header::new(block_size, false);
        header.blocks = records.len() as u64;
        file.truncate_to(header.blocks, block_size).unwrap();

        let mut index = Index::new();
        for (i, rec) in records.iter().enumerate() {
            let buf = block::encode_block(rec, block_size, false).unwrap();
            file.write_block(i as u64, block_size, &buf).unwrap();
            if i < cached {
                let slot = index.cache.push(rec.clone());
                index.locations.insert(
                    rec["_id"].as_str().unwrap().to_string(),
                    crate::index::ItemLocation {
                        block: i as u64,
                        cached: true,
                        cache_index: slot as i64,
                    },
                );
            } else {
                index.locations.insert(
                    rec["_id"].as_str().unwrap().to_string(),
                    crate::index::ItemLocation::on_disk(i as u64),
                );
            }
        }
        (file, header, index)
    }

    #[test]
    fn visits_cache_then_out_of_core_in_order() {
        let records: Vec<Value> = (0..5)
            .map(|i| json!({"_id": i.to_string(), "n": i}))
            .collect();
        let (mut file, header, index) = write_store(&records, 64, 2);

        let mut seen = Vec::new();
        let completed = iterate(&index, &mut file, &header, 2, |rec| {
            seen.push(rec["n"].as_i64().unwrap());
            ScanControl::Continue
        })
        .unwrap();

        assert!(completed);
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn stopping_early_reports_incomplete() {
        let records: Vec<Value> = (0..5)
            .map(|i| json!({"_id": i.to_string(), "n": i}))
            .collect();
        let (mut file, header, index) = write_store(&records, 64, 1);

        let mut seen = Vec::new();
        let completed = iterate(&index, &mut file, &header, 2, |rec| {
            seen.push(rec["n"].as_i64().unwrap());
            if seen.len() == 3 {
                ScanControl::Stop
            } else {
                ScanControl::Continue
            }
        })
        .unwrap();

        assert!(!completed);
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn skips_block_holes() {
        let records: Vec<Value> = (0..4)
            .map(|i| json!({"_id": i.to_string(), "n": i}))
            .collect();
        let (mut file, header, mut index) = write_store(&records, 64, 0);
        index.block_holes.insert(2);

        let mut seen = Vec::new();
        iterate(&index, &mut file, &header, 4, |rec| {
            seen.push(rec["n"].as_i64().unwrap());
            ScanControl::Continue
        })
        .unwrap();

        assert_eq!(seen, vec![0, 1, 3]);
    }
}
