//! Database facade (C8) — the embedding surface. `Database` owns the block
//! file, header, and index, and is the only public type most callers ever
//! touch. Modeled directly on the teacher's `Archive` (`archive.rs`):
//! one struct wrapping the on-disk resource plus its in-memory bookkeeping,
//! opened with `load`, released with `close`.

use std::cmp::Ordering;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tempfile::{Builder as TempBuilder, TempPath};

use crate::block;
use crate::error::Result;
use crate::file::BlockFile;
use crate::header::Header;
use crate::index::{Index, ItemLocation};
use crate::mutate;
use crate::query;
use crate::scan::{self, ScanControl};

const DEFAULT_MAX_CACHE_SIZE: u64 = 128 * 1024 * 1024;
const DEFAULT_INITIAL_BLOCK_SIZE: u64 = 256;
const DEFAULT_CONCURRENCY: usize = 4;

/// Configuration for [`Database::load`]. Analogous to the teacher's
/// `PackOptions`.
#[derive(Debug, Clone)]
pub struct DbOptions {
    /// Whether new and rewritten blocks are SMAZ-compressed.
    pub compressed: bool,
    /// Copy this file to the working path before opening it — a cheap
    /// "open as a copy" facility.
    pub copy_of: Option<PathBuf>,
    /// Cache budget in bytes; cache capacity in records is
    /// `floor(max_cache_size / block_size)`.
    pub max_cache_size: u64,
    /// Block stride used only when creating a brand-new, empty file —
    /// not named in the format itself, since the first insert may grow it
    /// anyway.
    pub initial_block_size: u64,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            compressed: false,
            copy_of: None,
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            initial_block_size: DEFAULT_INITIAL_BLOCK_SIZE,
        }
    }
}

/// Options for [`Database::find`].
#[derive(Default)]
pub struct FindOptions<'a> {
    pub limit: Option<usize>,
    /// Two-argument comparator over full (pre-projection) records.
    pub sort: Option<&'a dyn Fn(&Value, &Value) -> Ordering>,
    pub projections: Option<&'a Map<String, Value>>,
    pub concurrency: Option<usize>,
}

/// Options for [`Database::remove`].
#[derive(Default)]
pub struct RemoveOptions<'a> {
    pub limit: Option<usize>,
    /// When set, removal delegates to a sorted `find` first (spec's
    /// "sorted path") instead of stopping the first time the unsorted scan
    /// reaches `limit` matches.
    pub sort: Option<&'a dyn Fn(&Value, &Value) -> Ordering>,
    pub concurrency: Option<usize>,
}

/// Options for [`Database::update`].
#[derive(Default)]
pub struct UpdateOptions {
    pub limit: Option<usize>,
    pub concurrency: Option<usize>,
}

/// An open, embedded document store.
pub struct Database {
    file: BlockFile,
    header: Header,
    index: Index,
    options: DbOptions,
    path: PathBuf,
    _temp_guard: Option<TempPath>,
}

impl Database {
    /// Open (or create) a database at `filename`, or at a unique temporary
    /// path when `filename` is `None` — the path is then removed when the
    /// returned `Database` is dropped, satisfying "temp files are removed
    /// on process exit" for the common case of a process that doesn't
    /// crash.
    pub fn load(filename: Option<&Path>, options: DbOptions) -> Result<Self> {
        let (path, temp_guard) = match filename {
            Some(p) => (p.to_path_buf(), None),
            None => {
                let temp = TempBuilder::new().prefix("jinn-").tempfile()?;
                let (_, temp_path) = temp.into_parts();
                (temp_path.to_path_buf(), Some(temp_path))
            }
        };

        if let Some(src) = &options.copy_of {
            std::fs::copy(src, &path)?;
        }

        let is_new = !path.exists() || std::fs::metadata(&path)?.len() == 0;
        let raw = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let mut file = BlockFile::new(raw);

        let header = if is_new {
            log::debug!("{} is missing or empty, initializing a fresh header", path.display());
            let h = Header::new(options.initial_block_size, options.compressed);
            file.write_header(&h)?;
            file.truncate_to(0, h.block_size)?;
            h
        } else {
            let h = file.read_header()?;
            log::debug!(
                "loaded {} ({} blocks at {}B, compressed={})",
                path.display(),
                h.blocks,
                h.block_size,
                h.compressed()
            );
            h
        };

        let index = build_index(&mut file, &header, options.max_cache_size)?;

        Ok(Self {
            file,
            header,
            index,
            options,
            path,
            _temp_guard: temp_guard,
        })
    }

    /// Persist the header and drop the in-memory index. The file
    /// descriptor itself is released when `Database` is dropped.
    pub fn close(&mut self) -> Result<()> {
        self.file.write_header(&self.header)?;
        self.file.sync()?;
        self.index = Index::new();
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn block_size(&self) -> u64 {
        self.header.block_size
    }

    pub fn blocks(&self) -> u64 {
        self.header.blocks
    }

    pub fn compressed(&self) -> bool {
        self.header.compressed()
    }

    pub fn cache_len(&self) -> usize {
        self.index.cache.len()
    }

    pub fn max_cache_size(&self) -> u64 {
        self.options.max_cache_size
    }

    pub fn set_max_cache_size(&mut self, bytes: u64) {
        self.options.max_cache_size = bytes;
    }

    pub fn insert(&mut self, record: Value) -> Result<String> {
        mutate::insert_one(
            &mut self.index,
            &mut self.file,
            &mut self.header,
            self.options.max_cache_size,
            record,
        )
    }

    pub fn insert_many(&mut self, records: Vec<Value>) -> Result<Vec<String>> {
        mutate::insert_many(
            &mut self.index,
            &mut self.file,
            &mut self.header,
            self.options.max_cache_size,
            records,
        )
    }

    /// Visit every live record, cache first then out-of-core.
    pub fn iterate<F>(&mut self, concurrency: usize, handler: F) -> Result<bool>
    where
        F: FnMut(&Value) -> ScanControl,
    {
        scan::iterate(&self.index, &mut self.file, &self.header, concurrency, handler)
    }

    pub fn find(&mut self, query: &Value, options: &FindOptions) -> Result<Vec<Value>> {
        let normalized = normalize_query(query);
        let concurrency = options.concurrency.unwrap_or(DEFAULT_CONCURRENCY);

        if let Some(id) = single_id_query(&normalized) {
            let record = match self.index.get(id) {
                Some(loc) => {
                    let loc = *loc;
                    Some(mutate::read_record_at(&self.index, &mut self.file, &self.header, loc.block)?)
                }
                None => None,
            };
            return Ok(record
                .into_iter()
                .map(|r| apply_projection(&r, options.projections))
                .collect());
        }

        let mut results: Vec<Value> = Vec::new();
        scan::iterate(&self.index, &mut self.file, &self.header, concurrency, |record| {
            if !query::matches(record, &normalized) {
                return ScanControl::Continue;
            }
            let projected = apply_projection(record, options.projections);

            if let (Some(cmp), Some(limit)) = (options.sort, options.limit) {
                results.push(projected);
                if results.len() > limit {
                    results.sort_by(|a, b| cmp(a, b));
                    results.pop();
                }
                return ScanControl::Continue;
            }

            results.push(projected);
            if options.sort.is_none() {
                if let Some(limit) = options.limit {
                    if results.len() >= limit {
                        return ScanControl::Stop;
                    }
                }
            }
            ScanControl::Continue
        })?;

        if let Some(cmp) = options.sort {
            results.sort_by(|a, b| cmp(a, b));
        }
        Ok(results)
    }

    pub fn remove(&mut self, query: &Value, options: &RemoveOptions) -> Result<u64> {
        let normalized = normalize_query(query);
        let concurrency = options.concurrency.unwrap_or(DEFAULT_CONCURRENCY);

        let ids: Vec<String> = if let Some(cmp) = options.sort {
            let find_opts = FindOptions {
                limit: options.limit,
                sort: Some(cmp),
                projections: None,
                concurrency: Some(concurrency),
            };
            self.find(&normalized, &find_opts)?
                .iter()
                .filter_map(|r| r.get("_id").and_then(|v| v.as_str()).map(str::to_string))
                .collect()
        } else {
            let mut ids = Vec::new();
            scan::iterate(&self.index, &mut self.file, &self.header, concurrency, |record| {
                if query::matches(record, &normalized) {
                    if let Some(id) = record.get("_id").and_then(|v| v.as_str()) {
                        ids.push(id.to_string());
                    }
                    if let Some(limit) = options.limit {
                        if ids.len() >= limit {
                            return ScanControl::Stop;
                        }
                    }
                }
                ScanControl::Continue
            })?;
            ids
        };

        let removed = mutate::remove_many(
            &mut self.index,
            &mut self.file,
            &mut self.header,
            self.options.max_cache_size,
            &ids,
        )?;
        Ok(removed as u64)
    }

    pub fn update(&mut self, query: &Value, update: &Value, options: &UpdateOptions) -> Result<u64> {
        let normalized = normalize_query(query);
        let concurrency = options.concurrency.unwrap_or(DEFAULT_CONCURRENCY);

        let mut ids = mutate::find_ids_matching(&self.index, &mut self.file, &self.header, concurrency, &normalized)?;
        if let Some(limit) = options.limit {
            ids.truncate(limit);
        }

        let mut count = 0u64;
        for id in &ids {
            if mutate::update_one(
                &mut self.index,
                &mut self.file,
                &mut self.header,
                self.options.max_cache_size,
                id,
                update,
            )? {
                count += 1;
            }
        }
        Ok(count)
    }

    pub fn resize(&mut self, new_block_size: u64) -> Result<()> {
        mutate::resize(
            &mut self.index,
            &mut self.file,
            &mut self.header,
            self.options.max_cache_size,
            new_block_size,
        )
    }
}

/// A query of `{_id: "literal"}` (no operators, no other keys) takes the
/// fast path: a single index lookup plus at most one block read, instead
/// of a full scan.
fn single_id_query(query: &Value) -> Option<&str> {
    let obj = query.as_object()?;
    if obj.len() != 1 {
        return None;
    }
    obj.get("_id")?.as_str()
}

/// `find`/`update`/`remove` accept either a single query object or an array
/// of queries that OR-combine.
fn normalize_query(query: &Value) -> Value {
    match query.as_array() {
        Some(queries) => serde_json::json!({ "$or": queries }),
        None => query.clone(),
    }
}

fn apply_projection(record: &Value, projections: Option<&Map<String, Value>>) -> Value {
    let Some(projections) = projections else {
        return record.clone();
    };
    let Some(obj) = record.as_object() else {
        return record.clone();
    };

    let mut out = Map::new();
    for (k, v) in obj {
        let include = if k == "_id" {
            projections.get("_id").and_then(|p| p.as_bool()).unwrap_or(true)
        } else {
            projections.get(k).and_then(|p| p.as_bool()).unwrap_or(false)
        };
        if include {
            out.insert(k.clone(), v.clone());
        }
    }
    Value::Object(out)
}

/// Rebuild the in-memory `id -> location` index (and its cache prefix) by
/// reading every block once at open time. Out-of-core blocks are decoded
/// here too — only their content is discarded afterward — since the index
/// needs every record's `_id` regardless of whether it stays resident.
fn build_index(file: &mut BlockFile, header: &Header, max_cache_size: u64) -> Result<Index> {
    let mut index = Index::new();
    let capacity = Index::cache_capacity(max_cache_size, header.block_size.max(1));
    let mut buf = vec![0u8; header.block_size as usize];

    for b in 0..header.blocks {
        file.read_block(b, header.block_size, &mut buf)?;
        let record = block::decode_block(&buf, b, header.compressed())?;
        let id = record
            .get("_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let cached = (b as usize) < capacity;
        let cache_index = if cached {
            index.cache.push(record) as i64
        } else {
            -1
        };

        index
            .locations
            .insert(id, ItemLocation { block: b, cached, cache_index });
    }

    Ok(index)
}
