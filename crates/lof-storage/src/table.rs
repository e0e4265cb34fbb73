//! LOF record table: per-object running sums stored in the paged B+Tree.

use crate::btree::BTreeIndex;
use crate::disk::{DiskManager, DiskManagerConfig};
use crate::memory::MemoryPageStore;
use lof_buffer::PageCacheStats;
use lof_common::config::{LOF_SCALAR_SIZE, LofTableConfig};
use lof_common::page::PageId;
use lof_common::store::PageStore;
use lof_common::{LofError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Rule line framing the export header.
pub const EXPORT_RULE: &str =
    "################################################################################";

/// Column line of the export header.
pub const EXPORT_COLUMNS: &str = "### object-ID sum1 sum2_1 ... sum2_k";

/// A table guarded by one table-wide mutex for use from several threads.
pub type SharedLofTable<S = MemoryPageStore> = Arc<Mutex<LofTable<S>>>;

/// Record of one object: a running sum and `k` partial sums.
///
/// Stored as `8 + 8k` bytes: `sum1` then `sum2[0..k]`, little-endian f64.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LofEntry {
    pub sum1: f64,
    pub sum2: Vec<f64>,
}

impl LofEntry {
    /// Creates an entry.
    pub fn new(sum1: f64, sum2: Vec<f64>) -> Self {
        Self { sum1, sum2 }
    }

    /// Creates an entry with `k` partial sums, all zero.
    pub fn zeroed(k: usize) -> Self {
        Self {
            sum1: 0.0,
            sum2: vec![0.0; k],
        }
    }

    /// Number of partial sums.
    pub fn k(&self) -> usize {
        self.sum2.len()
    }

    /// Encoded width in bytes.
    pub fn encoded_len(&self) -> usize {
        LOF_SCALAR_SIZE * (1 + self.sum2.len())
    }

    /// Writes the entry into `buf`, which must be `encoded_len()` bytes.
    fn encode_into(&self, buf: &mut [u8]) {
        write_f64(buf, 0, self.sum1);
        for (i, value) in self.sum2.iter().enumerate() {
            write_f64(buf, (i + 1) * LOF_SCALAR_SIZE, *value);
        }
    }

    /// Reads an entry from a stored record.
    fn decode(data: &[u8]) -> Self {
        let k = data.len() / LOF_SCALAR_SIZE - 1;
        Self {
            sum1: read_f64(data, 0),
            sum2: (0..k)
                .map(|i| read_f64(data, (i + 1) * LOF_SCALAR_SIZE))
                .collect(),
        }
    }
}

impl fmt::Display for LofEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sum1)?;
        for value in &self.sum2 {
            write!(f, " {}", value)?;
        }
        Ok(())
    }
}

/// Handle for updating a stored entry in place.
///
/// Writes go straight into the cached page, which is already marked
/// dirty. The handle borrows the table, so no other table call can run
/// while it is alive. Indexing past `sum2_len()` panics like slice indexing.
#[derive(Debug)]
pub struct LofEntryMut<'a> {
    id: i32,
    page_id: PageId,
    slot: usize,
    data: &'a mut [u8],
}

impl LofEntryMut<'_> {
    /// Object id.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Leaf page holding the entry.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Position within the leaf.
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn sum1(&self) -> f64 {
        read_f64(self.data, 0)
    }

    pub fn set_sum1(&mut self, value: f64) {
        write_f64(self.data, 0, value);
    }

    /// Number of partial sums.
    pub fn sum2_len(&self) -> usize {
        self.data.len() / LOF_SCALAR_SIZE - 1
    }

    /// Returns partial sum `i` (0-based).
    pub fn sum2(&self, i: usize) -> f64 {
        read_f64(self.data, self.sum2_offset(i))
    }

    pub fn set_sum2(&mut self, i: usize, value: f64) {
        let offset = self.sum2_offset(i);
        write_f64(self.data, offset, value);
    }

    /// Adds `delta` to partial sum `i`.
    pub fn add_sum2(&mut self, i: usize, delta: f64) {
        let value = self.sum2(i) + delta;
        self.set_sum2(i, value);
    }

    /// Copies the current values out.
    pub fn to_entry(&self) -> LofEntry {
        LofEntry::decode(self.data)
    }

    fn sum2_offset(&self, i: usize) -> usize {
        assert!(
            i < self.sum2_len(),
            "sum2 index {} out of range for k = {}",
            i,
            self.sum2_len()
        );
        (i + 1) * LOF_SCALAR_SIZE
    }
}

/// Table of LOF entries keyed by 32-bit object id.
///
/// Entries are inserted once per id, then read and updated in place.
/// Memory use is bounded by the configured cache size.
pub struct LofTable<S: PageStore = MemoryPageStore> {
    /// Index holding the encoded entries.
    index: BTreeIndex<S>,
    /// Table configuration.
    config: LofTableConfig,
    /// Ids inserted so far, kept only when `verify_inserts` is set.
    inserted: Vec<i32>,
}

impl LofTable<MemoryPageStore> {
    /// Creates an in-memory table with default flags.
    pub fn new(page_size: usize, cache_size: usize, k: usize) -> Result<Self> {
        Self::with_config(LofTableConfig::new(page_size, cache_size, k))
    }

    /// Creates an in-memory table from a full configuration.
    pub fn with_config(config: LofTableConfig) -> Result<Self> {
        Self::with_store(MemoryPageStore::new(config.page_size), config)
    }
}

impl LofTable<DiskManager> {
    /// Creates a table backed by the data file at `path`, truncating any
    /// existing file.
    pub fn create(path: impl AsRef<Path>, config: LofTableConfig) -> Result<Self> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                LofError::ConfigError(format!("{} does not name a data file", path.display()))
            })?;
        let data_dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => Path::new(".").to_path_buf(),
        };

        let disk = DiskManager::new(DiskManagerConfig {
            data_dir,
            file_name: file_name.to_string(),
            page_size: config.page_size,
            fsync_enabled: false,
        })?;

        Self::with_store(disk, config)
    }
}

impl<S: PageStore> LofTable<S> {
    /// Creates a table over an empty page store.
    pub fn with_store(store: S, config: LofTableConfig) -> Result<Self> {
        let mut index = BTreeIndex::create(
            store,
            config.cache_config(),
            config.key_size(),
            config.value_size(),
        )?;
        index.set_verify_structure(config.verify_structure);

        debug!(
            page_size = config.page_size,
            cache_size = config.cache_size,
            k = config.k,
            frames = index.cache().num_frames(),
            "created lof table"
        );

        Ok(Self {
            index,
            config,
            inserted: Vec::new(),
        })
    }

    /// Number of partial sums per entry.
    pub fn k(&self) -> usize {
        self.config.k
    }

    /// Returns the table configuration.
    pub fn config(&self) -> &LofTableConfig {
        &self.config
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Returns the underlying index.
    pub fn index(&self) -> &BTreeIndex<S> {
        &self.index
    }

    /// Inserts the entry for `id`. Fails with `DuplicateKey` if present.
    pub fn insert(&mut self, id: i32, entry: &LofEntry) -> Result<()> {
        let value_size = self.config.value_size();
        if entry.encoded_len() != value_size {
            return Err(LofError::ValueSizeMismatch {
                expected: value_size,
                actual: entry.encoded_len(),
            });
        }

        let mut record = vec![0u8; value_size];
        entry.encode_into(&mut record);
        self.index.insert(i64::from(id), &record)?;

        if self.config.verify_inserts {
            self.inserted.push(id);
            self.verify_inserted(id)?;
        }
        Ok(())
    }

    /// Returns a copy of the entry for `id`, or `None` if absent.
    pub fn get(&mut self, id: i32) -> Result<Option<LofEntry>> {
        match self.index.search(i64::from(id))? {
            Some(data) => Ok(Some(LofEntry::decode(data))),
            None => {
                if self.config.dump_on_miss {
                    debug!(
                        id,
                        structure = %self.index.dump_structure()?,
                        "lof entry missing"
                    );
                }
                Ok(None)
            }
        }
    }

    /// Returns an update handle for `id`, or `None` if absent.
    pub fn get_for_update(&mut self, id: i32) -> Result<Option<LofEntryMut<'_>>> {
        Ok(self.index.search_for_update(i64::from(id))?.map(|record| {
            let page_id = record.page_id();
            let slot = record.slot();
            LofEntryMut {
                id,
                page_id,
                slot,
                data: record.into_data(),
            }
        }))
    }

    /// Writes the export header and one line per entry in id order, each
    /// entry rendered with `Display`.
    pub fn write<W: Write>(&self, sink: &mut W) -> Result<()> {
        self.write_with(sink, |entry| entry.to_string())
    }

    /// Like `write`, with `printer` rendering each entry.
    pub fn write_with<W, P>(&self, sink: &mut W, mut printer: P) -> Result<()>
    where
        W: Write,
        P: FnMut(&LofEntry) -> String,
    {
        writeln!(sink, "{}", EXPORT_RULE)?;
        writeln!(sink, "{}", EXPORT_COLUMNS)?;
        writeln!(sink, "{}", EXPORT_RULE)?;

        self.index.for_each(|id, data| {
            let entry = LofEntry::decode(data);
            writeln!(sink, "{} {}", id, printer(&entry))?;
            Ok(())
        })?;

        sink.flush()?;
        Ok(())
    }

    /// Renders the index structure for diagnostics.
    pub fn dump_structure(&self) -> Result<String> {
        self.index.dump_structure()
    }

    /// Verifies the index structure.
    pub fn check_invariants(&self) -> Result<()> {
        self.index.check_invariants()
    }

    /// Writes back all dirty pages and syncs the store.
    pub fn flush(&mut self) -> Result<()> {
        self.index.flush()
    }

    /// Returns page cache statistics.
    pub fn cache_stats(&self) -> PageCacheStats {
        self.index.cache_stats()
    }

    /// Wraps the table in a mutex for shared use.
    pub fn into_shared(self) -> SharedLofTable<S> {
        Arc::new(Mutex::new(self))
    }

    /// Re-searches every id inserted so far.
    fn verify_inserted(&mut self, last: i32) -> Result<()> {
        for id in &self.inserted {
            if self.index.search(i64::from(*id))?.is_none() {
                return Err(LofError::InvariantViolation(format!(
                    "id {} missing after inserting id {}",
                    id, last
                )));
            }
        }
        Ok(())
    }
}

fn read_f64(data: &[u8], offset: usize) -> f64 {
    let mut bytes = [0u8; LOF_SCALAR_SIZE];
    bytes.copy_from_slice(&data[offset..offset + LOF_SCALAR_SIZE]);
    f64::from_le_bytes(bytes)
}

fn write_f64(data: &mut [u8], offset: usize, value: f64) {
    data[offset..offset + LOF_SCALAR_SIZE].copy_from_slice(&value.to_le_bytes());
}
