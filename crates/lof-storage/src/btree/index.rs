//! Page-based B+Tree index over fixed-width integer keys and records.

use super::page::{InternalNode, LeafNode, Node, NodeCodec};
use super::types::IndexLayout;
use lof_buffer::{PageCache, PageCacheStats};
use lof_common::config::PageCacheConfig;
use lof_common::page::PageId;
use lof_common::store::PageStore;
use lof_common::{LofError, Result};
use std::fmt;
use tracing::{debug, trace, warn};

/// Mutable view of one record inside a cached leaf.
///
/// The owning page is already marked dirty; writes through `data_mut`
/// reach the store on eviction or flush.
#[derive(Debug)]
pub struct RecordMut<'a> {
    page_id: PageId,
    slot: usize,
    key: i64,
    data: &'a mut [u8],
}

impl<'a> RecordMut<'a> {
    /// Leaf page holding the record.
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Position of the record within its leaf.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// The record's key.
    pub fn key(&self) -> i64 {
        self.key
    }

    /// Record bytes.
    pub fn data(&self) -> &[u8] {
        self.data
    }

    /// Record bytes for in-place modification.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.data
    }

    /// Consumes the view, returning the record bytes.
    pub fn into_data(self) -> &'a mut [u8] {
        self.data
    }
}

/// B+Tree whose nodes live in pages obtained through a bounded page cache.
///
/// Records are stored only in leaves. Internal node child `i` holds keys
/// in `[keys[i - 1], keys[i])`. A fresh tree is a single empty root leaf.
pub struct BTreeIndex<S: PageStore> {
    /// Cache of decoded nodes.
    cache: PageCache<S, NodeCodec>,
    /// Key and record widths.
    layout: IndexLayout,
    /// Root page.
    root: PageId,
    /// Tree height (1 = root is a leaf).
    height: usize,
    /// Number of records.
    len: usize,
    /// Run `check_invariants` after every insert.
    verify_structure: bool,
    /// Set when a split failed after rewriting reachable pages.
    poisoned: bool,
}

impl<S: PageStore> BTreeIndex<S> {
    /// Creates an empty index on `store`, allocating its root leaf.
    pub fn create(
        store: S,
        cache_config: PageCacheConfig,
        key_size: usize,
        value_size: usize,
    ) -> Result<Self> {
        cache_config.validate()?;
        let layout = IndexLayout::new(key_size, value_size, cache_config.page_size)?;
        let mut cache = PageCache::new(cache_config, store, NodeCodec::new(layout))?;

        let root = cache.new_page(Node::Leaf(LeafNode::new(value_size)))?;

        debug!(
            root = %root,
            key_size,
            value_size,
            leaf_capacity = layout.max_leaf_entries(),
            internal_capacity = layout.max_internal_keys(),
            "created btree index"
        );

        Ok(Self {
            cache,
            layout,
            root,
            height: 1,
            len: 0,
            verify_structure: false,
            poisoned: false,
        })
    }

    /// Enables or disables the structural check after each insert.
    pub fn set_verify_structure(&mut self, enabled: bool) {
        self.verify_structure = enabled;
    }

    /// Returns the root page id.
    pub fn root_page_id(&self) -> PageId {
        self.root
    }

    /// Returns the tree height (1 = root is a leaf).
    pub fn height(&self) -> usize {
        self.height
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the index holds no records.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true once a failed split has left the tree unusable.
    ///
    /// Every later insert, lookup, traversal and check fails with
    /// `InvariantViolation`.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Returns the key and record widths.
    pub fn layout(&self) -> &IndexLayout {
        &self.layout
    }

    /// Returns the page cache.
    pub fn cache(&self) -> &PageCache<S, NodeCodec> {
        &self.cache
    }

    /// Returns page cache statistics.
    pub fn cache_stats(&self) -> PageCacheStats {
        self.cache.stats()
    }

    /// Inserts a record. Fails with `DuplicateKey` if the key exists, leaving
    /// the stored record unchanged.
    pub fn insert(&mut self, key: i64, record: &[u8]) -> Result<()> {
        self.check_usable()?;
        self.layout.check_key(key)?;
        if record.len() != self.layout.value_size() {
            return Err(LofError::ValueSizeMismatch {
                expected: self.layout.value_size(),
                actual: record.len(),
            });
        }

        let (leaf_id, path) = self.find_leaf_path(key)?;

        let leaf = self.cache.get(leaf_id)?.as_leaf(leaf_id)?;
        let pos = match leaf.search(key) {
            Ok(_) => return Err(LofError::DuplicateKey { key }),
            Err(pos) => pos,
        };

        if leaf.len() < self.layout.max_leaf_entries() {
            self.cache
                .get_mut(leaf_id)?
                .as_leaf_mut(leaf_id)?
                .insert_at(pos, key, record);
        } else {
            let mut leaf = leaf.clone();
            leaf.insert_at(pos, key, record);
            self.insert_with_split(leaf_id, leaf, path)?;
        }

        self.len += 1;

        if self.verify_structure {
            self.check_invariants()?;
        }
        Ok(())
    }

    /// Looks up a record. Marks nothing dirty.
    ///
    /// A key that does not fit the key width is never stored, so it yields `None`.
    pub fn search(&mut self, key: i64) -> Result<Option<&[u8]>> {
        self.check_usable()?;
        if !self.layout.key_fits(key) {
            return Ok(None);
        }

        let leaf_id = self.find_leaf(key)?;
        let leaf = self.cache.get(leaf_id)?.as_leaf(leaf_id)?;
        Ok(leaf.search(key).ok().map(|idx| leaf.value(idx)))
    }

    /// Looks up a record for in-place modification.
    ///
    /// The leaf is marked dirty only when the key is present.
    pub fn search_for_update(&mut self, key: i64) -> Result<Option<RecordMut<'_>>> {
        self.check_usable()?;
        if !self.layout.key_fits(key) {
            return Ok(None);
        }

        let leaf_id = self.find_leaf(key)?;
        let slot = match self.cache.get(leaf_id)?.as_leaf(leaf_id)?.search(key) {
            Ok(slot) => slot,
            Err(_) => return Ok(None),
        };

        let leaf = self.cache.get_mut(leaf_id)?.as_leaf_mut(leaf_id)?;
        Ok(Some(RecordMut {
            page_id: leaf_id,
            slot,
            key,
            data: leaf.value_mut(slot),
        }))
    }

    /// Visits every record in key order.
    ///
    /// Pages are read through `peek`, so cache state is left as is.
    pub fn for_each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(i64, &[u8]) -> Result<()>,
    {
        self.check_usable()?;
        self.visit(self.root, &mut f)
    }

    /// Renders the tree as indented text, one line per node with separators
    /// between children. Does not change page or cache state.
    pub fn dump_structure(&self) -> Result<String> {
        let mut dump = StructureDump {
            height: self.height,
            root: self.root,
            records: self.len,
            lines: Vec::new(),
        };
        self.collect_dump(self.root, 0, &mut dump.lines)?;
        Ok(dump.to_string())
    }

    /// Verifies the tree: sorted keys, keys inside the bounds set by the
    /// parent, levels decreasing by one down to leaves at level 0, no empty
    /// nodes besides an empty root leaf, and the record count.
    pub fn check_invariants(&self) -> Result<()> {
        self.check_usable()?;
        let root_level = self.cache.peek(self.root)?.level();
        if root_level as usize + 1 != self.height {
            return Err(LofError::InvariantViolation(format!(
                "root {} at level {} but height is {}",
                self.root, root_level, self.height
            )));
        }

        let count = self.check_subtree(self.root, root_level, None, None)?;
        if count != self.len {
            return Err(LofError::InvariantViolation(format!(
                "tree holds {} records, expected {}",
                count, self.len
            )));
        }
        Ok(())
    }

    /// Writes back all dirty pages and syncs the store.
    pub fn flush(&mut self) -> Result<()> {
        self.cache.sync()
    }

    /// Descends to the leaf that may hold `key`.
    fn find_leaf(&mut self, key: i64) -> Result<PageId> {
        let mut current = self.root;
        for _ in 1..self.height {
            let node = self.cache.get(current)?.as_internal(current)?;
            let child = node.child(node.find_child_index(key));
            trace!(page = %current, child = %child, key, "descend");
            current = child;
        }
        Ok(current)
    }

    /// Descends to the leaf for `key`, recording each internal page and the
    /// child index taken.
    fn find_leaf_path(&mut self, key: i64) -> Result<(PageId, Vec<(PageId, usize)>)> {
        let mut path = Vec::with_capacity(self.height);
        let mut current = self.root;
        for _ in 1..self.height {
            let node = self.cache.get(current)?.as_internal(current)?;
            let idx = node.find_child_index(key);
            let child = node.child(idx);
            trace!(page = %current, child = %child, key, "descend");
            path.push((current, idx));
            current = child;
        }
        Ok((current, path))
    }

    /// Splits `leaf`, which holds one entry over capacity, and as many
    /// ancestors on `path` as needed.
    ///
    /// Siblings and a new root are allocated before any reachable page
    /// changes, so a failure up to that point leaves the tree as it was
    /// (the allocated pages stay unreachable). Existing pages are then
    /// rewritten from the top down; a failure there poisons the index.
    fn insert_with_split(
        &mut self,
        leaf_id: PageId,
        mut leaf: LeafNode,
        mut path: Vec<(PageId, usize)>,
    ) -> Result<()> {
        let (mut separator, right) = leaf.split();
        let mut right_id = self.cache.new_page(Node::Leaf(right))?;
        debug!(
            page = %leaf_id,
            sibling = %right_id,
            separator,
            "split leaf"
        );

        // Bottom-up list of new contents for existing pages
        let mut rewrites = vec![(leaf_id, Node::Leaf(leaf))];
        let mut absorbed = false;

        while let Some((parent_id, child_idx)) = path.pop() {
            let mut parent = self.cache.get(parent_id)?.as_internal(parent_id)?.clone();
            parent.insert_at(child_idx, separator, right_id);

            if parent.len() <= self.layout.max_internal_keys() {
                rewrites.push((parent_id, Node::Internal(parent)));
                absorbed = true;
                break;
            }

            let (promoted, right) = parent.split();
            let sibling = self.cache.new_page(Node::Internal(right))?;
            debug!(
                page = %parent_id,
                sibling = %sibling,
                separator = promoted,
                level = parent.level(),
                "split internal node"
            );

            rewrites.push((parent_id, Node::Internal(parent)));
            separator = promoted;
            right_id = sibling;
        }

        if !absorbed {
            let level = self.height as u16;
            let root = InternalNode::new(level, self.root, separator, right_id);
            let new_root = self.cache.new_page(Node::Internal(root))?;

            self.root = new_root;
            self.height += 1;
            debug!(root = %new_root, height = self.height, "grew root");
        }

        for (page_id, node) in rewrites.into_iter().rev() {
            match self.cache.get_mut(page_id) {
                Ok(page) => *page = node,
                Err(e) => {
                    self.poisoned = true;
                    warn!(
                        page = %page_id,
                        error = %e,
                        "split failed while rewriting pages, index poisoned"
                    );
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn check_usable(&self) -> Result<()> {
        if self.poisoned {
            return Err(LofError::InvariantViolation(
                "index poisoned by a split that failed midway".to_string(),
            ));
        }
        Ok(())
    }

    fn visit<F>(&self, page_id: PageId, f: &mut F) -> Result<()>
    where
        F: FnMut(i64, &[u8]) -> Result<()>,
    {
        let node = self.cache.peek(page_id)?;
        match &*node {
            Node::Leaf(leaf) => {
                for (key, value) in leaf.entries() {
                    f(key, value)?;
                }
            }
            Node::Internal(inner) => {
                for child in inner.children() {
                    self.visit(*child, f)?;
                }
            }
        }
        Ok(())
    }

    fn collect_dump(
        &self,
        page_id: PageId,
        depth: usize,
        lines: &mut Vec<DumpLine>,
    ) -> Result<()> {
        let node = self.cache.peek(page_id)?;

        match &*node {
            Node::Leaf(leaf) => lines.push(DumpLine::Leaf {
                depth,
                page_id,
                keys: leaf.keys().to_vec(),
            }),
            Node::Internal(inner) => {
                lines.push(DumpLine::Internal {
                    depth,
                    page_id,
                    level: inner.level(),
                    keys: inner.len(),
                });
                for (idx, child) in inner.children().iter().enumerate() {
                    self.collect_dump(*child, depth + 1, lines)?;
                    if let Some(key) = inner.keys().get(idx) {
                        lines.push(DumpLine::Separator { depth, key: *key });
                    }
                }
            }
        }
        Ok(())
    }

    fn check_subtree(
        &self,
        page_id: PageId,
        expected_level: u16,
        lower: Option<i64>,
        upper: Option<i64>,
    ) -> Result<usize> {
        let node = self.cache.peek(page_id)?;
        if node.level() != expected_level {
            return Err(LofError::InvariantViolation(format!(
                "{} at level {}, expected {}",
                page_id,
                node.level(),
                expected_level
            )));
        }

        match &*node {
            Node::Leaf(leaf) => {
                if leaf.is_empty() && page_id != self.root {
                    return Err(LofError::InvariantViolation(format!(
                        "{} is an empty non-root leaf",
                        page_id
                    )));
                }
                check_keys(page_id, leaf.keys(), lower, upper)?;
                Ok(leaf.len())
            }
            Node::Internal(inner) => {
                if inner.is_empty() {
                    return Err(LofError::InvariantViolation(format!(
                        "{} is an internal node without keys",
                        page_id
                    )));
                }
                check_keys(page_id, inner.keys(), lower, upper)?;

                let child_level = expected_level.checked_sub(1).ok_or_else(|| {
                    LofError::InvariantViolation(format!("{} is internal at level 0", page_id))
                })?;

                let keys = inner.keys();
                let mut count = 0;
                for (idx, child) in inner.children().iter().enumerate() {
                    let lo = if idx == 0 { lower } else { Some(keys[idx - 1]) };
                    let hi = keys.get(idx).copied().or(upper);
                    count += self.check_subtree(*child, child_level, lo, hi)?;
                }
                Ok(count)
            }
        }
    }
}

/// Tree shape captured by `dump_structure`.
struct StructureDump {
    height: usize,
    root: PageId,
    records: usize,
    lines: Vec<DumpLine>,
}

enum DumpLine {
    Leaf {
        depth: usize,
        page_id: PageId,
        keys: Vec<i64>,
    },
    Internal {
        depth: usize,
        page_id: PageId,
        level: u16,
        keys: usize,
    },
    /// Routing key between two children of the node at `depth`.
    Separator { depth: usize, key: i64 },
}

impl fmt::Display for StructureDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "btree height={} root={} records={}",
            self.height, self.root, self.records
        )?;

        for line in &self.lines {
            match line {
                DumpLine::Leaf {
                    depth,
                    page_id,
                    keys,
                } => {
                    write!(
                        f,
                        "{:indent$}{} leaf ({} records):",
                        "",
                        page_id,
                        keys.len(),
                        indent = depth * 2
                    )?;
                    for key in keys {
                        write!(f, " {}", key)?;
                    }
                    writeln!(f)?;
                }
                DumpLine::Internal {
                    depth,
                    page_id,
                    level,
                    keys,
                } => writeln!(
                    f,
                    "{:indent$}{} internal level={} ({} keys)",
                    "",
                    page_id,
                    level,
                    keys,
                    indent = depth * 2
                )?,
                DumpLine::Separator { depth, key } => {
                    writeln!(f, "{:indent$}  > {}", "", key, indent = depth * 2)?
                }
            }
        }
        Ok(())
    }
}

/// Checks that `keys` ascend strictly and lie in `[lower, upper)`.
fn check_keys(page_id: PageId, keys: &[i64], lower: Option<i64>, upper: Option<i64>) -> Result<()> {
    if let Some(pair) = keys.windows(2).find(|pair| pair[0] >= pair[1]) {
        return Err(LofError::InvariantViolation(format!(
            "{} keys out of order: {} before {}",
            page_id, pair[0], pair[1]
        )));
    }

    let (Some(first), Some(last)) = (keys.first(), keys.last()) else {
        return Ok(());
    };
    if lower.is_some_and(|lo| *first < lo) || upper.is_some_and(|hi| *last >= hi) {
        return Err(LofError::InvariantViolation(format!(
            "{} keys {}..={} outside bounds {:?}..{:?}",
            page_id, first, last, lower, upper
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPageStore;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PAGE: usize = 64;

    // 4-byte keys, 8-byte records, 64-byte pages: 4 records per leaf, 5 keys per internal node
    fn create_test_index(frames: usize) -> BTreeIndex<MemoryPageStore> {
        let config = PageCacheConfig::new(PAGE, PAGE * frames);
        BTreeIndex::create(MemoryPageStore::new(PAGE), config, 4, 8).unwrap()
    }

    fn record(v: u64) -> [u8; 8] {
        v.to_le_bytes()
    }

    fn read<S: PageStore>(index: &mut BTreeIndex<S>, key: i64) -> Option<u64> {
        index
            .search(key)
            .unwrap()
            .map(|data| u64::from_le_bytes(data.try_into().unwrap()))
    }

    /// Memory store whose allocate, read and write calls fail once the
    /// shared budget reaches zero. `usize::MAX` is unlimited.
    struct CountdownStore {
        inner: MemoryPageStore,
        budget: Arc<AtomicUsize>,
    }

    impl CountdownStore {
        fn new(page_size: usize) -> (Self, Arc<AtomicUsize>) {
            let budget = Arc::new(AtomicUsize::new(usize::MAX));
            let store = Self {
                inner: MemoryPageStore::new(page_size),
                budget: Arc::clone(&budget),
            };
            (store, budget)
        }

        fn spend(&self) -> Result<()> {
            match self.budget.load(Ordering::SeqCst) {
                0 => Err(LofError::IoError("budget exhausted".to_string())),
                usize::MAX => Ok(()),
                left => {
                    self.budget.store(left - 1, Ordering::SeqCst);
                    Ok(())
                }
            }
        }
    }

    impl PageStore for CountdownStore {
        fn page_size(&self) -> usize {
            self.inner.page_size()
        }

        fn allocate(&mut self) -> Result<PageId> {
            self.spend()?;
            self.inner.allocate()
        }

        fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
            self.spend()?;
            self.inner.read_page(page_id, buf)
        }

        fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
            self.spend()?;
            self.inner.write_page(page_id, data)
        }

        fn num_pages(&self) -> u32 {
            self.inner.num_pages()
        }
    }

    #[test]
    fn test_btree_empty() {
        let mut index = create_test_index(2);
        assert_eq!(index.height(), 1);
        assert!(index.is_empty());
        assert_eq!(read(&mut index, 1), None);
        index.check_invariants().unwrap();
    }

    #[test]
    fn test_btree_insert_and_search() {
        let mut index = create_test_index(2);
        index.insert(10, &record(100)).unwrap();
        index.insert(5, &record(50)).unwrap();
        index.insert(20, &record(200)).unwrap();

        assert_eq!(read(&mut index, 5), Some(50));
        assert_eq!(read(&mut index, 10), Some(100));
        assert_eq!(read(&mut index, 20), Some(200));
        assert_eq!(read(&mut index, 15), None);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_btree_splits_ascending() {
        let mut index = create_test_index(2);
        for key in 0..500 {
            index.insert(key, &record(key as u64 * 3)).unwrap();
        }

        assert!(index.height() >= 3);
        index.check_invariants().unwrap();
        for key in 0..500 {
            assert_eq!(read(&mut index, key), Some(key as u64 * 3));
        }
        assert!(index.cache_stats().evictions > 0);
    }

    #[test]
    fn test_btree_splits_descending() {
        let mut index = create_test_index(3);
        for key in (0..300).rev() {
            index.insert(key, &record(key as u64)).unwrap();
        }

        index.check_invariants().unwrap();
        for key in 0..300 {
            assert_eq!(read(&mut index, key), Some(key as u64));
        }
    }

    #[test]
    fn test_btree_interleaved_and_negative_keys() {
        let mut index = create_test_index(2);
        let keys: Vec<i64> = (0..200).map(|i| if i % 2 == 0 { i * 7 } else { -i * 13 }).collect();
        for key in &keys {
            index.insert(*key, &record(key.unsigned_abs())).unwrap();
        }

        index.check_invariants().unwrap();
        for key in &keys {
            assert_eq!(read(&mut index, *key), Some(key.unsigned_abs()));
        }
    }

    #[test]
    fn test_btree_single_frame_cache() {
        let mut index = create_test_index(1);
        for key in 0..100 {
            index.insert(key * 2, &record(key as u64)).unwrap();
        }

        index.check_invariants().unwrap();
        for key in 0..100 {
            assert_eq!(read(&mut index, key * 2), Some(key as u64));
            assert_eq!(read(&mut index, key * 2 + 1), None);
        }
    }

    #[test]
    fn test_btree_duplicate_key() {
        let mut index = create_test_index(2);
        for key in 0..20 {
            index.insert(key, &record(key as u64)).unwrap();
        }

        let result = index.insert(7, &record(999));
        assert!(matches!(result, Err(LofError::DuplicateKey { key: 7 })));
        assert_eq!(read(&mut index, 7), Some(7));
        assert_eq!(index.len(), 20);
        index.check_invariants().unwrap();
    }

    #[test]
    fn test_btree_key_out_of_range() {
        let config = PageCacheConfig::new(PAGE, PAGE * 2);
        let mut index = BTreeIndex::create(MemoryPageStore::new(PAGE), config, 2, 8).unwrap();

        let result = index.insert(70_000, &record(1));
        assert!(matches!(
            result,
            Err(LofError::KeyOutOfRange {
                key: 70_000,
                key_size: 2
            })
        ));
        assert!(index.search(70_000).unwrap().is_none());
        assert!(index.search_for_update(70_000).unwrap().is_none());
    }

    #[test]
    fn test_btree_value_size_mismatch() {
        let mut index = create_test_index(2);
        let result = index.insert(1, &[0u8; 4]);
        assert!(matches!(
            result,
            Err(LofError::ValueSizeMismatch {
                expected: 8,
                actual: 4
            })
        ));
        assert!(index.is_empty());
    }

    #[test]
    fn test_btree_create_checks_cache_config_first() {
        let config = PageCacheConfig::new(PAGE, PAGE / 2);
        let result = BTreeIndex::create(MemoryPageStore::new(PAGE), config, 4, 8);
        assert!(matches!(result, Err(LofError::CacheConfig(_))));
    }

    #[test]
    fn test_btree_create_rejects_small_page() {
        // 16-byte header + one 28-byte entry
        let config = PageCacheConfig::new(48, 96);
        let result = BTreeIndex::create(MemoryPageStore::new(48), config, 4, 24);
        assert!(matches!(result, Err(LofError::ConfigError(_))));
    }

    #[test]
    fn test_btree_search_for_update_survives_eviction() {
        let mut index = create_test_index(2);
        for key in 0..100 {
            index.insert(key, &record(key as u64)).unwrap();
        }

        {
            let mut rec = index.search_for_update(42).unwrap().unwrap();
            assert_eq!(rec.key(), 42);
            rec.data_mut().copy_from_slice(&record(4242));
        }

        // Touch pages far from key 42 to push its leaf out
        for key in 90..100 {
            read(&mut index, key);
        }
        for key in 0..5 {
            read(&mut index, key);
        }

        assert_eq!(read(&mut index, 42), Some(4242));
    }

    #[test]
    fn test_btree_search_marks_nothing_dirty() {
        let mut index = create_test_index(4);
        for key in 0..30 {
            index.insert(key, &record(0)).unwrap();
        }
        index.flush().unwrap();
        assert_eq!(index.cache_stats().dirty_pages, 0);

        read(&mut index, 12);
        read(&mut index, 1000);
        assert!(index.search_for_update(1000).unwrap().is_none());
        assert_eq!(index.cache_stats().dirty_pages, 0);

        let rec = index.search_for_update(12).unwrap().unwrap();
        let page_id = rec.page_id();
        assert!(index.cache().is_dirty(page_id));
        assert_eq!(index.cache_stats().dirty_pages, 1);
    }

    #[test]
    fn test_btree_for_each_in_order() {
        let mut index = create_test_index(2);
        for key in [50, 10, 40, 20, 30, 60, 5, 45, 15, 25] {
            index.insert(key, &record(key as u64)).unwrap();
        }

        let mut seen = Vec::new();
        index
            .for_each(|key, data| {
                assert_eq!(data, &record(key as u64));
                seen.push(key);
                Ok(())
            })
            .unwrap();

        assert_eq!(seen, vec![5, 10, 15, 20, 25, 30, 40, 45, 50, 60]);
    }

    #[test]
    fn test_btree_for_each_propagates_error() {
        let mut index = create_test_index(2);
        for key in 0..10 {
            index.insert(key, &record(0)).unwrap();
        }

        let mut calls = 0;
        let result = index.for_each(|_, _| {
            calls += 1;
            if calls == 3 {
                Err(LofError::IoError("sink closed".to_string()))
            } else {
                Ok(())
            }
        });
        assert!(matches!(result, Err(LofError::IoError(_))));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_btree_dump_structure_is_stable() {
        let mut index = create_test_index(2);
        for key in 0..40 {
            index.insert(key, &record(0)).unwrap();
        }

        let stats = index.cache_stats();
        let first = index.dump_structure().unwrap();
        let second = index.dump_structure().unwrap();

        assert_eq!(first, second);
        assert_eq!(index.cache_stats(), stats);
        assert!(first.starts_with("btree height="));
        assert!(first.contains("internal level=1"));
        assert!(first.contains(" 39"));
    }

    #[test]
    fn test_btree_verify_structure_mode() {
        let mut index = create_test_index(2);
        index.set_verify_structure(true);
        for key in (0..120).map(|i| (i * 37) % 120) {
            index.insert(key, &record(key as u64)).unwrap();
        }
        assert_eq!(index.len(), 120);
    }

    #[test]
    fn test_btree_root_levels() {
        let mut index = create_test_index(2);
        let first_root = index.root_page_id();
        for key in 0..5 {
            index.insert(key, &record(0)).unwrap();
        }

        // Fifth record splits the root leaf
        assert_eq!(index.height(), 2);
        assert_ne!(index.root_page_id(), first_root);
        assert_eq!(
            index.cache().peek(index.root_page_id()).unwrap().level(),
            1
        );
    }

    #[test]
    fn test_btree_failed_split_loses_nothing() {
        // Ascending inserts: key 30 splits a leaf only, 28 also splits an
        // internal node, 12 also grows the root
        for split_key in [30i64, 28, 12] {
            let mut successes = 0;
            let mut poisoned = 0;

            for calls in 0..64 {
                let (store, budget) = CountdownStore::new(PAGE);
                let config = PageCacheConfig::new(PAGE, PAGE);
                let mut index = BTreeIndex::create(store, config, 4, 8).unwrap();
                for key in 0..split_key {
                    index.insert(key, &record(key as u64)).unwrap();
                }
                let height = index.height();

                budget.store(calls, Ordering::SeqCst);
                let result = index.insert(split_key, &record(split_key as u64));
                budget.store(usize::MAX, Ordering::SeqCst);

                if index.is_poisoned() {
                    poisoned += 1;
                    assert!(matches!(result, Err(LofError::IoError(_))));
                    assert!(matches!(
                        index.search(0),
                        Err(LofError::InvariantViolation(_))
                    ));
                    assert!(matches!(
                        index.search_for_update(0),
                        Err(LofError::InvariantViolation(_))
                    ));
                    assert!(matches!(
                        index.insert(split_key + 1, &record(0)),
                        Err(LofError::InvariantViolation(_))
                    ));
                    assert!(matches!(
                        index.for_each(|_, _| Ok(())),
                        Err(LofError::InvariantViolation(_))
                    ));
                    assert!(matches!(
                        index.check_invariants(),
                        Err(LofError::InvariantViolation(_))
                    ));
                    continue;
                }

                let stored = match result {
                    Ok(()) => {
                        successes += 1;
                        split_key + 1
                    }
                    Err(e) => {
                        assert!(matches!(e, LofError::IoError(_)));
                        assert_eq!(index.height(), height);
                        assert_eq!(read(&mut index, split_key), None);
                        split_key
                    }
                };
                assert_eq!(index.len(), stored as usize);
                index.check_invariants().unwrap();
                for key in 0..stored {
                    assert_eq!(
                        read(&mut index, key),
                        Some(key as u64),
                        "split at {}, {} calls",
                        split_key,
                        calls
                    );
                }
            }

            assert!(successes > 0, "split at {}", split_key);
            assert!(poisoned > 0, "split at {}", split_key);
        }
    }
}
