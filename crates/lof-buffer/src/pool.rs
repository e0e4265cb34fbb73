//! Page cache manager.

use crate::codec::PageCodec;
use crate::frame::{BufferFrame, FrameId};
use crate::replacer::{LruReplacer, Replacer};
use lof_common::config::PageCacheConfig;
use lof_common::page::PageId;
use lof_common::store::PageStore;
use lof_common::{LofError, Result};
use std::borrow::Cow;
use std::collections::HashMap;
use tracing::trace;

/// Bounded cache of decoded pages in front of a page store.
///
/// Manages a fixed number of frames (`cache_size / page_size`) with:
/// - Page ID to frame ID mapping, at most one frame per page
/// - Free frame list for the warm-up phase
/// - LRU replacement for eviction
/// - Dirty page tracking with write-back before a frame is reused
///
/// A page fetched while resident is always the same in-memory instance, so
/// changes made through `get_mut` are seen by every later `get` without any
/// store round trip.
pub struct PageCache<S, C: PageCodec> {
    /// Configuration.
    config: PageCacheConfig,
    /// Backing store; only the cache reads and writes it.
    store: S,
    /// Page encoder/decoder.
    codec: C,
    /// Array of frames.
    frames: Vec<BufferFrame<C::Page>>,
    /// Page ID to frame ID mapping.
    page_table: HashMap<PageId, FrameId>,
    /// List of free frame IDs.
    free_list: Vec<FrameId>,
    /// Page replacement policy.
    replacer: LruReplacer,
    /// One page of scratch space for store I/O.
    scratch: Vec<u8>,
    /// Running counters.
    counters: CacheCounters,
}

#[derive(Debug, Default, Clone, Copy)]
struct CacheCounters {
    hits: u64,
    misses: u64,
    evictions: u64,
    write_backs: u64,
}

impl<S: PageStore, C: PageCodec> PageCache<S, C> {
    /// Creates a new page cache over `store`.
    ///
    /// Fails with `CacheConfig` if the sizes are invalid and with
    /// `PageSizeMismatch` if the store uses a different page size.
    pub fn new(config: PageCacheConfig, store: S, codec: C) -> Result<Self> {
        config.validate()?;
        if store.page_size() != config.page_size {
            return Err(LofError::PageSizeMismatch {
                expected: config.page_size,
                actual: store.page_size(),
            });
        }

        let num_frames = config.num_frames();

        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();

        // Reversed so that frame 0 is handed out first
        let free_list: Vec<_> = (0..num_frames).rev().map(|i| FrameId(i as u32)).collect();

        Ok(Self {
            config,
            store,
            codec,
            frames,
            page_table: HashMap::with_capacity(num_frames),
            free_list,
            replacer: LruReplacer::new(num_frames),
            scratch: vec![0u8; config.page_size],
            counters: CacheCounters::default(),
        })
    }

    /// Returns the number of frames in the cache.
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Returns the page size in bytes.
    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    /// Returns the number of pages currently resident.
    pub fn page_count(&self) -> usize {
        self.page_table.len()
    }

    /// Checks if a page is resident.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.contains_key(&page_id)
    }

    /// Returns true if the page is resident and dirty.
    pub fn is_dirty(&self, page_id: PageId) -> bool {
        self.page_table
            .get(&page_id)
            .is_some_and(|frame_id| self.frames[frame_id.index()].is_dirty())
    }

    /// Returns the backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Returns the page codec.
    pub fn codec(&self) -> &C {
        &self.codec
    }

    /// Returns the decoded page, loading it from the store on a miss.
    pub fn get(&mut self, page_id: PageId) -> Result<&C::Page> {
        let frame_id = self.fetch(page_id)?;
        self.frames[frame_id.index()]
            .page()
            .ok_or_else(|| empty_frame(frame_id, page_id))
    }

    /// Returns the decoded page for in-place modification and marks it dirty.
    pub fn get_mut(&mut self, page_id: PageId) -> Result<&mut C::Page> {
        let frame_id = self.fetch(page_id)?;
        let frame = &mut self.frames[frame_id.index()];
        frame.set_dirty(true);
        frame
            .page_mut()
            .ok_or_else(|| empty_frame(frame_id, page_id))
    }

    /// Allocates a new page in the store and installs `page` as its dirty content.
    ///
    /// The zero-filled page is never read back; the first write-back
    /// replaces it.
    pub fn new_page(&mut self, page: C::Page) -> Result<PageId> {
        let frame_id = self.allocate_frame()?;

        let page_id = match self.store.allocate() {
            Ok(page_id) => page_id,
            Err(e) => {
                self.free_list.push(frame_id);
                self.debug_check_frames();
                return Err(e);
            }
        };

        self.frames[frame_id.index()].install(page_id, page, true);
        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);

        trace!(page = %page_id, frame = %frame_id, "allocated page");
        self.debug_check_frames();
        Ok(page_id)
    }

    /// Marks a resident page dirty.
    ///
    /// Returns false if the page is not resident.
    pub fn mark_dirty(&mut self, page_id: PageId) -> bool {
        if let Some(&frame_id) = self.page_table.get(&page_id) {
            self.frames[frame_id.index()].set_dirty(true);
            return true;
        }
        false
    }

    /// Reads a page without changing recency, dirty flags or residency.
    ///
    /// A resident page is borrowed; otherwise it is decoded from the store
    /// into an owned copy that is not installed.
    pub fn peek(&self, page_id: PageId) -> Result<Cow<'_, C::Page>>
    where
        C::Page: Clone,
    {
        if let Some(frame_id) = self.page_table.get(&page_id) {
            if let Some(page) = self.frames[frame_id.index()].page() {
                return Ok(Cow::Borrowed(page));
            }
        }

        let mut buf = vec![0u8; self.config.page_size];
        self.store.read_page(page_id, &mut buf)?;
        Ok(Cow::Owned(self.codec.decode(page_id, &buf)?))
    }

    /// Writes a page back if it is resident and dirty.
    ///
    /// Returns true if the page was written.
    pub fn flush_page(&mut self, page_id: PageId) -> Result<bool> {
        match self.page_table.get(&page_id) {
            Some(&frame_id) => self.write_back(frame_id),
            None => Ok(false),
        }
    }

    /// Writes back every dirty page and clears the dirty flags. Nothing is evicted.
    ///
    /// Returns the number of pages written.
    pub fn flush_all(&mut self) -> Result<usize> {
        let mut flushed = 0;
        for idx in 0..self.frames.len() {
            if self.write_back(FrameId(idx as u32))? {
                flushed += 1;
            }
        }
        Ok(flushed)
    }

    /// Flushes all dirty pages and syncs the store.
    pub fn sync(&mut self) -> Result<()> {
        self.flush_all()?;
        self.store.sync()
    }

    /// Returns statistics about the cache.
    pub fn stats(&self) -> PageCacheStats {
        let dirty_pages = self.frames.iter().filter(|f| f.is_dirty()).count();

        PageCacheStats {
            total_frames: self.frames.len(),
            resident_pages: self.page_table.len(),
            dirty_pages,
            hits: self.counters.hits,
            misses: self.counters.misses,
            evictions: self.counters.evictions,
            write_backs: self.counters.write_backs,
        }
    }

    /// Makes `page_id` resident and returns its frame.
    fn fetch(&mut self, page_id: PageId) -> Result<FrameId> {
        if let Some(&frame_id) = self.page_table.get(&page_id) {
            self.counters.hits += 1;
            self.replacer.record_access(frame_id);
            return Ok(frame_id);
        }

        self.counters.misses += 1;

        // Read and decode before evicting so a bad page leaves the cache untouched
        self.store.read_page(page_id, &mut self.scratch)?;
        let page = self.codec.decode(page_id, &self.scratch)?;

        let frame_id = self.allocate_frame()?;
        self.frames[frame_id.index()].install(page_id, page, false);
        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);

        trace!(page = %page_id, frame = %frame_id, "loaded page");
        self.debug_check_frames();
        Ok(frame_id)
    }

    /// Returns an empty frame, evicting the least recently used page if needed.
    fn allocate_frame(&mut self) -> Result<FrameId> {
        if let Some(frame_id) = self.free_list.pop() {
            return Ok(frame_id);
        }

        let victim = self.replacer.evict().ok_or_else(|| {
            LofError::InvariantViolation("page cache has no evictable frame".to_string())
        })?;

        if let Err(e) = self.write_back(victim) {
            // Keep the dirty page resident rather than lose it
            self.replacer.record_access(victim);
            self.debug_check_frames();
            return Err(e);
        }

        if let Some((old_page_id, _)) = self.frames[victim.index()].reset() {
            self.page_table.remove(&old_page_id);
            trace!(page = %old_page_id, frame = %victim, "evicted page");
        }
        self.counters.evictions += 1;

        Ok(victim)
    }

    /// Every frame is either free or holds a resident page tracked by the replacer.
    fn debug_check_frames(&self) {
        debug_assert_eq!(self.replacer.size(), self.page_table.len());
        debug_assert_eq!(
            self.page_table.len() + self.free_list.len(),
            self.frames.len()
        );
    }

    /// Encodes and writes a frame's page if it is dirty.
    fn write_back(&mut self, frame_id: FrameId) -> Result<bool> {
        let frame = &self.frames[frame_id.index()];
        if !frame.is_dirty() {
            return Ok(false);
        }
        let (Some(page_id), Some(page)) = (frame.page_id(), frame.page()) else {
            return Ok(false);
        };

        self.codec.encode(page_id, page, &mut self.scratch)?;
        self.store.write_page(page_id, &self.scratch)?;

        self.frames[frame_id.index()].set_dirty(false);
        self.counters.write_backs += 1;

        trace!(page = %page_id, frame = %frame_id, "wrote back dirty page");
        Ok(true)
    }
}

fn empty_frame(frame_id: FrameId, page_id: PageId) -> LofError {
    LofError::InvariantViolation(format!("{} mapped to empty {}", page_id, frame_id))
}

/// Statistics about the page cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCacheStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of frames holding a page.
    pub resident_pages: usize,
    /// Number of resident pages awaiting write-back.
    pub dirty_pages: usize,
    /// Lookups served from memory.
    pub hits: u64,
    /// Lookups that read the store.
    pub misses: u64,
    /// Pages removed to make room for another page.
    pub evictions: u64,
    /// Dirty pages written to the store.
    pub write_backs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: usize = 64;

    /// Store keeping pages in memory, optionally failing writes.
    struct TestStore {
        pages: Vec<Vec<u8>>,
        fail_writes: bool,
        writes: usize,
    }

    impl TestStore {
        fn new() -> Self {
            Self {
                pages: Vec::new(),
                fail_writes: false,
                writes: 0,
            }
        }

        fn value_at(&self, page_id: PageId) -> u64 {
            let bytes = &self.pages[page_id.page_num() as usize];
            u64::from_le_bytes(bytes[..8].try_into().unwrap())
        }
    }

    impl PageStore for TestStore {
        fn page_size(&self) -> usize {
            PAGE
        }

        fn allocate(&mut self) -> Result<PageId> {
            self.pages.push(vec![0u8; PAGE]);
            Ok(PageId::new(self.pages.len() as u32 - 1))
        }

        fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
            let page = self
                .pages
                .get(page_id.page_num() as usize)
                .ok_or_else(|| LofError::IoError(format!("{} not allocated", page_id)))?;
            buf.copy_from_slice(page);
            Ok(())
        }

        fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
            if self.fail_writes {
                return Err(LofError::IoError("medium is read-only".to_string()));
            }
            self.writes += 1;
            self.pages[page_id.page_num() as usize].copy_from_slice(data);
            Ok(())
        }

        fn num_pages(&self) -> u32 {
            self.pages.len() as u32
        }
    }

    /// Decoded page is the u64 stored in the first 8 bytes.
    struct CounterCodec;

    impl PageCodec for CounterCodec {
        type Page = u64;

        fn decode(&self, _page_id: PageId, data: &[u8]) -> Result<u64> {
            Ok(u64::from_le_bytes(data[..8].try_into().unwrap()))
        }

        fn encode(&self, _page_id: PageId, page: &u64, buf: &mut [u8]) -> Result<()> {
            buf.fill(0);
            buf[..8].copy_from_slice(&page.to_le_bytes());
            Ok(())
        }
    }

    fn create_test_cache(num_frames: usize) -> PageCache<TestStore, CounterCodec> {
        let config = PageCacheConfig::new(PAGE, PAGE * num_frames);
        PageCache::new(config, TestStore::new(), CounterCodec).unwrap()
    }

    #[test]
    fn test_page_cache_new() {
        let cache = create_test_cache(4);
        assert_eq!(cache.num_frames(), 4);
        assert_eq!(cache.page_count(), 0);
        assert_eq!(cache.page_size(), PAGE);
    }

    #[test]
    fn test_page_cache_rejects_bad_config() {
        let result = PageCache::new(PageCacheConfig::new(PAGE, 10), TestStore::new(), CounterCodec);
        assert!(matches!(result, Err(LofError::CacheConfig(_))));

        let result = PageCache::new(PageCacheConfig::new(0, 10), TestStore::new(), CounterCodec);
        assert!(matches!(result, Err(LofError::CacheConfig(_))));
    }

    #[test]
    fn test_page_cache_rejects_store_page_size_mismatch() {
        let config = PageCacheConfig::new(128, 1024);
        let result = PageCache::new(config, TestStore::new(), CounterCodec);
        assert!(matches!(
            result,
            Err(LofError::PageSizeMismatch {
                expected: 128,
                actual: PAGE
            })
        ));
    }

    #[test]
    fn test_page_cache_new_page_is_dirty_and_resident() {
        let mut cache = create_test_cache(2);
        let page_id = cache.new_page(11).unwrap();

        assert!(cache.contains(page_id));
        assert!(cache.is_dirty(page_id));
        assert_eq!(*cache.get(page_id).unwrap(), 11);
        // Not written yet
        assert_eq!(cache.store().value_at(page_id), 0);
    }

    #[test]
    fn test_page_cache_hit_and_miss_counters() {
        let mut cache = create_test_cache(2);
        let a = cache.new_page(1).unwrap();
        cache.flush_all().unwrap();

        cache.get(a).unwrap();
        cache.get(a).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.resident_pages, 1);
    }

    #[test]
    fn test_page_cache_get_mut_same_instance() {
        let mut cache = create_test_cache(2);
        let a = cache.new_page(5).unwrap();
        cache.flush_all().unwrap();
        assert!(!cache.is_dirty(a));

        *cache.get_mut(a).unwrap() += 10;
        assert!(cache.is_dirty(a));
        assert_eq!(*cache.get(a).unwrap(), 15);
        // Still only the in-memory copy changed
        assert_eq!(cache.store().value_at(a), 5);
    }

    #[test]
    fn test_page_cache_eviction_writes_back_dirty() {
        let mut cache = create_test_cache(2);
        let a = cache.new_page(100).unwrap();
        let b = cache.new_page(200).unwrap();
        let c = cache.new_page(300).unwrap();

        // a was least recently used
        assert!(!cache.contains(a));
        assert!(cache.contains(b));
        assert!(cache.contains(c));
        assert_eq!(cache.store().value_at(a), 100);

        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.write_backs, 1);
    }

    #[test]
    fn test_page_cache_reload_after_eviction() {
        let mut cache = create_test_cache(1);
        let a = cache.new_page(1).unwrap();
        *cache.get_mut(a).unwrap() = 42;

        let b = cache.new_page(2).unwrap();
        assert!(!cache.contains(a));

        assert_eq!(*cache.get(a).unwrap(), 42);
        assert!(!cache.contains(b));
        assert_eq!(cache.store().value_at(b), 2);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_page_cache_lru_order() {
        let mut cache = create_test_cache(2);
        let a = cache.new_page(1).unwrap();
        let b = cache.new_page(2).unwrap();

        // Touch a so that b becomes the victim
        cache.get(a).unwrap();
        let c = cache.new_page(3).unwrap();

        assert!(cache.contains(a));
        assert!(!cache.contains(b));
        assert!(cache.contains(c));
    }

    #[test]
    fn test_page_cache_clean_eviction_skips_write() {
        let mut cache = create_test_cache(1);
        let a = cache.new_page(1).unwrap();
        cache.flush_all().unwrap();
        assert_eq!(cache.store().writes, 1);

        cache.new_page(2).unwrap();
        assert!(!cache.contains(a));
        assert_eq!(cache.store().writes, 1);
    }

    #[test]
    fn test_page_cache_flush_all() {
        let mut cache = create_test_cache(4);
        let pages: Vec<_> = (0..3).map(|i| cache.new_page(i * 10).unwrap()).collect();

        assert_eq!(cache.flush_all().unwrap(), 3);
        assert_eq!(cache.flush_all().unwrap(), 0);

        for (i, page_id) in pages.iter().enumerate() {
            assert!(cache.contains(*page_id));
            assert!(!cache.is_dirty(*page_id));
            assert_eq!(cache.store().value_at(*page_id), i as u64 * 10);
        }
        assert_eq!(cache.stats().dirty_pages, 0);
    }

    #[test]
    fn test_page_cache_flush_page() {
        let mut cache = create_test_cache(2);
        let a = cache.new_page(9).unwrap();

        assert!(cache.flush_page(a).unwrap());
        assert!(!cache.flush_page(a).unwrap());
        assert!(!cache.flush_page(PageId::new(99)).unwrap());
    }

    #[test]
    fn test_page_cache_mark_dirty() {
        let mut cache = create_test_cache(2);
        let a = cache.new_page(9).unwrap();
        cache.flush_all().unwrap();

        assert!(cache.mark_dirty(a));
        assert!(cache.is_dirty(a));
        assert!(!cache.mark_dirty(PageId::new(50)));
    }

    #[test]
    fn test_page_cache_peek_does_not_touch_state() {
        let mut cache = create_test_cache(2);
        let a = cache.new_page(1).unwrap();
        let b = cache.new_page(2).unwrap();
        let c = cache.new_page(3).unwrap();
        // a evicted, b and c resident
        let before = cache.stats();

        assert_eq!(*cache.peek(a).unwrap(), 1);
        assert_eq!(*cache.peek(b).unwrap(), 2);
        assert!(!cache.contains(a));
        assert_eq!(cache.stats(), before);

        // Peeking b did not refresh it, so b is still the LRU victim
        cache.new_page(4).unwrap();
        assert!(!cache.contains(b));
        assert!(cache.contains(c));
    }

    #[test]
    fn test_page_cache_get_unallocated_page() {
        let mut cache = create_test_cache(2);
        let result = cache.get(PageId::new(3));
        assert!(matches!(result, Err(LofError::IoError(_))));
        assert_eq!(cache.page_count(), 0);
    }

    #[test]
    fn test_page_cache_failed_write_back_keeps_page() {
        let mut cache = create_test_cache(1);
        let a = cache.new_page(77).unwrap();

        cache.store.fail_writes = true;
        let result = cache.new_page(78);
        assert!(matches!(result, Err(LofError::IoError(_))));

        // Dirty page is still resident and intact
        assert!(cache.contains(a));
        assert!(cache.is_dirty(a));
        assert_eq!(*cache.get(a).unwrap(), 77);
        assert_eq!(cache.replacer.size(), cache.page_count());
        assert!(cache.free_list.is_empty());

        cache.store.fail_writes = false;
        let b = cache.new_page(78).unwrap();
        assert_eq!(cache.store().value_at(a), 77);
        assert!(cache.contains(b));
    }
}
