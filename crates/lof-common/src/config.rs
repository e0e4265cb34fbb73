//! Configuration structures for the page cache and the LOF table.

use crate::error::{LofError, Result};
use crate::page::DEFAULT_PAGE_SIZE;
use serde::{Deserialize, Serialize};

/// Width of an object id key in bytes (32-bit ids).
pub const LOF_KEY_SIZE: usize = 4;

/// Width of one stored floating point value in bytes.
pub const LOF_SCALAR_SIZE: usize = 8;

/// Page cache sizing, both in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCacheConfig {
    /// Size of a page in bytes.
    pub page_size: usize,
    /// Memory budget of the cache in bytes.
    pub cache_size: usize,
}

impl Default for PageCacheConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_size: 16 * DEFAULT_PAGE_SIZE, // 64 KB
        }
    }
}

impl PageCacheConfig {
    /// Creates a cache configuration.
    pub fn new(page_size: usize, cache_size: usize) -> Self {
        Self {
            page_size,
            cache_size,
        }
    }

    /// Checks the page/cache size contract.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(LofError::CacheConfig("page_size must be positive".to_string()));
        }
        if self.cache_size == 0 {
            return Err(LofError::CacheConfig("cache_size must be positive".to_string()));
        }
        if self.cache_size < self.page_size {
            return Err(LofError::CacheConfig(format!(
                "cache_size {} < page_size {}",
                self.cache_size, self.page_size
            )));
        }
        Ok(())
    }

    /// Returns the number of page slots, `cache_size / page_size` rounded down (min 1).
    pub fn num_frames(&self) -> usize {
        if self.page_size == 0 {
            return 1;
        }
        (self.cache_size / self.page_size).max(1)
    }
}

/// Configuration of a LOF table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LofTableConfig {
    /// Size of a page in bytes.
    pub page_size: usize,
    /// Memory budget of the page cache in bytes.
    pub cache_size: usize,
    /// Number of partial sums per entry (`sum2_1..sum2_k`).
    pub k: usize,
    /// Re-search every inserted id after each insert (O(n) per insert).
    pub verify_inserts: bool,
    /// Run a full structural check of the tree after each insert.
    pub verify_structure: bool,
    /// Log the tree structure when a lookup misses.
    pub dump_on_miss: bool,
}

impl Default for LofTableConfig {
    fn default() -> Self {
        let cache = PageCacheConfig::default();
        Self {
            page_size: cache.page_size,
            cache_size: cache.cache_size,
            k: 10,
            verify_inserts: false,
            verify_structure: false,
            dump_on_miss: false,
        }
    }
}

impl LofTableConfig {
    /// Creates a configuration with the given sizes and all checks disabled.
    pub fn new(page_size: usize, cache_size: usize, k: usize) -> Self {
        Self {
            page_size,
            cache_size,
            k,
            ..Default::default()
        }
    }

    /// Returns the page cache part of this configuration.
    pub fn cache_config(&self) -> PageCacheConfig {
        PageCacheConfig::new(self.page_size, self.cache_size)
    }

    /// Returns the key width in bytes.
    pub fn key_size(&self) -> usize {
        LOF_KEY_SIZE
    }

    /// Returns the record width in bytes: `sum1` plus `k` partial sums.
    pub fn value_size(&self) -> usize {
        LOF_SCALAR_SIZE + self.k * LOF_SCALAR_SIZE
    }
}
