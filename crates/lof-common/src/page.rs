//! Page identifiers and page types.

use serde::{Deserialize, Serialize};

/// Default page size in bytes (4 KB).
pub const DEFAULT_PAGE_SIZE: usize = 4 * 1024;

/// Identifier of a page within a page store.
///
/// Page numbers are dense and 0-indexed: the n-th call to
/// `PageStore::allocate` returns page n.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(pub u32);

impl PageId {
    /// Creates a new PageId.
    pub fn new(page_num: u32) -> Self {
        Self(page_num)
    }

    /// Returns the page number.
    #[inline]
    pub fn page_num(&self) -> u32 {
        self.0
    }

    /// Returns the byte offset of this page in a store with the given page size.
    #[inline]
    pub fn offset(&self, page_size: usize) -> u64 {
        self.0 as u64 * page_size as u64
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page:{}", self.0)
    }
}

/// Page types stored in the first byte of every formatted page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PageType {
    /// Allocated but never written (all zeroes).
    Unformatted = 0,
    /// B-tree leaf page.
    BTreeLeaf = 1,
    /// B-tree internal (directory) page.
    BTreeInternal = 2,
}

impl PageType {
    /// Decodes a page type byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PageType::Unformatted),
            1 => Some(PageType::BTreeLeaf),
            2 => Some(PageType::BTreeInternal),
            _ => None,
        }
    }
}
