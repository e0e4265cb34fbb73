//! Page header and size layout for B-tree nodes.

use super::constants::{CHILD_PTR_SIZE, MAX_KEY_SIZE, MIN_NODE_KEYS, NODE_HEADER_SIZE};
use lof_common::page::PageType;
use lof_common::{LofError, Result};

/// Header at the start of every B-tree page.
///
/// Layout (16 bytes):
/// - page_type: 1 byte
/// - reserved: 1 byte
/// - num_keys: 2 bytes
/// - page_num: 4 bytes (the page's own number, checked on decode)
/// - level: 2 bytes (0 = leaf)
/// - reserved: 6 bytes
///
/// Leaf body:
/// ```text
/// +------------------------+ 16
/// | key_0 | value_0        |
/// | key_1 | value_1        |
/// | ...                    |
/// +------------------------+ 16 + n * (key_size + value_size)
/// ```
///
/// Internal body:
/// ```text
/// +------------------------+ 16
/// | child_0: u32           |
/// | key_0 | child_1: u32   |
/// | ...                    |
/// +------------------------+ 20 + n * (key_size + 4)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    /// Type of this page.
    pub page_type: PageType,
    /// Number of keys in the node.
    pub num_keys: u16,
    /// Page number the node was written to.
    pub page_num: u32,
    /// Level in the tree (0 = leaf).
    pub level: u16,
}

impl NodeHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = NODE_HEADER_SIZE;

    /// Serializes to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.page_type as u8;
        buf[2..4].copy_from_slice(&self.num_keys.to_le_bytes());
        buf[4..8].copy_from_slice(&self.page_num.to_le_bytes());
        buf[8..10].copy_from_slice(&self.level.to_le_bytes());
        // bytes 1 and 10-15 are reserved (already zeroed)
        buf
    }

    /// Deserializes from bytes. Returns None for an unknown page type.
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        Some(Self {
            page_type: PageType::from_u8(buf[0])?,
            num_keys: u16::from_le_bytes([buf[2], buf[3]]),
            page_num: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            level: u16::from_le_bytes([buf[8], buf[9]]),
        })
    }
}

/// Fixed widths of an index and the node capacities they imply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexLayout {
    key_size: usize,
    value_size: usize,
    page_size: usize,
}

impl IndexLayout {
    /// Creates a layout, failing if a page cannot hold two keys of either node kind.
    pub fn new(key_size: usize, value_size: usize, page_size: usize) -> Result<Self> {
        if key_size == 0 || key_size > MAX_KEY_SIZE {
            return Err(LofError::ConfigError(format!(
                "key_size {} outside 1..={}",
                key_size, MAX_KEY_SIZE
            )));
        }

        let layout = Self {
            key_size,
            value_size,
            page_size,
        };

        if layout.max_leaf_entries() < MIN_NODE_KEYS || layout.max_internal_keys() < MIN_NODE_KEYS
        {
            return Err(LofError::ConfigError(format!(
                "page_size {} holds {} leaf entries and {} internal keys, at least {} required",
                page_size,
                layout.max_leaf_entries(),
                layout.max_internal_keys(),
                MIN_NODE_KEYS
            )));
        }

        Ok(layout)
    }

    /// Key width in bytes.
    #[inline]
    pub fn key_size(&self) -> usize {
        self.key_size
    }

    /// Record width in bytes.
    #[inline]
    pub fn value_size(&self) -> usize {
        self.value_size
    }

    /// Page size in bytes.
    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Bytes per leaf entry (key + record).
    #[inline]
    pub fn leaf_entry_size(&self) -> usize {
        self.key_size + self.value_size
    }

    /// Maximum entries a leaf page can hold.
    pub fn max_leaf_entries(&self) -> usize {
        let n = self.page_size.saturating_sub(NODE_HEADER_SIZE) / self.leaf_entry_size();
        n.min(u16::MAX as usize)
    }

    /// Maximum keys an internal page can hold (children = keys + 1).
    pub fn max_internal_keys(&self) -> usize {
        let n = self
            .page_size
            .saturating_sub(NODE_HEADER_SIZE + CHILD_PTR_SIZE)
            / (self.key_size + CHILD_PTR_SIZE);
        n.min(u16::MAX as usize)
    }

    /// Returns an error if `key` does not fit in `key_size` bytes.
    pub fn check_key(&self, key: i64) -> Result<()> {
        if self.key_fits(key) {
            Ok(())
        } else {
            Err(LofError::KeyOutOfRange {
                key,
                key_size: self.key_size,
            })
        }
    }

    /// Returns true if `key` is representable in `key_size` bytes.
    pub fn key_fits(&self, key: i64) -> bool {
        if self.key_size >= 8 {
            return true;
        }
        let bits = self.key_size as u32 * 8;
        let min = -(1i64 << (bits - 1));
        let max = (1i64 << (bits - 1)) - 1;
        (min..=max).contains(&key)
    }

    /// Writes `key` as a `key_size`-byte little-endian two's-complement integer.
    #[inline]
    pub fn encode_key(&self, key: i64, buf: &mut [u8]) {
        buf[..self.key_size].copy_from_slice(&key.to_le_bytes()[..self.key_size]);
    }

    /// Reads a key written by `encode_key`, sign-extending it.
    #[inline]
    pub fn decode_key(&self, buf: &[u8]) -> i64 {
        let bytes = &buf[..self.key_size];
        let fill = if bytes[self.key_size - 1] & 0x80 != 0 {
            0xFF
        } else {
            0x00
        };
        let mut wide = [fill; 8];
        wide[..self.key_size].copy_from_slice(bytes);
        i64::from_le_bytes(wide)
    }
}
