//! Decoded B-tree nodes (leaf and internal) and their page codec.

use super::constants::CHILD_PTR_SIZE;
use super::types::{IndexLayout, NodeHeader};
use lof_buffer::PageCodec;
use lof_common::page::{PageId, PageType};
use lof_common::{LofError, Result};

/// B-tree leaf node: sorted keys with inlined fixed-width records.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafNode {
    /// Sorted keys.
    keys: Vec<i64>,
    /// Records stored back to back, `value_size` bytes each.
    values: Vec<u8>,
    /// Record width in bytes.
    value_size: usize,
}

impl LeafNode {
    /// Creates a new empty leaf.
    pub fn new(value_size: usize) -> Self {
        Self {
            keys: Vec::new(),
            values: Vec::new(),
            value_size,
        }
    }

    /// Returns the number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if the leaf holds no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Returns the sorted keys.
    #[inline]
    pub fn keys(&self) -> &[i64] {
        &self.keys
    }

    /// Binary search for a key. Returns Ok(index) if found, Err(index) for insertion point.
    #[inline]
    pub fn search(&self, key: i64) -> std::result::Result<usize, usize> {
        self.keys.binary_search(&key)
    }

    /// Returns the record at `idx`.
    #[inline]
    pub fn value(&self, idx: usize) -> &[u8] {
        let start = idx * self.value_size;
        &self.values[start..start + self.value_size]
    }

    /// Returns the record at `idx` for in-place modification.
    #[inline]
    pub fn value_mut(&mut self, idx: usize) -> &mut [u8] {
        let start = idx * self.value_size;
        &mut self.values[start..start + self.value_size]
    }

    /// Inserts an entry at `pos`, which must keep the keys sorted.
    pub fn insert_at(&mut self, pos: usize, key: i64, value: &[u8]) {
        debug_assert_eq!(value.len(), self.value_size);
        let start = pos * self.value_size;
        self.keys.insert(pos, key);
        self.values.splice(start..start, value.iter().copied());
    }

    /// Iterates over `(key, record)` pairs in key order.
    pub fn entries(&self) -> impl Iterator<Item = (i64, &[u8])> + '_ {
        self.keys
            .iter()
            .enumerate()
            .map(move |(idx, key)| (*key, self.value(idx)))
    }

    /// Splits this leaf at the median. Returns (separator, new right leaf).
    ///
    /// The separator is the first key of the right leaf. The leaf must hold
    /// at least two entries.
    pub fn split(&mut self) -> (i64, LeafNode) {
        debug_assert!(self.keys.len() >= 2, "splitting leaf with {} keys", self.keys.len());
        let mid = self.keys.len() / 2;

        let right_keys = self.keys.split_off(mid);
        let right_values = self.values.split_off(mid * self.value_size);
        let split_key = right_keys[0];

        let right = LeafNode {
            keys: right_keys,
            values: right_values,
            value_size: self.value_size,
        };

        (split_key, right)
    }
}

/// B-tree internal (directory) node: `n` routing keys and `n + 1` children.
///
/// Child `i` holds keys `k` with `keys[i - 1] <= k < keys[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalNode {
    /// Height above the leaves (leaves are level 0).
    level: u16,
    /// Sorted routing keys.
    keys: Vec<i64>,
    /// Child page ids, one more than keys.
    children: Vec<PageId>,
}

impl InternalNode {
    /// Creates an internal node with two children split by `key`.
    pub fn new(level: u16, left: PageId, key: i64, right: PageId) -> Self {
        Self {
            level,
            keys: vec![key],
            children: vec![left, right],
        }
    }

    /// Returns the level.
    #[inline]
    pub fn level(&self) -> u16 {
        self.level
    }

    /// Returns the number of keys.
    #[inline]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns true if the node has no keys.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Returns the routing keys.
    #[inline]
    pub fn keys(&self) -> &[i64] {
        &self.keys
    }

    /// Returns the child page ids.
    #[inline]
    pub fn children(&self) -> &[PageId] {
        &self.children
    }

    /// Returns the index of the child whose subtree may contain `key`.
    #[inline]
    pub fn find_child_index(&self, key: i64) -> usize {
        self.keys.partition_point(|k| *k <= key)
    }

    /// Returns the child page at `idx`.
    #[inline]
    pub fn child(&self, idx: usize) -> PageId {
        self.children[idx]
    }

    /// Records a split of child `child_idx`: `key` separates it from the new
    /// `right` sibling placed just after it.
    pub fn insert_at(&mut self, child_idx: usize, key: i64, right: PageId) {
        self.keys.insert(child_idx, key);
        self.children.insert(child_idx + 1, right);
    }

    /// Splits this node at the median. Returns (promoted key, new right node).
    ///
    /// The promoted key moves up and is kept in neither half. The node must
    /// hold at least three keys so that both halves keep one.
    pub fn split(&mut self) -> (i64, InternalNode) {
        debug_assert!(
            self.keys.len() >= 3,
            "splitting internal node with {} keys",
            self.keys.len()
        );
        let mid = self.keys.len() / 2;
        let promoted = self.keys[mid];

        let right_keys = self.keys.split_off(mid + 1);
        let right_children = self.children.split_off(mid + 1);
        self.keys.truncate(mid);

        let right = InternalNode {
            level: self.level,
            keys: right_keys,
            children: right_children,
        };

        (promoted, right)
    }
}

/// A decoded B-tree page.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf(LeafNode),
    Internal(InternalNode),
}

impl Node {
    /// Returns the level (0 for leaves).
    pub fn level(&self) -> u16 {
        match self {
            Node::Leaf(_) => 0,
            Node::Internal(node) => node.level(),
        }
    }

    /// Returns the leaf, or an invariant violation if this is an internal node.
    pub fn as_leaf(&self, page_id: PageId) -> Result<&LeafNode> {
        match self {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Internal(_) => Err(unexpected_kind(page_id, "leaf")),
        }
    }

    /// Mutable form of `as_leaf`.
    pub fn as_leaf_mut(&mut self, page_id: PageId) -> Result<&mut LeafNode> {
        match self {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Internal(_) => Err(unexpected_kind(page_id, "leaf")),
        }
    }

    /// Returns the internal node, or an invariant violation if this is a leaf.
    pub fn as_internal(&self, page_id: PageId) -> Result<&InternalNode> {
        match self {
            Node::Internal(node) => Ok(node),
            Node::Leaf(_) => Err(unexpected_kind(page_id, "internal")),
        }
    }

    /// Mutable form of `as_internal`.
    pub fn as_internal_mut(&mut self, page_id: PageId) -> Result<&mut InternalNode> {
        match self {
            Node::Internal(node) => Ok(node),
            Node::Leaf(_) => Err(unexpected_kind(page_id, "internal")),
        }
    }
}

fn unexpected_kind(page_id: PageId, expected: &str) -> LofError {
    LofError::InvariantViolation(format!("{} is not an {} node", page_id, expected))
}

/// Page codec translating between page bytes and `Node`.
#[derive(Debug, Clone, Copy)]
pub struct NodeCodec {
    layout: IndexLayout,
}

impl NodeCodec {
    /// Creates a codec for the given layout.
    pub fn new(layout: IndexLayout) -> Self {
        Self { layout }
    }

    /// Returns the layout.
    pub fn layout(&self) -> &IndexLayout {
        &self.layout
    }

    fn decode_leaf(&self, page_id: PageId, header: NodeHeader, data: &[u8]) -> Result<LeafNode> {
        let num_keys = header.num_keys as usize;
        if num_keys > self.layout.max_leaf_entries() {
            return Err(corrupted(
                page_id,
                format!(
                    "{} leaf entries exceed capacity {}",
                    num_keys,
                    self.layout.max_leaf_entries()
                ),
            ));
        }

        let key_size = self.layout.key_size();
        let value_size = self.layout.value_size();
        let mut leaf = LeafNode {
            keys: Vec::with_capacity(num_keys + 1),
            values: Vec::with_capacity((num_keys + 1) * value_size),
            value_size,
        };

        let mut offset = NodeHeader::SIZE;
        for _ in 0..num_keys {
            leaf.keys.push(self.layout.decode_key(&data[offset..]));
            offset += key_size;
            leaf.values
                .extend_from_slice(&data[offset..offset + value_size]);
            offset += value_size;
        }

        check_sorted(page_id, &leaf.keys)?;
        Ok(leaf)
    }

    fn decode_internal(
        &self,
        page_id: PageId,
        header: NodeHeader,
        data: &[u8],
    ) -> Result<InternalNode> {
        let num_keys = header.num_keys as usize;
        if num_keys == 0 || num_keys > self.layout.max_internal_keys() {
            return Err(corrupted(
                page_id,
                format!(
                    "{} internal keys outside 1..={}",
                    num_keys,
                    self.layout.max_internal_keys()
                ),
            ));
        }
        if header.level == 0 {
            return Err(corrupted(page_id, "internal node at level 0".to_string()));
        }

        let key_size = self.layout.key_size();
        let mut node = InternalNode {
            level: header.level,
            keys: Vec::with_capacity(num_keys + 1),
            children: Vec::with_capacity(num_keys + 2),
        };

        let mut offset = NodeHeader::SIZE;
        node.children.push(read_child(data, offset));
        offset += CHILD_PTR_SIZE;
        for _ in 0..num_keys {
            node.keys.push(self.layout.decode_key(&data[offset..]));
            offset += key_size;
            node.children.push(read_child(data, offset));
            offset += CHILD_PTR_SIZE;
        }

        check_sorted(page_id, &node.keys)?;
        Ok(node)
    }
}

impl PageCodec for NodeCodec {
    type Page = Node;

    fn decode(&self, page_id: PageId, data: &[u8]) -> Result<Node> {
        if data.len() != self.layout.page_size() {
            return Err(LofError::PageSizeMismatch {
                expected: self.layout.page_size(),
                actual: data.len(),
            });
        }

        let header = NodeHeader::from_bytes(data)
            .ok_or_else(|| corrupted(page_id, format!("unknown page type {}", data[0])))?;

        if header.page_num != page_id.page_num() {
            return Err(corrupted(
                page_id,
                format!("header names page {}", header.page_num),
            ));
        }

        match header.page_type {
            PageType::BTreeLeaf => Ok(Node::Leaf(self.decode_leaf(page_id, header, data)?)),
            PageType::BTreeInternal => Ok(Node::Internal(
                self.decode_internal(page_id, header, data)?,
            )),
            PageType::Unformatted => Err(corrupted(page_id, "page is unformatted".to_string())),
        }
    }

    fn encode(&self, page_id: PageId, page: &Node, buf: &mut [u8]) -> Result<()> {
        if buf.len() != self.layout.page_size() {
            return Err(LofError::PageSizeMismatch {
                expected: self.layout.page_size(),
                actual: buf.len(),
            });
        }
        buf.fill(0);

        let key_size = self.layout.key_size();
        let mut offset = NodeHeader::SIZE;

        let header = match page {
            Node::Leaf(leaf) => {
                if leaf.len() > self.layout.max_leaf_entries() {
                    return Err(overflow(page_id, leaf.len()));
                }
                for (key, value) in leaf.entries() {
                    self.layout.encode_key(key, &mut buf[offset..]);
                    offset += key_size;
                    buf[offset..offset + value.len()].copy_from_slice(value);
                    offset += value.len();
                }
                NodeHeader {
                    page_type: PageType::BTreeLeaf,
                    num_keys: leaf.len() as u16,
                    page_num: page_id.page_num(),
                    level: 0,
                }
            }
            Node::Internal(node) => {
                if node.len() > self.layout.max_internal_keys() {
                    return Err(overflow(page_id, node.len()));
                }
                let first_child = node.children[0].page_num().to_le_bytes();
                buf[offset..offset + CHILD_PTR_SIZE].copy_from_slice(&first_child);
                offset += CHILD_PTR_SIZE;
                for (key, child) in node.keys.iter().zip(&node.children[1..]) {
                    self.layout.encode_key(*key, &mut buf[offset..]);
                    offset += key_size;
                    buf[offset..offset + CHILD_PTR_SIZE]
                        .copy_from_slice(&child.page_num().to_le_bytes());
                    offset += CHILD_PTR_SIZE;
                }
                NodeHeader {
                    page_type: PageType::BTreeInternal,
                    num_keys: node.len() as u16,
                    page_num: page_id.page_num(),
                    level: node.level,
                }
            }
        };

        buf[..NodeHeader::SIZE].copy_from_slice(&header.to_bytes());
        Ok(())
    }
}

fn read_child(data: &[u8], offset: usize) -> PageId {
    PageId::new(u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ]))
}

fn check_sorted(page_id: PageId, keys: &[i64]) -> Result<()> {
    if let Some(pair) = keys.windows(2).find(|pair| pair[0] >= pair[1]) {
        return Err(LofError::InvariantViolation(format!(
            "{} keys out of order: {} before {}",
            page_id, pair[0], pair[1]
        )));
    }
    Ok(())
}

fn corrupted(page_id: PageId, reason: String) -> LofError {
    LofError::PageCorrupted {
        page_id: page_id.page_num(),
        reason,
    }
}

fn overflow(page_id: PageId, len: usize) -> LofError {
    LofError::InvariantViolation(format!("{} holds {} keys, over capacity", page_id, len))
}
