//! Storage engine for the LOF table.
//!
//! This crate provides:
//! - Disk manager and in-memory page stores
//! - Paged B+ tree index reached through the page cache
//! - The LOF record table layered on the index

mod btree;
mod disk;
mod memory;
mod table;

pub use btree::{
    BTreeIndex, IndexLayout, InternalNode, LeafNode, MAX_KEY_SIZE, MIN_NODE_KEYS,
    NODE_HEADER_SIZE, Node, NodeCodec, NodeHeader, RecordMut,
};
pub use disk::{DiskManager, DiskManagerConfig};
pub use memory::MemoryPageStore;
pub use table::{EXPORT_COLUMNS, EXPORT_RULE, LofEntry, LofEntryMut, LofTable, SharedLofTable};
