//! Paged B+Tree index over fixed-width integer keys.
//!
//! Every node is one page obtained through the page cache. Nodes are held
//! decoded in cache frames and re-encoded on write-back.
//!
//! Leaf page layout:
//! ```text
//! +------------------------+ 0
//! | NodeHeader (16 bytes)  |
//! +------------------------+ 16
//! | key_0 | record_0       |
//! | key_1 | record_1       |
//! | ...                    |
//! +------------------------+
//! ```
//!
//! Internal page layout:
//! ```text
//! +------------------------+ 0
//! | NodeHeader (16 bytes)  |
//! +------------------------+ 16
//! | child_0: u32           |
//! | key_0 | child_1: u32   |
//! | ...                    |
//! +------------------------+
//! ```
//!
//! With 512-byte pages, 4-byte keys and 24-byte records a leaf holds 17
//! records and an internal node 61 keys.

pub mod constants;
pub mod index;
pub mod page;
pub mod types;

pub use constants::{MAX_KEY_SIZE, MIN_NODE_KEYS, NODE_HEADER_SIZE};
pub use index::{BTreeIndex, RecordMut};
pub use page::{InternalNode, LeafNode, Node, NodeCodec};
pub use types::{IndexLayout, NodeHeader};
