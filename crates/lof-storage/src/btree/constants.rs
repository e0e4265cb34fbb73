//! B-tree page format constants.

/// Size of the node header at the start of every B-tree page.
pub const NODE_HEADER_SIZE: usize = 16;

/// Size of a child page pointer in internal nodes (u32 page number).
pub const CHILD_PTR_SIZE: usize = 4;

/// Smallest number of keys a node must hold for splits to work.
pub const MIN_NODE_KEYS: usize = 2;

/// Widest supported key in bytes.
pub const MAX_KEY_SIZE: usize = 8;
