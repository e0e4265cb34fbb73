//! Page cache for the LOF table storage engine.
//!
//! This crate provides in-memory caching of decoded pages with:
//! - Fixed number of frames derived from a page size / cache size budget
//! - LRU eviction policy
//! - Dirty page tracking with write-back through the page store

mod codec;
mod frame;
mod pool;
mod replacer;

pub use codec::PageCodec;
pub use frame::{BufferFrame, FrameId};
pub use pool::{PageCache, PageCacheStats};
pub use replacer::{LruReplacer, Replacer};
