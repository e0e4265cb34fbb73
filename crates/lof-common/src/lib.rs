//! Common types, errors and configuration for the LOF table storage engine.
//!
//! This crate provides shared definitions used by the buffer and storage crates.

pub mod config;
pub mod error;
pub mod page;
pub mod store;

pub use config::{LofTableConfig, PageCacheConfig};
pub use error::{LofError, Result};
pub use page::{DEFAULT_PAGE_SIZE, PageId, PageType};
pub use store::PageStore;
