//! Page store abstraction consumed by the page cache.

use crate::error::Result;
use crate::page::PageId;

/// Fixed-size page storage on some backing medium.
///
/// Implementations perform no caching: every call touches the medium.
/// Pages are zero-filled when allocated and never reclaimed.
pub trait PageStore {
    /// Size of every page in bytes.
    fn page_size(&self) -> usize;

    /// Reserves a new zero-filled page and returns its id.
    fn allocate(&mut self) -> Result<PageId>;

    /// Reads the persisted content of a page into `buf`.
    ///
    /// Fails with `IoError` if the page was never allocated.
    /// `buf` must be exactly `page_size()` bytes.
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()>;

    /// Persists exactly `page_size()` bytes for a previously allocated page.
    fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()>;

    /// Returns the number of allocated pages.
    fn num_pages(&self) -> u32;

    /// Forces written pages to durable storage. A no-op for volatile stores.
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}
