//! Conversion between persisted page bytes and decoded pages.

use lof_common::Result;
use lof_common::page::PageId;

/// Decodes raw page bytes into an in-memory page and encodes it back.
///
/// The cache holds decoded pages only; the codec is invoked on every miss
/// and on every write-back of a dirty page.
pub trait PageCodec {
    /// The decoded page type held by cache frames.
    type Page;

    /// Decodes the persisted content of `page_id`.
    fn decode(&self, page_id: PageId, data: &[u8]) -> Result<Self::Page>;

    /// Encodes `page` into `buf`, which is exactly one page long.
    fn encode(&self, page_id: PageId, page: &Self::Page, buf: &mut [u8]) -> Result<()>;
}
