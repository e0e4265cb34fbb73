//! In-memory page store.

use lof_common::page::PageId;
use lof_common::store::PageStore;
use lof_common::{LofError, Result};

/// Page store keeping every page in RAM.
///
/// Page numbers map directly to Vec indices. Content is lost on drop.
pub struct MemoryPageStore {
    /// Page size in bytes.
    page_size: usize,
    /// Pages stored by page number (index = page_num).
    pages: Vec<Box<[u8]>>,
}

impl MemoryPageStore {
    /// Creates a new empty page store.
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            pages: Vec::new(),
        }
    }

    fn page_index(&self, page_id: PageId) -> Result<usize> {
        let idx = page_id.page_num() as usize;
        if idx >= self.pages.len() {
            return Err(LofError::IoError(format!("{} was never allocated", page_id)));
        }
        Ok(idx)
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.page_size {
            return Err(LofError::PageSizeMismatch {
                expected: self.page_size,
                actual: len,
            });
        }
        Ok(())
    }
}

impl PageStore for MemoryPageStore {
    fn page_size(&self) -> usize {
        self.page_size
    }

    #[inline]
    fn allocate(&mut self) -> Result<PageId> {
        let page_num = self.pages.len() as u32;
        self.pages.push(vec![0u8; self.page_size].into_boxed_slice());
        Ok(PageId::new(page_num))
    }

    #[inline]
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        self.check_len(buf.len())?;
        let idx = self.page_index(page_id)?;
        buf.copy_from_slice(&self.pages[idx]);
        Ok(())
    }

    #[inline]
    fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
        self.check_len(data.len())?;
        let idx = self.page_index(page_id)?;
        self.pages[idx].copy_from_slice(data);
        Ok(())
    }

    fn num_pages(&self) -> u32 {
        self.pages.len() as u32
    }
}
