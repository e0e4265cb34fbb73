//! Cache frame management.

use lof_common::page::PageId;

/// Unique identifier for a frame in the page cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u32);

impl FrameId {
    /// Returns the frame index into the cache's frame array.
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame:{}", self.0)
    }
}

/// A slot in the page cache holding at most one decoded page.
///
/// Each frame contains:
/// - The page id and decoded page currently loaded (if any)
/// - A dirty flag telling the cache to write the page back before reuse
pub struct BufferFrame<P> {
    /// Frame identifier.
    frame_id: FrameId,
    /// The page currently stored in this frame.
    slot: Option<(PageId, P)>,
    /// Whether the page differs from its persisted content.
    is_dirty: bool,
}

impl<P> BufferFrame<P> {
    /// Creates a new empty frame.
    pub fn new(frame_id: FrameId) -> Self {
        Self {
            frame_id,
            slot: None,
            is_dirty: false,
        }
    }

    /// Returns the frame ID.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the page ID currently stored in this frame.
    #[inline]
    pub fn page_id(&self) -> Option<PageId> {
        self.slot.as_ref().map(|(page_id, _)| *page_id)
    }

    /// Returns the decoded page.
    #[inline]
    pub fn page(&self) -> Option<&P> {
        self.slot.as_ref().map(|(_, page)| page)
    }

    /// Returns the decoded page for modification.
    ///
    /// Does not set the dirty flag; the cache does that.
    #[inline]
    pub fn page_mut(&mut self) -> Option<&mut P> {
        self.slot.as_mut().map(|(_, page)| page)
    }

    /// Returns true if this frame is empty (no page loaded).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }

    /// Returns true if this frame is dirty.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    /// Sets the dirty flag.
    #[inline]
    pub fn set_dirty(&mut self, dirty: bool) {
        self.is_dirty = dirty;
    }

    /// Loads a page into this frame, replacing whatever it held.
    pub fn install(&mut self, page_id: PageId, page: P, dirty: bool) {
        self.slot = Some((page_id, page));
        self.is_dirty = dirty;
    }

    /// Empties the frame and returns its previous content.
    pub fn reset(&mut self) -> Option<(PageId, P)> {
        self.is_dirty = false;
        self.slot.take()
    }
}
