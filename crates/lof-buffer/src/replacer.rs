//! Page replacement policies for the page cache.

use crate::frame::FrameId;
use std::collections::BTreeMap;

/// Trait for page replacement algorithms.
pub trait Replacer {
    /// Records that the given frame was accessed and is now a candidate victim.
    fn record_access(&mut self, frame_id: FrameId);

    /// Selects and removes a victim frame.
    ///
    /// Returns None if no frames are tracked.
    fn evict(&mut self) -> Option<FrameId>;

    /// Returns the number of tracked frames.
    fn size(&self) -> usize;
}

/// Least-recently-used replacement.
///
/// Every access stamps the frame with a monotonically increasing tick.
/// The victim is the tracked frame with the smallest tick.
pub struct LruReplacer {
    /// Total number of frames.
    num_frames: usize,
    /// Last access tick per frame (None = untracked).
    last_access: Vec<Option<u64>>,
    /// Tracked frames ordered by last access tick.
    order: BTreeMap<u64, FrameId>,
    /// Next tick to hand out.
    tick: u64,
}

impl LruReplacer {
    /// Creates a new LRU replacer for the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            num_frames,
            last_access: vec![None; num_frames],
            order: BTreeMap::new(),
            tick: 0,
        }
    }

    /// Returns the total capacity.
    pub fn capacity(&self) -> usize {
        self.num_frames
    }
}

impl Replacer for LruReplacer {
    fn record_access(&mut self, frame_id: FrameId) {
        let idx = frame_id.index();
        if idx >= self.num_frames {
            return;
        }

        if let Some(old) = self.last_access[idx].take() {
            self.order.remove(&old);
        }

        let tick = self.tick;
        self.tick += 1;
        self.last_access[idx] = Some(tick);
        self.order.insert(tick, frame_id);
    }

    fn evict(&mut self) -> Option<FrameId> {
        let (_, frame_id) = self.order.pop_first()?;
        self.last_access[frame_id.index()] = None;
        Some(frame_id)
    }

    fn size(&self) -> usize {
        self.order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_replacer_new() {
        let replacer = LruReplacer::new(10);
        assert_eq!(replacer.capacity(), 10);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_lru_replacer_evict_empty() {
        let mut replacer = LruReplacer::new(10);
        assert!(replacer.evict().is_none());
    }

    #[test]
    fn test_lru_replacer_evicts_least_recent() {
        let mut replacer = LruReplacer::new(4);

        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));
        replacer.record_access(FrameId(2));
        assert_eq!(replacer.size(), 3);

        assert_eq!(replacer.evict(), Some(FrameId(0)));
        assert_eq!(replacer.evict(), Some(FrameId(1)));
        assert_eq!(replacer.evict(), Some(FrameId(2)));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_lru_replacer_access_refreshes() {
        let mut replacer = LruReplacer::new(3);

        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));
        replacer.record_access(FrameId(2));

        // Touch frame 0 again, frame 1 becomes least recent
        replacer.record_access(FrameId(0));
        assert_eq!(replacer.size(), 3);

        assert_eq!(replacer.evict(), Some(FrameId(1)));
        assert_eq!(replacer.evict(), Some(FrameId(2)));
        assert_eq!(replacer.evict(), Some(FrameId(0)));
    }

    #[test]
    fn test_lru_replacer_out_of_bounds() {
        let mut replacer = LruReplacer::new(5);

        // These should not panic
        replacer.record_access(FrameId(100));

        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_lru_replacer_reaccess_after_evict() {
        let mut replacer = LruReplacer::new(2);

        replacer.record_access(FrameId(0));
        replacer.record_access(FrameId(1));
        assert_eq!(replacer.evict(), Some(FrameId(0)));

        // Frame reused for a new page
        replacer.record_access(FrameId(0));
        assert_eq!(replacer.evict(), Some(FrameId(1)));
        assert_eq!(replacer.evict(), Some(FrameId(0)));
    }
}
