use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::common::{AccessType, FrameId, Timestamp};

/// Access bookkeeping for a single tracked frame
#[derive(Debug)]
struct LruKNode {
    /// Access timestamps, newest first, truncated to at most k entries
    history: VecDeque<Timestamp>,
    is_evictable: bool,
}

impl LruKNode {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            is_evictable: false,
        }
    }

    fn record(&mut self, timestamp: Timestamp, k: usize) {
        self.history.push_front(timestamp);
        while self.history.len() > k {
            self.history.pop_back();
        }
    }

    /// Backward k-distance, or None for frames with fewer than k recorded
    /// accesses (infinite distance).
    fn k_distance(&self, now: Timestamp, k: usize) -> Option<Timestamp> {
        if self.history.len() < k {
            None
        } else {
            Some(now - self.history[k - 1])
        }
    }

    fn earliest(&self) -> Option<Timestamp> {
        self.history.back().copied()
    }
}

struct ReplacerInner {
    node_store: HashMap<FrameId, LruKNode>,
    current_timestamp: Timestamp,
    /// Number of evictable nodes
    curr_size: usize,
}

/// LRU-K replacement policy.
///
/// Evicts the frame whose backward k-distance (time between now and the
/// k-th most recent access) is largest. A frame with fewer than k recorded
/// accesses has infinite k-distance; among such frames the one whose
/// earliest recorded access is oldest wins. `Scan` accesses are tracked but
/// leave no history, so sequential scans cannot flush the hot set.
pub struct LruKReplacer {
    k: usize,
    /// Maximum number of frames the replacer can track
    replacer_size: usize,
    inner: Mutex<ReplacerInner>,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 0, "LRU-K requires k >= 1");
        Self {
            k,
            replacer_size: num_frames,
            inner: Mutex::new(ReplacerInner {
                node_store: HashMap::new(),
                current_timestamp: 0,
                curr_size: 0,
            }),
        }
    }

    /// Evicts the evictable frame with the largest backward k-distance.
    /// Returns None if no frame is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();
        if inner.curr_size == 0 {
            return None;
        }

        let now = inner.current_timestamp;

        let mut victim: Option<FrameId> = None;
        let mut victim_k_dist: Option<Timestamp> = None;
        let mut victim_earliest: Option<Timestamp> = None;

        for (frame_id, node) in inner.node_store.iter() {
            if !node.is_evictable {
                continue;
            }

            let k_dist = node.k_distance(now, self.k);
            let earliest = node.earliest();

            let replaces = match (victim_k_dist, k_dist) {
                // Victim is infinite, candidate finite: keep victim
                (None, Some(_)) => false,
                // Victim finite, candidate infinite: candidate wins
                (Some(_), None) => true,
                // Both infinite: older earliest access wins; a frame with no
                // recorded accesses ranks newest
                (None, None) => match (victim_earliest, earliest) {
                    (Some(v_ts), Some(c_ts)) => c_ts < v_ts,
                    (None, Some(_)) => true,
                    _ => false,
                },
                // Both finite: larger k-distance wins
                (Some(v_dist), Some(c_dist)) => c_dist > v_dist,
            };

            if victim.is_none() || replaces {
                victim = Some(*frame_id);
                victim_k_dist = k_dist;
                victim_earliest = earliest;
            }
        }

        if let Some(frame_id) = victim {
            inner.node_store.remove(&frame_id);
            inner.curr_size -= 1;
        }

        victim
    }

    /// Records an access to the given frame at the next logical timestamp.
    /// A `Scan` access creates the tracking node if the frame is unseen but
    /// leaves no history entry.
    pub fn record_access(&self, frame_id: FrameId, access_type: AccessType) {
        assert!(
            frame_id.as_usize() < self.replacer_size,
            "frame {} out of range for replacer of size {}",
            frame_id,
            self.replacer_size
        );

        let mut inner = self.inner.lock();
        inner.current_timestamp += 1;
        let timestamp = inner.current_timestamp;

        let node = inner
            .node_store
            .entry(frame_id)
            .or_insert_with(LruKNode::new);
        if access_type == AccessType::Scan {
            return;
        }
        node.record(timestamp, self.k);
    }

    /// Sets whether a frame is evictable. The frame must be tracked;
    /// calling this for an unknown frame is a caller bug.
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        let node = match inner.node_store.get_mut(&frame_id) {
            Some(node) => node,
            None => panic!("set_evictable on untracked frame {}", frame_id),
        };

        if node.is_evictable != evictable {
            node.is_evictable = evictable;
            if evictable {
                inner.curr_size += 1;
            } else {
                inner.curr_size -= 1;
            }
        }
    }

    /// Stops tracking a frame entirely. Removing an untracked frame is a
    /// no-op; removing a non-evictable (pinned) frame is a caller bug.
    pub fn remove(&self, frame_id: FrameId) {
        let mut inner = self.inner.lock();

        match inner.node_store.get(&frame_id) {
            None => return,
            Some(node) => {
                assert!(
                    node.is_evictable,
                    "remove of non-evictable frame {}",
                    frame_id
                );
            }
        }

        inner.node_store.remove(&frame_id);
        inner.curr_size -= 1;
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.inner.lock().curr_size
    }

    pub fn k(&self) -> usize {
        self.k
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_k_replacer_new() {
        let replacer = LruKReplacer::new(10, 2);
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.k(), 2);
    }

    #[test]
    fn test_lru_k_replacer_evict_empty() {
        let replacer = LruKReplacer::new(10, 2);
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_lru_k_replacer_infinite_distance_ordering() {
        let replacer = LruKReplacer::new(10, 2);

        replacer.record_access(FrameId::new(0), AccessType::Get);
        replacer.record_access(FrameId::new(1), AccessType::Get);
        replacer.record_access(FrameId::new(2), AccessType::Get);

        replacer.set_evictable(FrameId::new(0), true);
        replacer.set_evictable(FrameId::new(1), true);
        replacer.set_evictable(FrameId::new(2), true);

        assert_eq!(replacer.size(), 3);

        // All have a single access (< k), hence infinite k-distance; the
        // oldest earliest access goes first.
        assert_eq!(replacer.evict(), Some(FrameId::new(0)));
        assert_eq!(replacer.evict(), Some(FrameId::new(1)));
        assert_eq!(replacer.evict(), Some(FrameId::new(2)));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_lru_k_replacer_infinite_beats_finite() {
        let replacer = LruKReplacer::new(10, 2);

        replacer.record_access(FrameId::new(0), AccessType::Get);
        replacer.record_access(FrameId::new(0), AccessType::Get);
        replacer.record_access(FrameId::new(1), AccessType::Get);

        replacer.set_evictable(FrameId::new(0), true);
        replacer.set_evictable(FrameId::new(1), true);

        // Frame 1 has < k accesses and therefore infinite distance.
        assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    }

    #[test]
    fn test_lru_k_replacer_largest_k_distance_wins() {
        let replacer = LruKReplacer::new(10, 2);

        for frame in 0..3u32 {
            replacer.record_access(FrameId::new(frame), AccessType::Get);
            replacer.record_access(FrameId::new(frame), AccessType::Get);
        }

        for frame in 0..3u32 {
            replacer.set_evictable(FrameId::new(frame), true);
        }

        // Frame 0's second-most-recent access is the oldest of the three.
        assert_eq!(replacer.evict(), Some(FrameId::new(0)));
        assert_eq!(replacer.evict(), Some(FrameId::new(1)));
        assert_eq!(replacer.evict(), Some(FrameId::new(2)));
    }

    #[test]
    fn test_lru_k_replacer_scan_leaves_no_history() {
        let replacer = LruKReplacer::new(10, 2);

        replacer.record_access(FrameId::new(0), AccessType::Get);
        replacer.record_access(FrameId::new(1), AccessType::Scan);

        replacer.set_evictable(FrameId::new(0), true);
        replacer.set_evictable(FrameId::new(1), true);

        // Frame 1 was only scanned: no recorded access, so the frame with a
        // real access history is evicted first.
        assert_eq!(replacer.evict(), Some(FrameId::new(0)));
        assert_eq!(replacer.evict(), Some(FrameId::new(1)));
    }

    #[test]
    fn test_lru_k_replacer_toggle_evictable_is_idempotent() {
        let replacer = LruKReplacer::new(10, 2);

        replacer.record_access(FrameId::new(0), AccessType::Get);
        replacer.set_evictable(FrameId::new(0), true);
        replacer.set_evictable(FrameId::new(0), true);
        assert_eq!(replacer.size(), 1);

        replacer.set_evictable(FrameId::new(0), false);
        replacer.set_evictable(FrameId::new(0), false);
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);

        replacer.set_evictable(FrameId::new(0), true);
        assert_eq!(replacer.evict(), Some(FrameId::new(0)));
    }

    #[test]
    fn test_lru_k_replacer_remove() {
        let replacer = LruKReplacer::new(10, 2);

        replacer.record_access(FrameId::new(0), AccessType::Get);
        replacer.set_evictable(FrameId::new(0), true);
        assert_eq!(replacer.size(), 1);

        replacer.remove(FrameId::new(0));
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);

        // Removing an untracked frame is silent.
        replacer.remove(FrameId::new(5));
    }

    #[test]
    #[should_panic(expected = "non-evictable")]
    fn test_lru_k_replacer_remove_pinned_panics() {
        let replacer = LruKReplacer::new(10, 2);
        replacer.record_access(FrameId::new(0), AccessType::Get);
        replacer.remove(FrameId::new(0));
    }

    #[test]
    #[should_panic(expected = "untracked")]
    fn test_lru_k_replacer_set_evictable_unknown_panics() {
        let replacer = LruKReplacer::new(10, 2);
        replacer.set_evictable(FrameId::new(3), true);
    }
}
