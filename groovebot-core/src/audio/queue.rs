// File: groovebot-core/src/audio/queue.rs

use std::collections::VecDeque;

use chrono::Utc;
use rand::Rng;

use groovebot_common::models::{QueueItem, Track};

/// The per-guild playback backlog. Mutated only through the owning
/// session's operations; no capacity is enforced here (the command layer
/// applies its own limit).
#[derive(Default)]
pub struct TrackQueue {
    items: VecDeque<QueueItem>,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// FIFO append.
    pub fn push_back(&mut self, track: Track, requested_by: impl Into<String>) {
        self.items.push_back(QueueItem {
            track,
            requested_by: requested_by.into(),
            added_at: Utc::now(),
        });
    }

    /// Play-next semantics.
    pub fn push_front(&mut self, track: Track, requested_by: impl Into<String>) {
        self.items.push_front(QueueItem {
            track,
            requested_by: requested_by.into(),
            added_at: Utc::now(),
        });
    }

    pub fn pop_front(&mut self) -> Option<QueueItem> {
        self.items.pop_front()
    }

    /// Bounds-checked removal; `None` when the index is out of range.
    pub fn remove_at(&mut self, index: usize) -> Option<QueueItem> {
        if index >= self.items.len() {
            return None;
        }
        self.items.remove(index)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Fisher-Yates: walk from the tail, swapping each position with a
    /// uniformly random earlier-or-equal one, which gives every permutation
    /// the same probability.
    pub fn shuffle(&mut self) {
        if self.items.len() <= 1 {
            return;
        }
        let mut rng = rand::rng();
        for i in (1..self.items.len()).rev() {
            let j = rng.random_range(0..=i);
            self.items.swap(i, j);
        }
    }

    pub fn snapshot(&self) -> Vec<QueueItem> {
        self.items.iter().cloned().collect()
    }

    pub fn front(&self) -> Option<&QueueItem> {
        self.items.front()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;
    use groovebot_common::models::SourcePlatform;
    use serde_json::json;

    use super::*;

    fn track(title: &str) -> Track {
        Track {
            title: title.to_string(),
            artist: "artist".to_string(),
            duration: "3:00".to_string(),
            platform: SourcePlatform::Youtube,
            platform_id: title.to_string(),
            url: format!("https://www.youtube.com/watch?v={title}"),
            thumbnail: String::new(),
            requested_by: "user".to_string(),
            added_at: Utc::now(),
            metadata: json!({}),
        }
    }

    fn titles(queue: &TrackQueue) -> Vec<String> {
        queue.snapshot().iter().map(|i| i.track.title.clone()).collect()
    }

    #[test]
    fn append_preserves_fifo_order() {
        let mut q = TrackQueue::new();
        q.push_back(track("a"), "u");
        q.push_back(track("b"), "u");
        q.push_back(track("c"), "u");
        assert_eq!(titles(&q), vec!["a", "b", "c"]);
        assert_eq!(q.pop_front().unwrap().track.title, "a");
        assert_eq!(titles(&q), vec!["b", "c"]);
    }

    #[test]
    fn push_front_inserts_at_head() {
        let mut q = TrackQueue::new();
        q.push_back(track("a"), "u");
        q.push_back(track("b"), "u");
        q.push_front(track("next"), "u");
        assert_eq!(titles(&q), vec!["next", "a", "b"]);
    }

    #[test]
    fn remove_at_is_bounds_checked() {
        let mut q = TrackQueue::new();
        q.push_back(track("a"), "u");
        q.push_back(track("b"), "u");
        assert!(q.remove_at(5).is_none());
        assert_eq!(q.len(), 2);
        let removed = q.remove_at(1).unwrap();
        assert_eq!(removed.track.title, "b");
        assert_eq!(titles(&q), vec!["a"]);
        assert!(q.remove_at(1).is_none());
    }

    #[test]
    fn mixed_operation_sequence_matches_documented_effects() {
        let mut q = TrackQueue::new();
        q.push_back(track("a"), "u");
        q.push_back(track("b"), "u");
        q.push_front(track("c"), "u");
        q.push_back(track("d"), "u");
        // [c, a, b, d]
        q.remove_at(1);
        // [c, b, d]
        q.push_front(track("e"), "u");
        assert_eq!(titles(&q), vec!["e", "c", "b", "d"]);
        q.clear();
        assert!(q.is_empty());
    }

    #[test]
    fn shuffle_is_a_permutation() {
        let mut q = TrackQueue::new();
        for name in ["a", "b", "c", "d", "e", "f"] {
            q.push_back(track(name), "u");
        }
        q.shuffle();
        let mut after = titles(&q);
        after.sort();
        assert_eq!(after, vec!["a", "b", "c", "d", "e", "f"]);
    }

    #[test]
    fn shuffle_orderings_are_roughly_uniform() {
        // 4 elements -> 24 orderings. With 2400 trials each ordering
        // expects ~100 hits; the bounds are loose enough to keep the test
        // stable while still catching a biased exchange.
        const TRIALS: usize = 2400;
        let mut counts: HashMap<Vec<String>, usize> = HashMap::new();
        for _ in 0..TRIALS {
            let mut q = TrackQueue::new();
            for name in ["a", "b", "c", "d"] {
                q.push_back(track(name), "u");
            }
            q.shuffle();
            *counts.entry(titles(&q)).or_default() += 1;
        }
        assert_eq!(counts.len(), 24, "every ordering should occur");
        for (order, count) in counts {
            assert!(
                (40..=220).contains(&count),
                "ordering {order:?} occurred {count} times"
            );
        }
    }

    #[test]
    fn shuffle_of_small_queues_is_a_no_op() {
        let mut q = TrackQueue::new();
        q.shuffle();
        assert!(q.is_empty());
        q.push_back(track("solo"), "u");
        q.shuffle();
        assert_eq!(titles(&q), vec!["solo"]);
    }
}
