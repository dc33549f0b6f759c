//! Up/down scheduling queues
//!
//! Both queues are ordered by rank, best first, so among peers that are
//! ready at the same time the higher-priority service transitions first.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use keel_core::Rank;

use crate::graph::NodeKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Entry {
    pub rank: Rank,
    pub key: NodeKey,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.rank.cmp(&self.rank).then_with(|| self.key.cmp(&other.key))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Services ready to start (up) and ready to stop (down)
#[derive(Debug, Default)]
pub(crate) struct SchedulingQueue {
    up: BTreeSet<Entry>,
    down: BTreeSet<Entry>,
}

impl SchedulingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_up(&mut self, rank: Rank, key: NodeKey) {
        self.up.insert(Entry { rank, key });
    }

    pub fn push_down(&mut self, rank: Rank, key: NodeKey) {
        self.down.insert(Entry { rank, key });
    }

    pub fn pop_up(&mut self) -> Option<Entry> {
        self.up.pop_first()
    }

    pub fn pop_down(&mut self) -> Option<Entry> {
        self.down.pop_first()
    }

    pub fn remove(&mut self, key: NodeKey) {
        self.up.retain(|e| e.key != key);
        self.down.retain(|e| e.key != key);
    }

    pub fn clear(&mut self) {
        self.up.clear();
        self.down.clear();
    }

    pub fn len_up(&self) -> usize {
        self.up.len()
    }

    pub fn len_down(&self) -> usize {
        self.down.len()
    }

    pub fn is_empty(&self) -> bool {
        self.up.is_empty() && self.down.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::{Guid, Priority};

    fn rank(priority: i32, cluster: u32) -> Rank {
        Rank::new(Priority(priority), Guid::of_service(cluster, 0))
    }

    #[test]
    fn test_best_rank_pops_first() {
        let mut q = SchedulingQueue::new();
        q.push_up(rank(1, 1), NodeKey::new(1, 0));
        q.push_up(rank(9, 2), NodeKey::new(2, 0));
        q.push_up(rank(5, 3), NodeKey::new(3, 0));
        let order: Vec<u32> = std::iter::from_fn(|| q.pop_up()).map(|e| e.key.index()).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn test_priority_tie_prefers_lower_guid() {
        let mut q = SchedulingQueue::new();
        q.push_down(rank(0, 7), NodeKey::new(7, 0));
        q.push_down(rank(0, 4), NodeKey::new(4, 0));
        assert_eq!(q.pop_down().map(|e| e.key.index()), Some(4));
    }

    #[test]
    fn test_remove_and_clear() {
        let mut q = SchedulingQueue::new();
        q.push_up(rank(0, 1), NodeKey::new(1, 0));
        q.push_down(rank(0, 1), NodeKey::new(1, 0));
        q.push_down(rank(0, 2), NodeKey::new(2, 0));
        q.remove(NodeKey::new(1, 0));
        assert_eq!((q.len_up(), q.len_down()), (0, 1));
        q.clear();
        assert!(q.is_empty());
    }
}
