//! Depth-first traversal over dependency edges
//!
//! Iterative, with an explicit stack, so deep graphs cannot overflow the
//! thread stack. Nodes are marked on entry and again when their last edge
//! is walked; an edge into a node still on the stack closes a cycle, which
//! is recorded as the path from that node back to itself.
//!
//! Two modes adjust the walk:
//!
//! - `traverse_all_paths` re-enters nodes already finished through a
//!   different path instead of pruning them
//! - `post_cancel_cycles` reports each cycle once: nodes on a reported
//!   cycle are canceled and further back edges into them are ignored

use std::collections::{HashMap, HashSet};

use crate::graph::NodeKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnStack,
    Done,
}

/// Traversal state, reusable across several start nodes
#[derive(Debug, Default)]
pub(crate) struct DfsData {
    pub traverse_all_paths: bool,
    pub post_cancel_cycles: bool,
    marks: HashMap<NodeKey, Mark>,
    canceled: HashSet<NodeKey>,
    /// Nodes in first-visit order
    pub visited: Vec<NodeKey>,
    /// Nodes in finishing order
    pub finished: Vec<NodeKey>,
    /// Each cycle as a closed path: first node repeated at the end
    pub cycles: Vec<Vec<NodeKey>>,
    pub edges_walked: usize,
}

struct Frame {
    key: NodeKey,
    edges: Vec<NodeKey>,
    next: usize,
}

impl DfsData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn traverse_all_paths(mut self, on: bool) -> Self {
        self.traverse_all_paths = on;
        self
    }

    pub fn post_cancel_cycles(mut self, on: bool) -> Self {
        self.post_cancel_cycles = on;
        self
    }

    pub fn is_visited(&self, key: NodeKey) -> bool {
        self.marks.contains_key(&key)
    }

    pub fn is_acyclic(&self) -> bool {
        self.cycles.is_empty()
    }
}

/// Walk from `start` following `edges`; returns false if a cycle was found
/// during this walk
pub(crate) fn dfs<F>(data: &mut DfsData, start: NodeKey, mut edges: F) -> bool
where
    F: FnMut(NodeKey) -> Vec<NodeKey>,
{
    let cycles_before = data.cycles.len();
    if data.marks.get(&start) == Some(&Mark::Done) && !data.traverse_all_paths {
        return true;
    }
    enter(data, start);
    let mut stack = vec![Frame {
        key: start,
        edges: edges(start),
        next: 0,
    }];

    while let Some(frame) = stack.last_mut() {
        if frame.next == frame.edges.len() {
            let key = frame.key;
            stack.pop();
            data.marks.insert(key, Mark::Done);
            data.finished.push(key);
            continue;
        }
        let next = frame.edges[frame.next];
        frame.next += 1;
        data.edges_walked += 1;

        match data.marks.get(&next) {
            Some(Mark::OnStack) => {
                if data.post_cancel_cycles && data.canceled.contains(&next) {
                    continue;
                }
                let from = stack.iter().position(|f| f.key == next).unwrap_or(0);
                let mut cycle: Vec<NodeKey> = stack[from..].iter().map(|f| f.key).collect();
                cycle.push(next);
                if data.post_cancel_cycles {
                    data.canceled.extend(cycle.iter().copied());
                }
                data.cycles.push(cycle);
            }
            Some(Mark::Done) if !data.traverse_all_paths => {}
            _ => {
                enter(data, next);
                stack.push(Frame {
                    key: next,
                    edges: edges(next),
                    next: 0,
                });
            }
        }
    }
    data.cycles.len() == cycles_before
}

fn enter(data: &mut DfsData, key: NodeKey) {
    if data.marks.insert(key, Mark::OnStack).is_none() {
        data.visited.push(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(i: u32) -> NodeKey {
        NodeKey::new(i, 0)
    }

    fn adjacency(edges: &[(u32, u32)]) -> impl FnMut(NodeKey) -> Vec<NodeKey> + '_ {
        move |from| {
            edges
                .iter()
                .filter(|(a, _)| *a == from.index())
                .map(|(_, b)| k(*b))
                .collect()
        }
    }

    #[test]
    fn test_acyclic_chain() {
        let edges = [(1, 2), (2, 3)];
        let mut data = DfsData::new();
        assert!(dfs(&mut data, k(1), adjacency(&edges)));
        assert_eq!(data.visited, vec![k(1), k(2), k(3)]);
        assert_eq!(data.finished, vec![k(3), k(2), k(1)]);
    }

    #[test]
    fn test_cycle_path_is_closed() {
        let edges = [(1, 2), (2, 3), (3, 2)];
        let mut data = DfsData::new();
        assert!(!dfs(&mut data, k(1), adjacency(&edges)));
        assert_eq!(data.cycles, vec![vec![k(2), k(3), k(2)]]);
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let edges = [(1, 2), (1, 3), (2, 4), (3, 4)];
        let mut data = DfsData::new();
        assert!(dfs(&mut data, k(1), adjacency(&edges)));
        assert_eq!(data.visited.len(), 4);

        let mut all = DfsData::new().traverse_all_paths(true);
        assert!(dfs(&mut all, k(1), adjacency(&edges)));
        // 4 is finished once per path into it.
        assert_eq!(all.finished.iter().filter(|&&n| n == k(4)).count(), 2);
        assert_eq!(all.visited.len(), 4);
    }

    #[test]
    fn test_post_cancel_reports_cycle_once() {
        let edges = [(1, 2), (1, 3), (2, 3), (3, 2)];
        let mut plain = DfsData::new().traverse_all_paths(true);
        dfs(&mut plain, k(1), adjacency(&edges));
        assert!(plain.cycles.len() > 1);

        let mut once = DfsData::new().traverse_all_paths(true).post_cancel_cycles(true);
        dfs(&mut once, k(1), adjacency(&edges));
        assert_eq!(once.cycles.len(), 1);
    }

    #[test]
    fn test_reuse_across_starts_skips_finished() {
        let edges = [(1, 3), (2, 3)];
        let mut data = DfsData::new();
        dfs(&mut data, k(1), adjacency(&edges));
        let walked = data.edges_walked;
        dfs(&mut data, k(2), adjacency(&edges));
        assert_eq!(data.edges_walked, walked + 1);
        assert!(data.is_visited(k(3)));
        assert!(data.is_acyclic());
    }
}
