//! Read-only graph navigation
//!
//! Traversals are lazy and restartable: each is a plain `Clone` iterator,
//! so a caller can fork a traversal mid-way and replay it. None of them
//! mutate the graph.

use keel_core::{Epoch, Guid, Phase, Priority};

use super::{Graph, NodeKey, PartInfo};

/// Borrowed, read-only view of a context's graph
#[derive(Clone, Copy)]
pub struct GraphView<'g> {
    graph: &'g Graph,
}

impl<'g> GraphView<'g> {
    pub(crate) fn new(graph: &'g Graph) -> Self {
        Self { graph }
    }

    fn key(&self, guid: Guid) -> Option<NodeKey> {
        self.graph.lookup(guid)
    }

    pub fn root(&self) -> Guid {
        self.graph.guid_of(self.graph.root)
    }

    /// Attached services, root excluded
    pub fn len(&self) -> usize {
        self.graph.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, guid: Guid) -> bool {
        self.key(guid).is_some()
    }

    pub fn phase(&self, guid: Guid) -> Option<Phase> {
        Some(self.graph.get(self.key(guid)?)?.phase)
    }

    pub fn epoch(&self, guid: Guid) -> Option<Epoch> {
        Some(self.graph.get(self.key(guid)?)?.epoch)
    }

    pub fn name(&self, guid: Guid) -> Option<&'static str> {
        Some(self.graph.get(self.key(guid)?)?.name)
    }

    pub fn priority(&self, guid: Guid) -> Option<Priority> {
        Some(self.graph.get(self.key(guid)?)?.priority)
    }

    pub fn parent(&self, guid: Guid) -> Option<Guid> {
        let parent = self.graph.get(self.key(guid)?)?.parent?;
        Some(self.graph.guid_of(parent))
    }

    pub fn is_excluded(&self, guid: Guid) -> bool {
        self.key(guid)
            .and_then(|k| self.graph.get(k))
            .map(|n| n.excluded)
            .unwrap_or(false)
    }

    /// Parts in ordinal order; empty for unknown services
    pub fn parts(&self, guid: Guid) -> Vec<PartInfo> {
        let Some(node) = self.key(guid).and_then(|k| self.graph.get(k)) else {
            return Vec::new();
        };
        node.parts
            .iter()
            .map(|part| part.info(|child| self.graph.guid_of(child)))
            .collect()
    }

    /// Services `guid` depends on: bound import providers and owned children
    pub fn dependencies(&self, guid: Guid) -> Vec<Guid> {
        let Some(key) = self.key(guid) else {
            return Vec::new();
        };
        self.graph
            .provider_edges(key, true)
            .into_iter()
            .map(|(k, _)| self.graph.guid_of(k))
            .collect()
    }

    /// Services that depend on `guid`
    pub fn dependents(&self, guid: Guid) -> Vec<Guid> {
        let Some(target) = self.key(guid) else {
            return Vec::new();
        };
        self.graph
            .keys()
            .into_iter()
            .filter(|&k| self.graph.provider_edges(k, true).iter().any(|(p, _)| *p == target))
            .map(|k| self.graph.guid_of(k))
            .collect()
    }

    /// Every service transitively under `guid`, parents before children
    pub fn descendants_pre(&self, guid: Guid) -> PreOrder<'g> {
        PreOrder::below(self.graph, self.key(guid), None, false)
    }

    /// Every service transitively under `guid`, children before parents
    pub fn descendants_post(&self, guid: Guid) -> PostOrder<'g> {
        PostOrder::new(self.graph, self.key(guid), false)
    }

    /// The cluster headed by `head`: the head, then its members
    pub fn cluster_members(&self, head: Guid) -> PreOrder<'g> {
        let key = self.key(head.cluster_head());
        PreOrder::from(self.graph, key, Some(head.cluster()))
    }

    /// Cluster heads anywhere under `guid`
    pub fn cluster_heads(&self, guid: Guid) -> PreOrder<'g> {
        PreOrder::below(self.graph, self.key(guid), None, true)
    }

    /// Parent chain up to and including the root
    pub fn ancestors(&self, guid: Guid) -> Ancestors<'g> {
        Ancestors::new(self.graph, self.key(guid), false)
    }

    /// Parent chain up to and including the cluster head
    pub fn ancestors_in_cluster(&self, guid: Guid) -> Ancestors<'g> {
        Ancestors::new(self.graph, self.key(guid), true)
    }
}

/// Pre-order walk of a subtree
#[derive(Clone)]
pub struct PreOrder<'g> {
    graph: &'g Graph,
    stack: Vec<NodeKey>,
    /// Do not descend into other clusters
    cluster: Option<u32>,
    heads_only: bool,
}

impl<'g> PreOrder<'g> {
    /// Walk starting with `start` itself
    fn from(graph: &'g Graph, start: Option<NodeKey>, cluster: Option<u32>) -> Self {
        Self {
            graph,
            stack: start.into_iter().collect(),
            cluster,
            heads_only: false,
        }
    }

    /// Walk of everything strictly below `start`
    pub(crate) fn below(graph: &'g Graph, start: Option<NodeKey>, cluster: Option<u32>, heads_only: bool) -> Self {
        let mut walk = Self {
            graph,
            stack: Vec::new(),
            cluster,
            heads_only,
        };
        if let Some(node) = start.and_then(|k| graph.get(k)) {
            walk.push_children(&node.children);
        }
        walk
    }

    fn push_children(&mut self, children: &[NodeKey]) {
        let graph = self.graph;
        let cluster = self.cluster;
        self.stack.extend(children.iter().rev().copied().filter(|&child| match cluster {
            Some(c) => graph.guid_of(child).cluster() == c,
            None => true,
        }));
    }

    pub(crate) fn next_key(&mut self) -> Option<NodeKey> {
        let graph = self.graph;
        loop {
            let key = self.stack.pop()?;
            let Some(node) = graph.get(key) else {
                continue;
            };
            self.push_children(&node.children);
            if self.heads_only && !node.guid.is_cluster_head() {
                continue;
            }
            return Some(key);
        }
    }
}

impl Iterator for PreOrder<'_> {
    type Item = Guid;

    fn next(&mut self) -> Option<Guid> {
        self.next_key().map(|k| self.graph.guid_of(k))
    }
}

/// Post-order walk of a subtree
#[derive(Clone)]
pub struct PostOrder<'g> {
    graph: &'g Graph,
    /// (node, next child index)
    stack: Vec<(NodeKey, usize)>,
    include_start: bool,
}

impl<'g> PostOrder<'g> {
    pub(crate) fn new(graph: &'g Graph, start: Option<NodeKey>, include_start: bool) -> Self {
        Self {
            graph,
            stack: start.map(|k| vec![(k, 0)]).unwrap_or_default(),
            include_start,
        }
    }

    pub(crate) fn next_key(&mut self) -> Option<NodeKey> {
        let graph = self.graph;
        loop {
            let depth = self.stack.len();
            let (key, next) = self.stack.last_mut()?;
            let children = graph.get(*key).map(|n| n.children.as_slice()).unwrap_or(&[]);
            if let Some(&child) = children.get(*next) {
                *next += 1;
                self.stack.push((child, 0));
                continue;
            }
            let key = *key;
            self.stack.pop();
            if depth == 1 && !self.include_start {
                return None;
            }
            return Some(key);
        }
    }
}

impl Iterator for PostOrder<'_> {
    type Item = Guid;

    fn next(&mut self) -> Option<Guid> {
        self.next_key().map(|k| self.graph.guid_of(k))
    }
}

/// Walk up the parent chain
#[derive(Clone)]
pub struct Ancestors<'g> {
    graph: &'g Graph,
    current: Option<NodeKey>,
    /// Stop at the cluster head of this cluster
    cluster: Option<u32>,
}

impl<'g> Ancestors<'g> {
    fn new(graph: &'g Graph, start: Option<NodeKey>, in_cluster: bool) -> Self {
        let cluster = match (in_cluster, start) {
            (true, Some(k)) => Some(graph.guid_of(k).cluster()),
            _ => None,
        };
        Self {
            graph,
            current: start,
            cluster,
        }
    }

    pub(crate) fn next_key(&mut self) -> Option<NodeKey> {
        let current = self.current.take()?;
        let parent = self.graph.get(current)?.parent?;
        if let Some(c) = self.cluster {
            if self.graph.guid_of(parent).cluster() != c {
                return None;
            }
        }
        self.current = Some(parent);
        Some(parent)
    }
}

impl Iterator for Ancestors<'_> {
    type Item = Guid;

    fn next(&mut self) -> Option<Guid> {
        self.next_key().map(|k| self.graph.guid_of(k))
    }
}
