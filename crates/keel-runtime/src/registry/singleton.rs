//! Singleton exclusion
//!
//! Among the singleton publishers of one capability at most one may be
//! active. Members are considered best first; a member is excluded when
//! another member's usage is locked, or when a better member that is not
//! itself excluded is wanted or still active. A service publishing several
//! singleton capabilities is excluded if any of them excludes it.

use std::collections::HashSet;

use keel_core::Phase;

use super::Publication;
use crate::graph::{Graph, NodeKey, PartKind};

/// Services shut out by singleton control, given the raw wanted set
pub(crate) fn exclusions(graph: &Graph, wanted: &HashSet<NodeKey>) -> HashSet<NodeKey> {
    let locked = locked_publications(graph);
    let mut excluded = HashSet::new();

    for registry in graph.registries.values().filter(|r| r.is_singleton()) {
        let members: Vec<Publication> = registry.singleton_members().copied().collect();
        for (i, member) in members.iter().enumerate() {
            let sibling_locked = members
                .iter()
                .any(|other| other.node != member.node && locked.contains(&(other.node, other.part)));
            let better_claims = members[..i].iter().any(|better| {
                better.node != member.node
                    && !excluded.contains(&better.node)
                    && (wanted.contains(&better.node) || is_engaged(graph, better.node))
            });
            if sibling_locked || better_claims {
                excluded.insert(member.node);
            }
        }
    }
    excluded
}

/// Whether some other singleton sibling of `key` is past Pending
pub(crate) fn sibling_active(graph: &Graph, key: NodeKey) -> bool {
    let Some(node) = graph.get(key) else {
        return false;
    };
    node.parts.iter().any(|part| match &part.kind {
        PartKind::Interface(iface) if iface.singleton => graph
            .registries
            .get(&iface.interface)
            .map(|r| {
                r.singleton_members()
                    .any(|m| m.node != key && graph.get(m.node).map(|n| n.phase.is_active()).unwrap_or(false))
            })
            .unwrap_or(false),
        _ => false,
    })
}

fn is_engaged(graph: &Graph, key: NodeKey) -> bool {
    graph
        .get(key)
        .map(|n| n.phase.is_active() || n.phase == Phase::Pending)
        .unwrap_or(false)
}

/// (provider, part) pairs some import currently holds a lock on
fn locked_publications(graph: &Graph) -> HashSet<(NodeKey, usize)> {
    let mut locked = HashSet::new();
    for key in graph.keys() {
        let Some(node) = graph.get(key) else {
            continue;
        };
        for part in &node.parts {
            let PartKind::Import(import) = &part.kind else {
                continue;
            };
            let state = import.slot.state();
            if state.locks == 0 {
                continue;
            }
            if let Some(binding) = &state.binding {
                if let Some(index) = (binding.part.part() as usize).checked_sub(1) {
                    locked.insert((binding.provider, index));
                }
            }
        }
    }
    locked
}
