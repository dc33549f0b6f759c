//! Capability registries
//!
//! One `Registry` per interface id holds the published interfaces of that
//! capability, best first, and the import parts subscribed to it. The graph
//! routes publication and usage changes through [`RegistryEvent`]s to keep
//! every subscriber bound to the best provider.

mod dependency;
mod interface;
pub(crate) mod singleton;

pub use dependency::{Dependency, DependencyGuard};
pub(crate) use dependency::{Binding, ImportSlot, SlotOwner};
pub use interface::{DefaultProvider, Interface};

use keel_core::{InterfaceId, Rank};

use crate::graph::NodeKey;

/// Change observed by a registry's subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RegistryEvent {
    /// An interface was published
    Created(Publication),
    /// An interface was withdrawn
    Destroyed(Publication),
    /// A subscriber's usage took its first lock
    Locked(Subscriber),
    /// A subscriber's usage dropped its last lock
    Unlocked(Subscriber),
}

/// One published interface part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Publication {
    pub rank: Rank,
    pub node: NodeKey,
    /// Index into the node's part list
    pub part: usize,
    pub singleton: bool,
}

/// Import part subscribed to a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Subscriber {
    pub node: NodeKey,
    pub part: usize,
}

pub(crate) struct Registry {
    pub id: InterfaceId,
    pub name: &'static str,
    /// Sorted by rank, best first
    published: Vec<Publication>,
    subscribers: Vec<Subscriber>,
    pub default_provider: Option<DefaultProvider>,
    /// Live default instance created for this capability
    pub default_instance: Option<NodeKey>,
    /// A default instance is being attached
    pub creating_default: bool,
}

impl Registry {
    pub fn new(id: InterfaceId, name: &'static str) -> Self {
        Self {
            id,
            name,
            published: Vec::new(),
            subscribers: Vec::new(),
            default_provider: None,
            default_instance: None,
            creating_default: false,
        }
    }

    pub fn publish(&mut self, publication: Publication) {
        debug_assert!(
            !self
                .published
                .iter()
                .any(|p| p.node == publication.node && p.part == publication.part),
            "interface published twice"
        );
        let pos = self
            .published
            .iter()
            .position(|p| p.rank < publication.rank)
            .unwrap_or(self.published.len());
        self.published.insert(pos, publication);
    }

    pub fn unpublish(&mut self, node: NodeKey, part: usize) -> Option<Publication> {
        let pos = self
            .published
            .iter()
            .position(|p| p.node == node && p.part == part)?;
        Some(self.published.remove(pos))
    }

    pub fn published(&self) -> &[Publication] {
        &self.published
    }

    /// Highest-ranked publication not owned by `node`
    pub fn best_excluding(&self, node: NodeKey) -> Option<Publication> {
        self.published.iter().find(|p| p.node != node).copied()
    }

    pub fn subscribe(&mut self, subscriber: Subscriber) {
        if !self.subscribers.contains(&subscriber) {
            self.subscribers.push(subscriber);
        }
    }

    pub fn unsubscribe(&mut self, subscriber: Subscriber) {
        self.subscribers.retain(|s| *s != subscriber);
    }

    pub fn subscribers(&self) -> &[Subscriber] {
        &self.subscribers
    }

    /// Whether any publication is under singleton control
    pub fn is_singleton(&self) -> bool {
        self.published.iter().any(|p| p.singleton)
    }

    /// Singleton members, best first
    pub fn singleton_members(&self) -> impl Iterator<Item = &Publication> + '_ {
        self.published.iter().filter(|p| p.singleton)
    }

    pub fn is_empty(&self) -> bool {
        self.published.is_empty() && self.subscribers.is_empty() && self.default_instance.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::{Guid, Priority};

    fn publication(priority: i32, cluster: u32) -> Publication {
        Publication {
            rank: Rank::new(Priority(priority), Guid::of_part(Guid::of_service(cluster, 0), 1)),
            node: NodeKey::new(cluster, 0),
            part: 0,
            singleton: false,
        }
    }

    #[test]
    fn test_publications_sorted_best_first() {
        let mut reg = Registry::new(InterfaceId::of("t"), "t");
        reg.publish(publication(1, 1));
        reg.publish(publication(9, 2));
        reg.publish(publication(5, 3));
        let priorities: Vec<i32> = reg.published().iter().map(|p| p.rank.priority.0).collect();
        assert_eq!(priorities, vec![9, 5, 1]);
    }

    #[test]
    fn test_equal_priority_prefers_lower_guid() {
        let mut reg = Registry::new(InterfaceId::of("t"), "t");
        reg.publish(publication(4, 7));
        reg.publish(publication(4, 2));
        assert_eq!(reg.published()[0].node, NodeKey::new(2, 0));
    }

    #[test]
    fn test_best_excluding_skips_own_node() {
        let mut reg = Registry::new(InterfaceId::of("t"), "t");
        reg.publish(publication(9, 1));
        reg.publish(publication(3, 2));
        assert_eq!(reg.best_excluding(NodeKey::new(1, 0)).unwrap().node, NodeKey::new(2, 0));
        assert!(reg.unpublish(NodeKey::new(1, 0), 0).is_some());
        assert!(reg.unpublish(NodeKey::new(1, 0), 0).is_none());
        assert_eq!(reg.best_excluding(NodeKey::new(5, 0)).unwrap().node, NodeKey::new(2, 0));
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let mut reg = Registry::new(InterfaceId::of("t"), "t");
        let sub = Subscriber { node: NodeKey::new(1, 0), part: 2 };
        reg.subscribe(sub);
        reg.subscribe(sub);
        assert_eq!(reg.subscribers().len(), 1);
        reg.unsubscribe(sub);
        assert!(reg.is_empty());
    }
}
