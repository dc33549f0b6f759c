//! Service graph arena
//!
//! Nodes live in a slot arena addressed by generation-checked [`NodeKey`]s,
//! so a stale key from a destroyed node never resolves to its successor.
//! Parent/child links and dependency bindings are keys, never pointers.
//!
//! The graph is only touched on the loop thread, behind the context's
//! mutex. Promise resolutions and released services produced while it is
//! locked are parked in [`Deferred`] and settled after the lock drops, so
//! user continuations and destructors never run under it.

mod binding;
mod lifecycle;
mod part;
mod view;

pub(crate) use part::{ExportPart, ImportPart, InterfacePart, Part, PartKind};
pub use part::{PartInfo, UsageState};
pub use view::{Ancestors, GraphView, PostOrder, PreOrder};

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use keel_core::constants::ROOT_CLUSTER;
use keel_core::{
    Completion, Epoch, Guid, IdAllocator, InterfaceId, KeelResult, Outcome, Phase, Priority,
    Promise, Rank,
};

use crate::config::RuntimeConfig;
use crate::context::ContextShared;
use crate::ownership::{Attachment, ErasedRef, ErasedService, ServiceCell, ServiceCore};
use crate::registry::Registry;
use crate::scheduler::SchedulingQueue;
use crate::service::Service;

/// Generation-checked arena index
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeKey {
    index: u32,
    generation: u32,
}

impl NodeKey {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeKey({}v{})", self.index, self.generation)
    }
}

/// One attached service
pub(crate) struct Node {
    pub service: Arc<dyn ErasedService>,
    pub guid: Guid,
    pub epoch: Epoch,
    pub name: &'static str,
    pub priority: Priority,
    pub parent: Option<NodeKey>,
    pub children: Vec<NodeKey>,
    pub parts: Vec<Part>,
    pub phase: Phase,
    /// Strongly owned by the parent's export
    pub owned: bool,
    pub is_default: bool,
    /// A caller asked for this service to run
    pub explicit_start: bool,
    /// Kept down until the next explicit start
    pub held_down: bool,
    /// Detach requested; destroyed once stopped
    pub destroying: bool,
    /// Shut out by singleton control
    pub excluded: bool,
    pub start_waiters: Vec<Promise<()>>,
    pub stop_waiters: Vec<Promise<()>>,
    pub detach_waiters: Vec<Promise<()>>,
}

impl Node {
    #[inline]
    pub fn core(&self) -> &ServiceCore {
        self.service.core()
    }

    /// Update the phase and its mirror in the control block
    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.service.core().set_phase(phase);
    }

    #[inline]
    pub fn rank(&self) -> Rank {
        Rank::new(self.priority, self.guid)
    }

    pub fn import(&self, part: usize) -> Option<&ImportPart> {
        match &self.parts.get(part)?.kind {
            PartKind::Import(import) => Some(import),
            _ => None,
        }
    }

    pub fn interface(&self, part: usize) -> Option<&InterfacePart> {
        match &self.parts.get(part)?.kind {
            PartKind::Interface(iface) => Some(iface),
            _ => None,
        }
    }
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Work to settle once the graph lock is released
#[derive(Default)]
pub(crate) struct Deferred {
    pub resolutions: Vec<(Promise<()>, Outcome<()>)>,
    pub released: Vec<ErasedRef>,
    pub graveyard: Vec<Node>,
}

impl Deferred {
    /// Resolve promises and drop released objects; call without the lock
    pub fn settle(self) {
        let Deferred {
            resolutions,
            released,
            graveyard,
        } = self;
        drop(graveyard);
        drop(released);
        for (promise, outcome) in resolutions {
            promise.complete(outcome);
        }
    }
}

/// Placeholder service at the root of every context
struct Root;

impl Service for Root {}

pub(crate) struct Graph {
    slots: Vec<Slot>,
    slot_ids: IdAllocator,
    by_guid: HashMap<Guid, NodeKey>,
    clusters: IdAllocator,
    components: HashMap<u32, IdAllocator>,
    max_components: u32,
    pub registries: HashMap<InterfaceId, Registry>,
    pub root: NodeKey,
    pub queue: SchedulingQueue,
    pub shutting_down: bool,
    pub shut_down: bool,
    pub shutdown_waiters: Vec<Promise<()>>,
    pub context: Weak<ContextShared>,
    pub deferred: Deferred,
    /// Start/stop hooks whose completion is outstanding
    pub in_flight: usize,
}

impl Graph {
    pub fn new(config: &RuntimeConfig, context: Weak<ContextShared>) -> Self {
        let mut graph = Self {
            slots: Vec::new(),
            slot_ids: IdAllocator::new(0, u32::MAX),
            by_guid: HashMap::new(),
            clusters: IdAllocator::new(ROOT_CLUSTER + 1, config.max_clusters),
            components: HashMap::new(),
            max_components: config.max_components,
            registries: HashMap::new(),
            root: NodeKey::new(0, 0),
            queue: SchedulingQueue::new(),
            shutting_down: false,
            shut_down: false,
            shutdown_waiters: Vec::new(),
            context,
            deferred: Deferred::default(),
            in_flight: 0,
        };

        let service: Arc<dyn ErasedService> = ServiceCell::new(Root);
        let guid = Guid::of_service(ROOT_CLUSTER, 0);
        let core = service.core();
        core.set_guid(guid);
        core.set_epoch(Epoch::NONE.next());
        core.set_flag(crate::ownership::flags::STATIC);
        let node = Node {
            service: Arc::clone(&service),
            guid,
            epoch: Epoch::NONE.next(),
            name: "root",
            priority: Priority::HIGHEST,
            parent: None,
            children: Vec::new(),
            parts: Vec::new(),
            phase: Phase::Running,
            owned: false,
            is_default: false,
            explicit_start: false,
            held_down: false,
            destroying: false,
            excluded: false,
            start_waiters: Vec::new(),
            stop_waiters: Vec::new(),
            detach_waiters: Vec::new(),
        };
        // The arena is empty, so the first slot cannot fail.
        graph.root = graph.insert(node).unwrap_or(NodeKey::new(0, 0));
        core.set_phase(Phase::Running);
        core.attach(Attachment {
            context: graph.context.clone(),
            key: graph.root,
        });
        graph.by_guid.insert(guid, graph.root);
        graph
    }

    fn insert(&mut self, node: Node) -> KeelResult<NodeKey> {
        let index = self.slot_ids.allocate()?;
        let i = index as usize;
        if i == self.slots.len() {
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            return Ok(NodeKey::new(index, 0));
        }
        let slot = &mut self.slots[i];
        debug_assert!(slot.node.is_none(), "allocated slot is occupied");
        slot.generation = slot.generation.wrapping_add(1);
        slot.node = Some(node);
        Ok(NodeKey::new(index, slot.generation))
    }

    fn remove(&mut self, key: NodeKey) -> Option<Node> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        let node = slot.node.take()?;
        self.slot_ids.release(key.index);
        Some(node)
    }

    #[inline]
    pub fn get(&self, key: NodeKey) -> Option<&Node> {
        let slot = self.slots.get(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.node.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, key: NodeKey) -> Option<&mut Node> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.node.as_mut()
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.get(key).is_some()
    }

    pub fn lookup(&self, guid: Guid) -> Option<NodeKey> {
        self.by_guid.get(&guid.service()).copied()
    }

    /// Live node keys, root included
    pub fn keys(&self) -> Vec<NodeKey> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.node.is_some())
            .map(|(i, slot)| NodeKey::new(i as u32, slot.generation))
            .collect()
    }

    /// Attached services, root excluded
    pub fn len(&self) -> usize {
        self.by_guid.len().saturating_sub(1)
    }

    pub fn guid_of(&self, key: NodeKey) -> Guid {
        self.get(key).map(|n| n.guid).unwrap_or(Guid::NONE)
    }

    pub fn view(&self) -> GraphView<'_> {
        GraphView::new(self)
    }

    fn alloc_guid(&mut self, parent: NodeKey, owned: bool) -> KeelResult<Guid> {
        let max_components = self.max_components;
        if owned {
            let cluster = self.guid_of(parent).cluster();
            let component = self
                .components
                .entry(cluster)
                .or_insert_with(|| IdAllocator::new(1, max_components))
                .allocate()?;
            return Ok(Guid::of_service(cluster, component as u16));
        }
        let cluster = self.clusters.allocate()?;
        self.components.insert(cluster, IdAllocator::new(1, max_components));
        Ok(Guid::of_service(cluster, 0))
    }

    fn release_guid(&mut self, guid: Guid) {
        let cluster = guid.cluster();
        if guid.is_cluster_head() {
            self.components.remove(&cluster);
            self.clusters.release(cluster);
        } else if let Some(components) = self.components.get_mut(&cluster) {
            components.release(guid.component() as u32);
        }
    }

    /// Queue a promise resolution for after the lock drops
    pub fn resolve_later(&mut self, promise: Promise<()>, outcome: Outcome<()>) {
        self.deferred.resolutions.push((promise, outcome));
    }

    pub fn resolve_all(&mut self, promises: Vec<Promise<()>>, outcome: Outcome<()>) {
        for promise in promises {
            self.resolve_later(promise, outcome.clone());
        }
    }

    /// Register a waiter for `key` reaching Running
    pub fn wait_started(&mut self, key: NodeKey) -> Completion<()> {
        let (promise, completion) = Completion::pending();
        match self.get_mut(key) {
            Some(node) if node.phase == Phase::Running => return Completion::ready(()),
            Some(node) => node.start_waiters.push(promise),
            None => self.resolve_later(promise, Outcome::Canceled),
        }
        completion
    }

    /// Register a waiter for `key` reaching Stopped
    pub fn wait_stopped(&mut self, key: NodeKey) -> Completion<()> {
        let (promise, completion) = Completion::pending();
        match self.get_mut(key) {
            Some(node) if matches!(node.phase, Phase::Stopped | Phase::Initialized) => {
                return Completion::ready(())
            }
            Some(node) => node.stop_waiters.push(promise),
            None => self.resolve_later(promise, Outcome::Canceled),
        }
        completion
    }
}

impl Drop for Graph {
    /// Bindings hold providers strongly; clear them so import cycles do not
    /// outlive a context dropped without shutdown.
    fn drop(&mut self) {
        let mut released = Vec::new();
        for node in self.slots.iter().filter_map(|s| s.node.as_ref()) {
            for part in &node.parts {
                if let PartKind::Import(import) = &part.kind {
                    let mut state = import.slot.state();
                    state.owner = None;
                    released.extend(state.binding.take());
                }
            }
        }
        drop(released);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_graph_has_root() {
        let graph = Graph::new(&RuntimeConfig::new(), Weak::new());
        let root = graph.get(graph.root).unwrap();
        assert_eq!(root.guid, Guid::of_service(ROOT_CLUSTER, 0));
        assert_eq!(root.phase, Phase::Running);
        assert_eq!(graph.len(), 0);
        assert_eq!(graph.lookup(root.guid), Some(graph.root));
    }

    #[test]
    fn test_stale_key_does_not_resolve() {
        let mut graph = Graph::new(&RuntimeConfig::new(), Weak::new());
        let root = graph.root;
        let template = |g: &Graph| {
            let r = g.get(g.root).unwrap();
            Node {
                service: Arc::clone(&r.service),
                guid: Guid::of_service(9, 0),
                epoch: Epoch::new(1),
                name: "n",
                priority: Priority::DEFAULT,
                parent: Some(root),
                children: Vec::new(),
                parts: Vec::new(),
                phase: Phase::Stopped,
                owned: false,
                is_default: false,
                explicit_start: false,
                held_down: false,
                destroying: false,
                excluded: false,
                start_waiters: Vec::new(),
                stop_waiters: Vec::new(),
                detach_waiters: Vec::new(),
            }
        };
        let first = graph.insert(template(&graph)).unwrap();
        assert!(graph.remove(first).is_some());
        let second = graph.insert(template(&graph)).unwrap();
        assert_eq!(first.index(), second.index());
        assert_ne!(first.generation(), second.generation());
        assert!(graph.get(first).is_none());
        assert!(graph.get(second).is_some());
    }

    #[test]
    fn test_cluster_ids_recycle_lifo() {
        let mut graph = Graph::new(&RuntimeConfig::new(), Weak::new());
        let root = graph.root;
        let a = graph.alloc_guid(root, false).unwrap();
        let b = graph.alloc_guid(root, false).unwrap();
        assert_eq!((a.cluster(), b.cluster()), (1, 2));
        assert!(a.is_cluster_head());
        graph.release_guid(a);
        assert_eq!(graph.alloc_guid(root, false).unwrap().cluster(), 1);
    }
}
