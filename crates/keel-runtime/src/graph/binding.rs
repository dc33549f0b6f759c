//! Dependency binding protocol
//!
//! Keeps every import bound to the best provider of its capability:
//!
//! - subscribe: bind the best published provider, else create the default
//!   instance, else stay unsatisfied
//! - provider created: take it if the usage is not locked and its priority
//!   is strictly higher than the current binding's
//! - provider destroyed: rebind to the next best, else the default, else
//!   unbind
//! - unlocked: swap to a better provider that appeared meanwhile
//!
//! A service never binds to its own interfaces.

use std::sync::Arc;

use keel_core::InterfaceId;

use super::{Graph, NodeKey, PartKind};
use crate::ownership::ErasedRef;
use crate::registry::{Binding, DefaultProvider, Publication, Registry, RegistryEvent, Subscriber};

impl Graph {
    pub(crate) fn registry_mut(&mut self, interface: InterfaceId, name: &'static str) -> &mut Registry {
        self.registries
            .entry(interface)
            .or_insert_with(|| Registry::new(interface, name))
    }

    /// Dependency edges out of `key`: (provider, required)
    ///
    /// Bound imports point at their provider; exports point at the owned
    /// child, which must run before its parent. Optional imports are
    /// included only when `with_optional` is set.
    pub(crate) fn provider_edges(&self, key: NodeKey, with_optional: bool) -> Vec<(NodeKey, bool)> {
        let Some(node) = self.get(key) else {
            return Vec::new();
        };
        node.parts
            .iter()
            .filter_map(|part| match &part.kind {
                PartKind::Import(import) if with_optional || !import.optional => {
                    import.slot.bound_provider().map(|p| (p, !import.optional))
                }
                PartKind::Export(export) => export.child.map(|c| (c, true)),
                _ => None,
            })
            .filter(|(p, _)| self.contains(*p))
            .collect()
    }

    /// Whether every required import of `key` is bound
    pub(crate) fn imports_satisfied(&self, key: NodeKey) -> bool {
        let Some(node) = self.get(key) else {
            return false;
        };
        node.parts.iter().all(|part| match &part.kind {
            PartKind::Import(import) => import.optional || import.slot.bound_provider().is_some(),
            _ => true,
        })
    }

    /// Publish interface part `part` of `key` and tell subscribers
    pub(crate) fn publish(&mut self, key: NodeKey, part: usize) {
        let Some(iface) = self.get(key).and_then(|n| n.interface(part)) else {
            return;
        };
        let (interface, name) = (iface.interface, iface.name);
        let publication = Publication {
            rank: iface.rank,
            node: key,
            part,
            singleton: iface.singleton,
        };
        self.registry_mut(interface, name).publish(publication);
        tracing::trace!(
            interface = name,
            provider = %self.guid_of(key),
            priority = %publication.rank.priority,
            "interface published"
        );
        self.notify(interface, RegistryEvent::Created(publication));
    }

    /// Withdraw interface part `part` of `key` and rebind its users
    pub(crate) fn unpublish(&mut self, key: NodeKey, part: usize) {
        let Some(interface) = self.get(key).and_then(|n| n.interface(part)).map(|i| i.interface) else {
            return;
        };
        let Some(registry) = self.registries.get_mut(&interface) else {
            return;
        };
        if registry.default_instance == Some(key) {
            registry.default_instance = None;
        }
        if let Some(publication) = registry.unpublish(key, part) {
            self.notify(interface, RegistryEvent::Destroyed(publication));
        }
    }

    /// Register import part `part` of `key` and bind it
    pub(crate) fn subscribe(&mut self, key: NodeKey, part: usize, default: Option<DefaultProvider>) {
        let Some(import) = self.get(key).and_then(|n| n.import(part)) else {
            return;
        };
        let (interface, name) = (import.interface, import.name);
        let subscriber = Subscriber { node: key, part };
        let registry = self.registry_mut(interface, name);
        registry.subscribe(subscriber);
        if registry.default_provider.is_none() {
            registry.default_provider = default;
        }
        self.resolve(interface, subscriber);
    }

    /// Drop import part `part` of `key` from its registry and unbind it
    pub(crate) fn unsubscribe(&mut self, key: NodeKey, part: usize) {
        let Some(import) = self.get(key).and_then(|n| n.import(part)) else {
            return;
        };
        let interface = import.interface;
        let slot = Arc::clone(&import.slot);
        if let Some(registry) = self.registries.get_mut(&interface) {
            registry.unsubscribe(Subscriber { node: key, part });
        }
        let mut state = slot.state();
        state.owner = None;
        let binding = state.binding.take();
        drop(state);
        if let Some(binding) = binding {
            self.release_binding(binding);
        }
    }

    /// Deliver a registry event to the affected subscribers
    pub(crate) fn notify(&mut self, interface: InterfaceId, event: RegistryEvent) {
        match event {
            RegistryEvent::Created(publication) => {
                for subscriber in self.subscribers_of(interface) {
                    self.on_provider_created(subscriber, publication);
                }
            }
            RegistryEvent::Destroyed(publication) => {
                for subscriber in self.subscribers_of(interface) {
                    if self.bound_to(subscriber) == Some((publication.node, publication.part)) {
                        self.disconnect(subscriber);
                        if !self.get(subscriber.node).map(|n| n.destroying).unwrap_or(true) {
                            self.resolve(interface, subscriber);
                        }
                    }
                }
            }
            RegistryEvent::Locked(subscriber) => {
                tracing::trace!(importer = %self.guid_of(subscriber.node), "usage locked");
            }
            RegistryEvent::Unlocked(subscriber) => self.on_unlocked(interface, subscriber),
        }
    }

    fn subscribers_of(&self, interface: InterfaceId) -> Vec<Subscriber> {
        self.registries
            .get(&interface)
            .map(|r| r.subscribers().to_vec())
            .unwrap_or_default()
    }

    /// Provider (node, part) the subscriber is bound to
    fn bound_to(&self, subscriber: Subscriber) -> Option<(NodeKey, usize)> {
        let import = self.get(subscriber.node)?.import(subscriber.part)?;
        let state = import.slot.state();
        let binding = state.binding.as_ref()?;
        let part = binding.part.part().checked_sub(1)? as usize;
        Some((binding.provider, part))
    }

    fn on_provider_created(&mut self, subscriber: Subscriber, publication: Publication) {
        if publication.node == subscriber.node {
            return;
        }
        let Some(import) = self.get(subscriber.node).and_then(|n| n.import(subscriber.part)) else {
            return;
        };
        let state = import.slot.state();
        if state.locks > 0 {
            return;
        }
        // Equal priority never displaces a binding, whatever the Guids.
        let better = match &state.binding {
            None => true,
            Some(binding) => publication.rank.priority > binding.rank.priority,
        };
        drop(state);
        if better {
            self.disconnect(subscriber);
            self.connect(subscriber, publication);
        }
    }

    fn on_unlocked(&mut self, interface: InterfaceId, subscriber: Subscriber) {
        let Some(import) = self.get(subscriber.node).and_then(|n| n.import(subscriber.part)) else {
            return;
        };
        let state = import.slot.state();
        if state.locks > 0 {
            return;
        }
        let current = state.binding.as_ref().map(|b| b.rank);
        drop(state);
        let best = self
            .registries
            .get(&interface)
            .and_then(|r| r.best_excluding(subscriber.node));
        match (best, current) {
            (Some(best), Some(rank)) if best.rank.priority > rank.priority => {
                tracing::debug!(importer = %self.guid_of(subscriber.node), "better provider after unlock");
                self.disconnect(subscriber);
                self.connect(subscriber, best);
            }
            (Some(best), None) => self.connect(subscriber, best),
            _ => {}
        }
    }

    /// Bind to the best provider, else the default instance, else nothing
    fn resolve(&mut self, interface: InterfaceId, subscriber: Subscriber) {
        let best = self
            .registries
            .get(&interface)
            .and_then(|r| r.best_excluding(subscriber.node));
        if let Some(publication) = best {
            self.connect(subscriber, publication);
            return;
        }
        // Publishing the default instance binds every waiting subscriber.
        if self.create_default(interface) {
            return;
        }
        tracing::debug!(
            importer = %self.guid_of(subscriber.node),
            interface = self.registries.get(&interface).map(|r| r.name).unwrap_or("?"),
            "dependency unsatisfied"
        );
    }

    /// Attach the default provider of `interface` under the root
    fn create_default(&mut self, interface: InterfaceId) -> bool {
        let shutting_down = self.shutting_down;
        let Some(registry) = self.registries.get_mut(&interface) else {
            return false;
        };
        if shutting_down || registry.creating_default || registry.default_instance.is_some() {
            return false;
        }
        let Some(provider) = registry.default_provider.clone() else {
            return false;
        };
        registry.creating_default = true;
        let name = registry.name;

        let root = self.root;
        let result = self.attach(provider.create(), root, false);

        let registry = self.registry_mut(interface, name);
        registry.creating_default = false;
        match result {
            Ok(key) => {
                registry.default_instance = Some(key);
                tracing::info!(
                    interface = name,
                    provider = provider.type_name(),
                    guid = %self.guid_of(key),
                    "default provider created"
                );
                true
            }
            Err(err) => {
                tracing::warn!(interface = name, error = %err, "default provider creation failed");
                false
            }
        }
    }

    fn connect(&mut self, subscriber: Subscriber, publication: Publication) {
        let Some(provider) = self.get(publication.node) else {
            return;
        };
        let Some(iface) = provider.interface(publication.part) else {
            return;
        };
        let binding = Binding {
            provider: publication.node,
            provider_guid: provider.guid,
            part: provider.parts[publication.part].guid,
            rank: publication.rank,
            object: Arc::clone(&iface.object),
            service: Arc::downgrade(&provider.service),
            hold: Some(ErasedRef::new(Arc::clone(&provider.service))),
            is_default: provider.is_default,
        };
        let provider_guid = provider.guid;
        let name = iface.name;
        let Some(import) = self.get(subscriber.node).and_then(|n| n.import(subscriber.part)) else {
            return;
        };
        let previous = import.slot.state().binding.replace(binding);
        tracing::debug!(
            importer = %self.guid_of(subscriber.node),
            provider = %provider_guid,
            interface = name,
            "dependency bound"
        );
        if let Some(previous) = previous {
            self.release_binding(previous);
        }
    }

    fn disconnect(&mut self, subscriber: Subscriber) {
        let Some(import) = self.get(subscriber.node).and_then(|n| n.import(subscriber.part)) else {
            return;
        };
        let previous = import.slot.state().binding.take();
        if let Some(previous) = previous {
            tracing::trace!(
                importer = %self.guid_of(subscriber.node),
                provider = %previous.provider_guid,
                "dependency unbound"
            );
            self.release_binding(previous);
        }
    }

    fn release_binding(&mut self, binding: Binding) {
        if let Some(hold) = binding.hold {
            self.deferred.released.push(hold);
        }
    }
}
