//! Attach and destroy
//!
//! Attach runs on the loop thread: allocate a Guid, record the parts the
//! service declares (initialized), then publish its interfaces, bind its
//! imports and attach its components head-to-children (setup, which leaves
//! the service Stopped). Destroy is the reverse, children first, and
//! requires the whole subtree to be stopped.

use std::sync::Arc;

use keel_core::constants::MAX_PARTS;
use keel_core::{Guid, KeelError, KeelResult, Outcome, Phase, Rank};

use super::view::PostOrder;
use super::{ExportPart, Graph, ImportPart, InterfacePart, Node, NodeKey, Part, PartKind};
use crate::ownership::{flags, Attachment, ErasedService};
use crate::registry::SlotOwner;
use crate::service::{Description, PartDecl};

impl Graph {
    /// Attach `service` under `parent`, as an owned component or as the
    /// head of a new cluster
    pub(crate) fn attach(
        &mut self,
        service: Arc<dyn ErasedService>,
        parent: NodeKey,
        owned: bool,
    ) -> KeelResult<NodeKey> {
        let core = service.core();
        if core.is_attached() {
            return Err(KeelError::AlreadyAttached(core.guid()));
        }
        if self.shutting_down {
            return Err(KeelError::ShuttingDown);
        }
        let parent_node = self.get(parent).ok_or(KeelError::UnknownService(Guid::NONE))?;
        if parent_node.destroying {
            return Err(KeelError::Destroyed(parent_node.guid));
        }

        let guid = self.alloc_guid(parent, owned)?;
        let Description { priority, parts: decls } = service.describe();
        debug_assert!(decls.len() <= MAX_PARTS, "too many parts on one service");

        let mut parts = Vec::with_capacity(decls.len());
        let mut imports = Vec::new();
        let mut interfaces = Vec::new();
        let mut exports = Vec::new();
        for (i, decl) in decls.into_iter().enumerate() {
            let part_guid = Guid::of_part(guid, (i + 1) as u16);
            let kind = match decl {
                PartDecl::Import {
                    interface,
                    name,
                    slot,
                    optional,
                    default,
                } => {
                    imports.push((i, default));
                    PartKind::Import(ImportPart {
                        interface,
                        name,
                        slot,
                        optional,
                    })
                }
                PartDecl::Interface {
                    interface,
                    name,
                    priority,
                    singleton,
                    object,
                } => {
                    interfaces.push(i);
                    PartKind::Interface(InterfacePart {
                        interface,
                        name,
                        rank: Rank::new(priority, part_guid),
                        singleton,
                        object,
                    })
                }
                PartDecl::Export { child } => {
                    exports.push(i);
                    PartKind::Export(ExportPart {
                        service: child,
                        child: None,
                    })
                }
            };
            parts.push(Part { guid: part_guid, kind });
        }

        let epoch = core.epoch().next();
        let name = service.type_name();
        let node = Node {
            service: Arc::clone(&service),
            guid,
            epoch,
            name,
            priority,
            parent: Some(parent),
            children: Vec::new(),
            parts,
            phase: Phase::Uninitialized,
            owned,
            is_default: core.has_flag(flags::DEFAULT),
            explicit_start: false,
            held_down: false,
            destroying: false,
            excluded: false,
            start_waiters: Vec::new(),
            stop_waiters: Vec::new(),
            detach_waiters: Vec::new(),
        };
        let key = match self.insert(node) {
            Ok(key) => key,
            Err(err) => {
                self.release_guid(guid);
                return Err(err);
            }
        };

        core.set_guid(guid);
        core.set_epoch(epoch);
        if owned {
            core.set_flag(flags::OWNED);
        }
        core.attach(Attachment {
            context: self.context.clone(),
            key,
        });
        self.by_guid.insert(guid, key);
        if let Some(parent) = self.get_mut(parent) {
            parent.children.push(key);
        }
        if let Some(node) = self.get(key) {
            for (i, _) in &imports {
                if let Some(import) = node.import(*i) {
                    import.slot.state().owner = Some(SlotOwner {
                        context: self.context.clone(),
                        service: Arc::downgrade(&service),
                        key,
                        part: *i,
                    });
                }
            }
        }
        if let Some(node) = self.get_mut(key) {
            node.set_phase(Phase::Initialized);
        }
        tracing::debug!(guid = %guid, service = name, epoch = %epoch, "service initialized");

        for i in interfaces {
            self.publish(key, i);
        }
        for (i, default) in imports {
            self.subscribe(key, i, default);
        }
        for i in exports {
            let Some(child) = self.get(key).and_then(|n| match &n.parts[i].kind {
                PartKind::Export(export) => Some(Arc::clone(&export.service)),
                _ => None,
            }) else {
                continue;
            };
            match self.attach(child, key, true) {
                Ok(child_key) => {
                    if let Some(PartKind::Export(export)) = self.get_mut(key).map(|n| &mut n.parts[i].kind) {
                        export.child = Some(child_key);
                    }
                }
                Err(err) => {
                    tracing::warn!(guid = %guid, error = %err, "component attach failed, rolling back");
                    self.destroy(key);
                    return Err(err);
                }
            }
        }

        if let Some(node) = self.get_mut(key) {
            node.set_phase(Phase::Stopped);
        }
        tracing::debug!(guid = %guid, service = name, "service set up");
        Ok(key)
    }

    /// `key`'s subtree, children before parents, `key` last
    pub(crate) fn subtree_post(&self, key: NodeKey) -> Vec<NodeKey> {
        let mut walk = PostOrder::new(self, Some(key), true);
        let mut keys = Vec::new();
        while let Some(k) = walk.next_key() {
            keys.push(k);
        }
        keys
    }

    pub(crate) fn mark_destroying(&mut self, key: NodeKey) {
        for k in self.subtree_post(key) {
            if let Some(node) = self.get_mut(k) {
                node.destroying = true;
            }
        }
    }

    /// Whether `key` and everything under it has stopped
    pub(crate) fn subtree_stopped(&self, key: NodeKey) -> bool {
        self.subtree_post(key).into_iter().all(|k| {
            self.get(k)
                .map(|n| matches!(n.phase, Phase::Stopped | Phase::Initialized | Phase::Uninitialized))
                .unwrap_or(true)
        })
    }

    /// Tear down `key` and its subtree; all of it must be stopped
    pub(crate) fn destroy(&mut self, key: NodeKey) {
        let order = self.subtree_post(key);
        for &k in &order {
            if let Some(node) = self.get_mut(k) {
                node.destroying = true;
            }
        }
        for k in order {
            self.destroy_one(k);
        }
    }

    fn destroy_one(&mut self, key: NodeKey) {
        let Some(node) = self.get(key) else {
            return;
        };
        debug_assert!(
            !node.phase.is_active() && node.phase != Phase::Pending,
            "destroying a service that is {}",
            node.phase
        );
        let kinds: Vec<(usize, bool)> = node
            .parts
            .iter()
            .enumerate()
            .filter_map(|(i, part)| match part.kind {
                PartKind::Interface(_) => Some((i, true)),
                PartKind::Import(_) => Some((i, false)),
                PartKind::Export(_) => None,
            })
            .collect();
        for (i, is_interface) in kinds {
            if is_interface {
                self.unpublish(key, i);
            } else {
                self.unsubscribe(key, i);
            }
        }

        let Some(mut node) = self.remove(key) else {
            return;
        };
        if let Some(parent) = node.parent.and_then(|p| self.get_mut(p)) {
            parent.children.retain(|&c| c != key);
            for part in &mut parent.parts {
                if let PartKind::Export(export) = &mut part.kind {
                    if export.child == Some(key) {
                        export.child = None;
                    }
                }
            }
        }
        self.by_guid.remove(&node.guid);
        self.release_guid(node.guid);
        self.queue.remove(key);

        node.set_phase(Phase::Destroyed);
        let core = node.core();
        core.detach();
        core.set_guid(Guid::NONE);
        core.clear_flag(flags::OWNED);
        core.clear_flag(flags::STOP_DEFERRED);

        let start_waiters = std::mem::take(&mut node.start_waiters);
        let stop_waiters = std::mem::take(&mut node.stop_waiters);
        let detach_waiters = std::mem::take(&mut node.detach_waiters);
        self.resolve_all(start_waiters, Outcome::Canceled);
        self.resolve_all(stop_waiters, Outcome::Value(()));
        self.resolve_all(detach_waiters, Outcome::Value(()));

        tracing::debug!(guid = %node.guid, service = node.name, epoch = %node.epoch, "service destroyed");
        self.deferred.graveyard.push(node);
    }
}
