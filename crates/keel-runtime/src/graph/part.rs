//! Part kinds
//!
//! A service's parts are a closed set of three kinds: imports consume a
//! capability, interfaces publish one, exports own a child service.

use std::any::Any;
use std::sync::Arc;

use keel_core::{Guid, InterfaceId, Priority, Rank};

use crate::ownership::ErasedService;
use crate::registry::ImportSlot;

pub(crate) struct Part {
    pub guid: Guid,
    pub kind: PartKind,
}

pub(crate) enum PartKind {
    Import(ImportPart),
    Export(ExportPart),
    Interface(InterfacePart),
}

pub(crate) struct ImportPart {
    pub interface: InterfaceId,
    pub name: &'static str,
    pub slot: Arc<ImportSlot>,
    pub optional: bool,
}

pub(crate) struct ExportPart {
    pub service: Arc<dyn ErasedService>,
    pub child: Option<super::NodeKey>,
}

pub(crate) struct InterfacePart {
    pub interface: InterfaceId,
    pub name: &'static str,
    pub rank: Rank,
    pub singleton: bool,
    pub object: Arc<dyn Any + Send + Sync>,
}

/// State of the edge from an import to its provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageState {
    Unconnected,
    Connected,
    /// Relied upon through a live `DependencyGuard`
    Locked,
}

/// Read-only description of a part
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartInfo {
    Import {
        guid: Guid,
        interface: InterfaceId,
        name: &'static str,
        optional: bool,
        provider: Option<Guid>,
        usage: UsageState,
    },
    Export {
        guid: Guid,
        child: Option<Guid>,
    },
    Interface {
        guid: Guid,
        interface: InterfaceId,
        name: &'static str,
        priority: Priority,
        singleton: bool,
    },
}

impl PartInfo {
    pub fn guid(&self) -> Guid {
        match self {
            PartInfo::Import { guid, .. } | PartInfo::Export { guid, .. } | PartInfo::Interface { guid, .. } => {
                *guid
            }
        }
    }
}

impl Part {
    pub fn info(&self, child_guid: impl Fn(super::NodeKey) -> Guid) -> PartInfo {
        match &self.kind {
            PartKind::Import(import) => {
                let state = import.slot.state();
                let provider = state.binding.as_ref().map(|b| b.provider_guid);
                let usage = match (&state.binding, state.locks) {
                    (None, _) => UsageState::Unconnected,
                    (Some(_), 0) => UsageState::Connected,
                    (Some(_), _) => UsageState::Locked,
                };
                PartInfo::Import {
                    guid: self.guid,
                    interface: import.interface,
                    name: import.name,
                    optional: import.optional,
                    provider,
                    usage,
                }
            }
            PartKind::Export(export) => PartInfo::Export {
                guid: self.guid,
                child: export.child.map(child_guid),
            },
            PartKind::Interface(iface) => PartInfo::Interface {
                guid: self.guid,
                interface: iface.interface,
                name: iface.name,
                priority: iface.rank.priority,
                singleton: iface.singleton,
            },
        }
    }
}
