//! Ownership layer
//!
//! - `Ref` / `WeakRef` - strong and weak references to a service allocation
//! - `Use` - active-use guard, blocks the scheduler from stopping the target
//! - `Handle` - weak reference plus captured epoch, `Send + Sync`
//! - `ServiceCore` - control block colocated with each service

mod cell;
mod control;
mod guard;
mod refs;

pub(crate) use self::cell::{ErasedService, ServiceCell};
pub(crate) use self::control::Attachment;
pub use self::control::{flags, ServiceCore};
pub(crate) use self::guard::ErasedUse;
pub use self::guard::{Handle, Use};
pub(crate) use self::refs::ErasedRef;
pub use self::refs::{Ref, WeakRef};
