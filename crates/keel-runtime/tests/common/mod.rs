//! Shared fixtures for the keel-runtime integration tests

#![allow(dead_code)]

use std::sync::Arc;

use keel_runtime::{Completion, Context, KeelResult, Outcome, RuntimeConfig};
use parking_lot::Mutex;

/// Ordered record of hook invocations
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock())
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

pub fn context() -> Context {
    Context::new(RuntimeConfig::new().name("test")).expect("valid config")
}

/// Drive `completion` to its outcome on the test thread
pub fn settle<T: Send + 'static>(ctx: &Context, completion: KeelResult<Completion<T>>) -> Outcome<T> {
    let completion = completion.expect("request accepted");
    ctx.block_on(completion).expect("on the loop thread")
}
