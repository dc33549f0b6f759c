//! Dependency chain example
//!
//! Api imports Index, Index imports Storage. Starting Api starts Storage,
//! then Index, then Api; shutdown stops them in reverse. Storage opens
//! asynchronously on a worker thread fed through a `PoolableExecutor`.
//!
//! # Environment Variables
//!
//! - `RUST_LOG=keel_runtime=debug` - show lifecycle transitions
//! - `KEEL_DEBUG=1` - log a graph summary whenever the scheduler idles

use std::sync::Arc;
use std::time::Duration;

use keel::prelude::*;
use keel::{KeelResult, PoolableExecutor, RuntimeConfig};

trait Storage: Send + Sync {
    fn read(&self, key: &str) -> Option<String>;
}

impl Interface for dyn Storage {
    const NAME: &'static str = "keel::chain::Storage";
}

trait Index: Send + Sync {
    fn lookup(&self, word: &str) -> Option<String>;
}

impl Interface for dyn Index {
    const NAME: &'static str = "keel::chain::Index";
}

/// Storage whose open completes on a worker thread
struct DiskStorage {
    worker: PoolableExecutor,
}

impl Storage for DiskStorage {
    fn read(&self, key: &str) -> Option<String> {
        (key == "keel").then(|| "the backbone of a ship".to_string())
    }
}

impl Service for DiskStorage {
    fn describe(&self, parts: &mut Parts<Self>) {
        parts.export(Priority(10), |s| s as Arc<dyn Storage>);
    }

    fn on_start(&self, _cx: &ServiceCx) -> Completion<()> {
        println!("  storage: opening on worker thread");
        let (promise, completion) = Completion::pending();
        self.worker.post(move || {
            std::thread::sleep(Duration::from_millis(20));
            promise.succeed(());
        });
        completion
    }

    fn on_stop(&self, _cx: &ServiceCx) -> Completion<()> {
        println!("  storage: closed");
        Completion::ready(())
    }
}

#[derive(Default)]
struct WordIndex {
    storage: Dependency<dyn Storage>,
}

impl Index for WordIndex {
    fn lookup(&self, word: &str) -> Option<String> {
        self.storage.get()?.read(word)
    }
}

impl Service for WordIndex {
    fn describe(&self, parts: &mut Parts<Self>) {
        parts
            .import(&self.storage)
            .export(Priority::DEFAULT, |s| s as Arc<dyn Index>);
    }

    fn on_start(&self, _cx: &ServiceCx) -> Completion<()> {
        println!("  index: ready");
        Completion::ready(())
    }

    fn on_stop(&self, _cx: &ServiceCx) -> Completion<()> {
        println!("  index: stopped");
        Completion::ready(())
    }
}

#[derive(Default)]
struct Api {
    index: Dependency<dyn Index>,
}

impl Service for Api {
    fn describe(&self, parts: &mut Parts<Self>) {
        parts.import(&self.index);
    }

    fn on_start(&self, cx: &ServiceCx) -> Completion<()> {
        println!("  api: serving as {}", cx.guid().detailed());
        Completion::ready(())
    }

    fn on_stop(&self, _cx: &ServiceCx) -> Completion<()> {
        println!("  api: stopped");
        Completion::ready(())
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}

// RUST_LOG=keel_runtime=debug cargo run -p keel-chain
fn main() -> KeelResult<()> {
    init_logging();
    println!("=== keel dependency chain ===\n");

    let worker = PoolableExecutor::new();
    let pool = worker.clone();
    let worker_thread = std::thread::spawn(move || pool.run());

    let mut runtime = Runtime::new(RuntimeConfig::from_env().name("chain"))?;
    runtime.block_on(|ctx| {
        // Attach in reverse; bindings form as providers appear.
        let api = ctx.attach(Api::default())?;
        let index = ctx.attach(WordIndex::default())?;
        let _storage = ctx.attach(DiskStorage { worker: worker.clone() })?;
        ctx.verify()?;

        println!("starting api:");
        let started = ctx.start(&api)?;
        ctx.block_on(started)?.into_result()?;

        if let Some(guard) = api.index.try_use() {
            println!("\nlookup(keel) = {:?}\n", guard.lookup("keel"));
        }
        println!("index provider: {}", index.guid().detailed());
        println!("\nshutting down:");
        Ok(())
    })?;

    worker.stop();
    let ran = worker_thread.join().unwrap_or(0);
    tracing::info!(tasks = ran, "worker drained");
    println!("=== done ===");
    Ok(())
}
