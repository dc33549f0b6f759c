/// Lifecycle scheduling through the public context API
///
/// Providers start before their users and stop after them, hook failures
/// hold a service down, asynchronous hooks suspend a transition, and
/// detach/shutdown tear the graph down.
mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use common::{context, settle, Journal};
use keel_runtime::{
    Completion, Component, Dependency, HookError, Interface, KeelError, Outcome, Parts, Phase, Priority, Promise,
    Ref, Service, ServiceCx,
};
use parking_lot::Mutex;

trait AApi: Send + Sync {}
trait BApi: Send + Sync {}

impl Interface for dyn AApi {
    const NAME: &'static str = "tests::lifecycle::AApi";
}

impl Interface for dyn BApi {
    const NAME: &'static str = "tests::lifecycle::BApi";
}

struct A {
    journal: Journal,
}

impl AApi for A {}

impl Service for A {
    fn describe(&self, parts: &mut Parts<Self>) {
        parts.export(Priority::DEFAULT, |s| s as Arc<dyn AApi>);
    }

    fn on_start(&self, _cx: &ServiceCx) -> Completion<()> {
        self.journal.push("start A");
        Completion::ready(())
    }

    fn on_stop(&self, _cx: &ServiceCx) -> Completion<()> {
        self.journal.push("stop A");
        Completion::ready(())
    }
}

struct B {
    journal: Journal,
    a: Dependency<dyn AApi>,
}

impl BApi for B {}

impl Service for B {
    fn describe(&self, parts: &mut Parts<Self>) {
        parts.import(&self.a).export(Priority::DEFAULT, |s| s as Arc<dyn BApi>);
    }

    fn on_start(&self, _cx: &ServiceCx) -> Completion<()> {
        self.journal.push("start B");
        Completion::ready(())
    }

    fn on_stop(&self, _cx: &ServiceCx) -> Completion<()> {
        self.journal.push("stop B");
        Completion::ready(())
    }
}

struct C {
    journal: Journal,
    b: Dependency<dyn BApi>,
}

impl Service for C {
    fn describe(&self, parts: &mut Parts<Self>) {
        parts.import(&self.b);
    }

    fn on_start(&self, _cx: &ServiceCx) -> Completion<()> {
        self.journal.push("start C");
        Completion::ready(())
    }

    fn on_stop(&self, _cx: &ServiceCx) -> Completion<()> {
        self.journal.push("stop C");
        Completion::ready(())
    }
}

/// No parts, no hooks
struct Plain;

impl Service for Plain {}

#[test]
fn test_chain_starts_providers_first_and_stops_them_last() {
    let ctx = context();
    let journal = Journal::default();

    // Attach order is deliberately the reverse of start order.
    let c = ctx
        .attach(C {
            journal: journal.clone(),
            b: Dependency::new(),
        })
        .unwrap();
    let b = ctx
        .attach(B {
            journal: journal.clone(),
            a: Dependency::new(),
        })
        .unwrap();
    let a = ctx.attach(A { journal: journal.clone() }).unwrap();
    assert_eq!(c.b.provider(), Some(b.guid()));
    assert_eq!(b.a.provider(), Some(a.guid()));

    assert!(settle(&ctx, ctx.start(&c)).is_value());
    assert_eq!(journal.take(), vec!["start A", "start B", "start C"]);
    assert!([a.phase(), b.phase(), c.phase()].iter().all(|p| *p == Phase::Running));

    assert!(ctx.block_on(ctx.shutdown()).unwrap().is_value());
    assert_eq!(journal.take(), vec!["stop C", "stop B", "stop A"]);
    assert!(ctx.is_shut_down());
    assert_eq!(c.phase(), Phase::Destroyed);
    assert_eq!(a.phase(), Phase::Destroyed);
}

#[test]
fn test_stopping_a_provider_stops_its_users_first() {
    let ctx = context();
    let journal = Journal::default();
    let a = ctx.attach(A { journal: journal.clone() }).unwrap();
    let b = ctx
        .attach(B {
            journal: journal.clone(),
            a: Dependency::new(),
        })
        .unwrap();
    assert!(settle(&ctx, ctx.start(&b)).is_value());
    journal.take();

    assert!(settle(&ctx, ctx.stop(&a)).is_value());
    assert_eq!(journal.take(), vec!["stop B", "stop A"]);
    assert_eq!(b.phase(), Phase::Stopped);

    // B still wants to run; it comes back once A may run again.
    assert!(settle(&ctx, ctx.start(&a)).is_value());
    ctx.run_until_idle();
    assert_eq!(journal.take(), vec!["start A", "start B"]);
    assert_eq!(b.phase(), Phase::Running);
}

#[test]
fn test_unbound_required_import_blocks_start() {
    let ctx = context();
    let journal = Journal::default();
    let b = ctx
        .attach(B {
            journal: journal.clone(),
            a: Dependency::new(),
        })
        .unwrap();
    let started = ctx.start(&b).unwrap();
    ctx.run_until_idle();
    assert!(!started.is_ready());
    assert_eq!(b.phase(), Phase::Stopped);

    let _a = ctx.attach(A { journal: journal.clone() }).unwrap();
    assert!(ctx.block_on(started).unwrap().is_value());
    assert_eq!(journal.take(), vec!["start A", "start B"]);
}

struct Flaky {
    fail: AtomicBool,
}

impl Service for Flaky {
    fn on_start(&self, _cx: &ServiceCx) -> Completion<()> {
        if self.fail.swap(false, Ordering::SeqCst) {
            Completion::failed(HookError::msg("boom"))
        } else {
            Completion::ready(())
        }
    }
}

#[test]
fn test_start_failure_holds_service_down_until_restarted() {
    let ctx = context();
    let flaky = ctx
        .attach(Flaky {
            fail: AtomicBool::new(true),
        })
        .unwrap();

    match settle(&ctx, ctx.start(&flaky)) {
        Outcome::Error(err) => assert_eq!(err.to_string(), "boom"),
        _ => panic!("expected the hook error"),
    }
    ctx.run_until_idle();
    assert_eq!(flaky.phase(), Phase::Stopped);

    assert!(settle(&ctx, ctx.start(&flaky)).is_value());
    assert_eq!(flaky.phase(), Phase::Running);
}

#[derive(Default)]
struct Slow {
    pending: Mutex<Option<Promise<()>>>,
}

impl Service for Slow {
    fn on_start(&self, _cx: &ServiceCx) -> Completion<()> {
        let (promise, completion) = Completion::pending();
        *self.pending.lock() = Some(promise);
        completion
    }
}

#[test]
fn test_async_start_completes_from_another_thread() {
    let ctx = context();
    let slow = ctx.attach(Slow::default()).unwrap();
    let started = ctx.start(&slow).unwrap();
    ctx.run_until_idle();
    assert_eq!(slow.phase(), Phase::Starting);
    assert!(!started.is_ready());

    let promise = slow.pending.lock().take().unwrap();
    std::thread::spawn(move || promise.succeed(())).join().unwrap();

    assert!(ctx.block_on(started).unwrap().is_value());
    assert_eq!(slow.phase(), Phase::Running);
}

#[test]
fn test_dropped_start_promise_cancels_the_start() {
    let ctx = context();
    let slow = ctx.attach(Slow::default()).unwrap();
    let started = ctx.start(&slow).unwrap();
    ctx.run_until_idle();

    drop(slow.pending.lock().take());
    assert!(ctx.block_on(started).unwrap().is_canceled());
    ctx.run_until_idle();
    assert_eq!(slow.phase(), Phase::Stopped);
}

#[test]
fn test_use_defers_stop_until_released() {
    let ctx = context();
    let plain = ctx.attach(Plain).unwrap();
    assert!(settle(&ctx, ctx.start(&plain)).is_value());

    let usage = plain.try_use().unwrap();
    assert_eq!(plain.use_count(), 1);
    let stopped = ctx.stop(&plain).unwrap();
    ctx.run_until_idle();
    assert_eq!(plain.phase(), Phase::Running);
    assert!(!stopped.is_ready());

    drop(usage);
    assert!(ctx.block_on(stopped).unwrap().is_value());
    assert_eq!(plain.phase(), Phase::Stopped);
    assert!(plain.try_use().is_none());
}

#[test]
fn test_handle_goes_stale_across_reattach() {
    let ctx = context();
    let plain = ctx.attach(Plain).unwrap();
    let first_epoch = plain.epoch();
    assert!(settle(&ctx, ctx.start(&plain)).is_value());

    let handle = plain.handle();
    assert!(handle.lock().is_some());

    assert!(settle(&ctx, ctx.detach(&plain)).is_value());
    assert_eq!(plain.phase(), Phase::Destroyed);
    assert!(handle.lock().is_none());
    assert!(matches!(ctx.start(&plain), Err(KeelError::Destroyed(_))));

    ctx.attach_ref(&plain).unwrap();
    assert!(plain.epoch() > first_epoch);
    assert!(settle(&ctx, ctx.start(&plain)).is_value());
    assert!(plain.try_use().is_some());
    assert!(handle.lock().is_none());
    assert!(handle.is_stale());
    assert!(plain.handle().lock().is_some());
}

#[test]
fn test_last_ref_drop_stops_unless_static() {
    let ctx = context();
    let transient = ctx.attach(Plain).unwrap();
    let pinned = ctx.attach_static(Plain).unwrap();
    assert!(settle(&ctx, ctx.start(&transient)).is_value());
    assert!(settle(&ctx, ctx.start(&pinned)).is_value());

    let (transient_guid, pinned_guid) = (transient.guid(), pinned.guid());
    drop(transient);
    drop(pinned);
    ctx.run_until_idle();

    assert_eq!(ctx.phase_of(transient_guid), Some(Phase::Stopped));
    assert_eq!(ctx.phase_of(pinned_guid), Some(Phase::Running));
}

struct Helper {
    journal: Journal,
}

impl Service for Helper {
    fn on_start(&self, _cx: &ServiceCx) -> Completion<()> {
        self.journal.push("start helper");
        Completion::ready(())
    }
}

/// Starts `helper` from its own start hook and waits for it there
struct Launcher {
    journal: Journal,
    helper: Mutex<Option<Ref<Helper>>>,
}

impl Service for Launcher {
    fn on_start(&self, cx: &ServiceCx) -> Completion<()> {
        let ctx = cx.context().unwrap();
        let helper = self.helper.lock().clone().unwrap();
        let started = ctx.start(&helper).unwrap();
        let outcome = ctx.block_on(started).unwrap();
        self.journal.push(format!("helper running: {}", outcome.is_value()));
        Completion::ready(())
    }
}

#[test]
fn test_hook_can_block_on_another_service_starting() {
    let ctx = context();
    let journal = Journal::default();
    let helper = ctx.attach(Helper { journal: journal.clone() }).unwrap();
    let launcher = ctx
        .attach(Launcher {
            journal: journal.clone(),
            helper: Mutex::new(Some(helper.clone())),
        })
        .unwrap();

    assert!(settle(&ctx, ctx.start(&launcher)).is_value());
    assert_eq!(journal.take(), vec!["start helper", "helper running: true"]);
    assert_eq!(helper.phase(), Phase::Running);
    assert_eq!(launcher.phase(), Phase::Running);

    // The outer pass still drives later work.
    assert!(settle(&ctx, ctx.stop(&helper)).is_value());
    assert_eq!(launcher.phase(), Phase::Running);
    launcher.helper.lock().take();
}

#[test]
fn test_graph_requests_off_the_loop_thread_are_refused() {
    let ctx = context();
    let plain = ctx.attach(Plain).unwrap();
    let (remote_ctx, remote_ref) = (ctx.clone(), plain.clone());
    let refused = std::thread::spawn(move || matches!(remote_ctx.start(&remote_ref), Err(KeelError::NotOnLoopThread)))
        .join()
        .unwrap();
    assert!(refused);
    assert_eq!(plain.phase(), Phase::Stopped);
}

#[test]
fn test_attach_after_shutdown_is_refused() {
    let ctx = context();
    assert!(ctx.block_on(ctx.shutdown()).unwrap().is_value());
    assert!(matches!(ctx.attach(Plain), Err(KeelError::ShuttingDown)));
    // A second shutdown resolves at once.
    assert!(ctx.shutdown().is_ready());
}

trait Ping: Send + Sync {}
trait Pong: Send + Sync {}

impl Interface for dyn Ping {
    const NAME: &'static str = "tests::lifecycle::Ping";
}

impl Interface for dyn Pong {
    const NAME: &'static str = "tests::lifecycle::Pong";
}

struct Pinger {
    pong: Dependency<dyn Pong>,
}

impl Ping for Pinger {}

impl Service for Pinger {
    fn describe(&self, parts: &mut Parts<Self>) {
        parts.import(&self.pong).export(Priority::DEFAULT, |s| s as Arc<dyn Ping>);
    }
}

struct Ponger {
    ping: Dependency<dyn Ping>,
}

impl Pong for Ponger {}

impl Service for Ponger {
    fn describe(&self, parts: &mut Parts<Self>) {
        parts.import(&self.ping).export(Priority::DEFAULT, |s| s as Arc<dyn Pong>);
    }
}

#[test]
fn test_verify_reports_cycle() {
    let ctx = context();
    let pinger = ctx.attach(Pinger { pong: Dependency::new() }).unwrap();
    let ponger = ctx.attach(Ponger { ping: Dependency::new() }).unwrap();

    match ctx.verify() {
        Err(KeelError::Cycle(path)) => {
            assert_eq!(path.len(), 3);
            assert_eq!(path.first(), path.last());
            assert!(path.contains(&pinger.guid()));
            assert!(path.contains(&ponger.guid()));
        }
        other => panic!("expected a cycle, got {other:?}"),
    }

    // Neither can ever see the other Running.
    let started = ctx.start(&pinger).unwrap();
    ctx.run_until_idle();
    assert!(!started.is_ready());
    assert_eq!(ponger.phase(), Phase::Stopped);
}

struct Nest {
    journal: Journal,
    depth: usize,
    child: Option<Component<Nest>>,
}

impl Nest {
    fn chain(journal: &Journal, depth: usize) -> Nest {
        (1..=depth).fold(
            Nest {
                journal: journal.clone(),
                depth: 0,
                child: None,
            },
            |inner, d| Nest {
                journal: journal.clone(),
                depth: d,
                child: Some(Component::new(inner)),
            },
        )
    }
}

impl Service for Nest {
    fn describe(&self, parts: &mut Parts<Self>) {
        if let Some(child) = &self.child {
            parts.component(child);
        }
    }

    fn on_start(&self, _cx: &ServiceCx) -> Completion<()> {
        self.journal.push(format!("start {}", self.depth));
        Completion::ready(())
    }

    fn on_stop(&self, _cx: &ServiceCx) -> Completion<()> {
        self.journal.push(format!("stop {}", self.depth));
        Completion::ready(())
    }
}

#[test]
fn test_deep_component_chain() {
    let ctx = context();
    let journal = Journal::default();
    let top = ctx.attach(Nest::chain(&journal, 200)).unwrap();
    assert!(ctx.verify().is_ok());

    let guid = top.guid();
    let (members, descendants) = ctx.inspect(|view| {
        (
            view.cluster_members(guid).count(),
            view.descendants_post(guid).count(),
        )
    });
    assert_eq!(members, 201);
    assert_eq!(descendants, 200);

    assert!(settle(&ctx, ctx.start(&top)).is_value());
    let starts = journal.take();
    assert_eq!(starts.first().map(String::as_str), Some("start 0"));
    assert_eq!(starts.last().map(String::as_str), Some("start 200"));
    let innermost = top.child.as_ref().map(|c| c.phase());
    assert_eq!(innermost, Some(Phase::Running));

    assert!(settle(&ctx, ctx.detach(&top)).is_value());
    let stops = journal.take();
    assert_eq!(stops.len(), 201);
    assert_eq!(stops.first().map(String::as_str), Some("stop 200"));
    assert_eq!(stops.last().map(String::as_str), Some("stop 0"));
    assert!(ctx.inspect(|view| view.is_empty()));
}

#[test]
fn test_block_on_abandoned_promise_resolves_canceled() {
    let ctx = context();
    let (promise, completion) = Completion::<()>::pending();
    let dropper = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(10));
        drop(promise);
    });
    let outcome = ctx.block_on(completion).unwrap();
    dropper.join().unwrap();
    assert!(matches!(outcome, Outcome::Canceled));
}
