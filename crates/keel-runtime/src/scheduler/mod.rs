//! Lifecycle scheduler
//!
//! Every pass recomputes what should run from the explicit start requests
//! and the current bindings, then issues at most one transition:
//!
//! 1. reap detached subtrees that have fully stopped
//! 2. wanted: everything reachable over required edges from a service with
//!    an explicit start request, minus singleton exclusions
//! 3. down: unwanted services, services with an unbound required import,
//!    and everything that depends on either
//! 4. stoppable services (no active dependents, no outstanding use) go on
//!    the down queue; startable ones (all providers Running) on the up queue
//! 5. the best stop is issued before the best start
//!
//! Providers therefore start before their users and stop after them.
//! Hooks run with the graph unlocked; a hook that completes synchronously
//! is applied inline, otherwise its continuation is posted back to the
//! loop and validated against the service's epoch before it is applied.

mod dfs;
mod queue;

pub(crate) use dfs::{dfs, DfsData};
pub(crate) use queue::SchedulingQueue;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use keel_core::{Epoch, Guid, HookError, Outcome, Phase};

use crate::context::ContextShared;
use crate::graph::{Graph, NodeKey};
use crate::ownership::{flags, ErasedService};
use crate::registry::singleton;
use crate::service::ServiceCx;

/// A hook to run with the graph unlocked
pub(crate) struct Transition {
    pub key: NodeKey,
    pub epoch: Epoch,
    pub guid: Guid,
    pub name: &'static str,
    pub service: Arc<dyn ErasedService>,
    pub cx: ServiceCx,
}

pub(crate) enum Step {
    Start(Transition),
    Stop(Transition),
    /// A queued entry went stale; plan again
    Retry,
    Idle,
}

impl Graph {
    /// Recompute the scheduling queues
    ///
    /// Rebuilds the wanted and down sets over the whole graph, O(N·E) per
    /// issued transition.
    pub(crate) fn plan(&mut self) {
        self.reap();
        if self.shutting_down && !self.shut_down && self.len() == 0 {
            self.finish_shutdown();
        }

        let none = HashSet::new();
        let raw = self.wanted(&none);
        let excluded = singleton::exclusions(self, &raw);
        self.apply_exclusions(&excluded);
        let wanted = if excluded.is_empty() { raw } else { self.wanted(&excluded) };

        let root = self.root;
        let keys: Vec<NodeKey> = self.keys().into_iter().filter(|&k| k != root).collect();
        let dependents = self.dependents_map(&keys);

        let mut down: HashSet<NodeKey> = keys
            .iter()
            .copied()
            .filter(|&k| !wanted.contains(&k) || !self.imports_satisfied(k))
            .collect();
        let mut frontier: Vec<NodeKey> = down.iter().copied().collect();
        while let Some(provider) = frontier.pop() {
            for &user in dependents.get(&provider).into_iter().flatten() {
                if down.insert(user) {
                    frontier.push(user);
                }
            }
        }

        // Withdraw pending starts first so they never block a stop below.
        for &key in &keys {
            let revert = match self.get(key) {
                Some(node) if node.phase == Phase::Pending => down.contains(&key) || !self.startable(key),
                _ => false,
            };
            if revert {
                if let Some(node) = self.get_mut(key) {
                    node.set_phase(Phase::Stopped);
                    tracing::trace!(guid = %node.guid, "pending start withdrawn");
                }
            }
        }

        self.queue.clear();
        for &key in &keys {
            let Some(node) = self.get(key) else {
                continue;
            };
            let rank = node.rank();
            match node.phase {
                Phase::Stopped | Phase::Pending if !down.contains(&key) && self.startable(key) => {
                    self.queue.push_up(rank, key);
                    if let Some(node) = self.get_mut(key) {
                        node.set_phase(Phase::Pending);
                    }
                }
                Phase::Running if down.contains(&key) && !self.has_active_dependents(key, &dependents) => {
                    if node.core().uses() > 0 {
                        if !node.core().has_flag(flags::STOP_DEFERRED) {
                            tracing::debug!(guid = %node.guid, uses = node.core().uses(), "stop deferred while in use");
                        }
                        // Releasing the last use requests another pass.
                        node.core().set_flag(flags::STOP_DEFERRED);
                    } else {
                        self.queue.push_down(rank, key);
                    }
                }
                _ => {}
            }
        }
    }

    /// Pop the next transition and mark it in progress
    pub(crate) fn next_step(&mut self) -> Step {
        if let Some(entry) = self.queue.pop_down() {
            return match self.begin(entry.key, Phase::Running, Phase::Stopping) {
                Some(t) => Step::Stop(t),
                None => Step::Retry,
            };
        }
        if let Some(entry) = self.queue.pop_up() {
            return match self.begin(entry.key, Phase::Pending, Phase::Starting) {
                Some(t) => Step::Start(t),
                None => Step::Retry,
            };
        }
        Step::Idle
    }

    fn begin(&mut self, key: NodeKey, from: Phase, to: Phase) -> Option<Transition> {
        let context = self.context.clone();
        let node = self.get_mut(key)?;
        if node.phase != from {
            return None;
        }
        node.set_phase(to);
        let transition = Transition {
            key,
            epoch: node.epoch,
            guid: node.guid,
            name: node.name,
            service: Arc::clone(&node.service),
            cx: ServiceCx::new(node.guid, node.epoch, context),
        };
        self.in_flight += 1;
        Some(transition)
    }

    /// Nodes reachable over required edges from explicit start requests
    fn wanted(&self, excluded: &HashSet<NodeKey>) -> HashSet<NodeKey> {
        if self.shutting_down {
            return HashSet::new();
        }
        let eligible = |key: NodeKey| {
            self.get(key)
                .map(|n| !n.held_down && !n.destroying && !excluded.contains(&key))
                .unwrap_or(false)
        };
        let mut data = DfsData::new();
        for key in self.keys() {
            if key == self.root || data.is_visited(key) {
                continue;
            }
            if !self.get(key).map(|n| n.explicit_start).unwrap_or(false) || !eligible(key) {
                continue;
            }
            dfs(&mut data, key, |k| {
                self.provider_edges(k, false)
                    .into_iter()
                    .map(|(p, _)| p)
                    .filter(|&p| p != self.root && eligible(p))
                    .collect()
            });
        }
        data.visited.into_iter().collect()
    }

    fn apply_exclusions(&mut self, excluded: &HashSet<NodeKey>) {
        for key in self.keys() {
            let now = excluded.contains(&key);
            let Some(node) = self.get_mut(key) else {
                continue;
            };
            if node.excluded != now {
                node.excluded = now;
                tracing::debug!(guid = %node.guid, excluded = now, "singleton exclusion changed");
            }
        }
    }

    /// provider -> services with a required edge onto it
    fn dependents_map(&self, keys: &[NodeKey]) -> HashMap<NodeKey, Vec<NodeKey>> {
        let mut map: HashMap<NodeKey, Vec<NodeKey>> = HashMap::new();
        for &key in keys {
            for (provider, required) in self.provider_edges(key, false) {
                if required {
                    map.entry(provider).or_default().push(key);
                }
            }
        }
        map
    }

    fn has_active_dependents(&self, key: NodeKey, dependents: &HashMap<NodeKey, Vec<NodeKey>>) -> bool {
        dependents.get(&key).into_iter().flatten().any(|&d| {
            self.get(d)
                .map(|n| n.phase.is_active() || n.phase == Phase::Pending)
                .unwrap_or(false)
        })
    }

    fn startable(&self, key: NodeKey) -> bool {
        if self.shutting_down || !self.imports_satisfied(key) {
            return false;
        }
        let providers_running = self
            .provider_edges(key, false)
            .into_iter()
            .all(|(p, _)| self.get(p).map(|n| n.phase == Phase::Running).unwrap_or(false));
        providers_running && !singleton::sibling_active(self, key)
    }

    /// Destroy detached subtrees that have stopped
    fn reap(&mut self) {
        let ready: Vec<NodeKey> = self
            .keys()
            .into_iter()
            .filter(|&k| {
                let Some(node) = self.get(k) else {
                    return false;
                };
                let parent_destroying = node
                    .parent
                    .and_then(|p| self.get(p))
                    .map(|p| p.destroying)
                    .unwrap_or(false);
                node.destroying && !parent_destroying && self.subtree_stopped(k)
            })
            .collect();
        for key in ready {
            self.destroy(key);
        }
    }

    fn finish_shutdown(&mut self) {
        self.shut_down = true;
        let waiters = std::mem::take(&mut self.shutdown_waiters);
        self.resolve_all(waiters, Outcome::Value(()));
        self.registries.retain(|_, r| !r.is_empty());
        tracing::info!("context shut down");
    }

    /// Apply a start hook's outcome
    pub(crate) fn complete_start(&mut self, key: NodeKey, epoch: Epoch, outcome: Outcome<()>) {
        match self.get(key) {
            None => {
                tracing::trace!("start completion for a destroyed service dropped");
                return;
            }
            Some(node) if node.epoch != epoch || node.phase != Phase::Starting => {
                tracing::trace!(guid = %node.guid, phase = %node.phase, "stale start completion dropped");
                return;
            }
            Some(_) => {}
        }
        self.in_flight = self.in_flight.saturating_sub(1);
        let Some(node) = self.get_mut(key) else {
            return;
        };
        match outcome {
            Outcome::Value(()) => {
                node.set_phase(Phase::Running);
                tracing::debug!(guid = %node.guid, service = node.name, "service running");
                let waiters = std::mem::take(&mut node.start_waiters);
                self.resolve_all(waiters, Outcome::Value(()));
            }
            Outcome::Error(err) => self.handle_start_async_exception(key, err),
            Outcome::Canceled => {
                node.set_phase(Phase::Stopped);
                node.held_down = true;
                tracing::debug!(guid = %node.guid, service = node.name, "start canceled");
                let waiters = std::mem::take(&mut node.start_waiters);
                self.resolve_all(waiters, Outcome::Canceled);
            }
        }
    }

    /// A start hook failed: the service stays down until started again
    pub(crate) fn handle_start_async_exception(&mut self, key: NodeKey, err: HookError) {
        let Some(node) = self.get_mut(key) else {
            return;
        };
        tracing::error!(guid = %node.guid, service = node.name, error = %err, "start hook failed");
        node.set_phase(Phase::Stopped);
        node.held_down = true;
        let waiters = std::mem::take(&mut node.start_waiters);
        self.resolve_all(waiters, Outcome::Error(err));
    }

    /// Apply a stop hook's outcome
    pub(crate) fn complete_stop(&mut self, key: NodeKey, epoch: Epoch, outcome: Outcome<()>) {
        match self.get(key) {
            None => {
                tracing::trace!("stop completion for a destroyed service dropped");
                return;
            }
            Some(node) if node.epoch != epoch || node.phase != Phase::Stopping => {
                tracing::trace!(guid = %node.guid, phase = %node.phase, "stale stop completion dropped");
                return;
            }
            Some(_) => {}
        }
        self.in_flight = self.in_flight.saturating_sub(1);
        let Some(node) = self.get_mut(key) else {
            return;
        };
        match outcome {
            Outcome::Value(()) => {
                node.set_phase(Phase::Stopped);
                tracing::debug!(guid = %node.guid, service = node.name, "service stopped");
                let waiters = std::mem::take(&mut node.stop_waiters);
                self.resolve_all(waiters, Outcome::Value(()));
            }
            Outcome::Error(err) => self.handle_stop_async_exception(key, err),
            Outcome::Canceled => {
                node.set_phase(Phase::Stopped);
                node.held_down = true;
                tracing::debug!(guid = %node.guid, service = node.name, "stop canceled");
                let waiters = std::mem::take(&mut node.stop_waiters);
                self.resolve_all(waiters, Outcome::Canceled);
            }
        }
    }

    /// A stop hook failed: the service is considered stopped and held down
    pub(crate) fn handle_stop_async_exception(&mut self, key: NodeKey, err: HookError) {
        let Some(node) = self.get_mut(key) else {
            return;
        };
        tracing::error!(guid = %node.guid, service = node.name, error = %err, "stop hook failed");
        node.set_phase(Phase::Stopped);
        node.held_down = true;
        let waiters = std::mem::take(&mut node.stop_waiters);
        self.resolve_all(waiters, Outcome::Error(err));
    }
}

impl Graph {
    /// Every dependency cycle as a closed Guid path, each reported once
    pub(crate) fn find_cycles(&self) -> Vec<Vec<Guid>> {
        let mut data = DfsData::new().post_cancel_cycles(true);
        for key in self.keys() {
            if key == self.root || data.is_visited(key) {
                continue;
            }
            dfs(&mut data, key, |k| {
                self.provider_edges(k, true).into_iter().map(|(p, _)| p).collect()
            });
        }
        data.cycles
            .iter()
            .map(|cycle| cycle.iter().map(|&k| self.guid_of(k)).collect())
            .collect()
    }
}

impl ContextShared {
    /// Schedule one processing pass; coalesces repeated requests
    pub(crate) fn request_process(self: &Arc<Self>) {
        if self.process_dispatched.swap(true, std::sync::atomic::Ordering::AcqRel) {
            return;
        }
        let ctx = Arc::clone(self);
        self.event_loop.post(move || ctx.process());
    }

    /// Issue transitions until nothing is ready
    ///
    /// A hook that drains the loop (`Context::block_on`) re-enters here. The
    /// nested pass runs to idle so whatever the hook waits on can progress;
    /// the outer pass then re-plans from the graph as it left it.
    pub(crate) fn process(self: &Arc<Self>) {
        use std::sync::atomic::Ordering;

        self.process_dispatched.store(false, Ordering::Release);
        let depth = self.processing.fetch_add(1, Ordering::AcqRel);
        if depth > 0 {
            tracing::trace!(depth, "nested scheduler pass");
        }
        loop {
            let step = self.with_graph(|g| {
                g.plan();
                g.next_step()
            });
            match step {
                Step::Start(t) => self.try_start_service_inplace(t),
                Step::Stop(t) => self.try_stop_service_inplace(t),
                Step::Retry => continue,
                Step::Idle => {
                    if self.config.debug {
                        self.log_summary();
                    }
                    break;
                }
            }
        }
        self.processing.fetch_sub(1, Ordering::AcqRel);
    }

    fn try_start_service_inplace(self: &Arc<Self>, t: Transition) {
        tracing::debug!(guid = %t.guid, service = t.name, "starting");
        let completion = t.service.start(&t.cx);
        if let Some(outcome) = completion.try_take() {
            self.with_graph(|g| g.complete_start(t.key, t.epoch, outcome));
            return;
        }
        let weak = Arc::downgrade(self);
        let (key, epoch, guid) = (t.key, t.epoch, t.guid);
        completion.on_complete(move |outcome| match weak.upgrade() {
            Some(ctx) => {
                let target = Arc::clone(&ctx);
                ctx.event_loop.post(move || target.on_service_start_cb(key, epoch, outcome));
            }
            None => tracing::trace!(guid = %guid, "start continuation canceled, context gone"),
        });
    }

    fn try_stop_service_inplace(self: &Arc<Self>, t: Transition) {
        tracing::debug!(guid = %t.guid, service = t.name, "stopping");
        let completion = t.service.stop(&t.cx);
        if let Some(outcome) = completion.try_take() {
            self.with_graph(|g| g.complete_stop(t.key, t.epoch, outcome));
            return;
        }
        let weak = Arc::downgrade(self);
        let (key, epoch, guid) = (t.key, t.epoch, t.guid);
        completion.on_complete(move |outcome| match weak.upgrade() {
            Some(ctx) => {
                let target = Arc::clone(&ctx);
                ctx.event_loop.post(move || target.on_service_stop_cb(key, epoch, outcome));
            }
            None => tracing::trace!(guid = %guid, "stop continuation canceled, context gone"),
        });
    }

    pub(crate) fn on_service_start_cb(self: &Arc<Self>, key: NodeKey, epoch: Epoch, outcome: Outcome<()>) {
        self.with_graph(|g| g.complete_start(key, epoch, outcome));
        self.request_process();
    }

    pub(crate) fn on_service_stop_cb(self: &Arc<Self>, key: NodeKey, epoch: Epoch, outcome: Outcome<()>) {
        self.with_graph(|g| g.complete_stop(key, epoch, outcome));
        self.request_process();
    }
}
