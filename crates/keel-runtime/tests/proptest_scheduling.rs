/// Property-based tests for provider selection and start/stop ordering
///
/// - whatever the attach order, an import binds to the highest-priority
///   provider, and falls back to the next best when that one is detached
/// - in a random ownership tree every component starts before its parent
///   and stops after it
mod common;

use std::collections::HashMap;
use std::sync::Arc;

use common::{context, settle, Journal};
use keel_runtime::{Completion, Component, Dependency, Interface, Parts, Priority, Service, ServiceCx};
use proptest::prelude::*;

trait Sink: Send + Sync {
    fn priority(&self) -> i32;
}

impl Interface for dyn Sink {
    const NAME: &'static str = "tests::proptest::Sink";
}

struct Provider {
    priority: i32,
}

impl Sink for Provider {
    fn priority(&self) -> i32 {
        self.priority
    }
}

impl Service for Provider {
    fn describe(&self, parts: &mut Parts<Self>) {
        parts.export(Priority(self.priority), |s| s as Arc<dyn Sink>);
    }
}

#[derive(Default)]
struct Consumer {
    sink: Dependency<dyn Sink>,
}

impl Service for Consumer {
    fn describe(&self, parts: &mut Parts<Self>) {
        parts.import(&self.sink);
    }
}

struct TreeNode {
    id: usize,
    journal: Journal,
    children: Vec<Component<TreeNode>>,
}

impl TreeNode {
    /// Build node `id` of a tree given as a parent index per node
    fn build(id: usize, parents: &[usize], journal: &Journal) -> TreeNode {
        let children = (1..parents.len())
            .filter(|&c| parents[c] == id)
            .map(|c| Component::new(TreeNode::build(c, parents, journal)))
            .collect();
        TreeNode {
            id,
            journal: journal.clone(),
            children,
        }
    }
}

impl Service for TreeNode {
    fn describe(&self, parts: &mut Parts<Self>) {
        for child in &self.children {
            parts.component(child);
        }
    }

    fn on_start(&self, _cx: &ServiceCx) -> Completion<()> {
        self.journal.push(format!("start {}", self.id));
        Completion::ready(())
    }

    fn on_stop(&self, _cx: &ServiceCx) -> Completion<()> {
        self.journal.push(format!("stop {}", self.id));
        Completion::ready(())
    }
}

/// Random tree: node 0 is the root, node i > 0 hangs off some node < i
fn tree_strategy() -> impl Strategy<Value = Vec<usize>> {
    (1usize..24).prop_flat_map(|n| {
        (1..n)
            .map(|i| (0..i).boxed())
            .collect::<Vec<_>>()
            .prop_map(|mut parents| {
                parents.insert(0, 0);
                parents
            })
    })
}

fn positions(entries: &[String], prefix: &str) -> HashMap<usize, usize> {
    entries
        .iter()
        .enumerate()
        .filter_map(|(pos, e)| e.strip_prefix(prefix)?.parse().ok().map(|id: usize| (id, pos)))
        .collect()
}

proptest! {
    #[test]
    fn prop_import_binds_best_provider(
        priorities in prop::collection::hash_set(-50i32..50, 1..8),
        consumer_first in any::<bool>(),
    ) {
        let ctx = context();
        let priorities: Vec<i32> = priorities.into_iter().collect();

        let early = consumer_first.then(|| ctx.attach(Consumer::default()).unwrap());
        let providers: Vec<_> = priorities
            .iter()
            .map(|&priority| ctx.attach(Provider { priority }).unwrap())
            .collect();
        let consumer = early.unwrap_or_else(|| ctx.attach(Consumer::default()).unwrap());

        let mut sorted = priorities.clone();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        prop_assert_eq!(consumer.sink.get().map(|s| s.priority()), Some(sorted[0]));

        let best = providers.iter().find(|p| p.priority == sorted[0]).unwrap();
        prop_assert!(settle(&ctx, ctx.detach(best)).is_value());
        prop_assert_eq!(consumer.sink.get().map(|s| s.priority()), sorted.get(1).copied());
    }

    #[test]
    fn prop_components_start_before_and_stop_after_parent(parents in tree_strategy()) {
        let ctx = context();
        let journal = Journal::default();
        let root = ctx.attach(TreeNode::build(0, &parents, &journal)).unwrap();

        prop_assert!(settle(&ctx, ctx.start(&root)).is_value());
        prop_assert!(settle(&ctx, ctx.detach(&root)).is_value());

        let entries = journal.take();
        let started = positions(&entries, "start ");
        let stopped = positions(&entries, "stop ");
        prop_assert_eq!(started.len(), parents.len());
        prop_assert_eq!(stopped.len(), parents.len());
        for child in 1..parents.len() {
            let parent = parents[child];
            prop_assert!(started[&child] < started[&parent]);
            prop_assert!(stopped[&child] > stopped[&parent]);
        }
    }
}
