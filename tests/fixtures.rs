//! Shared test fixtures.
//!
//! The reference graph: `a` reads `start`; `c` reads `b`; `d` reads `a` and `b`; `e` reads `c`;
//! `f` reads `d` and `e`; `final` reads `a` and `d`.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use assetflow_core::defs::{prefix_groups, ExecutableGroup};
use assetflow_core::graph::AssetGraph;
use assetflow_core::key::AssetKey;
use assetflow_exec::{ExecutionPlan, InMemoryIoManager, IoManagers, MemoStore, RunTracker};
use assetflow_planner::{parse_queries, AssetSelection};

pub const ALL: [&str; 8] = ["start", "a", "b", "c", "d", "e", "f", "final"];

/// One group per asset.
pub fn single_assets() -> Vec<ExecutableGroup> {
    vec![
        ExecutableGroup::asset("start"),
        ExecutableGroup::asset("a").input("start"),
        ExecutableGroup::asset("b"),
        ExecutableGroup::asset("c").input("b"),
        ExecutableGroup::asset("d").input("a").input("b"),
        ExecutableGroup::asset("e").input("c"),
        ExecutableGroup::asset("f").input("d").input("e"),
        ExecutableGroup::asset("final").input("a").input("d"),
    ]
}

/// Same assets, with a/b/c produced by `abc_` and d/e/f by `def_`.
pub fn multi_assets(can_subset: bool) -> Vec<ExecutableGroup> {
    let abc = ExecutableGroup::multi("abc_")
        .input("start")
        .out("a")
        .out("b")
        .out("c")
        .internal_deps("a", ["start"])
        .internal_deps("b", std::iter::empty::<&str>())
        .internal_deps("c", ["b"])
        .subsettable(can_subset);
    let def = ExecutableGroup::multi("def_")
        .input("a")
        .input("b")
        .input("c")
        .out("d")
        .out("e")
        .out("f")
        .internal_deps("d", ["a", "b"])
        .internal_deps("e", ["c"])
        .internal_deps("f", ["d", "e"])
        .subsettable(can_subset);
    vec![
        ExecutableGroup::asset("start"),
        abc,
        def,
        ExecutableGroup::asset("final").input("a").input("d"),
    ]
}

pub fn assets(use_multi: bool, can_subset: bool) -> Vec<ExecutableGroup> {
    if use_multi {
        multi_assets(can_subset)
    } else {
        single_assets()
    }
}

/// Give every group the same code version.
pub fn versioned(groups: Vec<ExecutableGroup>, version: &str) -> Vec<ExecutableGroup> {
    groups.into_iter().map(|g| g.code_version(version)).collect()
}

pub fn graph(use_multi: bool, can_subset: bool) -> AssetGraph {
    AssetGraph::build(assets(use_multi, can_subset), vec![]).expect("reference graph builds")
}

pub fn prefixed_graph(use_multi: bool, prefix: &[&str]) -> AssetGraph {
    let groups = prefix_groups(assets(use_multi, use_multi), prefix.iter().copied());
    AssetGraph::build(groups, vec![]).expect("prefixed graph builds")
}

pub fn versioned_graph(use_multi: bool) -> AssetGraph {
    AssetGraph::build(versioned(assets(use_multi, use_multi), "1"), vec![])
        .expect("versioned graph builds")
}

pub fn key(name: &str) -> AssetKey {
    AssetKey::from_path(name)
}

pub fn keys(names: &[&str]) -> BTreeSet<AssetKey> {
    names.iter().map(|n| AssetKey::from_path(n)).collect()
}

pub fn prefixed_keys(prefix: &[&str], names: &[&str]) -> BTreeSet<AssetKey> {
    let prefix: Vec<String> = prefix.iter().map(|s| s.to_string()).collect();
    names
        .iter()
        .map(|n| AssetKey::new([*n]).with_prefix(&prefix))
        .collect()
}

pub fn select(graph: &AssetGraph, queries: &[&str]) -> BTreeSet<AssetKey> {
    parse_queries(queries)
        .expect("query parses")
        .resolve(graph)
        .expect("selection resolves")
}

pub fn select_tree(graph: &AssetGraph, selection: &AssetSelection) -> BTreeSet<AssetKey> {
    selection.resolve(graph).expect("selection resolves")
}

/// An I/O registry with one in-memory manager under the default key, plus a
/// handle to it.
pub fn in_memory_io() -> (IoManagers, Arc<InMemoryIoManager>) {
    let manager = Arc::new(InMemoryIoManager::new());
    let io = IoManagers::new().with("io_manager", manager.clone());
    (io, manager)
}

/// Pretend to be an execution engine: run every queued step in order, store
/// each output, and report success.
pub fn run_all(plan: &ExecutionPlan, memo: &dyn MemoStore, io: &IoManagers) {
    let mut tracker = RunTracker::new(plan, memo);
    loop {
        let ready: Vec<_> = tracker.ready().into_iter().map(|s| s.group().clone()).collect();
        if ready.is_empty() {
            break;
        }
        for group in ready {
            tracker.start(&group).expect("step starts");
            let step = plan.step(&group).expect("step exists");
            for out in step.outputs.values() {
                let manager = io
                    .get(out.io_manager_key.as_deref().unwrap_or("io_manager"))
                    .expect("manager registered");
                manager
                    .store(&out.key, step.partition(), &serde_json::json!(out.key.to_path()))
                    .expect("store succeeds");
            }
            tracker.succeed(&group).expect("step succeeds");
        }
    }
    assert!(tracker.is_finished());
    assert!(tracker.unfinished().is_empty());
}
