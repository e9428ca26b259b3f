//! Memoized plan builder tests

mod fixtures;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use assetflow_core::config::PlannerConfig;
use assetflow_core::defs::{AssetOut, ExecutableGroup, GroupId, SourceAsset};
use assetflow_core::graph::AssetGraph;
use assetflow_core::hash::Hash256;
use assetflow_core::key::AssetKey;
use assetflow_core::partitions::PartitionsDefinition;
use assetflow_core::schema::{ConfigField, ConfigType, ConfigValue, RunConfig};
use assetflow_exec::{
    build_plan, InMemoryIoManager, InMemoryMemoStore, IoManagers, MemoError, MemoStore, PlanBuilder,
    PlanError, PlanManifest, StepIdentity, StepState, VersionToken,
};
use assetflow_exec::version::step_token;
use assetflow_planner::resolve::ResolvedJob;
use assetflow_planner::{parse_queries, resolve, AssetJob, InputBinding};
use fixtures::{in_memory_io, key, keys, run_all, versioned, versioned_graph, ALL};
use pretty_assertions::assert_eq;

fn resolve_all(g: &AssetGraph) -> ResolvedJob {
    resolve(g, None, &[]).unwrap()
}

fn resolve_query(g: &AssetGraph, queries: &[&str]) -> ResolvedJob {
    AssetJob::new("subset")
        .with_selection(parse_queries(queries).unwrap())
        .resolve(g, &[])
        .unwrap()
}

fn group_ids(names: &[&str]) -> Vec<GroupId> {
    names.iter().map(|n| GroupId::new(*n)).collect()
}

#[test]
fn test_fresh_store_queues_everything_in_order() {
    let g = versioned_graph(false);
    let memo = InMemoryMemoStore::new();
    let (io, _) = in_memory_io();

    let plan = build_plan(&g, &resolve_all(&g), None, &memo, &io).unwrap();
    assert_eq!(
        plan.queued_groups(),
        group_ids(&["b", "c", "e", "start", "a", "d", "f", "final"])
    );
    assert!(plan.skipped.is_empty());
    assert!(plan.steps.iter().all(|s| s.state == StepState::Queued && s.token.is_some()));
}

#[test]
fn test_second_plan_after_run_is_noop() {
    for use_multi in [false, true] {
        let g = versioned_graph(use_multi);
        let job = resolve_all(&g);
        let memo = InMemoryMemoStore::new();
        let (io, _) = in_memory_io();

        let first = build_plan(&g, &job, None, &memo, &io).unwrap();
        run_all(&first, &memo, &io);

        let second = build_plan(&g, &job, None, &memo, &io).unwrap();
        assert!(second.is_noop(), "multi: {use_multi}");
        assert_eq!(second.skipped_keys(), keys(&ALL));
        assert!(second.skipped.iter().all(|s| s.state == StepState::Skipped));
    }
}

#[test]
fn test_tokens_are_deterministic() {
    let g = versioned_graph(true);
    let job = resolve_all(&g);
    let (io, _) = in_memory_io();
    let a = build_plan(&g, &job, None, &InMemoryMemoStore::new(), &io).unwrap();
    let b = build_plan(&g, &job, None, &InMemoryMemoStore::new(), &io).unwrap();
    assert_eq!(a, b);
    assert_eq!(
        PlanManifest::from_plan(&a).unwrap().plan_hash,
        PlanManifest::from_plan(&b).unwrap().plan_hash
    );
}

#[test]
fn test_code_version_change_invalidates_downstream() {
    let g = versioned_graph(false);
    let memo = InMemoryMemoStore::new();
    let (io, _) = in_memory_io();
    run_all(&build_plan(&g, &resolve_all(&g), None, &memo, &io).unwrap(), &memo, &io);

    let groups: Vec<ExecutableGroup> = versioned(fixtures::single_assets(), "1")
        .into_iter()
        .map(|grp| if grp.id.as_str() == "a" { grp.code_version("2") } else { grp })
        .collect();
    let changed = AssetGraph::build(groups, vec![]).unwrap();

    let plan = build_plan(&changed, &resolve_all(&changed), None, &memo, &io).unwrap();
    assert_eq!(plan.queued_groups(), group_ids(&["a", "d", "f", "final"]));
    assert_eq!(plan.skipped_keys(), keys(&["b", "c", "e", "start"]));
}

#[test]
fn test_missing_output_forces_recompute() {
    let g = versioned_graph(false);
    let memo = InMemoryMemoStore::new();
    let (io, manager) = in_memory_io();
    run_all(&build_plan(&g, &resolve_all(&g), None, &memo, &io).unwrap(), &memo, &io);

    assert!(manager.evict(&key("c"), None).unwrap());
    let plan = build_plan(&g, &resolve_all(&g), None, &memo, &io).unwrap();
    assert_eq!(plan.queued_groups(), group_ids(&["c"]));
}

#[test]
fn test_unversioned_steps_always_run() {
    let groups: Vec<ExecutableGroup> = versioned(fixtures::single_assets(), "1")
        .into_iter()
        .map(|mut grp| {
            if grp.id.as_str() == "b" {
                grp.code_version = None;
            }
            grp
        })
        .collect();
    let g = AssetGraph::build(groups, vec![]).unwrap();
    let memo = InMemoryMemoStore::new();
    let (io, _) = in_memory_io();
    run_all(&build_plan(&g, &resolve_all(&g), None, &memo, &io).unwrap(), &memo, &io);

    let plan = build_plan(&g, &resolve_all(&g), None, &memo, &io).unwrap();
    assert_eq!(plan.queued_keys(), keys(&["b", "c", "d", "e", "f", "final"]));
    assert_eq!(plan.skipped_keys(), keys(&["start", "a"]));
    assert!(plan.steps.iter().all(|s| s.token.is_none()));
}

#[test]
fn test_nothing_versioned_nothing_recorded() {
    let g = fixtures::graph(false, false);
    let memo = InMemoryMemoStore::new();
    let (io, _) = in_memory_io();
    let plan = build_plan(&g, &resolve_all(&g), None, &memo, &io).unwrap();
    run_all(&plan, &memo, &io);
    assert!(memo.is_empty());
    assert_eq!(build_plan(&g, &resolve_all(&g), None, &memo, &io).unwrap().steps.len(), ALL.len());
}

#[test]
fn test_subset_jobs_share_tokens_with_full_job() {
    let g = versioned_graph(false);
    let memo = InMemoryMemoStore::new();
    let (io, _) = in_memory_io();
    run_all(&build_plan(&g, &resolve_all(&g), None, &memo, &io).unwrap(), &memo, &io);

    for queries in [&["b+"][..], &["+f"], &["f"], &["*c", "final"]] {
        let plan = build_plan(&g, &resolve_query(&g, queries), None, &memo, &io).unwrap();
        assert!(plan.is_noop(), "queries {queries:?}: {:?}", plan.queued_groups());
    }
}

#[test]
fn test_different_subset_of_multi_group_reruns() {
    let g = versioned_graph(true);
    let memo = InMemoryMemoStore::new();
    let (io, _) = in_memory_io();
    run_all(&build_plan(&g, &resolve_all(&g), None, &memo, &io).unwrap(), &memo, &io);

    let plan = build_plan(&g, &resolve_query(&g, &["b+"]), None, &memo, &io).unwrap();
    assert_eq!(plan.queued_groups(), group_ids(&["abc_", "def_"]));
    assert!(plan.steps.iter().all(|s| s.is_subset));
    assert_eq!(plan.queued_keys(), keys(&["b", "c", "d"]));
}

#[test]
fn test_loaded_inputs_carry_bindings() {
    let g = versioned_graph(false);
    let memo = InMemoryMemoStore::new();
    let (io, _) = in_memory_io();
    let full = build_plan(&g, &resolve_all(&g), None, &memo, &io).unwrap();
    run_all(&full, &memo, &io);

    let plan = build_plan(&g, &resolve_query(&g, &["f"]), None, &memo, &io).unwrap();
    let step = plan.step(&GroupId::new("f")).unwrap();
    assert!(step.depends_on.is_empty());
    assert_eq!(step.inputs.keys().cloned().collect::<BTreeSet<_>>(), keys(&["d", "e"]));
    for input in step.inputs.values() {
        assert!(matches!(input.binding, InputBinding::Load { .. }));
        assert_eq!(input.partition, None);
        // Loaded inputs carry the token recorded for their producer.
        let producer = full.step(&GroupId::new(input.key.to_path())).unwrap();
        assert_eq!(input.token, producer.token);
    }
}

#[test]
fn test_unrecorded_loaded_input_is_unversioned() {
    let g = versioned_graph(false);
    let memo = InMemoryMemoStore::new();
    let (io, _) = in_memory_io();
    let plan = build_plan(&g, &resolve_query(&g, &["f"]), None, &memo, &io).unwrap();

    let step = plan.step(&GroupId::new("f")).unwrap();
    assert!(step.inputs.values().all(|i| i.token.is_none()));
    assert_eq!(step.token, None);
    assert_eq!(plan.queued_groups(), group_ids(&["f"]));
}

#[test]
fn test_step_token_covers_inputs() {
    let inputs = |byte: u8| -> BTreeMap<AssetKey, Option<VersionToken>> {
        [(key("core/up"), Some(VersionToken(Hash256([byte; 32]))))].into()
    };
    let token = |ins: &BTreeMap<AssetKey, Option<VersionToken>>| {
        step_token(&GroupId::new("down"), Some("1"), [&key("down")], ins, &BTreeMap::new(), None).unwrap()
    };

    let first = token(&inputs(1));
    assert!(first.is_some());
    assert_eq!(token(&inputs(1)), first);
    assert_ne!(token(&inputs(2)), first);

    let unversioned: BTreeMap<AssetKey, Option<VersionToken>> = [(key("core/up"), None)].into();
    assert_eq!(token(&unversioned), None);
}

#[test]
fn test_config_change_reruns_step() {
    let groups = vec![
        ExecutableGroup::asset("config_asset")
            .code_version("1")
            .config_field("val", ConfigField::required(ConfigType::Int)),
    ];
    let g = AssetGraph::build(groups, vec![]).unwrap();
    let config = |v: i64| -> RunConfig {
        let mut cfg = RunConfig::new();
        cfg.insert("config_asset".into(), [("val".to_string(), ConfigValue::Int(v))].into());
        cfg
    };
    let resolve_with = |v: i64| AssetJob::new("cfg").with_config(config(v)).resolve(&g, &[]).unwrap();

    let memo = InMemoryMemoStore::new();
    let (io, _) = in_memory_io();
    run_all(&build_plan(&g, &resolve_with(1), None, &memo, &io).unwrap(), &memo, &io);

    assert!(build_plan(&g, &resolve_with(1), None, &memo, &io).unwrap().is_noop());
    let changed = build_plan(&g, &resolve_with(2), None, &memo, &io).unwrap();
    assert_eq!(changed.queued_groups(), group_ids(&["config_asset"]));
}

fn upstream_config_graph() -> AssetGraph {
    let groups = vec![
        ExecutableGroup::asset("a")
            .code_version("1")
            .config_field("val", ConfigField::required(ConfigType::Int)),
        ExecutableGroup::asset("b").code_version("1").input("a"),
    ];
    AssetGraph::build(groups, vec![]).unwrap()
}

fn val_config(v: i64) -> RunConfig {
    let mut cfg = RunConfig::new();
    cfg.insert("a".into(), [("val".to_string(), ConfigValue::Int(v))].into());
    cfg
}

#[test]
fn test_upstream_config_change_reruns_downstream() {
    let g = upstream_config_graph();
    let resolve_with = |v: i64| AssetJob::new("cfg").with_config(val_config(v)).resolve(&g, &[]).unwrap();

    let memo = InMemoryMemoStore::new();
    let (io, _) = in_memory_io();
    run_all(&build_plan(&g, &resolve_with(1), None, &memo, &io).unwrap(), &memo, &io);
    assert!(build_plan(&g, &resolve_with(1), None, &memo, &io).unwrap().is_noop());

    let changed = build_plan(&g, &resolve_with(2), None, &memo, &io).unwrap();
    assert_eq!(changed.queued_groups(), group_ids(&["a", "b"]));
}

#[test]
fn test_rerun_upstream_invalidates_loaded_reader() {
    let g = upstream_config_graph();
    let memo = InMemoryMemoStore::new();
    let (io, _) = in_memory_io();
    let full = AssetJob::new("all").with_config(val_config(1)).resolve(&g, &[]).unwrap();
    run_all(&build_plan(&g, &full, None, &memo, &io).unwrap(), &memo, &io);

    let only_b = resolve_query(&g, &["b"]);
    assert!(build_plan(&g, &only_b, None, &memo, &io).unwrap().is_noop());

    // Rematerialize `a` alone with a new config; `b` now reads a changed value.
    let only_a = AssetJob::new("a_only")
        .with_selection(parse_queries(&["a"]).unwrap())
        .with_config(val_config(2))
        .resolve(&g, &[])
        .unwrap();
    run_all(&build_plan(&g, &only_a, None, &memo, &io).unwrap(), &memo, &io);

    let plan = build_plan(&g, &only_b, None, &memo, &io).unwrap();
    assert_eq!(plan.queued_groups(), group_ids(&["b"]));
}

#[test]
fn test_source_version_change_reruns_readers() {
    let groups = versioned(
        vec![
            ExecutableGroup::asset("a").input("raw"),
            ExecutableGroup::asset("b").input("a"),
            ExecutableGroup::asset("other"),
        ],
        "1",
    );
    let g = AssetGraph::build(groups, vec![]).unwrap();
    let resolve_at = |v: &str| resolve(&g, None, &[SourceAsset::new("raw").with_version(v)]).unwrap();

    let memo = InMemoryMemoStore::new();
    let (io, _) = in_memory_io();
    run_all(&build_plan(&g, &resolve_at("v1"), None, &memo, &io).unwrap(), &memo, &io);

    assert!(build_plan(&g, &resolve_at("v1"), None, &memo, &io).unwrap().is_noop());
    let plan = build_plan(&g, &resolve_at("v2"), None, &memo, &io).unwrap();
    assert_eq!(plan.queued_groups(), group_ids(&["a", "b"]));
    assert_eq!(plan.skipped_keys(), keys(&["other"]));
}

#[test]
fn test_unregistered_io_manager() {
    let groups = vec![ExecutableGroup::multi("g").out_with("x", AssetOut::new("x").with_io_manager("warehouse"))];
    let g = AssetGraph::build(groups, vec![]).unwrap();
    let (io, _) = in_memory_io();
    let err = build_plan(&g, &resolve_all(&g), None, &InMemoryMemoStore::new(), &io).unwrap_err();
    match err {
        PlanError::UnknownIoManager { key: k, manager } => {
            assert_eq!(k, key("x"));
            assert_eq!(manager, "warehouse");
        }
        other => panic!("expected UnknownIoManager, got {other:?}"),
    }

    let io = io.with("warehouse", Arc::new(InMemoryIoManager::new()));
    assert!(build_plan(&g, &resolve_all(&g), None, &InMemoryMemoStore::new(), &io).is_ok());
}

fn daily_graph() -> AssetGraph {
    let daily = PartitionsDefinition::daily("2020-01-01");
    let groups = versioned(
        vec![
            ExecutableGroup::asset("events").partitioned(daily.clone()),
            ExecutableGroup::asset("sessions").input("events").partitioned(daily),
            ExecutableGroup::asset("dim_users"),
        ],
        "1",
    );
    AssetGraph::build(groups, vec![]).unwrap()
}

#[test]
fn test_partition_key_checks() {
    let g = daily_graph();
    let memo = InMemoryMemoStore::new();
    let (io, _) = in_memory_io();

    let partitioned = resolve_query(&g, &["events+"]);
    assert!(matches!(
        build_plan(&g, &partitioned, None, &memo, &io).unwrap_err(),
        PlanError::MissingPartitionKey { .. }
    ));
    assert!(matches!(
        build_plan(&g, &partitioned, Some("yesterday"), &memo, &io).unwrap_err(),
        PlanError::InvalidPartitionKey { .. }
    ));
    assert!(matches!(
        build_plan(&g, &partitioned, Some("2019-12-31"), &memo, &io).unwrap_err(),
        PlanError::InvalidPartitionKey { .. }
    ));

    let plain = resolve_query(&g, &["dim_users"]);
    assert!(matches!(
        build_plan(&g, &plain, Some("2020-01-02"), &memo, &io).unwrap_err(),
        PlanError::UnexpectedPartitionKey { .. }
    ));
}

#[test]
fn test_partitions_are_memoized_independently() {
    let g = daily_graph();
    let job = resolve_query(&g, &["events+"]);
    let memo = InMemoryMemoStore::new();
    let (io, _) = in_memory_io();

    let plan = build_plan(&g, &job, Some("2020-01-02"), &memo, &io).unwrap();
    assert_eq!(plan.partition.as_deref(), Some("2020-01-02"));
    let sessions = plan.step(&GroupId::new("sessions")).unwrap();
    assert_eq!(sessions.identity, StepIdentity::new(GroupId::new("sessions"), Some("2020-01-02")));
    assert_eq!(sessions.inputs[&key("events")].partition.as_deref(), Some("2020-01-02"));
    run_all(&plan, &memo, &io);

    assert!(build_plan(&g, &job, Some("2020-01-02"), &memo, &io).unwrap().is_noop());
    let other_day = build_plan(&g, &job, Some("2020-01-03"), &memo, &io).unwrap();
    assert_eq!(other_day.queued_groups(), group_ids(&["events", "sessions"]));
}

/// Fails the first read of every identity, then answers from an in-memory store.
#[derive(Default)]
struct FlakyMemo {
    inner: InMemoryMemoStore,
    seen: Mutex<BTreeSet<StepIdentity>>,
    reads: AtomicUsize,
}

impl MemoStore for FlakyMemo {
    fn get_recorded_version(&self, id: &StepIdentity) -> Result<Option<VersionToken>, MemoError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let first = self.seen.lock().unwrap().insert(id.clone());
        if first {
            return Err(MemoError::Unavailable("connection reset".into()));
        }
        self.inner.get_recorded_version(id)
    }

    fn record_version(&self, id: &StepIdentity, token: VersionToken) -> Result<(), MemoError> {
        self.inner.record_version(id, token)
    }
}

struct BrokenMemo;

impl MemoStore for BrokenMemo {
    fn get_recorded_version(&self, _: &StepIdentity) -> Result<Option<VersionToken>, MemoError> {
        Err(MemoError::Unavailable("down".into()))
    }

    fn record_version(&self, _: &StepIdentity, _: VersionToken) -> Result<(), MemoError> {
        Err(MemoError::Unavailable("down".into()))
    }
}

#[test]
fn test_failed_lookups_count_as_misses() {
    let g = versioned_graph(false);
    let (io, _) = in_memory_io();
    let plan = build_plan(&g, &resolve_all(&g), None, &BrokenMemo, &io).unwrap();
    assert_eq!(plan.steps.len(), ALL.len());

    // Recording failures do not fail the run.
    run_all(&plan, &BrokenMemo, &io);
}

#[test]
fn test_lookups_are_retried() {
    let g = versioned_graph(false);
    let job = resolve_all(&g);
    let (io, _) = in_memory_io();

    let memo = FlakyMemo::default();
    let first = build_plan(&g, &job, None, &memo, &io).unwrap();
    run_all(&first, &memo, &io);
    memo.seen.lock().unwrap().clear();
    memo.reads.store(0, Ordering::SeqCst);

    let no_retry = PlannerConfig { memo_read_retries: 0, ..PlannerConfig::default() };
    let plan = PlanBuilder::new(&g, &memo, &io).with_config(no_retry).build(&job, None).unwrap();
    assert_eq!(plan.steps.len(), ALL.len());
    assert_eq!(memo.reads.load(Ordering::SeqCst), ALL.len());

    memo.seen.lock().unwrap().clear();
    memo.reads.store(0, Ordering::SeqCst);
    let one_retry = PlannerConfig { memo_read_retries: 1, ..PlannerConfig::default() };
    let plan = PlanBuilder::new(&g, &memo, &io).with_config(one_retry).build(&job, None).unwrap();
    assert!(plan.is_noop());
    assert_eq!(memo.reads.load(Ordering::SeqCst), 2 * ALL.len());
}

#[test]
fn test_parallelism_does_not_change_the_plan() {
    let g = versioned_graph(true);
    let job = resolve_all(&g);
    let memo = InMemoryMemoStore::new();
    let (io, _) = in_memory_io();
    run_all(&build_plan(&g, &job, None, &memo, &io).unwrap(), &memo, &io);

    let plans: Vec<_> = [1, 2, 3, 64]
        .into_iter()
        .map(|n| {
            let cfg = PlannerConfig { max_parallel_lookups: n, ..PlannerConfig::default() };
            PlanBuilder::new(&g, &memo, &io).with_config(cfg).build(&job, None).unwrap()
        })
        .collect();
    assert!(plans.windows(2).all(|w| w[0] == w[1]));
    assert!(plans[0].is_noop());
}

#[test]
fn test_manifest_lists_steps() {
    let g = versioned_graph(false);
    let memo = InMemoryMemoStore::new();
    let (io, manager) = in_memory_io();
    run_all(&build_plan(&g, &resolve_all(&g), None, &memo, &io).unwrap(), &memo, &io);
    manager.evict(&key("final"), None).unwrap();

    let plan = build_plan(&g, &resolve_all(&g), None, &memo, &io).unwrap();
    let manifest = PlanManifest::from_plan(&plan).unwrap();
    assert_eq!(manifest.queued.len(), 1);
    assert_eq!(manifest.queued[0].keys, vec![key("final")]);
    assert_eq!(manifest.skipped.len(), ALL.len() - 1);

    let json = manifest.to_json_pretty().unwrap();
    let back: PlanManifest = serde_json::from_str(&json).unwrap();
    assert_eq!(back, manifest);
}

#[test]
fn test_in_memory_registry_uses_default_key() {
    let g = versioned_graph(false);
    let io = IoManagers::in_memory();
    assert!(build_plan(&g, &resolve_all(&g), None, &InMemoryMemoStore::new(), &io).is_ok());
}
