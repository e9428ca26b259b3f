//! Definitions file tests

mod fixtures;

use assetflow_core::defs::{GroupId, InputKey};
use assetflow_core::error::GraphError;
use assetflow_core::partitions::PartitionsDefinition;
use assetflow_core::schema::ConfigValue;
use assetflow_planner::{parse_yaml_definitions, DefinitionsError, InputBinding, ResolutionError};
use fixtures::{key, keys, prefixed_keys, select_tree, ALL};
use pretty_assertions::assert_eq;

const REFERENCE: &str = r#"
groups:
  - id: start
    code_version: "1"
    outs:
      start: {}
  - id: abc_
    code_version: "1"
    can_subset: true
    ins:
      start: {}
    outs:
      a: { deps: [start] }
      b: { deps: [] }
      c: { deps: [b] }
  - id: def_
    code_version: "1"
    can_subset: true
    ins:
      a: {}
      b: {}
      c: {}
    outs:
      d: { deps: [a, b] }
      e: { deps: [c] }
      f: { deps: [d, e] }
  - id: final
    code_version: "1"
    ins:
      a: {}
      d: {}
    outs:
      final: {}
jobs:
  - name: everything
  - name: left_branch
    description: start through d
    selection: ["+a", "b+"]
    tags: { team: data }
"#;

#[test]
fn test_reference_graph_from_yaml() {
    let defs = parse_yaml_definitions(REFERENCE).unwrap();
    let g = defs.build_graph().unwrap();
    let fixture = fixtures::graph(true, true);

    assert_eq!(g.materializable_keys(), keys(&ALL));
    for name in ALL {
        assert_eq!(
            g.node(&key(name)).unwrap().upstream,
            fixture.node(&key(name)).unwrap().upstream,
            "{name}"
        );
    }
    let order: Vec<&str> = g.group_order().iter().map(|id| id.as_str()).collect();
    assert_eq!(order, vec!["start", "abc_", "def_", "final"]);
}

#[test]
fn test_jobs_from_yaml() {
    let defs = parse_yaml_definitions(REFERENCE).unwrap();
    let g = defs.build_graph().unwrap();

    let everything = defs.job("everything").unwrap();
    assert!(everything.selection.is_none());
    assert_eq!(everything.resolve(&g, &[]).unwrap().keys, keys(&ALL));

    let left = defs.job("left_branch").unwrap();
    assert_eq!(left.description.as_deref(), Some("start through d"));
    assert_eq!(left.tags.get("team").map(String::as_str), Some("data"));
    let resolved = left.resolve(&g, &[]).unwrap();
    assert_eq!(resolved.keys, keys(&["start", "a", "b", "c", "d"]));

    assert!(defs.job("missing").is_none());
}

#[test]
fn test_prefix_applies_to_produced_keys() {
    let yaml = format!("prefix: [core, models]\n{REFERENCE}")
        .replace("selection: [\"+a\", \"b+\"]", "selection: [\"+core/models/a\", \"core/models/b+\"]");
    let defs = parse_yaml_definitions(&yaml).unwrap();
    let g = defs.build_graph().unwrap();

    let prefix = ["core", "models"];
    assert_eq!(g.materializable_keys(), prefixed_keys(&prefix, &ALL));
    let resolved = defs.job("left_branch").unwrap().resolve(&g, &[]).unwrap();
    assert_eq!(resolved.keys, prefixed_keys(&prefix, &["start", "a", "b", "c", "d"]));

    let sel = assetflow_planner::parse_query("core/models/start*").unwrap();
    assert_eq!(
        select_tree(&g, &sel),
        prefixed_keys(&prefix, &["start", "a", "d", "f", "final"])
    );
}

#[test]
fn test_sources_partitions_and_config() {
    let yaml = r#"
sources:
  - key: raw/events
    observed_version: "2024-05-01"
    io_manager_key: warehouse
groups:
  - id: events
    code_version: "3"
    partitions:
      time_window: { cadence: hourly, start: "2024-01-01-00:00" }
    ins:
      events: { namespace: [raw] }
    outs:
      events:
        key: [staging, events]
        io_manager_key: lake
        metadata: { owner: data }
    config_schema:
      rows: { type: int, default: 10 }
      ratio: { type: float }
jobs:
  - name: hourly
    selection: ["staging/events"]
    config:
      events: { ratio: 2 }
"#;
    let defs = parse_yaml_definitions(yaml).unwrap();
    let g = defs.build_graph().unwrap();

    assert!(g.is_source(&key("raw/events")));
    let node = g.node(&key("staging/events")).unwrap();
    assert_eq!(node.upstream, keys(&["raw/events"]));
    assert_eq!(node.partitions, Some(PartitionsDefinition::hourly("2024-01-01-00:00")));
    assert_eq!(node.io_manager_key.as_deref(), Some("lake"));
    assert_eq!(node.metadata.get("owner"), Some(&serde_json::json!("data")));

    let group = &defs.groups[0];
    assert_eq!(group.ins["events"].key, InputKey::Namespace(vec!["raw".into()]));

    let resolved = defs.job("hourly").unwrap().resolve(&g, &[]).unwrap();
    assert_eq!(resolved.partitions, Some(PartitionsDefinition::hourly("2024-01-01-00:00")));
    let events = &resolved.groups[&GroupId::new("events")];
    assert_eq!(events.config.get("rows"), Some(&ConfigValue::Int(10)));
    assert_eq!(events.config.get("ratio"), Some(&ConfigValue::Float(2.0)));
    assert_eq!(
        events.inputs[&key("raw/events")].binding,
        InputBinding::Source {
            io_manager_key: "warehouse".into(),
            observed_version: Some("2024-05-01".into()),
        }
    );
}

#[test]
fn test_static_partitions() {
    let yaml = r#"
groups:
  - id: by_region
    partitions:
      static: [eu, us]
    outs:
      by_region: {}
"#;
    let defs = parse_yaml_definitions(yaml).unwrap();
    let g = defs.build_graph().unwrap();
    assert_eq!(
        g.node(&key("by_region")).unwrap().partitions,
        Some(PartitionsDefinition::static_keys(["eu", "us"]))
    );
}

#[test]
fn test_unknown_fields_rejected() {
    let yaml = r#"
groups:
  - id: a
    outs:
      a: {}
    colour: blue
"#;
    let err = parse_yaml_definitions(yaml).unwrap_err();
    assert!(matches!(err, DefinitionsError::Yaml(_)));
    assert!(!err.suggestions().is_empty());
}

#[test]
fn test_key_and_namespace_both_set() {
    let yaml = r#"
groups:
  - id: a
    ins:
      up: { key: x, namespace: [y] }
    outs:
      a: {}
"#;
    let err = parse_yaml_definitions(yaml).unwrap_err();
    match &err {
        DefinitionsError::Graph(GraphError::InvalidDefinition { group, reason }) => {
            assert_eq!(group, "a");
            assert!(reason.contains("input 'up'"));
        }
        other => panic!("expected InvalidDefinition, got {other:?}"),
    }
    assert!(err.suggestions().iter().any(|s| s.contains("namespace")));
}

#[test]
fn test_bad_job_selection() {
    let yaml = r#"
groups:
  - id: a
    outs:
      a: {}
jobs:
  - name: broken
    selection: ["a+*"]
"#;
    match parse_yaml_definitions(yaml).unwrap_err() {
        DefinitionsError::Selection { job, .. } => assert_eq!(job, "broken"),
        other => panic!("expected Selection, got {other:?}"),
    }
}

#[test]
fn test_unknown_key_in_job_found_at_resolution() {
    let yaml = r#"
groups:
  - id: a
    outs:
      a: {}
jobs:
  - name: typo
    selection: ["aa"]
"#;
    let defs = parse_yaml_definitions(yaml).unwrap();
    let g = defs.build_graph().unwrap();
    let err = defs.job("typo").unwrap().resolve(&g, &[]).unwrap_err();
    assert!(matches!(err, ResolutionError::Selection(_)));
}

#[test]
fn test_duplicate_job_names() {
    let yaml = r#"
groups:
  - id: a
    outs:
      a: {}
jobs:
  - name: nightly
  - name: nightly
"#;
    let err = parse_yaml_definitions(yaml).unwrap_err();
    assert!(matches!(err, DefinitionsError::DuplicateJob(ref name) if name == "nightly"));
}

#[test]
fn test_graph_errors_surface_on_build() {
    let yaml = r#"
groups:
  - id: x
    ins:
      y: {}
    outs:
      x: {}
  - id: y
    ins:
      x: {}
    outs:
      y: {}
"#;
    let defs = parse_yaml_definitions(yaml).unwrap();
    assert!(matches!(defs.build_graph().unwrap_err(), GraphError::Cycle { .. }));
}

#[test]
fn test_empty_file_is_empty_definitions() {
    let defs = parse_yaml_definitions("{}").unwrap();
    assert!(defs.groups.is_empty());
    assert!(defs.jobs.is_empty());
    assert!(defs.build_graph().unwrap().materializable_keys().is_empty());
}

#[test]
fn test_job_partitions_from_yaml() {
    let yaml = r#"
groups:
  - id: events
    code_version: "1"
    partitions:
      time_window: { cadence: daily, start: "2020-01-01" }
    outs:
      events: {}
jobs:
  - name: daily_events
    partitions:
      time_window: { cadence: daily, start: "2020-01-01" }
"#;
    let defs = parse_yaml_definitions(yaml).unwrap();
    let g = defs.build_graph().unwrap();
    let job = defs.job("daily_events").unwrap();
    assert_eq!(job.partitions, Some(PartitionsDefinition::daily("2020-01-01")));
    let resolved = job.resolve(&g, &[]).unwrap();
    assert_eq!(resolved.partitions, Some(PartitionsDefinition::daily("2020-01-01")));
}

#[test]
fn test_partitions_need_exactly_one_kind() {
    for partitions in ["{ static: [a], time_window: { cadence: daily, start: \"2020-01-01\" } }", "{}"] {
        let yaml = format!("groups:\n  - id: a\n    partitions: {partitions}\n    outs:\n      a: {{}}\n");
        let err = parse_yaml_definitions(&yaml).unwrap_err();
        assert!(matches!(err, DefinitionsError::Yaml(_)), "{partitions}: {err:?}");
    }
}

#[test]
fn test_partitions_serialize_as_single_key_maps() {
    let daily = PartitionsDefinition::daily("2020-01-01");
    assert_eq!(
        serde_json::to_value(&daily).unwrap(),
        serde_json::json!({ "time_window": { "cadence": "daily", "start": "2020-01-01" } })
    );
    let regions = PartitionsDefinition::static_keys(["eu", "us"]);
    let text = serde_yaml::to_string(&regions).unwrap();
    assert_eq!(serde_yaml::from_str::<PartitionsDefinition>(&text).unwrap(), regions);
}
