//! YAML → definitions (groups, sources, jobs).
//!
//! Example:
//! ```yaml
//! prefix: [core]
//! sources:
//!   - key: raw/events
//!     observed_version: "2024-05-01"
//! groups:
//!   - id: abc_
//!     code_version: "1"
//!     can_subset: true
//!     ins:
//!       start: {}
//!     outs:
//!       a: { deps: [start] }
//!       b: {}
//!       c: { deps: [b] }
//!     config_schema:
//!       rows: { type: int, default: 10 }
//! jobs:
//!   - name: nightly
//!     selection: ["a+", "c"]
//!     tags: { team: data }
//!     config: { abc_: { rows: 5 } }
//! ```
//!
//! Keys are `/`-joined paths or segment lists. With `prefix`, every produced
//! key (and every reference to one) is moved under the prefix; job selections
//! are written against the prefixed keys.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use assetflow_core::defs::{
    prefix_groups, AssetIn, AssetOut, ExecutableGroup, Metadata, SourceAsset, DEFAULT_GROUP_NAME,
};
use assetflow_core::error::GraphError;
use assetflow_core::graph::AssetGraph;
use assetflow_core::key::AssetKey;
use assetflow_core::partitions::PartitionsDefinition;
use assetflow_core::schema::{ConfigSchema, RunConfig};

use crate::error::DefinitionsError;
use crate::query::parse_queries;
use crate::resolve::AssetJob;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefinitionsFile {
    #[serde(default)]
    pub prefix: Vec<String>,
    #[serde(default)]
    pub sources: Vec<SourceAsset>,
    #[serde(default)]
    pub groups: Vec<GroupDef>,
    #[serde(default)]
    pub jobs: Vec<JobDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GroupDef {
    pub id: String,
    #[serde(default)]
    pub code_version: Option<String>,
    #[serde(default)]
    pub can_subset: bool,
    #[serde(default)]
    pub partitions: Option<PartitionsDefinition>,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub config_schema: ConfigSchema,
    #[serde(default)]
    pub ins: BTreeMap<String, InDef>,
    pub outs: BTreeMap<String, OutDef>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InDef {
    #[serde(default)]
    pub key: Option<AssetKey>,
    #[serde(default)]
    pub namespace: Option<Vec<String>>,
    #[serde(default)]
    pub input_manager_key: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutDef {
    /// Defaults to the output name.
    #[serde(default)]
    pub key: Option<AssetKey>,
    /// Subset of inputs/sibling outputs this output reads; all inputs when unset.
    #[serde(default)]
    pub deps: Option<BTreeSet<AssetKey>>,
    #[serde(default)]
    pub io_manager_key: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Queries, unioned. All assets when unset.
    #[serde(default)]
    pub selection: Option<Vec<String>>,
    #[serde(default)]
    pub partitions: Option<PartitionsDefinition>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub config: RunConfig,
}

/// Everything a definitions file declares, ready for `AssetGraph::build`.
#[derive(Debug, Clone, Default)]
pub struct Definitions {
    pub groups: Vec<ExecutableGroup>,
    pub sources: Vec<SourceAsset>,
    pub jobs: Vec<AssetJob>,
}

impl Definitions {
    pub fn build_graph(&self) -> Result<AssetGraph, GraphError> {
        AssetGraph::build(self.groups.clone(), self.sources.clone())
    }

    pub fn job(&self, name: &str) -> Option<&AssetJob> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

fn to_group(def: GroupDef) -> Result<ExecutableGroup, GraphError> {
    let mut group = ExecutableGroup::multi(def.id.clone());
    group.code_version = def.code_version;
    group.can_subset = def.can_subset;
    group.partitions = def.partitions;
    group.group_name = def.group_name.unwrap_or_else(|| DEFAULT_GROUP_NAME.to_string());
    group.description = def.description;
    group.config_schema = def.config_schema;

    for (name, input) in def.ins {
        let asset_in = AssetIn::try_from_parts(input.key, input.namespace).map_err(|reason| {
            GraphError::InvalidDefinition {
                group: def.id.clone(),
                reason: format!("input '{name}': {reason}"),
            }
        })?;
        let asset_in = AssetIn {
            metadata: input.metadata,
            input_manager_key: input.input_manager_key,
            ..asset_in
        };
        group.ins.insert(name, asset_in);
    }

    for (name, out) in def.outs {
        let key = out.key.unwrap_or_else(|| AssetKey::new([name.as_str()]));
        if let Some(deps) = out.deps {
            group.internal_deps.insert(name.clone(), deps);
        }
        group.outs.insert(
            name,
            AssetOut {
                key,
                metadata: out.metadata,
                io_manager_key: out.io_manager_key,
                description: out.description,
            },
        );
    }
    Ok(group)
}

fn to_job(def: JobDef) -> Result<AssetJob, DefinitionsError> {
    let mut job = AssetJob::new(def.name.clone());
    job.description = def.description;
    job.tags = def.tags;
    job.partitions = def.partitions;
    job.config = def.config;
    if let Some(queries) = def.selection {
        let selection = parse_queries(&queries).map_err(|source| DefinitionsError::Selection {
            job: def.name.clone(),
            source,
        })?;
        job.selection = Some(selection);
    }
    Ok(job)
}

/// Parse a definitions file. The graph itself is built by `Definitions::build_graph`.
pub fn parse_yaml_definitions(yaml_src: &str) -> Result<Definitions, DefinitionsError> {
    let doc: DefinitionsFile = serde_yaml::from_str(yaml_src)?;

    let groups = doc
        .groups
        .into_iter()
        .map(to_group)
        .collect::<Result<Vec<_>, _>>()?;
    let groups = if doc.prefix.is_empty() {
        groups
    } else {
        prefix_groups(groups, doc.prefix)
    };

    let mut names = BTreeSet::new();
    let mut jobs = Vec::with_capacity(doc.jobs.len());
    for def in doc.jobs {
        if !names.insert(def.name.clone()) {
            return Err(DefinitionsError::DuplicateJob(def.name));
        }
        jobs.push(to_job(def)?);
    }

    Ok(Definitions {
        groups,
        sources: doc.sources,
        jobs,
    })
}
