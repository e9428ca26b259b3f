//! Subset resolution: (graph, selection, sources) → `ResolvedJob`.
//!
//! Resolution is pure. It reads the graph and the job description, performs no
//! I/O, and returns an owned value; resolving the same inputs twice yields
//! equal jobs.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use assetflow_core::config::PlannerConfig;
use assetflow_core::defs::{AssetOut, ExecutableGroup, GroupId, Metadata, SourceAsset};
use assetflow_core::graph::AssetGraph;
use assetflow_core::key::AssetKey;
use assetflow_core::partitions::PartitionsDefinition;
use assetflow_core::schema::{apply_schema, ConfigValue, RunConfig};

use crate::error::ResolutionError;
use crate::selection::AssetSelection;

const ANONYMOUS_JOB: &str = "__anonymous_asset_job__";

/// A named, reusable job description. Nothing is checked until `resolve`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetJob {
    pub name: String,
    pub description: Option<String>,
    pub tags: BTreeMap<String, String>,
    /// `None` selects every materializable asset.
    pub selection: Option<AssetSelection>,
    /// Partitions the job runs over; must match every partitioned asset it selects.
    pub partitions: Option<PartitionsDefinition>,
    pub config: RunConfig,
}

impl AssetJob {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            tags: BTreeMap::new(),
            selection: None,
            partitions: None,
            config: RunConfig::new(),
        }
    }

    pub fn with_selection(mut self, selection: AssetSelection) -> Self {
        self.selection = Some(selection);
        self
    }

    pub fn with_partitions(mut self, partitions: PartitionsDefinition) -> Self {
        self.partitions = Some(partitions);
        self
    }

    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn resolve(
        &self,
        graph: &AssetGraph,
        sources: &[SourceAsset],
    ) -> Result<ResolvedJob, ResolutionError> {
        self.resolve_with(graph, sources, &PlannerConfig::default())
    }

    pub fn resolve_with(
        &self,
        graph: &AssetGraph,
        sources: &[SourceAsset],
        cfg: &PlannerConfig,
    ) -> Result<ResolvedJob, ResolutionError> {
        Resolver { graph, job: self, cfg }.run(sources)
    }
}

/// Resolve `selection` (all assets when `None`) into an anonymous job.
pub fn resolve(
    graph: &AssetGraph,
    selection: Option<&AssetSelection>,
    sources: &[SourceAsset],
) -> Result<ResolvedJob, ResolutionError> {
    let mut job = AssetJob::new(ANONYMOUS_JOB);
    job.selection = selection.cloned();
    job.resolve(graph, sources)
}

/// Where a step input comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputBinding {
    /// Produced by another step of the same job.
    FromStep { group: GroupId },
    /// Materialized outside this job; loaded through an I/O manager.
    Load {
        io_manager_key: String,
        partitions: Option<PartitionsDefinition>,
    },
    /// A declared source asset.
    Source {
        io_manager_key: String,
        observed_version: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedInput {
    /// Declared input name, or the key path for a sibling output.
    pub name: String,
    pub key: AssetKey,
    pub binding: InputBinding,
    pub metadata: Metadata,
}

/// One group restricted to the selected outputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedGroup {
    pub id: GroupId,
    pub outputs: BTreeMap<String, AssetOut>,
    /// Upstream key → binding. Selected sibling outputs of the same group are
    /// computed in-process and do not appear here.
    pub inputs: BTreeMap<AssetKey, ResolvedInput>,
    pub code_version: Option<String>,
    pub partitions: Option<PartitionsDefinition>,
    /// Effective run config: supplied values plus schema defaults.
    pub config: BTreeMap<String, ConfigValue>,
    /// True when only some of the group's outputs are selected.
    pub is_subset: bool,
}

impl ResolvedGroup {
    pub fn output_keys(&self) -> BTreeSet<AssetKey> {
        self.outputs.values().map(|o| o.key.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedJob {
    pub name: String,
    pub description: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub keys: BTreeSet<AssetKey>,
    pub groups: BTreeMap<GroupId, ResolvedGroup>,
    /// Group ids in dependency order; ties by id.
    pub group_order: Vec<GroupId>,
    /// Sources read by some selected asset.
    pub sources: BTreeMap<AssetKey, SourceAsset>,
    pub partitions: Option<PartitionsDefinition>,
}

impl ResolvedJob {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn group_of(&self, key: &AssetKey) -> Option<&ResolvedGroup> {
        self.groups
            .values()
            .find(|g| g.outputs.values().any(|o| o.key == *key))
    }

    /// Groups in dependency order.
    pub fn ordered_groups(&self) -> impl Iterator<Item = &ResolvedGroup> {
        self.group_order.iter().filter_map(|id| self.groups.get(id))
    }
}

struct Resolver<'a> {
    graph: &'a AssetGraph,
    job: &'a AssetJob,
    cfg: &'a PlannerConfig,
}

impl<'a> Resolver<'a> {
    fn run(&self, extra_sources: &[SourceAsset]) -> Result<ResolvedJob, ResolutionError> {
        let keys = match &self.job.selection {
            Some(sel) => sel.resolve(self.graph)?,
            None => self.graph.materializable_keys(),
        };
        if keys.is_empty() && !self.cfg.allow_empty_selection {
            return Err(ResolutionError::EmptySelection { job: self.job.name.clone() });
        }

        let sources = self.collect_sources(extra_sources)?;
        let touched = self.check_subsets(&keys)?;
        self.check_upstream(&keys, &sources)?;
        let partitions = self.check_partitions(&keys)?;
        self.check_config_targets(&touched)?;

        let mut groups = BTreeMap::new();
        let mut used_sources = BTreeMap::new();
        for id in &touched {
            let Some(group) = self.graph.group(id) else { continue };
            let resolved = self.build_group(group, &keys, &sources, &mut used_sources)?;
            groups.insert(id.clone(), resolved);
        }
        let group_order: Vec<GroupId> = self
            .graph
            .group_order()
            .iter()
            .filter(|id| groups.contains_key(*id))
            .cloned()
            .collect();

        debug!(
            job = %self.job.name,
            groups = groups.len(),
            keys = keys.len(),
            sources = used_sources.len(),
            "resolved job"
        );

        Ok(ResolvedJob {
            name: self.job.name.clone(),
            description: self.job.description.clone(),
            tags: self.job.tags.clone(),
            keys,
            groups,
            group_order,
            sources: used_sources,
            partitions,
        })
    }

    /// Graph sources plus the ones passed in; a passed source may refine a
    /// graph source but must not shadow a produced asset.
    fn collect_sources(
        &self,
        extra: &[SourceAsset],
    ) -> Result<BTreeMap<AssetKey, SourceAsset>, ResolutionError> {
        let mut sources: BTreeMap<AssetKey, SourceAsset> = self
            .graph
            .sources()
            .map(|s| (s.key.clone(), s.clone()))
            .collect();
        for source in extra {
            if let Some(group) = self.graph.group_of(&source.key) {
                return Err(ResolutionError::DuplicateKey {
                    key: source.key.clone(),
                    group: group.id.to_string(),
                });
            }
            sources.insert(source.key.clone(), source.clone());
        }
        Ok(sources)
    }

    /// Groups with a selected output; non-subsettable ones must be whole.
    fn check_subsets(&self, keys: &BTreeSet<AssetKey>) -> Result<BTreeSet<GroupId>, ResolutionError> {
        let mut touched = BTreeSet::new();
        for key in keys {
            if let Some(group) = self.graph.group_of(key) {
                touched.insert(group.id.clone());
            }
        }

        for id in &touched {
            let Some(group) = self.graph.group(id) else { continue };
            if group.can_subset {
                continue;
            }
            let outputs = group.output_keys();
            let missing: Vec<AssetKey> = outputs.difference(keys).cloned().collect();
            if !missing.is_empty() {
                return Err(ResolutionError::PartialSubsetNotAllowed {
                    group: id.to_string(),
                    selected: outputs.intersection(keys).cloned().collect(),
                    outputs: outputs.into_iter().collect(),
                    missing,
                });
            }
        }
        Ok(touched)
    }

    fn check_upstream(
        &self,
        keys: &BTreeSet<AssetKey>,
        sources: &BTreeMap<AssetKey, SourceAsset>,
    ) -> Result<(), ResolutionError> {
        for key in keys {
            let Some(node) = self.graph.node(key) else { continue };
            let missing: Vec<AssetKey> = node
                .upstream
                .iter()
                .filter(|up| {
                    !keys.contains(*up)
                        && self.graph.group_of(up).is_none()
                        && !sources.contains_key(*up)
                })
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(ResolutionError::MissingUpstream { key: key.clone(), missing });
            }
        }
        Ok(())
    }

    /// At most one distinct definition among the selected assets, and it must
    /// agree with the job's own definition when one is set.
    fn check_partitions(
        &self,
        keys: &BTreeSet<AssetKey>,
    ) -> Result<Option<PartitionsDefinition>, ResolutionError> {
        let partitioned: Vec<(AssetKey, &PartitionsDefinition)> = keys
            .iter()
            .filter_map(|k| {
                self.graph
                    .node(k)
                    .and_then(|n| n.partitions.as_ref())
                    .map(|def| (k.clone(), def))
            })
            .collect();

        let mut distinct: Vec<&PartitionsDefinition> = Vec::new();
        for (_, def) in &partitioned {
            if !distinct.contains(def) {
                distinct.push(def);
            }
        }

        let conflict = |job_partitions: Option<String>| ResolutionError::ConflictingPartitions {
            assets: partitioned
                .iter()
                .map(|(k, def)| (k.clone(), def.to_string()))
                .collect(),
            job_partitions,
        };

        match (&self.job.partitions, distinct.as_slice()) {
            (_, [_, _, ..]) => Err(conflict(None)),
            (Some(job_def), [asset_def]) if job_def != *asset_def => {
                Err(conflict(Some(job_def.to_string())))
            }
            (Some(job_def), _) => Ok(Some(job_def.clone())),
            (None, [asset_def]) => Ok(Some((*asset_def).clone())),
            (None, []) => Ok(None),
        }
    }

    fn check_config_targets(&self, touched: &BTreeSet<GroupId>) -> Result<(), ResolutionError> {
        for group in self.job.config.keys() {
            if !touched.contains(&GroupId::new(group.as_str())) {
                return Err(ResolutionError::InvalidConfig {
                    group: group.clone(),
                    field: "*".into(),
                    reason: "group is not part of this job".into(),
                });
            }
        }
        Ok(())
    }

    fn build_group(
        &self,
        group: &ExecutableGroup,
        keys: &BTreeSet<AssetKey>,
        sources: &BTreeMap<AssetKey, SourceAsset>,
        used_sources: &mut BTreeMap<AssetKey, SourceAsset>,
    ) -> Result<ResolvedGroup, ResolutionError> {
        let id = &group.id;

        let outputs: BTreeMap<String, AssetOut> = group
            .outs
            .iter()
            .filter(|(_, out)| keys.contains(&out.key))
            .map(|(name, out)| {
                let mut out = out.clone();
                if out.io_manager_key.is_none() {
                    out.io_manager_key = Some(self.cfg.default_io_manager_key.clone());
                }
                (name.clone(), out)
            })
            .collect();
        let own_selected: BTreeSet<AssetKey> = outputs.values().map(|o| o.key.clone()).collect();

        let mut inputs = BTreeMap::new();
        for out_name in outputs.keys() {
            for dep in group.deps_of(out_name) {
                if own_selected.contains(&dep) || inputs.contains_key(&dep) {
                    continue;
                }
                let (name, metadata, override_key) = match group.input_for(&dep) {
                    Some((name, input)) => (
                        name.to_string(),
                        input.metadata.clone(),
                        input.input_manager_key.clone(),
                    ),
                    None => (dep.to_path(), Metadata::new(), None),
                };
                let binding = self.bind(&dep, keys, sources, override_key, used_sources);
                inputs.insert(dep.clone(), ResolvedInput { name, key: dep, binding, metadata });
            }
        }

        let config = apply_schema(&group.config_schema, self.job.config.get(id.as_str()))
            .map_err(|v| ResolutionError::InvalidConfig {
                group: id.to_string(),
                field: v.field,
                reason: v.reason,
            })?;

        Ok(ResolvedGroup {
            id: id.clone(),
            is_subset: outputs.len() < group.outs.len(),
            outputs,
            inputs,
            code_version: group.code_version.clone(),
            partitions: group.partitions.clone(),
            config,
        })
    }

    /// Classify one dependency. `check_upstream` has already ruled out keys
    /// that are neither produced nor sourced.
    fn bind(
        &self,
        dep: &AssetKey,
        keys: &BTreeSet<AssetKey>,
        sources: &BTreeMap<AssetKey, SourceAsset>,
        override_key: Option<String>,
        used_sources: &mut BTreeMap<AssetKey, SourceAsset>,
    ) -> InputBinding {
        if keys.contains(dep) {
            if let Some(up) = self.graph.group_of(dep) {
                return InputBinding::FromStep { group: up.id.clone() };
            }
        }
        if let Some(node) = self.graph.node(dep).filter(|n| !n.is_source()) {
            return InputBinding::Load {
                io_manager_key: override_key
                    .or_else(|| node.io_manager_key.clone())
                    .unwrap_or_else(|| self.cfg.default_io_manager_key.clone()),
                partitions: node.partitions.clone(),
            };
        }
        let source = sources.get(dep);
        if let Some(source) = source {
            used_sources.insert(dep.clone(), source.clone());
        }
        InputBinding::Source {
            io_manager_key: override_key
                .or_else(|| source.and_then(|s| s.io_manager_key.clone()))
                .unwrap_or_else(|| self.cfg.default_io_manager_key.clone()),
            observed_version: source.and_then(|s| s.observed_version.clone()),
        }
    }
}
