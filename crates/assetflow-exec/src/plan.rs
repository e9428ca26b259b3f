//! Memoized execution-plan builder.
//!
//! An input produced in this job is versioned by its producing step's token.
//! An input loaded across a boundary is versioned by the token recorded for
//! the step that last produced it, so a changed upstream run (code, config or
//! inputs) reaches every reader. Memo lookups and output checks run in
//! parallel; a failed lookup counts as a miss. The plan lists only QUEUED
//! steps for dispatch; skipped steps stay in the plan so a tracker can treat
//! them as satisfied.

use std::collections::{BTreeMap, BTreeSet};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use assetflow_core::config::PlannerConfig;
use assetflow_core::defs::{AssetOut, GroupId};
use assetflow_core::graph::AssetGraph;
use assetflow_core::key::AssetKey;
use assetflow_core::schema::ConfigValue;
use assetflow_planner::resolve::{InputBinding, ResolvedJob};

use crate::error::{MemoError, PlanError};
use crate::io::IoManagers;
use crate::memo::MemoStore;
use crate::tracker::StepState;
use crate::version::{source_token, step_token, StepIdentity, VersionToken};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepInput {
    pub name: String,
    pub key: AssetKey,
    pub binding: InputBinding,
    /// Partition to load; `None` for unpartitioned upstreams.
    pub partition: Option<String>,
    pub token: Option<VersionToken>,
}

/// One group, restricted to its selected outputs, for one partition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionStep {
    pub identity: StepIdentity,
    pub outputs: BTreeMap<String, AssetOut>,
    pub inputs: BTreeMap<AssetKey, StepInput>,
    /// Steps of this plan that produce an input.
    pub depends_on: BTreeSet<GroupId>,
    pub config: BTreeMap<String, ConfigValue>,
    pub token: Option<VersionToken>,
    pub state: StepState,
    pub is_subset: bool,
}

impl ExecutionStep {
    pub fn group(&self) -> &GroupId {
        &self.identity.group
    }

    pub fn partition(&self) -> Option<&str> {
        self.identity.partition.as_deref()
    }

    pub fn output_keys(&self) -> BTreeSet<AssetKey> {
        self.outputs.values().map(|o| o.key.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionPlan {
    pub job: String,
    pub partition: Option<String>,
    /// QUEUED steps in dependency order; ties by group id.
    pub steps: Vec<ExecutionStep>,
    /// SKIPPED steps in dependency order.
    pub skipped: Vec<ExecutionStep>,
}

impl ExecutionPlan {
    pub fn is_noop(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, group: &GroupId) -> Option<&ExecutionStep> {
        self.steps
            .iter()
            .chain(self.skipped.iter())
            .find(|s| s.group() == group)
    }

    pub fn queued_groups(&self) -> Vec<GroupId> {
        self.steps.iter().map(|s| s.group().clone()).collect()
    }

    pub fn queued_keys(&self) -> BTreeSet<AssetKey> {
        self.steps.iter().flat_map(|s| s.output_keys()).collect()
    }

    pub fn skipped_keys(&self) -> BTreeSet<AssetKey> {
        self.skipped.iter().flat_map(|s| s.output_keys()).collect()
    }
}

pub struct PlanBuilder<'a> {
    graph: &'a AssetGraph,
    memo: &'a dyn MemoStore,
    io: &'a IoManagers,
    cfg: PlannerConfig,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(graph: &'a AssetGraph, memo: &'a dyn MemoStore, io: &'a IoManagers) -> Self {
        Self { graph, memo, io, cfg: PlannerConfig::default() }
    }

    pub fn with_config(mut self, cfg: PlannerConfig) -> Self {
        self.cfg = cfg;
        self
    }

    pub fn build(&self, job: &ResolvedJob, partition: Option<&str>) -> Result<ExecutionPlan, PlanError> {
        let partition = check_partition(job, partition)?;
        self.check_io_managers(job)?;

        let loaded = self.loaded_tokens(job, partition);
        let mut produced: BTreeMap<GroupId, Option<VersionToken>> = BTreeMap::new();
        let mut steps = Vec::with_capacity(job.groups.len());

        for group in job.ordered_groups() {
            let mut inputs = BTreeMap::new();
            let mut depends_on = BTreeSet::new();

            for (key, input) in &group.inputs {
                let (token, input_partition) = match &input.binding {
                    InputBinding::FromStep { group: up } => {
                        depends_on.insert(up.clone());
                        let up_partitioned = job.groups.get(up).is_some_and(|g| g.partitions.is_some());
                        (
                            produced.get(up).copied().flatten(),
                            partition.filter(|_| up_partitioned),
                        )
                    }
                    InputBinding::Load { partitions, .. } => {
                        (loaded.get(key).copied().flatten(), partitions.as_ref().and(partition))
                    }
                    InputBinding::Source { observed_version, .. } => {
                        let source_partitioned = job
                            .sources
                            .get(key)
                            .or_else(|| self.graph.source(key))
                            .is_some_and(|s| s.partitions.is_some());
                        (
                            Some(source_token(key, observed_version.as_deref())?),
                            partition.filter(|_| source_partitioned),
                        )
                    }
                };
                inputs.insert(
                    key.clone(),
                    StepInput {
                        name: input.name.clone(),
                        key: key.clone(),
                        binding: input.binding.clone(),
                        partition: input_partition.map(str::to_string),
                        token,
                    },
                );
            }

            let step_partition = group.partitions.as_ref().and(partition);
            let input_tokens: BTreeMap<AssetKey, Option<VersionToken>> =
                inputs.iter().map(|(k, i)| (k.clone(), i.token)).collect();
            let token = step_token(
                &group.id,
                group.code_version.as_deref(),
                group.outputs.values().map(|o| &o.key),
                &input_tokens,
                &group.config,
                step_partition,
            )?;
            produced.insert(group.id.clone(), token);

            steps.push(ExecutionStep {
                identity: StepIdentity::new(group.id.clone(), step_partition),
                outputs: group.outputs.clone(),
                inputs,
                depends_on,
                config: group.config.clone(),
                token,
                state: StepState::Pending,
                is_subset: group.is_subset,
            });
        }

        let decisions = self.decide_all(&steps);
        let mut queued = Vec::new();
        let mut skipped = Vec::new();
        for (mut step, skip) in steps.into_iter().zip(decisions) {
            step.state = if skip { StepState::Skipped } else { StepState::Queued };
            debug!(
                job = %job.name,
                step = %step.identity,
                decision = ?step.state,
                token = %step.token.map(|t| t.to_string()).unwrap_or_else(|| "-".into()),
                "planned step"
            );
            if skip {
                skipped.push(step);
            } else {
                queued.push(step);
            }
        }

        debug!(job = %job.name, queued = queued.len(), skipped = skipped.len(), "built plan");
        Ok(ExecutionPlan {
            job: job.name.clone(),
            partition: partition.map(str::to_string),
            steps: queued,
            skipped,
        })
    }

    fn output_manager<'o>(&'o self, out: &'o AssetOut) -> &'o str {
        out.io_manager_key
            .as_deref()
            .unwrap_or(&self.cfg.default_io_manager_key)
    }

    fn check_io_managers(&self, job: &ResolvedJob) -> Result<(), PlanError> {
        for group in job.groups.values() {
            for out in group.outputs.values() {
                let manager = self.output_manager(out);
                if !self.io.contains(manager) {
                    return Err(PlanError::UnknownIoManager {
                        key: out.key.clone(),
                        manager: manager.to_string(),
                    });
                }
            }
            for input in group.inputs.values() {
                let manager = match &input.binding {
                    InputBinding::FromStep { .. } => continue,
                    InputBinding::Load { io_manager_key, .. }
                    | InputBinding::Source { io_manager_key, .. } => io_manager_key,
                };
                if !self.io.contains(manager) {
                    return Err(PlanError::UnknownIoManager {
                        key: input.key.clone(),
                        manager: manager.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Recorded tokens of the producers of every loaded input, keyed by the
    /// loaded asset. Unversioned or unknown producers map to `None`.
    fn loaded_tokens(
        &self,
        job: &ResolvedJob,
        partition: Option<&str>,
    ) -> BTreeMap<AssetKey, Option<VersionToken>> {
        let mut producers: BTreeMap<AssetKey, Option<StepIdentity>> = BTreeMap::new();
        for group in job.groups.values() {
            for (key, input) in &group.inputs {
                let InputBinding::Load { partitions, .. } = &input.binding else { continue };
                let identity = self
                    .graph
                    .group_of(key)
                    .filter(|g| g.code_version.is_some())
                    .map(|g| StepIdentity::new(g.id.clone(), partitions.as_ref().and(partition)));
                producers.insert(key.clone(), identity);
            }
        }

        let ids: Vec<StepIdentity> = producers
            .values()
            .flatten()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let recorded: BTreeMap<&StepIdentity, Option<VersionToken>> = ids
            .iter()
            .zip(self.fan_out(&ids, None, |id| self.read_recorded(id)))
            .collect();

        producers
            .iter()
            .map(|(key, id)| {
                let token = id.as_ref().and_then(|id| recorded.get(id).copied().flatten());
                (key.clone(), token)
            })
            .collect()
    }

    /// Skip decisions for `steps`, in order.
    fn decide_all(&self, steps: &[ExecutionStep]) -> Vec<bool> {
        self.fan_out(steps, false, |st| self.can_skip(st))
    }

    /// Maps `f` over `items` on at most `max_parallel_lookups` scoped threads,
    /// keeping order. A panicked worker yields `fallback` for its chunk.
    fn fan_out<T, R, F>(&self, items: &[T], fallback: R, f: F) -> Vec<R>
    where
        T: Sync,
        R: Send + Clone,
        F: Fn(&T) -> R + Sync,
    {
        let workers = self.cfg.max_parallel_lookups.max(1);
        let chunk = items.len().div_ceil(workers).max(1);
        let f = &f;

        thread::scope(|s| {
            let handles: Vec<_> = items
                .chunks(chunk)
                .map(|c| (c.len(), s.spawn(move || c.iter().map(f).collect::<Vec<_>>())))
                .collect();
            handles
                .into_iter()
                .flat_map(|(len, h)| h.join().unwrap_or_else(|_| vec![fallback.clone(); len]))
                .collect()
        })
    }

    /// SKIPPED iff the recorded token matches and every output is still
    /// retrievable. Anything uncertain means QUEUED.
    fn can_skip(&self, step: &ExecutionStep) -> bool {
        let Some(token) = step.token else { return false };

        match self.read_recorded(&step.identity) {
            Some(recorded) if recorded == token => {}
            _ => return false,
        }

        step.outputs.values().all(|out| {
            let manager = self.output_manager(out);
            let present = self
                .io
                .get(manager)
                .and_then(|m| m.has_output(&out.key, step.partition()));
            match present {
                Ok(p) => p,
                Err(e) => {
                    warn!(step = %step.identity, asset = %out.key, error = %e, "output check failed; recomputing");
                    false
                }
            }
        })
    }

    fn read_recorded(&self, id: &StepIdentity) -> Option<VersionToken> {
        let retries = self.cfg.memo_read_retries;
        let mut last: Option<MemoError> = None;

        for attempt in 0..=retries {
            match self.memo.get_recorded_version(id) {
                Ok(v) => return v,
                Err(e) => {
                    if attempt < retries {
                        thread::sleep(Duration::from_millis(2_u64.pow(attempt)));
                    }
                    last = Some(e);
                }
            }
        }
        if let Some(e) = last {
            warn!(step = %id, error = %e, attempts = retries + 1, "memo read failed; treating as a miss");
        }
        None
    }
}

fn check_partition<'p>(job: &ResolvedJob, partition: Option<&'p str>) -> Result<Option<&'p str>, PlanError> {
    match (&job.partitions, partition) {
        (Some(def), Some(p)) => {
            def.validate_key(p).map_err(|e| PlanError::InvalidPartitionKey {
                job: job.name.clone(),
                partition: p.to_string(),
                reason: e.to_string(),
            })?;
            Ok(Some(p))
        }
        (Some(_), None) => Err(PlanError::MissingPartitionKey { job: job.name.clone() }),
        (None, Some(p)) => Err(PlanError::UnexpectedPartitionKey {
            job: job.name.clone(),
            partition: p.to_string(),
        }),
        (None, None) => Ok(None),
    }
}

/// Build a plan with default settings.
pub fn build_plan(
    graph: &AssetGraph,
    job: &ResolvedJob,
    partition: Option<&str>,
    memo: &dyn MemoStore,
    io: &IoManagers,
) -> Result<ExecutionPlan, PlanError> {
    PlanBuilder::new(graph, memo, io).build(job, partition)
}
