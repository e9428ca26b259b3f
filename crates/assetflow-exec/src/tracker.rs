//! Step state machine for one run of a plan.
//!
//! ```text
//! PENDING -> SKIPPED
//!         -> QUEUED -> RUNNING -> SUCCEEDED
//!                              -> FAILED
//!                   -> ABANDONED
//! ```
//!
//! The tracker does not execute anything. An external engine asks for
//! `ready()` steps, reports transitions, and uses `unfinished()` to retry only
//! what never completed. A FAILED or ABANDONED step blocks its strict
//! downstream; sibling branches keep going.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use assetflow_core::defs::GroupId;
use assetflow_core::key::AssetKey;

use crate::error::TrackerError;
use crate::memo::MemoStore;
use crate::plan::{ExecutionPlan, ExecutionStep};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepState {
    Pending,
    Skipped,
    Queued,
    Running,
    Succeeded,
    Failed,
    Abandoned,
}

impl StepState {
    /// Downstream steps may start once an upstream is in one of these states.
    pub fn satisfies_downstream(self) -> bool {
        matches!(self, StepState::Succeeded | StepState::Skipped)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepState::Skipped | StepState::Succeeded | StepState::Failed | StepState::Abandoned
        )
    }
}

pub struct RunTracker<'a> {
    plan: &'a ExecutionPlan,
    memo: &'a dyn MemoStore,
    states: BTreeMap<GroupId, StepState>,
}

impl<'a> RunTracker<'a> {
    pub fn new(plan: &'a ExecutionPlan, memo: &'a dyn MemoStore) -> Self {
        let states = plan
            .skipped
            .iter()
            .map(|s| (s.group().clone(), StepState::Skipped))
            .chain(plan.steps.iter().map(|s| (s.group().clone(), StepState::Queued)))
            .collect();
        Self { plan, memo, states }
    }

    pub fn state(&self, group: &GroupId) -> Option<StepState> {
        self.states.get(group).copied()
    }

    fn step(&self, group: &GroupId) -> Result<&'a ExecutionStep, TrackerError> {
        let plan = self.plan;
        plan.step(group).ok_or_else(|| TrackerError::UnknownStep(group.clone()))
    }

    /// Upstream steps of `step` that have not (yet) satisfied it.
    fn waiting_on(&self, step: &ExecutionStep) -> Vec<GroupId> {
        step.depends_on
            .iter()
            .filter(|up| !self.state(up).map_or(true, StepState::satisfies_downstream))
            .cloned()
            .collect()
    }

    /// QUEUED steps whose upstream steps all succeeded or were skipped, in plan order.
    pub fn ready(&self) -> Vec<&'a ExecutionStep> {
        let plan = self.plan;
        plan.steps
            .iter()
            .filter(|s| self.state(s.group()) == Some(StepState::Queued))
            .filter(|s| self.waiting_on(s).is_empty())
            .collect()
    }

    fn transition(&mut self, group: &GroupId, from: StepState, to: StepState) -> Result<(), TrackerError> {
        let current = self
            .state(group)
            .ok_or_else(|| TrackerError::UnknownStep(group.clone()))?;
        if current != from {
            return Err(TrackerError::InvalidTransition { step: group.clone(), from: current, to });
        }
        self.states.insert(group.clone(), to);
        debug!(step = %group, from = ?from, to = ?to, "step transition");
        Ok(())
    }

    pub fn start(&mut self, group: &GroupId) -> Result<(), TrackerError> {
        let step = self.step(group)?;
        if self.state(group) == Some(StepState::Queued) {
            let waiting_on = self.waiting_on(step);
            if !waiting_on.is_empty() {
                return Err(TrackerError::NotReady { step: group.clone(), waiting_on });
            }
        }
        self.transition(group, StepState::Queued, StepState::Running)
    }

    /// Mark a running step SUCCEEDED and record its token. A memo write
    /// failure is logged; the step still counts as succeeded.
    pub fn succeed(&mut self, group: &GroupId) -> Result<(), TrackerError> {
        let step = self.step(group)?;
        self.transition(group, StepState::Running, StepState::Succeeded)?;
        if let Some(token) = step.token {
            if let Err(e) = self.memo.record_version(&step.identity, token) {
                warn!(step = %step.identity, error = %e, "failed to record version token");
            }
        }
        Ok(())
    }

    pub fn fail(&mut self, group: &GroupId) -> Result<(), TrackerError> {
        self.step(group)?;
        self.transition(group, StepState::Running, StepState::Failed)
    }

    /// Drop a QUEUED step before dispatch.
    pub fn abandon(&mut self, group: &GroupId) -> Result<(), TrackerError> {
        self.step(group)?;
        self.transition(group, StepState::Queued, StepState::Abandoned)
    }

    /// QUEUED steps that can never start because an upstream step failed or
    /// was abandoned, directly or transitively.
    pub fn blocked(&self) -> Vec<GroupId> {
        let mut dead: BTreeSet<GroupId> = self
            .states
            .iter()
            .filter(|(_, s)| matches!(s, StepState::Failed | StepState::Abandoned))
            .map(|(g, _)| g.clone())
            .collect();
        let mut blocked = Vec::new();
        // Plan order is topological, so one pass propagates transitively.
        for step in &self.plan.steps {
            let group = step.group();
            if self.state(group) == Some(StepState::Queued) && step.depends_on.iter().any(|up| dead.contains(up)) {
                dead.insert(group.clone());
                blocked.push(group.clone());
            }
        }
        blocked
    }

    /// Steps that did not complete, in plan order.
    pub fn unfinished(&self) -> Vec<GroupId> {
        self.plan
            .steps
            .iter()
            .map(|s| s.group())
            .filter(|g| !self.state(g).is_some_and(StepState::satisfies_downstream))
            .cloned()
            .collect()
    }

    /// Asset keys of the unfinished steps, for re-selecting just those.
    pub fn unfinished_keys(&self) -> BTreeSet<AssetKey> {
        let unfinished: BTreeSet<GroupId> = self.unfinished().into_iter().collect();
        self.plan
            .steps
            .iter()
            .filter(|s| unfinished.contains(s.group()))
            .flat_map(|s| s.output_keys())
            .collect()
    }

    /// Nothing is running and nothing more can start.
    pub fn is_finished(&self) -> bool {
        !self.states.values().any(|s| *s == StepState::Running) && self.ready().is_empty()
    }
}
