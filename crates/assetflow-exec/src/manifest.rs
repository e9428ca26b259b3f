//! Plan manifest: a stable, serializable summary of an `ExecutionPlan`.

use serde::{Deserialize, Serialize};

use assetflow_core::defs::GroupId;
use assetflow_core::hash::{hash_serde, Hash256};
use assetflow_core::key::AssetKey;

use crate::error::PlanError;
use crate::plan::{ExecutionPlan, ExecutionStep};
use crate::version::VersionToken;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSummary {
    pub group: GroupId,
    pub partition: Option<String>,
    pub keys: Vec<AssetKey>,
    pub token: Option<VersionToken>,
}

impl From<&ExecutionStep> for StepSummary {
    fn from(step: &ExecutionStep) -> Self {
        Self {
            group: step.group().clone(),
            partition: step.identity.partition.clone(),
            keys: step.output_keys().into_iter().collect(),
            token: step.token,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanManifest {
    pub job: String,
    pub partition: Option<String>,
    pub queued: Vec<StepSummary>,
    pub skipped: Vec<StepSummary>,
    /// Digest over everything above; equal plans have equal hashes.
    pub plan_hash: Hash256,
}

#[derive(Serialize)]
struct HashedPart<'a> {
    job: &'a str,
    partition: Option<&'a str>,
    queued: &'a [StepSummary],
    skipped: &'a [StepSummary],
}

impl PlanManifest {
    pub fn from_plan(plan: &ExecutionPlan) -> Result<Self, PlanError> {
        let queued: Vec<StepSummary> = plan.steps.iter().map(StepSummary::from).collect();
        let skipped: Vec<StepSummary> = plan.skipped.iter().map(StepSummary::from).collect();
        let plan_hash = hash_serde(&HashedPart {
            job: &plan.job,
            partition: plan.partition.as_deref(),
            queued: &queued,
            skipped: &skipped,
        })?;
        Ok(Self {
            job: plan.job.clone(),
            partition: plan.partition.clone(),
            queued,
            skipped,
            plan_hash,
        })
    }

    pub fn to_json_pretty(&self) -> Result<String, PlanError> {
        serde_json::to_string_pretty(self).map_err(|e| PlanError::Hash(e.to_string()))
    }
}
