use thiserror::Error;

use assetflow_core::defs::GroupId;
use assetflow_core::key::AssetKey;

use crate::tracker::StepState;

/// Memo store failures. The plan builder treats every one of these as a miss.
#[derive(Debug, Error)]
pub enum MemoError {
    #[error("memo store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("memo record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("memo store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum IoError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no stored output for asset {key}{}", .partition.as_ref().map(|p| format!(" partition '{p}'")).unwrap_or_default())]
    NotFound { key: AssetKey, partition: Option<String> },

    #[error("no I/O manager registered under '{0}'")]
    UnknownManager(String),

    #[error("I/O manager error: {0}")]
    Other(String),
}

impl IoError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        let ctx = context.into();
        match self {
            IoError::Other(msg) => IoError::Other(format!("{ctx}: {msg}")),
            IoError::Io(e) => IoError::Other(format!("{ctx}: {e}")),
            other => other,
        }
    }
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("job '{job}' is partitioned; a partition key is required")]
    MissingPartitionKey { job: String },

    #[error("job '{job}' is not partitioned, but partition key '{partition}' was given")]
    UnexpectedPartitionKey { job: String, partition: String },

    #[error("invalid partition key '{partition}' for job '{job}': {reason}")]
    InvalidPartitionKey {
        job: String,
        partition: String,
        reason: String,
    },

    #[error("hashing error: {0}")]
    Hash(String),

    #[error("asset {key} uses I/O manager '{manager}', which is not registered")]
    UnknownIoManager { key: AssetKey, manager: String },
}

impl From<assetflow_core::error::Error> for PlanError {
    fn from(e: assetflow_core::error::Error) -> Self {
        PlanError::Hash(e.to_string())
    }
}

impl PlanError {
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            PlanError::MissingPartitionKey { .. } => {
                vec!["Pass --partition with a key from the job's partitions definition".into()]
            }
            PlanError::UnexpectedPartitionKey { .. } => {
                vec!["Drop the partition key; the selected assets are unpartitioned".into()]
            }
            PlanError::InvalidPartitionKey { .. } => vec![
                "Time-window keys use the cadence format, e.g. 2020-01-01 (daily) or 2020-01-01-00:00 (hourly)".into(),
                "Keys must not precede the definition's start".into(),
            ],
            PlanError::UnknownIoManager { manager, .. } => {
                vec![format!("Register an I/O manager under '{manager}' before building the plan")]
            }
            PlanError::Hash(_) => vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error("no step '{0}' in this plan")]
    UnknownStep(GroupId),

    #[error("step '{step}' cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        step: GroupId,
        from: StepState,
        to: StepState,
    },

    #[error("step '{step}' is waiting on {}", .waiting_on.iter().map(|g| g.to_string()).collect::<Vec<_>>().join(", "))]
    NotReady {
        step: GroupId,
        waiting_on: Vec<GroupId>,
    },
}
