use thiserror::Error;

use crate::key::AssetKey;

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Hashing error: {0}")]
    Hash(String),

    #[error("Invalid partition key: {0}")]
    Partition(String),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),

    /// Error with context chain for better debugging
    #[error("Error in {context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    /// Add context to an error, creating an error chain.
    ///
    /// # Example
    /// ```rust,no_run
    /// use assetflow_core::error::Error;
    /// let err = Error::Config("max_parallel_lookups must be at least 1".into());
    /// let err = err.with_context("while reading ASSETFLOW_* variables");
    /// ```
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self) as Box<dyn std::error::Error + Send + Sync>,
        }
    }

    /// Get suggestions for common errors.
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            Error::Graph(g) => g.suggestions(),
            Error::Config(msg) => {
                if msg.contains("parallel") || msg.contains("retries") {
                    vec!["Check the ASSETFLOW_* environment variables".into(),
                         "Numeric settings must be positive integers".into()]
                } else {
                    vec![]
                }
            }
            Error::Partition(_) => vec![
                "Time-window partition keys use the cadence format, e.g. 2020-01-01 for daily".into(),
                "Static partition keys must be listed in the definition".into(),
            ],
            _ => vec![],
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}

/// Failures while building an `AssetGraph` from definitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("duplicate asset key {key}: defined by both {first} and {second}")]
    DuplicateKey {
        key: AssetKey,
        first: String,
        second: String,
    },

    #[error("incompatible partitions reach asset {key}: {defs:?}")]
    IncompatiblePartitions { key: AssetKey, defs: Vec<String> },

    #[error("dependency cycle detected through {}", fmt_keys(.path))]
    Cycle { path: Vec<AssetKey> },

    #[error("dependency cycle between executable groups {}", .groups.join(" -> "))]
    GroupCycle { groups: Vec<String> },

    #[error("invalid definition for group '{group}': {reason}")]
    InvalidDefinition { group: String, reason: String },
}

impl GraphError {
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            GraphError::DuplicateKey { .. } => vec![
                "Every asset key must be produced by exactly one group or declared once as a source".into(),
                "Use a key prefix to separate assets with the same name".into(),
            ],
            GraphError::IncompatiblePartitions { .. } => vec![
                "Give the downstream asset its own partitions definition".into(),
                "Split unpartitioned assets that read from differently partitioned parents".into(),
            ],
            GraphError::Cycle { .. } | GraphError::GroupCycle { .. } => {
                vec!["Remove one dependency edge along the reported path".into()]
            }
            GraphError::InvalidDefinition { reason, .. } => {
                if reason.contains("namespace") {
                    vec!["Set either `key` or `namespace` on an input, not both".into()]
                } else {
                    vec![]
                }
            }
        }
    }
}

pub(crate) fn fmt_keys(keys: &[AssetKey]) -> String {
    keys.iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}
