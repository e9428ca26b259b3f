use thiserror::Error;

use assetflow_core::error::GraphError;
use assetflow_core::key::AssetKey;

fn fmt_keys(keys: &[AssetKey]) -> String {
    let inner = keys.iter().map(|k| k.to_string()).collect::<Vec<_>>().join(", ");
    format!("[{inner}]")
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("malformed query '{query}': {reason}")]
    MalformedQuery { query: String, reason: String },

    #[error("asset key(s) {} were selected, but no such assets were found", fmt_keys(.keys))]
    UnknownKeys { keys: Vec<AssetKey> },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error("job '{job}' selects no assets")]
    EmptySelection { job: String },

    #[error(
        "group '{group}' contains asset keys {}, but attempted to select only {}; missing {}",
        fmt_keys(.outputs), fmt_keys(.selected), fmt_keys(.missing)
    )]
    PartialSubsetNotAllowed {
        group: String,
        outputs: Vec<AssetKey>,
        selected: Vec<AssetKey>,
        missing: Vec<AssetKey>,
    },

    #[error(
        "asset {key} depends on {}, which are neither produced in the graph nor declared as sources",
        fmt_keys(.missing)
    )]
    MissingUpstream { key: AssetKey, missing: Vec<AssetKey> },

    #[error(
        "selected assets have conflicting partitions definitions: {}{}",
        .assets.iter().map(|(k, d)| format!("{k}: {d}")).collect::<Vec<_>>().join("; "),
        .job_partitions.as_ref().map(|d| format!("; job: {d}")).unwrap_or_default()
    )]
    ConflictingPartitions {
        assets: Vec<(AssetKey, String)>,
        /// The job's own definition, when it was set and disagrees.
        job_partitions: Option<String>,
    },

    #[error("source asset {key} collides with an asset produced by group '{group}'")]
    DuplicateKey { key: AssetKey, group: String },

    #[error("invalid config for group '{group}', field '{field}': {reason}")]
    InvalidConfig {
        group: String,
        field: String,
        reason: String,
    },
}

impl ResolutionError {
    /// Keys the error is about, for callers that want to highlight them.
    pub fn offending_keys(&self) -> Vec<AssetKey> {
        match self {
            ResolutionError::Selection(SelectionError::UnknownKeys { keys }) => keys.clone(),
            ResolutionError::PartialSubsetNotAllowed { missing, .. } => missing.clone(),
            ResolutionError::MissingUpstream { key, missing } => {
                let mut keys = vec![key.clone()];
                keys.extend(missing.iter().cloned());
                keys
            }
            ResolutionError::ConflictingPartitions { assets, .. } => {
                assets.iter().map(|(k, _)| k.clone()).collect()
            }
            ResolutionError::DuplicateKey { key, .. } => vec![key.clone()],
            _ => vec![],
        }
    }

    /// Get suggestions for common errors.
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            ResolutionError::Selection(SelectionError::MalformedQuery { .. }) => vec![
                "Queries look like `name`, `+name`, `name+`, `*name`, `a/b/c` or `*`".into(),
            ],
            ResolutionError::Selection(SelectionError::UnknownKeys { .. }) => vec![
                "Check the key spelling and any key prefix (`core/models/a`)".into(),
            ],
            ResolutionError::EmptySelection { .. } => vec![
                "Widen the selection or set allow_empty_selection".into(),
            ],
            ResolutionError::PartialSubsetNotAllowed { .. } => vec![
                "Select every output of the group".into(),
                "Or mark the group as subsettable if it can produce a strict subset".into(),
            ],
            ResolutionError::MissingUpstream { .. } => vec![
                "Declare the missing keys as source assets".into(),
                "Or add the groups that produce them to the definitions".into(),
            ],
            ResolutionError::ConflictingPartitions { .. } => vec![
                "Split the selection into one job per partitions definition".into(),
            ],
            ResolutionError::InvalidConfig { .. } => vec![
                "Compare the run config against the group's config schema".into(),
            ],
            ResolutionError::DuplicateKey { .. } => vec![
                "Drop the source declaration; the asset is already produced in the graph".into(),
            ],
        }
    }
}

/// Failures while loading a definitions file.
#[derive(Debug, Error)]
pub enum DefinitionsError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("job '{job}': {source}")]
    Selection {
        job: String,
        #[source]
        source: SelectionError,
    },

    #[error("job '{0}' is defined twice")]
    DuplicateJob(String),
}

impl DefinitionsError {
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            DefinitionsError::Yaml(_) => vec![
                "Top-level keys are `prefix`, `sources`, `groups` and `jobs`".into(),
                "Unknown fields are rejected; check for typos".into(),
            ],
            DefinitionsError::Graph(g) => g.suggestions(),
            DefinitionsError::Selection { source, .. } => {
                ResolutionError::Selection(source.clone()).suggestions()
            }
            DefinitionsError::DuplicateJob(_) => vec!["Rename one of the jobs".into()],
        }
    }
}
