//! Engine knobs shared by the planner and plan builder.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_IO_MANAGER_KEY: &str = "io_manager";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Upper bound on concurrent memo-store reads while building a plan.
    pub max_parallel_lookups: usize,
    /// Extra attempts for a memo read that returned an error.
    pub memo_read_retries: u32,
    /// I/O manager used by outputs that do not name one.
    pub default_io_manager_key: String,
    /// Resolve an empty selection to an empty job instead of failing.
    pub allow_empty_selection: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_parallel_lookups: 4,
            memo_read_retries: 1,
            default_io_manager_key: DEFAULT_IO_MANAGER_KEY.to_string(),
            allow_empty_selection: false,
        }
    }
}

impl PlannerConfig {
    /// Defaults overridden by `ASSETFLOW_*` environment variables.
    ///
    /// Unparseable values are reported rather than silently ignored.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(v) = lookup("ASSETFLOW_MAX_PARALLEL_LOOKUPS") {
            cfg.max_parallel_lookups = v.trim().parse().map_err(|_| {
                Error::Config(format!("ASSETFLOW_MAX_PARALLEL_LOOKUPS: '{v}' is not a number"))
            })?;
        }
        if let Some(v) = lookup("ASSETFLOW_MEMO_READ_RETRIES") {
            cfg.memo_read_retries = v.trim().parse().map_err(|_| {
                Error::Config(format!("ASSETFLOW_MEMO_READ_RETRIES: '{v}' is not a number"))
            })?;
        }
        if let Some(v) = lookup("ASSETFLOW_IO_MANAGER") {
            cfg.default_io_manager_key = v.trim().to_string();
        }
        if let Some(v) = lookup("ASSETFLOW_ALLOW_EMPTY_SELECTION") {
            cfg.allow_empty_selection = match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                other => {
                    return Err(Error::Config(format!(
                        "ASSETFLOW_ALLOW_EMPTY_SELECTION: '{other}' is not a boolean"
                    )))
                }
            };
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_parallel_lookups == 0 {
            return Err(Error::Config("max_parallel_lookups must be at least 1".into()));
        }
        if self.memo_read_retries > 16 {
            return Err(Error::Config(format!(
                "memo_read_retries {} is too large (max 16)",
                self.memo_read_retries
            )));
        }
        if self.default_io_manager_key.is_empty() {
            return Err(Error::Config("default_io_manager_key must not be empty".into()));
        }
        Ok(())
    }
}
