//! Convenience re-exports for downstream crates.

pub use crate::config::PlannerConfig;
pub use crate::defs::{
    prefix_groups, AssetIn, AssetOut, ExecutableGroup, GroupId, InputKey, SourceAsset,
};
pub use crate::error::{Error, GraphError, Result};
pub use crate::graph::{AssetGraph, AssetNode};
pub use crate::hash::{hash_serde, Hash256};
pub use crate::key::AssetKey;
pub use crate::partitions::{Cadence, PartitionsDefinition};
pub use crate::schema::{ConfigField, ConfigSchema, ConfigType, ConfigValue, RunConfig};
