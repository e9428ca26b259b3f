#![forbid(unsafe_code)]
//! assetflow-planner: from definitions and a selection to a `ResolvedJob`.
//!
//! Design:
//! - `selection`: the `AssetSelection` expression tree and its single evaluator.
//! - `query`: the string grammar (`*`, `+`, `/`), a second front end that
//!   builds the same tree.
//! - `resolve`: the subset resolver producing `ResolvedJob`.
//! - `dsl::yaml`: definitions files → groups + sources.
//!
//! NOTE: Nothing here performs I/O besides reading the YAML text handed in.

pub mod dsl;
pub mod error;
pub mod query;
pub mod resolve;
pub mod selection;

pub use dsl::yaml::{parse_yaml_definitions, Definitions};
pub use error::{DefinitionsError, ResolutionError, SelectionError};
pub use query::{parse_queries, parse_query};
pub use resolve::{
    resolve, AssetJob, InputBinding, ResolvedGroup, ResolvedInput, ResolvedJob,
};
pub use selection::AssetSelection;
