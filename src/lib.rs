//! assetflow: declare assets, select a subgraph, resolve it, and plan a run.
//!
//! This package re-exports the workspace crates; the integration tests in
//! `tests/` are written against it.

pub use assetflow_core as core;
pub use assetflow_exec as exec;
pub use assetflow_planner as planner;
