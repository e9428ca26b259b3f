#![forbid(unsafe_code)]
//! assetflow-core: shared kernel for assetflow.
//!
//! This crate contains only *pure* types: asset keys, group/source
//! definitions, partitions definitions, the typed config schema, the
//! immutable `AssetGraph`, and hashing helpers. There is **no I/O**, **no
//! threads**, and **no logging** here.
//!
//! Crates that use this:
//! - assetflow-planner: evaluates selections over `AssetGraph` and resolves jobs.
//! - assetflow-exec: computes version tokens and builds memoized plans.
//! - assetflow-cli: loads definitions and prints plans.

pub mod config;
pub mod defs;
pub mod error;
pub mod graph;
pub mod hash;
pub mod key;
pub mod partitions;
pub mod prelude;
pub mod schema;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
