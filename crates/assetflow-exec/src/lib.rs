#![forbid(unsafe_code)]
//! assetflow-exec: from a `ResolvedJob` to the steps that must run.
//!
//! - `version`: version tokens for steps and source assets.
//! - `memo`: the memo store interface (in-memory and filesystem impls).
//! - `io`: the I/O manager interface and registry.
//! - `plan`: the memoized plan builder.
//! - `tracker`: drives step states while an external engine runs the plan.
//! - `manifest`: a stable summary of a plan.
//!
//! Nothing here runs user computations.

pub mod error;
pub mod io;
pub mod manifest;
pub mod memo;
pub mod plan;
pub mod tracker;
pub mod version;

pub use error::{IoError, MemoError, PlanError, TrackerError};
pub use io::{FsIoManager, InMemoryIoManager, IoManager, IoManagers};
pub use manifest::PlanManifest;
pub use memo::{FsMemoStore, InMemoryMemoStore, MemoStore};
pub use plan::{build_plan, ExecutionPlan, ExecutionStep, PlanBuilder, StepInput};
pub use tracker::{RunTracker, StepState};
pub use version::{StepIdentity, VersionToken};
