//! Version tokens.
//!
//! A step token hashes the group's code version, the selected outputs, the
//! tokens of every direct input, the effective run config and the partition.
//! Identical inputs give identical tokens. A group without a code version has
//! no token, and neither does anything downstream of it: such steps always run.
//!
//! An input produced in the same job contributes its step's token, whether
//! that step is queued or skipped. A loaded input contributes the token last
//! recorded for the step that produced it, so the stored value is what gets
//! versioned. Source assets hash their observed version.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use assetflow_core::defs::GroupId;
use assetflow_core::hash::{hash_serde, Hash256};
use assetflow_core::key::AssetKey;
use assetflow_core::schema::ConfigValue;

use crate::error::PlanError;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(pub Hash256);

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.short())
    }
}

impl fmt::Debug for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VersionToken({})", self.0.short())
    }
}

/// Memo-store key: one group for one partition (or the whole asset).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepIdentity {
    pub group: GroupId,
    pub partition: Option<String>,
}

impl StepIdentity {
    pub fn new(group: GroupId, partition: Option<&str>) -> Self {
        Self { group, partition: partition.map(str::to_string) }
    }
}

impl fmt::Display for StepIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.partition {
            Some(p) => write!(f, "{}[{p}]", self.group),
            None => write!(f, "{}", self.group),
        }
    }
}

#[derive(Serialize)]
struct StepTokenInput<'a> {
    group: &'a GroupId,
    code_version: &'a str,
    outputs: Vec<&'a AssetKey>,
    /// Sorted by key.
    inputs: Vec<(&'a AssetKey, &'a VersionToken)>,
    config: &'a BTreeMap<String, ConfigValue>,
    partition: Option<&'a str>,
}

/// Token of one step, or `None` when any ingredient is unversioned.
pub fn step_token<'a>(
    group: &GroupId,
    code_version: Option<&str>,
    outputs: impl IntoIterator<Item = &'a AssetKey>,
    inputs: &BTreeMap<AssetKey, Option<VersionToken>>,
    config: &BTreeMap<String, ConfigValue>,
    partition: Option<&str>,
) -> Result<Option<VersionToken>, PlanError> {
    let Some(code_version) = code_version else { return Ok(None) };
    let mut known = Vec::with_capacity(inputs.len());
    for (key, token) in inputs {
        match token {
            Some(t) => known.push((key, t)),
            None => return Ok(None),
        }
    }

    let mut outputs: Vec<&AssetKey> = outputs.into_iter().collect();
    outputs.sort();
    let input = StepTokenInput {
        group,
        code_version,
        outputs,
        inputs: known,
        config,
        partition,
    };
    Ok(Some(VersionToken(hash_serde(&input)?)))
}

#[derive(Serialize)]
struct SourceTokenInput<'a> {
    source: &'a AssetKey,
    observed_version: Option<&'a str>,
}

/// Token of a source asset; sources without an observed version hash to a
/// constant per key.
pub fn source_token(key: &AssetKey, observed_version: Option<&str>) -> Result<VersionToken, PlanError> {
    let h = hash_serde(&SourceTokenInput { source: key, observed_version })?;
    Ok(VersionToken(h))
}
