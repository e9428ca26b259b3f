//! Definitions: executable groups, their inputs/outputs, and source assets.
//!
//! These are plain values. `AssetGraph::build` turns a set of them into the
//! immutable graph; nothing here knows about other groups except
//! `prefix_groups`, which rewrites a whole set at once.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::key::AssetKey;
use crate::partitions::PartitionsDefinition;
use crate::schema::{ConfigField, ConfigSchema};

pub type Metadata = BTreeMap<String, serde_json::Value>;

pub const DEFAULT_GROUP_NAME: &str = "default";

/// Identifier of an executable group (one invocable computation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// How an input names the asset it reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputKey {
    /// The key is the input name itself.
    Name,
    /// An explicit key.
    Key(AssetKey),
    /// Shorthand: `namespace + [input name]`.
    Namespace(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetIn {
    pub key: InputKey,
    #[serde(default)]
    pub metadata: Metadata,
    /// Per-dependency I/O override used when this input crosses a load boundary.
    #[serde(default)]
    pub input_manager_key: Option<String>,
}

impl Default for AssetIn {
    fn default() -> Self {
        Self {
            key: InputKey::Name,
            metadata: Metadata::new(),
            input_manager_key: None,
        }
    }
}

impl AssetIn {
    pub fn key(key: impl Into<AssetKey>) -> Self {
        Self { key: InputKey::Key(key.into()), ..Self::default() }
    }

    pub fn namespace<I, S>(namespace: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key: InputKey::Namespace(namespace.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Build from the loose (key, namespace) pair found in definition files.
    /// Declaring both is an error.
    pub fn try_from_parts(
        key: Option<AssetKey>,
        namespace: Option<Vec<String>>,
    ) -> Result<Self, String> {
        let key = match (key, namespace) {
            (Some(_), Some(_)) => {
                return Err("asset key and namespace cannot both be set on an input".into())
            }
            (Some(k), None) => InputKey::Key(k),
            (None, Some(ns)) => InputKey::Namespace(ns),
            (None, None) => InputKey::Name,
        };
        Ok(Self { key, ..Self::default() })
    }

    pub fn with_input_manager(mut self, key: impl Into<String>) -> Self {
        self.input_manager_key = Some(key.into());
        self
    }

    pub fn with_metadata(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(name.into(), value);
        self
    }

    /// Key this input reads when declared under `input_name`.
    pub fn resolve_key(&self, input_name: &str) -> AssetKey {
        match &self.key {
            InputKey::Name => AssetKey::new([input_name]),
            InputKey::Key(k) => k.clone(),
            InputKey::Namespace(ns) => {
                let mut segments = ns.clone();
                segments.push(input_name.to_string());
                AssetKey::new(segments)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetOut {
    pub key: AssetKey,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub io_manager_key: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl AssetOut {
    pub fn new(key: impl Into<AssetKey>) -> Self {
        Self {
            key: key.into(),
            metadata: Metadata::new(),
            io_manager_key: None,
            description: None,
        }
    }

    pub fn with_io_manager(mut self, key: impl Into<String>) -> Self {
        self.io_manager_key = Some(key.into());
        self
    }

    pub fn with_metadata(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(name.into(), value);
        self
    }
}

/// One computation producing one or more assets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutableGroup {
    pub id: GroupId,
    /// Output name → output.
    pub outs: BTreeMap<String, AssetOut>,
    /// Input name → input.
    pub ins: BTreeMap<String, AssetIn>,
    /// Output name → keys that output actually depends on. Outputs missing
    /// here depend on every input.
    pub internal_deps: BTreeMap<String, BTreeSet<AssetKey>>,
    pub can_subset: bool,
    pub code_version: Option<String>,
    pub partitions: Option<PartitionsDefinition>,
    pub config_schema: ConfigSchema,
    pub group_name: String,
    pub description: Option<String>,
}

impl ExecutableGroup {
    /// Empty multi-output group; add outputs with `out`.
    pub fn multi(id: impl Into<String>) -> Self {
        Self {
            id: GroupId::new(id),
            outs: BTreeMap::new(),
            ins: BTreeMap::new(),
            internal_deps: BTreeMap::new(),
            can_subset: false,
            code_version: None,
            partitions: None,
            config_schema: ConfigSchema::new(),
            group_name: DEFAULT_GROUP_NAME.to_string(),
            description: None,
        }
    }

    /// Single-output group whose id, output name and key are all `name`.
    pub fn asset(name: impl Into<String>) -> Self {
        let name = name.into();
        let key = AssetKey::new([name.clone()]);
        Self::multi(name.clone()).out_with(name, AssetOut::new(key))
    }

    /// Single-output group producing `key`; named after the key's last segment.
    pub fn asset_with_key(key: impl Into<AssetKey>) -> Self {
        let key = key.into();
        let name = key.name().to_string();
        Self::multi(key.to_path()).out_with(name, AssetOut::new(key))
    }

    /// Add an output keyed by its own name.
    pub fn out(self, name: impl Into<String>) -> Self {
        let name = name.into();
        let key = AssetKey::new([name.clone()]);
        self.out_with(name, AssetOut::new(key))
    }

    pub fn out_with(mut self, name: impl Into<String>, out: AssetOut) -> Self {
        self.outs.insert(name.into(), out);
        self
    }

    /// Add an input that reads the asset named like the input.
    pub fn input(self, name: impl Into<String>) -> Self {
        self.input_with(name, AssetIn::default())
    }

    pub fn input_with(mut self, name: impl Into<String>, input: AssetIn) -> Self {
        self.ins.insert(name.into(), input);
        self
    }

    pub fn internal_deps<I, K>(mut self, out_name: impl Into<String>, deps: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<AssetKey>,
    {
        self.internal_deps
            .insert(out_name.into(), deps.into_iter().map(Into::into).collect());
        self
    }

    pub fn subsettable(mut self, can_subset: bool) -> Self {
        self.can_subset = can_subset;
        self
    }

    pub fn code_version(mut self, version: impl Into<String>) -> Self {
        self.code_version = Some(version.into());
        self
    }

    pub fn partitioned(mut self, def: PartitionsDefinition) -> Self {
        self.partitions = Some(def);
        self
    }

    pub fn config_field(mut self, name: impl Into<String>, field: ConfigField) -> Self {
        self.config_schema.insert(name.into(), field);
        self
    }

    pub fn group_name(mut self, name: impl Into<String>) -> Self {
        self.group_name = name.into();
        self
    }

    pub fn output_keys(&self) -> BTreeSet<AssetKey> {
        self.outs.values().map(|o| o.key.clone()).collect()
    }

    /// Resolved input key → input name.
    pub fn input_keys(&self) -> BTreeMap<AssetKey, String> {
        self.ins
            .iter()
            .map(|(name, input)| (input.resolve_key(name), name.clone()))
            .collect()
    }

    /// Input declaration reading `key`, if any.
    pub fn input_for(&self, key: &AssetKey) -> Option<(&str, &AssetIn)> {
        self.ins
            .iter()
            .find(|(name, input)| input.resolve_key(name) == *key)
            .map(|(name, input)| (name.as_str(), input))
    }

    pub fn output_for(&self, key: &AssetKey) -> Option<(&str, &AssetOut)> {
        self.outs
            .iter()
            .find(|(_, out)| out.key == *key)
            .map(|(name, out)| (name.as_str(), out))
    }

    /// Upstream keys of the output named `out_name`.
    pub fn deps_of(&self, out_name: &str) -> BTreeSet<AssetKey> {
        match self.internal_deps.get(out_name) {
            Some(deps) => deps.clone(),
            None => self.input_keys().into_keys().collect(),
        }
    }

    /// Structural checks that need no other group.
    pub fn validate(&self) -> Result<(), GraphError> {
        let invalid = |reason: String| GraphError::InvalidDefinition {
            group: self.id.to_string(),
            reason,
        };

        if self.outs.is_empty() {
            return Err(invalid("a group must produce at least one asset".into()));
        }

        let mut out_keys = BTreeSet::new();
        for (name, out) in &self.outs {
            if out.key.is_empty() {
                return Err(invalid(format!("output '{name}' has an empty key")));
            }
            if !out_keys.insert(out.key.clone()) {
                return Err(invalid(format!("asset {} is produced by two outputs", out.key)));
            }
        }

        let mut in_keys = BTreeSet::new();
        for (name, input) in &self.ins {
            let key = input.resolve_key(name);
            if out_keys.contains(&key) {
                return Err(invalid(format!("input '{name}' reads its own output {key}")));
            }
            if !in_keys.insert(key.clone()) {
                return Err(invalid(format!("asset {key} is read by two inputs")));
            }
        }

        for (out_name, deps) in &self.internal_deps {
            let Some(out) = self.outs.get(out_name) else {
                return Err(invalid(format!("internal deps name unknown output '{out_name}'")));
            };
            for dep in deps {
                if *dep == out.key {
                    return Err(invalid(format!("output {dep} depends on itself")));
                }
                if !in_keys.contains(dep) && !out_keys.contains(dep) {
                    return Err(invalid(format!(
                        "output '{out_name}' depends on {dep}, which is neither an input nor a sibling output"
                    )));
                }
            }
        }

        if let Some(def) = &self.partitions {
            def.validate()
                .map_err(|e| invalid(format!("bad partitions definition: {e}")))?;
        }

        for (name, field) in &self.config_schema {
            if let Some(default) = &field.default {
                let ok = default.type_of() == field.ty
                    || (field.ty == crate::schema::ConfigType::Float
                        && default.type_of() == crate::schema::ConfigType::Int);
                if !ok {
                    return Err(invalid(format!(
                        "config field '{name}' default is {}, declared {}",
                        default.type_of(),
                        field.ty
                    )));
                }
            }
        }

        Ok(())
    }
}

/// An asset with no producing group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAsset {
    pub key: AssetKey,
    #[serde(default)]
    pub io_manager_key: Option<String>,
    /// Externally observed data version, folded into downstream tokens.
    #[serde(default)]
    pub observed_version: Option<String>,
    #[serde(default)]
    pub partitions: Option<PartitionsDefinition>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl SourceAsset {
    pub fn new(key: impl Into<AssetKey>) -> Self {
        Self {
            key: key.into(),
            io_manager_key: None,
            observed_version: None,
            partitions: None,
            metadata: Metadata::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.observed_version = Some(version.into());
        self
    }

    pub fn with_io_manager(mut self, key: impl Into<String>) -> Self {
        self.io_manager_key = Some(key.into());
        self
    }
}

/// Re-key `groups` under `prefix`.
///
/// Outputs are always prefixed. Inputs and internal deps are prefixed only
/// when they point at an asset produced inside `groups`; references to
/// anything else are left untouched.
pub fn prefix_groups<I, S>(groups: Vec<ExecutableGroup>, prefix: I) -> Vec<ExecutableGroup>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let prefix: Vec<String> = prefix.into_iter().map(Into::into).collect();
    let produced: BTreeSet<AssetKey> = groups.iter().flat_map(|g| g.output_keys()).collect();
    let remap = |key: &AssetKey| {
        if produced.contains(key) {
            key.with_prefix(&prefix)
        } else {
            key.clone()
        }
    };

    groups
        .into_iter()
        .map(|mut group| {
            for out in group.outs.values_mut() {
                out.key = out.key.with_prefix(&prefix);
            }
            for (name, input) in group.ins.iter_mut() {
                let current = input.resolve_key(name);
                if produced.contains(&current) {
                    input.key = InputKey::Key(current.with_prefix(&prefix));
                }
            }
            for deps in group.internal_deps.values_mut() {
                *deps = deps.iter().map(&remap).collect();
            }
            group
        })
        .collect()
}
