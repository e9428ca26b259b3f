//! Typed run configuration.
//!
//! A group declares a `ConfigSchema`; a job supplies a `RunConfig`. Values are
//! checked against the schema at resolution time, never at run time.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigType {
    Bool,
    Int,
    Float,
    Str,
}

impl fmt::Display for ConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConfigType::Bool => "bool",
            ConfigType::Int => "int",
            ConfigType::Float => "float",
            ConfigType::Str => "str",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ConfigValue {
    pub fn type_of(&self) -> ConfigType {
        match self {
            ConfigValue::Bool(_) => ConfigType::Bool,
            ConfigValue::Int(_) => ConfigType::Int,
            ConfigValue::Float(_) => ConfigType::Float,
            ConfigValue::Str(_) => ConfigType::Str,
        }
    }

    /// Coerce into `ty`, widening ints to floats.
    fn coerce(self, ty: ConfigType) -> Option<ConfigValue> {
        match (self, ty) {
            (ConfigValue::Int(i), ConfigType::Float) => Some(ConfigValue::Float(i as f64)),
            (v, ty) if v.type_of() == ty => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigField {
    #[serde(rename = "type")]
    pub ty: ConfigType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<ConfigValue>,
}

impl ConfigField {
    pub fn required(ty: ConfigType) -> Self {
        Self { ty, required: true, default: None }
    }

    pub fn optional(ty: ConfigType) -> Self {
        Self { ty, required: false, default: None }
    }

    pub fn with_default(ty: ConfigType, default: ConfigValue) -> Self {
        Self { ty, required: false, default: Some(default) }
    }
}

/// Field name → declared field.
pub type ConfigSchema = BTreeMap<String, ConfigField>;

/// Group id → field name → value.
pub type RunConfig = BTreeMap<String, BTreeMap<String, ConfigValue>>;

/// One schema violation: which field, and what went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigViolation {
    pub field: String,
    pub reason: String,
}

/// Check `values` against `schema` and return the effective config
/// (supplied values plus defaults).
pub fn apply_schema(
    schema: &ConfigSchema,
    values: Option<&BTreeMap<String, ConfigValue>>,
) -> Result<BTreeMap<String, ConfigValue>, ConfigViolation> {
    let mut effective = BTreeMap::new();

    if let Some(values) = values {
        for (name, value) in values {
            let field = schema.get(name).ok_or_else(|| ConfigViolation {
                field: name.clone(),
                reason: "unknown field".into(),
            })?;
            let found = value.type_of();
            let coerced = value.clone().coerce(field.ty).ok_or_else(|| ConfigViolation {
                field: name.clone(),
                reason: format!("expected {}, got {}", field.ty, found),
            })?;
            effective.insert(name.clone(), coerced);
        }
    }

    for (name, field) in schema {
        if effective.contains_key(name) {
            continue;
        }
        match (&field.default, field.required) {
            (Some(default), _) => {
                let coerced = default.clone().coerce(field.ty).ok_or_else(|| ConfigViolation {
                    field: name.clone(),
                    reason: format!("default must be {}, got {}", field.ty, default.type_of()),
                })?;
                effective.insert(name.clone(), coerced);
            }
            (None, true) => {
                return Err(ConfigViolation {
                    field: name.clone(),
                    reason: "required field is missing".into(),
                })
            }
            (None, false) => {}
        }
    }

    Ok(effective)
}
