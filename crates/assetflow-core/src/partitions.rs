//! Partitions definitions.
//!
//! Two definitions are compatible only when they are identical (same variant,
//! same parameters), so compatibility is plain `==`.

use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl Cadence {
    /// Key format for partitions of this cadence.
    pub fn key_format(self) -> &'static str {
        match self {
            Cadence::Hourly => "%Y-%m-%d-%H:%M",
            Cadence::Daily | Cadence::Weekly | Cadence::Monthly => "%Y-%m-%d",
        }
    }

    fn parse(self, raw: &str) -> Result<NaiveDateTime> {
        let ts = match self {
            Cadence::Hourly => NaiveDateTime::parse_from_str(raw, self.key_format())
                .map_err(|e| Error::Partition(format!("'{raw}' is not an hourly key: {e}")))?,
            _ => NaiveDate::parse_from_str(raw, self.key_format())
                .map_err(|e| Error::Partition(format!("'{raw}' is not a {self} key: {e}")))?
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| Error::Invariant(format!("midnight out of range for '{raw}'")))?,
        };
        Ok(ts)
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Cadence::Hourly => "hourly",
            Cadence::Daily => "daily",
            Cadence::Weekly => "weekly",
            Cadence::Monthly => "monthly",
        };
        f.write_str(s)
    }
}

/// Serialized as a single-key map, `{ static: [..] }` or
/// `{ time_window: { cadence, start } }`, in every format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PartitionsRepr", into = "PartitionsRepr")]
pub enum PartitionsDefinition {
    /// An explicit, unordered list of partition keys.
    Static(Vec<String>),
    /// Ordered time windows starting at `start`.
    TimeWindow { cadence: Cadence, start: String },
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TimeWindowRepr {
    cadence: Cadence,
    start: String,
}

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartitionsRepr {
    #[serde(rename = "static", default, skip_serializing_if = "Option::is_none")]
    static_keys: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time_window: Option<TimeWindowRepr>,
}

impl TryFrom<PartitionsRepr> for PartitionsDefinition {
    type Error = String;

    fn try_from(repr: PartitionsRepr) -> std::result::Result<Self, Self::Error> {
        match (repr.static_keys, repr.time_window) {
            (Some(keys), None) => Ok(Self::Static(keys)),
            (None, Some(w)) => Ok(Self::TimeWindow { cadence: w.cadence, start: w.start }),
            (Some(_), Some(_)) => Err("partitions must set exactly one of 'static' or 'time_window', not both".into()),
            (None, None) => Err("partitions must set one of 'static' or 'time_window'".into()),
        }
    }
}

impl From<PartitionsDefinition> for PartitionsRepr {
    fn from(def: PartitionsDefinition) -> Self {
        match def {
            PartitionsDefinition::Static(keys) => Self { static_keys: Some(keys), time_window: None },
            PartitionsDefinition::TimeWindow { cadence, start } => Self {
                static_keys: None,
                time_window: Some(TimeWindowRepr { cadence, start }),
            },
        }
    }
}

impl PartitionsDefinition {
    pub fn static_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Static(keys.into_iter().map(Into::into).collect())
    }

    pub fn hourly(start: impl Into<String>) -> Self {
        Self::TimeWindow { cadence: Cadence::Hourly, start: start.into() }
    }

    pub fn daily(start: impl Into<String>) -> Self {
        Self::TimeWindow { cadence: Cadence::Daily, start: start.into() }
    }

    pub fn weekly(start: impl Into<String>) -> Self {
        Self::TimeWindow { cadence: Cadence::Weekly, start: start.into() }
    }

    pub fn monthly(start: impl Into<String>) -> Self {
        Self::TimeWindow { cadence: Cadence::Monthly, start: start.into() }
    }

    pub fn is_ordered(&self) -> bool {
        matches!(self, Self::TimeWindow { .. })
    }

    /// Check the definition's own parameters.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Static(keys) => {
                if keys.is_empty() {
                    return Err(Error::Partition("static partitions need at least one key".into()));
                }
                let mut seen = std::collections::BTreeSet::new();
                for k in keys {
                    if !seen.insert(k) {
                        return Err(Error::Partition(format!("duplicate static partition key '{k}'")));
                    }
                }
                Ok(())
            }
            Self::TimeWindow { cadence, start } => {
                let ts = cadence.parse(start)?;
                check_alignment(*cadence, ts, start)
            }
        }
    }

    /// Validate that `key` names a partition of this definition.
    pub fn validate_key(&self, key: &str) -> Result<()> {
        match self {
            Self::Static(keys) => {
                if keys.iter().any(|k| k == key) {
                    Ok(())
                } else {
                    Err(Error::Partition(format!("'{key}' is not one of {keys:?}")))
                }
            }
            Self::TimeWindow { cadence, start } => {
                let start_ts = cadence.parse(start)?;
                let ts = cadence.parse(key)?;
                check_alignment(*cadence, ts, key)?;
                if *cadence == Cadence::Weekly && ts.weekday() != start_ts.weekday() {
                    return Err(Error::Partition(format!(
                        "weekly key '{key}' does not fall on the same weekday as start '{start}'"
                    )));
                }
                if ts < start_ts {
                    return Err(Error::Partition(format!("'{key}' is before partition start '{start}'")));
                }
                Ok(())
            }
        }
    }
}

fn check_alignment(cadence: Cadence, ts: NaiveDateTime, raw: &str) -> Result<()> {
    match cadence {
        Cadence::Hourly if ts.minute() != 0 => {
            Err(Error::Partition(format!("hourly key '{raw}' must be on the hour")))
        }
        Cadence::Monthly if ts.day() != 1 => {
            Err(Error::Partition(format!("monthly key '{raw}' must be the first day of a month")))
        }
        _ => Ok(()),
    }
}

impl fmt::Display for PartitionsDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(keys) => write!(f, "static[{}]", keys.join(",")),
            Self::TimeWindow { cadence, start } => write!(f, "{cadence}(start={start})"),
        }
    }
}
