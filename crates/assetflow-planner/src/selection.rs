//! Asset selection expression tree.
//!
//! Both the programmatic builder below and the string grammar in `query`
//! produce `AssetSelection` values; `AssetSelection::resolve` is the only
//! evaluator. Evaluation is a pure function of (tree, graph) and returns a set,
//! so combinators compose without regard to evaluation order.
//!
//! Source assets are never part of a selection result: they cannot be
//! materialized, only loaded.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::{BitAnd, BitOr, Sub};

use serde::{Deserialize, Serialize};

use assetflow_core::graph::AssetGraph;
use assetflow_core::key::AssetKey;

use crate::error::SelectionError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetSelection {
    All,
    Keys(BTreeSet<AssetKey>),
    KeyPrefix(Vec<String>),
    /// By asset group name.
    Groups(BTreeSet<String>),
    Upstream {
        inner: Box<AssetSelection>,
        depth: Option<u32>,
    },
    Downstream {
        inner: Box<AssetSelection>,
        depth: Option<u32>,
    },
    Union(Box<AssetSelection>, Box<AssetSelection>),
    Intersection(Box<AssetSelection>, Box<AssetSelection>),
    Difference(Box<AssetSelection>, Box<AssetSelection>),
}

impl AssetSelection {
    pub fn all() -> Self {
        AssetSelection::All
    }

    pub fn keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<AssetKey>,
    {
        AssetSelection::Keys(keys.into_iter().map(Into::into).collect())
    }

    pub fn key_prefix<I, S>(prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AssetSelection::KeyPrefix(prefix.into_iter().map(Into::into).collect())
    }

    pub fn groups<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AssetSelection::Groups(names.into_iter().map(Into::into).collect())
    }

    /// This selection plus its ancestors within `depth` edges (`None` = unbounded).
    pub fn upstream(self, depth: Option<u32>) -> Self {
        AssetSelection::Upstream { inner: Box::new(self), depth }
    }

    /// This selection plus its descendants within `depth` edges (`None` = unbounded).
    pub fn downstream(self, depth: Option<u32>) -> Self {
        AssetSelection::Downstream { inner: Box::new(self), depth }
    }

    pub fn union(self, other: AssetSelection) -> Self {
        AssetSelection::Union(Box::new(self), Box::new(other))
    }

    pub fn intersection(self, other: AssetSelection) -> Self {
        AssetSelection::Intersection(Box::new(self), Box::new(other))
    }

    pub fn difference(self, other: AssetSelection) -> Self {
        AssetSelection::Difference(Box::new(self), Box::new(other))
    }

    /// Fold a list into one union; `None` for an empty list.
    pub fn union_all<I: IntoIterator<Item = AssetSelection>>(parts: I) -> Option<Self> {
        parts.into_iter().reduce(AssetSelection::union)
    }

    /// Evaluate against `graph`.
    pub fn resolve(&self, graph: &AssetGraph) -> Result<BTreeSet<AssetKey>, SelectionError> {
        use AssetSelection::*;
        let materializable = |k: &AssetKey| graph.node(k).is_some_and(|n| !n.is_source());

        let out = match self {
            All => graph.materializable_keys(),
            Keys(keys) => {
                let unknown: Vec<AssetKey> =
                    keys.iter().filter(|k| !materializable(k)).cloned().collect();
                if !unknown.is_empty() {
                    return Err(SelectionError::UnknownKeys { keys: unknown });
                }
                keys.clone()
            }
            KeyPrefix(prefix) => graph
                .materializable_keys()
                .into_iter()
                .filter(|k| k.has_prefix(prefix))
                .collect(),
            Groups(names) => graph
                .nodes()
                .filter(|n| !n.is_source() && names.contains(&n.group_name))
                .map(|n| n.key.clone())
                .collect(),
            Upstream { inner, depth } => {
                let base = inner.resolve(graph)?;
                let mut out = base.clone();
                for key in &base {
                    out.extend(graph.ancestors(key, *depth).into_iter().filter(|k| materializable(k)));
                }
                out
            }
            Downstream { inner, depth } => {
                let base = inner.resolve(graph)?;
                let mut out = base.clone();
                for key in &base {
                    out.extend(graph.descendants(key, *depth));
                }
                out
            }
            Union(a, b) => {
                let mut out = a.resolve(graph)?;
                out.extend(b.resolve(graph)?);
                out
            }
            Intersection(a, b) => {
                let left = a.resolve(graph)?;
                let right = b.resolve(graph)?;
                left.intersection(&right).cloned().collect()
            }
            Difference(a, b) => {
                let left = a.resolve(graph)?;
                let right = b.resolve(graph)?;
                left.difference(&right).cloned().collect()
            }
        };
        Ok(out)
    }
}

impl BitOr for AssetSelection {
    type Output = AssetSelection;
    fn bitor(self, rhs: AssetSelection) -> AssetSelection {
        self.union(rhs)
    }
}

impl BitAnd for AssetSelection {
    type Output = AssetSelection;
    fn bitand(self, rhs: AssetSelection) -> AssetSelection {
        self.intersection(rhs)
    }
}

impl Sub for AssetSelection {
    type Output = AssetSelection;
    fn sub(self, rhs: AssetSelection) -> AssetSelection {
        self.difference(rhs)
    }
}

fn fmt_depth(depth: &Option<u32>) -> String {
    match depth {
        Some(d) => d.to_string(),
        None => "*".into(),
    }
}

impl fmt::Display for AssetSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use AssetSelection::*;
        match self {
            All => f.write_str("*"),
            Keys(keys) => {
                let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
                write!(f, "keys({})", keys.join(", "))
            }
            KeyPrefix(prefix) => write!(f, "prefix({})", prefix.join("/")),
            Groups(names) => {
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                write!(f, "groups({})", names.join(", "))
            }
            Upstream { inner, depth } => write!(f, "upstream({inner}, {})", fmt_depth(depth)),
            Downstream { inner, depth } => write!(f, "downstream({inner}, {})", fmt_depth(depth)),
            Union(a, b) => write!(f, "({a} | {b})"),
            Intersection(a, b) => write!(f, "({a} & {b})"),
            Difference(a, b) => write!(f, "({a} - {b})"),
        }
    }
}
