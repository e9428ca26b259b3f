//! Asset keys: ordered path segments with a total order.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Globally unique identity of an asset.
///
/// Ordering is lexicographic over segments, which gives every map/set keyed
/// by `AssetKey` a deterministic iteration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AssetKey(Vec<String>);

impl AssetKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Parse a `/`-joined path such as `core/models/a`.
    pub fn from_path(path: &str) -> Self {
        Self::new(path.split('/').filter(|s| !s.is_empty()))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Last segment; the "name" of the asset.
    pub fn name(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or("")
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when `prefix` is a (non-strict) leading run of this key's segments.
    pub fn has_prefix(&self, prefix: &[String]) -> bool {
        self.0.len() >= prefix.len() && self.0[..prefix.len()] == *prefix
    }

    pub fn with_prefix(&self, prefix: &[String]) -> Self {
        let mut segments = prefix.to_vec();
        segments.extend(self.0.iter().cloned());
        Self(segments)
    }

    pub fn to_path(&self) -> String {
        self.0.join("/")
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_path())
    }
}

impl From<&str> for AssetKey {
    fn from(path: &str) -> Self {
        Self::from_path(path)
    }
}

impl From<String> for AssetKey {
    fn from(path: String) -> Self {
        Self::from_path(&path)
    }
}

impl From<Vec<String>> for AssetKey {
    fn from(segments: Vec<String>) -> Self {
        Self(segments)
    }
}

// Accept either `"a/b"` or `["a", "b"]` in definitions files.
impl<'de> Deserialize<'de> for AssetKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Path(String),
            Segments(Vec<String>),
        }

        let key = match Repr::deserialize(deserializer)? {
            Repr::Path(p) => AssetKey::from_path(&p),
            Repr::Segments(s) => AssetKey(s),
        };
        if key.is_empty() {
            return Err(serde::de::Error::custom("asset key must have at least one segment"));
        }
        Ok(key)
    }
}
