//! I/O managers: where materialized asset values live.
//!
//! Values are `serde_json::Value`; what a value means is up to the engine that
//! produced it. `store` returns metadata describing where it went.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use assetflow_core::config::DEFAULT_IO_MANAGER_KEY;
use assetflow_core::defs::Metadata;
use assetflow_core::key::AssetKey;

use crate::error::IoError;

const UNPARTITIONED_FILE: &str = "__all__";

pub trait IoManager: Send + Sync {
    fn load(&self, key: &AssetKey, partition: Option<&str>) -> Result<Value, IoError>;

    fn store(&self, key: &AssetKey, partition: Option<&str>, value: &Value) -> Result<Metadata, IoError>;

    /// Whether a stored value for `(key, partition)` can still be loaded.
    fn has_output(&self, key: &AssetKey, partition: Option<&str>) -> Result<bool, IoError>;
}

type Slot = (AssetKey, Option<String>);

#[derive(Debug, Default)]
pub struct InMemoryIoManager {
    values: Mutex<BTreeMap<Slot, Value>>,
}

impl InMemoryIoManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a stored value, as if it had been deleted externally.
    pub fn evict(&self, key: &AssetKey, partition: Option<&str>) -> Result<bool, IoError> {
        let mut values = self.lock()?;
        Ok(values.remove(&(key.clone(), partition.map(str::to_string))).is_some())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<Slot, Value>>, IoError> {
        self.values
            .lock()
            .map_err(|_| IoError::Other("in-memory store lock poisoned".into()))
    }
}

impl IoManager for InMemoryIoManager {
    fn load(&self, key: &AssetKey, partition: Option<&str>) -> Result<Value, IoError> {
        let values = self.lock()?;
        values
            .get(&(key.clone(), partition.map(str::to_string)))
            .cloned()
            .ok_or_else(|| IoError::NotFound {
                key: key.clone(),
                partition: partition.map(str::to_string),
            })
    }

    fn store(&self, key: &AssetKey, partition: Option<&str>, value: &Value) -> Result<Metadata, IoError> {
        let mut values = self.lock()?;
        values.insert((key.clone(), partition.map(str::to_string)), value.clone());
        Ok(Metadata::new())
    }

    fn has_output(&self, key: &AssetKey, partition: Option<&str>) -> Result<bool, IoError> {
        let values = self.lock()?;
        Ok(values.contains_key(&(key.clone(), partition.map(str::to_string))))
    }
}

/// JSON files at `<base_dir>/<key segments>/<partition or __all__>.json`.
#[derive(Debug, Clone)]
pub struct FsIoManager {
    base_dir: PathBuf,
}

impl FsIoManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn path_for(&self, key: &AssetKey, partition: Option<&str>) -> PathBuf {
        let mut path = self.base_dir.clone();
        for segment in key.segments() {
            path.push(sanitize(segment));
        }
        let file = partition.map(sanitize).unwrap_or_else(|| UNPARTITIONED_FILE.to_string());
        path.push(format!("{file}.json"));
        path
    }
}

/// Portable, collision-free file names: bytes outside `[A-Za-z0-9._-]` are
/// written as `%XX`. Names that would clash with `.`, `..` or the
/// unpartitioned file get their first byte escaped too.
fn sanitize(s: &str) -> String {
    if s.is_empty() {
        return "%".to_string();
    }
    let reserved = matches!(s, "." | "..") || s == UNPARTITIONED_FILE;
    let mut out = String::with_capacity(s.len());
    for (i, byte) in s.bytes().enumerate() {
        let plain = byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-');
        if plain && !(reserved && i == 0) {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

impl IoManager for FsIoManager {
    fn load(&self, key: &AssetKey, partition: Option<&str>) -> Result<Value, IoError> {
        let path = self.path_for(key, partition);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IoError::NotFound {
                    key: key.clone(),
                    partition: partition.map(str::to_string),
                })
            }
            Err(e) => return Err(IoError::from(e).with_context(path.display().to_string())),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn store(&self, key: &AssetKey, partition: Option<&str>, value: &Value) -> Result<Metadata, IoError> {
        let path = self.path_for(key, partition);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_vec_pretty(value)?)?;

        let mut metadata = Metadata::new();
        metadata.insert("path".into(), Value::String(path.display().to_string()));
        Ok(metadata)
    }

    fn has_output(&self, key: &AssetKey, partition: Option<&str>) -> Result<bool, IoError> {
        Ok(self.path_for(key, partition).is_file())
    }
}

/// I/O managers by key. Outputs and inputs name the manager they use.
#[derive(Clone, Default)]
pub struct IoManagers {
    managers: BTreeMap<String, Arc<dyn IoManager>>,
}

impl IoManagers {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with an `InMemoryIoManager` under the default key.
    pub fn in_memory() -> Self {
        Self::new().with(DEFAULT_IO_MANAGER_KEY, Arc::new(InMemoryIoManager::new()))
    }

    pub fn with(mut self, key: impl Into<String>, manager: Arc<dyn IoManager>) -> Self {
        self.managers.insert(key.into(), manager);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, manager: Arc<dyn IoManager>) {
        self.managers.insert(key.into(), manager);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.managers.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Result<&dyn IoManager, IoError> {
        self.managers
            .get(key)
            .map(|m| m.as_ref())
            .ok_or_else(|| IoError::UnknownManager(key.to_string()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.managers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for IoManagers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoManagers").field("keys", &self.managers.keys().collect::<Vec<_>>()).finish()
    }
}
