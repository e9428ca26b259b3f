//! Memo store: step identity → last recorded version token.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use assetflow_core::hash::hash_serde;

use crate::error::MemoError;
use crate::version::{StepIdentity, VersionToken};

/// Reads must be safe to issue concurrently; the plan builder fans them out.
pub trait MemoStore: Send + Sync {
    fn get_recorded_version(&self, id: &StepIdentity) -> Result<Option<VersionToken>, MemoError>;
    fn record_version(&self, id: &StepIdentity, token: VersionToken) -> Result<(), MemoError>;
}

#[derive(Debug, Default)]
pub struct InMemoryMemoStore {
    records: Mutex<BTreeMap<StepIdentity, VersionToken>>,
}

impl InMemoryMemoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MemoStore for InMemoryMemoStore {
    fn get_recorded_version(&self, id: &StepIdentity) -> Result<Option<VersionToken>, MemoError> {
        let records = self
            .records
            .lock()
            .map_err(|_| MemoError::Unavailable("memo lock poisoned".into()))?;
        Ok(records.get(id).copied())
    }

    fn record_version(&self, id: &StepIdentity, token: VersionToken) -> Result<(), MemoError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| MemoError::Unavailable("memo lock poisoned".into()))?;
        records.insert(id.clone(), token);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MemoRecord {
    identity: StepIdentity,
    token: VersionToken,
}

/// One JSON file per step identity under `dir`, named by the identity's digest.
#[derive(Debug, Clone)]
pub struct FsMemoStore {
    dir: PathBuf,
}

impl FsMemoStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &StepIdentity) -> Result<PathBuf, MemoError> {
        let digest = hash_serde(id).map_err(|e| MemoError::Unavailable(e.to_string()))?;
        Ok(self.dir.join(format!("{}.json", digest.to_hex())))
    }
}

impl MemoStore for FsMemoStore {
    fn get_recorded_version(&self, id: &StepIdentity) -> Result<Option<VersionToken>, MemoError> {
        let path = self.path_for(id)?;
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: MemoRecord = serde_json::from_slice(&bytes)?;
        // Digest collisions are not expected; treat a mismatch as a miss.
        if record.identity != *id {
            return Ok(None);
        }
        Ok(Some(record.token))
    }

    fn record_version(&self, id: &StepIdentity, token: VersionToken) -> Result<(), MemoError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(id)?;
        let tmp = path.with_extension("json.tmp");
        let record = MemoRecord { identity: id.clone(), token };
        fs::write(&tmp, serde_json::to_vec_pretty(&record)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}
