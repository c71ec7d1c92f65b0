// Baseline persistence: a pure key-value capability keyed by user id.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use parking_lot::RwLock;

use crate::error::StoreError;
use crate::models::UserBaseline;

/// Key-value persistence for one behavioral baseline per user.
///
/// Records are flat JSON structures; any format change must remain
/// backward-readable or the affected baseline is reset.
#[async_trait]
pub trait BaselineStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<UserBaseline>, StoreError>;
    async fn put(&self, baseline: &UserBaseline) -> Result<(), StoreError>;
    /// Returns whether a record existed.
    async fn delete(&self, user_id: &str) -> Result<bool, StoreError>;
}

/// File-backed store: one JSON document per user under a base directory.
pub struct FileBaselineStore {
    base_dir: PathBuf,
}

impl FileBaselineStore {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir)?;
        Ok(FileBaselineStore { base_dir })
    }

    fn record_path(&self, user_id: &str) -> PathBuf {
        // User ids are validated upstream; separators are still replaced
        // so a crafted id cannot escape the base directory.
        let safe: String = user_id
            .chars()
            .map(|c| match c {
                '/' | '\\' | '.' => '_',
                other => other,
            })
            .collect();
        self.base_dir.join(format!("{}.json", safe))
    }
}

#[async_trait]
impl BaselineStore for FileBaselineStore {
    async fn get(&self, user_id: &str) -> Result<Option<UserBaseline>, StoreError> {
        let path = self.record_path(user_id);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        let baseline = serde_json::from_str(&raw)?;
        Ok(Some(baseline))
    }

    async fn put(&self, baseline: &UserBaseline) -> Result<(), StoreError> {
        let path = self.record_path(&baseline.user_id);
        let raw = serde_json::to_string_pretty(baseline)?;
        // Write-then-rename: a crash mid-write must not truncate the
        // live record
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &path)?;
        debug!("persisted baseline for {}", baseline.user_id);
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<bool, StoreError> {
        let path = self.record_path(user_id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)?;
        Ok(true)
    }
}

/// In-memory store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryBaselineStore {
    records: Arc<RwLock<HashMap<String, UserBaseline>>>,
}

impl MemoryBaselineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BaselineStore for MemoryBaselineStore {
    async fn get(&self, user_id: &str) -> Result<Option<UserBaseline>, StoreError> {
        Ok(self.records.read().get(user_id).cloned())
    }

    async fn put(&self, baseline: &UserBaseline) -> Result<(), StoreError> {
        self.records
            .write()
            .insert(baseline.user_id.clone(), baseline.clone());
        Ok(())
    }

    async fn delete(&self, user_id: &str) -> Result<bool, StoreError> {
        Ok(self.records.write().remove(user_id).is_some())
    }
}
