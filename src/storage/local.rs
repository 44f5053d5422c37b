//! Local filesystem storage implementation.
//!
//! ## Storage Layout
//!
//! ```text
//! {accepted_root}/{source}/{category}/{record_id}.json
//! {candidate_root}/{source}/{category}/{record_id}.json
//! ```
//!
//! Both roots should live on the same filesystem so that moves and source
//! promotion are plain renames.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{AppError, Result};
use crate::models::{PathsConfig, RecordKey};
use crate::storage::{SnapshotStore, Slot};
use crate::utils::sanitize_label;

const EXTENSION: &str = ".json";

/// Local filesystem snapshot store.
#[derive(Debug, Clone)]
pub struct LocalStore {
    accepted_root: PathBuf,
    candidate_root: PathBuf,
}

impl LocalStore {
    /// Create a store over the given slot roots.
    pub fn new(accepted_root: impl Into<PathBuf>, candidate_root: impl Into<PathBuf>) -> Self {
        Self {
            accepted_root: accepted_root.into(),
            candidate_root: candidate_root.into(),
        }
    }

    /// Create a store from the `[paths]` configuration.
    pub fn from_config(paths: &PathsConfig) -> Self {
        Self::new(&paths.accepted_dir, &paths.candidate_dir)
    }

    /// Root directory of a slot.
    pub fn root(&self, slot: Slot) -> &Path {
        match slot {
            Slot::Accepted => &self.accepted_root,
            Slot::Candidate => &self.candidate_root,
        }
    }

    fn source_dir(&self, slot: Slot, source: &str) -> PathBuf {
        self.root(slot).join(sanitize_label(source))
    }

    /// Full path of a record artifact.
    pub fn path(&self, slot: Slot, key: &RecordKey) -> PathBuf {
        self.root(slot)
            .join(key.source())
            .join(key.category())
            .join(format!("{}{EXTENSION}", key.record_id()))
    }

    /// Ensure parent directory exists.
    async fn ensure_parent(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::storage(parent, e))?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
        Self::ensure_parent(path).await?;

        let tmp = path.with_extension("json.tmp");
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| AppError::storage(&tmp, e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| AppError::storage(&tmp, e))?;
        file.flush().await.map_err(|e| AppError::storage(&tmp, e))?;
        drop(file);

        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| AppError::storage(path, e))?;
        Ok(())
    }

    async fn is_dir(path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn exists(path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    /// Sorted names of the sub-directories of `dir`; empty if `dir` is missing.
    async fn subdirs(dir: &Path) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::storage(dir, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::storage(dir, e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if is_dir {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove a directory that must be empty.
    async fn remove_empty_dir(dir: &Path) -> Result<()> {
        match tokio::fs::remove_dir(dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::storage(dir, format!("not removable ({e})"))),
        }
    }

    async fn is_empty_dir(dir: &Path) -> bool {
        match tokio::fs::read_dir(dir).await {
            Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl SnapshotStore for LocalStore {
    async fn write(&self, slot: Slot, key: &RecordKey, content: &[u8]) -> Result<()> {
        Self::write_bytes(&self.path(slot, key), content).await
    }

    async fn read(&self, slot: Slot, key: &RecordKey) -> Result<Option<Vec<u8>>> {
        let path = self.path(slot, key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::storage(&path, e)),
        }
    }

    async fn slot_exists(&self, slot: Slot) -> bool {
        Self::is_dir(self.root(slot)).await
    }

    async fn source_exists(&self, slot: Slot, source: &str) -> bool {
        Self::is_dir(&self.source_dir(slot, source)).await
    }

    async fn list_sources(&self, slot: Slot) -> Result<Vec<String>> {
        Self::subdirs(self.root(slot)).await
    }

    async fn list_keys(&self, slot: Slot, source: &str) -> Result<Vec<RecordKey>> {
        let source_dir = self.source_dir(slot, source);
        let mut keys = Vec::new();

        for category in Self::subdirs(&source_dir).await? {
            let dir = source_dir.join(&category);
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| AppError::storage(&dir, e))?;

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| AppError::storage(&dir, e))?
            {
                let name = entry.file_name().to_string_lossy().into_owned();
                if let Some(record_id) = name.strip_suffix(EXTENSION) {
                    keys.push(RecordKey::new(source, &category, record_id));
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn remove(&self, slot: Slot, key: &RecordKey) -> Result<()> {
        let path = self.path(slot, key);
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| AppError::storage(&path, e))
    }

    async fn move_to_accepted(&self, key: &RecordKey) -> Result<()> {
        let from = self.path(Slot::Candidate, key);
        let to = self.path(Slot::Accepted, key);

        if Self::exists(&to).await {
            return Err(AppError::storage(&to, "accepted artifact still present"));
        }
        if !Self::exists(&from).await {
            return Err(AppError::storage(&from, "candidate artifact missing"));
        }

        Self::ensure_parent(&to).await?;
        tokio::fs::rename(&from, &to)
            .await
            .map_err(|e| AppError::storage(&to, e))
    }

    async fn promote_source(&self, source: &str) -> Result<()> {
        let from = self.source_dir(Slot::Candidate, source);
        let to = self.source_dir(Slot::Accepted, source);

        if Self::exists(&to).await {
            return Err(AppError::storage(&to, "accepted source already present"));
        }
        if !Self::is_dir(&from).await {
            return Err(AppError::storage(&from, "candidate source missing"));
        }

        self.ensure_slot(Slot::Accepted).await?;
        tokio::fs::rename(&from, &to)
            .await
            .map_err(|e| AppError::storage(&to, e))
    }

    async fn discard_source_dir(&self, slot: Slot, source: &str) -> Result<()> {
        let source_dir = self.source_dir(slot, source);
        for category in Self::subdirs(&source_dir).await? {
            Self::remove_empty_dir(&source_dir.join(category)).await?;
        }
        Self::remove_empty_dir(&source_dir).await
    }

    async fn prune(&self, slot: Slot, source: &str) -> Result<()> {
        let source_dir = self.source_dir(slot, source);
        for category in Self::subdirs(&source_dir).await? {
            let dir = source_dir.join(category);
            if Self::is_empty_dir(&dir).await {
                Self::remove_empty_dir(&dir).await?;
            }
        }
        if Self::is_empty_dir(&source_dir).await {
            Self::remove_empty_dir(&source_dir).await?;
        }
        Ok(())
    }

    async fn ensure_slot(&self, slot: Slot) -> Result<()> {
        let root = self.root(slot);
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| AppError::storage(root, e))
    }

    async fn remove_slot(&self, slot: Slot) -> Result<()> {
        Self::remove_empty_dir(self.root(slot)).await
    }

    async fn purge_slot(&self, slot: Slot) -> Result<()> {
        let root = self.root(slot);
        match tokio::fs::remove_dir_all(root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::storage(root, e)),
        }
    }
}
