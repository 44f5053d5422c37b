//! Storage abstractions for snapshot persistence.
//!
//! State lives in two slots with the same layout:
//!
//! ```text
//! {accepted}/                 # authoritative, survives between runs
//! └── {source}/
//!     └── {category}/
//!         └── {record_id}.json
//! {candidate}/                # staging, exists only while a run is active
//! └── {source}/…
//! ```
//!
//! The store only offers primitives (write, read, remove, move, directory
//! promotion). The order in which they are applied is the reconciler's job;
//! every primitive fails loudly instead of overwriting or skipping.

pub mod local;

use std::fmt;

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};

use crate::error::{AppError, Result};
use crate::models::{RecordKey, Snapshot, SnapshotBuilder};

// Re-export for convenience
pub use local::LocalStore;

/// One of the two storage rotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Accepted,
    Candidate,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Accepted => f.write_str("accepted"),
            Slot::Candidate => f.write_str("candidate"),
        }
    }
}

/// Path-addressed record storage with accepted/candidate slots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Store content under `key`, replacing any previous artifact.
    async fn write(&self, slot: Slot, key: &RecordKey, content: &[u8]) -> Result<()>;

    /// Read an artifact, `None` if it does not exist.
    async fn read(&self, slot: Slot, key: &RecordKey) -> Result<Option<Vec<u8>>>;

    /// Whether the slot root exists.
    async fn slot_exists(&self, slot: Slot) -> bool;

    /// Whether the slot holds a directory for `source`.
    async fn source_exists(&self, slot: Slot, source: &str) -> bool;

    /// Source directories present in the slot, sorted.
    async fn list_sources(&self, slot: Slot) -> Result<Vec<String>>;

    /// Record keys stored for `source`, sorted.
    async fn list_keys(&self, slot: Slot, source: &str) -> Result<Vec<RecordKey>>;

    /// Delete one artifact; fails if it does not exist.
    async fn remove(&self, slot: Slot, key: &RecordKey) -> Result<()>;

    /// Move a candidate artifact into the accepted slot; fails if the accepted
    /// artifact still exists.
    async fn move_to_accepted(&self, key: &RecordKey) -> Result<()>;

    /// Rename the whole candidate directory of `source` into the accepted slot;
    /// fails if the accepted slot already has that source.
    async fn promote_source(&self, source: &str) -> Result<()>;

    /// Remove the (already emptied) directory tree of `source`; fails if any
    /// file is left in it.
    async fn discard_source_dir(&self, slot: Slot, source: &str) -> Result<()>;

    /// Remove empty category directories, and the source directory if it ends
    /// up empty. Never touches files.
    async fn prune(&self, slot: Slot, source: &str) -> Result<()>;

    /// Create the slot root if missing.
    async fn ensure_slot(&self, slot: Slot) -> Result<()>;

    /// Remove an empty slot root; fails if it still has content.
    async fn remove_slot(&self, slot: Slot) -> Result<()>;

    /// Remove a slot root with everything below it.
    async fn purge_slot(&self, slot: Slot) -> Result<()>;

    /// Stream every `(key, content)` of a source. Each call starts over.
    fn enumerate<'a>(
        &'a self,
        slot: Slot,
        source: &'a str,
    ) -> BoxStream<'a, Result<(RecordKey, Vec<u8>)>> {
        stream::once(self.list_keys(slot, source))
            .flat_map(move |listed| match listed {
                Ok(keys) => stream::iter(keys)
                    .then(move |key| async move {
                        match self.read(slot, &key).await? {
                            Some(content) => Ok((key, content)),
                            None => Err(AppError::storage(
                                key.to_string(),
                                format!("vanished from {slot} slot while enumerating"),
                            )),
                        }
                    })
                    .boxed(),
                Err(e) => stream::once(async move { Err(e) }).boxed(),
            })
            .boxed()
    }
}

/// Read a whole source into a sealed snapshot.
pub async fn load_snapshot(store: &dyn SnapshotStore, slot: Slot, source: &str) -> Result<Snapshot> {
    let mut builder = SnapshotBuilder::new(source);
    let mut records = store.enumerate(slot, source);
    while let Some(item) = records.next().await {
        let (key, content) = item?;
        builder.insert(key, content);
    }
    Ok(builder.seal())
}
