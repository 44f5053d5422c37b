// src/models/mod.rs

//! Domain models for the watcher.
//!
//! Records and their keys, sealed snapshots, run bookkeeping and the
//! configuration tree.

mod config;
mod record;
mod run;
mod snapshot;

// Re-export all public types
pub use config::{
    Config, HttpConfig, NotifyConfig, PathsConfig, RecordIdStrategy, RegistryConfig,
};
pub use record::{Record, RecordContent, RecordKey};
pub use run::{Phase, Run, RunSummary, SourceOutcome};
pub use snapshot::{Snapshot, SnapshotBuilder};
