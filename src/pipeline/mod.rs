//! Change-detection pipeline.
//!
//! - `diff`: classify accepted vs. candidate snapshots
//! - `reconcile`: fold a candidate into accepted state
//! - `run`: drive every source through fetch, diff, reconcile and notify

pub mod diff;
pub mod reconcile;
pub mod run;

pub use diff::{ChangeEntry, ChangeKind, ChangeSet, diff};
pub use reconcile::{Promotion, ReconcileReport, Reconciler};
pub use run::{Orchestrator, RunReport, change_message};
