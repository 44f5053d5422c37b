//! Promotion of a candidate snapshot into accepted state.
//!
//! Per source, keys are processed in change-set order with delete-then-move
//! steps, so an interruption leaves the accepted slot holding a subset of
//! the final state and never two authoritative copies of one record. A
//! source without accepted state is promoted with a single directory rename.
//!
//! After every key is handled the candidate directory of the source must be
//! empty; anything left over is reported as a reconciliation fault.

use crate::error::{AppError, Result};
use crate::models::Phase;
use crate::pipeline::diff::{ChangeKind, ChangeSet};
use crate::storage::{SnapshotStore, Slot};
use crate::utils::log::{EventSink, RunEvent};

/// How the candidate was folded into accepted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Promotion {
    /// No accepted state existed; the candidate directory became accepted
    Bootstrapped,
    /// Nothing changed; the candidate was deleted
    Discarded,
    /// Individual keys were applied
    Applied,
}

/// Counts of what reconciliation did for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub promotion: Promotion,
    pub added: usize,
    pub modified: usize,
    pub removed: usize,
    pub unchanged: usize,
}

impl ReconcileReport {
    fn new(promotion: Promotion, changes: &ChangeSet) -> Self {
        Self {
            promotion,
            added: changes.count(ChangeKind::Added),
            modified: changes.count(ChangeKind::Modified),
            removed: changes.count(ChangeKind::Removed),
            unchanged: changes.count(ChangeKind::Unchanged),
        }
    }
}

/// Applies change sets to a snapshot store.
pub struct Reconciler<'a> {
    store: &'a dyn SnapshotStore,
    events: &'a dyn EventSink,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a dyn SnapshotStore, events: &'a dyn EventSink) -> Self {
        Self { store, events }
    }

    /// Apply `changes` for `source`.
    ///
    /// `changes` must come from a sealed candidate. `accepted_present` tells
    /// whether the accepted slot held the source when the diff was computed.
    /// A storage error stops the source immediately, leaving every already
    /// processed key complete and every remaining key untouched.
    pub async fn reconcile(
        &self,
        source: &str,
        changes: &ChangeSet,
        accepted_present: bool,
    ) -> Result<ReconcileReport> {
        if !accepted_present {
            return self.bootstrap(source, changes).await;
        }

        if !changes.has_changes() {
            for entry in changes.of_kind(ChangeKind::Unchanged) {
                self.store.remove(Slot::Candidate, &entry.key).await?;
            }
            self.finish_candidate(source).await?;
            self.events.info(
                Phase::Reconciling,
                source,
                &format!("no changes, candidate of {} records discarded", changes.len()),
            );
            return Ok(ReconcileReport::new(Promotion::Discarded, changes));
        }

        for entry in changes.entries() {
            match entry.kind {
                ChangeKind::Removed => {
                    self.store.remove(Slot::Accepted, &entry.key).await?;
                }
                ChangeKind::Modified => {
                    self.store.remove(Slot::Accepted, &entry.key).await?;
                    self.store.move_to_accepted(&entry.key).await?;
                }
                ChangeKind::Added => {
                    self.store.move_to_accepted(&entry.key).await?;
                }
                ChangeKind::Unchanged => {
                    self.store.remove(Slot::Candidate, &entry.key).await?;
                    continue;
                }
            }
            self.events.emit(
                RunEvent::new(log::Level::Debug, Phase::Reconciling, source, entry.kind.to_string())
                    .with_key(&entry.key),
            );
        }

        self.store.prune(Slot::Accepted, source).await?;
        self.finish_candidate(source).await?;

        let report = ReconcileReport::new(Promotion::Applied, changes);
        self.events.info(
            Phase::Reconciling,
            source,
            &format!(
                "applied: {} added, {} modified, {} removed, {} unchanged",
                report.added, report.modified, report.removed, report.unchanged
            ),
        );
        Ok(report)
    }

    async fn bootstrap(&self, source: &str, changes: &ChangeSet) -> Result<ReconcileReport> {
        if changes.len() != changes.count(ChangeKind::Added) {
            return Err(AppError::reconciliation(
                source,
                "change set compares against accepted state that does not exist",
            ));
        }

        if changes.is_empty() {
            self.finish_candidate(source).await?;
        } else {
            self.store.promote_source(source).await?;
        }

        self.events.info(
            Phase::Reconciling,
            source,
            &format!("bootstrapped accepted state with {} records", changes.len()),
        );
        Ok(ReconcileReport::new(Promotion::Bootstrapped, changes))
    }

    /// Verify the candidate directory of `source` is empty, then remove it.
    async fn finish_candidate(&self, source: &str) -> Result<()> {
        let leftovers = self.store.list_keys(Slot::Candidate, source).await?;
        if !leftovers.is_empty() {
            let sample: Vec<String> = leftovers.iter().take(5).map(ToString::to_string).collect();
            return Err(AppError::reconciliation(
                source,
                format!(
                    "{} orphaned candidate records (e.g. {})",
                    leftovers.len(),
                    sample.join(", ")
                ),
            ));
        }

        self.store
            .discard_source_dir(Slot::Candidate, source)
            .await
            .map_err(|e| AppError::reconciliation(source, format!("candidate not empty: {e}")))
    }
}
