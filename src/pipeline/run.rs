// src/pipeline/run.rs

//! Change-detection run.
//!
//! Sources are processed one after another through
//! `Fetching -> Diffing -> Reconciling -> NotifyingIfChanged`. A failure in
//! any phase ends that source only: its candidate records are dropped and its
//! accepted state stays at the last consistent point. Reconciliation faults
//! do not stop other sources but make the whole run return an error once
//! everything else is done.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;

use crate::error::{AppError, Result};
use crate::models::{Phase, Run, RunSummary, SourceOutcome};
use crate::pipeline::diff::{ChangeKind, ChangeSet, diff};
use crate::pipeline::reconcile::{Promotion, Reconciler};
use crate::services::{Fetcher, Notifier};
use crate::storage::{SnapshotStore, Slot, load_snapshot};
use crate::utils::log::{EventSink, RunEvent};
use crate::utils::sanitize_label;

/// Source name used for events that concern the run as a whole.
pub const RUN_SCOPE: &str = "run";

/// Key lines listed in one change notification before the rest is summarised.
const MAX_LISTED_CHANGES: usize = 20;

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(900);

/// Why a source stopped.
struct SourceFailure {
    phase: Phase,
    error: AppError,
}

impl SourceFailure {
    fn new(phase: Phase, error: AppError) -> Self {
        Self { phase, error }
    }
}

/// Outcome of a run that got past slot preparation.
#[derive(Debug)]
pub struct RunReport {
    pub summary: RunSummary,
    /// First reconciliation fault; the run must be reported as failed
    pub fault: Option<AppError>,
}

impl RunReport {
    /// The summary, or the fault if there was one.
    pub fn into_result(self) -> Result<RunSummary> {
        match self.fault {
            Some(fault) => Err(fault),
            None => Ok(self.summary),
        }
    }
}

/// Drives one run over every configured source.
pub struct Orchestrator<'a> {
    store: &'a dyn SnapshotStore,
    fetchers: &'a [Box<dyn Fetcher>],
    notifier: &'a dyn Notifier,
    events: &'a dyn EventSink,
    fetch_timeout: Duration,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        store: &'a dyn SnapshotStore,
        fetchers: &'a [Box<dyn Fetcher>],
        notifier: &'a dyn Notifier,
        events: &'a dyn EventSink,
    ) -> Self {
        Self {
            store,
            fetchers,
            notifier,
            events,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Upper bound for one `Fetcher::fetch` call.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Execute a run.
    ///
    /// Returns `Err` when the slots could not be prepared. Faults found later
    /// (orphans left by reconciliation, candidate state left at the end) are
    /// carried in [`RunReport::fault`] next to the full summary. Ordinary
    /// source failures are only reported in the summary.
    pub async fn run(&self) -> Result<RunReport> {
        let mut run = Run::new(!self.store.slot_exists(Slot::Accepted).await);

        if run.is_first_run {
            self.events.info(
                Phase::Idle,
                RUN_SCOPE,
                "no accepted state, first run: sources are bootstrapped without notifications",
            );
        }

        self.store.ensure_slot(Slot::Accepted).await?;
        self.prepare_candidate().await?;

        let mut outcomes = Vec::with_capacity(self.fetchers.len());
        let mut fault: Option<AppError> = None;
        let mut seen_sources = HashSet::new();

        for fetcher in self.fetchers {
            let source = sanitize_label(fetcher.source());

            if !seen_sources.insert(source.clone()) {
                let message = format!("storage name '{source}' already used by another source in this run");
                self.events.error(Phase::Idle, &source, &message);
                outcomes.push((
                    source,
                    SourceOutcome::Failed {
                        phase: Phase::Idle,
                        error: message,
                    },
                ));
                continue;
            }

            let outcome = match self.process_source(&run, fetcher.as_ref(), &source).await {
                Ok(outcome) => outcome,
                Err(SourceFailure { phase, error }) => {
                    let message = error.to_string();
                    self.events.error(phase, &source, &message);
                    if !error.is_fault() {
                        self.drop_candidate(&source).await;
                    } else if fault.is_none() {
                        fault = Some(error);
                    }
                    SourceOutcome::Failed {
                        phase,
                        error: message,
                    }
                }
            };

            self.events.info(Phase::Idle, &source, &outcome.to_string());
            run.sources_processed += 1;
            outcomes.push((source, outcome));
        }

        if fault.is_none() {
            if let Err(e) = self.sweep_candidate().await {
                self.events.error(Phase::Idle, RUN_SCOPE, &e.to_string());
                fault = Some(e);
            }
        }

        let summary = RunSummary {
            is_first_run: run.is_first_run,
            started_at: run.started_at,
            finished_at: Utc::now(),
            outcomes,
        };
        self.events.info(
            Phase::Idle,
            RUN_SCOPE,
            &format!(
                "{} sources: {} succeeded, {} changed, {} failed",
                summary.outcomes.len(),
                summary.succeeded(),
                summary.changed(),
                summary.failed()
            ),
        );

        Ok(RunReport { summary, fault })
    }

    /// Remove candidate state left by an interrupted run and recreate the slot.
    async fn prepare_candidate(&self) -> Result<()> {
        if self.store.slot_exists(Slot::Candidate).await {
            let stale = self.store.list_sources(Slot::Candidate).await?;
            if !stale.is_empty() {
                self.events.warn(
                    Phase::Idle,
                    RUN_SCOPE,
                    &format!("purging stale candidate state of {}", stale.join(", ")),
                );
            }
            self.store.purge_slot(Slot::Candidate).await?;
        }
        self.store.ensure_slot(Slot::Candidate).await
    }

    async fn process_source(
        &self,
        run: &Run,
        fetcher: &dyn Fetcher,
        source: &str,
    ) -> std::result::Result<SourceOutcome, SourceFailure> {
        // Fetching
        let staged = self.fetch_and_stage(fetcher, source).await?;
        let candidate = load_snapshot(self.store, Slot::Candidate, source)
            .await
            .map_err(|e| SourceFailure::new(Phase::Fetching, e))?;
        self.events.info(
            Phase::Fetching,
            source,
            &format!("sealed candidate with {} of {} staged records", candidate.len(), staged),
        );

        // Diffing
        let accepted_present = self.store.source_exists(Slot::Accepted, source).await;
        let accepted = if accepted_present {
            let snapshot = load_snapshot(self.store, Slot::Accepted, source)
                .await
                .map_err(|e| SourceFailure::new(Phase::Diffing, e))?;
            Some(snapshot)
        } else {
            None
        };
        let changes = diff(accepted.as_ref(), Some(&candidate));
        self.events.info(
            Phase::Diffing,
            source,
            &format!(
                "{} added, {} modified, {} removed, {} unchanged",
                changes.count(ChangeKind::Added),
                changes.count(ChangeKind::Modified),
                changes.count(ChangeKind::Removed),
                changes.count(ChangeKind::Unchanged)
            ),
        );

        // Reconciling
        let report = Reconciler::new(self.store, self.events)
            .reconcile(source, &changes, accepted_present)
            .await
            .map_err(|e| SourceFailure::new(Phase::Reconciling, e))?;

        // NotifyingIfChanged
        if run.is_first_run {
            self.events.debug(
                Phase::NotifyingIfChanged,
                source,
                "first run, notification suppressed",
            );
        } else if changes.has_changes() {
            let message = change_message(source, &changes);
            match self.notifier.notify(&message).await {
                Ok(()) => self.events.info(Phase::NotifyingIfChanged, source, "notification sent"),
                Err(e) => self.events.warn(
                    Phase::NotifyingIfChanged,
                    source,
                    &format!("notification failed: {e}"),
                ),
            }
        }

        Ok(match report.promotion {
            Promotion::Bootstrapped => SourceOutcome::Bootstrapped {
                records: report.added,
            },
            Promotion::Discarded => SourceOutcome::Unchanged {
                records: report.unchanged,
            },
            Promotion::Applied => SourceOutcome::Changed {
                added: report.added,
                modified: report.modified,
                removed: report.removed,
            },
        })
    }

    /// Fetch a source and write its records into the candidate slot.
    ///
    /// Records that belong to another source, repeat a key, or fail to store
    /// are skipped. Returns the number of records written.
    async fn fetch_and_stage(
        &self,
        fetcher: &dyn Fetcher,
        source: &str,
    ) -> std::result::Result<usize, SourceFailure> {
        let fail = |error| SourceFailure::new(Phase::Fetching, error);

        self.events.info(Phase::Fetching, source, "fetching");
        let records = match tokio::time::timeout(self.fetch_timeout, fetcher.fetch()).await {
            Ok(Ok(records)) => records,
            Ok(Err(e)) => return Err(fail(e)),
            Err(_) => {
                return Err(fail(AppError::Timeout {
                    source_id: source.to_string(),
                    secs: self.fetch_timeout.as_secs(),
                }));
            }
        };
        if records.is_empty() {
            return Err(fail(AppError::fetch(source, "no records returned")));
        }

        let mut seen = HashSet::with_capacity(records.len());
        let mut written = 0usize;

        for record in records {
            let key = record.key;
            if key.source() != source {
                self.events.emit(
                    RunEvent::new(log::Level::Warn, Phase::Fetching, source, "record of another source skipped")
                        .with_key(&key),
                );
                continue;
            }
            if !seen.insert(key.clone()) {
                self.events.emit(
                    RunEvent::new(log::Level::Warn, Phase::Fetching, source, "duplicate key skipped")
                        .with_key(&key),
                );
                continue;
            }

            let stored = match record.content.to_bytes() {
                Ok(bytes) => self.store.write(Slot::Candidate, &key, &bytes).await,
                Err(e) => Err(e),
            };
            match stored {
                Ok(()) => written += 1,
                Err(e) => self.events.emit(
                    RunEvent::new(log::Level::Warn, Phase::Fetching, source, format!("not staged: {e}"))
                        .with_key(&key),
                ),
            }
        }

        if written == 0 {
            return Err(fail(AppError::fetch(source, "no record could be staged")));
        }
        Ok(written)
    }

    /// Remove whatever a failed source left in the candidate slot.
    async fn drop_candidate(&self, source: &str) {
        if !self.store.source_exists(Slot::Candidate, source).await {
            return;
        }

        if let Err(e) = self.clear_candidate(source).await {
            self.events.warn(
                Phase::Idle,
                source,
                &format!("could not drop candidate records: {e}"),
            );
        }
    }

    async fn clear_candidate(&self, source: &str) -> Result<()> {
        for key in self.store.list_keys(Slot::Candidate, source).await? {
            self.store.remove(Slot::Candidate, &key).await?;
        }
        self.store.discard_source_dir(Slot::Candidate, source).await
    }

    /// The candidate slot must be empty once every source is done.
    async fn sweep_candidate(&self) -> Result<()> {
        let leftovers = self.store.list_sources(Slot::Candidate).await?;
        if !leftovers.is_empty() {
            return Err(AppError::reconciliation(
                RUN_SCOPE,
                format!("candidate state left after run: {}", leftovers.join(", ")),
            ));
        }
        self.store
            .remove_slot(Slot::Candidate)
            .await
            .map_err(|e| AppError::reconciliation(RUN_SCOPE, e.to_string()))
    }
}

/// Human-readable notification for one changed source.
pub fn change_message(source: &str, changes: &ChangeSet) -> String {
    let mut message = format!(
        "Difference found in {source}: {} added, {} modified, {} removed",
        changes.count(ChangeKind::Added),
        changes.count(ChangeKind::Modified),
        changes.count(ChangeKind::Removed)
    );

    let changed: Vec<_> = changes
        .entries()
        .iter()
        .filter(|e| e.kind != ChangeKind::Unchanged)
        .collect();

    for entry in changed.iter().take(MAX_LISTED_CHANGES) {
        let marker = match entry.kind {
            ChangeKind::Added => '+',
            ChangeKind::Modified => '~',
            _ => '-',
        };
        message.push_str(&format!("\n{marker} {}", entry.key));
    }
    if changed.len() > MAX_LISTED_CHANGES {
        message.push_str(&format!("\n… and {} more", changed.len() - MAX_LISTED_CHANGES));
    }
    message
}
