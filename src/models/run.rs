//! Run bookkeeping: orchestrator phases, per-source outcomes and the summary.

use std::fmt;

use chrono::{DateTime, Utc};

/// Orchestrator state for a single source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    Fetching,
    Diffing,
    Reconciling,
    NotifyingIfChanged,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Fetching => "fetching",
            Phase::Diffing => "diffing",
            Phase::Reconciling => "reconciling",
            Phase::NotifyingIfChanged => "notifying",
        };
        f.write_str(name)
    }
}

/// In-memory state of one execution.
#[derive(Debug, Clone)]
pub struct Run {
    /// Decided once at start: no accepted state existed at all
    pub is_first_run: bool,
    pub started_at: DateTime<Utc>,
    pub sources_processed: usize,
}

impl Run {
    pub fn new(is_first_run: bool) -> Self {
        Self {
            is_first_run,
            started_at: Utc::now(),
            sources_processed: 0,
        }
    }
}

/// What happened to one source during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutcome {
    /// No accepted state existed; the candidate was promoted whole
    Bootstrapped { records: usize },
    /// Candidate matched accepted state and was discarded
    Unchanged { records: usize },
    /// Accepted state was updated
    Changed {
        added: usize,
        modified: usize,
        removed: usize,
    },
    /// The source stopped in `phase`; accepted state left at its last consistent point
    Failed { phase: Phase, error: String },
}

impl SourceOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, SourceOutcome::Failed { .. })
    }
}

impl fmt::Display for SourceOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceOutcome::Bootstrapped { records } => write!(f, "bootstrapped ({records} records)"),
            SourceOutcome::Unchanged { records } => write!(f, "unchanged ({records} records)"),
            SourceOutcome::Changed {
                added,
                modified,
                removed,
            } => write!(f, "changed (+{added} ~{modified} -{removed})"),
            SourceOutcome::Failed { phase, error } => write!(f, "failed while {phase}: {error}"),
        }
    }
}

/// Result of a whole run, reported to the operator.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub is_first_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<(String, SourceOutcome)>,
}

impl RunSummary {
    pub fn outcome(&self, source: &str) -> Option<&SourceOutcome> {
        self.outcomes
            .iter()
            .find(|(name, _)| name == source)
            .map(|(_, outcome)| outcome)
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| !o.is_failure()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_failure()).count()
    }

    pub fn changed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, SourceOutcome::Changed { .. }))
            .count()
    }
}
