// tests/run_scenarios.rs
//
// Whole runs against a temporary store with scripted fetchers.
//
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use regwatch::error::{AppError, Result};
use regwatch::models::{Phase, Record, RecordContent, RecordKey, RunSummary, SourceOutcome};
use regwatch::pipeline::{Orchestrator, RunReport};
use regwatch::services::{Fetcher, Notifier};
use regwatch::storage::{LocalStore, SnapshotStore, Slot};
use regwatch::utils::log::MemorySink;

enum Script {
    Records(Vec<Record>),
    Fail,
    Hang(Duration),
}

struct ScriptedFetcher {
    source: String,
    script: Script,
}

impl ScriptedFetcher {
    fn records(source: &str, records: &[(&str, &str)]) -> Box<dyn Fetcher> {
        let records = records.iter().map(|(id, body)| record(source, id, body)).collect();
        Box::new(Self {
            source: source.into(),
            script: Script::Records(records),
        })
    }

    fn failing(source: &str) -> Box<dyn Fetcher> {
        Box::new(Self {
            source: source.into(),
            script: Script::Fail,
        })
    }

    fn hanging(source: &str, delay: Duration) -> Box<dyn Fetcher> {
        Box::new(Self {
            source: source.into(),
            script: Script::Hang(delay),
        })
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    fn source(&self) -> &str {
        &self.source
    }

    async fn fetch(&self) -> Result<Vec<Record>> {
        match &self.script {
            Script::Records(records) => Ok(records.clone()),
            Script::Fail => Err(AppError::fetch(&self.source, "connection refused")),
            Script::Hang(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(vec![record(&self.source, "late", "v")])
            }
        }
    }
}

/// Writes a record of a source nobody fetches straight into the candidate slot.
struct StrayWriter {
    store: LocalStore,
    records: Vec<Record>,
}

#[async_trait]
impl Fetcher for StrayWriter {
    fn source(&self) -> &str {
        "bankX"
    }

    async fn fetch(&self) -> Result<Vec<Record>> {
        self.store
            .write(Slot::Candidate, &key("ghost", "X"), b"{}")
            .await?;
        Ok(self.records.clone())
    }
}

/// Store whose candidate removals for one source silently do nothing,
/// leaving orphans behind after reconciliation.
struct OrphaningStore {
    inner: LocalStore,
    source: String,
}

#[async_trait]
impl SnapshotStore for OrphaningStore {
    async fn write(&self, slot: Slot, key: &RecordKey, content: &[u8]) -> Result<()> {
        self.inner.write(slot, key, content).await
    }

    async fn read(&self, slot: Slot, key: &RecordKey) -> Result<Option<Vec<u8>>> {
        self.inner.read(slot, key).await
    }

    async fn slot_exists(&self, slot: Slot) -> bool {
        self.inner.slot_exists(slot).await
    }

    async fn source_exists(&self, slot: Slot, source: &str) -> bool {
        self.inner.source_exists(slot, source).await
    }

    async fn list_sources(&self, slot: Slot) -> Result<Vec<String>> {
        self.inner.list_sources(slot).await
    }

    async fn list_keys(&self, slot: Slot, source: &str) -> Result<Vec<RecordKey>> {
        self.inner.list_keys(slot, source).await
    }

    async fn remove(&self, slot: Slot, key: &RecordKey) -> Result<()> {
        if slot == Slot::Candidate && key.source() == self.source {
            return Ok(());
        }
        self.inner.remove(slot, key).await
    }

    async fn move_to_accepted(&self, key: &RecordKey) -> Result<()> {
        self.inner.move_to_accepted(key).await
    }

    async fn promote_source(&self, source: &str) -> Result<()> {
        self.inner.promote_source(source).await
    }

    async fn discard_source_dir(&self, slot: Slot, source: &str) -> Result<()> {
        self.inner.discard_source_dir(slot, source).await
    }

    async fn prune(&self, slot: Slot, source: &str) -> Result<()> {
        self.inner.prune(slot, source).await
    }

    async fn ensure_slot(&self, slot: Slot) -> Result<()> {
        self.inner.ensure_slot(slot).await
    }

    async fn remove_slot(&self, slot: Slot) -> Result<()> {
        self.inner.remove_slot(slot).await
    }

    async fn purge_slot(&self, slot: Slot) -> Result<()> {
        self.inner.purge_slot(slot).await
    }
}

#[derive(Default)]
struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingNotifier {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        self.messages.lock().unwrap().push(message.to_string());
        if self.fail {
            return Err(AppError::Notification("webhook returned 500".into()));
        }
        Ok(())
    }
}

fn record(source: &str, id: &str, body: &str) -> Record {
    let content = RecordContent::new("company", format!("https://{source}.example/{id}")).with_body(body);
    Record::new(source, id, content)
}

fn key(source: &str, id: &str) -> RecordKey {
    RecordKey::new(source, "company", id)
}

struct Env {
    _tmp: TempDir,
    store: LocalStore,
    sink: MemorySink,
}

impl Env {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path().join("current_state"), tmp.path().join("candidate_state"));
        Self {
            _tmp: tmp,
            store,
            sink: MemorySink::new(),
        }
    }

    async fn run(&self, fetchers: Vec<Box<dyn Fetcher>>, notifier: &dyn Notifier) -> Result<RunSummary> {
        self.report(&self.store, fetchers, notifier)
            .await
            .and_then(RunReport::into_result)
    }

    async fn report(
        &self,
        store: &dyn SnapshotStore,
        fetchers: Vec<Box<dyn Fetcher>>,
        notifier: &dyn Notifier,
    ) -> Result<RunReport> {
        Orchestrator::new(store, &fetchers, notifier, &self.sink)
            .with_fetch_timeout(Duration::from_millis(200))
            .run()
            .await
    }

    async fn accepted_ids(&self, source: &str) -> Vec<String> {
        self.store
            .list_keys(Slot::Accepted, source)
            .await
            .unwrap()
            .iter()
            .map(|k| k.record_id().to_string())
            .collect()
    }

    async fn accepted_body(&self, source: &str, id: &str) -> Option<String> {
        let bytes = self.store.read(Slot::Accepted, &key(source, id)).await.unwrap()?;
        let content: RecordContent = serde_json::from_slice(&bytes).unwrap();
        content.body
    }

    /// Seed accepted state through a first run.
    async fn seed(&self, source: &str, records: &[(&str, &str)]) {
        let notifier = RecordingNotifier::default();
        let summary = self
            .run(vec![ScriptedFetcher::records(source, records)], &notifier)
            .await
            .unwrap();
        assert!(summary.is_first_run);
    }
}

#[tokio::test]
async fn first_run_bootstraps_without_notifications() {
    let env = Env::new();
    let notifier = RecordingNotifier::default();

    let summary = env
        .run(
            vec![
                ScriptedFetcher::records("bankX", &[("A", "v1"), ("B", "v2")]),
                ScriptedFetcher::records("bankY", &[("Z", "v9")]),
            ],
            &notifier,
        )
        .await
        .unwrap();

    assert!(summary.is_first_run);
    assert_eq!(summary.outcome("bankX"), Some(&SourceOutcome::Bootstrapped { records: 2 }));
    assert_eq!(summary.outcome("bankY"), Some(&SourceOutcome::Bootstrapped { records: 1 }));
    assert!(notifier.messages().is_empty());

    assert_eq!(env.accepted_ids("bankX").await, vec!["A", "B"]);
    assert_eq!(env.accepted_ids("bankY").await, vec!["Z"]);
    assert!(!env.store.slot_exists(Slot::Candidate).await);
}

#[tokio::test]
async fn modified_and_added_records_are_promoted() {
    let env = Env::new();
    env.seed("bankX", &[("A", "v1"), ("B", "v2")]).await;

    let notifier = RecordingNotifier::default();
    let summary = env
        .run(
            vec![ScriptedFetcher::records(
                "bankX",
                &[("A", "v1-modified"), ("B", "v2"), ("C", "v3")],
            )],
            &notifier,
        )
        .await
        .unwrap();

    assert!(!summary.is_first_run);
    assert_eq!(
        summary.outcome("bankX"),
        Some(&SourceOutcome::Changed {
            added: 1,
            modified: 1,
            removed: 0
        })
    );
    assert_eq!(env.accepted_ids("bankX").await, vec!["A", "B", "C"]);
    assert_eq!(env.accepted_body("bankX", "A").await.as_deref(), Some("v1-modified"));
    assert_eq!(env.accepted_body("bankX", "C").await.as_deref(), Some("v3"));

    let messages = notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("Difference found in bankX: 1 added, 1 modified, 0 removed"));
    assert!(messages[0].contains("~ bankX/company/A"));
    assert!(messages[0].contains("+ bankX/company/C"));
    assert!(!messages[0].contains("bankX/company/B"));

    assert!(!env.store.slot_exists(Slot::Candidate).await);
}

#[tokio::test]
async fn missing_records_are_removed() {
    let env = Env::new();
    env.seed("bankX", &[("A", "v1"), ("B", "v2")]).await;

    let notifier = RecordingNotifier::default();
    let summary = env
        .run(vec![ScriptedFetcher::records("bankX", &[("A", "v1")])], &notifier)
        .await
        .unwrap();

    assert_eq!(
        summary.outcome("bankX"),
        Some(&SourceOutcome::Changed {
            added: 0,
            modified: 0,
            removed: 1
        })
    );
    assert_eq!(env.accepted_ids("bankX").await, vec!["A"]);
    assert_eq!(notifier.messages().len(), 1);
    assert!(notifier.messages()[0].contains("- bankX/company/B"));
}

#[tokio::test]
async fn timed_out_source_leaves_state_and_others_proceed() {
    let env = Env::new();
    env.seed("bankX", &[("A", "v1")]).await;
    // bankY joins on a later run
    let notifier = RecordingNotifier::default();

    let summary = env
        .run(
            vec![
                ScriptedFetcher::hanging("bankX", Duration::from_secs(5)),
                ScriptedFetcher::records("bankY", &[("Z", "v9")]),
            ],
            &notifier,
        )
        .await
        .unwrap();

    match summary.outcome("bankX") {
        Some(SourceOutcome::Failed { phase, error }) => {
            assert_eq!(*phase, Phase::Fetching);
            assert!(error.contains("timed out"), "unexpected error: {error}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(env.accepted_ids("bankX").await, vec!["A"]);
    assert_eq!(env.accepted_body("bankX", "A").await.as_deref(), Some("v1"));

    assert_eq!(summary.outcome("bankY"), Some(&SourceOutcome::Bootstrapped { records: 1 }));
    assert_eq!(env.accepted_ids("bankY").await, vec!["Z"]);

    // only the new source is reported
    let messages = notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("Difference found in bankY"));

    assert!(env.sink.has_level(log::Level::Error, "bankX"));
    assert!(!env.store.slot_exists(Slot::Candidate).await);
}

#[tokio::test]
async fn failed_fetch_does_not_touch_accepted_state() {
    let env = Env::new();
    env.seed("bankX", &[("A", "v1"), ("B", "v2")]).await;

    let notifier = RecordingNotifier::default();
    let summary = env
        .run(vec![ScriptedFetcher::failing("bankX")], &notifier)
        .await
        .unwrap();

    assert!(summary.outcome("bankX").is_some_and(SourceOutcome::is_failure));
    assert_eq!(summary.failed(), 1);
    assert_eq!(env.accepted_ids("bankX").await, vec!["A", "B"]);
    assert!(notifier.messages().is_empty());
}

#[tokio::test]
async fn empty_fetch_is_a_failure_not_a_mass_removal() {
    let env = Env::new();
    env.seed("bankX", &[("A", "v1")]).await;

    let notifier = RecordingNotifier::default();
    let summary = env
        .run(vec![ScriptedFetcher::records("bankX", &[])], &notifier)
        .await
        .unwrap();

    assert!(summary.outcome("bankX").is_some_and(SourceOutcome::is_failure));
    assert_eq!(env.accepted_ids("bankX").await, vec!["A"]);
    assert!(notifier.messages().is_empty());
}

#[tokio::test]
async fn unchanged_run_is_a_no_op() {
    let env = Env::new();
    env.seed("bankX", &[("A", "v1"), ("B", "v2")]).await;
    let before = env.store.read(Slot::Accepted, &key("bankX", "A")).await.unwrap();

    let notifier = RecordingNotifier::default();
    let summary = env
        .run(
            vec![ScriptedFetcher::records("bankX", &[("B", "v2"), ("A", "v1")])],
            &notifier,
        )
        .await
        .unwrap();

    assert_eq!(summary.outcome("bankX"), Some(&SourceOutcome::Unchanged { records: 2 }));
    assert!(notifier.messages().is_empty());
    assert_eq!(env.accepted_ids("bankX").await, vec!["A", "B"]);
    assert_eq!(env.store.read(Slot::Accepted, &key("bankX", "A")).await.unwrap(), before);
    assert!(!env.store.slot_exists(Slot::Candidate).await);
}

#[tokio::test]
async fn duplicate_keys_keep_the_first_record() {
    let env = Env::new();
    let notifier = RecordingNotifier::default();

    let summary = env
        .run(
            vec![ScriptedFetcher::records("bankX", &[("A", "first"), ("A", "second")])],
            &notifier,
        )
        .await
        .unwrap();

    assert_eq!(summary.outcome("bankX"), Some(&SourceOutcome::Bootstrapped { records: 1 }));
    assert_eq!(env.accepted_body("bankX", "A").await.as_deref(), Some("first"));
}

#[tokio::test]
async fn notification_failure_keeps_promoted_state() {
    let env = Env::new();
    env.seed("bankX", &[("A", "v1")]).await;

    let notifier = RecordingNotifier::failing();
    let summary = env
        .run(vec![ScriptedFetcher::records("bankX", &[("A", "v2")])], &notifier)
        .await
        .unwrap();

    assert!(matches!(summary.outcome("bankX"), Some(SourceOutcome::Changed { .. })));
    assert_eq!(env.accepted_body("bankX", "A").await.as_deref(), Some("v2"));
    assert_eq!(notifier.messages().len(), 1);
    assert!(env.sink.has_level(log::Level::Warn, "bankX"));
}

#[tokio::test]
async fn stale_candidate_is_purged_at_start() {
    let env = Env::new();
    env.seed("bankX", &[("A", "v1")]).await;

    // leftovers of an interrupted run
    env.store
        .write(Slot::Candidate, &key("bankX", "GHOST"), b"{}")
        .await
        .unwrap();

    let notifier = RecordingNotifier::default();
    let summary = env
        .run(vec![ScriptedFetcher::records("bankX", &[("A", "v1")])], &notifier)
        .await
        .unwrap();

    assert_eq!(summary.outcome("bankX"), Some(&SourceOutcome::Unchanged { records: 1 }));
    assert_eq!(env.accepted_ids("bankX").await, vec!["A"]);
    assert!(!env.store.slot_exists(Slot::Candidate).await);
}

#[tokio::test]
async fn orphaned_candidate_faults_the_run_but_later_sources_proceed() {
    let env = Env::new();
    let notifier = RecordingNotifier::default();
    env.run(
        vec![
            ScriptedFetcher::records("bankX", &[("A", "v1")]),
            ScriptedFetcher::records("bankY", &[("Z", "v9")]),
        ],
        &notifier,
    )
    .await
    .unwrap();

    let store = OrphaningStore {
        inner: env.store.clone(),
        source: "bankX".into(),
    };
    let report = env
        .report(
            &store,
            vec![
                ScriptedFetcher::records("bankX", &[("A", "v1")]),
                ScriptedFetcher::records("bankY", &[("Z", "v10")]),
            ],
            &notifier,
        )
        .await
        .unwrap();

    assert!(matches!(report.fault, Some(AppError::Reconciliation { .. })));
    match report.summary.outcome("bankX") {
        Some(SourceOutcome::Failed { phase, .. }) => assert_eq!(*phase, Phase::Reconciling),
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(
        report.summary.outcome("bankY"),
        Some(&SourceOutcome::Changed {
            added: 0,
            modified: 1,
            removed: 0
        })
    );
    assert_eq!(env.accepted_body("bankY", "Z").await.as_deref(), Some("v10"));
    assert_eq!(env.accepted_body("bankX", "A").await.as_deref(), Some("v1"));

    let messages = notifier.messages();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].starts_with("Difference found in bankY"));

    // the orphan is kept for inspection and purged by the next run
    assert!(env.store.slot_exists(Slot::Candidate).await);
    let summary = env
        .run(vec![ScriptedFetcher::records("bankX", &[("A", "v1")])], &notifier)
        .await
        .unwrap();
    assert_eq!(summary.outcome("bankX"), Some(&SourceOutcome::Unchanged { records: 1 }));
    assert!(!env.store.slot_exists(Slot::Candidate).await);
}

#[tokio::test]
async fn leftover_candidate_state_faults_the_run_with_summary() {
    let env = Env::new();
    let notifier = RecordingNotifier::default();
    let stray = StrayWriter {
        store: env.store.clone(),
        records: vec![record("bankX", "A", "v1")],
    };

    let report = env
        .report(&env.store, vec![Box::new(stray)], &notifier)
        .await
        .unwrap();

    assert!(matches!(report.fault, Some(AppError::Reconciliation { .. })));
    assert_eq!(
        report.summary.outcome("bankX"),
        Some(&SourceOutcome::Bootstrapped { records: 1 })
    );
    assert_eq!(env.accepted_ids("bankX").await, vec!["A"]);
    assert!(env.sink.has_level(log::Level::Error, "run"));
}

#[tokio::test]
async fn sources_sharing_a_storage_name_do_not_overwrite_each_other() {
    let env = Env::new();
    let notifier = RecordingNotifier::default();
    let fetchers = || {
        vec![
            ScriptedFetcher::records("bankX", &[("A", "v1")]),
            ScriptedFetcher::records("bankX", &[("B", "v2")]),
        ]
    };

    let summary = env.run(fetchers(), &notifier).await.unwrap();
    assert_eq!(summary.outcomes.len(), 2);
    assert_eq!(summary.outcomes[0].1, SourceOutcome::Bootstrapped { records: 1 });
    assert!(summary.outcomes[1].1.is_failure());

    let summary = env.run(fetchers(), &notifier).await.unwrap();
    assert_eq!(summary.outcomes[0].1, SourceOutcome::Unchanged { records: 1 });
    assert!(summary.outcomes[1].1.is_failure());

    assert_eq!(env.accepted_ids("bankX").await, vec!["A"]);
    assert!(notifier.messages().is_empty());
}
