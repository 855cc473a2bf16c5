//! Orchestrator integration tests.
//!
//! Every collaborator is a recording stub and the ledger is the in-memory
//! store, so these tests exercise stage sequencing, checkpointing, barrier
//! semantics and teardown without a database.

use async_trait::async_trait;
use mysql_pg_migrate::{
    DataTransfer, MemoryStateStore, MigrateError, MigrationRun, Orchestrator, Reporter, Result,
    RunStage, Stage, StageSet, StateStore, TableStage,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// =============================================================================
// Recording stubs
// =============================================================================

#[derive(Clone, Default)]
struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.entries()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    fn position(&self, entry: &str) -> usize {
        self.entries()
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("{} was never called", entry))
    }
}

struct StubTransfer {
    log: CallLog,
    fail_drop: AtomicBool,
}

#[async_trait]
impl DataTransfer for StubTransfer {
    async fn run(&self, run: &MigrationRun) -> Result<()> {
        for table in &run.tables {
            self.log.push(format!("transfer:{}", table));
        }
        Ok(())
    }

    async fn drop_staging(&self, _run: &MigrationRun) -> Result<()> {
        self.log.push("drop_staging");
        if self.fail_drop.swap(false, Ordering::SeqCst) {
            return Err(MigrateError::Teardown {
                table: "data_pool".into(),
                message: "permission denied".into(),
            });
        }
        Ok(())
    }
}

/// Per-table stub. Fails for `fail_on` while `failing` is set and never
/// completes for `hang_on`.
struct StubTableStage {
    name: &'static str,
    log: CallLog,
    fail_on: Option<&'static str>,
    failing: AtomicBool,
    hang_on: Option<&'static str>,
}

impl StubTableStage {
    fn new(name: &'static str, log: &CallLog) -> Self {
        Self {
            name,
            log: log.clone(),
            fail_on: None,
            failing: AtomicBool::new(false),
            hang_on: None,
        }
    }

    fn failing_on(mut self, table: &'static str) -> Self {
        self.fail_on = Some(table);
        self.failing = AtomicBool::new(true);
        self
    }

    fn hanging_on(mut self, table: &'static str) -> Self {
        self.hang_on = Some(table);
        self
    }
}

#[async_trait]
impl TableStage for StubTableStage {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn apply(&self, _run: &MigrationRun, table: &str) -> Result<()> {
        // Let sibling tables interleave.
        tokio::task::yield_now().await;
        if self.hang_on == Some(table) {
            std::future::pending::<()>().await;
        }
        self.log.push(format!("{}:{}", self.name, table));
        if self.fail_on == Some(table) && self.failing.load(Ordering::SeqCst) {
            return Err(MigrateError::table_stage(self.name, table, "injected failure"));
        }
        Ok(())
    }
}

/// Cross-table stub. Fails while `failing` is set.
struct StubRunStage {
    name: &'static str,
    log: CallLog,
    failing: AtomicBool,
}

impl StubRunStage {
    fn new(name: &'static str, log: &CallLog) -> Self {
        Self {
            name,
            log: log.clone(),
            failing: AtomicBool::new(false),
        }
    }

    fn failing(self) -> Self {
        self.failing.store(true, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl RunStage for StubRunStage {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn apply(&self, _run: &MigrationRun) -> Result<()> {
        self.log.push(self.name);
        if self.failing.load(Ordering::SeqCst) {
            return Err(MigrateError::stage(self.name, "injected failure"));
        }
        Ok(())
    }
}

struct StubReporter {
    log: CallLog,
}

impl Reporter for StubReporter {
    fn emit(&self, _run: &MigrationRun, message: &str) {
        self.log.push(format!("report:{}", message));
    }
}

/// Memory ledger whose first drop fails.
struct FlakyDropStore {
    inner: MemoryStateStore,
    fail_drop: AtomicBool,
}

#[async_trait]
impl StateStore for FlakyDropStore {
    async fn state_table_exists(&self, run: &MigrationRun) -> Result<bool> {
        self.inner.state_table_exists(run).await
    }

    async fn is_stage_complete(&self, run: &MigrationRun, stage: Stage) -> Result<bool> {
        self.inner.is_stage_complete(run, stage).await
    }

    async fn mark_stages_complete(&self, run: &MigrationRun, stages: &[Stage]) -> Result<()> {
        self.inner.mark_stages_complete(run, stages).await
    }

    async fn drop_state_table(&self, run: &MigrationRun) -> Result<()> {
        if self.fail_drop.swap(false, Ordering::SeqCst) {
            return Err(MigrateError::Teardown {
                table: run.state_table_name(),
                message: "connection reset".into(),
            });
        }
        self.inner.drop_state_table(run).await
    }
}

// =============================================================================
// Fixtures
// =============================================================================

const CHAIN: [&str; 6] = ["enum", "null", "default", "sequence", "index", "comment"];

fn stage_set(log: &CallLog) -> StageSet {
    let table = |name| Arc::new(StubTableStage::new(name, log)) as Arc<dyn TableStage>;
    let whole = |name| Arc::new(StubRunStage::new(name, log)) as Arc<dyn RunStage>;
    StageSet {
        transfer: Arc::new(StubTransfer {
            log: log.clone(),
            fail_drop: AtomicBool::new(false),
        }),
        enums: table("enum"),
        nulls: table("null"),
        defaults: table("default"),
        sequences: table("sequence"),
        indexes: table("index"),
        comments: table("comment"),
        sequence_resync: table("sequence_resync"),
        foreign_keys: whole("foreign_keys"),
        views: whole("views"),
        reclaim: whole("reclaim"),
        reporter: Arc::new(StubReporter { log: log.clone() }),
    }
}

fn run_of(tables: &[&str]) -> MigrationRun {
    MigrationRun::new(
        "shop",
        "public",
        tables.iter().map(|t| t.to_string()).collect(),
    )
}

// =============================================================================
// Full run
// =============================================================================

#[tokio::test]
async fn test_full_run_call_sequence() {
    let log = CallLog::default();
    let state = Arc::new(MemoryStateStore::new());
    let orchestrator = Orchestrator::new(state.clone(), stage_set(&log));
    let run = run_of(&["orders", "users"]);

    let summary = orchestrator.run(&run).await.unwrap();

    // Data first, for both tables.
    assert_eq!(log.count("transfer:"), 2);
    let last_transfer = log.position("transfer:users").max(log.position("transfer:orders"));

    // Chain order within each table.
    for table in ["orders", "users"] {
        let positions: Vec<usize> = CHAIN
            .iter()
            .map(|step| log.position(&format!("{}:{}", step, table)))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{:?}", positions);
        assert!(positions[0] > last_transfer);
    }

    // Cross-table stages only after every table finished its chain.
    let fk = log.position("foreign_keys");
    assert!(log.position("comment:orders") < fk);
    assert!(log.position("comment:users") < fk);
    assert!(fk < log.position("views"));
    assert!(log.position("views") < log.position("reclaim"));
    assert!(log.position("reclaim") < log.position("drop_staging"));
    assert_eq!(log.count("report:"), 1);
    assert_eq!(
        log.entries().last().map(String::as_str),
        Some("report:Migration is accomplished.")
    );

    // Ledger is gone after success.
    assert!(!state.state_table_exists(&run).await.unwrap());
    assert_eq!(log.count("sequence_resync:"), 0);
    assert_eq!(
        summary.stages_executed,
        vec![
            Stage::TablesLoaded,
            Stage::PerTableConstraintsLoaded,
            Stage::ForeignKeysLoaded,
            Stage::ViewsLoaded,
            Stage::StorageReclaimed,
        ]
    );
    assert!(summary.stages_skipped.is_empty());
}

#[tokio::test]
async fn test_tables_run_concurrently() {
    let log = CallLog::default();
    let orchestrator = Orchestrator::new(Arc::new(MemoryStateStore::new()), stage_set(&log));
    let run = run_of(&["a", "b", "c"]);

    orchestrator.run(&run).await.unwrap();

    // With interleaving, some other table starts before "a" finishes its chain.
    let first_enum_b = log.position("enum:b");
    let last_comment_a = log.position("comment:a");
    assert!(first_enum_b < last_comment_a);
}

// =============================================================================
// Resume
// =============================================================================

#[tokio::test]
async fn test_completed_stages_are_not_rerun() {
    let log = CallLog::default();
    let state = Arc::new(MemoryStateStore::new());
    let run = run_of(&["users"]);
    state
        .mark_stages_complete(
            &run,
            &[
                Stage::TablesLoaded,
                Stage::PerTableConstraintsLoaded,
                Stage::ForeignKeysLoaded,
            ],
        )
        .await
        .unwrap();

    let orchestrator = Orchestrator::new(state.clone(), stage_set(&log));
    let summary = orchestrator.run(&run).await.unwrap();

    assert_eq!(log.count("transfer:"), 0);
    for step in CHAIN {
        assert_eq!(log.count(&format!("{}:", step)), 0, "{} reran", step);
    }
    assert_eq!(log.count("foreign_keys"), 0);
    assert_eq!(log.count("views"), 1);
    assert_eq!(log.count("reclaim"), 1);
    assert_eq!(
        summary.stages_skipped,
        vec![
            Stage::TablesLoaded,
            Stage::PerTableConstraintsLoaded,
            Stage::ForeignKeysLoaded,
        ]
    );
    assert_eq!(
        summary.stages_executed,
        vec![Stage::ViewsLoaded, Stage::StorageReclaimed]
    );
}

#[tokio::test]
async fn test_failed_table_blocks_stage_and_rerun_retries_all_tables() {
    let log = CallLog::default();
    let state = Arc::new(MemoryStateStore::new());
    let run = run_of(&["customers", "orders", "users"]);

    let flaky = Arc::new(StubTableStage::new("default", &log).failing_on("orders"));
    let mut stages = stage_set(&log);
    stages.defaults = flaky.clone() as Arc<dyn TableStage>;
    let orchestrator = Orchestrator::new(state.clone(), stages);

    let err = orchestrator.run(&run).await.unwrap_err();
    match &err {
        MigrateError::Barrier { stage, failures } => {
            assert_eq!(stage, "per_table_constraints_loaded");
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].0, "orders");
        }
        other => panic!("expected barrier error, got {:?}", other),
    }
    assert_eq!(err.exit_code(), 3);

    // Siblings ran to completion; nothing after the barrier started.
    assert_eq!(log.count("comment:customers"), 1);
    assert_eq!(log.count("comment:users"), 1);
    assert_eq!(log.count("sequence:orders"), 0);
    assert_eq!(log.count("foreign_keys"), 0);
    assert_eq!(log.count("report:"), 0);
    assert_eq!(state.completed(&run), vec![Stage::TablesLoaded]);

    // Rerun: the whole stage is redone, tables already finished included.
    flaky.failing.store(false, Ordering::SeqCst);
    orchestrator.run(&run).await.unwrap();

    assert_eq!(log.count("transfer:"), 3);
    assert_eq!(log.count("enum:customers"), 2);
    assert_eq!(log.count("comment:users"), 2);
    assert_eq!(log.count("comment:orders"), 1);
    assert_eq!(log.count("foreign_keys"), 1);
    assert_eq!(log.count("report:"), 1);
}

/// Fail the cross-table stage `name` once, then rerun. The failed stage's
/// row stays unwritten and the rerun resumes exactly there.
async fn assert_resumes_at(name: &'static str, failed: Stage, recorded_before: &[Stage]) {
    let log = CallLog::default();
    let state = Arc::new(MemoryStateStore::new());
    let run = run_of(&["orders", "users"]);

    let flaky = Arc::new(StubRunStage::new(name, &log).failing());
    let mut stages = stage_set(&log);
    let slot = match failed {
        Stage::ForeignKeysLoaded => &mut stages.foreign_keys,
        Stage::ViewsLoaded => &mut stages.views,
        Stage::StorageReclaimed => &mut stages.reclaim,
        other => panic!("{} is not a cross-table stage", other),
    };
    *slot = flaky.clone() as Arc<dyn RunStage>;
    let orchestrator = Orchestrator::new(state.clone(), stages);

    let err = orchestrator.run(&run).await.unwrap_err();
    assert!(
        matches!(&err, MigrateError::Stage { stage, .. } if stage == name),
        "{:?}",
        err
    );
    assert_eq!(err.exit_code(), 3);
    assert_eq!(state.completed(&run), recorded_before.to_vec());
    assert!(!state.is_stage_complete(&run, failed).await.unwrap());
    assert_eq!(log.count(name), 1);
    assert_eq!(log.count("drop_staging"), 0);
    assert_eq!(log.count("report:"), 0);

    flaky.failing.store(false, Ordering::SeqCst);
    let summary = orchestrator.run(&run).await.unwrap();

    // Earlier stages are skipped; the failed one runs exactly once more.
    assert_eq!(summary.stages_skipped, recorded_before.to_vec());
    assert_eq!(summary.stages_executed.first(), Some(&failed));
    assert_eq!(log.count(name), 2);
    assert_eq!(log.count("transfer:"), 2);
    assert_eq!(log.count("comment:orders"), 1);
    assert_eq!(log.count("report:"), 1);
    assert!(!state.state_table_exists(&run).await.unwrap());
}

#[tokio::test]
async fn test_foreign_key_failure_resumes_at_foreign_keys() {
    assert_resumes_at(
        "foreign_keys",
        Stage::ForeignKeysLoaded,
        &[Stage::TablesLoaded, Stage::PerTableConstraintsLoaded],
    )
    .await;
}

#[tokio::test]
async fn test_view_failure_resumes_at_views() {
    assert_resumes_at(
        "views",
        Stage::ViewsLoaded,
        &[
            Stage::TablesLoaded,
            Stage::PerTableConstraintsLoaded,
            Stage::ForeignKeysLoaded,
        ],
    )
    .await;
}

#[tokio::test]
async fn test_reclaim_failure_resumes_at_reclaim() {
    assert_resumes_at(
        "reclaim",
        Stage::StorageReclaimed,
        &[
            Stage::TablesLoaded,
            Stage::PerTableConstraintsLoaded,
            Stage::ForeignKeysLoaded,
            Stage::ViewsLoaded,
        ],
    )
    .await;
}

#[tokio::test(start_paused = true)]
async fn test_hanging_table_blocks_foreign_keys() {
    let log = CallLog::default();
    let state = Arc::new(MemoryStateStore::new());
    let run = run_of(&["t1", "t2", "t3"]);

    let mut stages = stage_set(&log);
    stages.indexes =
        Arc::new(StubTableStage::new("index", &log).hanging_on("t3")) as Arc<dyn TableStage>;
    let orchestrator = Orchestrator::new(state.clone(), stages);

    let outcome = tokio::time::timeout(Duration::from_secs(60), orchestrator.run(&run)).await;
    assert!(outcome.is_err(), "run should still be waiting on t3");

    assert_eq!(log.count("comment:t1"), 1);
    assert_eq!(log.count("comment:t2"), 1);
    assert_eq!(log.count("sequence:t3"), 1);
    assert_eq!(log.count("comment:t3"), 0);
    assert_eq!(log.count("foreign_keys"), 0);
    assert!(!state
        .is_stage_complete(&run, Stage::PerTableConstraintsLoaded)
        .await
        .unwrap());
}

// =============================================================================
// Data-only mode
// =============================================================================

#[tokio::test]
async fn test_data_only_resyncs_sequences_and_skips_structure() {
    let log = CallLog::default();
    let state = Arc::new(MemoryStateStore::new());
    let orchestrator = Orchestrator::new(state.clone(), stage_set(&log));
    let run = run_of(&["orders", "users"]).with_data_only(true);

    let summary = orchestrator.run(&run).await.unwrap();

    assert_eq!(log.count("transfer:"), 2);
    assert_eq!(log.count("sequence_resync:orders"), 1);
    assert_eq!(log.count("sequence_resync:users"), 1);
    for step in CHAIN {
        assert_eq!(log.count(&format!("{}:", step)), 0, "{} ran in data-only mode", step);
    }
    assert_eq!(log.count("foreign_keys"), 0);
    assert_eq!(log.count("views"), 0);
    assert_eq!(log.count("reclaim"), 1);
    assert_eq!(log.count("report:"), 1);

    let executed: HashSet<Stage> = summary.stages_executed.into_iter().collect();
    assert!(executed.contains(&Stage::PerTableConstraintsLoaded));
    assert!(executed.contains(&Stage::ForeignKeysLoaded));
    assert!(executed.contains(&Stage::ViewsLoaded));
    assert!(summary.data_only);
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test]
async fn test_teardown_failure_keeps_ledger_and_rerun_skips_reclaim() {
    let log = CallLog::default();
    let state = Arc::new(FlakyDropStore {
        inner: MemoryStateStore::new(),
        fail_drop: AtomicBool::new(true),
    });
    let orchestrator = Orchestrator::new(state.clone(), stage_set(&log));
    let run = run_of(&["users"]);

    let err = orchestrator.run(&run).await.unwrap_err();
    assert!(matches!(err, MigrateError::Teardown { .. }));
    assert_eq!(err.exit_code(), 5);
    assert_eq!(log.count("reclaim"), 1);
    assert_eq!(log.count("report:"), 0);
    assert!(state
        .is_stage_complete(&run, Stage::StorageReclaimed)
        .await
        .unwrap());

    // Restart: everything is recorded, only teardown and the report remain.
    let summary = orchestrator.run(&run).await.unwrap();
    assert_eq!(log.count("reclaim"), 1);
    assert_eq!(log.count("transfer:"), 1);
    assert_eq!(log.count("drop_staging"), 2);
    assert_eq!(log.count("report:"), 1);
    assert!(summary.stages_executed.is_empty());
    assert!(!state.state_table_exists(&run).await.unwrap());
}

#[tokio::test]
async fn test_staging_drop_failure_is_teardown_error() {
    let log = CallLog::default();
    let state = Arc::new(MemoryStateStore::new());
    let stages = StageSet {
        transfer: Arc::new(StubTransfer {
            log: log.clone(),
            fail_drop: AtomicBool::new(true),
        }),
        ..stage_set(&log)
    };
    let orchestrator = Orchestrator::new(state.clone(), stages);
    let run = run_of(&["users"]);

    let err = orchestrator.run(&run).await.unwrap_err();
    assert_eq!(err.exit_code(), 5);
    // Staging drop failed first, so the ledger was left for the restart.
    assert!(state.state_table_exists(&run).await.unwrap());
    assert_eq!(log.count("report:"), 0);
}

#[tokio::test]
async fn test_finalize_alone_skips_transfer() {
    let log = CallLog::default();
    let state = Arc::new(MemoryStateStore::new());
    let orchestrator = Orchestrator::new(state, stage_set(&log));
    let run = run_of(&["users"]);

    orchestrator.finalize(&run).await.unwrap();

    assert_eq!(log.count("transfer:"), 0);
    assert_eq!(log.count("comment:users"), 1);
    assert_eq!(log.count("report:"), 1);
}
