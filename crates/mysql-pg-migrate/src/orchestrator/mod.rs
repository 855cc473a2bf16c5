//! Migration orchestrator: the resumable stage sequencer.
//!
//! ```text
//! BOOTED -> TABLES_LOADED -> PER_TABLE_FINALIZED -> FOREIGN_KEYS_LOADED
//!        -> VIEWS_LOADED -> RECLAIMED -> LEDGER_CLEARED
//! ```
//!
//! Every state is gated by its ledger row and skipped when already recorded.
//! A stage is recorded only after all of its work succeeded, so a failed run
//! restarts from the first unrecorded stage and redoes it whole.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::error::{MigrateError, Result};
use crate::run::MigrationRun;
use crate::stages::{for_each_table, RunStage, StageSet};
use crate::state::{Stage, StateStore};

/// Message of the single completion report.
const COMPLETION_MESSAGE: &str = "Migration is accomplished.";

/// Drives one run through every stage.
pub struct Orchestrator {
    state: Arc<dyn StateStore>,
    stages: StageSet,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationSummary {
    /// Unique run identifier.
    pub run_id: String,

    pub source_database: String,

    pub target_schema: String,

    /// Tables in the run.
    pub tables: Vec<String>,

    pub data_only: bool,

    /// Stages recorded by this invocation.
    pub stages_executed: Vec<Stage>,

    /// Stages found already recorded and skipped.
    pub stages_skipped: Vec<Stage>,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,
}

impl MigrationSummary {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Default)]
struct Progress {
    executed: Vec<Stage>,
    skipped: Vec<Stage>,
}

impl Progress {
    fn into_summary(self, run: &MigrationRun) -> MigrationSummary {
        let completed_at = Utc::now();
        MigrationSummary {
            run_id: run.run_id.to_string(),
            source_database: run.source_database.clone(),
            target_schema: run.target_schema.clone(),
            tables: run.tables.clone(),
            data_only: run.data_only,
            stages_executed: self.executed,
            stages_skipped: self.skipped,
            started_at: run.started_at,
            completed_at,
            duration_seconds: (completed_at - run.started_at).num_milliseconds() as f64 / 1000.0,
        }
    }
}

impl Orchestrator {
    pub fn new(state: Arc<dyn StateStore>, stages: StageSet) -> Self {
        Self { state, stages }
    }

    /// Full pipeline: data transfer, then [`finalize`](Self::finalize).
    pub async fn run(&self, run: &MigrationRun) -> Result<MigrationSummary> {
        info!(
            "Starting migration run {}: {} tables from {} into schema {}",
            run.run_id,
            run.tables.len(),
            run.source_database,
            run.target_schema
        );
        let mut progress = Progress::default();
        self.transfer(run, &mut progress).await?;
        self.finalize_stages(run, &mut progress).await?;
        Ok(progress.into_summary(run))
    }

    /// Everything after the data transfer, which must already have completed.
    pub async fn finalize(&self, run: &MigrationRun) -> Result<MigrationSummary> {
        let mut progress = Progress::default();
        self.finalize_stages(run, &mut progress).await?;
        Ok(progress.into_summary(run))
    }

    async fn transfer(&self, run: &MigrationRun, progress: &mut Progress) -> Result<()> {
        if self.is_complete(run, Stage::TablesLoaded, progress).await? {
            return Ok(());
        }
        info!("Stage {}: transferring data", Stage::TablesLoaded);
        self.stages
            .transfer
            .run(run)
            .await
            .inspect_err(|e| error!(stage = %Stage::TablesLoaded, "{}", e))?;
        self.mark(run, &[Stage::TablesLoaded], progress).await
    }

    async fn finalize_stages(&self, run: &MigrationRun, progress: &mut Progress) -> Result<()> {
        let per_table_done = self
            .state
            .is_stage_complete(run, Stage::PerTableConstraintsLoaded)
            .await?;

        if run.data_only {
            info!("Data-only run: resynchronizing sequences");
            let resync = self.stages.sequence_resync.clone();
            for_each_table(resync.name(), &run.tables, |table| {
                let resync = &resync;
                async move { resync.apply(run, table).await }
            })
            .await
            .inspect_err(|e| error!(stage = "sequence_resync", "{}", e))?;

            self.mark(
                run,
                &[
                    Stage::PerTableConstraintsLoaded,
                    Stage::ForeignKeysLoaded,
                    Stage::ViewsLoaded,
                ],
                progress,
            )
            .await?;
        } else {
            if per_table_done {
                info!("Stage {} already complete, skipping", Stage::PerTableConstraintsLoaded);
                progress.skipped.push(Stage::PerTableConstraintsLoaded);
            } else {
                self.finalize_tables(run).await?;
                self.mark(run, &[Stage::PerTableConstraintsLoaded], progress)
                    .await?;
            }

            self.run_gated(run, Stage::ForeignKeysLoaded, &self.stages.foreign_keys, progress)
                .await?;
            self.run_gated(run, Stage::ViewsLoaded, &self.stages.views, progress)
                .await?;
        }

        self.run_gated(run, Stage::StorageReclaimed, &self.stages.reclaim, progress)
            .await?;

        self.teardown(run).await?;
        self.stages.reporter.emit(run, COMPLETION_MESSAGE);
        Ok(())
    }

    /// Per-table fan-out: the finalization chain runs in order within each
    /// table, tables concurrently, and every table is awaited.
    async fn finalize_tables(&self, run: &MigrationRun) -> Result<()> {
        let stage = Stage::PerTableConstraintsLoaded;
        info!("Stage {}: finalizing {} tables", stage, run.tables.len());

        let chain = self.stages.finalization_chain();
        for_each_table(stage.as_str(), &run.tables, |table| {
            let chain = &chain;
            async move {
                for step in chain.iter() {
                    step.apply(run, table).await?;
                }
                Ok(())
            }
        })
        .await
        .inspect_err(|e| error!(stage = %stage, "{}", e))
    }

    async fn run_gated(
        &self,
        run: &MigrationRun,
        stage: Stage,
        work: &Arc<dyn RunStage>,
        progress: &mut Progress,
    ) -> Result<()> {
        if self.is_complete(run, stage, progress).await? {
            return Ok(());
        }
        info!("Stage {}: running {}", stage, work.name());
        work.apply(run)
            .await
            .inspect_err(|e| error!(stage = %stage, "{}", e))?;
        self.mark(run, &[stage], progress).await
    }

    async fn is_complete(
        &self,
        run: &MigrationRun,
        stage: Stage,
        progress: &mut Progress,
    ) -> Result<bool> {
        let complete = self.state.is_stage_complete(run, stage).await?;
        if complete {
            info!("Stage {} already complete, skipping", stage);
            progress.skipped.push(stage);
        }
        Ok(complete)
    }

    async fn mark(&self, run: &MigrationRun, stages: &[Stage], progress: &mut Progress) -> Result<()> {
        self.state.mark_stages_complete(run, stages).await?;
        progress.executed.extend_from_slice(stages);
        Ok(())
    }

    /// Drop the staging table, then the ledger. The ledger goes last: once it
    /// is gone a crash has nothing to resume from.
    async fn teardown(&self, run: &MigrationRun) -> Result<()> {
        let outcome = async {
            self.stages.transfer.drop_staging(run).await?;
            self.state.drop_state_table(run).await
        }
        .await;

        outcome.map_err(|e| {
            let e = match e {
                MigrateError::Teardown { .. } => e,
                other => MigrateError::Teardown {
                    table: run.state_table_name(),
                    message: other.to_string(),
                },
            };
            error!("{}", e);
            e
        })
    }
}
