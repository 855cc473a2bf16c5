//! Stage ledger stored in a table of the target schema.
//!
//! The table is named `state_logs_<target_schema><source_database>` and
//! holds one row per completed stage:
//!
//! ```sql
//! CREATE TABLE "<schema>"."state_logs_<schema><db>" (
//!     stage_name   TEXT PRIMARY KEY,
//!     completed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! )
//! ```
//!
//! All access goes through the query executor, so the ledger shares the
//! target pool with the stages themselves.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::{Stage, StateStore};
use crate::error::{MigrateError, Result};
use crate::executor::{QueryExecutor, QueryRequest};
use crate::run::MigrationRun;
use crate::sql::qualify;

/// Ledger backed by the PostgreSQL target.
pub struct DbStateStore {
    executor: Arc<dyn QueryExecutor>,
}

impl DbStateStore {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self { executor }
    }

    fn ledger(run: &MigrationRun) -> String {
        qualify(&run.target_schema, &run.state_table_name())
    }

    async fn create_if_missing(&self, run: &MigrationRun) -> Result<()> {
        let sql = format!(
            "CREATE SCHEMA IF NOT EXISTS {schema};
             CREATE TABLE IF NOT EXISTS {ledger} (
                 stage_name TEXT PRIMARY KEY,
                 completed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
             )",
            schema = crate::sql::quote_ident(&run.target_schema),
            ledger = Self::ledger(run),
        );
        self.executor
            .query(QueryRequest::target("DbStateStore::create_if_missing", sql))
            .await
            .map_err(state_error)?;
        Ok(())
    }
}

fn state_error(e: MigrateError) -> MigrateError {
    MigrateError::State(e.to_string())
}

#[async_trait]
impl StateStore for DbStateStore {
    /// A failing existence check ends the process: without the ledger no
    /// stage can be gated.
    async fn state_table_exists(&self, run: &MigrationRun) -> Result<bool> {
        let rows = self
            .executor
            .query(
                QueryRequest::target(
                    "DbStateStore::state_table_exists",
                    "SELECT EXISTS(
                        SELECT 1 FROM information_schema.tables
                        WHERE table_schema = $1 AND table_name = $2
                     ) AS exists",
                )
                .bind(&run.target_schema)
                .bind(run.state_table_name())
                .exit_on_error(),
            )
            .await
            .map_err(state_error)?;

        Ok(rows
            .first()
            .and_then(|row| row.get_bool("exists"))
            .unwrap_or(false))
    }

    async fn is_stage_complete(&self, run: &MigrationRun, stage: Stage) -> Result<bool> {
        if !self.state_table_exists(run).await? {
            return Ok(false);
        }

        let sql = format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE stage_name = $1) AS complete",
            Self::ledger(run)
        );
        let rows = self
            .executor
            .query(QueryRequest::target("DbStateStore::is_stage_complete", sql).bind(stage.as_str()))
            .await
            .map_err(state_error)?;

        let complete = rows
            .first()
            .and_then(|row| row.get_bool("complete"))
            .unwrap_or(false);
        debug!("Stage {} complete: {}", stage, complete);
        Ok(complete)
    }

    async fn mark_stages_complete(&self, run: &MigrationRun, stages: &[Stage]) -> Result<()> {
        self.create_if_missing(run).await?;

        let sql = format!(
            "INSERT INTO {} (stage_name, completed_at) VALUES ($1, NOW())
             ON CONFLICT (stage_name) DO UPDATE SET completed_at = EXCLUDED.completed_at",
            Self::ledger(run)
        );
        for stage in stages {
            self.executor
                .query(
                    QueryRequest::target("DbStateStore::mark_stages_complete", sql.as_str())
                        .bind(stage.as_str()),
                )
                .await
                .map_err(state_error)?;
            debug!("Recorded stage {} as complete", stage);
        }
        Ok(())
    }

    async fn drop_state_table(&self, run: &MigrationRun) -> Result<()> {
        self.executor
            .query(QueryRequest::target(
                "DbStateStore::drop_state_table",
                format!("DROP TABLE IF EXISTS {}", Self::ledger(run)),
            ))
            .await
            .map_err(|e| MigrateError::Teardown {
                table: Self::ledger(run),
                message: e.to_string(),
            })?;
        Ok(())
    }
}
