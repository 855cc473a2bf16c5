//! Storage reclamation after bulk load and DDL.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::{for_each_table, RunStage};
use crate::error::{MigrateError, Result};
use crate::executor::{QueryExecutor, QueryRequest};
use crate::run::MigrationRun;
use crate::sql::qualify;

/// `VACUUM (FULL, ANALYZE)` on every migrated table, tables concurrently.
pub struct ReclaimStage {
    executor: Arc<dyn QueryExecutor>,
}

impl ReclaimStage {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self { executor }
    }

    async fn vacuum(&self, run: &MigrationRun, table: &str) -> Result<()> {
        self.executor
            .query(QueryRequest::target(
                format!("reclaim::{}", table),
                vacuum_sql(run, table),
            ))
            .await
            .map_err(|e| MigrateError::table_stage(self.name(), table, e))?;
        debug!("Vacuumed {}", table);
        Ok(())
    }
}

#[async_trait]
impl RunStage for ReclaimStage {
    fn name(&self) -> &'static str {
        "reclaim"
    }

    async fn apply(&self, run: &MigrationRun) -> Result<()> {
        info!("Running VACUUM FULL ANALYZE on {} tables", run.tables.len());
        for_each_table(self.name(), &run.tables, |table| self.vacuum(run, table)).await
    }
}

fn vacuum_sql(run: &MigrationRun, table: &str) -> String {
    format!("VACUUM (FULL, ANALYZE) {}", qualify(&run.target_schema, table))
}
