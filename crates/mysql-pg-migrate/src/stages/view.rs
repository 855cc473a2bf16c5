//! View (re)creation.
//!
//! Views are best-effort: a definition PostgreSQL rejects is logged and its
//! translated SQL saved under `<logs_dir>/not_created_views/` for manual
//! repair, and the stage carries on.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use super::RunStage;
use crate::error::{MigrateError, Result};
use crate::executor::{QueryExecutor, QueryRequest};
use crate::run::MigrationRun;
use crate::sql::qualify;

pub struct ViewStage {
    executor: Arc<dyn QueryExecutor>,
}

impl ViewStage {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self { executor }
    }

    async fn load_views(&self, run: &MigrationRun) -> Result<Vec<(String, String)>> {
        let rows = self
            .executor
            .query(
                QueryRequest::source(
                    "view::load_views",
                    "SELECT CAST(TABLE_NAME AS CHAR(255)) AS TABLE_NAME, \
                            CAST(VIEW_DEFINITION AS CHAR) AS VIEW_DEFINITION \
                     FROM information_schema.VIEWS \
                     WHERE TABLE_SCHEMA = ? \
                     ORDER BY TABLE_NAME",
                )
                .bind(&run.source_database),
            )
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                Some((
                    row.get_str("TABLE_NAME")?.to_string(),
                    row.get_str("VIEW_DEFINITION")?.to_string(),
                ))
            })
            .collect())
    }

    async fn save_failed_view(&self, run: &MigrationRun, view: &str, sql: &str) {
        let dir = not_created_dir(run);
        let path = dir.join(format!("{}.sql", view));
        let written = async {
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(&path, sql).await
        }
        .await;
        if let Err(e) = written {
            warn!("Could not save definition of view {} to {:?}: {}", view, path, e);
        }
    }
}

#[async_trait]
impl RunStage for ViewStage {
    fn name(&self) -> &'static str {
        "views"
    }

    async fn apply(&self, run: &MigrationRun) -> Result<()> {
        let views = self
            .load_views(run)
            .await
            .map_err(|e| MigrateError::stage(self.name(), e))?;
        info!("Creating {} views", views.len());

        let mut failed = 0;
        for (view, definition) in &views {
            let sql = create_view_sql(run, view, definition);
            let outcome = self
                .executor
                .query(QueryRequest::target(format!("view::{}", view), sql.as_str()))
                .await;
            if let Err(e) = outcome {
                failed += 1;
                warn!("View {} was not created: {}", view, e);
                self.save_failed_view(run, view, &sql).await;
            }
        }

        if failed > 0 {
            warn!(
                "{} of {} views were not created; definitions saved to {:?}",
                failed,
                views.len(),
                not_created_dir(run)
            );
        }
        Ok(())
    }
}

fn not_created_dir(run: &MigrationRun) -> PathBuf {
    run.logs_dir.join("not_created_views")
}

fn create_view_sql(run: &MigrationRun, view: &str, definition: &str) -> String {
    format!(
        "CREATE OR REPLACE VIEW {} AS {}",
        qualify(&run.target_schema, view),
        rewrite_view_definition(definition, &run.source_database, &run.target_schema)
    )
}

/// Point a MySQL view body at the target schema and switch to
/// PostgreSQL identifier quoting.
pub(crate) fn rewrite_view_definition(definition: &str, source_db: &str, target_schema: &str) -> String {
    let qualifier = format!("`{}`.", source_db);
    let target_qualifier = format!("\"{}\".", target_schema.replace('"', "\"\""));
    definition
        .replace(&qualifier, &target_qualifier)
        .replace('`', "\"")
}
