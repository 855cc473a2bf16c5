//! Primary keys and secondary indexes.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use super::catalog::{self, IndexInfo};
use super::schema::apply_ddl;
use super::TableStage;
use crate::error::Result;
use crate::executor::QueryExecutor;
use crate::run::MigrationRun;
use crate::sql::{pg_name, qualify, quote_ident};

pub struct IndexStage {
    executor: Arc<dyn QueryExecutor>,
}

impl IndexStage {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl TableStage for IndexStage {
    fn name(&self) -> &'static str {
        "index"
    }

    async fn apply(&self, run: &MigrationRun, table: &str) -> Result<()> {
        let indexes = catalog::load_indexes(self.executor.as_ref(), run, table).await?;
        let statements = index_statements(run, table, &indexes);
        apply_ddl(self.executor.as_ref(), self.name(), table, statements).await
    }
}

fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn index_statements(run: &MigrationRun, table: &str, indexes: &[IndexInfo]) -> Vec<String> {
    let target = qualify(&run.target_schema, table);
    let mut statements = Vec::new();

    for index in indexes {
        if index.is_primary() {
            let constraint = quote_ident(&pg_name(&format!("{}_pkey", table)));
            statements.push(format!(
                "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
                target, constraint
            ));
            statements.push(format!(
                "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY ({})",
                target,
                constraint,
                column_list(&index.columns)
            ));
            continue;
        }

        let method = match index.index_type.as_str() {
            "BTREE" => "btree",
            "HASH" => "hash",
            "SPATIAL" => "gist",
            other => {
                warn!(
                    "Skipping {} index {} on {}: no PostgreSQL equivalent",
                    other, index.name, table
                );
                continue;
            }
        };

        statements.push(format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} USING {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            quote_ident(&pg_name(&format!("{}_{}_idx", table, index.name))),
            target,
            method,
            column_list(&index.columns)
        ));
    }

    statements
}
