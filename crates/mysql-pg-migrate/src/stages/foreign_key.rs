//! Foreign keys, created once every table has its keys in place.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use super::catalog::{self, ForeignKeyInfo};
use super::schema::apply_ddl;
use super::{for_each_table, RunStage};
use crate::error::Result;
use crate::executor::QueryExecutor;
use crate::run::MigrationRun;
use crate::sql::{pg_name, qualify, quote_ident};

/// Adds each table's foreign keys, tables concurrently. Keys that reference
/// a table outside the run are left out.
pub struct ForeignKeyStage {
    executor: Arc<dyn QueryExecutor>,
}

impl ForeignKeyStage {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self { executor }
    }

    async fn apply_table(&self, run: &MigrationRun, table: &str) -> Result<()> {
        let keys = catalog::load_foreign_keys(self.executor.as_ref(), run, table).await?;
        let statements = foreign_key_statements(run, table, &keys);
        apply_ddl(self.executor.as_ref(), self.name(), table, statements).await
    }
}

#[async_trait]
impl RunStage for ForeignKeyStage {
    fn name(&self) -> &'static str {
        "foreign_keys"
    }

    async fn apply(&self, run: &MigrationRun) -> Result<()> {
        info!("Creating foreign keys for {} tables", run.tables.len());
        for_each_table(self.name(), &run.tables, |table| self.apply_table(run, table)).await
    }
}

fn rule(rule: &str) -> &'static str {
    match rule.to_uppercase().as_str() {
        "CASCADE" => "CASCADE",
        "SET NULL" => "SET NULL",
        "SET DEFAULT" => "SET DEFAULT",
        "RESTRICT" => "RESTRICT",
        _ => "NO ACTION",
    }
}

fn foreign_key_statements(run: &MigrationRun, table: &str, keys: &[ForeignKeyInfo]) -> Vec<String> {
    let target = qualify(&run.target_schema, table);
    let mut statements = Vec::new();

    for key in keys {
        if !run.tables.iter().any(|t| t == &key.referenced_table) {
            debug!(
                "Skipping foreign key {} on {}: {} is not part of this run",
                key.name, table, key.referenced_table
            );
            continue;
        }
        let constraint = quote_ident(&pg_name(&format!("{}_{}_fkey", table, key.name)));
        let columns = key.columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>();
        let referenced = key
            .referenced_columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>();

        statements.push(format!(
            "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
            target, constraint
        ));
        statements.push(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) \
             ON UPDATE {} ON DELETE {}",
            target,
            constraint,
            columns.join(", "),
            qualify(&run.target_schema, &key.referenced_table),
            referenced.join(", "),
            rule(&key.update_rule),
            rule(&key.delete_rule)
        ));
    }

    statements
}
