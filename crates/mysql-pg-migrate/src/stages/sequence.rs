//! Sequences backing MySQL `AUTO_INCREMENT` columns.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::catalog::{self, ColumnInfo};
use super::TableStage;
use crate::error::{MigrateError, Result};
use crate::executor::{QueryExecutor, QueryRequest};
use crate::run::MigrationRun;
use crate::sql::{pg_name, qualify, quote_ident, quote_literal};

/// Creates a sequence per auto-increment column, wires it as the column
/// default and moves it past the copied data.
///
/// The statements for one table run in a single transaction on a
/// connection kept checked out for that purpose.
pub struct SequenceStage {
    executor: Arc<dyn QueryExecutor>,
}

impl SequenceStage {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl TableStage for SequenceStage {
    fn name(&self) -> &'static str {
        "sequence"
    }

    async fn apply(&self, run: &MigrationRun, table: &str) -> Result<()> {
        let columns = catalog::load_columns(self.executor.as_ref(), run, table).await?;
        let Some(column) = columns.iter().find(|c| c.is_auto_increment()) else {
            debug!("sequence: {} has no auto-increment column", table);
            return Ok(());
        };

        let mut client = self
            .executor
            .execute(
                QueryRequest::target(format!("sequence::{}", table), "BEGIN").return_client(),
            )
            .await
            .into_client()
            .map_err(|e| MigrateError::table_stage(self.name(), table, e))?;

        let body = create_sequence_sql(run, table, column);
        let outcome = client.batch_execute(&format!("{};\nCOMMIT", body)).await;
        if outcome.is_err() {
            if let Err(e) = client.batch_execute("ROLLBACK").await {
                warn!("sequence: rollback failed for {}: {}", table, e);
            }
        }
        self.executor.release(client);

        outcome.map_err(|e| MigrateError::table_stage(self.name(), table, e))?;
        debug!("sequence: created for {}.{}", table, column.name);
        Ok(())
    }
}

fn sequence_name(table: &str, column: &ColumnInfo) -> String {
    pg_name(&format!("{}_{}_seq", table, column.name))
}

/// Statements creating and attaching the sequence; runs inside a transaction.
fn create_sequence_sql(run: &MigrationRun, table: &str, column: &ColumnInfo) -> String {
    let target = qualify(&run.target_schema, table);
    let sequence = qualify(&run.target_schema, &sequence_name(table, column));
    let col = quote_ident(&column.name);
    [
        format!("CREATE SEQUENCE IF NOT EXISTS {}", sequence),
        format!(
            "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT nextval({}::regclass)",
            target,
            col,
            quote_literal(&sequence)
        ),
        format!("ALTER SEQUENCE {} OWNED BY {}.{}", sequence, target, col),
        format!(
            "SELECT setval({}::regclass, (SELECT COALESCE(MAX({}), 0) + 1 FROM {}), false)",
            quote_literal(&sequence),
            col,
            target
        ),
    ]
    .join(";\n")
}

/// Data-only counterpart of [`SequenceStage`]: moves an existing sequence
/// past the reloaded data. Recomputes from the table, so reruns are harmless.
pub struct SequenceResyncStage {
    executor: Arc<dyn QueryExecutor>,
}

impl SequenceResyncStage {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl TableStage for SequenceResyncStage {
    fn name(&self) -> &'static str {
        "sequence_resync"
    }

    async fn apply(&self, run: &MigrationRun, table: &str) -> Result<()> {
        let columns = catalog::load_columns(self.executor.as_ref(), run, table).await?;
        let Some(column) = columns.iter().find(|c| c.is_auto_increment()) else {
            return Ok(());
        };

        self.executor
            .query(QueryRequest::target(
                format!("sequence_resync::{}", table),
                resync_sql(run, table, column),
            ))
            .await
            .map_err(|e| MigrateError::table_stage(self.name(), table, e))?;
        debug!("sequence_resync: {}.{}", table, column.name);
        Ok(())
    }
}

/// `setval` on whatever sequence owns the column; a NULL sequence is a no-op.
fn resync_sql(run: &MigrationRun, table: &str, column: &ColumnInfo) -> String {
    let target = qualify(&run.target_schema, table);
    format!(
        "SELECT setval(pg_get_serial_sequence({}, {}), \
         (SELECT COALESCE(MAX({}), 0) + 1 FROM {}), false)",
        quote_literal(&target),
        quote_literal(&column.name),
        quote_ident(&column.name),
        target
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> MigrationRun {
        MigrationRun::new("shop", "public", vec!["orders".into()])
    }

    fn id_column() -> ColumnInfo {
        ColumnInfo {
            name: "id".to_string(),
            data_type: "int".to_string(),
            column_type: "int(11)".to_string(),
            is_nullable: false,
            default: None,
            extra: "auto_increment".to_string(),
            comment: String::new(),
            max_length: 0,
            precision: 10,
            scale: 0,
        }
    }

    #[test]
    fn test_create_sequence_sql() {
        let sql = create_sequence_sql(&run(), "orders", &id_column());
        let statements: Vec<&str> = sql.split(";\n").collect();
        assert_eq!(statements.len(), 4);
        assert_eq!(
            statements[0],
            "CREATE SEQUENCE IF NOT EXISTS \"public\".\"orders_id_seq\""
        );
        assert_eq!(
            statements[1],
            "ALTER TABLE \"public\".\"orders\" ALTER COLUMN \"id\" \
             SET DEFAULT nextval('\"public\".\"orders_id_seq\"'::regclass)"
        );
        assert_eq!(
            statements[2],
            "ALTER SEQUENCE \"public\".\"orders_id_seq\" OWNED BY \"public\".\"orders\".\"id\""
        );
        assert!(statements[3].starts_with("SELECT setval("));
        assert!(statements[3].ends_with("FROM \"public\".\"orders\"), false)"));
    }

    #[test]
    fn test_resync_sql_uses_owned_sequence() {
        assert_eq!(
            resync_sql(&run(), "orders", &id_column()),
            "SELECT setval(pg_get_serial_sequence('\"public\".\"orders\"', 'id'), \
             (SELECT COALESCE(MAX(\"id\"), 0) + 1 FROM \"public\".\"orders\"), false)"
        );
    }
}
