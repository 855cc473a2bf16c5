//! Column-level finalization: enum checks, NOT NULL, defaults and comments.
//!
//! Each stage reads the table's columns from the MySQL catalog and issues
//! one multi-statement batch against the target. Statements are written so
//! that running a stage twice leaves the same result.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::catalog::{self, ColumnInfo};
use super::TableStage;
use crate::error::{MigrateError, Result};
use crate::executor::{QueryExecutor, QueryRequest};
use crate::run::MigrationRun;
use crate::sql::{pg_name, qualify, quote_ident, quote_literal};
use crate::typemap;

/// Run a DDL batch for one table, attributing failures to `stage`.
pub(super) async fn apply_ddl(
    executor: &dyn QueryExecutor,
    stage: &str,
    table: &str,
    statements: Vec<String>,
) -> Result<()> {
    if statements.is_empty() {
        debug!("{}: nothing to do for {}", stage, table);
        return Ok(());
    }
    executor
        .query(QueryRequest::target(
            format!("{}::{}", stage, table),
            statements.join(";\n"),
        ))
        .await
        .map_err(|e| MigrateError::table_stage(stage, table, e))?;
    debug!("{}: applied {} statement(s) to {}", stage, statements.len(), table);
    Ok(())
}

/// `CHECK (col IN (...))` constraints for MySQL `enum` columns.
pub struct EnumStage {
    executor: Arc<dyn QueryExecutor>,
}

impl EnumStage {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl TableStage for EnumStage {
    fn name(&self) -> &'static str {
        "enum"
    }

    async fn apply(&self, run: &MigrationRun, table: &str) -> Result<()> {
        let columns = catalog::load_columns(self.executor.as_ref(), run, table).await?;
        let statements = enum_statements(run, table, &columns);
        apply_ddl(self.executor.as_ref(), self.name(), table, statements).await
    }
}

fn enum_statements(run: &MigrationRun, table: &str, columns: &[ColumnInfo]) -> Vec<String> {
    let target = qualify(&run.target_schema, table);
    let mut statements = Vec::new();
    for column in columns.iter().filter(|c| c.data_type == "enum") {
        let Some(values) = enum_values(&column.column_type) else {
            warn!("Unparseable enum definition on {}.{}: {}", table, column.name, column.column_type);
            continue;
        };
        let constraint = quote_ident(&pg_name(&format!("{}_{}_enum_check", table, column.name)));
        statements.push(format!(
            "ALTER TABLE {} DROP CONSTRAINT IF EXISTS {}",
            target, constraint
        ));
        statements.push(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} CHECK ({} IN ({}))",
            target,
            constraint,
            quote_ident(&column.name),
            values
        ));
    }
    statements
}

/// The quoted value list of `enum('a','b')`, as written by MySQL.
fn enum_values(column_type: &str) -> Option<&str> {
    let lower = column_type.to_lowercase();
    if !lower.starts_with("enum(") || !column_type.ends_with(')') {
        return None;
    }
    let values = &column_type[5..column_type.len() - 1];
    (!values.trim().is_empty()).then_some(values)
}

/// `SET NOT NULL` for columns MySQL declares non-nullable.
pub struct NullStage {
    executor: Arc<dyn QueryExecutor>,
}

impl NullStage {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl TableStage for NullStage {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn apply(&self, run: &MigrationRun, table: &str) -> Result<()> {
        let columns = catalog::load_columns(self.executor.as_ref(), run, table).await?;
        let statements = null_statements(run, table, &columns);
        apply_ddl(self.executor.as_ref(), self.name(), table, statements).await
    }
}

fn null_statements(run: &MigrationRun, table: &str, columns: &[ColumnInfo]) -> Vec<String> {
    let clauses: Vec<String> = columns
        .iter()
        .filter(|c| !c.is_nullable)
        .map(|c| format!("ALTER COLUMN {} SET NOT NULL", quote_ident(&c.name)))
        .collect();
    if clauses.is_empty() {
        return Vec::new();
    }
    vec![format!(
        "ALTER TABLE {} {}",
        qualify(&run.target_schema, table),
        clauses.join(", ")
    )]
}

/// `SET DEFAULT` with MySQL default expressions translated to PostgreSQL.
pub struct DefaultStage {
    executor: Arc<dyn QueryExecutor>,
}

impl DefaultStage {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl TableStage for DefaultStage {
    fn name(&self) -> &'static str {
        "default"
    }

    async fn apply(&self, run: &MigrationRun, table: &str) -> Result<()> {
        let columns = catalog::load_columns(self.executor.as_ref(), run, table).await?;
        let statements = default_statements(run, table, &columns);
        apply_ddl(self.executor.as_ref(), self.name(), table, statements).await
    }
}

fn default_statements(run: &MigrationRun, table: &str, columns: &[ColumnInfo]) -> Vec<String> {
    let target = qualify(&run.target_schema, table);
    columns
        .iter()
        .filter(|c| !c.is_auto_increment())
        .filter_map(|c| {
            translate_default(c).map(|value| {
                format!(
                    "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
                    target,
                    quote_ident(&c.name),
                    value
                )
            })
        })
        .collect()
}

/// Translate a MySQL column default into a PostgreSQL expression.
/// `None` means the column gets no default.
pub(crate) fn translate_default(column: &ColumnInfo) -> Option<String> {
    let raw = column.default.as_deref()?.trim();
    let upper = raw.to_uppercase();
    if upper == "NULL" {
        return None;
    }

    let pg_type = column.pg_type();

    if upper.starts_with("CURRENT_TIMESTAMP")
        || upper.starts_with("NOW(")
        || upper.starts_with("LOCALTIMESTAMP")
        || upper.starts_with("LOCALTIME")
    {
        return Some("CURRENT_TIMESTAMP".to_string());
    }
    if upper.starts_with("CURRENT_DATE") || upper.starts_with("CURDATE(") {
        return Some("CURRENT_DATE".to_string());
    }
    if upper.starts_with("CURRENT_TIME") || upper.starts_with("CURTIME(") {
        return Some("CURRENT_TIME".to_string());
    }

    // Bit literals: b'101'
    let bits = (upper.starts_with("B'") && raw.ends_with('\'') && raw.len() >= 3)
        .then(|| &raw[2..raw.len() - 1]);

    if pg_type == "boolean" {
        let truthy = match bits {
            Some(b) => b.chars().any(|c| c == '1'),
            None => !matches!(unquote(raw), "0" | "" | "false" | "FALSE"),
        };
        return Some(if truthy { "TRUE" } else { "FALSE" }.to_string());
    }
    if let Some(b) = bits {
        return Some(format!("B'{}'", b));
    }

    // Expression defaults (MySQL 8 writes them in parentheses) do not translate.
    if raw.starts_with('(') {
        warn!(
            "Skipping expression default on column {}: {}",
            column.name, raw
        );
        return None;
    }

    let value = unquote(raw);
    if typemap::is_date_or_timestamp(&pg_type) && typemap::is_zero_date(value) {
        return Some(quote_literal(typemap::ZERO_DATE));
    }
    let numeric = matches!(
        pg_type.split('(').next().unwrap_or_default(),
        "smallint" | "integer" | "bigint" | "numeric" | "real" | "double precision"
    );
    if numeric && value.parse::<f64>().is_ok() {
        return Some(value.to_string());
    }

    Some(quote_literal(value))
}

/// Strip one level of single quotes (MariaDB reports string defaults quoted).
fn unquote(raw: &str) -> &str {
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        &raw[1..raw.len() - 1]
    } else {
        raw
    }
}

/// `COMMENT ON TABLE` / `COMMENT ON COLUMN` for non-empty MySQL comments.
pub struct CommentStage {
    executor: Arc<dyn QueryExecutor>,
}

impl CommentStage {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl TableStage for CommentStage {
    fn name(&self) -> &'static str {
        "comment"
    }

    async fn apply(&self, run: &MigrationRun, table: &str) -> Result<()> {
        let table_comment = catalog::table_comment(self.executor.as_ref(), run, table).await?;
        let columns = catalog::load_columns(self.executor.as_ref(), run, table).await?;
        let statements = comment_statements(run, table, &table_comment, &columns);
        apply_ddl(self.executor.as_ref(), self.name(), table, statements).await
    }
}

fn comment_statements(
    run: &MigrationRun,
    table: &str,
    table_comment: &str,
    columns: &[ColumnInfo],
) -> Vec<String> {
    let target = qualify(&run.target_schema, table);
    let mut statements = Vec::new();
    if !table_comment.is_empty() {
        statements.push(format!(
            "COMMENT ON TABLE {} IS {}",
            target,
            quote_literal(table_comment)
        ));
    }
    for column in columns.iter().filter(|c| !c.comment.is_empty()) {
        statements.push(format!(
            "COMMENT ON COLUMN {}.{} IS {}",
            target,
            quote_ident(&column.name),
            quote_literal(&column.comment)
        ));
    }
    statements
}
