//! Table data transfer via PostgreSQL `COPY ... FROM STDIN`.
//!
//! Progress is tracked per table in a data-pool staging table
//! (`data_pool_<schema><db>`) so that tables already loaded are skipped when
//! an interrupted transfer is restarted. The staging table is dropped by the
//! orchestrator at teardown, right before the ledger.

use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use futures::SinkExt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::catalog::{self, ColumnInfo};
use super::{for_each_table, DataTransfer};
use crate::error::{MigrateError, Result};
use crate::executor::{ClientHandle, QueryExecutor, QueryRequest, Row, Value};
use crate::run::MigrationRun;
use crate::sql::{qualify, quote_ident, quote_mysql_ident};
use crate::state::Stage;
use crate::typemap;

const STAGE: &str = "transfer";

/// Copies each table with one pooled target connection per table, at most
/// `max_connections` tables at a time.
pub struct CopyTransfer {
    executor: Arc<dyn QueryExecutor>,
    max_connections: usize,
    batch_size: usize,
}

impl CopyTransfer {
    pub fn new(executor: Arc<dyn QueryExecutor>, max_connections: usize, batch_size: usize) -> Self {
        Self {
            executor,
            max_connections: max_connections.max(1),
            batch_size: batch_size.max(1),
        }
    }

    fn pool_table(run: &MigrationRun) -> String {
        qualify(&run.target_schema, &run.data_pool_table_name())
    }

    async fn prepare_pool(&self, run: &MigrationRun) -> Result<()> {
        let sql = format!(
            "CREATE SCHEMA IF NOT EXISTS {};
             CREATE TABLE IF NOT EXISTS {} (
                 table_name TEXT PRIMARY KEY,
                 loaded BOOLEAN NOT NULL DEFAULT FALSE
             )",
            quote_ident(&run.target_schema),
            Self::pool_table(run)
        );
        self.executor
            .query(QueryRequest::target("CopyTransfer::prepare_pool", sql))
            .await?;
        Ok(())
    }

    async fn loaded_tables(&self, run: &MigrationRun) -> Result<Vec<String>> {
        let rows = self
            .executor
            .query(QueryRequest::target(
                "CopyTransfer::loaded_tables",
                format!("SELECT table_name FROM {} WHERE loaded", Self::pool_table(run)),
            ))
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get_str("table_name").map(str::to_string))
            .collect())
    }

    async fn mark_loaded(&self, run: &MigrationRun, table: &str) -> Result<()> {
        self.executor
            .query(
                QueryRequest::target(
                    "CopyTransfer::mark_loaded",
                    format!(
                        "INSERT INTO {} (table_name, loaded) VALUES ($1, TRUE)
                         ON CONFLICT (table_name) DO UPDATE SET loaded = TRUE",
                        Self::pool_table(run)
                    ),
                )
                .bind(table),
            )
            .await?;
        Ok(())
    }

    async fn target_table_exists(&self, run: &MigrationRun, table: &str) -> Result<bool> {
        let rows = self
            .executor
            .query(
                QueryRequest::target(
                    "CopyTransfer::target_table_exists",
                    "SELECT EXISTS(
                        SELECT 1 FROM information_schema.tables
                        WHERE table_schema = $1 AND table_name = $2
                     ) AS exists",
                )
                .bind(&run.target_schema)
                .bind(table),
            )
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get_bool("exists"))
            .unwrap_or(false))
    }

    async fn load_table(&self, run: &MigrationRun, table: &str) -> Result<()> {
        let executor = self.executor.as_ref();
        let columns = catalog::load_columns(executor, run, table).await?;
        if columns.is_empty() {
            return Err(MigrateError::table_stage(STAGE, table, "no columns found in source"));
        }
        let primary_key = catalog::primary_key_columns(executor, run, table).await?;

        // Data-only runs keep the existing structure and only replace rows.
        let replace_rows = run.data_only && self.target_table_exists(run, table).await?;
        let prepare = if replace_rows {
            replace_rows_sql(run, table)
        } else {
            create_table_sql(run, table, &columns)
        };

        let mut client = executor
            .execute(QueryRequest::target(format!("{}::{}", STAGE, table), prepare).return_client())
            .await
            .into_client()?;
        let copied = self
            .copy_rows(run, table, &columns, &primary_key, &client)
            .await;
        if replace_rows {
            // The connection goes back to the pool; it must enforce keys again.
            if let Err(e) = client.batch_execute("RESET session_replication_role").await {
                warn!("{}: could not reset session_replication_role: {}", table, e);
            }
        }
        executor.release(client);
        let copied = copied?;

        self.mark_loaded(run, table).await?;
        info!("Loaded {} rows into {}", copied, table);
        Ok(())
    }

    async fn copy_rows(
        &self,
        run: &MigrationRun,
        table: &str,
        columns: &[ColumnInfo],
        primary_key: &[String],
        client: &ClientHandle,
    ) -> Result<u64> {
        let pg = client
            .target_client()
            .ok_or_else(|| MigrateError::pool("COPY needs a PostgreSQL connection", table))?;

        let pg_types: Vec<String> = columns.iter().map(ColumnInfo::pg_type).collect();
        let select = select_sql(run, table, columns, primary_key);
        let copy_sql = copy_sql(run, table, columns);

        if primary_key.is_empty() {
            warn!("{} has no primary key; reading it in a single pass", table);
        }

        let mut offset = 0usize;
        let mut total = 0u64;
        loop {
            let page = if primary_key.is_empty() {
                select.clone()
            } else {
                format!("{} LIMIT {} OFFSET {}", select, self.batch_size, offset)
            };
            let rows = self
                .executor
                .query(QueryRequest::source(format!("{}::{}", STAGE, table), page))
                .await?;
            if rows.is_empty() {
                break;
            }

            let mut buf = BytesMut::with_capacity(1024 * 1024);
            for row in &rows {
                encode_row(&mut buf, row, &pg_types);
            }

            let sink = pg.copy_in(copy_sql.as_str()).await?;
            futures::pin_mut!(sink);
            sink.send(buf.freeze()).await?;
            total += sink.finish().await?;

            debug!("{}: copied {} rows so far", table, total);
            offset += rows.len();
            if primary_key.is_empty() || rows.len() < self.batch_size {
                break;
            }
        }

        Ok(total)
    }
}

#[async_trait]
impl DataTransfer for CopyTransfer {
    async fn run(&self, run: &MigrationRun) -> Result<()> {
        self.prepare_pool(run)
            .await
            .map_err(|e| MigrateError::stage(STAGE, e))?;
        let loaded = self.loaded_tables(run).await?;
        let pending: Vec<String> = run
            .tables
            .iter()
            .filter(|t| !loaded.contains(t))
            .cloned()
            .collect();
        if pending.len() < run.tables.len() {
            info!(
                "Skipping {} tables already loaded by a previous attempt",
                run.tables.len() - pending.len()
            );
        }

        info!(
            "Transferring {} tables ({} at a time)",
            pending.len(),
            self.max_connections
        );
        let semaphore = Semaphore::new(self.max_connections);
        for_each_table(Stage::TablesLoaded.as_str(), &pending, |table| {
            let semaphore = &semaphore;
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|e| MigrateError::table_stage(STAGE, table, e))?;
                self.load_table(run, table).await
            }
        })
        .await
    }

    async fn drop_staging(&self, run: &MigrationRun) -> Result<()> {
        let table = Self::pool_table(run);
        self.executor
            .query(QueryRequest::target(
                "CopyTransfer::drop_staging",
                format!("DROP TABLE IF EXISTS {}", table),
            ))
            .await
            .map_err(|e| MigrateError::Teardown {
                table: table.clone(),
                message: e.to_string(),
            })?;
        Ok(())
    }
}

fn create_table_sql(run: &MigrationRun, table: &str, columns: &[ColumnInfo]) -> String {
    let target = qualify(&run.target_schema, table);
    let definitions = columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.pg_type()))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "DROP TABLE IF EXISTS {target} CASCADE;\nCREATE TABLE {target} ({definitions})",
        target = target,
        definitions = definitions
    )
}

/// Empties an existing table for a data-only reload, on the connection that
/// then runs the COPY.
///
/// Foreign keys from a previous full run stay in place. `TRUNCATE` refuses a
/// table referenced by one, and tables load concurrently, so the session runs
/// as a replica: foreign-key triggers do not fire for the `DELETE` or the
/// COPY that follows. The space is reclaimed by the final `VACUUM FULL`.
fn replace_rows_sql(run: &MigrationRun, table: &str) -> String {
    format!(
        "SET session_replication_role = replica;\nDELETE FROM {}",
        qualify(&run.target_schema, table)
    )
}

fn copy_sql(run: &MigrationRun, table: &str, columns: &[ColumnInfo]) -> String {
    let list = columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT text)",
        qualify(&run.target_schema, table),
        list
    )
}

/// Source SELECT producing one COPY-ready value per column.
fn select_sql(run: &MigrationRun, table: &str, columns: &[ColumnInfo], primary_key: &[String]) -> String {
    let list = columns.iter().map(select_expr).collect::<Vec<_>>().join(", ");
    let mut sql = format!(
        "SELECT {} FROM {}.{}",
        list,
        quote_mysql_ident(&run.source_database),
        quote_mysql_ident(table)
    );
    if !primary_key.is_empty() {
        let order = primary_key
            .iter()
            .map(|c| quote_mysql_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        sql.push_str(&format!(" ORDER BY {}", order));
    }
    sql
}

fn select_expr(column: &ColumnInfo) -> String {
    let col = quote_mysql_ident(&column.name);
    let pg_type = column.pg_type();
    let expr = match (column.data_type.as_str(), pg_type.as_str()) {
        (_, "boolean") => format!("CAST({} AS SIGNED)", col),
        (_, "bytea") => format!("HEX({})", col),
        (_, t) if t.starts_with("bit varying") => format!("BIN({})", col),
        ("point", _) => format!("CONCAT('(', ST_X({c}), ',', ST_Y({c}), ')')", c = col),
        ("geometry" | "linestring" | "polygon" | "multipoint" | "multilinestring"
        | "multipolygon" | "geometrycollection", _) => format!("ST_AsText({})", col),
        // Zero dates load as the same value their defaults translate to, so
        // NOT NULL still holds afterwards.
        ("date" | "datetime" | "timestamp", _) => format!(
            "CASE WHEN CAST({c} AS CHAR) LIKE '0000-00-00%' THEN '{zero}' ELSE CAST({c} AS CHAR) END",
            c = col,
            zero = typemap::ZERO_DATE
        ),
        _ => format!("CAST({} AS CHAR)", col),
    };
    format!("{} AS {}", expr, col)
}

/// Append one row in COPY text format.
fn encode_row(buf: &mut BytesMut, row: &Row, pg_types: &[String]) {
    for (idx, value) in row.values().iter().enumerate() {
        if idx > 0 {
            buf.put_u8(b'\t');
        }
        let pg_type = pg_types.get(idx).map(String::as_str).unwrap_or("text");
        encode_value(buf, value, pg_type);
    }
    buf.put_u8(b'\n');
}

fn encode_value(buf: &mut BytesMut, value: &Value, pg_type: &str) {
    match value {
        Value::Null => buf.extend_from_slice(b"\\N"),
        _ if typemap::is_boolean(pg_type) => {
            buf.put_u8(if value.as_bool().unwrap_or(false) { b't' } else { b'f' })
        }
        Value::Text(hex) if typemap::is_binary(pg_type) => {
            buf.extend_from_slice(b"\\\\x");
            buf.extend_from_slice(hex.as_bytes());
        }
        Value::Text(s) => buf.extend_from_slice(escape_copy_text(s).as_bytes()),
        Value::Int(i) => buf.extend_from_slice(i.to_string().as_bytes()),
        Value::Float(f) => buf.extend_from_slice(f.to_string().as_bytes()),
        Value::Bool(b) => buf.put_u8(if *b { b't' } else { b'f' }),
    }
}

/// Escape special characters for COPY text format.
fn escape_copy_text(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '\t' => result.push_str("\\t"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            _ => result.push(c),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run() -> MigrationRun {
        MigrationRun::new("shop", "public", vec!["users".into()])
    }

    fn column(name: &str, data_type: &str, column_type: &str) -> ColumnInfo {
        ColumnInfo {
            name: name.to_string(),
            data_type: data_type.to_string(),
            column_type: column_type.to_string(),
            is_nullable: true,
            default: None,
            extra: String::new(),
            comment: String::new(),
            max_length: 0,
            precision: 0,
            scale: 0,
        }
    }

    #[test]
    fn test_create_table_sql() {
        let columns = vec![
            column("id", "int", "int(11)"),
            column("active", "tinyint", "tinyint(1)"),
        ];
        assert_eq!(
            create_table_sql(&run(), "users", &columns),
            "DROP TABLE IF EXISTS \"public\".\"users\" CASCADE;\n\
             CREATE TABLE \"public\".\"users\" (\"id\" integer, \"active\" boolean)"
        );
    }

    #[test]
    fn test_replace_rows_sql_bypasses_foreign_keys() {
        let sql = replace_rows_sql(&run().with_data_only(true), "users");
        assert_eq!(
            sql,
            "SET session_replication_role = replica;\nDELETE FROM \"public\".\"users\""
        );
        assert!(!sql.contains("TRUNCATE"));
    }

    #[test]
    fn test_select_sql_orders_by_primary_key() {
        let columns = vec![
            column("id", "int", "int(11)"),
            column("avatar", "blob", "blob"),
            column("born", "date", "date"),
        ];
        assert_eq!(
            select_sql(&run(), "users", &columns, &["id".to_string()]),
            "SELECT CAST(`id` AS CHAR) AS `id`, HEX(`avatar`) AS `avatar`, \
             CASE WHEN CAST(`born` AS CHAR) LIKE '0000-00-00%' THEN '-infinity' \
             ELSE CAST(`born` AS CHAR) END AS `born` \
             FROM `shop`.`users` ORDER BY `id`"
        );
        assert!(!select_sql(&run(), "users", &columns, &[]).contains("ORDER BY"));
    }

    #[test]
    fn test_zero_dates_load_as_minus_infinity() {
        let mut created = column("created_at", "datetime", "datetime");
        created.is_nullable = false;
        let expr = select_expr(&created);
        assert_eq!(
            expr,
            "CASE WHEN CAST(`created_at` AS CHAR) LIKE '0000-00-00%' THEN '-infinity' \
             ELSE CAST(`created_at` AS CHAR) END AS `created_at`"
        );
        assert!(!expr.contains("NULLIF"));

        // A NOT NULL column receives a value, never \N.
        let row = Row::new(vec!["created_at".into()], vec![Value::Text("-infinity".into())]);
        let mut buf = BytesMut::new();
        encode_row(&mut buf, &row, &["timestamp".to_string()]);
        assert_eq!(std::str::from_utf8(&buf).unwrap(), "-infinity\n");
    }

    #[test]
    fn test_encode_row() {
        let row = Row::new(
            vec!["id".into(), "active".into(), "bio".into(), "avatar".into(), "note".into()],
            vec![
                Value::Text("7".into()),
                Value::Int(1),
                Value::Text("line1\nline2\ttab \\ end".into()),
                Value::Text("CAFE".into()),
                Value::Null,
            ],
        );
        let types: Vec<String> = ["integer", "boolean", "text", "bytea", "text"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let mut buf = BytesMut::new();
        encode_row(&mut buf, &row, &types);
        assert_eq!(
            std::str::from_utf8(&buf).unwrap(),
            "7\tt\tline1\\nline2\\ttab \\\\ end\t\\\\xCAFE\t\\N\n"
        );
    }

    #[test]
    fn test_escape_copy_text() {
        assert_eq!(escape_copy_text("plain"), "plain");
        assert_eq!(escape_copy_text("a\r\nb"), "a\\r\\nb");
    }
}
