//! MySQL `information_schema` readers shared by the stages.
//!
//! Text columns are CAST to CHAR so that they decode as strings whatever
//! collation or binary flag the server reports for catalog columns.

use crate::error::Result;
use crate::executor::{QueryExecutor, QueryRequest, Row};
use crate::run::MigrationRun;
use crate::typemap;

/// One source column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    /// `DATA_TYPE`, e.g. `int`.
    pub data_type: String,
    /// `COLUMN_TYPE`, e.g. `int(10) unsigned`.
    pub column_type: String,
    pub is_nullable: bool,
    pub default: Option<String>,
    pub extra: String,
    pub comment: String,
    pub max_length: i64,
    pub precision: i64,
    pub scale: i64,
}

impl ColumnInfo {
    /// Mapped PostgreSQL type.
    pub fn pg_type(&self) -> String {
        typemap::mysql_to_postgres(
            &self.data_type,
            &self.column_type,
            self.max_length,
            self.precision,
            self.scale,
        )
    }

    pub fn is_auto_increment(&self) -> bool {
        self.extra.to_lowercase().contains("auto_increment")
    }

    fn from_row(row: &Row) -> Option<Self> {
        Some(Self {
            name: row.get_str("COLUMN_NAME")?.to_string(),
            data_type: row.get_str("DATA_TYPE").unwrap_or_default().to_lowercase(),
            column_type: row.get_str("COLUMN_TYPE").unwrap_or_default().to_string(),
            is_nullable: row.get_str("IS_NULLABLE") != Some("NO"),
            default: row.get_str("COLUMN_DEFAULT").map(str::to_string),
            extra: row.get_str("EXTRA").unwrap_or_default().to_string(),
            comment: row.get_str("COLUMN_COMMENT").unwrap_or_default().to_string(),
            max_length: row.get_i64("MAX_LENGTH").unwrap_or(0),
            precision: row.get_i64("NUMERIC_PRECISION").unwrap_or(0),
            scale: row.get_i64("NUMERIC_SCALE").unwrap_or(0),
        })
    }
}

/// One source index, columns in key order.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    /// `BTREE`, `HASH`, `SPATIAL` or `FULLTEXT`.
    pub index_type: String,
}

impl IndexInfo {
    pub fn is_primary(&self) -> bool {
        self.name == "PRIMARY"
    }
}

/// One source foreign key, columns in key order.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeyInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub update_rule: String,
    pub delete_rule: String,
}

/// Columns of `table`, in ordinal order.
pub async fn load_columns(
    executor: &dyn QueryExecutor,
    run: &MigrationRun,
    table: &str,
) -> Result<Vec<ColumnInfo>> {
    let rows = executor
        .query(
            QueryRequest::source(
                "catalog::load_columns",
                r#"
            SELECT
                CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME,
                CAST(DATA_TYPE AS CHAR(64)) AS DATA_TYPE,
                CAST(COLUMN_TYPE AS CHAR(4096)) AS COLUMN_TYPE,
                CAST(IS_NULLABLE AS CHAR(3)) AS IS_NULLABLE,
                CAST(COLUMN_DEFAULT AS CHAR(4096)) AS COLUMN_DEFAULT,
                CAST(EXTRA AS CHAR(255)) AS EXTRA,
                CAST(COLUMN_COMMENT AS CHAR(2048)) AS COLUMN_COMMENT,
                CAST(COALESCE(CHARACTER_MAXIMUM_LENGTH, 0) AS SIGNED) AS MAX_LENGTH,
                CAST(COALESCE(NUMERIC_PRECISION, 0) AS SIGNED) AS NUMERIC_PRECISION,
                CAST(COALESCE(NUMERIC_SCALE, 0) AS SIGNED) AS NUMERIC_SCALE
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
            "#,
            )
            .bind(&run.source_database)
            .bind(table),
        )
        .await?;

    Ok(rows.iter().filter_map(ColumnInfo::from_row).collect())
}

/// Indexes of `table`, including the primary key. Functional index parts
/// (no column name) are skipped along with their index.
pub async fn load_indexes(
    executor: &dyn QueryExecutor,
    run: &MigrationRun,
    table: &str,
) -> Result<Vec<IndexInfo>> {
    let rows = executor
        .query(
            QueryRequest::source(
                "catalog::load_indexes",
                r#"
            SELECT
                CAST(INDEX_NAME AS CHAR(255)) AS INDEX_NAME,
                CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME,
                CAST(NON_UNIQUE AS SIGNED) AS NON_UNIQUE,
                CAST(INDEX_TYPE AS CHAR(32)) AS INDEX_TYPE
            FROM information_schema.STATISTICS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY INDEX_NAME, SEQ_IN_INDEX
            "#,
            )
            .bind(&run.source_database)
            .bind(table),
        )
        .await?;

    let mut indexes: Vec<IndexInfo> = Vec::new();
    let mut functional: Vec<String> = Vec::new();
    for row in &rows {
        let Some(name) = row.get_str("INDEX_NAME") else {
            continue;
        };
        let Some(column) = row.get_str("COLUMN_NAME") else {
            functional.push(name.to_string());
            continue;
        };
        match indexes.iter_mut().find(|idx| idx.name == name) {
            Some(index) => index.columns.push(column.to_string()),
            None => indexes.push(IndexInfo {
                name: name.to_string(),
                columns: vec![column.to_string()],
                unique: row.get_i64("NON_UNIQUE") == Some(0),
                index_type: row.get_str("INDEX_TYPE").unwrap_or("BTREE").to_uppercase(),
            }),
        }
    }
    indexes.retain(|idx| !functional.contains(&idx.name));
    Ok(indexes)
}

/// Primary key columns of `table`; empty when it has none.
pub async fn primary_key_columns(
    executor: &dyn QueryExecutor,
    run: &MigrationRun,
    table: &str,
) -> Result<Vec<String>> {
    Ok(load_indexes(executor, run, table)
        .await?
        .into_iter()
        .find(IndexInfo::is_primary)
        .map(|idx| idx.columns)
        .unwrap_or_default())
}

/// Foreign keys declared on `table`.
pub async fn load_foreign_keys(
    executor: &dyn QueryExecutor,
    run: &MigrationRun,
    table: &str,
) -> Result<Vec<ForeignKeyInfo>> {
    let rows = executor
        .query(
            QueryRequest::source(
                "catalog::load_foreign_keys",
                r#"
            SELECT
                CAST(kcu.CONSTRAINT_NAME AS CHAR(255)) AS CONSTRAINT_NAME,
                CAST(kcu.COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME,
                CAST(kcu.REFERENCED_TABLE_NAME AS CHAR(255)) AS REFERENCED_TABLE_NAME,
                CAST(kcu.REFERENCED_COLUMN_NAME AS CHAR(255)) AS REFERENCED_COLUMN_NAME,
                CAST(rc.UPDATE_RULE AS CHAR(32)) AS UPDATE_RULE,
                CAST(rc.DELETE_RULE AS CHAR(32)) AS DELETE_RULE
            FROM information_schema.KEY_COLUMN_USAGE kcu
            JOIN information_schema.REFERENTIAL_CONSTRAINTS rc
                ON rc.CONSTRAINT_SCHEMA = kcu.CONSTRAINT_SCHEMA
                AND rc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME
                AND rc.TABLE_NAME = kcu.TABLE_NAME
            WHERE kcu.TABLE_SCHEMA = ? AND kcu.TABLE_NAME = ?
                AND kcu.REFERENCED_TABLE_NAME IS NOT NULL
            ORDER BY kcu.CONSTRAINT_NAME, kcu.ORDINAL_POSITION
            "#,
            )
            .bind(&run.source_database)
            .bind(table),
        )
        .await?;

    let mut keys: Vec<ForeignKeyInfo> = Vec::new();
    for row in &rows {
        let (Some(name), Some(column), Some(referenced_table), Some(referenced_column)) = (
            row.get_str("CONSTRAINT_NAME"),
            row.get_str("COLUMN_NAME"),
            row.get_str("REFERENCED_TABLE_NAME"),
            row.get_str("REFERENCED_COLUMN_NAME"),
        ) else {
            continue;
        };
        match keys.iter_mut().find(|fk| fk.name == name) {
            Some(fk) => {
                fk.columns.push(column.to_string());
                fk.referenced_columns.push(referenced_column.to_string());
            }
            None => keys.push(ForeignKeyInfo {
                name: name.to_string(),
                columns: vec![column.to_string()],
                referenced_table: referenced_table.to_string(),
                referenced_columns: vec![referenced_column.to_string()],
                update_rule: row.get_str("UPDATE_RULE").unwrap_or("NO ACTION").to_string(),
                delete_rule: row.get_str("DELETE_RULE").unwrap_or("NO ACTION").to_string(),
            }),
        }
    }
    Ok(keys)
}

/// Table comment, empty when unset.
pub async fn table_comment(
    executor: &dyn QueryExecutor,
    run: &MigrationRun,
    table: &str,
) -> Result<String> {
    let rows = executor
        .query(
            QueryRequest::source(
                "catalog::table_comment",
                "SELECT CAST(TABLE_COMMENT AS CHAR(2048)) AS TABLE_COMMENT \
                 FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?",
            )
            .bind(&run.source_database)
            .bind(table),
        )
        .await?;

    Ok(rows
        .first()
        .and_then(|row| row.get_str("TABLE_COMMENT"))
        .unwrap_or_default()
        .to_string())
}
