//! The migration run: what one process invocation migrates.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{MigrateError, Result};
use crate::executor::{QueryExecutor, QueryRequest};
use crate::sql::pg_name;

/// One migration run. Built once after table discovery and passed by
/// reference to every component; nothing mutates it afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationRun {
    /// Unique run identifier.
    pub run_id: Uuid,

    /// MySQL database being migrated.
    pub source_database: String,

    /// PostgreSQL schema receiving the tables.
    pub target_schema: String,

    /// Tables to migrate, sorted by name.
    pub tables: Vec<String>,

    /// Skip structural changes; only reload data and resync sequences.
    pub data_only: bool,

    /// Directory for the report and views that could not be created.
    pub logs_dir: PathBuf,

    /// When this invocation started.
    pub started_at: DateTime<Utc>,
}

impl MigrationRun {
    pub fn new(
        source_database: impl Into<String>,
        target_schema: impl Into<String>,
        tables: Vec<String>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            source_database: source_database.into(),
            target_schema: target_schema.into(),
            tables,
            data_only: false,
            logs_dir: PathBuf::from("logs"),
            started_at: Utc::now(),
        }
    }

    /// Build a run from configuration and the discovered table list.
    pub fn from_config(config: &Config, tables: Vec<String>) -> Self {
        Self::new(&config.source.database, config.target_schema(), tables)
            .with_data_only(config.migration.migrate_only_data)
            .with_logs_dir(config.migration.logs_dir.clone())
    }

    pub fn with_data_only(mut self, data_only: bool) -> Self {
        self.data_only = data_only;
        self
    }

    pub fn with_logs_dir(mut self, logs_dir: impl Into<PathBuf>) -> Self {
        self.logs_dir = logs_dir.into();
        self
    }

    /// Name of the stage ledger table in the target schema.
    pub fn state_table_name(&self) -> String {
        pg_name(&format!(
            "state_logs_{}{}",
            self.target_schema, self.source_database
        ))
    }

    /// Name of the data-transfer staging table in the target schema.
    pub fn data_pool_table_name(&self) -> String {
        pg_name(&format!(
            "data_pool_{}{}",
            self.target_schema, self.source_database
        ))
    }

    /// Time since this invocation started.
    pub fn elapsed(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }
}

/// List the base tables of the source database, filtered by the configured
/// include/exclude patterns and sorted by name.
pub async fn discover_tables(executor: &dyn QueryExecutor, config: &Config) -> Result<Vec<String>> {
    let rows = executor
        .query(
            QueryRequest::source(
                "run::discover_tables",
                "SELECT CAST(TABLE_NAME AS CHAR(255)) AS TABLE_NAME \
                 FROM information_schema.TABLES \
                 WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE'",
            )
            .bind(&config.source.database),
        )
        .await?;

    let names: Vec<String> = rows
        .iter()
        .filter_map(|row| row.get_str("TABLE_NAME").map(str::to_string))
        .collect();
    debug!("Found {} base tables in {}", names.len(), config.source.database);

    let tables = filter_tables(
        names,
        &config.migration.include_tables,
        &config.migration.exclude_tables,
    );
    if tables.is_empty() {
        return Err(MigrateError::Config(format!(
            "no tables to migrate in source database {}",
            config.source.database
        )));
    }

    info!("Migrating {} tables", tables.len());
    Ok(tables)
}

/// Apply include/exclude patterns and sort. An empty include list keeps everything.
pub fn filter_tables(names: Vec<String>, include: &[String], exclude: &[String]) -> Vec<String> {
    let mut tables: Vec<String> = names
        .into_iter()
        .filter(|name| include.is_empty() || include.iter().any(|p| wildcard_match(p, name)))
        .filter(|name| !exclude.iter().any(|p| wildcard_match(p, name)))
        .collect();
    tables.sort();
    tables.dedup();
    tables
}

/// Case-insensitive `*` / `?` wildcard match.
fn wildcard_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let name: Vec<char> = name.to_lowercase().chars().collect();

    let (mut p, mut n) = (0, 0);
    let mut star: Option<usize> = None;
    let mut backtrack = 0;

    while n < name.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == name[n]) {
            p += 1;
            n += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some(p);
            backtrack = n;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            backtrack += 1;
            n = backtrack;
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}
