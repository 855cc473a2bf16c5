//! # mysql-pg-migrate
//!
//! Resumable MySQL to PostgreSQL migration library.
//!
//! A run moves every selected table of one MySQL database into one
//! PostgreSQL schema through a fixed sequence of stages:
//!
//! - **Data transfer** using the PostgreSQL COPY protocol
//! - **Per-table finalization**: enum checks, NOT NULL, defaults, sequences,
//!   keys and indexes, comments
//! - **Foreign keys** and **views** once every table is finalized
//! - **Storage reclamation** with `VACUUM (FULL, ANALYZE)`
//!
//! Each completed stage is recorded in a ledger table in the target schema,
//! so a failed run restarts from the first unfinished stage.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mysql_pg_migrate::{
//!     discover_tables, Config, DbExecutor, DbStateStore, MigrationRun, Orchestrator,
//!     QueryExecutor, StageSet,
//! };
//!
//! #[tokio::main]
//! async fn main() -> mysql_pg_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let executor: Arc<dyn QueryExecutor> = Arc::new(DbExecutor::new(&config)?);
//!     let tables = discover_tables(executor.as_ref(), &config).await?;
//!     let run = MigrationRun::from_config(&config, tables);
//!
//!     let orchestrator = Orchestrator::new(
//!         Arc::new(DbStateStore::new(executor.clone())),
//!         StageSet::postgres(executor, &config),
//!     );
//!     let summary = orchestrator.run(&run).await?;
//!     println!("Migrated {} tables", summary.tables.len());
//!     Ok(())
//! }
//! ```

pub mod boot;
pub mod config;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod run;
pub mod sql;
pub mod stages;
pub mod state;
pub mod typemap;

// Re-exports for convenient access
pub use boot::{boot, check_connections, BootDecision};
pub use config::{Config, MigrationConfig, SourceConfig, TargetConfig};
pub use error::{MigrateError, Result};
pub use executor::{
    ClientHandle, DbExecutor, QueryExecutor, QueryRequest, QueryResult, Row, SslMode, Value,
    Vendor,
};
pub use orchestrator::{MigrationSummary, Orchestrator};
pub use run::{discover_tables, filter_tables, MigrationRun};
pub use stages::{DataTransfer, Reporter, RunStage, StageSet, TableStage};
pub use state::{DbStateStore, MemoryStateStore, Stage, StateStore};
