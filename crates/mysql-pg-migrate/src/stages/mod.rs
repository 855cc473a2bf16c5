//! Stage collaborators driven by the orchestrator.
//!
//! The orchestrator only sequences and checkpoints; the work itself lives
//! behind the traits in this module:
//!
//! - [`DataTransfer`]: copies table contents and owns the data-pool staging table.
//! - [`TableStage`]: one per-table finalization step (enum, null, default,
//!   sequence, index/key, comment, and the sequence resync used in data-only mode).
//! - [`RunStage`]: a cross-table step (foreign keys, views, storage reclamation).
//! - [`Reporter`]: receives the completion report.
//!
//! [`StageSet::postgres`] wires the default MySQL → PostgreSQL implementations
//! over a shared [`QueryExecutor`].

pub mod catalog;
mod foreign_key;
mod index;
mod reclaim;
mod report;
mod schema;
mod sequence;
mod transfer;
mod view;

pub use foreign_key::ForeignKeyStage;
pub use index::IndexStage;
pub use reclaim::ReclaimStage;
pub use report::{format_elapsed, ConsoleReporter};
pub use schema::{CommentStage, DefaultStage, EnumStage, NullStage};
pub use sequence::{SequenceResyncStage, SequenceStage};
pub use transfer::CopyTransfer;
pub use view::ViewStage;

use async_trait::async_trait;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{MigrateError, Result};
use crate::executor::QueryExecutor;
use crate::run::MigrationRun;

/// Copies table contents from source to target.
#[async_trait]
pub trait DataTransfer: Send + Sync {
    /// Load every table of the run.
    async fn run(&self, run: &MigrationRun) -> Result<()>;

    /// Drop the staging table used to track per-table transfer progress.
    async fn drop_staging(&self, run: &MigrationRun) -> Result<()>;
}

/// A finalization step applied to one table.
#[async_trait]
pub trait TableStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply(&self, run: &MigrationRun, table: &str) -> Result<()>;
}

/// A step applied once to the whole run.
#[async_trait]
pub trait RunStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn apply(&self, run: &MigrationRun) -> Result<()>;
}

/// Receives human-readable progress and the completion report.
pub trait Reporter: Send + Sync {
    fn emit(&self, run: &MigrationRun, message: &str);
}

/// Every collaborator the orchestrator drives.
#[derive(Clone)]
pub struct StageSet {
    pub transfer: Arc<dyn DataTransfer>,
    pub enums: Arc<dyn TableStage>,
    pub nulls: Arc<dyn TableStage>,
    pub defaults: Arc<dyn TableStage>,
    pub sequences: Arc<dyn TableStage>,
    pub indexes: Arc<dyn TableStage>,
    pub comments: Arc<dyn TableStage>,
    /// Data-only replacement for the whole per-table chain.
    pub sequence_resync: Arc<dyn TableStage>,
    pub foreign_keys: Arc<dyn RunStage>,
    pub views: Arc<dyn RunStage>,
    pub reclaim: Arc<dyn RunStage>,
    pub reporter: Arc<dyn Reporter>,
}

impl StageSet {
    /// Default MySQL → PostgreSQL stages over one executor.
    pub fn postgres(executor: Arc<dyn QueryExecutor>, config: &Config) -> Self {
        Self {
            transfer: Arc::new(CopyTransfer::new(
                executor.clone(),
                config.migration.max_connections,
                config.migration.batch_size,
            )),
            enums: Arc::new(EnumStage::new(executor.clone())),
            nulls: Arc::new(NullStage::new(executor.clone())),
            defaults: Arc::new(DefaultStage::new(executor.clone())),
            sequences: Arc::new(SequenceStage::new(executor.clone())),
            indexes: Arc::new(IndexStage::new(executor.clone())),
            comments: Arc::new(CommentStage::new(executor.clone())),
            sequence_resync: Arc::new(SequenceResyncStage::new(executor.clone())),
            foreign_keys: Arc::new(ForeignKeyStage::new(executor.clone())),
            views: Arc::new(ViewStage::new(executor.clone())),
            reclaim: Arc::new(ReclaimStage::new(executor)),
            reporter: Arc::new(ConsoleReporter::new()),
        }
    }

    /// Per-table finalization steps in the order they must run within a table.
    pub fn finalization_chain(&self) -> [Arc<dyn TableStage>; 6] {
        [
            self.enums.clone(),
            self.nulls.clone(),
            self.defaults.clone(),
            self.sequences.clone(),
            self.indexes.clone(),
            self.comments.clone(),
        ]
    }
}

/// Run `work` for every table concurrently on the current task and wait for
/// all of them. Every failure is collected into one barrier error.
pub async fn for_each_table<'a, F, Fut>(stage: &str, tables: &'a [String], work: F) -> Result<()>
where
    F: Fn(&'a str) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let outcomes = join_all(tables.iter().map(|table| {
        let unit = work(table.as_str());
        async move { (table, unit.await) }
    }))
    .await;

    let failures: Vec<(String, String)> = outcomes
        .into_iter()
        .filter_map(|(table, outcome)| outcome.err().map(|e| (table.clone(), e.to_string())))
        .collect();

    if failures.is_empty() {
        Ok(())
    } else {
        Err(MigrateError::Barrier {
            stage: stage.to_string(),
            failures,
        })
    }
}
