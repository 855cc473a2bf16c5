//! Stage ledger: a durable record of which named stages have fully completed.
//!
//! The ledger is what makes a run resumable. A stage name is written only
//! after every unit of work belonging to it has succeeded, so a restart
//! redoes an unfinished stage from scratch instead of resuming mid-stage.
//!
//! Implementations:
//!
//! - [`DbStateStore`]: a table in the target schema, reached through the
//!   query executor.
//! - [`MemoryStateStore`]: in-process, for embedding and tests.

mod db;
mod memory;

pub use db::DbStateStore;
pub use memory::MemoryStateStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::run::MigrationRun;

/// A checkpointed stage of the pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Every table's rows have been copied.
    TablesLoaded,
    /// Every table has been through the per-table finalization sub-stages.
    PerTableConstraintsLoaded,
    ForeignKeysLoaded,
    ViewsLoaded,
    /// Storage reclamation finished; only teardown remains.
    StorageReclaimed,
}

impl Stage {
    /// Every stage, in execution order.
    pub const ALL: [Stage; 5] = [
        Stage::TablesLoaded,
        Stage::PerTableConstraintsLoaded,
        Stage::ForeignKeysLoaded,
        Stage::ViewsLoaded,
        Stage::StorageReclaimed,
    ];

    /// Ledger key for this stage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::TablesLoaded => "tables_loaded",
            Stage::PerTableConstraintsLoaded => "per_table_constraints_loaded",
            Stage::ForeignKeysLoaded => "foreign_keys_loaded",
            Stage::ViewsLoaded => "views_loaded",
            Stage::StorageReclaimed => "storage_reclaimed",
        }
    }

    pub fn parse(name: &str) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| s.as_str() == name)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistence for stage completion records.
///
/// Implementations must be `Send + Sync`; the orchestrator holds them as
/// `Arc<dyn StateStore>`.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Whether the ledger exists, i.e. a previous run did not finish.
    async fn state_table_exists(&self, run: &MigrationRun) -> Result<bool>;

    /// Whether `stage` is recorded as complete. A missing ledger means no.
    async fn is_stage_complete(&self, run: &MigrationRun, stage: Stage) -> Result<bool>;

    /// Record each stage as complete. Creates the ledger on first use and
    /// is idempotent per stage.
    async fn mark_stages_complete(&self, run: &MigrationRun, stages: &[Stage]) -> Result<()>;

    /// Remove the ledger. Irreversible; the last write of a successful run.
    async fn drop_state_table(&self, run: &MigrationRun) -> Result<()>;
}
