//! In-process stage ledger.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use super::{Stage, StateStore};
use crate::error::{MigrateError, Result};
use crate::run::MigrationRun;

/// Ledger kept in memory, keyed by ledger table name so that runs against
/// different schemas do not share rows.
///
/// Clones of a run share state when they share the store, which is what a
/// restart within one process looks like.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    ledgers: Mutex<HashMap<String, BTreeSet<Stage>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages currently recorded for `run`, in execution order.
    pub fn completed(&self, run: &MigrationRun) -> Vec<Stage> {
        self.ledgers
            .lock()
            .ok()
            .and_then(|ledgers| {
                ledgers
                    .get(&run.state_table_name())
                    .map(|stages| stages.iter().copied().collect())
            })
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, BTreeSet<Stage>>>> {
        self.ledgers
            .lock()
            .map_err(|_| MigrateError::State("in-memory ledger lock poisoned".into()))
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn state_table_exists(&self, run: &MigrationRun) -> Result<bool> {
        Ok(self.lock()?.contains_key(&run.state_table_name()))
    }

    async fn is_stage_complete(&self, run: &MigrationRun, stage: Stage) -> Result<bool> {
        Ok(self
            .lock()?
            .get(&run.state_table_name())
            .is_some_and(|stages| stages.contains(&stage)))
    }

    async fn mark_stages_complete(&self, run: &MigrationRun, stages: &[Stage]) -> Result<()> {
        self.lock()?
            .entry(run.state_table_name())
            .or_default()
            .extend(stages.iter().copied());
        Ok(())
    }

    async fn drop_state_table(&self, run: &MigrationRun) -> Result<()> {
        self.lock()?.remove(&run.state_table_name());
        Ok(())
    }
}
