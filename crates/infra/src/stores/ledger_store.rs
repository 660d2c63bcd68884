//! Entity-mapping ledger storage.

use std::sync::{Arc, RwLock};

use hearth_chains::{ChainExecutionId, EntityMapping};

use super::StoreError;

/// Ledger store abstraction. Append-only.
pub trait LedgerStore: Send + Sync {
    /// Record entities a step created.
    fn append(&self, rows: Vec<EntityMapping>) -> Result<(), StoreError>;

    /// Every row of one execution, in insertion order.
    fn for_execution(
        &self,
        execution_id: ChainExecutionId,
    ) -> Result<Vec<EntityMapping>, StoreError>;

    /// Rows one step of one execution produced, in insertion order.
    fn for_step(
        &self,
        execution_id: ChainExecutionId,
        step_index: u32,
    ) -> Result<Vec<EntityMapping>, StoreError>;
}

/// In-memory ledger for tests/dev.
#[derive(Debug)]
pub struct InMemoryLedger {
    rows: RwLock<Vec<EntityMapping>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerStore for InMemoryLedger {
    fn append(&self, mut rows: Vec<EntityMapping>) -> Result<(), StoreError> {
        let mut stored = self.rows.write().map_err(|_| StoreError::poisoned())?;
        stored.append(&mut rows);
        Ok(())
    }

    fn for_execution(
        &self,
        execution_id: ChainExecutionId,
    ) -> Result<Vec<EntityMapping>, StoreError> {
        let rows = self.rows.read().map_err(|_| StoreError::poisoned())?;
        Ok(rows
            .iter()
            .filter(|row| row.execution_id == execution_id)
            .cloned()
            .collect())
    }

    fn for_step(
        &self,
        execution_id: ChainExecutionId,
        step_index: u32,
    ) -> Result<Vec<EntityMapping>, StoreError> {
        let rows = self.rows.read().map_err(|_| StoreError::poisoned())?;
        Ok(rows
            .iter()
            .filter(|row| row.execution_id == execution_id && row.step_index == step_index)
            .cloned()
            .collect())
    }
}
