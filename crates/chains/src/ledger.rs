//! Entity-mapping ledger rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hearth_core::EntityId;

use crate::action::CreatedEntity;
use crate::id::ChainExecutionId;

/// One entity created by one step of one execution.
///
/// The ledger is append-only. Compensation reads it to find what a step left
/// behind, and later steps' templates address prior entities through it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMapping {
    pub execution_id: ChainExecutionId,
    pub step_index: u32,
    pub entity_type: String,
    pub entity_id: EntityId,
    pub module: String,
    pub recorded_at: DateTime<Utc>,
}

impl EntityMapping {
    pub fn from_created(
        execution_id: ChainExecutionId,
        step_index: u32,
        created: &CreatedEntity,
    ) -> Self {
        Self {
            execution_id,
            step_index,
            entity_type: created.entity_type.clone(),
            entity_id: created.entity_id,
            module: created.module.clone(),
            recorded_at: Utc::now(),
        }
    }
}
