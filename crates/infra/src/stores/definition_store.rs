//! Chain definition storage.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use hearth_chains::{ChainDefinition, ChainDefinitionId};
use hearth_core::FamilyId;

use super::StoreError;

/// Definition store abstraction.
pub trait DefinitionStore: Send + Sync {
    /// Insert a freshly created definition.
    fn insert(&self, definition: ChainDefinition) -> Result<(), StoreError>;

    /// Persist a modified definition.
    fn update(&self, definition: &ChainDefinition) -> Result<(), StoreError>;

    /// Get a definition by ID.
    fn get(
        &self,
        family_id: FamilyId,
        definition_id: ChainDefinitionId,
    ) -> Result<Option<ChainDefinition>, StoreError>;

    /// All of a family's definitions, oldest first.
    fn list_for_family(&self, family_id: FamilyId) -> Result<Vec<ChainDefinition>, StoreError>;

    /// Enabled definitions of a family whose trigger matches `event_type`,
    /// oldest first. This is the activation query.
    fn enabled_for_trigger(
        &self,
        family_id: FamilyId,
        event_type: &str,
    ) -> Result<Vec<ChainDefinition>, StoreError>;
}

/// In-memory definition store for tests/dev.
#[derive(Debug)]
pub struct InMemoryDefinitionStore {
    definitions: RwLock<HashMap<ChainDefinitionId, ChainDefinition>>,
}

impl InMemoryDefinitionStore {
    pub fn new() -> Self {
        Self {
            definitions: RwLock::new(HashMap::new()),
        }
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for InMemoryDefinitionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DefinitionStore for InMemoryDefinitionStore {
    fn insert(&self, definition: ChainDefinition) -> Result<(), StoreError> {
        let mut definitions = self.definitions.write().map_err(|_| StoreError::poisoned())?;
        if definitions.contains_key(&definition.id()) {
            return Err(StoreError::AlreadyExists(definition.id().to_string()));
        }
        definitions.insert(definition.id(), definition);
        Ok(())
    }

    fn update(&self, definition: &ChainDefinition) -> Result<(), StoreError> {
        let mut definitions = self.definitions.write().map_err(|_| StoreError::poisoned())?;
        match definitions.get(&definition.id()) {
            Some(stored) if stored.family_id() == definition.family_id() => {
                definitions.insert(definition.id(), definition.clone());
                Ok(())
            }
            Some(_) => Err(StoreError::FamilyIsolation),
            None => Err(StoreError::NotFound(definition.id().to_string())),
        }
    }

    fn get(
        &self,
        family_id: FamilyId,
        definition_id: ChainDefinitionId,
    ) -> Result<Option<ChainDefinition>, StoreError> {
        let definitions = self.definitions.read().map_err(|_| StoreError::poisoned())?;
        match definitions.get(&definition_id) {
            Some(definition) if definition.family_id() == family_id => Ok(Some(definition.clone())),
            Some(_) => Err(StoreError::FamilyIsolation),
            None => Ok(None),
        }
    }

    fn list_for_family(&self, family_id: FamilyId) -> Result<Vec<ChainDefinition>, StoreError> {
        let definitions = self.definitions.read().map_err(|_| StoreError::poisoned())?;
        let mut result: Vec<_> = definitions
            .values()
            .filter(|d| d.family_id() == family_id)
            .cloned()
            .collect();

        result.sort_by_key(|d| d.created_at());
        Ok(result)
    }

    fn enabled_for_trigger(
        &self,
        family_id: FamilyId,
        event_type: &str,
    ) -> Result<Vec<ChainDefinition>, StoreError> {
        let definitions = self.definitions.read().map_err(|_| StoreError::poisoned())?;
        let mut result: Vec<_> = definitions
            .values()
            .filter(|d| {
                d.family_id() == family_id
                    && d.is_enabled()
                    && d.trigger_event_type() == event_type
            })
            .cloned()
            .collect();

        result.sort_by_key(|d| d.created_at());
        Ok(result)
    }
}
