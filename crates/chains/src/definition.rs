//! Chain definitions: the recipes families configure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use hearth_core::FamilyId;

use crate::id::ChainDefinitionId;
use crate::mapping;
use crate::registry::ChainRegistry;

/// One step of a chain: which action to run and how to build its input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainStep {
    /// Position in the chain; contiguous from zero.
    pub index: u32,
    pub action_type: String,
    pub action_version: u32,
    /// JSON template resolved against the trigger and prior steps.
    pub input_template: JsonValue,
    /// When true, a failure of this step is tolerated: no compensation,
    /// later steps still run.
    pub continue_on_failure: bool,
}

impl ChainStep {
    pub fn new(
        index: u32,
        action_type: impl Into<String>,
        action_version: u32,
        input_template: JsonValue,
    ) -> Self {
        Self {
            index,
            action_type: action_type.into(),
            action_version,
            input_template,
            continue_on_failure: false,
        }
    }

    pub fn tolerating_failure(mut self) -> Self {
        self.continue_on_failure = true;
        self
    }
}

/// Why a definition was rejected at save time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("definition name must not be empty")]
    EmptyName,

    #[error("definition must contain at least one step")]
    NoSteps,

    #[error("unknown trigger event type `{0}`")]
    UnknownTrigger(String),

    #[error("step {index}: unknown action `{action_type}` v{version}")]
    UnknownAction {
        index: u32,
        action_type: String,
        version: u32,
    },

    #[error("step {index}: action `{action_type}` v{version} is deprecated")]
    DeprecatedAction {
        index: u32,
        action_type: String,
        version: u32,
    },

    #[error("step indices must be contiguous from zero; position {position} holds index {found}")]
    NonContiguousIndices { position: usize, found: u32 },

    #[error("step {index}: template references step {referenced}, which does not run before it")]
    ForwardReference { index: u32, referenced: u32 },

    #[error("step {index}: invalid input template: {message}")]
    InvalidTemplate { index: u32, message: String },
}

/// A family's automation recipe: one trigger, ordered steps.
///
/// Reordering steps means submitting a full replacement list whose indices
/// are rewritten and revalidated in one update; there is no partial
/// reindexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainDefinition {
    id: ChainDefinitionId,
    family_id: FamilyId,
    name: String,
    enabled: bool,
    trigger_event_type: String,
    steps: Vec<ChainStep>,
    revision: u64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ChainDefinition {
    /// Validate and construct. New definitions start enabled.
    pub fn create(
        family_id: FamilyId,
        name: impl Into<String>,
        trigger_event_type: impl Into<String>,
        steps: Vec<ChainStep>,
        registry: &ChainRegistry,
    ) -> Result<Self, DefinitionError> {
        let name = name.into();
        let trigger_event_type = trigger_event_type.into();
        validate(&name, &trigger_event_type, &steps, registry)?;

        let now = Utc::now();
        Ok(Self {
            id: ChainDefinitionId::new(),
            family_id,
            name,
            enabled: true,
            trigger_event_type,
            steps,
            revision: 1,
            created_at: now,
            updated_at: now,
        })
    }

    /// Replace the recipe wholesale. Enablement is untouched.
    pub fn update(
        &mut self,
        name: impl Into<String>,
        trigger_event_type: impl Into<String>,
        steps: Vec<ChainStep>,
        registry: &ChainRegistry,
    ) -> Result<(), DefinitionError> {
        let name = name.into();
        let trigger_event_type = trigger_event_type.into();
        validate(&name, &trigger_event_type, &steps, registry)?;

        self.name = name;
        self.trigger_event_type = trigger_event_type;
        self.steps = steps;
        self.touch();
        Ok(())
    }

    pub fn enable(&mut self) {
        if !self.enabled {
            self.enabled = true;
            self.touch();
        }
    }

    pub fn disable(&mut self) {
        if self.enabled {
            self.enabled = false;
            self.touch();
        }
    }

    fn touch(&mut self) {
        self.revision += 1;
        self.updated_at = Utc::now();
    }

    pub fn id(&self) -> ChainDefinitionId {
        self.id
    }

    pub fn family_id(&self) -> FamilyId {
        self.family_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn trigger_event_type(&self) -> &str {
        &self.trigger_event_type
    }

    pub fn steps(&self) -> &[ChainStep] {
        &self.steps
    }

    pub fn step(&self, index: u32) -> Option<&ChainStep> {
        self.steps.get(index as usize)
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Validate a candidate recipe without constructing anything.
///
/// Deprecated actions are rejected here even though they remain resolvable
/// at run time: existing definitions keep working, new recipes cannot pick
/// them up.
pub fn validate(
    name: &str,
    trigger_event_type: &str,
    steps: &[ChainStep],
    registry: &ChainRegistry,
) -> Result<(), DefinitionError> {
    if name.trim().is_empty() {
        return Err(DefinitionError::EmptyName);
    }
    if steps.is_empty() {
        return Err(DefinitionError::NoSteps);
    }
    if !registry.has_trigger(trigger_event_type) {
        return Err(DefinitionError::UnknownTrigger(trigger_event_type.into()));
    }

    for (position, step) in steps.iter().enumerate() {
        if step.index as usize != position {
            return Err(DefinitionError::NonContiguousIndices {
                position,
                found: step.index,
            });
        }

        let descriptor = registry
            .action(&step.action_type, step.action_version)
            .ok_or_else(|| DefinitionError::UnknownAction {
                index: step.index,
                action_type: step.action_type.clone(),
                version: step.action_version,
            })?;
        if descriptor.deprecated {
            return Err(DefinitionError::DeprecatedAction {
                index: step.index,
                action_type: step.action_type.clone(),
                version: step.action_version,
            });
        }

        let referenced = mapping::referenced_steps(&step.input_template).map_err(|e| {
            DefinitionError::InvalidTemplate {
                index: step.index,
                message: e.to_string(),
            }
        })?;
        if let Some(&referenced) = referenced.iter().find(|&&r| r >= step.index) {
            return Err(DefinitionError::ForwardReference {
                index: step.index,
                referenced,
            });
        }
    }

    Ok(())
}
