//! The chain registry: triggers and actions modules expose to the engine.
//!
//! Modules contribute a [`ModuleBundle`] each during startup; the builder
//! checks for collisions and freezes into an immutable [`ChainRegistry`]
//! before any definition is validated or any execution runs. Nothing
//! registers after the freeze.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::action::ActionHandler;

/// Describes an event type a module offers as a chain trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerDescriptor {
    pub event_type: String,
    pub module: String,
    /// Human-readable copy for the definition editor.
    pub description: String,
}

/// Describes one version of an action a module offers as a chain step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionDescriptor {
    pub action_type: String,
    pub version: u32,
    pub module: String,
    pub description: String,
    /// Deprecated actions stay resolvable for existing definitions but are
    /// hidden from listings and rejected in new definitions.
    pub deprecated: bool,
    /// Per-invocation wall-clock budget; `None` uses the engine default.
    pub timeout: Option<Duration>,
}

impl ActionDescriptor {
    /// The module field is stamped by the bundle at registration.
    pub fn new(action_type: impl Into<String>, version: u32, description: impl Into<String>) -> Self {
        Self {
            action_type: action_type.into(),
            version,
            module: String::new(),
            description: description.into(),
            deprecated: false,
            timeout: None,
        }
    }

    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Lookup key for a registered action version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionKey {
    pub action_type: String,
    pub version: u32,
}

impl ActionKey {
    pub fn new(action_type: impl Into<String>, version: u32) -> Self {
        Self {
            action_type: action_type.into(),
            version,
        }
    }
}

impl fmt::Display for ActionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} v{}", self.action_type, self.version)
    }
}

/// Everything one feature module contributes to the chain engine.
pub struct ModuleBundle {
    module: String,
    triggers: Vec<TriggerDescriptor>,
    actions: Vec<(ActionDescriptor, Arc<dyn ActionHandler>)>,
}

impl ModuleBundle {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            triggers: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn trigger(mut self, event_type: impl Into<String>, description: impl Into<String>) -> Self {
        self.triggers.push(TriggerDescriptor {
            event_type: event_type.into(),
            module: self.module.clone(),
            description: description.into(),
        });
        self
    }

    pub fn action(mut self, descriptor: ActionDescriptor, handler: Arc<dyn ActionHandler>) -> Self {
        let descriptor = ActionDescriptor {
            module: self.module.clone(),
            ..descriptor
        };
        self.actions.push((descriptor, handler));
        self
    }

    pub fn module(&self) -> &str {
        &self.module
    }
}

impl fmt::Debug for ModuleBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleBundle")
            .field("module", &self.module)
            .field("triggers", &self.triggers.len())
            .field("actions", &self.actions.len())
            .finish()
    }
}

/// Registration collisions are startup bugs, reported eagerly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("trigger `{event_type}` registered by both `{existing}` and `{module}`")]
    DuplicateTrigger {
        event_type: String,
        existing: String,
        module: String,
    },

    #[error("action `{action_type}` v{version} registered by both `{existing}` and `{module}`")]
    DuplicateAction {
        action_type: String,
        version: u32,
        existing: String,
        module: String,
    },
}

/// Accumulates module bundles during startup.
#[derive(Default)]
pub struct ChainRegistryBuilder {
    triggers: HashMap<String, TriggerDescriptor>,
    actions: HashMap<ActionKey, (ActionDescriptor, Arc<dyn ActionHandler>)>,
}

impl ChainRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, bundle: ModuleBundle) -> Result<Self, RegistryError> {
        for trigger in bundle.triggers {
            match self.triggers.entry(trigger.event_type.clone()) {
                Entry::Occupied(existing) => {
                    return Err(RegistryError::DuplicateTrigger {
                        event_type: trigger.event_type,
                        existing: existing.get().module.clone(),
                        module: trigger.module,
                    });
                }
                Entry::Vacant(slot) => {
                    slot.insert(trigger);
                }
            }
        }

        for (descriptor, handler) in bundle.actions {
            let key = ActionKey::new(descriptor.action_type.clone(), descriptor.version);
            match self.actions.entry(key) {
                Entry::Occupied(existing) => {
                    return Err(RegistryError::DuplicateAction {
                        action_type: descriptor.action_type,
                        version: descriptor.version,
                        existing: existing.get().0.module.clone(),
                        module: descriptor.module,
                    });
                }
                Entry::Vacant(slot) => {
                    slot.insert((descriptor, handler));
                }
            }
        }

        Ok(self)
    }

    /// Freeze into the immutable registry the engine runs against.
    pub fn build(self) -> ChainRegistry {
        ChainRegistry {
            triggers: self.triggers,
            actions: self.actions,
        }
    }
}

impl fmt::Debug for ChainRegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainRegistryBuilder")
            .field("triggers", &self.triggers.len())
            .field("actions", &self.actions.len())
            .finish()
    }
}

/// Immutable lookup table of triggers and action handlers.
pub struct ChainRegistry {
    triggers: HashMap<String, TriggerDescriptor>,
    actions: HashMap<ActionKey, (ActionDescriptor, Arc<dyn ActionHandler>)>,
}

impl ChainRegistry {
    pub fn has_trigger(&self, event_type: &str) -> bool {
        self.triggers.contains_key(event_type)
    }

    pub fn trigger(&self, event_type: &str) -> Option<&TriggerDescriptor> {
        self.triggers.get(event_type)
    }

    /// Resolve an action descriptor, deprecated versions included.
    pub fn action(&self, action_type: &str, version: u32) -> Option<&ActionDescriptor> {
        self.actions
            .get(&ActionKey::new(action_type, version))
            .map(|(descriptor, _)| descriptor)
    }

    /// Resolve a handler, deprecated versions included.
    pub fn handler(&self, action_type: &str, version: u32) -> Option<Arc<dyn ActionHandler>> {
        self.actions
            .get(&ActionKey::new(action_type, version))
            .map(|(_, handler)| Arc::clone(handler))
    }

    /// Triggers offered to the definition editor, sorted by event type.
    pub fn available_triggers(&self) -> Vec<&TriggerDescriptor> {
        let mut triggers: Vec<_> = self.triggers.values().collect();
        triggers.sort_by(|a, b| a.event_type.cmp(&b.event_type));
        triggers
    }

    /// Actions offered to the definition editor: deprecated versions are
    /// omitted. Sorted by action type, then version.
    pub fn available_actions(&self) -> Vec<&ActionDescriptor> {
        let mut actions: Vec<_> = self
            .actions
            .values()
            .map(|(descriptor, _)| descriptor)
            .filter(|descriptor| !descriptor.deprecated)
            .collect();
        actions.sort_by(|a, b| {
            a.action_type
                .cmp(&b.action_type)
                .then(a.version.cmp(&b.version))
        });
        actions
    }
}

impl fmt::Debug for ChainRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainRegistry")
            .field("triggers", &self.triggers.len())
            .field("actions", &self.actions.len())
            .finish()
    }
}
