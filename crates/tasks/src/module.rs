//! Chain-engine surface of the tasks module.
//!
//! `tasks.create_checklist` exists in two versions: v1 takes a title and
//! items, v2 adds an assignee. Both stay registered so definitions written
//! against v1 keep running while new ones pick v2.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;

use hearth_chains::{
    ActionContext, ActionDescriptor, ActionFailure, ActionHandler, ActionSuccess,
    CompensationContext, CompensationFailure, CreatedEntity, ModuleBundle,
};
use hearth_core::DomainError;

use crate::checklist::{EVENT_COMPLETED, TaskService};

const MODULE: &str = "tasks";

/// Triggers and actions the tasks module contributes to the chain engine.
pub fn bundle(service: Arc<TaskService>) -> ModuleBundle {
    ModuleBundle::new(MODULE)
        .trigger(EVENT_COMPLETED, "Every item of a checklist was ticked off")
        .action(
            ActionDescriptor::new("tasks.create_checklist", 1, "Create a checklist"),
            Arc::new(CreateChecklistAction {
                service: service.clone(),
                with_assignee: false,
            }),
        )
        .action(
            ActionDescriptor::new("tasks.create_checklist", 2, "Create a checklist, optionally assigned"),
            Arc::new(CreateChecklistAction {
                service,
                with_assignee: true,
            }),
        )
}

#[derive(Debug, Deserialize)]
struct CreateChecklistInput {
    title: String,
    #[serde(default)]
    items: Vec<String>,
    #[serde(default)]
    assignee: Option<String>,
}

struct CreateChecklistAction {
    service: Arc<TaskService>,
    /// v2 honours the assignee field; v1 ignores it.
    with_assignee: bool,
}

impl ActionHandler for CreateChecklistAction {
    fn execute(&self, ctx: &ActionContext) -> Result<ActionSuccess, ActionFailure> {
        let input: CreateChecklistInput = serde_json::from_value(ctx.input.clone())
            .map_err(|e| ActionFailure::fatal(format!("invalid input: {e}")))?;

        let assignee = if self.with_assignee { input.assignee } else { None };
        let checklist = self
            .service
            .create_checklist(ctx.family_id, input.title, input.items, assignee)
            .map_err(|e| ActionFailure::fatal(e.to_string()))?;

        Ok(ActionSuccess::with_output(json!({
            "checklist_id": checklist.id,
            "title": checklist.title,
            "item_count": checklist.items.len(),
            "assignee": checklist.assignee,
        }))
        .and_entity(CreatedEntity::new("checklist", checklist.id, MODULE)))
    }

    fn compensate(&self, ctx: &CompensationContext) -> Result<(), CompensationFailure> {
        for row in &ctx.created_entities {
            if row.entity_type != "checklist" {
                continue;
            }
            match self.service.remove_checklist(ctx.family_id, row.entity_id) {
                Ok(()) | Err(DomainError::NotFound) => {}
                Err(e) => return Err(CompensationFailure::new(e.to_string())),
            }
        }
        Ok(())
    }
}
