//! Chain-engine surface of the calendar module.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use hearth_chains::{
    ActionContext, ActionDescriptor, ActionFailure, ActionHandler, ActionSuccess,
    CompensationContext, CompensationFailure, CreatedEntity, ModuleBundle, ScheduleRequest,
};
use hearth_core::{DomainError, EntityId};

use crate::entry::{CalendarService, EVENT_CREATED, EVENT_REMINDER_DUE};

const MODULE: &str = "calendar";

/// Triggers and actions the calendar contributes to the chain engine.
pub fn bundle(service: Arc<CalendarService>) -> ModuleBundle {
    ModuleBundle::new(MODULE)
        .trigger(EVENT_CREATED, "A calendar entry was created")
        .trigger(EVENT_REMINDER_DUE, "A scheduled reminder became due")
        .action(
            ActionDescriptor::new("calendar.create_event", 1, "Create a calendar entry"),
            Arc::new(CreateEntryAction { service }),
        )
        .action(
            ActionDescriptor::new("calendar.schedule_reminder", 1, "Schedule a reminder for later")
                .with_timeout(Duration::from_secs(5)),
            Arc::new(ScheduleReminderAction),
        )
}

#[derive(Debug, Deserialize)]
struct CreateEntryInput {
    title: String,
    starts_at: DateTime<Utc>,
    #[serde(default)]
    location: Option<String>,
}

struct CreateEntryAction {
    service: Arc<CalendarService>,
}

impl ActionHandler for CreateEntryAction {
    fn execute(&self, ctx: &ActionContext) -> Result<ActionSuccess, ActionFailure> {
        let input: CreateEntryInput = serde_json::from_value(ctx.input.clone())
            .map_err(|e| ActionFailure::fatal(format!("invalid input: {e}")))?;

        let (entry, _event) = self
            .service
            .create_entry(ctx.family_id, input.title, input.starts_at, input.location)
            .map_err(|e| ActionFailure::fatal(e.to_string()))?;

        Ok(ActionSuccess::with_output(json!({
            "entry_id": entry.id,
            "title": entry.title,
            "starts_at": entry.starts_at,
        }))
        .and_entity(CreatedEntity::new("calendar_event", entry.id, MODULE)))
    }

    fn compensate(&self, ctx: &CompensationContext) -> Result<(), CompensationFailure> {
        for row in &ctx.created_entities {
            if row.entity_type != "calendar_event" {
                continue;
            }
            match self.service.remove_entry(ctx.family_id, row.entity_id) {
                // Already gone counts as undone; compensation may rerun.
                Ok(()) | Err(DomainError::NotFound) => {}
                Err(e) => return Err(CompensationFailure::new(e.to_string())),
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ScheduleReminderInput {
    fire_at: DateTime<Utc>,
    message: String,
    /// Minutes between repeats; omitted means one-shot.
    #[serde(default)]
    repeat_minutes: Option<u32>,
}

/// Stateless: the engine's scheduler owns the resulting job.
struct ScheduleReminderAction;

impl ActionHandler for ScheduleReminderAction {
    fn execute(&self, ctx: &ActionContext) -> Result<ActionSuccess, ActionFailure> {
        let input: ScheduleReminderInput = serde_json::from_value(ctx.input.clone())
            .map_err(|e| ActionFailure::fatal(format!("invalid input: {e}")))?;

        let reminder_id = EntityId::new();
        let mut request = ScheduleRequest::new(
            input.fire_at,
            EVENT_REMINDER_DUE,
            "reminder",
            reminder_id,
            json!({
                "reminder_id": reminder_id,
                "message": input.message,
            }),
        );
        if let Some(minutes) = input.repeat_minutes {
            request = request.recurring(Duration::from_secs(u64::from(minutes) * 60));
        }

        Ok(ActionSuccess::with_output(json!({
            "reminder_id": reminder_id,
            "fire_at": input.fire_at,
        }))
        .and_schedule(request))
    }
}
