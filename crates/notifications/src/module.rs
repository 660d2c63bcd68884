//! Chain-engine surface of the notifications module.
//!
//! `notifications.send` v1 predates per-recipient delivery and is
//! deprecated: definitions that still carry it keep resolving, new ones must
//! use v2.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use hearth_chains::{
    ActionContext, ActionDescriptor, ActionFailure, ActionHandler, ActionSuccess,
    CompensationContext, CompensationFailure, CreatedEntity, ModuleBundle,
};
use hearth_core::DomainError;

use crate::notification::NotificationService;

const MODULE: &str = "notifications";

/// Actions the notifications module contributes to the chain engine.
/// It offers no triggers.
pub fn bundle(service: Arc<NotificationService>) -> ModuleBundle {
    ModuleBundle::new(MODULE)
        .action(
            ActionDescriptor::new("notifications.send", 1, "Send a notification (legacy)").deprecated(),
            Arc::new(LegacySendAction {
                service: service.clone(),
            }),
        )
        .action(
            ActionDescriptor::new("notifications.send", 2, "Send a notification")
                .with_timeout(Duration::from_secs(10)),
            Arc::new(SendAction { service }),
        )
}

fn retract_rows(
    service: &NotificationService,
    ctx: &CompensationContext,
) -> Result<(), CompensationFailure> {
    for row in &ctx.created_entities {
        if row.entity_type != "notification" {
            continue;
        }
        match service.retract(ctx.family_id, row.entity_id) {
            Ok(()) | Err(DomainError::NotFound) => {}
            Err(e) => return Err(CompensationFailure::new(e.to_string())),
        }
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct LegacySendInput {
    message: String,
}

/// v1: broadcast-only, single `message` field.
struct LegacySendAction {
    service: Arc<NotificationService>,
}

impl ActionHandler for LegacySendAction {
    fn execute(&self, ctx: &ActionContext) -> Result<ActionSuccess, ActionFailure> {
        let input: LegacySendInput = serde_json::from_value(ctx.input.clone())
            .map_err(|e| ActionFailure::fatal(format!("invalid input: {e}")))?;

        let notification = self
            .service
            .send(ctx.family_id, None, input.message)
            .map_err(|e| ActionFailure::fatal(e.to_string()))?;

        Ok(ActionSuccess::with_output(json!({
            "notification_id": notification.id,
        }))
        .and_entity(CreatedEntity::new("notification", notification.id, MODULE)))
    }

    fn compensate(&self, ctx: &CompensationContext) -> Result<(), CompensationFailure> {
        retract_rows(&self.service, ctx)
    }
}

#[derive(Debug, Deserialize)]
struct SendInput {
    body: String,
    #[serde(default)]
    recipient: Option<String>,
}

struct SendAction {
    service: Arc<NotificationService>,
}

impl ActionHandler for SendAction {
    fn execute(&self, ctx: &ActionContext) -> Result<ActionSuccess, ActionFailure> {
        let input: SendInput = serde_json::from_value(ctx.input.clone())
            .map_err(|e| ActionFailure::fatal(format!("invalid input: {e}")))?;

        let notification = self
            .service
            .send(ctx.family_id, input.recipient, input.body)
            .map_err(|e| ActionFailure::fatal(e.to_string()))?;

        Ok(ActionSuccess::with_output(json!({
            "notification_id": notification.id,
            "recipient": notification.recipient,
        }))
        .and_entity(CreatedEntity::new("notification", notification.id, MODULE)))
    }

    fn compensate(&self, ctx: &CompensationContext) -> Result<(), CompensationFailure> {
        retract_rows(&self.service, ctx)
    }
}
