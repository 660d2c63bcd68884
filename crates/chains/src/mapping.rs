//! Deterministic input templates for chain steps.
//!
//! A step's input is a JSON document containing `{{...}}` placeholders:
//!
//! - `{{trigger}}` / `{{trigger.some.path}}`: the trigger payload
//! - `{{steps.N.output}}` / `{{steps.N.output.some.path}}`: output of a
//!   prior step
//! - `{{steps.N.entity.some_type}}`: id of an entity a prior step created
//! - `{{correlation_id}}`, `{{family_id}}`, `{{execution_id}}`
//!
//! A string that is exactly one placeholder resolves to the referenced JSON
//! value of any shape. Placeholders embedded in a larger string must resolve
//! to scalars and are interpolated as text. Resolution is pure: same
//! template, same recorded data, same result.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use hearth_core::{EntityId, FamilyId};

use crate::id::ChainExecutionId;
use crate::ledger::EntityMapping;

/// A template could not be resolved (or, at save time, parsed).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unterminated placeholder in `{0}`")]
    Unterminated(String),

    #[error("empty placeholder")]
    EmptyPlaceholder,

    #[error("malformed placeholder `{0}`")]
    Malformed(String),

    #[error("unknown placeholder root in `{0}`")]
    UnknownRoot(String),

    #[error("`{0}` does not exist in the referenced value")]
    PathNotFound(String),

    #[error("step {0} recorded no output")]
    MissingStepOutput(u32),

    #[error("step {step} created no entity of type `{entity_type}`")]
    MissingEntity { step: u32, entity_type: String },

    #[error("`{0}` is not a scalar and cannot be spliced into a string")]
    NonScalar(String),
}

/// The recorded data placeholders resolve against.
#[derive(Debug)]
pub struct TemplateInputs<'a> {
    trigger: &'a JsonValue,
    family_id: FamilyId,
    correlation_id: Uuid,
    execution_id: ChainExecutionId,
    step_outputs: BTreeMap<u32, &'a JsonValue>,
    entities: &'a [EntityMapping],
}

impl<'a> TemplateInputs<'a> {
    pub fn new(
        trigger: &'a JsonValue,
        family_id: FamilyId,
        correlation_id: Uuid,
        execution_id: ChainExecutionId,
    ) -> Self {
        Self {
            trigger,
            family_id,
            correlation_id,
            execution_id,
            step_outputs: BTreeMap::new(),
            entities: &[],
        }
    }

    /// Record the output of a succeeded step. Steps without output (failed
    /// and tolerated, or plain output-less) are simply never recorded.
    pub fn add_step_output(&mut self, index: u32, output: &'a JsonValue) {
        self.step_outputs.insert(index, output);
    }

    pub fn set_entities(&mut self, entities: &'a [EntityMapping]) {
        self.entities = entities;
    }

    fn entity(&self, step: u32, entity_type: &str) -> Option<EntityId> {
        self.entities
            .iter()
            .find(|row| row.step_index == step && row.entity_type == entity_type)
            .map(|row| row.entity_id)
    }
}

/// Resolve a template against recorded data.
pub fn resolve(template: &JsonValue, inputs: &TemplateInputs<'_>) -> Result<JsonValue, TemplateError> {
    match template {
        JsonValue::String(raw) => resolve_string(raw, inputs),
        JsonValue::Array(items) => items
            .iter()
            .map(|item| resolve(item, inputs))
            .collect::<Result<Vec<_>, _>>()
            .map(JsonValue::Array),
        JsonValue::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                out.insert(key.clone(), resolve(value, inputs)?);
            }
            Ok(JsonValue::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Collect the step indices a template references, validating placeholder
/// syntax along the way. Used at definition save time to reject templates
/// that point forwards (or at nothing).
pub fn referenced_steps(template: &JsonValue) -> Result<BTreeSet<u32>, TemplateError> {
    let mut steps = BTreeSet::new();
    collect_refs(template, &mut steps)?;
    Ok(steps)
}

fn collect_refs(template: &JsonValue, steps: &mut BTreeSet<u32>) -> Result<(), TemplateError> {
    match template {
        JsonValue::String(raw) => {
            for expr in placeholders(raw)? {
                match parse_expr(expr)? {
                    Expr::StepOutput(index, _) | Expr::StepEntity(index, _) => {
                        steps.insert(index);
                    }
                    _ => {}
                }
            }
            Ok(())
        }
        JsonValue::Array(items) => {
            for item in items {
                collect_refs(item, steps)?;
            }
            Ok(())
        }
        JsonValue::Object(map) => {
            for value in map.values() {
                collect_refs(value, steps)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

enum Expr<'e> {
    Trigger(Vec<&'e str>),
    StepOutput(u32, Vec<&'e str>),
    StepEntity(u32, &'e str),
    CorrelationId,
    FamilyId,
    ExecutionId,
}

fn parse_expr(expr: &str) -> Result<Expr<'_>, TemplateError> {
    let malformed = || TemplateError::Malformed(expr.to_string());

    let mut parts = expr.split('.');
    let root = parts.next().unwrap_or("");

    match root {
        "trigger" => Ok(Expr::Trigger(parts.collect())),
        "correlation_id" | "family_id" | "execution_id" => {
            if parts.next().is_some() {
                return Err(malformed());
            }
            Ok(match root {
                "correlation_id" => Expr::CorrelationId,
                "family_id" => Expr::FamilyId,
                _ => Expr::ExecutionId,
            })
        }
        "steps" => {
            let index: u32 = parts
                .next()
                .and_then(|raw| raw.parse().ok())
                .ok_or_else(malformed)?;
            match parts.next() {
                Some("output") => Ok(Expr::StepOutput(index, parts.collect())),
                Some("entity") => {
                    let entity_type = parts.next().ok_or_else(malformed)?;
                    if entity_type.is_empty() || parts.next().is_some() {
                        return Err(malformed());
                    }
                    Ok(Expr::StepEntity(index, entity_type))
                }
                _ => Err(malformed()),
            }
        }
        _ => Err(TemplateError::UnknownRoot(expr.to_string())),
    }
}

fn evaluate(expr: &str, inputs: &TemplateInputs<'_>) -> Result<JsonValue, TemplateError> {
    match parse_expr(expr)? {
        Expr::Trigger(path) => dig(inputs.trigger, &path, expr),
        Expr::StepOutput(index, path) => {
            let output = inputs
                .step_outputs
                .get(&index)
                .ok_or(TemplateError::MissingStepOutput(index))?;
            dig(output, &path, expr)
        }
        Expr::StepEntity(index, entity_type) => inputs
            .entity(index, entity_type)
            .map(|id| JsonValue::String(id.to_string()))
            .ok_or_else(|| TemplateError::MissingEntity {
                step: index,
                entity_type: entity_type.to_string(),
            }),
        Expr::CorrelationId => Ok(JsonValue::String(inputs.correlation_id.to_string())),
        Expr::FamilyId => Ok(JsonValue::String(inputs.family_id.to_string())),
        Expr::ExecutionId => Ok(JsonValue::String(inputs.execution_id.to_string())),
    }
}

fn dig(value: &JsonValue, path: &[&str], expr: &str) -> Result<JsonValue, TemplateError> {
    let mut current = value;
    for part in path {
        current = match current {
            JsonValue::Object(map) => map
                .get(*part)
                .ok_or_else(|| TemplateError::PathNotFound(expr.to_string()))?,
            JsonValue::Array(items) => part
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get(index))
                .ok_or_else(|| TemplateError::PathNotFound(expr.to_string()))?,
            _ => return Err(TemplateError::PathNotFound(expr.to_string())),
        };
    }
    Ok(current.clone())
}

/// Iterate the placeholder expressions of a raw string, trimmed.
fn placeholders(raw: &str) -> Result<Vec<&str>, TemplateError> {
    let mut found = Vec::new();
    let mut rest = raw;
    while let Some(open) = rest.find("{{") {
        let after = &rest[open + 2..];
        let close = after
            .find("}}")
            .ok_or_else(|| TemplateError::Unterminated(raw.to_string()))?;
        let expr = after[..close].trim();
        if expr.is_empty() {
            return Err(TemplateError::EmptyPlaceholder);
        }
        found.push(expr);
        rest = &after[close + 2..];
    }
    Ok(found)
}

/// The whole string is a single placeholder, nothing around it.
fn exact_placeholder(raw: &str) -> Option<&str> {
    let inner = raw.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

fn resolve_string(raw: &str, inputs: &TemplateInputs<'_>) -> Result<JsonValue, TemplateError> {
    if !raw.contains("{{") {
        return Ok(JsonValue::String(raw.to_string()));
    }

    if let Some(expr) = exact_placeholder(raw) {
        if expr.is_empty() {
            return Err(TemplateError::EmptyPlaceholder);
        }
        return evaluate(expr, inputs);
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let close = after
            .find("}}")
            .ok_or_else(|| TemplateError::Unterminated(raw.to_string()))?;
        let expr = after[..close].trim();
        if expr.is_empty() {
            return Err(TemplateError::EmptyPlaceholder);
        }
        let value = evaluate(expr, inputs)?;
        match &value {
            JsonValue::String(s) => out.push_str(s),
            JsonValue::Number(n) => out.push_str(&n.to_string()),
            JsonValue::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            _ => return Err(TemplateError::NonScalar(expr.to_string())),
        }
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    Ok(JsonValue::String(out))
}
