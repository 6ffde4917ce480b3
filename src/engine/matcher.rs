//! Trigger matching
//!
//! Decides whether an object mutation starts a workflow. Pure decision logic:
//! no side effects, no storage access. A malformed document or a broken
//! condition expression is a loud error rather than a silent non-match, so
//! definition bugs surface instead of disabling workflows quietly.

use crate::definition::DefinitionDocument;
use crate::expr::{self, TriggerContext};
use crate::types::{TriggerInput, WorkflowDefinition, WorkflowObject};

use super::errors::EngineError;

/// Whether this definition matches the incoming mutation event.
pub fn matches(
    def: &WorkflowDefinition,
    object: &WorkflowObject,
    input: &TriggerInput,
) -> Result<bool, EngineError> {
    if !def.active || def.schema_type != object.object_type {
        return Ok(false);
    }

    let doc = DefinitionDocument::from_value(&def.document)?;
    matches_document(&doc, input)
}

pub(crate) fn matches_document(
    doc: &DefinitionDocument,
    input: &TriggerInput,
) -> Result<bool, EngineError> {
    let trigger_hit = doc.triggers.iter().any(|trigger| {
        trigger.operation == input.event_type
            && (trigger.fields.is_empty()
                || trigger
                    .fields
                    .iter()
                    .any(|field| input.changed_fields.contains(field)))
    });

    if !trigger_hit {
        return Ok(false);
    }

    // Conditions are conjunctive; an empty list trivially matches
    let ctx = TriggerContext::from_input(input);
    for condition in &doc.conditions {
        if !expr::evaluate(&condition.expression, &ctx)? {
            return Ok(false);
        }
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventType, WorkflowKind};
    use chrono::Utc;
    use maplit::hashset;
    use serde_json::json;

    fn definition(active: bool, schema_type: &str, document: serde_json::Value) -> WorkflowDefinition {
        WorkflowDefinition {
            id: "def_1".to_string(),
            name: "test".to_string(),
            schema_type: schema_type.to_string(),
            workflow_kind: WorkflowKind::Approval,
            active,
            owner_id: None,
            document,
            version_hash: String::new(),
            created_at: Utc::now(),
        }
    }

    fn update_input(changed: &[&str]) -> TriggerInput {
        TriggerInput {
            event_type: EventType::Update,
            changed_fields: changed.iter().map(|f| f.to_string()).collect(),
            old: json!({"status": "draft"}),
            new: json!({"status": "published"}),
            actor_id: Some("usr_1".to_string()),
        }
    }

    fn basic_document() -> serde_json::Value {
        json!({
            "triggers": [{"operation": "UPDATE", "fields": ["status"]}],
            "conditions": [],
            "actions": []
        })
    }

    #[test]
    fn test_matches_on_operation_and_field() {
        let def = definition(true, "Control", basic_document());
        let object = WorkflowObject::new("Control", "ctl_1");

        assert!(matches(&def, &object, &update_input(&["status"])).unwrap());
    }

    #[test]
    fn test_inactive_definition_never_matches() {
        let def = definition(false, "Control", basic_document());
        let object = WorkflowObject::new("Control", "ctl_1");

        assert!(!matches(&def, &object, &update_input(&["status"])).unwrap());
    }

    #[test]
    fn test_schema_type_must_match() {
        let def = definition(true, "Risk", basic_document());
        let object = WorkflowObject::new("Control", "ctl_1");

        assert!(!matches(&def, &object, &update_input(&["status"])).unwrap());
    }

    #[test]
    fn test_disjoint_changed_fields_do_not_match() {
        let def = definition(true, "Control", basic_document());
        let object = WorkflowObject::new("Control", "ctl_1");

        assert!(!matches(&def, &object, &update_input(&["description"])).unwrap());
    }

    #[test]
    fn test_empty_trigger_fields_match_any_change() {
        let def = definition(
            true,
            "Control",
            json!({
                "triggers": [{"operation": "UPDATE"}],
                "actions": []
            }),
        );
        let object = WorkflowObject::new("Control", "ctl_1");

        assert!(matches(&def, &object, &update_input(&["description"])).unwrap());
    }

    #[test]
    fn test_operation_must_match() {
        let def = definition(true, "Control", basic_document());
        let object = WorkflowObject::new("Control", "ctl_1");

        let mut input = update_input(&["status"]);
        input.event_type = EventType::Create;

        assert!(!matches(&def, &object, &input).unwrap());
    }

    #[test]
    fn test_conditions_are_conjunctive() {
        let def = definition(
            true,
            "Control",
            json!({
                "triggers": [{"operation": "UPDATE", "fields": ["status"]}],
                "conditions": [
                    {"expression": "new.status == \"published\""},
                    {"expression": "old.status == \"draft\""}
                ],
                "actions": []
            }),
        );
        let object = WorkflowObject::new("Control", "ctl_1");

        assert!(matches(&def, &object, &update_input(&["status"])).unwrap());

        let failing = definition(
            true,
            "Control",
            json!({
                "triggers": [{"operation": "UPDATE", "fields": ["status"]}],
                "conditions": [
                    {"expression": "new.status == \"published\""},
                    {"expression": "old.status == \"published\""}
                ],
                "actions": []
            }),
        );

        assert!(!matches(&failing, &object, &update_input(&["status"])).unwrap());
    }

    #[test]
    fn test_changed_fields_visible_to_conditions() {
        let def = definition(
            true,
            "Control",
            json!({
                "triggers": [{"operation": "UPDATE"}],
                "conditions": [{"expression": "changed(\"status\")"}],
                "actions": []
            }),
        );
        let object = WorkflowObject::new("Control", "ctl_1");

        assert!(matches(&def, &object, &update_input(&["status"])).unwrap());
        assert!(!matches(&def, &object, &update_input(&["description"])).unwrap());
    }

    #[test]
    fn test_invalid_expression_fails_loudly() {
        let def = definition(
            true,
            "Control",
            json!({
                "triggers": [{"operation": "UPDATE", "fields": ["status"]}],
                "conditions": [{"expression": "nonsense.field == 1"}],
                "actions": []
            }),
        );
        let object = WorkflowObject::new("Control", "ctl_1");

        let err = matches(&def, &object, &update_input(&["status"])).unwrap_err();
        assert!(matches!(err, EngineError::Condition(_)));
    }

    #[test]
    fn test_malformed_document_fails_loudly() {
        let def = definition(
            true,
            "Control",
            json!({"triggers": "not-a-list"}),
        );
        let object = WorkflowObject::new("Control", "ctl_1");

        let err = matches(&def, &object, &update_input(&["status"])).unwrap_err();
        assert!(matches!(err, EngineError::Definition(_)));
    }

    #[test]
    fn test_changed_field_set_is_a_set() {
        let input = TriggerInput {
            event_type: EventType::Update,
            changed_fields: hashset! {"status".to_string(), "status".to_string()},
            old: json!({}),
            new: json!({}),
            actor_id: None,
        };
        assert_eq!(input.changed_fields.len(), 1);
    }
}
