//! Workflow definition document
//!
//! A definition stores its declarative rules as a JSON document: ordered
//! lists of triggers (when to fire), conditions (whether to fire), and
//! actions (what to do). Documents are validated at registration time and
//! snapshotted onto instances at trigger time, so a malformed or edited
//! definition can never change the behavior of work already in flight.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use thiserror::Error;

use crate::expr;
use crate::types::{EventType, TargetKind};

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("invalid definition document: {0}")]
    InvalidDocument(#[from] serde_json::Error),
    #[error("unsupported action type '{action_type}' for action '{key}'")]
    UnsupportedActionType { key: String, action_type: String },
    #[error("action at index {0} has an empty key")]
    EmptyActionKey(usize),
    #[error("duplicate action key '{0}'")]
    DuplicateActionKey(String),
    #[error("invalid params for action '{key}': {source}")]
    InvalidParams {
        key: String,
        source: serde_json::Error,
    },
    #[error("approval action '{0}' declares no targets")]
    NoTargets(String),
    #[error("invalid condition expression '{expression}': {source}")]
    InvalidExpression {
        expression: String,
        source: expr::ExprError,
    },
}

/// The parsed form of a definition's JSON document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionDocument {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub triggers: Vec<TriggerSpec>,
    #[serde(default)]
    pub conditions: Vec<ConditionSpec>,
    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

/// When to evaluate: a mutation verb plus an optional changed-field filter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerSpec {
    pub operation: EventType,
    /// Empty means any changed field matches.
    #[serde(default)]
    pub fields: Vec<String>,
}

/// Whether to fire: a boolean predicate over the mutation diff context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionSpec {
    pub expression: String,
    #[serde(default)]
    pub description: String,
}

/// One ordered workflow step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionSpec {
    pub key: String,
    #[serde(rename = "type")]
    pub action_type: String,
    #[serde(default)]
    pub params: JsonValue,
}

/// Closed set of supported action kinds. New kinds are added here and
/// matched exhaustively in the action processor, never dispatched by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Approval,
}

impl ActionSpec {
    /// Maps the stored discriminator to a supported kind, if any.
    pub fn kind(&self) -> Option<ActionKind> {
        match self.action_type.as_str() {
            "APPROVAL" => Some(ActionKind::Approval),
            _ => None,
        }
    }

    pub fn approval_params(&self) -> Result<ApprovalParams, DefinitionError> {
        serde_json::from_value(self.params.clone()).map_err(|source| {
            DefinitionError::InvalidParams {
                key: self.key.clone(),
                source,
            }
        })
    }
}

/// Params payload for APPROVAL actions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalParams {
    pub targets: Vec<TargetSpec>,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub label: Option<String>,
}

fn default_required() -> bool {
    true
}

/// Who may act on an assignment produced by an approval action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TargetSpec {
    #[serde(rename = "type")]
    pub kind: TargetKind,
    pub id: String,
}

impl DefinitionDocument {
    pub fn from_value(value: &JsonValue) -> Result<Self, DefinitionError> {
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn to_value(&self) -> JsonValue {
        serde_json::to_value(self).expect("definition document serializes")
    }

    /// Validates the document the way registration does: every error here is
    /// surfaced to the definition author instead of failing at trigger time.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let mut seen_keys = HashSet::new();

        for (index, action) in self.actions.iter().enumerate() {
            if action.key.is_empty() {
                return Err(DefinitionError::EmptyActionKey(index));
            }
            if !seen_keys.insert(action.key.clone()) {
                return Err(DefinitionError::DuplicateActionKey(action.key.clone()));
            }

            match action.kind() {
                Some(ActionKind::Approval) => {
                    let params = action.approval_params()?;
                    if params.targets.is_empty() {
                        return Err(DefinitionError::NoTargets(action.key.clone()));
                    }
                }
                None => {
                    return Err(DefinitionError::UnsupportedActionType {
                        key: action.key.clone(),
                        action_type: action.action_type.clone(),
                    });
                }
            }
        }

        for condition in &self.conditions {
            expr::check(&condition.expression).map_err(|source| {
                DefinitionError::InvalidExpression {
                    expression: condition.expression.clone(),
                    source,
                }
            })?;
        }

        Ok(())
    }

    /// Hash of the canonical document JSON, used as the stored version.
    pub fn version_hash(&self) -> String {
        let canonical = serde_json::to_string(self).expect("definition document serializes");
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn approval_doc() -> JsonValue {
        json!({
            "name": "control-status-approval",
            "triggers": [{"operation": "UPDATE", "fields": ["status"]}],
            "conditions": [{"expression": "new.status == \"published\""}],
            "actions": [{
                "key": "security_review",
                "type": "APPROVAL",
                "params": {
                    "targets": [{"type": "USER", "id": "user_1"}],
                    "label": "Security review"
                }
            }]
        })
    }

    #[test]
    fn test_decode_document() {
        let doc = DefinitionDocument::from_value(&approval_doc()).unwrap();

        assert_eq!(doc.name, "control-status-approval");
        assert_eq!(doc.triggers.len(), 1);
        assert_eq!(doc.triggers[0].operation, EventType::Update);
        assert_eq!(doc.triggers[0].fields, vec!["status"]);
        assert_eq!(doc.actions.len(), 1);
        assert_eq!(doc.actions[0].kind(), Some(ActionKind::Approval));

        let params = doc.actions[0].approval_params().unwrap();
        assert_eq!(params.targets.len(), 1);
        assert_eq!(params.targets[0].kind, TargetKind::User);
        // Required defaults to true when omitted
        assert!(params.required);
        assert_eq!(params.label.as_deref(), Some("Security review"));
    }

    #[test]
    fn test_validate_accepts_well_formed_document() {
        let doc = DefinitionDocument::from_value(&approval_doc()).unwrap();
        assert!(doc.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unknown_action_type() {
        let mut doc = DefinitionDocument::from_value(&approval_doc()).unwrap();
        doc.actions[0].action_type = "TELEPORT".to_string();

        let err = doc.validate().unwrap_err();
        assert!(matches!(
            err,
            DefinitionError::UnsupportedActionType { ref action_type, .. } if action_type == "TELEPORT"
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_action_keys() {
        let mut doc = DefinitionDocument::from_value(&approval_doc()).unwrap();
        let duplicate = doc.actions[0].clone();
        doc.actions.push(duplicate);

        let err = doc.validate().unwrap_err();
        assert!(matches!(err, DefinitionError::DuplicateActionKey(ref key) if key == "security_review"));
    }

    #[test]
    fn test_validate_rejects_empty_targets() {
        let mut doc = DefinitionDocument::from_value(&approval_doc()).unwrap();
        doc.actions[0].params = json!({"targets": []});

        let err = doc.validate().unwrap_err();
        assert!(matches!(err, DefinitionError::NoTargets(_)));
    }

    #[test]
    fn test_validate_rejects_invalid_condition_expression() {
        let mut doc = DefinitionDocument::from_value(&approval_doc()).unwrap();
        doc.conditions[0].expression = "new.status ==".to_string();

        let err = doc.validate().unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidExpression { .. }));
    }

    #[test]
    fn test_version_hash_tracks_content() {
        let doc = DefinitionDocument::from_value(&approval_doc()).unwrap();
        let hash = doc.version_hash();

        assert_eq!(hash.len(), 64);
        assert_eq!(hash, doc.version_hash());

        let mut edited = doc.clone();
        edited.actions[0].key = "legal_review".to_string();
        assert_ne!(hash, edited.version_hash());
    }
}
