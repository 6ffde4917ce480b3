use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "UPPERCASE")]
pub enum TargetKind {
    User,
    Group,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WorkflowKind {
    Approval,
}

/// Mutation verb reported by the object-mutation hook.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Create,
    Update,
    Delete,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Create => "CREATE",
            EventType::Update => "UPDATE",
            EventType::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    pub schema_type: String,
    pub workflow_kind: WorkflowKind,
    pub active: bool,
    pub owner_id: Option<String>,
    pub document: JsonValue,
    pub version_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: String,
    pub workflow_definition_id: String,
    pub state: InstanceState,
    pub current_action_index: i32,
    /// Definition snapshot captured when the instance was triggered.
    pub document: JsonValue,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowObjectRef {
    pub id: String,
    pub workflow_instance_id: String,
    pub object_type: String,
    pub object_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowAssignment {
    pub id: String,
    pub workflow_instance_id: String,
    pub assignment_key: String,
    pub target_kind: TargetKind,
    pub target_id: String,
    pub status: AssignmentStatus,
    pub required: bool,
    pub label: Option<String>,
    pub approval_metadata: Option<JsonValue>,
    pub rejection_metadata: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionEvent {
    pub id: String,
    pub assignment_id: String,
    pub workflow_instance_id: String,
    pub status: AssignmentStatus,
    pub attempt: i32,
    pub claimed_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// The business object a trigger event refers to.
///
/// Tagged-union form: exactly one (type, id) pair, bound to an instance once
/// at creation and never changed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowObject {
    pub object_type: String,
    pub object_id: String,
}

impl WorkflowObject {
    pub fn new(object_type: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            object_id: object_id.into(),
        }
    }
}

/// Mutation details supplied by the object-mutation hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerInput {
    pub event_type: EventType,
    pub changed_fields: HashSet<String>,
    /// Field values of the mutated object before the mutation.
    #[serde(default)]
    pub old: JsonValue,
    /// Field values after the mutation.
    #[serde(default)]
    pub new: JsonValue,
    pub actor_id: Option<String>,
}

impl TriggerInput {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            changed_fields: HashSet::new(),
            old: JsonValue::Null,
            new: JsonValue::Null,
            actor_id: None,
        }
    }
}

/// Metadata recorded when an assignment is approved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalMetadata {
    pub approved_at: DateTime<Utc>,
    pub approved_by_user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Metadata recorded when an assignment is rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RejectionMetadata {
    pub rejected_at: DateTime<Utc>,
    pub rejected_by_user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

/// Terminal decision for a pending assignment.
///
/// Exactly one metadata payload travels with the decision; the other column
/// stays null for the life of the row.
#[derive(Debug, Clone)]
pub enum AssignmentDecision {
    Approved(ApprovalMetadata),
    Rejected(RejectionMetadata),
}

impl AssignmentDecision {
    pub fn status(&self) -> AssignmentStatus {
        match self {
            AssignmentDecision::Approved(_) => AssignmentStatus::Approved,
            AssignmentDecision::Rejected(_) => AssignmentStatus::Rejected,
        }
    }
}
