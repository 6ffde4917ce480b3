use thiserror::Error;

use crate::authz::AuthzError;
use crate::definition::DefinitionError;
use crate::expr::ExprError;

/// Errors surfaced by the workflow engine.
///
/// Definition and expression problems are author-facing and loud; completion
/// conflicts are user-facing; storage failures carry their context chain.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),
    #[error("condition evaluation failed: {0}")]
    Condition(#[from] ExprError),
    #[error("unsupported action type '{0}'")]
    UnsupportedActionType(String),
    #[error("approval action '{0}' has no targets")]
    ApprovalNoTargets(String),
    #[error("workflow instance '{0}' not found")]
    InstanceNotFound(String),
    #[error("workflow assignment '{0}' not found")]
    AssignmentNotFound(String),
    #[error("workflow assignment '{0}' has already been completed")]
    AssignmentNotPending(String),
    #[error("a workflow instance is already active for this object")]
    WorkflowAlreadyActive,
    #[error("action index {index} is out of bounds for instance '{instance_id}'")]
    ActionIndexOutOfBounds { instance_id: String, index: i32 },
    #[error(transparent)]
    NotAuthorized(#[from] AuthzError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
