//! Action processing
//!
//! Dispatches on the closed set of action kinds and performs each action's
//! side effects. Approval actions resolve their declared targets into pending
//! assignment rows, all inside the caller's transaction so an action's
//! assignments appear together or not at all.

use sqlx::{Postgres, Transaction};
use std::collections::HashSet;

use crate::db;
use crate::definition::{ActionKind, ActionSpec};
use crate::types::{WorkflowAssignment, WorkflowInstance};

use super::errors::EngineError;

/// Perform one action's side effects. Callers invoke this at most once per
/// (instance, action); the unique index on assignments is the backstop.
pub(crate) async fn process_action(
    tx: &mut Transaction<'_, Postgres>,
    instance: &WorkflowInstance,
    action: &ActionSpec,
) -> Result<Vec<WorkflowAssignment>, EngineError> {
    match action.kind() {
        Some(ActionKind::Approval) => process_approval(tx, instance, action).await,
        None => Err(EngineError::UnsupportedActionType(
            action.action_type.clone(),
        )),
    }
}

async fn process_approval(
    tx: &mut Transaction<'_, Postgres>,
    instance: &WorkflowInstance,
    action: &ActionSpec,
) -> Result<Vec<WorkflowAssignment>, EngineError> {
    let params = action.approval_params()?;
    if params.targets.is_empty() {
        return Err(EngineError::ApprovalNoTargets(action.key.clone()));
    }

    let mut seen = HashSet::new();
    let mut created = Vec::new();

    for target in &params.targets {
        if !seen.insert(target.clone()) {
            continue;
        }

        let assignment = db::assignments::insert_assignment(
            tx,
            &instance.id,
            &action.key,
            target,
            params.required,
            params.label.as_deref(),
        )
        .await?;

        created.push(assignment);
    }

    tracing::info!(
        instance_id = %instance.id,
        action_key = %action.key,
        assignments = created.len(),
        "workflow.action.processed"
    );

    Ok(created)
}
