//! Instance state machine
//!
//! Consumes assignment completion events and advances or terminates the
//! owning instance. All decisions happen inside one transaction that holds a
//! row lock on the instance, so two sibling completions arriving together
//! still produce exactly one advance. The handler is idempotent under
//! redelivery: a terminal instance absorbs any further events.

use anyhow::Context;
use sqlx::{PgPool, Postgres, Transaction};

use crate::db;
use crate::definition::DefinitionDocument;
use crate::types::{AssignmentStatus, CompletionEvent, InstanceState, WorkflowInstance};

use super::actions;
use super::errors::EngineError;

pub(crate) async fn apply_completion_event(
    pool: &PgPool,
    event: &CompletionEvent,
) -> Result<(), EngineError> {
    let mut tx = pool
        .begin()
        .await
        .context("Failed to begin advance transaction")?;

    let Some(instance) = db::instances::lock_instance(&mut tx, &event.workflow_instance_id).await?
    else {
        return Err(EngineError::InstanceNotFound(
            event.workflow_instance_id.clone(),
        ));
    };

    if instance.state != InstanceState::Running {
        // Terminal instances absorb redelivered events
        db::events::mark_processed(&mut tx, &event.id).await?;
        tx.commit()
            .await
            .context("Failed to commit advance transaction")?;
        return Ok(());
    }

    let Some(assignment) = db::assignments::get_assignment_in_tx(&mut tx, &event.assignment_id).await?
    else {
        return Err(EngineError::AssignmentNotFound(event.assignment_id.clone()));
    };

    match assignment.status {
        AssignmentStatus::Rejected => {
            // One rejection is terminal; pending siblings are left as-is and
            // later actions never run
            db::instances::finish_instance(&mut tx, &instance.id, InstanceState::Failed).await?;
            tracing::info!(
                instance_id = %instance.id,
                assignment_id = %assignment.id,
                "workflow.instance.failed"
            );
        }
        AssignmentStatus::Approved => {
            advance_if_satisfied(&mut tx, &instance, &assignment.assignment_key).await?;
        }
        AssignmentStatus::Pending => {
            // Event predates the assignment's terminal write; nothing to do
            tracing::warn!(
                assignment_id = %assignment.id,
                "completion event for still-pending assignment"
            );
        }
    }

    db::events::mark_processed(&mut tx, &event.id).await?;
    tx.commit()
        .await
        .context("Failed to commit advance transaction")?;

    Ok(())
}

/// With the instance locked, decide whether the current action is satisfied,
/// and if so process the next action or complete the instance.
async fn advance_if_satisfied(
    tx: &mut Transaction<'_, Postgres>,
    instance: &WorkflowInstance,
    assignment_key: &str,
) -> Result<(), EngineError> {
    let doc = DefinitionDocument::from_value(&instance.document)?;
    let index = instance.current_action_index;

    let Some(action) = doc.actions.get(index as usize) else {
        return Err(EngineError::ActionIndexOutOfBounds {
            instance_id: instance.id.clone(),
            index,
        });
    };

    if action.key != assignment_key {
        // Stale event for an earlier action; only the current action gates
        tracing::warn!(
            instance_id = %instance.id,
            assignment_key,
            current_action = %action.key,
            "completion event does not map to the current action"
        );
        return Ok(());
    }

    let siblings = db::assignments::list_siblings(tx, &instance.id, assignment_key).await?;

    if siblings
        .iter()
        .any(|s| s.status == AssignmentStatus::Rejected)
    {
        db::instances::finish_instance(tx, &instance.id, InstanceState::Failed).await?;
        tracing::info!(instance_id = %instance.id, "workflow.instance.failed");
        return Ok(());
    }

    if siblings
        .iter()
        .any(|s| s.status == AssignmentStatus::Pending)
    {
        return Ok(());
    }

    let next = index + 1;
    match doc.actions.get(next as usize) {
        Some(next_action) => match actions::process_action(tx, instance, next_action).await {
            Ok(_) => {
                db::instances::set_current_action(tx, &instance.id, next).await?;
                tracing::info!(
                    instance_id = %instance.id,
                    action_key = %next_action.key,
                    action_index = next,
                    "workflow.instance.advanced"
                );
            }
            // A definition-shaped failure will never succeed on redelivery;
            // the instance fails instead of poisoning the queue
            Err(
                err @ (EngineError::UnsupportedActionType(_)
                | EngineError::ApprovalNoTargets(_)
                | EngineError::Definition(_)),
            ) => {
                tracing::error!(
                    instance_id = %instance.id,
                    action_key = %next_action.key,
                    error = %err,
                    "action processing failed, failing instance"
                );
                db::instances::finish_instance(tx, &instance.id, InstanceState::Failed).await?;
            }
            Err(err) => return Err(err),
        },
        None => {
            db::instances::finish_instance(tx, &instance.id, InstanceState::Completed).await?;
            tracing::info!(instance_id = %instance.id, "workflow.instance.completed");
        }
    }

    Ok(())
}
