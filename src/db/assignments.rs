//! Workflow assignment storage
//!
//! Assignment rows are written twice in their life: once at creation
//! (pending) and once at completion (approved/rejected). The completion
//! update is a compare-and-swap on the pending status, so racing completions
//! resolve to exactly one winner and terminal metadata is never overwritten.

use anyhow::{Context, Result};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::definition::TargetSpec;
use crate::types::{AssignmentStatus, WorkflowAssignment};

pub async fn insert_assignment(
    tx: &mut Transaction<'_, Postgres>,
    instance_id: &str,
    assignment_key: &str,
    target: &TargetSpec,
    required: bool,
    label: Option<&str>,
) -> Result<WorkflowAssignment> {
    let row = sqlx::query(
        r#"
        INSERT INTO workflow_assignments (
            id, workflow_instance_id, assignment_key, target_kind, target_id,
            status, required, label
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(instance_id)
    .bind(assignment_key)
    .bind(target.kind)
    .bind(&target.id)
    .bind(AssignmentStatus::Pending)
    .bind(required)
    .bind(label)
    .fetch_one(&mut **tx)
    .await
    .context("Failed to insert workflow assignment")?;

    Ok(map_assignment(&row))
}

pub async fn get_assignment(pool: &PgPool, id: &str) -> Result<Option<WorkflowAssignment>> {
    let row = sqlx::query("SELECT * FROM workflow_assignments WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get workflow assignment")?;

    Ok(row.as_ref().map(map_assignment))
}

pub async fn get_assignment_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: &str,
) -> Result<Option<WorkflowAssignment>> {
    let row = sqlx::query("SELECT * FROM workflow_assignments WHERE id = $1")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .context("Failed to get workflow assignment")?;

    Ok(row.as_ref().map(map_assignment))
}

/// All assignments created by the same action, identified by the shared key.
pub async fn list_siblings(
    tx: &mut Transaction<'_, Postgres>,
    instance_id: &str,
    assignment_key: &str,
) -> Result<Vec<WorkflowAssignment>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM workflow_assignments
        WHERE workflow_instance_id = $1
          AND assignment_key = $2
        ORDER BY created_at ASC
        "#,
    )
    .bind(instance_id)
    .bind(assignment_key)
    .fetch_all(&mut **tx)
    .await
    .context("Failed to list sibling assignments")?;

    Ok(rows.iter().map(map_assignment).collect())
}

pub async fn list_for_instance(
    pool: &PgPool,
    instance_id: &str,
) -> Result<Vec<WorkflowAssignment>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM workflow_assignments
        WHERE workflow_instance_id = $1
        ORDER BY created_at ASC
        "#,
    )
    .bind(instance_id)
    .fetch_all(pool)
    .await
    .context("Failed to list workflow assignments")?;

    Ok(rows.iter().map(map_assignment).collect())
}

/// Pending assignments targeting this user directly.
pub async fn list_pending_for_user(
    pool: &PgPool,
    user_id: &str,
) -> Result<Vec<WorkflowAssignment>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM workflow_assignments
        WHERE status = 'pending'
          AND target_kind = 'user'
          AND target_id = $1
        ORDER BY created_at ASC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .context("Failed to list pending assignments for user")?;

    Ok(rows.iter().map(map_assignment).collect())
}

/// All pending group-target assignments; the caller filters by membership.
pub async fn list_pending_group_targets(pool: &PgPool) -> Result<Vec<WorkflowAssignment>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM workflow_assignments
        WHERE status = 'pending'
          AND target_kind = 'group'
        ORDER BY created_at ASC
        "#,
    )
    .fetch_all(pool)
    .await
    .context("Failed to list pending group assignments")?;

    Ok(rows.iter().map(map_assignment).collect())
}

/// Compare-and-swap completion: pending -> terminal, exactly once.
///
/// Returns `None` when the assignment does not exist or is already terminal;
/// the stored metadata is untouched in that case.
pub async fn complete_assignment(
    tx: &mut Transaction<'_, Postgres>,
    id: &str,
    status: AssignmentStatus,
    approval_metadata: Option<&JsonValue>,
    rejection_metadata: Option<&JsonValue>,
) -> Result<Option<WorkflowAssignment>> {
    let row = sqlx::query(
        r#"
        UPDATE workflow_assignments
        SET status = $2,
            approval_metadata = $3,
            rejection_metadata = $4,
            decided_at = NOW()
        WHERE id = $1
          AND status = 'pending'
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(status)
    .bind(approval_metadata)
    .bind(rejection_metadata)
    .fetch_optional(&mut **tx)
    .await
    .context("Failed to complete workflow assignment")?;

    Ok(row.as_ref().map(map_assignment))
}

fn map_assignment(row: &PgRow) -> WorkflowAssignment {
    WorkflowAssignment {
        id: row.get("id"),
        workflow_instance_id: row.get("workflow_instance_id"),
        assignment_key: row.get("assignment_key"),
        target_kind: row.get("target_kind"),
        target_id: row.get("target_id"),
        status: row.get("status"),
        required: row.get("required"),
        label: row.get("label"),
        approval_metadata: row.get("approval_metadata"),
        rejection_metadata: row.get("rejection_metadata"),
        created_at: row.get("created_at"),
        decided_at: row.get("decided_at"),
    }
}
