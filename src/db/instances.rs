//! Workflow instance and object reference storage
//!
//! The instance row doubles as the serialization point for step advancement:
//! the worker locks it with `FOR UPDATE` before deciding whether to advance,
//! and terminal transitions are guarded on the current state so they apply
//! at most once.

use anyhow::{Context, Result};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::types::{InstanceState, WorkflowInstance, WorkflowObject, WorkflowObjectRef};

/// Create an instance together with its single object reference.
///
/// The two rows are only ever created here, in one transaction, which is what
/// keeps the "exactly one ref per instance, set once" invariant out of reach
/// of ad hoc writes.
pub async fn create_instance(
    tx: &mut Transaction<'_, Postgres>,
    definition_id: &str,
    document: &JsonValue,
    object: &WorkflowObject,
) -> Result<WorkflowInstance> {
    let instance_id = Uuid::new_v4().to_string();

    let row = sqlx::query(
        r#"
        INSERT INTO workflow_instances (id, workflow_definition_id, state, document)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(&instance_id)
    .bind(definition_id)
    .bind(InstanceState::Running)
    .bind(document)
    .fetch_one(&mut **tx)
    .await
    .context("Failed to create workflow instance")?;

    sqlx::query(
        r#"
        INSERT INTO workflow_object_refs (id, workflow_instance_id, object_type, object_id)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&instance_id)
    .bind(&object.object_type)
    .bind(&object.object_id)
    .execute(&mut **tx)
    .await
    .context("Failed to create workflow object ref")?;

    Ok(map_instance(&row))
}

pub async fn get_instance(pool: &PgPool, id: &str) -> Result<Option<WorkflowInstance>> {
    let row = sqlx::query("SELECT * FROM workflow_instances WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get workflow instance")?;

    Ok(row.as_ref().map(map_instance))
}

/// Lock the instance row for the remainder of the transaction.
pub async fn lock_instance(
    tx: &mut Transaction<'_, Postgres>,
    id: &str,
) -> Result<Option<WorkflowInstance>> {
    let row = sqlx::query("SELECT * FROM workflow_instances WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .context("Failed to lock workflow instance")?;

    Ok(row.as_ref().map(map_instance))
}

pub async fn get_object_ref(pool: &PgPool, instance_id: &str) -> Result<Option<WorkflowObjectRef>> {
    let row = sqlx::query("SELECT * FROM workflow_object_refs WHERE workflow_instance_id = $1")
        .bind(instance_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get workflow object ref")?;

    Ok(row.map(|row| WorkflowObjectRef {
        id: row.get("id"),
        workflow_instance_id: row.get("workflow_instance_id"),
        object_type: row.get("object_type"),
        object_id: row.get("object_id"),
        created_at: row.get("created_at"),
    }))
}

pub async fn set_current_action(
    tx: &mut Transaction<'_, Postgres>,
    id: &str,
    action_index: i32,
) -> Result<()> {
    sqlx::query("UPDATE workflow_instances SET current_action_index = $2 WHERE id = $1")
        .bind(id)
        .bind(action_index)
        .execute(&mut **tx)
        .await
        .context("Failed to update workflow instance action index")?;

    Ok(())
}

/// Transition a running instance to a terminal state.
///
/// Guarded on `state = 'running'` so a redelivered event can never move an
/// instance out of a terminal state or stamp `completed_at` twice.
/// Returns whether the transition applied.
pub async fn finish_instance(
    tx: &mut Transaction<'_, Postgres>,
    id: &str,
    state: InstanceState,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE workflow_instances
        SET state = $2,
            completed_at = NOW()
        WHERE id = $1
          AND state = 'running'
        "#,
    )
    .bind(id)
    .bind(state)
    .execute(&mut **tx)
    .await
    .context("Failed to finish workflow instance")?;

    Ok(result.rows_affected() > 0)
}

/// Whether a running instance of this definition already governs the object.
pub async fn active_instance_exists(
    tx: &mut Transaction<'_, Postgres>,
    definition_id: &str,
    object: &WorkflowObject,
) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1
            FROM workflow_instances i
            JOIN workflow_object_refs r ON r.workflow_instance_id = i.id
            WHERE i.workflow_definition_id = $1
              AND i.state = 'running'
              AND r.object_type = $2
              AND r.object_id = $3
        )
        "#,
    )
    .bind(definition_id)
    .bind(&object.object_type)
    .bind(&object.object_id)
    .fetch_one(&mut **tx)
    .await
    .context("Failed to check for active workflow instances")?;

    Ok(exists)
}

pub async fn list_instances(
    pool: &PgPool,
    state: Option<InstanceState>,
    limit: i64,
) -> Result<Vec<WorkflowInstance>> {
    let rows = match state {
        Some(state) => {
            sqlx::query(
                r#"
                SELECT * FROM workflow_instances
                WHERE state = $1
                ORDER BY created_at DESC
                LIMIT $2
                "#,
            )
            .bind(state)
            .bind(limit)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query("SELECT * FROM workflow_instances ORDER BY created_at DESC LIMIT $1")
                .bind(limit)
                .fetch_all(pool)
                .await
        }
    }
    .context("Failed to list workflow instances")?;

    Ok(rows.iter().map(map_instance).collect())
}

fn map_instance(row: &PgRow) -> WorkflowInstance {
    WorkflowInstance {
        id: row.get("id"),
        workflow_definition_id: row.get("workflow_definition_id"),
        state: row.get("state"),
        current_action_index: row.get("current_action_index"),
        document: row.get("document"),
        created_at: row.get("created_at"),
        completed_at: row.get("completed_at"),
    }
}
