//! Workflow definition storage

use anyhow::{Context, Result};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::types::{WorkflowDefinition, WorkflowKind};

/// Fields supplied when registering a definition.
#[derive(Debug, Clone)]
pub struct NewDefinition {
    pub name: String,
    pub schema_type: String,
    pub owner_id: Option<String>,
    pub document: JsonValue,
    pub active: bool,
}

pub async fn insert_definition(
    pool: &PgPool,
    new: &NewDefinition,
    version_hash: &str,
) -> Result<WorkflowDefinition> {
    let id = Uuid::new_v4().to_string();

    let row = sqlx::query(
        r#"
        INSERT INTO workflow_definitions (
            id, name, schema_type, workflow_kind, active, owner_id, document, version_hash
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(&id)
    .bind(&new.name)
    .bind(&new.schema_type)
    .bind(WorkflowKind::Approval)
    .bind(new.active)
    .bind(&new.owner_id)
    .bind(&new.document)
    .bind(version_hash)
    .fetch_one(pool)
    .await
    .context("Failed to insert workflow definition")?;

    Ok(map_definition(&row))
}

pub async fn get_definition(pool: &PgPool, id: &str) -> Result<Option<WorkflowDefinition>> {
    let row = sqlx::query("SELECT * FROM workflow_definitions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get workflow definition")?;

    Ok(row.as_ref().map(map_definition))
}

/// Active definitions governing a schema type, oldest first.
pub async fn list_active_for_schema(
    pool: &PgPool,
    schema_type: &str,
) -> Result<Vec<WorkflowDefinition>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM workflow_definitions
        WHERE schema_type = $1
          AND active
        ORDER BY created_at ASC
        "#,
    )
    .bind(schema_type)
    .fetch_all(pool)
    .await
    .context("Failed to list workflow definitions")?;

    Ok(rows.iter().map(map_definition).collect())
}

/// Flip the active flag; deactivation is the soft-delete path.
pub async fn set_active(pool: &PgPool, id: &str, active: bool) -> Result<()> {
    sqlx::query("UPDATE workflow_definitions SET active = $2 WHERE id = $1")
        .bind(id)
        .bind(active)
        .execute(pool)
        .await
        .context("Failed to update workflow definition")?;

    Ok(())
}

fn map_definition(row: &PgRow) -> WorkflowDefinition {
    WorkflowDefinition {
        id: row.get("id"),
        name: row.get("name"),
        schema_type: row.get("schema_type"),
        workflow_kind: row.get("workflow_kind"),
        active: row.get("active"),
        owner_id: row.get("owner_id"),
        document: row.get("document"),
        version_hash: row.get("version_hash"),
        created_at: row.get("created_at"),
    }
}
