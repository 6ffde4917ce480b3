//! Completion event outbox
//!
//! "Assignment completed" events are enqueued in the same transaction as the
//! assignment's terminal write and consumed out-of-band by the worker loop.
//! Claims use `FOR UPDATE SKIP LOCKED` so concurrent workers never process
//! the same event, and a claim that is never marked processed becomes
//! claimable again after the reclaim window (at-least-once delivery).

use anyhow::{Context, Result};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::types::{CompletionEvent, WorkflowAssignment};

/// Notification channel pinged when an event is enqueued.
pub const COMPLETION_CHANNEL: &str = "workflow_completions";

pub async fn enqueue_completion(
    tx: &mut Transaction<'_, Postgres>,
    assignment: &WorkflowAssignment,
) -> Result<CompletionEvent> {
    let row = sqlx::query(
        r#"
        INSERT INTO workflow_completion_events (id, assignment_id, workflow_instance_id, status)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&assignment.id)
    .bind(&assignment.workflow_instance_id)
    .bind(assignment.status)
    .fetch_one(&mut **tx)
    .await
    .context("Failed to enqueue completion event")?;

    let event = map_event(&row);

    // Delivered on commit; losing the notification only delays the pollers
    sqlx::query("SELECT pg_notify($1, $2)")
        .bind(COMPLETION_CHANNEL)
        .bind(&event.id)
        .execute(&mut **tx)
        .await
        .ok();

    Ok(event)
}

/// Claim the oldest unprocessed event, reclaiming stale claims.
pub async fn claim_event(
    pool: &PgPool,
    reclaim_after_secs: f64,
) -> Result<Option<CompletionEvent>> {
    let row = sqlx::query(
        r#"
        UPDATE workflow_completion_events
        SET claimed_at = NOW(),
            attempt = attempt + 1
        WHERE id = (
            SELECT id FROM workflow_completion_events
            WHERE processed_at IS NULL
              AND (claimed_at IS NULL OR claimed_at < NOW() - make_interval(secs => $1))
            ORDER BY created_at ASC
            FOR UPDATE SKIP LOCKED
            LIMIT 1
        )
        RETURNING *
        "#,
    )
    .bind(reclaim_after_secs)
    .fetch_optional(pool)
    .await
    .context("Failed to claim completion event")?;

    Ok(row.as_ref().map(map_event))
}

/// Mark an event processed inside the handler's transaction, so the event is
/// consumed if and only if its effects commit.
pub async fn mark_processed(tx: &mut Transaction<'_, Postgres>, id: &str) -> Result<()> {
    sqlx::query("UPDATE workflow_completion_events SET processed_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(&mut **tx)
        .await
        .context("Failed to mark completion event processed")?;

    Ok(())
}

/// Give a failed claim back to the queue for redelivery.
pub async fn release_event(pool: &PgPool, id: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE workflow_completion_events
        SET claimed_at = NULL
        WHERE id = $1
          AND processed_at IS NULL
        "#,
    )
    .bind(id)
    .execute(pool)
    .await
    .context("Failed to release completion event")?;

    Ok(())
}

pub async fn unprocessed_count(pool: &PgPool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM workflow_completion_events WHERE processed_at IS NULL",
    )
    .fetch_one(pool)
    .await
    .context("Failed to count unprocessed completion events")?;

    Ok(count)
}

fn map_event(row: &PgRow) -> CompletionEvent {
    CompletionEvent {
        id: row.get("id"),
        assignment_id: row.get("assignment_id"),
        workflow_instance_id: row.get("workflow_instance_id"),
        status: row.get("status"),
        attempt: row.get("attempt"),
        claimed_at: row.get("claimed_at"),
        processed_at: row.get("processed_at"),
        created_at: row.get("created_at"),
    }
}
