//! Workflow client
//!
//! The caller-facing surface the API layer builds on: authorize-then-complete
//! mutations, pending-assignment queries, and a bounded polling helper for
//! observing asynchronous state transitions.

use chrono::Utc;
use sqlx::PgPool;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::authz::{self, GroupDirectory};
use crate::db;
use crate::engine::{EngineError, WorkflowEngine};
use crate::types::{
    ApprovalMetadata, AssignmentDecision, InstanceState, RejectionMetadata, WorkflowAssignment,
    WorkflowDefinition, WorkflowInstance, WorkflowObjectRef,
};

/// Polling cadence for observing out-of-band transitions.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const POLL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct WorkflowClient {
    pool: PgPool,
    engine: WorkflowEngine,
}

impl WorkflowClient {
    pub fn new(pool: PgPool) -> Self {
        let engine = WorkflowEngine::new(pool.clone());
        Self { pool, engine }
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    /// Approve an assignment on behalf of an actor.
    ///
    /// Authorization runs first; the recorded metadata carries the actor and
    /// decision time. Returns the updated assignment in its terminal state.
    pub async fn approve_assignment(
        &self,
        assignment_id: &str,
        actor_id: &str,
        directory: &dyn GroupDirectory,
    ) -> Result<WorkflowAssignment, EngineError> {
        let assignment = self.require_assignment(assignment_id).await?;
        authz::authorize_completion(actor_id, &assignment, directory).await?;

        self.engine
            .complete_assignment(
                assignment_id,
                AssignmentDecision::Approved(ApprovalMetadata {
                    approved_at: Utc::now(),
                    approved_by_user_id: actor_id.to_string(),
                    label: assignment.label.clone(),
                }),
            )
            .await
    }

    /// Reject an assignment on behalf of an actor, failing the instance.
    pub async fn reject_assignment(
        &self,
        assignment_id: &str,
        actor_id: &str,
        reason: Option<String>,
        directory: &dyn GroupDirectory,
    ) -> Result<WorkflowAssignment, EngineError> {
        let assignment = self.require_assignment(assignment_id).await?;
        authz::authorize_completion(actor_id, &assignment, directory).await?;

        self.engine
            .complete_assignment(
                assignment_id,
                AssignmentDecision::Rejected(RejectionMetadata {
                    rejected_at: Utc::now(),
                    rejected_by_user_id: actor_id.to_string(),
                    rejection_reason: reason,
                }),
            )
            .await
    }

    /// Pending assignments the actor may act on: direct user targets plus
    /// group targets the actor is currently a member of.
    pub async fn pending_assignments_for(
        &self,
        actor_id: &str,
        directory: &dyn GroupDirectory,
    ) -> Result<Vec<WorkflowAssignment>, EngineError> {
        let mut pending = db::assignments::list_pending_for_user(&self.pool, actor_id).await?;

        for assignment in db::assignments::list_pending_group_targets(&self.pool).await? {
            if directory
                .is_member(&assignment.target_id, actor_id)
                .await
                .map_err(EngineError::Storage)?
            {
                pending.push(assignment);
            }
        }

        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending)
    }

    pub async fn get_instance(&self, id: &str) -> Result<Option<WorkflowInstance>, EngineError> {
        Ok(db::instances::get_instance(&self.pool, id).await?)
    }

    pub async fn get_definition(
        &self,
        id: &str,
    ) -> Result<Option<WorkflowDefinition>, EngineError> {
        Ok(db::definitions::get_definition(&self.pool, id).await?)
    }

    /// The business object the instance was triggered for.
    pub async fn instance_object(
        &self,
        instance_id: &str,
    ) -> Result<Option<WorkflowObjectRef>, EngineError> {
        Ok(db::instances::get_object_ref(&self.pool, instance_id).await?)
    }

    pub async fn get_assignment(
        &self,
        id: &str,
    ) -> Result<Option<WorkflowAssignment>, EngineError> {
        Ok(db::assignments::get_assignment(&self.pool, id).await?)
    }

    pub async fn instance_assignments(
        &self,
        instance_id: &str,
    ) -> Result<Vec<WorkflowAssignment>, EngineError> {
        Ok(db::assignments::list_for_instance(&self.pool, instance_id).await?)
    }

    /// Poll until the instance reaches the expected state or the timeout
    /// elapses. "Not yet transitioned" is retryable, not a failure, until
    /// the deadline.
    pub async fn wait_for_instance_state(
        &self,
        instance_id: &str,
        state: InstanceState,
        timeout: Duration,
    ) -> Result<WorkflowInstance, EngineError> {
        let deadline = Instant::now() + timeout;

        loop {
            let Some(instance) = db::instances::get_instance(&self.pool, instance_id).await? else {
                return Err(EngineError::InstanceNotFound(instance_id.to_string()));
            };

            if instance.state == state {
                return Ok(instance);
            }

            if Instant::now() >= deadline {
                return Err(EngineError::Storage(anyhow::anyhow!(
                    "timed out waiting for instance '{}' to reach {:?}, currently {:?}",
                    instance_id,
                    state,
                    instance.state
                )));
            }

            sleep(POLL_INTERVAL).await;
        }
    }

    async fn require_assignment(&self, id: &str) -> Result<WorkflowAssignment, EngineError> {
        db::assignments::get_assignment(&self.pool, id)
            .await?
            .ok_or_else(|| EngineError::AssignmentNotFound(id.to_string()))
    }
}
