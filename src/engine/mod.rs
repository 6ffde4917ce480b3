//! Workflow engine
//!
//! The façade over trigger matching, action processing, and the instance
//! state machine. Triggering is synchronous: the caller observes a created
//! instance with its first action's pending assignments before the call
//! returns. Everything after that is asynchronous: completing an assignment
//! records the decision and enqueues an event; the worker loop drives the
//! actual advancement.

use anyhow::Context;
use sqlx::PgPool;

use crate::db;
use crate::db::definitions::NewDefinition;
use crate::definition::DefinitionDocument;
use crate::types::{
    AssignmentDecision, InstanceState, TriggerInput, WorkflowAssignment, WorkflowDefinition,
    WorkflowInstance, WorkflowObject,
};

mod actions;
mod advance;
pub mod errors;
pub mod matcher;


pub use errors::EngineError;

pub(crate) use advance::apply_completion_event;

#[derive(Clone)]
pub struct WorkflowEngine {
    pool: PgPool,
}

impl WorkflowEngine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Validate and store a definition document.
    ///
    /// Every definition error (unknown action type, bad expression, missing
    /// targets) surfaces here, to the author, instead of at trigger time.
    pub async fn register_definition(
        &self,
        new: NewDefinition,
    ) -> Result<WorkflowDefinition, EngineError> {
        let doc = DefinitionDocument::from_value(&new.document)?;
        doc.validate()?;

        let version_hash = doc.version_hash();
        let definition = db::definitions::insert_definition(&self.pool, &new, &version_hash).await?;

        tracing::info!(
            definition_id = %definition.id,
            name = %definition.name,
            schema_type = %definition.schema_type,
            "workflow.definition.registered"
        );

        Ok(definition)
    }

    /// Evaluate a definition against a mutation and start an instance on match.
    ///
    /// `Ok(None)` is the normal no-match outcome, not an error. On match, the
    /// instance, its object ref, and the first action's assignments are
    /// created in one transaction, so the caller sees them on return.
    pub async fn trigger_workflow(
        &self,
        def: &WorkflowDefinition,
        object: &WorkflowObject,
        input: &TriggerInput,
    ) -> Result<Option<WorkflowInstance>, EngineError> {
        if !matcher::matches(def, object, input)? {
            return Ok(None);
        }

        let doc = DefinitionDocument::from_value(&def.document)?;
        doc.validate()?;

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin trigger transaction")?;

        // One running instance per (definition, object)
        if db::instances::active_instance_exists(&mut tx, &def.id, object).await? {
            return Err(EngineError::WorkflowAlreadyActive);
        }

        let mut instance =
            db::instances::create_instance(&mut tx, &def.id, &def.document, object).await?;

        match doc.actions.first() {
            Some(action) => {
                actions::process_action(&mut tx, &instance, action).await?;
            }
            None => {
                db::instances::finish_instance(&mut tx, &instance.id, InstanceState::Completed)
                    .await?;
                instance.state = InstanceState::Completed;
            }
        }

        tx.commit()
            .await
            .context("Failed to commit trigger transaction")?;

        tracing::info!(
            instance_id = %instance.id,
            definition_id = %def.id,
            object_type = %object.object_type,
            object_id = %object.object_id,
            "workflow.instance.triggered"
        );

        Ok(Some(instance))
    }

    /// Entry point for the mutation-hook system: try every active definition
    /// governing the object's schema type and return the instances started.
    ///
    /// An already-active instance skips that definition rather than failing
    /// the whole mutation.
    pub async fn handle_mutation(
        &self,
        object: &WorkflowObject,
        input: &TriggerInput,
    ) -> Result<Vec<WorkflowInstance>, EngineError> {
        let definitions =
            db::definitions::list_active_for_schema(&self.pool, &object.object_type).await?;

        let mut instances = Vec::new();
        for def in &definitions {
            match self.trigger_workflow(def, object, input).await {
                Ok(Some(instance)) => instances.push(instance),
                Ok(None) => {}
                Err(EngineError::WorkflowAlreadyActive) => {
                    tracing::warn!(
                        definition_id = %def.id,
                        object_id = %object.object_id,
                        "skipping trigger, workflow instance already active"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        Ok(instances)
    }

    /// Administrative re-drive of a single action for a running instance.
    pub async fn process_action(
        &self,
        instance_id: &str,
        action_index: i32,
    ) -> Result<(), EngineError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin action transaction")?;

        let Some(instance) = db::instances::lock_instance(&mut tx, instance_id).await? else {
            return Err(EngineError::InstanceNotFound(instance_id.to_string()));
        };

        let doc = DefinitionDocument::from_value(&instance.document)?;
        let Some(action) = doc.actions.get(action_index as usize) else {
            return Err(EngineError::ActionIndexOutOfBounds {
                instance_id: instance_id.to_string(),
                index: action_index,
            });
        };

        actions::process_action(&mut tx, &instance, action).await?;
        db::instances::set_current_action(&mut tx, instance_id, action_index).await?;

        tx.commit()
            .await
            .context("Failed to commit action transaction")?;

        Ok(())
    }

    /// Record a terminal decision for a pending assignment.
    ///
    /// The decision and its completion event commit together; advancement of
    /// the owning instance happens asynchronously when the event is consumed.
    /// Completing an already-terminal assignment fails and leaves the stored
    /// metadata untouched.
    pub async fn complete_assignment(
        &self,
        assignment_id: &str,
        decision: AssignmentDecision,
    ) -> Result<WorkflowAssignment, EngineError> {
        let status = decision.status();
        let (approval, rejection) = match &decision {
            AssignmentDecision::Approved(meta) => (
                Some(
                    serde_json::to_value(meta).context("Failed to serialize approval metadata")?,
                ),
                None,
            ),
            AssignmentDecision::Rejected(meta) => (
                None,
                Some(
                    serde_json::to_value(meta)
                        .context("Failed to serialize rejection metadata")?,
                ),
            ),
        };

        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin completion transaction")?;

        let updated = db::assignments::complete_assignment(
            &mut tx,
            assignment_id,
            status,
            approval.as_ref(),
            rejection.as_ref(),
        )
        .await?;

        match updated {
            Some(assignment) => {
                db::events::enqueue_completion(&mut tx, &assignment).await?;
                tx.commit()
                    .await
                    .context("Failed to commit completion transaction")?;

                tracing::info!(
                    assignment_id = %assignment.id,
                    instance_id = %assignment.workflow_instance_id,
                    status = ?assignment.status,
                    "workflow.assignment.completed"
                );

                Ok(assignment)
            }
            None => {
                // Distinguish the conflict from a missing row
                match db::assignments::get_assignment(&self.pool, assignment_id).await? {
                    Some(_) => Err(EngineError::AssignmentNotPending(assignment_id.to_string())),
                    None => Err(EngineError::AssignmentNotFound(assignment_id.to_string())),
                }
            }
        }
    }

    /// Drain the completion event outbox inline.
    ///
    /// Production deployments run [`crate::worker::CompletionWorker`];
    /// tests and the CLI use this to process queued events deterministically.
    pub async fn run_pending(&self, reclaim_after_secs: f64) -> Result<usize, EngineError> {
        let mut processed = 0;

        while let Some(event) = db::events::claim_event(&self.pool, reclaim_after_secs).await? {
            apply_completion_event(&self.pool, &event).await?;
            processed += 1;
        }

        Ok(processed)
    }
}
