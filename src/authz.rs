//! Assignment authorization boundary
//!
//! The engine itself never checks who is calling; this module is the
//! decision function the API layer runs before completing an assignment.
//! Group membership lives outside the engine and is reached through the
//! [`GroupDirectory`] collaborator.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::types::{TargetKind, WorkflowAssignment};

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("actor '{actor_id}' may not act on assignment '{assignment_id}'")]
    NotAuthorized {
        actor_id: String,
        assignment_id: String,
    },
    #[error(transparent)]
    Directory(#[from] anyhow::Error),
}

/// External source of truth for group membership.
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    async fn is_member(&self, group_id: &str, user_id: &str) -> anyhow::Result<bool>;
}

/// May this actor complete this assignment?
///
/// User targets require the exact user; group targets require current
/// membership. Note a group target is one shared assignment row: the first
/// authorized member to act decides it for the whole group.
pub async fn authorize_completion(
    actor_id: &str,
    assignment: &WorkflowAssignment,
    directory: &dyn GroupDirectory,
) -> Result<(), AuthzError> {
    let allowed = match assignment.target_kind {
        TargetKind::User => assignment.target_id == actor_id,
        TargetKind::Group => {
            directory
                .is_member(&assignment.target_id, actor_id)
                .await?
        }
    };

    if allowed {
        Ok(())
    } else {
        Err(AuthzError::NotAuthorized {
            actor_id: actor_id.to_string(),
            assignment_id: assignment.id.to_string(),
        })
    }
}

/// In-memory directory backed by a fixed membership map.
#[derive(Debug, Clone, Default)]
pub struct StaticGroupDirectory {
    members: HashMap<String, HashSet<String>>,
}

impl StaticGroupDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_member(mut self, group_id: &str, user_id: &str) -> Self {
        self.members
            .entry(group_id.to_string())
            .or_default()
            .insert(user_id.to_string());
        self
    }
}

#[async_trait]
impl GroupDirectory for StaticGroupDirectory {
    async fn is_member(&self, group_id: &str, user_id: &str) -> anyhow::Result<bool> {
        Ok(self
            .members
            .get(group_id)
            .map(|group| group.contains(user_id))
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AssignmentStatus;
    use chrono::Utc;

    fn assignment(kind: TargetKind, target_id: &str) -> WorkflowAssignment {
        WorkflowAssignment {
            id: "asg_1".to_string(),
            workflow_instance_id: "wfi_1".to_string(),
            assignment_key: "security_review".to_string(),
            target_kind: kind,
            target_id: target_id.to_string(),
            status: AssignmentStatus::Pending,
            required: true,
            label: None,
            approval_metadata: None,
            rejection_metadata: None,
            created_at: Utc::now(),
            decided_at: None,
        }
    }

    #[tokio::test]
    async fn test_user_target_requires_exact_user() {
        let directory = StaticGroupDirectory::new();
        let assignment = assignment(TargetKind::User, "usr_1");

        assert!(authorize_completion("usr_1", &assignment, &directory)
            .await
            .is_ok());
        assert!(matches!(
            authorize_completion("usr_2", &assignment, &directory).await,
            Err(AuthzError::NotAuthorized { .. })
        ));
    }

    #[tokio::test]
    async fn test_group_target_requires_membership() {
        let directory = StaticGroupDirectory::new()
            .with_member("grp_sec", "usr_1")
            .with_member("grp_sec", "usr_2");
        let assignment = assignment(TargetKind::Group, "grp_sec");

        assert!(authorize_completion("usr_1", &assignment, &directory)
            .await
            .is_ok());
        assert!(authorize_completion("usr_2", &assignment, &directory)
            .await
            .is_ok());
        assert!(matches!(
            authorize_completion("usr_3", &assignment, &directory).await,
            Err(AuthzError::NotAuthorized { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_group_denies() {
        let directory = StaticGroupDirectory::new();
        let assignment = assignment(TargetKind::Group, "grp_missing");

        assert!(matches!(
            authorize_completion("usr_1", &assignment, &directory).await,
            Err(AuthzError::NotAuthorized { .. })
        ));
    }
}
