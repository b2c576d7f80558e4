//! `WorkflowTemplate` and its immutable `WorkflowVersion` snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::definition::{WorkflowDefinition, WorkflowStatus};
use crate::user::UserSnapshot;

/// The editable definition container an administrator authors against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowTemplate {
    pub workflow_id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: WorkflowStatus,
    pub definition: WorkflowDefinition,
    /// Set on publish; `None` for a template that has never been published.
    pub current_version: Option<i32>,
    pub created_by: UserSnapshot,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl WorkflowTemplate {
    pub fn is_mutable(&self) -> bool {
        matches!(self.status, WorkflowStatus::Draft | WorkflowStatus::Published)
    }
}

/// An immutable snapshot of a `WorkflowDefinition` taken at publish time.
/// Live tickets pin a `workflow_version_number`, so editing the draft
/// after publication never affects an already-running ticket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowVersion {
    pub workflow_version_id: String,
    pub workflow_id: String,
    pub version_number: i32,
    pub definition: WorkflowDefinition,
    pub published_by: UserSnapshot,
    pub published_at: DateTime<Utc>,
}
