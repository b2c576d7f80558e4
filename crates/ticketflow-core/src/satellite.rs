//! Satellite records: `ApprovalTask`, `Assignment`, `InfoRequest`. Each
//! references a `ticket_step_id` and carries its own status lifecycle
//! independent of the step it belongs to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::definition::InfoRequestStatus;
use crate::user::UserSnapshot;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalDecisionValue {
    Approved,
    Rejected,
}

/// One parallel-approval vote cast against an `APPROVAL_STEP`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalTask {
    pub approval_task_id: String,
    pub ticket_step_id: String,
    pub approver: UserSnapshot,
    pub decision: Option<ApprovalDecisionValue>,
    #[serde(default)]
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl ApprovalTask {
    pub fn is_decided(&self) -> bool {
        self.decision.is_some()
    }
}

/// An agent assignment for a `TASK_STEP` awaiting `WAITING_ASSIGNMENT`
/// resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assignment {
    pub assignment_id: String,
    pub ticket_step_id: String,
    pub assigned_to: UserSnapshot,
    pub assigned_by: UserSnapshot,
    pub created_at: DateTime<Utc>,
    pub version: i64,
}

/// An outstanding request for more information raised against a step. A
/// step with an `OPEN` info request cannot progress via its normal event;
/// responding closes the request and re-enables progression.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InfoRequest {
    pub info_request_id: String,
    pub ticket_step_id: String,
    pub requested_by: UserSnapshot,
    pub question: String,
    pub status: InfoRequestStatus,
    #[serde(default)]
    pub response: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub responded_at: Option<DateTime<Utc>>,
    pub version: i64,
}

impl InfoRequest {
    pub fn blocks_progress(&self) -> bool {
        self.status == InfoRequestStatus::Open
    }
}
