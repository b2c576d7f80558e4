//! `TicketStep`: a live step instance bound to a ticket, and the
//! type-specific runtime data it carries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::definition::{BranchDef, FailurePolicy, FieldDef, JoinMode, StepState, StepType};
use crate::user::UserSnapshot;

/// Type-specific runtime data for a `TicketStep`, mirroring `StepDef`'s
/// tagged-enum shape so each variant only carries what its step type
/// needs instead of a pile of nullable fields shared by all seven.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "step_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepRuntimeData {
    FormStep,
    ApprovalStep {
        resolved_approvers: Vec<UserSnapshot>,
        /// Approvals recorded so far, by approver email.
        #[serde(default)]
        decisions: Vec<ApprovalDecision>,
    },
    TaskStep {
        instructions: String,
        output_fields: Vec<FieldDef>,
        #[serde(default)]
        execution_notes: Option<String>,
    },
    NotifyStep {
        template_key: String,
    },
    ForkStep {
        branches: Vec<BranchDef>,
        failure_policy: FailurePolicy,
        /// Branch ids still running; empty once all have reached a
        /// terminal state.
        #[serde(default)]
        active_branch_ids: Vec<String>,
    },
    JoinStep {
        join_mode: JoinMode,
        source_fork_step_id: String,
        #[serde(default)]
        arrived_branch_ids: Vec<String>,
        /// Index-paired with `arrived_branch_ids`: whether that arrival
        /// completed (`true`) or was rejected (`false`). Drives the
        /// ALL-mode join outcome rule (completed if at least one arrival
        /// completed, rejected otherwise).
        #[serde(default)]
        arrived_outcomes: Vec<bool>,
    },
    SubWorkflowStep {
        sub_workflow_id: String,
        sub_workflow_version: i32,
        sub_workflow_name: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalDecision {
    pub approver_email: String,
    pub approved: bool,
    pub decided_at: DateTime<Utc>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TicketStep {
    pub ticket_step_id: String,
    pub ticket_id: String,
    pub step_id: String,
    pub step_name: String,
    pub step_type: StepType,
    pub state: StepState,
    #[serde(default)]
    pub assigned_to: Option<UserSnapshot>,
    pub data: StepRuntimeData,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    /// Last time an SLA reminder notification was enqueued for this step;
    /// the persisted dedup marker the scheduler's reminder sweep checks
    /// before enqueuing another (spec.md 4.5, 9 Open Question 2).
    #[serde(default)]
    pub last_reminder_at: Option<DateTime<Utc>>,
    /// Same dedup role as `last_reminder_at`, for the escalation sweep.
    #[serde(default)]
    pub last_escalation_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub branch_id: Option<String>,
    #[serde(default)]
    pub branch_name: Option<String>,
    #[serde(default)]
    pub parent_fork_step_id: Option<String>,
    #[serde(default)]
    pub parent_sub_workflow_step_id: Option<String>,
    #[serde(default)]
    pub from_sub_workflow_id: Option<String>,
    #[serde(default)]
    pub from_sub_workflow_version: Option<i32>,
    #[serde(default)]
    pub sub_workflow_step_order: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl TicketStep {
    pub fn is_active_thread(&self) -> bool {
        matches!(
            self.state,
            StepState::Active | StepState::WaitingForApproval | StepState::WaitingAssignment | StepState::OnHold
        )
    }

    /// A join step is satisfied once the arrived-branch count clears its
    /// join mode's threshold against the originating fork's branch count.
    pub fn join_satisfied(&self, fork_branch_count: usize) -> bool {
        let StepRuntimeData::JoinStep {
            join_mode,
            arrived_branch_ids,
            ..
        } = &self.data
        else {
            return false;
        };
        let arrived = arrived_branch_ids.len();
        match join_mode {
            JoinMode::All => arrived >= fork_branch_count,
            JoinMode::Any => arrived >= 1,
            JoinMode::Majority => arrived * 2 > fork_branch_count,
        }
    }

    /// The outcome a satisfied join reports once it fires: `ANY`/`MAJORITY`
    /// complete as soon as they're satisfied at all, since a satisfied
    /// `ANY`/`MAJORITY` join only ever sees completions by construction
    /// (a policy that would let a rejection satisfy it still requires one
    /// other branch to have completed). `ALL` completes if at least one
    /// arrival completed and rejects only if every arrival was a rejection.
    pub fn join_outcome(&self) -> bool {
        let StepRuntimeData::JoinStep { arrived_outcomes, .. } = &self.data else {
            return false;
        };
        arrived_outcomes.iter().any(|completed| *completed)
    }
}
