//! Activation of a `TicketStep` from its static `StepDef` (spec.md 4.2
//! "Activation of a successor step"): the initial runtime payload and
//! state each step type starts in, plus `due_at` computation for the
//! three waiting states.

use chrono::{DateTime, Duration, Utc};

use ticketflow_core::definition::{StepDef, StepState};
use ticketflow_core::ticket_step::StepRuntimeData;

/// The state a freshly activated step starts in, before any event has
/// been recorded against it. `JOIN_STEP` activates directly into
/// `ACTIVE` since it has nothing to wait on but branch arrivals, which
/// are recorded against the already-active step rather than a separate
/// assignment state.
pub fn initial_state(step: &StepDef) -> StepState {
    match step {
        StepDef::ApprovalStep(_) => StepState::WaitingForApproval,
        StepDef::TaskStep(_) => StepState::WaitingAssignment,
        StepDef::FormStep(_)
        | StepDef::NotifyStep(_)
        | StepDef::ForkStep(_)
        | StepDef::JoinStep(_)
        | StepDef::SubWorkflowStep(_) => StepState::Active,
    }
}

/// Build the type-specific runtime payload a `TicketStep` is created
/// with. Collections that fill in as the step progresses (approval
/// decisions, join arrivals, active branches) start empty; the
/// `ForkStep` variant's `active_branch_ids` is seeded with every branch
/// since all branches start running simultaneously.
pub fn initial_runtime_data(step: &StepDef) -> StepRuntimeData {
    match step {
        StepDef::FormStep(_) => StepRuntimeData::FormStep,
        StepDef::ApprovalStep(_) => StepRuntimeData::ApprovalStep {
            resolved_approvers: vec![],
            decisions: vec![],
        },
        StepDef::TaskStep(def) => StepRuntimeData::TaskStep {
            instructions: def.instructions.clone(),
            output_fields: def.output_fields.clone(),
            execution_notes: None,
        },
        StepDef::NotifyStep(def) => StepRuntimeData::NotifyStep {
            template_key: def.notification_template.clone(),
        },
        StepDef::ForkStep(def) => StepRuntimeData::ForkStep {
            branches: def.branches.clone(),
            failure_policy: def.failure_policy,
            active_branch_ids: def.branches.iter().map(|b| b.branch_id.clone()).collect(),
        },
        StepDef::JoinStep(def) => StepRuntimeData::JoinStep {
            join_mode: def.join_mode,
            source_fork_step_id: def.source_fork_step_id.clone(),
            arrived_branch_ids: vec![],
            arrived_outcomes: vec![],
        },
        StepDef::SubWorkflowStep(def) => StepRuntimeData::SubWorkflowStep {
            sub_workflow_id: def.sub_workflow_id.clone(),
            sub_workflow_version: def.sub_workflow_version,
            sub_workflow_name: def.sub_workflow_name.clone(),
        },
    }
}

/// `due_at` for a step entering `ACTIVE`/`WAITING_FOR_APPROVAL`/
/// `WAITING_ASSIGNMENT`: `activated_at + sla_due_minutes`, or `None` if
/// the step carries no SLA configuration. The scheduler's reminder and
/// escalation sweeps simply skip steps with no `due_at`.
pub fn compute_due_at(step: &StepDef, activated_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    step.common().sla_due_minutes.map(|minutes| activated_at + Duration::minutes(minutes))
}
