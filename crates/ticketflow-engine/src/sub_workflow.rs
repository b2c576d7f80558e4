//! Sub-workflow expansion (spec.md 4.3): eager bulk materialization of a
//! `SUB_WORKFLOW_STEP`'s referenced definition into sibling `TicketStep`s
//! on the same ticket, and the terminal-state aggregation that reports
//! the sub-instance's outcome back to the engine.
//!
//! Grounded on `sub_workflow_handler.py`'s `expand_sub_workflow`,
//! `_build_sub_workflow_branch_map`, and `is_sub_workflow_complete`.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};

use ticketflow_core::definition::{FailurePolicy, StepDef, StepState, StepType, WorkflowDefinition};
use ticketflow_core::ticket_step::StepRuntimeData;
use ticketflow_core::{Ticket, TicketStep};

use crate::activation;

/// `step_id -> (branch_id, branch_name, fork_step_id)` for every step that
/// sits inside one of the definition's fork branches. A BFS per branch,
/// stopping before re-entering the branch's matching join, so the join
/// itself is never tagged into a branch.
pub fn build_branch_map(definition: &WorkflowDefinition) -> HashMap<String, (String, String, String)> {
    let mut map = HashMap::new();

    for step in &definition.steps {
        let StepDef::ForkStep(fork) = step else { continue };

        for branch in &fork.branches {
            let mut visited = HashSet::new();
            let mut queue = VecDeque::new();
            queue.push_back(branch.start_step_id.clone());
            visited.insert(branch.start_step_id.clone());

            while let Some(current) = queue.pop_front() {
                map.insert(
                    current.clone(),
                    (branch.branch_id.clone(), branch.branch_name.clone(), fork.common.step_id.clone()),
                );

                for transition in definition.transitions.iter().filter(|t| t.from_step_id == current) {
                    if visited.contains(&transition.to_step_id) {
                        continue;
                    }
                    let is_join = matches!(definition.step(&transition.to_step_id), Some(StepDef::JoinStep(_)));
                    if is_join {
                        continue;
                    }
                    visited.insert(transition.to_step_id.clone());
                    queue.push_back(transition.to_step_id.clone());
                }
            }
        }
    }

    map
}

/// Every `TicketStep` the sub-definition expands into, in definition
/// order, `NOT_STARTED` except nothing yet activated. If the parent
/// `SUB_WORKFLOW_STEP` itself sits in an outer branch, every child
/// inherits that outer branch context unless the sub-definition tags the
/// step with its own inner branch, which takes precedence.
pub fn expand_sub_workflow(
    ticket: &Ticket,
    parent_step: &TicketStep,
    sub_definition: &WorkflowDefinition,
    sub_workflow_id: &str,
    sub_workflow_version: i32,
    now: DateTime<Utc>,
) -> Vec<TicketStep> {
    let branch_map = build_branch_map(sub_definition);

    sub_definition
        .steps
        .iter()
        .enumerate()
        .map(|(order, step_def)| {
            let (branch_id, branch_name, parent_fork_step_id) = match branch_map.get(step_def.step_id()) {
                Some((b, n, f)) => (Some(b.clone()), Some(n.clone()), Some(f.clone())),
                None => (
                    parent_step.branch_id.clone(),
                    parent_step.branch_name.clone(),
                    parent_step.parent_fork_step_id.clone(),
                ),
            };

            TicketStep {
                ticket_step_id: ticketflow_core::ids::generate_ticket_step_id(),
                ticket_id: ticket.ticket_id.clone(),
                step_id: step_def.step_id().to_string(),
                step_name: step_def.common().step_name.clone(),
                step_type: step_def.step_type(),
                state: StepState::NotStarted,
                assigned_to: None,
                data: activation::initial_runtime_data(step_def),
                due_at: None,
                last_reminder_at: None,
                last_escalation_at: None,
                branch_id,
                branch_name,
                parent_fork_step_id,
                parent_sub_workflow_step_id: Some(parent_step.ticket_step_id.clone()),
                from_sub_workflow_id: Some(sub_workflow_id.to_string()),
                from_sub_workflow_version: Some(sub_workflow_version),
                sub_workflow_step_order: Some(order as u32),
                created_at: now,
                updated_at: now,
                version: 1,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubWorkflowOutcome {
    Completed,
    Rejected,
    Cancelled,
}

/// `None` while the sub-instance is still running. A rejected step inside
/// a `CONTINUE_OTHERS` branch does not fail the whole sub-instance by
/// itself; completion is only decided once every step has reached a
/// terminal state.
pub fn is_sub_workflow_complete(sub_steps: &[TicketStep]) -> Option<SubWorkflowOutcome> {
    if sub_steps.is_empty() {
        return Some(SubWorkflowOutcome::Completed);
    }

    let fork_failure_policy_by_branch: HashMap<&str, FailurePolicy> = sub_steps
        .iter()
        .filter(|s| s.step_type == StepType::ForkStep)
        .filter_map(|s| match &s.data {
            StepRuntimeData::ForkStep { branches, failure_policy, .. } => {
                Some(branches.iter().map(move |b| (b.branch_id.as_str(), *failure_policy)))
            }
            _ => None,
        })
        .flatten()
        .collect();

    for rejected in sub_steps.iter().filter(|s| s.state == StepState::Rejected) {
        let policy = rejected
            .branch_id
            .as_deref()
            .and_then(|id| fork_failure_policy_by_branch.get(id))
            .copied();

        match policy {
            Some(FailurePolicy::ContinueOthers) => continue,
            Some(FailurePolicy::FailAll) | Some(FailurePolicy::CancelOthers) => return Some(SubWorkflowOutcome::Rejected),
            None => return Some(SubWorkflowOutcome::Rejected),
        }
    }

    let all_terminal = sub_steps.iter().all(|s| s.state.is_terminal());
    if !all_terminal {
        return None;
    }

    let has_rejected = sub_steps.iter().any(|s| s.state == StepState::Rejected);
    let has_completed = sub_steps.iter().any(|s| s.state == StepState::Completed);
    let join_completed = sub_steps
        .iter()
        .any(|s| s.step_type == StepType::JoinStep && s.state == StepState::Completed);

    if has_rejected {
        if join_completed || has_completed {
            Some(SubWorkflowOutcome::Completed)
        } else {
            Some(SubWorkflowOutcome::Rejected)
        }
    } else if has_completed {
        Some(SubWorkflowOutcome::Completed)
    } else {
        Some(SubWorkflowOutcome::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ticketflow_core::definition::{BranchDef, ForkStepDef, JoinStepDef, StepCommon, TransitionDef, TransitionEvent};
    use ticketflow_core::definition::JoinMode;

    fn common(id: &str) -> StepCommon {
        StepCommon {
            step_id: id.into(),
            step_name: id.into(),
            is_start: false,
            is_terminal: false,
            order: 0,
            sla_due_minutes: None,
        }
    }

    fn fork_join_def() -> WorkflowDefinition {
        WorkflowDefinition {
            steps: vec![
                StepDef::ForkStep(ForkStepDef {
                    common: common("fork1"),
                    branches: vec![
                        BranchDef { branch_id: "it".into(), branch_name: "IT".into(), start_step_id: "it_approve".into() },
                        BranchDef { branch_id: "fin".into(), branch_name: "Finance".into(), start_step_id: "fin_approve".into() },
                    ],
                    failure_policy: FailurePolicy::ContinueOthers,
                }),
                StepDef::JoinStep(JoinStepDef {
                    common: common("join1"),
                    join_mode: JoinMode::All,
                    source_fork_step_id: "fork1".into(),
                }),
            ],
            transitions: vec![
                TransitionDef::new("t1", "it_approve", "join1", TransitionEvent::Approve),
                TransitionDef::new("t2", "fin_approve", "join1", TransitionEvent::Reject),
            ],
            start_step_id: "fork1".into(),
        }
    }

    #[test]
    fn branch_map_tags_branch_steps_but_not_the_join() {
        let map = build_branch_map(&fork_join_def());
        assert_eq!(map.get("it_approve").unwrap().0, "it");
        assert_eq!(map.get("fin_approve").unwrap().0, "fin");
        assert!(!map.contains_key("join1"));
    }

    fn step(step_type: StepType, state: StepState, branch_id: Option<&str>) -> TicketStep {
        TicketStep {
            ticket_step_id: ticketflow_core::ids::generate_ticket_step_id(),
            ticket_id: "TKT-1".into(),
            step_id: "s".into(),
            step_name: "s".into(),
            step_type,
            state,
            assigned_to: None,
            data: match step_type {
                StepType::ForkStep => StepRuntimeData::ForkStep {
                    branches: vec![
                        BranchDef { branch_id: "it".into(), branch_name: "IT".into(), start_step_id: "a".into() },
                        BranchDef { branch_id: "fin".into(), branch_name: "Finance".into(), start_step_id: "b".into() },
                    ],
                    failure_policy: FailurePolicy::ContinueOthers,
                    active_branch_ids: vec![],
                },
                StepType::JoinStep => StepRuntimeData::JoinStep {
                    join_mode: JoinMode::All,
                    source_fork_step_id: "fork1".into(),
                    arrived_branch_ids: vec![],
                    arrived_outcomes: vec![],
                },
                _ => StepRuntimeData::ApprovalStep { resolved_approvers: vec![], decisions: vec![] },
            },
            due_at: None,
            last_reminder_at: None,
            last_escalation_at: None,
            branch_id: branch_id.map(String::from),
            branch_name: None,
            parent_fork_step_id: branch_id.map(|_| "fork1".to_string()),
            parent_sub_workflow_step_id: Some("STEP-parent".into()),
            from_sub_workflow_id: None,
            from_sub_workflow_version: None,
            sub_workflow_step_order: Some(0),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            version: 1,
        }
    }

    #[test]
    fn continue_others_rejection_completes_once_join_completes() {
        let steps = vec![
            step(StepType::ForkStep, StepState::Completed, None),
            step(StepType::ApprovalStep, StepState::Completed, Some("it")),
            step(StepType::ApprovalStep, StepState::Rejected, Some("fin")),
            step(StepType::JoinStep, StepState::Completed, None),
        ];
        assert_eq!(is_sub_workflow_complete(&steps), Some(SubWorkflowOutcome::Completed));
    }

    #[test]
    fn fail_all_rejection_fails_immediately_even_mid_flight() {
        let mut fork = step(StepType::ForkStep, StepState::Completed, None);
        let StepRuntimeData::ForkStep { failure_policy, .. } = &mut fork.data else { unreachable!() };
        *failure_policy = FailurePolicy::FailAll;
        let steps = vec![
            fork,
            step(StepType::ApprovalStep, StepState::Active, Some("it")),
            step(StepType::ApprovalStep, StepState::Rejected, Some("fin")),
        ];
        assert_eq!(is_sub_workflow_complete(&steps), Some(SubWorkflowOutcome::Rejected));
    }

    #[test]
    fn still_running_returns_none() {
        let steps = vec![step(StepType::ApprovalStep, StepState::WaitingForApproval, None)];
        assert_eq!(is_sub_workflow_complete(&steps), None);
    }

    #[test]
    fn empty_sub_workflow_is_trivially_complete() {
        assert_eq!(is_sub_workflow_complete(&[]), Some(SubWorkflowOutcome::Completed));
    }
}
