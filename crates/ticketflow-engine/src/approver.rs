//! Approver resolution (spec.md 4.2 "Activation of a successor step",
//! APPROVAL_STEP): turns an `ApproverResolution` plus the step's
//! configuration into the set of `UserSnapshot`s who must decide.

use ticketflow_core::definition::{ApproverResolution, ApprovalStepDef, FormValues};
use ticketflow_core::{EngineError, Ticket, UserSnapshot};
use ticketflow_storage::DirectoryAdapter;

/// Resolves to one or more approvers. A `STEP_ASSIGNEE` resolution needs
/// the historical assignee of an earlier `TASK_STEP`, which the caller
/// supplies since it requires a step lookup this module has no access
/// to.
pub async fn resolve_approvers(
    step: &ApprovalStepDef,
    ticket: &Ticket,
    form_values: &FormValues,
    directory: &dyn DirectoryAdapter,
    step_assignee: Option<&UserSnapshot>,
) -> Result<Vec<UserSnapshot>, EngineError> {
    if !step.parallel_approvers.is_empty() {
        let mut resolved = Vec::with_capacity(step.parallel_approvers.len());
        for email in &step.parallel_approvers {
            resolved.push(resolve_single_email(email, directory).await);
        }
        return Ok(resolved);
    }

    let single = match step.approver_resolution {
        ApproverResolution::RequesterManager => {
            if !ticket.manager_snapshot.resolved {
                return Err(EngineError::ExternalService(format!(
                    "manager for requester {} could not be resolved",
                    ticket.requester.email
                )));
            }
            ticket.manager_snapshot.clone()
        }
        ApproverResolution::SpecificEmail | ApproverResolution::SpocEmail => {
            let email = step.specific_approver_email.as_deref().ok_or_else(|| {
                EngineError::engine("approval step missing specific_approver_email")
            })?;
            resolve_single_email(email, directory).await
        }
        ApproverResolution::Conditional => {
            let matched = step
                .conditional_approver_rules
                .iter()
                .find(|rule| rule.condition.evaluate(form_values));

            let email = match matched {
                Some(rule) => rule.approver_email.as_str(),
                None => step
                    .conditional_fallback_approver
                    .as_deref()
                    .ok_or_else(|| EngineError::engine("no conditional rule matched and no fallback approver configured"))?,
            };
            resolve_single_email(email, directory).await
        }
        ApproverResolution::StepAssignee => step_assignee
            .cloned()
            .ok_or_else(|| EngineError::engine("step_assignee approver resolution requires a completed referenced task step"))?,
    };

    Ok(vec![single])
}

async fn resolve_single_email(email: &str, directory: &dyn DirectoryAdapter) -> UserSnapshot {
    directory.get_user(email).await.unwrap_or_else(|| UserSnapshot::unresolved(email.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ticketflow_core::definition::{ConditionalApproverRule, Condition, ConditionGroup, LogicOp, Operator, StepCommon};
    use ticketflow_storage::InMemoryDirectoryAdapter;
    use std::collections::HashMap;

    fn ticket() -> Ticket {
        Ticket {
            ticket_id: "TKT-1".into(),
            workflow_id: "WF-1".into(),
            workflow_version_number: 1,
            title: "t".into(),
            description: String::new(),
            status: ticketflow_core::definition::TicketStatus::Open,
            requester: UserSnapshot::resolved("u1", "alice@example.com", "Alice"),
            manager_snapshot: UserSnapshot::resolved("u2", "boss@example.com", "Bob"),
            form_values: HashMap::new(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            version: 1,
        }
    }

    fn approval_step(resolution: ApproverResolution) -> ApprovalStepDef {
        ApprovalStepDef {
            common: StepCommon {
                step_id: "a1".into(),
                step_name: "Approve".into(),
                is_start: false,
                is_terminal: false,
                order: 1,
                sla_due_minutes: None,
            },
            approver_resolution: resolution,
            specific_approver_email: None,
            conditional_approver_rules: vec![],
            conditional_fallback_approver: None,
            step_assignee_step_id: None,
            parallel_approval: None,
            parallel_approvers: vec![],
        }
    }

    #[tokio::test]
    async fn requester_manager_resolution_uses_manager_snapshot() {
        let step = approval_step(ApproverResolution::RequesterManager);
        let dir = InMemoryDirectoryAdapter::new();
        let resolved = resolve_approvers(&step, &ticket(), &HashMap::new(), &dir, None).await.unwrap();
        assert_eq!(resolved[0].email, "boss@example.com");
    }

    #[tokio::test]
    async fn unresolved_manager_fails_with_external_service_error() {
        let step = approval_step(ApproverResolution::RequesterManager);
        let mut t = ticket();
        t.manager_snapshot = UserSnapshot::unresolved("boss@example.com");
        let dir = InMemoryDirectoryAdapter::new();
        let err = resolve_approvers(&step, &t, &HashMap::new(), &dir, None).await.unwrap_err();
        assert!(matches!(err, EngineError::ExternalService(_)));
    }

    #[tokio::test]
    async fn conditional_resolution_matches_first_rule_in_order() {
        let mut step = approval_step(ApproverResolution::Conditional);
        step.conditional_approver_rules = vec![ConditionalApproverRule {
            condition: ConditionGroup {
                logic: LogicOp::And,
                conditions: vec![Condition::new("amount", Operator::GreaterThan, serde_json::json!(10000))],
            },
            approver_email: "finance_head@example.com".into(),
        }];
        step.conditional_fallback_approver = Some("direct_manager@example.com".into());

        let dir = InMemoryDirectoryAdapter::new();
        let fv: FormValues = [("amount".to_string(), serde_json::json!(50000))].into_iter().collect();
        let resolved = resolve_approvers(&step, &ticket(), &fv, &dir, None).await.unwrap();
        assert_eq!(resolved[0].email, "finance_head@example.com");
    }

    #[tokio::test]
    async fn conditional_resolution_falls_back_when_no_rule_matches() {
        let mut step = approval_step(ApproverResolution::Conditional);
        step.conditional_approver_rules = vec![ConditionalApproverRule {
            condition: ConditionGroup {
                logic: LogicOp::And,
                conditions: vec![Condition::new("amount", Operator::GreaterThan, serde_json::json!(10000))],
            },
            approver_email: "finance_head@example.com".into(),
        }];
        step.conditional_fallback_approver = Some("direct_manager@example.com".into());

        let dir = InMemoryDirectoryAdapter::new();
        let fv: FormValues = [("amount".to_string(), serde_json::json!(500))].into_iter().collect();
        let resolved = resolve_approvers(&step, &ticket(), &fv, &dir, None).await.unwrap();
        assert_eq!(resolved[0].email, "direct_manager@example.com");
    }

    #[tokio::test]
    async fn step_assignee_resolution_requires_a_supplied_snapshot() {
        let step = approval_step(ApproverResolution::StepAssignee);
        let dir = InMemoryDirectoryAdapter::new();
        let err = resolve_approvers(&step, &ticket(), &HashMap::new(), &dir, None).await.unwrap_err();
        assert!(matches!(err, EngineError::Engine(_)));

        let assignee = UserSnapshot::resolved("u3", "agent@example.com", "Agent");
        let resolved = resolve_approvers(&step, &ticket(), &HashMap::new(), &dir, Some(&assignee)).await.unwrap();
        assert_eq!(resolved[0].email, "agent@example.com");
    }
}
