//! End-to-end scenarios (spec.md 8 "End-to-end scenarios (seed tests)"),
//! run against the in-memory stores the same way `ticketflow-server`'s
//! `AppState` wires them. Grounded on
//! `durable/tests/postgres_integration_test.rs`'s shape: build a harness,
//! drive a sequence of operations, assert on final state plus the audit
//! and outbox trail.

use std::collections::HashMap;
use std::sync::Arc;

use ticketflow_core::definition::{
    ApprovalStepDef, ApproverResolution, BranchDef, Condition, ConditionGroup, ConditionalApproverRule, FailurePolicy,
    FieldType, FieldDef, ForkStepDef, FormStepDef, JoinMode, JoinStepDef, LogicOp, NotifyStepDef, Operator, RecipientSpec,
    StepCommon, StepDef, SubWorkflowStepDef, TaskStepDef, TicketStatus, TransitionDef, TransitionEvent, WorkflowDefinition,
    NotifyRecipient,
};
use ticketflow_core::{Actor, Clock, RequestContext, SystemClock, UserSnapshot};
use ticketflow_engine::{TicketEngine, WorkflowAdminService};
use ticketflow_outbox::{InMemoryOutboxRepository, OutboxRepository};
use ticketflow_storage::memory::{InMemorySatelliteStore, InMemoryTicketStore, InMemoryWorkflowStore};
use ticketflow_storage::{AuditRepository, InMemoryDirectoryAdapter, SatelliteRepository, TicketRepository, WorkflowRepository};

struct Harness {
    engine: TicketEngine,
    admin: WorkflowAdminService,
    tickets: Arc<InMemoryTicketStore>,
    outbox: Arc<InMemoryOutboxRepository>,
    directory: Arc<InMemoryDirectoryAdapter>,
}

fn build_harness() -> Harness {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let tickets = Arc::new(InMemoryTicketStore::new());
    let workflows = Arc::new(InMemoryWorkflowStore::new());
    let satellites = Arc::new(InMemorySatelliteStore::new());
    let outbox = Arc::new(InMemoryOutboxRepository::new());
    let directory = Arc::new(InMemoryDirectoryAdapter::new());

    directory.seed_user(UserSnapshot::resolved("u-alice", "alice@example.com", "Alice"));
    directory.seed_user(UserSnapshot::resolved("u-bob", "bob@example.com", "Bob (manager)"));
    directory.seed_user(UserSnapshot::resolved("u-agent", "agent@example.com", "Agent A"));
    directory.seed_manager("alice@example.com", "bob@example.com");

    let tickets_trait: Arc<dyn TicketRepository> = tickets.clone();
    let workflows_trait: Arc<dyn WorkflowRepository> = workflows.clone();
    let satellites_trait: Arc<dyn SatelliteRepository> = satellites.clone();
    let audit_trait: Arc<dyn AuditRepository> = satellites.clone();
    let outbox_trait: Arc<dyn OutboxRepository> = outbox.clone();
    let directory_trait: Arc<dyn ticketflow_storage::DirectoryAdapter> = directory.clone();

    let engine = TicketEngine::new(
        tickets_trait,
        workflows_trait.clone(),
        satellites_trait,
        audit_trait,
        outbox_trait,
        directory_trait,
        clock.clone(),
    );
    let admin = WorkflowAdminService::new(workflows_trait, clock);

    Harness { engine, admin, tickets, outbox, directory }
}

fn requester_ctx() -> RequestContext {
    RequestContext::generate(Actor::new("alice@example.com", "u-alice", "Alice"))
}

fn manager_ctx() -> RequestContext {
    RequestContext::generate(Actor::new("bob@example.com", "u-bob", "Bob (manager)"))
}

fn agent_ctx() -> RequestContext {
    RequestContext::generate(Actor::new("agent@example.com", "u-agent", "Agent A"))
}

fn common(step_id: &str, order: u32, is_start: bool, is_terminal: bool) -> StepCommon {
    StepCommon { step_id: step_id.into(), step_name: step_id.into(), is_start, is_terminal, order, sla_due_minutes: None }
}

/// FORM -> APPROVAL(REQUESTER_MANAGER) -> TASK -> NOTIFY(terminal), the
/// workflow shared by seed scenarios 1 and 2.
fn linear_definition() -> WorkflowDefinition {
    WorkflowDefinition {
        steps: vec![
            StepDef::FormStep(FormStepDef {
                common: common("form", 0, true, false),
                fields: vec![FieldDef::new("priority", FieldType::Text)],
                sections: vec![],
            }),
            StepDef::ApprovalStep(ApprovalStepDef {
                common: common("approve", 1, false, false),
                approver_resolution: ApproverResolution::RequesterManager,
                specific_approver_email: None,
                conditional_approver_rules: vec![],
                conditional_fallback_approver: None,
                step_assignee_step_id: None,
                parallel_approval: None,
                parallel_approvers: vec![],
            }),
            StepDef::TaskStep(TaskStepDef {
                common: common("task", 2, false, false),
                instructions: "assign and complete".into(),
                execution_notes_required: true,
                output_fields: vec![],
                linked_repeating_source: None,
            }),
            StepDef::NotifyStep(NotifyStepDef {
                common: common("notify", 3, false, true),
                notification_template: "TICKET_DONE".into(),
                recipients: vec![RecipientSpec::Symbolic(NotifyRecipient::Requester)],
                auto_advance: true,
            }),
        ],
        transitions: vec![
            TransitionDef::new("t-form-approve", "form", "approve", TransitionEvent::SubmitForm),
            TransitionDef::new("t-approve-task", "approve", "task", TransitionEvent::Approve),
            TransitionDef::new("t-task-notify", "task", "notify", TransitionEvent::CompleteTask),
        ],
        start_step_id: "form".into(),
    }
}

async fn publish(h: &Harness, name: &str, definition: WorkflowDefinition) -> String {
    let ctx = requester_ctx();
    let (template, result) = h.admin.save_draft(&ctx, None, name, "", "general", vec![], definition).await.unwrap();
    assert!(result.is_valid, "{:?}", result.errors);
    h.admin.publish(&ctx, &template.workflow_id).await.unwrap();
    template.workflow_id
}

async fn step_by_id(h: &Harness, ticket_id: &str, step_id: &str) -> ticketflow_core::TicketStep {
    h.tickets
        .list_steps_for_ticket(ticket_id)
        .await
        .unwrap()
        .into_iter()
        .find(|s| s.step_id == step_id)
        .unwrap_or_else(|| panic!("step '{step_id}' not found on ticket {ticket_id}"))
}

#[tokio::test]
async fn linear_workflow_completes_and_emits_the_expected_outbox_trail() {
    let h = build_harness();
    let workflow_id = publish(&h, "Linear", linear_definition()).await;

    let ctx = requester_ctx();
    let outcome = h
        .engine
        .create_ticket(&ctx, &workflow_id, "Laptop", "", [("priority".to_string(), serde_json::json!("High"))].into_iter().collect())
        .await
        .unwrap();
    let ticket_id = outcome.ticket.unwrap().ticket_id;

    let form_step = step_by_id(&h, &ticket_id, "form").await;
    h.engine.submit_form(&requester_ctx(), &ticket_id, &form_step.ticket_step_id, HashMap::new()).await.unwrap();

    let approve_step = step_by_id(&h, &ticket_id, "approve").await;
    h.engine.approve(&manager_ctx(), &ticket_id, &approve_step.ticket_step_id, None).await.unwrap();

    let task_step = step_by_id(&h, &ticket_id, "task").await;
    h.engine.assign_agent(&manager_ctx(), &ticket_id, &task_step.ticket_step_id, UserSnapshot::resolved("u-agent", "agent@example.com", "Agent A")).await.unwrap();
    h.engine
        .complete_task(&agent_ctx(), &ticket_id, &task_step.ticket_step_id, Some("done".into()), HashMap::new())
        .await
        .unwrap();

    let ticket = h.tickets.get_ticket(&ticket_id).await.unwrap().unwrap();
    assert_eq!(ticket.status, TicketStatus::Completed);

    let pending = h.outbox.fetch_pending(100, chrono::Utc::now()).await.unwrap();
    let keys: Vec<&str> = pending.iter().map(|n| n.template_key.as_str()).collect();
    assert_eq!(keys, vec!["TICKET_CREATED", "APPROVAL_PENDING", "APPROVED", "TASK_ASSIGNED", "TASK_COMPLETED", "TICKET_COMPLETED"]);
}

#[tokio::test]
async fn rejection_terminates_the_ticket_without_activating_downstream_steps() {
    let h = build_harness();
    let workflow_id = publish(&h, "Linear", linear_definition()).await;

    let ctx = requester_ctx();
    let outcome = h.engine.create_ticket(&ctx, &workflow_id, "Laptop", "", HashMap::new()).await.unwrap();
    let ticket_id = outcome.ticket.unwrap().ticket_id;

    let form_step = step_by_id(&h, &ticket_id, "form").await;
    h.engine.submit_form(&requester_ctx(), &ticket_id, &form_step.ticket_step_id, HashMap::new()).await.unwrap();

    let approve_step = step_by_id(&h, &ticket_id, "approve").await;
    h.engine.reject(&manager_ctx(), &ticket_id, &approve_step.ticket_step_id, Some("budget".into())).await.unwrap();

    let ticket = h.tickets.get_ticket(&ticket_id).await.unwrap().unwrap();
    assert_eq!(ticket.status, TicketStatus::Rejected);

    let steps = h.tickets.list_steps_for_ticket(&ticket_id).await.unwrap();
    assert!(!steps.iter().any(|s| s.step_id == "task" || s.step_id == "notify"));
}

/// FORM -> FORK [IT: APPROVAL, Finance: APPROVAL] -> JOIN(ALL) -> NOTIFY.
fn fork_join_definition() -> WorkflowDefinition {
    WorkflowDefinition {
        steps: vec![
            StepDef::FormStep(FormStepDef { common: common("form", 0, true, false), fields: vec![], sections: vec![] }),
            StepDef::ForkStep(ForkStepDef {
                common: common("fork", 1, false, false),
                branches: vec![
                    BranchDef { branch_id: "it".into(), branch_name: "IT".into(), start_step_id: "it_approve".into() },
                    BranchDef { branch_id: "fin".into(), branch_name: "Finance".into(), start_step_id: "fin_approve".into() },
                ],
                failure_policy: FailurePolicy::ContinueOthers,
            }),
            StepDef::ApprovalStep(ApprovalStepDef {
                common: common("it_approve", 2, false, false),
                approver_resolution: ApproverResolution::RequesterManager,
                specific_approver_email: None,
                conditional_approver_rules: vec![],
                conditional_fallback_approver: None,
                step_assignee_step_id: None,
                parallel_approval: None,
                parallel_approvers: vec![],
            }),
            StepDef::ApprovalStep(ApprovalStepDef {
                common: common("fin_approve", 3, false, false),
                approver_resolution: ApproverResolution::RequesterManager,
                specific_approver_email: None,
                conditional_approver_rules: vec![],
                conditional_fallback_approver: None,
                step_assignee_step_id: None,
                parallel_approval: None,
                parallel_approvers: vec![],
            }),
            StepDef::JoinStep(JoinStepDef { common: common("join", 4, false, false), join_mode: JoinMode::All, source_fork_step_id: "fork".into() }),
            StepDef::NotifyStep(NotifyStepDef {
                common: common("notify", 5, false, true),
                notification_template: "FORK_DONE".into(),
                recipients: vec![RecipientSpec::Symbolic(NotifyRecipient::Requester)],
                auto_advance: true,
            }),
        ],
        transitions: vec![
            TransitionDef::new("t-form-fork", "form", "fork", TransitionEvent::SubmitForm),
            TransitionDef::new("t-join-notify", "join", "notify", TransitionEvent::JoinComplete),
        ],
        start_step_id: "form".into(),
    }
}

#[tokio::test]
async fn fork_join_continue_others_completes_when_one_branch_rejects() {
    let h = build_harness();
    // save_draft auto-inserts the branch-to-join edges for both branches'
    // approve/reject events (admin.rs close_branch_to_join_edges), so the
    // definition above deliberately carries none of its own.
    let ctx = requester_ctx();
    let (template, result) = h.admin.save_draft(&ctx, None, "ForkJoin", "", "general", vec![], fork_join_definition()).await.unwrap();
    assert!(result.is_valid, "{:?}", result.errors);
    h.admin.publish(&ctx, &template.workflow_id).await.unwrap();
    let workflow_id = template.workflow_id;

    let outcome = h.engine.create_ticket(&ctx, &workflow_id, "Expense", "", HashMap::new()).await.unwrap();
    let ticket_id = outcome.ticket.unwrap().ticket_id;

    let form_step = step_by_id(&h, &ticket_id, "form").await;
    h.engine.submit_form(&requester_ctx(), &ticket_id, &form_step.ticket_step_id, HashMap::new()).await.unwrap();

    let it_step = step_by_id(&h, &ticket_id, "it_approve").await;
    h.engine.approve(&manager_ctx(), &ticket_id, &it_step.ticket_step_id, None).await.unwrap();

    let fin_step = step_by_id(&h, &ticket_id, "fin_approve").await;
    h.engine.reject(&manager_ctx(), &ticket_id, &fin_step.ticket_step_id, Some("over budget".into())).await.unwrap();

    let ticket = h.tickets.get_ticket(&ticket_id).await.unwrap().unwrap();
    assert_eq!(ticket.status, TicketStatus::Completed);

    let fin_step_final = step_by_id(&h, &ticket_id, "fin_approve").await;
    assert_eq!(fin_step_final.state, ticketflow_core::definition::StepState::Rejected);

    let notify_step = step_by_id(&h, &ticket_id, "notify").await;
    assert_eq!(notify_step.state, ticketflow_core::definition::StepState::Completed);
}

/// Parent: FORM -> SUB_WORKFLOW_STEP(child) -> NOTIFY.
/// Child: FORM -> TASK -> NOTIFY(terminal).
#[tokio::test]
async fn sub_workflow_expands_and_parent_completes_after_child_terminates() {
    let h = build_harness();

    let child_definition = WorkflowDefinition {
        steps: vec![
            StepDef::FormStep(FormStepDef { common: common("c_form", 0, true, false), fields: vec![], sections: vec![] }),
            StepDef::TaskStep(TaskStepDef {
                common: common("c_task", 1, false, false),
                instructions: "do child work".into(),
                execution_notes_required: false,
                output_fields: vec![],
                linked_repeating_source: None,
            }),
            StepDef::NotifyStep(NotifyStepDef {
                common: common("c_notify", 2, false, true),
                notification_template: "CHILD_DONE".into(),
                recipients: vec![RecipientSpec::Symbolic(NotifyRecipient::Requester)],
                auto_advance: true,
            }),
        ],
        transitions: vec![
            TransitionDef::new("ct-form-task", "c_form", "c_task", TransitionEvent::SubmitForm),
            TransitionDef::new("ct-task-notify", "c_task", "c_notify", TransitionEvent::CompleteTask),
        ],
        start_step_id: "c_form".into(),
    };
    let ctx = requester_ctx();
    let (child_template, child_result) = h.admin.save_draft(&ctx, None, "Child", "", "general", vec![], child_definition).await.unwrap();
    assert!(child_result.is_valid, "{:?}", child_result.errors);
    h.admin.publish(&ctx, &child_template.workflow_id).await.unwrap();

    let parent_definition = WorkflowDefinition {
        steps: vec![
            StepDef::FormStep(FormStepDef { common: common("p_form", 0, true, false), fields: vec![], sections: vec![] }),
            StepDef::SubWorkflowStep(SubWorkflowStepDef {
                common: common("p_sub", 1, false, false),
                sub_workflow_id: child_template.workflow_id.clone(),
                sub_workflow_version: 1,
                sub_workflow_name: "Child".into(),
            }),
            StepDef::NotifyStep(NotifyStepDef {
                common: common("p_notify", 2, false, true),
                notification_template: "PARENT_DONE".into(),
                recipients: vec![RecipientSpec::Symbolic(NotifyRecipient::Requester)],
                auto_advance: true,
            }),
        ],
        transitions: vec![
            TransitionDef::new("pt-form-sub", "p_form", "p_sub", TransitionEvent::SubmitForm),
            // SUB_WORKFLOW_STEP has no legal_source_events of its own, so
            // selection.rs never filters its outgoing edge by `on_event`.
            TransitionDef::new("pt-sub-notify", "p_sub", "p_notify", TransitionEvent::BranchCompleted),
        ],
        start_step_id: "p_form".into(),
    };
    let (parent_template, parent_result) = h.admin.save_draft(&ctx, None, "Parent", "", "general", vec![], parent_definition).await.unwrap();
    assert!(parent_result.is_valid, "{:?}", parent_result.errors);
    h.admin.publish(&ctx, &parent_template.workflow_id).await.unwrap();

    let outcome = h.engine.create_ticket(&ctx, &parent_template.workflow_id, "Onboarding", "", HashMap::new()).await.unwrap();
    let ticket_id = outcome.ticket.unwrap().ticket_id;

    let p_form = step_by_id(&h, &ticket_id, "p_form").await;
    h.engine.submit_form(&requester_ctx(), &ticket_id, &p_form.ticket_step_id, HashMap::new()).await.unwrap();

    let c_form = step_by_id(&h, &ticket_id, "c_form").await;
    h.engine.submit_form(&requester_ctx(), &ticket_id, &c_form.ticket_step_id, HashMap::new()).await.unwrap();

    let c_task = step_by_id(&h, &ticket_id, "c_task").await;
    h.engine.assign_agent(&manager_ctx(), &ticket_id, &c_task.ticket_step_id, UserSnapshot::resolved("u-agent", "agent@example.com", "Agent A")).await.unwrap();
    h.engine.complete_task(&agent_ctx(), &ticket_id, &c_task.ticket_step_id, None, HashMap::new()).await.unwrap();

    let ticket = h.tickets.get_ticket(&ticket_id).await.unwrap().unwrap();
    assert_eq!(ticket.status, TicketStatus::Completed);

    let p_sub_final = step_by_id(&h, &ticket_id, "p_sub").await;
    assert_eq!(p_sub_final.state, ticketflow_core::definition::StepState::Completed);

    let all_steps = h.tickets.list_steps_for_ticket(&ticket_id).await.unwrap();
    for child_step_id in ["c_form", "c_task", "c_notify"] {
        let step = all_steps.iter().find(|s| s.step_id == child_step_id).unwrap();
        assert_eq!(step.parent_sub_workflow_step_id.as_deref(), Some(p_sub_final.ticket_step_id.as_str()));
    }
}

/// FORM(amount) -> APPROVAL(CONDITIONAL: amount > 10000 -> finance_head,
/// fallback direct_manager).
#[tokio::test]
async fn conditional_approver_resolution_picks_the_matching_rule() {
    let h = build_harness();
    h.directory.seed_user(UserSnapshot::resolved("u-finance", "finance_head@example.com", "Finance Head"));
    h.directory.seed_user(UserSnapshot::resolved("u-dm", "direct_manager@example.com", "Direct Manager"));

    let definition = WorkflowDefinition {
        steps: vec![
            StepDef::FormStep(FormStepDef {
                common: common("form", 0, true, false),
                fields: vec![FieldDef::new("amount", FieldType::Number)],
                sections: vec![],
            }),
            StepDef::ApprovalStep(ApprovalStepDef {
                common: common("approve", 1, false, true),
                approver_resolution: ApproverResolution::Conditional,
                specific_approver_email: None,
                conditional_approver_rules: vec![ConditionalApproverRule {
                    condition: ConditionGroup {
                        logic: LogicOp::And,
                        conditions: vec![Condition::new("amount", Operator::GreaterThan, serde_json::json!(10000))],
                    },
                    approver_email: "finance_head@example.com".into(),
                }],
                conditional_fallback_approver: Some("direct_manager@example.com".into()),
                step_assignee_step_id: None,
                parallel_approval: None,
                parallel_approvers: vec![],
            }),
        ],
        transitions: vec![TransitionDef::new("t-form-approve", "form", "approve", TransitionEvent::SubmitForm)],
        start_step_id: "form".into(),
    };
    let workflow_id = publish(&h, "Conditional", definition).await;

    let ctx = requester_ctx();
    let outcome = h.engine.create_ticket(&ctx, &workflow_id, "Purchase", "", HashMap::new()).await.unwrap();
    let ticket_id = outcome.ticket.unwrap().ticket_id;

    let form_step = step_by_id(&h, &ticket_id, "form").await;
    h.engine
        .submit_form(&requester_ctx(), &ticket_id, &form_step.ticket_step_id, [("amount".to_string(), serde_json::json!(50000))].into_iter().collect())
        .await
        .unwrap();

    let approve_step = step_by_id(&h, &ticket_id, "approve").await;
    let ticketflow_core::ticket_step::StepRuntimeData::ApprovalStep { resolved_approvers, .. } = &approve_step.data else {
        panic!("expected approval runtime data");
    };
    assert_eq!(resolved_approvers.len(), 1);
    assert_eq!(resolved_approvers[0].email, "finance_head@example.com");
}

/// Scheduler instance S1 leases an outbox entry then "crashes" (drops its
/// lease without releasing it); after `stale_lock_cleanup_minutes`,
/// cleanup clears the lease and a second instance can claim and send it.
#[tokio::test]
async fn outbox_entry_recovers_from_a_crashed_leaseholder_and_sends_exactly_once() {
    let outbox = InMemoryOutboxRepository::new();
    let now = chrono::Utc::now();
    let entry = ticketflow_outbox::NotificationOutbox::new("N-1", "TICKET_CREATED", vec!["alice@example.com".into()], serde_json::json!({}), "TKT-1", now);
    outbox.create_many(vec![entry]).await.unwrap();

    let acquired = outbox.acquire_lease("N-1", "s1-host-1234-abcd", std::time::Duration::from_secs(300), now).await.unwrap();
    assert!(acquired);

    // S1 crashes without releasing. A second instance can't acquire the
    // still-held lease yet.
    assert!(!outbox.acquire_lease("N-1", "s2-host-5678-efgh", std::time::Duration::from_secs(300), now).await.unwrap());

    // Past stale_lock_cleanup_minutes, cleanup clears the abandoned lease.
    let later = now + chrono::Duration::minutes(16);
    let cleaned = outbox.cleanup_stale_leases(std::time::Duration::from_secs(900), later).await.unwrap();
    assert_eq!(cleaned, 1);

    let reacquired = outbox.acquire_lease("N-1", "s2-host-5678-efgh", std::time::Duration::from_secs(300), later).await.unwrap();
    assert!(reacquired);

    outbox.mark_sent("N-1", later).await.unwrap();
    let final_entry = outbox.get("N-1").await.unwrap().unwrap();
    assert_eq!(final_entry.status, ticketflow_core::definition::NotificationStatus::Sent);

    // mark_sent is idempotent: a second call from a confused leaseholder
    // is a no-op, not an error.
    outbox.mark_sent("N-1", later).await.unwrap();
    let still = outbox.get("N-1").await.unwrap().unwrap();
    assert_eq!(still.status, ticketflow_core::definition::NotificationStatus::Sent);
}
