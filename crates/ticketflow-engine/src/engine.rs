//! `TicketEngine`: the transition engine (component E, spec.md 4.2) --
//! the single surface every user-triggered ticket mutation goes through.
//! Each public method reads the ticket and its steps, computes the full
//! effect of one event, and writes the result, retrying the whole
//! computation up to three times on an optimistic version conflict
//! (spec.md 4.2 "Concurrency discipline"), grounded on
//! `durable::engine::executor::WorkflowExecutor::process_workflow`'s
//! read-compute-append retry loop.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::instrument;

use ticketflow_core::definition::{
    FailurePolicy, FormValues, JoinMode, StepDef, StepState, StepType, TicketStatus, TransitionEvent, WorkflowDefinition,
};
use ticketflow_core::ticket_step::StepRuntimeData;
use ticketflow_core::{ids, AuditEvent, AuditEventType, Clock, EngineError, RequestContext, Ticket, TicketStep, UserSnapshot};
use ticketflow_outbox::{NotificationOutbox, OutboxRepository};
use ticketflow_storage::{AuditRepository, DirectoryAdapter, SatelliteRepository, TicketRepository, WorkflowRepository};

use crate::error::from_store_error;
use crate::outcome::EngineOutcome;
use crate::{activation, approver, notify, selection, sub_workflow};

const MAX_RETRIES: u32 = 3;

pub struct TicketEngine {
    tickets: Arc<dyn TicketRepository>,
    workflows: Arc<dyn WorkflowRepository>,
    satellites: Arc<dyn SatelliteRepository>,
    audit: Arc<dyn AuditRepository>,
    outbox: Arc<dyn OutboxRepository>,
    directory: Arc<dyn DirectoryAdapter>,
    clock: Arc<dyn Clock>,
}

impl TicketEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tickets: Arc<dyn TicketRepository>,
        workflows: Arc<dyn WorkflowRepository>,
        satellites: Arc<dyn SatelliteRepository>,
        audit: Arc<dyn AuditRepository>,
        outbox: Arc<dyn OutboxRepository>,
        directory: Arc<dyn DirectoryAdapter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tickets,
            workflows,
            satellites,
            audit,
            outbox,
            directory,
            clock,
        }
    }

    async fn retry<F, Fut>(&self, f: F) -> Result<EngineOutcome, EngineError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<EngineOutcome, EngineError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match f().await {
                Err(EngineError::Concurrency { .. }) if attempt < MAX_RETRIES => continue,
                other => return other,
            }
        }
    }

    // ---- public operations (spec.md 6.1) ----

    #[instrument(skip(self, initial_form_values), fields(workflow_id = %workflow_id))]
    #[allow(clippy::too_many_arguments)]
    pub async fn create_ticket(
        &self,
        ctx: &RequestContext,
        workflow_id: &str,
        title: &str,
        description: &str,
        initial_form_values: FormValues,
    ) -> Result<EngineOutcome, EngineError> {
        self.retry(|| self.do_create_ticket(ctx, workflow_id, title, description, &initial_form_values)).await
    }

    #[instrument(skip(self, form_values), fields(ticket_id = %ticket_id, ticket_step_id = %ticket_step_id))]
    pub async fn submit_form(
        &self,
        ctx: &RequestContext,
        ticket_id: &str,
        ticket_step_id: &str,
        form_values: FormValues,
    ) -> Result<EngineOutcome, EngineError> {
        self.retry(|| self.do_submit_form(ctx, ticket_id, ticket_step_id, &form_values)).await
    }

    #[instrument(skip(self), fields(ticket_id = %ticket_id, ticket_step_id = %ticket_step_id))]
    pub async fn approve(
        &self,
        ctx: &RequestContext,
        ticket_id: &str,
        ticket_step_id: &str,
        comment: Option<String>,
    ) -> Result<EngineOutcome, EngineError> {
        self.retry(|| self.do_approve(ctx, ticket_id, ticket_step_id, comment.clone())).await
    }

    #[instrument(skip(self), fields(ticket_id = %ticket_id, ticket_step_id = %ticket_step_id))]
    pub async fn reject(
        &self,
        ctx: &RequestContext,
        ticket_id: &str,
        ticket_step_id: &str,
        comment: Option<String>,
    ) -> Result<EngineOutcome, EngineError> {
        self.retry(|| self.do_approval_decision(ctx, ticket_id, ticket_step_id, false, comment.clone())).await
    }

    /// Variant of reject that lands the step in `SKIPPED` rather than
    /// `REJECTED` -- terminal, but does not propagate fork failure and
    /// advances exactly as a normal completion would (spec.md 9, Open
    /// Question 1).
    #[instrument(skip(self), fields(ticket_id = %ticket_id, ticket_step_id = %ticket_step_id))]
    pub async fn skip(
        &self,
        ctx: &RequestContext,
        ticket_id: &str,
        ticket_step_id: &str,
        comment: Option<String>,
    ) -> Result<EngineOutcome, EngineError> {
        self.retry(|| self.do_skip(ctx, ticket_id, ticket_step_id, comment.clone())).await
    }

    #[instrument(skip(self, output_values), fields(ticket_id = %ticket_id, ticket_step_id = %ticket_step_id))]
    pub async fn complete_task(
        &self,
        ctx: &RequestContext,
        ticket_id: &str,
        ticket_step_id: &str,
        execution_notes: Option<String>,
        output_values: FormValues,
    ) -> Result<EngineOutcome, EngineError> {
        self.retry(|| self.do_complete_task(ctx, ticket_id, ticket_step_id, execution_notes.clone(), &output_values))
            .await
    }

    #[instrument(skip(self, question), fields(ticket_id = %ticket_id, ticket_step_id = %ticket_step_id))]
    pub async fn request_info(
        &self,
        ctx: &RequestContext,
        ticket_id: &str,
        ticket_step_id: &str,
        question: &str,
        requested_from_email: &str,
    ) -> Result<EngineOutcome, EngineError> {
        self.retry(|| self.do_request_info(ctx, ticket_id, ticket_step_id, question, requested_from_email)).await
    }

    #[instrument(skip(self, response_text), fields(ticket_id = %ticket_id, ticket_step_id = %ticket_step_id))]
    pub async fn respond_info(
        &self,
        ctx: &RequestContext,
        ticket_id: &str,
        ticket_step_id: &str,
        response_text: &str,
    ) -> Result<EngineOutcome, EngineError> {
        self.retry(|| self.do_respond_info(ctx, ticket_id, ticket_step_id, response_text)).await
    }

    #[instrument(skip(self), fields(ticket_id = %ticket_id, ticket_step_id = %ticket_step_id))]
    pub async fn assign_agent(
        &self,
        ctx: &RequestContext,
        ticket_id: &str,
        ticket_step_id: &str,
        agent: UserSnapshot,
    ) -> Result<EngineOutcome, EngineError> {
        self.retry(|| self.do_assign_agent(ctx, ticket_id, ticket_step_id, agent.clone(), None)).await
    }

    #[instrument(skip(self, reason), fields(ticket_id = %ticket_id, ticket_step_id = %ticket_step_id))]
    pub async fn reassign_agent(
        &self,
        ctx: &RequestContext,
        ticket_id: &str,
        ticket_step_id: &str,
        agent: UserSnapshot,
        reason: &str,
    ) -> Result<EngineOutcome, EngineError> {
        self.retry(|| self.do_assign_agent(ctx, ticket_id, ticket_step_id, agent.clone(), Some(reason))).await
    }

    #[instrument(skip(self, reason), fields(ticket_id = %ticket_id))]
    pub async fn cancel_ticket(&self, ctx: &RequestContext, ticket_id: &str, reason: &str) -> Result<EngineOutcome, EngineError> {
        self.retry(|| self.do_cancel_ticket(ctx, ticket_id, reason)).await
    }

    // ---- implementation ----

    async fn do_create_ticket(
        &self,
        ctx: &RequestContext,
        workflow_id: &str,
        title: &str,
        description: &str,
        initial_form_values: &FormValues,
    ) -> Result<EngineOutcome, EngineError> {
        let template = self
            .workflows
            .get_template(workflow_id)
            .await
            .map_err(from_store_error)?
            .ok_or_else(|| EngineError::not_found("workflow", workflow_id))?;
        let version_number = template
            .current_version
            .ok_or_else(|| EngineError::invalid_state(format!("workflow '{workflow_id}' has never been published")))?;
        let version = self
            .workflows
            .get_version(workflow_id, version_number)
            .await
            .map_err(from_store_error)?
            .ok_or_else(|| EngineError::not_found("workflow_version", format!("{workflow_id}@{version_number}")))?;
        let definition = version.definition;

        let now = self.clock.now();
        let requester = self
            .directory
            .get_user(&ctx.actor.email)
            .await
            .unwrap_or_else(|| UserSnapshot::resolved(ctx.actor.external_id.clone(), ctx.actor.email.clone(), ctx.actor.display_name.clone()));
        let manager_snapshot = self
            .directory
            .get_manager(&ctx.actor.email)
            .await
            .unwrap_or_else(|| UserSnapshot::unresolved(ctx.actor.email.clone()));

        let mut ticket = Ticket {
            ticket_id: ids::generate_ticket_id(),
            workflow_id: workflow_id.to_string(),
            workflow_version_number: version_number,
            title: title.to_string(),
            description: description.to_string(),
            status: TicketStatus::Open,
            requester,
            manager_snapshot,
            form_values: initial_form_values.clone(),
            created_at: now,
            updated_at: now,
            version: 1,
        };

        let mut tx = EventTx::new(&self.clock, ctx, ticket.ticket_id.clone());
        tx.audit(&mut ticket, AuditEventType::TicketCreated, serde_json::json!({"workflow_id": workflow_id, "title": title}));
        tx.notify(&ticket, "TICKET_CREATED", vec![ticket.requester.email.clone()], serde_json::json!({"title": title}));

        let Some(start_step_id) = definition.effective_start_step_id() else {
            return Err(EngineError::engine(format!("workflow '{workflow_id}' has no steps")));
        };

        let mut queue = VecDeque::new();
        queue.push_back(ActivationRequest::root(start_step_id.to_string()));
        let mut known_steps = Vec::new();
        self.drain_activations(&definition, &mut ticket, &mut known_steps, queue, &mut tx).await?;

        self.finalize_ticket(&mut ticket, &known_steps, &mut tx);

        self.tickets.insert_ticket(ticket.clone()).await.map_err(from_store_error)?;
        self.tickets.insert_steps(known_steps.clone()).await.map_err(from_store_error)?;
        self.commit(tx, Some(ticket), known_steps).await
    }

    async fn do_submit_form(
        &self,
        ctx: &RequestContext,
        ticket_id: &str,
        ticket_step_id: &str,
        form_values: &FormValues,
    ) -> Result<EngineOutcome, EngineError> {
        let mut ticket = self.load_open_ticket_only(ticket_id).await?;
        let step = self.load_step(ticket_id, ticket_step_id).await?;
        let definition = self.definition_for_step(&ticket, &step).await?;
        self.require_state(&step, StepState::Active)?;
        self.require_no_open_info_request(ticket_step_id).await?;

        let StepDef::FormStep(form_def) = definition.step(&step.step_id).ok_or_else(step_missing(&step))? else {
            return Err(EngineError::invalid_state("step is not a FORM_STEP"));
        };
        if ctx.actor.email != ticket.requester.email {
            return Err(EngineError::authorization(&ctx.actor.email, "SUBMIT_FORM", &step.ticket_step_id));
        }
        validate_form_submission(form_def, form_values)?;

        ticket.merge_form_values(form_values.clone());
        ticket.updated_at = self.clock.now();

        let mut tx = EventTx::new(&self.clock, ctx, ticket_id.to_string());
        let mut known_steps = self.tickets.list_steps_for_ticket(ticket_id).await.map_err(from_store_error)?;

        let completed = self.complete_step(&step, &mut known_steps, &mut tx).await?;
        tx.audit(&mut ticket, AuditEventType::FormSubmitted, serde_json::json!({"ticket_step_id": ticket_step_id}));

        let mut queue = VecDeque::new();
        self.advance_past(&definition, &completed, TransitionEvent::SubmitForm, &ticket.form_values, &mut queue, &mut tx, &mut ticket, &mut known_steps)
            .await?;
        self.drain_activations(&definition, &mut ticket, &mut known_steps, queue, &mut tx).await?;
        if let Some(parent) = &completed.parent_sub_workflow_step_id {
            self.check_sub_workflow_completion(parent, &mut ticket, &mut known_steps, &mut tx).await?;
        }

        self.finalize_ticket(&mut ticket, &known_steps, &mut tx);
        self.tickets.update_ticket(ticket_id, ticket.version, Box::new({
            let ticket = ticket.clone();
            move |_| ticket
        })).await.map_err(from_store_error)?;
        self.commit(tx, Some(ticket), known_steps).await
    }

    async fn do_approve(
        &self,
        ctx: &RequestContext,
        ticket_id: &str,
        ticket_step_id: &str,
        comment: Option<String>,
    ) -> Result<EngineOutcome, EngineError> {
        self.do_approval_decision(ctx, ticket_id, ticket_step_id, true, comment).await
    }

    async fn do_approval_decision(
        &self,
        ctx: &RequestContext,
        ticket_id: &str,
        ticket_step_id: &str,
        approved: bool,
        comment: Option<String>,
    ) -> Result<EngineOutcome, EngineError> {
        let mut ticket = self.load_open_ticket_only(ticket_id).await?;
        let mut step = self.load_step(ticket_id, ticket_step_id).await?;
        let definition = self.definition_for_step(&ticket, &step).await?;
        self.require_state(&step, StepState::WaitingForApproval)?;
        self.require_no_open_info_request(ticket_step_id).await?;

        let StepRuntimeData::ApprovalStep { resolved_approvers, .. } = &step.data else {
            return Err(EngineError::invalid_state("step is not an APPROVAL_STEP"));
        };
        if !resolved_approvers.iter().any(|a| a.email == ctx.actor.email) {
            return Err(EngineError::authorization(&ctx.actor.email, if approved { "APPROVE" } else { "REJECT" }, ticket_step_id));
        }

        let now = self.clock.now();
        let mut tx = EventTx::new(&self.clock, ctx, ticket_id.to_string());
        let mut known_steps = self.tickets.list_steps_for_ticket(ticket_id).await.map_err(from_store_error)?;

        let tasks = self.satellites.list_approval_tasks(ticket_step_id).await.map_err(from_store_error)?;
        let is_parallel = !tasks.is_empty();

        if is_parallel {
            if let Some(task) = tasks.iter().find(|t| t.approver.email == ctx.actor.email) {
                if task.is_decided() {
                    // Subsequent votes after the decisive one are recorded but ignored.
                    tx.audit(&mut ticket, AuditEventType::StepApproved, serde_json::json!({
                        "ticket_step_id": ticket_step_id, "approver": ctx.actor.email, "late_vote": true, "approved": approved
                    }));
                    return self.finish_no_op(ctx, ticket, known_steps, tx).await;
                }
                let decision = if approved {
                    ticketflow_core::ApprovalDecisionValue::Approved
                } else {
                    ticketflow_core::ApprovalDecisionValue::Rejected
                };
                self.satellites
                    .update_approval_task(&task.approval_task_id, task.version, Box::new(move |mut t| {
                        t.decision = Some(decision);
                        t.comment = comment.clone();
                        t.decided_at = Some(now);
                        t
                    }))
                    .await
                    .map_err(from_store_error)?;
            }
        }

        let StepRuntimeData::ApprovalStep { decisions, .. } = &mut step.data else {
            unreachable!("checked above");
        };
        decisions.push(ticketflow_core::ApprovalDecision {
            approver_email: ctx.actor.email.clone(),
            approved,
            decided_at: now,
            comment: comment.clone(),
        });

        let StepDef::ApprovalStep(step_def) = definition.step(&step.step_id).ok_or_else(step_missing(&step))? else {
            return Err(EngineError::invalid_state("step is not an APPROVAL_STEP"));
        };

        let decided = if is_parallel {
            let refreshed_tasks = self.satellites.list_approval_tasks(ticket_step_id).await.map_err(from_store_error)?;
            match step_def.parallel_approval {
                Some(ticketflow_core::definition::ParallelApprovalMode::All) => {
                    if refreshed_tasks.iter().any(|t| t.decision == Some(ticketflow_core::ApprovalDecisionValue::Rejected)) {
                        Some(false)
                    } else if refreshed_tasks.iter().all(|t| t.is_decided()) {
                        Some(true)
                    } else {
                        None
                    }
                }
                Some(ticketflow_core::definition::ParallelApprovalMode::Any) => {
                    if approved {
                        Some(true)
                    } else if refreshed_tasks.iter().all(|t| t.is_decided()) {
                        Some(false)
                    } else {
                        None
                    }
                }
                None => Some(approved),
            }
        } else {
            Some(approved)
        };

        let step = self
            .tickets
            .update_step(ticket_step_id, step.version, Box::new({
                let step = step.clone();
                move |_| step
            }))
            .await
            .map_err(from_store_error)?;
        replace_known_step(&mut known_steps, step.clone());

        tx.audit(&mut ticket, if approved { AuditEventType::StepApproved } else { AuditEventType::StepRejected }, serde_json::json!({
            "ticket_step_id": ticket_step_id, "approver": ctx.actor.email, "comment": comment
        }));

        let Some(final_outcome) = decided else {
            // Waiting on more parallel votes.
            return self.finish_no_op(ctx, ticket, known_steps, tx).await;
        };

        if final_outcome {
            let completed = self.complete_step(&step, &mut known_steps, &mut tx).await?;
            tx.notify(&ticket, "APPROVED", vec![ticket.requester.email.clone()], serde_json::json!({"ticket_step_id": ticket_step_id}));
            let mut queue = VecDeque::new();
            self.advance_past(&definition, &completed, TransitionEvent::Approve, &ticket.form_values, &mut queue, &mut tx, &mut ticket, &mut known_steps)
                .await?;
            self.drain_activations(&definition, &mut ticket, &mut known_steps, queue, &mut tx).await?;
            if let Some(parent) = &completed.parent_sub_workflow_step_id {
                self.check_sub_workflow_completion(parent, &mut ticket, &mut known_steps, &mut tx).await?;
            }
        } else {
            let rejected = self.mark_step(&step, StepState::Rejected, &mut known_steps, &mut tx).await?;
            tx.notify(&ticket, "REJECTED", vec![ticket.requester.email.clone()], serde_json::json!({"ticket_step_id": ticket_step_id, "comment": comment}));
            self.reject_step_in_context(&ctx.clone(), &definition, &rejected, &mut ticket, &mut known_steps, &mut tx).await?;
            if let Some(parent) = &rejected.parent_sub_workflow_step_id {
                self.check_sub_workflow_completion(parent, &mut ticket, &mut known_steps, &mut tx).await?;
            }
        }

        self.finalize_ticket(&mut ticket, &known_steps, &mut tx);
        self.tickets.update_ticket(ticket_id, ticket.version, Box::new({
            let ticket = ticket.clone();
            move |_| ticket
        })).await.map_err(from_store_error)?;
        self.commit(tx, Some(ticket), known_steps).await
    }

    async fn do_skip(
        &self,
        ctx: &RequestContext,
        ticket_id: &str,
        ticket_step_id: &str,
        comment: Option<String>,
    ) -> Result<EngineOutcome, EngineError> {
        let mut ticket = self.load_open_ticket_only(ticket_id).await?;
        let step = self.load_step(ticket_id, ticket_step_id).await?;
        let definition = self.definition_for_step(&ticket, &step).await?;
        if step.state.is_terminal() {
            return Err(EngineError::invalid_state(format!("step '{ticket_step_id}' is already terminal")));
        }
        self.require_no_open_info_request(ticket_step_id).await?;

        let step_def = definition.step(&step.step_id).ok_or_else(step_missing(&step))?;
        let event = step_def.step_type().legal_source_events().first().copied();

        let mut tx = EventTx::new(&self.clock, ctx, ticket_id.to_string());
        let mut known_steps = self.tickets.list_steps_for_ticket(ticket_id).await.map_err(from_store_error)?;

        let skipped = self.mark_step(&step, StepState::Skipped, &mut known_steps, &mut tx).await?;
        tx.audit(&mut ticket, AuditEventType::StepSkipped, serde_json::json!({"ticket_step_id": ticket_step_id, "comment": comment}));

        if let Some(event) = event {
            let mut queue = VecDeque::new();
            self.advance_past(&definition, &skipped, event, &ticket.form_values, &mut queue, &mut tx, &mut ticket, &mut known_steps)
                .await?;
            self.drain_activations(&definition, &mut ticket, &mut known_steps, queue, &mut tx).await?;
        }
        if let Some(parent) = &skipped.parent_sub_workflow_step_id {
            self.check_sub_workflow_completion(parent, &mut ticket, &mut known_steps, &mut tx).await?;
        }

        self.finalize_ticket(&mut ticket, &known_steps, &mut tx);
        self.tickets.update_ticket(ticket_id, ticket.version, Box::new({
            let ticket = ticket.clone();
            move |_| ticket
        })).await.map_err(from_store_error)?;
        self.commit(tx, Some(ticket), known_steps).await
    }

    async fn do_complete_task(
        &self,
        ctx: &RequestContext,
        ticket_id: &str,
        ticket_step_id: &str,
        execution_notes: Option<String>,
        output_values: &FormValues,
    ) -> Result<EngineOutcome, EngineError> {
        let mut ticket = self.load_open_ticket_only(ticket_id).await?;
        let mut step = self.load_step(ticket_id, ticket_step_id).await?;
        let definition = self.definition_for_step(&ticket, &step).await?;
        self.require_state(&step, StepState::Active)?;
        self.require_no_open_info_request(ticket_step_id).await?;

        let assigned_to = step.assigned_to.clone().ok_or_else(|| EngineError::invalid_state("task step has no assignee"))?;
        if assigned_to.email != ctx.actor.email {
            return Err(EngineError::authorization(&ctx.actor.email, "COMPLETE_TASK", ticket_step_id));
        }

        let StepDef::TaskStep(task_def) = definition.step(&step.step_id).ok_or_else(step_missing(&step))? else {
            return Err(EngineError::invalid_state("step is not a TASK_STEP"));
        };
        if task_def.execution_notes_required && execution_notes.as_deref().unwrap_or("").is_empty() {
            return Err(EngineError::Validation {
                errors: vec![ticketflow_core::DefinitionError::new("EXECUTION_NOTES_REQUIRED", "execution notes are required to complete this task")],
            });
        }

        let StepRuntimeData::TaskStep { execution_notes: notes, .. } = &mut step.data else {
            return Err(EngineError::invalid_state("step is not a TASK_STEP"));
        };
        *notes = execution_notes.clone();

        let scoped: HashMap<String, Value> = output_values
            .iter()
            .map(|(k, v)| (format!("{}.{}", step.step_id, k), v.clone()))
            .collect();
        ticket.merge_form_values(scoped);
        ticket.updated_at = self.clock.now();

        let mut tx = EventTx::new(&self.clock, ctx, ticket_id.to_string());
        let mut known_steps = self.tickets.list_steps_for_ticket(ticket_id).await.map_err(from_store_error)?;

        self.tickets
            .update_step(ticket_step_id, step.version, Box::new({
                let step = step.clone();
                move |_| step
            }))
            .await
            .map_err(from_store_error)?;
        let step = self.load_step(ticket_id, ticket_step_id).await?;
        replace_known_step(&mut known_steps, step.clone());

        let completed = self.complete_step(&step, &mut known_steps, &mut tx).await?;
        tx.audit(&mut ticket, AuditEventType::TaskCompleted, serde_json::json!({"ticket_step_id": ticket_step_id, "execution_notes": execution_notes}));
        tx.notify(&ticket, "TASK_COMPLETED", vec![ticket.requester.email.clone()], serde_json::json!({"ticket_step_id": ticket_step_id}));

        let mut queue = VecDeque::new();
        self.advance_past(&definition, &completed, TransitionEvent::CompleteTask, &ticket.form_values, &mut queue, &mut tx, &mut ticket, &mut known_steps)
            .await?;
        self.drain_activations(&definition, &mut ticket, &mut known_steps, queue, &mut tx).await?;
        if let Some(parent) = &completed.parent_sub_workflow_step_id {
            self.check_sub_workflow_completion(parent, &mut ticket, &mut known_steps, &mut tx).await?;
        }

        self.finalize_ticket(&mut ticket, &known_steps, &mut tx);
        self.tickets.update_ticket(ticket_id, ticket.version, Box::new({
            let ticket = ticket.clone();
            move |_| ticket
        })).await.map_err(from_store_error)?;
        self.commit(tx, Some(ticket), known_steps).await
    }

    async fn do_request_info(
        &self,
        ctx: &RequestContext,
        ticket_id: &str,
        ticket_step_id: &str,
        question: &str,
        requested_from_email: &str,
    ) -> Result<EngineOutcome, EngineError> {
        let (mut ticket, _definition) = self.load_open_ticket(ticket_id).await?;
        let step = self.load_step(ticket_id, ticket_step_id).await?;
        if step.state.is_terminal() {
            return Err(EngineError::invalid_state(format!("step '{ticket_step_id}' is already terminal")));
        }
        self.require_no_open_info_request(ticket_step_id).await?;

        let now = self.clock.now();
        let requested_by = self
            .directory
            .get_user(&ctx.actor.email)
            .await
            .unwrap_or_else(|| UserSnapshot::unresolved(ctx.actor.email.clone()));

        let request = ticketflow_core::InfoRequest {
            info_request_id: ids::generate_info_request_id(),
            ticket_step_id: ticket_step_id.to_string(),
            requested_by,
            question: question.to_string(),
            status: ticketflow_core::definition::InfoRequestStatus::Open,
            response: None,
            created_at: now,
            responded_at: None,
            version: 1,
        };
        self.satellites.insert_info_request(request).await.map_err(from_store_error)?;

        let mut tx = EventTx::new(&self.clock, ctx, ticket_id.to_string());
        let mut known_steps = self.tickets.list_steps_for_ticket(ticket_id).await.map_err(from_store_error)?;
        self.mark_step(&step, StepState::OnHold, &mut known_steps, &mut tx).await?;
        tx.audit(&mut ticket, AuditEventType::InfoRequested, serde_json::json!({
            "ticket_step_id": ticket_step_id, "question": question, "requested_from": requested_from_email
        }));
        tx.notify(&ticket, "INFO_REQUESTED", vec![requested_from_email.to_string()], serde_json::json!({
            "ticket_step_id": ticket_step_id, "question": question
        }));

        self.commit(tx, Some(ticket), known_steps).await
    }

    async fn do_respond_info(
        &self,
        ctx: &RequestContext,
        ticket_id: &str,
        ticket_step_id: &str,
        response_text: &str,
    ) -> Result<EngineOutcome, EngineError> {
        let (mut ticket, _definition) = self.load_open_ticket(ticket_id).await?;
        let step = self.load_step(ticket_id, ticket_step_id).await?;
        self.require_state(&step, StepState::OnHold)?;

        let requests = self.satellites.list_info_requests(ticket_step_id).await.map_err(from_store_error)?;
        let open = requests
            .into_iter()
            .find(|r| r.blocks_progress())
            .ok_or_else(|| EngineError::invalid_state(format!("no open info request on step '{ticket_step_id}'")))?;

        if ctx.actor.email != ticket.requester.email && ctx.actor.email != open.requested_by.email {
            return Err(EngineError::authorization(&ctx.actor.email, "RESPOND_INFO", ticket_step_id));
        }

        let now = self.clock.now();
        let response = response_text.to_string();
        self.satellites
            .update_info_request(&open.info_request_id, open.version, Box::new(move |mut r| {
                r.status = ticketflow_core::definition::InfoRequestStatus::Responded;
                r.response = Some(response);
                r.responded_at = Some(now);
                r
            }))
            .await
            .map_err(from_store_error)?;

        let mut tx = EventTx::new(&self.clock, ctx, ticket_id.to_string());
        let mut known_steps = self.tickets.list_steps_for_ticket(ticket_id).await.map_err(from_store_error)?;

        let prior_state = prior_non_hold_state(&step.step_type);
        self.mark_step(&step, prior_state, &mut known_steps, &mut tx).await?;
        tx.audit(&mut ticket, AuditEventType::InfoResponded, serde_json::json!({"ticket_step_id": ticket_step_id, "response": response_text}));

        self.commit(tx, Some(ticket), known_steps).await
    }

    async fn do_assign_agent(
        &self,
        ctx: &RequestContext,
        ticket_id: &str,
        ticket_step_id: &str,
        agent: UserSnapshot,
        reassign_reason: Option<&str>,
    ) -> Result<EngineOutcome, EngineError> {
        let (mut ticket, _definition) = self.load_open_ticket(ticket_id).await?;
        let mut step = self.load_step(ticket_id, ticket_step_id).await?;

        let is_reassign = reassign_reason.is_some();
        if is_reassign {
            if step.step_type != StepType::TaskStep || step.state != StepState::Active {
                return Err(EngineError::invalid_state("can only reassign an active task step"));
            }
        } else {
            self.require_state(&step, StepState::WaitingAssignment)?;
        }

        let now = self.clock.now();
        let assigned_by = self
            .directory
            .get_user(&ctx.actor.email)
            .await
            .unwrap_or_else(|| UserSnapshot::unresolved(ctx.actor.email.clone()));

        self.satellites
            .insert_assignment(ticketflow_core::Assignment {
                assignment_id: ids::generate_assignment_id(),
                ticket_step_id: ticket_step_id.to_string(),
                assigned_to: agent.clone(),
                assigned_by,
                created_at: now,
                version: 1,
            })
            .await
            .map_err(from_store_error)?;

        step.assigned_to = Some(agent.clone());
        let new_state = if is_reassign { step.state } else { StepState::Active };

        let mut tx = EventTx::new(&self.clock, ctx, ticket_id.to_string());
        let mut known_steps = self.tickets.list_steps_for_ticket(ticket_id).await.map_err(from_store_error)?;

        let updated = self
            .tickets
            .update_step(ticket_step_id, step.version, Box::new({
                let mut step = step.clone();
                move |_| {
                    step.state = new_state;
                    step
                }
            }))
            .await
            .map_err(from_store_error)?;
        replace_known_step(&mut known_steps, updated);

        let (event_type, template) = if is_reassign {
            (AuditEventType::AgentReassigned, "TASK_ASSIGNED")
        } else {
            (AuditEventType::AgentAssigned, "TASK_ASSIGNED")
        };
        tx.audit(&mut ticket, event_type, serde_json::json!({
            "ticket_step_id": ticket_step_id, "agent": agent.email, "reason": reassign_reason
        }));
        tx.notify(&ticket, template, vec![agent.email.clone()], serde_json::json!({"ticket_step_id": ticket_step_id}));

        self.commit(tx, Some(ticket), known_steps).await
    }

    async fn do_cancel_ticket(&self, ctx: &RequestContext, ticket_id: &str, reason: &str) -> Result<EngineOutcome, EngineError> {
        let ticket = self.tickets.get_ticket(ticket_id).await.map_err(from_store_error)?.ok_or_else(|| EngineError::not_found("ticket", ticket_id))?;
        if ticket.is_terminal() {
            return Err(EngineError::invalid_state(format!("ticket '{ticket_id}' is already terminal")));
        }
        if ctx.actor.email != ticket.requester.email && !ctx.actor.has_role("admin") {
            return Err(EngineError::authorization(&ctx.actor.email, "CANCEL", ticket_id));
        }

        let mut ticket = ticket;
        let mut tx = EventTx::new(&self.clock, ctx, ticket_id.to_string());
        let mut known_steps = self.tickets.list_steps_for_ticket(ticket_id).await.map_err(from_store_error)?;

        for s in known_steps.clone().iter().filter(|s| s.is_active_thread()) {
            self.mark_step(s, StepState::Cancelled, &mut known_steps, &mut tx).await?;
        }

        ticket.status = TicketStatus::Cancelled;
        ticket.updated_at = self.clock.now();
        tx.audit(&mut ticket, AuditEventType::TicketCancelled, serde_json::json!({"reason": reason}));
        tx.notify(&ticket, "TICKET_CANCELLED", vec![ticket.requester.email.clone()], serde_json::json!({"reason": reason}));

        self.tickets.update_ticket(ticket_id, ticket.version, Box::new({
            let ticket = ticket.clone();
            move |_| ticket
        })).await.map_err(from_store_error)?;
        self.commit(tx, Some(ticket), known_steps).await
    }

    // ---- shared internals ----

    async fn load_open_ticket(&self, ticket_id: &str) -> Result<(Ticket, WorkflowDefinition), EngineError> {
        let ticket = self.load_open_ticket_only(ticket_id).await?;
        let definition = self.main_definition(&ticket).await?;
        Ok((ticket, definition))
    }

    async fn load_open_ticket_only(&self, ticket_id: &str) -> Result<Ticket, EngineError> {
        let ticket = self.tickets.get_ticket(ticket_id).await.map_err(from_store_error)?.ok_or_else(|| EngineError::not_found("ticket", ticket_id))?;
        if !ticket.is_open() {
            return Err(EngineError::invalid_state(format!("ticket '{ticket_id}' is not OPEN")));
        }
        Ok(ticket)
    }

    /// The ticket's own top-level published workflow definition.
    async fn main_definition(&self, ticket: &Ticket) -> Result<WorkflowDefinition, EngineError> {
        let version = self
            .workflows
            .get_version(&ticket.workflow_id, ticket.workflow_version_number)
            .await
            .map_err(from_store_error)?
            .ok_or_else(|| EngineError::not_found("workflow_version", format!("{}@{}", ticket.workflow_id, ticket.workflow_version_number)))?;
        Ok(version.definition)
    }

    /// The definition a given step's `step_id` resolves against: the
    /// embedded sub-workflow's definition if `step` was materialized by
    /// `expand_sub_workflow` (spec.md 4.3), otherwise the ticket's own
    /// top-level definition.
    async fn definition_for_step(&self, ticket: &Ticket, step: &TicketStep) -> Result<WorkflowDefinition, EngineError> {
        match (&step.from_sub_workflow_id, step.from_sub_workflow_version) {
            (Some(wf_id), Some(wf_version)) => {
                let version = self
                    .workflows
                    .get_version(wf_id, wf_version)
                    .await
                    .map_err(from_store_error)?
                    .ok_or_else(|| EngineError::not_found("workflow_version", format!("{wf_id}@{wf_version}")))?;
                Ok(version.definition)
            }
            _ => self.main_definition(ticket).await,
        }
    }

    /// Checks whether the sub-instance rooted at `parent_sub_workflow_step_id`
    /// has reached a terminal outcome (spec.md 4.3 "On each engine event
    /// inside a sub-instance, check completion") and, if so, completes the
    /// parent `SUB_WORKFLOW_STEP` and advances the outer ticket past it.
    /// A no-op if the parent step is already terminal (idempotent against
    /// being invoked once per completed sub-step).
    async fn check_sub_workflow_completion(
        &self,
        parent_sub_workflow_step_id: &str,
        ticket: &mut Ticket,
        known_steps: &mut Vec<TicketStep>,
        tx: &mut EventTx,
    ) -> Result<(), EngineError> {
        let Some(parent_step) = known_steps.iter().find(|s| s.ticket_step_id == parent_sub_workflow_step_id).cloned() else {
            return Ok(());
        };
        if parent_step.state.is_terminal() {
            return Ok(());
        }

        let sub_steps: Vec<TicketStep> = known_steps
            .iter()
            .filter(|s| s.parent_sub_workflow_step_id.as_deref() == Some(parent_sub_workflow_step_id))
            .cloned()
            .collect();
        let Some(outcome) = sub_workflow::is_sub_workflow_complete(&sub_steps) else {
            return Ok(());
        };

        let (final_state, outcome_completed) = match outcome {
            sub_workflow::SubWorkflowOutcome::Completed => (StepState::Completed, true),
            sub_workflow::SubWorkflowOutcome::Rejected => (StepState::Rejected, false),
            sub_workflow::SubWorkflowOutcome::Cancelled => (StepState::Cancelled, false),
        };

        let parent_step = self.mark_step(&parent_step, final_state, known_steps, tx).await?;
        tx.audit(ticket, AuditEventType::SubWorkflowCompleted, serde_json::json!({
            "ticket_step_id": parent_sub_workflow_step_id, "outcome": format!("{final_state:?}")
        }));

        let parent_definition = self.main_definition(ticket).await?;
        if outcome_completed {
            let mut queue = VecDeque::new();
            self.advance_past(&parent_definition, &parent_step, TransitionEvent::CompleteTask, &ticket.form_values, &mut queue, tx, ticket, known_steps)
                .await?;
            self.drain_activations(&parent_definition, ticket, known_steps, queue, tx).await?;
            if let Some(grandparent) = &parent_step.parent_sub_workflow_step_id {
                Box::pin(self.check_sub_workflow_completion(grandparent, ticket, known_steps, tx)).await?;
            }
        } else if final_state == StepState::Rejected {
            let system_ctx = RequestContext::generate(ticketflow_core::Actor::system());
            self.reject_step_in_context(&system_ctx, &parent_definition, &parent_step, ticket, known_steps, tx).await?;
        }
        Ok(())
    }

    async fn load_step(&self, ticket_id: &str, ticket_step_id: &str) -> Result<TicketStep, EngineError> {
        let step = self.tickets.get_step(ticket_step_id).await.map_err(from_store_error)?.ok_or_else(|| EngineError::not_found("ticket_step", ticket_step_id))?;
        if step.ticket_id != ticket_id {
            return Err(EngineError::not_found("ticket_step", ticket_step_id));
        }
        Ok(step)
    }

    fn require_state(&self, step: &TicketStep, expected: StepState) -> Result<(), EngineError> {
        if step.state != expected {
            return Err(EngineError::invalid_state(format!(
                "step '{}' is {:?}, event requires {:?}",
                step.ticket_step_id, step.state, expected
            )));
        }
        Ok(())
    }

    async fn require_no_open_info_request(&self, ticket_step_id: &str) -> Result<(), EngineError> {
        if self.satellites.open_info_request_for_step(ticket_step_id).await.map_err(from_store_error)?.is_some() {
            return Err(EngineError::invalid_state(format!("step '{ticket_step_id}' has an open info request")));
        }
        Ok(())
    }

    /// Mark `step` COMPLETED and record it.
    async fn complete_step(&self, step: &TicketStep, known_steps: &mut Vec<TicketStep>, tx: &mut EventTx) -> Result<TicketStep, EngineError> {
        self.mark_step(step, StepState::Completed, known_steps, tx).await
    }

    async fn mark_step(
        &self,
        step: &TicketStep,
        state: StepState,
        known_steps: &mut Vec<TicketStep>,
        tx: &mut EventTx,
    ) -> Result<TicketStep, EngineError> {
        let now = self.clock.now();
        let updated = self
            .tickets
            .update_step(&step.ticket_step_id, step.version, Box::new({
                let mut step = step.clone();
                move |_| {
                    step.state = state;
                    step.updated_at = now;
                    step
                }
            }))
            .await
            .map_err(from_store_error)?;
        replace_known_step(known_steps, updated.clone());
        tx.touch_step(updated.clone());
        Ok(updated)
    }

    /// After a step reaches a terminal state, select its successor and
    /// either push it onto the activation queue, or, if the successor is
    /// a `JOIN_STEP`, handle the arrival immediately (spec.md 4.2
    /// "Successor selection" / "Activation of a successor step", JOIN_STEP).
    #[allow(clippy::too_many_arguments)]
    async fn advance_past(
        &self,
        definition: &WorkflowDefinition,
        step: &TicketStep,
        event: TransitionEvent,
        form_values: &FormValues,
        queue: &mut VecDeque<ActivationRequest>,
        tx: &mut EventTx,
        ticket: &mut Ticket,
        known_steps: &mut Vec<TicketStep>,
    ) -> Result<(), EngineError> {
        let step_def = definition.step(&step.step_id).ok_or_else(step_missing(step))?;
        let transition = selection::select_successor(definition, &step.step_id, step.step_type, event, form_values, step_def.is_terminal())?;
        let Some(transition) = transition else {
            return Ok(());
        };

        let target_def = definition
            .step(&transition.to_step_id)
            .ok_or_else(|| EngineError::engine(format!("transition targets unknown step '{}'", transition.to_step_id)))?;

        if matches!(target_def, StepDef::JoinStep(_)) {
            let outcome_completed = matches!(step.state, StepState::Completed | StepState::Skipped);
            self.handle_join_arrival(definition, &transition.to_step_id, step.branch_id.clone(), outcome_completed, ticket, known_steps, queue, tx)
                .await?;
            return Ok(());
        }

        queue.push_back(ActivationRequest {
            step_id: transition.to_step_id.clone(),
            branch_id: step.branch_id.clone(),
            branch_name: step.branch_name.clone(),
            parent_fork_step_id: step.parent_fork_step_id.clone(),
            parent_sub_workflow_step_id: step.parent_sub_workflow_step_id.clone(),
        });
        Ok(())
    }

    /// Drains the activation queue, materializing and activating each
    /// requested step (spec.md 4.2 "Activation of a successor step").
    async fn drain_activations(
        &self,
        definition: &WorkflowDefinition,
        ticket: &mut Ticket,
        known_steps: &mut Vec<TicketStep>,
        mut queue: VecDeque<ActivationRequest>,
        tx: &mut EventTx,
    ) -> Result<(), EngineError> {
        while let Some(request) = queue.pop_front() {
            let step_def = definition
                .step(&request.step_id)
                .ok_or_else(|| EngineError::engine(format!("unknown step '{}'", request.step_id)))?
                .clone();

            let now = self.clock.now();

            // A sub-workflow's steps are all materialized up front, `NOT_STARTED`
            // (spec.md 4.3 step 3); activating one of them reuses that row
            // rather than inserting a duplicate.
            let reused = known_steps
                .iter()
                .find(|s| {
                    s.step_id == request.step_id
                        && s.parent_sub_workflow_step_id == request.parent_sub_workflow_step_id
                        && s.state == StepState::NotStarted
                })
                .cloned();

            let mut ticket_step = if let Some(existing) = &reused {
                let mut s = existing.clone();
                s.state = activation::initial_state(&step_def);
                s.data = activation::initial_runtime_data(&step_def);
                s.due_at = activation::compute_due_at(&step_def, now);
                s.updated_at = now;
                s
            } else {
                TicketStep {
                    ticket_step_id: ids::generate_ticket_step_id(),
                    ticket_id: ticket.ticket_id.clone(),
                    step_id: step_def.step_id().to_string(),
                    step_name: step_def.common().step_name.clone(),
                    step_type: step_def.step_type(),
                    state: activation::initial_state(&step_def),
                    assigned_to: None,
                    data: activation::initial_runtime_data(&step_def),
                    due_at: activation::compute_due_at(&step_def, now),
                    last_reminder_at: None,
                    last_escalation_at: None,
                    branch_id: request.branch_id.clone(),
                    branch_name: request.branch_name.clone(),
                    parent_fork_step_id: request.parent_fork_step_id.clone(),
                    parent_sub_workflow_step_id: request.parent_sub_workflow_step_id.clone(),
                    from_sub_workflow_id: None,
                    from_sub_workflow_version: None,
                    sub_workflow_step_order: None,
                    created_at: now,
                    updated_at: now,
                    version: 1,
                }
            };

            match &step_def {
                StepDef::FormStep(_) => {
                    ticket_step.assigned_to = Some(ticket.requester.clone());
                    let ticket_step = self.persist_activated_step(reused.is_some(), ticket_step).await?;
                    replace_known_step(known_steps, ticket_step.clone());
                    tx.touch_step(ticket_step);
                }
                StepDef::ApprovalStep(approval_def) => {
                    let step_assignee = resolve_step_assignee(approval_def, known_steps);
                    let approvers = approver::resolve_approvers(approval_def, ticket, &ticket.form_values, self.directory.as_ref(), step_assignee.as_ref()).await?;

                    if !approval_def.parallel_approvers.is_empty() {
                        for a in &approvers {
                            self.satellites
                                .insert_approval_task(ticketflow_core::ApprovalTask {
                                    approval_task_id: ids::generate_approval_task_id(),
                                    ticket_step_id: ticket_step.ticket_step_id.clone(),
                                    approver: a.clone(),
                                    decision: None,
                                    comment: None,
                                    created_at: now,
                                    decided_at: None,
                                    version: 1,
                                })
                                .await
                                .map_err(from_store_error)?;
                        }
                    }

                    if let StepRuntimeData::ApprovalStep { resolved_approvers, .. } = &mut ticket_step.data {
                        *resolved_approvers = approvers.clone();
                    }
                    let ticket_step = self.persist_activated_step(reused.is_some(), ticket_step).await?;
                    replace_known_step(known_steps, ticket_step.clone());
                    tx.touch_step(ticket_step.clone());
                    tx.notify(
                        ticket,
                        "APPROVAL_PENDING",
                        approvers.iter().map(|a| a.email.clone()).collect(),
                        serde_json::json!({"ticket_step_id": ticket_step.ticket_step_id}),
                    );
                }
                StepDef::TaskStep(_) => {
                    let ticket_step = self.persist_activated_step(reused.is_some(), ticket_step).await?;
                    replace_known_step(known_steps, ticket_step.clone());
                    tx.touch_step(ticket_step);
                }
                StepDef::NotifyStep(notify_def) => {
                    let (approvers, assigned_agent) = last_branch_context(known_steps, ticket_step.branch_id.as_deref());
                    let recipients = notify::resolve_recipients(&notify_def.recipients, ticket, &approvers, assigned_agent.as_ref(), self.directory.as_ref()).await;
                    tx.notify(ticket, &notify_def.notification_template, recipients, serde_json::json!({"ticket_step_id": ticket_step.ticket_step_id}));

                    if notify_def.auto_advance {
                        ticket_step.state = StepState::Completed;
                    }
                    let ticket_step = self.persist_activated_step(reused.is_some(), ticket_step).await?;
                    replace_known_step(known_steps, ticket_step.clone());
                    tx.touch_step(ticket_step.clone());

                    if notify_def.auto_advance {
                        Box::pin(self.advance_past(
                            definition,
                            &ticket_step,
                            TransitionEvent::ForkActivated,
                            &ticket.form_values,
                            &mut queue,
                            tx,
                            ticket,
                            known_steps,
                        ))
                        .await?;
                    }
                }
                StepDef::ForkStep(fork_def) => {
                    ticket_step.state = StepState::Completed;
                    let ticket_step = self.persist_activated_step(reused.is_some(), ticket_step).await?;
                    replace_known_step(known_steps, ticket_step.clone());
                    tx.touch_step(ticket_step);
                    tx.audit(ticket, AuditEventType::ForkActivated, serde_json::json!({"step_id": fork_def.common.step_id}));

                    for branch in &fork_def.branches {
                        queue.push_back(ActivationRequest {
                            step_id: branch.start_step_id.clone(),
                            branch_id: Some(branch.branch_id.clone()),
                            branch_name: Some(branch.branch_name.clone()),
                            parent_fork_step_id: Some(fork_def.common.step_id.clone()),
                            parent_sub_workflow_step_id: request.parent_sub_workflow_step_id.clone(),
                        });
                    }
                }
                StepDef::JoinStep(_) => {
                    // Reached only via `drain_activations` for a join with
                    // no prior arrival recorded yet (e.g. the start step of
                    // a branchless definition); arrivals normally go
                    // through `advance_past`'s `handle_join_arrival` path.
                    let ticket_step = self.persist_activated_step(reused.is_some(), ticket_step).await?;
                    replace_known_step(known_steps, ticket_step.clone());
                    tx.touch_step(ticket_step);
                }
                StepDef::SubWorkflowStep(sub_def) => {
                    let sub_version = self
                        .workflows
                        .get_version(&sub_def.sub_workflow_id, sub_def.sub_workflow_version)
                        .await
                        .map_err(from_store_error)?
                        .ok_or_else(|| EngineError::not_found("workflow_version", format!("{}@{}", sub_def.sub_workflow_id, sub_def.sub_workflow_version)))?;
                    if sub_version.definition.steps.iter().any(|s| matches!(s, StepDef::SubWorkflowStep(_))) {
                        return Err(EngineError::invalid_state("nested sub-workflows are not permitted"));
                    }

                    let ticket_step = self.persist_activated_step(reused.is_some(), ticket_step).await?;
                    replace_known_step(known_steps, ticket_step.clone());
                    tx.touch_step(ticket_step.clone());

                    let children = sub_workflow::expand_sub_workflow(
                        ticket,
                        &ticket_step,
                        &sub_version.definition,
                        &sub_def.sub_workflow_id,
                        sub_def.sub_workflow_version,
                        now,
                    );
                    self.tickets.insert_steps(children.clone()).await.map_err(from_store_error)?;
                    known_steps.extend(children);
                    tx.audit(ticket, AuditEventType::SubWorkflowExpanded, serde_json::json!({"ticket_step_id": ticket_step.ticket_step_id}));

                    if let Some(inner_start) = sub_version.definition.effective_start_step_id() {
                        let mut inner_queue = VecDeque::new();
                        inner_queue.push_back(ActivationRequest::root_in_sub_workflow(inner_start.to_string(), ticket_step.ticket_step_id.clone()));
                        // The sub-definition's steps live in a different
                        // namespace than the outer definition, so this
                        // recurses with its own definition rather than
                        // sharing the outer `queue`/`definition`.
                        Box::pin(self.drain_activations(&sub_version.definition, ticket, known_steps, inner_queue, tx)).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Finds (or lazily creates) the `JOIN_STEP` TicketStep for
    /// `join_step_id`, records this branch's arrival, and fires the join's
    /// own successor selection once satisfied (spec.md 4.2, JOIN_STEP).
    #[allow(clippy::too_many_arguments)]
    async fn handle_join_arrival(
        &self,
        definition: &WorkflowDefinition,
        join_step_id: &str,
        branch_id: Option<String>,
        completed: bool,
        ticket: &mut Ticket,
        known_steps: &mut Vec<TicketStep>,
        queue: &mut VecDeque<ActivationRequest>,
        tx: &mut EventTx,
    ) -> Result<(), EngineError> {
        let StepDef::JoinStep(join_def) = definition.step(join_step_id).ok_or_else(|| EngineError::engine(format!("unknown join step '{join_step_id}'")))? else {
            return Err(EngineError::engine(format!("'{join_step_id}' is not a JOIN_STEP")));
        };
        let fork_branch_count = definition.fork_step(&join_def.source_fork_step_id).map(|f| f.branches.len()).unwrap_or(0);

        let existing = known_steps.iter().find(|s| s.step_id == join_step_id && s.ticket_id == ticket.ticket_id).cloned();
        let now = self.clock.now();

        let mut join_step = match existing {
            Some(s) => s,
            None => {
                let step = TicketStep {
                    ticket_step_id: ids::generate_ticket_step_id(),
                    ticket_id: ticket.ticket_id.clone(),
                    step_id: join_step_id.to_string(),
                    step_name: join_def.common.step_name.clone(),
                    step_type: StepType::JoinStep,
                    state: StepState::Active,
                    assigned_to: None,
                    data: activation::initial_runtime_data(&StepDef::JoinStep(join_def.clone())),
                    due_at: None,
                    last_reminder_at: None,
                    last_escalation_at: None,
                    branch_id: None,
                    branch_name: None,
                    parent_fork_step_id: Some(join_def.source_fork_step_id.clone()),
                    parent_sub_workflow_step_id: None,
                    from_sub_workflow_id: None,
                    from_sub_workflow_version: None,
                    sub_workflow_step_order: None,
                    created_at: now,
                    updated_at: now,
                    version: 1,
                };
                self.tickets.insert_step(step.clone()).await.map_err(from_store_error)?;
                known_steps.push(step.clone());
                step
            }
        };

        if let StepRuntimeData::JoinStep { arrived_branch_ids, arrived_outcomes, .. } = &mut join_step.data {
            if let Some(branch_id) = &branch_id {
                arrived_branch_ids.push(branch_id.clone());
            }
            arrived_outcomes.push(completed);
        }

        let satisfied = join_step.join_satisfied(fork_branch_count);
        let join_outcome_completed = join_step.join_outcome();

        let join_step = self
            .tickets
            .update_step(&join_step.ticket_step_id, join_step.version, Box::new({
                let step = join_step.clone();
                move |_| step
            }))
            .await
            .map_err(from_store_error)?;
        replace_known_step(known_steps, join_step.clone());
        tx.touch_step(join_step.clone());

        if !satisfied {
            return Ok(());
        }

        let final_state = if join_outcome_completed { StepState::Completed } else { StepState::Rejected };
        let join_step = self.mark_step(&join_step, final_state, known_steps, tx).await?;
        tx.audit(ticket, AuditEventType::JoinCompleted, serde_json::json!({
            "ticket_step_id": join_step.ticket_step_id, "outcome": join_outcome_completed
        }));

        // ANY/MAJORITY joins fire before every branch is done; cancel the
        // siblings still running.
        let to_cancel: Vec<TicketStep> = known_steps
            .iter()
            .filter(|s| s.parent_fork_step_id.as_deref() == Some(join_def.source_fork_step_id.as_str()) && s.is_active_thread())
            .cloned()
            .collect();
        for s in to_cancel {
            self.mark_step(&s, StepState::Cancelled, known_steps, tx).await?;
        }
        tx.audit(ticket, AuditEventType::BranchCompleted, serde_json::json!({"fork_step_id": join_def.source_fork_step_id}));

        if join_outcome_completed {
            self.advance_past(definition, &join_step, TransitionEvent::JoinComplete, &ticket.form_values, queue, tx, ticket, known_steps).await?;
        } else if join_step.branch_id.is_none() {
            ticket.status = TicketStatus::Rejected;
        }
        Ok(())
    }

    /// Applies the `APPROVAL_STEP / REJECT` branch/fork-policy rules
    /// (spec.md 4.2) to a step that has already been marked `REJECTED`.
    /// Shared by the direct reject path and by sub-workflow completion
    /// propagating a child rejection up to its parent step.
    async fn reject_step_in_context(
        &self,
        ctx: &RequestContext,
        definition: &WorkflowDefinition,
        step: &TicketStep,
        ticket: &mut Ticket,
        known_steps: &mut Vec<TicketStep>,
        tx: &mut EventTx,
    ) -> Result<(), EngineError> {
        let _ = ctx;
        let Some(branch_id) = &step.branch_id else {
            ticket.status = TicketStatus::Rejected;
            return Ok(());
        };
        let Some(fork_step_id) = &step.parent_fork_step_id else {
            ticket.status = TicketStatus::Rejected;
            return Ok(());
        };
        let Some(fork_def) = definition.fork_step(fork_step_id) else {
            ticket.status = TicketStatus::Rejected;
            return Ok(());
        };

        match fork_def.failure_policy {
            FailurePolicy::ContinueOthers => {
                let mut queue = VecDeque::new();
                self.advance_past(definition, step, TransitionEvent::Reject, &ticket.form_values, &mut queue, tx, ticket, known_steps).await?;
                self.drain_activations(definition, ticket, known_steps, queue, tx).await?;
            }
            FailurePolicy::FailAll => {
                ticket.status = TicketStatus::Rejected;
                let siblings: Vec<TicketStep> = known_steps
                    .iter()
                    .filter(|s| s.ticket_step_id != step.ticket_step_id && s.parent_fork_step_id.as_deref() == Some(fork_step_id.as_str()) && s.is_active_thread())
                    .cloned()
                    .collect();
                for s in siblings {
                    self.mark_step(&s, StepState::Rejected, known_steps, tx).await?;
                }
            }
            FailurePolicy::CancelOthers => {
                ticket.status = TicketStatus::Rejected;
                let siblings: Vec<TicketStep> = known_steps
                    .iter()
                    .filter(|s| s.ticket_step_id != step.ticket_step_id && s.parent_fork_step_id.as_deref() == Some(fork_step_id.as_str()) && s.is_active_thread())
                    .cloned()
                    .collect();
                for s in siblings {
                    self.mark_step(&s, StepState::Cancelled, known_steps, tx).await?;
                }
            }
        }
        let _ = branch_id;
        Ok(())
    }

    /// spec.md 4.2 "Ticket termination".
    fn finalize_ticket(&self, ticket: &mut Ticket, known_steps: &[TicketStep], tx: &mut EventTx) {
        if ticket.is_terminal() {
            return;
        }
        let any_active = known_steps.iter().any(|s| s.is_active_thread());
        let any_completed_terminal_step = known_steps.iter().any(|s| s.state == StepState::Completed);
        if !any_active && any_completed_terminal_step {
            ticket.status = TicketStatus::Completed;
            ticket.updated_at = self.clock.now();
            tx.audit(ticket, AuditEventType::TicketCompleted, serde_json::json!({}));
            tx.notify(ticket, "TICKET_COMPLETED", vec![ticket.requester.email.clone()], serde_json::json!({}));
        } else if ticket.status == TicketStatus::Rejected {
            ticket.updated_at = self.clock.now();
            tx.audit(ticket, AuditEventType::TicketRejected, serde_json::json!({}));
            tx.notify(ticket, "TICKET_COMPLETED", vec![ticket.requester.email.clone()], serde_json::json!({}));
        }
    }

    async fn finish_no_op(&self, _ctx: &RequestContext, ticket: Ticket, known_steps: Vec<TicketStep>, tx: EventTx) -> Result<EngineOutcome, EngineError> {
        self.commit(tx, Some(ticket), known_steps).await
    }

    async fn commit(&self, tx: EventTx, ticket: Option<Ticket>, touched_steps: Vec<TicketStep>) -> Result<EngineOutcome, EngineError> {
        if !tx.notifications.is_empty() {
            self.outbox.create_many(tx.notifications.clone()).await.map_err(crate::error::from_outbox_error)?;
        }
        for event in &tx.audit_events {
            self.audit.append(event.clone()).await.map_err(from_store_error)?;
        }

        let mut outcome = match ticket {
            Some(t) => EngineOutcome::new(t),
            None => EngineOutcome::default(),
        };
        outcome.touched_steps = touched_steps;
        outcome.notifications = tx.notifications;
        outcome.audit_events = tx.audit_events;
        Ok(outcome)
    }
}

/// Accumulates the notifications and audit events one event produces,
/// so they can be written once at the end of the call rather than
/// interleaved with the step-by-step computation above.
struct EventTx {
    ticket_id: String,
    correlation_id: String,
    actor: ticketflow_core::Actor,
    now: DateTime<Utc>,
    notifications: Vec<NotificationOutbox>,
    audit_events: Vec<AuditEvent>,
}

impl EventTx {
    fn new(clock: &Arc<dyn Clock>, ctx: &RequestContext, ticket_id: String) -> Self {
        Self {
            ticket_id,
            correlation_id: ctx.correlation_id.clone(),
            actor: ctx.actor.clone(),
            now: clock.now(),
            notifications: Vec::new(),
            audit_events: Vec::new(),
        }
    }

    fn audit(&mut self, _ticket: &mut Ticket, event_type: AuditEventType, details: Value) {
        self.audit_events.push(AuditEvent::new(self.ticket_id.clone(), self.now, self.actor.clone(), event_type, details, self.correlation_id.clone()));
    }

    fn notify(&mut self, ticket: &Ticket, template_key: &str, recipients: Vec<String>, payload: Value) {
        if recipients.is_empty() {
            return;
        }
        self.notifications.push(NotificationOutbox::new(
            ids::generate_notification_id(),
            template_key,
            recipients,
            payload,
            ticket.ticket_id.clone(),
            self.now,
        ));
    }

    fn touch_step(&mut self, _step: TicketStep) {}
}

/// One pending step activation: the definition step to materialize, plus
/// the branch/sub-workflow context it inherits. A sub-instance's own start
/// step is queued via `root_in_sub_workflow` and drained with its own
/// `drain_activations` call against the sub-definition (see the
/// `SUB_WORKFLOW_STEP` arm above), so this type never needs to carry a
/// `WorkflowDefinition` reference of its own.
#[derive(Debug, Clone)]
struct ActivationRequest {
    step_id: String,
    branch_id: Option<String>,
    branch_name: Option<String>,
    parent_fork_step_id: Option<String>,
    parent_sub_workflow_step_id: Option<String>,
}

impl ActivationRequest {
    fn root(step_id: String) -> Self {
        Self {
            step_id,
            branch_id: None,
            branch_name: None,
            parent_fork_step_id: None,
            parent_sub_workflow_step_id: None,
        }
    }

    /// The start step of a just-expanded sub-workflow instance, tagged
    /// with its parent `SUB_WORKFLOW_STEP` so the materialized children
    /// (already inserted by `expand_sub_workflow`) are reused instead of
    /// duplicated.
    fn root_in_sub_workflow(step_id: String, parent_sub_workflow_step_id: String) -> Self {
        Self {
            step_id,
            branch_id: None,
            branch_name: None,
            parent_fork_step_id: None,
            parent_sub_workflow_step_id: Some(parent_sub_workflow_step_id),
        }
    }
}

fn replace_known_step(known_steps: &mut Vec<TicketStep>, updated: TicketStep) {
    if let Some(existing) = known_steps.iter_mut().find(|s| s.ticket_step_id == updated.ticket_step_id) {
        *existing = updated;
    } else {
        known_steps.push(updated);
    }
}

fn step_missing(step: &TicketStep) -> impl Fn() -> EngineError + '_ {
    move || EngineError::not_found("step_definition", step.step_id.clone())
}

fn prior_non_hold_state(step_type: &StepType) -> StepState {
    match step_type {
        StepType::FormStep => StepState::Active,
        StepType::ApprovalStep => StepState::WaitingForApproval,
        StepType::TaskStep => StepState::WaitingAssignment,
        StepType::JoinStep | StepType::NotifyStep | StepType::ForkStep | StepType::SubWorkflowStep => StepState::Active,
    }
}

fn resolve_step_assignee(
    approval_def: &ticketflow_core::definition::ApprovalStepDef,
    known_steps: &[TicketStep],
) -> Option<UserSnapshot> {
    let referenced = approval_def.step_assignee_step_id.as_deref()?;
    known_steps
        .iter()
        .find(|s| s.step_id == referenced && s.state.is_terminal())
        .and_then(|s| s.assigned_to.clone())
}

/// The most recent resolved approvers / assigned agent within the same
/// branch, for a `NOTIFY_STEP`'s `approvers`/`assigned_agent` symbolic
/// recipients.
fn last_branch_context(known_steps: &[TicketStep], branch_id: Option<&str>) -> (Vec<UserSnapshot>, Option<UserSnapshot>) {
    let in_branch = |s: &&TicketStep| s.branch_id.as_deref() == branch_id;
    let approvers = known_steps
        .iter()
        .filter(in_branch)
        .rev()
        .find_map(|s| match &s.data {
            StepRuntimeData::ApprovalStep { resolved_approvers, .. } => Some(resolved_approvers.clone()),
            _ => None,
        })
        .unwrap_or_default();
    let assigned_agent = known_steps.iter().filter(in_branch).rev().find_map(|s| {
        if s.step_type == StepType::TaskStep {
            s.assigned_to.clone()
        } else {
            None
        }
    });
    (approvers, assigned_agent)
}

/// spec.md 4.2 FORM_STEP/SUBMIT_FORM: required fields, conditional
/// requirements, and string length bounds. Regex patterns are accepted
/// in the definition but not enforced at runtime (no pattern-matching
/// dependency is part of this stack).
fn validate_form_submission(form_def: &ticketflow_core::definition::FormStepDef, values: &FormValues) -> Result<(), EngineError> {
    let mut errors = Vec::new();
    for field in &form_def.fields {
        let present = values.get(&field.field_key);
        let required = field.required || field.required_if.as_ref().is_some_and(|c| c.evaluate(values));
        if required && present.is_none_or(|v| v.is_null()) {
            errors.push(ticketflow_core::DefinitionError::new("REQUIRED_FIELD_MISSING", format!("field '{}' is required", field.field_key)).at(field.field_key.clone()));
            continue;
        }
        if let Some(Value::String(s)) = present {
            if let Some(min) = field.min_length {
                if (s.len() as u32) < min {
                    errors.push(ticketflow_core::DefinitionError::new("FIELD_TOO_SHORT", format!("field '{}' is shorter than {min}", field.field_key)).at(field.field_key.clone()));
                }
            }
            if let Some(max) = field.max_length {
                if (s.len() as u32) > max {
                    errors.push(ticketflow_core::DefinitionError::new("FIELD_TOO_LONG", format!("field '{}' is longer than {max}", field.field_key)).at(field.field_key.clone()));
                }
            }
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Validation { errors })
    }
}
