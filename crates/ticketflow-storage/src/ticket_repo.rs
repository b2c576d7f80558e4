//! Repository for `Ticket` and `TicketStep` (record store contract,
//! spec.md 6.2 and 6.5). Both live under one trait since every engine
//! mutation touches both in the same logical transaction (spec.md 4.2,
//! "Concurrency discipline").

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ticketflow_core::definition::StepState;
use ticketflow_core::{Ticket, TicketStep};

use crate::error::StoreError;
use crate::pagination::Pagination;

pub type TicketMutator = Box<dyn FnOnce(Ticket) -> Ticket + Send>;
pub type StepMutator = Box<dyn FnOnce(TicketStep) -> TicketStep + Send>;

#[async_trait]
pub trait TicketRepository: Send + Sync + 'static {
    async fn get_ticket(&self, ticket_id: &str) -> Result<Option<Ticket>, StoreError>;
    async fn insert_ticket(&self, ticket: Ticket) -> Result<(), StoreError>;
    async fn update_ticket(&self, ticket_id: &str, expected_version: i64, mutate: TicketMutator) -> Result<Ticket, StoreError>;
    async fn list_tickets(&self, requester_email: Option<&str>, pagination: Pagination) -> Result<Vec<Ticket>, StoreError>;

    async fn get_step(&self, ticket_step_id: &str) -> Result<Option<TicketStep>, StoreError>;
    async fn insert_step(&self, step: TicketStep) -> Result<(), StoreError>;
    async fn insert_steps(&self, steps: Vec<TicketStep>) -> Result<(), StoreError>;
    async fn update_step(&self, ticket_step_id: &str, expected_version: i64, mutate: StepMutator) -> Result<TicketStep, StoreError>;

    async fn list_steps_for_ticket(&self, ticket_id: &str) -> Result<Vec<TicketStep>, StoreError>;

    /// Steps whose `parent_sub_workflow_step_id` matches -- the set of
    /// `TicketStep`s materialized under one `SUB_WORKFLOW_STEP` (GLOSSARY:
    /// Sub-instance).
    async fn list_steps_by_sub_workflow_parent(&self, parent_sub_workflow_step_id: &str) -> Result<Vec<TicketStep>, StoreError>;

    /// Index `(assigned_to.email, state)` named in spec.md 6.5, used by
    /// `assign_agent`/`reassign_agent` callers to find an agent's queue.
    async fn list_steps_by_assignee(&self, assignee_email: &str, state: Option<StepState>) -> Result<Vec<TicketStep>, StoreError>;

    /// Steps in a non-terminal state with `due_at` at or before
    /// `before`, for the scheduler's SLA reminder/escalation sweeps
    /// (spec.md 4.5).
    async fn list_active_steps_due_before(&self, before: DateTime<Utc>) -> Result<Vec<TicketStep>, StoreError>;

    /// Steps in a non-terminal state with `due_at` strictly in the past,
    /// for the escalation sweep.
    async fn list_active_steps_overdue(&self, now: DateTime<Utc>) -> Result<Vec<TicketStep>, StoreError>;
}
