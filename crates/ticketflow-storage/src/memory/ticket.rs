use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use ticketflow_core::definition::StepState;
use ticketflow_core::{Ticket, TicketStep};

use crate::error::StoreError;
use crate::pagination::Pagination;
use crate::ticket_repo::{StepMutator, TicketMutator, TicketRepository};

#[derive(Default)]
pub struct InMemoryTicketStore {
    tickets: RwLock<HashMap<String, Ticket>>,
    steps: RwLock<HashMap<String, TicketStep>>,
}

impl InMemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TicketRepository for InMemoryTicketStore {
    async fn get_ticket(&self, ticket_id: &str) -> Result<Option<Ticket>, StoreError> {
        Ok(self.tickets.read().get(ticket_id).cloned())
    }

    async fn insert_ticket(&self, ticket: Ticket) -> Result<(), StoreError> {
        self.tickets.write().insert(ticket.ticket_id.clone(), ticket);
        Ok(())
    }

    async fn update_ticket(&self, ticket_id: &str, expected_version: i64, mutate: TicketMutator) -> Result<Ticket, StoreError> {
        let mut tickets = self.tickets.write();
        let current = tickets
            .get(ticket_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("ticket", ticket_id))?;

        if current.version != expected_version {
            return Err(StoreError::Concurrency {
                kind: "ticket",
                id: ticket_id.to_string(),
                expected: expected_version,
                actual: current.version,
            });
        }

        let mut updated = mutate(current);
        updated.version += 1;
        tickets.insert(ticket_id.to_string(), updated.clone());
        Ok(updated)
    }

    async fn list_tickets(&self, requester_email: Option<&str>, pagination: Pagination) -> Result<Vec<Ticket>, StoreError> {
        let mut all: Vec<_> = self
            .tickets
            .read()
            .values()
            .filter(|t| requester_email.map_or(true, |email| t.requester.email == email))
            .cloned()
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all
            .into_iter()
            .skip(pagination.skip as usize)
            .take(pagination.limit as usize)
            .collect())
    }

    async fn get_step(&self, ticket_step_id: &str) -> Result<Option<TicketStep>, StoreError> {
        Ok(self.steps.read().get(ticket_step_id).cloned())
    }

    async fn insert_step(&self, step: TicketStep) -> Result<(), StoreError> {
        self.steps.write().insert(step.ticket_step_id.clone(), step);
        Ok(())
    }

    async fn insert_steps(&self, steps: Vec<TicketStep>) -> Result<(), StoreError> {
        let mut guard = self.steps.write();
        for step in steps {
            guard.insert(step.ticket_step_id.clone(), step);
        }
        Ok(())
    }

    async fn update_step(&self, ticket_step_id: &str, expected_version: i64, mutate: StepMutator) -> Result<TicketStep, StoreError> {
        let mut steps = self.steps.write();
        let current = steps
            .get(ticket_step_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("ticket_step", ticket_step_id))?;

        if current.version != expected_version {
            return Err(StoreError::Concurrency {
                kind: "ticket_step",
                id: ticket_step_id.to_string(),
                expected: expected_version,
                actual: current.version,
            });
        }

        let mut updated = mutate(current);
        updated.version += 1;
        steps.insert(ticket_step_id.to_string(), updated.clone());
        Ok(updated)
    }

    async fn list_steps_for_ticket(&self, ticket_id: &str) -> Result<Vec<TicketStep>, StoreError> {
        let mut steps: Vec<_> = self
            .steps
            .read()
            .values()
            .filter(|s| s.ticket_id == ticket_id)
            .cloned()
            .collect();
        steps.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(steps)
    }

    async fn list_steps_by_sub_workflow_parent(&self, parent_sub_workflow_step_id: &str) -> Result<Vec<TicketStep>, StoreError> {
        Ok(self
            .steps
            .read()
            .values()
            .filter(|s| s.parent_sub_workflow_step_id.as_deref() == Some(parent_sub_workflow_step_id))
            .cloned()
            .collect())
    }

    async fn list_steps_by_assignee(&self, assignee_email: &str, state: Option<StepState>) -> Result<Vec<TicketStep>, StoreError> {
        Ok(self
            .steps
            .read()
            .values()
            .filter(|s| s.assigned_to.as_ref().is_some_and(|u| u.email == assignee_email))
            .filter(|s| state.map_or(true, |wanted| s.state == wanted))
            .cloned()
            .collect())
    }

    async fn list_active_steps_due_before(&self, before: DateTime<Utc>) -> Result<Vec<TicketStep>, StoreError> {
        Ok(self
            .steps
            .read()
            .values()
            .filter(|s| s.is_active_thread())
            .filter(|s| s.due_at.is_some_and(|due| due <= before))
            .cloned()
            .collect())
    }

    async fn list_active_steps_overdue(&self, now: DateTime<Utc>) -> Result<Vec<TicketStep>, StoreError> {
        Ok(self
            .steps
            .read()
            .values()
            .filter(|s| s.is_active_thread())
            .filter(|s| s.due_at.is_some_and(|due| due < now))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ticketflow_core::definition::{StepType, TicketStatus};
    use ticketflow_core::ticket_step::StepRuntimeData;
    use ticketflow_core::UserSnapshot;

    fn ticket() -> Ticket {
        Ticket {
            ticket_id: "TKT-1".into(),
            workflow_id: "WF-1".into(),
            workflow_version_number: 1,
            title: "Laptop".into(),
            description: String::new(),
            status: TicketStatus::Open,
            requester: UserSnapshot::resolved("u1", "alice@example.com", "Alice"),
            manager_snapshot: UserSnapshot::resolved("u2", "boss@example.com", "Bob"),
            form_values: Default::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            version: 1,
        }
    }

    fn step(id: &str) -> TicketStep {
        TicketStep {
            ticket_step_id: id.into(),
            ticket_id: "TKT-1".into(),
            step_id: "s1".into(),
            step_name: "Form".into(),
            step_type: StepType::FormStep,
            state: StepState::Active,
            assigned_to: None,
            data: StepRuntimeData::FormStep,
            due_at: None,
            last_reminder_at: None,
            last_escalation_at: None,
            branch_id: None,
            branch_name: None,
            parent_fork_step_id: None,
            parent_sub_workflow_step_id: None,
            from_sub_workflow_id: None,
            from_sub_workflow_version: None,
            sub_workflow_step_order: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            version: 1,
        }
    }

    #[tokio::test]
    async fn update_ticket_rejects_stale_cas() {
        let store = InMemoryTicketStore::new();
        store.insert_ticket(ticket()).await.unwrap();
        let result = store
            .update_ticket("TKT-1", 99, Box::new(|t| t))
            .await;
        assert!(matches!(result, Err(StoreError::Concurrency { .. })));
    }

    #[tokio::test]
    async fn list_steps_for_ticket_is_sorted_by_creation() {
        let store = InMemoryTicketStore::new();
        store.insert_step(step("STEP-1")).await.unwrap();
        store.insert_step(step("STEP-2")).await.unwrap();
        let steps = store.list_steps_for_ticket("TKT-1").await.unwrap();
        assert_eq!(steps.len(), 2);
    }

    #[tokio::test]
    async fn due_before_filters_active_only() {
        let store = InMemoryTicketStore::new();
        let mut s = step("STEP-1");
        s.due_at = Some(Utc::now());
        store.insert_step(s).await.unwrap();
        let mut terminal = step("STEP-2");
        terminal.state = StepState::Completed;
        terminal.due_at = Some(Utc::now());
        store.insert_step(terminal).await.unwrap();

        let due = store.list_active_steps_due_before(Utc::now() + chrono::Duration::hours(1)).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].ticket_step_id, "STEP-1");
    }
}
