use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use ticketflow_core::{ApprovalTask, Assignment, AuditEvent, InfoRequest};

use crate::error::StoreError;
use crate::satellite_repo::{ApprovalTaskMutator, AuditRepository, InfoRequestMutator, SatelliteRepository};

#[derive(Default)]
pub struct InMemorySatelliteStore {
    approval_tasks: RwLock<HashMap<String, ApprovalTask>>,
    assignments: RwLock<HashMap<String, Assignment>>,
    info_requests: RwLock<HashMap<String, InfoRequest>>,
    audit_events: RwLock<Vec<AuditEvent>>,
}

impl InMemorySatelliteStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SatelliteRepository for InMemorySatelliteStore {
    async fn insert_approval_task(&self, task: ApprovalTask) -> Result<(), StoreError> {
        self.approval_tasks.write().insert(task.approval_task_id.clone(), task);
        Ok(())
    }

    async fn list_approval_tasks(&self, ticket_step_id: &str) -> Result<Vec<ApprovalTask>, StoreError> {
        let mut tasks: Vec<_> = self
            .approval_tasks
            .read()
            .values()
            .filter(|t| t.ticket_step_id == ticket_step_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tasks)
    }

    async fn update_approval_task(
        &self,
        approval_task_id: &str,
        expected_version: i64,
        mutate: ApprovalTaskMutator,
    ) -> Result<ApprovalTask, StoreError> {
        let mut tasks = self.approval_tasks.write();
        let current = tasks
            .get(approval_task_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("approval_task", approval_task_id))?;

        if current.version != expected_version {
            return Err(StoreError::Concurrency {
                kind: "approval_task",
                id: approval_task_id.to_string(),
                expected: expected_version,
                actual: current.version,
            });
        }

        let mut updated = mutate(current);
        updated.version += 1;
        tasks.insert(approval_task_id.to_string(), updated.clone());
        Ok(updated)
    }

    async fn insert_assignment(&self, assignment: Assignment) -> Result<(), StoreError> {
        self.assignments.write().insert(assignment.assignment_id.clone(), assignment);
        Ok(())
    }

    async fn list_assignments(&self, ticket_step_id: &str) -> Result<Vec<Assignment>, StoreError> {
        let mut assignments: Vec<_> = self
            .assignments
            .read()
            .values()
            .filter(|a| a.ticket_step_id == ticket_step_id)
            .cloned()
            .collect();
        assignments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(assignments)
    }

    async fn insert_info_request(&self, request: InfoRequest) -> Result<(), StoreError> {
        self.info_requests.write().insert(request.info_request_id.clone(), request);
        Ok(())
    }

    async fn list_info_requests(&self, ticket_step_id: &str) -> Result<Vec<InfoRequest>, StoreError> {
        let mut requests: Vec<_> = self
            .info_requests
            .read()
            .values()
            .filter(|r| r.ticket_step_id == ticket_step_id)
            .cloned()
            .collect();
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(requests)
    }

    async fn update_info_request(
        &self,
        info_request_id: &str,
        expected_version: i64,
        mutate: InfoRequestMutator,
    ) -> Result<InfoRequest, StoreError> {
        let mut requests = self.info_requests.write();
        let current = requests
            .get(info_request_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("info_request", info_request_id))?;

        if current.version != expected_version {
            return Err(StoreError::Concurrency {
                kind: "info_request",
                id: info_request_id.to_string(),
                expected: expected_version,
                actual: current.version,
            });
        }

        let mut updated = mutate(current);
        updated.version += 1;
        requests.insert(info_request_id.to_string(), updated.clone());
        Ok(updated)
    }
}

#[async_trait]
impl AuditRepository for InMemorySatelliteStore {
    async fn append(&self, event: AuditEvent) -> Result<(), StoreError> {
        self.audit_events.write().push(event);
        Ok(())
    }

    async fn list_for_ticket(&self, ticket_id: &str) -> Result<Vec<AuditEvent>, StoreError> {
        let mut events: Vec<_> = self
            .audit_events
            .read()
            .iter()
            .filter(|e| e.ticket_id == ticket_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ticketflow_core::definition::InfoRequestStatus;
    use ticketflow_core::UserSnapshot;

    fn info_request(id: &str) -> InfoRequest {
        InfoRequest {
            info_request_id: id.into(),
            ticket_step_id: "STEP-1".into(),
            requested_by: UserSnapshot::resolved("u1", "alice@example.com", "Alice"),
            question: "More detail please".into(),
            status: InfoRequestStatus::Open,
            response: None,
            created_at: chrono::Utc::now(),
            responded_at: None,
            version: 1,
        }
    }

    #[tokio::test]
    async fn open_info_request_for_step_finds_the_blocking_one() {
        let store = InMemorySatelliteStore::new();
        store.insert_info_request(info_request("INFO-1")).await.unwrap();
        let found = store.open_info_request_for_step("STEP-1").await.unwrap();
        assert_eq!(found.unwrap().info_request_id, "INFO-1");
    }

    #[tokio::test]
    async fn responded_info_request_no_longer_blocks() {
        let store = InMemorySatelliteStore::new();
        store.insert_info_request(info_request("INFO-1")).await.unwrap();
        store
            .update_info_request(
                "INFO-1",
                1,
                Box::new(|mut r| {
                    r.status = InfoRequestStatus::Responded;
                    r
                }),
            )
            .await
            .unwrap();
        assert!(store.open_info_request_for_step("STEP-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn audit_events_list_sorted_by_timestamp() {
        use ticketflow_core::{Actor, AuditEvent, AuditEventType};

        let store = InMemorySatelliteStore::new();
        let actor = Actor::new("alice@example.com", "u1", "Alice");
        let first = AuditEvent::new("TKT-1", chrono::Utc::now(), actor.clone(), AuditEventType::TicketCreated, serde_json::json!({}), "COR-1");
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = AuditEvent::new("TKT-1", chrono::Utc::now(), actor, AuditEventType::FormSubmitted, serde_json::json!({}), "COR-1");

        store.append(second.clone()).await.unwrap();
        store.append(first.clone()).await.unwrap();

        let events = store.list_for_ticket("TKT-1").await.unwrap();
        assert_eq!(events[0].audit_event_id, first.audit_event_id);
        assert_eq!(events[1].audit_event_id, second.audit_event_id);
    }
}
