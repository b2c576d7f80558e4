//! Repositories for the satellite records: `ApprovalTask`, `Assignment`,
//! `InfoRequest` (spec.md 3, "ApprovalTask / Assignment / InfoRequest"),
//! plus the append-only `AuditEvent` log.

use async_trait::async_trait;
use ticketflow_core::{ApprovalTask, Assignment, AuditEvent, InfoRequest};

use crate::error::StoreError;

pub type ApprovalTaskMutator = Box<dyn FnOnce(ApprovalTask) -> ApprovalTask + Send>;
pub type InfoRequestMutator = Box<dyn FnOnce(InfoRequest) -> InfoRequest + Send>;

#[async_trait]
pub trait SatelliteRepository: Send + Sync + 'static {
    async fn insert_approval_task(&self, task: ApprovalTask) -> Result<(), StoreError>;
    async fn list_approval_tasks(&self, ticket_step_id: &str) -> Result<Vec<ApprovalTask>, StoreError>;
    async fn update_approval_task(
        &self,
        approval_task_id: &str,
        expected_version: i64,
        mutate: ApprovalTaskMutator,
    ) -> Result<ApprovalTask, StoreError>;

    async fn insert_assignment(&self, assignment: Assignment) -> Result<(), StoreError>;
    async fn list_assignments(&self, ticket_step_id: &str) -> Result<Vec<Assignment>, StoreError>;

    async fn insert_info_request(&self, request: InfoRequest) -> Result<(), StoreError>;
    async fn list_info_requests(&self, ticket_step_id: &str) -> Result<Vec<InfoRequest>, StoreError>;
    async fn update_info_request(
        &self,
        info_request_id: &str,
        expected_version: i64,
        mutate: InfoRequestMutator,
    ) -> Result<InfoRequest, StoreError>;

    /// The single `OPEN` info request blocking a step, if any (spec.md 3:
    /// "A step with an OPEN info request cannot progress via its normal
    /// event").
    async fn open_info_request_for_step(&self, ticket_step_id: &str) -> Result<Option<InfoRequest>, StoreError> {
        Ok(self
            .list_info_requests(ticket_step_id)
            .await?
            .into_iter()
            .find(|r| r.blocks_progress()))
    }
}

#[async_trait]
pub trait AuditRepository: Send + Sync + 'static {
    async fn append(&self, event: AuditEvent) -> Result<(), StoreError>;
    async fn list_for_ticket(&self, ticket_id: &str) -> Result<Vec<AuditEvent>, StoreError>;
}
