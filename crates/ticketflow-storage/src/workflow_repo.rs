//! Repository for `WorkflowTemplate` and its immutable `WorkflowVersion`
//! snapshots (record store contract, spec.md 6.2 and 6.5).

use async_trait::async_trait;
use ticketflow_core::{WorkflowTemplate, WorkflowVersion};
use ticketflow_validator::PublishedVersionLookup;

use crate::error::StoreError;
use crate::pagination::Pagination;

#[async_trait]
pub trait WorkflowRepository: Send + Sync + 'static {
    async fn get_template(&self, workflow_id: &str) -> Result<Option<WorkflowTemplate>, StoreError>;
    async fn insert_template(&self, template: WorkflowTemplate) -> Result<(), StoreError>;

    /// Atomic read-modify-write: `mutate` receives the current template
    /// and returns the replacement; the write is rejected with
    /// `StoreError::Concurrency` if `expected_version` is stale.
    async fn update_template(
        &self,
        workflow_id: &str,
        expected_version: i64,
        mutate: Box<dyn FnOnce(WorkflowTemplate) -> WorkflowTemplate + Send>,
    ) -> Result<WorkflowTemplate, StoreError>;

    async fn list_templates(&self, pagination: Pagination) -> Result<Vec<WorkflowTemplate>, StoreError>;

    async fn insert_version(&self, version: WorkflowVersion) -> Result<(), StoreError>;
    async fn get_version(&self, workflow_id: &str, version_number: i32) -> Result<Option<WorkflowVersion>, StoreError>;
    async fn list_versions(&self, workflow_id: &str) -> Result<Vec<WorkflowVersion>, StoreError>;

    /// The highest `version_number` published for this workflow so far,
    /// used to compute the next monotonic version on publish.
    async fn latest_version_number(&self, workflow_id: &str) -> Result<Option<i32>, StoreError>;
}

/// Adapts any `WorkflowRepository` into the validator's narrow
/// `PublishedVersionLookup` so `ticketflow-validator` stays storage-agnostic
/// while the engine's `WorkflowAdminService` can still validate
/// `SUB_WORKFLOW_STEP` references against real published versions.
///
/// The validator's trait is synchronous; this adapter is built once per
/// validation call from a pre-fetched snapshot rather than doing I/O
/// inside `lookup`, since `validate()` must stay a pure function.
pub struct PreloadedVersionLookup {
    versions: std::collections::HashMap<(String, i32), WorkflowVersion>,
}

impl PreloadedVersionLookup {
    pub fn new(versions: Vec<WorkflowVersion>) -> Self {
        Self {
            versions: versions
                .into_iter()
                .map(|v| ((v.workflow_id.clone(), v.version_number), v))
                .collect(),
        }
    }
}

impl PublishedVersionLookup for PreloadedVersionLookup {
    fn lookup(&self, workflow_id: &str, version: i32) -> Option<WorkflowVersion> {
        self.versions.get(&(workflow_id.to_string(), version)).cloned()
    }
}
