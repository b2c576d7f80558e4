use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use ticketflow_core::{WorkflowTemplate, WorkflowVersion};

use crate::error::StoreError;
use crate::pagination::Pagination;
use crate::workflow_repo::WorkflowRepository;

#[derive(Default)]
pub struct InMemoryWorkflowStore {
    templates: RwLock<HashMap<String, WorkflowTemplate>>,
    versions: RwLock<HashMap<(String, i32), WorkflowVersion>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflowStore {
    async fn get_template(&self, workflow_id: &str) -> Result<Option<WorkflowTemplate>, StoreError> {
        Ok(self.templates.read().get(workflow_id).cloned())
    }

    async fn insert_template(&self, template: WorkflowTemplate) -> Result<(), StoreError> {
        self.templates.write().insert(template.workflow_id.clone(), template);
        Ok(())
    }

    async fn update_template(
        &self,
        workflow_id: &str,
        expected_version: i64,
        mutate: Box<dyn FnOnce(WorkflowTemplate) -> WorkflowTemplate + Send>,
    ) -> Result<WorkflowTemplate, StoreError> {
        let mut templates = self.templates.write();
        let current = templates
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("workflow_template", workflow_id))?;

        if current.version != expected_version {
            return Err(StoreError::Concurrency {
                kind: "workflow_template",
                id: workflow_id.to_string(),
                expected: expected_version,
                actual: current.version,
            });
        }

        let mut updated = mutate(current);
        updated.version += 1;
        templates.insert(workflow_id.to_string(), updated.clone());
        Ok(updated)
    }

    async fn list_templates(&self, pagination: Pagination) -> Result<Vec<WorkflowTemplate>, StoreError> {
        let mut all: Vec<_> = self.templates.read().values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all
            .into_iter()
            .skip(pagination.skip as usize)
            .take(pagination.limit as usize)
            .collect())
    }

    async fn insert_version(&self, version: WorkflowVersion) -> Result<(), StoreError> {
        self.versions
            .write()
            .insert((version.workflow_id.clone(), version.version_number), version);
        Ok(())
    }

    async fn get_version(&self, workflow_id: &str, version_number: i32) -> Result<Option<WorkflowVersion>, StoreError> {
        Ok(self
            .versions
            .read()
            .get(&(workflow_id.to_string(), version_number))
            .cloned())
    }

    async fn list_versions(&self, workflow_id: &str) -> Result<Vec<WorkflowVersion>, StoreError> {
        let mut versions: Vec<_> = self
            .versions
            .read()
            .values()
            .filter(|v| v.workflow_id == workflow_id)
            .cloned()
            .collect();
        versions.sort_by_key(|v| v.version_number);
        Ok(versions)
    }

    async fn latest_version_number(&self, workflow_id: &str) -> Result<Option<i32>, StoreError> {
        Ok(self
            .versions
            .read()
            .keys()
            .filter(|(id, _)| id == workflow_id)
            .map(|(_, n)| *n)
            .max())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ticketflow_core::definition::{StepCommon, StepDef, TaskStepDef, WorkflowDefinition, WorkflowStatus};
    use ticketflow_core::UserSnapshot;

    fn definition() -> WorkflowDefinition {
        WorkflowDefinition {
            steps: vec![StepDef::TaskStep(TaskStepDef {
                common: StepCommon {
                    step_id: "t1".into(),
                    step_name: "Do it".into(),
                    is_start: true,
                    is_terminal: true,
                    order: 0,
                    sla_due_minutes: None,
                },
                instructions: String::new(),
                execution_notes_required: false,
                output_fields: vec![],
                linked_repeating_source: None,
            })],
            transitions: vec![],
            start_step_id: "t1".into(),
        }
    }

    fn template() -> WorkflowTemplate {
        WorkflowTemplate {
            workflow_id: "WF-1".into(),
            name: "Laptop request".into(),
            description: String::new(),
            category: "IT".into(),
            tags: vec![],
            status: WorkflowStatus::Draft,
            definition: definition(),
            current_version: None,
            created_by: UserSnapshot::resolved("u1", "admin@example.com", "Admin"),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            version: 1,
        }
    }

    #[tokio::test]
    async fn update_rejects_stale_version() {
        let store = InMemoryWorkflowStore::new();
        store.insert_template(template()).await.unwrap();

        let result = store
            .update_template("WF-1", 2, Box::new(|mut t| {
                t.name = "Renamed".into();
                t
            }))
            .await;
        assert!(matches!(result, Err(StoreError::Concurrency { .. })));
    }

    #[tokio::test]
    async fn update_bumps_version_on_success() {
        let store = InMemoryWorkflowStore::new();
        store.insert_template(template()).await.unwrap();

        let updated = store
            .update_template("WF-1", 1, Box::new(|mut t| {
                t.name = "Renamed".into();
                t
            }))
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.name, "Renamed");
    }

    #[tokio::test]
    async fn latest_version_number_tracks_max() {
        let store = InMemoryWorkflowStore::new();
        for n in 1..=3 {
            store
                .insert_version(WorkflowVersion {
                    workflow_version_id: format!("WFV-{n}"),
                    workflow_id: "WF-1".into(),
                    version_number: n,
                    definition: definition(),
                    published_by: UserSnapshot::resolved("u1", "admin@example.com", "Admin"),
                    published_at: chrono::Utc::now(),
                })
                .await
                .unwrap();
        }
        assert_eq!(store.latest_version_number("WF-1").await.unwrap(), Some(3));
    }
}
