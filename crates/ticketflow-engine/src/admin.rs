//! Workflow-definition authoring (spec.md 6.1 `workflow.save_draft` /
//! `workflow.publish`): the only place a `WorkflowDefinition` is mutated.
//! Draft save auto-inserts the branch-to-join edges the validator only
//! warns about (spec.md 4.1 rule 6); publish is the hard validation gate.

use std::sync::Arc;

use ticketflow_core::definition::{StepDef, TransitionDef, TransitionEvent, WorkflowDefinition, WorkflowStatus};
use ticketflow_core::{ids, Clock, EngineError, RequestContext, UserSnapshot, WorkflowTemplate, WorkflowVersion};
use ticketflow_storage::{PreloadedVersionLookup, WorkflowRepository};
use ticketflow_validator::{branch_terminal_steps, validate, ValidationResult};

use crate::error::from_store_error;

pub struct WorkflowAdminService {
    workflows: Arc<dyn WorkflowRepository>,
    clock: Arc<dyn Clock>,
}

impl WorkflowAdminService {
    pub fn new(workflows: Arc<dyn WorkflowRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { workflows, clock }
    }

    /// Upserts `workflow_id` (or creates a new template when `None`) as
    /// `DRAFT`, after auto-inserting any missing branch-to-join edge.
    /// Definition errors are reported in the returned `ValidationResult`
    /// but never block the save -- only `publish` enforces `is_valid`.
    #[allow(clippy::too_many_arguments)]
    pub async fn save_draft(
        &self,
        ctx: &RequestContext,
        workflow_id: Option<&str>,
        name: &str,
        description: &str,
        category: &str,
        tags: Vec<String>,
        mut definition: WorkflowDefinition,
    ) -> Result<(WorkflowTemplate, ValidationResult), EngineError> {
        close_branch_to_join_edges(&mut definition);

        let lookup = self.build_version_lookup(&definition).await?;
        let result = validate(&definition, &lookup);

        let now = self.clock.now();
        let name = name.to_string();
        let description = description.to_string();
        let category = category.to_string();

        let template = match workflow_id {
            Some(id) => {
                let existing = self
                    .workflows
                    .get_template(id)
                    .await
                    .map_err(from_store_error)?
                    .ok_or_else(|| EngineError::not_found("workflow", id))?;
                if !existing.is_mutable() {
                    return Err(EngineError::invalid_state(format!("workflow '{id}' is archived and cannot be edited")));
                }
                let expected_version = existing.version;
                self.workflows
                    .update_template(
                        id,
                        expected_version,
                        Box::new(move |mut t| {
                            t.name = name;
                            t.description = description;
                            t.category = category;
                            t.tags = tags;
                            t.definition = definition;
                            t.updated_at = now;
                            t
                        }),
                    )
                    .await
                    .map_err(from_store_error)?
            }
            None => {
                let template = WorkflowTemplate {
                    workflow_id: ids::generate_workflow_id(),
                    name,
                    description,
                    category,
                    tags,
                    status: WorkflowStatus::Draft,
                    definition,
                    current_version: None,
                    created_by: actor_snapshot(&ctx.actor),
                    created_at: now,
                    updated_at: now,
                    version: 1,
                };
                self.workflows.insert_template(template.clone()).await.map_err(from_store_error)?;
                template
            }
        };

        Ok((template, result))
    }

    /// Requires `validate(definition).is_valid`; creates the next
    /// monotonic `WorkflowVersion` and flips the template to `PUBLISHED`.
    pub async fn publish(&self, ctx: &RequestContext, workflow_id: &str) -> Result<WorkflowVersion, EngineError> {
        let template = self
            .workflows
            .get_template(workflow_id)
            .await
            .map_err(from_store_error)?
            .ok_or_else(|| EngineError::not_found("workflow", workflow_id))?;
        if !template.is_mutable() {
            return Err(EngineError::invalid_state(format!("workflow '{workflow_id}' is archived")));
        }

        let lookup = self.build_version_lookup(&template.definition).await?;
        let result = validate(&template.definition, &lookup);
        if !result.is_valid {
            return Err(EngineError::Validation { errors: result.errors });
        }

        let next_version = self
            .workflows
            .latest_version_number(workflow_id)
            .await
            .map_err(from_store_error)?
            .unwrap_or(0)
            + 1;
        let now = self.clock.now();

        let version = WorkflowVersion {
            workflow_version_id: ids::generate_workflow_version_id(),
            workflow_id: workflow_id.to_string(),
            version_number: next_version,
            definition: template.definition.clone(),
            published_by: actor_snapshot(&ctx.actor),
            published_at: now,
        };
        self.workflows.insert_version(version.clone()).await.map_err(from_store_error)?;

        let expected_version = template.version;
        self.workflows
            .update_template(
                workflow_id,
                expected_version,
                Box::new(move |mut t| {
                    t.status = WorkflowStatus::Published;
                    t.current_version = Some(next_version);
                    t.updated_at = now;
                    t
                }),
            )
            .await
            .map_err(from_store_error)?;

        Ok(version)
    }

    /// Preloads the `WorkflowVersion`s referenced by this definition's
    /// `SUB_WORKFLOW_STEP`s, since the validator's lookup must stay a pure
    /// in-memory call (it never does I/O itself).
    async fn build_version_lookup(&self, definition: &WorkflowDefinition) -> Result<PreloadedVersionLookup, EngineError> {
        let mut versions = Vec::new();
        for step in &definition.steps {
            if let StepDef::SubWorkflowStep(sub) = step {
                if let Some(v) = self
                    .workflows
                    .get_version(&sub.sub_workflow_id, sub.sub_workflow_version)
                    .await
                    .map_err(from_store_error)?
                {
                    versions.push(v);
                }
            }
        }
        Ok(PreloadedVersionLookup::new(versions))
    }
}

fn actor_snapshot(actor: &ticketflow_core::Actor) -> UserSnapshot {
    UserSnapshot::resolved(actor.external_id.clone(), actor.email.clone(), actor.display_name.clone())
}

/// For every FORK_STEP with a matching JOIN_STEP, ensures each branch's
/// interior terminal step carries a transition to the join for every
/// event its step type can legally emit (spec.md 9, "the tricky
/// invariant is the branch-to-join edge, which the save-path
/// auto-inserts"). Steps with no event of their own (NOTIFY_STEP,
/// FORK_STEP, SUB_WORKFLOW_STEP) get a single structural
/// `BRANCH_COMPLETED` edge instead.
fn close_branch_to_join_edges(definition: &mut WorkflowDefinition) {
    let joins_by_fork: Vec<(String, String)> = definition
        .steps
        .iter()
        .filter_map(|s| match s {
            StepDef::JoinStep(join) => Some((join.source_fork_step_id.clone(), join.common.step_id.clone())),
            _ => None,
        })
        .collect();

    let forks: Vec<(String, Vec<ticketflow_core::definition::BranchDef>)> = definition
        .steps
        .iter()
        .filter_map(|s| match s {
            StepDef::ForkStep(fork) => Some((fork.common.step_id.clone(), fork.branches.clone())),
            _ => None,
        })
        .collect();

    let mut new_transitions = Vec::new();

    for (fork_step_id, branches) in &forks {
        let Some((_, join_step_id)) = joins_by_fork.iter().find(|(f, _)| f == fork_step_id) else {
            continue;
        };

        for branch in branches {
            let terminals: Vec<String> = branch_terminal_steps(definition, &branch.start_step_id, join_step_id)
                .into_iter()
                .map(String::from)
                .collect();

            for terminal in terminals {
                let events: &[TransitionEvent] = definition
                    .step(&terminal)
                    .map(|s| s.step_type().legal_source_events())
                    .unwrap_or(&[]);
                let fallback = [TransitionEvent::BranchCompleted];
                let events = if events.is_empty() { &fallback[..] } else { events };

                for event in events {
                    let has_edge = definition
                        .transitions
                        .iter()
                        .any(|t| t.from_step_id == terminal && t.to_step_id == *join_step_id && t.on_event == *event);
                    if !has_edge {
                        new_transitions.push(TransitionDef::new(
                            ids::generate_id("TRN"),
                            terminal.clone(),
                            join_step_id.clone(),
                            *event,
                        ));
                    }
                }
            }
        }
    }

    definition.transitions.extend(new_transitions);
}
