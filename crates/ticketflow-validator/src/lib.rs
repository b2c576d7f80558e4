//! Static validation of a `WorkflowDefinition` before publish and on draft
//! save. `validate` is a pure function over the definition plus a lookup
//! for published sub-workflow versions; it never touches a store itself.

use std::collections::{HashMap, HashSet, VecDeque};

use ticketflow_core::definition::{ApproverResolution, FieldType, StepDef, TransitionEvent, WorkflowDefinition};
use ticketflow_core::workflow_template::WorkflowVersion;
use ticketflow_core::DefinitionError;

/// Looks up a published `WorkflowVersion` by id and version number, used
/// only to validate `SUB_WORKFLOW_STEP` references. Implemented by the
/// storage layer; kept as a trait here so the validator stays pure and
/// storage-agnostic.
pub trait PublishedVersionLookup {
    fn lookup(&self, workflow_id: &str, version: i32) -> Option<WorkflowVersion>;
}

/// A lookup that never finds anything, for validating definitions that
/// are known not to contain sub-workflow steps.
pub struct NoSubWorkflows;

impl PublishedVersionLookup for NoSubWorkflows {
    fn lookup(&self, _workflow_id: &str, _version: i32) -> Option<WorkflowVersion> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<DefinitionError>,
    pub warnings: Vec<DefinitionError>,
}

impl ValidationResult {
    fn push_error(&mut self, error_type: &str, message: impl Into<String>) {
        self.errors.push(DefinitionError::new(error_type, message));
        self.is_valid = false;
    }

    fn push_warning(&mut self, warning_type: &str, message: impl Into<String>) {
        self.warnings.push(DefinitionError::new(warning_type, message));
    }
}

pub fn validate(definition: &WorkflowDefinition, sub_workflows: &dyn PublishedVersionLookup) -> ValidationResult {
    let mut result = ValidationResult {
        is_valid: true,
        errors: Vec::new(),
        warnings: Vec::new(),
    };

    check_steps_and_start(definition, &mut result);
    check_start_and_terminal_flags(definition, &mut result);
    check_per_type_requirements(definition, sub_workflows, &mut result);
    check_transitions(definition, &mut result);
    check_reachability(definition, &mut result);
    check_branch_to_join_closure(definition, &mut result);

    result
}

fn step_ids(definition: &WorkflowDefinition) -> HashSet<&str> {
    definition.steps.iter().map(|s| s.step_id()).collect()
}

/// Rule 1: `steps` non-empty; every `step_id` unique; `start_step_id`
/// present and resolves to a step.
fn check_steps_and_start(definition: &WorkflowDefinition, result: &mut ValidationResult) {
    if definition.steps.is_empty() {
        result.push_error("NO_STEPS", "workflow definition has no steps");
        return;
    }

    let mut seen = HashSet::new();
    for step in &definition.steps {
        if !seen.insert(step.step_id()) {
            result.push_error(
                "DUPLICATE_STEP_ID",
                format!("step id '{}' appears more than once", step.step_id()),
            );
        }
    }

    if definition.start_step_id.is_empty() {
        result.push_error("MISSING_START_STEP", "start_step_id is not set");
    } else if definition.step(&definition.start_step_id).is_none() {
        result.push_error(
            "UNKNOWN_START_STEP",
            format!("start_step_id '{}' does not resolve to a step", definition.start_step_id),
        );
    }
}

/// Rule 2: exactly one or zero `is_start=true` (zero emits a warning and
/// falls back to the first step); at least one `is_terminal=true`.
fn check_start_and_terminal_flags(definition: &WorkflowDefinition, result: &mut ValidationResult) {
    let start_count = definition.steps.iter().filter(|s| s.is_start()).count();
    if start_count > 1 {
        result.push_error("MULTIPLE_START_STEPS", "more than one step has is_start=true");
    } else if start_count == 0 {
        result.push_warning(
            "IMPLICIT_START_STEP",
            "no step has is_start=true; the first step in definition order will be used",
        );
    }

    if !definition.steps.iter().any(|s| s.is_terminal()) {
        result.push_error("NO_TERMINAL_STEP", "no step has is_terminal=true");
    }
}

/// Rule 3: per step-type attribute requirements.
fn check_per_type_requirements(
    definition: &WorkflowDefinition,
    sub_workflows: &dyn PublishedVersionLookup,
    result: &mut ValidationResult,
) {
    let ids = step_ids(definition);

    for step in &definition.steps {
        match step {
            StepDef::FormStep(form) => {
                let mut field_keys = HashSet::new();
                for field in &form.fields {
                    if !field_keys.insert(field.field_key.as_str()) {
                        result.push_error(
                            "DUPLICATE_FIELD_KEY",
                            format!("field key '{}' repeated on step '{}'", field.field_key, step.step_id()),
                        );
                    }
                    check_field(field, step.step_id(), result);
                }
                for section in &form.sections {
                    for field in &section.fields {
                        check_field(field, step.step_id(), result);
                    }
                }
            }
            StepDef::ApprovalStep(approval) => {
                match approval.approver_resolution {
                    ApproverResolution::SpecificEmail | ApproverResolution::SpocEmail => {
                        if approval.specific_approver_email.is_none() {
                            result.push_error(
                                "MISSING_APPROVER_EMAIL",
                                format!("step '{}' needs specific_approver_email", step.step_id()),
                            );
                        }
                    }
                    ApproverResolution::Conditional => {
                        if approval.conditional_approver_rules.is_empty() {
                            result.push_error(
                                "MISSING_CONDITIONAL_RULES",
                                format!("step '{}' declares CONDITIONAL resolution with no rules", step.step_id()),
                            );
                        }
                        for rule in &approval.conditional_approver_rules {
                            for field in rule.condition.referenced_fields() {
                                if !known_field_key(definition, field) {
                                    result.push_error(
                                        "UNKNOWN_CONDITION_FIELD",
                                        format!("step '{}' conditional rule references unknown field '{field}'", step.step_id()),
                                    );
                                }
                            }
                        }
                    }
                    ApproverResolution::StepAssignee => match &approval.step_assignee_step_id {
                        None => result.push_error(
                            "MISSING_STEP_ASSIGNEE_REFERENCE",
                            format!("step '{}' needs step_assignee_step_id", step.step_id()),
                        ),
                        Some(reference) => match definition.step(reference) {
                            Some(StepDef::TaskStep(_)) => {}
                            Some(_) => result.push_error(
                                "STEP_ASSIGNEE_NOT_TASK_STEP",
                                format!("step '{}' references non-TASK_STEP '{reference}'", step.step_id()),
                            ),
                            None => result.push_error(
                                "UNKNOWN_STEP_ASSIGNEE_REFERENCE",
                                format!("step '{}' references unknown step '{reference}'", step.step_id()),
                            ),
                        },
                    },
                    ApproverResolution::RequesterManager => {}
                }
            }
            StepDef::TaskStep(task) => {
                if let Some(source) = &task.linked_repeating_source {
                    match definition.step(&source.step_id) {
                        Some(StepDef::FormStep(form)) => {
                            if !form.sections.iter().any(|s| s.section_key == source.section_key) {
                                result.push_error(
                                    "UNKNOWN_LINKED_SECTION",
                                    format!(
                                        "step '{}' links to unknown section '{}' on step '{}'",
                                        step.step_id(),
                                        source.section_key,
                                        source.step_id
                                    ),
                                );
                            }
                        }
                        _ => result.push_error(
                            "UNKNOWN_LINKED_STEP",
                            format!("step '{}' links to unknown form step '{}'", step.step_id(), source.step_id),
                        ),
                    }
                }
            }
            StepDef::ForkStep(fork) => {
                if fork.branches.is_empty() {
                    result.push_error("EMPTY_FORK", format!("fork step '{}' has no branches", step.step_id()));
                }
                let mut branch_ids = HashSet::new();
                for branch in &fork.branches {
                    if !branch_ids.insert(branch.branch_id.as_str()) {
                        result.push_error(
                            "DUPLICATE_BRANCH_ID",
                            format!("branch id '{}' repeated on fork '{}'", branch.branch_id, step.step_id()),
                        );
                    }
                    if !ids.contains(branch.start_step_id.as_str()) {
                        result.push_error(
                            "UNKNOWN_BRANCH_START",
                            format!("fork '{}' branch '{}' start_step_id unknown", step.step_id(), branch.branch_id),
                        );
                    }
                }
            }
            StepDef::JoinStep(join) => match definition.step(&join.source_fork_step_id) {
                Some(StepDef::ForkStep(_)) => {}
                Some(_) => result.push_error(
                    "JOIN_SOURCE_NOT_FORK",
                    format!("join '{}' source_fork_step_id is not a FORK_STEP", step.step_id()),
                ),
                None => result.push_error(
                    "UNKNOWN_JOIN_SOURCE",
                    format!("join '{}' references unknown fork '{}'", step.step_id(), join.source_fork_step_id),
                ),
            },
            StepDef::SubWorkflowStep(sub) => match sub_workflows.lookup(&sub.sub_workflow_id, sub.sub_workflow_version) {
                None => result.push_error(
                    "UNKNOWN_SUB_WORKFLOW_VERSION",
                    format!(
                        "step '{}' references unpublished {} v{}",
                        step.step_id(),
                        sub.sub_workflow_id,
                        sub.sub_workflow_version
                    ),
                ),
                Some(version) => {
                    if version.definition.steps.iter().any(|s| matches!(s, StepDef::SubWorkflowStep(_))) {
                        result.push_error(
                            "NESTED_SUB_WORKFLOW",
                            format!("step '{}' embeds a workflow that itself embeds a sub-workflow", step.step_id()),
                        );
                    }
                }
            },
            StepDef::NotifyStep(_) => {}
        }
    }
}

fn check_field(field: &ticketflow_core::definition::FieldDef, step_id: &str, result: &mut ValidationResult) {
    if matches!(field.field_type, FieldType::Select | FieldType::MultiSelect) && field.options.is_empty() {
        result.push_error(
            "MISSING_OPTIONS",
            format!("field '{}' on step '{step_id}' needs at least one option", field.field_key),
        );
    }
    if let Some(restriction) = &field.date_restriction {
        if restriction.is_degenerate() {
            result.push_error(
                "DEGENERATE_DATE_RESTRICTION",
                format!("field '{}' on step '{step_id}' disallows every date", field.field_key),
            );
        }
    }
}

fn known_field_key(definition: &WorkflowDefinition, field_key: &str) -> bool {
    definition.steps.iter().any(|step| match step {
        StepDef::FormStep(form) => {
            form.fields.iter().any(|f| f.field_key == field_key)
                || form.sections.iter().any(|s| s.fields.iter().any(|f| f.field_key == field_key))
        }
        StepDef::TaskStep(task) => task.output_fields.iter().any(|f| f.field_key == field_key),
        _ => false,
    })
}

/// Rule 4: transition ids unique; endpoints resolve; `on_event` matches
/// the source step type's legal event set; conditions reference known
/// field keys.
fn check_transitions(definition: &WorkflowDefinition, result: &mut ValidationResult) {
    let ids = step_ids(definition);
    let mut seen = HashSet::new();

    for transition in &definition.transitions {
        if !seen.insert(transition.transition_id.as_str()) {
            result.push_error(
                "DUPLICATE_TRANSITION_ID",
                format!("transition id '{}' repeated", transition.transition_id),
            );
        }
        if !ids.contains(transition.from_step_id.as_str()) {
            result.push_error(
                "UNKNOWN_TRANSITION_SOURCE",
                format!("transition '{}' from_step_id unknown", transition.transition_id),
            );
        }
        if !ids.contains(transition.to_step_id.as_str()) {
            result.push_error(
                "UNKNOWN_TRANSITION_TARGET",
                format!("transition '{}' to_step_id unknown", transition.transition_id),
            );
        }

        if let Some(source) = definition.step(&transition.from_step_id) {
            let legal = source.step_type().legal_source_events();
            if !legal.is_empty() && !legal.contains(&transition.on_event) {
                result.push_error(
                    "ILLEGAL_TRANSITION_EVENT",
                    format!(
                        "transition '{}' carries event {:?} which {:?} does not emit",
                        transition.transition_id,
                        transition.on_event,
                        source.step_type()
                    ),
                );
            }
        }

        if let Some(condition) = &transition.condition {
            for field in condition.referenced_fields() {
                if !known_field_key(definition, field) {
                    result.push_error(
                        "UNKNOWN_CONDITION_FIELD",
                        format!("transition '{}' condition references unknown field '{field}'", transition.transition_id),
                    );
                }
            }
        }
    }
}

/// Rule 5: every non-start step is reachable from `start_step_id`,
/// following explicit transitions and implicit fork→branch starts.
/// Unreachable steps emit a warning, not an error.
fn check_reachability(definition: &WorkflowDefinition, result: &mut ValidationResult) {
    let Some(start) = definition.effective_start_step_id() else {
        return;
    };

    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(start);
    visited.insert(start);

    while let Some(current) = queue.pop_front() {
        for transition in definition.transitions.iter().filter(|t| t.from_step_id == current) {
            if visited.insert(transition.to_step_id.as_str()) {
                queue.push_back(transition.to_step_id.as_str());
            }
        }
        if let Some(StepDef::ForkStep(fork)) = definition.step(current) {
            for branch in &fork.branches {
                if visited.insert(branch.start_step_id.as_str()) {
                    queue.push_back(branch.start_step_id.as_str());
                }
            }
        }
    }

    for step in &definition.steps {
        if !visited.contains(step.step_id()) {
            result.push_warning(
                "UNREACHABLE_STEP",
                format!("step '{}' is not reachable from the start step", step.step_id()),
            );
        }
    }
}

/// Rule 6: for every FORK_STEP with a matching JOIN_STEP, each branch's
/// terminal interior step should have a transition to the join. Missing
/// edges are reported as warnings; the save path (not the validator)
/// auto-inserts them.
fn check_branch_to_join_closure(definition: &WorkflowDefinition, result: &mut ValidationResult) {
    let joins_by_fork: HashMap<&str, &str> = definition
        .steps
        .iter()
        .filter_map(|s| match s {
            StepDef::JoinStep(join) => Some((join.source_fork_step_id.as_str(), join.step_id())),
            _ => None,
        })
        .collect();

    for step in &definition.steps {
        let StepDef::ForkStep(fork) = step else { continue };
        let Some(&join_step_id) = joins_by_fork.get(fork.common.step_id.as_str()) else {
            continue;
        };

        for branch in &fork.branches {
            for terminal in branch_terminal_steps(definition, &branch.start_step_id, join_step_id) {
                let has_edge_to_join = definition
                    .transitions
                    .iter()
                    .any(|t| t.from_step_id == terminal && t.to_step_id == join_step_id);
                if !has_edge_to_join {
                    result.push_warning(
                        "MISSING_BRANCH_JOIN_EDGE",
                        format!(
                            "branch '{}' terminal step '{terminal}' has no transition to join '{join_step_id}'",
                            branch.branch_id
                        ),
                    );
                }
            }
        }
    }
}

/// Walks forward from `start` within a branch (stopping before re-entering
/// the join) and returns the step ids that have no outgoing transition of
/// their own -- the branch's interior terminal points.
/// Exposed for the storage/admin save path, which auto-inserts the
/// missing branch-to-join edges this function's callers only warn about.
pub fn branch_terminal_steps<'a>(definition: &'a WorkflowDefinition, start: &'a str, join_step_id: &str) -> Vec<&'a str> {
    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    let mut terminals = Vec::new();
    queue.push_back(start);
    visited.insert(start);

    while let Some(current) = queue.pop_front() {
        let outgoing: Vec<_> = definition
            .transitions
            .iter()
            .filter(|t| t.from_step_id == current && t.to_step_id != join_step_id)
            .collect();

        if outgoing.is_empty() {
            terminals.push(current);
            continue;
        }

        for transition in outgoing {
            if visited.insert(transition.to_step_id.as_str()) {
                queue.push_back(transition.to_step_id.as_str());
            }
        }
    }

    terminals
}
