//! Successor selection (spec.md 4.2 "Successor selection"): given a step
//! that just completed and the event that completed it, pick the single
//! transition the engine advances along.

use ticketflow_core::definition::{FormValues, StepType, TransitionDef, TransitionEvent, WorkflowDefinition};
use ticketflow_core::EngineError;

/// `NOTIFY_STEP`, `FORK_STEP`, and `SUB_WORKFLOW_STEP` advance
/// structurally rather than in response to an external event (none of
/// them appear in `StepType::legal_source_events`), so their outgoing
/// transitions are not filtered by `on_event`.
fn event_filters_by_type(step_type: StepType) -> bool {
    !step_type.legal_source_events().is_empty()
}

/// Select the single successor transition leaving `step_id`, or `None`
/// if the step is terminal and has none. Errors if a non-terminal step
/// has no eligible successor, or if more than one successor ties for
/// top priority (a malformed definition the validator should have
/// caught).
pub fn select_successor<'a>(
    definition: &'a WorkflowDefinition,
    step_id: &str,
    source_type: StepType,
    event: TransitionEvent,
    form_values: &FormValues,
    is_terminal: bool,
) -> Result<Option<&'a TransitionDef>, EngineError> {
    let filter_by_event = event_filters_by_type(source_type);

    let mut candidates: Vec<&TransitionDef> = definition
        .transitions
        .iter()
        .filter(|t| t.from_step_id == step_id)
        .filter(|t| !filter_by_event || t.on_event == event)
        .filter(|t| t.condition.as_ref().is_none_or(|c| c.evaluate(form_values)))
        .collect();

    if candidates.is_empty() {
        return if is_terminal {
            Ok(None)
        } else {
            Err(EngineError::engine(format!("no eligible successor transition from step '{step_id}'")))
        };
    }

    candidates.sort_by(|a, b| b.priority.cmp(&a.priority));

    if candidates.len() > 1 && candidates[0].priority == candidates[1].priority {
        return Err(EngineError::engine(format!(
            "ambiguous successor transitions from step '{step_id}': '{}' and '{}' tie at priority {}",
            candidates[0].transition_id,
            candidates[1].transition_id,
            candidates[0].priority
        )));
    }

    Ok(Some(candidates[0]))
}
