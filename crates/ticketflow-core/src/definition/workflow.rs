//! `WorkflowDefinition`: the graph of steps and transitions that a ticket
//! walks through.

use serde::{Deserialize, Serialize};

use super::enums::TransitionEvent;
use super::step::StepDef;
use super::transition::TransitionDef;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    pub steps: Vec<StepDef>,
    pub transitions: Vec<TransitionDef>,
    pub start_step_id: String,
}

impl WorkflowDefinition {
    pub fn step(&self, step_id: &str) -> Option<&StepDef> {
        self.steps.iter().find(|s| s.step_id() == step_id)
    }

    /// The effective start step: the explicit `is_start=true` step if one
    /// exists, otherwise the first step in definition order.
    pub fn effective_start_step_id(&self) -> Option<&str> {
        self.steps
            .iter()
            .find(|s| s.is_start())
            .or_else(|| self.steps.first())
            .map(|s| s.step_id())
    }

    /// Transitions leaving `step_id` whose `on_event` matches `event`,
    /// ordered by descending priority then definition order.
    pub fn outgoing(&self, step_id: &str, event: TransitionEvent) -> Vec<&TransitionDef> {
        let mut matches: Vec<&TransitionDef> = self
            .transitions
            .iter()
            .filter(|t| t.from_step_id == step_id && t.on_event == event)
            .collect();
        matches.sort_by(|a, b| b.priority.cmp(&a.priority));
        matches
    }

    pub fn fork_step(&self, fork_step_id: &str) -> Option<&super::step::ForkStepDef> {
        match self.step(fork_step_id) {
            Some(StepDef::ForkStep(f)) => Some(f),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::step::{StepCommon, TaskStepDef};

    fn common(step_id: &str, order: u32) -> StepCommon {
        StepCommon {
            step_id: step_id.to_string(),
            step_name: step_id.to_string(),
            is_start: false,
            is_terminal: false,
            order,
            sla_due_minutes: None,
        }
    }

    fn task(step_id: &str, order: u32) -> StepDef {
        StepDef::TaskStep(TaskStepDef {
            common: common(step_id, order),
            instructions: String::new(),
            execution_notes_required: false,
            output_fields: vec![],
            linked_repeating_source: None,
        })
    }

    #[test]
    fn effective_start_prefers_explicit_flag_else_first_step() {
        let def = WorkflowDefinition {
            steps: vec![task("a", 0), task("b", 1)],
            transitions: vec![],
            start_step_id: "a".into(),
        };
        assert_eq!(def.effective_start_step_id(), Some("a"));
    }

    #[test]
    fn outgoing_orders_by_priority_then_definition_order() {
        let def = WorkflowDefinition {
            steps: vec![task("a", 0), task("b", 1), task("c", 2)],
            transitions: vec![
                TransitionDef::new("t1", "a", "b", TransitionEvent::CompleteTask).with_priority(0),
                TransitionDef::new("t2", "a", "c", TransitionEvent::CompleteTask).with_priority(5),
            ],
            start_step_id: "a".into(),
        };
        let out = def.outgoing("a", TransitionEvent::CompleteTask);
        assert_eq!(out[0].to_step_id, "c");
        assert_eq!(out[1].to_step_id, "b");
    }
}
