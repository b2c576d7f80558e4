//! `TransitionDef`: a definition-time edge whose activation is gated by an
//! event and an optional condition.

use serde::{Deserialize, Serialize};

use super::condition::ConditionGroup;
use super::enums::TransitionEvent;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionDef {
    pub transition_id: String,
    pub from_step_id: String,
    pub to_step_id: String,
    pub on_event: TransitionEvent,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub condition: Option<ConditionGroup>,
}

impl TransitionDef {
    pub fn new(
        transition_id: impl Into<String>,
        from_step_id: impl Into<String>,
        to_step_id: impl Into<String>,
        on_event: TransitionEvent,
    ) -> Self {
        Self {
            transition_id: transition_id.into(),
            from_step_id: from_step_id.into(),
            to_step_id: to_step_id.into(),
            on_event,
            priority: 0,
            condition: None,
        }
    }

    pub fn with_condition(mut self, condition: ConditionGroup) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}
