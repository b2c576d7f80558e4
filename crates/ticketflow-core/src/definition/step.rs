//! Step definitions.
//!
//! `StepDef` is a `#[serde(tag = "step_type")]` enum with one variant per
//! `StepType`, each carrying only the attributes that type needs, rather
//! than a single struct with a pile of type-specific optional fields.

use serde::{Deserialize, Serialize};

use super::condition::ConditionGroup;
use super::enums::{ApproverResolution, FailurePolicy, JoinMode};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    Text,
    Textarea,
    Number,
    Date,
    Select,
    MultiSelect,
    Checkbox,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DateRestriction {
    pub allow_past: bool,
    pub allow_today: bool,
    pub allow_future: bool,
}

impl DateRestriction {
    pub fn is_degenerate(&self) -> bool {
        !self.allow_past && !self.allow_today && !self.allow_future
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldDef {
    pub field_key: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub date_restriction: Option<DateRestriction>,
    /// Field becomes required only when this condition evaluates true
    /// against the form values gathered so far.
    #[serde(default)]
    pub required_if: Option<ConditionGroup>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub regex: Option<String>,
}

impl FieldDef {
    pub fn new(field_key: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            field_key: field_key.into(),
            field_type,
            required: false,
            options: Vec::new(),
            date_restriction: None,
            required_if: None,
            min_length: None,
            max_length: None,
            regex: None,
        }
    }
}

/// A repeating group of fields, e.g. "line items".
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SectionDef {
    pub section_key: String,
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub min_rows: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionalApproverRule {
    pub condition: ConditionGroup,
    pub approver_email: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParallelApprovalMode {
    All,
    Any,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BranchDef {
    pub branch_id: String,
    pub branch_name: String,
    pub start_step_id: String,
}

/// Shared attributes every step definition carries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepCommon {
    pub step_id: String,
    pub step_name: String,
    #[serde(default)]
    pub is_start: bool,
    #[serde(default)]
    pub is_terminal: bool,
    pub order: u32,
    /// Minutes from activation until this step's `due_at`. `None` means
    /// no SLA tracking: the scheduler's reminder/escalation sweeps skip
    /// steps with no `due_at` set.
    #[serde(default)]
    pub sla_due_minutes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormStepDef {
    #[serde(flatten)]
    pub common: StepCommon,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub sections: Vec<SectionDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalStepDef {
    #[serde(flatten)]
    pub common: StepCommon,
    pub approver_resolution: ApproverResolution,
    #[serde(default)]
    pub specific_approver_email: Option<String>,
    #[serde(default)]
    pub conditional_approver_rules: Vec<ConditionalApproverRule>,
    #[serde(default)]
    pub conditional_fallback_approver: Option<String>,
    #[serde(default)]
    pub step_assignee_step_id: Option<String>,
    #[serde(default)]
    pub parallel_approval: Option<ParallelApprovalMode>,
    #[serde(default)]
    pub parallel_approvers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskStepDef {
    #[serde(flatten)]
    pub common: StepCommon,
    #[serde(default)]
    pub instructions: String,
    #[serde(default = "default_true")]
    pub execution_notes_required: bool,
    #[serde(default)]
    pub output_fields: Vec<FieldDef>,
    #[serde(default)]
    pub linked_repeating_source: Option<LinkedRepeatingSource>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkedRepeatingSource {
    pub step_id: String,
    pub section_key: String,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotifyRecipient {
    Requester,
    Approvers,
    AssignedAgent,
    Manager,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RecipientSpec {
    Symbolic(NotifyRecipient),
    Email(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotifyStepDef {
    #[serde(flatten)]
    pub common: StepCommon,
    pub notification_template: String,
    #[serde(default)]
    pub recipients: Vec<RecipientSpec>,
    #[serde(default = "default_true")]
    pub auto_advance: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForkStepDef {
    #[serde(flatten)]
    pub common: StepCommon,
    pub branches: Vec<BranchDef>,
    pub failure_policy: FailurePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinStepDef {
    #[serde(flatten)]
    pub common: StepCommon,
    pub join_mode: JoinMode,
    pub source_fork_step_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubWorkflowStepDef {
    #[serde(flatten)]
    pub common: StepCommon,
    pub sub_workflow_id: String,
    pub sub_workflow_version: i32,
    #[serde(default)]
    pub sub_workflow_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "step_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepDef {
    FormStep(FormStepDef),
    ApprovalStep(ApprovalStepDef),
    TaskStep(TaskStepDef),
    NotifyStep(NotifyStepDef),
    ForkStep(ForkStepDef),
    JoinStep(JoinStepDef),
    SubWorkflowStep(SubWorkflowStepDef),
}

impl StepDef {
    pub fn common(&self) -> &StepCommon {
        match self {
            Self::FormStep(s) => &s.common,
            Self::ApprovalStep(s) => &s.common,
            Self::TaskStep(s) => &s.common,
            Self::NotifyStep(s) => &s.common,
            Self::ForkStep(s) => &s.common,
            Self::JoinStep(s) => &s.common,
            Self::SubWorkflowStep(s) => &s.common,
        }
    }

    pub fn step_id(&self) -> &str {
        &self.common().step_id
    }

    pub fn is_start(&self) -> bool {
        self.common().is_start
    }

    pub fn is_terminal(&self) -> bool {
        self.common().is_terminal
    }

    pub fn step_type(&self) -> super::enums::StepType {
        use super::enums::StepType;
        match self {
            Self::FormStep(_) => StepType::FormStep,
            Self::ApprovalStep(_) => StepType::ApprovalStep,
            Self::TaskStep(_) => StepType::TaskStep,
            Self::NotifyStep(_) => StepType::NotifyStep,
            Self::ForkStep(_) => StepType::ForkStep,
            Self::JoinStep(_) => StepType::JoinStep,
            Self::SubWorkflowStep(_) => StepType::SubWorkflowStep,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_type_round_trips_through_tagged_enum() {
        let step = StepDef::TaskStep(TaskStepDef {
            common: StepCommon {
                step_id: "s1".into(),
                step_name: "Do thing".into(),
                is_start: false,
                is_terminal: false,
                order: 1,
                sla_due_minutes: None,
            },
            instructions: "do it".into(),
            execution_notes_required: true,
            output_fields: vec![],
            linked_repeating_source: None,
        });

        let json = serde_json::to_string(&step).unwrap();
        assert!(json.contains("\"step_type\":\"TASK_STEP\""));

        let parsed: StepDef = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.step_id(), "s1");
        assert_eq!(parsed.step_type(), super::super::enums::StepType::TaskStep);
    }

    #[test]
    fn date_restriction_all_false_is_degenerate() {
        let restriction = DateRestriction {
            allow_past: false,
            allow_today: false,
            allow_future: false,
        };
        assert!(restriction.is_degenerate());

        let restriction = DateRestriction {
            allow_today: true,
            ..restriction
        };
        assert!(!restriction.is_degenerate());
    }
}
