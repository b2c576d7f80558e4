//! Enumerations shared by the static definition and the runtime model.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    FormStep,
    ApprovalStep,
    TaskStep,
    NotifyStep,
    ForkStep,
    JoinStep,
    SubWorkflowStep,
}

impl StepType {
    /// The events this step type's outgoing transitions may legally carry.
    /// NOTIFY_STEP advances automatically and FORK_STEP uses implicit
    /// branch activation, so neither has an explicit transition event of
    /// its own.
    pub fn legal_source_events(self) -> &'static [TransitionEvent] {
        match self {
            Self::FormStep => &[TransitionEvent::SubmitForm],
            Self::ApprovalStep => &[TransitionEvent::Approve, TransitionEvent::Reject],
            Self::TaskStep => &[TransitionEvent::CompleteTask],
            Self::JoinStep => &[TransitionEvent::JoinComplete],
            Self::NotifyStep | Self::ForkStep | Self::SubWorkflowStep => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionEvent {
    SubmitForm,
    Approve,
    Reject,
    CompleteTask,
    RespondInfo,
    ForkActivated,
    BranchCompleted,
    JoinComplete,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApproverResolution {
    RequesterManager,
    SpecificEmail,
    SpocEmail,
    Conditional,
    StepAssignee,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailurePolicy {
    FailAll,
    ContinueOthers,
    CancelOthers,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JoinMode {
    All,
    Any,
    Majority,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkflowStatus {
    Draft,
    Published,
    Archived,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TicketStatus {
    Open,
    Completed,
    Rejected,
    Cancelled,
    OnHold,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepState {
    NotStarted,
    Active,
    WaitingForApproval,
    WaitingAssignment,
    Completed,
    Rejected,
    Skipped,
    Cancelled,
    OnHold,
}

impl StepState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Rejected | Self::Skipped | Self::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InfoRequestStatus {
    Open,
    Responded,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
}
