//! The static workflow definition: steps, transitions, and the conditions
//! that gate them.

pub mod condition;
pub mod enums;
pub mod step;
pub mod transition;
pub mod workflow;

pub use condition::{Condition, ConditionGroup, FormValues, LogicOp, Operator};
pub use enums::{
    ApproverResolution, FailurePolicy, InfoRequestStatus, JoinMode, NotificationStatus, StepState,
    StepType, TicketStatus, TransitionEvent, WorkflowStatus,
};
pub use step::{
    ApprovalStepDef, BranchDef, ConditionalApproverRule, DateRestriction, FieldDef, FieldType,
    ForkStepDef, FormStepDef, JoinStepDef, LinkedRepeatingSource, NotifyRecipient, NotifyStepDef,
    ParallelApprovalMode, RecipientSpec, SectionDef, StepCommon, StepDef, SubWorkflowStepDef,
    TaskStepDef,
};
pub use transition::TransitionDef;
pub use workflow::WorkflowDefinition;
