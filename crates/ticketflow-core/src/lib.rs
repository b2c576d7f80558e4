//! Shared domain types for the ticket workflow engine: the static
//! workflow definition, live ticket/step records, satellite entities, the
//! actor/request-context pair, id generation, and the error taxonomy.

pub mod actor;
pub mod audit;
pub mod context;
pub mod definition;
pub mod error;
pub mod ids;
pub mod satellite;
pub mod ticket;
pub mod ticket_step;
pub mod user;
pub mod workflow_template;

pub use actor::Actor;
pub use audit::{AuditEvent, AuditEventType};
pub use context::RequestContext;
pub use error::{DefinitionError, EngineError};
pub use ids::{Clock, SystemClock};
pub use satellite::{ApprovalDecisionValue, ApprovalTask, Assignment, InfoRequest};
pub use ticket::Ticket;
pub use ticket_step::{ApprovalDecision, StepRuntimeData, TicketStep};
pub use user::UserSnapshot;
pub use workflow_template::{WorkflowTemplate, WorkflowVersion};

/// Convenient single-import surface for crates consuming the domain model.
pub mod prelude {
    pub use crate::actor::Actor;
    pub use crate::audit::{AuditEvent, AuditEventType};
    pub use crate::context::RequestContext;
    pub use crate::definition::*;
    pub use crate::error::{DefinitionError, EngineError};
    pub use crate::ids::{self, Clock, SystemClock};
    pub use crate::satellite::{ApprovalDecisionValue, ApprovalTask, Assignment, InfoRequest};
    pub use crate::ticket::Ticket;
    pub use crate::ticket_step::{ApprovalDecision, StepRuntimeData, TicketStep};
    pub use crate::user::UserSnapshot;
    pub use crate::workflow_template::{WorkflowTemplate, WorkflowVersion};
}
