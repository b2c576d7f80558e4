//! The transition engine (component E, spec.md 4.2) and sub-workflow
//! handler (component F, spec.md 4.3): the only surface through which a
//! ticket's state changes. `TicketEngine` owns every user-triggered
//! mutation; `WorkflowAdminService` owns workflow authoring
//! (save_draft/publish, spec.md 6.1).

pub mod activation;
pub mod admin;
pub mod approver;
pub mod engine;
pub mod error;
pub mod notify;
pub mod outcome;
pub mod selection;
pub mod sub_workflow;

pub use admin::WorkflowAdminService;
pub use engine::TicketEngine;
pub use error::{from_outbox_error, from_store_error};
pub use outcome::EngineOutcome;
pub use sub_workflow::SubWorkflowOutcome;
