//! The engine error taxonomy.
//!
//! Each variant carries a stable machine-readable code (`code()`) for
//! callers that need to branch on error kind without string matching.

use serde::{Deserialize, Serialize};

/// One structural error produced by workflow-definition validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DefinitionError {
    pub error_type: String,
    pub message: String,
    pub path: Option<String>,
}

impl DefinitionError {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
            path: None,
        }
    }

    pub fn at(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Authentication failures are intentionally absent here: those are
/// raised by the collaborator layer in front of the engine, never by the
/// engine itself.
#[derive(Debug, thiserror::Error, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum EngineError {
    /// Actor cannot perform this action on this ticket/step.
    #[error("actor {actor_email} is not authorized to {action} on {subject}")]
    Authorization {
        actor_email: String,
        action: String,
        subject: String,
    },

    /// Input schema, conditional requirements, or workflow-definition
    /// validation failed.
    #[error("validation failed: {errors:?}")]
    Validation { errors: Vec<DefinitionError> },

    /// Ticket/step/workflow/version/info-request/attachment absent.
    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    /// Step state does not admit this event; ticket is not OPEN; info
    /// request already open.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Optimistic version conflict after the retry budget (3) was
    /// exhausted.
    #[error("concurrency conflict on {subject} after exhausting retries")]
    Concurrency { subject: String },

    /// No matching transition; ambiguous successors; approver could not be
    /// resolved; sub-workflow version missing.
    #[error("engine error: {0}")]
    Engine(String),

    /// Directory or notification transport failed, surfaced only when the
    /// caller's feature truly cannot proceed without it (e.g. manager
    /// approval with an unresolved manager -- notification-send failures
    /// never reach here, they flow through the outbox retry path).
    #[error("external service error: {0}")]
    ExternalService(String),
}

impl EngineError {
    /// Stable machine-readable code for the caller, independent of the
    /// human-readable `Display` message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Authorization { .. } => "AUTHORIZATION",
            Self::Validation { .. } => "VALIDATION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::Concurrency { .. } => "CONCURRENCY",
            Self::Engine(_) => "ENGINE_ERROR",
            Self::ExternalService(_) => "EXTERNAL_SERVICE",
        }
    }

    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn authorization(actor_email: impl Into<String>, action: impl Into<String>, subject: impl Into<String>) -> Self {
        Self::Authorization {
            actor_email: actor_email.into(),
            action: action.into(),
            subject: subject.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine(message.into())
    }
}
