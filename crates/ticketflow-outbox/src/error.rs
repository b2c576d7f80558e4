//! Outbox-layer error taxonomy, mirroring `ticketflow_storage::StoreError`'s
//! split between "not found" and "concurrency" but scoped to notification
//! records plus the render/send failure paths (spec.md 6.4, §7
//! ExternalService).

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum OutboxError {
    #[error("notification not found: {0}")]
    NotFound(String),

    #[error("lease not held: {notification_id} is not leased by {leaseholder_id}")]
    LeaseNotHeld { notification_id: String, leaseholder_id: String },

    #[error("template not found: {0}")]
    UnknownTemplate(String),

    #[error("render error: {0}")]
    Render(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("database error: {0}")]
    Database(String),
}
