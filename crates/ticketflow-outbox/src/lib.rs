//! Outbox pattern implementation (component G, spec.md 3, 4.4, 6.4):
//! `NotificationOutbox` records, the repository contract with its lease
//! semantics, template rendering, and the transport seam the scheduler
//! drives delivery through.

pub mod error;
pub mod model;
pub mod render;
pub mod repo;
pub mod transport;

pub use error::OutboxError;
pub use model::NotificationOutbox;
pub use render::{NotificationRenderer, RenderedNotification};
pub use repo::{backoff_delay, InMemoryOutboxRepository, OutboxRepository};
pub use transport::{LoggingTransport, NotificationTransport, SendOutcome};
