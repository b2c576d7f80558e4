//! `SchedulerError`: one typed error enum for the scheduler crate
//! boundary (SPEC_FULL.md 2.1 "one enum per subsystem, not one global
//! error type"), matching `durable::worker::WorkerPoolError`'s shape.

use ticketflow_outbox::OutboxError;
use ticketflow_storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("outbox error: {0}")]
    Outbox(#[from] OutboxError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
