//! Maps storage- and outbox-layer errors onto `ticketflow_core::EngineError`
//! (spec.md 7). Kept as free functions rather than `From` impls since
//! orphan rules forbid implementing a foreign trait for a foreign type
//! from this crate -- the same reason `durable::engine::executor` wraps
//! `StoreError`/`RegistryError` with `#[from]` only where it owns one side.

use ticketflow_core::EngineError;
use ticketflow_outbox::OutboxError;
use ticketflow_storage::StoreError;

pub fn from_store_error(err: StoreError) -> EngineError {
    match err {
        StoreError::NotFound { kind, id } => EngineError::not_found(kind, id),
        StoreError::Concurrency { kind, id, .. } => EngineError::Concurrency {
            subject: format!("{kind}:{id}"),
        },
        StoreError::Database(msg) | StoreError::Serialization(msg) => EngineError::ExternalService(msg),
    }
}

pub fn from_outbox_error(err: OutboxError) -> EngineError {
    EngineError::ExternalService(err.to_string())
}
