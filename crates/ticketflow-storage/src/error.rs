//! Storage-layer error taxonomy. Kept separate from `ticketflow_core::EngineError`
//! so repository implementations don't need to know how the engine maps a
//! missing record onto the caller-facing taxonomy -- the engine does that
//! translation at its boundary (see `ticketflow-engine/src/error.rs`).

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Optimistic concurrency conflict: the caller's `expected_version`
    /// did not match the record's current version.
    #[error("concurrency conflict on {kind} {id}: expected version {expected}, found {actual}")]
    Concurrency {
        kind: &'static str,
        id: String,
        expected: i64,
        actual: i64,
    },

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }
}
