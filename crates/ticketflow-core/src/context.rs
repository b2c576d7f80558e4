//! `RequestContext`: the explicit correlation-id + actor pair threaded
//! through every engine call.

use crate::actor::Actor;

/// Carries the correlation id and acting identity through an engine call.
/// The logger decorates each emitted record with it via `tracing`
/// instrumentation fields rather than a thread-local.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: String,
    pub actor: Actor,
}

impl RequestContext {
    pub fn new(correlation_id: impl Into<String>, actor: Actor) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            actor,
        }
    }

    /// Build a context with a freshly generated correlation id.
    pub fn generate(actor: Actor) -> Self {
        Self::new(crate::ids::generate_correlation_id(), actor)
    }
}
