//! The identity performing an engine call.

use serde::{Deserialize, Serialize};

use crate::context::RequestContext;

/// The identity performing an engine call, carrying email, external id,
/// display name, and role set (GLOSSARY: Actor).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub email: String,
    pub external_id: String,
    pub display_name: String,
    pub roles: Vec<String>,
}

impl Actor {
    pub fn new(email: impl Into<String>, external_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            external_id: external_id.into(),
            display_name: display_name.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// The acting identity for scheduler-raised actions (SLA sweeps,
    /// stale-lease cleanup) that have no human actor behind them.
    pub fn system() -> Self {
        Self::new("system@ticketflow.internal", "system", "System").with_roles(["system"])
    }

    /// Build the request context threaded through an engine call.
    pub fn into_context(self, correlation_id: impl Into<String>) -> RequestContext {
        RequestContext::new(correlation_id, self)
    }
}
