//! `EngineOutcome`: everything one `apply_event`-family call produced, for
//! a caller (e.g. an HTTP layer) that wants to see the full blast radius
//! of a single logical transaction without re-fetching each piece.

use ticketflow_core::{AuditEvent, Ticket, TicketStep};
use ticketflow_outbox::NotificationOutbox;

#[derive(Debug, Clone, Default)]
pub struct EngineOutcome {
    pub ticket: Option<Ticket>,
    pub touched_steps: Vec<TicketStep>,
    pub notifications: Vec<NotificationOutbox>,
    pub audit_events: Vec<AuditEvent>,
}

impl EngineOutcome {
    pub fn new(ticket: Ticket) -> Self {
        Self {
            ticket: Some(ticket),
            touched_steps: Vec::new(),
            notifications: Vec::new(),
            audit_events: Vec::new(),
        }
    }
}
