//! `AuditEvent`: an append-only record of one engine-observable action.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::actor::Actor;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    TicketCreated,
    FormSubmitted,
    StepApproved,
    StepRejected,
    TaskCompleted,
    InfoRequested,
    InfoResponded,
    AgentAssigned,
    AgentReassigned,
    StepSkipped,
    ForkActivated,
    BranchCompleted,
    JoinCompleted,
    SubWorkflowExpanded,
    SubWorkflowCompleted,
    TicketCompleted,
    TicketRejected,
    TicketCancelled,
    TicketOnHold,
    SlaReminderRaised,
    SlaEscalationRaised,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEvent {
    pub audit_event_id: String,
    pub ticket_id: String,
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    pub event_type: AuditEventType,
    #[serde(default)]
    pub details: Value,
    pub correlation_id: String,
}

impl AuditEvent {
    pub fn new(
        ticket_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        actor: Actor,
        event_type: AuditEventType,
        details: Value,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            audit_event_id: crate::ids::generate_audit_event_id(),
            ticket_id: ticket_id.into(),
            timestamp,
            actor,
            event_type,
            details,
            correlation_id: correlation_id.into(),
        }
    }
}
