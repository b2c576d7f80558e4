//! SLA reminder and escalation sweeps (spec.md 4.5). Dedup uses the
//! **persisted** `last_reminder_at`/`last_escalation_at` markers on
//! `TicketStep` (SPEC_FULL.md 4.5, DESIGN NOTES §9 second Open Question),
//! written back through the same version-CAS `update_step` the engine
//! uses -- never an in-memory per-instance map, so a reminder raised by
//! one scheduler instance is visible to every other instance's next
//! sweep.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use ticketflow_core::{ids, Actor, AuditEvent, AuditEventType};
use ticketflow_outbox::{NotificationOutbox, OutboxRepository};
use ticketflow_storage::{AuditRepository, TicketRepository};
use tracing::{instrument, warn};

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;

pub struct SlaSweeper {
    tickets: Arc<dyn TicketRepository>,
    outbox: Arc<dyn OutboxRepository>,
    audit: Arc<dyn AuditRepository>,
    config: SchedulerConfig,
}

impl SlaSweeper {
    pub fn new(tickets: Arc<dyn TicketRepository>, outbox: Arc<dyn OutboxRepository>, audit: Arc<dyn AuditRepository>, config: SchedulerConfig) -> Self {
        Self { tickets, outbox, audit, config }
    }

    /// Steps with `due_at` within the next `reminder_lookahead`, not
    /// reminded in the last `reminder_cooldown`.
    #[instrument(skip(self))]
    pub async fn reminder_sweep(&self, now: DateTime<Utc>) -> Result<usize, SchedulerError> {
        let horizon = now + chrono::Duration::from_std(self.config.reminder_lookahead).unwrap_or_default();
        let candidates = self.tickets.list_active_steps_due_before(horizon).await?;

        let mut raised = 0;
        for step in candidates {
            let due_soon = step.due_at.is_some_and(|due| due >= now);
            if !due_soon {
                continue;
            }
            let cooldown_elapsed = step.last_reminder_at.is_none_or(|last| now - last >= chrono::Duration::from_std(self.config.reminder_cooldown).unwrap_or_default());
            if !cooldown_elapsed {
                continue;
            }

            let entry = NotificationOutbox::new(
                ids::generate_notification_id(),
                "SLA_REMINDER",
                assignee_recipients(&step),
                json!({
                    "ticket_id": step.ticket_id,
                    "step_name": step.step_name,
                    "due_at": step.due_at,
                }),
                step.ticket_id.clone(),
                now,
            );
            if let Err(err) = self.outbox.create_many(vec![entry]).await {
                warn!(ticket_step_id = %step.ticket_step_id, error = %err, "failed to enqueue SLA reminder");
                continue;
            }

            let ticket_step_id = step.ticket_step_id.clone();
            let ticket_id = step.ticket_id.clone();
            if let Err(err) = self.tickets.update_step(&ticket_step_id, step.version, Box::new(move |mut s| {
                s.last_reminder_at = Some(now);
                s
            })).await {
                warn!(ticket_step_id = %ticket_step_id, error = %err, "failed to persist reminder marker");
                continue;
            }

            let _ = self
                .audit
                .append(AuditEvent::new(ticket_id, now, Actor::system(), AuditEventType::SlaReminderRaised, json!({ "ticket_step_id": ticket_step_id }), ids::generate_correlation_id()))
                .await;
            raised += 1;
        }
        Ok(raised)
    }

    /// Steps with `due_at` strictly in the past, not escalated in the
    /// last `escalation_cooldown`.
    #[instrument(skip(self))]
    pub async fn escalation_sweep(&self, now: DateTime<Utc>) -> Result<usize, SchedulerError> {
        let candidates = self.tickets.list_active_steps_overdue(now).await?;

        let mut raised = 0;
        for step in candidates {
            let cooldown_elapsed = step.last_escalation_at.is_none_or(|last| now - last >= chrono::Duration::from_std(self.config.escalation_cooldown).unwrap_or_default());
            if !cooldown_elapsed {
                continue;
            }

            let escalation_target = step.assigned_to.as_ref().map(|u| u.email.clone()).unwrap_or_else(|| "unassigned".to_string());
            let entry = NotificationOutbox::new(
                ids::generate_notification_id(),
                "SLA_ESCALATION",
                assignee_recipients(&step),
                json!({
                    "ticket_id": step.ticket_id,
                    "step_name": step.step_name,
                    "escalation_target": escalation_target,
                }),
                step.ticket_id.clone(),
                now,
            );
            if let Err(err) = self.outbox.create_many(vec![entry]).await {
                warn!(ticket_step_id = %step.ticket_step_id, error = %err, "failed to enqueue SLA escalation");
                continue;
            }

            let ticket_step_id = step.ticket_step_id.clone();
            let ticket_id = step.ticket_id.clone();
            if let Err(err) = self.tickets.update_step(&ticket_step_id, step.version, Box::new(move |mut s| {
                s.last_escalation_at = Some(now);
                s
            })).await {
                warn!(ticket_step_id = %ticket_step_id, error = %err, "failed to persist escalation marker");
                continue;
            }

            let _ = self
                .audit
                .append(AuditEvent::new(ticket_id, now, Actor::system(), AuditEventType::SlaEscalationRaised, json!({ "ticket_step_id": ticket_step_id }), ids::generate_correlation_id()))
                .await;
            raised += 1;
        }
        Ok(raised)
    }
}

/// Recipients for an SLA notification: the assignee if one is set,
/// otherwise the manager symbolic role can't be resolved here (the
/// sweeper has no directory adapter), so fall back to the requester is
/// left to the notify-step recipient model; SLA notifications address
/// whoever currently owns the step.
fn assignee_recipients(step: &ticketflow_core::TicketStep) -> Vec<String> {
    step.assigned_to.as_ref().map(|u| vec![u.email.clone()]).unwrap_or_default()
}
