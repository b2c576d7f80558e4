//! Notification rendering (spec.md 4.4, 6.4): turns a `template_key` plus
//! a JSON payload into a recipient-facing subject/body pair, grounded on
//! `durable`'s report-templating use of `minijinja` (teacher crate:
//! `everruns/durable` pulls in `minijinja` for its own bench-report
//! rendering -- reused here for notification bodies instead).

use minijinja::{context, Environment};
use serde_json::Value;

use crate::error::OutboxError;

/// Subject/body pair ready to hand to a [`crate::transport::NotificationTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedNotification {
    pub subject: String,
    pub body: String,
}

/// Built-in template keys (spec.md 4.4 "NotificationOutbox.template_key").
/// A real deployment would load these from a directory or database; the
/// set below covers every event the engine enqueues a notification for.
const BUILTIN_TEMPLATES: &[(&str, &str, &str)] = &[
    ("TICKET_CREATED", "Ticket {{ ticket_id }} created", "A new ticket {{ ticket_id }} was created from template {{ template_name }}."),
    ("APPROVAL_PENDING", "Approval requested on {{ ticket_id }}", "Your approval is requested on ticket {{ ticket_id }}, step \"{{ step_name }}\"."),
    ("APPROVED", "{{ ticket_id }} approved", "Step \"{{ step_name }}\" on ticket {{ ticket_id }} was approved by {{ actor_name }}."),
    ("REJECTED", "{{ ticket_id }} rejected", "Step \"{{ step_name }}\" on ticket {{ ticket_id }} was rejected by {{ actor_name }}: {{ comment }}"),
    ("TASK_ASSIGNED", "Task assigned on {{ ticket_id }}", "You have been assigned task \"{{ step_name }}\" on ticket {{ ticket_id }}."),
    ("TASK_COMPLETED", "Task completed on {{ ticket_id }}", "Task \"{{ step_name }}\" on ticket {{ ticket_id }} was completed by {{ actor_name }}."),
    ("INFO_REQUESTED", "Information requested on {{ ticket_id }}", "{{ actor_name }} requested more information on ticket {{ ticket_id }}: {{ question }}"),
    ("INFO_RESPONDED", "Response received on {{ ticket_id }}", "{{ actor_name }} responded on ticket {{ ticket_id }}."),
    ("TICKET_COMPLETED", "{{ ticket_id }} completed", "Ticket {{ ticket_id }} reached its terminal state: {{ outcome }}."),
    ("TICKET_CANCELLED", "{{ ticket_id }} cancelled", "Ticket {{ ticket_id }} was cancelled by {{ actor_name }}: {{ reason }}"),
    ("SLA_REMINDER", "Reminder: {{ ticket_id }} awaiting action", "Step \"{{ step_name }}\" on ticket {{ ticket_id }} has been pending since {{ due_at }}."),
    ("SLA_ESCALATION", "Escalated: {{ ticket_id }} overdue", "Step \"{{ step_name }}\" on ticket {{ ticket_id }} has been escalated to {{ escalation_target }}."),
];

pub struct NotificationRenderer {
    env: Environment<'static>,
}

impl Default for NotificationRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();
        for (key, subject, body) in BUILTIN_TEMPLATES {
            env.add_template(Box::leak(format!("{key}.subject").into_boxed_str()), subject).expect("built-in subject template must parse");
            env.add_template(Box::leak(format!("{key}.body").into_boxed_str()), body).expect("built-in body template must parse");
        }
        Self { env }
    }

    pub fn render(&self, template_key: &str, payload: &Value) -> Result<RenderedNotification, OutboxError> {
        let ctx = context! { payload => payload, ..Self::flatten(payload) };

        let subject_name = format!("{template_key}.subject");
        let body_name = format!("{template_key}.body");

        let subject_tmpl = self.env.get_template(&subject_name).map_err(|_| OutboxError::UnknownTemplate(template_key.to_string()))?;
        let body_tmpl = self.env.get_template(&body_name).map_err(|_| OutboxError::UnknownTemplate(template_key.to_string()))?;

        let subject = subject_tmpl.render(&ctx).map_err(|e| OutboxError::Render(e.to_string()))?;
        let body = body_tmpl.render(&ctx).map_err(|e| OutboxError::Render(e.to_string()))?;

        Ok(RenderedNotification { subject, body })
    }

    /// Payload fields are exposed directly in template scope (`{{ ticket_id }}`)
    /// in addition to under `payload.*`, so templates can stay terse.
    fn flatten(payload: &Value) -> minijinja::value::Value {
        match payload {
            Value::Object(_) => minijinja::value::Value::from_serialize(payload),
            _ => minijinja::value::Value::from_serialize(&serde_json::json!({})),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_ticket_created_with_flattened_fields() {
        let renderer = NotificationRenderer::new();
        let payload = serde_json::json!({ "ticket_id": "TKT-1", "template_name": "Expense Approval" });
        let rendered = renderer.render("TICKET_CREATED", &payload).unwrap();
        assert_eq!(rendered.subject, "Ticket TKT-1 created");
        assert!(rendered.body.contains("Expense Approval"));
    }

    #[test]
    fn unknown_template_key_errors() {
        let renderer = NotificationRenderer::new();
        let err = renderer.render("NOT_A_TEMPLATE", &serde_json::json!({})).unwrap_err();
        assert_eq!(err, OutboxError::UnknownTemplate("NOT_A_TEMPLATE".to_string()));
    }

    #[test]
    fn rejection_template_surfaces_comment() {
        let renderer = NotificationRenderer::new();
        let payload = serde_json::json!({
            "ticket_id": "TKT-2",
            "step_name": "Manager approval",
            "actor_name": "Alice",
            "comment": "Missing receipts",
        });
        let rendered = renderer.render("REJECTED", &payload).unwrap();
        assert!(rendered.body.contains("Missing receipts"));
    }
}
