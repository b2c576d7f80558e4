//! NOTIFY_STEP recipient resolution (spec.md 4.2, "Activation of a
//! successor step", NOTIFY_STEP): turns a step's configured `recipients`
//! list -- a mix of symbolic roles and literal emails -- into a
//! deduplicated set of addresses.

use ticketflow_core::definition::{NotifyRecipient, RecipientSpec};
use ticketflow_core::{Ticket, UserSnapshot};
use ticketflow_storage::DirectoryAdapter;

/// `resolved_approvers` and `assigned_agent` reflect whichever upstream
/// step this NOTIFY_STEP follows; both are `&[]`/`None` when not
/// applicable, in which case the corresponding symbolic recipient simply
/// contributes nothing.
pub async fn resolve_recipients(
    recipients: &[RecipientSpec],
    ticket: &Ticket,
    resolved_approvers: &[UserSnapshot],
    assigned_agent: Option<&UserSnapshot>,
    directory: &dyn DirectoryAdapter,
) -> Vec<String> {
    let mut emails = Vec::new();

    for spec in recipients {
        match spec {
            RecipientSpec::Email(email) => emails.push(email.clone()),
            RecipientSpec::Symbolic(NotifyRecipient::Requester) => emails.push(ticket.requester.email.clone()),
            RecipientSpec::Symbolic(NotifyRecipient::Approvers) => {
                emails.extend(resolved_approvers.iter().map(|a| a.email.clone()));
            }
            RecipientSpec::Symbolic(NotifyRecipient::AssignedAgent) => {
                if let Some(agent) = assigned_agent {
                    emails.push(agent.email.clone());
                }
            }
            RecipientSpec::Symbolic(NotifyRecipient::Manager) => {
                if let Some(manager) = directory.get_manager(&ticket.requester.email).await {
                    emails.push(manager.email);
                }
            }
        }
    }

    emails.sort();
    emails.dedup();
    emails
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use ticketflow_core::definition::TicketStatus;
    use ticketflow_storage::InMemoryDirectoryAdapter;

    fn ticket() -> Ticket {
        Ticket {
            ticket_id: "TKT-1".into(),
            workflow_id: "WF-1".into(),
            workflow_version_number: 1,
            title: "t".into(),
            description: String::new(),
            status: TicketStatus::Open,
            requester: UserSnapshot::resolved("u1", "alice@example.com", "Alice"),
            manager_snapshot: UserSnapshot::resolved("u2", "boss@example.com", "Bob"),
            form_values: HashMap::new(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            version: 1,
        }
    }

    #[tokio::test]
    async fn symbolic_and_literal_recipients_resolve_and_dedupe() {
        let dir = InMemoryDirectoryAdapter::new();
        let recipients = vec![
            RecipientSpec::Symbolic(NotifyRecipient::Requester),
            RecipientSpec::Email("alice@example.com".into()),
            RecipientSpec::Symbolic(NotifyRecipient::AssignedAgent),
        ];
        let agent = UserSnapshot::resolved("u3", "agent@example.com", "Agent");
        let resolved = resolve_recipients(&recipients, &ticket(), &[], Some(&agent), &dir).await;
        assert_eq!(resolved, vec!["agent@example.com".to_string(), "alice@example.com".to_string()]);
    }

    #[tokio::test]
    async fn manager_recipient_falls_back_to_unresolved_on_directory_miss() {
        let dir = InMemoryDirectoryAdapter::new();
        let recipients = vec![RecipientSpec::Symbolic(NotifyRecipient::Manager)];
        let resolved = resolve_recipients(&recipients, &ticket(), &[], None, &dir).await;
        assert_eq!(resolved.len(), 1);
        assert!(resolved[0].starts_with("manager-of-"));
    }
}
