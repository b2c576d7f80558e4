//! `Ticket`: a live instance of a published workflow version.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::definition::TicketStatus;
use crate::user::UserSnapshot;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ticket {
    pub ticket_id: String,
    pub workflow_id: String,
    pub workflow_version_number: i32,
    pub title: String,
    pub description: String,
    pub status: TicketStatus,
    pub requester: UserSnapshot,
    /// Resolved at creation time; may be `UserSnapshot::unresolved` if the
    /// directory lookup for the requester's manager failed.
    pub manager_snapshot: UserSnapshot,
    #[serde(default)]
    pub form_values: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl Ticket {
    pub fn is_open(&self) -> bool {
        self.status == TicketStatus::Open || self.status == TicketStatus::OnHold
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_open()
    }

    /// Merge newly submitted field values into the shared form-value map,
    /// overwriting any keys the new values repeat.
    pub fn merge_form_values(&mut self, new_values: HashMap<String, Value>) {
        self.form_values.extend(new_values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> UserSnapshot {
        UserSnapshot::resolved("u1", "a@example.com", "Alice")
    }

    fn ticket(status: TicketStatus) -> Ticket {
        Ticket {
            ticket_id: "TKT-1".into(),
            workflow_id: "WF-1".into(),
            workflow_version_number: 1,
            title: "Laptop request".into(),
            description: String::new(),
            status,
            requester: snapshot(),
            manager_snapshot: snapshot(),
            form_values: HashMap::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            version: 1,
        }
    }

    #[test]
    fn open_and_on_hold_are_not_terminal() {
        assert!(ticket(TicketStatus::Open).is_open());
        assert!(ticket(TicketStatus::OnHold).is_open());
        assert!(!ticket(TicketStatus::Completed).is_open());
        assert!(ticket(TicketStatus::Rejected).is_terminal());
    }

    #[test]
    fn merge_form_values_overwrites_repeated_keys() {
        let mut t = ticket(TicketStatus::Open);
        t.form_values.insert("amount".into(), serde_json::json!(10));
        t.merge_form_values(HashMap::from([("amount".to_string(), serde_json::json!(20))]));
        assert_eq!(t.form_values["amount"], serde_json::json!(20));
    }
}
