//! `NotificationOutbox`: a durable queue entry (spec.md 3, component G).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ticketflow_core::definition::NotificationStatus;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationOutbox {
    pub notification_id: String,
    pub template_key: String,
    pub recipients: Vec<String>,
    #[serde(default)]
    pub payload: Value,
    pub ticket_id: String,
    pub status: NotificationStatus,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub locked_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub locked_by: Option<String>,
    #[serde(default)]
    pub lock_acquired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
}

impl NotificationOutbox {
    pub fn new(
        notification_id: impl Into<String>,
        template_key: impl Into<String>,
        recipients: Vec<String>,
        payload: Value,
        ticket_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            notification_id: notification_id.into(),
            template_key: template_key.into(),
            recipients,
            payload,
            ticket_id: ticket_id.into(),
            status: NotificationStatus::Pending,
            retry_count: 0,
            last_error: None,
            next_retry_at: None,
            locked_until: None,
            locked_by: None,
            lock_acquired_at: None,
            created_at,
            sent_at: None,
        }
    }

    /// A `PENDING` entry whose lease is absent or expired is eligible for
    /// `fetch_pending` (spec.md 4.4).
    pub fn is_lease_free(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_none_or(|until| until <= now)
    }

    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == NotificationStatus::Pending
            && self.next_retry_at.is_none_or(|at| at <= now)
            && self.is_lease_free(now)
    }

    pub fn is_retry_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == NotificationStatus::Pending
            && self.retry_count > 0
            && self.next_retry_at.is_some_and(|at| at <= now)
            && self.is_lease_free(now)
    }
}
