//! Delivery transport (spec.md 6.4 "Notification Channel"): the engine
//! and scheduler never talk to email/Slack/webhook APIs directly, only
//! through this trait, mirroring how `durable` keeps its executor
//! ignorant of the concrete backend behind `persistence::Store`.

use async_trait::async_trait;

use crate::render::RenderedNotification;

/// Outcome of a single delivery attempt. The scheduler maps `Transient`
/// onto `mark_failed` (retry with backoff) and `Permanent` onto an
/// immediate `FAILED` with no further retries (spec.md 4.4, 7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Transient(String),
    Permanent(String),
}

#[async_trait]
pub trait NotificationTransport: Send + Sync + 'static {
    async fn send(&self, recipients: &[String], rendered: &RenderedNotification) -> SendOutcome;
}

/// Reference transport for tests and local runs: logs at `info` and
/// always reports success. A production deployment swaps this for an
/// SMTP/Slack/webhook client behind the same trait.
#[derive(Default)]
pub struct LoggingTransport;

#[async_trait]
impl NotificationTransport for LoggingTransport {
    async fn send(&self, recipients: &[String], rendered: &RenderedNotification) -> SendOutcome {
        tracing::info!(
            recipients = ?recipients,
            subject = %rendered.subject,
            "notification delivered"
        );
        SendOutcome::Sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn logging_transport_always_succeeds() {
        let transport = LoggingTransport;
        let rendered = RenderedNotification { subject: "hi".into(), body: "body".into() };
        let outcome = transport.send(&["a@example.com".to_string()], &rendered).await;
        assert_eq!(outcome, SendOutcome::Sent);
    }
}
