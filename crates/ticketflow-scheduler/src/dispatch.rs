//! Outbox draining: the shared processing path behind `process_notifications`
//! and `retry_failed_notifications` (spec.md 4.5 table -- both rows name
//! "same processing path").
//!
//! For each fetched entry: attempt `acquire_lease`; on success render and
//! send; `mark_sent`/`mark_failed` on the outcome; always `release_lease`
//! in a guaranteed-exit path, matching `durable::worker::pool`'s
//! semaphore-permit-via-RAII pattern generalized to an explicit release
//! instead of a `Drop` guard (the outbox lease lives in the store, not in
//! process memory, so there is nothing a `Drop` impl could release).

use std::sync::Arc;
use std::time::Duration;

use ticketflow_outbox::{NotificationOutbox, NotificationRenderer, NotificationTransport, OutboxRepository, SendOutcome};
use tracing::{instrument, warn};

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;

pub struct Dispatcher {
    outbox: Arc<dyn OutboxRepository>,
    renderer: Arc<NotificationRenderer>,
    transport: Arc<dyn NotificationTransport>,
    leaseholder_id: String,
    config: SchedulerConfig,
}

impl Dispatcher {
    pub fn new(
        outbox: Arc<dyn OutboxRepository>,
        renderer: Arc<NotificationRenderer>,
        transport: Arc<dyn NotificationTransport>,
        leaseholder_id: String,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            outbox,
            renderer,
            transport,
            leaseholder_id,
            config,
        }
    }

    /// `process_notifications` cadence row: `fetch_pending` then drain.
    #[instrument(skip(self))]
    pub async fn process_pending(&self) -> Result<usize, SchedulerError> {
        let now = chrono::Utc::now();
        let entries = self.outbox.fetch_pending(self.config.batch_size, now).await?;
        self.drain(entries).await
    }

    /// `retry_failed_notifications` cadence row: `fetch_retry_ready` then
    /// the identical drain path.
    #[instrument(skip(self))]
    pub async fn process_retry_ready(&self) -> Result<usize, SchedulerError> {
        let now = chrono::Utc::now();
        let entries = self.outbox.fetch_retry_ready(self.config.batch_size, now).await?;
        self.drain(entries).await
    }

    async fn drain(&self, entries: Vec<NotificationOutbox>) -> Result<usize, SchedulerError> {
        let mut processed = 0;
        for entry in entries {
            if self.process_one(&entry).await {
                processed += 1;
            }
        }
        Ok(processed)
    }

    /// Returns `true` if this process actually won the lease and drove
    /// the entry to completion (sent or backed off); `false` if another
    /// leaseholder beat it to the lease.
    async fn process_one(&self, entry: &NotificationOutbox) -> bool {
        let now = chrono::Utc::now();
        let acquired = match self.outbox.acquire_lease(&entry.notification_id, &self.leaseholder_id, self.config.lock_duration, now).await {
            Ok(acquired) => acquired,
            Err(err) => {
                warn!(notification_id = %entry.notification_id, error = %err, "acquire_lease failed");
                return false;
            }
        };
        if !acquired {
            return false;
        }

        self.send_and_record(entry).await;

        // Guaranteed-exit: release regardless of how send_and_record ended,
        // so a leaseholder bug never leaves an entry leased forever.
        if let Err(err) = self.outbox.release_lease(&entry.notification_id, Some(&self.leaseholder_id)).await {
            warn!(notification_id = %entry.notification_id, error = %err, "release_lease failed");
        }
        true
    }

    async fn send_and_record(&self, entry: &NotificationOutbox) {
        let outcome = match self.renderer.render(&entry.template_key, &entry.payload) {
            Ok(rendered) => tokio::time::timeout(Duration::from_secs(30), self.transport.send(&entry.recipients, &rendered))
                .await
                .unwrap_or_else(|_| SendOutcome::Transient("transport timed out".to_string())),
            Err(err) => SendOutcome::Permanent(err.to_string()),
        };

        let now = chrono::Utc::now();
        let result = match outcome {
            SendOutcome::Sent => self.outbox.mark_sent(&entry.notification_id, now).await,
            SendOutcome::Transient(err) => self.outbox.mark_failed(&entry.notification_id, &err, self.config.max_retries, now).await,
            // Permanent failures skip remaining retries immediately (spec.md
            // 6.4): force the retry budget so the next `mark_failed` call
            // lands on FAILED regardless of how many attempts remain.
            SendOutcome::Permanent(err) => self.outbox.mark_failed(&entry.notification_id, &err, 0, now).await,
        };
        if let Err(err) = result {
            warn!(notification_id = %entry.notification_id, error = %err, "failed to record send outcome");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use ticketflow_core::definition::NotificationStatus;
    use ticketflow_outbox::{InMemoryOutboxRepository, RenderedNotification};

    struct CountingTransport {
        calls: AtomicUsize,
        outcome: SendOutcome,
    }

    #[async_trait]
    impl NotificationTransport for CountingTransport {
        async fn send(&self, _recipients: &[String], _rendered: &RenderedNotification) -> SendOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn entry(id: &str) -> NotificationOutbox {
        NotificationOutbox::new(id, "TICKET_CREATED", vec!["a@example.com".into()], serde_json::json!({"ticket_id": "TKT-1"}), "TKT-1", chrono::Utc::now())
    }

    #[tokio::test]
    async fn successful_send_marks_sent_and_releases_lease() {
        let outbox: Arc<dyn OutboxRepository> = Arc::new(InMemoryOutboxRepository::new());
        outbox.create_many(vec![entry("NTF-1")]).await.unwrap();
        let transport = Arc::new(CountingTransport { calls: AtomicUsize::new(0), outcome: SendOutcome::Sent });
        let dispatcher = Dispatcher::new(outbox.clone(), Arc::new(NotificationRenderer::new()), transport.clone(), "worker-1".into(), SchedulerConfig::default());

        let processed = dispatcher.process_pending().await.unwrap();
        assert_eq!(processed, 1);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);

        let stored = outbox.get("NTF-1").await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Sent);
        assert!(stored.locked_by.is_none());
    }

    #[tokio::test]
    async fn transient_failure_backs_off_and_releases_lease() {
        let outbox: Arc<dyn OutboxRepository> = Arc::new(InMemoryOutboxRepository::new());
        outbox.create_many(vec![entry("NTF-1")]).await.unwrap();
        let transport = Arc::new(CountingTransport { calls: AtomicUsize::new(0), outcome: SendOutcome::Transient("down".into()) });
        let dispatcher = Dispatcher::new(outbox.clone(), Arc::new(NotificationRenderer::new()), transport, "worker-1".into(), SchedulerConfig::default());

        dispatcher.process_pending().await.unwrap();

        let stored = outbox.get("NTF-1").await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Pending);
        assert_eq!(stored.retry_count, 1);
        assert!(stored.locked_by.is_none());
    }

    #[tokio::test]
    async fn permanent_failure_marks_failed_without_retry() {
        let outbox: Arc<dyn OutboxRepository> = Arc::new(InMemoryOutboxRepository::new());
        outbox.create_many(vec![entry("NTF-1")]).await.unwrap();
        let transport = Arc::new(CountingTransport { calls: AtomicUsize::new(0), outcome: SendOutcome::Permanent("bounced".into()) });
        let dispatcher = Dispatcher::new(outbox.clone(), Arc::new(NotificationRenderer::new()), transport, "worker-1".into(), SchedulerConfig::default());

        dispatcher.process_pending().await.unwrap();

        let stored = outbox.get("NTF-1").await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Failed);
    }

    #[tokio::test]
    async fn already_leased_entry_is_skipped() {
        let outbox: Arc<dyn OutboxRepository> = Arc::new(InMemoryOutboxRepository::new());
        outbox.create_many(vec![entry("NTF-1")]).await.unwrap();
        outbox.acquire_lease("NTF-1", "other-worker", Duration::from_secs(60), chrono::Utc::now()).await.unwrap();

        let transport = Arc::new(CountingTransport { calls: AtomicUsize::new(0), outcome: SendOutcome::Sent });
        let dispatcher = Dispatcher::new(outbox.clone(), Arc::new(NotificationRenderer::new()), transport.clone(), "worker-1".into(), SchedulerConfig::default());

        let processed = dispatcher.process_pending().await.unwrap();
        assert_eq!(processed, 0);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }
}
