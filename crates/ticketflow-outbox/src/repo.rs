//! Outbox repository contract (component G, spec.md 4.4) and an
//! in-memory implementation used by tests and as the pre-Postgres
//! reference, grounded on `durable::persistence::store::WorkflowEventStore`'s
//! `claim_task` lease semantics (teacher: `FOR UPDATE SKIP LOCKED` compiled
//! down here to a `parking_lot::RwLock` compare-and-set).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use ticketflow_core::definition::NotificationStatus;

use crate::error::OutboxError;
use crate::model::NotificationOutbox;

#[async_trait]
pub trait OutboxRepository: Send + Sync + 'static {
    /// Atomic insert of a batch; id is caller-supplied.
    async fn create_many(&self, entries: Vec<NotificationOutbox>) -> Result<(), OutboxError>;

    /// Entries with `status=PENDING`, `(next_retry_at <= now OR null)`, and
    /// `(locked_until <= now OR null)`, sorted by `created_at` ascending.
    async fn fetch_pending(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<NotificationOutbox>, OutboxError>;

    /// Entries with `retry_count > 0`, `next_retry_at <= now`, unleased --
    /// the retry-path counterpart of `fetch_pending`.
    async fn fetch_retry_ready(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<NotificationOutbox>, OutboxError>;

    /// Atomic compare-and-set: succeeds iff the entry exists, is PENDING,
    /// and is currently unleased or lease-expired.
    async fn acquire_lease(
        &self,
        notification_id: &str,
        leaseholder_id: &str,
        duration: std::time::Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, OutboxError>;

    /// Clears the lease; if `leaseholder_id` is given, releases only when
    /// it matches -- never steals another leaseholder's lock.
    async fn release_lease(&self, notification_id: &str, leaseholder_id: Option<&str>) -> Result<(), OutboxError>;

    /// Bulk-clears any lease older than `max_age` (crash recovery).
    async fn cleanup_stale_leases(&self, max_age: std::time::Duration, now: DateTime<Utc>) -> Result<u64, OutboxError>;

    async fn mark_sent(&self, notification_id: &str, now: DateTime<Utc>) -> Result<(), OutboxError>;

    async fn mark_failed(
        &self,
        notification_id: &str,
        error: &str,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<(), OutboxError>;

    /// FAILED -> PENDING, `next_retry_at=now`.
    async fn requeue(&self, notification_id: &str, now: DateTime<Utc>) -> Result<(), OutboxError>;

    async fn get(&self, notification_id: &str) -> Result<Option<NotificationOutbox>, OutboxError>;
}

/// Exponential backoff, base 2, in minutes: `2^(retry_count-1)` (spec.md
/// 4.4 `mark_failed`). `retry_count` here is the count *after* increment.
pub fn backoff_delay(retry_count: u32) -> Duration {
    let minutes = 2i64.saturating_pow(retry_count.saturating_sub(1));
    Duration::minutes(minutes)
}

#[derive(Default)]
pub struct InMemoryOutboxRepository {
    entries: RwLock<HashMap<String, NotificationOutbox>>,
}

impl InMemoryOutboxRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OutboxRepository for InMemoryOutboxRepository {
    async fn create_many(&self, entries: Vec<NotificationOutbox>) -> Result<(), OutboxError> {
        let mut guard = self.entries.write();
        for entry in entries {
            guard.insert(entry.notification_id.clone(), entry);
        }
        Ok(())
    }

    async fn fetch_pending(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<NotificationOutbox>, OutboxError> {
        let mut matching: Vec<_> = self.entries.read().values().filter(|e| e.is_eligible(now)).cloned().collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn fetch_retry_ready(&self, limit: usize, now: DateTime<Utc>) -> Result<Vec<NotificationOutbox>, OutboxError> {
        let mut matching: Vec<_> = self.entries.read().values().filter(|e| e.is_retry_ready(now)).cloned().collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn acquire_lease(
        &self,
        notification_id: &str,
        leaseholder_id: &str,
        duration: std::time::Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, OutboxError> {
        let mut guard = self.entries.write();
        let Some(entry) = guard.get_mut(notification_id) else {
            return Ok(false);
        };
        if entry.status != NotificationStatus::Pending || !entry.is_lease_free(now) {
            return Ok(false);
        }
        entry.locked_until = Some(now + Duration::from_std(duration).unwrap_or(Duration::zero()));
        entry.locked_by = Some(leaseholder_id.to_string());
        entry.lock_acquired_at = Some(now);
        Ok(true)
    }

    async fn release_lease(&self, notification_id: &str, leaseholder_id: Option<&str>) -> Result<(), OutboxError> {
        let mut guard = self.entries.write();
        let Some(entry) = guard.get_mut(notification_id) else {
            return Ok(());
        };
        if let Some(holder) = leaseholder_id {
            if entry.locked_by.as_deref() != Some(holder) {
                return Ok(());
            }
        }
        entry.locked_until = None;
        entry.locked_by = None;
        entry.lock_acquired_at = None;
        Ok(())
    }

    async fn cleanup_stale_leases(&self, max_age: std::time::Duration, now: DateTime<Utc>) -> Result<u64, OutboxError> {
        let max_age = Duration::from_std(max_age).unwrap_or(Duration::zero());
        let mut cleaned = 0u64;
        for entry in self.entries.write().values_mut() {
            let Some(acquired) = entry.lock_acquired_at else { continue };
            if now - acquired >= max_age {
                entry.locked_until = None;
                entry.locked_by = None;
                entry.lock_acquired_at = None;
                cleaned += 1;
            }
        }
        Ok(cleaned)
    }

    async fn mark_sent(&self, notification_id: &str, now: DateTime<Utc>) -> Result<(), OutboxError> {
        let mut guard = self.entries.write();
        let entry = guard.get_mut(notification_id).ok_or_else(|| OutboxError::NotFound(notification_id.to_string()))?;
        // Idempotent: a second call on an already-SENT entry is a no-op.
        if entry.status == NotificationStatus::Sent {
            return Ok(());
        }
        entry.status = NotificationStatus::Sent;
        entry.sent_at = Some(now);
        entry.locked_until = None;
        entry.locked_by = None;
        entry.lock_acquired_at = None;
        Ok(())
    }

    async fn mark_failed(
        &self,
        notification_id: &str,
        error: &str,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<(), OutboxError> {
        let mut guard = self.entries.write();
        let entry = guard.get_mut(notification_id).ok_or_else(|| OutboxError::NotFound(notification_id.to_string()))?;

        entry.retry_count += 1;
        entry.last_error = Some(error.to_string());
        entry.locked_until = None;
        entry.locked_by = None;
        entry.lock_acquired_at = None;

        if entry.retry_count >= max_retries {
            entry.status = NotificationStatus::Failed;
            entry.next_retry_at = None;
        } else {
            entry.status = NotificationStatus::Pending;
            entry.next_retry_at = Some(now + backoff_delay(entry.retry_count));
        }
        Ok(())
    }

    async fn requeue(&self, notification_id: &str, now: DateTime<Utc>) -> Result<(), OutboxError> {
        let mut guard = self.entries.write();
        let entry = guard.get_mut(notification_id).ok_or_else(|| OutboxError::NotFound(notification_id.to_string()))?;
        entry.status = NotificationStatus::Pending;
        entry.next_retry_at = Some(now);
        Ok(())
    }

    async fn get(&self, notification_id: &str) -> Result<Option<NotificationOutbox>, OutboxError> {
        Ok(self.entries.read().get(notification_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn entry(id: &str) -> NotificationOutbox {
        NotificationOutbox::new(id, "TICKET_CREATED", vec!["a@example.com".into()], serde_json::json!({}), "TKT-1", Utc::now())
    }

    #[tokio::test]
    async fn acquire_then_release_leaves_entry_unleased() {
        let repo = InMemoryOutboxRepository::new();
        repo.create_many(vec![entry("NTF-1")]).await.unwrap();

        let now = Utc::now();
        assert!(repo.acquire_lease("NTF-1", "worker-1", StdDuration::from_secs(60), now).await.unwrap());
        repo.release_lease("NTF-1", Some("worker-1")).await.unwrap();

        let stored = repo.get("NTF-1").await.unwrap().unwrap();
        assert!(stored.locked_by.is_none());
        assert!(stored.locked_until.is_none());
    }

    #[tokio::test]
    async fn second_acquire_fails_while_leased() {
        let repo = InMemoryOutboxRepository::new();
        repo.create_many(vec![entry("NTF-1")]).await.unwrap();
        let now = Utc::now();
        assert!(repo.acquire_lease("NTF-1", "worker-1", StdDuration::from_secs(60), now).await.unwrap());
        assert!(!repo.acquire_lease("NTF-1", "worker-2", StdDuration::from_secs(60), now).await.unwrap());
    }

    #[tokio::test]
    async fn release_never_steals_another_leaseholders_lock() {
        let repo = InMemoryOutboxRepository::new();
        repo.create_many(vec![entry("NTF-1")]).await.unwrap();
        let now = Utc::now();
        repo.acquire_lease("NTF-1", "worker-1", StdDuration::from_secs(60), now).await.unwrap();
        repo.release_lease("NTF-1", Some("worker-2")).await.unwrap();
        let stored = repo.get("NTF-1").await.unwrap().unwrap();
        assert_eq!(stored.locked_by.as_deref(), Some("worker-1"));
    }

    #[tokio::test]
    async fn mark_failed_backs_off_exponentially_until_max_retries() {
        let repo = InMemoryOutboxRepository::new();
        repo.create_many(vec![entry("NTF-1")]).await.unwrap();
        let now = Utc::now();

        for expected_count in 1..=4u32 {
            repo.mark_failed("NTF-1", "boom", 5, now).await.unwrap();
            let stored = repo.get("NTF-1").await.unwrap().unwrap();
            assert_eq!(stored.retry_count, expected_count);
            assert_eq!(stored.status, NotificationStatus::Pending);
        }

        repo.mark_failed("NTF-1", "boom", 5, now).await.unwrap();
        let stored = repo.get("NTF-1").await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 5);
        assert_eq!(stored.status, NotificationStatus::Failed);
    }

    #[tokio::test]
    async fn mark_sent_is_idempotent() {
        let repo = InMemoryOutboxRepository::new();
        repo.create_many(vec![entry("NTF-1")]).await.unwrap();
        let now = Utc::now();
        repo.mark_sent("NTF-1", now).await.unwrap();
        repo.mark_sent("NTF-1", now).await.unwrap();
        let stored = repo.get("NTF-1").await.unwrap().unwrap();
        assert_eq!(stored.status, NotificationStatus::Sent);
    }

    #[tokio::test]
    async fn cleanup_stale_leases_only_clears_old_locks() {
        let repo = InMemoryOutboxRepository::new();
        repo.create_many(vec![entry("NTF-1")]).await.unwrap();
        let acquired_at = Utc::now() - Duration::minutes(15);
        repo.acquire_lease("NTF-1", "crashed-worker", StdDuration::from_secs(60 * 60), acquired_at).await.unwrap();

        let cleaned = repo.cleanup_stale_leases(StdDuration::from_secs(600), Utc::now()).await.unwrap();
        assert_eq!(cleaned, 1);
        let stored = repo.get("NTF-1").await.unwrap().unwrap();
        assert!(stored.locked_by.is_none());
    }

    #[test]
    fn backoff_delay_matches_base_two_in_minutes() {
        assert_eq!(backoff_delay(1), Duration::minutes(1));
        assert_eq!(backoff_delay(2), Duration::minutes(2));
        assert_eq!(backoff_delay(3), Duration::minutes(4));
        assert_eq!(backoff_delay(5), Duration::minutes(16));
    }
}
