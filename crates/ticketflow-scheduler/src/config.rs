//! Scheduler configuration (spec.md 4.5): cadences and tunables for the
//! five periodic jobs, matching `durable::worker::WorkerPoolConfig`'s
//! shape (one struct, builder-style setters, `Default` holding the
//! spec's documented defaults).

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Cadence of `process_notifications` (spec.md 4.5, default 10s).
    pub interval: Duration,
    /// Lease duration handed to `acquire_lease` (spec.md 4.5, default 60s).
    pub lock_duration: Duration,
    /// `mark_failed`'s `max_retries` threshold (spec.md 4.4, default 5).
    pub max_retries: u32,
    /// Age threshold for `cleanup_stale_leases` (spec.md 4.5, default 10m).
    pub stale_lock_cleanup: Duration,
    /// How many entries `fetch_pending`/`fetch_retry_ready` claim per sweep.
    pub batch_size: usize,
    /// Cadence of `cleanup_stale_leases` (spec.md 4.5 table: 5 min).
    pub stale_cleanup_interval: Duration,
    /// Cadence of `sla_reminder_sweep` / `sla_escalation_sweep` (60s).
    pub sla_sweep_interval: Duration,
    /// Cadence of `retry_failed_notifications` (2 min).
    pub retry_interval: Duration,
    /// How far ahead of `due_at` the reminder sweep looks (60 min).
    pub reminder_lookahead: Duration,
    /// Minimum gap between two reminders on the same step (30 min).
    pub reminder_cooldown: Duration,
    /// Minimum gap between two escalations on the same step (4 h).
    pub escalation_cooldown: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            lock_duration: Duration::from_secs(60),
            max_retries: 5,
            stale_lock_cleanup: Duration::from_secs(10 * 60),
            batch_size: 25,
            stale_cleanup_interval: Duration::from_secs(5 * 60),
            sla_sweep_interval: Duration::from_secs(60),
            retry_interval: Duration::from_secs(2 * 60),
            reminder_lookahead: Duration::from_secs(60 * 60),
            reminder_cooldown: Duration::from_secs(30 * 60),
            escalation_cooldown: Duration::from_secs(4 * 60 * 60),
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_lock_duration(mut self, duration: Duration) -> Self {
        self.lock_duration = duration;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_stale_lock_cleanup(mut self, duration: Duration) -> Self {
        self.stale_lock_cleanup = duration;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Reads overrides from the environment the way
    /// `control-plane/src/main.rs` reads `DATABASE_URL` -- plain
    /// `std::env::var`, falling back to the spec defaults when unset or
    /// unparsable. No config-file parser, matching the teacher.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_secs("SCHEDULER_INTERVAL_SECONDS") {
            config.interval = Duration::from_secs(v);
        }
        if let Some(v) = env_secs("SCHEDULER_LOCK_DURATION_SECONDS") {
            config.lock_duration = Duration::from_secs(v);
        }
        if let Ok(v) = std::env::var("SCHEDULER_MAX_RETRIES") {
            if let Ok(v) = v.parse() {
                config.max_retries = v;
            }
        }
        if let Some(v) = env_secs("SCHEDULER_STALE_LOCK_CLEANUP_MINUTES") {
            config.stale_lock_cleanup = Duration::from_secs(v * 60);
        }
        config
    }
}

fn env_secs(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
