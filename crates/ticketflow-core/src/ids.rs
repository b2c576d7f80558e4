//! Prefixed ID generation and the clock abstraction.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a short unique ID with an entity prefix, e.g. `generate_id("TKT")`
/// produces `TKT-a1b2c3d4e5f6`.
///
/// Twelve lowercase hex characters taken from a v4 UUID, matching the
/// original system's id generator.
pub fn generate_id(prefix: &str) -> String {
    let unique_part = &Uuid::new_v4().simple().to_string()[..12];
    format!("{prefix}-{unique_part}")
}

macro_rules! id_prefix_fns {
    ($($name:ident => $prefix:literal),* $(,)?) => {
        $(
            #[doc = concat!("Generate a `", $prefix, "-` prefixed id.")]
            pub fn $name() -> String {
                generate_id($prefix)
            }
        )*
    };
}

id_prefix_fns! {
    generate_workflow_id => "WF",
    generate_workflow_version_id => "WFV",
    generate_ticket_id => "TKT",
    generate_ticket_step_id => "STEP",
    generate_approval_task_id => "APR",
    generate_assignment_id => "ASGN",
    generate_info_request_id => "INFO",
    generate_notification_id => "NTF",
    generate_audit_event_id => "AUD",
}

/// Generate a correlation ID for request tracing: `COR-<timestamp>-<hex>`.
pub fn generate_correlation_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let unique_part = &Uuid::new_v4().simple().to_string()[..8];
    format!("COR-{timestamp}-{unique_part}")
}

/// Abstraction over the current time, so tests can inject a fixed clock
/// instead of depending on the system wall clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The production clock, backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_id_has_prefix_and_length() {
        let id = generate_id("TKT");
        assert!(id.starts_with("TKT-"));
        assert_eq!(id.len(), "TKT-".len() + 12);
    }

    #[test]
    fn generate_id_is_unique() {
        assert_ne!(generate_ticket_id(), generate_ticket_id());
    }

    #[test]
    fn prefix_helpers_use_expected_prefixes() {
        assert!(generate_workflow_id().starts_with("WF-"));
        assert!(generate_workflow_version_id().starts_with("WFV-"));
        assert!(generate_ticket_step_id().starts_with("STEP-"));
        assert!(generate_approval_task_id().starts_with("APR-"));
        assert!(generate_assignment_id().starts_with("ASGN-"));
        assert!(generate_info_request_id().starts_with("INFO-"));
        assert!(generate_notification_id().starts_with("NTF-"));
        assert!(generate_audit_event_id().starts_with("AUD-"));
    }

    #[test]
    fn correlation_id_has_expected_shape() {
        let id = generate_correlation_id();
        assert!(id.starts_with("COR-"));
        assert_eq!(id.split('-').count(), 3);
    }

    #[test]
    fn system_clock_returns_current_time() {
        let before = Utc::now();
        let now = SystemClock.now();
        assert!(now >= before);
    }
}
