//! The periodic driver (component I, spec.md 4.5): feeds the outbox
//! dispatcher, raises SLA reminders/escalations, and reclaims crashed
//! leases. Grounded on `durable::worker`'s pool/poller/backpressure
//! trio, generalized from "poll one activity queue" to "run five
//! independent cadenced jobs against the outbox and ticket-step store."

pub mod config;
pub mod dispatch;
pub mod error;
pub mod leaseholder;
pub mod scheduler;
pub mod sla;

pub use config::SchedulerConfig;
pub use dispatch::Dispatcher;
pub use error::SchedulerError;
pub use leaseholder::generate_leaseholder_id;
pub use scheduler::Scheduler;
pub use sla::SlaSweeper;
