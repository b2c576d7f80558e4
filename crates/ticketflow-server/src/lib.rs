//! Process wiring for the ticket engine: constructs the concrete
//! repositories, the engine, the admin service, and the scheduler, and
//! hands them to `main.rs` -- the only place in the workspace that picks
//! concrete types, per DESIGN NOTES §9 ("model these as values
//! constructed at process startup and injected into the engine").
//!
//! Grounded on `everruns-worker/src/main.rs`'s shape: read config from
//! the environment, construct storage, construct the executor, run.

use std::sync::Arc;

use ticketflow_core::{Clock, SystemClock};
use ticketflow_engine::{TicketEngine, WorkflowAdminService};
use ticketflow_outbox::{InMemoryOutboxRepository, LoggingTransport, NotificationTransport, OutboxRepository};
use ticketflow_scheduler::{Scheduler, SchedulerConfig};
use ticketflow_storage::memory::{InMemorySatelliteStore, InMemoryTicketStore, InMemoryWorkflowStore};
use ticketflow_storage::{AuditRepository, DirectoryAdapter, InMemoryDirectoryAdapter, SatelliteRepository, TicketRepository, WorkflowRepository};

/// Every component the process needs, wired from in-memory stores (the
/// reference backing named in spec.md 1 as outside this exercise's
/// boundary -- a real deployment swaps these four `Arc<dyn ...>`s for
/// Postgres-backed implementations without touching the engine or
/// scheduler).
pub struct AppState {
    pub engine: Arc<TicketEngine>,
    pub admin: Arc<WorkflowAdminService>,
    pub scheduler: Arc<Scheduler>,
    pub tickets: Arc<dyn TicketRepository>,
    pub workflows: Arc<dyn WorkflowRepository>,
    pub satellites: Arc<dyn SatelliteRepository>,
    pub audit: Arc<dyn AuditRepository>,
    pub outbox: Arc<dyn OutboxRepository>,
    pub directory: Arc<dyn DirectoryAdapter>,
}

impl AppState {
    /// Builds the full dependency graph against in-memory stores and a
    /// logging notification transport. `scheduler_config` is read from
    /// the environment by the caller (`SchedulerConfig::from_env`).
    pub fn new_in_memory(scheduler_config: SchedulerConfig) -> Self {
        Self::new_in_memory_with_transport(scheduler_config, Arc::new(LoggingTransport))
    }

    pub fn new_in_memory_with_transport(scheduler_config: SchedulerConfig, transport: Arc<dyn NotificationTransport>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let tickets: Arc<dyn TicketRepository> = Arc::new(InMemoryTicketStore::new());
        let workflows: Arc<dyn WorkflowRepository> = Arc::new(InMemoryWorkflowStore::new());
        let satellites_store = Arc::new(InMemorySatelliteStore::new());
        let satellites: Arc<dyn SatelliteRepository> = satellites_store.clone();
        let audit: Arc<dyn AuditRepository> = satellites_store;
        let outbox: Arc<dyn OutboxRepository> = Arc::new(InMemoryOutboxRepository::new());
        let directory: Arc<dyn DirectoryAdapter> = Arc::new(InMemoryDirectoryAdapter::new());

        let engine = Arc::new(TicketEngine::new(tickets.clone(), workflows.clone(), satellites.clone(), audit.clone(), outbox.clone(), directory.clone(), clock.clone()));
        let admin = Arc::new(WorkflowAdminService::new(workflows.clone(), clock.clone()));
        let scheduler = Arc::new(Scheduler::new(tickets.clone(), outbox.clone(), audit.clone(), transport, scheduler_config));

        Self { engine, admin, scheduler, tickets, workflows, satellites, audit, outbox, directory }
    }
}
