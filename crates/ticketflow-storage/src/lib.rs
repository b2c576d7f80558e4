//! Record store contract (component A, spec.md 6.2) and the directory
//! adapter (component C, spec.md 6.3): repository traits the engine
//! depends on, plus in-memory implementations used by the integration
//! test suite and as a reference before layering on Postgres.
//!
//! Every repository trait does atomic read-modify-write with a version
//! compare, matching `durable::persistence::WorkflowEventStore`'s
//! optimistic-append shape generalized to ticket/step/satellite records.

pub mod directory;
pub mod error;
pub mod memory;
pub mod pagination;
pub mod satellite_repo;
pub mod ticket_repo;
pub mod workflow_repo;

pub use directory::{DirectoryAdapter, InMemoryDirectoryAdapter};
pub use error::StoreError;
pub use pagination::Pagination;
pub use satellite_repo::{AuditRepository, SatelliteRepository};
pub use ticket_repo::TicketRepository;
pub use workflow_repo::{PreloadedVersionLookup, WorkflowRepository};
