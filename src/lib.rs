#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod clock;
mod config;
mod errors;
mod handler;
mod memory;
mod runner;
/// Database schema definitions.
pub mod schema;
mod service;
mod storage;
mod store;
mod util;
mod worker;

/// Time sources used by the service layer.
pub use self::clock::{Clock, ManualClock, SystemClock};
/// Lease window and batch cap configuration.
pub use self::config::{DEFAULT_BATCH_SIZE, DEFAULT_LEASE_DURATION, LeasePolicy};
/// Error type for store operations.
pub use self::errors::StoreError;
/// The trait for per-query work run by pollers.
pub use self::handler::QueryHandler;
/// The in-memory store.
pub use self::memory::MemoryJobStore;
/// The poller harness.
pub use self::runner::{Configured, Queue, RunHandle, Runner, Unconfigured};
/// Row types.
pub use self::schema::{NewQuery, Query, QueryKind, QueryStatus};
/// The operations exposed to pollers and workers.
pub use self::service::JobService;
/// The Postgres store.
pub use self::storage::{PgJobStore, setup_database};
/// The job store contract.
pub use self::store::JobStore;
