//! Mandate desk
//!
//! Assigns mandates to workers, keeps each worker on at most one active
//! mandate, and accounts the active and idle time spent on it until the
//! mandate is closed out against its deliverable target.
//!
//! ## Architecture
//!
//! - [`controller::MandateSessionController`] runs `start`, `pause`,
//!   `resume` and `end`, each as a single store transaction
//! - [`timer`] holds the pure session time arithmetic
//! - [`registry`] validates transitions and posts mandates and workers
//! - [`store::SessionStore`] is the persistence seam, with an in-memory
//!   backend and a Postgres one behind the `database` feature
//! - [`watchdog::InactivityWatchdog`] pauses idle workers and resumes them
//!   on their next heartbeat
//! - [`api`] exposes everything over HTTP behind the `server` feature

pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod models;
pub mod registry;
pub mod store;
pub mod telemetry;
pub mod timer;
pub mod watchdog;

#[cfg(feature = "database")]
pub mod database;

#[cfg(feature = "server")]
pub mod api;

pub use clock::{Clock, ManualClock, SystemClock};
pub use controller::MandateSessionController;
pub use error::{ErrorKind, MandateError, MandateResult, StoreError, StoreResult};
pub use models::{
    ActivityLogEntry, ActivityStatus, Deliverable, EndSummary, Mandate, MandateId, MandateStatus,
    OpenTimer, PresenceStatus, Session, SessionTotals, Worker, WorkerId, WorkerStatus,
};
pub use registry::{MandateRegistry, NewMandate, WorkerRegistry};
pub use store::{MemoryStore, SessionStore, StoreTx};
pub use watchdog::{Heartbeat, InactivityWatchdog};

#[cfg(feature = "database")]
pub use database::{DatabaseManager, PgSessionStore};
