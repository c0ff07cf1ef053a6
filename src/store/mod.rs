//! Persistence seam for the mandate session core
//!
//! The controller works exclusively through [`SessionStore`] and the
//! transactions it hands out, enabling pluggable backends ([`MemoryStore`]
//! for tests and development, Postgres for production).
//!
//! Lock order inside a transaction is always Worker -> Mandate -> Session.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::models::{
    ActivityLogEntry, Deliverable, Mandate, MandateId, OpenTimer, Session, Worker, WorkerId,
};

pub mod memory;

pub use memory::MemoryStore;

/// Backing store for workers, mandates, sessions, deliverables and the activity log.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Open a transaction. Row locks taken through it are held until commit or rollback.
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;

    // ── Committed reads ──

    async fn worker(&self, worker_id: WorkerId) -> StoreResult<Option<Worker>>;
    async fn mandate(&self, mandate_id: MandateId) -> StoreResult<Option<Mandate>>;
    /// All sessions for the pair, oldest first.
    async fn sessions_for(
        &self,
        worker_id: WorkerId,
        mandate_id: MandateId,
    ) -> StoreResult<Vec<Session>>;
    /// The worker's unclosed session, if any.
    async fn open_session(&self, worker_id: WorkerId) -> StoreResult<Option<Session>>;
    /// Activity entries for the worker ordered by timestamp.
    async fn activity_for_worker(&self, worker_id: WorkerId)
        -> StoreResult<Vec<ActivityLogEntry>>;

    // ── External writes (registries, candidate subsystem) ──

    async fn insert_worker(&self, worker: &Worker) -> StoreResult<()>;
    async fn insert_mandate(&self, mandate: &Mandate) -> StoreResult<()>;
    async fn record_deliverable(&self, deliverable: &Deliverable) -> StoreResult<()>;
}

/// A single all-or-nothing unit of work.
///
/// Dropping a transaction without committing discards every write made through it.
#[async_trait]
pub trait StoreTx: Send {
    /// Lock and read the worker row.
    async fn lock_worker(&mut self, worker_id: WorkerId) -> StoreResult<Option<Worker>>;

    /// Lock and read the mandate row.
    async fn lock_mandate(&mut self, mandate_id: MandateId) -> StoreResult<Option<Mandate>>;

    /// Lock the most recently started open session for the pair whose `timer`
    /// marker is set.
    async fn lock_latest_session(
        &mut self,
        worker_id: WorkerId,
        mandate_id: MandateId,
        timer: OpenTimer,
    ) -> StoreResult<Option<Session>>;

    /// Lock every session for the pair that has not been submitted, oldest first.
    async fn lock_unclosed_sessions(
        &mut self,
        worker_id: WorkerId,
        mandate_id: MandateId,
    ) -> StoreResult<Vec<Session>>;

    /// Lock every session of the worker, on any mandate, that has not been
    /// submitted, oldest first.
    async fn lock_open_sessions_for_worker(
        &mut self,
        worker_id: WorkerId,
    ) -> StoreResult<Vec<Session>>;

    /// Deliverables by the worker counted toward the mandate since `since`.
    async fn count_deliverables(
        &mut self,
        worker_id: WorkerId,
        mandate_id: MandateId,
        since: DateTime<Utc>,
    ) -> StoreResult<u32>;

    async fn update_worker(&mut self, worker: &Worker) -> StoreResult<()>;
    async fn update_mandate(&mut self, mandate: &Mandate) -> StoreResult<()>;
    async fn insert_session(&mut self, session: &Session) -> StoreResult<()>;
    async fn update_session(&mut self, session: &Session) -> StoreResult<()>;
    async fn append_activity(&mut self, entry: &ActivityLogEntry) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
