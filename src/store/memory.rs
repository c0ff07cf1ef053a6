//! In-memory session store
//!
//! Row locks are per-row async mutexes owned by the transaction until it
//! commits or is dropped. Writes are buffered in the transaction and applied
//! to the tables in one step at commit, so a dropped or rolled-back
//! transaction leaves no trace.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use super::{SessionStore, StoreTx};
use crate::error::{StoreError, StoreResult};
use crate::models::{
    ActivityLogEntry, Deliverable, Mandate, MandateId, OpenTimer, Session, Worker, WorkerId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RowKey {
    Worker(WorkerId),
    Mandate(MandateId),
    Session(uuid::Uuid),
}

impl std::fmt::Display for RowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RowKey::Worker(id) => write!(f, "worker {}", id),
            RowKey::Mandate(id) => write!(f, "mandate {}", id),
            RowKey::Session(id) => write!(f, "session {}", id),
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    workers: HashMap<WorkerId, Worker>,
    mandates: HashMap<MandateId, Mandate>,
    /// Insertion order doubles as start order for equal timestamps.
    sessions: Vec<Session>,
    activity: Vec<ActivityLogEntry>,
    deliverables: Vec<Deliverable>,
}

#[derive(Default)]
struct Shared {
    tables: Mutex<Tables>,
    row_locks: Mutex<HashMap<RowKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl Shared {
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn row_lock(&self, key: RowKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.row_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key).or_default().clone()
    }

    /// Forget lock entries nobody holds or waits on.
    fn prune(&self, keys: &[RowKey]) {
        let mut locks = self.row_locks.lock().unwrap_or_else(|e| e.into_inner());
        for key in keys {
            if locks.get(key).is_some_and(|m| Arc::strong_count(m) == 1) {
                locks.remove(key);
            }
        }
    }
}

/// Row-lock guards owned by one transaction. Dropping releases them all.
struct HeldLocks {
    shared: Arc<Shared>,
    guards: HashMap<RowKey, OwnedMutexGuard<()>>,
}

impl HeldLocks {
    fn release(&mut self, key: RowKey) {
        if self.guards.remove(&key).is_some() {
            self.shared.prune(&[key]);
        }
    }
}

impl Drop for HeldLocks {
    fn drop(&mut self) {
        let keys: Vec<RowKey> = self.guards.keys().copied().collect();
        self.guards.clear();
        self.shared.prune(&keys);
    }
}

/// In-memory implementation for testing and development
#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
    lock_timeout: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Row-lock waits longer than `timeout` fail with [`StoreError::LockTimeout`].
    pub fn with_lock_timeout(timeout: Duration) -> Self {
        Self {
            shared: Arc::default(),
            lock_timeout: Some(timeout),
        }
    }

    /// Number of sessions ever created, open or closed.
    pub fn session_count(&self) -> usize {
        self.shared.tables().sessions.len()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        Ok(Box::new(MemoryTx {
            shared: self.shared.clone(),
            lock_timeout: self.lock_timeout,
            held: HeldLocks {
                shared: self.shared.clone(),
                guards: HashMap::new(),
            },
            workers: HashMap::new(),
            mandates: HashMap::new(),
            sessions: Vec::new(),
            activity: Vec::new(),
        }))
    }

    async fn worker(&self, worker_id: WorkerId) -> StoreResult<Option<Worker>> {
        Ok(self.shared.tables().workers.get(&worker_id).cloned())
    }

    async fn mandate(&self, mandate_id: MandateId) -> StoreResult<Option<Mandate>> {
        Ok(self.shared.tables().mandates.get(&mandate_id).cloned())
    }

    async fn sessions_for(
        &self,
        worker_id: WorkerId,
        mandate_id: MandateId,
    ) -> StoreResult<Vec<Session>> {
        Ok(self
            .shared
            .tables()
            .sessions
            .iter()
            .filter(|s| s.worker_id == worker_id && s.mandate_id == mandate_id)
            .cloned()
            .collect())
    }

    async fn open_session(&self, worker_id: WorkerId) -> StoreResult<Option<Session>> {
        Ok(self
            .shared
            .tables()
            .sessions
            .iter()
            .rev()
            .find(|s| s.worker_id == worker_id && s.is_open())
            .cloned())
    }

    async fn activity_for_worker(
        &self,
        worker_id: WorkerId,
    ) -> StoreResult<Vec<ActivityLogEntry>> {
        let mut entries: Vec<ActivityLogEntry> = self
            .shared
            .tables()
            .activity
            .iter()
            .filter(|e| e.worker_id == worker_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.recorded_at);
        Ok(entries)
    }

    async fn insert_worker(&self, worker: &Worker) -> StoreResult<()> {
        let mut tables = self.shared.tables();
        if tables.workers.contains_key(&worker.worker_id) {
            return Err(StoreError::Duplicate {
                row: RowKey::Worker(worker.worker_id).to_string(),
            });
        }
        tables.workers.insert(worker.worker_id, worker.clone());
        Ok(())
    }

    async fn insert_mandate(&self, mandate: &Mandate) -> StoreResult<()> {
        let mut tables = self.shared.tables();
        if tables.mandates.contains_key(&mandate.mandate_id) {
            return Err(StoreError::Duplicate {
                row: RowKey::Mandate(mandate.mandate_id).to_string(),
            });
        }
        tables.mandates.insert(mandate.mandate_id, mandate.clone());
        Ok(())
    }

    async fn record_deliverable(&self, deliverable: &Deliverable) -> StoreResult<()> {
        self.shared.tables().deliverables.push(deliverable.clone());
        Ok(())
    }
}

struct MemoryTx {
    shared: Arc<Shared>,
    lock_timeout: Option<Duration>,
    held: HeldLocks,
    workers: HashMap<WorkerId, Worker>,
    mandates: HashMap<MandateId, Mandate>,
    /// Inserted and updated sessions, in first-write order.
    sessions: Vec<Session>,
    activity: Vec<ActivityLogEntry>,
}

impl MemoryTx {
    async fn lock(&mut self, key: RowKey) -> StoreResult<()> {
        if self.held.guards.contains_key(&key) {
            return Ok(());
        }
        let mutex = self.shared.row_lock(key);
        let guard = match self.lock_timeout {
            Some(timeout) => {
                let waited = tokio::time::timeout(timeout, mutex.clone().lock_owned()).await;
                match waited {
                    Ok(guard) => guard,
                    Err(_) => {
                        drop(mutex);
                        self.shared.prune(&[key]);
                        return Err(StoreError::LockTimeout {
                            row: key.to_string(),
                        });
                    }
                }
            }
            None => mutex.lock_owned().await,
        };
        self.held.guards.insert(key, guard);
        Ok(())
    }

    /// Committed sessions with this transaction's writes laid over them.
    fn session_view(&self) -> Vec<Session> {
        let mut view = self.shared.tables().sessions.clone();
        for pending in &self.sessions {
            match view.iter_mut().find(|s| s.session_id == pending.session_id) {
                Some(existing) => *existing = pending.clone(),
                None => view.push(pending.clone()),
            }
        }
        view
    }

    fn latest_matching(
        &self,
        worker_id: WorkerId,
        mandate_id: MandateId,
        timer: OpenTimer,
    ) -> Option<Session> {
        let mut latest: Option<Session> = None;
        for session in self.session_view() {
            if session.worker_id != worker_id
                || session.mandate_id != mandate_id
                || !session.is_open()
                || session.marker(timer).is_none()
            {
                continue;
            }
            if latest
                .as_ref()
                .map_or(true, |best| session.started_at >= best.started_at)
            {
                latest = Some(session);
            }
        }
        latest
    }

    /// Lock every open session matching `filter`, oldest first, and re-read
    /// them under the locks.
    async fn lock_open_where<F>(&mut self, filter: F) -> StoreResult<Vec<Session>>
    where
        F: Fn(&Session) -> bool + Send,
    {
        let mut open: Vec<Session> = self
            .session_view()
            .into_iter()
            .filter(|s| s.is_open() && filter(s))
            .collect();
        open.sort_by_key(|s| s.started_at);
        let ids: Vec<uuid::Uuid> = open.iter().map(|s| s.session_id).collect();

        for id in &ids {
            self.lock(RowKey::Session(*id)).await?;
        }

        let mut locked: Vec<Session> = self
            .session_view()
            .into_iter()
            .filter(|s| ids.contains(&s.session_id) && s.is_open())
            .collect();
        locked.sort_by_key(|s| s.started_at);
        Ok(locked)
    }

    fn stage_session(&mut self, session: &Session) {
        match self
            .sessions
            .iter_mut()
            .find(|s| s.session_id == session.session_id)
        {
            Some(existing) => *existing = session.clone(),
            None => self.sessions.push(session.clone()),
        }
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn lock_worker(&mut self, worker_id: WorkerId) -> StoreResult<Option<Worker>> {
        self.lock(RowKey::Worker(worker_id)).await?;
        if let Some(pending) = self.workers.get(&worker_id) {
            return Ok(Some(pending.clone()));
        }
        Ok(self.shared.tables().workers.get(&worker_id).cloned())
    }

    async fn lock_mandate(&mut self, mandate_id: MandateId) -> StoreResult<Option<Mandate>> {
        self.lock(RowKey::Mandate(mandate_id)).await?;
        if let Some(pending) = self.mandates.get(&mandate_id) {
            return Ok(Some(pending.clone()));
        }
        Ok(self.shared.tables().mandates.get(&mandate_id).cloned())
    }

    async fn lock_latest_session(
        &mut self,
        worker_id: WorkerId,
        mandate_id: MandateId,
        timer: OpenTimer,
    ) -> StoreResult<Option<Session>> {
        loop {
            let Some(candidate) = self.latest_matching(worker_id, mandate_id, timer) else {
                return Ok(None);
            };
            self.lock(RowKey::Session(candidate.session_id)).await?;

            // Re-read under the lock; another transaction may have moved it on.
            let current = self
                .session_view()
                .into_iter()
                .find(|s| s.session_id == candidate.session_id);
            match current {
                Some(session) if session.is_open() && session.marker(timer).is_some() => {
                    return Ok(Some(session));
                }
                _ => {
                    debug!(
                        "Session {} changed while waiting for its lock, rescanning",
                        candidate.session_id
                    );
                    self.held.release(RowKey::Session(candidate.session_id));
                }
            }
        }
    }

    async fn lock_unclosed_sessions(
        &mut self,
        worker_id: WorkerId,
        mandate_id: MandateId,
    ) -> StoreResult<Vec<Session>> {
        self.lock_open_where(|s| s.worker_id == worker_id && s.mandate_id == mandate_id)
            .await
    }

    async fn lock_open_sessions_for_worker(
        &mut self,
        worker_id: WorkerId,
    ) -> StoreResult<Vec<Session>> {
        self.lock_open_where(|s| s.worker_id == worker_id).await
    }

    async fn count_deliverables(
        &mut self,
        worker_id: WorkerId,
        mandate_id: MandateId,
        since: DateTime<Utc>,
    ) -> StoreResult<u32> {
        let count = self
            .shared
            .tables()
            .deliverables
            .iter()
            .filter(|d| d.counts_toward(worker_id, mandate_id, since))
            .count();
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn update_worker(&mut self, worker: &Worker) -> StoreResult<()> {
        self.lock(RowKey::Worker(worker.worker_id)).await?;
        self.workers.insert(worker.worker_id, worker.clone());
        Ok(())
    }

    async fn update_mandate(&mut self, mandate: &Mandate) -> StoreResult<()> {
        self.lock(RowKey::Mandate(mandate.mandate_id)).await?;
        self.mandates.insert(mandate.mandate_id, mandate.clone());
        Ok(())
    }

    async fn insert_session(&mut self, session: &Session) -> StoreResult<()> {
        let exists = self
            .session_view()
            .iter()
            .any(|s| s.session_id == session.session_id);
        if exists {
            return Err(StoreError::Duplicate {
                row: RowKey::Session(session.session_id).to_string(),
            });
        }
        self.lock(RowKey::Session(session.session_id)).await?;
        self.stage_session(session);
        Ok(())
    }

    async fn update_session(&mut self, session: &Session) -> StoreResult<()> {
        self.lock(RowKey::Session(session.session_id)).await?;
        self.stage_session(session);
        Ok(())
    }

    async fn append_activity(&mut self, entry: &ActivityLogEntry) -> StoreResult<()> {
        self.activity.push(entry.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        {
            let mut tables = this.shared.tables();
            tables.workers.extend(this.workers);
            tables.mandates.extend(this.mandates);
            for session in this.sessions {
                match tables
                    .sessions
                    .iter_mut()
                    .find(|s| s.session_id == session.session_id)
                {
                    Some(existing) => *existing = session,
                    None => tables.sessions.push(session),
                }
            }
            tables.activity.extend(this.activity);
        }
        // Row locks release when `held` drops here, after the writes are visible.
        drop(this.held);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
