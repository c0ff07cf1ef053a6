//! Mandate session controller
//!
//! Implements the four transitions of a (worker, mandate) pair:
//!
//! ```text
//! unstarted --start--> active <--pause/resume--> paused
//!                         \                        /
//!                          +--------end-----------+--> ended
//! ```
//!
//! Each transition runs in one store transaction: lock rows (Worker, then
//! Mandate, then Session), validate, write mandate/worker/session together,
//! append an activity entry, commit. Any failure rolls the whole transaction
//! back before the error is returned. Nothing here retries; a transient
//! failure is handed back to the caller to retry as a fresh request.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::error::{ErrorKind, MandateError, MandateResult};
use crate::models::{
    ActivityLogEntry, ActivityStatus, EndSummary, Mandate, MandateId, MandateStatus, OpenTimer,
    PresenceStatus, Session, SessionTotals, WorkerId, WorkerStatus,
};
use crate::registry;
use crate::store::{SessionStore, StoreTx};
use crate::timer;

/// Orchestrates start/pause/resume/end across mandates, workers and sessions.
pub struct MandateSessionController {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
}

impl MandateSessionController {
    pub fn new(store: Arc<dyn SessionStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    /// Start `mandate_id` for `worker_id` and open a session with its active timer running.
    pub async fn start(&self, worker_id: WorkerId, mandate_id: MandateId) -> MandateResult<MandateId> {
        let mut tx = self.store.begin().await?;
        let result = self.start_steps(tx.as_mut(), worker_id, mandate_id).await;
        let started_at = self.finish(tx, result, "start", worker_id).await?;

        info!(
            "Mandate {} started by worker {} at {}",
            mandate_id, worker_id, started_at
        );
        Ok(mandate_id)
    }

    /// Stop the active timer and start the inactive one.
    pub async fn pause(&self, worker_id: WorkerId, mandate_id: MandateId) -> MandateResult<SessionTotals> {
        let mut tx = self.store.begin().await?;
        let result = self
            .toggle_steps(tx.as_mut(), worker_id, mandate_id, OpenTimer::Active)
            .await;
        let totals = self.finish(tx, result, "pause", worker_id).await?;

        info!(
            "Worker {} paused mandate {} (active {}s)",
            worker_id, mandate_id, totals.total_active_secs
        );
        Ok(totals)
    }

    /// Stop the inactive timer and start the active one.
    pub async fn resume(&self, worker_id: WorkerId, mandate_id: MandateId) -> MandateResult<SessionTotals> {
        let mut tx = self.store.begin().await?;
        let result = self
            .toggle_steps(tx.as_mut(), worker_id, mandate_id, OpenTimer::Inactive)
            .await;
        let totals = self.finish(tx, result, "resume", worker_id).await?;

        info!(
            "Worker {} resumed mandate {} (inactive {}s)",
            worker_id, mandate_id, totals.total_inactive_secs
        );
        Ok(totals)
    }

    /// Close the worker's active mandate, deciding its review status from the
    /// deliverables produced since it started.
    pub async fn end(&self, worker_id: WorkerId) -> MandateResult<EndSummary> {
        let mut tx = self.store.begin().await?;
        let result = self.end_steps(tx.as_mut(), worker_id).await;
        let summary = self.finish(tx, result, "end", worker_id).await?;

        info!(
            "Worker {} ended mandate {} as {} ({}/{} deliverables, active {}s, inactive {}s)",
            worker_id,
            summary.mandate_id,
            summary.status,
            summary.deliverable_count,
            summary.positions,
            summary.total_active_secs,
            summary.total_inactive_secs
        );
        Ok(summary)
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// The mandate the worker currently holds, if any.
    pub async fn active_mandate(&self, worker_id: WorkerId) -> MandateResult<Option<Mandate>> {
        let worker = self
            .store
            .worker(worker_id)
            .await?
            .ok_or(MandateError::WorkerNotFound { worker_id })?;

        match worker.active_mandate_id {
            Some(mandate_id) => Ok(self.store.mandate(mandate_id).await?),
            None => Ok(None),
        }
    }

    /// Presence, pointer and running session totals as of now.
    pub async fn status(&self, worker_id: WorkerId) -> MandateResult<WorkerStatus> {
        let worker = self
            .store
            .worker(worker_id)
            .await?
            .ok_or(MandateError::WorkerNotFound { worker_id })?;
        let session = self.store.open_session(worker_id).await?;
        let now = self.clock.now();

        Ok(WorkerStatus {
            worker_id,
            presence: worker.presence,
            active_mandate_id: worker.active_mandate_id,
            open_timer: session.as_ref().and_then(Session::open_timer),
            session: session.as_ref().map(|s| timer::running_totals(s, now)),
        })
    }

    // ------------------------------------------------------------------------
    // Transaction bodies
    // ------------------------------------------------------------------------

    async fn start_steps(
        &self,
        tx: &mut dyn StoreTx,
        worker_id: WorkerId,
        mandate_id: MandateId,
    ) -> MandateResult<chrono::DateTime<chrono::Utc>> {
        let mut worker = tx
            .lock_worker(worker_id)
            .await?
            .ok_or(MandateError::WorkerNotFound { worker_id })?;
        let mandate = tx.lock_mandate(mandate_id).await?;

        registry::check_start(&worker, mandate.as_ref(), mandate_id)?;
        let mut mandate = mandate.ok_or(MandateError::MandateNotFound { mandate_id })?;

        // A free worker owns no open session on any mandate.
        let leftover = tx.lock_open_sessions_for_worker(worker_id).await?;
        if let Some(stray) = leftover.first() {
            return Err(MandateError::inconsistent(format!(
                "worker {} has no active mandate but {} unclosed session(s), first on mandate {}",
                worker_id,
                leftover.len(),
                stray.mandate_id
            )));
        }

        let now = self.clock.now();

        mandate.started_at = Some(now);
        mandate.status = MandateStatus::InProgress;
        tx.update_mandate(&mandate).await?;

        worker.presence = PresenceStatus::Active;
        worker.active_mandate_id = Some(mandate_id);
        tx.update_worker(&worker).await?;

        let session = Session::open(worker_id, mandate_id, now);
        tx.insert_session(&session).await?;
        debug!("Opened session {} for worker {}", session.session_id, worker_id);

        tx.append_activity(&ActivityLogEntry::new(
            worker_id,
            mandate_id,
            ActivityStatus::Active,
            now,
        ))
        .await?;

        Ok(now)
    }

    /// Pause when `running` is `Active`, resume when it is `Inactive`.
    async fn toggle_steps(
        &self,
        tx: &mut dyn StoreTx,
        worker_id: WorkerId,
        mandate_id: MandateId,
        running: OpenTimer,
    ) -> MandateResult<SessionTotals> {
        let mut worker = tx
            .lock_worker(worker_id)
            .await?
            .ok_or(MandateError::WorkerNotFound { worker_id })?;

        let missing = || match running {
            OpenTimer::Active => MandateError::NoActiveSession {
                worker_id,
                mandate_id,
            },
            OpenTimer::Inactive => MandateError::NoPausedSession {
                worker_id,
                mandate_id,
            },
        };

        let mut session = tx
            .lock_latest_session(worker_id, mandate_id, running)
            .await?
            .ok_or_else(missing)?;

        let now = self.clock.now();
        let (toggled, presence, logged) = match running {
            OpenTimer::Active => (
                timer::pause(&mut session, now),
                PresenceStatus::Inactive,
                ActivityStatus::Inactive,
            ),
            OpenTimer::Inactive => (
                timer::resume(&mut session, now),
                PresenceStatus::Active,
                ActivityStatus::Active,
            ),
        };
        if !toggled {
            return Err(missing());
        }
        tx.update_session(&session).await?;

        worker.presence = presence;
        tx.update_worker(&worker).await?;

        tx.append_activity(&ActivityLogEntry::new(worker_id, mandate_id, logged, now))
            .await?;

        Ok(session.totals())
    }

    async fn end_steps(&self, tx: &mut dyn StoreTx, worker_id: WorkerId) -> MandateResult<EndSummary> {
        let mut worker = tx
            .lock_worker(worker_id)
            .await?
            .ok_or(MandateError::WorkerNotFound { worker_id })?;
        let mandate_id = worker
            .active_mandate_id
            .ok_or(MandateError::NoActiveMandate { worker_id })?;

        let mandate = tx.lock_mandate(mandate_id).await?;
        let mut mandate = registry::check_end(&worker, mandate)?;

        let mut sessions = tx.lock_unclosed_sessions(worker_id, mandate_id).await?;
        if sessions.is_empty() {
            return Err(MandateError::inconsistent(format!(
                "worker {} holds mandate {} but has no open session",
                worker_id, mandate_id
            )));
        }
        if sessions.len() > 1 {
            warn!(
                "Worker {} has {} unclosed sessions on mandate {}; closing all",
                worker_id,
                sessions.len(),
                mandate_id
            );
        }

        let since = mandate
            .started_at
            .ok_or_else(|| MandateError::inconsistent("held mandate has no start time"))?;
        let deliverable_count = tx.count_deliverables(worker_id, mandate_id, since).await?;
        let status = MandateStatus::for_deliverables(deliverable_count, mandate.positions);

        let now = self.clock.now();

        mandate.submitted_at = Some(now);
        mandate.status = status;
        tx.update_mandate(&mandate).await?;

        worker.presence = PresenceStatus::Inactive;
        worker.active_mandate_id = None;
        tx.update_worker(&worker).await?;

        for session in sessions.iter_mut() {
            timer::close(session, now);
            tx.update_session(session).await?;
        }
        // Sessions come back oldest first; the newest one is the activation being ended.
        let totals = sessions
            .last()
            .map(Session::totals)
            .ok_or_else(|| MandateError::inconsistent("no session left to report"))?;

        tx.append_activity(&ActivityLogEntry::new(
            worker_id,
            mandate_id,
            ActivityStatus::Ended,
            now,
        ))
        .await?;

        Ok(EndSummary {
            mandate_id,
            status,
            deliverable_count,
            positions: mandate.positions,
            total_active_secs: totals.total_active_secs,
            total_inactive_secs: totals.total_inactive_secs,
        })
    }

    /// Commit on success; roll back and surface the original error otherwise.
    async fn finish<T>(
        &self,
        tx: Box<dyn StoreTx>,
        result: MandateResult<T>,
        operation: &str,
        worker_id: WorkerId,
    ) -> MandateResult<T> {
        match result {
            Ok(value) => {
                if let Err(e) = tx.commit().await {
                    error!("{} for worker {} failed to commit: {}", operation, worker_id, e);
                    return Err(e.into());
                }
                Ok(value)
            }
            Err(err) => {
                if let Err(e) = tx.rollback().await {
                    error!(
                        "{} for worker {}: rollback failed after error: {}",
                        operation, worker_id, e
                    );
                }
                match err.kind() {
                    ErrorKind::Transient => {
                        error!("{} for worker {} aborted: {}", operation, worker_id, err)
                    }
                    ErrorKind::Fatal => {
                        error!("{} for worker {} found inconsistency: {}", operation, worker_id, err)
                    }
                    _ => warn!("{} for worker {} rejected: {}", operation, worker_id, err),
                }
                debug!("{} for worker {} rolled back", operation, worker_id);
                Err(err)
            }
        }
    }
}
