//! Inactivity watchdog
//!
//! Remembers when each worker last showed activity. A sweep pauses workers
//! that have been idle for at least the configured timeout; the next
//! heartbeat from a paused worker resumes it. The watchdog drives the
//! controller exactly like an interactive client would.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::controller::MandateSessionController;
use crate::error::{ErrorKind, MandateError, MandateResult};
use crate::models::{MandateId, OpenTimer, WorkerId};

#[derive(Debug, Clone, Copy)]
struct Tracked {
    mandate_id: MandateId,
    last_seen: DateTime<Utc>,
    paused: bool,
}

/// What a heartbeat did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Heartbeat {
    /// Worker was already active; idle clock reset.
    Refreshed,
    /// Worker was paused and has been resumed.
    Resumed,
}

pub struct InactivityWatchdog {
    controller: Arc<MandateSessionController>,
    idle_timeout: chrono::Duration,
    tracked: RwLock<HashMap<WorkerId, Tracked>>,
}

impl InactivityWatchdog {
    pub fn new(controller: Arc<MandateSessionController>, idle_timeout: Duration) -> Self {
        let idle_timeout =
            chrono::Duration::from_std(idle_timeout).unwrap_or_else(|_| chrono::Duration::minutes(5));
        Self {
            controller,
            idle_timeout,
            tracked: RwLock::new(HashMap::new()),
        }
    }

    /// Record activity from `worker_id` on `mandate_id`, resuming it if paused.
    pub async fn heartbeat(&self, worker_id: WorkerId, mandate_id: MandateId) -> MandateResult<Heartbeat> {
        let now = self.controller.clock().now();

        {
            let mut tracked = self.tracked.write().await;
            if let Some(entry) = tracked.get_mut(&worker_id) {
                if entry.mandate_id == mandate_id && !entry.paused {
                    entry.last_seen = now;
                    return Ok(Heartbeat::Refreshed);
                }
            }
        }

        // Unknown or paused: resynchronise from the store.
        let status = self.controller.status(worker_id).await?;
        if status.active_mandate_id != Some(mandate_id) {
            self.forget(worker_id).await;
            return Err(MandateError::NoActiveSession {
                worker_id,
                mandate_id,
            });
        }

        let outcome = if status.open_timer == Some(OpenTimer::Inactive) {
            match self.controller.resume(worker_id, mandate_id).await {
                Ok(_) => Heartbeat::Resumed,
                // Resumed by someone else in the meantime.
                Err(MandateError::NoPausedSession { .. }) => Heartbeat::Refreshed,
                Err(e) => return Err(e),
            }
        } else {
            Heartbeat::Refreshed
        };

        self.tracked.write().await.insert(
            worker_id,
            Tracked {
                mandate_id,
                last_seen: now,
                paused: false,
            },
        );
        if outcome == Heartbeat::Resumed {
            info!("Watchdog resumed worker {} on activity", worker_id);
        }
        Ok(outcome)
    }

    /// Stop tracking a worker, e.g. after its mandate ended.
    pub async fn forget(&self, worker_id: WorkerId) {
        self.tracked.write().await.remove(&worker_id);
    }

    pub async fn tracked_workers(&self) -> usize {
        self.tracked.read().await.len()
    }

    /// Pause every tracked worker idle for at least the timeout. Returns the
    /// workers paused by this sweep.
    pub async fn sweep(&self) -> Vec<WorkerId> {
        let now = self.controller.clock().now();
        let idle: Vec<(WorkerId, MandateId)> = self
            .tracked
            .read()
            .await
            .iter()
            .filter(|(_, t)| !t.paused && now - t.last_seen >= self.idle_timeout)
            .map(|(worker_id, t)| (*worker_id, t.mandate_id))
            .collect();

        let mut paused = Vec::new();
        for (worker_id, mandate_id) in idle {
            match self.controller.pause(worker_id, mandate_id).await {
                Ok(_) => {
                    info!("Watchdog paused idle worker {} on mandate {}", worker_id, mandate_id);
                    self.mark_paused(worker_id).await;
                    paused.push(worker_id);
                }
                Err(MandateError::NoActiveSession { .. }) => {
                    debug!("Worker {} had no active session to pause", worker_id);
                    self.resync_after_missed_pause(worker_id, mandate_id).await;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!("Forgetting worker {}: {}", worker_id, e);
                    self.forget(worker_id).await;
                }
                Err(e) => {
                    warn!("Watchdog could not pause worker {}: {}", worker_id, e);
                }
            }
        }
        paused
    }

    /// Keep tracking a worker still holding the mandate (paused elsewhere) and
    /// drop one whose mandate was ended or swapped.
    async fn resync_after_missed_pause(&self, worker_id: WorkerId, mandate_id: MandateId) {
        match self.controller.status(worker_id).await {
            Ok(status) if status.active_mandate_id == Some(mandate_id) => {
                self.mark_paused(worker_id).await;
            }
            Ok(_) => {
                debug!("Forgetting worker {}: mandate {} no longer held", worker_id, mandate_id);
                self.forget(worker_id).await;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Forgetting worker {}: {}", worker_id, e);
                self.forget(worker_id).await;
            }
            Err(e) => {
                warn!("Watchdog could not resync worker {}: {}", worker_id, e);
            }
        }
    }

    /// Sweep on a fixed interval until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!("Inactivity watchdog running every {:?}", interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Inactivity watchdog stopped");
    }

    async fn mark_paused(&self, worker_id: WorkerId) {
        if let Some(entry) = self.tracked.write().await.get_mut(&worker_id) {
            entry.paused = true;
        }
    }
}
