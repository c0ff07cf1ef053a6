//! Mandate and worker registries
//!
//! The `check_*` functions run inside a controller transaction against rows
//! the caller has already locked. They never write. Posting and registration
//! are the external operations that create rows the controller later drives.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::{MandateError, MandateResult};
use crate::models::{Mandate, MandateId, MandateStatus, Worker, WorkerId};
use crate::store::SessionStore;

// ============================================================================
// Invariant checks
// ============================================================================

/// Preconditions for `start`, evaluated under locks on both rows.
pub fn check_start(
    worker: &Worker,
    mandate: Option<&Mandate>,
    mandate_id: MandateId,
) -> MandateResult<()> {
    if let Some(active) = worker.active_mandate_id {
        if active != mandate_id {
            return Err(MandateError::WorkerBusy {
                worker_id: worker.worker_id,
                active_mandate_id: active,
            });
        }
    }

    let mandate = mandate.ok_or(MandateError::MandateNotFound { mandate_id })?;

    if !mandate.is_assigned_to(worker.worker_id) {
        return Err(MandateError::NotAssigned {
            worker_id: worker.worker_id,
            mandate_id,
        });
    }

    if mandate.is_in_progress() {
        return Err(MandateError::MandateInProgress { mandate_id });
    }

    if mandate.submitted_at.is_some() {
        return Err(MandateError::MandateClosed {
            mandate_id,
            status: mandate.status,
        });
    }

    if worker.active_mandate_id == Some(mandate_id) {
        return Err(MandateError::inconsistent(format!(
            "worker {} points at mandate {} which is not in progress",
            worker.worker_id, mandate_id
        )));
    }

    Ok(())
}

/// Preconditions for `end`. Returns the mandate the worker is holding.
pub fn check_end(worker: &Worker, mandate: Option<Mandate>) -> MandateResult<Mandate> {
    let mandate_id = worker
        .active_mandate_id
        .ok_or(MandateError::NoActiveMandate {
            worker_id: worker.worker_id,
        })?;

    match mandate {
        Some(mandate) if mandate.is_assigned_to(worker.worker_id) => {
            if mandate.started_at.is_none() {
                return Err(MandateError::inconsistent(format!(
                    "mandate {} is held by worker {} but was never started",
                    mandate_id, worker.worker_id
                )));
            }
            Ok(mandate)
        }
        _ => Err(MandateError::MandateNotHeld {
            worker_id: worker.worker_id,
            mandate_id,
        }),
    }
}

// ============================================================================
// Posting
// ============================================================================

/// Request to post a new mandate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMandate {
    pub title: String,
    pub primary_skills: String,
    pub experience_required: String,
    pub location: String,
    pub positions: u32,
    pub assigned_worker_id: WorkerId,
    pub deadline: NaiveDate,
}

impl NewMandate {
    /// Checks required fields and builds an `open` mandate.
    pub fn validate(self) -> MandateResult<Mandate> {
        for (field, value) in [
            ("title", &self.title),
            ("primary_skills", &self.primary_skills),
            ("experience_required", &self.experience_required),
            ("location", &self.location),
        ] {
            if value.trim().is_empty() {
                return Err(MandateError::invalid(format!("{} is required", field)));
            }
        }
        if self.positions == 0 {
            return Err(MandateError::invalid("positions must be at least 1"));
        }

        Ok(Mandate {
            mandate_id: Uuid::new_v4(),
            title: self.title.trim().to_string(),
            primary_skills: self.primary_skills.trim().to_string(),
            experience_required: self.experience_required.trim().to_string(),
            location: self.location.trim().to_string(),
            positions: self.positions,
            assigned_worker_id: Some(self.assigned_worker_id),
            deadline: self.deadline,
            status: MandateStatus::Open,
            started_at: None,
            submitted_at: None,
        })
    }
}

/// Creates mandates
pub struct MandateRegistry {
    store: Arc<dyn SessionStore>,
}

impl MandateRegistry {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub async fn post(&self, request: NewMandate) -> MandateResult<Mandate> {
        let worker_id = request.assigned_worker_id;
        let mandate = request.validate()?;

        if self.store.worker(worker_id).await?.is_none() {
            return Err(MandateError::WorkerNotFound { worker_id });
        }

        self.store.insert_mandate(&mandate).await?;
        info!(
            "Posted mandate {} ({} positions) for worker {}",
            mandate.mandate_id, mandate.positions, worker_id
        );
        Ok(mandate)
    }
}

/// Registers workers
pub struct WorkerRegistry {
    store: Arc<dyn SessionStore>,
}

impl WorkerRegistry {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub async fn register(&self, name: &str) -> MandateResult<Worker> {
        if name.trim().is_empty() {
            return Err(MandateError::invalid("worker name is required"));
        }
        let worker = Worker::new(name.trim());
        self.store.insert_worker(&worker).await?;
        info!("Registered worker {} ({})", worker.worker_id, worker.name);
        Ok(worker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::Utc;

    fn worker() -> Worker {
        Worker::new("Asha")
    }

    fn mandate_for(worker_id: WorkerId) -> Mandate {
        NewMandate {
            title: "Backend engineer".into(),
            primary_skills: "Rust".into(),
            experience_required: "3 years".into(),
            location: "Pune".into(),
            positions: 5,
            assigned_worker_id: worker_id,
            deadline: NaiveDate::from_ymd_opt(2026, 12, 1).unwrap(),
        }
        .validate()
        .unwrap()
    }

    #[test]
    fn test_start_allowed_for_open_assigned_mandate() {
        let w = worker();
        let m = mandate_for(w.worker_id);
        assert!(check_start(&w, Some(&m), m.mandate_id).is_ok());
    }

    #[test]
    fn test_start_rejects_busy_worker() {
        let mut w = worker();
        w.active_mandate_id = Some(Uuid::new_v4());
        let m = mandate_for(w.worker_id);
        let err = check_start(&w, Some(&m), m.mandate_id).unwrap_err();
        assert!(matches!(err, MandateError::WorkerBusy { .. }));
    }

    #[test]
    fn test_start_rejects_missing_and_unassigned_mandates() {
        let w = worker();
        let missing = check_start(&w, None, Uuid::new_v4()).unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        let m = mandate_for(Uuid::new_v4());
        let forbidden = check_start(&w, Some(&m), m.mandate_id).unwrap_err();
        assert_eq!(forbidden.kind(), ErrorKind::Forbidden);
    }

    #[test]
    fn test_start_rejects_in_progress_and_closed() {
        let w = worker();
        let mut m = mandate_for(w.worker_id);
        m.started_at = Some(Utc::now());
        m.status = MandateStatus::InProgress;
        let err = check_start(&w, Some(&m), m.mandate_id).unwrap_err();
        assert!(matches!(err, MandateError::MandateInProgress { .. }));

        m.submitted_at = Some(Utc::now());
        m.status = MandateStatus::PartialReview;
        let err = check_start(&w, Some(&m), m.mandate_id).unwrap_err();
        assert!(matches!(err, MandateError::MandateClosed { .. }));
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_start_flags_dangling_pointer_as_fatal() {
        let mut w = worker();
        let m = mandate_for(w.worker_id);
        w.active_mandate_id = Some(m.mandate_id);
        let err = check_start(&w, Some(&m), m.mandate_id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }

    #[test]
    fn test_end_requires_held_mandate() {
        let mut w = worker();
        let err = check_end(&w, None).unwrap_err();
        assert!(matches!(err, MandateError::NoActiveMandate { .. }));

        let m = mandate_for(Uuid::new_v4());
        w.active_mandate_id = Some(m.mandate_id);
        let err = check_end(&w, Some(m)).unwrap_err();
        assert!(matches!(err, MandateError::MandateNotHeld { .. }));
    }

    #[test]
    fn test_validate_rejects_blank_fields_and_zero_positions() {
        let base = NewMandate {
            title: "  ".into(),
            primary_skills: "Rust".into(),
            experience_required: "2 years".into(),
            location: "Remote".into(),
            positions: 1,
            assigned_worker_id: Uuid::new_v4(),
            deadline: NaiveDate::from_ymd_opt(2026, 11, 1).unwrap(),
        };
        let err = base.clone().validate().unwrap_err();
        assert!(err.to_string().contains("title"));

        let zero = NewMandate {
            title: "QA".into(),
            positions: 0,
            ..base
        };
        assert_eq!(zero.validate().unwrap_err().kind(), ErrorKind::Invalid);
    }
}
