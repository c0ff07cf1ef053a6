//! Shared fixtures for the mandate desk integration tests
//!
//! A `Desk` wires a `MemoryStore`, a `ManualClock` and the controller
//! together, with one registered worker ready to take mandates.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

use mandate_desk::{
    Clock, ManualClock, Mandate, MandateId, MandateRegistry, MandateSessionController, MemoryStore,
    NewMandate, SessionStore, Worker, WorkerId, WorkerRegistry,
};

pub struct Desk {
    pub store: MemoryStore,
    pub clock: Arc<ManualClock>,
    pub controller: Arc<MandateSessionController>,
    pub mandates: MandateRegistry,
    pub workers: WorkerRegistry,
    pub worker: Worker,
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

impl Desk {
    pub async fn new() -> Self {
        Self::with_store(MemoryStore::new()).await
    }

    pub async fn with_store(store: MemoryStore) -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let shared: Arc<dyn SessionStore> = Arc::new(store.clone());
        let controller = Arc::new(MandateSessionController::new(shared.clone(), clock.clone()));
        let mandates = MandateRegistry::new(shared.clone());
        let workers = WorkerRegistry::new(shared);
        let worker = workers.register("Priya").await.unwrap();

        Self {
            store,
            clock,
            controller,
            mandates,
            workers,
            worker,
        }
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker.worker_id
    }

    /// Post an open mandate assigned to this desk's worker.
    pub async fn post(&self, positions: u32) -> Mandate {
        self.post_for(self.worker_id(), positions).await
    }

    pub async fn post_for(&self, worker_id: WorkerId, positions: u32) -> Mandate {
        self.mandates
            .post(NewMandate {
                title: "Senior Rust Engineer".into(),
                primary_skills: "Rust, Postgres".into(),
                experience_required: "5 years".into(),
                location: "Bengaluru".into(),
                positions,
                assigned_worker_id: worker_id,
                deadline: NaiveDate::from_ymd_opt(2026, 6, 30).unwrap(),
            })
            .await
            .unwrap()
    }

    pub async fn worker_row(&self) -> Worker {
        self.store.worker(self.worker_id()).await.unwrap().unwrap()
    }

    pub async fn mandate_row(&self, mandate_id: MandateId) -> Mandate {
        self.store.mandate(mandate_id).await.unwrap().unwrap()
    }

    /// The worker's pointer is set exactly when it has an unclosed session on that mandate.
    pub async fn assert_pointer_matches_open_session(&self) {
        let worker = self.worker_row().await;
        let open = self.store.open_session(self.worker_id()).await.unwrap();
        match (worker.active_mandate_id, open) {
            (None, None) => {}
            (Some(pointer), Some(session)) => assert_eq!(pointer, session.mandate_id),
            (pointer, session) => panic!(
                "pointer {:?} disagrees with open session {:?}",
                pointer, session
            ),
        }
    }
}
