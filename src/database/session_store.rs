//! Postgres-backed session store
//!
//! Row locks are `SELECT ... FOR UPDATE` inside a single `sqlx` transaction.
//! When a lock timeout is configured every transaction starts with
//! `SET LOCAL lock_timeout`, and a lock wait that exceeds it surfaces as
//! [`StoreError::LockTimeout`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::models::{
    ActivityLogEntry, ActivityStatus, Deliverable, Mandate, MandateId, MandateStatus, OpenTimer,
    PresenceStatus, Session, Worker, WorkerId,
};
use crate::store::{SessionStore, StoreTx};

/// Postgres SQLSTATE for `lock_not_available`
const LOCK_NOT_AVAILABLE: &str = "55P03";
/// Postgres SQLSTATE for `unique_violation`
const UNIQUE_VIOLATION: &str = "23505";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS workers (
    worker_id UUID PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    presence VARCHAR(16) NOT NULL DEFAULT 'inactive'
        CHECK (presence IN ('active', 'inactive')),
    active_mandate_id UUID NULL
);

CREATE TABLE IF NOT EXISTS mandates (
    mandate_id UUID PRIMARY KEY,
    title VARCHAR(255) NOT NULL,
    primary_skills TEXT NOT NULL,
    experience_required VARCHAR(255) NOT NULL,
    location VARCHAR(255) NOT NULL,
    positions INTEGER NOT NULL CHECK (positions >= 1),
    assigned_worker_id UUID NULL REFERENCES workers(worker_id),
    deadline DATE NOT NULL,
    status VARCHAR(32) NOT NULL DEFAULT 'open'
        CHECK (status IN ('open', 'in_progress', 'partial_review', 'completed_review', 'done')),
    started_at TIMESTAMPTZ NULL,
    submitted_at TIMESTAMPTZ NULL,
    CHECK ((status = 'in_progress') = (started_at IS NOT NULL AND submitted_at IS NULL))
);

CREATE TABLE IF NOT EXISTS mandate_sessions (
    session_id UUID PRIMARY KEY,
    worker_id UUID NOT NULL REFERENCES workers(worker_id),
    mandate_id UUID NOT NULL REFERENCES mandates(mandate_id),
    started_at TIMESTAMPTZ NOT NULL,
    active_start_time TIMESTAMPTZ NULL,
    inactive_start_time TIMESTAMPTZ NULL,
    total_active_secs BIGINT NOT NULL DEFAULT 0 CHECK (total_active_secs >= 0),
    total_inactive_secs BIGINT NOT NULL DEFAULT 0 CHECK (total_inactive_secs >= 0),
    submitted_at TIMESTAMPTZ NULL,
    CHECK (active_start_time IS NULL OR inactive_start_time IS NULL),
    CHECK (submitted_at IS NULL OR (active_start_time IS NULL AND inactive_start_time IS NULL))
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_mandate_sessions_one_open_per_worker
    ON mandate_sessions (worker_id) WHERE submitted_at IS NULL;

CREATE INDEX IF NOT EXISTS idx_mandate_sessions_pair
    ON mandate_sessions (worker_id, mandate_id, started_at DESC);

CREATE TABLE IF NOT EXISTS activity_logs (
    entry_id UUID PRIMARY KEY,
    worker_id UUID NOT NULL REFERENCES workers(worker_id),
    mandate_id UUID NOT NULL REFERENCES mandates(mandate_id),
    status VARCHAR(16) NOT NULL CHECK (status IN ('active', 'inactive', 'ended')),
    recorded_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_activity_logs_worker
    ON activity_logs (worker_id, recorded_at);

CREATE TABLE IF NOT EXISTS deliverables (
    deliverable_id UUID PRIMARY KEY,
    worker_id UUID NOT NULL REFERENCES workers(worker_id),
    mandate_id UUID NULL REFERENCES mandates(mandate_id),
    recorded_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_deliverables_worker
    ON deliverables (worker_id, recorded_at);
"#;

const SESSION_COLUMNS: &str = "session_id, worker_id, mandate_id, started_at, active_start_time, \
     inactive_start_time, total_active_secs, total_inactive_secs, submitted_at";

const MANDATE_COLUMNS: &str = "mandate_id, title, primary_skills, experience_required, location, \
     positions, assigned_worker_id, deadline, status, started_at, submitted_at";

/// Session store over a Postgres pool
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
    lock_timeout: Option<Duration>,
}

impl PgSessionStore {
    pub fn new(pool: PgPool, lock_timeout: Option<Duration>) -> Self {
        Self { pool, lock_timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables, constraints and indexes if they do not exist.
    pub async fn initialize_schema(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        info!("Mandate session schema ready");
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let mut tx = self.pool.begin().await?;
        if let Some(timeout) = self.lock_timeout {
            // SET does not take bind parameters; the value is an integer we format ourselves.
            let statement = format!("SET LOCAL lock_timeout = '{}ms'", timeout.as_millis());
            sqlx::query(&statement).execute(&mut *tx).await?;
        }
        Ok(Box::new(PgTx { tx }))
    }

    async fn worker(&self, worker_id: WorkerId) -> StoreResult<Option<Worker>> {
        let row = sqlx::query(
            r#"
            SELECT worker_id, name, presence, active_mandate_id
            FROM workers
            WHERE worker_id = $1
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(worker_from_row).transpose()
    }

    async fn mandate(&self, mandate_id: MandateId) -> StoreResult<Option<Mandate>> {
        let sql = format!("SELECT {} FROM mandates WHERE mandate_id = $1", MANDATE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(mandate_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(mandate_from_row).transpose()
    }

    async fn sessions_for(
        &self,
        worker_id: WorkerId,
        mandate_id: MandateId,
    ) -> StoreResult<Vec<Session>> {
        let sql = format!(
            "SELECT {} FROM mandate_sessions WHERE worker_id = $1 AND mandate_id = $2 \
             ORDER BY started_at ASC",
            SESSION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(worker_id)
            .bind(mandate_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(session_from_row).collect()
    }

    async fn open_session(&self, worker_id: WorkerId) -> StoreResult<Option<Session>> {
        let sql = format!(
            "SELECT {} FROM mandate_sessions WHERE worker_id = $1 AND submitted_at IS NULL \
             ORDER BY started_at DESC LIMIT 1",
            SESSION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn activity_for_worker(
        &self,
        worker_id: WorkerId,
    ) -> StoreResult<Vec<ActivityLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT entry_id, worker_id, mandate_id, status, recorded_at
            FROM activity_logs
            WHERE worker_id = $1
            ORDER BY recorded_at ASC
            "#,
        )
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(activity_from_row).collect()
    }

    async fn insert_worker(&self, worker: &Worker) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workers (worker_id, name, presence, active_mandate_id)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(worker.worker_id)
        .bind(&worker.name)
        .bind(worker.presence.as_str())
        .bind(worker.active_mandate_id)
        .execute(&self.pool)
        .await
        .map_err(|e| classify(e, format!("worker {}", worker.worker_id)))?;
        Ok(())
    }

    async fn insert_mandate(&self, mandate: &Mandate) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO mandates (mandate_id, title, primary_skills, experience_required,
                                  location, positions, assigned_worker_id, deadline, status,
                                  started_at, submitted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(mandate.mandate_id)
        .bind(&mandate.title)
        .bind(&mandate.primary_skills)
        .bind(&mandate.experience_required)
        .bind(&mandate.location)
        .bind(positions_to_db(mandate.positions)?)
        .bind(mandate.assigned_worker_id)
        .bind(mandate.deadline)
        .bind(mandate.status.as_str())
        .bind(mandate.started_at)
        .bind(mandate.submitted_at)
        .execute(&self.pool)
        .await
        .map_err(|e| classify(e, format!("mandate {}", mandate.mandate_id)))?;
        Ok(())
    }

    async fn record_deliverable(&self, deliverable: &Deliverable) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO deliverables (deliverable_id, worker_id, mandate_id, recorded_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(deliverable.deliverable_id)
        .bind(deliverable.worker_id)
        .bind(deliverable.mandate_id)
        .bind(deliverable.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(|e| classify(e, format!("deliverable {}", deliverable.deliverable_id)))?;
        Ok(())
    }
}

/// One Postgres transaction
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn lock_worker(&mut self, worker_id: WorkerId) -> StoreResult<Option<Worker>> {
        let row = sqlx::query(
            r#"
            SELECT worker_id, name, presence, active_mandate_id
            FROM workers
            WHERE worker_id = $1
            FOR UPDATE
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| classify(e, format!("worker {}", worker_id)))?;

        row.as_ref().map(worker_from_row).transpose()
    }

    async fn lock_mandate(&mut self, mandate_id: MandateId) -> StoreResult<Option<Mandate>> {
        let sql = format!(
            "SELECT {} FROM mandates WHERE mandate_id = $1 FOR UPDATE",
            MANDATE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(mandate_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| classify(e, format!("mandate {}", mandate_id)))?;

        row.as_ref().map(mandate_from_row).transpose()
    }

    async fn lock_latest_session(
        &mut self,
        worker_id: WorkerId,
        mandate_id: MandateId,
        timer: OpenTimer,
    ) -> StoreResult<Option<Session>> {
        let marker = match timer {
            OpenTimer::Active => "active_start_time",
            OpenTimer::Inactive => "inactive_start_time",
        };
        let sql = format!(
            "SELECT {} FROM mandate_sessions \
             WHERE worker_id = $1 AND mandate_id = $2 \
               AND submitted_at IS NULL AND {} IS NOT NULL \
             ORDER BY started_at DESC LIMIT 1 \
             FOR UPDATE",
            SESSION_COLUMNS, marker
        );
        let row = sqlx::query(&sql)
            .bind(worker_id)
            .bind(mandate_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| classify(e, format!("session of worker {}", worker_id)))?;

        row.as_ref().map(session_from_row).transpose()
    }

    async fn lock_unclosed_sessions(
        &mut self,
        worker_id: WorkerId,
        mandate_id: MandateId,
    ) -> StoreResult<Vec<Session>> {
        let sql = format!(
            "SELECT {} FROM mandate_sessions \
             WHERE worker_id = $1 AND mandate_id = $2 AND submitted_at IS NULL \
             ORDER BY started_at ASC \
             FOR UPDATE",
            SESSION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(worker_id)
            .bind(mandate_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| classify(e, format!("sessions of worker {}", worker_id)))?;

        rows.iter().map(session_from_row).collect()
    }

    async fn lock_open_sessions_for_worker(
        &mut self,
        worker_id: WorkerId,
    ) -> StoreResult<Vec<Session>> {
        let sql = format!(
            "SELECT {} FROM mandate_sessions \
             WHERE worker_id = $1 AND submitted_at IS NULL \
             ORDER BY started_at ASC \
             FOR UPDATE",
            SESSION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(worker_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| classify(e, format!("open sessions of worker {}", worker_id)))?;

        rows.iter().map(session_from_row).collect()
    }

    async fn count_deliverables(
        &mut self,
        worker_id: WorkerId,
        mandate_id: MandateId,
        since: DateTime<Utc>,
    ) -> StoreResult<u32> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM deliverables
            WHERE worker_id = $1
              AND recorded_at >= $3
              AND (mandate_id IS NULL OR mandate_id = $2)
            "#,
        )
        .bind(worker_id)
        .bind(mandate_id)
        .bind(since)
        .fetch_one(&mut *self.tx)
        .await?;

        u32::try_from(count).map_err(|_| StoreError::Corrupt {
            message: format!("deliverable count {} out of range", count),
        })
    }

    async fn update_worker(&mut self, worker: &Worker) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE workers
            SET name = $2, presence = $3, active_mandate_id = $4
            WHERE worker_id = $1
            "#,
        )
        .bind(worker.worker_id)
        .bind(&worker.name)
        .bind(worker.presence.as_str())
        .bind(worker.active_mandate_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_mandate(&mut self, mandate: &Mandate) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE mandates
            SET status = $2, started_at = $3, submitted_at = $4, assigned_worker_id = $5
            WHERE mandate_id = $1
            "#,
        )
        .bind(mandate.mandate_id)
        .bind(mandate.status.as_str())
        .bind(mandate.started_at)
        .bind(mandate.submitted_at)
        .bind(mandate.assigned_worker_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_session(&mut self, session: &Session) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO mandate_sessions (session_id, worker_id, mandate_id, started_at,
                                          active_start_time, inactive_start_time,
                                          total_active_secs, total_inactive_secs, submitted_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(session.session_id)
        .bind(session.worker_id)
        .bind(session.mandate_id)
        .bind(session.started_at)
        .bind(session.active_start_time)
        .bind(session.inactive_start_time)
        .bind(session.total_active_secs)
        .bind(session.total_inactive_secs)
        .bind(session.submitted_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| classify(e, format!("session {}", session.session_id)))?;
        Ok(())
    }

    async fn update_session(&mut self, session: &Session) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE mandate_sessions
            SET active_start_time = $2, inactive_start_time = $3,
                total_active_secs = $4, total_inactive_secs = $5, submitted_at = $6
            WHERE session_id = $1
            "#,
        )
        .bind(session.session_id)
        .bind(session.active_start_time)
        .bind(session.inactive_start_time)
        .bind(session.total_active_secs)
        .bind(session.total_inactive_secs)
        .bind(session.submitted_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn append_activity(&mut self, entry: &ActivityLogEntry) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO activity_logs (entry_id, worker_id, mandate_id, status, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.entry_id)
        .bind(entry.worker_id)
        .bind(entry.mandate_id)
        .bind(entry.status.as_str())
        .bind(entry.recorded_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        this.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        let this = *self;
        this.tx.rollback().await?;
        debug!("Transaction rolled back");
        Ok(())
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn classify(err: sqlx::Error, row: String) -> StoreError {
    let code = err
        .as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.into_owned());
    match code.as_deref() {
        Some(LOCK_NOT_AVAILABLE) => StoreError::LockTimeout { row },
        Some(UNIQUE_VIOLATION) => StoreError::Duplicate { row },
        _ => StoreError::Database(err),
    }
}

fn corrupt(column: &str, value: &str) -> StoreError {
    StoreError::Corrupt {
        message: format!("unexpected {} value '{}'", column, value),
    }
}

fn positions_to_db(positions: u32) -> StoreResult<i32> {
    i32::try_from(positions).map_err(|_| StoreError::Corrupt {
        message: format!("positions {} exceeds column range", positions),
    })
}

fn worker_from_row(row: &PgRow) -> StoreResult<Worker> {
    let presence: String = row.try_get("presence")?;
    Ok(Worker {
        worker_id: row.try_get("worker_id")?,
        name: row.try_get("name")?,
        presence: PresenceStatus::parse(&presence).ok_or_else(|| corrupt("presence", &presence))?,
        active_mandate_id: row.try_get("active_mandate_id")?,
    })
}

fn mandate_from_row(row: &PgRow) -> StoreResult<Mandate> {
    let status: String = row.try_get("status")?;
    let positions: i32 = row.try_get("positions")?;
    Ok(Mandate {
        mandate_id: row.try_get("mandate_id")?,
        title: row.try_get("title")?,
        primary_skills: row.try_get("primary_skills")?,
        experience_required: row.try_get("experience_required")?,
        location: row.try_get("location")?,
        positions: u32::try_from(positions)
            .map_err(|_| corrupt("positions", &positions.to_string()))?,
        assigned_worker_id: row.try_get("assigned_worker_id")?,
        deadline: row.try_get("deadline")?,
        status: MandateStatus::parse(&status).ok_or_else(|| corrupt("status", &status))?,
        started_at: row.try_get("started_at")?,
        submitted_at: row.try_get("submitted_at")?,
    })
}

fn session_from_row(row: &PgRow) -> StoreResult<Session> {
    Ok(Session {
        session_id: row.try_get("session_id")?,
        worker_id: row.try_get("worker_id")?,
        mandate_id: row.try_get("mandate_id")?,
        started_at: row.try_get("started_at")?,
        active_start_time: row.try_get("active_start_time")?,
        inactive_start_time: row.try_get("inactive_start_time")?,
        total_active_secs: row.try_get("total_active_secs")?,
        total_inactive_secs: row.try_get("total_inactive_secs")?,
        submitted_at: row.try_get("submitted_at")?,
    })
}

fn activity_from_row(row: &PgRow) -> StoreResult<ActivityLogEntry> {
    let status: String = row.try_get("status")?;
    Ok(ActivityLogEntry {
        entry_id: row.try_get("entry_id")?,
        worker_id: row.try_get("worker_id")?,
        mandate_id: row.try_get("mandate_id")?,
        status: ActivityStatus::parse(&status).ok_or_else(|| corrupt("status", &status))?,
        recorded_at: row.try_get("recorded_at")?,
    })
}
