//! Mandate, worker, session and activity records
//!
//! Status enums carry `as_str`/`parse` pairs so the Postgres store can keep
//! them in plain VARCHAR columns.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type WorkerId = Uuid;
pub type MandateId = Uuid;

// ============================================================================
// Statuses
// ============================================================================

/// Mandate lifecycle: `open -> in_progress -> {partial_review, completed_review, done}`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MandateStatus {
    #[default]
    Open,
    InProgress,
    PartialReview,
    CompletedReview,
    Done,
}

impl MandateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::PartialReview => "partial_review",
            Self::CompletedReview => "completed_review",
            Self::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "in_progress" => Some(Self::InProgress),
            "partial_review" => Some(Self::PartialReview),
            "completed_review" => Some(Self::CompletedReview),
            "done" => Some(Self::Done),
            _ => None,
        }
    }

    /// Terminal status decided at `end` from the deliverable count.
    pub fn for_deliverables(count: u32, positions: u32) -> Self {
        if count >= positions {
            Self::CompletedReview
        } else {
            Self::PartialReview
        }
    }
}

impl fmt::Display for MandateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Worker presence
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Active,
    #[default]
    Inactive,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status recorded in the activity log at each transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Active,
    Inactive,
    Ended,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Ended => "ended",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "ended" => Some(Self::Ended),
            _ => None,
        }
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which start marker of a session is set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenTimer {
    Active,
    Inactive,
}

// ============================================================================
// Records
// ============================================================================

/// A unit of assigned work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mandate {
    pub mandate_id: MandateId,
    pub title: String,
    pub primary_skills: String,
    pub experience_required: String,
    pub location: String,
    pub positions: u32,
    pub assigned_worker_id: Option<WorkerId>,
    pub deadline: NaiveDate,
    pub status: MandateStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl Mandate {
    /// `started_at` set and `submitted_at` still null
    pub fn is_in_progress(&self) -> bool {
        self.started_at.is_some() && self.submitted_at.is_none()
    }

    pub fn is_assigned_to(&self, worker_id: WorkerId) -> bool {
        self.assigned_worker_id == Some(worker_id)
    }
}

/// An actor holding at most one active mandate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub worker_id: WorkerId,
    pub name: String,
    pub presence: PresenceStatus,
    pub active_mandate_id: Option<MandateId>,
}

impl Worker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            worker_id: Uuid::new_v4(),
            name: name.into(),
            presence: PresenceStatus::Inactive,
            active_mandate_id: None,
        }
    }
}

/// Time accounting for one activation of a (worker, mandate) pair.
///
/// While open exactly one of `active_start_time` / `inactive_start_time` is
/// set; after close both are null and `submitted_at` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub worker_id: WorkerId,
    pub mandate_id: MandateId,
    pub started_at: DateTime<Utc>,
    pub active_start_time: Option<DateTime<Utc>>,
    pub inactive_start_time: Option<DateTime<Utc>>,
    pub total_active_secs: i64,
    pub total_inactive_secs: i64,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl Session {
    /// A fresh session with its active timer running from `now`.
    pub fn open(worker_id: WorkerId, mandate_id: MandateId, now: DateTime<Utc>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            worker_id,
            mandate_id,
            started_at: now,
            active_start_time: Some(now),
            inactive_start_time: None,
            total_active_secs: 0,
            total_inactive_secs: 0,
            submitted_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.submitted_at.is_none()
    }

    pub fn open_timer(&self) -> Option<OpenTimer> {
        match (self.active_start_time, self.inactive_start_time) {
            (Some(_), _) => Some(OpenTimer::Active),
            (None, Some(_)) => Some(OpenTimer::Inactive),
            (None, None) => None,
        }
    }

    pub fn marker(&self, timer: OpenTimer) -> Option<DateTime<Utc>> {
        match timer {
            OpenTimer::Active => self.active_start_time,
            OpenTimer::Inactive => self.inactive_start_time,
        }
    }

    pub fn totals(&self) -> SessionTotals {
        SessionTotals {
            session_id: self.session_id,
            total_active_secs: self.total_active_secs,
            total_inactive_secs: self.total_inactive_secs,
        }
    }
}

/// Append-only audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub entry_id: Uuid,
    pub worker_id: WorkerId,
    pub mandate_id: MandateId,
    pub status: ActivityStatus,
    pub recorded_at: DateTime<Utc>,
}

impl ActivityLogEntry {
    pub fn new(
        worker_id: WorkerId,
        mandate_id: MandateId,
        status: ActivityStatus,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            worker_id,
            mandate_id,
            status,
            recorded_at,
        }
    }
}

/// An artifact counted toward a mandate's `positions` target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deliverable {
    pub deliverable_id: Uuid,
    pub worker_id: WorkerId,
    /// `None` when the upload was not linked to a mandate.
    pub mandate_id: Option<MandateId>,
    pub recorded_at: DateTime<Utc>,
}

impl Deliverable {
    pub fn new(
        worker_id: WorkerId,
        mandate_id: Option<MandateId>,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            deliverable_id: Uuid::new_v4(),
            worker_id,
            mandate_id,
            recorded_at,
        }
    }

    /// Counted toward `mandate_id` when uploaded by the worker at or after `since`.
    /// Deliverables linked to another mandate are never counted.
    pub fn counts_toward(
        &self,
        worker_id: WorkerId,
        mandate_id: MandateId,
        since: DateTime<Utc>,
    ) -> bool {
        self.worker_id == worker_id
            && self.recorded_at >= since
            && self.mandate_id.map_or(true, |m| m == mandate_id)
    }
}

// ============================================================================
// Operation outputs
// ============================================================================

/// Accumulated seconds of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTotals {
    pub session_id: Uuid,
    pub total_active_secs: i64,
    pub total_inactive_secs: i64,
}

/// Result of a successful `end`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndSummary {
    pub mandate_id: MandateId,
    pub status: MandateStatus,
    pub deliverable_count: u32,
    pub positions: u32,
    pub total_active_secs: i64,
    pub total_inactive_secs: i64,
}

/// Read-only view of a worker and its open session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub worker_id: WorkerId,
    pub presence: PresenceStatus,
    pub active_mandate_id: Option<MandateId>,
    pub open_timer: Option<OpenTimer>,
    /// Totals including the running timer up to the time of the read
    pub session: Option<SessionTotals>,
}
