//! Session timer accounting
//!
//! Pure functions over a [`Session`] and "now". Elapsed time since a start
//! marker is folded into the matching total and the marker cleared. If the
//! clock has moved backwards the elapsed time is clamped to zero, so totals
//! never decrease.

use chrono::{DateTime, Utc};

use crate::models::{OpenTimer, Session, SessionTotals};

/// Whole seconds from `start` to `now`, floored at zero.
pub fn elapsed_secs(start: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - start).num_seconds().max(0)
}

/// Stops the active timer and starts the inactive one.
///
/// Returns `false` and leaves the session untouched when no active timer is running.
pub fn pause(session: &mut Session, now: DateTime<Utc>) -> bool {
    let Some(start) = session.active_start_time else {
        return false;
    };
    session.total_active_secs += elapsed_secs(start, now);
    session.active_start_time = None;
    session.inactive_start_time = Some(now);
    true
}

/// Stops the inactive timer and starts the active one.
pub fn resume(session: &mut Session, now: DateTime<Utc>) -> bool {
    let Some(start) = session.inactive_start_time else {
        return false;
    };
    session.total_inactive_secs += elapsed_secs(start, now);
    session.inactive_start_time = None;
    session.active_start_time = Some(now);
    true
}

/// Flushes whichever timer is open, clears both markers and stamps `submitted_at`.
/// A session with no open timer gains nothing.
pub fn close(session: &mut Session, now: DateTime<Utc>) {
    if let Some(start) = session.active_start_time.take() {
        session.total_active_secs += elapsed_secs(start, now);
    }
    if let Some(start) = session.inactive_start_time.take() {
        session.total_inactive_secs += elapsed_secs(start, now);
    }
    session.submitted_at = Some(now);
}

/// Totals as they would read if the session were flushed at `now`. Does not mutate.
pub fn running_totals(session: &Session, now: DateTime<Utc>) -> SessionTotals {
    let mut totals = session.totals();
    match session.open_timer() {
        Some(OpenTimer::Active) => {
            if let Some(start) = session.active_start_time {
                totals.total_active_secs += elapsed_secs(start, now);
            }
        }
        Some(OpenTimer::Inactive) => {
            if let Some(start) = session.inactive_start_time {
                totals.total_inactive_secs += elapsed_secs(start, now);
            }
        }
        None => {}
    }
    totals
}
