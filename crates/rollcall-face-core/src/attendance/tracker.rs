use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::attendance::session::{
    AttendanceCalendar, AttendanceSession, SessionKey, SessionState, StudentId,
};
use crate::attendance::store::SessionStore;
use crate::errors::SessionError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTransition {
    TimeInRecorded(AttendanceSession),
    TimeOutRecorded(AttendanceSession),
    AlreadyCompleted(AttendanceSession),
}

impl SessionTransition {
    pub fn session(&self) -> &AttendanceSession {
        match self {
            SessionTransition::TimeInRecorded(session)
            | SessionTransition::TimeOutRecorded(session)
            | SessionTransition::AlreadyCompleted(session) => session,
        }
    }
}

/// Drives the per-student, per-day `NoSession -> TimeInRecorded -> Completed`
/// machine against a [`SessionStore`].
pub struct SessionTracker<S> {
    store: S,
    calendar: AttendanceCalendar,
}

impl<S: SessionStore> SessionTracker<S> {
    pub fn new(store: S, calendar: AttendanceCalendar) -> Self {
        Self { store, calendar }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn calendar(&self) -> AttendanceCalendar {
        self.calendar
    }

    pub fn state(&self, student: &StudentId, now: DateTime<Utc>) -> Result<SessionState, SessionError> {
        let key = self.calendar.key_for(student, now);
        Ok(SessionState::of(self.store.load(&key)?.as_ref()))
    }

    /// Applies a successful face match at `now`.
    ///
    /// A lost write race is retried once from a fresh read; a second conflict
    /// is reported as [`SessionError::ConflictRetryExhausted`].
    pub fn apply_match(
        &self,
        student: &StudentId,
        now: DateTime<Utc>,
    ) -> Result<SessionTransition, SessionError> {
        let key = self.calendar.key_for(student, now);
        match self.try_apply(&key, now) {
            Err(err) if err.is_conflict() => {
                warn!(student = %key.student_id, date = %key.date, "session write conflict; retrying");
                self.try_apply(&key, now).map_err(|err| {
                    if err.is_conflict() {
                        SessionError::ConflictRetryExhausted {
                            student_id: key.student_id.to_string(),
                            date: key.date,
                        }
                    } else {
                        err
                    }
                })
            }
            other => other,
        }
    }

    fn try_apply(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
    ) -> Result<SessionTransition, SessionError> {
        let existing = self.store.load(key)?;
        let state = SessionState::of(existing.as_ref());
        debug!(student = %key.student_id, date = %key.date, ?state, "current session state");

        match existing {
            None => {
                let session = AttendanceSession::open(key.clone(), now);
                self.store.insert_time_in(&session)?;
                info!(student = %key.student_id, date = %key.date, "time-in recorded");
                Ok(SessionTransition::TimeInRecorded(session))
            }
            Some(open) if !open.is_completed() => {
                // Never earlier than time-in, even if the clock stepped back.
                let time_out = now.max(open.time_in);
                let session = self.store.record_time_out(key, time_out)?;
                info!(student = %key.student_id, date = %key.date, "time-out recorded");
                Ok(SessionTransition::TimeOutRecorded(session))
            }
            Some(completed) => Ok(SessionTransition::AlreadyCompleted(completed)),
        }
    }
}
