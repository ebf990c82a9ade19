use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{InvalidStudentId, InvalidUtcOffset};

/// Student identifier; also used as a file name by the bundled stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StudentId(String);

impl StudentId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, InvalidStudentId> {
        let id = raw.into();
        if id.is_empty() {
            return Err(InvalidStudentId {
                id,
                message: "student id cannot be empty".into(),
            });
        }

        if !id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
        {
            return Err(InvalidStudentId {
                id,
                message: "use ASCII letters, numbers, '-' or '_' only".into(),
            });
        }

        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StudentId {
    type Error = InvalidStudentId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<StudentId> for String {
    fn from(id: StudentId) -> Self {
        id.0
    }
}

/// Identifies the single session a student may hold on a calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub student_id: StudentId,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceSession {
    pub student_id: StudentId,
    pub date: NaiveDate,
    pub time_in: DateTime<Utc>,
    pub time_out: Option<DateTime<Utc>>,
}

impl AttendanceSession {
    pub fn open(key: SessionKey, time_in: DateTime<Utc>) -> Self {
        Self {
            student_id: key.student_id,
            date: key.date,
            time_in,
            time_out: None,
        }
    }

    pub fn key(&self) -> SessionKey {
        SessionKey {
            student_id: self.student_id.clone(),
            date: self.date,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.time_out.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NoSession,
    TimeInRecorded,
    Completed,
}

impl SessionState {
    pub fn of(session: Option<&AttendanceSession>) -> Self {
        match session {
            None => SessionState::NoSession,
            Some(session) if session.is_completed() => SessionState::Completed,
            Some(_) => SessionState::TimeInRecorded,
        }
    }
}

/// Maps instants to attendance days in the deployment's reference offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttendanceCalendar {
    offset: FixedOffset,
}

impl AttendanceCalendar {
    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    pub fn with_offset_minutes(minutes: i32) -> Result<Self, InvalidUtcOffset> {
        minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .map(|offset| Self { offset })
            .ok_or(InvalidUtcOffset(minutes))
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn day_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    pub fn key_for(&self, student: &StudentId, instant: DateTime<Utc>) -> SessionKey {
        SessionKey {
            student_id: student.clone(),
            date: self.day_of(instant),
        }
    }
}

impl Default for AttendanceCalendar {
    fn default() -> Self {
        Self::utc()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn student_id_rejects_path_characters() {
        assert!(StudentId::parse("roll-42_b").is_ok());
        assert!(StudentId::parse("").is_err());
        assert!(StudentId::parse("../etc").is_err());
        assert!(StudentId::parse("a b").is_err());
    }

    #[test]
    fn student_id_deserializes_through_validation() {
        let ok: StudentId = serde_json::from_str("\"s-001\"").unwrap();
        assert_eq!(ok.as_str(), "s-001");
        assert!(serde_json::from_str::<StudentId>("\"s/001\"").is_err());
    }

    #[test]
    fn state_follows_session_fields() {
        let key = SessionKey {
            student_id: StudentId::parse("s-001").unwrap(),
            date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        };
        let time_in = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        let mut session = AttendanceSession::open(key, time_in);

        assert_eq!(SessionState::of(None), SessionState::NoSession);
        assert_eq!(SessionState::of(Some(&session)), SessionState::TimeInRecorded);
        session.time_out = Some(time_in + chrono::Duration::hours(6));
        assert_eq!(SessionState::of(Some(&session)), SessionState::Completed);
    }

    #[test]
    fn calendar_day_uses_reference_offset() {
        let late_utc = Utc.with_ymd_and_hms(2024, 3, 1, 22, 30, 0).unwrap();

        let utc = AttendanceCalendar::utc();
        assert_eq!(utc.day_of(late_utc), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());

        let karachi = AttendanceCalendar::with_offset_minutes(5 * 60).unwrap();
        assert_eq!(
            karachi.day_of(late_utc),
            NaiveDate::from_ymd_opt(2024, 3, 2).unwrap()
        );
    }

    #[test]
    fn calendar_rejects_out_of_range_offsets() {
        assert_eq!(
            AttendanceCalendar::with_offset_minutes(24 * 60),
            Err(InvalidUtcOffset(24 * 60))
        );
        assert_eq!(
            AttendanceCalendar::with_offset_minutes(i32::MAX),
            Err(InvalidUtcOffset(i32::MAX))
        );
    }
}
