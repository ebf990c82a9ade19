//! Attendance session persistence.
//!
//! Every store enforces uniqueness of `(student_id, date)` and refuses to
//! overwrite a recorded time-out. Losing either race yields
//! [`SessionError::StorageConflict`], which the tracker handles by re-reading.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::attendance::session::{AttendanceSession, SessionKey, StudentId};
use crate::errors::SessionError;

const SESSION_DIR: &str = "sessions";
const TIME_IN_SUFFIX: &str = ".in.json";
const TIME_OUT_SUFFIX: &str = ".out.json";
const DATE_FORMAT: &str = "%Y-%m-%d";

pub trait SessionStore: Send + Sync {
    fn load(&self, key: &SessionKey) -> Result<Option<AttendanceSession>, SessionError>;

    /// Creates the day's session. Fails with a conflict if one already exists.
    fn insert_time_in(&self, session: &AttendanceSession) -> Result<(), SessionError>;

    /// Completes an open session. Fails with a conflict if the session is
    /// missing or already completed.
    fn record_time_out(
        &self,
        key: &SessionKey,
        time_out: DateTime<Utc>,
    ) -> Result<AttendanceSession, SessionError>;

    /// One student's sessions, newest first.
    fn history(&self, student: &StudentId) -> Result<Vec<AttendanceSession>, SessionError>;

    /// Every student's sessions, newest first.
    fn all(&self) -> Result<Vec<AttendanceSession>, SessionError>;
}

impl<S: SessionStore + ?Sized> SessionStore for Arc<S> {
    fn load(&self, key: &SessionKey) -> Result<Option<AttendanceSession>, SessionError> {
        (**self).load(key)
    }

    fn insert_time_in(&self, session: &AttendanceSession) -> Result<(), SessionError> {
        (**self).insert_time_in(session)
    }

    fn record_time_out(
        &self,
        key: &SessionKey,
        time_out: DateTime<Utc>,
    ) -> Result<AttendanceSession, SessionError> {
        (**self).record_time_out(key, time_out)
    }

    fn history(&self, student: &StudentId) -> Result<Vec<AttendanceSession>, SessionError> {
        (**self).history(student)
    }

    fn all(&self) -> Result<Vec<AttendanceSession>, SessionError> {
        (**self).all()
    }
}

fn conflict(key: &SessionKey) -> SessionError {
    SessionError::StorageConflict {
        student_id: key.student_id.to_string(),
        date: key.date,
    }
}

fn newest_first(sessions: &mut [AttendanceSession]) {
    sessions.sort_by(|a, b| {
        b.time_in
            .cmp(&a.time_in)
            .then_with(|| a.student_id.cmp(&b.student_id))
    });
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<SessionKey, AttendanceSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<SessionKey, AttendanceSession>>, SessionError> {
        self.sessions.lock().map_err(|_| SessionError::Poisoned)
    }
}

impl SessionStore for InMemorySessionStore {
    fn load(&self, key: &SessionKey) -> Result<Option<AttendanceSession>, SessionError> {
        Ok(self.guard()?.get(key).cloned())
    }

    fn insert_time_in(&self, session: &AttendanceSession) -> Result<(), SessionError> {
        let key = session.key();
        match self.guard()?.entry(key) {
            Entry::Occupied(entry) => Err(conflict(entry.key())),
            Entry::Vacant(entry) => {
                entry.insert(session.clone());
                Ok(())
            }
        }
    }

    fn record_time_out(
        &self,
        key: &SessionKey,
        time_out: DateTime<Utc>,
    ) -> Result<AttendanceSession, SessionError> {
        let mut sessions = self.guard()?;
        match sessions.get_mut(key) {
            Some(session) if session.time_out.is_none() => {
                session.time_out = Some(time_out);
                Ok(session.clone())
            }
            _ => Err(conflict(key)),
        }
    }

    fn history(&self, student: &StudentId) -> Result<Vec<AttendanceSession>, SessionError> {
        let mut sessions: Vec<_> = self
            .guard()?
            .values()
            .filter(|session| &session.student_id == student)
            .cloned()
            .collect();
        newest_first(&mut sessions);
        Ok(sessions)
    }

    fn all(&self) -> Result<Vec<AttendanceSession>, SessionError> {
        let mut sessions: Vec<_> = self.guard()?.values().cloned().collect();
        newest_first(&mut sessions);
        Ok(sessions)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TimeInRecord {
    student_id: StudentId,
    date: NaiveDate,
    time_in: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TimeOutRecord {
    time_out: DateTime<Utc>,
}

/// Sessions as `<store>/sessions/<student>/<date>.in.json` plus an optional
/// `<date>.out.json`. Both files are published with an exclusive create, so
/// the uniqueness checks also hold between processes.
#[derive(Debug, Clone)]
pub struct FilesystemSessionStore {
    root: PathBuf,
}

impl FilesystemSessionStore {
    pub fn new(store_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: store_dir.into().join(SESSION_DIR),
        }
    }

    fn student_dir(&self, student: &StudentId) -> PathBuf {
        self.root.join(student.as_str())
    }

    fn time_in_path(&self, key: &SessionKey) -> PathBuf {
        self.student_dir(&key.student_id)
            .join(format!("{}{TIME_IN_SUFFIX}", key.date.format(DATE_FORMAT)))
    }

    fn time_out_path(&self, key: &SessionKey) -> PathBuf {
        self.student_dir(&key.student_id)
            .join(format!("{}{TIME_OUT_SUFFIX}", key.date.format(DATE_FORMAT)))
    }
}

impl SessionStore for FilesystemSessionStore {
    fn load(&self, key: &SessionKey) -> Result<Option<AttendanceSession>, SessionError> {
        let in_path = self.time_in_path(key);
        let Some(record) = read_record::<TimeInRecord>(&in_path)? else {
            return Ok(None);
        };
        if record.student_id != key.student_id || record.date != key.date {
            return Err(SessionError::InvalidRecord {
                path: in_path,
                message: format!(
                    "record belongs to {} on {}",
                    record.student_id, record.date
                ),
            });
        }

        let time_out = read_record::<TimeOutRecord>(&self.time_out_path(key))?
            .map(|record| record.time_out);

        Ok(Some(AttendanceSession {
            student_id: record.student_id,
            date: record.date,
            time_in: record.time_in,
            time_out,
        }))
    }

    fn insert_time_in(&self, session: &AttendanceSession) -> Result<(), SessionError> {
        let key = session.key();
        let record = TimeInRecord {
            student_id: session.student_id.clone(),
            date: session.date,
            time_in: session.time_in,
        };
        publish_exclusive(&self.time_in_path(&key), &record, &key)
    }

    fn record_time_out(
        &self,
        key: &SessionKey,
        time_out: DateTime<Utc>,
    ) -> Result<AttendanceSession, SessionError> {
        let session = self.load(key)?.ok_or_else(|| conflict(key))?;
        if session.is_completed() {
            return Err(conflict(key));
        }

        publish_exclusive(&self.time_out_path(key), &TimeOutRecord { time_out }, key)?;
        Ok(AttendanceSession {
            time_out: Some(time_out),
            ..session
        })
    }

    fn history(&self, student: &StudentId) -> Result<Vec<AttendanceSession>, SessionError> {
        let dir = self.student_dir(student);
        let mut sessions = Vec::new();
        for name in list_dir(&dir)? {
            let Some(stem) = name.strip_suffix(TIME_IN_SUFFIX) else {
                continue;
            };
            let date = NaiveDate::parse_from_str(stem, DATE_FORMAT).map_err(|err| {
                SessionError::InvalidRecord {
                    path: dir.join(&name),
                    message: format!("file name is not a date: {err}"),
                }
            })?;
            let key = SessionKey {
                student_id: student.clone(),
                date,
            };
            if let Some(session) = self.load(&key)? {
                sessions.push(session);
            }
        }
        newest_first(&mut sessions);
        Ok(sessions)
    }

    fn all(&self) -> Result<Vec<AttendanceSession>, SessionError> {
        let mut sessions = Vec::new();
        for name in list_dir(&self.root)? {
            let student =
                StudentId::parse(name.as_str()).map_err(|err| SessionError::InvalidRecord {
                    path: self.root.join(&name),
                    message: err.to_string(),
                })?;
            sessions.extend(self.history(&student)?);
        }
        newest_first(&mut sessions);
        Ok(sessions)
    }
}

fn read_record<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, SessionError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(SessionError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|err| SessionError::InvalidRecord {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
}

// Skips the temp files that are still being published.
fn list_dir(dir: &Path) -> Result<Vec<String>, SessionError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(SessionError::Read {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| SessionError::Read {
            path: dir.to_path_buf(),
            source,
        })?;
        if let Some(name) = entry.file_name().to_str() {
            if !name.starts_with('.') {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

fn publish_exclusive<T: Serialize>(
    path: &Path,
    record: &T,
    key: &SessionKey,
) -> Result<(), SessionError> {
    let write_error = |source: io::Error| SessionError::Write {
        path: path.to_path_buf(),
        source,
    };

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(write_error)?;

    let payload = serde_json::to_vec_pretty(record).map_err(|err| SessionError::InvalidRecord {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(write_error)?;
    tmp.write_all(&payload).map_err(write_error)?;
    tmp.write_all(b"\n").map_err(write_error)?;
    tmp.as_file().sync_all().map_err(write_error)?;

    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(()),
        Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => Err(conflict(key)),
        Err(err) => Err(write_error(err.error)),
    }
}
