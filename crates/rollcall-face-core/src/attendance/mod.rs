pub mod service;
pub mod session;
pub mod store;
pub mod tracker;

pub use service::{AttendanceOutcome, AttendanceService};
pub use session::{
    AttendanceCalendar, AttendanceSession, SessionKey, SessionState, StudentId,
};
pub use store::{FilesystemSessionStore, InMemorySessionStore, SessionStore};
pub use tracker::{SessionTracker, SessionTransition};
