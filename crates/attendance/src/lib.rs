//! Attendance - daily duty status for Muster volunteers
//!
//! Owns the check-in / check-out write path and the on-duty predicate that
//! gates location broadcasting.
//!
//! # Guarantees
//!
//! - At most one record per (user, UTC calendar day)
//! - A record's check-out, when present, is never earlier than its check-in
//! - Concurrent check-ins for the same (user, day) yield exactly one success
//!
//! # Storage
//!
//! The state machine takes its store as a constructor argument:
//! [`MemoryAttendanceStore`] for tests and single-process deployments,
//! [`SqliteAttendanceStore`] (feature `sqlite`) for durable records.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use chrono::Utc;
//! use muster_attendance::{AttendanceStateMachine, DutyRoster, MemoryAttendanceStore};
//! use muster_core::UserId;
//!
//! let machine = AttendanceStateMachine::new(Arc::new(MemoryAttendanceStore::new()));
//! let user = UserId::new("vol-1");
//! let now = Utc::now();
//!
//! machine.check_in(&user, now).unwrap();
//! assert!(machine.is_on_duty(&user, now).unwrap());
//! ```

pub mod error;
pub mod machine;
pub mod record;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod store;

pub use error::{AttendanceError, Result};
pub use machine::{AttendanceStateMachine, DutyRoster};
pub use record::{utc_day, AttendanceRecord, AttendanceSnapshot, AttendanceState};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteAttendanceStore;
pub use store::{AttendanceStore, CloseOutcome, InsertOutcome, MemoryAttendanceStore};
