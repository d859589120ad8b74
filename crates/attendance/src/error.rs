//! Attendance error types

use thiserror::Error;

use crate::record::AttendanceRecord;

/// Errors raised by attendance transitions and stores
#[derive(Debug, Error)]
pub enum AttendanceError {
    /// A record already exists for this user and UTC day
    #[error("Already checked in today at {}", .record.check_in)]
    AlreadyCheckedIn {
        /// The existing record, unchanged
        record: Box<AttendanceRecord>,
    },

    /// No open check-in exists for this user and UTC day
    #[error("No open check-in for today")]
    NoOpenCheckIn,

    /// Check-out instant precedes the recorded check-in
    #[error("Check-out precedes check-in at {}", .record.check_in)]
    CheckOutBeforeCheckIn {
        /// The open record the check-out was attempted against
        record: Box<AttendanceRecord>,
    },

    /// Stored data could not be decoded
    #[error("Corrupt attendance row: {0}")]
    Corrupt(String),

    /// Database error
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AttendanceError {
    /// The conflicting record attached to this error, if any
    pub fn record(&self) -> Option<&AttendanceRecord> {
        match self {
            AttendanceError::AlreadyCheckedIn { record }
            | AttendanceError::CheckOutBeforeCheckIn { record } => Some(record.as_ref()),
            _ => None,
        }
    }

    /// Whether the error is a rejected transition rather than a storage fault
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            AttendanceError::AlreadyCheckedIn { .. }
                | AttendanceError::NoOpenCheckIn
                | AttendanceError::CheckOutBeforeCheckIn { .. }
        )
    }
}

/// Result alias for attendance operations
pub type Result<T> = std::result::Result<T, AttendanceError>;
