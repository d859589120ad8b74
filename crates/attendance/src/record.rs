//! Attendance record model
//!
//! One record per (user, UTC calendar day). The day boundary is UTC midnight
//! of the evaluated instant; no timezone offset is applied.

use chrono::{DateTime, NaiveDate, Utc};
use muster_core::UserId;
use serde::{Deserialize, Serialize};

/// Duty status for one user on one UTC day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceState {
    /// No record for the day
    NotCheckedIn,
    /// Checked in, not yet checked out (on duty)
    CheckedIn,
    /// Checked out; terminal for the day
    CheckedOut,
}

/// Persisted check-in/check-out pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    /// Owning user
    pub user_id: UserId,
    /// UTC calendar day of the check-in
    pub date: NaiveDate,
    /// Check-in instant
    pub check_in: DateTime<Utc>,
    /// Check-out instant, once recorded
    pub check_out: Option<DateTime<Utc>>,
}

impl AttendanceRecord {
    /// Open a new record for the UTC day containing `at`
    pub fn open(user_id: UserId, at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            date: utc_day(at),
            check_in: at,
            check_out: None,
        }
    }

    /// State this record puts its day in
    pub fn state(&self) -> AttendanceState {
        match self.check_out {
            None => AttendanceState::CheckedIn,
            Some(_) => AttendanceState::CheckedOut,
        }
    }

    /// Checked in and not yet checked out
    pub fn is_open(&self) -> bool {
        self.check_out.is_none()
    }
}

/// Today's attendance as reported by `GET /attendance`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSnapshot {
    pub has_checked_in: bool,
    pub has_checked_out: bool,
    pub check_in_time: Option<DateTime<Utc>>,
    pub check_out_time: Option<DateTime<Utc>>,
}

impl From<Option<&AttendanceRecord>> for AttendanceSnapshot {
    fn from(record: Option<&AttendanceRecord>) -> Self {
        Self {
            has_checked_in: record.is_some(),
            has_checked_out: record.is_some_and(|r| r.check_out.is_some()),
            check_in_time: record.map(|r| r.check_in),
            check_out_time: record.and_then(|r| r.check_out),
        }
    }
}

/// UTC calendar day containing `at`
pub fn utc_day(at: DateTime<Utc>) -> NaiveDate {
    at.date_naive()
}
