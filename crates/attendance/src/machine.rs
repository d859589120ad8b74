//! Attendance state machine
//!
//! Per (user, UTC calendar day):
//!
//! ```text
//! NotCheckedIn
//!     ↓ (check_in)
//! CheckedIn        <- on duty
//!     ↓ (check_out)
//! CheckedOut       (terminal for the day)
//! ```
//!
//! A new UTC day starts over at `NotCheckedIn`.

use chrono::{DateTime, SubsecRound, Utc};
use muster_core::UserId;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{AttendanceError, Result};
use crate::record::{utc_day, AttendanceRecord, AttendanceSnapshot, AttendanceState};
use crate::store::{AttendanceStore, CloseOutcome, InsertOutcome};

/// Answers whether a user may currently be treated as on duty.
pub trait DutyRoster: Send + Sync {
    /// True iff `user_id` has an open check-in for the UTC day containing `now`
    fn is_on_duty(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<bool>;
}

/// Check-in / check-out transitions over an injected store
#[derive(Clone)]
pub struct AttendanceStateMachine {
    store: Arc<dyn AttendanceStore>,
}

impl AttendanceStateMachine {
    pub fn new(store: Arc<dyn AttendanceStore>) -> Self {
        Self { store }
    }

    /// Open today's record.
    ///
    /// Fails with [`AttendanceError::AlreadyCheckedIn`] carrying the existing
    /// record if the user has any record for `now`'s UTC day.
    pub fn check_in(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<AttendanceRecord> {
        let record = AttendanceRecord::open(user_id.clone(), normalize(now));

        match self.store.insert_if_absent(record)? {
            InsertOutcome::Inserted(record) => {
                info!(user_id = %user_id, day = %record.date, "Checked in");
                Ok(record)
            }
            InsertOutcome::Existing(existing) => {
                warn!(user_id = %user_id, day = %existing.date, "Duplicate check-in rejected");
                Err(AttendanceError::AlreadyCheckedIn {
                    record: Box::new(existing),
                })
            }
        }
    }

    /// Close today's open record.
    ///
    /// Fails with [`AttendanceError::NoOpenCheckIn`] when the user never
    /// checked in today or has already checked out.
    pub fn check_out(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<AttendanceRecord> {
        let now = normalize(now);

        match self.store.close_open(user_id, utc_day(now), now)? {
            CloseOutcome::Closed(record) => {
                info!(user_id = %user_id, day = %record.date, "Checked out");
                Ok(record)
            }
            CloseOutcome::NotOpen => Err(AttendanceError::NoOpenCheckIn),
            CloseOutcome::BeforeCheckIn(record) => Err(AttendanceError::CheckOutBeforeCheckIn {
                record: Box::new(record),
            }),
        }
    }

    /// Today's record, if any
    pub fn today(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<Option<AttendanceRecord>> {
        self.store.find(user_id, utc_day(now))
    }

    pub fn state(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<AttendanceState> {
        Ok(self
            .today(user_id, now)?
            .map_or(AttendanceState::NotCheckedIn, |r| r.state()))
    }

    pub fn snapshot(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<AttendanceSnapshot> {
        Ok(AttendanceSnapshot::from(self.today(user_id, now)?.as_ref()))
    }
}

impl DutyRoster for AttendanceStateMachine {
    fn is_on_duty(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<bool> {
        Ok(self.state(user_id, now)? == AttendanceState::CheckedIn)
    }
}

impl<T: DutyRoster + ?Sized> DutyRoster for Arc<T> {
    fn is_on_duty(&self, user_id: &UserId, now: DateTime<Utc>) -> Result<bool> {
        (**self).is_on_duty(user_id, now)
    }
}

// Stores keep millisecond precision.
fn normalize(now: DateTime<Utc>) -> DateTime<Utc> {
    now.trunc_subsecs(3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryAttendanceStore;
    use chrono::{Duration, TimeZone};

    fn machine() -> AttendanceStateMachine {
        AttendanceStateMachine::new(Arc::new(MemoryAttendanceStore::new()))
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_full_day_lifecycle() {
        let machine = machine();
        let user = UserId::new("u1");

        assert_eq!(machine.state(&user, at(7, 0)).unwrap(), AttendanceState::NotCheckedIn);
        assert!(!machine.is_on_duty(&user, at(7, 0)).unwrap());

        let record = machine.check_in(&user, at(8, 0)).unwrap();
        assert_eq!(record.check_in, at(8, 0));
        assert!(machine.is_on_duty(&user, at(8, 30)).unwrap());

        let record = machine.check_out(&user, at(17, 0)).unwrap();
        assert_eq!(record.check_out, Some(at(17, 0)));
        assert_eq!(machine.state(&user, at(17, 1)).unwrap(), AttendanceState::CheckedOut);
        assert!(!machine.is_on_duty(&user, at(17, 1)).unwrap());
    }

    #[test]
    fn test_second_check_in_returns_first_record() {
        let machine = machine();
        let user = UserId::new("u1");

        let first = machine.check_in(&user, at(8, 0)).unwrap();
        let err = machine.check_in(&user, at(9, 0)).unwrap_err();

        assert_eq!(err.record(), Some(&first));
        assert!(matches!(err, AttendanceError::AlreadyCheckedIn { .. }));
    }

    #[test]
    fn test_check_in_after_check_out_same_day_rejected() {
        let machine = machine();
        let user = UserId::new("u1");

        machine.check_in(&user, at(8, 0)).unwrap();
        machine.check_out(&user, at(9, 0)).unwrap();

        assert!(matches!(
            machine.check_in(&user, at(10, 0)),
            Err(AttendanceError::AlreadyCheckedIn { .. })
        ));
    }

    #[test]
    fn test_check_out_without_check_in() {
        let machine = machine();
        assert!(matches!(
            machine.check_out(&UserId::new("u1"), at(9, 0)),
            Err(AttendanceError::NoOpenCheckIn)
        ));
    }

    #[test]
    fn test_double_check_out() {
        let machine = machine();
        let user = UserId::new("u1");

        machine.check_in(&user, at(8, 0)).unwrap();
        machine.check_out(&user, at(9, 0)).unwrap();

        assert!(matches!(
            machine.check_out(&user, at(10, 0)),
            Err(AttendanceError::NoOpenCheckIn)
        ));
    }

    #[test]
    fn test_duty_does_not_carry_over_midnight() {
        let machine = machine();
        let user = UserId::new("u1");

        machine.check_in(&user, at(23, 0)).unwrap();
        let next_day = at(23, 0) + Duration::hours(2);

        assert!(!machine.is_on_duty(&user, next_day).unwrap());
        assert!(matches!(
            machine.check_out(&user, next_day),
            Err(AttendanceError::NoOpenCheckIn)
        ));
        assert!(machine.check_in(&user, next_day).is_ok());
    }

    #[test]
    fn test_users_are_independent() {
        let machine = machine();
        machine.check_in(&UserId::new("a"), at(8, 0)).unwrap();
        assert!(machine.check_in(&UserId::new("b"), at(8, 0)).is_ok());
        assert!(!machine.is_on_duty(&UserId::new("c"), at(8, 0)).unwrap());
    }

    #[test]
    fn test_snapshot_tracks_transitions() {
        let machine = machine();
        let user = UserId::new("u1");

        machine.check_in(&user, at(8, 0)).unwrap();
        machine.check_out(&user, at(12, 0)).unwrap();

        let snapshot = machine.snapshot(&user, at(13, 0)).unwrap();
        assert!(snapshot.has_checked_in);
        assert!(snapshot.has_checked_out);
        assert_eq!(snapshot.check_out_time, Some(at(12, 0)));
    }
}
