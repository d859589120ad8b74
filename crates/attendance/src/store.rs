//! Attendance persistence seam
//!
//! The state machine never reads a record and then writes based on what it
//! saw. Each transition is a single store primitive that decides and mutates
//! under the store's own exclusion (a lock here, a uniqueness constraint in
//! SQLite), so concurrent check-ins for one (user, day) cannot both succeed.

use chrono::{DateTime, NaiveDate, Utc};
use muster_core::UserId;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::error::Result;
use crate::record::AttendanceRecord;

/// Outcome of [`AttendanceStore::insert_if_absent`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The record was created
    Inserted(AttendanceRecord),
    /// A record already existed for that (user, day); returned unchanged
    Existing(AttendanceRecord),
}

/// Outcome of [`AttendanceStore::close_open`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The open record now carries a check-out timestamp
    Closed(AttendanceRecord),
    /// No record for the day, or it is already closed
    NotOpen,
    /// The open record's check-in is later than the requested check-out
    BeforeCheckIn(AttendanceRecord),
}

/// Storage for attendance records keyed by (user, UTC day)
pub trait AttendanceStore: Send + Sync {
    /// Fetch the record for `user_id` on `day`
    fn find(&self, user_id: &UserId, day: NaiveDate) -> Result<Option<AttendanceRecord>>;

    /// Atomically create `record` unless one exists for its (user, day)
    fn insert_if_absent(&self, record: AttendanceRecord) -> Result<InsertOutcome>;

    /// Atomically set the check-out of the open record for (user, day)
    fn close_open(&self, user_id: &UserId, day: NaiveDate, at: DateTime<Utc>)
        -> Result<CloseOutcome>;
}

/// In-process store; one mutex serializes every (user, day) transition
#[derive(Debug, Default)]
pub struct MemoryAttendanceStore {
    records: Mutex<HashMap<(UserId, NaiveDate), AttendanceRecord>>,
}

impl MemoryAttendanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl AttendanceStore for MemoryAttendanceStore {
    fn find(&self, user_id: &UserId, day: NaiveDate) -> Result<Option<AttendanceRecord>> {
        Ok(self.records.lock().get(&(user_id.clone(), day)).cloned())
    }

    fn insert_if_absent(&self, record: AttendanceRecord) -> Result<InsertOutcome> {
        let mut records = self.records.lock();
        let key = (record.user_id.clone(), record.date);

        if let Some(existing) = records.get(&key) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }

        records.insert(key, record.clone());
        Ok(InsertOutcome::Inserted(record))
    }

    fn close_open(
        &self,
        user_id: &UserId,
        day: NaiveDate,
        at: DateTime<Utc>,
    ) -> Result<CloseOutcome> {
        let mut records = self.records.lock();

        match records.get_mut(&(user_id.clone(), day)) {
            Some(record) if record.is_open() => {
                if at < record.check_in {
                    return Ok(CloseOutcome::BeforeCheckIn(record.clone()));
                }
                record.check_out = Some(at);
                Ok(CloseOutcome::Closed(record.clone()))
            }
            _ => Ok(CloseOutcome::NotOpen),
        }
    }
}

impl<T: AttendanceStore + ?Sized> AttendanceStore for std::sync::Arc<T> {
    fn find(&self, user_id: &UserId, day: NaiveDate) -> Result<Option<AttendanceRecord>> {
        (**self).find(user_id, day)
    }

    fn insert_if_absent(&self, record: AttendanceRecord) -> Result<InsertOutcome> {
        (**self).insert_if_absent(record)
    }

    fn close_open(
        &self,
        user_id: &UserId,
        day: NaiveDate,
        at: DateTime<Utc>,
    ) -> Result<CloseOutcome> {
        (**self).close_open(user_id, day, at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::utc_day;
    use chrono::TimeZone;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn test_insert_then_existing() {
        let store = MemoryAttendanceStore::new();
        let user = UserId::new("u1");

        let first = AttendanceRecord::open(user.clone(), at(8));
        assert_eq!(
            store.insert_if_absent(first.clone()).unwrap(),
            InsertOutcome::Inserted(first.clone())
        );

        let second = AttendanceRecord::open(user, at(9));
        assert_eq!(
            store.insert_if_absent(second).unwrap(),
            InsertOutcome::Existing(first)
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_close_only_once() {
        let store = MemoryAttendanceStore::new();
        let user = UserId::new("u1");
        store
            .insert_if_absent(AttendanceRecord::open(user.clone(), at(8)))
            .unwrap();

        let day = utc_day(at(8));
        assert!(matches!(
            store.close_open(&user, day, at(9)).unwrap(),
            CloseOutcome::Closed(r) if r.check_out == Some(at(9))
        ));
        assert_eq!(store.close_open(&user, day, at(10)).unwrap(), CloseOutcome::NotOpen);
    }

    #[test]
    fn test_close_rejects_earlier_instant() {
        let store = MemoryAttendanceStore::new();
        let user = UserId::new("u1");
        store
            .insert_if_absent(AttendanceRecord::open(user.clone(), at(8)))
            .unwrap();

        let outcome = store.close_open(&user, utc_day(at(8)), at(7)).unwrap();
        assert!(matches!(outcome, CloseOutcome::BeforeCheckIn(_)));
        assert!(store.find(&user, utc_day(at(8))).unwrap().unwrap().is_open());
    }
}
