//! SQLite-backed attendance store
//!
//! # Schema
//!
//! - user_id: owning user
//! - day: UTC calendar day (`YYYY-MM-DD`)
//! - check_in: Unix milliseconds
//! - check_out: Unix milliseconds, NULL while on duty
//!
//! `PRIMARY KEY (user_id, day)` is the single-writer guarantee for check-in:
//! the insert either creates the row or changes nothing. Check-out is one
//! conditional `UPDATE` on the open row.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use muster_core::UserId;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{AttendanceError, Result};
use crate::record::AttendanceRecord;
use crate::store::{AttendanceStore, CloseOutcome, InsertOutcome};

const DAY_FORMAT: &str = "%Y-%m-%d";

/// Attendance store persisted in SQLite (WAL mode)
pub struct SqliteAttendanceStore {
    conn: Mutex<Connection>,
}

impl SqliteAttendanceStore {
    /// Create or open a store at the specified path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        info!(path = %path.display(), "Opening attendance store");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS attendance (
                user_id TEXT NOT NULL,
                day TEXT NOT NULL,
                check_in INTEGER NOT NULL,
                check_out INTEGER,
                PRIMARY KEY (user_id, day),
                CHECK (check_out IS NULL OR check_out >= check_in)
            );
            "#,
        )?;

        Ok(())
    }

    fn select(
        conn: &Connection,
        user_id: &UserId,
        day: NaiveDate,
    ) -> Result<Option<AttendanceRecord>> {
        let row = conn
            .query_row(
                "SELECT check_in, check_out FROM attendance WHERE user_id = ?1 AND day = ?2",
                params![user_id.as_str(), day_key(day)],
                |row| read_millis(row),
            )
            .optional()?;

        row.map(|(check_in, check_out)| -> Result<AttendanceRecord> {
            Ok(AttendanceRecord {
                user_id: user_id.clone(),
                date: day,
                check_in: from_millis(check_in)?,
                check_out: check_out.map(from_millis).transpose()?,
            })
        })
        .transpose()
    }
}

impl AttendanceStore for SqliteAttendanceStore {
    fn find(&self, user_id: &UserId, day: NaiveDate) -> Result<Option<AttendanceRecord>> {
        let conn = self.conn.lock();
        Self::select(&conn, user_id, day)
    }

    fn insert_if_absent(&self, record: AttendanceRecord) -> Result<InsertOutcome> {
        let conn = self.conn.lock();

        let inserted = conn.execute(
            "INSERT INTO attendance (user_id, day, check_in, check_out)
             VALUES (?1, ?2, ?3, NULL)
             ON CONFLICT(user_id, day) DO NOTHING",
            params![
                record.user_id.as_str(),
                day_key(record.date),
                record.check_in.timestamp_millis()
            ],
        )?;

        if inserted == 1 {
            debug!(user_id = %record.user_id, day = %record.date, "Attendance row inserted");
            return Ok(InsertOutcome::Inserted(record));
        }

        match Self::select(&conn, &record.user_id, record.date)? {
            Some(existing) => Ok(InsertOutcome::Existing(existing)),
            None => Err(AttendanceError::Corrupt(format!(
                "insert for {} on {} neither created nor found a row",
                record.user_id, record.date
            ))),
        }
    }

    fn close_open(
        &self,
        user_id: &UserId,
        day: NaiveDate,
        at: DateTime<Utc>,
    ) -> Result<CloseOutcome> {
        let conn = self.conn.lock();
        let at_ms = at.timestamp_millis();

        let updated = conn.execute(
            "UPDATE attendance SET check_out = ?3
             WHERE user_id = ?1 AND day = ?2 AND check_out IS NULL AND check_in <= ?3",
            params![user_id.as_str(), day_key(day), at_ms],
        )?;

        let current = Self::select(&conn, user_id, day)?;
        Ok(match (updated, current) {
            (1, Some(record)) => CloseOutcome::Closed(record),
            (_, Some(record)) if record.is_open() => CloseOutcome::BeforeCheckIn(record),
            _ => CloseOutcome::NotOpen,
        })
    }
}

fn day_key(day: NaiveDate) -> String {
    day.format(DAY_FORMAT).to_string()
}

fn read_millis(row: &Row<'_>) -> rusqlite::Result<(i64, Option<i64>)> {
    Ok((row.get(0)?, row.get(1)?))
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| AttendanceError::Corrupt(format!("timestamp {} out of range", ms)))
}
