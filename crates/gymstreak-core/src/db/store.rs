//! [`AttendanceStore`] and [`RecordStore`] over a single SQLite connection.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::model::{AttendanceEvent, StreakRecord, UserId};
use crate::store::{AttendanceStore, RecordStore, StoreError, UserFilter};
use crate::week::Week;

/// SQLite-backed store. The connection is serialized behind a mutex; the
/// store is `Send + Sync` and can be shared behind `Arc`.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        Ok(Self::from_connection(super::open_database(path)?))
    }

    /// Private in-memory database, mainly for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        Ok(Self::from_connection(super::open_in_memory()?))
    }

    #[must_use]
    pub const fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection mutex poisoned".into()))
    }
}

fn to_us(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_micros()
}

fn from_us(us: i64, column: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(us)
        .ok_or_else(|| StoreError::Corrupt(format!("{column} out of range: {us}")))
}

fn opt_from_us(us: Option<i64>, column: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
    us.map(|v| from_us(v, column)).transpose()
}

/// Raw `streak_records` row before decoding.
struct RecordRow {
    user_id: String,
    current_streak: i64,
    last_reconciled_week_us: Option<i64>,
    last_reconciled_at_us: Option<i64>,
    last_credited_week_us: Option<i64>,
    version: i64,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            current_streak: row.get(1)?,
            last_reconciled_week_us: row.get(2)?,
            last_reconciled_at_us: row.get(3)?,
            last_credited_week_us: row.get(4)?,
            version: row.get(5)?,
        })
    }

    fn decode(self) -> Result<StreakRecord, StoreError> {
        let current_streak = u32::try_from(self.current_streak).map_err(|_| {
            StoreError::Corrupt(format!(
                "current_streak {} for {} is not a u32",
                self.current_streak, self.user_id
            ))
        })?;
        let version = u64::try_from(self.version).map_err(|_| {
            StoreError::Corrupt(format!("version {} for {} is negative", self.version, self.user_id))
        })?;

        Ok(StreakRecord {
            user: UserId::new(self.user_id),
            current_streak,
            last_reconciled_week: opt_from_us(self.last_reconciled_week_us, "last_reconciled_week_us")?
                .map(Week::from_start),
            last_reconciled_at: opt_from_us(self.last_reconciled_at_us, "last_reconciled_at_us")?,
            last_credited_week: opt_from_us(self.last_credited_week_us, "last_credited_week_us")?
                .map(Week::from_start),
            version,
        })
    }
}

impl AttendanceStore for SqliteStore {
    fn record_event(
        &self,
        user: &UserId,
        at: DateTime<Utc>,
    ) -> Result<AttendanceEvent, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO attendance_events (user_id, occurred_at_us) VALUES (?1, ?2)",
            params![user.as_str(), to_us(at)],
        )?;
        Ok(AttendanceEvent {
            user: user.clone(),
            occurred_at: at,
        })
    }

    fn count_events_in_window(&self, user: &UserId, week: &Week) -> Result<u32, StoreError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*)
             FROM attendance_events
             WHERE user_id = ?1
               AND occurred_at_us >= ?2
               AND occurred_at_us < ?3",
            params![user.as_str(), to_us(week.start()), to_us(week.end())],
            |row| row.get(0),
        )?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    fn most_recent_event(&self, user: &UserId) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.conn()?;
        let latest: Option<i64> = conn.query_row(
            "SELECT MAX(occurred_at_us) FROM attendance_events WHERE user_id = ?1",
            params![user.as_str()],
            |row| row.get(0),
        )?;
        opt_from_us(latest, "occurred_at_us")
    }
}

impl RecordStore for SqliteStore {
    fn load(&self, user: &UserId) -> Result<Option<StreakRecord>, StoreError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT user_id, current_streak, last_reconciled_week_us,
                        last_reconciled_at_us, last_credited_week_us, version
                 FROM streak_records
                 WHERE user_id = ?1",
                params![user.as_str()],
                RecordRow::from_row,
            )
            .optional()?;
        row.map(RecordRow::decode).transpose()
    }

    fn compare_and_swap(
        &self,
        expected_version: u64,
        next: &StreakRecord,
    ) -> Result<bool, StoreError> {
        let expected = i64::try_from(expected_version)
            .map_err(|_| StoreError::Corrupt(format!("version {expected_version} overflows i64")))?;
        let week_us = |w: Option<Week>| w.map(|w| to_us(w.start()));
        let conn = self.conn()?;

        let changed = if expected == 0 {
            conn.execute(
                "INSERT INTO streak_records (
                    user_id, current_streak, last_reconciled_week_us,
                    last_reconciled_at_us, last_credited_week_us, version
                 ) VALUES (?1, ?2, ?3, ?4, ?5, 1)
                 ON CONFLICT(user_id) DO NOTHING",
                params![
                    next.user.as_str(),
                    i64::from(next.current_streak),
                    week_us(next.last_reconciled_week),
                    next.last_reconciled_at.map(to_us),
                    week_us(next.last_credited_week),
                ],
            )?
        } else {
            conn.execute(
                "UPDATE streak_records
                 SET current_streak = ?2,
                     last_reconciled_week_us = ?3,
                     last_reconciled_at_us = ?4,
                     last_credited_week_us = ?5,
                     version = ?6 + 1
                 WHERE user_id = ?1 AND version = ?6",
                params![
                    next.user.as_str(),
                    i64::from(next.current_streak),
                    week_us(next.last_reconciled_week),
                    next.last_reconciled_at.map(to_us),
                    week_us(next.last_credited_week),
                    expected,
                ],
            )?
        };

        Ok(changed == 1)
    }

    fn users(&self, filter: UserFilter) -> Result<Vec<UserId>, StoreError> {
        let conn = self.conn()?;
        let sql = match filter {
            UserFilter::ActiveStreaks => {
                "SELECT user_id FROM streak_records WHERE current_streak > 0 ORDER BY user_id"
            }
            UserFilter::All => "SELECT user_id FROM streak_records ORDER BY user_id",
        };
        let mut stmt = conn.prepare(sql)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids.into_iter().map(UserId::new).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::week::WeekWindow;
    use chrono::TimeZone;

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, d, h, 0, 0).single().expect("valid test instant")
    }

    #[test]
    fn window_counts_are_half_open() {
        let store = SqliteStore::open_in_memory().expect("open");
        let user = UserId::new("ana");
        let week = WeekWindow::default().containing(at(14, 12));

        store.record_event(&user, week.start()).expect("record");
        store.record_event(&user, at(16, 7)).expect("record");
        store.record_event(&user, week.end()).expect("record");
        store.record_event(&UserId::new("bo"), at(16, 7)).expect("record");

        assert_eq!(store.count_events_in_window(&user, &week).expect("count"), 2);
        assert_eq!(store.count_events_in_window(&user, &week.next()).expect("count"), 1);
        assert_eq!(store.most_recent_event(&user).expect("latest"), Some(week.end()));
        assert_eq!(store.most_recent_event(&UserId::new("cy")).expect("latest"), None);
    }

    #[test]
    fn records_round_trip_through_compare_and_swap() {
        let store = SqliteStore::open_in_memory().expect("open");
        let week = WeekWindow::default().containing(at(14, 12));
        let mut record = StreakRecord::empty(UserId::new("ana"));
        record.current_streak = 4;
        record.last_reconciled_week = Some(week);
        record.last_reconciled_at = Some(at(14, 12));
        record.last_credited_week = Some(week.previous());

        assert!(store.compare_and_swap(0, &record).expect("insert"));
        assert!(!store.compare_and_swap(0, &record).expect("duplicate insert"));

        let stored = store.load(&record.user).expect("load").expect("present");
        assert_eq!(stored.version, 1);
        assert!(stored.same_state(&record));

        record.current_streak = 5;
        assert!(store.compare_and_swap(1, &record).expect("update"));
        assert!(!store.compare_and_swap(1, &record).expect("stale update"));
        let stored = store.load(&record.user).expect("load").expect("present");
        assert_eq!((stored.version, stored.current_streak), (2, 5));
    }

    #[test]
    fn users_filter_matches_memory_store() {
        let store = SqliteStore::open_in_memory().expect("open");
        let mut active = StreakRecord::empty(UserId::new("zed"));
        active.current_streak = 1;
        store.compare_and_swap(0, &active).expect("insert");
        store
            .compare_and_swap(0, &StreakRecord::empty(UserId::new("amy")))
            .expect("insert");

        assert_eq!(
            store.users(UserFilter::ActiveStreaks).expect("users"),
            vec![UserId::new("zed")]
        );
        assert_eq!(
            store.users(UserFilter::All).expect("users"),
            vec![UserId::new("amy"), UserId::new("zed")]
        );
    }

    #[test]
    fn corrupt_rows_are_reported_not_zeroed() {
        let store = SqliteStore::open_in_memory().expect("open");
        store
            .conn()
            .expect("conn")
            .execute(
                "INSERT INTO streak_records (user_id, current_streak, version) VALUES ('ana', 5000000000, 1)",
                [],
            )
            .expect("insert raw row");
        let err = store.load(&UserId::new("ana")).expect_err("must be corrupt");
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[test]
    fn file_backed_store_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("gymstreak.db");
        let user = UserId::new("ana");
        {
            let store = SqliteStore::open(&path).expect("open");
            store.record_event(&user, at(13, 6)).expect("record");
        }
        let store = SqliteStore::open(&path).expect("reopen");
        assert_eq!(store.most_recent_event(&user).expect("latest"), Some(at(13, 6)));
    }
}
