//! Storage contracts the streak engine depends on.
//!
//! The engine never talks to a concrete database. It needs two things:
//!
//! - an [`AttendanceStore`]: the append-only check-in log, queried by
//!   half-open week windows
//! - a [`RecordStore`]: one [`StreakRecord`] per user, written only through a
//!   version compare-and-swap
//!
//! [`memory::MemoryStore`] is the in-process reference implementation;
//! [`crate::db::SqliteStore`] persists both to a single SQLite file.

pub mod memory;

use chrono::{DateTime, Utc};

use crate::error::ErrorCode;
use crate::model::{AttendanceEvent, StreakRecord, UserId};
use crate::week::Week;

/// Store-level failures.
///
/// None of these may be interpreted as "zero events"; callers propagate them.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Transient unavailability (connection dropped, lock poisoned, injected fault).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// SQLite query or write failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A persisted row could not be decoded into an engine type.
    #[error("corrupt stored row: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Machine-readable code associated with this store error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Unavailable(_) | Self::Sqlite(_) => ErrorCode::StoreUnavailable,
            Self::Corrupt(_) => ErrorCode::CorruptRecord,
        }
    }
}

/// Append-only per-user check-in log.
pub trait AttendanceStore: Send + Sync {
    /// Append one event and return it as stored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn record_event(&self, user: &UserId, at: DateTime<Utc>)
    -> Result<AttendanceEvent, StoreError>;

    /// Exact number of events with `occurred_at` in `[week.start, week.end)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn count_events_in_window(&self, user: &UserId, week: &Week) -> Result<u32, StoreError>;

    /// Latest `occurred_at` for the user, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn most_recent_event(&self, user: &UserId) -> Result<Option<DateTime<Utc>>, StoreError>;
}

/// Which stored records a bulk operation should visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFilter {
    /// Only records with `current_streak > 0`.
    ActiveStreaks,
    /// Every stored record.
    All,
}

/// Per-user [`StreakRecord`] persistence with optimistic concurrency.
pub trait RecordStore: Send + Sync {
    /// Load the stored record, or `None` if the user has never been written.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails or the row is corrupt.
    fn load(&self, user: &UserId) -> Result<Option<StreakRecord>, StoreError>;

    /// Persist `next` iff the stored version still equals `expected_version`.
    ///
    /// `expected_version == 0` means "insert only if absent". On success the
    /// stored version becomes `expected_version + 1`, regardless of
    /// `next.version`. Returns `false` when another writer got there first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn compare_and_swap(&self, expected_version: u64, next: &StreakRecord)
    -> Result<bool, StoreError>;

    /// User ids of stored records matching `filter`, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    fn users(&self, filter: UserFilter) -> Result<Vec<UserId>, StoreError>;
}
