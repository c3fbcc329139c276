//! In-memory reference store.
//!
//! Events are kept per user in a vector sorted by `occurred_at`, so window
//! counts are two binary searches. Records live in a map guarded by a single
//! `RwLock`; the compare-and-swap check and the write happen under the same
//! write guard.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use super::{AttendanceStore, RecordStore, StoreError, UserFilter};
use crate::model::{AttendanceEvent, StreakRecord, UserId};
use crate::week::Week;

#[derive(Debug, Default)]
pub struct MemoryStore {
    events: RwLock<HashMap<UserId, Vec<DateTime<Utc>>>>,
    records: RwLock<BTreeMap<UserId, StreakRecord>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Total number of events stored for `user`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store is unavailable.
    pub fn event_count(&self, user: &UserId) -> Result<usize, StoreError> {
        Ok(self.read_events()?.get(user).map_or(0, Vec::len))
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store marked unavailable".into()));
        }
        Ok(())
    }

    fn read_events(&self) -> Result<RwLockReadGuard<'_, HashMap<UserId, Vec<DateTime<Utc>>>>, StoreError> {
        self.check_available()?;
        self.events
            .read()
            .map_err(|_| StoreError::Unavailable("event log lock poisoned".into()))
    }

    fn write_events(&self) -> Result<RwLockWriteGuard<'_, HashMap<UserId, Vec<DateTime<Utc>>>>, StoreError> {
        self.check_available()?;
        self.events
            .write()
            .map_err(|_| StoreError::Unavailable("event log lock poisoned".into()))
    }

    fn read_records(&self) -> Result<RwLockReadGuard<'_, BTreeMap<UserId, StreakRecord>>, StoreError> {
        self.check_available()?;
        self.records
            .read()
            .map_err(|_| StoreError::Unavailable("record map lock poisoned".into()))
    }

    fn write_records(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<UserId, StreakRecord>>, StoreError> {
        self.check_available()?;
        self.records
            .write()
            .map_err(|_| StoreError::Unavailable("record map lock poisoned".into()))
    }
}

impl AttendanceStore for MemoryStore {
    fn record_event(
        &self,
        user: &UserId,
        at: DateTime<Utc>,
    ) -> Result<AttendanceEvent, StoreError> {
        let mut events = self.write_events()?;
        let log = events.entry(user.clone()).or_default();
        // Equal timestamps keep insertion order.
        let idx = log.partition_point(|t| *t <= at);
        log.insert(idx, at);
        Ok(AttendanceEvent {
            user: user.clone(),
            occurred_at: at,
        })
    }

    fn count_events_in_window(&self, user: &UserId, week: &Week) -> Result<u32, StoreError> {
        let events = self.read_events()?;
        let Some(log) = events.get(user) else {
            return Ok(0);
        };
        let (start, end) = (week.start(), week.end());
        let lo = log.partition_point(|t| *t < start);
        let hi = log.partition_point(|t| *t < end);
        Ok(u32::try_from(hi - lo).unwrap_or(u32::MAX))
    }

    fn most_recent_event(&self, user: &UserId) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .read_events()?
            .get(user)
            .and_then(|log| log.last().copied()))
    }
}

impl RecordStore for MemoryStore {
    fn load(&self, user: &UserId) -> Result<Option<StreakRecord>, StoreError> {
        Ok(self.read_records()?.get(user).cloned())
    }

    fn compare_and_swap(
        &self,
        expected_version: u64,
        next: &StreakRecord,
    ) -> Result<bool, StoreError> {
        let mut records = self.write_records()?;
        let current = records.get(&next.user).map_or(0, |r| r.version);
        if current != expected_version {
            return Ok(false);
        }
        let mut stored = next.clone();
        stored.version = expected_version + 1;
        records.insert(stored.user.clone(), stored);
        Ok(true)
    }

    fn users(&self, filter: UserFilter) -> Result<Vec<UserId>, StoreError> {
        Ok(self
            .read_records()?
            .values()
            .filter(|r| match filter {
                UserFilter::All => true,
                UserFilter::ActiveStreaks => r.current_streak > 0,
            })
            .map(|r| r.user.clone())
            .collect())
    }
}
