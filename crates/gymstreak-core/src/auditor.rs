//! Ground-truth streak recomputation.
//!
//! The auditor ignores any stored value and walks the attendance log backward
//! one week at a time from the week containing `as_of`:
//!
//! 1. If the current week already qualifies, counting starts there.
//! 2. Otherwise the current week is skipped (grace: it may still qualify
//!    before it closes) and counting starts at the previous week.
//! 3. The run ends at the first non-qualifying week that is not the current
//!    week.
//!
//! Cost is proportional to the streak length, not to history length.

use chrono::{DateTime, Utc};

use crate::model::{StreakRecord, UserId};
use crate::store::{AttendanceStore, StoreError};
use crate::week::{Week, WeekWindow};

/// Outcome of one audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditResult {
    pub streak: u32,
    /// Week the run starts at: `current_week` if it qualifies, else the
    /// previous week if that qualifies, else `None`.
    pub credited_week: Option<Week>,
    pub current_week: Week,
    pub current_week_count: u32,
    /// Number of window counts issued.
    pub weeks_scanned: u32,
    pub as_of: DateTime<Utc>,
}

impl AuditResult {
    /// Fully reconciled record for `user` carrying `version` as CAS token.
    #[must_use]
    pub fn into_record(&self, user: &UserId, version: u64) -> StreakRecord {
        StreakRecord {
            user: user.clone(),
            current_streak: self.streak,
            last_reconciled_week: Some(self.current_week),
            last_reconciled_at: Some(self.as_of),
            last_credited_week: self.credited_week,
            version,
        }
    }
}

pub struct StreakAuditor<'a> {
    store: &'a dyn AttendanceStore,
    window: WeekWindow,
    threshold: u32,
}

impl<'a> StreakAuditor<'a> {
    /// A threshold of 0 is treated as 1 so the backward scan terminates.
    #[must_use]
    pub fn new(store: &'a dyn AttendanceStore, window: WeekWindow, threshold: u32) -> Self {
        Self {
            store,
            window,
            threshold: threshold.max(1),
        }
    }

    /// Recompute `user`'s streak as of `as_of`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if any window count fails; a failed count is
    /// never treated as zero.
    pub fn recompute(&self, user: &UserId, as_of: DateTime<Utc>) -> Result<AuditResult, StoreError> {
        let current_week = self.window.containing(as_of);
        let current_week_count = self.store.count_events_in_window(user, &current_week)?;
        let mut weeks_scanned = 1;

        let start = if current_week_count >= self.threshold {
            Some(current_week)
        } else {
            let previous = current_week.previous();
            weeks_scanned += 1;
            let previous_count = self.store.count_events_in_window(user, &previous)?;
            (previous_count >= self.threshold).then_some(previous)
        };

        let mut streak = 0_u32;
        if let Some(start) = start {
            streak = 1;
            let mut cursor = start.previous();
            loop {
                weeks_scanned += 1;
                if self.store.count_events_in_window(user, &cursor)? < self.threshold {
                    break;
                }
                streak = streak.saturating_add(1);
                cursor = cursor.previous();
            }
        }

        tracing::trace!(
            user = %user,
            streak,
            weeks_scanned,
            week_start = %current_week.start(),
            "audited streak"
        );

        Ok(AuditResult {
            streak,
            credited_week: start,
            current_week,
            current_week_count,
            weeks_scanned,
            as_of,
        })
    }
}
