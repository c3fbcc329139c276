//! O(1) streak maintenance on each new check-in.
//!
//! Two window counts per event: the week containing the event and the week
//! before it. The record's `last_credited_week` makes crediting idempotent, so
//! a week is added to the streak at most once no matter how many check-ins it
//! receives or in which order concurrent writers observe the counts.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::StreakRecord;
use crate::store::{AttendanceStore, StoreError};
use crate::week::WeekWindow;

/// How an update moved the streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Transition {
    /// The current week just qualified. `extended` is `false` when the run
    /// restarted at 1.
    Credited { extended: bool },
    /// The current week qualified earlier; nothing to add.
    AlreadyCredited,
    /// The current week is short but the previous week carries the streak.
    Grace,
    /// Neither week qualifies; the streak is 0.
    Lapsed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncrementalUpdate {
    /// Next record state. `version` is the prior version (the CAS token).
    pub record: StreakRecord,
    pub transition: Transition,
    pub current_week_count: u32,
    pub previous_week_count: u32,
}

pub struct IncrementalUpdater<'a> {
    store: &'a dyn AttendanceStore,
    window: WeekWindow,
    threshold: u32,
}

impl<'a> IncrementalUpdater<'a> {
    #[must_use]
    pub fn new(store: &'a dyn AttendanceStore, window: WeekWindow, threshold: u32) -> Self {
        Self {
            store,
            window,
            threshold: threshold.max(1),
        }
    }

    /// Derive the record after an event at `occurred_at` has been stored.
    ///
    /// Only valid when `occurred_at` is not earlier than
    /// `prior.last_reconciled_at`; backdated events need a full audit.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if either window count fails.
    pub fn apply(
        &self,
        prior: &StreakRecord,
        occurred_at: DateTime<Utc>,
    ) -> Result<IncrementalUpdate, StoreError> {
        let week = self.window.containing(occurred_at);
        let current = self.store.count_events_in_window(&prior.user, &week)?;
        let previous = self
            .store
            .count_events_in_window(&prior.user, &week.previous())?;

        let mut next = prior.clone();
        let carries = previous >= self.threshold;

        let transition = if current >= self.threshold {
            if prior.last_credited_week == Some(week) {
                Transition::AlreadyCredited
            } else {
                let base = if carries { prior.current_streak } else { 0 };
                next.current_streak = base.saturating_add(1);
                next.last_credited_week = Some(week);
                Transition::Credited { extended: carries }
            }
        } else if carries {
            Transition::Grace
        } else {
            next.current_streak = 0;
            next.last_credited_week = None;
            Transition::Lapsed
        };

        next.last_reconciled_week = Some(week);
        next.last_reconciled_at = Some(occurred_at);

        Ok(IncrementalUpdate {
            record: next,
            transition,
            current_week_count: current,
            previous_week_count: previous,
        })
    }
}
