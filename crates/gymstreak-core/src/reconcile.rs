//! When to trust the incremental path and when to recompute from the log.
//!
//! The policy is pure: it inspects a record and an instant and says which
//! path the engine must take. It never touches a store.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{StreakRecord, UserId};
use crate::week::WeekWindow;

/// Why a full audit replaced (or was compared against) the stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileReason {
    BulkRepair,
    StaleRead,
    OutOfOrderEvent,
    UnreconciledEvents,
    SpotCheck,
}

impl ReconcileReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BulkRepair => "bulk_repair",
            Self::StaleRead => "stale_read",
            Self::OutOfOrderEvent => "out_of_order_event",
            Self::UnreconciledEvents => "unreconciled_events",
            Self::SpotCheck => "spot_check",
        }
    }
}

impl std::fmt::Display for ReconcileReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which derivation a check-in write must use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "path")]
pub enum WritePath {
    /// Two window counts. With `spot_check`, an audit runs alongside and wins
    /// on disagreement.
    Incremental { spot_check: bool },
    /// Full recomputation as of `as_of`.
    Audit {
        reason: ReconcileReason,
        as_of: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconciliationPolicy {
    window: WeekWindow,
    spot_check_interval: u32,
}

impl ReconciliationPolicy {
    /// `spot_check_interval` of 0 disables spot checks; `n` audits every
    /// write whose resulting record version is a multiple of `n`.
    #[must_use]
    pub const fn new(window: WeekWindow, spot_check_interval: u32) -> Self {
        Self {
            window,
            spot_check_interval,
        }
    }

    /// `latest_logged` is the newest event in the log before this one was
    /// appended. Audits run as of the newest event overall, never as of the
    /// record's own `last_reconciled_at`, which a read may have pushed past
    /// every real event.
    #[must_use]
    pub fn on_check_in(
        &self,
        prior: &StreakRecord,
        occurred_at: DateTime<Utc>,
        latest_logged: Option<DateTime<Utc>>,
    ) -> WritePath {
        let as_of = latest_logged.map_or(occurred_at, |latest| latest.max(occurred_at));

        if prior.last_reconciled_at.is_some_and(|at| occurred_at < at) {
            return WritePath::Audit {
                reason: ReconcileReason::OutOfOrderEvent,
                as_of,
            };
        }

        // Events newer than the record came from a check-in whose write never
        // landed; the incremental step would build on a stale streak.
        let unreconciled = latest_logged
            .is_some_and(|latest| prior.last_reconciled_at.is_none_or(|at| latest > at));
        if unreconciled {
            return WritePath::Audit {
                reason: ReconcileReason::UnreconciledEvents,
                as_of,
            };
        }

        let spot_check = self.spot_check_interval > 0
            && (prior.version + 1) % u64::from(self.spot_check_interval) == 0;
        WritePath::Incremental { spot_check }
    }

    /// `Some(StaleRead)` when the stored streak may have lapsed without a
    /// write: it is positive, was last reconciled in an earlier week, and the
    /// week that just closed was never credited.
    #[must_use]
    pub fn on_read(&self, record: &StreakRecord, now: DateTime<Utc>) -> Option<ReconcileReason> {
        if record.current_streak == 0 {
            return None;
        }
        let current = self.window.containing(now);
        let reconciled_earlier = record
            .last_reconciled_week
            .is_none_or(|week| week < current);
        let closed_week_credited = record.last_credited_week == Some(current.previous());

        (reconciled_earlier && !closed_week_credited).then_some(ReconcileReason::StaleRead)
    }
}

/// Which users a repair visits.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RepairScope {
    /// Stored records with `current_streak > 0`.
    #[default]
    ActiveStreaks,
    /// Every stored record.
    All,
    /// Exactly these users, stored or not.
    Users(Vec<UserId>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairMode {
    /// Overwrite every visited record with the audited value.
    #[default]
    Apply,
    /// Report drift only.
    DryRun,
}

/// One record whose stored streak differed from the audited value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairChange {
    pub user: UserId,
    pub stored: u32,
    pub audited: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairFailure {
    pub user: UserId,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub mode: RepairMode,
    pub as_of: DateTime<Utc>,
    pub examined: usize,
    /// Records whose streak value differed (and, in `Apply` mode, was fixed).
    pub changed: usize,
    pub changes: Vec<RepairChange>,
    pub failures: Vec<RepairFailure>,
    #[serde(serialize_with = "serialize_elapsed_ms")]
    pub elapsed: Duration,
}

impl RepairReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

fn serialize_elapsed_ms<S: serde::Serializer>(elapsed: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}
