//! The streak engine: check-in, status, repair and audit.
//!
//! Every write to a [`StreakRecord`] happens under the user's lock and goes
//! through a compare-and-swap on the record version. A lost swap re-reads the
//! record and derives again from scratch.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::auditor::StreakAuditor;
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, EngineConfig};
use crate::error::{ErrorCode, StreakError};
use crate::incremental::{IncrementalUpdater, Transition};
use crate::lock::{UserGuard, UserLocks};
use crate::model::{AttendanceEvent, StreakRecord, UserId};
use crate::reconcile::{
    ReconcileReason, ReconciliationPolicy, RepairChange, RepairFailure, RepairMode, RepairReport,
    RepairScope, WritePath,
};
use crate::store::{AttendanceStore, RecordStore, UserFilter};
use crate::week::{Week, WeekWindow};

/// Incremental and audited values that disagreed on a spot check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Drift {
    pub incremental: u32,
    pub audited: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckInOutcome {
    pub event: AttendanceEvent,
    pub current_streak: u32,
    /// Check-ins in the week containing the event, this one included.
    pub weekly_count: u32,
    pub week: Week,
    pub path: WritePath,
    /// Set on the incremental path only.
    pub transition: Option<Transition>,
    pub drift: Option<Drift>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub user: UserId,
    pub week: Week,
    pub weekly_count: u32,
    pub current_streak: u32,
    /// Set when this read had to reconcile the stored record first.
    pub reconciled: Option<ReconcileReason>,
}

/// Stored value next to ground truth, without writing anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub user: UserId,
    pub as_of: DateTime<Utc>,
    pub stored_streak: u32,
    pub stored_as_of: Option<DateTime<Utc>>,
    pub last_check_in: Option<DateTime<Utc>>,
    /// Ground truth at `stored_as_of`, the instant the stored value claims.
    pub audited_at_stored: Option<u32>,
    /// Ground truth at `as_of`.
    pub audited_now: u32,
    pub weekly_count: u32,
    pub weeks_scanned: u32,
    /// The stored value matches ground truth at its own as-of instant, and a
    /// read at `as_of` would report `audited_now`.
    pub consistent: bool,
}

/// Result of one derivation inside the compare-and-swap loop.
enum Next<T> {
    Write(StreakRecord, T),
    Keep(T),
}

pub struct StreakEngine {
    events: Arc<dyn AttendanceStore>,
    records: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    window: WeekWindow,
    policy: ReconciliationPolicy,
    locks: UserLocks,
}

impl std::fmt::Debug for StreakEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreakEngine")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl StreakEngine {
    /// Engine over separate event and record stores, reading the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` does not validate.
    pub fn new(
        events: Arc<dyn AttendanceStore>,
        records: Arc<dyn RecordStore>,
        config: EngineConfig,
    ) -> Result<Self, ConfigError> {
        Self::with_clock(events, records, Arc::new(SystemClock), config)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` does not validate.
    pub fn with_clock(
        events: Arc<dyn AttendanceStore>,
        records: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let window = config.week_window()?;
        let policy = ReconciliationPolicy::new(window, config.streak.spot_check_interval);
        Ok(Self {
            events,
            records,
            clock,
            config,
            window,
            policy,
            locks: UserLocks::new(),
        })
    }

    /// Engine over one store that keeps both events and records.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` does not validate.
    pub fn with_store<S>(store: Arc<S>, clock: Arc<dyn Clock>, config: EngineConfig) -> Result<Self, ConfigError>
    where
        S: AttendanceStore + RecordStore + 'static,
    {
        Self::with_clock(store.clone(), store, clock, config)
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn window(&self) -> WeekWindow {
        self.window
    }

    /// Record a check-in at the engine clock's current instant.
    ///
    /// # Errors
    ///
    /// See [`Self::check_in_at`].
    pub fn check_in(&self, user: &UserId) -> Result<CheckInOutcome, StreakError> {
        self.check_in_at(user, self.clock.now())
    }

    /// Record a check-in at `at` and bring the user's streak up to date.
    ///
    /// # Errors
    ///
    /// Returns [`StreakError::Lock`] if the user's lock is contended past the
    /// configured timeout, [`StreakError::Store`] if any store call fails, and
    /// [`StreakError::ConflictRetriesExhausted`] if the record keeps changing
    /// underneath every compare-and-swap attempt.
    pub fn check_in_at(&self, user: &UserId, at: DateTime<Utc>) -> Result<CheckInOutcome, StreakError> {
        let _guard = self.lock(user)?;
        let latest_logged = self.events.most_recent_event(user)?;
        let event = self.events.record_event(user, at)?;
        let week = self.window.containing(at);

        let (record, (path, transition, drift, weekly_count)) = self.update_record(user, |prior| {
            let path = self.policy.on_check_in(prior, at, latest_logged);
            match path {
                WritePath::Incremental { spot_check } => {
                    let update = self.updater().apply(prior, at)?;
                    let mut next = update.record;
                    let mut drift = None;
                    if spot_check {
                        let audit = self.auditor().recompute(user, at)?;
                        if audit.streak != next.current_streak
                            || audit.credited_week != next.last_credited_week
                        {
                            tracing::error!(
                                code = ErrorCode::InconsistentState.code(),
                                user = %user,
                                incremental = next.current_streak,
                                audited = audit.streak,
                                week_start = %week.start(),
                                "incremental streak disagrees with audit; keeping audited value"
                            );
                            drift = Some(Drift {
                                incremental: next.current_streak,
                                audited: audit.streak,
                            });
                            next = audit.into_record(user, prior.version);
                        }
                    }
                    Ok(Next::Write(
                        next,
                        (path, Some(update.transition), drift, update.current_week_count),
                    ))
                }
                WritePath::Audit { reason, as_of } => {
                    let audit = self.auditor().recompute(user, as_of)?;
                    let weekly_count = if audit.current_week == week {
                        audit.current_week_count
                    } else {
                        self.events.count_events_in_window(user, &week)?
                    };
                    tracing::info!(
                        user = %user,
                        reason = %reason,
                        streak = audit.streak,
                        weeks_scanned = audit.weeks_scanned,
                        "reconciled streak on write"
                    );
                    Ok(Next::Write(
                        audit.into_record(user, prior.version),
                        (path, None, None, weekly_count),
                    ))
                }
            }
        })?;

        tracing::debug!(
            user = %user,
            streak = record.current_streak,
            weekly_count,
            week_start = %week.start(),
            version = record.version,
            "check-in recorded"
        );

        Ok(CheckInOutcome {
            event,
            current_streak: record.current_streak,
            weekly_count,
            week,
            path,
            transition,
            drift,
        })
    }

    /// Weekly count and streak at the engine clock's current instant.
    ///
    /// # Errors
    ///
    /// See [`Self::status_at`].
    pub fn status(&self, user: &UserId) -> Result<StatusReport, StreakError> {
        self.status_at(user, self.clock.now())
    }

    /// Weekly count and streak as of `now`.
    ///
    /// Unknown users get a zero report and nothing is written. A stored streak
    /// that lapsed without any write is reconciled first, and persisted only
    /// when `now` is not ahead of the engine clock.
    ///
    /// # Errors
    ///
    /// Returns [`StreakError`] if a store call fails or, when reconciling, the
    /// lock or compare-and-swap budget is exhausted.
    pub fn status_at(&self, user: &UserId, now: DateTime<Utc>) -> Result<StatusReport, StreakError> {
        let week = self.window.containing(now);
        let weekly_count = self.events.count_events_in_window(user, &week)?;

        let Some(record) = self.records.load(user)? else {
            return Ok(StatusReport {
                user: user.clone(),
                week,
                weekly_count,
                current_streak: 0,
                reconciled: None,
            });
        };

        let Some(reason) = self.policy.on_read(&record, now) else {
            return Ok(StatusReport {
                user: user.clone(),
                week,
                weekly_count,
                current_streak: record.current_streak,
                reconciled: None,
            });
        };

        if self.is_ahead_of_clock(now) {
            let audit = self.auditor().recompute(user, now)?;
            tracing::debug!(
                user = %user,
                reason = %reason,
                streak = audit.streak,
                as_of = %now,
                "read is ahead of the clock; reporting audit without persisting"
            );
            return Ok(StatusReport {
                user: user.clone(),
                week,
                weekly_count,
                current_streak: audit.streak,
                reconciled: Some(reason),
            });
        }

        let _guard = self.lock(user)?;
        let (record, reconciled) = self.update_record(user, |prior| {
            // Another reader may have reconciled while we waited for the lock.
            let Some(reason) = self.policy.on_read(prior, now) else {
                return Ok(Next::Keep(None));
            };
            let audit = self.auditor().recompute(user, now)?;
            tracing::info!(
                user = %user,
                reason = %reason,
                stored = prior.current_streak,
                streak = audit.streak,
                week_start = %week.start(),
                "reconciled stale streak on read"
            );
            Ok(Next::Write(audit.into_record(user, prior.version), Some(reason)))
        })?;

        Ok(StatusReport {
            user: user.clone(),
            week,
            weekly_count,
            current_streak: record.current_streak,
            reconciled,
        })
    }

    /// Recompute and overwrite the scoped records as of the engine clock.
    ///
    /// # Errors
    ///
    /// See [`Self::repair_at`].
    pub fn repair(&self, scope: &RepairScope, mode: RepairMode) -> Result<RepairReport, StreakError> {
        self.repair_at(scope, mode, self.clock.now())
    }

    /// Recompute every scoped user as of `now`.
    ///
    /// In [`RepairMode::Apply`] every visited record is overwritten with the
    /// audited value, whether or not it differed. A `now` ahead of the engine
    /// clock downgrades the run to [`RepairMode::DryRun`]. Users are processed
    /// independently; a failure for one is collected in the report and the
    /// rest continue.
    ///
    /// # Errors
    ///
    /// Returns [`StreakError::Store`] only if listing the scoped users fails.
    pub fn repair_at(
        &self,
        scope: &RepairScope,
        mode: RepairMode,
        now: DateTime<Utc>,
    ) -> Result<RepairReport, StreakError> {
        let start = Instant::now();
        let mode = if mode == RepairMode::Apply && self.is_ahead_of_clock(now) {
            tracing::warn!(
                as_of = %now,
                "repair instant is ahead of the clock; reporting drift without writing"
            );
            RepairMode::DryRun
        } else {
            mode
        };
        let users = match scope {
            RepairScope::ActiveStreaks => self.records.users(UserFilter::ActiveStreaks)?,
            RepairScope::All => self.records.users(UserFilter::All)?,
            RepairScope::Users(users) => {
                let mut users = users.clone();
                users.sort();
                users.dedup();
                users
            }
        };

        let mut changes = Vec::new();
        let mut failures = Vec::new();
        for user in &users {
            match self.repair_user(user, mode, now) {
                Ok(Some(change)) => changes.push(change),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(
                        user = %user,
                        code = err.code().code(),
                        error = %err,
                        "repair failed for user"
                    );
                    failures.push(RepairFailure {
                        user: user.clone(),
                        code: err.code().code(),
                        message: err.to_string(),
                    });
                }
            }
        }

        let elapsed = start.elapsed();
        tracing::info!(
            mode = ?mode,
            examined = users.len(),
            changed = changes.len(),
            failed = failures.len(),
            elapsed_ms = elapsed.as_millis(),
            "streak repair complete"
        );

        Ok(RepairReport {
            mode,
            as_of: now,
            examined: users.len(),
            changed: changes.len(),
            changes,
            failures,
            elapsed,
        })
    }

    /// Stored streak next to a fresh audit as of the engine clock.
    ///
    /// # Errors
    ///
    /// See [`Self::audit_at`].
    pub fn audit(&self, user: &UserId) -> Result<AuditReport, StreakError> {
        self.audit_at(user, self.clock.now())
    }

    /// Compare the stored record against ground truth. Never writes.
    ///
    /// # Errors
    ///
    /// Returns [`StreakError::Store`] if a store call fails.
    pub fn audit_at(&self, user: &UserId, now: DateTime<Utc>) -> Result<AuditReport, StreakError> {
        let stored = self.records.load(user)?;
        let last_check_in = self.events.most_recent_event(user)?;
        let auditor = self.auditor();
        let current = auditor.recompute(user, now)?;

        let (stored_streak, stored_as_of, audited_at_stored, consistent) = match &stored {
            None => (0, None, None, current.streak == 0),
            Some(record) => {
                let at_stored = record
                    .last_reconciled_at
                    .map(|at| auditor.recompute(user, at))
                    .transpose()?
                    .map(|audit| audit.streak);
                let matches_own_as_of = at_stored.is_none_or(|s| s == record.current_streak);
                let read_value = if self.policy.on_read(record, now).is_some() {
                    current.streak
                } else {
                    record.current_streak
                };
                (
                    record.current_streak,
                    record.last_reconciled_at,
                    at_stored,
                    matches_own_as_of && read_value == current.streak,
                )
            }
        };

        if !consistent {
            tracing::warn!(
                user = %user,
                stored = stored_streak,
                audited = current.streak,
                "stored streak does not match audit"
            );
        }

        Ok(AuditReport {
            user: user.clone(),
            as_of: now,
            stored_streak,
            stored_as_of,
            last_check_in,
            audited_at_stored,
            audited_now: current.streak,
            weekly_count: current.current_week_count,
            weeks_scanned: current.weeks_scanned,
            consistent,
        })
    }

    fn repair_user(
        &self,
        user: &UserId,
        mode: RepairMode,
        now: DateTime<Utc>,
    ) -> Result<Option<RepairChange>, StreakError> {
        let change = |stored: u32, audited: u32| {
            (stored != audited).then(|| RepairChange {
                user: user.clone(),
                stored,
                audited,
            })
        };

        match mode {
            RepairMode::DryRun => {
                let stored = self.records.load(user)?.map_or(0, |r| r.current_streak);
                let audit = self.auditor().recompute(user, now)?;
                Ok(change(stored, audit.streak))
            }
            RepairMode::Apply => {
                let _guard = self.lock(user)?;
                let (_, (stored, audited)) = self.update_record(user, |prior| {
                    let audit = self.auditor().recompute(user, now)?;
                    tracing::debug!(
                        user = %user,
                        reason = %ReconcileReason::BulkRepair,
                        stored = prior.current_streak,
                        streak = audit.streak,
                        "repairing streak record"
                    );
                    Ok(Next::Write(
                        audit.into_record(user, prior.version),
                        (prior.current_streak, audit.streak),
                    ))
                })?;
                Ok(change(stored, audited))
            }
        }
    }

    /// Load, derive, compare-and-swap; retry on a lost swap.
    ///
    /// Returns the record as it now stands in the store.
    fn update_record<T>(
        &self,
        user: &UserId,
        mut derive: impl FnMut(&StreakRecord) -> Result<Next<T>, StreakError>,
    ) -> Result<(StreakRecord, T), StreakError> {
        let attempts = self.config.locks.max_cas_retries;
        for attempt in 1..=attempts {
            let prior = self
                .records
                .load(user)?
                .unwrap_or_else(|| StreakRecord::empty(user.clone()));

            match derive(&prior)? {
                Next::Keep(extra) => return Ok((prior, extra)),
                Next::Write(mut next, extra) => {
                    if self.records.compare_and_swap(prior.version, &next)? {
                        next.version = prior.version + 1;
                        return Ok((next, extra));
                    }
                    tracing::debug!(
                        user = %user,
                        attempt,
                        expected_version = prior.version,
                        "streak record changed concurrently; retrying"
                    );
                }
            }
        }

        Err(StreakError::ConflictRetriesExhausted {
            user: user.clone(),
            attempts,
        })
    }

    fn lock(&self, user: &UserId) -> Result<UserGuard<'_>, StreakError> {
        Ok(self.locks.acquire(user, self.config.locks.timeout())?)
    }

    /// Persisting a recomputation as of a future instant would stamp the
    /// record past every real event.
    fn is_ahead_of_clock(&self, at: DateTime<Utc>) -> bool {
        at > self.clock.now()
    }

    fn auditor(&self) -> StreakAuditor<'_> {
        StreakAuditor::new(self.events.as_ref(), self.window, self.config.streak.threshold)
    }

    fn updater(&self) -> IncrementalUpdater<'_> {
        IncrementalUpdater::new(self.events.as_ref(), self.window, self.config.streak.threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::StoreError;
    use crate::store::memory::MemoryStore;
    use chrono::{TimeDelta, TimeZone};
    use std::sync::Barrier;
    use std::thread;

    /// Monday 2026-10-05, the first week of the fixtures.
    fn week_start(week: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 5, 0, 0, 0)
            .single()
            .expect("valid instant")
            + TimeDelta::weeks(week - 1)
    }

    /// Wall-clock "now" for fixtures, after every fixture week.
    fn present() -> DateTime<Utc> {
        week_start(10)
    }

    fn fixture(config: EngineConfig) -> (Arc<MemoryStore>, Arc<ManualClock>, StreakEngine) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(present()));
        let engine =
            StreakEngine::with_store(store.clone(), clock.clone(), config).expect("valid config");
        (store, clock, engine)
    }

    fn three_check_ins(engine: &StreakEngine, user: &UserId, week: i64) -> CheckInOutcome {
        let mut last = None;
        for day in [0, 2, 4] {
            let at = week_start(week) + TimeDelta::days(day) + TimeDelta::hours(7);
            last = Some(engine.check_in_at(user, at).expect("check in"));
        }
        last.expect("three check-ins")
    }

    fn tamper(store: &MemoryStore, user: &UserId, streak: u32) {
        let mut record = store.load(user).expect("load").expect("present");
        let version = record.version;
        record.current_streak = streak;
        assert!(store.compare_and_swap(version, &record).expect("cas"));
    }

    #[test]
    fn two_weeks_then_grace_then_lapse() {
        let (_store, _clock, engine) = fixture(EngineConfig::default());
        let user = UserId::new("ana");

        assert_eq!(three_check_ins(&engine, &user, 1).current_streak, 1);
        assert_eq!(three_check_ins(&engine, &user, 2).current_streak, 2);

        let mid_week_three = week_start(3) + TimeDelta::days(3);
        let status = engine.status_at(&user, mid_week_three).expect("status");
        assert_eq!((status.weekly_count, status.current_streak), (0, 2));
        assert_eq!(status.reconciled, None);

        let week_four = week_start(4) + TimeDelta::hours(1);
        let status = engine.status_at(&user, week_four).expect("status");
        assert_eq!(status.current_streak, 0);
        assert_eq!(status.reconciled, Some(ReconcileReason::StaleRead));

        // The reconciled value was persisted; a second read does not reconcile.
        let again = engine.status_at(&user, week_four).expect("status");
        assert_eq!((again.current_streak, again.reconciled), (0, None));
    }

    #[test]
    fn five_check_ins_count_the_week_once() {
        let (_store, _clock, engine) = fixture(EngineConfig::default());
        let user = UserId::new("ana");
        three_check_ins(&engine, &user, 1);

        let streaks: Vec<u32> = (0..5)
            .map(|i| {
                let at = week_start(2) + TimeDelta::hours(8 + i * 20);
                engine.check_in_at(&user, at).expect("check in").current_streak
            })
            .collect();
        assert_eq!(streaks, vec![1, 1, 2, 2, 2]);
    }

    #[test]
    fn check_in_uses_engine_clock() {
        let (store, clock, engine) = fixture(EngineConfig::default());
        let user = UserId::new("ana");
        clock.set(week_start(2) + TimeDelta::hours(5));
        let outcome = engine.check_in(&user).expect("check in");
        assert_eq!(outcome.event.occurred_at, week_start(2) + TimeDelta::hours(5));
        assert_eq!(outcome.weekly_count, 1);
        assert_eq!(store.event_count(&user).expect("count"), 1);
    }

    #[test]
    fn unknown_user_reads_zero_without_writing() {
        let (store, _clock, engine) = fixture(EngineConfig::default());
        let user = UserId::new("ghost");
        let status = engine.status_at(&user, week_start(2)).expect("status");
        assert_eq!((status.weekly_count, status.current_streak), (0, 0));
        assert!(store.load(&user).expect("load").is_none());
    }

    #[test]
    fn backdated_check_in_is_audited() {
        let (_store, _clock, engine) = fixture(EngineConfig::default());
        let user = UserId::new("ana");
        // Week 1 short by one, then week 2 qualifies.
        for day in [0, 2] {
            engine
                .check_in_at(&user, week_start(1) + TimeDelta::days(day))
                .expect("check in");
        }
        assert_eq!(three_check_ins(&engine, &user, 2).current_streak, 1);

        let outcome = engine
            .check_in_at(&user, week_start(1) + TimeDelta::days(5))
            .expect("backdated check in");
        assert!(matches!(
            outcome.path,
            WritePath::Audit {
                reason: ReconcileReason::OutOfOrderEvent,
                ..
            }
        ));
        assert_eq!(outcome.current_streak, 2);
        assert_eq!(outcome.weekly_count, 3);
        assert_eq!(outcome.transition, None);
    }

    #[test]
    fn spot_check_replaces_drifted_value() {
        let mut config = EngineConfig::default();
        config.streak.spot_check_interval = 1;
        let (store, _clock, engine) = fixture(config);
        let user = UserId::new("ana");
        three_check_ins(&engine, &user, 1);
        tamper(&store, &user, 9);

        let outcome = engine
            .check_in_at(&user, week_start(2) + TimeDelta::hours(3))
            .expect("check in");
        assert_eq!(
            outcome.drift,
            Some(Drift {
                incremental: 9,
                audited: 1
            })
        );
        assert_eq!(outcome.current_streak, 1);
        assert_eq!(store.load(&user).expect("load").expect("present").current_streak, 1);
    }

    #[test]
    fn store_outage_propagates() {
        let (store, _clock, engine) = fixture(EngineConfig::default());
        let user = UserId::new("ana");
        three_check_ins(&engine, &user, 1);
        store.set_unavailable(true);

        let err = engine
            .check_in_at(&user, week_start(2))
            .expect_err("check-in must fail");
        assert_eq!(err.code(), ErrorCode::StoreUnavailable);
        let err = engine.status_at(&user, week_start(2)).expect_err("read must fail");
        assert!(matches!(err, StreakError::Store(StoreError::Unavailable(_))));
    }

    #[test]
    fn concurrent_check_ins_credit_the_week_once() {
        let (store, _clock, engine) = fixture(EngineConfig::default());
        let engine = Arc::new(engine);
        let user = UserId::new("ana");
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let engine = Arc::clone(&engine);
                let barrier = Arc::clone(&barrier);
                let user = user.clone();
                thread::spawn(move || {
                    barrier.wait();
                    engine
                        .check_in_at(&user, week_start(1) + TimeDelta::minutes(i))
                        .expect("check in")
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread");
        }

        assert_eq!(store.event_count(&user).expect("count"), 8);
        let status = engine
            .status_at(&user, week_start(1) + TimeDelta::days(1))
            .expect("status");
        assert_eq!((status.weekly_count, status.current_streak), (8, 1));
    }

    #[test]
    fn read_ahead_of_clock_is_not_persisted() {
        let (store, clock, engine) = fixture(EngineConfig::default());
        let user = UserId::new("ana");
        three_check_ins(&engine, &user, 1);
        three_check_ins(&engine, &user, 2);
        clock.set(week_start(3));
        let before = store.load(&user).expect("load").expect("present");

        let ahead = engine
            .status_at(&user, week_start(1) + TimeDelta::weeks(40))
            .expect("status");
        assert_eq!(
            (ahead.current_streak, ahead.reconciled),
            (0, Some(ReconcileReason::StaleRead))
        );
        assert_eq!(store.load(&user).expect("load").expect("present"), before);

        let outcome = three_check_ins(&engine, &user, 3);
        assert!(matches!(outcome.path, WritePath::Incremental { .. }));
        assert_eq!(outcome.current_streak, 3);

        clock.set(week_start(3) + TimeDelta::days(6));
        assert_eq!(engine.status(&user).expect("status").current_streak, 3);
    }

    #[test]
    fn record_reconciled_past_the_log_heals_on_next_check_in() {
        let (store, _clock, engine) = fixture(EngineConfig::default());
        let user = UserId::new("ana");
        three_check_ins(&engine, &user, 1);
        three_check_ins(&engine, &user, 2);

        // A record stamped far ahead of every logged event.
        let mut record = store.load(&user).expect("load").expect("present");
        let version = record.version;
        let far = week_start(1) + TimeDelta::weeks(40);
        record.current_streak = 0;
        record.last_credited_week = None;
        record.last_reconciled_at = Some(far);
        record.last_reconciled_week = Some(engine.window().containing(far));
        assert!(store.compare_and_swap(version, &record).expect("cas"));

        let first_at = week_start(3) + TimeDelta::hours(7);
        let first = engine.check_in_at(&user, first_at).expect("check in");
        assert_eq!(
            first.path,
            WritePath::Audit {
                reason: ReconcileReason::OutOfOrderEvent,
                as_of: first_at,
            }
        );
        assert_eq!(first.current_streak, 2);

        for day in [2, 4] {
            let at = week_start(3) + TimeDelta::days(day) + TimeDelta::hours(7);
            let outcome = engine.check_in_at(&user, at).expect("check in");
            assert!(matches!(outcome.path, WritePath::Incremental { .. }));
        }
        let stored = store.load(&user).expect("load").expect("present");
        assert_eq!(stored.current_streak, 3);
    }

    #[test]
    fn check_in_after_failed_write_recomputes() {
        let events = Arc::new(MemoryStore::new());
        let records = Arc::new(MemoryStore::new());
        let engine = StreakEngine::with_clock(
            events.clone(),
            records.clone(),
            Arc::new(ManualClock::new(present())),
            EngineConfig::default(),
        )
        .expect("engine");
        let user = UserId::new("ana");
        assert_eq!(three_check_ins(&engine, &user, 1).current_streak, 1);

        // Week 2 is logged but its record writes never land.
        records.set_unavailable(true);
        for day in [0, 2, 4] {
            let at = week_start(2) + TimeDelta::days(day);
            engine.check_in_at(&user, at).expect_err("record store is down");
        }
        records.set_unavailable(false);
        assert_eq!(events.event_count(&user).expect("count"), 6);

        let outcome = engine
            .check_in_at(&user, week_start(3) + TimeDelta::hours(7))
            .expect("check in");
        assert!(matches!(
            outcome.path,
            WritePath::Audit {
                reason: ReconcileReason::UnreconciledEvents,
                ..
            }
        ));
        assert_eq!(outcome.current_streak, 2);
    }

    #[test]
    fn concurrent_stale_reads_reconcile_once() {
        let (store, _clock, engine) = fixture(EngineConfig::default());
        let engine = Arc::new(engine);
        let user = UserId::new("ana");
        three_check_ins(&engine, &user, 1);
        three_check_ins(&engine, &user, 2);
        let before = store.load(&user).expect("load").expect("present");
        let now = week_start(4) + TimeDelta::hours(1);
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let barrier = Arc::clone(&barrier);
                let user = user.clone();
                thread::spawn(move || {
                    barrier.wait();
                    engine.status_at(&user, now).expect("status")
                })
            })
            .collect();
        let reports: Vec<StatusReport> = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .collect();

        assert!(reports.iter().all(|r| r.current_streak == 0));
        let reconciled = reports.iter().filter(|r| r.reconciled.is_some()).count();
        assert_eq!(reconciled, 1);

        let after = store.load(&user).expect("load").expect("present");
        assert_eq!(after.version, before.version + 1);
        assert_eq!(after.current_streak, 0);
        assert_eq!(after.last_reconciled_at, Some(now));
    }

    #[test]
    fn repair_ahead_of_clock_writes_nothing() {
        let (store, _clock, engine) = fixture(EngineConfig::default());
        let user = UserId::new("ana");
        three_check_ins(&engine, &user, 1);
        let before = store.load(&user).expect("load").expect("present");

        let report = engine
            .repair_at(&RepairScope::All, RepairMode::Apply, present() + TimeDelta::weeks(1))
            .expect("repair");
        assert_eq!(report.mode, RepairMode::DryRun);
        assert_eq!(report.changed, 1);
        assert_eq!(store.load(&user).expect("load").expect("present"), before);
    }

    #[test]
    fn repair_fixes_drift_and_is_idempotent() {
        let (store, _clock, engine) = fixture(EngineConfig::default());
        let (ana, bo) = (UserId::new("ana"), UserId::new("bo"));
        three_check_ins(&engine, &ana, 1);
        three_check_ins(&engine, &ana, 2);
        three_check_ins(&engine, &bo, 2);
        tamper(&store, &ana, 7);

        let now = week_start(2) + TimeDelta::days(6);
        let dry = engine
            .repair_at(&RepairScope::default(), RepairMode::DryRun, now)
            .expect("dry run");
        assert_eq!((dry.examined, dry.changed), (2, 1));
        assert_eq!(store.load(&ana).expect("load").expect("present").current_streak, 7);

        let first = engine
            .repair_at(&RepairScope::default(), RepairMode::Apply, now)
            .expect("repair");
        assert_eq!(
            first.changes,
            vec![RepairChange {
                user: ana.clone(),
                stored: 7,
                audited: 2
            }]
        );
        assert!(first.is_clean());

        let second = engine
            .repair_at(&RepairScope::default(), RepairMode::Apply, now)
            .expect("repair");
        assert_eq!((second.examined, second.changed), (2, 0));
    }

    #[test]
    fn repair_lapses_stale_streaks() {
        let (_store, _clock, engine) = fixture(EngineConfig::default());
        let user = UserId::new("ana");
        three_check_ins(&engine, &user, 1);

        let report = engine
            .repair_at(&RepairScope::All, RepairMode::Apply, week_start(5))
            .expect("repair");
        assert_eq!(report.changed, 1);
        let status = engine.status_at(&user, week_start(5)).expect("status");
        assert_eq!((status.current_streak, status.reconciled), (0, None));
    }

    /// Event store that fails every count for one user.
    struct FailsFor {
        inner: MemoryStore,
        broken: UserId,
    }

    impl AttendanceStore for FailsFor {
        fn record_event(
            &self,
            user: &UserId,
            at: DateTime<Utc>,
        ) -> Result<AttendanceEvent, StoreError> {
            self.inner.record_event(user, at)
        }

        fn count_events_in_window(&self, user: &UserId, week: &Week) -> Result<u32, StoreError> {
            if *user == self.broken {
                return Err(StoreError::Unavailable("injected".into()));
            }
            self.inner.count_events_in_window(user, week)
        }

        fn most_recent_event(&self, user: &UserId) -> Result<Option<DateTime<Utc>>, StoreError> {
            self.inner.most_recent_event(user)
        }
    }

    #[test]
    fn repair_collects_per_user_failures() {
        let records = Arc::new(MemoryStore::new());
        let events = Arc::new(FailsFor {
            inner: MemoryStore::new(),
            broken: UserId::new("bo"),
        });
        let engine = StreakEngine::with_clock(
            events,
            records,
            Arc::new(ManualClock::new(present())),
            EngineConfig::default(),
        )
        .expect("engine");

        let scope = RepairScope::Users(vec![UserId::new("bo"), UserId::new("ana"), UserId::new("bo")]);
        let report = engine
            .repair_at(&scope, RepairMode::Apply, week_start(2))
            .expect("repair");
        assert_eq!(report.examined, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].user, UserId::new("bo"));
        assert_eq!(report.failures[0].code, "E3001");
    }

    /// Record store whose swaps always lose.
    struct AlwaysRaced(MemoryStore);

    impl RecordStore for AlwaysRaced {
        fn load(&self, user: &UserId) -> Result<Option<StreakRecord>, StoreError> {
            self.0.load(user)
        }

        fn compare_and_swap(&self, _: u64, _: &StreakRecord) -> Result<bool, StoreError> {
            Ok(false)
        }

        fn users(&self, filter: UserFilter) -> Result<Vec<UserId>, StoreError> {
            self.0.users(filter)
        }
    }

    #[test]
    fn exhausted_swaps_surface_as_conflict() {
        let mut config = EngineConfig::default();
        config.locks.max_cas_retries = 3;
        let engine = StreakEngine::with_clock(
            Arc::new(MemoryStore::new()),
            Arc::new(AlwaysRaced(MemoryStore::new())),
            Arc::new(ManualClock::new(week_start(1))),
            config,
        )
        .expect("engine");

        let err = engine
            .check_in_at(&UserId::new("ana"), week_start(1))
            .expect_err("must give up");
        assert!(matches!(
            err,
            StreakError::ConflictRetriesExhausted { attempts: 3, .. }
        ));
    }

    #[test]
    fn audit_reports_consistency() {
        let (store, _clock, engine) = fixture(EngineConfig::default());
        let user = UserId::new("ana");
        three_check_ins(&engine, &user, 1);
        three_check_ins(&engine, &user, 2);

        let now = week_start(3) + TimeDelta::days(1);
        let report = engine.audit_at(&user, now).expect("audit");
        assert!(report.consistent);
        assert_eq!((report.stored_streak, report.audited_now), (2, 2));

        tamper(&store, &user, 5);
        let report = engine.audit_at(&user, now).expect("audit");
        assert!(!report.consistent);
        assert_eq!(report.audited_at_stored, Some(2));
        // Audit never writes.
        assert_eq!(store.load(&user).expect("load").expect("present").current_streak, 5);
    }

    #[test]
    fn audit_treats_pending_lapse_as_consistent() {
        let (_store, _clock, engine) = fixture(EngineConfig::default());
        let user = UserId::new("ana");
        three_check_ins(&engine, &user, 1);

        let report = engine.audit_at(&user, week_start(4)).expect("audit");
        assert_eq!((report.stored_streak, report.audited_now), (1, 0));
        assert!(report.consistent);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = EngineConfig::default();
        config.streak.threshold = 0;
        let store = Arc::new(MemoryStore::new());
        let err = StreakEngine::with_store(store, Arc::new(SystemClock), config)
            .expect_err("zero threshold");
        assert_eq!(err, ConfigError::ZeroThreshold);
    }
}
