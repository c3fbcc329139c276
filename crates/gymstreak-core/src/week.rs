//! Rolling 7-day week windows.
//!
//! A [`Week`] is the half-open interval `[start, start + 7d)` where `start` is
//! local midnight on the configured week-start weekday. Weeks are computed as
//! day offsets from the instant itself, never from a week-of-year number, so
//! buckets that straddle a year boundary behave like any other week.
//!
//! All arithmetic happens against an explicit fixed UTC offset. Callers must
//! not mix windows built with different offsets.

use std::fmt;

use chrono::{DateTime, Datelike, FixedOffset, NaiveTime, Offset, TimeDelta, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// One rolling week, identified by its UTC start instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Week {
    start: DateTime<Utc>,
}

impl Week {
    /// Rebuild a week from a previously computed start instant.
    ///
    /// Used by store adapters that persist weeks; the start is trusted as-is.
    #[must_use]
    pub const fn from_start(start: DateTime<Utc>) -> Self {
        Self { start }
    }

    /// Inclusive start of the window.
    #[must_use]
    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Exclusive end of the window.
    #[must_use]
    pub fn end(&self) -> DateTime<Utc> {
        self.start + TimeDelta::weeks(1)
    }

    /// `true` when `instant` lies in `[start, end)`.
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end()
    }

    /// The week immediately before this one.
    #[must_use]
    pub fn previous(&self) -> Self {
        Self {
            start: self.start - TimeDelta::weeks(1),
        }
    }

    /// The week immediately after this one.
    #[must_use]
    pub fn next(&self) -> Self {
        Self { start: self.end() }
    }
}

impl fmt::Display for Week {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "week of {}", self.start.format("%Y-%m-%dT%H:%MZ"))
    }
}

/// Maps instants to the rolling week that contains them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekWindow {
    week_start: Weekday,
    offset: FixedOffset,
}

impl Default for WeekWindow {
    fn default() -> Self {
        Self::utc(Weekday::Mon)
    }
}

impl WeekWindow {
    #[must_use]
    pub const fn new(week_start: Weekday, offset: FixedOffset) -> Self {
        Self { week_start, offset }
    }

    /// Window anchored at UTC midnight.
    #[must_use]
    pub fn utc(week_start: Weekday) -> Self {
        Self::new(week_start, Utc.fix())
    }

    #[must_use]
    pub const fn week_start(&self) -> Weekday {
        self.week_start
    }

    #[must_use]
    pub const fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// The week containing `instant`.
    ///
    /// Pure and deterministic: two instants map to the same [`Week`] iff they
    /// fall in the same 7-day bucket.
    #[must_use]
    pub fn containing(&self, instant: DateTime<Utc>) -> Week {
        let local = instant.with_timezone(&self.offset).naive_local();
        let days_back = (7 + local.weekday().num_days_from_monday()
            - self.week_start.num_days_from_monday())
            % 7;
        let local_midnight =
            (local.date() - TimeDelta::days(i64::from(days_back))).and_time(NaiveTime::MIN);
        let utc_midnight =
            local_midnight - TimeDelta::seconds(i64::from(self.offset.local_minus_utc()));
        Week {
            start: utc_midnight.and_utc(),
        }
    }
}
