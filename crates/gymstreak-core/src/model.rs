//! Fixed-shape records at the engine boundary.
//!
//! Stores translate their native rows into these types; nothing inside the
//! engine sees loosely-typed documents.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::week::Week;

/// Opaque user identity, as issued by the surrounding auth provider.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// One check-in. `occurred_at` never changes after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    pub user: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Persisted per-user derived streak state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakRecord {
    pub user: UserId,
    /// Consecutive qualifying weeks, as of `last_reconciled_at`.
    pub current_streak: u32,
    /// Week containing `last_reconciled_at`.
    pub last_reconciled_week: Option<Week>,
    pub last_reconciled_at: Option<DateTime<Utc>>,
    /// Most recent week already counted into `current_streak`.
    pub last_credited_week: Option<Week>,
    /// Compare-and-swap token. `0` means never persisted.
    pub version: u64,
}

impl StreakRecord {
    /// Implicit zero state for a user with no stored record.
    #[must_use]
    pub const fn empty(user: UserId) -> Self {
        Self {
            user,
            current_streak: 0,
            last_reconciled_week: None,
            last_reconciled_at: None,
            last_credited_week: None,
            version: 0,
        }
    }

    /// Same derived fields, ignoring the CAS token.
    #[must_use]
    pub fn same_state(&self, other: &Self) -> bool {
        self.user == other.user
            && self.current_streak == other.current_streak
            && self.last_reconciled_week == other.last_reconciled_week
            && self.last_reconciled_at == other.last_reconciled_at
            && self.last_credited_week == other.last_credited_week
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_record_is_zero_state() {
        let record = StreakRecord::empty(UserId::new("ana"));
        assert_eq!(record.current_streak, 0);
        assert_eq!(record.version, 0);
        assert!(record.last_reconciled_week.is_none());
        assert!(record.last_credited_week.is_none());
    }

    #[test]
    fn user_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&UserId::new("u-42")).expect("serialize");
        assert_eq!(json, "\"u-42\"");
    }

    #[test]
    fn same_state_ignores_version() {
        let a = StreakRecord::empty(UserId::new("ana"));
        let mut b = a.clone();
        b.version = 7;
        assert!(a.same_state(&b));
        b.current_streak = 1;
        assert!(!a.same_state(&b));
    }
}
