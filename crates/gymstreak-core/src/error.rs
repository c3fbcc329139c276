use std::fmt;

use crate::lock::LockError;
use crate::model::UserId;
use crate::store::StoreError;

/// Machine-readable error codes for operator- and client-friendly handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    InvalidConfig,
    UserNotFound,
    InvalidTimestamp,
    StoreUnavailable,
    CorruptRecord,
    InconsistentState,
    LockContention,
    ConflictRetriesExhausted,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1001",
            Self::InvalidConfig => "E1002",
            Self::UserNotFound => "E2001",
            Self::InvalidTimestamp => "E2002",
            Self::StoreUnavailable => "E3001",
            Self::CorruptRecord => "E3002",
            Self::InconsistentState => "E3003",
            Self::LockContention => "E5001",
            Self::ConflictRetriesExhausted => "E5002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::InvalidConfig => "Invalid configuration value",
            Self::UserNotFound => "User has no streak record",
            Self::InvalidTimestamp => "Invalid timestamp",
            Self::StoreUnavailable => "Attendance store unavailable",
            Self::CorruptRecord => "Corrupt stored record",
            Self::InconsistentState => "Incremental streak disagrees with audit",
            Self::LockContention => "Per-user lock contention",
            Self::ConflictRetriesExhausted => "Concurrent update retries exhausted",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in the gymstreak config.toml and retry."),
            Self::InvalidConfig => {
                Some("threshold must be at least 1 and utc_offset_minutes within ±1439.")
            }
            Self::UserNotFound => Some("Record a check-in for this user first."),
            Self::InvalidTimestamp => Some("Use an RFC 3339 timestamp, e.g. 2026-10-12T18:30:00Z."),
            Self::StoreUnavailable => Some("Retry once the store is reachable; counts were not guessed."),
            Self::CorruptRecord => {
                Some("Delete the damaged streak_records row, then run `gs repair --user <id>`.")
            }
            Self::InconsistentState => {
                Some("The audited value was persisted. Report the logged defect with its inputs.")
            }
            Self::LockContention => Some("Retry after the in-flight update for this user finishes."),
            Self::ConflictRetriesExhausted => {
                Some("Another writer keeps updating this user; retry shortly.")
            }
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Errors surfaced by [`crate::engine::StreakEngine`] operations.
#[derive(Debug, thiserror::Error)]
pub enum StreakError {
    /// The attendance or record store failed; never treated as a zero count.
    #[error("{}: {0}", .0.code())]
    Store(#[from] StoreError),

    /// The per-user lock could not be acquired in time.
    #[error("{0}")]
    Lock(#[from] LockError),

    /// The record kept changing under us across every compare-and-swap attempt.
    #[error("{}: record for {user} changed concurrently {attempts} times", ErrorCode::ConflictRetriesExhausted.code())]
    ConflictRetriesExhausted { user: UserId, attempts: u32 },
}

impl StreakError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Store(err) => err.code(),
            Self::Lock(err) => err.code(),
            Self::ConflictRetriesExhausted { .. } => ErrorCode::ConflictRetriesExhausted,
        }
    }

    /// Optional remediation hint for operators.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }
}
