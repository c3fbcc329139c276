//! SQLite schema for the attendance log and streak records.
//!
//! - `attendance_events` is append-only; rows are never updated or deleted
//! - `streak_records` holds one derived row per user, written only through a
//!   `version` compare-and-swap
//! - `store_meta` tracks the schema version alongside `PRAGMA user_version`
//!
//! All instants are stored as UTC microseconds since the Unix epoch.

/// Migration v1: core tables plus store metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS attendance_events (
    event_id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL CHECK (length(trim(user_id)) > 0),
    occurred_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS streak_records (
    user_id TEXT PRIMARY KEY CHECK (length(trim(user_id)) > 0),
    current_streak INTEGER NOT NULL CHECK (current_streak >= 0),
    last_reconciled_week_us INTEGER,
    last_reconciled_at_us INTEGER,
    last_credited_week_us INTEGER,
    version INTEGER NOT NULL CHECK (version >= 1)
);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL
);

INSERT OR IGNORE INTO store_meta (id, schema_version) VALUES (1, 1);
";

/// Migration v2: read-path indexes for window counts and repair scans.
pub const MIGRATION_V2_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_attendance_user_time
    ON attendance_events(user_id, occurred_at_us);

CREATE INDEX IF NOT EXISTS idx_streak_records_active
    ON streak_records(current_streak, user_id);

UPDATE store_meta
SET schema_version = 2
WHERE id = 1;
";

/// Indexes expected by the count and repair query paths.
pub const REQUIRED_INDEXES: &[&str] = &["idx_attendance_user_time", "idx_streak_records_active"];
