pub mod checkin;
pub mod repair;
pub mod status;
pub mod verify;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use gymstreak_core::clock::SystemClock;
use gymstreak_core::config::resolve_config;
use gymstreak_core::db::SqliteStore;
use gymstreak_core::error::ErrorCode;
use gymstreak_core::{StreakEngine, UserId};

/// Environment variable naming the store database.
pub const DB_ENV: &str = "GYMSTREAK_DB";

/// Store and config locations shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct StoreArgs {
    pub db: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

impl StoreArgs {
    /// Open the configured store and build an engine over it.
    ///
    /// # Errors
    ///
    /// Returns an error if the config is invalid or the database cannot be
    /// opened.
    pub fn open_engine(&self) -> Result<StreakEngine> {
        let config = resolve_config(self.config.as_deref())?;
        let path = resolve_db_path(self.db.as_deref())?;
        tracing::debug!(db = %path.display(), threshold = config.streak.threshold, "opening store");

        let store = Arc::new(
            SqliteStore::open(&path).with_context(|| format!("open store {}", path.display()))?,
        );
        StreakEngine::with_store(store, Arc::new(SystemClock), config)
            .with_context(|| ErrorCode::InvalidConfig.code())
    }
}

/// Precedence: `--db`, then `$GYMSTREAK_DB`, then `<data dir>/gymstreak/gymstreak.db`.
fn resolve_db_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = std::env::var_os(DB_ENV) {
        return Ok(PathBuf::from(path));
    }
    dirs::data_dir()
        .map(|dir| dir.join("gymstreak").join("gymstreak.db"))
        .ok_or_else(|| anyhow::anyhow!("no data directory; pass --db or set {DB_ENV}"))
}

/// clap value parser for RFC 3339 instants.
pub fn parse_instant(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| format!("{}: {e}", ErrorCode::InvalidTimestamp.code()))
}

/// clap value parser rejecting blank user ids.
pub fn parse_user(raw: &str) -> std::result::Result<UserId, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("user id must not be blank".to_string());
    }
    Ok(UserId::new(trimmed))
}

/// Fixed-width instant for text and pretty output.
pub fn fmt_instant(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn explicit_db_path_wins() {
        let path = resolve_db_path(Some(Path::new("/tmp/x.db"))).expect("path");
        assert_eq!(path, PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn instants_are_normalized_to_utc() {
        let at = parse_instant("2026-10-12T20:30:00+02:00").expect("parse");
        assert_eq!(
            at,
            Utc.with_ymd_and_hms(2026, 10, 12, 18, 30, 0).single().expect("valid")
        );
    }

    #[test]
    fn bad_instants_name_the_error_code() {
        let err = parse_instant("last tuesday").expect_err("must reject");
        assert!(err.starts_with("E2002"));
    }

    #[test]
    fn blank_users_are_rejected() {
        assert!(parse_user("   ").is_err());
        assert_eq!(parse_user(" ana ").expect("valid"), UserId::new("ana"));
    }
}
