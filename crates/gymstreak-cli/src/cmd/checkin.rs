use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use gymstreak_core::UserId;
use gymstreak_core::engine::CheckInOutcome;
use gymstreak_core::reconcile::WritePath;
use std::io::Write;

use super::{StoreArgs, fmt_instant, parse_instant, parse_user};
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct CheckinArgs {
    /// User checking in.
    #[arg(value_parser = parse_user)]
    pub user: UserId,

    /// When the check-in happened (RFC 3339). Defaults to now.
    #[arg(long, value_parser = parse_instant)]
    pub at: Option<DateTime<Utc>>,
}

/// Record a check-in and print the updated streak.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or the check-in fails.
pub fn run_checkin(args: &CheckinArgs, store: &StoreArgs, output: OutputMode) -> Result<()> {
    let engine = store.open_engine()?;
    let outcome = match args.at {
        Some(at) => engine.check_in_at(&args.user, at)?,
        None => engine.check_in(&args.user)?,
    };
    render_mode(output, &outcome, render_text, render_pretty)
}

fn path_label(path: &WritePath) -> String {
    match path {
        WritePath::Incremental { spot_check: false } => "incremental".to_string(),
        WritePath::Incremental { spot_check: true } => "incremental+spot_check".to_string(),
        WritePath::Audit { reason, .. } => format!("audit ({reason})"),
    }
}

fn render_text(outcome: &CheckInOutcome, w: &mut dyn Write) -> std::io::Result<()> {
    writeln!(
        w,
        "user={} at={} streak={} weekly_count={} week_start={} path={}",
        outcome.event.user,
        fmt_instant(outcome.event.occurred_at),
        outcome.current_streak,
        outcome.weekly_count,
        fmt_instant(outcome.week.start()),
        path_label(&outcome.path),
    )
}

fn render_pretty(outcome: &CheckInOutcome, w: &mut dyn Write) -> std::io::Result<()> {
    pretty_section(w, &format!("Checked in {}", outcome.event.user))?;
    pretty_kv(w, "At", fmt_instant(outcome.event.occurred_at))?;
    pretty_kv(w, "Week", outcome.week.to_string())?;
    pretty_kv(w, "This week", outcome.weekly_count.to_string())?;
    pretty_kv(w, "Streak", outcome.current_streak.to_string())?;
    pretty_kv(w, "Path", path_label(&outcome.path))?;
    if let Some(drift) = outcome.drift {
        pretty_kv(
            w,
            "Drift",
            format!("incremental {} corrected to {}", drift.incremental, drift.audited),
        )?;
    }
    Ok(())
}
