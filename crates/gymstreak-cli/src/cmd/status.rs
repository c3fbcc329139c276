use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use gymstreak_core::UserId;
use gymstreak_core::engine::StatusReport;
use std::io::Write;

use super::{StoreArgs, fmt_instant, parse_instant, parse_user};
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[arg(value_parser = parse_user)]
    pub user: UserId,

    /// Evaluate as of this instant (RFC 3339) instead of now.
    #[arg(long, value_parser = parse_instant)]
    pub now: Option<DateTime<Utc>>,
}

/// Print this week's check-in count and the current streak.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or read.
pub fn run_status(args: &StatusArgs, store: &StoreArgs, output: OutputMode) -> Result<()> {
    let engine = store.open_engine()?;
    let report = match args.now {
        Some(now) => engine.status_at(&args.user, now)?,
        None => engine.status(&args.user)?,
    };
    render_mode(output, &report, render_text, render_pretty)
}

fn render_text(report: &StatusReport, w: &mut dyn Write) -> std::io::Result<()> {
    write!(
        w,
        "user={} weekly_count={} streak={} week_start={}",
        report.user,
        report.weekly_count,
        report.current_streak,
        fmt_instant(report.week.start()),
    )?;
    if let Some(reason) = report.reconciled {
        write!(w, " reconciled={reason}")?;
    }
    writeln!(w)
}

fn render_pretty(report: &StatusReport, w: &mut dyn Write) -> std::io::Result<()> {
    pretty_section(w, &format!("Streak for {}", report.user))?;
    pretty_kv(w, "Week", report.week.to_string())?;
    pretty_kv(w, "This week", report.weekly_count.to_string())?;
    pretty_kv(w, "Streak", report.current_streak.to_string())?;
    if let Some(reason) = report.reconciled {
        pretty_kv(w, "Reconciled", reason.to_string())?;
    }
    Ok(())
}
