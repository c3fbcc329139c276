use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use gymstreak_core::UserId;
use gymstreak_core::reconcile::{RepairMode, RepairReport, RepairScope};
use std::io::Write;

use super::{StoreArgs, fmt_instant, parse_instant, parse_user};
use crate::output::{OutputMode, pretty_kv, pretty_rule, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct RepairArgs {
    /// Visit every stored record, not only active streaks.
    #[arg(long, conflicts_with = "users")]
    pub all: bool,

    /// Repair only these users (repeatable).
    #[arg(long = "user", value_name = "USER", value_parser = parse_user)]
    pub users: Vec<UserId>,

    /// Report drift without writing.
    #[arg(long)]
    pub dry_run: bool,

    /// Recompute as of this instant (RFC 3339) instead of now.
    #[arg(long, value_parser = parse_instant)]
    pub now: Option<DateTime<Utc>>,
}

impl RepairArgs {
    fn scope(&self) -> RepairScope {
        if self.all {
            RepairScope::All
        } else if self.users.is_empty() {
            RepairScope::ActiveStreaks
        } else {
            RepairScope::Users(self.users.clone())
        }
    }

    const fn mode(&self) -> RepairMode {
        if self.dry_run {
            RepairMode::DryRun
        } else {
            RepairMode::Apply
        }
    }
}

/// Recompute stored streaks from the attendance log.
///
/// Per-user failures are reported and make the command exit non-zero after
/// every other user has been processed.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or any user failed.
pub fn run_repair(args: &RepairArgs, store: &StoreArgs, output: OutputMode) -> Result<()> {
    let engine = store.open_engine()?;
    let scope = args.scope();
    let report = match args.now {
        Some(now) => engine.repair_at(&scope, args.mode(), now)?,
        None => engine.repair(&scope, args.mode())?,
    };
    render_mode(output, &report, render_text, render_pretty)?;

    if report.is_clean() {
        Ok(())
    } else {
        anyhow::bail!("repair: {} of {} users failed", report.failures.len(), report.examined)
    }
}

fn render_text(report: &RepairReport, w: &mut dyn Write) -> std::io::Result<()> {
    for change in &report.changes {
        writeln!(w, "changed user={} stored={} audited={}", change.user, change.stored, change.audited)?;
    }
    for failure in &report.failures {
        writeln!(w, "failed user={} code={} message={}", failure.user, failure.code, failure.message)?;
    }
    writeln!(
        w,
        "examined={} changed={} failed={} dry_run={}",
        report.examined,
        report.changed,
        report.failures.len(),
        report.mode == RepairMode::DryRun,
    )
}

fn render_pretty(report: &RepairReport, w: &mut dyn Write) -> std::io::Result<()> {
    let heading = match report.mode {
        RepairMode::Apply => "Repair",
        RepairMode::DryRun => "Repair (dry run)",
    };
    pretty_section(w, heading)?;
    pretty_kv(w, "As of", fmt_instant(report.as_of))?;
    pretty_kv(w, "Examined", report.examined.to_string())?;
    pretty_kv(w, "Changed", report.changed.to_string())?;
    pretty_kv(w, "Failed", report.failures.len().to_string())?;
    pretty_kv(w, "Elapsed", format!("{}ms", report.elapsed.as_millis()))?;

    if !report.changes.is_empty() {
        pretty_rule(w)?;
        for change in &report.changes {
            writeln!(w, "  {:<20} {} -> {}", change.user.as_str(), change.stored, change.audited)?;
        }
    }
    if !report.failures.is_empty() {
        pretty_rule(w)?;
        for failure in &report.failures {
            writeln!(w, "  {:<20} {} {}", failure.user.as_str(), failure.code, failure.message)?;
        }
    }
    Ok(())
}
