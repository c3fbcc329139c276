use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::Args;
use gymstreak_core::UserId;
use gymstreak_core::engine::AuditReport;
use gymstreak_core::error::ErrorCode;
use std::io::Write;

use super::{StoreArgs, fmt_instant, parse_instant, parse_user};
use crate::output::{OutputMode, pretty_kv, pretty_section, render_mode};

#[derive(Args, Debug)]
pub struct VerifyArgs {
    #[arg(value_parser = parse_user)]
    pub user: UserId,

    /// Audit as of this instant (RFC 3339) instead of now.
    #[arg(long, value_parser = parse_instant)]
    pub now: Option<DateTime<Utc>>,
}

/// Compare the stored streak with a fresh recomputation. Never writes.
///
/// # Errors
///
/// Returns an error when the user is unknown, the store fails, or the stored
/// value does not match the audit.
pub fn run_verify(args: &VerifyArgs, store: &StoreArgs, output: OutputMode) -> Result<()> {
    let engine = store.open_engine()?;
    let report = match args.now {
        Some(now) => engine.audit_at(&args.user, now)?,
        None => engine.audit(&args.user)?,
    };

    if report.stored_as_of.is_none() && report.last_check_in.is_none() {
        anyhow::bail!(
            "{}: no check-ins or streak record for {}",
            ErrorCode::UserNotFound.code(),
            args.user
        );
    }

    render_mode(output, &report, render_text, render_pretty)?;

    if report.consistent {
        Ok(())
    } else {
        anyhow::bail!(
            "{}: stored streak {} for {} does not match audited {}",
            ErrorCode::InconsistentState.code(),
            report.stored_streak,
            report.user,
            report.audited_at_stored.unwrap_or(report.audited_now),
        )
    }
}

fn verdict(report: &AuditReport) -> &'static str {
    if report.consistent { "OK" } else { "DRIFT" }
}

fn render_text(report: &AuditReport, w: &mut dyn Write) -> std::io::Result<()> {
    writeln!(
        w,
        "{} user={} stored={} audited={} weekly_count={} weeks_scanned={}",
        verdict(report),
        report.user,
        report.stored_streak,
        report.audited_now,
        report.weekly_count,
        report.weeks_scanned,
    )
}

fn render_pretty(report: &AuditReport, w: &mut dyn Write) -> std::io::Result<()> {
    pretty_section(w, &format!("Verify {}", report.user))?;
    pretty_kv(w, "As of", fmt_instant(report.as_of))?;
    pretty_kv(w, "Stored", report.stored_streak.to_string())?;
    if let Some(at) = report.stored_as_of {
        pretty_kv(w, "Stored as of", fmt_instant(at))?;
    }
    if let Some(audited) = report.audited_at_stored {
        pretty_kv(w, "Audit then", audited.to_string())?;
    }
    pretty_kv(w, "Audit now", report.audited_now.to_string())?;
    pretty_kv(w, "This week", report.weekly_count.to_string())?;
    if let Some(at) = report.last_check_in {
        pretty_kv(w, "Last check-in", fmt_instant(at))?;
    }
    pretty_kv(w, "Result", verdict(report))
}
