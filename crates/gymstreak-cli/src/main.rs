#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{Parser, Subcommand};
use cmd::StoreArgs;
use output::{CliError, OutputMode};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "gs: weekly attendance streaks",
    long_about = None
)]
struct Cli {
    /// Enable debug logging for gymstreak.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Store database (default: $GYMSTREAK_DB, then the user data dir).
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    /// Config file (default: $GYMSTREAK_CONFIG, then the user config dir).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Output format.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Shorthand for `--format json`.
    #[arg(long, global = true, hide = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        output::resolve_output_mode(self.format, self.json)
    }

    fn store_args(&self) -> StoreArgs {
        StoreArgs {
            db: self.db.clone(),
            config: self.config.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Record a check-in",
        long_about = "Record a gym check-in and update the user's streak.",
        after_help = "EXAMPLES:\n    # Check in now\n    gs checkin ana\n\n    # Record a check-in that happened earlier\n    gs checkin ana --at 2026-10-12T18:30:00Z"
    )]
    Checkin(cmd::checkin::CheckinArgs),

    #[command(
        about = "Show weekly count and streak",
        long_about = "Show this week's check-in count and the current streak.",
        after_help = "EXAMPLES:\n    gs status ana\n\n    # Emit machine-readable output\n    gs status ana --json"
    )]
    Status(cmd::status::StatusArgs),

    #[command(
        about = "Recompute stored streaks",
        long_about = "Recompute stored streaks from the attendance log and overwrite them.",
        after_help = "EXAMPLES:\n    # Repair every active streak\n    gs repair\n\n    # Preview drift for two users\n    gs repair --user ana --user bo --dry-run"
    )]
    Repair(cmd::repair::RepairArgs),

    #[command(
        about = "Audit one user's streak",
        long_about = "Compare the stored streak with a recomputation; exits non-zero on drift."
    )]
    Verify(cmd::verify::VerifyArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("GYMSTREAK_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "gymstreak=debug,info"
        } else {
            "gymstreak=info,warn"
        })
    });

    let format = env::var("GYMSTREAK_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn run(cli: &Cli, output: OutputMode) -> anyhow::Result<()> {
    let store = cli.store_args();
    match &cli.command {
        Commands::Checkin(args) => cmd::checkin::run_checkin(args, &store, output),
        Commands::Status(args) => cmd::status::run_status(args, &store, output),
        Commands::Repair(args) => cmd::repair::run_repair(args, &store, output),
        Commands::Verify(args) => cmd::verify::run_verify(args, &store, output),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let output = cli.output_mode();
    match run(&cli, output) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if output::render_error(output, &CliError::from_anyhow(&err)).is_err() {
                eprintln!("error: {err:#}");
            }
            ExitCode::FAILURE
        }
    }
}
