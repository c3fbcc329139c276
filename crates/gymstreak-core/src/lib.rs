//! gymstreak-core: weekly attendance streaks.
//!
//! A week qualifies when a user checks in at least `threshold` times inside
//! one rolling seven-day [`week::Week`]. The streak is the number of
//! consecutive qualifying weeks ending at the current week, or at the
//! previous week while the current one is still open.
//!
//! # Conventions
//!
//! - **Errors**: typed errors with stable `E####` codes ([`error::ErrorCode`]);
//!   `anyhow::Result` only at file and config boundaries.
//! - **Logging**: `tracing` macros with structured fields (`user`, `streak`,
//!   `week_start`, `reason`).

pub mod auditor;
pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod incremental;
pub mod lock;
pub mod model;
pub mod reconcile;
pub mod store;
pub mod week;

pub use engine::StreakEngine;
pub use error::{ErrorCode, StreakError};
pub use model::{AttendanceEvent, StreakRecord, UserId};
