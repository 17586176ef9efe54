//! Habit Pulse - Timezone-aware analytics engine for habit tracking
//!
//! Pulse turns a snapshot of users, habits, completion events and suppression
//! contexts into per-user, per-local-day projections: streaks, rolling
//! completion rates with slip detection, and the list of habits that still
//! need a reminder today.
//!
//! ## Modules
//!
//! - **Local days**: every UTC instant is mapped to the owning user's local
//!   calendar date in exactly one place ([`local_day`])
//! - **Write path**: one completion per habit per local day ([`idempotency`])
//! - **Projections**: streaks, rolling features, due habits and analytics
//! - **Facade**: [`HabitEngine`] wires everything from a validated
//!   [`EngineConfig`]

pub mod analytics;
pub mod buckets;
pub mod config;
pub mod due;
pub mod engine;
pub mod error;
pub mod features;
pub mod idempotency;
pub mod ledger;
pub mod local_day;
pub mod streaks;
pub mod suppression;
pub mod types;

pub use config::{EngineConfig, IdempotencyPolicy, ReminderCadence, Settings};
pub use engine::HabitEngine;
pub use error::{EngineError, Result};
pub use ledger::HabitLedger;
pub use local_day::LocalDayResolver;
pub use types::{
    Context, ContextKind, Difficulty, Event, FeatureRow, Habit, HabitStatus, RecordOutcome,
    ReminderDue, Streak, User,
};

/// Pulse version reported by the CLI
pub const PULSE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for reports
pub const PRODUCER_NAME: &str = "habit-pulse";
