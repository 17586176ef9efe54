//! Engine configuration
//!
//! [`Settings`] is the raw record read from JSON or the environment.
//! [`EngineConfig`] is the validated form handed to [`crate::HabitEngine`];
//! all validation happens once, in [`EngineConfig::from_settings`].

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::buckets::{TimeBucketSpec, DEFAULT_TIME_BUCKETS};
use crate::error::{EngineError, Result};
use crate::local_day::parse_timezone;

pub use crate::idempotency::IdempotencyPolicy;

/// Prefix of every environment variable read by [`Settings::from_env`]
pub const ENV_PREFIX: &str = "PULSE_";

/// Default reminder interval in minutes
pub const DEFAULT_REMINDER_INTERVAL_MINUTES: u32 = 15;

/// Raw configuration values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Default IANA zone for users without a valid one
    pub timezone: String,
    /// `name=start-end[,...]` hour buckets
    pub time_buckets: String,
    /// Five-field cron expression; takes precedence over the interval
    pub reminder_cron: Option<String>,
    pub reminder_interval_minutes: u32,
    pub disable_scheduler: bool,
    pub idempotency: IdempotencyPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            time_buckets: DEFAULT_TIME_BUCKETS.to_string(),
            reminder_cron: None,
            reminder_interval_minutes: DEFAULT_REMINDER_INTERVAL_MINUTES,
            disable_scheduler: false,
            idempotency: IdempotencyPolicy::default(),
        }
    }
}

impl Settings {
    /// Parse settings from JSON; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read `PULSE_*` variables from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, which maps a full variable name
    /// (e.g. `PULSE_TIMEZONE`) to its value. Unset variables keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{}{}", ENV_PREFIX, name))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut settings = Self::default();

        if let Some(tz) = get("TIMEZONE") {
            settings.timezone = tz;
        }
        if let Some(buckets) = get("TIME_BUCKETS") {
            settings.time_buckets = buckets;
        }
        settings.reminder_cron = get("REMINDER_CRON");
        if let Some(raw) = get("REMINDER_INTERVAL_MINUTES") {
            settings.reminder_interval_minutes = raw.parse().map_err(|_| {
                EngineError::ConfigError(format!(
                    "{}REMINDER_INTERVAL_MINUTES must be a positive integer, got '{}'",
                    ENV_PREFIX, raw
                ))
            })?;
        }
        if let Some(raw) = get("DISABLE_SCHEDULER") {
            settings.disable_scheduler = parse_flag(&raw).ok_or_else(|| {
                EngineError::ConfigError(format!(
                    "{}DISABLE_SCHEDULER must be a boolean, got '{}'",
                    ENV_PREFIX, raw
                ))
            })?;
        }
        if let Some(raw) = get("IDEMPOTENCY") {
            settings.idempotency = parse_policy(&raw)?;
        }

        Ok(settings)
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_policy(raw: &str) -> Result<IdempotencyPolicy> {
    match raw.to_ascii_lowercase().as_str() {
        "local_day" => Ok(IdempotencyPolicy::LocalDay),
        "exact_instant" => Ok(IdempotencyPolicy::ExactInstant),
        other => Err(EngineError::ConfigError(format!(
            "unknown idempotency policy '{}' (expected local_day or exact_instant)",
            other
        ))),
    }
}

/// How often an external trigger should run the reminder sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReminderCadence {
    Interval { minutes: u32 },
    Cron { expression: String },
}

/// Cadence plus the kill switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderSchedule {
    pub cadence: ReminderCadence,
    pub enabled: bool,
}

/// Validated configuration passed to every engine component
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub default_tz: Tz,
    pub time_buckets: TimeBucketSpec,
    pub reminders: ReminderSchedule,
    pub idempotency: IdempotencyPolicy,
}

impl EngineConfig {
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let default_tz = parse_timezone(&settings.timezone)?;
        let time_buckets = TimeBucketSpec::parse(&settings.time_buckets)?;

        if settings.reminder_interval_minutes == 0 {
            return Err(EngineError::ConfigError(
                "reminder interval must be at least one minute".to_string(),
            ));
        }

        let cadence = match settings.reminder_cron {
            Some(expression) => {
                let fields = expression.split_whitespace().count();
                if fields != 5 {
                    return Err(EngineError::ConfigError(format!(
                        "cron expression '{}' has {} fields, expected 5",
                        expression, fields
                    )));
                }
                ReminderCadence::Cron { expression }
            }
            None => ReminderCadence::Interval {
                minutes: settings.reminder_interval_minutes,
            },
        };

        Ok(Self {
            default_tz,
            time_buckets,
            reminders: ReminderSchedule {
                cadence,
                enabled: !settings.disable_scheduler,
            },
            idempotency: settings.idempotency,
        })
    }

    /// Load and validate from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_settings(Settings::from_env()?)
    }
}
