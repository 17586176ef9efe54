//! Pulse CLI - Command-line interface for Habit Pulse
//!
//! Commands:
//! - record: Record a completion into a ledger snapshot
//! - streak / features / due: Per-user projections
//! - remind: One reminder sweep across all users (for an external timer)
//! - weekly / heatmap / slips: Completion analytics
//! - doctor: Diagnose configuration and ledger health

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::prelude::*;
use uuid::Uuid;

use habit_pulse::analytics::{
    SlipParams, DEFAULT_SLIP_LONG_DAYS, DEFAULT_SLIP_SHORT_DAYS, DEFAULT_SLIP_THRESHOLD,
};
use habit_pulse::config::{EngineConfig, ReminderCadence, Settings};
use habit_pulse::local_day::parse_timezone;
use habit_pulse::{EngineError, HabitEngine, HabitLedger, PRODUCER_NAME, PULSE_VERSION};

/// Pulse - Timezone-aware habit analytics
#[derive(Parser)]
#[command(name = "pulse")]
#[command(version = PULSE_VERSION)]
#[command(about = "Streaks, rolling features and reminders for habit ledgers", long_about = None)]
struct Cli {
    /// Settings JSON file (defaults to PULSE_* environment variables)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct LedgerArgs {
    /// Ledger snapshot (JSON, use - for stdin)
    #[arg(short, long)]
    ledger: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a habit completion
    Record {
        #[command(flatten)]
        input: LedgerArgs,

        /// Habit ID
        #[arg(long)]
        habit: Uuid,

        /// Completion instant (RFC 3339, defaults to now)
        #[arg(long)]
        at: Option<DateTime<Utc>>,

        /// Write the updated ledger back to the input file
        #[arg(long)]
        save: bool,
    },

    /// Current and longest streak of a habit
    Streak {
        #[command(flatten)]
        input: LedgerArgs,

        /// Habit ID
        #[arg(long)]
        habit: Uuid,

        /// Only resolve habits owned by this user
        #[arg(long)]
        user: Option<Uuid>,

        /// Evaluation instant (RFC 3339, defaults to now)
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,
    },

    /// Per-habit, per-day feature rows
    Features {
        #[command(flatten)]
        input: LedgerArgs,

        /// User ID
        #[arg(long)]
        user: Uuid,

        /// First local day (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,

        /// Last local day (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,

        /// Override the user's timezone (IANA format)
        #[arg(long)]
        timezone: Option<String>,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        format: OutputFormat,
    },

    /// Habits still due today for a user
    Due {
        #[command(flatten)]
        input: LedgerArgs,

        /// User ID
        #[arg(long)]
        user: Uuid,

        /// Evaluation instant (RFC 3339, defaults to now)
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,

        /// Output format
        #[arg(long, default_value = "json")]
        format: OutputFormat,
    },

    /// Run one reminder sweep over every user
    Remind {
        #[command(flatten)]
        input: LedgerArgs,

        /// Evaluation instant (RFC 3339, defaults to now)
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,

        /// Run even when the scheduler is disabled
        #[arg(long)]
        force: bool,
    },

    /// Weekly completion percentage
    Weekly {
        #[command(flatten)]
        input: LedgerArgs,

        /// User ID
        #[arg(long)]
        user: Uuid,

        /// First local day (YYYY-MM-DD, defaults to last week's Monday)
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Last local day (YYYY-MM-DD, defaults to this week's Sunday)
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Evaluation instant for the default window (RFC 3339, defaults to now)
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,

        /// Output format
        #[arg(long, default_value = "json")]
        format: OutputFormat,
    },

    /// Day-of-week by time-bucket completion counts
    Heatmap {
        #[command(flatten)]
        input: LedgerArgs,

        /// User ID
        #[arg(long)]
        user: Uuid,

        /// First local day (YYYY-MM-DD, defaults to 30 days before today)
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Last local day (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Evaluation instant for the default window (RFC 3339, defaults to now)
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,
    },

    /// Habits whose weekly rate trails their monthly rate
    Slips {
        #[command(flatten)]
        input: LedgerArgs,

        /// User ID
        #[arg(long)]
        user: Uuid,

        /// Evaluation instant (RFC 3339, defaults to now)
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,

        /// Recent window in days (at least 1)
        #[arg(long, default_value_t = DEFAULT_SLIP_SHORT_DAYS)]
        w7: u32,

        /// Reference window in days (at least 7)
        #[arg(long, default_value_t = DEFAULT_SLIP_LONG_DAYS)]
        w30: u32,

        /// Minimum reference-rate minus recent-rate difference (0 to 1)
        #[arg(long, default_value_t = DEFAULT_SLIP_THRESHOLD)]
        threshold: f64,

        /// Output format
        #[arg(long, default_value = "json")]
        format: OutputFormat,
    },

    /// Diagnose configuration and ledger health
    Doctor {
        /// Ledger snapshot to check
        #[arg(short, long)]
        ledger: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    Pretty,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "habit_pulse=info,pulse=info".into()),
    );
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn run(cli: Cli) -> Result<(), PulseCliError> {
    if let Commands::Doctor { ledger, json } = &cli.command {
        return cmd_doctor(cli.config.as_deref(), ledger.as_deref(), *json);
    }

    let engine = HabitEngine::new(load_config(cli.config.as_deref())?);

    match cli.command {
        Commands::Record {
            input,
            habit,
            at,
            save,
        } => {
            if save && is_stdin(&input.ledger) {
                return Err(PulseCliError::Usage(
                    "--save needs a ledger file, not stdin".to_string(),
                ));
            }
            let mut ledger = load_ledger(&input.ledger)?;
            let outcome =
                engine.record_completion(&mut ledger, habit, at.unwrap_or_else(Utc::now))?;
            if save && !outcome.idempotent_hit {
                fs::write(&input.ledger, ledger.to_json()?)?;
                tracing::info!(path = %input.ledger.display(), "ledger saved");
            }
            print_value(&outcome, &OutputFormat::Pretty)
        }

        Commands::Streak {
            input,
            habit,
            user,
            as_of,
        } => {
            let ledger = load_ledger(&input.ledger)?;
            let streak = engine.compute_streak(&ledger, user, habit, as_of)?;
            print_value(&streak, &OutputFormat::Pretty)
        }

        Commands::Features {
            input,
            user,
            start,
            end,
            timezone,
            format,
        } => {
            let ledger = load_ledger(&input.ledger)?;
            let rows = engine.build_features(&ledger, user, start, end, timezone.as_deref())?;
            print_list(&rows, &format)
        }

        Commands::Due {
            input,
            user,
            as_of,
            format,
        } => {
            let ledger = load_ledger(&input.ledger)?;
            let due = engine.compute_due_habits(&ledger, user, as_of.unwrap_or_else(Utc::now))?;
            print_list(&due, &format)
        }

        Commands::Remind {
            input,
            as_of,
            force,
        } => {
            if !engine.reminders_enabled() && !force {
                tracing::info!("reminder scheduler disabled; skipping sweep");
                return Ok(());
            }
            let ledger = load_ledger(&input.ledger)?;
            let report = engine.run_reminder_sweep(&ledger, as_of.unwrap_or_else(Utc::now));
            print_value(&report, &OutputFormat::Json)
        }

        Commands::Weekly {
            input,
            user,
            start,
            end,
            as_of,
            format,
        } => {
            let ledger = load_ledger(&input.ledger)?;
            let weeks = engine.weekly_completion(
                &ledger,
                user,
                start,
                end,
                as_of.unwrap_or_else(Utc::now),
            )?;
            print_list(&weeks, &format)
        }

        Commands::Heatmap {
            input,
            user,
            start,
            end,
            as_of,
        } => {
            let ledger = load_ledger(&input.ledger)?;
            let heatmap =
                engine.habit_heatmap(&ledger, user, start, end, as_of.unwrap_or_else(Utc::now))?;
            print_value(&heatmap, &OutputFormat::Pretty)
        }

        Commands::Slips {
            input,
            user,
            as_of,
            w7,
            w30,
            threshold,
            format,
        } => {
            let ledger = load_ledger(&input.ledger)?;
            let params = SlipParams {
                short_days: w7,
                long_days: w30,
                threshold,
            };
            let slips = engine.slip_report(&ledger, user, as_of.unwrap_or_else(Utc::now), params)?;
            print_list(&slips, &format)
        }

        Commands::Doctor { .. } => Ok(()),
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings, PulseCliError> {
    Ok(match path {
        Some(path) => Settings::from_json(&fs::read_to_string(path)?)?,
        None => Settings::from_env()?,
    })
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, PulseCliError> {
    Ok(EngineConfig::from_settings(load_settings(path)?)?)
}

fn is_stdin(path: &Path) -> bool {
    path.to_string_lossy() == "-"
}

fn load_ledger(path: &Path) -> Result<HabitLedger, PulseCliError> {
    let data = if is_stdin(path) {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(path)?
    };
    Ok(HabitLedger::from_json(&data)?)
}

fn cmd_doctor(
    config: Option<&Path>,
    ledger: Option<&Path>,
    json: bool,
) -> Result<(), PulseCliError> {
    let mut checks: Vec<DoctorCheck> = vec![DoctorCheck::new(
        "pulse_version",
        CheckStatus::Ok,
        format!("Pulse version {}", PULSE_VERSION),
    )];

    let engine = match load_config(config) {
        Ok(engine_config) => {
            let engine = HabitEngine::new(engine_config);
            let engine_config = engine.config();
            let cadence = match &engine_config.reminders.cadence {
                ReminderCadence::Interval { minutes } => format!("every {} minutes", minutes),
                ReminderCadence::Cron { expression } => format!("cron '{}'", expression),
            };
            checks.push(DoctorCheck::new(
                "config",
                CheckStatus::Ok,
                format!(
                    "timezone {}, buckets {}, idempotency {}",
                    engine_config.default_tz,
                    engine_config.time_buckets,
                    engine_config.idempotency.as_str()
                ),
            ));
            checks.push(DoctorCheck::new(
                "scheduler",
                if engine.reminders_enabled() {
                    CheckStatus::Ok
                } else {
                    CheckStatus::Warning
                },
                if engine.reminders_enabled() {
                    format!("Reminders run {}", cadence)
                } else {
                    format!("Reminders disabled (would run {})", cadence)
                },
            ));
            Some(engine)
        }
        Err(e) => {
            checks.push(DoctorCheck::new(
                "config",
                CheckStatus::Error,
                CliError::from(e).message,
            ));
            None
        }
    };

    if let Some(path) = ledger {
        match load_ledger(path) {
            Ok(snapshot) => {
                checks.push(DoctorCheck::new(
                    "ledger",
                    CheckStatus::Ok,
                    format!(
                        "{} users, {} habits, {} events, {} contexts",
                        snapshot.users.len(),
                        snapshot.habits.len(),
                        snapshot.events.len(),
                        snapshot.contexts.len()
                    ),
                ));

                let bad_zones: Vec<String> = snapshot
                    .users
                    .iter()
                    .filter_map(|u| u.timezone.as_deref())
                    .filter(|tz| parse_timezone(tz).is_err())
                    .map(str::to_string)
                    .collect();
                if !bad_zones.is_empty() {
                    let fallback = engine
                        .as_ref()
                        .map_or_else(|| "UTC".to_string(), |e| e.config().default_tz.to_string());
                    checks.push(DoctorCheck::new(
                        "user_timezones",
                        CheckStatus::Warning,
                        format!(
                            "Unknown timezones fall back to {}: {}",
                            fallback,
                            bad_zones.join(", ")
                        ),
                    ));
                }
            }
            Err(e) => {
                checks.push(DoctorCheck::new(
                    "ledger",
                    CheckStatus::Error,
                    CliError::from(e).message,
                ));
            }
        }
    }

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: PULSE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Pulse Doctor Report");
        println!("===================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(PulseCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn print_list<T: Serialize>(items: &[T], format: &OutputFormat) -> Result<(), PulseCliError> {
    match format {
        OutputFormat::Ndjson => {
            for item in items {
                println!("{}", serde_json::to_string(item)?);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string(items)?),
        OutputFormat::Pretty => println!("{}", serde_json::to_string_pretty(items)?),
    }
    Ok(())
}

fn print_value<T: Serialize>(value: &T, format: &OutputFormat) -> Result<(), PulseCliError> {
    match format {
        OutputFormat::Ndjson | OutputFormat::Json => println!("{}", serde_json::to_string(value)?),
        OutputFormat::Pretty => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

// Error types

#[derive(Debug)]
enum PulseCliError {
    Io(io::Error),
    Engine(EngineError),
    Json(serde_json::Error),
    Usage(String),
    DoctorFailed,
}

impl From<io::Error> for PulseCliError {
    fn from(e: io::Error) -> Self {
        PulseCliError::Io(e)
    }
}

impl From<EngineError> for PulseCliError {
    fn from(e: EngineError) -> Self {
        PulseCliError::Engine(e)
    }
}

impl From<serde_json::Error> for PulseCliError {
    fn from(e: serde_json::Error) -> Self {
        PulseCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<PulseCliError> for CliError {
    fn from(e: PulseCliError) -> Self {
        match e {
            PulseCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            PulseCliError::Engine(e) => {
                let hint = match &e {
                    EngineError::NotFound(_) => "Check the user and habit IDs in the ledger",
                    EngineError::Conflict(_) => "Resume the habit or use a different instant",
                    EngineError::InvalidRange(_) => {
                        "Make sure the end is after the start and slip options are in range"
                    }
                    EngineError::ConfigError(_) => "Run 'pulse doctor' to inspect the configuration",
                    EngineError::Json(_) => "Ensure the ledger is a valid snapshot",
                };
                CliError {
                    code: e.code().to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            PulseCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            PulseCliError::Usage(msg) => CliError {
                code: "USAGE_ERROR".to_string(),
                message: msg,
                hint: Some("See 'pulse --help'".to_string()),
            },
            PulseCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

impl DoctorCheck {
    fn new(name: &str, status: CheckStatus, message: String) -> Self {
        Self {
            name: name.to_string(),
            status,
            message,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
