//! Core record types for Habit Pulse
//!
//! Plain records consumed by the engine (users, habits, events, contexts) and
//! the projections it emits (streaks, feature rows, due reminders). Enumerated
//! fields are closed types validated once by serde at the boundary.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};

pub type UserId = Uuid;
pub type HabitId = Uuid;
pub type EventId = Uuid;
pub type ContextId = Uuid;

/// Habit difficulty
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }
}

/// Habit lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HabitStatus {
    #[default]
    Active,
    Paused,
    Archived,
}

impl HabitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HabitStatus::Active => "active",
            HabitStatus::Paused => "paused",
            HabitStatus::Archived => "archived",
        }
    }
}

/// Kind of suppression context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextKind {
    Travel,
    Exam,
    Illness,
    Custom,
}

impl ContextKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKind::Travel => "travel",
            ContextKind::Exam => "exam",
            ContextKind::Illness => "illness",
            ContextKind::Custom => "custom",
        }
    }
}

/// A user and their IANA timezone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    /// IANA zone name; absent or invalid falls back to the configured default
    #[serde(default)]
    pub timezone: Option<String>,
}

impl User {
    pub fn new(name: impl Into<String>, timezone: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            timezone: timezone.map(str::to_string),
        }
    }
}

/// A tracked habit owned by a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Habit {
    pub id: HabitId,
    pub user_id: UserId,
    pub name: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub status: HabitStatus,
    pub created_at: DateTime<Utc>,
}

impl Habit {
    pub fn new(
        user_id: UserId,
        name: impl Into<String>,
        difficulty: Difficulty,
        status: HabitStatus,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            name: name.into(),
            difficulty,
            status,
            created_at,
        }
    }

    /// Case-insensitive uniqueness key within a user
    pub fn canonical_name(&self) -> String {
        canonicalize_name(&self.name)
    }

    pub fn is_active(&self) -> bool {
        self.status == HabitStatus::Active
    }
}

pub fn canonicalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// A single completion of a habit at a UTC instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub habit_id: HabitId,
    pub occurred_at_utc: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Event {
    pub fn new(habit_id: HabitId, occurred_at_utc: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            habit_id,
            occurred_at_utc,
            note: None,
        }
    }
}

/// A suppression window (travel, exam, illness, ...) owned by a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub id: ContextId,
    pub user_id: UserId,
    pub kind: ContextKind,
    pub start_utc: DateTime<Utc>,
    /// Open-ended when absent
    #[serde(default)]
    pub end_utc: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl Context {
    pub fn new(
        user_id: UserId,
        kind: ContextKind,
        start_utc: DateTime<Utc>,
        end_utc: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            kind,
            start_utc,
            end_utc,
            data: serde_json::Map::new(),
        }
    }

    /// End, if present, must be strictly after start
    pub fn validate(&self) -> Result<()> {
        match self.end_utc {
            Some(end) if end <= self.start_utc => Err(EngineError::InvalidRange(format!(
                "context {} ends at {} which is not after its start {}",
                self.id, end, self.start_utc
            ))),
            _ => Ok(()),
        }
    }
}

/// Current and longest consecutive local-day runs for a habit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Streak {
    pub current: u32,
    pub max: u32,
    pub last_completed: Option<NaiveDate>,
}

/// One (habit, local day) analytics row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub user_id: UserId,
    pub habit_id: HabitId,
    pub day: NaiveDate,
    pub last_7d_rate: f64,
    pub last_30d_rate: f64,
    pub current_streak: u32,
    /// 0 = Monday .. 6 = Sunday
    pub dow: u32,
    /// Bucket of the habit's median completion hour
    pub hour_bucket: Option<String>,
    pub difficulty: Difficulty,
    pub active: bool,
    pub is_travel: bool,
    pub is_exam: bool,
    pub is_illness: bool,
    /// Three or more consecutive misses up to and including `day`
    pub slip_7d_flag: bool,
}

/// Result of recording a completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordOutcome {
    pub event: Event,
    /// True when an existing record for the same local day was returned
    pub idempotent_hit: bool,
}

/// A habit that still needs a reminder today
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderDue {
    pub habit_id: HabitId,
    pub habit_name: String,
}
