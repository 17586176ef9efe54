//! Snapshot ledger
//!
//! The finite, pre-fetched batch of records an engine call operates on.
//! Storage lives outside this crate; the ledger is what a storage layer hands
//! in (or what the CLI loads from JSON). Builders enforce the data-model
//! invariants before anything is mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::types::{
    canonicalize_name, Context, ContextId, Event, Habit, HabitId, User, UserId,
};

/// In-memory snapshot of users, habits, events and contexts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HabitLedger {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub habits: Vec<Habit>,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub contexts: Vec<Context>,
}

impl HabitLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(&self, user_id: UserId) -> Option<&User> {
        self.users.iter().find(|u| u.id == user_id)
    }

    pub fn habit(&self, habit_id: HabitId) -> Option<&Habit> {
        self.habits.iter().find(|h| h.id == habit_id)
    }

    /// Habit lookup scoped to an owner; another user's habit is invisible
    pub fn habit_owned_by(&self, user_id: UserId, habit_id: HabitId) -> Option<&Habit> {
        self.habit(habit_id).filter(|h| h.user_id == user_id)
    }

    pub fn habits_for_user(&self, user_id: UserId) -> Vec<&Habit> {
        self.habits.iter().filter(|h| h.user_id == user_id).collect()
    }

    pub fn events_for_habit(&self, habit_id: HabitId) -> Vec<&Event> {
        self.events.iter().filter(|e| e.habit_id == habit_id).collect()
    }

    /// Events of every habit owned by `user_id`
    pub fn events_for_user(&self, user_id: UserId) -> Vec<&Event> {
        let habit_ids: Vec<HabitId> = self
            .habits
            .iter()
            .filter(|h| h.user_id == user_id)
            .map(|h| h.id)
            .collect();
        self.events
            .iter()
            .filter(|e| habit_ids.contains(&e.habit_id))
            .collect()
    }

    pub fn contexts_for_user(&self, user_id: UserId) -> Vec<&Context> {
        self.contexts
            .iter()
            .filter(|c| c.user_id == user_id)
            .collect()
    }

    pub fn insert_user(&mut self, user: User) -> Result<&User> {
        if self.user(user.id).is_some() {
            return Err(EngineError::Conflict(format!("user {} already exists", user.id)));
        }
        let index = self.users.len();
        self.users.push(user);
        Ok(&self.users[index])
    }

    /// Add a habit; canonical names are unique per user
    pub fn insert_habit(&mut self, habit: Habit) -> Result<&Habit> {
        if self.user(habit.user_id).is_none() {
            return Err(EngineError::NotFound(format!("user {}", habit.user_id)));
        }
        let canonical = habit.canonical_name();
        let clash = self
            .habits
            .iter()
            .any(|h| h.user_id == habit.user_id && canonicalize_name(&h.name) == canonical);
        if clash {
            return Err(EngineError::Conflict(format!(
                "a habit named '{}' already exists for this user",
                habit.name.trim()
            )));
        }
        let index = self.habits.len();
        self.habits.push(habit);
        Ok(&self.habits[index])
    }

    /// Add a context after validating its range.
    ///
    /// With `block_overlaps_per_kind`, a context overlapping an existing one
    /// of the same kind for the same user is rejected.
    pub fn insert_context(
        &mut self,
        context: Context,
        block_overlaps_per_kind: bool,
    ) -> Result<&Context> {
        context.validate()?;
        if self.user(context.user_id).is_none() {
            return Err(EngineError::NotFound(format!("user {}", context.user_id)));
        }

        if block_overlaps_per_kind {
            let clash = self.contexts.iter().any(|existing| {
                existing.user_id == context.user_id
                    && existing.kind == context.kind
                    && instants_overlap(existing, &context)
            });
            if clash {
                return Err(EngineError::Conflict(format!(
                    "an overlapping '{}' context already exists",
                    context.kind.as_str()
                )));
            }
        }

        let index = self.contexts.len();
        self.contexts.push(context);
        Ok(&self.contexts[index])
    }

    /// Close an open (or move a closed) context's end
    pub fn end_context(
        &mut self,
        user_id: UserId,
        context_id: ContextId,
        end_utc: DateTime<Utc>,
    ) -> Result<&Context> {
        let context = self
            .contexts
            .iter_mut()
            .find(|c| c.id == context_id && c.user_id == user_id)
            .ok_or_else(|| EngineError::NotFound(format!("context {}", context_id)))?;

        if end_utc <= context.start_utc {
            return Err(EngineError::InvalidRange(format!(
                "end {} must be after start {}",
                end_utc, context.start_utc
            )));
        }
        context.end_utc = Some(end_utc);
        Ok(&*context)
    }

    /// Append an event accepted by the idempotency guard
    pub(crate) fn push_event(&mut self, event: Event) -> &Event {
        let index = self.events.len();
        self.events.push(event);
        &self.events[index]
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// `[start, end)` instant overlap; open ends extend forever
fn instants_overlap(a: &Context, b: &Context) -> bool {
    let a_before_b_ends = b.end_utc.map_or(true, |end| a.start_utc < end);
    let b_before_a_ends = a.end_utc.map_or(true, |end| b.start_utc < end);
    a_before_b_ends && b_before_a_ends
}
