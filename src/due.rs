//! Due-habit detection
//!
//! A habit is due on a local day when it is active, has no completion on
//! that day, and the user is not under any suppression context.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::local_day::{LocalDayResolver, LocalDayWindow};
use crate::suppression::ContextSuppressionEngine;
use crate::types::{Context, ContextId, Event, Habit, ReminderDue};

/// Result of evaluating one user's local day
#[derive(Debug, Clone)]
pub struct DueEvaluation {
    pub window: LocalDayWindow,
    /// Contexts muting reminders for the day; empty when none apply
    pub suppressed_by: Vec<ContextId>,
    pub due: Vec<ReminderDue>,
}

impl DueEvaluation {
    pub fn is_suppressed(&self) -> bool {
        !self.suppressed_by.is_empty()
    }
}

/// Summary of one reminder sweep across users
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub users_checked: usize,
    pub users_suppressed: usize,
    pub total_due: usize,
}

/// Computes reminder-worthy habits for a local day
#[derive(Debug, Clone, Copy)]
pub struct DueHabitsEngine {
    resolver: LocalDayResolver,
    suppression: ContextSuppressionEngine,
}

impl DueHabitsEngine {
    pub fn new(resolver: LocalDayResolver) -> Self {
        Self {
            resolver,
            suppression: ContextSuppressionEngine::new(resolver),
        }
    }

    /// Evaluate the local day containing `as_of`.
    ///
    /// `habits`, `events` and `contexts` must all belong to the same user.
    pub fn evaluate(
        &self,
        habits: &[&Habit],
        events: &[&Event],
        contexts: &[&Context],
        as_of: DateTime<Utc>,
        tz: Tz,
    ) -> DueEvaluation {
        let window = self.resolver.window_for(as_of, tz);

        let suppressed_by: Vec<ContextId> = self
            .suppression
            .active_on(contexts, window.day, tz)
            .into_iter()
            .map(|c| c.id)
            .collect();

        if !suppressed_by.is_empty() {
            return DueEvaluation {
                window,
                suppressed_by,
                due: Vec::new(),
            };
        }

        let due = habits
            .iter()
            .filter(|h| h.is_active())
            .filter(|h| {
                !events.iter().any(|e| {
                    e.habit_id == h.id
                        && self.resolver.to_local_day(e.occurred_at_utc, tz) == window.day
                })
            })
            .map(|h| ReminderDue {
                habit_id: h.id,
                habit_name: h.name.clone(),
            })
            .collect();

        DueEvaluation {
            window,
            suppressed_by,
            due,
        }
    }

    /// Due habits only
    pub fn due_habits(
        &self,
        habits: &[&Habit],
        events: &[&Event],
        contexts: &[&Context],
        as_of: DateTime<Utc>,
        tz: Tz,
    ) -> Vec<ReminderDue> {
        self.evaluate(habits, events, contexts, as_of, tz).due
    }
}
