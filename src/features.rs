//! Rolling feature derivation
//!
//! Builds one [`FeatureRow`] per (habit, local day) over an inclusive date
//! range. Two fixed-size sliding windows (7 and 30 days) are seeded from a
//! 30-day backfill before any row is emitted, so the first rows of a range
//! carry correct rolling context.

use chrono::{Datelike, Duration, NaiveDate};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

use crate::buckets::TimeBucketSpec;
use crate::local_day::{days_inclusive, DateWindow, LocalDayResolver};
use crate::suppression::{ContextFlags, ContextSuppressionEngine};
use crate::types::{Context, Event, FeatureRow, Habit, UserId};

/// Short rolling window in days
pub const SHORT_WINDOW_DAYS: usize = 7;

/// Long rolling window in days
pub const LONG_WINDOW_DAYS: usize = 30;

/// Days of history loaded ahead of the requested range
pub const BACKFILL_DAYS: i64 = 30;

/// Consecutive misses that raise the slip flag
pub const SLIP_MISS_THRESHOLD: u32 = 3;

/// Sliding window of daily completion flags
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingWindow {
    flags: VecDeque<bool>,
    window_size: usize,
}

impl RollingWindow {
    pub fn new(window_size: usize) -> Self {
        Self {
            flags: VecDeque::with_capacity(window_size),
            window_size,
        }
    }

    /// Push one day's flag, evicting the oldest once full
    pub fn push(&mut self, completed: bool) {
        self.flags.push_back(completed);
        while self.flags.len() > self.window_size {
            self.flags.pop_front();
        }
    }

    /// Completed days divided by the days actually collected
    pub fn rate(&self) -> f64 {
        if self.flags.is_empty() {
            return 0.0;
        }
        let completed = self.flags.iter().filter(|f| **f).count();
        completed as f64 / self.flags.len() as f64
    }

    pub fn len(&self) -> usize {
        self.flags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

/// Running counters carried from one day to the next
#[derive(Debug, Clone)]
struct HabitState {
    short: RollingWindow,
    long: RollingWindow,
    streak: u32,
    misses: u32,
}

impl HabitState {
    fn new() -> Self {
        Self {
            short: RollingWindow::new(SHORT_WINDOW_DAYS),
            long: RollingWindow::new(LONG_WINDOW_DAYS),
            streak: 0,
            misses: 0,
        }
    }

    fn advance(&mut self, completed: bool) {
        self.short.push(completed);
        self.long.push(completed);
        if completed {
            self.streak += 1;
            self.misses = 0;
        } else {
            self.streak = 0;
            self.misses += 1;
        }
    }
}

/// Builds per-day feature rows for a user's habits
#[derive(Debug, Clone)]
pub struct RollingFeatureBuilder {
    resolver: LocalDayResolver,
    suppression: ContextSuppressionEngine,
    buckets: TimeBucketSpec,
}

impl RollingFeatureBuilder {
    pub fn new(resolver: LocalDayResolver, buckets: TimeBucketSpec) -> Self {
        Self {
            resolver,
            suppression: ContextSuppressionEngine::new(resolver),
            buckets,
        }
    }

    /// Build rows for every habit over `window`.
    ///
    /// `events` may contain events of any habit; each habit only sees its own.
    pub fn build(
        &self,
        user_id: UserId,
        habits: &[&Habit],
        events: &[&Event],
        contexts: &[&Context],
        window: DateWindow,
        tz: Tz,
    ) -> Vec<FeatureRow> {
        let flags: Vec<ContextFlags> = window
            .days()
            .map(|day| self.suppression.flags_for_day(contexts, day, tz))
            .collect();

        let mut rows = Vec::with_capacity(habits.len() * flags.len());
        for habit in habits {
            let habit_events: Vec<&Event> = events
                .iter()
                .copied()
                .filter(|e| e.habit_id == habit.id)
                .collect();
            rows.extend(self.build_for_habit(user_id, habit, &habit_events, &flags, window, tz));
        }

        tracing::debug!(
            user_id = %user_id,
            habits = habits.len(),
            rows = rows.len(),
            start = %window.start,
            end = %window.end,
            timezone = %tz,
            "built feature rows"
        );

        rows
    }

    fn build_for_habit(
        &self,
        user_id: UserId,
        habit: &Habit,
        events: &[&Event],
        flags: &[ContextFlags],
        window: DateWindow,
        tz: Tz,
    ) -> Vec<FeatureRow> {
        let backfill_start = window.start - Duration::days(BACKFILL_DAYS);

        let mut completed_days = BTreeSet::new();
        let mut hours = Vec::new();
        for event in events {
            let local_day = self.resolver.to_local_day(event.occurred_at_utc, tz);
            if local_day < backfill_start || local_day > window.end {
                continue;
            }
            completed_days.insert(local_day);
            hours.push(self.resolver.local_hour(event.occurred_at_utc, tz));
        }

        let hour_bucket = median_hour(hours)
            .and_then(|hour| self.buckets.lookup(hour))
            .map(str::to_string);

        let mut state = HabitState::new();

        // Warm-up: seed windows and streak without emitting rows
        if let Some(last_warmup) = window.start.pred_opt() {
            for day in days_inclusive(backfill_start, last_warmup) {
                state.advance(completed_days.contains(&day));
            }
        }

        // Misses only count inside the requested range
        state.misses = 0;

        window
            .days()
            .zip(flags.iter())
            .map(|(day, day_flags)| {
                state.advance(completed_days.contains(&day));
                FeatureRow {
                    user_id,
                    habit_id: habit.id,
                    day,
                    last_7d_rate: round4(state.short.rate()),
                    last_30d_rate: round4(state.long.rate()),
                    current_streak: state.streak,
                    dow: day.weekday().num_days_from_monday(),
                    hour_bucket: hour_bucket.clone(),
                    difficulty: habit.difficulty,
                    active: habit.is_active(),
                    is_travel: day_flags.travel,
                    is_exam: day_flags.exam,
                    is_illness: day_flags.illness,
                    slip_7d_flag: state.misses >= SLIP_MISS_THRESHOLD,
                }
            })
            .collect()
    }
}

/// Median local hour, truncated toward zero for even counts
fn median_hour(mut hours: Vec<u32>) -> Option<u32> {
    if hours.is_empty() {
        return None;
    }
    hours.sort_unstable();
    let mid = hours.len() / 2;
    if hours.len() % 2 == 1 {
        Some(hours[mid])
    } else {
        Some((hours[mid - 1] + hours[mid]) / 2)
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
