//! Completion idempotency
//!
//! Decides whether a new completion duplicates an existing local-day record
//! for the same habit. Duplicates are reconciled by returning the existing
//! record rather than writing a second one. Exact-instant duplicates are
//! rejected independently of the local-day check.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{EngineError, Result};
use crate::local_day::LocalDayResolver;
use crate::types::{Event, Habit, HabitId, HabitStatus};

/// Which duplicates collapse into an existing record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyPolicy {
    /// At most one completion per habit per local day
    #[default]
    LocalDay,
    /// Only identical UTC instants are duplicates
    ExactInstant,
}

impl IdempotencyPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyPolicy::LocalDay => "local_day",
            IdempotencyPolicy::ExactInstant => "exact_instant",
        }
    }
}

/// Membership answer for a candidate completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub accept: bool,
    pub local_day: NaiveDate,
}

/// Outcome of evaluating a completion against a habit's history
#[derive(Debug, Clone, PartialEq)]
pub enum Decision<'a> {
    /// No record exists yet; the caller should store a new event
    Accept { local_day: NaiveDate },
    /// A record already covers this local day; surface it unchanged
    Existing { event: &'a Event, local_day: NaiveDate },
}

/// Guards event creation against duplicate completions
#[derive(Debug, Clone, Copy)]
pub struct EventIdempotencyGuard {
    resolver: LocalDayResolver,
    policy: IdempotencyPolicy,
}

impl EventIdempotencyGuard {
    pub fn new(resolver: LocalDayResolver, policy: IdempotencyPolicy) -> Self {
        Self { resolver, policy }
    }

    /// Resolve the local day of `instant` and test it against the habit's
    /// existing completion days
    pub fn should_accept(
        &self,
        existing_days: &BTreeSet<NaiveDate>,
        instant: DateTime<Utc>,
        tz: Tz,
    ) -> Admission {
        let local_day = self.resolver.to_local_day(instant, tz);
        Admission {
            accept: !existing_days.contains(&local_day),
            local_day,
        }
    }

    /// Full write-path check for one habit.
    ///
    /// `existing` must hold only this habit's events.
    pub fn evaluate<'a>(
        &self,
        habit_id: HabitId,
        habit: Option<&Habit>,
        existing: &'a [Event],
        instant: DateTime<Utc>,
        tz: Tz,
    ) -> Result<Decision<'a>> {
        ensure_writable(habit_id, habit)?;

        let local_day = self.resolver.to_local_day(instant, tz);

        if self.policy == IdempotencyPolicy::LocalDay {
            let days: BTreeSet<NaiveDate> = existing
                .iter()
                .map(|e| self.resolver.to_local_day(e.occurred_at_utc, tz))
                .collect();

            if !self.should_accept(&days, instant, tz).accept {
                if let Some(event) = existing
                    .iter()
                    .find(|e| self.resolver.to_local_day(e.occurred_at_utc, tz) == local_day)
                {
                    tracing::debug!(
                        habit_id = %habit_id,
                        event_id = %event.id,
                        %local_day,
                        "completion already recorded for local day"
                    );
                    return Ok(Decision::Existing { event, local_day });
                }
            }
        }

        if existing.iter().any(|e| e.occurred_at_utc == instant) {
            return Err(EngineError::Conflict(format!(
                "habit {} already has a completion at {}",
                habit_id,
                instant.to_rfc3339()
            )));
        }

        Ok(Decision::Accept { local_day })
    }
}

/// The habit must exist and must not be paused
pub fn ensure_writable(habit_id: HabitId, habit: Option<&Habit>) -> Result<&Habit> {
    let habit = habit.ok_or_else(|| EngineError::NotFound(format!("habit {}", habit_id)))?;
    if habit.status == HabitStatus::Paused {
        return Err(EngineError::Conflict(format!(
            "habit {} is paused; completions are not allowed",
            habit_id
        )));
    }
    Ok(habit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Difficulty;
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    const TZ: Tz = chrono_tz::America::Phoenix;

    fn guard(policy: IdempotencyPolicy) -> EventIdempotencyGuard {
        EventIdempotencyGuard::new(LocalDayResolver::new(Tz::UTC), policy)
    }

    fn habit(status: HabitStatus) -> Habit {
        Habit::new(
            Uuid::new_v4(),
            "Read",
            Difficulty::Medium,
            status,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn test_should_accept_membership() {
        let g = guard(IdempotencyPolicy::LocalDay);
        let day = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let existing: BTreeSet<NaiveDate> = [day].into_iter().collect();

        // 2024-01-11 05:00 UTC is 22:00 on the 10th in Phoenix
        let late_evening = Utc.with_ymd_and_hms(2024, 1, 11, 5, 0, 0).unwrap();
        let admission = g.should_accept(&existing, late_evening, TZ);
        assert!(!admission.accept);
        assert_eq!(admission.local_day, day);

        let next_morning = Utc.with_ymd_and_hms(2024, 1, 11, 16, 0, 0).unwrap();
        let admission = g.should_accept(&existing, next_morning, TZ);
        assert!(admission.accept);
        assert_eq!(admission.local_day, day.succ_opt().unwrap());
    }

    #[test]
    fn test_same_local_day_returns_existing_event() {
        let g = guard(IdempotencyPolicy::LocalDay);
        let h = habit(HabitStatus::Active);
        let first = Event::new(h.id, Utc.with_ymd_and_hms(2024, 1, 10, 16, 0, 0).unwrap());
        let existing = vec![first.clone()];

        let later_same_day = first.occurred_at_utc + Duration::hours(3);
        let decision = g
            .evaluate(h.id, Some(&h), &existing, later_same_day, TZ)
            .unwrap();

        match decision {
            Decision::Existing { event, .. } => assert_eq!(event.id, first.id),
            other => panic!("expected existing record, got {other:?}"),
        }
    }

    #[test]
    fn test_exact_instant_is_conflict_under_instant_policy() {
        let g = guard(IdempotencyPolicy::ExactInstant);
        let h = habit(HabitStatus::Active);
        let first = Event::new(h.id, Utc.with_ymd_and_hms(2024, 1, 10, 16, 0, 0).unwrap());
        let existing = vec![first.clone()];

        let result = g.evaluate(h.id, Some(&h), &existing, first.occurred_at_utc, TZ);
        assert!(matches!(result, Err(EngineError::Conflict(_))));

        // Same local day, different instant is a new record under this policy
        let decision = g
            .evaluate(
                h.id,
                Some(&h),
                &existing,
                first.occurred_at_utc + Duration::minutes(5),
                TZ,
            )
            .unwrap();
        assert!(matches!(decision, Decision::Accept { .. }));
    }

    #[test]
    fn test_missing_habit_is_not_found() {
        let g = guard(IdempotencyPolicy::LocalDay);
        let result = g.evaluate(Uuid::new_v4(), None, &[], Utc::now(), TZ);
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }

    #[test]
    fn test_paused_habit_is_conflict() {
        let g = guard(IdempotencyPolicy::LocalDay);
        let h = habit(HabitStatus::Paused);
        let result = g.evaluate(h.id, Some(&h), &[], Utc::now(), TZ);
        assert!(matches!(result, Err(EngineError::Conflict(_))));
    }

    #[test]
    fn test_archived_habit_accepts_completion() {
        let g = guard(IdempotencyPolicy::LocalDay);
        let h = habit(HabitStatus::Archived);
        let instant = Utc.with_ymd_and_hms(2024, 2, 1, 12, 0, 0).unwrap();
        let decision = g.evaluate(h.id, Some(&h), &[], instant, TZ).unwrap();
        assert_eq!(
            decision,
            Decision::Accept {
                local_day: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()
            }
        );
    }
}
