//! Engine facade
//!
//! [`HabitEngine`] wires the local-day resolver, idempotency guard, streak
//! calculator, feature builder, due-habit detection and analytics behind one
//! configured entry point. Every operation works on a [`HabitLedger`]
//! snapshot; only [`HabitEngine::record_completion`] mutates it.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::analytics::{CompletionAnalytics, Heatmap, SlipEntry, SlipParams, WeeklyCompletion};
use crate::config::EngineConfig;
use crate::due::{DueHabitsEngine, SweepReport};
use crate::error::{EngineError, Result};
use crate::features::RollingFeatureBuilder;
use crate::idempotency::{Decision, EventIdempotencyGuard};
use crate::ledger::HabitLedger;
use crate::local_day::{DateWindow, LocalDayResolver};
use crate::streaks::StreakCalculator;
use crate::types::{
    Event, FeatureRow, HabitId, RecordOutcome, ReminderDue, Streak, User, UserId,
};

/// Configured analytics engine
#[derive(Debug, Clone)]
pub struct HabitEngine {
    config: EngineConfig,
    resolver: LocalDayResolver,
    guard: EventIdempotencyGuard,
    streaks: StreakCalculator,
    features: RollingFeatureBuilder,
    due: DueHabitsEngine,
    analytics: CompletionAnalytics,
}

impl HabitEngine {
    pub fn new(config: EngineConfig) -> Self {
        let resolver = LocalDayResolver::new(config.default_tz);
        Self {
            guard: EventIdempotencyGuard::new(resolver, config.idempotency),
            streaks: StreakCalculator::new(resolver),
            features: RollingFeatureBuilder::new(resolver, config.time_buckets.clone()),
            due: DueHabitsEngine::new(resolver),
            analytics: CompletionAnalytics::new(resolver, config.time_buckets.clone()),
            resolver,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Whether the external trigger should run reminder sweeps at all
    pub fn reminders_enabled(&self) -> bool {
        self.config.reminders.enabled
    }

    /// Effective zone of a user: their stored zone, else the default
    pub fn user_tz(&self, user: &User) -> Tz {
        self.resolver.resolve_tz(user.timezone.as_deref())
    }

    fn require_user<'a>(&self, ledger: &'a HabitLedger, user_id: UserId) -> Result<&'a User> {
        ledger
            .user(user_id)
            .ok_or_else(|| EngineError::NotFound(format!("user {}", user_id)))
    }

    fn tz_for_owner(&self, ledger: &HabitLedger, user_id: UserId) -> Tz {
        ledger
            .user(user_id)
            .map_or(self.resolver.default_tz(), |user| self.user_tz(user))
    }

    /// Record a completion, or return the record that already covers the
    /// habit's local day.
    ///
    /// Fails with `NotFound` for an unknown habit and `Conflict` for a paused
    /// habit or an exact-instant duplicate.
    pub fn record_completion(
        &self,
        ledger: &mut HabitLedger,
        habit_id: HabitId,
        occurred_at_utc: DateTime<Utc>,
    ) -> Result<RecordOutcome> {
        let habit = ledger.habit(habit_id);
        let tz = habit.map_or(self.resolver.default_tz(), |h| {
            self.tz_for_owner(ledger, h.user_id)
        });
        let existing: Vec<Event> = ledger
            .events
            .iter()
            .filter(|e| e.habit_id == habit_id)
            .cloned()
            .collect();

        match self
            .guard
            .evaluate(habit_id, habit, &existing, occurred_at_utc, tz)?
        {
            Decision::Existing { event, .. } => Ok(RecordOutcome {
                event: event.clone(),
                idempotent_hit: true,
            }),
            Decision::Accept { local_day } => {
                let event = ledger
                    .push_event(Event::new(habit_id, occurred_at_utc))
                    .clone();
                tracing::debug!(
                    habit_id = %habit_id,
                    event_id = %event.id,
                    %local_day,
                    "recorded completion"
                );
                Ok(RecordOutcome {
                    event,
                    idempotent_hit: false,
                })
            }
        }
    }

    /// Current and longest streak of a habit as of `as_of` (default: now).
    ///
    /// With `owner`, a habit owned by someone else is reported as `NotFound`.
    pub fn compute_streak(
        &self,
        ledger: &HabitLedger,
        owner: Option<UserId>,
        habit_id: HabitId,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<Streak> {
        let habit = match owner {
            Some(user_id) => ledger.habit_owned_by(user_id, habit_id),
            None => ledger.habit(habit_id),
        }
        .ok_or_else(|| EngineError::NotFound(format!("habit {}", habit_id)))?;

        let tz = self.tz_for_owner(ledger, habit.user_id);
        let days = self.streaks.local_days(
            ledger
                .events_for_habit(habit_id)
                .into_iter()
                .map(|e| e.occurred_at_utc),
            tz,
        );

        Ok(self
            .streaks
            .compute(&days, as_of.unwrap_or_else(Utc::now), tz))
    }

    /// Per-(habit, day) feature rows for all of a user's habits.
    ///
    /// Zone precedence: a valid `tz_override`, then the user's zone, then
    /// the configured default.
    pub fn build_features(
        &self,
        ledger: &HabitLedger,
        user_id: UserId,
        start: NaiveDate,
        end: NaiveDate,
        tz_override: Option<&str>,
    ) -> Result<Vec<FeatureRow>> {
        let user = self.require_user(ledger, user_id)?;
        let window = DateWindow::new(start, end)?;
        let tz = self
            .resolver
            .resolve_first(&[tz_override, user.timezone.as_deref()]);

        Ok(self.features.build(
            user_id,
            &ledger.habits_for_user(user_id),
            &ledger.events_for_user(user_id),
            &ledger.contexts_for_user(user_id),
            window,
            tz,
        ))
    }

    /// Active habits with no completion on the user's local day of `as_of`
    pub fn compute_due_habits(
        &self,
        ledger: &HabitLedger,
        user_id: UserId,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<ReminderDue>> {
        let user = self.require_user(ledger, user_id)?;
        Ok(self.due.due_habits(
            &ledger.habits_for_user(user_id),
            &ledger.events_for_user(user_id),
            &ledger.contexts_for_user(user_id),
            as_of,
            self.user_tz(user),
        ))
    }

    /// One sequential reminder pass over every user in the ledger
    pub fn run_reminder_sweep(&self, ledger: &HabitLedger, as_of: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for user in &ledger.users {
            report.users_checked += 1;
            let evaluation = self.due.evaluate(
                &ledger.habits_for_user(user.id),
                &ledger.events_for_user(user.id),
                &ledger.contexts_for_user(user.id),
                as_of,
                self.user_tz(user),
            );

            if evaluation.is_suppressed() {
                report.users_suppressed += 1;
                tracing::debug!(
                    user_id = %user.id,
                    contexts = evaluation.suppressed_by.len(),
                    "reminders suppressed"
                );
                continue;
            }

            for item in &evaluation.due {
                tracing::info!(
                    user_id = %user.id,
                    habit_id = %item.habit_id,
                    habit = %item.habit_name,
                    day = %evaluation.window.day,
                    "reminder due"
                );
            }
            report.total_due += evaluation.due.len();
        }

        tracing::info!(
            users = report.users_checked,
            suppressed = report.users_suppressed,
            due = report.total_due,
            "reminder sweep finished"
        );
        report
    }

    /// Weekly completion over `[start, end]` in the user's zone.
    ///
    /// A missing endpoint comes from the default window: the previous and
    /// current local week of `as_of`.
    pub fn weekly_completion(
        &self,
        ledger: &HabitLedger,
        user_id: UserId,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<WeeklyCompletion>> {
        let user = self.require_user(ledger, user_id)?;
        let tz = self.user_tz(user);
        let window = fill_window(start, end, self.analytics.default_weekly_window(as_of, tz))?;

        Ok(self.analytics.weekly_completion(
            &ledger.habits_for_user(user_id),
            &ledger.events_for_user(user_id),
            window,
            tz,
        ))
    }

    /// Heatmap over `[start, end]`; missing endpoints default to the last
    /// 30 local days up to and including the day of `as_of`
    pub fn habit_heatmap(
        &self,
        ledger: &HabitLedger,
        user_id: UserId,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        as_of: DateTime<Utc>,
    ) -> Result<Heatmap> {
        let user = self.require_user(ledger, user_id)?;
        let tz = self.user_tz(user);
        let window = fill_window(start, end, self.analytics.default_heatmap_window(as_of, tz))?;

        Ok(self
            .analytics
            .heatmap(user_id, &ledger.events_for_user(user_id), window, tz))
    }

    pub fn slip_report(
        &self,
        ledger: &HabitLedger,
        user_id: UserId,
        as_of: DateTime<Utc>,
        params: SlipParams,
    ) -> Result<Vec<SlipEntry>> {
        let user = self.require_user(ledger, user_id)?;
        self.analytics.slip_report(
            &ledger.habits_for_user(user_id),
            &ledger.events_for_user(user_id),
            as_of,
            self.user_tz(user),
            params,
        )
    }
}

fn fill_window(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    default: DateWindow,
) -> Result<DateWindow> {
    DateWindow::new(start.unwrap_or(default.start), end.unwrap_or(default.end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IdempotencyPolicy, Settings};
    use crate::types::{Context, ContextKind, Difficulty, Habit, HabitStatus};
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn engine_with(policy: IdempotencyPolicy) -> HabitEngine {
        let settings = Settings {
            idempotency: policy,
            ..Settings::default()
        };
        HabitEngine::new(EngineConfig::from_settings(settings).unwrap())
    }

    fn engine() -> HabitEngine {
        engine_with(IdempotencyPolicy::LocalDay)
    }

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    /// Ledger with one Phoenix user owning one active habit
    fn phoenix_ledger() -> (HabitLedger, UserId, HabitId) {
        let mut ledger = HabitLedger::new();
        let user = User::new("Ada", Some("America/Phoenix"));
        let user_id = user.id;
        ledger.insert_user(user).unwrap();
        let habit_id = ledger
            .insert_habit(Habit::new(
                user_id,
                "Read",
                Difficulty::Medium,
                HabitStatus::Active,
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            ))
            .unwrap()
            .id;
        (ledger, user_id, habit_id)
    }

    #[test]
    fn test_phoenix_streak_end_to_end() {
        let e = engine();
        let (mut ledger, user_id, habit_id) = phoenix_ledger();

        // 09:00 local on the 10th, 10:00 local on the 11th (UTC-7)
        e.record_completion(&mut ledger, habit_id, Utc.with_ymd_and_hms(2024, 1, 10, 16, 0, 0).unwrap())
            .unwrap();
        e.record_completion(&mut ledger, habit_id, Utc.with_ymd_and_hms(2024, 1, 11, 17, 0, 0).unwrap())
            .unwrap();

        let as_of = Utc.with_ymd_and_hms(2024, 1, 11, 20, 0, 0).unwrap();
        let streak = e
            .compute_streak(&ledger, Some(user_id), habit_id, Some(as_of))
            .unwrap();
        assert_eq!(
            streak,
            Streak {
                current: 2,
                max: 2,
                last_completed: Some(date(1, 11)),
            }
        );
    }

    #[test]
    fn test_same_local_day_is_idempotent() {
        let e = engine();
        let (mut ledger, _, habit_id) = phoenix_ledger();
        let morning = Utc.with_ymd_and_hms(2024, 1, 10, 16, 0, 0).unwrap();

        let first = e.record_completion(&mut ledger, habit_id, morning).unwrap();
        assert!(!first.idempotent_hit);

        // 23:00 local the same day is 06:00 UTC the next calendar day
        let late = Utc.with_ymd_and_hms(2024, 1, 11, 6, 0, 0).unwrap();
        let second = e.record_completion(&mut ledger, habit_id, late).unwrap();
        assert!(second.idempotent_hit);
        assert_eq!(second.event.id, first.event.id);
        assert_eq!(ledger.events.len(), 1);
    }

    #[test]
    fn test_exact_instant_policy() {
        let e = engine_with(IdempotencyPolicy::ExactInstant);
        let (mut ledger, _, habit_id) = phoenix_ledger();
        let morning = Utc.with_ymd_and_hms(2024, 1, 10, 16, 0, 0).unwrap();

        e.record_completion(&mut ledger, habit_id, morning).unwrap();
        let again = e.record_completion(&mut ledger, habit_id, morning);
        assert!(matches!(again, Err(EngineError::Conflict(_))));

        let later = e
            .record_completion(&mut ledger, habit_id, morning + Duration::hours(1))
            .unwrap();
        assert!(!later.idempotent_hit);
        assert_eq!(ledger.events.len(), 2);
    }

    #[test]
    fn test_paused_habit_rejects_completion() {
        let e = engine();
        let (mut ledger, _, habit_id) = phoenix_ledger();
        ledger.habits[0].status = HabitStatus::Paused;

        let result = e.record_completion(&mut ledger, habit_id, Utc::now());
        assert!(matches!(result, Err(EngineError::Conflict(_))));
        assert!(ledger.events.is_empty());
    }

    #[test]
    fn test_unknown_or_foreign_habit_is_not_found() {
        let e = engine();
        let (mut ledger, _, habit_id) = phoenix_ledger();

        let missing = e.record_completion(&mut ledger, uuid::Uuid::new_v4(), Utc::now());
        assert!(matches!(missing, Err(EngineError::NotFound(_))));

        let stranger = uuid::Uuid::new_v4();
        let foreign = e.compute_streak(&ledger, Some(stranger), habit_id, None);
        assert!(matches!(foreign, Err(EngineError::NotFound(_))));

        assert!(e.compute_streak(&ledger, None, habit_id, None).is_ok());
    }

    #[test]
    fn test_build_features_zone_precedence() {
        let e = engine();
        let (mut ledger, user_id, habit_id) = phoenix_ledger();
        // 05:30 UTC on the 11th: the 10th in Phoenix, the 11th in UTC
        e.record_completion(&mut ledger, habit_id, Utc.with_ymd_and_hms(2024, 1, 11, 5, 30, 0).unwrap())
            .unwrap();

        let stored = e
            .build_features(&ledger, user_id, date(1, 10), date(1, 11), None)
            .unwrap();
        assert_eq!(stored[0].current_streak, 1);
        assert_eq!(stored[1].current_streak, 0);

        let overridden = e
            .build_features(&ledger, user_id, date(1, 10), date(1, 11), Some("UTC"))
            .unwrap();
        assert_eq!(overridden[0].current_streak, 0);
        assert_eq!(overridden[1].current_streak, 1);

        // Invalid override falls through to the stored zone
        let bogus = e
            .build_features(&ledger, user_id, date(1, 10), date(1, 11), Some("Nowhere/Land"))
            .unwrap();
        assert_eq!(bogus, stored);
    }

    #[test]
    fn test_build_features_unknown_user() {
        let e = engine();
        let (ledger, _, _) = phoenix_ledger();
        let result = e.build_features(&ledger, uuid::Uuid::new_v4(), date(1, 1), date(1, 2), None);
        assert!(matches!(result, Err(EngineError::NotFound(_))));
    }

    #[test]
    fn test_reminder_sweep() {
        let e = engine();
        let (mut ledger, user_id, habit_id) = phoenix_ledger();
        ledger
            .insert_habit(Habit::new(
                user_id,
                "Walk",
                Difficulty::Easy,
                HabitStatus::Active,
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            ))
            .unwrap();

        let sick = User::new("Grace", Some("Europe/Berlin"));
        let sick_id = sick.id;
        ledger.insert_user(sick).unwrap();
        ledger
            .insert_habit(Habit::new(
                sick_id,
                "Run",
                Difficulty::Hard,
                HabitStatus::Active,
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            ))
            .unwrap();

        let as_of = Utc.with_ymd_and_hms(2024, 1, 10, 20, 0, 0).unwrap();
        ledger
            .insert_context(
                Context::new(sick_id, ContextKind::Illness, as_of - Duration::days(1), None),
                false,
            )
            .unwrap();
        e.record_completion(&mut ledger, habit_id, as_of - Duration::hours(2))
            .unwrap();

        let due = e.compute_due_habits(&ledger, user_id, as_of).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].habit_name, "Walk");
        assert!(e.compute_due_habits(&ledger, sick_id, as_of).unwrap().is_empty());

        let report = e.run_reminder_sweep(&ledger, as_of);
        assert_eq!(
            report,
            SweepReport {
                users_checked: 2,
                users_suppressed: 1,
                total_due: 1,
            }
        );
    }

    #[test]
    fn test_analytics_require_known_user() {
        let e = engine();
        let (ledger, _, _) = phoenix_ledger();
        let stranger = uuid::Uuid::new_v4();
        assert!(matches!(
            e.weekly_completion(&ledger, stranger, None, None, Utc::now()),
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            e.habit_heatmap(&ledger, stranger, None, None, Utc::now()),
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            e.slip_report(&ledger, stranger, Utc::now(), SlipParams::default()),
            Err(EngineError::NotFound(_))
        ));
    }

    #[test]
    fn test_weekly_completion_uses_user_zone() {
        let e = engine();
        let (mut ledger, user_id, habit_id) = phoenix_ledger();
        // Late Sunday evening in Phoenix is Monday in UTC
        e.record_completion(&mut ledger, habit_id, Utc.with_ymd_and_hms(2024, 1, 8, 5, 0, 0).unwrap())
            .unwrap();

        let weeks = e
            .weekly_completion(&ledger, user_id, Some(date(1, 1)), Some(date(1, 14)), Utc::now())
            .unwrap();
        assert_eq!(weeks.len(), 2);
        assert_eq!(weeks[0].completions, 1);
        assert_eq!(weeks[1].completions, 0);
    }

    #[test]
    fn test_analytics_default_windows_follow_user_zone() {
        let e = engine();
        let (mut ledger, user_id, habit_id) = phoenix_ledger();
        // 03:00 UTC Monday 2024-01-15 is still Sunday the 14th in Phoenix
        let as_of = Utc.with_ymd_and_hms(2024, 1, 15, 3, 0, 0).unwrap();
        e.record_completion(&mut ledger, habit_id, as_of - Duration::hours(1))
            .unwrap();

        let weeks = e
            .weekly_completion(&ledger, user_id, None, None, as_of)
            .unwrap();
        let starts: Vec<NaiveDate> = weeks.iter().map(|w| w.week_start).collect();
        assert_eq!(starts, vec![date(1, 1), date(1, 8)]);
        assert_eq!(weeks[1].completions, 1);

        let heatmap = e.habit_heatmap(&ledger, user_id, None, None, as_of).unwrap();
        assert_eq!(
            heatmap.window,
            DateWindow {
                start: NaiveDate::from_ymd_opt(2023, 12, 15).unwrap(),
                end: date(1, 14),
            }
        );
        assert_eq!(heatmap.total_events, 1);

        // An explicit endpoint replaces only its side of the default
        let heatmap = e
            .habit_heatmap(&ledger, user_id, Some(date(1, 10)), None, as_of)
            .unwrap();
        assert_eq!(heatmap.window.start, date(1, 10));
        assert_eq!(heatmap.window.end, date(1, 14));

        let reversed = e.habit_heatmap(&ledger, user_id, Some(date(2, 1)), None, as_of);
        assert!(matches!(reversed, Err(EngineError::InvalidRange(_))));
    }

    #[test]
    fn test_slip_report_rejects_out_of_range_params() {
        let e = engine();
        let (ledger, user_id, _) = phoenix_ledger();
        let params = SlipParams {
            threshold: -0.5,
            ..SlipParams::default()
        };
        assert!(matches!(
            e.slip_report(&ledger, user_id, Utc::now(), params),
            Err(EngineError::InvalidRange(_))
        ));
        let params = SlipParams {
            long_days: 3,
            ..SlipParams::default()
        };
        assert!(matches!(
            e.slip_report(&ledger, user_id, Utc::now(), params),
            Err(EngineError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_config_accessor_reflects_settings() {
        let e = engine_with(IdempotencyPolicy::ExactInstant);
        assert_eq!(e.config().idempotency, IdempotencyPolicy::ExactInstant);
        assert_eq!(e.config().default_tz, Tz::UTC);
        assert!(e.reminders_enabled());
    }

    proptest! {
        #[test]
        fn prop_recording_twice_changes_nothing(offsets in proptest::collection::vec(0i64..60 * 24 * 20, 1..30)) {
            let e = engine();
            let (mut ledger, _, habit_id) = phoenix_ledger();
            let base = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();

            for minutes in &offsets {
                e.record_completion(&mut ledger, habit_id, base + Duration::minutes(*minutes)).unwrap();
            }
            let snapshot = ledger.events.clone();

            for minutes in &offsets {
                let outcome = e
                    .record_completion(&mut ledger, habit_id, base + Duration::minutes(*minutes))
                    .unwrap();
                prop_assert!(outcome.idempotent_hit);
            }
            prop_assert_eq!(&ledger.events, &snapshot);
        }

        #[test]
        fn prop_streak_never_exceeds_distinct_days(offsets in proptest::collection::vec(0i64..60 * 24 * 20, 0..30)) {
            let e = engine();
            let (mut ledger, user_id, habit_id) = phoenix_ledger();
            let base = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
            for minutes in &offsets {
                e.record_completion(&mut ledger, habit_id, base + Duration::minutes(*minutes)).unwrap();
            }

            let as_of = base + Duration::days(21);
            let streak = e.compute_streak(&ledger, Some(user_id), habit_id, Some(as_of)).unwrap();
            prop_assert!(streak.current <= streak.max);
            prop_assert!(streak.max as usize <= ledger.events.len());
        }
    }
}
