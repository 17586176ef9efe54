//! Completion analytics
//!
//! Aggregate views over a user's completion history: weekly completion
//! percentage, a day-of-week by time-bucket heatmap, and a report of habits
//! whose recent completion rate has slipped below their monthly rate.
//! All grouping is done on local calendar days.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::buckets::TimeBucketSpec;
use crate::error::{EngineError, Result};
use crate::local_day::{days_inclusive, LocalDayResolver};
use crate::types::{Event, Habit, HabitId, UserId};

pub use crate::local_day::DateWindow;

/// Minimum `pct_30d - pct_7d` for a habit to be reported as slipping
pub const DEFAULT_SLIP_THRESHOLD: f64 = 0.15;

pub const DEFAULT_SLIP_SHORT_DAYS: u32 = 7;
pub const DEFAULT_SLIP_LONG_DAYS: u32 = 30;

const MIN_SLIP_SHORT_DAYS: u32 = 1;
const MIN_SLIP_LONG_DAYS: u32 = 7;

/// Days before today covered by the default heatmap window
pub const HEATMAP_DEFAULT_DAYS: i64 = 30;

/// Day-of-week labels, Monday first
pub const DOW_LABELS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Completion percentage for one Monday-based week
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyCompletion {
    pub week_start: NaiveDate,
    pub completion_pct: f64,
    pub completions: usize,
    pub opportunities: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapCell {
    pub bucket: String,
    pub count: u32,
    /// Share of this day-of-week's bucketed events
    pub percent_of_dow: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapDay {
    pub dow: String,
    pub cells: Vec<HeatmapCell>,
}

/// Day-of-week by time-bucket completion counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heatmap {
    pub user_id: UserId,
    pub window: DateWindow,
    pub days: Vec<HeatmapDay>,
    /// Every event in the window, including ones outside all buckets
    pub total_events: u32,
}

impl Heatmap {
    /// Count for a (day label, bucket) pair
    pub fn count(&self, dow: &str, bucket: &str) -> Option<u32> {
        self.days
            .iter()
            .find(|d| d.dow == dow)?
            .cells
            .iter()
            .find(|c| c.bucket == bucket)
            .map(|c| c.count)
    }
}

/// Window lengths and threshold of a slip report
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlipParams {
    /// Recent window in local days (at least 1)
    pub short_days: u32,
    /// Reference window in local days (at least 7)
    pub long_days: u32,
    /// Minimum long-rate minus short-rate, within `[0, 1]`
    pub threshold: f64,
}

impl Default for SlipParams {
    fn default() -> Self {
        Self {
            short_days: DEFAULT_SLIP_SHORT_DAYS,
            long_days: DEFAULT_SLIP_LONG_DAYS,
            threshold: DEFAULT_SLIP_THRESHOLD,
        }
    }
}

impl SlipParams {
    pub fn validate(&self) -> Result<()> {
        if self.short_days < MIN_SLIP_SHORT_DAYS {
            return Err(EngineError::InvalidRange(format!(
                "short window must be at least {} day, got {}",
                MIN_SLIP_SHORT_DAYS, self.short_days
            )));
        }
        if self.long_days < MIN_SLIP_LONG_DAYS {
            return Err(EngineError::InvalidRange(format!(
                "long window must be at least {} days, got {}",
                MIN_SLIP_LONG_DAYS, self.long_days
            )));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(EngineError::InvalidRange(format!(
                "slip threshold must be within [0, 1], got {}",
                self.threshold
            )));
        }
        Ok(())
    }
}

/// A habit whose weekly rate trails its monthly rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlipEntry {
    pub habit_id: HabitId,
    pub name: String,
    pub pct_7d: f64,
    pub pct_30d: f64,
    /// `pct_7d - pct_30d`; more negative is a steeper slip
    pub delta: f64,
}

/// Aggregations over one user's habits and events
#[derive(Debug, Clone)]
pub struct CompletionAnalytics {
    resolver: LocalDayResolver,
    buckets: TimeBucketSpec,
}

impl CompletionAnalytics {
    pub fn new(resolver: LocalDayResolver, buckets: TimeBucketSpec) -> Self {
        Self { resolver, buckets }
    }

    /// Previous Monday-based week plus the current one, in `tz`
    pub fn default_weekly_window(&self, as_of: DateTime<Utc>, tz: Tz) -> DateWindow {
        let this_monday = monday_of(self.resolver.to_local_day(as_of, tz));
        DateWindow {
            start: this_monday - Duration::days(7),
            end: this_monday + Duration::days(6),
        }
    }

    /// The last 30 local days before today, plus today
    pub fn default_heatmap_window(&self, as_of: DateTime<Utc>, tz: Tz) -> DateWindow {
        let today = self.resolver.to_local_day(as_of, tz);
        DateWindow {
            start: today - Duration::days(HEATMAP_DEFAULT_DAYS),
            end: today,
        }
    }

    /// Weekly completion percentage across the user's active habits.
    ///
    /// Each week's denominator only counts the days of that week that fall
    /// inside the window.
    pub fn weekly_completion(
        &self,
        habits: &[&Habit],
        events: &[&Event],
        window: DateWindow,
        tz: Tz,
    ) -> Vec<WeeklyCompletion> {
        let active: BTreeSet<HabitId> = habits
            .iter()
            .filter(|h| h.is_active())
            .map(|h| h.id)
            .collect();

        let mut hits: HashMap<NaiveDate, BTreeSet<(HabitId, NaiveDate)>> = HashMap::new();
        for event in events.iter().filter(|e| active.contains(&e.habit_id)) {
            let day = self.resolver.to_local_day(event.occurred_at_utc, tz);
            if !window.contains(day) {
                continue;
            }
            hits.entry(monday_of(day))
                .or_default()
                .insert((event.habit_id, day));
        }

        let mut weeks = Vec::new();
        let mut week_start = monday_of(window.start);
        while week_start <= window.end {
            let week_end = week_start + Duration::days(6);
            let days_in_range =
                days_inclusive(week_start.max(window.start), week_end.min(window.end)).count();
            let opportunities = active.len() * days_in_range;
            let completions = hits.get(&week_start).map_or(0, BTreeSet::len);
            let completion_pct = if opportunities == 0 {
                0.0
            } else {
                completions as f64 / opportunities as f64
            };

            weeks.push(WeeklyCompletion {
                week_start,
                completion_pct,
                completions,
                opportunities,
            });
            week_start += Duration::days(7);
        }

        weeks
    }

    /// Heatmap of completion events over the window's local days
    pub fn heatmap(
        &self,
        user_id: UserId,
        events: &[&Event],
        window: DateWindow,
        tz: Tz,
    ) -> Heatmap {
        let bucket_names: Vec<&str> = self.buckets.names().collect();
        let mut counts = [(); 7].map(|_| vec![0u32; bucket_names.len()]);
        let mut total_events = 0;

        for event in events {
            let day = self.resolver.to_local_day(event.occurred_at_utc, tz);
            if !window.contains(day) {
                continue;
            }
            total_events += 1;

            let hour = self.resolver.local_hour(event.occurred_at_utc, tz);
            let Some(bucket) = self.buckets.lookup(hour) else {
                continue;
            };
            if let Some(index) = bucket_names.iter().position(|name| *name == bucket) {
                counts[day.weekday().num_days_from_monday() as usize][index] += 1;
            }
        }

        let days = DOW_LABELS
            .iter()
            .zip(counts.iter())
            .map(|(label, row)| {
                let day_total: u32 = row.iter().sum();
                HeatmapDay {
                    dow: label.to_string(),
                    cells: bucket_names
                        .iter()
                        .zip(row.iter())
                        .map(|(name, count)| HeatmapCell {
                            bucket: name.to_string(),
                            count: *count,
                            percent_of_dow: if day_total == 0 {
                                0.0
                            } else {
                                *count as f64 / day_total as f64
                            },
                        })
                        .collect(),
                }
            })
            .collect();

        Heatmap {
            user_id,
            window,
            days,
            total_events,
        }
    }

    /// Active habits whose short-window rate trails their long-window rate
    /// by at least the threshold, steepest slip first.
    ///
    /// Fails with `InvalidRange` when `params` are out of bounds.
    pub fn slip_report(
        &self,
        habits: &[&Habit],
        events: &[&Event],
        as_of: DateTime<Utc>,
        tz: Tz,
        params: SlipParams,
    ) -> Result<Vec<SlipEntry>> {
        params.validate()?;

        let today = self.resolver.to_local_day(as_of, tz);
        let long_start = today - Duration::days(i64::from(params.long_days) - 1);
        let short_start = today - Duration::days(i64::from(params.short_days) - 1);

        let mut report: Vec<SlipEntry> = habits
            .iter()
            .filter(|h| h.is_active())
            .filter_map(|habit| {
                let days: BTreeSet<NaiveDate> = events
                    .iter()
                    .filter(|e| e.habit_id == habit.id)
                    .map(|e| self.resolver.to_local_day(e.occurred_at_utc, tz))
                    .filter(|day| (long_start.min(short_start)..=today).contains(day))
                    .collect();
                if days.is_empty() {
                    return None;
                }

                let recent = days.range(short_start..).count();
                let reference = days.range(long_start..).count();
                let pct_7d = recent as f64 / f64::from(params.short_days);
                let pct_30d = reference as f64 / f64::from(params.long_days);

                (pct_30d - pct_7d >= params.threshold).then(|| SlipEntry {
                    habit_id: habit.id,
                    name: habit.name.clone(),
                    pct_7d: round3(pct_7d),
                    pct_30d: round3(pct_30d),
                    delta: round3(pct_7d - pct_30d),
                })
            })
            .collect();

        report.sort_by(|a, b| a.delta.total_cmp(&b.delta));
        Ok(report)
    }
}

/// Monday of the week containing `day`
pub fn monday_of(day: NaiveDate) -> NaiveDate {
    day - Duration::days(i64::from(day.weekday().num_days_from_monday()))
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
