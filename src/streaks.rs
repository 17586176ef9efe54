//! Streak calculation
//!
//! Computes the current run (consecutive local days ending at the as-of day)
//! and the longest historical run from a set of distinct completion days.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use std::collections::BTreeSet;

use crate::local_day::LocalDayResolver;
use crate::types::Streak;

/// Streak calculator over distinct local completion days
#[derive(Debug, Clone, Copy)]
pub struct StreakCalculator {
    resolver: LocalDayResolver,
}

impl StreakCalculator {
    pub fn new(resolver: LocalDayResolver) -> Self {
        Self { resolver }
    }

    /// Compute streaks as of the local day containing `as_of`.
    ///
    /// Days after the as-of day are ignored.
    pub fn compute(&self, days: &BTreeSet<NaiveDate>, as_of: DateTime<Utc>, tz: Tz) -> Streak {
        let as_of_day = self.resolver.to_local_day(as_of, tz);
        Self::compute_for_day(days, as_of_day)
    }

    /// Compute streaks as of a local day
    pub fn compute_for_day(days: &BTreeSet<NaiveDate>, as_of_day: NaiveDate) -> Streak {
        let considered: BTreeSet<NaiveDate> = days.range(..=as_of_day).copied().collect();

        let Some(last_completed) = considered.iter().next_back().copied() else {
            return Streak::default();
        };

        Streak {
            current: current_run(&considered, as_of_day),
            max: longest_run(&considered),
            last_completed: Some(last_completed),
        }
    }

    /// Collapse completion instants to distinct local days
    pub fn local_days<I>(&self, instants: I, tz: Tz) -> BTreeSet<NaiveDate>
    where
        I: IntoIterator<Item = DateTime<Utc>>,
    {
        instants
            .into_iter()
            .map(|instant| self.resolver.to_local_day(instant, tz))
            .collect()
    }
}

/// Consecutive days ending at `today` that are present in `days`
pub fn current_run(days: &BTreeSet<NaiveDate>, today: NaiveDate) -> u32 {
    let mut run = 0;
    let mut cursor = Some(today);
    while let Some(day) = cursor.filter(|d| days.contains(d)) {
        run += 1;
        cursor = day.pred_opt();
    }
    run
}

/// Longest run of consecutive calendar days in an ascending set
pub fn longest_run(days: &BTreeSet<NaiveDate>) -> u32 {
    let mut longest = 0;
    let mut run = 0;
    let mut previous: Option<NaiveDate> = None;

    for &day in days {
        run = match previous {
            Some(prev) if prev.succ_opt() == Some(day) => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        previous = Some(day);
    }

    longest
}
