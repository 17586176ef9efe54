//! Context suppression
//!
//! Decides whether a travel/exam/illness/custom context covers a local day.
//! Feature rows use the per-kind flags; reminders are muted by any context.

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::local_day::LocalDayResolver;
use crate::types::{Context, ContextKind};

/// Per-kind coverage of a local day
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextFlags {
    pub travel: bool,
    pub exam: bool,
    pub illness: bool,
}

impl ContextFlags {
    fn mark(&mut self, kind: ContextKind) {
        match kind {
            ContextKind::Travel => self.travel = true,
            ContextKind::Exam => self.exam = true,
            ContextKind::Illness => self.illness = true,
            ContextKind::Custom => {}
        }
    }

    pub fn any(&self) -> bool {
        self.travel || self.exam || self.illness
    }
}

/// Evaluates suppression windows against local days
#[derive(Debug, Clone, Copy)]
pub struct ContextSuppressionEngine {
    resolver: LocalDayResolver,
}

impl ContextSuppressionEngine {
    pub fn new(resolver: LocalDayResolver) -> Self {
        Self { resolver }
    }

    /// Local start day and (if closed) local end day of a context
    pub fn local_span(&self, context: &Context, tz: Tz) -> (NaiveDate, Option<NaiveDate>) {
        let start = self.resolver.to_local_day(context.start_utc, tz);
        let end = context
            .end_utc
            .map(|end| self.resolver.to_local_day(end, tz));
        (start, end)
    }

    /// True iff `day` falls inside the context's local-day span
    pub fn overlaps(&self, context: &Context, day: NaiveDate, tz: Tz) -> bool {
        let (start, end) = self.local_span(context, tz);
        start <= day && end.map_or(true, |end| day <= end)
    }

    /// Any context, regardless of kind, covering `day`
    pub fn is_suppressed(&self, contexts: &[&Context], day: NaiveDate, tz: Tz) -> bool {
        contexts.iter().any(|c| self.overlaps(c, day, tz))
    }

    /// Contexts covering `day`
    pub fn active_on<'a>(
        &self,
        contexts: &[&'a Context],
        day: NaiveDate,
        tz: Tz,
    ) -> Vec<&'a Context> {
        contexts
            .iter()
            .copied()
            .filter(|c| self.overlaps(c, day, tz))
            .collect()
    }

    /// Per-kind flags for `day`
    pub fn flags_for_day(&self, contexts: &[&Context], day: NaiveDate, tz: Tz) -> ContextFlags {
        let mut flags = ContextFlags::default();
        for context in contexts {
            if self.overlaps(context, day, tz) {
                flags.mark(context.kind);
            }
        }
        flags
    }
}
