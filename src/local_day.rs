//! Local calendar day resolution
//!
//! The single place where UTC instants become a user's local calendar date.
//! Every other component routes through [`LocalDayResolver`] so that day
//! boundaries are computed the same way everywhere, including on DST
//! transition days where a local day is 23 or 25 hours long.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Parse an IANA zone name strictly (config-load path)
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| EngineError::ConfigError(format!("unknown timezone '{}'", name)))
}

/// A local day and its UTC span `[start_utc, end_utc)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalDayWindow {
    pub day: NaiveDate,
    pub start_utc: DateTime<Utc>,
    pub end_utc: DateTime<Utc>,
}

impl LocalDayWindow {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start_utc <= instant && instant < self.end_utc
    }

    /// Length of the local day; not always 24 hours
    pub fn length(&self) -> Duration {
        self.end_utc - self.start_utc
    }
}

/// Inclusive range of local calendar days
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// Fails with `InvalidRange` when `start` is after `end`
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(EngineError::InvalidRange(format!(
                "start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        days_inclusive(self.start, self.end)
    }
}

/// Every date from `start` through `end`
pub fn days_inclusive(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start.iter_days().take_while(move |day| *day <= end)
}

/// Converts UTC instants to local calendar dates
#[derive(Debug, Clone, Copy)]
pub struct LocalDayResolver {
    default_tz: Tz,
}

impl LocalDayResolver {
    pub fn new(default_tz: Tz) -> Self {
        Self { default_tz }
    }

    pub fn default_tz(&self) -> Tz {
        self.default_tz
    }

    /// Resolve a zone name, falling back to the default for empty or
    /// unknown names. Never fails.
    pub fn resolve_tz(&self, name: Option<&str>) -> Tz {
        match name.map(str::trim) {
            None | Some("") => self.default_tz,
            Some(raw) => raw.parse::<Tz>().unwrap_or_else(|_| {
                tracing::warn!(
                    timezone = raw,
                    fallback = %self.default_tz,
                    "unknown timezone, using default"
                );
                self.default_tz
            }),
        }
    }

    /// Resolve the first valid zone among `candidates`, else the default
    pub fn resolve_first(&self, candidates: &[Option<&str>]) -> Tz {
        candidates
            .iter()
            .flatten()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .find_map(|name| {
                let parsed = name.parse::<Tz>().ok();
                if parsed.is_none() {
                    tracing::warn!(timezone = name, "ignoring unknown timezone");
                }
                parsed
            })
            .unwrap_or(self.default_tz)
    }

    /// Calendar date of `instant` on the wall clock of `tz`
    pub fn to_local_day(&self, instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
        instant.with_timezone(&tz).date_naive()
    }

    /// Same as [`to_local_day`](Self::to_local_day) but takes a zone name
    pub fn to_local_day_named(&self, instant: DateTime<Utc>, tz_name: Option<&str>) -> NaiveDate {
        self.to_local_day(instant, self.resolve_tz(tz_name))
    }

    /// Wall-clock hour (0-23) of `instant` in `tz`
    pub fn local_hour(&self, instant: DateTime<Utc>, tz: Tz) -> u32 {
        instant.with_timezone(&tz).hour()
    }

    /// UTC span of the local day containing `instant`
    pub fn window_for(&self, instant: DateTime<Utc>, tz: Tz) -> LocalDayWindow {
        self.window_for_day(self.to_local_day(instant, tz), tz)
    }

    /// UTC span of local day `day` in `tz`
    pub fn window_for_day(&self, day: NaiveDate, tz: Tz) -> LocalDayWindow {
        let next = day.succ_opt().unwrap_or(day);
        LocalDayWindow {
            day,
            start_utc: local_midnight_utc(day, tz),
            end_utc: local_midnight_utc(next, tz),
        }
    }
}

impl Default for LocalDayResolver {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}

/// First instant of `day` in `tz`. Zones that skip midnight on a DST
/// change start the day at the first wall-clock time that exists.
fn local_midnight_utc(day: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let midnight = day.and_time(chrono::NaiveTime::MIN);

    let mut candidate: NaiveDateTime = midnight;
    for _ in 0..=4 {
        if let Some(dt) = tz.from_local_datetime(&candidate).earliest() {
            return dt.with_timezone(&Utc);
        }
        candidate += Duration::minutes(30);
    }

    midnight.and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn resolver() -> LocalDayResolver {
        LocalDayResolver::new(chrono_tz::America::Phoenix)
    }

    #[test]
    fn test_to_local_day_crosses_date_line() {
        let r = resolver();
        // 2024-01-15 03:00 UTC is still the 14th in Phoenix (UTC-7)
        let instant = Utc.with_ymd_and_hms(2024, 1, 15, 3, 0, 0).unwrap();
        assert_eq!(
            r.to_local_day(instant, chrono_tz::America::Phoenix),
            NaiveDate::from_ymd_opt(2024, 1, 14).unwrap()
        );
        assert_eq!(
            r.to_local_day(instant, chrono_tz::Asia::Tokyo),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );
    }

    #[test]
    fn test_invalid_zone_falls_back_to_default() {
        let r = resolver();
        assert_eq!(r.resolve_tz(Some("Not/AZone")), chrono_tz::America::Phoenix);
        assert_eq!(r.resolve_tz(Some("")), chrono_tz::America::Phoenix);
        assert_eq!(r.resolve_tz(None), chrono_tz::America::Phoenix);
        assert_eq!(r.resolve_tz(Some("Europe/Berlin")), chrono_tz::Europe::Berlin);
    }

    #[test]
    fn test_resolve_first_skips_invalid_candidates() {
        let r = resolver();
        let tz = r.resolve_first(&[Some("bogus"), None, Some("Asia/Tokyo")]);
        assert_eq!(tz, chrono_tz::Asia::Tokyo);
        assert_eq!(r.resolve_first(&[Some("bogus")]), chrono_tz::America::Phoenix);
    }

    #[test]
    fn test_strict_parse_rejects_unknown_zone() {
        assert!(parse_timezone("America/New_York").is_ok());
        assert!(matches!(
            parse_timezone("Mars/Olympus"),
            Err(EngineError::ConfigError(_))
        ));
    }

    #[test]
    fn test_two_minutes_across_midnight_on_dst_day() {
        let r = resolver();
        let tz = chrono_tz::America::New_York;
        // Spring forward happens at 02:00 local on 2024-03-10; local midnight
        // that day is still EST (UTC-5), i.e. 05:00 UTC.
        let before = Utc.with_ymd_and_hms(2024, 3, 10, 4, 59, 0).unwrap();
        let after = before + Duration::minutes(2);

        let d1 = r.to_local_day(before, tz);
        let d2 = r.to_local_day(after, tz);
        assert_ne!(d1, d2);
        assert_eq!(d1.succ_opt().unwrap(), d2);

        // Fall back day: midnight on 2024-11-03 is EDT (UTC-4)
        let before = Utc.with_ymd_and_hms(2024, 11, 3, 3, 59, 0).unwrap();
        let after = before + Duration::minutes(2);
        assert_eq!(
            r.to_local_day(before, tz),
            NaiveDate::from_ymd_opt(2024, 11, 2).unwrap()
        );
        assert_eq!(
            r.to_local_day(after, tz),
            NaiveDate::from_ymd_opt(2024, 11, 3).unwrap()
        );
    }

    #[test]
    fn test_day_window_length_follows_dst() {
        let r = resolver();
        let tz = chrono_tz::America::New_York;

        let spring = r.window_for_day(NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(), tz);
        assert_eq!(spring.length(), Duration::hours(23));
        assert_eq!(
            spring.start_utc,
            Utc.with_ymd_and_hms(2024, 3, 10, 5, 0, 0).unwrap()
        );

        let fall = r.window_for_day(NaiveDate::from_ymd_opt(2024, 11, 3).unwrap(), tz);
        assert_eq!(fall.length(), Duration::hours(25));

        let normal = r.window_for_day(
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            chrono_tz::America::Phoenix,
        );
        assert_eq!(normal.length(), Duration::hours(24));
    }

    #[test]
    fn test_window_contains_is_half_open() {
        let r = resolver();
        let tz = chrono_tz::America::Phoenix;
        let instant = Utc.with_ymd_and_hms(2024, 6, 1, 18, 0, 0).unwrap();
        let window = r.window_for(instant, tz);

        assert!(window.contains(instant));
        assert!(window.contains(window.start_utc));
        assert!(!window.contains(window.end_utc));
        assert_eq!(r.to_local_day(window.end_utc, tz), window.day.succ_opt().unwrap());
    }

    #[test]
    fn test_named_zone_falls_back_for_empty_or_unknown_names() {
        let r = resolver();
        // 05:00 UTC on the 15th is the 14th in Phoenix, the 15th in Tokyo
        let instant = Utc.with_ymd_and_hms(2024, 1, 15, 5, 0, 0).unwrap();
        let phoenix_day = NaiveDate::from_ymd_opt(2024, 1, 14).unwrap();
        let tokyo_day = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();

        assert_eq!(r.to_local_day_named(instant, Some("Asia/Tokyo")), tokyo_day);
        assert_eq!(r.to_local_day_named(instant, Some("  Asia/Tokyo ")), tokyo_day);
        assert_eq!(r.to_local_day_named(instant, Some("Atlantis/Capital")), phoenix_day);
        assert_eq!(r.to_local_day_named(instant, Some("")), phoenix_day);
        assert_eq!(r.to_local_day_named(instant, None), phoenix_day);
    }

    #[test]
    fn test_date_window() {
        let start = NaiveDate::from_ymd_opt(2024, 2, 27).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let window = DateWindow::new(start, end).unwrap();

        // Leap day included
        assert_eq!(window.days().count(), 4);
        assert!(window.contains(start));
        assert!(window.contains(end));
        assert!(!window.contains(end.succ_opt().unwrap()));
        assert_eq!(DateWindow::new(end, end).unwrap().days().count(), 1);
        assert!(matches!(
            DateWindow::new(end, start),
            Err(EngineError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_local_hour() {
        let r = resolver();
        let instant = Utc.with_ymd_and_hms(2024, 6, 1, 16, 30, 0).unwrap();
        assert_eq!(r.local_hour(instant, chrono_tz::America::Phoenix), 9);
        assert_eq!(r.local_hour(instant, Tz::UTC), 16);
    }
}
