//! Cron evaluation for launch schedules.
//!
//! Schedules use standard 5-field cron syntax (`min hour dom month dow`).
//! Evaluation is pure: given a reference instant we can ask for the most
//! recent due tick at or before it, the next tick strictly after it, or a
//! bounded preview of upcoming ticks.

use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use std::str::FromStr;

use crate::{Error, Result};

/// Maximum number of ticks a preview may return.
pub const MAX_PREVIEW_COUNT: usize = 20;

/// A parsed 5-field cron expression.
#[derive(Debug, Clone)]
pub struct CronSpec {
    expression: String,
    schedule: Schedule,
}

impl CronSpec {
    /// Parse a standard 5-field cron expression.
    ///
    /// Expressions with any other field count are rejected; the underlying
    /// parser works on a 6-field form with a fixed `0` seconds field, so
    /// ticks always land on whole minutes.
    pub fn parse(expression: &str) -> Result<Self> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err(Error::InvalidCron("expression cannot be empty".into()));
        }
        if expression.split_whitespace().count() != 5 {
            return Err(Error::InvalidCron(format!(
                "expected standard 5-field cron, e.g. '*/5 * * * *', got '{}'",
                expression
            )));
        }
        let schedule = Schedule::from_str(&format!("0 {}", expression))
            .map_err(|e| Error::InvalidCron(format!("'{}': {}", expression, e)))?;
        Ok(Self {
            expression: expression.to_string(),
            schedule,
        })
    }

    /// The original 5-field expression.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The latest scheduled tick at or before `now`.
    ///
    /// The underlying schedule iterator only walks forward, so this scans a
    /// widening lookback window. Expressions with no tick inside the widest
    /// window (a leap year) return `None`.
    pub fn due_tick(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        for lookback in [
            Duration::hours(1),
            Duration::days(1),
            Duration::days(35),
            Duration::days(366),
        ] {
            let mut last = None;
            for tick in self.schedule.after(&(now - lookback)) {
                if tick > now {
                    break;
                }
                last = Some(tick);
            }
            if last.is_some() {
                return last;
            }
        }
        None
    }

    /// The earliest scheduled tick strictly after `now`.
    pub fn next_tick(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&now).next()
    }

    /// The next `count` ticks strictly after `now`, for operator preview.
    /// Never mutates any schedule state; `count` is clamped to 1..=20.
    pub fn preview(&self, now: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let count = count.clamp(1, MAX_PREVIEW_COUNT);
        self.schedule.after(&now).take(count).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            CronSpec::parse("not a cron"),
            Err(Error::InvalidCron(_))
        ));
        assert!(matches!(CronSpec::parse(""), Err(Error::InvalidCron(_))));
        // 6-field (seconds) form is not standard 5-field cron
        assert!(matches!(
            CronSpec::parse("0 */5 * * * *"),
            Err(Error::InvalidCron(_))
        ));
        assert!(matches!(
            CronSpec::parse("61 * * * *"),
            Err(Error::InvalidCron(_))
        ));
    }

    #[test]
    fn due_is_latest_tick_at_or_before_now() {
        let spec = CronSpec::parse("*/5 * * * *").unwrap();
        let now = at(2025, 3, 10, 12, 2, 30);
        assert_eq!(spec.due_tick(now), Some(at(2025, 3, 10, 12, 0, 0)));

        // exactly on a tick: the tick itself is due
        let now = at(2025, 3, 10, 12, 5, 0);
        assert_eq!(spec.due_tick(now), Some(at(2025, 3, 10, 12, 5, 0)));
    }

    #[test]
    fn next_is_strictly_after_now() {
        let spec = CronSpec::parse("*/5 * * * *").unwrap();
        let now = at(2025, 3, 10, 12, 5, 0);
        assert_eq!(spec.next_tick(now), Some(at(2025, 3, 10, 12, 10, 0)));
    }

    #[test]
    fn due_and_next_bracket_now() {
        let specs = ["* * * * *", "*/5 * * * *", "45 13 * * 5", "0 0 1 * *"];
        let now = at(2025, 6, 15, 9, 33, 12);
        for raw in specs {
            let spec = CronSpec::parse(raw).unwrap();
            let due = spec.due_tick(now).unwrap();
            let next = spec.next_tick(now).unwrap();
            assert!(due <= now, "{raw}: due {due} > now {now}");
            assert!(next > now, "{raw}: next {next} <= now {now}");
            assert!(next > due, "{raw}: next {next} <= due {due}");
        }
    }

    #[test]
    fn due_handles_sparse_schedules() {
        // fires once a month; now is mid-month
        let spec = CronSpec::parse("0 0 1 * *").unwrap();
        let now = at(2025, 6, 15, 0, 0, 0);
        assert_eq!(spec.due_tick(now), Some(at(2025, 6, 1, 0, 0, 0)));
    }

    #[test]
    fn preview_is_bounded_and_strictly_increasing() {
        let spec = CronSpec::parse("*/15 * * * *").unwrap();
        let now = at(2025, 1, 1, 0, 0, 0);
        let runs = spec.preview(now, 4);
        assert_eq!(runs.len(), 4);
        assert!(runs[0] > now);
        assert!(runs.windows(2).all(|w| w[0] < w[1]));

        assert_eq!(spec.preview(now, 0).len(), 1);
        assert_eq!(spec.preview(now, 500).len(), MAX_PREVIEW_COUNT);
    }
}
