//! Daily schedule expressions
//!
//! The selection moment is configured as a five-field cron line restricted
//! to daily shapes: `MIN HOUR * * *` in UTC. Anything fancier is rejected at
//! startup rather than misread.

use chrono::{DateTime, Days, NaiveTime, Timelike, Utc};
use std::fmt;
use std::str::FromStr;

use crate::errors::{CommonError, CommonResult};

/// A once-a-day UTC schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    at: NaiveTime,
}

impl DailySchedule {
    /// Schedule firing at the given UTC hour and minute.
    pub fn at(hour: u32, minute: u32) -> CommonResult<Self> {
        let at = NaiveTime::from_hms_opt(hour, minute, 0).ok_or(CommonError::InvalidSchedule {
            expr: format!("{minute} {hour} * * *"),
            reason: "hour must be 0-23 and minute 0-59",
        })?;
        Ok(Self { at })
    }

    /// Time-of-day the schedule fires.
    #[must_use]
    pub const fn time(&self) -> NaiveTime {
        self.at
    }

    /// The first firing strictly after `now`.
    ///
    /// A call exactly at the scheduled instant returns tomorrow's firing, so
    /// a loop that sleeps until `next_after(now)` never runs twice for one
    /// calendar day.
    #[must_use]
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive().and_time(self.at).and_utc();
        if today > now {
            today
        } else {
            (now.date_naive() + Days::new(1)).and_time(self.at).and_utc()
        }
    }
}

impl FromStr for DailySchedule {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(CommonError::InvalidSchedule {
                expr: s.to_string(),
                reason: "expected five fields: MIN HOUR * * *",
            });
        }
        if fields[2..] != ["*", "*", "*"] {
            return Err(CommonError::InvalidSchedule {
                expr: s.to_string(),
                reason: "day, month and weekday fields must be *",
            });
        }
        let minute: u32 = fields[0].parse().map_err(|_| CommonError::InvalidSchedule {
            expr: s.to_string(),
            reason: "minute must be a number",
        })?;
        let hour: u32 = fields[1].parse().map_err(|_| CommonError::InvalidSchedule {
            expr: s.to_string(),
            reason: "hour must be a number",
        })?;
        Self::at(hour, minute)
    }
}

impl fmt::Display for DailySchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} * * *", self.at.minute(), self.at.hour())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    #[test]
    fn parses_daily_expression() {
        let sched: DailySchedule = "30 12 * * *".parse().unwrap();
        assert_eq!(sched.time(), NaiveTime::from_hms_opt(12, 30, 0).unwrap());
        assert_eq!(sched.to_string(), "30 12 * * *");
    }

    #[rstest]
    #[case("30 12 * *")]
    #[case("30 12 * * * *")]
    #[case("30 12 1 * *")]
    #[case("30 12 * 6 *")]
    #[case("30 12 * * Mon")]
    #[case("60 12 * * *")]
    #[case("30 24 * * *")]
    #[case("x 12 * * *")]
    fn rejects_non_daily_expressions(#[case] expr: &str) {
        assert!(expr.parse::<DailySchedule>().is_err());
    }

    #[test]
    fn next_after_same_day_when_still_ahead() {
        let sched: DailySchedule = "0 12 * * *".parse().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        assert_eq!(
            sched.next_after(now),
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn next_after_rolls_to_tomorrow_once_passed() {
        let sched: DailySchedule = "0 12 * * *".parse().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        // Strictly after: firing at the exact instant points at tomorrow.
        assert_eq!(
            sched.next_after(now),
            Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn next_after_crosses_month_boundaries() {
        let sched: DailySchedule = "15 0 * * *".parse().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 1, 31, 23, 59, 0).unwrap();
        assert_eq!(
            sched.next_after(now),
            Utc.with_ymd_and_hms(2025, 2, 1, 0, 15, 0).unwrap()
        );
    }
}
