//! Restricted RFC 5545 recurrence rules for destruction schedules.
//!
//! Supported: `FREQ=DAILY;BYHOUR=h;BYMINUTE=m` and
//! `FREQ=WEEKLY;BYDAY=d[,d..];BYHOUR=h;BYMINUTE=m`. Everything else
//! (MONTHLY, INTERVAL, UNTIL, COUNT, BYMONTHDAY, ...) is rejected at parse
//! time rather than silently ignored.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc, Weekday};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RruleError {
    #[error("empty recurrence rule")]
    Empty,
    #[error("malformed rule part: {0}")]
    MalformedPart(String),
    #[error("unsupported rule part: {0}")]
    UnsupportedPart(String),
    #[error("unsupported FREQ: {0} (only DAILY and WEEKLY)")]
    UnsupportedFreq(String),
    #[error("missing FREQ")]
    MissingFreq,
    #[error("WEEKLY rule requires BYDAY")]
    MissingByDay,
    #[error("invalid BYDAY value: {0}")]
    InvalidByDay(String),
    #[error("invalid {field} value: {value}")]
    InvalidNumber { field: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freq {
    Daily,
    Weekly,
}

/// A parsed recurrence: fires at `by_hour:by_minute` UTC, every day or on
/// the listed weekdays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recurrence {
    pub freq: Freq,
    pub by_day: Vec<Weekday>,
    pub by_hour: u32,
    pub by_minute: u32,
}

fn parse_weekday(token: &str) -> Result<Weekday, RruleError> {
    match token {
        "MO" => Ok(Weekday::Mon),
        "TU" => Ok(Weekday::Tue),
        "WE" => Ok(Weekday::Wed),
        "TH" => Ok(Weekday::Thu),
        "FR" => Ok(Weekday::Fri),
        "SA" => Ok(Weekday::Sat),
        "SU" => Ok(Weekday::Sun),
        other => Err(RruleError::InvalidByDay(other.to_string())),
    }
}

fn parse_bounded(field: &'static str, value: &str, max: u32) -> Result<u32, RruleError> {
    let n: u32 = value.parse().map_err(|_| RruleError::InvalidNumber {
        field,
        value: value.to_string(),
    })?;
    if n > max {
        return Err(RruleError::InvalidNumber {
            field,
            value: value.to_string(),
        });
    }
    Ok(n)
}

impl FromStr for Recurrence {
    type Err = RruleError;

    fn from_str(rule: &str) -> Result<Self, Self::Err> {
        let rule = rule.trim();
        if rule.is_empty() {
            return Err(RruleError::Empty);
        }

        let mut freq: Option<Freq> = None;
        let mut by_day: Vec<Weekday> = Vec::new();
        let mut by_hour: u32 = 0;
        let mut by_minute: u32 = 0;

        for part in rule.split(';') {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| RruleError::MalformedPart(part.to_string()))?;
            match key {
                "FREQ" => {
                    freq = Some(match value {
                        "DAILY" => Freq::Daily,
                        "WEEKLY" => Freq::Weekly,
                        other => return Err(RruleError::UnsupportedFreq(other.to_string())),
                    });
                }
                "BYDAY" => {
                    for token in value.split(',') {
                        by_day.push(parse_weekday(token)?);
                    }
                }
                "BYHOUR" => by_hour = parse_bounded("BYHOUR", value, 23)?,
                "BYMINUTE" => by_minute = parse_bounded("BYMINUTE", value, 59)?,
                other => return Err(RruleError::UnsupportedPart(other.to_string())),
            }
        }

        let freq = freq.ok_or(RruleError::MissingFreq)?;
        if freq == Freq::Weekly && by_day.is_empty() {
            return Err(RruleError::MissingByDay);
        }

        Ok(Recurrence {
            freq,
            by_day,
            by_hour,
            by_minute,
        })
    }
}

impl Recurrence {
    /// First fire time strictly after `after`, in UTC.
    pub fn next_occurrence(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let candidate_today = Utc
            .with_ymd_and_hms(
                after.year(),
                after.month(),
                after.day(),
                self.by_hour,
                self.by_minute,
                0,
            )
            .single()
            .unwrap_or(after);

        let mut candidate = if candidate_today > after {
            candidate_today
        } else {
            candidate_today + Duration::days(1)
        };

        match self.freq {
            Freq::Daily => candidate,
            Freq::Weekly => {
                // At most a week of day steps until a BYDAY weekday matches.
                for _ in 0..7 {
                    if self.by_day.contains(&candidate.weekday()) {
                        return candidate;
                    }
                    candidate += Duration::days(1);
                }
                candidate
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn parses_daily_rule() {
        let rec: Recurrence = "FREQ=DAILY;BYHOUR=3;BYMINUTE=0".parse().unwrap();
        assert_eq!(rec.freq, Freq::Daily);
        assert_eq!(rec.by_hour, 3);
        assert_eq!(rec.by_minute, 0);
        assert!(rec.by_day.is_empty());
    }

    #[test]
    fn parses_weekly_rule_with_multiple_days() {
        let rec: Recurrence = "FREQ=WEEKLY;BYDAY=MO,WE,FR;BYHOUR=17;BYMINUTE=30"
            .parse()
            .unwrap();
        assert_eq!(rec.by_day, vec![Weekday::Mon, Weekday::Wed, Weekday::Fri]);
    }

    #[test]
    fn rejects_monthly() {
        let err = "FREQ=MONTHLY;BYHOUR=1;BYMINUTE=0"
            .parse::<Recurrence>()
            .unwrap_err();
        assert_eq!(err, RruleError::UnsupportedFreq("MONTHLY".to_string()));
    }

    #[test]
    fn rejects_interval_and_until() {
        assert!(matches!(
            "FREQ=DAILY;INTERVAL=2".parse::<Recurrence>().unwrap_err(),
            RruleError::UnsupportedPart(_)
        ));
        assert!(matches!(
            "FREQ=DAILY;UNTIL=20270101T000000Z"
                .parse::<Recurrence>()
                .unwrap_err(),
            RruleError::UnsupportedPart(_)
        ));
    }

    #[test]
    fn weekly_requires_byday() {
        assert_eq!(
            "FREQ=WEEKLY;BYHOUR=1;BYMINUTE=0"
                .parse::<Recurrence>()
                .unwrap_err(),
            RruleError::MissingByDay
        );
    }

    #[test]
    fn rejects_out_of_range_hour() {
        assert!(matches!(
            "FREQ=DAILY;BYHOUR=24;BYMINUTE=0"
                .parse::<Recurrence>()
                .unwrap_err(),
            RruleError::InvalidNumber { field: "BYHOUR", .. }
        ));
    }

    #[test]
    fn weekly_friday_fires_on_friday_only() {
        let rec: Recurrence = "FREQ=WEEKLY;BYDAY=FR;BYHOUR=17;BYMINUTE=30".parse().unwrap();
        // 2026-08-24 is a Monday.
        let monday = at(2026, 8, 24, 12, 0);
        let next = rec.next_occurrence(monday);
        assert_eq!(next, at(2026, 8, 28, 17, 30));
        assert_eq!(next.weekday(), Weekday::Fri);

        // From just after the Friday fire, the next one is a week out.
        let after_fire = next + Duration::minutes(1);
        assert_eq!(rec.next_occurrence(after_fire), at(2026, 9, 4, 17, 30));
    }

    #[test]
    fn daily_rolls_to_tomorrow_when_time_passed() {
        let rec: Recurrence = "FREQ=DAILY;BYHOUR=3;BYMINUTE=0".parse().unwrap();
        let late = at(2026, 8, 24, 12, 0);
        assert_eq!(rec.next_occurrence(late), at(2026, 8, 25, 3, 0));

        let early = at(2026, 8, 24, 1, 0);
        assert_eq!(rec.next_occurrence(early), at(2026, 8, 24, 3, 0));
    }

    #[test]
    fn occurrence_is_strictly_after_input() {
        let rec: Recurrence = "FREQ=DAILY;BYHOUR=3;BYMINUTE=0".parse().unwrap();
        let exactly = at(2026, 8, 24, 3, 0);
        assert_eq!(rec.next_occurrence(exactly), at(2026, 8, 25, 3, 0));
    }
}
