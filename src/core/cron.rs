//! Five-field cron expressions.
//!
//! Supports `*`, lists, ranges, steps, month and weekday names, `7` as
//! Sunday, and the `@hourly`-style macros. When both day-of-month and
//! day-of-week are restricted a day matches if either does. All times are
//! UTC at minute resolution.

use crate::error::Error;
use crate::Result;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use std::fmt;
use std::str::FromStr;

/// How far back or forward a search runs before giving up.
const SEARCH_LIMIT_DAYS: i64 = 366 * 5;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// Set of allowed values of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronField {
    bits: u64,
}

impl CronField {
    pub fn contains(&self, value: u32) -> bool {
        value < 64 && self.bits & (1 << value) != 0
    }

    fn insert(&mut self, value: u32) {
        self.bits |= 1 << value;
    }
}

#[derive(Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// Value the first name maps to.
    names_base: u32,
}

const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59, names: &[], names_base: 0 };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23, names: &[], names_base: 0 };
const DAY_OF_MONTH: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31, names: &[], names_base: 0 };
const MONTH: FieldSpec = FieldSpec { name: "month", min: 1, max: 12, names: &MONTH_NAMES, names_base: 1 };
// 7 is accepted and folded onto 0.
const DAY_OF_WEEK: FieldSpec = FieldSpec { name: "day-of-week", min: 0, max: 7, names: &DAY_NAMES, names_base: 0 };

/// Parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    source: String,
    minutes: CronField,
    hours: CronField,
    days_of_month: CronField,
    months: CronField,
    days_of_week: CronField,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronExpr {
    /// Parse an expression such as `"*/15 8-18 * * mon-fri"`.
    pub fn parse(expr: &str) -> Result<Self> {
        let err = |reason: String| Error::Cron {
            expr: expr.to_string(),
            reason,
        };

        let trimmed = expr.trim();
        let expanded = match trimmed.to_ascii_lowercase().as_str() {
            "@yearly" | "@annually" => "0 0 1 1 *".to_string(),
            "@monthly" => "0 0 1 * *".to_string(),
            "@weekly" => "0 0 * * 0".to_string(),
            "@daily" | "@midnight" => "0 0 * * *".to_string(),
            "@hourly" => "0 * * * *".to_string(),
            other if other.starts_with('@') => return Err(err(format!("unknown macro {}", other))),
            _ => trimmed.to_string(),
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(err(format!("expected 5 fields, got {}", fields.len())));
        }

        let minutes = parse_field(fields[0], MINUTE).map_err(err)?;
        let hours = parse_field(fields[1], HOUR).map_err(err)?;
        let days_of_month = parse_field(fields[2], DAY_OF_MONTH).map_err(err)?;
        let months = parse_field(fields[3], MONTH).map_err(err)?;
        let mut days_of_week = parse_field(fields[4], DAY_OF_WEEK).map_err(err)?;
        if days_of_week.contains(7) {
            days_of_week.insert(0);
        }

        Ok(Self {
            source: trimmed.to_string(),
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted: !fields[2].starts_with('*'),
            dow_restricted: !fields[4].starts_with('*'),
        })
    }

    /// Whether the expression fires at the minute containing `t`.
    pub fn matches(&self, t: &DateTime<Utc>) -> bool {
        self.months.contains(t.month())
            && self.day_matches(t.date_naive())
            && self.hours.contains(t.hour())
            && self.minutes.contains(t.minute())
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.contains(date.day());
        let dow = self
            .days_of_week
            .contains(date.weekday().num_days_from_sunday());

        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }

    /// Most recent fire time at or before `now`.
    pub fn prev_fire(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let floor = now - Duration::days(SEARCH_LIMIT_DAYS);
        let mut t = truncate_minute(now)?;

        while t >= floor {
            if !self.months.contains(t.month()) {
                t = month_start(t)? - Duration::minutes(1);
            } else if !self.day_matches(t.date_naive()) {
                t = day_start(t)? - Duration::minutes(1);
            } else if !self.hours.contains(t.hour()) {
                t = hour_start(t)? - Duration::minutes(1);
            } else if !self.minutes.contains(t.minute()) {
                t -= Duration::minutes(1);
            } else {
                return Some(t);
            }
        }
        None
    }

    /// Earliest fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let ceiling = after + Duration::days(SEARCH_LIMIT_DAYS);
        let mut t = truncate_minute(after)? + Duration::minutes(1);

        while t <= ceiling {
            if !self.months.contains(t.month()) {
                t = next_month_start(t)?;
            } else if !self.day_matches(t.date_naive()) {
                t = day_start(t)? + Duration::days(1);
            } else if !self.hours.contains(t.hour()) {
                t = hour_start(t)? + Duration::hours(1);
            } else if !self.minutes.contains(t.minute()) {
                t += Duration::minutes(1);
            } else {
                return Some(t);
            }
        }
        None
    }
}

impl FromStr for CronExpr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_field(field: &str, spec: FieldSpec) -> std::result::Result<CronField, String> {
    let mut out = CronField { bits: 0 };

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step '{}' in {} field", step, spec.name))?;
                if step == 0 {
                    return Err(format!("zero step in {} field", spec.name));
                }
                if step > spec.max {
                    return Err(format!(
                        "step {} exceeds {} in {} field",
                        step, spec.max, spec.name
                    ));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (lo, hi) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((a, b)) = range.split_once('-') {
            (parse_value(a, spec)?, parse_value(b, spec)?)
        } else {
            let v = parse_value(range, spec)?;
            // `5/10` runs from 5 to the end of the range.
            (v, if step.is_some() { spec.max } else { v })
        };

        if lo > hi {
            return Err(format!("range {}-{} is reversed in {} field", lo, hi, spec.name));
        }

        let mut v = lo;
        while v <= hi {
            out.insert(v);
            match v.checked_add(step.unwrap_or(1)) {
                Some(next) => v = next,
                None => break,
            }
        }
    }

    Ok(out)
}

fn parse_value(raw: &str, spec: FieldSpec) -> std::result::Result<u32, String> {
    let lower = raw.to_ascii_lowercase();
    let value = match spec.names.iter().position(|n| *n == lower) {
        Some(idx) => idx as u32 + spec.names_base,
        None => raw
            .parse()
            .map_err(|_| format!("invalid value '{}' in {} field", raw, spec.name))?,
    };

    if value < spec.min || value > spec.max {
        return Err(format!(
            "{} out of range {}-{} in {} field",
            value, spec.min, spec.max, spec.name
        ));
    }
    Ok(value)
}

fn truncate_minute(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let secs = t.timestamp();
    Utc.timestamp_opt(secs - secs.rem_euclid(60), 0).single()
}

fn hour_start(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(t.year(), t.month(), t.day(), t.hour(), 0, 0)
        .single()
}

fn day_start(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(t.year(), t.month(), t.day(), 0, 0, 0).single()
}

fn month_start(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(t.year(), t.month(), 1, 0, 0, 0).single()
}

fn next_month_start(t: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if t.month() == 12 {
        (t.year() + 1, 1)
    } else {
        (t.year(), t.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()
}
