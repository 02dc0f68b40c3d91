//! Five-field cron expressions: minute, hour, day-of-month, month, day-of-week.
//!
//! Supports `*`, single values, `a-b` ranges, comma lists, and `/n` steps on
//! ranges or on a single start value (`5/15` = `5-59/15`). Months accept
//! `jan`..`dec`, weekdays accept `sun`..`sat`, and both `0` and `7` mean Sunday.
//!
//! When both day-of-month and day-of-week are restricted, a day matches if
//! either does (classic Vixie cron behaviour).

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use thiserror::Error;

/// How far ahead [`CronExpr::next_after`] searches before giving up.
const SEARCH_YEARS: i32 = 5;

const MONTH_NAMES: &[&str] = &[
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: &[&str] = &["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CronError {
    #[error("Invalid cron expression {expr:?}: {reason}")]
    InvalidCronExpression { expr: String, reason: String },
}

struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
}

const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: MONTH_NAMES,
};
// 7 is accepted here and folded onto Sunday after parsing
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: WEEKDAY_NAMES,
};

/// A parsed cron expression. Each field is a bitmask of allowed values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    source: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronExpr {
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether `t` (to the minute) is a firing time.
    pub fn matches(&self, t: &NaiveDateTime) -> bool {
        has(self.months, t.month())
            && self.matches_day(t.date())
            && has(self.hours, t.hour())
            && has(self.minutes, t.minute())
    }

    /// The first firing time strictly after `after`, or `None` if there is
    /// none within the next few years (e.g. `0 0 30 2 *`).
    pub fn next_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let mut t = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let horizon = after.year() + SEARCH_YEARS;

        while t.year() <= horizon {
            if !has(self.months, t.month()) {
                let (year, month) = if t.month() == 12 {
                    (t.year() + 1, 1)
                } else {
                    (t.year(), t.month() + 1)
                };
                t = NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.matches_day(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !has(self.hours, t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1);
                continue;
            }
            if !has(self.minutes, t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t);
        }

        None
    }

    fn matches_day(&self, date: NaiveDate) -> bool {
        let dom = has(self.days_of_month, date.day());
        let dow = has(self.days_of_week, date.weekday().num_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }
}

impl FromStr for CronExpr {
    type Err = CronError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| CronError::InvalidCronExpression {
            expr: expr.to_string(),
            reason,
        };

        let fields: Vec<&str> = expr.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields[..] else {
            return Err(invalid(format!("expected 5 fields, found {}", fields.len())));
        };

        let mut days_of_week = parse_field(dow, &DAY_OF_WEEK).map_err(&invalid)?;
        if has(days_of_week, 7) {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            source: fields.join(" "),
            minutes: parse_field(minute, &MINUTE).map_err(&invalid)?,
            hours: parse_field(hour, &HOUR).map_err(&invalid)?,
            days_of_month: parse_field(dom, &DAY_OF_MONTH).map_err(&invalid)?,
            months: parse_field(month, &MONTH).map_err(&invalid)?,
            days_of_week,
            dom_restricted: !dom.starts_with('*'),
            dow_restricted: !dow.starts_with('*'),
        })
    }
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn has(mask: u64, value: u32) -> bool {
    mask & (1 << value) != 0
}

fn parse_field(field: &str, spec: &FieldSpec) -> Result<u64, String> {
    let mut mask = 0u64;

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("bad step {step:?} in {} field", spec.name))?;
                if step == 0 {
                    return Err(format!("zero step in {} field", spec.name));
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if range == "*" {
            (spec.min, spec.max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            (parse_value(lo, spec)?, parse_value(hi, spec)?)
        } else {
            let value = parse_value(range, spec)?;
            // `a/n` runs from `a` to the end of the field
            (value, if step.is_some() { spec.max } else { value })
        };

        if start > end {
            return Err(format!("range {start}-{end} is reversed in {} field", spec.name));
        }

        for value in (start..=end).step_by(step.unwrap_or(1) as usize) {
            mask |= 1 << value;
        }
    }

    Ok(mask)
}

fn parse_value(token: &str, spec: &FieldSpec) -> Result<u32, String> {
    let lower = token.to_ascii_lowercase();
    let value = match spec.names.iter().position(|name| *name == lower) {
        Some(index) => index as u32 + spec.min,
        None => token
            .parse()
            .map_err(|_| format!("bad value {token:?} in {} field", spec.name))?,
    };

    if value < spec.min || value > spec.max {
        return Err(format!(
            "{value} outside {}-{} in {} field",
            spec.min, spec.max, spec.name
        ));
    }
    Ok(value)
}
