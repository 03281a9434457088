//! Five-field cron expressions (`minute hour day-of-month month day-of-week`)
//!
//! Evaluation is delegated to the `cron` crate, which expects a leading
//! seconds field and numbers weekdays 1-7 from Sunday. Expressions are
//! rewritten into that form: day-of-week accepts 0-7 with both 0 and 7 meaning
//! Sunday, and when both day fields are restricted a time matches either one,
//! as in classic cron. All evaluation happens in UTC.

use crate::error::{Error, Result};
use ::cron::Schedule;
use chrono::{DateTime, Duration, Timelike, Utc};
use std::fmt;
use std::str::FromStr;

/// A parsed cron expression
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    /// One schedule, or a day-of-month / day-of-week pair matched as either
    schedules: Vec<Schedule>,
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl Eq for CronSchedule {}

fn invalid(expression: &str, detail: impl fmt::Display) -> Error {
    Error::config(format!("Invalid cron expression '{expression}': {detail}"))
}

/// Reject zero steps and reversed numeric ranges before handing a field over
fn check_field(expression: &str, field: &str) -> Result<()> {
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (part, None),
        };
        if step.and_then(|s| s.parse::<u32>().ok()) == Some(0) {
            return Err(invalid(expression, format!("zero step in '{field}'")));
        }
        if let Some((a, b)) = range.split_once('-') {
            if let (Ok(a), Ok(b)) = (a.parse::<u32>(), b.parse::<u32>()) {
                if a > b {
                    return Err(invalid(expression, format!("reversed range in '{field}'")));
                }
            }
        }
    }
    Ok(())
}

/// Rewrite a numeric 0-7 weekday field as the crate's 1-7 list
fn weekday_field(expression: &str, field: &str) -> Result<String> {
    if field == "*" || field.chars().any(|c| c.is_ascii_alphabetic()) {
        return Ok(field.to_string());
    }

    let number = |s: &str| {
        s.parse::<usize>()
            .map_err(|_| invalid(expression, format!("bad day-of-week '{field}'")))
    };
    let mut days = [false; 7];
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, number(step)?),
            None => (part, 1),
        };
        let (start, end) = match range.split_once('-') {
            _ if range == "*" => (0, 6),
            Some((a, b)) => (number(a)?, number(b)?),
            None if part.contains('/') => (number(range)?, 7),
            None => {
                let day = number(range)?;
                (day, day)
            }
        };
        if end > 7 || start > end {
            return Err(invalid(expression, "day-of-week must be within 0-7"));
        }
        for day in (start..=end).step_by(step) {
            days[day % 7] = true;
        }
    }

    let list: Vec<String> = days
        .iter()
        .enumerate()
        .filter(|(_, on)| **on)
        .map(|(day, _)| (day + 1).to_string())
        .collect();
    Ok(list.join(","))
}

impl CronSchedule {
    /// Parse an expression
    pub fn parse(expression: &str) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(Error::config(format!(
                "Cron expression '{expression}' must have 5 fields, found {}",
                fields.len()
            )));
        }
        for field in &fields {
            check_field(expression, field)?;
        }

        let (minute, hour, dom, month) = (fields[0], fields[1], fields[2], fields[3]);
        let dow = weekday_field(expression, fields[4])?;
        let build = |dom: &str, dow: &str| {
            Schedule::from_str(&format!("0 {minute} {hour} {dom} {month} {dow}"))
                .map_err(|e| invalid(expression, e))
        };

        let schedules = if dom != "*" && dow != "*" {
            vec![build(dom, "*")?, build("*", &dow)?]
        } else {
            vec![build(dom, &dow)?]
        };

        Ok(Self {
            expression: fields.join(" "),
            schedules,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Whether the minute containing `at` is a firing time
    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        let Some(minute) = at.with_second(0).and_then(|t| t.with_nanosecond(0)) else {
            return false;
        };
        self.next_after(minute - Duration::seconds(1)) == Some(minute)
    }

    /// First firing time strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(&after).next())
            .min()
    }

    /// Whether a firing time falls in `(from, to]`
    pub fn is_due_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        self.next_after(from).is_some_and(|next| next <= to)
    }
}

impl FromStr for CronSchedule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}
