//! Schedule shorthand codes
//!
//! | Code                  | Cron           |
//! |-----------------------|----------------|
//! | `manual` / empty      | no schedule    |
//! | `every_minute`        | `* * * * *`    |
//! | `every_N_minutes`     | `*/N * * * *`  |
//! | `hourly`              | `0 * * * *`    |
//! | `every_N_hours`       | `0 */N * * *`  |
//! | `daily`               | `0 0 * * *`    |
//! | `daily_at_HH[:MM]`    | `MM HH * * *`  |
//! | `weekly`              | `0 0 * * 0`    |
//!
//! Anything else must be a valid five-field cron expression.

use super::expression::CronSchedule;
use crate::error::{Error, Result};

fn parse_count(code: &str, value: &str, max: u32) -> Result<u32> {
    match value.parse::<u32>() {
        Ok(n) if n >= 1 && n <= max => Ok(n),
        _ => Err(Error::config(format!(
            "Invalid schedule code '{code}': interval must be between 1 and {max}"
        ))),
    }
}

/// Cron form of a schedule code; `None` for manual-only datasets
pub fn to_cron(code: &str) -> Result<Option<String>> {
    let normalized = code.trim().to_lowercase();
    let cron = match normalized.as_str() {
        "" | "manual" => return Ok(None),
        "every_minute" => "* * * * *".to_string(),
        "hourly" => "0 * * * *".to_string(),
        "daily" => "0 0 * * *".to_string(),
        "weekly" => "0 0 * * 0".to_string(),
        other => {
            if let Some(n) = other
                .strip_prefix("every_")
                .and_then(|rest| rest.strip_suffix("_minutes"))
            {
                let n = parse_count(code, n, 59)?;
                format!("*/{n} * * * *")
            } else if let Some(n) = other
                .strip_prefix("every_")
                .and_then(|rest| rest.strip_suffix("_hours"))
            {
                let n = parse_count(code, n, 23)?;
                format!("0 */{n} * * *")
            } else if let Some(at) = other.strip_prefix("daily_at_") {
                let (hour, minute) = at.split_once(':').unwrap_or((at, "0"));
                match (hour.parse::<u32>(), minute.parse::<u32>()) {
                    (Ok(h), Ok(m)) if h < 24 && m < 60 => format!("{m} {h} * * *"),
                    _ => {
                        return Err(Error::config(format!(
                            "Invalid schedule code '{code}': expected daily_at_HH or daily_at_HH:MM"
                        )))
                    }
                }
            } else {
                CronSchedule::parse(code)?.expression().to_string()
            }
        }
    };
    Ok(Some(cron))
}
