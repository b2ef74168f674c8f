//! Cron schedule evaluation
//!
//! Backup schedules are written as standard 5-field cron expressions
//! (`minute hour day-of-month month day-of-week`) or one of the named
//! descriptors (`@hourly`, `@daily`, `@weekly`, `@monthly`, `@yearly`).
//! The underlying cron parser expects a seconds field, so 5-field
//! expressions are normalized before parsing.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::error::{Error, Result};

/// Parse a user-facing schedule expression.
///
/// Errors carry the original expression so it can be surfaced on the
/// resource status verbatim.
pub fn parse(expression: &str) -> Result<Schedule> {
    let normalized = normalize(expression)?;
    Schedule::from_str(&normalized).map_err(|e| Error::schedule(expression, e.to_string()))
}

/// First fire instant strictly after `after`.
pub fn next_fire(schedule: &Schedule, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    schedule
        .after(&after)
        .next()
        .ok_or_else(|| Error::schedule(schedule.to_string(), "no upcoming fire time"))
}

/// Convenience: parse and evaluate in one step.
pub fn next_fire_of(expression: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let schedule = parse(expression)?;
    next_fire(&schedule, after)
}

/// Rewrite descriptors and 5-field expressions into the 7-field form the
/// cron parser accepts. 6- and 7-field expressions pass through untouched.
fn normalize(expression: &str) -> Result<String> {
    let trimmed = expression.trim();

    if let Some(descriptor) = trimmed.strip_prefix('@') {
        return match descriptor {
            "hourly" => Ok("0 0 * * * * *".to_string()),
            "daily" => Ok("0 0 0 * * * *".to_string()),
            "weekly" => Ok("0 0 0 * * SUN *".to_string()),
            "monthly" => Ok("0 0 0 1 * * *".to_string()),
            "yearly" => Ok("0 0 0 1 JAN * *".to_string()),
            other => Err(Error::schedule(
                trimmed,
                format!("unknown descriptor '@{}'", other),
            )),
        };
    }

    match trimmed.split_whitespace().count() {
        5 => Ok(format!("0 {}", trimmed)),
        6 | 7 => Ok(trimmed.to_string()),
        n => Err(Error::schedule(
            trimmed,
            format!("expected 5 fields, got {}", n),
        )),
    }
}
