//! Cron expression evaluation for scheduled jobs
//!
//! Standard 5-field syntax: minute, hour, day of month, month, day of week
//! (0 = Sunday). Supports `*`, value lists (`1,3,5`), ranges (`1-5`), and
//! steps (`*/5`, `0-30/5`).

use crate::error::{QueueError, Result};
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use std::collections::BTreeSet;

/// A parsed cron expression
#[derive(Debug, Clone)]
pub struct CronExpression {
    expression: String,
    minutes: BTreeSet<u32>,
    hours: BTreeSet<u32>,
    days: BTreeSet<u32>,
    months: BTreeSet<u32>,
    weekdays: BTreeSet<u32>,
}

impl CronExpression {
    /// Parse a cron expression string
    pub fn parse(expression: &str) -> Result<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();

        if parts.len() != 5 {
            return Err(QueueError::Scheduling(format!(
                "Expected 5 cron fields, got {}",
                parts.len()
            )));
        }

        Ok(Self {
            expression: expression.to_string(),
            minutes: parse_field(parts[0], 0, 59, "minute")?,
            hours: parse_field(parts[1], 0, 23, "hour")?,
            days: parse_field(parts[2], 1, 31, "day")?,
            months: parse_field(parts[3], 1, 12, "month")?,
            weekdays: parse_field(parts[4], 0, 6, "weekday")?,
        })
    }

    /// The original expression string
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Next firing time strictly after the given instant
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        // Start from the next whole minute
        let mut current = after + Duration::minutes(1);
        current = Utc
            .with_ymd_and_hms(
                current.year(),
                current.month(),
                current.day(),
                current.hour(),
                current.minute(),
                0,
            )
            .single()?;

        // Scan up to 4 years to cover leap years and sparse schedules
        let max_iterations = 4 * 366 * 24 * 60;

        for _ in 0..max_iterations {
            if self.matches(&current) {
                return Some(current);
            }
            current += Duration::minutes(1);
        }

        None
    }

    /// Whether a datetime satisfies every field of this expression
    pub fn matches(&self, dt: &DateTime<Utc>) -> bool {
        self.minutes.contains(&dt.minute())
            && self.hours.contains(&dt.hour())
            && self.days.contains(&dt.day())
            && self.months.contains(&dt.month())
            && self.weekdays.contains(&dt.weekday().num_days_from_sunday())
    }
}

fn parse_field(field: &str, min: u32, max: u32, name: &str) -> Result<BTreeSet<u32>> {
    let mut values = BTreeSet::new();

    for part in field.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        // Step values: */5 or 0-30/5
        let (range_part, step) = if let Some(idx) = part.find('/') {
            let step_str = &part[idx + 1..];
            let step: u32 = step_str.parse().map_err(|_| {
                QueueError::Scheduling(format!("Invalid step '{}' in {}", step_str, name))
            })?;
            if step == 0 {
                return Err(QueueError::Scheduling(format!(
                    "Step cannot be 0 in {}",
                    name
                )));
            }
            (&part[..idx], step)
        } else {
            (part, 1)
        };

        let (start, end) = if range_part == "*" {
            (min, max)
        } else if let Some(idx) = range_part.find('-') {
            let start: u32 = range_part[..idx].parse().map_err(|_| {
                QueueError::Scheduling(format!(
                    "Invalid range start '{}' in {}",
                    &range_part[..idx],
                    name
                ))
            })?;
            let end: u32 = range_part[idx + 1..].parse().map_err(|_| {
                QueueError::Scheduling(format!(
                    "Invalid range end '{}' in {}",
                    &range_part[idx + 1..],
                    name
                ))
            })?;
            (start, end)
        } else {
            let value: u32 = range_part.parse().map_err(|_| {
                QueueError::Scheduling(format!("Invalid value '{}' in {}", range_part, name))
            })?;
            (value, value)
        };

        if start < min || end > max || start > end {
            return Err(QueueError::Scheduling(format!(
                "Range {}-{} out of bounds ({}-{}) in {}",
                start, end, min, max, name
            )));
        }

        let mut current = start;
        while current <= end {
            values.insert(current);
            current += step;
        }
    }

    if values.is_empty() {
        return Err(QueueError::Scheduling(format!(
            "No valid values in {}",
            name
        )));
    }

    Ok(values)
}
