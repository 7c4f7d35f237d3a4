/*
 *  Copyright 2025 Carillon Contributors
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Schedule Compiler
//!
//! Turns a human-facing recurrence specification — a one-time instant or
//! "every N units" with a timezone-local anchor — into the canonical
//! five-field expression stored on the task, and back again for editing.
//!
//! The [`RecurrenceSpec`] sum type is the real representation; the cron
//! string exists only at the persistence boundary. Compilation emits a small
//! closed set of shapes (one per unit), and [`decompile`] recognizes exactly
//! that set — anything else is surfaced as a raw cron string rather than
//! guessed at.
//!
//! Two deliberate approximations are preserved as documented behavior:
//! week intervals beyond 1 compile to a plain weekly-on-weekday expression
//! (cron has no "every N weeks" primitive), and year intervals beyond 1
//! compile to a pinned month/day that fires annually. Downstream labels
//! depend on both staying stable.

use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::database::universal_types::UniversalTimestamp;
use crate::error::SchedulingError;
use crate::schedule::next_run;

/// Units a recurring spec may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl fmt::Display for RecurrenceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecurrenceUnit::Minute => "minute",
            RecurrenceUnit::Hour => "hour",
            RecurrenceUnit::Day => "day",
            RecurrenceUnit::Week => "week",
            RecurrenceUnit::Month => "month",
            RecurrenceUnit::Year => "year",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for RecurrenceUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minute" => Ok(RecurrenceUnit::Minute),
            "hour" => Ok(RecurrenceUnit::Hour),
            "day" => Ok(RecurrenceUnit::Day),
            "week" => Ok(RecurrenceUnit::Week),
            "month" => Ok(RecurrenceUnit::Month),
            "year" => Ok(RecurrenceUnit::Year),
            other => Err(format!("Unknown recurrence unit: {}", other)),
        }
    }
}

/// A single future instant in a named timezone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneTimeSpec {
    pub date: NaiveDate,
    pub time: NaiveTime,
    /// IANA zone name, e.g. `America/New_York`
    pub timezone: String,
}

/// "Every N units" anchored at a local date and time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringSpec {
    /// Positive repeat interval in `unit`s
    pub interval: u32,
    pub unit: RecurrenceUnit,
    /// Local date the recurrence is anchored to (fixes day-of-month,
    /// month, and weekday for the units that pin them)
    pub anchor_date: NaiveDate,
    /// Local time of day the recurrence fires at
    pub anchor_time: NaiveTime,
    /// IANA zone name the anchor and all occurrences are interpreted in
    pub timezone: String,
    /// Optional last local date the task may run (inclusive)
    pub end_date: Option<NaiveDate>,
}

/// A recurrence as the caller describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecurrenceSpec {
    OneTime(OneTimeSpec),
    Recurring(RecurringSpec),
}

/// The persistence-ready output of compiling a [`RecurrenceSpec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledSchedule {
    /// Canonical five-field expression (minute hour day-of-month month
    /// day-of-week)
    pub cron_expression: String,
    /// IANA zone the expression is evaluated in
    pub timezone: String,
    /// The anchor instant converted to UTC
    pub anchor_utc: UniversalTimestamp,
    /// End of the validity window (end of the spec's last local day)
    pub end_date: Option<UniversalTimestamp>,
    /// `Some(1)` for one-time schedules, `None` otherwise
    pub max_executions: Option<i32>,
}

impl CompiledSchedule {
    /// The first `next_run_at` for a task created at `now`: the anchor
    /// itself if it is still in the future, otherwise the next occurrence
    /// of the expression strictly after `now`.
    pub fn first_run_after(&self, now: DateTime<Utc>) -> Result<UniversalTimestamp, SchedulingError> {
        if self.anchor_utc.0 > now {
            return Ok(self.anchor_utc);
        }
        if self.max_executions == Some(1) {
            // A one-time anchor in the past fires on the next poll; the
            // wildcard expression is never consulted for timing.
            return Ok(self.anchor_utc);
        }
        let next = next_run::next_occurrence(&self.cron_expression, &self.timezone, now, None)?;
        Ok(UniversalTimestamp(next))
    }
}

/// A stored expression decompiled for editing.
///
/// [`ScheduleShape::Every`] is only produced for expressions the compiler
/// itself emits; any other expression comes back as [`ScheduleShape::Raw`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleShape {
    Every {
        interval: u32,
        unit: RecurrenceUnit,
        minute: Option<u32>,
        hour: Option<u32>,
        day_of_month: Option<u32>,
        month: Option<u32>,
        weekday: Option<chrono::Weekday>,
    },
    Raw(String),
}

impl ScheduleShape {
    /// The anchor time of day, when the shape pins both hour and minute.
    pub fn anchor_time(&self) -> Option<NaiveTime> {
        match self {
            ScheduleShape::Every {
                minute: Some(m),
                hour: Some(h),
                ..
            } => NaiveTime::from_hms_opt(*h, *m, 0),
            _ => None,
        }
    }
}

impl RecurrenceSpec {
    /// Compiles the spec into its canonical expression and UTC anchor.
    ///
    /// Interval bounds are checked here so a task is never persisted in an
    /// unschedulable state; the timezone must be a known IANA zone.
    pub fn compile(&self) -> Result<CompiledSchedule, SchedulingError> {
        match self {
            RecurrenceSpec::OneTime(spec) => spec.compile(),
            RecurrenceSpec::Recurring(spec) => spec.compile(),
        }
    }
}

impl OneTimeSpec {
    fn compile(&self) -> Result<CompiledSchedule, SchedulingError> {
        let tz = parse_timezone(&self.timezone)?;
        let anchor = resolve_local(tz, self.date.and_time(self.time))?;

        Ok(CompiledSchedule {
            // Matches every minute; never consulted once next_run_at is set.
            cron_expression: "* * * * *".to_string(),
            timezone: self.timezone.clone(),
            anchor_utc: UniversalTimestamp(anchor.with_timezone(&Utc)),
            end_date: None,
            max_executions: Some(1),
        })
    }
}

impl RecurringSpec {
    fn compile(&self) -> Result<CompiledSchedule, SchedulingError> {
        let tz = parse_timezone(&self.timezone)?;
        let anchor_local = self.anchor_date.and_time(self.anchor_time);
        let anchor = resolve_local(tz, anchor_local)?;

        let cron_expression = self.build_expression()?;

        let end_date = match self.end_date {
            Some(date) => {
                let end_local = date
                    .and_hms_opt(23, 59, 59)
                    .ok_or_else(|| SchedulingError::InvalidAnchor(date.to_string()))?;
                Some(UniversalTimestamp(
                    resolve_local(tz, end_local)?.with_timezone(&Utc),
                ))
            }
            None => None,
        };

        Ok(CompiledSchedule {
            cron_expression,
            timezone: self.timezone.clone(),
            anchor_utc: UniversalTimestamp(anchor.with_timezone(&Utc)),
            end_date,
            max_executions: None,
        })
    }

    fn build_expression(&self) -> Result<String, SchedulingError> {
        let interval = self.interval;
        let unsupported = || SchedulingError::UnsupportedInterval {
            unit: self.unit,
            interval,
        };

        let minute = self.anchor_time.minute();
        let hour = self.anchor_time.hour();
        let day = self.anchor_date.day();
        let month = self.anchor_date.month();

        let expr = match self.unit {
            RecurrenceUnit::Minute => {
                if !(1..=59).contains(&interval) {
                    return Err(unsupported());
                }
                // Always the step form, so the bare every-minute wildcard
                // stays unique to one-time schedules.
                format!("*/{} * * * *", interval)
            }
            RecurrenceUnit::Hour => {
                if !(1..=23).contains(&interval) {
                    return Err(unsupported());
                }
                if interval == 1 {
                    format!("{} * * * *", minute)
                } else {
                    format!("{} */{} * * *", minute, interval)
                }
            }
            RecurrenceUnit::Day => {
                if !(1..=31).contains(&interval) {
                    return Err(unsupported());
                }
                if interval == 1 {
                    format!("{} {} * * *", minute, hour)
                } else {
                    format!("{} {} */{} * *", minute, hour, interval)
                }
            }
            RecurrenceUnit::Week => {
                if interval == 0 {
                    return Err(unsupported());
                }
                // Weekly-on-weekday approximation; the interval beyond 1 is
                // not representable in the expression.
                let weekday = self.anchor_date.weekday().num_days_from_sunday();
                format!("{} {} * * {}", minute, hour, weekday)
            }
            RecurrenceUnit::Month => {
                if !(1..=11).contains(&interval) {
                    return Err(unsupported());
                }
                if interval == 1 {
                    format!("{} {} {} * *", minute, hour, day)
                } else {
                    // Step anchored at the anchor month, so the schedule
                    // always fires in that month rather than counting from
                    // January.
                    format!("{} {} {} {}/{} *", minute, hour, day, month, interval)
                }
            }
            RecurrenceUnit::Year => {
                if interval == 0 {
                    return Err(unsupported());
                }
                // Pinned month and day; fires annually regardless of the
                // requested interval.
                format!("{} {} {} {} *", minute, hour, day, month)
            }
        };

        Ok(expr)
    }
}

/// Decompiles a stored expression back into its editable shape.
///
/// Recognizes exactly the shapes [`RecurrenceSpec::compile`] emits. The bare
/// every-minute wildcard belongs to one-time schedules and is reported as
/// raw, as is any expression this compiler never produces.
pub fn decompile(expression: &str) -> ScheduleShape {
    let raw = || ScheduleShape::Raw(expression.to_string());

    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return raw();
    }
    let (min_f, hour_f, dom_f, month_f, dow_f) =
        (fields[0], fields[1], fields[2], fields[3], fields[4]);

    let every = |interval: u32,
                 unit: RecurrenceUnit,
                 minute: Option<u32>,
                 hour: Option<u32>,
                 day_of_month: Option<u32>,
                 month: Option<u32>,
                 weekday: Option<chrono::Weekday>| {
        ScheduleShape::Every {
            interval,
            unit,
            minute,
            hour,
            day_of_month,
            month,
            weekday,
        }
    };

    // */N on the minute field: every N minutes.
    if let Some(step) = parse_wildcard_step(min_f) {
        if hour_f == "*" && dom_f == "*" && month_f == "*" && dow_f == "*" {
            if (1..=59).contains(&step) {
                return every(step, RecurrenceUnit::Minute, None, None, None, None, None);
            }
        }
        return raw();
    }

    let minute = match parse_field_value(min_f, 0, 59) {
        Some(m) => m,
        None => return raw(),
    };

    // m * * * * and m */N * * *: hourly shapes.
    if dom_f == "*" && month_f == "*" && dow_f == "*" {
        if hour_f == "*" {
            return every(1, RecurrenceUnit::Hour, Some(minute), None, None, None, None);
        }
        if let Some(step) = parse_wildcard_step(hour_f) {
            if (2..=23).contains(&step) {
                return every(step, RecurrenceUnit::Hour, Some(minute), None, None, None, None);
            }
            return raw();
        }
    }

    let hour = match parse_field_value(hour_f, 0, 23) {
        Some(h) => h,
        None => return raw(),
    };

    // m h * * * and m h */N * *: daily shapes.
    if month_f == "*" && dow_f == "*" {
        if dom_f == "*" {
            return every(1, RecurrenceUnit::Day, Some(minute), Some(hour), None, None, None);
        }
        if let Some(step) = parse_wildcard_step(dom_f) {
            if (2..=31).contains(&step) {
                return every(
                    step,
                    RecurrenceUnit::Day,
                    Some(minute),
                    Some(hour),
                    None,
                    None,
                    None,
                );
            }
            return raw();
        }
    }

    // m h * * w: the weekly approximation.
    if dom_f == "*" && month_f == "*" {
        if let Some(dow) = parse_field_value(dow_f, 0, 6) {
            let weekday = weekday_from_cron(dow);
            return every(
                1,
                RecurrenceUnit::Week,
                Some(minute),
                Some(hour),
                None,
                None,
                Some(weekday),
            );
        }
        return raw();
    }

    let day_of_month = match parse_field_value(dom_f, 1, 31) {
        Some(d) => d,
        None => return raw(),
    };
    if dow_f != "*" {
        return raw();
    }

    // m h d * *: monthly on a pinned day.
    if month_f == "*" {
        return every(
            1,
            RecurrenceUnit::Month,
            Some(minute),
            Some(hour),
            Some(day_of_month),
            None,
            None,
        );
    }

    // m h d M/N *: every N months anchored at month M.
    if let Some((base, step)) = parse_based_step(month_f) {
        if (1..=12).contains(&base) && (2..=11).contains(&step) {
            return every(
                step,
                RecurrenceUnit::Month,
                Some(minute),
                Some(hour),
                Some(day_of_month),
                Some(base),
                None,
            );
        }
        return raw();
    }

    // m h d M *: the yearly approximation.
    if let Some(month) = parse_field_value(month_f, 1, 12) {
        return every(
            1,
            RecurrenceUnit::Year,
            Some(minute),
            Some(hour),
            Some(day_of_month),
            Some(month),
            None,
        );
    }

    raw()
}

fn parse_timezone(name: &str) -> Result<Tz, SchedulingError> {
    name.parse::<Tz>()
        .map_err(|_| SchedulingError::UnknownTimezone(name.to_string()))
}

/// Resolves a local datetime in `tz`, stepping forward out of DST gaps.
///
/// Ambiguous local times (fall-back) resolve to the earlier instant; local
/// times inside a spring-forward gap resolve to the first valid instant
/// after it.
fn resolve_local(tz: Tz, local: NaiveDateTime) -> Result<DateTime<Tz>, SchedulingError> {
    use chrono::offset::LocalResult;

    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => Ok(dt),
        LocalResult::Ambiguous(earlier, _) => Ok(earlier),
        LocalResult::None => {
            // Gaps are at most a couple of hours anywhere on Earth; probe
            // forward in 15-minute steps until the time exists.
            let mut probe = local;
            for _ in 0..8 {
                probe += Duration::minutes(15);
                if let Some(dt) = tz.from_local_datetime(&probe).earliest() {
                    return Ok(dt);
                }
            }
            Err(SchedulingError::InvalidAnchor(format!(
                "{} does not exist in {}",
                local, tz
            )))
        }
    }
}

/// Parses `*/N`, returning the step.
fn parse_wildcard_step(field: &str) -> Option<u32> {
    let step = field.strip_prefix("*/")?;
    step.parse().ok()
}

/// Parses `B/N`, returning the base and step.
fn parse_based_step(field: &str) -> Option<(u32, u32)> {
    let (base, step) = field.split_once('/')?;
    if base == "*" {
        return None;
    }
    Some((base.parse().ok()?, step.parse().ok()?))
}

/// Parses a plain numeric field within `[lo, hi]`.
fn parse_field_value(field: &str, lo: u32, hi: u32) -> Option<u32> {
    let value: u32 = field.parse().ok()?;
    if (lo..=hi).contains(&value) {
        Some(value)
    } else {
        None
    }
}

fn weekday_from_cron(dow: u32) -> chrono::Weekday {
    use chrono::Weekday::*;
    match dow {
        0 => Sun,
        1 => Mon,
        2 => Tue,
        3 => Wed,
        4 => Thu,
        5 => Fri,
        _ => Sat,
    }
}
