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

//! Next-Run Calculator
//!
//! Evaluates a stored recurrence expression over zoned calendar time and
//! returns the next qualifying occurrence. The search runs in the task's own
//! timezone, so a "daily at 09:00" schedule tracks local 09:00 across DST
//! transitions; the result comes back in UTC for storage.
//!
//! The stored expression is the only scheduling input. For the approximated
//! weekly/yearly shapes the interval was collapsed at compile time and cannot
//! be reconstructed here; the calculator evaluates the expression literally.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use croner::Cron;

use crate::error::SchedulingError;

/// Returns the next occurrence of `expression` in `timezone`, strictly after
/// `max(now, last_run)`.
///
/// Strictly-after semantics make the result safe to store as `next_run_at`
/// immediately after an execution: the occurrence that just fired is never
/// returned again, and the result is never ≤ `now`. Occurrence times that
/// fall inside a DST spring-forward gap resolve to the first valid instant
/// after the gap.
pub fn next_occurrence(
    expression: &str,
    timezone: &str,
    now: DateTime<Utc>,
    last_run: Option<DateTime<Utc>>,
) -> Result<DateTime<Utc>, SchedulingError> {
    let tz: Tz = timezone
        .parse()
        .map_err(|_| SchedulingError::UnknownTimezone(timezone.to_string()))?;

    let cron = parse_expression(expression)?;

    let reference = match last_run {
        Some(last) if last > now => last,
        _ => now,
    };

    let next = cron
        .find_next_occurrence(&reference.with_timezone(&tz), false)
        .map_err(|_| SchedulingError::NoUpcomingOccurrence {
            expression: expression.to_string(),
            timezone: timezone.to_string(),
        })?;

    Ok(next.with_timezone(&Utc))
}

/// Parses a five-field recurrence expression, surfacing parser detail on
/// failure. Used at task-creation time so a malformed expression never
/// reaches the store.
pub fn parse_expression(expression: &str) -> Result<Cron, SchedulingError> {
    Cron::new(expression)
        .parse()
        .map_err(|source| SchedulingError::InvalidExpression {
            expression: expression.to_string(),
            source,
        })
}
