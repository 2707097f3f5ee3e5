//! Recurrence evaluation for cron-scheduled jobs

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

#[derive(Debug, thiserror::Error)]
pub enum CronError {
    #[error("invalid cron expression `{expression}`: {source}")]
    Parse {
        expression: String,
        #[source]
        source: cron::error::Error,
    },
    #[error("cron expression `{0}` has no future fire time")]
    Exhausted(String),
}

/// Computes fire times for recurring jobs.
///
/// Kept behind a trait so the recurrence semantics (granularity, timezone)
/// can be swapped without touching the scheduler.
pub trait CronEvaluator: Send + Sync {
    /// First fire time strictly after `after`.
    fn next_after(&self, expression: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, CronError>;

    /// Check an expression without computing a fire time.
    fn validate(&self, expression: &str) -> Result<(), CronError>;
}

/// Standard evaluator: seconds-granularity cron expressions
/// (`sec min hour day-of-month month day-of-week [year]`), evaluated in UTC.
#[derive(Debug, Clone, Copy, Default)]
pub struct UtcCron;

impl UtcCron {
    fn parse(expression: &str) -> Result<Schedule, CronError> {
        Schedule::from_str(expression).map_err(|source| CronError::Parse {
            expression: expression.to_string(),
            source,
        })
    }
}

impl CronEvaluator for UtcCron {
    fn next_after(&self, expression: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, CronError> {
        let schedule = Self::parse(expression)?;
        schedule
            .after(&after)
            .next()
            .ok_or_else(|| CronError::Exhausted(expression.to_string()))
    }

    fn validate(&self, expression: &str) -> Result<(), CronError> {
        Self::parse(expression).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn next_fire_is_strictly_after() {
        let after = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let next = UtcCron.next_after("0 * * * * *", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 12, 1, 0).unwrap());

        let advanced = UtcCron.next_after("0 * * * * *", next).unwrap();
        assert!(advanced > next);
    }

    #[test]
    fn every_minute_expression() {
        let after = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 30).unwrap();
        let next = UtcCron.next_after("0 */1 * * * *", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 12, 1, 0).unwrap());
    }

    #[test]
    fn malformed_expression_is_rejected() {
        assert!(matches!(
            UtcCron.validate("not a cron line"),
            Err(CronError::Parse { .. })
        ));
        assert!(UtcCron.validate("0 0 3 * * *").is_ok());
    }
}
