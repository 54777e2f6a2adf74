//! Cadence expressions: six-field cron strings
//! (`sec min hour day-of-month month day-of-week`).

use crate::probes::TestDefinition;
use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::Serialize;
use std::str::FromStr;
use thiserror::Error;

/// Number of whitespace-separated fields a cadence must have.
pub const FIELD_COUNT: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CadenceError {
    #[error("cadence is empty")]
    Empty,
    #[error("expected 6 fields (sec min hour day-of-month month day-of-week), found {0}")]
    FieldCount(usize),
    #[error("{0}")]
    Syntax(String),
}

/// Parse a six-field cadence.
pub fn parse(expr: &str) -> Result<Schedule, CadenceError> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.is_empty() {
        return Err(CadenceError::Empty);
    }
    if fields.len() != FIELD_COUNT {
        return Err(CadenceError::FieldCount(fields.len()));
    }
    Schedule::from_str(&fields.join(" ")).map_err(|e| CadenceError::Syntax(e.to_string()))
}

/// One upcoming firing in a dry-run preview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Upcoming {
    pub at: DateTime<Utc>,
    pub test_id: String,
    pub name: String,
}

/// Firings due in `(from, until]`, ordered by time.
///
/// At most `per_test` firings are listed for each test so that
/// every-second cadences don't flood the preview. Tests whose cadence
/// does not parse are left out.
pub fn preview(
    tests: &[TestDefinition],
    from: DateTime<Utc>,
    until: DateTime<Utc>,
    per_test: usize,
) -> Vec<Upcoming> {
    let mut upcoming = Vec::new();

    for test in tests {
        let schedule = match parse(&test.cron) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(test = %test.name, cron = %test.cron, "Skipping invalid cadence: {}", e);
                continue;
            }
        };
        for at in schedule.after(&from).take(per_test) {
            if at > until {
                break;
            }
            upcoming.push(Upcoming {
                at,
                test_id: test.id.clone(),
                name: test.name.clone(),
            });
        }
    }

    upcoming.sort_by(|a, b| a.at.cmp(&b.at).then_with(|| a.name.cmp(&b.name)));
    upcoming
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_accepts_six_field_expressions() {
        for expr in [
            "*/5 * * * * *",
            "0 */15 * * * *",
            "0 0 3 * * *",
            "30 0 9-17 * * Mon-Fri",
            "0 0 0 1 1,7 *",
            "  0   *  * * * *  ",
        ] {
            assert!(parse(expr).is_ok(), "{} should parse", expr);
        }
    }

    #[test]
    fn test_rejects_wrong_field_count() {
        assert_eq!(parse("bogus").unwrap_err(), CadenceError::FieldCount(1));
        assert_eq!(parse("* * * * *").unwrap_err(), CadenceError::FieldCount(5));
        assert_eq!(parse("0 0 0 1 1 * 2030").unwrap_err(), CadenceError::FieldCount(7));
        assert_eq!(parse("").unwrap_err(), CadenceError::Empty);
        assert_eq!(parse("   ").unwrap_err(), CadenceError::Empty);
    }

    #[test]
    fn test_rejects_bad_field_values() {
        assert!(matches!(parse("61 * * * * *"), Err(CadenceError::Syntax(_))));
        assert!(matches!(parse("* * * * * Funday"), Err(CadenceError::Syntax(_))));
    }

    #[test]
    fn test_every_five_seconds() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 1).unwrap();
        let schedule = parse("*/5 * * * * *").unwrap();
        let next: Vec<_> = schedule.after(&start).take(3).collect();
        assert_eq!(next[0], Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 5).unwrap());
        assert_eq!(next[1], Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 10).unwrap());
        assert_eq!(next[2], Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 15).unwrap());
    }

    #[test]
    fn test_preview_orders_and_bounds() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let tests = vec![
            TestDefinition::new("a", "alpha", "http://a/", "0 */30 * * * *"),
            TestDefinition::new("b", "beta", "http://b/", "0 0 * * * *"),
            TestDefinition::new("c", "broken", "http://c/", "bogus"),
        ];

        let got = preview(&tests, from, from + Duration::hours(1), 100);
        let names: Vec<_> = got.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "alpha", "beta"]);
        assert_eq!(got[2].at, from + Duration::hours(1));
    }

    #[test]
    fn test_preview_caps_per_test() {
        let from = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let tests = vec![TestDefinition::new("a", "alpha", "http://a/", "* * * * * *")];
        assert_eq!(preview(&tests, from, from + Duration::hours(24), 10).len(), 10);
    }
}
