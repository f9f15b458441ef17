//! Cron trigger fields and next-fire computation.
//!
//! A cron trigger has six independently optional fields: second, minute,
//! hour, day, month and day_of_week. Each field accepts `*`, a literal, a
//! range `a-b`, a step `*/n`, `a-b/n` or `a/n`, or a comma separated list of
//! those. Months also accept `jan`..`dec` and day_of_week accepts
//! `mon`..`sun` (numerically 0 = Monday .. 6 = Sunday).
//!
//! Omitted fields follow the usual implied defaults: fields more significant
//! than the most significant given field match anything, fields less
//! significant default to their minimum. `day_of_week` always defaults to
//! `*`. So `hour=3` fires daily at 03:00:00, not every second of that hour.
//!
//! When both `day` and `day_of_week` are given, a date must satisfy both.
//!
//! A spec is lowered to a six-field expression (seconds first) and evaluated
//! by the `cron` crate.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::{Schedule, TimeUnitSpec};
use serde::{Deserialize, Deserializer, Serialize};

use crate::SchedulerError;

const WEEKDAY_NAMES: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];
const CRON_WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Raw cron field expressions as supplied by the caller.
///
/// Fields deserialize from either numbers or strings, so both
/// `{"hour": 3}` and `{"hour": "*/6"}` are accepted.
///
/// # Example
///
/// ```
/// use catalog_scheduler::CronSpec;
///
/// // Every day at 03:00:00
/// let spec = CronSpec::new().hour(3).minute(0);
/// assert_eq!(spec.hour.as_deref(), Some("3"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronSpec {
    #[serde(default, deserialize_with = "field_expr", skip_serializing_if = "Option::is_none")]
    pub second: Option<String>,
    #[serde(default, deserialize_with = "field_expr", skip_serializing_if = "Option::is_none")]
    pub minute: Option<String>,
    #[serde(default, deserialize_with = "field_expr", skip_serializing_if = "Option::is_none")]
    pub hour: Option<String>,
    #[serde(default, deserialize_with = "field_expr", skip_serializing_if = "Option::is_none")]
    pub day: Option<String>,
    #[serde(default, deserialize_with = "field_expr", skip_serializing_if = "Option::is_none")]
    pub month: Option<String>,
    #[serde(default, deserialize_with = "field_expr", skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<String>,
}

fn field_expr<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Number(n) => n.to_string(),
        Raw::Text(s) => s,
    }))
}

impl CronSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn second(mut self, expr: impl ToString) -> Self {
        self.second = Some(expr.to_string());
        self
    }

    pub fn minute(mut self, expr: impl ToString) -> Self {
        self.minute = Some(expr.to_string());
        self
    }

    pub fn hour(mut self, expr: impl ToString) -> Self {
        self.hour = Some(expr.to_string());
        self
    }

    pub fn day(mut self, expr: impl ToString) -> Self {
        self.day = Some(expr.to_string());
        self
    }

    pub fn month(mut self, expr: impl ToString) -> Self {
        self.month = Some(expr.to_string());
        self
    }

    pub fn day_of_week(mut self, expr: impl ToString) -> Self {
        self.day_of_week = Some(expr.to_string());
        self
    }

    /// Fields in significance order, most significant first.
    fn fields(&self) -> [(Field, Option<&str>); 6] {
        [
            (Field::Month, self.month.as_deref()),
            (Field::Day, self.day.as_deref()),
            (Field::DayOfWeek, self.day_of_week.as_deref()),
            (Field::Hour, self.hour.as_deref()),
            (Field::Minute, self.minute.as_deref()),
            (Field::Second, self.second.as_deref()),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Month,
    Day,
    DayOfWeek,
    Hour,
    Minute,
    Second,
}

impl Field {
    fn name(self) -> &'static str {
        match self {
            Field::Month => "month",
            Field::Day => "day",
            Field::DayOfWeek => "day_of_week",
            Field::Hour => "hour",
            Field::Minute => "minute",
            Field::Second => "second",
        }
    }

    /// Value an omitted, less significant field takes.
    fn minimum(self) -> &'static str {
        match self {
            Field::Month | Field::Day => "1",
            _ => "0",
        }
    }
}

/// Rewrite a Monday-based day_of_week expression as the explicit list of
/// day names the `cron` crate expects (it numbers Sunday as 1).
fn weekday_expr(expr: &str) -> Result<String, SchedulerError> {
    let invalid =
        |detail: String| SchedulerError::InvalidTrigger(format!("day_of_week: {}", detail));
    let weekday = |token: &str| -> Result<usize, SchedulerError> {
        WEEKDAY_NAMES
            .iter()
            .position(|name| *name == token)
            .or_else(|| token.parse::<usize>().ok().filter(|d| *d < 7))
            .ok_or_else(|| invalid(format!("'{}' is not a valid value", token)))
    };

    let mut days = [false; 7];
    for item in expr.split(',') {
        let item = item.trim().to_ascii_lowercase();
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step = step
                    .parse::<usize>()
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| invalid(format!("invalid step in '{}'", item)))?;
                (range, Some(step))
            }
            None => (item.as_str(), None),
        };

        let (first, last) = match range {
            "*" => (0, 6),
            _ => match range.split_once('-') {
                Some((a, b)) => (weekday(a)?, weekday(b)?),
                None => {
                    let day = weekday(range)?;
                    (day, if step.is_some() { 6 } else { day })
                }
            },
        };
        if first > last {
            return Err(invalid(format!("range '{}' is reversed", item)));
        }
        for day in (first..=last).step_by(step.unwrap_or(1)) {
            days[day] = true;
        }
    }

    Ok(days
        .iter()
        .zip(CRON_WEEKDAYS)
        .filter(|(set, _)| **set)
        .map(|(_, name)| name)
        .collect::<Vec<_>>()
        .join(","))
}

/// A validated cron schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    schedule: Schedule,
    expression: String,
    description: String,
}

impl CronSchedule {
    /// Compile and validate a cron spec.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidTrigger` when a field is malformed or
    /// out of range, or when the month/day combination can never occur
    /// (e.g. February 30th).
    pub fn parse(spec: &CronSpec) -> Result<Self, SchedulerError> {
        let fields = spec.fields();
        let first_given = fields.iter().position(|(_, expr)| expr.is_some());

        let mut lowered: [String; 6] = Default::default();
        let mut given = Vec::new();
        for (i, (field, expr)) in fields.iter().enumerate() {
            lowered[i] = match expr {
                Some(expr) => {
                    given.push(format!("{}='{}'", field.name(), expr));
                    let compact: String = expr.split_whitespace().collect();
                    if compact.is_empty() {
                        return Err(SchedulerError::InvalidTrigger(format!(
                            "{}: empty expression",
                            field.name()
                        )));
                    }
                    match field {
                        Field::DayOfWeek if compact != "*" => weekday_expr(&compact)?,
                        _ => compact,
                    }
                }
                None if first_given.is_some_and(|f| i > f) && *field != Field::DayOfWeek => {
                    field.minimum().to_string()
                }
                None => "*".to_string(),
            };
        }

        let description = if given.is_empty() {
            "cron[*]".to_string()
        } else {
            format!("cron[{}]", given.join(", "))
        };

        let [month, day, day_of_week, hour, minute, second] = lowered;
        let expression = format!(
            "{} {} {} {} {} {}",
            second, minute, hour, day, month, day_of_week
        );
        let schedule = Schedule::from_str(&expression).map_err(|e| {
            SchedulerError::InvalidTrigger(format!("{}: {}", description, e))
        })?;

        let possible = schedule
            .months()
            .iter()
            .any(|m| (1..=days_in_month(m)).any(|d| schedule.days_of_month().includes(d)));
        if !possible {
            return Err(SchedulerError::InvalidTrigger(format!(
                "{} never fires",
                description
            )));
        }

        Ok(Self {
            schedule,
            expression,
            description,
        })
    }

    /// The six-field expression handed to the `cron` crate, seconds first.
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Smallest instant strictly after `after` matching every field,
    /// evaluated on the wall clock of `tz`.
    ///
    /// Local times skipped by a DST transition never match; ambiguous local
    /// times resolve to their earliest instant. Returns `None` once the
    /// schedule runs past the last supported year.
    pub fn next_after(&self, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        self.schedule
            .after(&after.with_timezone(&tz))
            .next()
            .map(|next| next.with_timezone(&Utc))
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description)
    }
}

fn days_in_month(month: u32) -> u32 {
    match month {
        2 => 29,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn next(spec: CronSpec, after: &str) -> Option<DateTime<Utc>> {
        CronSchedule::parse(&spec)
            .unwrap()
            .next_after(utc(after), chrono_tz::UTC)
    }

    #[test]
    fn test_daily_at_three() {
        let spec = CronSpec::new().hour(3).minute(0);
        assert_eq!(
            next(spec, "2024-01-01T10:00:00Z"),
            Some(utc("2024-01-02T03:00:00Z"))
        );
    }

    #[test]
    fn test_next_is_strictly_after() {
        let spec = CronSpec::new().hour(3).minute(0);
        assert_eq!(
            next(spec, "2024-01-02T03:00:00Z"),
            Some(utc("2024-01-03T03:00:00Z"))
        );
    }

    #[test]
    fn test_sub_second_now_rounds_up() {
        let spec = CronSpec::new().second("*");
        assert_eq!(
            next(spec, "2024-01-01T10:00:00.400Z"),
            Some(utc("2024-01-01T10:00:01Z"))
        );
    }

    #[test]
    fn test_top_of_every_hour() {
        let spec = CronSpec::new().minute(0);
        assert_eq!(
            next(spec, "2024-01-01T10:15:30Z"),
            Some(utc("2024-01-01T11:00:00Z"))
        );
    }

    #[test]
    fn test_month_rollover() {
        let spec = CronSpec::new().day(31);
        assert_eq!(
            next(spec, "2024-04-15T00:00:00Z"),
            Some(utc("2024-05-31T00:00:00Z"))
        );
    }

    #[test]
    fn test_year_rollover() {
        let spec = CronSpec::new().month(1).day(1);
        assert_eq!(
            next(spec, "2024-06-01T00:00:00Z"),
            Some(utc("2025-01-01T00:00:00Z"))
        );
    }

    #[test]
    fn test_leap_day() {
        let spec = CronSpec::new().month(2).day(29);
        assert_eq!(
            next(spec, "2024-03-01T00:00:00Z"),
            Some(utc("2028-02-29T00:00:00Z"))
        );
    }

    #[test]
    fn test_day_and_weekday_both_required() {
        // Friday the 13th
        let spec = CronSpec::new().day(13).day_of_week("fri");
        assert_eq!(
            next(spec, "2024-01-01T00:00:00Z"),
            Some(utc("2024-09-13T00:00:00Z"))
        );
    }

    #[test]
    fn test_weekly_sunday() {
        // 2024-01-01 is a Monday
        let spec = CronSpec::new().day_of_week("sun").hour(3).minute(0);
        assert_eq!(
            next(spec, "2024-01-01T10:00:00Z"),
            Some(utc("2024-01-07T03:00:00Z"))
        );
    }

    #[test]
    fn test_numeric_weekday_is_monday_based() {
        let spec = CronSpec::new().day_of_week(0).hour(9);
        assert_eq!(
            next(spec, "2024-01-01T10:00:00Z"),
            Some(utc("2024-01-08T09:00:00Z"))
        );
    }

    #[test]
    fn test_lowered_expression() {
        let spec = CronSpec::new().day_of_week("sat-sun").hour(3);
        let schedule = CronSchedule::parse(&spec).unwrap();
        assert_eq!(schedule.expression(), "0 0 3 * * Sat,Sun");

        let schedule = CronSchedule::parse(&CronSpec::new().day_of_week("*/2")).unwrap();
        assert_eq!(schedule.expression(), "0 0 0 * * Mon,Wed,Fri,Sun");

        let schedule = CronSchedule::parse(&CronSpec::new().minute("*/5")).unwrap();
        assert_eq!(schedule.expression(), "0 */5 * * * *");
    }

    #[test]
    fn test_weekday_range_and_list() {
        // 2024-01-05 is a Friday
        let spec = CronSpec::new().day_of_week("0-4").hour(8);
        assert_eq!(
            next(spec, "2024-01-05T09:00:00Z"),
            Some(utc("2024-01-08T08:00:00Z"))
        );

        let spec = CronSpec::new().day_of_week("tue,5").hour(8);
        assert_eq!(
            next(spec, "2024-01-02T09:00:00Z"),
            Some(utc("2024-01-06T08:00:00Z"))
        );
    }

    #[test]
    fn test_step_and_list() {
        let spec = CronSpec::new().second("*/15");
        assert_eq!(
            next(spec, "2024-01-01T10:00:07Z"),
            Some(utc("2024-01-01T10:00:15Z"))
        );

        let spec = CronSpec::new().minute("10,40");
        assert_eq!(
            next(spec, "2024-01-01T10:15:00Z"),
            Some(utc("2024-01-01T10:40:00Z"))
        );

        let spec = CronSpec::new().hour("9-17/4").minute(0);
        assert_eq!(
            next(spec, "2024-01-01T13:30:00Z"),
            Some(utc("2024-01-01T17:00:00Z"))
        );
    }

    #[test]
    fn test_implied_defaults() {
        // month only: first day of the month at midnight
        let spec = CronSpec::new().month("jun");
        assert_eq!(
            next(spec, "2024-01-01T10:00:00Z"),
            Some(utc("2024-06-01T00:00:00Z"))
        );
    }

    #[test]
    fn test_timezone_evaluation() {
        let schedule = CronSchedule::parse(&CronSpec::new().hour(3).minute(0)).unwrap();
        // 10:00 UTC is 19:00 in Seoul; next 03:00 KST is 18:00 UTC
        let next = schedule.next_after(utc("2024-01-01T10:00:00Z"), chrono_tz::Asia::Seoul);
        assert_eq!(next, Some(utc("2024-01-01T18:00:00Z")));
    }

    #[test]
    fn test_dst_gap_is_skipped() {
        // 02:30 does not exist in New York on 2024-03-10
        let schedule = CronSchedule::parse(&CronSpec::new().hour(2).minute(30)).unwrap();
        let next = schedule.next_after(
            utc("2024-03-09T12:00:00Z"),
            chrono_tz::America::New_York,
        );
        assert_eq!(next, Some(utc("2024-03-11T06:30:00Z")));
    }

    #[test]
    fn test_invalid_fields() {
        let bad = [
            CronSpec::new().hour(24),
            CronSpec::new().minute("abc"),
            CronSpec::new().second("*/0"),
            CronSpec::new().day("5-2"),
            CronSpec::new().day_of_week("funday"),
            CronSpec::new().month(13),
            CronSpec::new().minute("1,,2"),
            CronSpec::new().day_of_week("fri-mon"),
            CronSpec::new().day_of_week("7"),
            CronSpec::new().hour(" "),
        ];
        for spec in bad {
            let result = CronSchedule::parse(&spec);
            assert!(
                matches!(result, Err(SchedulerError::InvalidTrigger(_))),
                "expected InvalidTrigger for {:?}",
                spec
            );
        }
    }

    #[test]
    fn test_impossible_date_rejected() {
        let result = CronSchedule::parse(&CronSpec::new().month(2).day(30));
        match result {
            Err(SchedulerError::InvalidTrigger(msg)) => assert!(msg.contains("never fires")),
            other => panic!("Expected InvalidTrigger, got {:?}", other),
        }
    }

    #[test]
    fn test_description_lists_given_fields() {
        let schedule = CronSchedule::parse(&CronSpec::new().hour(3).minute(0)).unwrap();
        assert_eq!(schedule.to_string(), "cron[hour='3', minute='0']");

        let schedule = CronSchedule::parse(&CronSpec::new()).unwrap();
        assert_eq!(schedule.to_string(), "cron[*]");
    }

    #[test]
    fn test_spec_accepts_numbers_and_strings() {
        let spec: CronSpec =
            serde_json::from_str(r#"{"hour": 3, "minute": "0", "day_of_week": "sun"}"#).unwrap();
        assert_eq!(spec, CronSpec::new().hour(3).minute(0).day_of_week("sun"));
    }
}
