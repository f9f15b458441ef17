//! Trigger descriptors and fire-time computation.
//!
//! A [`TriggerSpec`] is the serializable description supplied at
//! registration. It is compiled into a [`Trigger`] once, which rejects
//! malformed descriptors before the job ever becomes active.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::cron::{CronSchedule, CronSpec};
use crate::SchedulerError;

/// Longest accepted interval period (100 years).
const MAX_INTERVAL_SECS: u64 = 100 * 366 * 24 * 60 * 60;

/// Fixed-period trigger parameters.
///
/// At least one component must be non-zero. Without `start_date` the first
/// fire is one period after registration; with it, fires are aligned to
/// `start_date + k * period`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSpec {
    #[serde(default)]
    pub weeks: u64,
    #[serde(default)]
    pub days: u64,
    #[serde(default)]
    pub hours: u64,
    #[serde(default)]
    pub minutes: u64,
    #[serde(default)]
    pub seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
}

impl IntervalSpec {
    pub fn seconds(seconds: u64) -> Self {
        Self {
            seconds,
            ..Default::default()
        }
    }

    pub fn minutes(minutes: u64) -> Self {
        Self {
            minutes,
            ..Default::default()
        }
    }

    pub fn hours(hours: u64) -> Self {
        Self {
            hours,
            ..Default::default()
        }
    }

    pub fn days(days: u64) -> Self {
        Self {
            days,
            ..Default::default()
        }
    }

    pub fn weeks(weeks: u64) -> Self {
        Self {
            weeks,
            ..Default::default()
        }
    }

    pub fn starting_at(mut self, start: DateTime<Utc>) -> Self {
        self.start_date = Some(start);
        self
    }

    /// Total period in seconds, or `None` on overflow.
    fn total_seconds(&self) -> Option<u64> {
        let parts = [
            (self.weeks, 7 * 24 * 60 * 60),
            (self.days, 24 * 60 * 60),
            (self.hours, 60 * 60),
            (self.minutes, 60),
            (self.seconds, 1),
        ];
        parts.iter().try_fold(0u64, |acc, (count, unit)| {
            count.checked_mul(*unit).and_then(|s| acc.checked_add(s))
        })
    }
}

/// Serializable trigger descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// Fire repeatedly at a fixed period
    Interval(IntervalSpec),
    /// Fire whenever the wall clock matches the cron fields
    Cron(CronSpec),
    /// Fire once at an absolute instant
    Date { run_date: DateTime<Utc> },
}

impl TriggerSpec {
    pub fn interval(spec: IntervalSpec) -> Self {
        TriggerSpec::Interval(spec)
    }

    pub fn cron(spec: CronSpec) -> Self {
        TriggerSpec::Cron(spec)
    }

    pub fn date(run_date: DateTime<Utc>) -> Self {
        TriggerSpec::Date { run_date }
    }
}

/// A validated trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Interval {
        period: Duration,
        start_date: Option<DateTime<Utc>>,
    },
    Cron(CronSchedule),
    Date(DateTime<Utc>),
}

impl Trigger {
    /// Compile a trigger descriptor.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidTrigger` for an all-zero or
    /// overflowing interval, or a malformed cron spec.
    pub fn from_spec(spec: &TriggerSpec) -> Result<Self, SchedulerError> {
        match spec {
            TriggerSpec::Interval(interval) => {
                let total = interval.total_seconds().ok_or_else(|| {
                    SchedulerError::InvalidTrigger("interval period overflows".to_string())
                })?;
                if total == 0 {
                    return Err(SchedulerError::InvalidTrigger(
                        "interval needs at least one non-zero component".to_string(),
                    ));
                }
                if total > MAX_INTERVAL_SECS {
                    return Err(SchedulerError::InvalidTrigger(format!(
                        "interval of {}s exceeds the maximum of {}s",
                        total, MAX_INTERVAL_SECS
                    )));
                }
                Ok(Trigger::Interval {
                    period: Duration::seconds(total as i64),
                    start_date: interval.start_date,
                })
            }
            TriggerSpec::Cron(cron) => Ok(Trigger::Cron(CronSchedule::parse(cron)?)),
            TriggerSpec::Date { run_date } => Ok(Trigger::Date(*run_date)),
        }
    }

    /// First fire time for a job registered (or resumed) at `now`.
    ///
    /// A date in the past is returned unchanged so the job still fires once.
    pub fn first_fire(&self, now: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Interval {
                period,
                start_date: Some(start),
            } if *start <= now => {
                let period_ms = period.num_milliseconds();
                let elapsed_ms = (now - *start).num_milliseconds();
                let periods = elapsed_ms / period_ms + 1;
                Some(*start + Duration::milliseconds(periods * period_ms))
            }
            Trigger::Interval {
                start_date: Some(start),
                ..
            } => Some(*start),
            Trigger::Interval { period, .. } => Some(now + *period),
            Trigger::Cron(schedule) => schedule.next_after(now, tz),
            Trigger::Date(run_date) => Some(*run_date),
        }
    }

    /// Next fire time after a firing at `fired_at`; `None` once exhausted.
    ///
    /// Intervals with a `start_date` stay on their `start_date + k * period`
    /// grid; plain intervals restart the period from `fired_at`.
    pub fn next_fire(&self, fired_at: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        match self {
            Trigger::Interval {
                start_date: Some(_),
                ..
            } => self.first_fire(fired_at, tz),
            Trigger::Interval { period, .. } => Some(fired_at + *period),
            Trigger::Cron(schedule) => schedule.next_after(fired_at, tz),
            Trigger::Date(_) => None,
        }
    }

    /// Number of trigger slots from `first` up to and including `now`,
    /// capped at `limit`. Slots before `cutoff` are walked but not counted.
    pub(crate) fn slots_until(
        &self,
        first: DateTime<Utc>,
        now: DateTime<Utc>,
        cutoff: Option<DateTime<Utc>>,
        tz: Tz,
        limit: usize,
    ) -> usize {
        let mut count = 0;
        let mut slot = Some(first);
        while let Some(at) = slot {
            if at > now || count >= limit {
                break;
            }
            if cutoff.map_or(true, |cutoff| at >= cutoff) {
                count += 1;
            }
            slot = self.next_fire(at, tz);
        }
        count
    }

    pub fn is_one_shot(&self) -> bool {
        matches!(self, Trigger::Date(_))
    }

    /// Human readable description, e.g. `interval[0:05:00]`.
    pub fn describe(&self, tz: Tz) -> String {
        match self {
            Trigger::Interval { period, .. } => {
                let total = period.num_seconds();
                let days = total / 86_400;
                let rem = total % 86_400;
                let clock = format!("{}:{:02}:{:02}", rem / 3600, rem % 3600 / 60, rem % 60);
                match days {
                    0 => format!("interval[{}]", clock),
                    1 => format!("interval[1 day, {}]", clock),
                    n => format!("interval[{} days, {}]", n, clock),
                }
            }
            Trigger::Cron(schedule) => schedule.to_string(),
            Trigger::Date(run_date) => {
                format!("date[{}]", run_date.with_timezone(&tz).to_rfc3339())
            }
        }
    }
}
