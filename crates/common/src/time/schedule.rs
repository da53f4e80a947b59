//! Human-readable recurring schedules
//!
//! A schedule is a short phrase of lowercase, space-separated tokens:
//!
//! | Phrase | Meaning |
//! |--------|---------|
//! | `every 30 seconds` | every 30 s, first run 30 s from now |
//! | `every 5 hours` | every 5 h |
//! | `every 1 day 03:30` | daily at 03:30 |
//! | `monday 09:00` | weekly on Monday at 09:00 |
//! | `friday` | weekly on Friday at 00:00 |
//!
//! `every` is optional, the interval defaults to `1`, and a bare `HH:MM`
//! implies days. A weekday forces a weekly unit and an interval of `1`.
//!
//! After each run the next run is `last_run + period`. Timed daily and weekly
//! schedules synthesise an initial `last_run` in the past so the first
//! `next_run` lands on the requested wall-clock time.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveTime, TimeDelta, TimeZone, Weekday};
use thiserror::Error;

/// Error returned when a schedule phrase cannot be parsed
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("task format not valid: {format}")]
    InvalidFormat {
        /// The phrase as supplied
        format: String,
        /// Which rule rejected it
        reason: &'static str,
    },
}

impl ScheduleError {
    fn invalid(format: &str, reason: &'static str) -> Self {
        Self::InvalidFormat { format: format.to_string(), reason }
    }

    /// Which rule rejected the phrase
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidFormat { reason, .. } => reason,
        }
    }
}

/// Unit of a schedule interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TimeUnit {
    /// No unit parsed; never valid on a built schedule
    #[default]
    Never,
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
}

impl TimeUnit {
    /// Length of one unit in seconds.
    pub fn seconds(self) -> u64 {
        match self {
            Self::Never => 0,
            Self::Seconds => 1,
            Self::Minutes => 60,
            Self::Hours => 3_600,
            Self::Days => 86_400,
            Self::Weeks => 604_800,
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "second" | "seconds" => Some(Self::Seconds),
            "minute" | "minutes" => Some(Self::Minutes),
            "hour" | "hours" => Some(Self::Hours),
            "day" | "days" => Some(Self::Days),
            "week" | "weeks" => Some(Self::Weeks),
            _ => None,
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Never => "never",
            Self::Seconds => "seconds",
            Self::Minutes => "minutes",
            Self::Hours => "hours",
            Self::Days => "days",
            Self::Weeks => "weeks",
        };
        f.write_str(s)
    }
}

/// A parsed schedule plus its run bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    format: String,
    interval: u64,
    unit: TimeUnit,
    start_day: Option<Weekday>,
    at: Option<NaiveTime>,
    last_run: Option<DateTime<Local>>,
    next_run: DateTime<Local>,
    run_count: u64,
    period: Duration,
}

impl Schedule {
    /// Parse a schedule relative to the current local time.
    ///
    /// # Errors
    /// Returns [`ScheduleError::InvalidFormat`] when the phrase is not valid.
    pub fn parse(format: &str) -> Result<Self, ScheduleError> {
        Self::parse_at(format, Local::now())
    }

    /// Parse a schedule relative to `now`.
    ///
    /// # Errors
    /// Returns [`ScheduleError::InvalidFormat`] when the phrase is not valid.
    pub fn parse_at(format: &str, now: DateTime<Local>) -> Result<Self, ScheduleError> {
        let tokens = Tokens::parse(format)?;

        let mut unit = tokens.unit;
        if unit == TimeUnit::Never {
            if tokens.at.is_none() {
                return Err(ScheduleError::invalid(format, "missing unit"));
            }
            unit = TimeUnit::Days;
        }
        if tokens.at.is_some() && !matches!(unit, TimeUnit::Days | TimeUnit::Weeks) {
            return Err(ScheduleError::invalid(format, "time of day requires days or weeks"));
        }

        let interval = tokens.interval.unwrap_or(1);
        if tokens.start_day.is_some() && interval != 1 {
            return Err(ScheduleError::invalid(format, "weekday requires an interval of 1"));
        }

        let period = interval
            .checked_mul(unit.seconds())
            .map(Duration::from_secs)
            .ok_or_else(|| ScheduleError::invalid(format, "interval too large"))?;
        let step =
            TimeDelta::from_std(period).map_err(|_| ScheduleError::invalid(format, "interval too large"))?;

        let mut start_day = tokens.start_day;
        let mut at = tokens.at;
        if start_day.is_some() && at.is_none() {
            at = Some(NaiveTime::MIN);
        }
        if unit == TimeUnit::Weeks && at.is_some() && start_day.is_none() {
            start_day = Some(now.weekday());
        }

        let last_run = match (unit, start_day, at) {
            (TimeUnit::Weeks, Some(day), Some(time)) => Some(last_weekday_at(now, day, time)),
            (TimeUnit::Days, _, Some(time)) => Some(last_daily_at(now, time)),
            _ => None,
        };

        let base = last_run.unwrap_or(now);
        let next_run = base
            .checked_add_signed(step)
            .ok_or_else(|| ScheduleError::invalid(format, "interval too large"))?;

        Ok(Self {
            format: format.to_string(),
            interval,
            unit,
            start_day,
            at,
            last_run,
            next_run,
            run_count: 0,
            period,
        })
    }

    /// The phrase this schedule was parsed from.
    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    pub fn start_day(&self) -> Option<Weekday> {
        self.start_day
    }

    /// Time of day, for daily and weekly schedules
    pub fn at(&self) -> Option<NaiveTime> {
        self.at
    }

    pub fn last_run(&self) -> Option<DateTime<Local>> {
        self.last_run
    }

    pub fn next_run(&self) -> DateTime<Local> {
        self.next_run
    }

    /// Number of runs started since the schedule was built.
    pub fn run_count(&self) -> u64 {
        self.run_count
    }

    /// `interval` times the unit length.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// `true` once `now` is strictly past the next run.
    pub fn is_due(&self, now: DateTime<Local>) -> bool {
        now > self.next_run
    }

    /// Record that a run started at `now`.
    pub fn mark_started(&mut self, now: DateTime<Local>) {
        self.last_run = Some(now);
        self.run_count += 1;
    }

    /// Advance `next_run` to one period after the last run (or `now` when
    /// the schedule never ran).
    pub fn schedule_next(&mut self, now: DateTime<Local>) {
        let base = self.last_run.unwrap_or(now);
        let step = TimeDelta::from_std(self.period).unwrap_or(TimeDelta::MAX);
        self.next_run = base.checked_add_signed(step).unwrap_or(base);
    }

    /// Force the next run to a specific moment.
    pub fn set_next_run(&mut self, next_run: DateTime<Local>) {
        self.next_run = next_run;
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format)
    }
}

#[derive(Default)]
struct Tokens {
    every: bool,
    interval: Option<u64>,
    unit: TimeUnit,
    start_day: Option<Weekday>,
    at: Option<NaiveTime>,
}

impl Tokens {
    fn parse(format: &str) -> Result<Self, ScheduleError> {
        let lowered = format.to_lowercase();
        let mut tokens = Self::default();
        let mut seen_any = false;

        for token in lowered.split_whitespace() {
            seen_any = true;

            if token == "every" {
                if tokens.every {
                    return Err(ScheduleError::invalid(format, "repeated 'every'"));
                }
                tokens.every = true;
            } else if token.bytes().all(|b| b.is_ascii_digit()) {
                if tokens.interval.is_some() {
                    return Err(ScheduleError::invalid(format, "repeated interval"));
                }
                let interval: u64 =
                    token.parse().map_err(|_| ScheduleError::invalid(format, "bad interval"))?;
                if interval == 0 {
                    return Err(ScheduleError::invalid(format, "interval must be at least 1"));
                }
                tokens.interval = Some(interval);
            } else if let Some(unit) = TimeUnit::from_token(token) {
                tokens.set_unit(format, unit)?;
            } else if let Ok(day) = token.parse::<Weekday>() {
                if token.len() < 6 {
                    // chrono also accepts "mon", "tue"; only full names are grammar
                    return Err(ScheduleError::invalid(format, "unknown token"));
                }
                if tokens.start_day.is_some() {
                    return Err(ScheduleError::invalid(format, "repeated weekday"));
                }
                tokens.start_day = Some(day);
                tokens.set_unit(format, TimeUnit::Weeks)?;
            } else if token.contains(':') {
                if tokens.at.is_some() {
                    return Err(ScheduleError::invalid(format, "repeated time of day"));
                }
                tokens.at = Some(parse_time_of_day(token).ok_or_else(|| {
                    ScheduleError::invalid(format, "time of day must be HH:MM")
                })?);
            } else {
                return Err(ScheduleError::invalid(format, "unknown token"));
            }
        }

        if !seen_any {
            return Err(ScheduleError::invalid(format, "empty schedule"));
        }
        Ok(tokens)
    }

    fn set_unit(&mut self, format: &str, unit: TimeUnit) -> Result<(), ScheduleError> {
        match self.unit {
            TimeUnit::Never => {
                self.unit = unit;
                Ok(())
            }
            // a weekday and an explicit "week" may appear together
            current if current == unit && unit == TimeUnit::Weeks => Ok(()),
            _ => Err(ScheduleError::invalid(format, "conflicting units")),
        }
    }
}

fn parse_time_of_day(token: &str) -> Option<NaiveTime> {
    let (hour, minute) = token.split_once(':')?;
    if hour.is_empty() || hour.len() > 2 || minute.len() != 2 {
        return None;
    }
    if !hour.bytes().chain(minute.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn local_at(date: NaiveDate, time: NaiveTime) -> DateTime<Local> {
    let naive = date.and_time(time);
    Local
        .from_local_datetime(&naive)
        .earliest()
        .unwrap_or_else(|| Local.from_utc_datetime(&naive))
}

/// Today at `time`, or yesterday when that moment is still ahead of `now`.
fn last_daily_at(now: DateTime<Local>, time: NaiveTime) -> DateTime<Local> {
    let today = now.date_naive();
    let candidate = local_at(today, time);
    if candidate > now {
        today.pred_opt().map_or(candidate, |yesterday| local_at(yesterday, time))
    } else {
        candidate
    }
}

/// Most recent `day` at `time` that is not after `now`.
fn last_weekday_at(now: DateTime<Local>, day: Weekday, time: NaiveTime) -> DateTime<Local> {
    let today = now.date_naive();
    let back = (now.weekday().num_days_from_monday() + 7 - day.num_days_from_monday()) % 7;
    let date = today - TimeDelta::days(i64::from(back));
    let candidate = local_at(date, time);
    if candidate > now {
        local_at(date - TimeDelta::days(7), time)
    } else {
        candidate
    }
}
