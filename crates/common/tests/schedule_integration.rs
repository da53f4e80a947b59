//! Integration tests for the schedule grammar
//!
//! Exercises parsing together with the run bookkeeping a task driver
//! performs: mark a run, advance, check due-ness.

#![cfg(feature = "foundation")]

use std::time::Duration;

use chrono::{DateTime, Datelike, Local, NaiveTime, TimeDelta, TimeZone, Weekday};
use porter_common::time::{Schedule, ScheduleError, TimeUnit};

fn at(day: u32, hour: u32, minute: u32) -> DateTime<Local> {
    // July 2024: the 1st is a Monday
    Local.with_ymd_and_hms(2024, 7, day, hour, minute, 0).single().expect("unambiguous local time")
}

/// Validates the documented example phrases.
///
/// # Test Steps
/// 1. Parse `every 5 hours`, `monday 09:00` and `every 30 seconds`
/// 2. Verify interval, unit, weekday and time of day
/// 3. Verify `every 5 days bad` is rejected with the literal in the message
#[test]
fn test_documented_examples() {
    let now = at(3, 12, 0);

    let hours = Schedule::parse_at("every 5 hours", now).expect("valid phrase");
    assert_eq!(hours.interval(), 5);
    assert_eq!(hours.unit(), TimeUnit::Hours);

    let weekly = Schedule::parse_at("monday 09:00", now).expect("valid phrase");
    assert_eq!(weekly.unit(), TimeUnit::Weeks);
    assert_eq!(weekly.start_day(), Some(Weekday::Mon));
    assert_eq!(weekly.at(), NaiveTime::from_hms_opt(9, 0, 0));

    let seconds = Schedule::parse_at("every 30 seconds", now).expect("valid phrase");
    assert_eq!(seconds.period(), Duration::from_secs(30));

    let err = Schedule::parse_at("every 5 days bad", now).expect_err("trailing junk");
    assert!(matches!(err, ScheduleError::InvalidFormat { ref format, .. } if format == "every 5 days bad"));
    assert_eq!(err.to_string(), "task format not valid: every 5 days bad");
}

/// Validates that each completed run moves the next run one period past
/// the run's start, for every unit.
///
/// # Test Steps
/// 1. For each unit, parse `every 3 <unit>`
/// 2. Simulate three runs, each starting a little after it became due
/// 3. Verify `next_run == last_run + 3 * unit` after every run
#[test]
fn test_next_run_monotonic_across_units() {
    let now = at(3, 12, 0);

    for (phrase, unit_secs) in [
        ("every 3 seconds", 1),
        ("every 3 minutes", 60),
        ("every 3 hours", 3_600),
        ("every 3 days", 86_400),
        ("every 3 weeks", 604_800),
    ] {
        let mut schedule = Schedule::parse_at(phrase, now).expect("valid phrase");
        let period = TimeDelta::seconds(3 * unit_secs);

        for run in 1..=3 {
            let started = schedule.next_run() + TimeDelta::milliseconds(5);
            assert!(schedule.is_due(started), "{phrase}: run {run} should be due");

            schedule.mark_started(started);
            schedule.schedule_next(started);

            assert_eq!(schedule.run_count(), run);
            assert_eq!(schedule.next_run(), started + period, "{phrase}: run {run}");
            assert!(!schedule.is_due(started));
        }
    }
}

/// Validates weekly schedules land on the requested weekday for every
/// starting day of the week.
///
/// # Test Steps
/// 1. For each day of a week, parse `thursday 07:15`
/// 2. Verify the first next run is a Thursday at 07:15, strictly after now,
///    and at most one week away
#[test]
fn test_weekly_first_run_from_any_day() {
    for day in 1..=7 {
        let now = at(day, 10, 0);
        let schedule = Schedule::parse_at("thursday 07:15", now).expect("valid phrase");

        let next = schedule.next_run();
        assert_eq!(next.weekday(), Weekday::Thu);
        assert_eq!(next.time(), NaiveTime::from_hms_opt(7, 15, 0).expect("valid time"));
        assert!(next > now);
        assert!(next - now <= TimeDelta::weeks(1));
    }
}

/// Validates a daily schedule keeps its wall-clock time after a late run.
///
/// The next run follows the last run, so a run that started late shifts
/// the following run by the same amount.
#[test]
fn test_daily_late_run_shifts_next_run() {
    let now = at(3, 1, 0);
    let mut schedule = Schedule::parse_at("every 1 day 03:30", now).expect("valid phrase");
    assert_eq!(schedule.next_run(), at(3, 3, 30));

    let late = at(3, 3, 40);
    schedule.mark_started(late);
    schedule.schedule_next(late);

    assert_eq!(schedule.next_run(), at(4, 3, 40));
}
