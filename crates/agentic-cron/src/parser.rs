//! Natural-language schedule parsing.
//!
//! Recognized phrases, checked in order (first match wins):
//!
//! 1. `in N minutes` / `in N hours` (one-shot)
//! 2. `at H[:MM][am|pm]` (daily)
//! 3. anything mentioning `noon` or `midnight` (daily)
//! 4. `every hour`
//! 5. `every day at H[:MM][am|pm]`
//! 6. `every <weekday> at H[:MM][am|pm]`

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, TimeZone, Timelike, Utc, Weekday};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::{CronError, Result, ScheduleType};

/// Longest accepted relative offset.
const MAX_OFFSET_DAYS: i64 = 36_525;

const TIME: &str = r"(\d{1,2})(?::(\d{2}))?(?:\s*(am|pm))?\b";

static IN_MINUTES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^in\s+(\d+)\s+minutes?\b").expect("constant regex pattern is valid")
});

static IN_HOURS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^in\s+(\d+)\s+hours?\b").expect("constant regex pattern is valid"));

static AT_TIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^at\s+{TIME}")).expect("constant regex pattern is valid"));

static EVERY_HOUR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^every\s+hour\b").expect("constant regex pattern is valid"));

static EVERY_DAY_AT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^every\s+day\s+at\s+{TIME}")).expect("constant regex pattern is valid")
});

static EVERY_WEEKDAY_AT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"^every\s+(sunday|monday|tuesday|wednesday|thursday|friday|saturday)\s+at\s+{TIME}"
    ))
    .expect("constant regex pattern is valid")
});

/// Unit of a relative one-shot offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetUnit {
    Minutes,
    Hours,
}

impl OffsetUnit {
    fn as_str(self) -> &'static str {
        match self {
            Self::Minutes => "minutes",
            Self::Hours => "hours",
        }
    }

    fn duration(self, amount: u32) -> Option<Duration> {
        match self {
            Self::Minutes => Duration::try_minutes(i64::from(amount)),
            Self::Hours => Duration::try_hours(i64::from(amount)),
        }
    }
}

/// Structured timing of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Fire once, `amount` units after scheduling.
    After { amount: u32, unit: OffsetUnit },
    /// Every hour at minute 0.
    Hourly,
    /// Every day at a fixed local time.
    Daily { hour: u32, minute: u32 },
    /// Every week on `weekday` at a fixed local time.
    Weekly {
        weekday: Weekday,
        hour: u32,
        minute: u32,
    },
}

/// Result of parsing a schedule phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleDescriptor {
    pub schedule: Schedule,
    /// Human-readable rendering, stored as the task's `display_schedule`.
    pub display: String,
}

impl ScheduleDescriptor {
    fn new(schedule: Schedule, display: impl Into<String>) -> Self {
        Self {
            schedule,
            display: display.into(),
        }
    }

    pub fn schedule_type(&self) -> ScheduleType {
        match self.schedule {
            Schedule::After { .. } => ScheduleType::OneShot,
            _ => ScheduleType::Recurring,
        }
    }

    /// Expression understood by the host executor: a 5-field cron
    /// expression, or an `at` time spec for one-shot tasks.
    pub fn host_expression(&self) -> String {
        match self.schedule {
            Schedule::After { amount, unit } => format!("now + {amount} {}", unit.as_str()),
            Schedule::Hourly => "0 * * * *".to_string(),
            Schedule::Daily { hour, minute } => format!("{minute} {hour} * * *"),
            Schedule::Weekly {
                weekday,
                hour,
                minute,
            } => format!("{minute} {hour} * * {}", weekday.num_days_from_sunday()),
        }
    }

    /// Next fire time strictly after `now`, in naive local wall-clock time.
    pub fn next_fire(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        match self.schedule {
            Schedule::After { amount, unit } => now.checked_add_signed(unit.duration(amount)?),
            Schedule::Hourly => {
                let top = now.date().and_hms_opt(now.hour(), 0, 0)?;
                top.checked_add_signed(Duration::hours(1))
            }
            Schedule::Daily { hour, minute } => {
                let candidate = now.date().and_hms_opt(hour, minute, 0)?;
                if candidate > now {
                    Some(candidate)
                } else {
                    candidate.checked_add_signed(Duration::days(1))
                }
            }
            Schedule::Weekly {
                weekday,
                hour,
                minute,
            } => {
                let days_ahead = (7 + weekday.num_days_from_monday()
                    - now.weekday().num_days_from_monday())
                    % 7;
                let candidate = now
                    .date()
                    .checked_add_signed(Duration::days(i64::from(days_ahead)))?
                    .and_hms_opt(hour, minute, 0)?;
                if candidate > now {
                    Some(candidate)
                } else {
                    candidate.checked_add_signed(Duration::days(7))
                }
            }
        }
    }

    /// Advisory fire time in UTC.
    ///
    /// One-shot offsets are added to the instant `now`. Recurring times are
    /// evaluated against the wall clock of `now`'s time zone.
    pub fn next_fire_at<Tz: TimeZone>(&self, now: DateTime<Tz>) -> Option<DateTime<Utc>> {
        if let Schedule::After { amount, unit } = self.schedule {
            return now
                .with_timezone(&Utc)
                .checked_add_signed(unit.duration(amount)?);
        }
        let naive = self.next_fire(now.naive_local())?;
        resolve_local(&now.timezone(), naive).map(|t| t.with_timezone(&Utc))
    }
}

/// Map a wall-clock time to an instant. A repeated time takes its first
/// occurrence; a time skipped by a DST jump moves forward to the first
/// minute that exists.
fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    let mut candidate = naive;
    // Skipped ranges never exceed one day.
    for _ in 0..=24 * 60 {
        if let Some(t) = tz.from_local_datetime(&candidate).earliest() {
            return Some(t);
        }
        candidate = candidate.checked_add_signed(Duration::minutes(1))?;
    }
    None
}

/// Parse a natural-language schedule phrase.
pub fn parse(text: &str) -> Result<ScheduleDescriptor> {
    let phrase = text.trim().to_lowercase();
    let unparsable = || CronError::UnparsableSchedule(text.to_string());

    if let Some(caps) = IN_MINUTES.captures(&phrase) {
        let amount = parse_offset(&caps, OffsetUnit::Minutes).ok_or_else(unparsable)?;
        return Ok(ScheduleDescriptor::new(
            Schedule::After {
                amount,
                unit: OffsetUnit::Minutes,
            },
            format!("in {amount} minutes"),
        ));
    }

    if let Some(caps) = IN_HOURS.captures(&phrase) {
        let amount = parse_offset(&caps, OffsetUnit::Hours).ok_or_else(unparsable)?;
        return Ok(ScheduleDescriptor::new(
            Schedule::After {
                amount,
                unit: OffsetUnit::Hours,
            },
            format!("in {amount} hours"),
        ));
    }

    if let Some(caps) = AT_TIME.captures(&phrase) {
        let (hour, minute) = parse_time(&caps, 1).ok_or_else(unparsable)?;
        return Ok(ScheduleDescriptor::new(
            Schedule::Daily { hour, minute },
            format!("at {hour:02}:{minute:02}"),
        ));
    }

    if phrase.contains("noon") {
        return Ok(ScheduleDescriptor::new(
            Schedule::Daily {
                hour: 12,
                minute: 0,
            },
            "every day at noon",
        ));
    }
    if phrase.contains("midnight") {
        return Ok(ScheduleDescriptor::new(
            Schedule::Daily { hour: 0, minute: 0 },
            "every day at midnight",
        ));
    }

    if EVERY_HOUR.is_match(&phrase) {
        return Ok(ScheduleDescriptor::new(Schedule::Hourly, "every hour"));
    }

    if let Some(caps) = EVERY_DAY_AT.captures(&phrase) {
        let (hour, minute) = parse_time(&caps, 1).ok_or_else(unparsable)?;
        return Ok(ScheduleDescriptor::new(
            Schedule::Daily { hour, minute },
            format!("every day at {hour:02}:{minute:02}"),
        ));
    }

    if let Some(caps) = EVERY_WEEKDAY_AT.captures(&phrase) {
        let day = &caps[1];
        let weekday: Weekday = day.parse().map_err(|_| unparsable())?;
        let (hour, minute) = parse_time(&caps, 2).ok_or_else(unparsable)?;
        return Ok(ScheduleDescriptor::new(
            Schedule::Weekly {
                weekday,
                hour,
                minute,
            },
            format!("every {day} at {hour:02}:{minute:02}"),
        ));
    }

    Err(unparsable())
}

/// Positive offsets up to [`MAX_OFFSET_DAYS`].
fn parse_offset(caps: &Captures<'_>, unit: OffsetUnit) -> Option<u32> {
    let amount: u32 = caps[1].parse().ok()?;
    let offset = unit.duration(amount)?;
    (amount > 0 && offset <= Duration::days(MAX_OFFSET_DAYS)).then_some(amount)
}

/// Read `H[:MM][am|pm]` starting at capture group `first` and convert to
/// 24-hour time.
fn parse_time(caps: &Captures<'_>, first: usize) -> Option<(u32, u32)> {
    let mut hour: u32 = caps.get(first)?.as_str().parse().ok()?;
    let minute: u32 = match caps.get(first + 1) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    if minute > 59 {
        return None;
    }

    match caps.get(first + 2).map(|m| m.as_str()) {
        Some(period) => {
            if !(1..=12).contains(&hour) {
                return None;
            }
            if period == "am" && hour == 12 {
                hour = 0;
            } else if period == "pm" && hour != 12 {
                hour += 12;
            }
        }
        None if hour > 23 => return None,
        None => {}
    }
    Some((hour, minute))
}
