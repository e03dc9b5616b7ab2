use chrono::{Datelike, NaiveDate};
use ulid::Ulid;

use crate::limits::{MAX_BOOKING_HORIZON_DAYS, MIN_BOOKING_MINUTES};
use crate::model::*;

use super::error::{ScheduleViolation, ValidationError};
use super::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResult {
    NoConflict,
    Conflict(Ulid),
}

/// A booking request as submitted, times still unparsed.
#[derive(Debug, Clone, Copy)]
pub struct SlotRequest<'a> {
    pub court_id: Ulid,
    pub date: NaiveDate,
    pub start: &'a str,
    pub end: &'a str,
    /// The reservation being edited, if any. It never conflicts with itself.
    pub exclude: Option<Ulid>,
}

/// The schedule a request is checked against.
#[derive(Debug, Clone, Copy)]
pub struct CourtRules<'a> {
    pub window: &'a OperatingWindow,
    pub blocked: &'a [BlockedDate],
}

/// Parse `HH:MM` bounds and enforce `end > start` and the minimum duration.
pub fn parse_range(start: &str, end: &str) -> Result<TimeRange, ValidationError> {
    let start = parse_hhmm(start)?;
    let end = parse_hhmm(end)?;
    if end <= start {
        return Err(ValidationError::EndNotAfterStart { start, end });
    }
    let range = TimeRange::new(start, end);
    if range.duration() < MIN_BOOKING_MINUTES {
        return Err(ValidationError::TooShort {
            minutes: range.duration(),
            min: MIN_BOOKING_MINUTES,
        });
    }
    Ok(range)
}

/// First non-cancelled reservation overlapping `candidate`, skipping `exclude`.
pub fn find_conflict<'a>(
    candidate: &Interval,
    existing: impl IntoIterator<Item = &'a Reservation>,
    exclude: Option<Ulid>,
) -> ConflictResult {
    existing
        .into_iter()
        .filter(|r| r.state.is_active() && Some(r.id) != exclude)
        .find(|r| r.interval().overlaps(candidate))
        .map_or(ConflictResult::NoConflict, |r| ConflictResult::Conflict(r.id))
}

/// Decide whether `request` may be written. Checks run in a fixed order and the
/// first failure is returned; on success the parsed range comes back.
///
/// `existing` holds the court's reservations for `request.date`. Cancelled
/// entries are ignored here, so callers may pass the whole day.
pub fn check_conflict(
    request: &SlotRequest<'_>,
    rules: &CourtRules<'_>,
    existing: &[Reservation],
    today: NaiveDate,
) -> Result<TimeRange, EngineError> {
    let range = parse_range(request.start, request.end)?;

    let date = request.date;
    if date < today {
        return Err(ValidationError::PastDate(date).into());
    }
    if (date - today).num_days() > MAX_BOOKING_HORIZON_DAYS {
        return Err(ValidationError::BeyondHorizon(date).into());
    }

    if !rules.window.is_operating_day(date) {
        return Err(ScheduleViolation::ClosedWeekday(date.weekday()).into());
    }
    if let Some(blocked) = rules.blocked.iter().find(|b| b.date == date) {
        return Err(ScheduleViolation::Blocked {
            date,
            reason: blocked.reason.clone(),
        }
        .into());
    }
    let window = rules.window.range();
    if !window.contains_range(&range) {
        return Err(ScheduleViolation::OutsideHours {
            requested: range,
            window,
        }
        .into());
    }

    let candidate = Interval {
        court_id: request.court_id,
        date,
        range,
    };
    match find_conflict(&candidate, existing, request.exclude) {
        ConflictResult::Conflict(id) => Err(EngineError::SlotConflict(id)),
        ConflictResult::NoConflict => Ok(range),
    }
}
