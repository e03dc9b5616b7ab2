use chrono::{NaiveDate, Weekday};
use ulid::Ulid;

use crate::model::{format_hhmm, Minutes, ReservationState, TimeRange};

/// Malformed input. Fixable by resubmitting a corrected request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    MalformedTime(String),
    MalformedDate(String),
    MalformedWeekday(String),
    UnknownState(String),
    EndNotAfterStart { start: Minutes, end: Minutes },
    TooShort { minutes: Minutes, min: Minutes },
    PastDate(NaiveDate),
    BeyondHorizon(NaiveDate),
    InvalidWindow { open: Minutes, close: Minutes },
    InvalidSlotSize(Minutes),
    InvalidDateRange { from: NaiveDate, to: NaiveDate },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::MalformedTime(s) => write!(f, "malformed time {s:?}, expected HH:MM"),
            ValidationError::MalformedDate(s) => {
                write!(f, "malformed date {s:?}, expected YYYY-MM-DD")
            }
            ValidationError::MalformedWeekday(s) => write!(f, "malformed weekday {s:?}"),
            ValidationError::UnknownState(s) => write!(f, "unknown reservation state {s:?}"),
            ValidationError::EndNotAfterStart { start, end } => write!(
                f,
                "end {} must be after start {}",
                format_hhmm(*end),
                format_hhmm(*start)
            ),
            ValidationError::TooShort { minutes, min } => {
                write!(f, "reservation of {minutes} minutes is shorter than {min} minutes")
            }
            ValidationError::PastDate(d) => write!(f, "date {d} is in the past"),
            ValidationError::BeyondHorizon(d) => write!(f, "date {d} is too far ahead"),
            ValidationError::InvalidWindow { open, close } => write!(
                f,
                "operating window {}-{} is empty or exceeds the day",
                format_hhmm(*open),
                format_hhmm(*close)
            ),
            ValidationError::InvalidSlotSize(m) => write!(f, "invalid slot size: {m} minutes"),
            ValidationError::InvalidDateRange { from, to } => {
                write!(f, "date range {from}..{to} is reversed or too wide")
            }
        }
    }
}

/// The request is well-formed but the court does not operate then.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleViolation {
    ClosedWeekday(Weekday),
    Blocked { date: NaiveDate, reason: Option<String> },
    OutsideHours { requested: TimeRange, window: TimeRange },
}

impl std::fmt::Display for ScheduleViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleViolation::ClosedWeekday(day) => write!(f, "court does not operate on {day}"),
            ScheduleViolation::Blocked { date, reason: Some(reason) } => {
                write!(f, "court is blocked on {date}: {reason}")
            }
            ScheduleViolation::Blocked { date, reason: None } => {
                write!(f, "court is blocked on {date}")
            }
            ScheduleViolation::OutsideHours { requested, window } => {
                write!(f, "{requested} is outside operating hours {window}")
            }
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    Validation(ValidationError),
    ScheduleViolation(ScheduleViolation),
    /// Overlaps an existing non-cancelled reservation.
    SlotConflict(Ulid),
    /// Lost the write race on the `(date, start)` uniqueness index.
    ConcurrencyConflict { date: NaiveDate, start: Minutes },
    NotFound(Ulid),
    AlreadyExists(Ulid),
    Forbidden(&'static str),
    InvalidTransition { from: ReservationState, to: ReservationState },
    CancellationLocked(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Conflicts can succeed on resubmission (another slot, or a fresh read).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::SlotConflict(_) | EngineError::ConcurrencyConflict { .. }
        )
    }

    /// SQLSTATE reported to wire clients.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "22007",
            EngineError::ScheduleViolation(_) => "22023",
            EngineError::SlotConflict(_) => "23P01",
            EngineError::ConcurrencyConflict { .. } => "40001",
            EngineError::NotFound(_) => "P0002",
            EngineError::AlreadyExists(_) => "23505",
            EngineError::Forbidden(_) => "42501",
            EngineError::InvalidTransition { .. } | EngineError::CancellationLocked(_) => "55000",
            EngineError::LimitExceeded(_) => "54000",
            EngineError::WalError(_) => "58030",
        }
    }
}

impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        EngineError::Validation(e)
    }
}

impl From<ScheduleViolation> for EngineError {
    fn from(v: ScheduleViolation) -> Self {
        EngineError::ScheduleViolation(v)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(e) => write!(f, "invalid request: {e}"),
            EngineError::ScheduleViolation(v) => write!(f, "schedule violation: {v}"),
            EngineError::SlotConflict(id) => {
                write!(f, "slot already taken by reservation {id}")
            }
            EngineError::ConcurrencyConflict { date, start } => write!(
                f,
                "concurrent reservation at {date} {} won the race, retry",
                format_hhmm(*start)
            ),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "cannot move reservation from {from} to {to}")
            }
            EngineError::CancellationLocked(msg) => write!(f, "reservation locked: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
