use crate::model::Minutes;

pub const MINUTES_PER_DAY: Minutes = 24 * 60;

/// Shortest bookable reservation.
pub const MIN_BOOKING_MINUTES: Minutes = 30;

/// How far ahead a reservation may be requested.
pub const MAX_BOOKING_HORIZON_DAYS: i64 = 365;

/// Longest cancellation notice a server may be configured with: one year.
pub const MAX_CANCEL_NOTICE_MINUTES: i64 = 525_600;

/// Widest date range accepted by a court report.
pub const MAX_REPORT_RANGE_DAYS: i64 = 366;

pub const MAX_COURTS: usize = 10_000;
pub const MAX_RESERVATIONS_PER_COURT: usize = 200_000;
pub const MAX_BLOCKED_DATES_PER_COURT: usize = 4_096;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_USER_ID_LEN: usize = 128;
pub const MAX_REASON_LEN: usize = 512;
