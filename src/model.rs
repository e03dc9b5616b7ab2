use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::{EngineError, ValidationError};
use crate::limits::MINUTES_PER_DAY;

/// Minutes since midnight, the only time-of-day type.
pub type Minutes = u32;

/// Half-open range `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Minutes,
    pub end: Minutes,
}

impl TimeRange {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        debug_assert!(start < end, "TimeRange start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> Minutes {
        self.end - self.start
    }

    /// The one overlap rule. Ranges that only touch at a boundary do not overlap.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_range(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", format_hhmm(self.start), format_hhmm(self.end))
    }
}

/// Parse a 24h `HH:MM` clock time. `24:00` is accepted as end of day.
pub fn parse_hhmm(s: &str) -> Result<Minutes, ValidationError> {
    let bad = || ValidationError::MalformedTime(s.to_string());
    let b = s.as_bytes();
    if b.len() != 5 || b[2] != b':' {
        return Err(bad());
    }
    let digit = |c: u8| c.is_ascii_digit().then(|| Minutes::from(c - b'0'));
    let (Some(h1), Some(h2), Some(m1), Some(m2)) = (digit(b[0]), digit(b[1]), digit(b[3]), digit(b[4]))
    else {
        return Err(bad());
    };
    let (hours, minutes) = (h1 * 10 + h2, m1 * 10 + m2);
    match (hours, minutes) {
        (0..=23, 0..=59) => Ok(hours * 60 + minutes),
        (24, 0) => Ok(MINUTES_PER_DAY),
        _ => Err(bad()),
    }
}

pub fn format_hhmm(m: Minutes) -> String {
    format!("{:02}:{:02}", m / 60, m % 60)
}

pub fn parse_date(s: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| ValidationError::MalformedDate(s.to_string()))
}

/// Parse a comma separated weekday list such as `mon,tue,sat`.
pub fn parse_weekdays(s: &str) -> Result<Vec<Weekday>, ValidationError> {
    let mut days = Vec::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let day = Weekday::from_str(part)
            .map_err(|_| ValidationError::MalformedWeekday(part.to_string()))?;
        if !days.contains(&day) {
            days.push(day);
        }
    }
    days.sort_by_key(|d| d.num_days_from_monday());
    Ok(days)
}

pub fn format_weekdays(days: &[Weekday]) -> String {
    days.iter()
        .map(|d| d.to_string().to_lowercase())
        .collect::<Vec<_>>()
        .join(",")
}

/// A court-scoped, date-scoped time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub court_id: Ulid,
    pub date: NaiveDate,
    pub range: TimeRange,
}

impl Interval {
    /// Intervals on different courts or dates never overlap.
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.court_id == other.court_id && self.date == other.date && self.range.overlaps(&other.range)
    }
}

/// Daily opening hours of a court, optionally restricted to some weekdays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatingWindow {
    pub open: Minutes,
    pub close: Minutes,
    /// `None` means every day.
    pub operating_days: Option<Vec<Weekday>>,
}

impl OperatingWindow {
    pub fn new(
        open: Minutes,
        close: Minutes,
        operating_days: Option<Vec<Weekday>>,
    ) -> Result<Self, ValidationError> {
        if open >= close || close > MINUTES_PER_DAY {
            return Err(ValidationError::InvalidWindow { open, close });
        }
        Ok(Self { open, close, operating_days })
    }

    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.open, self.close)
    }

    pub fn is_operating_day(&self, date: NaiveDate) -> bool {
        self.operating_days
            .as_ref()
            .is_none_or(|days| days.contains(&date.weekday()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedDate {
    pub date: NaiveDate,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationState {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl ReservationState {
    /// Everything except `Cancelled` occupies its slot.
    pub fn is_active(self) -> bool {
        self != ReservationState::Cancelled
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationState::Pending => "pending",
            ReservationState::Confirmed => "confirmed",
            ReservationState::Cancelled => "cancelled",
            ReservationState::Completed => "completed",
        }
    }
}

impl std::fmt::Display for ReservationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ReservationState::Pending),
            "confirmed" => Ok(ReservationState::Confirmed),
            "cancelled" | "canceled" => Ok(ReservationState::Cancelled),
            "completed" => Ok(ReservationState::Completed),
            _ => Err(ValidationError::UnknownState(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub court_id: Ulid,
    pub user_id: String,
    pub date: NaiveDate,
    pub range: TimeRange,
    pub state: ReservationState,
    pub paid: bool,
    pub created_at: NaiveDateTime,
}

impl Reservation {
    pub fn interval(&self) -> Interval {
        Interval {
            court_id: self.court_id,
            date: self.date,
            range: self.range,
        }
    }

    /// Wall-clock instant the reservation starts.
    pub fn starts_at(&self) -> NaiveDateTime {
        clock_time(self.date, self.range.start)
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        clock_time(self.date, self.range.end)
    }
}

fn clock_time(date: NaiveDate, m: Minutes) -> NaiveDateTime {
    // 24:00 is midnight of the following day.
    date.and_time(chrono::NaiveTime::default()) + chrono::Duration::minutes(i64::from(m))
}

/// Everything the engine knows about one court.
#[derive(Debug, Clone)]
pub struct CourtState {
    pub id: Ulid,
    pub name: String,
    pub owner_id: String,
    pub window: OperatingWindow,
    pub slot_minutes: Minutes,
    pub blocked: BTreeMap<NaiveDate, Option<String>>,
    /// Per date, sorted by `range.start`. Cancelled reservations stay for audit.
    reservations: BTreeMap<NaiveDate, Vec<Reservation>>,
    locations: HashMap<Ulid, NaiveDate>,
    /// Uniqueness index over `(date, start)` of active reservations.
    active_starts: HashSet<(NaiveDate, Minutes)>,
}

impl CourtState {
    pub fn new(
        id: Ulid,
        name: String,
        owner_id: String,
        window: OperatingWindow,
        slot_minutes: Minutes,
    ) -> Self {
        Self {
            id,
            name,
            owner_id,
            window,
            slot_minutes,
            blocked: BTreeMap::new(),
            reservations: BTreeMap::new(),
            locations: HashMap::new(),
            active_starts: HashSet::new(),
        }
    }

    pub fn blocked_dates(&self) -> Vec<BlockedDate> {
        self.blocked
            .iter()
            .map(|(date, reason)| BlockedDate {
                date: *date,
                reason: reason.clone(),
            })
            .collect()
    }

    /// All reservations on `date`, cancelled ones included.
    pub fn day(&self, date: NaiveDate) -> &[Reservation] {
        self.reservations.get(&date).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn active_on(&self, date: NaiveDate) -> impl Iterator<Item = &Reservation> {
        self.day(date).iter().filter(|r| r.state.is_active())
    }

    pub fn reservations(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.values().flatten()
    }

    pub fn reservations_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> impl Iterator<Item = &Reservation> {
        self.reservations.range(from..=to).flat_map(|(_, day)| day.iter())
    }

    pub fn reservation_count(&self) -> usize {
        self.locations.len()
    }

    pub fn has_active_reservations(&self) -> bool {
        !self.active_starts.is_empty()
    }

    pub fn get(&self, id: Ulid) -> Option<&Reservation> {
        let date = self.locations.get(&id)?;
        self.day(*date).iter().find(|r| r.id == id)
    }

    fn get_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        let date = self.locations.get(&id)?;
        self.reservations.get_mut(date)?.iter_mut().find(|r| r.id == id)
    }

    /// Fails with `ConcurrencyConflict` if an active reservation other than
    /// `exclude` already starts at `(date, start)`.
    pub fn ensure_start_free(
        &self,
        date: NaiveDate,
        start: Minutes,
        exclude: Option<Ulid>,
    ) -> Result<(), EngineError> {
        if !self.active_starts.contains(&(date, start)) {
            return Ok(());
        }
        let held_by_excluded = exclude
            .and_then(|id| self.get(id))
            .is_some_and(|r| r.state.is_active() && r.date == date && r.range.start == start);
        if held_by_excluded {
            Ok(())
        } else {
            Err(EngineError::ConcurrencyConflict { date, start })
        }
    }

    /// Insert keeping per-date start order. Enforces the uniqueness index.
    pub fn insert_reservation(&mut self, reservation: Reservation) -> Result<(), EngineError> {
        if self.locations.contains_key(&reservation.id) {
            return Err(EngineError::AlreadyExists(reservation.id));
        }
        let key = (reservation.date, reservation.range.start);
        if reservation.state.is_active() && !self.active_starts.insert(key) {
            return Err(EngineError::ConcurrencyConflict {
                date: key.0,
                start: key.1,
            });
        }
        self.locations.insert(reservation.id, reservation.date);
        let day = self.reservations.entry(reservation.date).or_default();
        let pos = day.partition_point(|r| r.range.start <= reservation.range.start);
        day.insert(pos, reservation);
        Ok(())
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let date = self.locations.remove(&id)?;
        let day = self.reservations.get_mut(&date)?;
        let pos = day.iter().position(|r| r.id == id)?;
        let removed = day.remove(pos);
        if day.is_empty() {
            self.reservations.remove(&date);
        }
        if removed.state.is_active() {
            self.active_starts.remove(&(removed.date, removed.range.start));
        }
        Some(removed)
    }

    /// Move a reservation to a new date/range, keeping everything else.
    pub fn move_reservation(
        &mut self,
        id: Ulid,
        date: NaiveDate,
        range: TimeRange,
    ) -> Result<(), EngineError> {
        let mut reservation = self.remove_reservation(id).ok_or(EngineError::NotFound(id))?;
        let previous = (reservation.date, reservation.range);
        reservation.date = date;
        reservation.range = range;
        if let Err(e) = self.insert_reservation(reservation.clone()) {
            reservation.date = previous.0;
            reservation.range = previous.1;
            self.insert_reservation(reservation)?;
            return Err(e);
        }
        Ok(())
    }

    pub fn set_state(&mut self, id: Ulid, state: ReservationState) -> Option<()> {
        let r = self.get_mut(id)?;
        let was_active = r.state.is_active();
        r.state = state;
        let key = (r.date, r.range.start);
        if was_active && !state.is_active() {
            self.active_starts.remove(&key);
        } else if !was_active && state.is_active() {
            self.active_starts.insert(key);
        }
        Some(())
    }

    pub fn set_paid(&mut self, id: Ulid, paid: bool) -> Option<()> {
        self.get_mut(id)?.paid = paid;
        Some(())
    }
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CourtCreated {
        id: Ulid,
        name: String,
        owner_id: String,
        window: OperatingWindow,
        slot_minutes: Minutes,
    },
    CourtUpdated {
        id: Ulid,
        name: String,
        window: OperatingWindow,
        slot_minutes: Minutes,
    },
    CourtDeleted {
        id: Ulid,
    },
    DateBlocked {
        court_id: Ulid,
        date: NaiveDate,
        reason: Option<String>,
    },
    DateUnblocked {
        court_id: Ulid,
        date: NaiveDate,
    },
    ReservationRequested {
        reservation: Reservation,
    },
    ReservationRescheduled {
        id: Ulid,
        court_id: Ulid,
        date: NaiveDate,
        range: TimeRange,
    },
    ReservationStateChanged {
        id: Ulid,
        court_id: Ulid,
        state: ReservationState,
    },
    ReservationPaidSet {
        id: Ulid,
        court_id: Ulid,
        paid: bool,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourtInfo {
    pub id: Ulid,
    pub name: String,
    pub owner_id: String,
    pub window: OperatingWindow,
    pub slot_minutes: Minutes,
    pub blocked: Vec<BlockedDate>,
}

/// One candidate slot of a day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSlot {
    pub range: TimeRange,
    pub available: bool,
    /// State of the reservation occupying the slot, if any.
    pub blocking_state: Option<ReservationState>,
}

/// Why a whole day offers no slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Closure {
    Blocked { reason: Option<String> },
    ClosedWeekday(Weekday),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaySlots {
    pub date: NaiveDate,
    pub closure: Option<Closure>,
    pub slots: Vec<TimeSlot>,
}

impl DaySlots {
    pub fn available(&self) -> impl Iterator<Item = &TimeSlot> {
        self.slots.iter().filter(|s| s.available)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CourtReport {
    pub court_id: Ulid,
    pub total: u64,
    pub pending: u64,
    pub confirmed: u64,
    pub cancelled: u64,
    pub completed: u64,
    pub paid: u64,
    /// Minutes held by non-cancelled reservations.
    pub booked_minutes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn reservation(date: NaiveDate, start: Minutes, end: Minutes) -> Reservation {
        Reservation {
            id: Ulid::new(),
            court_id: Ulid::nil(),
            user_id: "u1".into(),
            date,
            range: TimeRange::new(start, end),
            state: ReservationState::Pending,
            paid: false,
            created_at: date.and_hms_opt(8, 0, 0).unwrap(),
        }
    }

    #[test]
    fn range_basics() {
        let r = TimeRange::new(600, 660);
        assert_eq!(r.duration(), 60);
        assert_eq!(r.to_string(), "10:00-11:00");
    }

    #[test]
    fn overlap_rule() {
        let a = TimeRange::new(840, 900);
        let b = TimeRange::new(810, 870);
        let touching = TimeRange::new(900, 960);
        let inner = TimeRange::new(850, 860);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(a.overlaps(&a));
        assert!(a.overlaps(&inner) && inner.overlaps(&a));
        assert!(!a.overlaps(&touching)); // boundary only
        assert!(!touching.overlaps(&a));
    }

    #[test]
    fn overlap_is_symmetric_over_grid() {
        let ranges: Vec<TimeRange> = (0..8u32)
            .flat_map(|s| (s + 1..=8).map(move |e| TimeRange::new(s * 30, e * 30)))
            .collect();
        for a in &ranges {
            assert!(a.overlaps(a));
            for b in &ranges {
                assert_eq!(a.overlaps(b), b.overlaps(a), "{a} vs {b}");
                if a.end == b.start {
                    assert!(!a.overlaps(b), "{a} touches {b}");
                }
            }
        }
    }

    #[test]
    fn contains_range() {
        let outer = TimeRange::new(360, 1320);
        assert!(outer.contains_range(&TimeRange::new(360, 420)));
        assert!(outer.contains_range(&outer));
        assert!(!outer.contains_range(&TimeRange::new(1290, 1350)));
        assert!(!outer.contains_range(&TimeRange::new(330, 390)));
    }

    #[test]
    fn interval_scoped_to_court_and_date() {
        let court = Ulid::new();
        let a = Interval { court_id: court, date: date(2025, 6, 10), range: TimeRange::new(600, 660) };
        let other_day = Interval { date: date(2025, 6, 11), ..a };
        let other_court = Interval { court_id: Ulid::new(), ..a };
        assert!(a.overlaps(&a));
        assert!(!a.overlaps(&other_day));
        assert!(!a.overlaps(&other_court));
    }

    #[test]
    fn hhmm_parsing() {
        assert_eq!(parse_hhmm("00:00"), Ok(0));
        assert_eq!(parse_hhmm("06:30"), Ok(390));
        assert_eq!(parse_hhmm("23:59"), Ok(1439));
        assert_eq!(parse_hhmm("24:00"), Ok(1440));
        for bad in ["6:00", "06:60", "24:01", "25:00", "0600", "06-00", "ab:cd", "", "06:00 "] {
            assert!(parse_hhmm(bad).is_err(), "{bad:?} should be rejected");
        }
        assert_eq!(format_hhmm(390), "06:30");
        assert_eq!(format_hhmm(1440), "24:00");
    }

    #[test]
    fn weekday_parsing() {
        let days = parse_weekdays("sat, mon,Mon,tue").unwrap();
        assert_eq!(days, vec![Weekday::Mon, Weekday::Tue, Weekday::Sat]);
        assert_eq!(format_weekdays(&days), "mon,tue,sat");
        assert!(parse_weekdays("mon,funday").is_err());
    }

    #[test]
    fn window_validation() {
        assert!(OperatingWindow::new(360, 1320, None).is_ok());
        assert!(OperatingWindow::new(600, 600, None).is_err());
        assert!(OperatingWindow::new(600, 1441, None).is_err());
        let weekdays = OperatingWindow::new(360, 1320, Some(vec![Weekday::Mon])).unwrap();
        assert!(weekdays.is_operating_day(date(2025, 6, 9))); // Monday
        assert!(!weekdays.is_operating_day(date(2025, 6, 10)));
    }

    #[test]
    fn state_parsing() {
        assert_eq!("Confirmed".parse::<ReservationState>(), Ok(ReservationState::Confirmed));
        assert_eq!("canceled".parse::<ReservationState>(), Ok(ReservationState::Cancelled));
        assert!("paid".parse::<ReservationState>().is_err());
        assert!(!ReservationState::Cancelled.is_active());
        assert!(ReservationState::Completed.is_active());
    }

    #[test]
    fn reservations_kept_in_start_order() {
        let d = date(2025, 6, 10);
        let window = OperatingWindow::new(360, 1320, None).unwrap();
        let mut court = CourtState::new(Ulid::new(), "Court 1".into(), "owner".into(), window, 60);
        for start in [900, 600, 720] {
            court.insert_reservation(reservation(d, start, start + 60)).unwrap();
        }
        let starts: Vec<_> = court.day(d).iter().map(|r| r.range.start).collect();
        assert_eq!(starts, vec![600, 720, 900]);
        assert_eq!(court.reservation_count(), 3);
    }

    #[test]
    fn uniqueness_index_rejects_same_start() {
        let d = date(2025, 6, 10);
        let window = OperatingWindow::new(360, 1320, None).unwrap();
        let mut court = CourtState::new(Ulid::new(), "Court 1".into(), "owner".into(), window, 60);
        let first = reservation(d, 840, 900);
        court.insert_reservation(first.clone()).unwrap();

        let second = reservation(d, 840, 870);
        assert!(matches!(
            court.ensure_start_free(d, 840, None),
            Err(EngineError::ConcurrencyConflict { start: 840, .. })
        ));
        assert!(court.ensure_start_free(d, 840, Some(first.id)).is_ok());
        assert!(matches!(
            court.insert_reservation(second.clone()),
            Err(EngineError::ConcurrencyConflict { .. })
        ));

        // Cancelling frees the key.
        court.set_state(first.id, ReservationState::Cancelled).unwrap();
        court.insert_reservation(second).unwrap();
        assert_eq!(court.day(d).len(), 2);
        assert_eq!(court.active_on(d).count(), 1);
    }

    #[test]
    fn move_reservation_updates_index() {
        let d = date(2025, 6, 10);
        let window = OperatingWindow::new(360, 1320, None).unwrap();
        let mut court = CourtState::new(Ulid::new(), "Court 1".into(), "owner".into(), window, 60);
        let a = reservation(d, 600, 660);
        let b = reservation(d, 720, 780);
        court.insert_reservation(a.clone()).unwrap();
        court.insert_reservation(b.clone()).unwrap();

        let next = date(2025, 6, 11);
        court.move_reservation(a.id, next, TimeRange::new(600, 690)).unwrap();
        assert_eq!(court.get(a.id).unwrap().date, next);
        assert!(court.ensure_start_free(d, 600, None).is_ok());

        // Moving onto b's start fails and leaves a where it was.
        let err = court.move_reservation(a.id, d, TimeRange::new(720, 750));
        assert!(matches!(err, Err(EngineError::ConcurrencyConflict { .. })));
        assert_eq!(court.get(a.id).unwrap().date, next);
    }

    #[test]
    fn remove_nonexistent_returns_none() {
        let window = OperatingWindow::new(360, 1320, None).unwrap();
        let mut court = CourtState::new(Ulid::new(), "Court 1".into(), "owner".into(), window, 60);
        assert!(court.remove_reservation(Ulid::new()).is_none());
    }

    #[test]
    fn reservation_instants() {
        let r = reservation(date(2025, 6, 10), 1380, 1440);
        assert_eq!(r.starts_at(), date(2025, 6, 10).and_hms_opt(23, 0, 0).unwrap());
        assert_eq!(r.ends_at(), date(2025, 6, 11).and_hms_opt(0, 0, 0).unwrap());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::ReservationRequested {
            reservation: reservation(date(2025, 6, 10), 840, 900),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
