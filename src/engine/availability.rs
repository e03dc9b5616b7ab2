use chrono::{Datelike, NaiveDate};

use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// Lazy sequence of back-to-back slots `[t, t + step)` starting at the window's
/// open time. A trailing partial slot is never produced. Cloning restarts it.
#[derive(Debug, Clone)]
pub struct SlotIter {
    next: Minutes,
    close: Minutes,
    step: Minutes,
}

impl SlotIter {
    pub fn new(window: TimeRange, step: Minutes) -> Self {
        Self {
            next: window.start,
            close: window.end,
            step,
        }
    }
}

impl Iterator for SlotIter {
    type Item = TimeRange;

    fn next(&mut self) -> Option<TimeRange> {
        if self.step == 0 {
            return None;
        }
        let end = self.next.checked_add(self.step)?;
        if end > self.close {
            return None;
        }
        let slot = TimeRange::new(self.next, end);
        self.next = end;
        Some(slot)
    }
}

fn closure_for(window: &OperatingWindow, blocked: &[BlockedDate], date: NaiveDate) -> Option<Closure> {
    if let Some(b) = blocked.iter().find(|b| b.date == date) {
        return Some(Closure::Blocked {
            reason: b.reason.clone(),
        });
    }
    if !window.is_operating_day(date) {
        return Some(Closure::ClosedWeekday(date.weekday()));
    }
    None
}

/// Lay the day out in `slot_minutes` slots and mark each one taken iff it
/// overlaps a non-cancelled reservation on `date`. `booked` must already be
/// narrowed to one court. Pure: same inputs, same output.
pub fn compute_free_slots(
    window: &OperatingWindow,
    blocked: &[BlockedDate],
    booked: &[Reservation],
    date: NaiveDate,
    slot_minutes: Minutes,
) -> DaySlots {
    if let Some(closure) = closure_for(window, blocked, date) {
        return DaySlots {
            date,
            closure: Some(closure),
            slots: Vec::new(),
        };
    }

    let slots = SlotIter::new(window.range(), slot_minutes)
        .map(|range| {
            let holder = booked
                .iter()
                .filter(|r| r.date == date && r.state.is_active())
                .find(|r| r.range.overlaps(&range));
            TimeSlot {
                range,
                available: holder.is_none(),
                blocking_state: holder.map(|r| r.state),
            }
        })
        .collect();

    DaySlots {
        date,
        closure: None,
        slots,
    }
}

/// Maximal free gaps of the day: the window minus all non-cancelled
/// reservations. Gaps shorter than `min_duration` are dropped.
pub fn free_ranges(
    window: &OperatingWindow,
    blocked: &[BlockedDate],
    booked: &[Reservation],
    date: NaiveDate,
    min_duration: Option<Minutes>,
) -> Vec<TimeRange> {
    if closure_for(window, blocked, date).is_some() {
        return Vec::new();
    }

    let mut taken: Vec<TimeRange> = booked
        .iter()
        .filter(|r| r.date == date && r.state.is_active())
        .map(|r| r.range)
        .collect();
    taken.sort_by_key(|r| r.start);
    let taken = merge_overlapping(&taken);

    let mut free = subtract_ranges(&[window.range()], &taken);
    if let Some(min) = min_duration {
        free.retain(|r| r.duration() >= min);
    }
    free
}

/// Merge sorted overlapping/adjacent ranges into disjoint ranges.
pub fn merge_overlapping(sorted: &[TimeRange]) -> Vec<TimeRange> {
    let mut merged: Vec<TimeRange> = Vec::new();
    for &range in sorted {
        if let Some(last) = merged.last_mut()
            && range.start <= last.end {
                last.end = last.end.max(range.end);
                continue;
            }
        merged.push(range);
    }
    merged
}

/// `base` minus `to_remove`. Both inputs sorted by start; `to_remove` disjoint.
pub fn subtract_ranges(base: &[TimeRange], to_remove: &[TimeRange]) -> Vec<TimeRange> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(TimeRange::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(TimeRange::new(current_start, current_end));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use ulid::Ulid;

    const H: Minutes = 60;

    fn june(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    fn daytime() -> OperatingWindow {
        OperatingWindow::new(6 * H, 22 * H, None).unwrap()
    }

    fn booking(date: NaiveDate, start: Minutes, end: Minutes, state: ReservationState) -> Reservation {
        Reservation {
            id: Ulid::new(),
            court_id: Ulid::nil(),
            user_id: "player".into(),
            date,
            range: TimeRange::new(start, end),
            state,
            paid: false,
            created_at: date.and_hms_opt(0, 0, 0).unwrap(),
        }
    }

    // ── SlotIter ──────────────────────────────────────────

    #[test]
    fn slot_iter_truncates_partial_slot() {
        let slots: Vec<_> = SlotIter::new(TimeRange::new(600, 750), 60).collect();
        assert_eq!(slots, vec![TimeRange::new(600, 660), TimeRange::new(660, 720)]);
    }

    #[test]
    fn slot_iter_is_restartable() {
        let iter = SlotIter::new(TimeRange::new(600, 720), 30);
        let first: Vec<_> = iter.clone().collect();
        let second: Vec<_> = iter.collect();
        assert_eq!(first.len(), 4);
        assert_eq!(first, second);
    }

    #[test]
    fn slot_iter_zero_step_is_empty() {
        assert_eq!(SlotIter::new(TimeRange::new(600, 720), 0).count(), 0);
    }

    #[test]
    fn slot_iter_step_wider_than_window() {
        assert_eq!(SlotIter::new(TimeRange::new(600, 630), 60).count(), 0);
    }

    // ── compute_free_slots ────────────────────────────────

    #[test]
    fn one_confirmed_booking_takes_one_slot() {
        let booked = vec![booking(june(10), 14 * H, 15 * H, ReservationState::Confirmed)];
        let day = compute_free_slots(&daytime(), &[], &booked, june(10), 60);

        assert_eq!(day.closure, None);
        assert_eq!(day.slots.len(), 16);
        let taken: Vec<_> = day.slots.iter().filter(|s| !s.available).collect();
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].range, TimeRange::new(14 * H, 15 * H));
        assert_eq!(taken[0].blocking_state, Some(ReservationState::Confirmed));
        assert_eq!(day.available().count(), 15);
        assert!(day.slots.windows(2).all(|w| w[0].range.start < w[1].range.start));
    }

    #[test]
    fn blocked_date_yields_no_slots_with_reason() {
        let blocked = vec![BlockedDate {
            date: june(10),
            reason: Some("maintenance".into()),
        }];
        let day = compute_free_slots(&daytime(), &blocked, &[], june(10), 60);
        assert!(day.slots.is_empty());
        assert_eq!(
            day.closure,
            Some(Closure::Blocked {
                reason: Some("maintenance".into())
            })
        );

        let next = compute_free_slots(&daytime(), &blocked, &[], june(11), 60);
        assert_eq!(next.slots.len(), 16);
    }

    #[test]
    fn closed_weekday_yields_no_slots() {
        let weekends = OperatingWindow::new(8 * H, 20 * H, Some(vec![Weekday::Sat, Weekday::Sun])).unwrap();
        let day = compute_free_slots(&weekends, &[], &[], june(10), 60);
        assert_eq!(day.closure, Some(Closure::ClosedWeekday(Weekday::Tue)));
        assert!(day.slots.is_empty());
    }

    #[test]
    fn pending_blocks_cancelled_does_not() {
        let booked = vec![
            booking(june(10), 10 * H, 11 * H, ReservationState::Pending),
            booking(june(10), 12 * H, 13 * H, ReservationState::Cancelled),
        ];
        let day = compute_free_slots(&daytime(), &[], &booked, june(10), 60);
        let at = |start: Minutes| day.slots.iter().find(|s| s.range.start == start).unwrap();
        assert!(!at(10 * H).available);
        assert_eq!(at(10 * H).blocking_state, Some(ReservationState::Pending));
        assert!(at(12 * H).available);
        assert_eq!(at(12 * H).blocking_state, None);
    }

    #[test]
    fn booking_straddling_slots_takes_both() {
        let booked = vec![booking(june(10), 10 * H + 30, 11 * H + 30, ReservationState::Confirmed)];
        let day = compute_free_slots(&daytime(), &[], &booked, june(10), 60);
        let taken: Vec<_> = day.slots.iter().filter(|s| !s.available).map(|s| s.range.start).collect();
        assert_eq!(taken, vec![10 * H, 11 * H]);
    }

    #[test]
    fn other_dates_ignored() {
        let booked = vec![booking(june(11), 10 * H, 11 * H, ReservationState::Confirmed)];
        let day = compute_free_slots(&daytime(), &[], &booked, june(10), 60);
        assert!(day.slots.iter().all(|s| s.available));
    }

    #[test]
    fn uneven_stride_truncates_last_slot() {
        let window = OperatingWindow::new(6 * H, 22 * H, None).unwrap();
        let day = compute_free_slots(&window, &[], &[], june(10), 90);
        assert_eq!(day.slots.len(), 10); // 16h / 1.5h, last 60 min dropped
        assert_eq!(day.slots.last().unwrap().range, TimeRange::new(19 * H + 30, 21 * H));
    }

    #[test]
    fn identical_inputs_identical_output() {
        let booked = vec![
            booking(june(10), 9 * H, 10 * H, ReservationState::Confirmed),
            booking(june(10), 17 * H, 19 * H, ReservationState::Pending),
        ];
        let a = compute_free_slots(&daytime(), &[], &booked, june(10), 30);
        let b = compute_free_slots(&daytime(), &[], &booked, june(10), 30);
        assert_eq!(a, b);
    }

    // ── free_ranges ───────────────────────────────────────

    #[test]
    fn free_ranges_punch_out_bookings() {
        let booked = vec![
            booking(june(10), 14 * H, 15 * H, ReservationState::Confirmed),
            booking(june(10), 15 * H, 16 * H, ReservationState::Pending),
            booking(june(10), 8 * H, 9 * H, ReservationState::Cancelled),
        ];
        let free = free_ranges(&daytime(), &[], &booked, june(10), None);
        assert_eq!(free, vec![TimeRange::new(6 * H, 14 * H), TimeRange::new(16 * H, 22 * H)]);
    }

    #[test]
    fn free_ranges_min_duration() {
        let booked = vec![
            booking(june(10), 6 * H + 30, 12 * H, ReservationState::Confirmed),
            booking(june(10), 13 * H, 22 * H, ReservationState::Confirmed),
        ];
        let free = free_ranges(&daytime(), &[], &booked, june(10), Some(60));
        assert_eq!(free, vec![TimeRange::new(12 * H, 13 * H)]);
    }

    #[test]
    fn free_ranges_empty_on_blocked_date() {
        let blocked = vec![BlockedDate { date: june(10), reason: None }];
        assert!(free_ranges(&daytime(), &blocked, &[], june(10), None).is_empty());
    }

    // ── subtract_ranges / merge_overlapping ───────────────

    #[test]
    fn subtract_no_overlap() {
        let base = vec![TimeRange::new(100, 200), TimeRange::new(300, 400)];
        let remove = vec![TimeRange::new(200, 300)];
        assert_eq!(subtract_ranges(&base, &remove), base);
    }

    #[test]
    fn subtract_full_overlap() {
        let base = vec![TimeRange::new(100, 200)];
        let remove = vec![TimeRange::new(50, 250)];
        assert!(subtract_ranges(&base, &remove).is_empty());
    }

    #[test]
    fn subtract_multiple_punches() {
        let base = vec![TimeRange::new(0, 1000)];
        let remove = vec![
            TimeRange::new(100, 200),
            TimeRange::new(400, 500),
            TimeRange::new(800, 900),
        ];
        assert_eq!(
            subtract_ranges(&base, &remove),
            vec![
                TimeRange::new(0, 100),
                TimeRange::new(200, 400),
                TimeRange::new(500, 800),
                TimeRange::new(900, 1000),
            ]
        );
    }

    #[test]
    fn merge_overlapping_and_adjacent() {
        let ranges = vec![
            TimeRange::new(100, 300),
            TimeRange::new(200, 400),
            TimeRange::new(400, 450),
            TimeRange::new(500, 600),
        ];
        assert_eq!(
            merge_overlapping(&ranges),
            vec![TimeRange::new(100, 450), TimeRange::new(500, 600)]
        );
    }

    #[test]
    fn merge_empty() {
        assert!(merge_overlapping(&[]).is_empty());
    }
}
