use std::sync::Mutex;

use chrono::{Local, NaiveDate, NaiveDateTime};

/// Source of the current local wall-clock time. Court dates are timezone-naive,
/// so "today" is whatever the venue's clock says.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<NaiveDateTime>,
}

impl FixedClock {
    pub fn new(now: NaiveDateTime) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_moves_on_request() {
        let start = NaiveDate::from_ymd_opt(2025, 6, 10)
            .unwrap()
            .and_hms_opt(23, 30, 0)
            .unwrap();
        let clock = FixedClock::new(start);
        assert_eq!(clock.today(), start.date());
        clock.advance(chrono::Duration::minutes(45));
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2025, 6, 11).unwrap());
        clock.set(start);
        assert_eq!(clock.now(), start);
    }
}
