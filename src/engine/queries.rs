use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::MAX_REPORT_RANGE_DAYS;
use crate::model::*;

use super::availability;
use super::error::ValidationError;
use super::{Engine, EngineError};

fn court_info(cs: &CourtState) -> CourtInfo {
    CourtInfo {
        id: cs.id,
        name: cs.name.clone(),
        owner_id: cs.owner_id.clone(),
        window: cs.window.clone(),
        slot_minutes: cs.slot_minutes,
        blocked: cs.blocked_dates(),
    }
}

impl Engine {
    pub async fn list_courts(&self) -> Vec<CourtInfo> {
        let courts: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut infos = Vec::with_capacity(courts.len());
        for cs in courts {
            infos.push(court_info(&*cs.read().await));
        }
        infos.sort_by_key(|c| c.id);
        infos
    }

    pub async fn court_info(&self, id: Ulid) -> Result<CourtInfo, EngineError> {
        let cs = self.get_court(&id).ok_or(EngineError::NotFound(id))?;
        let guard = cs.read().await;
        Ok(court_info(&guard))
    }

    /// Every reservation on one court and date, cancelled ones included,
    /// ordered by start.
    pub async fn day_reservations(&self, court_id: Ulid, date: NaiveDate) -> Result<Vec<Reservation>, EngineError> {
        let cs = self.get_court(&court_id).ok_or(EngineError::NotFound(court_id))?;
        let guard = cs.read().await;
        Ok(guard.day(date).to_vec())
    }

    /// Non-cancelled reservations on one court and date.
    pub async fn active_reservations(&self, court_id: Ulid, date: NaiveDate) -> Result<Vec<Reservation>, EngineError> {
        let cs = self.get_court(&court_id).ok_or(EngineError::NotFound(court_id))?;
        let guard = cs.read().await;
        Ok(guard.active_on(date).cloned().collect())
    }

    /// A player's reservations across all courts, ordered by date then start.
    pub async fn reservations_for_user(&self, user_id: &str) -> Vec<Reservation> {
        let courts: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut found = Vec::new();
        for cs in courts {
            let guard = cs.read().await;
            found.extend(guard.reservations().filter(|r| r.user_id == user_id).cloned());
        }
        found.sort_by_key(|r| (r.date, r.range.start, r.court_id));
        found
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let court_id = self.court_for_reservation(&id).ok_or(EngineError::NotFound(id))?;
        let cs = self.get_court(&court_id).ok_or(EngineError::NotFound(court_id))?;
        let guard = cs.read().await;
        guard.get(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// The court's slot grid for `date`, each slot marked free or taken.
    pub async fn free_slots(&self, court_id: Ulid, date: NaiveDate) -> Result<DaySlots, EngineError> {
        let cs = self.get_court(&court_id).ok_or(EngineError::NotFound(court_id))?;
        let guard = cs.read().await;
        Ok(availability::compute_free_slots(
            &guard.window,
            &guard.blocked_dates(),
            guard.day(date),
            date,
            guard.slot_minutes,
        ))
    }

    pub async fn free_ranges(
        &self,
        court_id: Ulid,
        date: NaiveDate,
        min_duration: Option<Minutes>,
    ) -> Result<Vec<TimeRange>, EngineError> {
        let cs = self.get_court(&court_id).ok_or(EngineError::NotFound(court_id))?;
        let guard = cs.read().await;
        Ok(availability::free_ranges(
            &guard.window,
            &guard.blocked_dates(),
            guard.day(date),
            date,
            min_duration,
        ))
    }

    /// Reservation counts by state for `from..=to`.
    pub async fn court_report(&self, court_id: Ulid, from: NaiveDate, to: NaiveDate) -> Result<CourtReport, EngineError> {
        if to < from || (to - from).num_days() >= MAX_REPORT_RANGE_DAYS {
            return Err(ValidationError::InvalidDateRange { from, to }.into());
        }
        let cs = self.get_court(&court_id).ok_or(EngineError::NotFound(court_id))?;
        let guard = cs.read().await;

        let mut report = CourtReport {
            court_id,
            ..CourtReport::default()
        };
        for r in guard.reservations_between(from, to) {
            report.total += 1;
            match r.state {
                ReservationState::Pending => report.pending += 1,
                ReservationState::Confirmed => report.confirmed += 1,
                ReservationState::Cancelled => report.cancelled += 1,
                ReservationState::Completed => report.completed += 1,
            }
            if r.paid {
                report.paid += 1;
            }
            if r.state.is_active() {
                report.booked_minutes += u64::from(r.range.duration());
            }
        }
        Ok(report)
    }
}
