use std::sync::Arc;

use chrono::{NaiveDate, Weekday};
use dashmap::mapref::entry::Entry;
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::auth::Actor;
use crate::limits::*;
use crate::model::*;
use crate::observability::{RESERVATIONS_COMPLETED_TOTAL, RESERVATION_REQUESTS_TOTAL};

use super::conflict::{check_conflict, CourtRules, SlotRequest};
use super::error::ValidationError;
use super::{Engine, EngineError, WalCommand};

/// Partial court update. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CourtPatch {
    pub name: Option<String>,
    pub open: Option<Minutes>,
    pub close: Option<Minutes>,
    /// `Some(None)` reopens the court on every weekday.
    pub operating_days: Option<Option<Vec<Weekday>>>,
    pub slot_minutes: Option<Minutes>,
}

fn validate_slot_size(window: &OperatingWindow, slot_minutes: Minutes) -> Result<(), ValidationError> {
    if slot_minutes < MIN_BOOKING_MINUTES || slot_minutes > window.range().duration() {
        return Err(ValidationError::InvalidSlotSize(slot_minutes));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("court name must be 1..=256 bytes"));
    }
    Ok(())
}

fn outcome_label(result: &Result<Reservation, EngineError>) -> &'static str {
    match result {
        Ok(_) => "accepted",
        Err(EngineError::SlotConflict(_)) => "slot_conflict",
        Err(EngineError::ConcurrencyConflict { .. }) => "concurrency_conflict",
        Err(EngineError::Validation(_)) => "invalid",
        Err(EngineError::ScheduleViolation(_)) => "schedule_violation",
        Err(_) => "error",
    }
}

/// Only pending and confirmed reservations can still change.
fn ensure_open(r: &Reservation, to: ReservationState) -> Result<(), EngineError> {
    match r.state {
        ReservationState::Pending | ReservationState::Confirmed => Ok(()),
        from => Err(EngineError::InvalidTransition { from, to }),
    }
}

impl Engine {
    // ── Courts ───────────────────────────────────────────────

    pub async fn create_court(
        &self,
        actor: &Actor,
        id: Ulid,
        name: String,
        owner_id: String,
        window: OperatingWindow,
        slot_minutes: Minutes,
    ) -> Result<(), EngineError> {
        if !actor.is_admin() {
            return Err(EngineError::Forbidden("only admins can create courts"));
        }
        if self.state.len() >= MAX_COURTS {
            return Err(EngineError::LimitExceeded("too many courts"));
        }
        validate_name(&name)?;
        if owner_id.is_empty() || owner_id.len() > MAX_USER_ID_LEN {
            return Err(EngineError::LimitExceeded("owner id must be 1..=128 bytes"));
        }
        validate_slot_size(&window, slot_minutes)?;
        let _gate = self.compaction.read().await;
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::CourtCreated {
            id,
            name: name.clone(),
            owner_id: owner_id.clone(),
            window: window.clone(),
            slot_minutes,
        };
        self.wal_append(&event).await?;
        let cs = CourtState::new(id, name, owner_id, window, slot_minutes);
        self.state.insert(id, Arc::new(RwLock::new(cs)));
        metrics::gauge!(crate::observability::COURTS_ACTIVE).set(self.state.len() as f64);
        tracing::info!(court = %id, "court created");
        Ok(())
    }

    /// Existing reservations are kept even if the new hours no longer cover them.
    pub async fn update_court(&self, actor: &Actor, id: Ulid, patch: CourtPatch) -> Result<(), EngineError> {
        let _gate = self.compaction.read().await;
        let cs = self.get_court(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = cs.write().await;
        if !actor.manages(&guard) {
            return Err(EngineError::Forbidden("only the court owner or an admin can edit a court"));
        }

        let name = patch.name.unwrap_or_else(|| guard.name.clone());
        validate_name(&name)?;
        let window = OperatingWindow::new(
            patch.open.unwrap_or(guard.window.open),
            patch.close.unwrap_or(guard.window.close),
            patch
                .operating_days
                .unwrap_or_else(|| guard.window.operating_days.clone()),
        )?;
        let slot_minutes = patch.slot_minutes.unwrap_or(guard.slot_minutes);
        validate_slot_size(&window, slot_minutes)?;

        let event = Event::CourtUpdated {
            id,
            name,
            window,
            slot_minutes,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn delete_court(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        if !actor.is_admin() {
            return Err(EngineError::Forbidden("only admins can delete courts"));
        }
        let _gate = self.compaction.read().await;
        let cs = self.get_court(&id).ok_or(EngineError::NotFound(id))?;
        // Held across the WAL write so no booking sneaks in.
        let guard = cs.write().await;
        if guard.has_active_reservations() {
            return Err(EngineError::Forbidden("court still has active reservations"));
        }

        let event = Event::CourtDeleted { id };
        self.wal_append(&event).await?;
        self.forget_court(&id);
        drop(guard);
        metrics::gauge!(crate::observability::COURTS_ACTIVE).set(self.state.len() as f64);
        tracing::info!(court = %id, "court deleted");
        Ok(())
    }

    /// Close a court for a whole date. Reservations already on that date stay.
    pub async fn block_date(
        &self,
        actor: &Actor,
        court_id: Ulid,
        date: NaiveDate,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        if reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(EngineError::LimitExceeded("block reason too long"));
        }
        let _gate = self.compaction.read().await;
        let cs = self.get_court(&court_id).ok_or(EngineError::NotFound(court_id))?;
        let mut guard = cs.write().await;
        if !actor.manages(&guard) {
            return Err(EngineError::Forbidden("only the court owner or an admin can block dates"));
        }
        if !guard.blocked.contains_key(&date) && guard.blocked.len() >= MAX_BLOCKED_DATES_PER_COURT {
            return Err(EngineError::LimitExceeded("too many blocked dates on court"));
        }

        let event = Event::DateBlocked { court_id, date, reason };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Returns false if the date was not blocked.
    pub async fn unblock_date(&self, actor: &Actor, court_id: Ulid, date: NaiveDate) -> Result<bool, EngineError> {
        let _gate = self.compaction.read().await;
        let cs = self.get_court(&court_id).ok_or(EngineError::NotFound(court_id))?;
        let mut guard = cs.write().await;
        if !actor.manages(&guard) {
            return Err(EngineError::Forbidden("only the court owner or an admin can unblock dates"));
        }
        if !guard.blocked.contains_key(&date) {
            return Ok(false);
        }
        let event = Event::DateUnblocked { court_id, date };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(true)
    }

    // ── Reservations ─────────────────────────────────────────

    /// Book `[start, end)` on `date` for the calling player. The court's write
    /// lock is held from the conflict check until the event is applied, so two
    /// requests for the same slot can never both succeed.
    pub async fn request_reservation(
        &self,
        actor: &Actor,
        id: Ulid,
        court_id: Ulid,
        date: NaiveDate,
        start: &str,
        end: &str,
    ) -> Result<Reservation, EngineError> {
        let result = self.request_reservation_inner(actor, id, court_id, date, start, end).await;
        metrics::counter!(RESERVATION_REQUESTS_TOTAL, "outcome" => outcome_label(&result)).increment(1);
        match &result {
            Ok(r) => tracing::info!(reservation = %r.id, court = %court_id, %date, range = %r.range, "reservation requested"),
            Err(e) => tracing::debug!(court = %court_id, %date, start, end, "reservation refused: {e}"),
        }
        result
    }

    async fn request_reservation_inner(
        &self,
        actor: &Actor,
        id: Ulid,
        court_id: Ulid,
        date: NaiveDate,
        start: &str,
        end: &str,
    ) -> Result<Reservation, EngineError> {
        if actor.id.is_empty() || actor.id.len() > MAX_USER_ID_LEN {
            return Err(EngineError::LimitExceeded("user id must be 1..=128 bytes"));
        }
        let _gate = self.compaction.read().await;
        // Claim the id before taking the court lock so the same id cannot be
        // placed on two courts at once.
        match self.reservation_to_court.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                slot.insert(court_id);
            }
        }
        let result = self.place_reservation(actor, id, court_id, date, start, end).await;
        if result.is_err() {
            self.reservation_to_court.remove_if(&id, |_, court| *court == court_id);
        }
        result
    }

    async fn place_reservation(
        &self,
        actor: &Actor,
        id: Ulid,
        court_id: Ulid,
        date: NaiveDate,
        start: &str,
        end: &str,
    ) -> Result<Reservation, EngineError> {
        let cs = self.get_court(&court_id).ok_or(EngineError::NotFound(court_id))?;
        let mut guard = cs.write().await;
        // The court may have been deleted while we waited for the lock.
        if !self.state.contains_key(&court_id) {
            return Err(EngineError::NotFound(court_id));
        }
        if guard.reservation_count() >= MAX_RESERVATIONS_PER_COURT {
            return Err(EngineError::LimitExceeded("too many reservations on court"));
        }

        let request = SlotRequest {
            court_id,
            date,
            start,
            end,
            exclude: None,
        };
        let blocked = guard.blocked_dates();
        let rules = CourtRules {
            window: &guard.window,
            blocked: &blocked,
        };
        let range = check_conflict(&request, &rules, guard.day(date), self.clock.today())?;
        guard.ensure_start_free(date, range.start, None)?;

        let reservation = Reservation {
            id,
            court_id,
            user_id: actor.id.clone(),
            date,
            range,
            state: ReservationState::Pending,
            paid: false,
            created_at: self.clock.now(),
        };
        let event = Event::ReservationRequested {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(reservation)
    }

    /// Move a reservation to a new date and time on the same court. The
    /// reservation's own current slot never counts as a conflict.
    pub async fn reschedule_reservation(
        &self,
        actor: &Actor,
        id: Ulid,
        date: NaiveDate,
        start: &str,
        end: &str,
    ) -> Result<Reservation, EngineError> {
        let _gate = self.compaction.read().await;
        let (court_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let current = guard.get(id).cloned().ok_or(EngineError::NotFound(id))?;
        if !actor.is_admin() && actor.id != current.user_id {
            return Err(EngineError::Forbidden("only the booking player or an admin can reschedule"));
        }
        ensure_open(&current, current.state)?;
        if !actor.is_admin() && current.paid && current.state == ReservationState::Confirmed {
            return Err(EngineError::CancellationLocked("reservation is paid and confirmed"));
        }

        let request = SlotRequest {
            court_id,
            date,
            start,
            end,
            exclude: Some(id),
        };
        let blocked = guard.blocked_dates();
        let rules = CourtRules {
            window: &guard.window,
            blocked: &blocked,
        };
        let range = check_conflict(&request, &rules, guard.day(date), self.clock.today())?;
        guard.ensure_start_free(date, range.start, Some(id))?;

        let event = Event::ReservationRescheduled {
            id,
            court_id,
            date,
            range,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!(reservation = %id, %date, %range, "reservation rescheduled");
        guard.get(id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn confirm_reservation(&self, actor: &Actor, id: Ulid) -> Result<Reservation, EngineError> {
        let _gate = self.compaction.read().await;
        let (court_id, mut guard) = self.resolve_reservation_write(&id).await?;
        if !actor.manages(&guard) {
            return Err(EngineError::Forbidden("only the court owner or an admin can confirm"));
        }
        let current = guard.get(id).ok_or(EngineError::NotFound(id))?;
        if current.state != ReservationState::Pending {
            return Err(EngineError::InvalidTransition {
                from: current.state,
                to: ReservationState::Confirmed,
            });
        }

        let event = Event::ReservationStateChanged {
            id,
            court_id,
            state: ReservationState::Confirmed,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard.get(id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Cancel a reservation, freeing its slot.
    ///
    /// Players may cancel their own bookings until the notice period before
    /// start. Court owners and admins may cancel any time. A paid, confirmed
    /// reservation can only be cancelled by an admin.
    pub async fn cancel_reservation(&self, actor: &Actor, id: Ulid) -> Result<Reservation, EngineError> {
        let _gate = self.compaction.read().await;
        let (court_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let current = guard.get(id).ok_or(EngineError::NotFound(id))?;
        let is_booker = actor.id == current.user_id;
        let manages = actor.manages(&guard);
        if !is_booker && !manages {
            return Err(EngineError::Forbidden("only the booking player, court owner or an admin can cancel"));
        }
        ensure_open(current, ReservationState::Cancelled)?;
        if !actor.is_admin() && current.paid && current.state == ReservationState::Confirmed {
            return Err(EngineError::CancellationLocked("reservation is paid and confirmed"));
        }
        if !manages {
            // An unrepresentable deadline locks the reservation.
            let deadline = chrono::Duration::try_minutes(self.options.cancel_notice_minutes.max(0))
                .and_then(|notice| current.starts_at().checked_sub_signed(notice));
            if deadline.is_none_or(|deadline| self.clock.now() > deadline) {
                return Err(EngineError::CancellationLocked("too close to the start time"));
            }
        }

        let event = Event::ReservationStateChanged {
            id,
            court_id,
            state: ReservationState::Cancelled,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!(reservation = %id, actor = %actor.id, "reservation cancelled");
        guard.get(id).cloned().ok_or(EngineError::NotFound(id))
    }

    pub async fn set_paid(&self, actor: &Actor, id: Ulid, paid: bool) -> Result<Reservation, EngineError> {
        if !actor.is_admin() {
            return Err(EngineError::Forbidden("only admins can change payment status"));
        }
        let _gate = self.compaction.read().await;
        let (court_id, mut guard) = self.resolve_reservation_write(&id).await?;
        if guard.get(id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::ReservationPaidSet { id, court_id, paid };
        self.persist_and_apply(&mut guard, &event).await?;
        guard.get(id).cloned().ok_or(EngineError::NotFound(id))
    }

    // ── Completion sweep ─────────────────────────────────────

    /// Confirmed reservations whose end has passed. Courts that are currently
    /// write-locked are skipped and picked up on the next sweep.
    pub fn collect_elapsed(&self, now: chrono::NaiveDateTime) -> Vec<Ulid> {
        let mut elapsed = Vec::new();
        for entry in self.state.iter() {
            let cs = entry.value().clone();
            if let Ok(guard) = cs.try_read() {
                elapsed.extend(
                    guard
                        .reservations_between(NaiveDate::MIN, now.date())
                        .filter(|r| r.state == ReservationState::Confirmed && r.ends_at() <= now)
                        .map(|r| r.id),
                );
            }
        }
        elapsed
    }

    /// Move one confirmed, elapsed reservation to `Completed`. Returns false if
    /// it no longer qualifies.
    pub async fn complete_reservation(&self, id: Ulid) -> Result<bool, EngineError> {
        let _gate = self.compaction.read().await;
        let (court_id, mut guard) = self.resolve_reservation_write(&id).await?;
        let now = self.clock.now();
        let due = guard
            .get(id)
            .is_some_and(|r| r.state == ReservationState::Confirmed && r.ends_at() <= now);
        if !due {
            return Ok(false);
        }
        let event = Event::ReservationStateChanged {
            id,
            court_id,
            state: ReservationState::Completed,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(RESERVATIONS_COMPLETED_TOTAL).increment(1);
        Ok(true)
    }

    /// One completion pass over every court. Returns the completed ids.
    pub async fn complete_elapsed(&self) -> Vec<Ulid> {
        let mut completed = Vec::new();
        for id in self.collect_elapsed(self.clock.now()) {
            match self.complete_reservation(id).await {
                Ok(true) => completed.push(id),
                Ok(false) => {}
                Err(e) => tracing::warn!(reservation = %id, "failed to complete reservation: {e}"),
            }
        }
        completed
    }

    // ── Compaction ───────────────────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Held until the new file is in place so no acknowledged append lands
        // in the file being replaced.
        let _gate = self.compaction.write().await;
        let mut events = Vec::new();
        let courts: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        for cs in courts {
            let guard = cs.read().await;
            events.push(Event::CourtCreated {
                id: guard.id,
                name: guard.name.clone(),
                owner_id: guard.owner_id.clone(),
                window: guard.window.clone(),
                slot_minutes: guard.slot_minutes,
            });
            for (date, reason) in &guard.blocked {
                events.push(Event::DateBlocked {
                    court_id: guard.id,
                    date: *date,
                    reason: reason.clone(),
                });
            }
            // Each reservation already carries its final state and payment flag.
            for r in guard.reservations() {
                events.push(Event::ReservationRequested {
                    reservation: r.clone(),
                });
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
