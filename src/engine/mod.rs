mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{compute_free_slots, free_ranges, merge_overlapping, subtract_ranges, SlotIter};
pub use conflict::{check_conflict, find_conflict, parse_range, ConflictResult, CourtRules, SlotRequest};
pub use error::{EngineError, ScheduleViolation, ValidationError};
pub use mutations::CourtPatch;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::clock::Clock;
use crate::model::*;
use crate::wal::Wal;

pub type SharedCourtState = Arc<RwLock<CourtState>>;

/// Engine-wide policy knobs.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// How long before start a player may still cancel their own reservation.
    pub cancel_notice_minutes: i64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            cancel_notice_minutes: 120,
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} events: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedCourtState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Taken shared by every mutation before its court lock, and exclusively
    /// by compaction while it snapshots and swaps the WAL.
    pub(super) compaction: RwLock<()>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) options: EngineOptions,
    /// Reverse lookup: reservation id → court id
    pub(super) reservation_to_court: DashMap<Ulid, Ulid>,
}

/// Apply an event directly to a CourtState. The caller holds the lock.
fn apply_to_court(cs: &mut CourtState, event: &Event, reservation_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::CourtUpdated {
            name,
            window,
            slot_minutes,
            ..
        } => {
            cs.name = name.clone();
            cs.window = window.clone();
            cs.slot_minutes = *slot_minutes;
        }
        Event::DateBlocked { date, reason, .. } => {
            cs.blocked.insert(*date, reason.clone());
        }
        Event::DateUnblocked { date, .. } => {
            cs.blocked.remove(date);
        }
        Event::ReservationRequested { reservation } => {
            let id = reservation.id;
            if let Some(owner) = reservation_map.get(&id).map(|e| *e.value())
                && owner != cs.id
            {
                tracing::warn!("skipping reservation {id} on court {}: already on court {owner}", cs.id);
                return;
            }
            match cs.insert_reservation(reservation.clone()) {
                Ok(()) => {
                    reservation_map.insert(id, cs.id);
                }
                Err(e) => tracing::warn!("skipping reservation {id} on court {}: {e}", cs.id),
            }
        }
        Event::ReservationRescheduled { id, date, range, .. } => {
            if let Err(e) = cs.move_reservation(*id, *date, *range) {
                tracing::warn!("skipping reschedule of {id}: {e}");
            }
        }
        Event::ReservationStateChanged { id, state, .. } => {
            if cs.set_state(*id, *state).is_none() {
                tracing::warn!("state change for unknown reservation {id}");
            }
        }
        Event::ReservationPaidSet { id, paid, .. } => {
            if cs.set_paid(*id, *paid).is_none() {
                tracing::warn!("payment flag for unknown reservation {id}");
            }
        }
        // CourtCreated/Deleted are handled at the DashMap level, not here
        Event::CourtCreated { .. } | Event::CourtDeleted { .. } => {}
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        clock: Arc<dyn Clock>,
        options: EngineOptions,
    ) -> io::Result<Self> {
        let (events, wal) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            compaction: RwLock::new(()),
            clock,
            options,
            reservation_to_court: DashMap::new(),
        };

        // We're the sole owner of these Arcs during replay, so try_write always
        // succeeds. Never use blocking_write here: this may run inside a runtime.
        for event in &events {
            match event {
                Event::CourtCreated {
                    id,
                    name,
                    owner_id,
                    window,
                    slot_minutes,
                } => {
                    let cs = CourtState::new(*id, name.clone(), owner_id.clone(), window.clone(), *slot_minutes);
                    engine.state.insert(*id, Arc::new(RwLock::new(cs)));
                }
                Event::CourtDeleted { id } => engine.forget_court(id),
                other => {
                    if let Some(court_id) = event_court_id(other)
                        && let Some(entry) = engine.state.get(&court_id) {
                            let cs = entry.clone();
                            match cs.try_write() {
                                Ok(mut guard) => apply_to_court(&mut guard, other, &engine.reservation_to_court),
                                Err(_) => tracing::warn!("replay: court {court_id} unexpectedly locked"),
                            }
                        }
                }
            }
        }

        metrics::gauge!(crate::observability::COURTS_ACTIVE).set(engine.state.len() as f64);
        tracing::info!(
            "replayed {} events: {} courts, {} reservations",
            events.len(),
            engine.state.len(),
            engine.reservation_to_court.len()
        );
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_court(&self, id: &Ulid) -> Option<SharedCourtState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn court_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_court.get(reservation_id).map(|e| *e.value())
    }

    /// WAL-append + apply in one call.
    pub(super) async fn persist_and_apply(&self, cs: &mut CourtState, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_court(cs, event, &self.reservation_to_court);
        Ok(())
    }

    /// Lookup reservation → court, get court, acquire write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<CourtState>), EngineError> {
        let court_id = self
            .court_for_reservation(reservation_id)
            .ok_or(EngineError::NotFound(*reservation_id))?;
        let cs = self
            .get_court(&court_id)
            .ok_or(EngineError::NotFound(court_id))?;
        let guard = cs.write_owned().await;
        if !self.state.contains_key(&court_id) {
            return Err(EngineError::NotFound(court_id));
        }
        Ok((court_id, guard))
    }

    /// Drop a court and every reverse-index entry pointing at it.
    pub(super) fn forget_court(&self, id: &Ulid) {
        self.state.remove(id);
        self.reservation_to_court.retain(|_, court| court != id);
    }
}

/// Extract the court id from an event (for non-Create/Delete events).
fn event_court_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::DateBlocked { court_id, .. }
        | Event::DateUnblocked { court_id, .. }
        | Event::ReservationRescheduled { court_id, .. }
        | Event::ReservationStateChanged { court_id, .. }
        | Event::ReservationPaidSet { court_id, .. } => Some(*court_id),
        Event::ReservationRequested { reservation } => Some(reservation.court_id),
        Event::CourtUpdated { id, .. } => Some(*id),
        Event::CourtCreated { .. } | Event::CourtDeleted { .. } => None,
    }
}
