mod availability;
mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod pricing;
mod queries;

pub use availability::{
    busy_periods, free_periods, merge_busy, merge_overlapping, rank_candidates,
    subtract_intervals, FreeSlotIter, FreeSlots,
};
pub use error::{EngineError, ErrorKind};
pub use lifecycle::{transition, Action, Step};
pub use mutations::{GuestRequest, ReservationOutcome, ReservationRequest, ServiceSelection};
pub use pricing::{resolve_stay, room_charge, ResolvedStay, StayRequest};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveTime, TimeDelta};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::catalog::{GuestDirectory, InMemoryCatalog, InMemoryDirectory, ServiceCatalog};
use crate::clock::{Clock, SystemClock};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

/// Write lock on one room, held until its commit is applied.
pub(super) type RoomGuard = OwnedRwLockWriteGuard<RoomState>;

/// Attempts at locking a reservation's room before giving up; it only
/// fails when the reservation keeps moving between rooms under us.
const LOCK_ATTEMPTS: usize = 8;

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

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task owning the WAL. Appends that arrive while a flush is
/// being prepared share one fsync:
/// 1. block for the first command;
/// 2. drain every append already queued;
/// 3. write the batch, fsync once, answer every sender;
/// 4. run any non-append command that cut the batch short.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();
    let result = write_batch(wal, &batch);
    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} events: {e}", batch.len());
    }
    for (_, tx) in batch {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn write_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so stray bytes never ride along
    // with the next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
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
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

async fn wal_append(wal_tx: &mpsc::Sender<WalCommand>, event: &Event) -> Result<(), EngineError> {
    let (tx, rx) = oneshot::channel();
    wal_tx
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

// ── Applying events ──────────────────────────────────────

/// Rooms whose state an event changes: the target room, plus the room a
/// reservation leaves on a move.
fn touched_rooms(event: &Event) -> impl Iterator<Item = Ulid> {
    let from = match event {
        Event::ReservationMoved { from_room, .. } => Some(*from_room),
        _ => None,
    };
    std::iter::once(event.room_id()).chain(from)
}

/// Apply the part of `event` that concerns `rs` (caller holds the lock).
fn apply_to_room(rs: &mut RoomState, event: &Event) {
    match event {
        Event::RoomRegistered { room } => rs.room = room.clone(),
        Event::RoomStatusChanged { status, .. } => rs.room.status = *status,
        Event::ReservationRecorded { reservation } => rs.upsert_reservation(reservation.clone()),
        Event::ReservationMoved { reservation, .. } => {
            if rs.room.id == reservation.room_id {
                rs.upsert_reservation(reservation.clone());
            } else {
                rs.remove_reservation(reservation.id);
            }
        }
    }
}

fn index_event(index: &DashMap<Ulid, Ulid>, event: &Event) {
    if let Event::ReservationRecorded { reservation } | Event::ReservationMoved { reservation, .. } =
        event
    {
        index.insert(reservation.id, reservation.room_id);
    }
}

/// A reservation id reserved in the index ahead of its commit.
pub(super) struct IdClaim {
    index: Arc<DashMap<Ulid, Ulid>>,
    id: Ulid,
    held: bool,
}

impl IdClaim {
    fn settle(&mut self) {
        self.held = false;
    }
}

impl Drop for IdClaim {
    fn drop(&mut self) {
        if self.held {
            self.index.remove(&self.id);
        }
    }
}

// ── Engine ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Time of day Overnight stays end.
    pub overnight_checkout: NaiveTime,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            overnight_checkout: NaiveTime::MIN + TimeDelta::hours(12),
        }
    }
}

/// Everything the engine reads from outside its own state.
pub struct Collaborators {
    pub catalog: Arc<dyn ServiceCatalog>,
    pub guests: Arc<dyn GuestDirectory>,
    pub clock: Arc<dyn Clock>,
    pub settings: Settings,
}

impl Collaborators {
    /// Empty in-memory catalog and directory, wall clock, default settings.
    pub fn in_memory() -> Self {
        Self {
            catalog: Arc::new(InMemoryCatalog::new()),
            guests: Arc::new(InMemoryDirectory::new()),
            clock: Arc::new(SystemClock),
            settings: Settings::default(),
        }
    }
}

pub struct Engine {
    pub state: Arc<DashMap<Ulid, SharedRoomState>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: reservation id → room id.
    pub(super) reservation_rooms: Arc<DashMap<Ulid, Ulid>>,
    /// Serializes adding rooms to `state` against compaction snapshots.
    pub(super) registry: Arc<Mutex<()>>,
    pub(super) catalog: Arc<dyn ServiceCatalog>,
    pub(super) guests: Arc<dyn GuestDirectory>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) settings: Settings,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        collaborators: Collaborators,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        // Replay into plain owned state; locks are only wrapped on at the end.
        let mut rooms: HashMap<Ulid, RoomState> = HashMap::new();
        let reservation_rooms = DashMap::new();
        for event in &events {
            if let Event::RoomRegistered { room } = event {
                rooms
                    .entry(room.id)
                    .or_insert_with(|| RoomState::new(room.clone()));
            }
            for room_id in touched_rooms(event) {
                if let Some(rs) = rooms.get_mut(&room_id) {
                    apply_to_room(rs, event);
                }
            }
            index_event(&reservation_rooms, event);
        }
        info!(
            rooms = rooms.len(),
            reservations = reservation_rooms.len(),
            events = events.len(),
            "replayed WAL {}",
            wal_path.display()
        );

        let state = rooms
            .into_iter()
            .map(|(id, rs)| (id, Arc::new(RwLock::new(rs))))
            .collect();

        Ok(Self {
            state: Arc::new(state),
            wal_tx,
            notify,
            reservation_rooms: Arc::new(reservation_rooms),
            registry: Arc::new(Mutex::new(())),
            catalog: collaborators.catalog,
            guests: collaborators.guests,
            clock: collaborators.clock,
            settings: collaborators.settings,
        })
    }

    pub fn settings(&self) -> Settings {
        self.settings
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn room_of(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_rooms.get(reservation_id).map(|e| *e.value())
    }

    pub(super) async fn lock_room(&self, room_id: Ulid) -> Result<RoomGuard, EngineError> {
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        Ok(rs.write_owned().await)
    }

    /// Lock the room currently holding `reservation_id`.
    pub(super) async fn lock_reservation(
        &self,
        reservation_id: Ulid,
    ) -> Result<RoomGuard, EngineError> {
        for _ in 0..LOCK_ATTEMPTS {
            let room_id = self
                .room_of(&reservation_id)
                .ok_or(EngineError::NotFound(reservation_id))?;
            let guard = self.lock_room(room_id).await?;
            if guard.reservation(&reservation_id).is_some() {
                return Ok(guard);
            }
        }
        Err(EngineError::NotFound(reservation_id))
    }

    /// Make `event` durable, apply it to the locked rooms, then publish
    /// `notices`.
    ///
    /// Runs in its own task that owns the guards: once started, a caller
    /// that gives up waiting cannot leave the WAL and memory disagreeing.
    pub(super) async fn commit(
        &self,
        guards: Vec<RoomGuard>,
        event: Event,
        notices: Vec<Notice>,
    ) -> Result<(), EngineError> {
        self.commit_claimed(guards, event, notices, None).await
    }

    /// Reserve a new reservation id in the index. Must be called with the
    /// target room locked; the claim is withdrawn when dropped unless the
    /// commit that records the reservation succeeds.
    pub(super) fn claim_reservation_id(
        &self,
        reservation_id: Ulid,
        room_id: Ulid,
    ) -> Result<IdClaim, EngineError> {
        match self.reservation_rooms.entry(reservation_id) {
            Entry::Occupied(_) => Err(EngineError::AlreadyExists(reservation_id)),
            Entry::Vacant(slot) => {
                slot.insert(room_id);
                Ok(IdClaim {
                    index: Arc::clone(&self.reservation_rooms),
                    id: reservation_id,
                    held: true,
                })
            }
        }
    }

    /// As `commit`, settling `claim` inside the commit task so a dropped
    /// caller cannot withdraw an id that is being recorded.
    pub(super) async fn commit_claimed(
        &self,
        mut guards: Vec<RoomGuard>,
        event: Event,
        notices: Vec<Notice>,
        mut claim: Option<IdClaim>,
    ) -> Result<(), EngineError> {
        let wal_tx = self.wal_tx.clone();
        let index = Arc::clone(&self.reservation_rooms);
        let notify = Arc::clone(&self.notify);
        let task = tokio::spawn(async move {
            wal_append(&wal_tx, &event).await?;
            for guard in guards.iter_mut() {
                let room_id = guard.room.id;
                if touched_rooms(&event).any(|id| id == room_id) {
                    apply_to_room(guard, &event);
                }
            }
            index_event(&index, &event);
            if let Some(claim) = claim.as_mut() {
                claim.settle();
            }
            drop(claim);
            drop(guards);
            let room_id = event.room_id();
            for notice in &notices {
                notify.send(room_id, notice);
            }
            Ok::<(), EngineError>(())
        });
        task.await
            .map_err(|e| EngineError::WalError(format!("commit task failed: {e}")))?
    }

    /// Add a brand-new room. The room is visible (locked) before the WAL
    /// write and withdrawn again if the write fails.
    pub(super) async fn commit_new_room(&self, room: Room) -> Result<(), EngineError> {
        let registry = Arc::clone(&self.registry).lock_owned().await;
        if self.state.contains_key(&room.id) {
            return Err(EngineError::AlreadyExists(room.id));
        }
        let shared: SharedRoomState = Arc::new(RwLock::new(RoomState::new(room.clone())));
        let guard = Arc::clone(&shared).write_owned().await;
        self.state.insert(room.id, Arc::clone(&shared));

        let wal_tx = self.wal_tx.clone();
        let state = Arc::clone(&self.state);
        let task = tokio::spawn(async move {
            let event = Event::RoomRegistered { room };
            let result = wal_append(&wal_tx, &event).await;
            if result.is_err() {
                state.remove_if(&event.room_id(), |_, v| Arc::ptr_eq(v, &shared));
            }
            drop(guard);
            drop(registry);
            result
        });
        task.await
            .map_err(|e| EngineError::WalError(format!("commit task failed: {e}")))?
    }
}
