mod conflict;
mod error;
mod mutations;
mod queries;

pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

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

/// Background task that owns the WAL. Appends that queue up while a flush
/// is in progress are written together and share one fsync.
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

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let _ = tx.send(match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            });
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &[(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so no partial bytes leak into the next batch.
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
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// In-memory booking store backed by the WAL.
///
/// Each room's restrictions live behind their own `RwLock`; every write
/// to a room (reservation, block, status change) is serialized on it.
pub struct Engine {
    pub(super) rooms: DashMap<RoomId, SharedRoomState>,
    pub(super) reservations: DashMap<ReservationId, Reservation>,
    /// Reverse lookup: reservation / restriction id → room id
    pub(super) entity_to_room: DashMap<Ulid, RoomId>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            reservations: DashMap::new(),
            entity_to_room: DashMap::new(),
            wal_tx,
        };

        // Sole owner during replay: try_write never contends, and a blocking
        // lock here could stall the runtime.
        for event in &events {
            if let Event::RoomCreated { room } = event {
                engine
                    .rooms
                    .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
                continue;
            }
            if let Some(rs) = engine.get_room_state(&event.room_id()) {
                let mut guard = rs.try_write().expect("replay: uncontended write");
                engine.apply(&mut guard, event);
            }
        }

        tracing::info!(
            rooms = engine.rooms.len(),
            reservations = engine.reservations.len(),
            "engine replayed {} events",
            events.len()
        );
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
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

    pub fn get_room_state(&self, id: &RoomId) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub(super) fn room_for_entity(&self, entity_id: &Ulid) -> Option<RoomId> {
        self.entity_to_room.get(entity_id).map(|e| *e.value())
    }

    /// Snapshot of every room's state handle, without holding DashMap shards.
    pub(super) fn room_states(&self) -> Vec<SharedRoomState> {
        self.rooms.iter().map(|e| e.value().clone()).collect()
    }

    /// Apply an event to a room (caller holds the room's write lock).
    fn apply(&self, rs: &mut RoomState, event: &Event) {
        match event {
            Event::ReservationPlaced { reservation, restriction_id } => {
                rs.insert_restriction(Restriction {
                    id: *restriction_id,
                    room_id: reservation.room_id,
                    range: reservation.range,
                    kind: RestrictionKind::Reservation(reservation.id),
                    created_at: reservation.created_at,
                    updated_at: reservation.created_at,
                });
                self.entity_to_room.insert(reservation.id, reservation.room_id);
                self.entity_to_room.insert(*restriction_id, reservation.room_id);
                self.reservations.insert(reservation.id, reservation.clone());
            }
            Event::ReservationProcessed { id, processed, at, .. } => {
                if let Some(mut res) = self.reservations.get_mut(id) {
                    res.processed = *processed;
                    res.updated_at = *at;
                }
            }
            Event::GuestUpdated { id, guest, at, .. } => {
                if let Some(mut res) = self.reservations.get_mut(id) {
                    res.guest = guest.clone();
                    res.updated_at = *at;
                }
            }
            Event::ReservationDeleted { id, .. } => {
                if let Some(restriction) = rs.remove_reservation(*id) {
                    self.entity_to_room.remove(&restriction.id);
                }
                self.entity_to_room.remove(id);
                self.reservations.remove(id);
            }
            Event::BlockAdded { restriction } => {
                self.entity_to_room.insert(restriction.id, restriction.room_id);
                rs.insert_restriction(restriction.clone());
            }
            Event::BlockRemoved { id, .. } => {
                rs.remove_restriction(*id);
                self.entity_to_room.remove(id);
            }
            // Rooms are inserted at the DashMap level, not here
            Event::RoomCreated { .. } => {}
        }
    }

    /// WAL-append, then apply. The event is durable before it is visible.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply(rs, event);
        Ok(())
    }

    /// Lookup entity → room, acquire that room's write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(RoomId, tokio::sync::OwnedRwLockWriteGuard<RoomState>), EngineError> {
        let room_id = self
            .room_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        Ok((room_id, rs.write_owned().await))
    }
}
