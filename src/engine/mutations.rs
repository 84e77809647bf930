use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, now, validate_guest, validate_range};
use super::{Engine, EngineError, WalCommand};

impl Engine {
    pub async fn create_room(&self, id: RoomId, name: String) -> Result<Room, EngineError> {
        if self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if name.len() > MAX_ROOM_NAME_LEN {
            return Err(EngineError::LimitExceeded("room name too long"));
        }
        if self.rooms.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let at = now();
        let room = Room {
            id,
            name,
            created_at: at,
            updated_at: at,
        };
        let event = Event::RoomCreated { room: room.clone() };
        self.wal_append(&event).await?;
        self.rooms
            .insert(id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
        tracing::info!(room_id = %id, name = %room.name, "room created");
        Ok(room)
    }

    /// Return the room with this exact name, creating it if absent.
    pub async fn ensure_room(&self, name: &str) -> Result<Room, EngineError> {
        if let Some(room) = self.list_rooms().await.into_iter().find(|r| r.name == name) {
            return Ok(room);
        }
        self.create_room(Ulid::new(), name.to_string()).await
    }

    /// Insert a reservation and its restriction as one WAL record.
    ///
    /// The overlap check runs under the room's write lock, so two requests
    /// racing for the same nights cannot both succeed.
    pub async fn place_reservation(
        &self,
        guest: Guest,
        room_id: RoomId,
        range: DateRange,
    ) -> Result<ReservationId, EngineError> {
        validate_range(&range)?;
        validate_guest(&guest)?;
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        if guard.restrictions.len() >= MAX_RESTRICTIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many restrictions on room"));
        }

        check_no_conflict(&guard, &range)?;

        let at = now();
        let reservation = Reservation {
            id: Ulid::new(),
            guest,
            room_id,
            range,
            processed: false,
            created_at: at,
            updated_at: at,
        };
        let id = reservation.id;
        let event = Event::ReservationPlaced {
            reservation,
            restriction_id: Ulid::new(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(id)
    }

    pub async fn set_processed(
        &self,
        id: ReservationId,
        processed: bool,
    ) -> Result<(), EngineError> {
        let (room_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !self.reservations.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::ReservationProcessed {
            id,
            room_id,
            processed,
            at: now(),
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Replace the guest details of an existing reservation. Last write wins.
    pub async fn update_guest(&self, id: ReservationId, guest: Guest) -> Result<(), EngineError> {
        validate_guest(&guest)?;
        let (room_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !self.reservations.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::GuestUpdated {
            id,
            room_id,
            guest,
            at: now(),
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Remove a reservation together with its restriction.
    pub async fn delete_reservation(&self, id: ReservationId) -> Result<(), EngineError> {
        let (room_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !self.reservations.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::ReservationDeleted { id, room_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Owner blocks may overlap reservations and each other.
    pub async fn add_owner_block(
        &self,
        room_id: RoomId,
        range: DateRange,
    ) -> Result<RestrictionId, EngineError> {
        validate_range(&range)?;
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        if guard.restrictions.len() >= MAX_RESTRICTIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many restrictions on room"));
        }

        let at = now();
        let restriction = Restriction {
            id: Ulid::new(),
            room_id,
            range,
            kind: RestrictionKind::OwnerBlock,
            created_at: at,
            updated_at: at,
        };
        let id = restriction.id;
        let event = Event::BlockAdded { restriction };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(id)
    }

    pub async fn remove_owner_block(&self, id: RestrictionId) -> Result<(), EngineError> {
        let (room_id, mut guard) = self.resolve_entity_write(&id).await?;
        let is_block = guard
            .restrictions
            .iter()
            .any(|r| r.id == id && r.kind == RestrictionKind::OwnerBlock);
        if !is_block {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::BlockRemoved { id, room_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Rewrite the WAL with only the events needed to recreate the current
    /// state: rooms, live reservations (with their latest guest and status),
    /// and owner blocks.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Read guards are held until the swap so no write lands in the old
        // log after its room was snapshotted.
        let mut guards = Vec::new();
        for rs in self.room_states() {
            guards.push(rs.read_owned().await);
        }

        let mut events = Vec::new();
        for guard in &guards {
            events.push(Event::RoomCreated {
                room: guard.room.clone(),
            });
            for restriction in &guard.restrictions {
                match restriction.kind {
                    RestrictionKind::Reservation(res_id) => {
                        if let Some(reservation) = self.reservations.get(&res_id) {
                            events.push(Event::ReservationPlaced {
                                reservation: reservation.value().clone(),
                                restriction_id: restriction.id,
                            });
                        }
                    }
                    RestrictionKind::OwnerBlock => events.push(Event::BlockAdded {
                        restriction: restriction.clone(),
                    }),
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(guards);
        result
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
