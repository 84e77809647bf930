use crate::model::*;

use super::conflict::validate_range;
use super::{Engine, EngineError};

impl Engine {
    /// True iff no reservation restriction on the room overlaps `range`.
    /// Abutting stays share a boundary day and do not count.
    pub async fn is_room_available(
        &self,
        room_id: RoomId,
        range: &DateRange,
    ) -> Result<bool, EngineError> {
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard.reserved_count(range) == 0)
    }

    /// Every room free of reservations over `range`, ordered by room id.
    pub async fn available_rooms(&self, range: &DateRange) -> Result<Vec<Room>, EngineError> {
        validate_range(range)?;
        let mut free = Vec::new();
        for rs in self.room_states() {
            let guard = rs.read().await;
            if guard.reserved_count(range) == 0 {
                free.push(guard.room.clone());
            }
        }
        free.sort_by_key(|r| r.id);
        Ok(free)
    }

    /// Reservations and owner blocks overlapping `range`, ordered by start.
    pub async fn restrictions_for_room(
        &self,
        room_id: RoomId,
        range: &DateRange,
    ) -> Result<Vec<Restriction>, EngineError> {
        let rs = self
            .get_room_state(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard.overlapping(range).cloned().collect())
    }

    pub async fn get_room(&self, id: &RoomId) -> Option<Room> {
        let rs = self.get_room_state(id)?;
        let guard = rs.read().await;
        Some(guard.room.clone())
    }

    pub async fn list_rooms(&self) -> Vec<Room> {
        let mut rooms = Vec::with_capacity(self.rooms.len());
        for rs in self.room_states() {
            rooms.push(rs.read().await.room.clone());
        }
        rooms.sort_by_key(|r| r.id);
        rooms
    }

    pub fn get_reservation(&self, id: &ReservationId) -> Result<Reservation, EngineError> {
        self.reservations
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(*id))
    }

    /// Reservations matching `filter`, ordered by arrival date.
    pub fn list_reservations(&self, filter: ReservationFilter) -> Vec<Reservation> {
        let mut out: Vec<Reservation> = self
            .reservations
            .iter()
            .filter(|e| filter.matches(e.value()))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| {
            a.range
                .start()
                .cmp(&b.range.start())
                .then_with(|| a.id.cmp(&b.id))
        });
        out
    }
}
