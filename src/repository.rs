use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage call timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl StorageError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Engine(EngineError::Conflict(_)))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::Engine(EngineError::NotFound(_)))
    }
}

/// The persistence seam used by the booking workflow and admin operations.
///
/// Implementations must write a reservation and its restriction atomically.
#[async_trait]
pub trait AvailabilityRepository: Send + Sync {
    async fn is_room_available(
        &self,
        room_id: RoomId,
        range: DateRange,
    ) -> Result<bool, StorageError>;
    async fn available_rooms(&self, range: DateRange) -> Result<Vec<Room>, StorageError>;
    async fn restrictions_for_room(
        &self,
        room_id: RoomId,
        range: DateRange,
    ) -> Result<Vec<Restriction>, StorageError>;
    async fn persist_reservation(
        &self,
        guest: Guest,
        room_id: RoomId,
        range: DateRange,
    ) -> Result<ReservationId, StorageError>;
    async fn set_processed(&self, id: ReservationId, processed: bool) -> Result<(), StorageError>;
    async fn update_guest(&self, id: ReservationId, guest: Guest) -> Result<(), StorageError>;
    async fn delete_reservation(&self, id: ReservationId) -> Result<(), StorageError>;
    async fn list_reservations(
        &self,
        filter: ReservationFilter,
    ) -> Result<Vec<Reservation>, StorageError>;
    async fn get_reservation(&self, id: ReservationId) -> Result<Reservation, StorageError>;
    async fn get_room(&self, id: RoomId) -> Result<Option<Room>, StorageError>;
    async fn all_rooms(&self) -> Result<Vec<Room>, StorageError>;
    async fn add_owner_block(
        &self,
        room_id: RoomId,
        range: DateRange,
    ) -> Result<RestrictionId, StorageError>;
    async fn remove_owner_block(&self, id: RestrictionId) -> Result<(), StorageError>;
}

/// [`AvailabilityRepository`] over the WAL-backed [`Engine`]. Every call is
/// bounded by `timeout`.
pub struct EngineRepository {
    engine: Arc<Engine>,
    timeout: Duration,
}

impl EngineRepository {
    pub fn new(engine: Arc<Engine>, timeout: Duration) -> Self {
        Self { engine, timeout }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, EngineError>>,
    {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(inner) => inner.map_err(StorageError::from),
            Err(_) => Err(StorageError::Timeout(self.timeout)),
        };
        metrics::histogram!(observability::STORAGE_DURATION_SECONDS, "op" => op)
            .record(start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            let kind = observability::storage_error_label(e);
            metrics::counter!(observability::STORAGE_ERRORS_TOTAL, "op" => op, "kind" => kind)
                .increment(1);
        }
        result
    }
}

#[async_trait]
impl AvailabilityRepository for EngineRepository {
    async fn is_room_available(
        &self,
        room_id: RoomId,
        range: DateRange,
    ) -> Result<bool, StorageError> {
        self.bounded("is_room_available", self.engine.is_room_available(room_id, &range))
            .await
    }

    async fn available_rooms(&self, range: DateRange) -> Result<Vec<Room>, StorageError> {
        self.bounded("available_rooms", self.engine.available_rooms(&range)).await
    }

    async fn restrictions_for_room(
        &self,
        room_id: RoomId,
        range: DateRange,
    ) -> Result<Vec<Restriction>, StorageError> {
        self.bounded(
            "restrictions_for_room",
            self.engine.restrictions_for_room(room_id, &range),
        )
        .await
    }

    async fn persist_reservation(
        &self,
        guest: Guest,
        room_id: RoomId,
        range: DateRange,
    ) -> Result<ReservationId, StorageError> {
        self.bounded(
            "persist_reservation",
            self.engine.place_reservation(guest, room_id, range),
        )
        .await
    }

    async fn set_processed(&self, id: ReservationId, processed: bool) -> Result<(), StorageError> {
        self.bounded("set_processed", self.engine.set_processed(id, processed)).await
    }

    async fn update_guest(&self, id: ReservationId, guest: Guest) -> Result<(), StorageError> {
        self.bounded("update_guest", self.engine.update_guest(id, guest)).await
    }

    async fn delete_reservation(&self, id: ReservationId) -> Result<(), StorageError> {
        self.bounded("delete_reservation", self.engine.delete_reservation(id)).await
    }

    async fn list_reservations(
        &self,
        filter: ReservationFilter,
    ) -> Result<Vec<Reservation>, StorageError> {
        self.bounded("list_reservations", async {
            Ok(self.engine.list_reservations(filter))
        })
        .await
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Reservation, StorageError> {
        self.bounded("get_reservation", async { self.engine.get_reservation(&id) })
            .await
    }

    async fn get_room(&self, id: RoomId) -> Result<Option<Room>, StorageError> {
        self.bounded("get_room", async { Ok(self.engine.get_room(&id).await) })
            .await
    }

    async fn all_rooms(&self) -> Result<Vec<Room>, StorageError> {
        self.bounded("all_rooms", async { Ok(self.engine.list_rooms().await) })
            .await
    }

    async fn add_owner_block(
        &self,
        room_id: RoomId,
        range: DateRange,
    ) -> Result<RestrictionId, StorageError> {
        self.bounded("add_owner_block", self.engine.add_owner_block(room_id, range))
            .await
    }

    async fn remove_owner_block(&self, id: RestrictionId) -> Result<(), StorageError> {
        self.bounded("remove_owner_block", self.engine.remove_owner_block(id)).await
    }
}
