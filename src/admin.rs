//! Staff operations: review, edit, process and delete reservations, block
//! rooms, and the monthly occupancy calendar.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

use crate::calendar::{CalendarView, MonthWindow, build_calendar};
use crate::forms::{Form, GuestForm};
use crate::model::*;
use crate::repository::StorageError;
use crate::session::SessionToken;
use crate::workflow::AppContext;

pub const CHANGES_SAVED: &str = "Changes saved";
pub const MARKED_PROCESSED: &str = "Reservation marked as processed";
pub const RESERVATION_DELETED: &str = "Reservation deleted";
pub const ROOM_BLOCKED: &str = "Room blocked";
pub const BLOCK_REMOVED: &str = "Block removed";

#[derive(Debug, Error)]
pub enum AdminError {
    #[error(transparent)]
    InvalidRange(#[from] DateError),
    #[error("guest details failed validation")]
    Validation(Form),
    #[error("not found: {0}")]
    NotFound(ulid::Ulid),
    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for AdminError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Engine(crate::engine::EngineError::NotFound(id)) => {
                AdminError::NotFound(id)
            }
            other => AdminError::Storage(other),
        }
    }
}

/// A reservation with the name of its room, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationRow {
    pub reservation: Reservation,
    pub room_name: String,
}

pub async fn list_reservations(
    ctx: &AppContext,
    filter: ReservationFilter,
) -> Result<Vec<ReservationRow>, AdminError> {
    let names: HashMap<RoomId, String> = ctx
        .repo
        .all_rooms()
        .await?
        .into_iter()
        .map(|r| (r.id, r.name))
        .collect();
    let rows = ctx
        .repo
        .list_reservations(filter)
        .await?
        .into_iter()
        .map(|reservation| ReservationRow {
            room_name: names.get(&reservation.room_id).cloned().unwrap_or_default(),
            reservation,
        })
        .collect();
    Ok(rows)
}

pub async fn show_reservation(
    ctx: &AppContext,
    id: ReservationId,
) -> Result<ReservationRow, AdminError> {
    let reservation = ctx.repo.get_reservation(id).await?;
    let room_name = ctx
        .repo
        .get_room(reservation.room_id)
        .await?
        .map(|r| r.name)
        .unwrap_or_default();
    Ok(ReservationRow {
        reservation,
        room_name,
    })
}

/// Replace the guest details after the same checks the booking form applies.
pub async fn update_reservation(
    ctx: &AppContext,
    token: SessionToken,
    id: ReservationId,
    input: &GuestForm,
) -> Result<(), AdminError> {
    let guest = input.validate().map_err(AdminError::Validation)?;
    ctx.repo.update_guest(id, guest).await?;
    ctx.session(token).put_flash(CHANGES_SAVED);
    tracing::info!(reservation_id = %id, "reservation updated");
    Ok(())
}

pub async fn process_reservation(
    ctx: &AppContext,
    token: SessionToken,
    id: ReservationId,
) -> Result<(), AdminError> {
    ctx.repo.set_processed(id, true).await?;
    ctx.session(token).put_flash(MARKED_PROCESSED);
    tracing::info!(reservation_id = %id, "reservation processed");
    Ok(())
}

pub async fn delete_reservation(
    ctx: &AppContext,
    token: SessionToken,
    id: ReservationId,
) -> Result<(), AdminError> {
    ctx.repo.delete_reservation(id).await?;
    ctx.session(token).put_flash(RESERVATION_DELETED);
    tracing::info!(reservation_id = %id, "reservation deleted");
    Ok(())
}

pub async fn calendar(ctx: &AppContext, year: i32, month: u32) -> Result<CalendarView, AdminError> {
    let window = MonthWindow::new(year, month)?;
    Ok(build_calendar(ctx.repo.as_ref(), window).await?)
}

pub async fn block_room(
    ctx: &AppContext,
    token: SessionToken,
    room_id: RoomId,
    start: &str,
    end: &str,
) -> Result<RestrictionId, AdminError> {
    let range = DateRange::parse_stay(start, end)?;
    let id = ctx.repo.add_owner_block(room_id, range).await?;
    ctx.session(token).put_flash(ROOM_BLOCKED);
    tracing::info!(room_id = %room_id, %range, block_id = %id, "room blocked");
    Ok(id)
}

pub async fn remove_block(
    ctx: &AppContext,
    token: SessionToken,
    id: RestrictionId,
) -> Result<(), AdminError> {
    ctx.repo.remove_owner_block(id).await?;
    ctx.session(token).put_flash(BLOCK_REMOVED);
    tracing::info!(block_id = %id, "block removed");
    Ok(())
}
