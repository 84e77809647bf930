//! The guest-facing booking flow: search, choose a room, enter details,
//! confirm. Progress is carried between requests in the session draft.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::forms::{Form, GuestForm, form_for};
use crate::model::*;
use crate::notify::{MailQueue, confirmation_body};
use crate::observability;
use crate::repository::{AvailabilityRepository, StorageError};
use crate::session::*;

pub const NO_AVAILABILITY: &str = "No availability";
pub const MISSING_CONFIRMATION: &str = "reservation not found in session";
pub const AVAILABILITY_LOST: &str = "Sorry, that room is no longer available for those dates";
pub const CONFIRMATION_SUBJECT: &str = "Reservation Confirmation";

/// Everything a request handler needs, passed explicitly.
#[derive(Clone)]
pub struct AppContext {
    pub repo: Arc<dyn AvailabilityRepository>,
    pub sessions: Arc<dyn SessionStore>,
    pub mail: MailQueue,
}

impl AppContext {
    pub fn session(&self, token: SessionToken) -> Session<'_> {
        Session::new(self.sessions.as_ref(), token)
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    InvalidRange(#[from] DateError),
    #[error("guest details failed validation")]
    Validation(Form),
    #[error("room {room_id} is no longer available for {range}")]
    AvailabilityLost { room_id: RoomId, range: DateRange },
    #[error("no reservation in progress")]
    MissingDraft,
    #[error("{}", MISSING_CONFIRMATION)]
    MissingConfirmation,
    #[error("room {0} was not offered for this search")]
    RoomNotOffered(RoomId),
    #[error("room {0} not found")]
    RoomNotFound(RoomId),
    #[error("reservation {0} not found")]
    ReservationNotFound(ReservationId),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl WorkflowError {
    /// Storage failures are the only errors not handled at the user boundary.
    pub fn is_server_error(&self) -> bool {
        matches!(self, WorkflowError::Storage(_))
    }
}

/// Where a session stands in the booking flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Idle,
    Searching,
    RoomsOffered,
    RoomChosen,
    DetailsPending,
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    RoomsOffered { range: DateRange, rooms: Vec<Room> },
    NoAvailability { range: DateRange },
}

/// Result of the single-room availability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilityCheck {
    pub ok: bool,
    pub message: String,
    pub room_id: String,
    pub start_date: String,
    pub end_date: String,
}

fn room_lookup(err: StorageError, room_id: RoomId) -> WorkflowError {
    if err.is_not_found() {
        WorkflowError::RoomNotFound(room_id)
    } else {
        err.into()
    }
}

/// Offer every room free over `[start, end)`. An empty result leaves the
/// session idle with a "No availability" error message.
pub async fn search(
    ctx: &AppContext,
    token: SessionToken,
    start: &str,
    end: &str,
) -> Result<SearchOutcome, WorkflowError> {
    let range = DateRange::parse_stay(start, end).inspect_err(|_| {
        metrics::counter!(observability::SEARCHES_TOTAL, "outcome" => "invalid").increment(1);
    })?;
    offer_rooms(ctx, token, range).await
}

/// Run the search again for the range already in the draft. This is where
/// a guest lands after the chosen room was taken by someone else.
pub async fn reoffer(
    ctx: &AppContext,
    token: SessionToken,
) -> Result<SearchOutcome, WorkflowError> {
    let range = ctx
        .session(token)
        .draft()
        .and_then(|d| d.range)
        .ok_or(WorkflowError::MissingDraft)?;
    offer_rooms(ctx, token, range).await
}

async fn offer_rooms(
    ctx: &AppContext,
    token: SessionToken,
    range: DateRange,
) -> Result<SearchOutcome, WorkflowError> {
    let session = ctx.session(token);
    let previous = session.draft();
    session.put_draft(ReservationDraft {
        range: Some(range),
        guest: previous.as_ref().and_then(|d| d.guest.clone()),
        ..Default::default()
    });

    let rooms = ctx.repo.available_rooms(range).await?;
    if rooms.is_empty() {
        session.remove_draft();
        session.put_error(NO_AVAILABILITY);
        metrics::counter!(observability::SEARCHES_TOTAL, "outcome" => "none").increment(1);
        tracing::debug!(%range, "no rooms available");
        return Ok(SearchOutcome::NoAvailability { range });
    }

    session.put_draft(ReservationDraft {
        range: Some(range),
        offered: rooms.iter().map(|r| r.id).collect(),
        guest: previous.and_then(|d| d.guest),
        stage: DraftStage::RoomsOffered,
        ..Default::default()
    });
    metrics::counter!(observability::SEARCHES_TOTAL, "outcome" => "offered").increment(1);
    Ok(SearchOutcome::RoomsOffered { range, rooms })
}

/// Check one room without touching the session.
pub async fn check_availability(
    ctx: &AppContext,
    room_id: RoomId,
    start: &str,
    end: &str,
) -> Result<AvailabilityCheck, WorkflowError> {
    let range = DateRange::parse_stay(start, end)?;
    let ok = ctx
        .repo
        .is_room_available(room_id, range)
        .await
        .map_err(|e| room_lookup(e, room_id))?;
    Ok(AvailabilityCheck {
        ok,
        message: String::new(),
        room_id: room_id.to_string(),
        start_date: range.start().format(DATE_FORMAT).to_string(),
        end_date: range.end().format(DATE_FORMAT).to_string(),
    })
}

/// Pick one of the rooms the last search offered.
pub async fn choose_room(
    ctx: &AppContext,
    token: SessionToken,
    room_id: RoomId,
) -> Result<ReservationDraft, WorkflowError> {
    let session = ctx.session(token);
    let mut draft = session
        .draft()
        .filter(|d| d.range.is_some())
        .ok_or(WorkflowError::MissingDraft)?;
    if !draft.offered.contains(&room_id) {
        return Err(WorkflowError::RoomNotOffered(room_id));
    }
    let room = ctx
        .repo
        .get_room(room_id)
        .await?
        .ok_or(WorkflowError::RoomNotFound(room_id))?;

    draft.room_id = Some(room.id);
    draft.room_name = Some(room.name);
    draft.stage = DraftStage::RoomChosen;
    session.put_draft(draft.clone());
    Ok(draft)
}

/// Start a draft directly at a room and range, skipping the search page.
pub async fn book_room(
    ctx: &AppContext,
    token: SessionToken,
    room_id: RoomId,
    start: &str,
    end: &str,
) -> Result<ReservationDraft, WorkflowError> {
    let range = DateRange::parse_stay(start, end)?;
    let room = ctx
        .repo
        .get_room(room_id)
        .await?
        .ok_or(WorkflowError::RoomNotFound(room_id))?;

    let session = ctx.session(token);
    let draft = ReservationDraft {
        range: Some(range),
        offered: vec![room.id],
        room_id: Some(room.id),
        room_name: Some(room.name),
        guest: session.draft().and_then(|d| d.guest),
        stage: DraftStage::RoomChosen,
    };
    session.put_draft(draft.clone());
    Ok(draft)
}

/// The draft and a form pre-filled with any details entered so far.
pub async fn reservation_form(
    ctx: &AppContext,
    token: SessionToken,
) -> Result<(ReservationDraft, Form), WorkflowError> {
    let session = ctx.session(token);
    let mut draft = session
        .draft()
        .filter(|d| d.selection().is_some())
        .ok_or(WorkflowError::MissingDraft)?;
    let form = draft.guest.as_ref().map(form_for).unwrap_or_default();
    if draft.stage == DraftStage::RoomChosen {
        draft.stage = DraftStage::DetailsPending;
        session.put_draft(draft.clone());
    }
    Ok((draft, form))
}

/// Validate guest details, re-check availability and persist.
///
/// The entered details stay in the draft on every failure path, so the
/// form can be shown again with them.
pub async fn submit_details(
    ctx: &AppContext,
    token: SessionToken,
    input: &GuestForm,
) -> Result<Confirmation, WorkflowError> {
    let session = ctx.session(token);
    let mut draft = session.draft().ok_or(WorkflowError::MissingDraft)?;
    let (room_id, range) = draft.selection().ok_or(WorkflowError::MissingDraft)?;

    draft.guest = Some(input.guest());
    draft.stage = DraftStage::DetailsPending;
    session.put_draft(draft.clone());

    let guest = match input.validate() {
        Ok(guest) => guest,
        Err(form) => {
            metrics::counter!(observability::RESERVATIONS_TOTAL, "outcome" => "invalid")
                .increment(1);
            return Err(WorkflowError::Validation(form));
        }
    };

    let available = ctx
        .repo
        .is_room_available(room_id, range)
        .await
        .map_err(|e| room_lookup(e, room_id))?;
    if !available {
        return Err(availability_lost(&session, draft, room_id, range));
    }

    let id = match ctx.repo.persist_reservation(guest, room_id, range).await {
        Ok(id) => id,
        Err(e) if e.is_conflict() => return Err(availability_lost(&session, draft, room_id, range)),
        Err(e) => return Err(room_lookup(e, room_id)),
    };
    let reservation = ctx.repo.get_reservation(id).await?;

    let room_name = draft.room_name.clone().unwrap_or_default();
    ctx.mail.enqueue(
        &reservation.guest.email,
        CONFIRMATION_SUBJECT,
        confirmation_body(&reservation.guest.first_name, &room_name, &reservation.range),
    );

    let confirmation = Confirmation {
        reservation,
        room_name,
    };
    session.remove_draft();
    session.put_confirmed(confirmation.clone());
    metrics::counter!(observability::RESERVATIONS_TOTAL, "outcome" => "confirmed").increment(1);
    tracing::info!(reservation_id = %id, room_id = %room_id, %range, "reservation confirmed");
    Ok(confirmation)
}

fn availability_lost(
    session: &Session<'_>,
    mut draft: ReservationDraft,
    room_id: RoomId,
    range: DateRange,
) -> WorkflowError {
    draft.stage = DraftStage::RoomChosen;
    session.put_draft(draft);
    session.put_error(AVAILABILITY_LOST);
    metrics::counter!(observability::RESERVATIONS_TOTAL, "outcome" => "lost").increment(1);
    tracing::warn!(room_id = %room_id, %range, "availability lost before persist");
    WorkflowError::AvailabilityLost { room_id, range }
}

/// Hand out the confirmation once. A second view finds nothing.
pub async fn reservation_summary(
    ctx: &AppContext,
    token: SessionToken,
) -> Result<Confirmation, WorkflowError> {
    let session = ctx.session(token);
    match session.take_confirmed() {
        Some(confirmation) => Ok(confirmation),
        None => {
            session.put_error(MISSING_CONFIRMATION);
            Err(WorkflowError::MissingConfirmation)
        }
    }
}

pub fn state(ctx: &AppContext, token: SessionToken) -> WorkflowState {
    let session = ctx.session(token);
    if session.has_confirmed() {
        return WorkflowState::Confirmed;
    }
    match session.draft().map(|d| d.stage) {
        None => WorkflowState::Idle,
        Some(DraftStage::Searching) => WorkflowState::Searching,
        Some(DraftStage::RoomsOffered) => WorkflowState::RoomsOffered,
        Some(DraftStage::RoomChosen) => WorkflowState::RoomChosen,
        Some(DraftStage::DetailsPending) => WorkflowState::DetailsPending,
    }
}
