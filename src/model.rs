use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::limits::MAX_STAY_NIGHTS;

pub type RoomId = Ulid;
pub type ReservationId = Ulid;
pub type RestrictionId = Ulid;

/// The only accepted wire format for calendar dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// chrono alone accepts unpadded fields such as `2024-3-1`.
static DATE_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid date regex"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateError {
    #[error("invalid date {0:?}: expected YYYY-MM-DD")]
    InvalidFormat(String),
    #[error("invalid range: start {start} must be before end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
    #[error("stay too long: {nights} nights, at most {max} allowed")]
    TooLong { nights: i64, max: i64 },
    #[error("invalid month: {year}-{month}")]
    InvalidMonth { year: i32, month: u32 },
}

pub fn parse_date(input: &str) -> Result<NaiveDate, DateError> {
    if !DATE_SHAPE.is_match(input) {
        return Err(DateError::InvalidFormat(input.to_string()));
    }
    NaiveDate::parse_from_str(input, DATE_FORMAT)
        .map_err(|_| DateError::InvalidFormat(input.to_string()))
}

/// Half-open interval of whole days `[start, end)`.
///
/// `end` is the checkout day: a stay `[10, 12)` occupies the nights of the
/// 10th and 11th, and a new stay may begin on the 12th.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DateError> {
        if start >= end {
            return Err(DateError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Parse both ends with [`DATE_FORMAT`] and validate ordering.
    pub fn parse(start: &str, end: &str) -> Result<Self, DateError> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    /// [`DateRange::parse`] for user-entered stays and blocks, which are
    /// also capped at [`MAX_STAY_NIGHTS`].
    pub fn parse_stay(start: &str, end: &str) -> Result<Self, DateError> {
        let range = Self::parse(start, end)?;
        if range.nights() > MAX_STAY_NIGHTS {
            return Err(DateError::TooLong {
                nights: range.nights(),
                max: MAX_STAY_NIGHTS,
            });
        }
        Ok(range)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day < self.end
    }

    pub fn intersect(&self, other: &DateRange) -> Option<DateRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        DateRange::new(start, end).ok()
    }

    /// Every day from `start` through `end`, both included. Each call
    /// yields a fresh iterator.
    pub fn days_inclusive(&self) -> impl Iterator<Item = NaiveDate> + Clone + use<> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

/// Why a room is unavailable over a restriction's range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestrictionKind {
    Reservation(ReservationId),
    OwnerBlock,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restriction {
    pub id: RestrictionId,
    pub room_id: RoomId,
    pub range: DateRange,
    pub kind: RestrictionKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Restriction {
    pub fn is_reservation(&self) -> bool {
        matches!(self.kind, RestrictionKind::Reservation(_))
    }

    pub fn reservation_id(&self) -> Option<ReservationId> {
        match self.kind {
            RestrictionKind::Reservation(id) => Some(id),
            RestrictionKind::OwnerBlock => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub guest: Guest,
    pub room_id: RoomId,
    pub range: DateRange,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationFilter {
    All,
    Unprocessed,
}

impl ReservationFilter {
    /// Map the admin listing source (`new` / `all`) to a filter.
    pub fn from_src(src: &str) -> Option<Self> {
        match src {
            "all" => Some(ReservationFilter::All),
            "new" => Some(ReservationFilter::Unprocessed),
            _ => None,
        }
    }

    pub fn matches(&self, reservation: &Reservation) -> bool {
        match self {
            ReservationFilter::All => true,
            ReservationFilter::Unprocessed => !reservation.processed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// All restrictions (reservations + owner blocks), sorted by `range.start`.
    pub restrictions: Vec<Restriction>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            restrictions: Vec::new(),
        }
    }

    pub fn id(&self) -> RoomId {
        self.room.id
    }

    /// Insert restriction maintaining sort order by range start.
    pub fn insert_restriction(&mut self, restriction: Restriction) {
        let pos = self
            .restrictions
            .binary_search_by_key(&restriction.range.start(), |r| r.range.start())
            .unwrap_or_else(|e| e);
        self.restrictions.insert(pos, restriction);
    }

    pub fn remove_restriction(&mut self, id: RestrictionId) -> Option<Restriction> {
        let pos = self.restrictions.iter().position(|r| r.id == id)?;
        Some(self.restrictions.remove(pos))
    }

    pub fn remove_reservation(&mut self, reservation_id: ReservationId) -> Option<Restriction> {
        let pos = self
            .restrictions
            .iter()
            .position(|r| r.reservation_id() == Some(reservation_id))?;
        Some(self.restrictions.remove(pos))
    }

    /// Restrictions whose range overlaps `query`.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &Restriction> {
        let right_bound = self
            .restrictions
            .partition_point(|r| r.range.start() < query.end());
        let query_start = query.start();
        self.restrictions[..right_bound]
            .iter()
            .filter(move |r| r.range.end() > query_start)
    }

    /// Number of reservation-kind restrictions overlapping `query`.
    pub fn reserved_count(&self, query: &DateRange) -> usize {
        self.overlapping(query).filter(|r| r.is_reservation()).count()
    }
}

/// The event types, one per WAL record.
///
/// `ReservationPlaced` carries both halves of a booking so the reservation
/// and its restriction are durable together or not at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    ReservationPlaced {
        reservation: Reservation,
        restriction_id: RestrictionId,
    },
    ReservationProcessed {
        id: ReservationId,
        room_id: RoomId,
        processed: bool,
        at: DateTime<Utc>,
    },
    GuestUpdated {
        id: ReservationId,
        room_id: RoomId,
        guest: Guest,
        at: DateTime<Utc>,
    },
    ReservationDeleted {
        id: ReservationId,
        room_id: RoomId,
    },
    BlockAdded {
        restriction: Restriction,
    },
    BlockRemoved {
        id: RestrictionId,
        room_id: RoomId,
    },
}

impl Event {
    pub fn room_id(&self) -> RoomId {
        match self {
            Event::RoomCreated { room } => room.id,
            Event::ReservationPlaced { reservation, .. } => reservation.room_id,
            Event::BlockAdded { restriction } => restriction.room_id,
            Event::ReservationProcessed { room_id, .. }
            | Event::GuestUpdated { room_id, .. }
            | Event::ReservationDeleted { room_id, .. }
            | Event::BlockRemoved { room_id, .. } => *room_id,
        }
    }
}
