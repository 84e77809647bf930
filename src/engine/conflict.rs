use chrono::{DateTime, Utc};

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

pub(crate) fn validate_range(range: &DateRange) -> Result<(), EngineError> {
    if range.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("date range too long"));
    }
    Ok(())
}

pub(crate) fn validate_guest(guest: &Guest) -> Result<(), EngineError> {
    let fields = [&guest.first_name, &guest.last_name, &guest.email, &guest.phone];
    if fields.iter().any(|f| f.len() > MAX_GUEST_FIELD_LEN) {
        return Err(EngineError::LimitExceeded("guest field too long"));
    }
    Ok(())
}

/// Storage-level exclusion: no two reservation restrictions on one room may
/// overlap. Owner blocks do not take part.
pub(crate) fn check_no_conflict(rs: &RoomState, range: &DateRange) -> Result<(), EngineError> {
    match rs.overlapping(range).find(|r| r.is_reservation()) {
        Some(existing) => Err(EngineError::Conflict(existing.id)),
        None => Ok(()),
    }
}
