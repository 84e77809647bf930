/// Upper bound on rooms the engine will hold.
pub const MAX_ROOMS: usize = 1_024;

pub const MAX_ROOM_NAME_LEN: usize = 128;

/// Applies to each guest field (names, email, phone).
pub const MAX_GUEST_FIELD_LEN: usize = 256;

/// Longest bookable or blockable span, in nights.
pub const MAX_STAY_NIGHTS: i64 = 366;

pub const MAX_RESTRICTIONS_PER_ROOM: usize = 100_000;
