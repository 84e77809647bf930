use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::model::*;
use crate::repository::{AvailabilityRepository, StorageError};

/// One calendar month, `first..=last`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonthWindow {
    pub year: i32,
    pub month: u32,
    pub first: NaiveDate,
    pub last: NaiveDate,
    #[serde(skip)]
    query: DateRange,
}

impl MonthWindow {
    pub fn new(year: i32, month: u32) -> Result<Self, DateError> {
        let invalid = || DateError::InvalidMonth { year, month };
        let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
        let next_first = first
            .checked_add_months(chrono::Months::new(1))
            .ok_or_else(invalid)?;
        let last = next_first.pred_opt().ok_or_else(invalid)?;
        // Starts a day early so a stay whose checkout day is the 1st is fetched.
        let query = DateRange::new(first.pred_opt().unwrap_or(first), next_first)?;
        Ok(Self {
            year,
            month,
            first,
            last,
            query,
        })
    }

    pub fn containing(day: NaiveDate) -> Result<Self, DateError> {
        Self::new(day.year(), day.month())
    }

    pub fn days_in_month(&self) -> u32 {
        self.last.day()
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let last = self.last;
        self.first.iter_days().take_while(move |d| *d <= last)
    }

    /// `(year, month)` of the month before.
    pub fn previous(&self) -> (i32, u32) {
        if self.month == 1 {
            (self.year - 1, 12)
        } else {
            (self.year, self.month - 1)
        }
    }

    /// `(year, month)` of the month after.
    pub fn next(&self) -> (i32, u32) {
        if self.month == 12 {
            (self.year + 1, 1)
        } else {
            (self.year, self.month + 1)
        }
    }

    /// Range to fetch restrictions for.
    pub fn query_range(&self) -> DateRange {
        self.query
    }
}

/// Per-day markers for one room. Every day of the month has an entry;
/// `None` means free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomCalendar {
    pub room: Room,
    pub reservations: BTreeMap<NaiveDate, Option<ReservationId>>,
    pub blocks: BTreeMap<NaiveDate, Option<RestrictionId>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarView {
    pub window: MonthWindow,
    pub days_in_month: u32,
    pub previous: (i32, u32),
    pub next: (i32, u32),
    pub rooms: Vec<RoomCalendar>,
}

/// Build the day maps for one room from the restrictions overlapping the
/// month. A reservation marks every day from arrival through checkout;
/// an owner block marks only its first day.
pub fn aggregate(window: &MonthWindow, room: Room, restrictions: &[Restriction]) -> RoomCalendar {
    let mut reservations: BTreeMap<_, _> = window.days().map(|d| (d, None)).collect();
    let mut blocks: BTreeMap<_, _> = window.days().map(|d| (d, None)).collect();

    for restriction in restrictions {
        match restriction.kind {
            RestrictionKind::Reservation(id) => {
                for day in restriction.range.days_inclusive() {
                    if let Some(slot) = reservations.get_mut(&day) {
                        *slot = Some(id);
                    }
                }
            }
            RestrictionKind::OwnerBlock => {
                if let Some(slot) = blocks.get_mut(&restriction.range.start()) {
                    *slot = Some(restriction.id);
                }
            }
        }
    }

    RoomCalendar {
        room,
        reservations,
        blocks,
    }
}

pub async fn build_calendar(
    repo: &dyn AvailabilityRepository,
    window: MonthWindow,
) -> Result<CalendarView, StorageError> {
    let query = window.query_range();
    let mut rooms = Vec::new();
    for room in repo.all_rooms().await? {
        let restrictions = repo.restrictions_for_room(room.id, query).await?;
        rooms.push(aggregate(&window, room, &restrictions));
    }
    Ok(CalendarView {
        window,
        days_in_month: window.days_in_month(),
        previous: window.previous(),
        next: window.next(),
        rooms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ulid::Ulid;

    fn room() -> Room {
        let now = Utc::now();
        Room {
            id: Ulid::new(),
            name: "Major's Suite".into(),
            created_at: now,
            updated_at: now,
        }
    }

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn restriction(room_id: RoomId, start: &str, end: &str, kind: RestrictionKind) -> Restriction {
        let now = Utc::now();
        Restriction {
            id: Ulid::new(),
            room_id,
            range: DateRange::parse(start, end).unwrap(),
            kind,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn month_lengths() {
        assert_eq!(MonthWindow::new(2024, 2).unwrap().days_in_month(), 29);
        assert_eq!(MonthWindow::new(2023, 2).unwrap().days_in_month(), 28);
        assert_eq!(MonthWindow::new(1900, 2).unwrap().days_in_month(), 28);
        assert_eq!(MonthWindow::new(2000, 2).unwrap().days_in_month(), 29);
        assert_eq!(MonthWindow::new(2024, 4).unwrap().days_in_month(), 30);
        assert_eq!(MonthWindow::new(2024, 12).unwrap().days_in_month(), 31);
    }

    #[test]
    fn invalid_month_rejected() {
        for m in [0, 13] {
            let err = MonthWindow::new(2024, m).unwrap_err();
            assert_eq!(err, DateError::InvalidMonth { year: 2024, month: m });
        }
    }

    #[test]
    fn navigation_wraps_years() {
        let jan = MonthWindow::new(2024, 1).unwrap();
        assert_eq!(jan.previous(), (2023, 12));
        assert_eq!(jan.next(), (2024, 2));
        let dec = MonthWindow::new(2024, 12).unwrap();
        assert_eq!(dec.next(), (2025, 1));
    }

    #[test]
    fn containing_finds_month() {
        let w = MonthWindow::containing(d("2024-02-17")).unwrap();
        assert_eq!(w, MonthWindow::new(2024, 2).unwrap());
    }

    #[test]
    fn empty_room_is_all_free() {
        for (year, month, n) in [(2024, 2, 29), (2023, 2, 28), (2024, 3, 31)] {
            let window = MonthWindow::new(year, month).unwrap();
            let cal = aggregate(&window, room(), &[]);
            assert_eq!(cal.reservations.len(), n);
            assert_eq!(cal.blocks.len(), n);
            assert!(cal.reservations.values().all(Option::is_none));
            assert!(cal.blocks.values().all(Option::is_none));
        }
    }

    #[test]
    fn reservation_marks_through_checkout_day() {
        let window = MonthWindow::new(2024, 3).unwrap();
        let room = room();
        let res_id = Ulid::new();
        let r = restriction(
            room.id,
            "2024-03-10",
            "2024-03-12",
            RestrictionKind::Reservation(res_id),
        );
        let cal = aggregate(&window, room, &[r]);

        for day in ["2024-03-10", "2024-03-11", "2024-03-12"] {
            assert_eq!(cal.reservations[&d(day)], Some(res_id), "{day}");
        }
        assert_eq!(cal.reservations[&d("2024-03-09")], None);
        assert_eq!(cal.reservations[&d("2024-03-13")], None);
        assert!(cal.blocks.values().all(Option::is_none));
    }

    #[test]
    fn spans_are_clipped_to_the_month() {
        let window = MonthWindow::new(2024, 3).unwrap();
        let room = room();
        let res_id = Ulid::new();
        let r = restriction(
            room.id,
            "2024-02-27",
            "2024-03-02",
            RestrictionKind::Reservation(res_id),
        );
        let cal = aggregate(&window, room, &[r]);

        assert_eq!(cal.reservations.len(), 31);
        assert_eq!(cal.reservations[&d("2024-03-01")], Some(res_id));
        assert_eq!(cal.reservations[&d("2024-03-02")], Some(res_id));
        assert_eq!(cal.reservations[&d("2024-03-03")], None);
    }

    #[test]
    fn owner_block_marks_start_day_only() {
        let window = MonthWindow::new(2024, 3).unwrap();
        let room = room();
        let block = restriction(room.id, "2024-03-20", "2024-03-25", RestrictionKind::OwnerBlock);
        let block_id = block.id;
        let cal = aggregate(&window, room, &[block]);

        assert_eq!(cal.blocks[&d("2024-03-20")], Some(block_id));
        assert_eq!(cal.blocks.values().filter(|v| v.is_some()).count(), 1);
        assert!(cal.reservations.values().all(Option::is_none));
    }

    #[test]
    fn query_range_reaches_back_one_day() {
        let window = MonthWindow::new(2024, 3).unwrap();
        let q = window.query_range();
        assert_eq!(q.start(), d("2024-02-29"));
        assert_eq!(q.end(), d("2024-04-01"));
    }
}
