use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub use crate::geo::GeoPoint;
use crate::slots::{Occupancy, Period, SlotGrid};

/// Opaque identity handed over by the authentication layer. Trusted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Half-open time-of-day range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "TimeRange start must be before end");
        Self { start, end }
    }

    /// `None` unless `start < end`.
    pub fn try_new(start: NaiveTime, end: NaiveTime) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        self.start <= t && t < self.end
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}~{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

/// A bookable room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Space {
    pub id: Ulid,
    pub name: String,
    pub category: String,
    pub sub_category: String,
    pub location: String,
    pub capacity: u32,
    pub coordinates: Option<GeoPoint>,
}

/// Input for registering a space. Also the seed-file record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSpace {
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default, rename = "subCategory", alias = "sub_category")]
    pub sub_category: String,
    #[serde(default)]
    pub location: String,
    pub capacity: u32,
    #[serde(default)]
    pub coordinates: Option<GeoPoint>,
}

impl NewSpace {
    pub fn into_space(self, id: Ulid) -> Space {
        Space {
            id,
            name: self.name,
            category: self.category,
            sub_category: self.sub_category,
            location: self.location,
            capacity: self.capacity,
            coordinates: self.coordinates,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "confirmed")]
    Confirmed,
    #[serde(rename = "cancelled")]
    Cancelled,
    #[serde(rename = "in-use")]
    InUse,
}

impl ReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::InUse => "in-use",
        }
    }

    /// Whether a reservation in this state holds its time range.
    pub fn blocks(self) -> bool {
        self != ReservationStatus::Cancelled
    }

    /// Pending or confirmed: the states a user may still edit or cancel.
    pub fn is_open(self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Confirmed)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is asking for the room and what for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub organization_type: String,
    pub organization_name: String,
    pub phone: String,
    pub email: String,
    pub event_name: String,
    pub headcount: u32,
    pub climate_control: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub user_id: UserId,
    pub space_id: Ulid,
    pub date: NaiveDate,
    pub time: TimeRange,
    pub requester: Requester,
    pub status: ReservationStatus,
    pub cancel_reason: Option<String>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub reminder_sent: bool,
}

impl Reservation {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.time.start)
    }

    pub fn ends_at(&self) -> NaiveDateTime {
        self.date.and_time(self.time.end)
    }

    fn sort_key(&self) -> (NaiveDate, NaiveTime) {
        (self.date, self.time.start)
    }
}

/// Input for creating a reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub space_id: Ulid,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub requester: Requester,
}

/// Replacement values for an edit. The space cannot change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationEdit {
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub requester: Requester,
}

/// Reservation rows of one space, sorted by `(date, start)`.
#[derive(Debug, Clone)]
pub struct SpaceState {
    pub space_id: Ulid,
    pub reservations: Vec<Reservation>,
}

impl SpaceState {
    pub fn new(space_id: Ulid) -> Self {
        Self {
            space_id,
            reservations: Vec::new(),
        }
    }

    /// Insert keeping `(date, start)` order.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let key = reservation.sort_key();
        let pos = self.reservations.partition_point(|r| r.sort_key() <= key);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn get(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// Rows dated within `[from, to]`, any status.
    pub fn between(&self, from: NaiveDate, to: NaiveDate) -> &[Reservation] {
        let lo = self.reservations.partition_point(|r| r.date < from);
        let hi = self.reservations.partition_point(|r| r.date <= to);
        &self.reservations[lo..hi.max(lo)]
    }

    pub fn on_date(&self, date: NaiveDate) -> &[Reservation] {
        self.between(date, date)
    }

    /// Rows on `date` whose range overlaps `range`. Rows starting at or after
    /// `range.end` are skipped by binary search.
    pub fn overlapping<'a>(
        &'a self,
        date: NaiveDate,
        range: &'a TimeRange,
    ) -> impl Iterator<Item = &'a Reservation> + 'a {
        let day = self.on_date(date);
        let right = day.partition_point(|r| r.time.start < range.end);
        day[..right].iter().filter(move |r| r.time.end > range.start)
    }
}

/// Journal record. Every state change is one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    SpaceCreated {
        space: Space,
    },
    SpaceDeleted {
        id: Ulid,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationEdited {
        id: Ulid,
        space_id: Ulid,
        date: NaiveDate,
        time: TimeRange,
        requester: Requester,
    },
    ReservationConfirmed {
        id: Ulid,
        space_id: Ulid,
    },
    ReservationCancelled {
        id: Ulid,
        space_id: Ulid,
        reason: Option<String>,
    },
    CheckedIn {
        id: Ulid,
        space_id: Ulid,
        at: DateTime<Utc>,
    },
    ReminderSent {
        id: Ulid,
        space_id: Ulid,
    },
}

impl Event {
    /// Space the event applies to, for row-level events.
    pub fn space_id(&self) -> Option<Ulid> {
        match self {
            Event::ReservationCreated { reservation } => Some(reservation.space_id),
            Event::ReservationEdited { space_id, .. }
            | Event::ReservationConfirmed { space_id, .. }
            | Event::ReservationCancelled { space_id, .. }
            | Event::CheckedIn { space_id, .. }
            | Event::ReminderSent { space_id, .. } => Some(*space_id),
            Event::SpaceCreated { .. } | Event::SpaceDeleted { .. } => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// A user's reservation joined with where it is.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationView {
    pub reservation: Reservation,
    pub space_name: String,
    pub space_location: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DailyAvailability {
    pub space_id: Ulid,
    pub date: NaiveDate,
    pub grid: SlotGrid,
}

impl DailyAvailability {
    /// `("HH:MM", occupied)` pairs in slot order.
    pub fn labelled(&self) -> Vec<(String, bool)> {
        self.grid
            .iter()
            .map(|(t, occupied)| (t.format("%H:%M").to_string(), occupied))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub booked_slots: usize,
    pub status: Occupancy,
    /// Booked share of the day's slots, two decimals.
    pub occupancy: f64,
    pub periods: [(Period, Occupancy); 3],
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyAvailability {
    pub space_id: Ulid,
    pub year: i32,
    pub month: u32,
    pub days: Vec<DayAvailability>,
}
