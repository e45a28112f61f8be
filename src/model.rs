use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Opaque user identifier handed over by the identity provider.
pub type UserId = String;

/// Half-open stay `[check_in, check_out)`. Each date in the range is one night.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StayRange {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl StayRange {
    /// Unchecked constructor; ordering is enforced by the engine, not here.
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        Self { check_in, check_out }
    }

    /// Number of nights. Zero or negative for malformed ranges.
    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    /// `C < B && D > A`: touching endpoints do not overlap.
    pub fn overlaps(&self, other: &StayRange) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }
}

impl std::fmt::Display for StayRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} to {}", self.check_in, self.check_out)
    }
}

/// Booking lifecycle. `Cancelled` is terminal and always carries who and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Active,
    Cancelled { by: UserId, at: DateTime<Utc> },
}

impl BookingStatus {
    pub fn label(&self) -> &'static str {
        match self {
            BookingStatus::Active => "active",
            BookingStatus::Cancelled { .. } => "cancelled",
        }
    }
}

/// One reservation of one room by one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub user_id: UserId,
    pub stay: StayRange,
    pub total_price: Decimal,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn nights(&self) -> i64 {
        self.stay.nights()
    }

    pub fn is_active(&self) -> bool {
        matches!(self.status, BookingStatus::Active)
    }

    pub fn is_past(&self, today: NaiveDate) -> bool {
        self.stay.check_out < today
    }

    pub fn is_upcoming(&self, today: NaiveDate) -> bool {
        self.stay.check_in > today
    }

    /// Inclusive on both ends: the check-out day still counts as current.
    pub fn is_current(&self, today: NaiveDate) -> bool {
        self.stay.check_in <= today && today <= self.stay.check_out
    }

    pub fn cancelled_by(&self) -> Option<&str> {
        match &self.status {
            BookingStatus::Cancelled { by, .. } => Some(by.as_str()),
            BookingStatus::Active => None,
        }
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        match &self.status {
            BookingStatus::Cancelled { at, .. } => Some(*at),
            BookingStatus::Active => None,
        }
    }
}

/// The caller on whose behalf an operation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    /// Staff / administrator: may manage any booking and the room catalog.
    pub privileged: bool,
}

impl Actor {
    pub fn guest(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            privileged: false,
        }
    }

    pub fn admin(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            privileged: true,
        }
    }

    pub fn can_manage(&self, booking: &Booking) -> bool {
        self.privileged || booking.user_id == self.user_id
    }
}

/// Mutable catalog fields of a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSpec {
    pub number: String,
    pub price_per_night: Decimal,
    pub capacity: u32,
    pub is_active: bool,
    pub description: Option<String>,
}

/// Partial catalog change. `None` keeps the current value; `description`
/// uses `Some(None)` to clear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomPatch {
    pub number: Option<String>,
    pub price_per_night: Option<Decimal>,
    pub capacity: Option<u32>,
    pub is_active: Option<bool>,
    pub description: Option<Option<String>>,
}

impl RoomPatch {
    pub fn apply_to(self, current: RoomSpec) -> RoomSpec {
        RoomSpec {
            number: self.number.unwrap_or(current.number),
            price_per_night: self.price_per_night.unwrap_or(current.price_per_night),
            capacity: self.capacity.unwrap_or(current.capacity),
            is_active: self.is_active.unwrap_or(current.is_active),
            description: self.description.unwrap_or(current.description),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == RoomPatch::default()
    }
}

impl From<RoomSpec> for RoomPatch {
    fn from(spec: RoomSpec) -> Self {
        Self {
            number: Some(spec.number),
            price_per_night: Some(spec.price_per_night),
            capacity: Some(spec.capacity),
            is_active: Some(spec.is_active),
            description: Some(spec.description),
        }
    }
}

/// A catalog row plus every ledger row that references it.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub number: String,
    pub price_per_night: Decimal,
    pub capacity: u32,
    pub is_active: bool,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Active and cancelled bookings, sorted by `stay.check_in`.
    pub bookings: Vec<Booking>,
}

impl RoomState {
    pub fn new(id: Ulid, spec: RoomSpec, at: DateTime<Utc>) -> Self {
        Self {
            id,
            number: spec.number,
            price_per_night: spec.price_per_night,
            capacity: spec.capacity,
            is_active: spec.is_active,
            description: spec.description,
            created_at: at,
            updated_at: at,
            bookings: Vec::new(),
        }
    }

    pub fn apply_spec(&mut self, spec: RoomSpec, at: DateTime<Utc>) {
        self.number = spec.number;
        self.price_per_night = spec.price_per_night;
        self.capacity = spec.capacity;
        self.is_active = spec.is_active;
        self.description = spec.description;
        self.updated_at = at;
    }

    pub fn spec(&self) -> RoomSpec {
        RoomSpec {
            number: self.number.clone(),
            price_per_night: self.price_per_night,
            capacity: self.capacity,
            is_active: self.is_active,
            description: self.description.clone(),
        }
    }

    pub fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.id,
            number: self.number.clone(),
            price_per_night: self.price_per_night,
            capacity: self.capacity,
            is_active: self.is_active,
            description: self.description.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Insert a booking maintaining sort order by check-in.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.stay.check_in <= booking.stay.check_in);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    pub fn booking_mut(&mut self, id: &Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == *id)
    }

    /// Bookings (any status) whose stay overlaps `query`.
    /// Binary search skips everything checking in on or after `query.check_out`.
    pub fn overlapping(&self, query: &StayRange) -> impl Iterator<Item = &Booking> {
        let right_bound = self
            .bookings
            .partition_point(|b| b.stay.check_in < query.check_out);
        self.bookings[..right_bound]
            .iter()
            .filter(move |b| b.stay.check_out > query.check_in)
    }

    pub fn active_bookings(&self) -> impl Iterator<Item = &Booking> {
        self.bookings.iter().filter(|b| b.is_active())
    }
}

/// WAL record format. Flat, no nesting; every record carries its own timestamp
/// so replay reproduces `created_at` / `updated_at` exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        id: Ulid,
        number: String,
        price_per_night: Decimal,
        capacity: u32,
        is_active: bool,
        description: Option<String>,
        at: DateTime<Utc>,
    },
    RoomUpdated {
        id: Ulid,
        number: String,
        price_per_night: Decimal,
        capacity: u32,
        is_active: bool,
        description: Option<String>,
        at: DateTime<Utc>,
    },
    RoomDeleted {
        id: Ulid,
    },
    BookingCreated {
        id: Ulid,
        room_id: Ulid,
        user_id: UserId,
        stay: StayRange,
        total_price: Decimal,
        at: DateTime<Utc>,
    },
    BookingRescheduled {
        id: Ulid,
        room_id: Ulid,
        stay: StayRange,
        total_price: Decimal,
        at: DateTime<Utc>,
    },
    BookingCancelled {
        id: Ulid,
        room_id: Ulid,
        by: UserId,
        at: DateTime<Utc>,
    },
}

impl Event {
    pub fn room_created(id: Ulid, spec: RoomSpec, at: DateTime<Utc>) -> Self {
        Event::RoomCreated {
            id,
            number: spec.number,
            price_per_night: spec.price_per_night,
            capacity: spec.capacity,
            is_active: spec.is_active,
            description: spec.description,
            at,
        }
    }

    pub fn room_updated(id: Ulid, spec: RoomSpec, at: DateTime<Utc>) -> Self {
        Event::RoomUpdated {
            id,
            number: spec.number,
            price_per_night: spec.price_per_night,
            capacity: spec.capacity,
            is_active: spec.is_active,
            description: spec.description,
            at,
        }
    }

    /// The room this event belongs to.
    pub fn room_id(&self) -> Ulid {
        match self {
            Event::RoomCreated { id, .. }
            | Event::RoomUpdated { id, .. }
            | Event::RoomDeleted { id } => *id,
            Event::BookingCreated { room_id, .. }
            | Event::BookingRescheduled { room_id, .. }
            | Event::BookingCancelled { room_id, .. } => *room_id,
        }
    }
}

// ── Query types ──────────────────────────────────────────────────

/// Catalog view of a room, without its ledger rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub number: String,
    pub price_per_night: Decimal,
    pub capacity: u32,
    pub is_active: bool,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The active booking that blocks a requested stay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conflict {
    pub booking_id: Ulid,
    pub stay: StayRange,
}

/// Outcome of a date change: the updated booking plus what it replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rescheduled {
    pub booking: Booking,
    pub previous_stay: StayRange,
    pub previous_price: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomFilter {
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub capacity: Option<u32>,
    /// `None` lists active rooms only.
    pub is_active: Option<bool>,
}

impl RoomFilter {
    pub fn matches(&self, room: &RoomInfo) -> bool {
        if room.is_active != self.is_active.unwrap_or(true) {
            return false;
        }
        if self.min_price.is_some_and(|min| room.price_per_night < min) {
            return false;
        }
        if self.max_price.is_some_and(|max| room.price_per_night > max) {
            return false;
        }
        self.capacity.is_none_or(|c| room.capacity == c)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Active,
    Cancelled,
}

/// Booking list filters. Date bounds are inclusive; the `is_*` flags select
/// when `true` and exclude when `false`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingFilter {
    pub status: Option<StatusFilter>,
    pub room_id: Option<Ulid>,
    pub user_id: Option<UserId>,
    pub check_in_after: Option<NaiveDate>,
    pub check_in_before: Option<NaiveDate>,
    pub check_out_after: Option<NaiveDate>,
    pub check_out_before: Option<NaiveDate>,
    pub is_past: Option<bool>,
    pub is_upcoming: Option<bool>,
    pub is_current: Option<bool>,
}

impl BookingFilter {
    pub fn matches(&self, booking: &Booking, today: NaiveDate) -> bool {
        let status_ok = match self.status {
            None => true,
            Some(StatusFilter::Active) => booking.is_active(),
            Some(StatusFilter::Cancelled) => !booking.is_active(),
        };
        status_ok
            && self.room_id.is_none_or(|r| booking.room_id == r)
            && self.user_id.as_ref().is_none_or(|u| &booking.user_id == u)
            && self.check_in_after.is_none_or(|d| booking.stay.check_in >= d)
            && self.check_in_before.is_none_or(|d| booking.stay.check_in <= d)
            && self.check_out_after.is_none_or(|d| booking.stay.check_out >= d)
            && self.check_out_before.is_none_or(|d| booking.stay.check_out <= d)
            && self.is_past.is_none_or(|v| booking.is_past(today) == v)
            && self.is_upcoming.is_none_or(|v| booking.is_upcoming(today) == v)
            && self.is_current.is_none_or(|v| booking.is_current(today) == v)
    }
}
