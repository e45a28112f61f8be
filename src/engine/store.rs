use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::occupancy::OccupancyIndex;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

/// In-memory ledger: one lockable `RoomState` per room plus the lookup
/// indexes that let a booking id or a room number find its room.
pub struct LedgerStore {
    rooms: DashMap<Ulid, SharedRoomState>,
    booking_to_room: DashMap<Ulid, Ulid>,
    room_numbers: DashMap<String, Ulid>,
    occupancy: OccupancyIndex,
}

impl Default for LedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerStore {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            booking_to_room: DashMap::new(),
            room_numbers: DashMap::new(),
            occupancy: OccupancyIndex::new(),
        }
    }

    pub fn occupancy(&self) -> &OccupancyIndex {
        &self.occupancy
    }

    // ── Room CRUD ────────────────────────────────────────────

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn contains_room(&self, id: &Ulid) -> bool {
        self.rooms.contains_key(id)
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn room_ids(&self) -> Vec<Ulid> {
        let mut ids: Vec<Ulid> = self.rooms.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    pub fn room_number_owner(&self, number: &str) -> Option<Ulid> {
        self.room_numbers.get(number).map(|e| *e.value())
    }

    /// Register a freshly created room (no bookings yet).
    pub fn insert_room(&self, rs: RoomState) {
        let id = rs.id;
        self.room_numbers.insert(rs.number.clone(), id);
        self.occupancy.upsert_room(rs.info());
        for b in &rs.bookings {
            self.booking_to_room.insert(b.id, id);
            if b.is_active() {
                self.occupancy.add_stay(b.id, id, b.stay);
            }
        }
        self.rooms.insert(id, Arc::new(RwLock::new(rs)));
    }

    pub fn remove_room(&self, id: &Ulid, number: &str) -> Option<SharedRoomState> {
        self.room_numbers.remove_if(number, |_, owner| owner == id);
        self.occupancy.remove_room(id);
        self.rooms.remove(id).map(|(_, rs)| rs)
    }

    // ── Booking index ────────────────────────────────────────

    pub fn room_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_room.get(booking_id).map(|e| *e.value())
    }

    /// Claim a booking id for `room_id` across all rooms. Returns false if
    /// the id is already taken. The claim must be released if the booking
    /// is never applied.
    pub fn reserve_booking_id(&self, booking_id: Ulid, room_id: Ulid) -> bool {
        match self.booking_to_room.entry(booking_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(room_id);
                true
            }
        }
    }

    pub fn release_booking_id(&self, booking_id: &Ulid, room_id: &Ulid) {
        self.booking_to_room
            .remove_if(booking_id, |_, owner| owner == room_id);
    }

    // ── Event application ────────────────────────────────────

    /// Apply a room-scoped event to a room the caller holds the write lock for.
    /// `RoomCreated` / `RoomDeleted` are handled at the map level, not here.
    pub fn apply_event(&self, rs: &mut RoomState, event: &Event) {
        match event {
            Event::RoomUpdated {
                id,
                number,
                price_per_night,
                capacity,
                is_active,
                description,
                at,
            } => {
                if rs.number != *number {
                    self.room_numbers.remove_if(&rs.number, |_, owner| owner == id);
                    self.room_numbers.insert(number.clone(), *id);
                }
                rs.apply_spec(
                    RoomSpec {
                        number: number.clone(),
                        price_per_night: *price_per_night,
                        capacity: *capacity,
                        is_active: *is_active,
                        description: description.clone(),
                    },
                    *at,
                );
                self.occupancy.upsert_room(rs.info());
            }
            Event::BookingCreated {
                id,
                room_id,
                user_id,
                stay,
                total_price,
                at,
            } => {
                rs.insert_booking(Booking {
                    id: *id,
                    room_id: *room_id,
                    user_id: user_id.clone(),
                    stay: *stay,
                    total_price: *total_price,
                    status: BookingStatus::Active,
                    created_at: *at,
                    updated_at: *at,
                });
                self.booking_to_room.insert(*id, *room_id);
                self.occupancy.add_stay(*id, *room_id, *stay);
            }
            Event::BookingRescheduled {
                id,
                room_id,
                stay,
                total_price,
                at,
            } => {
                // Re-insert to keep the vector sorted by check-in.
                if let Some(mut booking) = rs.remove_booking(*id) {
                    let previous = booking.stay;
                    booking.stay = *stay;
                    booking.total_price = *total_price;
                    booking.updated_at = *at;
                    if booking.is_active() {
                        self.occupancy.move_stay(*id, *room_id, &previous, *stay);
                    }
                    rs.insert_booking(booking);
                }
            }
            Event::BookingCancelled { id, by, at, .. } => {
                if let Some(booking) = rs.booking_mut(id)
                    && booking.is_active()
                {
                    booking.status = BookingStatus::Cancelled {
                        by: by.clone(),
                        at: *at,
                    };
                    booking.updated_at = *at;
                    let stay = booking.stay;
                    self.occupancy.remove_stay(*id, &stay);
                }
            }
            Event::RoomCreated { .. } | Event::RoomDeleted { .. } => {}
        }
    }
}
