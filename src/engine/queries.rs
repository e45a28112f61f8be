use ulid::Ulid;

use crate::model::*;

use super::conflict::{find_conflict, validate_order};
use super::{Engine, EngineError};

impl Engine {
    pub fn get_room(&self, id: &Ulid) -> Result<RoomInfo, EngineError> {
        self.store
            .occupancy()
            .room(id)
            .ok_or(EngineError::NotFound(*id))
    }

    /// Catalog listing, ordered by room number. Defaults to active rooms.
    pub fn list_rooms(&self, filter: &RoomFilter) -> Vec<RoomInfo> {
        self.store.occupancy().rooms(filter)
    }

    /// Fetch a single booking. Guests only see their own; anything else is
    /// reported as not found rather than forbidden.
    pub async fn get_booking(&self, actor: &Actor, id: &Ulid) -> Result<Booking, EngineError> {
        let room_id = self
            .store
            .room_for_booking(id)
            .ok_or(EngineError::NotFound(*id))?;
        let rs = self
            .store
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(*id))?;
        let guard = rs.read().await;
        guard
            .booking(id)
            .filter(|b| actor.can_manage(b))
            .cloned()
            .ok_or(EngineError::NotFound(*id))
    }

    /// Bookings visible to `actor`, newest first. Non-privileged actors are
    /// always restricted to their own bookings regardless of the filter.
    pub async fn list_bookings(&self, actor: &Actor, filter: &BookingFilter) -> Vec<Booking> {
        let today = self.clock.today();
        let mut filter = filter.clone();
        if !actor.privileged {
            filter.user_id = Some(actor.user_id.clone());
        }

        let room_ids = match filter.room_id {
            Some(id) => vec![id],
            None => self.store.room_ids(),
        };

        let mut out = Vec::new();
        for room_id in room_ids {
            let Some(rs) = self.store.get_room(&room_id) else {
                continue;
            };
            let guard = rs.read().await;
            out.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| filter.matches(b, today))
                    .cloned(),
            );
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out
    }

    /// Whether `room_id` is free for `stay`, ignoring `exclude` (the booking
    /// being edited). Returns the blocking booking if not. Inactive rooms are
    /// not rejected here; activity is a separate check at booking time.
    pub async fn room_availability(
        &self,
        room_id: Ulid,
        stay: StayRange,
        exclude: Option<Ulid>,
    ) -> Result<Option<Conflict>, EngineError> {
        validate_order(&stay)?;
        let rs = self
            .store
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(find_conflict(&guard, &stay, exclude).map(|b| Conflict {
            booking_id: b.id,
            stay: b.stay,
        }))
    }

    pub async fn list_active_bookings_for_room(
        &self,
        room_id: Ulid,
        exclude: Option<Ulid>,
    ) -> Result<Vec<(Ulid, StayRange)>, EngineError> {
        let rs = self
            .store
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard
            .active_bookings()
            .filter(|b| Some(b.id) != exclude)
            .map(|b| (b.id, b.stay))
            .collect())
    }

    pub async fn is_room_available(
        &self,
        room_id: Ulid,
        stay: StayRange,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        Ok(self.room_availability(room_id, stay, exclude).await?.is_none())
    }

    /// Active rooms with no active booking overlapping `stay`, ordered by
    /// room number.
    pub fn available_rooms(&self, stay: StayRange) -> Result<Vec<RoomInfo>, EngineError> {
        validate_order(&stay)?;
        Ok(self.store.occupancy().available_rooms(&stay))
    }
}
