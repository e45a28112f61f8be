use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio::sync::oneshot;
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability as obs;

use super::conflict::{check_no_conflict, validate_not_past, validate_room_spec, validate_stay};
use super::pricing::quote;
use super::{Engine, EngineError, WalCommand};

impl Engine {
    // ── Room catalog (privileged) ────────────────────────────

    pub async fn create_room(
        &self,
        actor: &Actor,
        id: Ulid,
        spec: RoomSpec,
    ) -> Result<RoomInfo, EngineError> {
        if !actor.privileged {
            return Err(EngineError::Forbidden(id));
        }
        let spec = validate_room_spec(spec)?;

        let _catalog = self.catalog_lock.lock().await;
        if self.store.room_count() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if self.store.contains_room(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if self.store.room_number_owner(&spec.number).is_some() {
            return Err(EngineError::DuplicateRoomNumber(spec.number));
        }

        let now = self.clock.now();
        let event = Event::room_created(id, spec.clone(), now);
        self.wal_append(&event).await?;
        let rs = RoomState::new(id, spec, now);
        let room = rs.info();
        self.store.insert_room(rs);
        metrics::gauge!(obs::ROOMS_TOTAL).set(self.store.room_count() as f64);

        info!(
            room_id = %id,
            room = %room.number,
            price_per_night = %room.price_per_night,
            capacity = room.capacity,
            by = %actor.user_id,
            "room created"
        );
        Ok(room)
    }

    /// Replace a room's catalog fields. Existing bookings keep their frozen
    /// totals; deactivating only blocks new bookings and date changes.
    pub async fn update_room(
        &self,
        actor: &Actor,
        id: Ulid,
        spec: RoomSpec,
    ) -> Result<RoomInfo, EngineError> {
        self.patch_room(actor, id, spec.into()).await
    }

    /// Partial catalog update, merged with the current row under its lock.
    pub async fn patch_room(
        &self,
        actor: &Actor,
        id: Ulid,
        patch: RoomPatch,
    ) -> Result<RoomInfo, EngineError> {
        if !actor.privileged {
            return Err(EngineError::Forbidden(id));
        }

        let _catalog = self.catalog_lock.lock().await;
        let mut guard = self.lock_room(&id).await?;
        let spec = validate_room_spec(patch.apply_to(guard.spec()))?;
        if self
            .store
            .room_number_owner(&spec.number)
            .is_some_and(|owner| owner != id)
        {
            return Err(EngineError::DuplicateRoomNumber(spec.number));
        }

        let event = Event::room_updated(id, spec, self.clock.now());
        self.persist_and_apply(&mut guard, &event).await?;

        info!(
            room_id = %id,
            room = %guard.number,
            price_per_night = %guard.price_per_night,
            is_active = guard.is_active,
            by = %actor.user_id,
            "room updated"
        );
        Ok(guard.info())
    }

    /// Delete a room. Rooms referenced by any booking, active or cancelled,
    /// are protected.
    pub async fn delete_room(&self, actor: &Actor, id: Ulid) -> Result<RoomInfo, EngineError> {
        if !actor.privileged {
            return Err(EngineError::Forbidden(id));
        }

        let _catalog = self.catalog_lock.lock().await;
        let guard = self.lock_room(&id).await?;
        if !guard.bookings.is_empty() {
            return Err(EngineError::RoomHasBookings(id));
        }

        let event = Event::RoomDeleted { id };
        self.wal_append(&event).await?;
        let room = guard.info();
        self.store.remove_room(&id, &guard.number);
        metrics::gauge!(obs::ROOMS_TOTAL).set(self.store.room_count() as f64);

        info!(room_id = %id, room = %room.number, by = %actor.user_id, "room deleted");
        Ok(room)
    }

    // ── Booking lifecycle ────────────────────────────────────

    /// Reserve `room_id` for `stay` on behalf of `actor`. The conflict check
    /// and the insert happen under the room's write lock, so concurrent
    /// requests for overlapping dates on the same room serialize.
    pub async fn create_booking(
        &self,
        actor: &Actor,
        id: Ulid,
        room_id: Ulid,
        stay: StayRange,
    ) -> Result<Booking, EngineError> {
        validate_stay(&stay)?;
        validate_not_past(&stay, self.clock.today())?;
        if actor.user_id.is_empty() || actor.user_id.len() > MAX_USER_ID_LEN {
            return Err(EngineError::LimitExceeded("invalid user id"));
        }

        let mut guard = self.lock_room(&room_id).await?;
        if !guard.is_active {
            return Err(EngineError::RoomInactive(room_id));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }
        // The id is claimed store-wide before the WAL await, so a create for
        // the same id on another room cannot also pass this check.
        if !self.store.reserve_booking_id(id, room_id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let total_price = match self.insert_booking_locked(actor, &mut guard, id, stay).await {
            Ok(total_price) => total_price,
            Err(e) => {
                self.store.release_booking_id(&id, &room_id);
                return Err(e);
            }
        };
        let booking = guard
            .booking(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        metrics::counter!(obs::BOOKINGS_CREATED_TOTAL).increment(1);

        info!(
            booking_id = %id,
            room_id = %room_id,
            room = %guard.number,
            user = %actor.user_id,
            check_in = %stay.check_in,
            check_out = %stay.check_out,
            total_price = %total_price,
            "booking created"
        );
        Ok(booking)
    }

    /// Conflict check, pricing and persist for a booking whose id is already
    /// reserved. Nothing is applied on error.
    async fn insert_booking_locked(
        &self,
        actor: &Actor,
        guard: &mut RoomState,
        id: Ulid,
        stay: StayRange,
    ) -> Result<Decimal, EngineError> {
        if let Err(e) = check_no_conflict(guard, &stay, None) {
            warn!(room_id = %guard.id, room = %guard.number, user = %actor.user_id, %stay, "booking conflict");
            metrics::counter!(obs::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let total_price = quote(guard.price_per_night, &stay)?;
        let event = Event::BookingCreated {
            id,
            room_id: guard.id,
            user_id: actor.user_id.clone(),
            stay,
            total_price,
            at: self.clock.now(),
        };
        self.persist_and_apply(guard, &event).await?;
        Ok(total_price)
    }

    /// Move an active booking to new dates, re-checking availability against
    /// every other active booking on the room and re-pricing at the room's
    /// current rate.
    pub async fn update_booking_dates(
        &self,
        actor: &Actor,
        id: Ulid,
        stay: StayRange,
    ) -> Result<Rescheduled, EngineError> {
        self.reschedule_booking(actor, id, Some(stay.check_in), Some(stay.check_out))
            .await
    }

    /// Partial form of [`Engine::update_booking_dates`]: a missing date keeps
    /// the booking's current value. The merge happens under the room lock.
    pub async fn reschedule_booking(
        &self,
        actor: &Actor,
        id: Ulid,
        check_in: Option<NaiveDate>,
        check_out: Option<NaiveDate>,
    ) -> Result<Rescheduled, EngineError> {
        let mut guard = self.resolve_booking_write(&id).await?;
        let current = guard.booking(&id).cloned().ok_or(EngineError::NotFound(id))?;
        if !actor.can_manage(&current) {
            return Err(EngineError::Forbidden(id));
        }
        if !current.is_active() {
            return Err(EngineError::NotEditable(id));
        }

        let stay = StayRange::new(
            check_in.unwrap_or(current.stay.check_in),
            check_out.unwrap_or(current.stay.check_out),
        );
        validate_stay(&stay)?;
        if !guard.is_active {
            return Err(EngineError::RoomInactive(guard.id));
        }
        if let Err(e) = check_no_conflict(&guard, &stay, Some(id)) {
            warn!(booking_id = %id, room = %guard.number, user = %actor.user_id, %stay, "reschedule conflict");
            metrics::counter!(obs::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let total_price = quote(guard.price_per_night, &stay)?;
        let event = Event::BookingRescheduled {
            id,
            room_id: guard.id,
            stay,
            total_price,
            at: self.clock.now(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let booking = guard
            .booking(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        metrics::counter!(obs::BOOKINGS_RESCHEDULED_TOTAL).increment(1);

        info!(
            booking_id = %id,
            room = %guard.number,
            by = %actor.user_id,
            previous_check_in = %current.stay.check_in,
            previous_check_out = %current.stay.check_out,
            check_in = %stay.check_in,
            check_out = %stay.check_out,
            previous_price = %current.total_price,
            total_price = %total_price,
            "booking dates updated"
        );
        Ok(Rescheduled {
            booking,
            previous_stay: current.stay,
            previous_price: current.total_price,
        })
    }

    /// Soft-cancel: the record stays, its dates are released. Cancelling a
    /// cancelled booking is rejected and leaves the original audit fields alone.
    pub async fn cancel_booking(&self, actor: &Actor, id: Ulid) -> Result<Booking, EngineError> {
        let mut guard = self.resolve_booking_write(&id).await?;
        let current = guard.booking(&id).cloned().ok_or(EngineError::NotFound(id))?;
        if !actor.can_manage(&current) {
            return Err(EngineError::Forbidden(id));
        }
        if !current.is_active() {
            warn!(booking_id = %id, by = %actor.user_id, "booking already cancelled");
            return Err(EngineError::AlreadyCancelled(id));
        }

        let event = Event::BookingCancelled {
            id,
            room_id: guard.id,
            by: actor.user_id.clone(),
            at: self.clock.now(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let booking = guard
            .booking(&id)
            .cloned()
            .ok_or(EngineError::NotFound(id))?;
        metrics::counter!(obs::BOOKINGS_CANCELLED_TOTAL).increment(1);

        info!(
            booking_id = %id,
            room = %guard.number,
            user = %current.user_id,
            cancelled_by = %actor.user_id,
            check_in = %current.stay.check_in,
            check_out = %current.stay.check_out,
            "booking cancelled"
        );
        Ok(booking)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with the minimal events that recreate current state.
    /// Holds the catalog lock and a read lock on every room for the duration,
    /// so no append can slip in between the snapshot and the swap.
    pub async fn compact_wal(&self) -> Result<usize, EngineError> {
        let _catalog = self.catalog_lock.lock().await;

        let mut guards = Vec::with_capacity(self.store.room_count());
        for id in self.store.room_ids() {
            if let Some(rs) = self.store.get_room(&id) {
                guards.push(rs.read_owned().await);
            }
        }

        let mut events = Vec::new();
        for rs in &guards {
            events.push(Event::room_created(rs.id, rs.spec(), rs.created_at));
            if rs.updated_at != rs.created_at {
                events.push(Event::room_updated(rs.id, rs.spec(), rs.updated_at));
            }
            for b in &rs.bookings {
                events.push(Event::BookingCreated {
                    id: b.id,
                    room_id: b.room_id,
                    user_id: b.user_id.clone(),
                    stay: b.stay,
                    total_price: b.total_price,
                    at: b.created_at,
                });
                match &b.status {
                    BookingStatus::Cancelled { by, at } => events.push(Event::BookingCancelled {
                        id: b.id,
                        room_id: b.room_id,
                        by: by.clone(),
                        at: *at,
                    }),
                    BookingStatus::Active if b.updated_at != b.created_at => {
                        events.push(Event::BookingRescheduled {
                            id: b.id,
                            room_id: b.room_id,
                            stay: b.stay,
                            total_price: b.total_price,
                            at: b.updated_at,
                        })
                    }
                    BookingStatus::Active => {}
                }
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        metrics::counter!(obs::WAL_COMPACTIONS_TOTAL).increment(1);
        Ok(count)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
