use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{Days, NaiveDate};
use ulid::Ulid;

use crate::model::{RoomFilter, RoomInfo, StayRange};

#[derive(Debug, Clone, Copy)]
struct ActiveStay {
    room_id: Ulid,
    check_out: NaiveDate,
}

#[derive(Default)]
struct Inner {
    rooms: HashMap<Ulid, RoomInfo>,
    /// Active bookings of every room keyed by (check_in, booking id).
    stays: BTreeMap<(NaiveDate, Ulid), ActiveStay>,
    /// Upper bound on nights of any stay ever indexed. Bounds the backwards
    /// scan: nothing that checked in earlier than `check_in - longest` can
    /// still be in the house on `check_in`.
    longest: u64,
}

/// Cross-room index answering "which rooms are free for these dates" without
/// touching the per-room locks. Kept in sync by the store whenever a room or
/// booking event is applied (while that room's write lock is held).
#[derive(Default)]
pub struct OccupancyIndex {
    inner: RwLock<Inner>,
}

impl OccupancyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    // ── Catalog ──────────────────────────────────────────────

    pub fn upsert_room(&self, info: RoomInfo) {
        self.write().rooms.insert(info.id, info);
    }

    pub fn remove_room(&self, id: &Ulid) {
        let mut inner = self.write();
        inner.rooms.remove(id);
        inner.stays.retain(|_, s| s.room_id != *id);
    }

    pub fn room(&self, id: &Ulid) -> Option<RoomInfo> {
        self.read().rooms.get(id).cloned()
    }

    pub fn room_count(&self) -> usize {
        self.read().rooms.len()
    }

    /// Rooms matching `filter`, ordered by room number.
    pub fn rooms(&self, filter: &RoomFilter) -> Vec<RoomInfo> {
        let mut out: Vec<RoomInfo> = self
            .read()
            .rooms
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.number.cmp(&b.number));
        out
    }

    // ── Stays ────────────────────────────────────────────────

    pub fn add_stay(&self, booking_id: Ulid, room_id: Ulid, stay: StayRange) {
        let mut inner = self.write();
        let nights = u64::try_from(stay.nights()).unwrap_or(0);
        inner.longest = inner.longest.max(nights);
        inner.stays.insert(
            (stay.check_in, booking_id),
            ActiveStay {
                room_id,
                check_out: stay.check_out,
            },
        );
    }

    pub fn remove_stay(&self, booking_id: Ulid, stay: &StayRange) {
        self.write().stays.remove(&(stay.check_in, booking_id));
    }

    pub fn move_stay(&self, booking_id: Ulid, room_id: Ulid, from: &StayRange, to: StayRange) {
        self.remove_stay(booking_id, from);
        self.add_stay(booking_id, room_id, to);
    }

    /// Active rooms with no active booking overlapping `query`, ordered by
    /// room number. One range scan over the stay index; no per-room locks.
    pub fn available_rooms(&self, query: &StayRange) -> Vec<RoomInfo> {
        let inner = self.read();
        let busy = busy_rooms(&inner, query);
        let mut out: Vec<RoomInfo> = inner
            .rooms
            .values()
            .filter(|r| r.is_active && !busy.contains(&r.id))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.number.cmp(&b.number));
        out
    }
}

fn busy_rooms(inner: &Inner, query: &StayRange) -> HashSet<Ulid> {
    let lower = query
        .check_in
        .checked_sub_days(Days::new(inner.longest))
        .unwrap_or(NaiveDate::MIN);
    if lower >= query.check_out {
        return HashSet::new();
    }
    inner
        .stays
        .range((
            Bound::Included((lower, Ulid::nil())),
            Bound::Excluded((query.check_out, Ulid::nil())),
        ))
        .filter(|(_, s)| s.check_out > query.check_in)
        .map(|(_, s)| s.room_id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use rust_decimal_macros::dec;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn stay(a: &str, b: &str) -> StayRange {
        StayRange::new(d(a), d(b))
    }

    fn info(number: &str, active: bool) -> RoomInfo {
        let at: DateTime<Utc> = DateTime::from_timestamp(0, 0).unwrap();
        RoomInfo {
            id: Ulid::new(),
            number: number.into(),
            price_per_night: dec!(100.00),
            capacity: 2,
            is_active: active,
            description: None,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn long_stay_started_earlier_still_blocks() {
        let idx = OccupancyIndex::new();
        let a = info("101", true);
        let b = info("102", true);
        idx.upsert_room(a.clone());
        idx.upsert_room(b.clone());
        idx.add_stay(Ulid::new(), a.id, stay("2025-01-01", "2025-03-01"));
        idx.add_stay(Ulid::new(), b.id, stay("2025-02-10", "2025-02-11"));

        let free = idx.available_rooms(&stay("2025-02-14", "2025-02-16"));
        assert_eq!(free.iter().map(|r| r.number.as_str()).collect::<Vec<_>>(), vec!["102"]);
    }

    #[test]
    fn touching_stays_do_not_block() {
        let idx = OccupancyIndex::new();
        let a = info("101", true);
        idx.upsert_room(a.clone());
        idx.add_stay(Ulid::new(), a.id, stay("2025-06-01", "2025-06-05"));
        assert_eq!(idx.available_rooms(&stay("2025-06-05", "2025-06-07")).len(), 1);
        assert_eq!(idx.available_rooms(&stay("2025-05-28", "2025-06-01")).len(), 1);
        assert!(idx.available_rooms(&stay("2025-06-04", "2025-06-07")).is_empty());
    }

    #[test]
    fn inactive_rooms_never_available() {
        let idx = OccupancyIndex::new();
        idx.upsert_room(info("101", false));
        idx.upsert_room(info("102", true));
        let free = idx.available_rooms(&stay("2025-06-01", "2025-06-02"));
        assert_eq!(free.len(), 1);
        assert_eq!(free[0].number, "102");
    }

    #[test]
    fn removed_and_moved_stays() {
        let idx = OccupancyIndex::new();
        let a = info("101", true);
        idx.upsert_room(a.clone());
        let bid = Ulid::new();
        let original = stay("2025-06-01", "2025-06-05");
        idx.add_stay(bid, a.id, original);

        let moved = stay("2025-07-01", "2025-07-05");
        idx.move_stay(bid, a.id, &original, moved);
        assert_eq!(idx.available_rooms(&original).len(), 1);
        assert!(idx.available_rooms(&moved).is_empty());

        idx.remove_stay(bid, &moved);
        assert_eq!(idx.available_rooms(&moved).len(), 1);
    }

    #[test]
    fn rooms_sorted_by_number() {
        let idx = OccupancyIndex::new();
        for n in ["203", "101", "150"] {
            idx.upsert_room(info(n, true));
        }
        let numbers: Vec<_> = idx
            .rooms(&RoomFilter::default())
            .into_iter()
            .map(|r| r.number)
            .collect();
        assert_eq!(numbers, vec!["101", "150", "203"]);
    }
}
