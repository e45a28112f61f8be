mod conflict;
mod error;
mod mutations;
mod occupancy;
mod pricing;
mod queries;
mod store;

pub use error::EngineError;
pub use occupancy::OccupancyIndex;
pub use pricing::quote;
pub use store::LedgerStore;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard};
use ulid::Ulid;

use crate::clock::Clock;
use crate::model::*;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders with the shared result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                while let Ok(next) = rx.try_recv() {
                    match next {
                        WalCommand::Append { event, response } => batch.push((event, response)),
                        other => {
                            deferred = Some(other);
                            break;
                        }
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!(error = %e, batch = batch.len(), "WAL flush failed");
    }
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even on append error so partially buffered bytes don't leak
    // into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

/// The booking engine. Each room is a lockable unit: every check-then-write
/// on a room's ledger happens under that room's write lock, so two
/// concurrent requests for overlapping dates serialize and exactly one wins.
pub struct Engine {
    pub store: LedgerStore,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) clock: Arc<dyn Clock>,
    /// Serializes catalog changes (room create / delete / renumber) and
    /// compaction snapshots.
    pub(super) catalog_lock: Mutex<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, clock: Arc<dyn Clock>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            store: LedgerStore::new(),
            wal_tx,
            clock,
            catalog_lock: Mutex::new(()),
        };

        // We're the sole owner of every room lock during replay, so try_write
        // always succeeds. Never block here: this may run inside a runtime.
        for event in &events {
            match event {
                Event::RoomCreated {
                    id,
                    number,
                    price_per_night,
                    capacity,
                    is_active,
                    description,
                    at,
                } => {
                    let spec = RoomSpec {
                        number: number.clone(),
                        price_per_night: *price_per_night,
                        capacity: *capacity,
                        is_active: *is_active,
                        description: description.clone(),
                    };
                    engine.store.insert_room(RoomState::new(*id, spec, *at));
                }
                Event::RoomDeleted { id } => {
                    if let Some(rs) = engine.store.get_room(id) {
                        let number = rs
                            .try_read()
                            .map(|g| g.number.clone())
                            .map_err(|_| replay_contended(*id))?;
                        engine.store.remove_room(id, &number);
                    }
                }
                other => {
                    let room_id = other.room_id();
                    if let Some(rs) = engine.store.get_room(&room_id) {
                        let mut guard = rs.try_write().map_err(|_| replay_contended(room_id))?;
                        engine.store.apply_event(&mut guard, other);
                    }
                }
            }
        }

        tracing::info!(
            events = events.len(),
            rooms = engine.store.room_count(),
            "ledger replayed"
        );
        Ok(engine)
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append then apply. Nothing changes in memory unless the event is durable.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_event(rs, event);
        Ok(())
    }

    /// Room lookup + exclusive lock. The row lock every booking write takes.
    pub(super) async fn lock_room(
        &self,
        room_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let rs = self
            .store
            .get_room(room_id)
            .ok_or(EngineError::NotFound(*room_id))?;
        let wait_start = std::time::Instant::now();
        let guard = rs.write_owned().await;
        metrics::histogram!(crate::observability::ROOM_LOCK_WAIT_SECONDS)
            .record(wait_start.elapsed().as_secs_f64());
        // A delete may have won the lock first and unlinked the room.
        if !self.store.contains_room(room_id) {
            return Err(EngineError::NotFound(*room_id));
        }
        Ok(guard)
    }

    /// Booking id → room → room write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<RoomState>, EngineError> {
        let room_id = self
            .store
            .room_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let guard = self.lock_room(&room_id).await?;
        if guard.booking(booking_id).is_none() {
            return Err(EngineError::NotFound(*booking_id));
        }
        Ok(guard)
    }
}

fn replay_contended(id: Ulid) -> io::Error {
    io::Error::other(format!("replay: room {id} lock unexpectedly held"))
}
