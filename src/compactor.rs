use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::{Engine, EngineError};

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites the WAL once enough appends have piled up
/// since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(e) = maybe_compact(&engine, threshold).await {
            tracing::error!("WAL compaction failed: {e}");
        }
    }
}

/// Compact if the append count has reached `threshold`. Returns the number
/// of events in the rewritten log, or `None` if nothing was done.
pub async fn maybe_compact(engine: &Engine, threshold: u64) -> Result<Option<usize>, EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold.max(1) {
        return Ok(None);
    }
    let events = engine.compact_wal().await?;
    info!(appends, events, "WAL compacted");
    Ok(Some(events))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::model::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("innkeep_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let clock = Arc::new(FixedClock::at_date(d("2024-01-01")));
        let engine = Engine::new(path.clone(), clock).unwrap();
        let staff = Actor::admin("frontdesk");
        let guest = Actor::guest("alice");

        let room = Ulid::new();
        let spec = RoomSpec {
            number: "101".into(),
            price_per_night: dec!(90),
            capacity: 2,
            is_active: true,
            description: None,
        };
        engine.create_room(&staff, room, spec).await.unwrap();
        assert_eq!(maybe_compact(&engine, 5).await.unwrap(), None);

        // Book and cancel repeatedly: each pair leaves two events behind.
        for i in 0..3 {
            let id = Ulid::new();
            let check_in = d("2024-02-01") + chrono::Days::new(i * 5);
            let stay = StayRange::new(check_in, check_in + chrono::Days::new(2));
            engine.create_booking(&guest, id, room, stay).await.unwrap();
            engine.cancel_booking(&guest, id).await.unwrap();
        }
        assert_eq!(engine.wal_appends_since_compact().await, 7);

        let events = maybe_compact(&engine, 5).await.unwrap();
        assert_eq!(events, Some(7));
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert_eq!(maybe_compact(&engine, 5).await.unwrap(), None);
    }
}
