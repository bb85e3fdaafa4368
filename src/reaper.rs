use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};
use crate::model::Ms;

/// Cancel every pending reservation whose payment window closed at or before
/// `now`. Returns how many were cancelled.
pub async fn reap_lapsed(engine: &Engine, now: Ms) -> usize {
    let mut reaped = 0;
    for (id, court_id) in engine.collect_lapsed_reservations(now) {
        match engine.expire_reservation(id, now).await {
            Ok(true) => {
                reaped += 1;
                info!(reservation = %id, court = %court_id, "payment window lapsed, reservation cancelled");
            }
            // Confirmed or cancelled since it was collected.
            Ok(false) => {}
            Err(EngineError::Timeout) => debug!(reservation = %id, "court busy, retrying next sweep"),
            Err(e) => warn!(reservation = %id, error = %e, "reaper failed to cancel reservation"),
        }
    }
    reaped
}

/// Background task that periodically cancels lapsed pending reservations.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        reap_lapsed(&engine, crate::engine::now_ms()).await;
    }
}

/// Background task that rewrites the journal once `threshold` events have
/// been appended since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let appends = engine.journal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_journal().await {
            Ok(()) => info!(appends, "journal compacted"),
            Err(e) => warn!(error = %e, "journal compaction failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineOptions;
    use crate::model::*;
    use crate::notify::EventHub;
    use crate::schedule::{hm, ScheduleConfig};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_journal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("courtside_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn at(t: chrono::NaiveTime) -> Ms {
        NaiveDate::from_ymd_opt(2026, 10, 20)
            .unwrap()
            .and_time(t)
            .and_utc()
            .timestamp_millis()
    }

    #[tokio::test]
    async fn reaper_cancels_only_lapsed_pending() {
        let path = test_journal_path("reap_lapsed.journal");
        let options = EngineOptions {
            payment_timeout: Some(Duration::from_secs(600)),
            ..EngineOptions::default()
        };
        let engine = Engine::new(path, Arc::new(EventHub::new()), options).unwrap();

        let court = Ulid::new();
        engine.register_court(court, None, Decimal::ONE_HUNDRED).await.unwrap();
        engine
            .set_schedule(court, Some(ScheduleConfig::new(hm(9, 0), hm(22, 0), 60).with_advance(0, 30)))
            .await
            .unwrap();

        let now = at(hm(8, 0));
        let lapsing = Ulid::new();
        let paid = Ulid::new();
        engine
            .try_reserve_at(lapsing, court, Span::new(at(hm(10, 0)), at(hm(11, 0))), "p1".into(), now)
            .await
            .unwrap();
        engine
            .try_reserve_at(paid, court, Span::new(at(hm(11, 0)), at(hm(12, 0))), "p2".into(), now)
            .await
            .unwrap();
        engine.confirm_reservation_at(paid, now + 60_000).await.unwrap();

        // Before the deadline nothing is reaped.
        assert_eq!(reap_lapsed(&engine, now + 599_999).await, 0);

        assert_eq!(reap_lapsed(&engine, now + 600_000).await, 1);
        assert_eq!(engine.reservation(lapsing).await.unwrap().status, ReservationStatus::Cancelled);
        assert_eq!(engine.reservation(paid).await.unwrap().status, ReservationStatus::Confirmed);

        // A second sweep finds nothing.
        assert_eq!(reap_lapsed(&engine, now + 700_000).await, 0);
    }
}
