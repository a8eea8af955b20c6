use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::engine::{Engine, SweepReport};

/// Result of one watcher pass.
#[derive(Debug, Default)]
pub struct WatchReport {
    pub expired: SweepReport,
    pub unpaid: SweepReport,
    pub completed: SweepReport,
}

/// One pass over every time-driven transition, all judged against the
/// same instant.
pub async fn watch_once(engine: &Engine) -> WatchReport {
    let now = engine.now_ms();
    let report = WatchReport {
        expired: engine.sweep(now).await,
        unpaid: engine.expire_unpaid(now).await,
        completed: engine.complete_elapsed(now).await,
    };
    debug!(
        "watch pass at {now}: {} expired, {} unpaid, {} completed",
        report.expired.transitioned.len(),
        report.unpaid.transitioned.len(),
        report.completed.transitioned.len()
    );
    report
}

/// Background task driving approval deadlines, stale payments and stay
/// completion off the wall clock. Returns once `shutdown` flips; a pass
/// already running is finished first.
pub async fn run_deadline_watcher(
    engine: Arc<Engine>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => return,
        }
        watch_once(&engine).await;
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => return,
        }
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("WAL compacted after {appends} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::Policy;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use crate::payment::{IntentStatus, PaymentVerb, SandboxProcessor};
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("daybook_test_watcher");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, day).unwrap()
    }

    async fn setup(
        name: &str,
        requires_approval: bool,
    ) -> (Arc<Engine>, Arc<SandboxProcessor>, Arc<ManualClock>, Vehicle) {
        let payments = Arc::new(SandboxProcessor::new());
        let clock = Arc::new(ManualClock::new(date_start_ms(d(1))));
        let engine = Engine::new(
            test_wal_path(name),
            Arc::new(NotifyHub::new()),
            payments.clone(),
            Policy::default(),
        )
        .unwrap()
        .with_clock(clock.clone());
        let vehicle = Vehicle {
            id: Ulid::new(),
            owner_id: Ulid::new(),
            name: Some("Corolla".into()),
            base_price_per_day: 8_500,
            requires_approval,
        };
        engine
            .upsert_vehicle(vehicle.owner_id, vehicle.clone())
            .await
            .unwrap();
        (Arc::new(engine), payments, clock, vehicle)
    }

    fn profile() -> RenterProfile {
        RenterProfile {
            name: "Rui".into(),
            email: "rui@example.com".into(),
            phone: None,
        }
    }

    fn request(vehicle: &Vehicle, start: u32, end: u32) -> CreateBookingRequest {
        CreateBookingRequest {
            vehicle_id: vehicle.id,
            renter_id: Ulid::new(),
            start_date: d(start),
            end_date: d(end),
        }
    }

    #[tokio::test]
    async fn pass_rejects_overdue_requests() {
        let (engine, payments, clock, vehicle) = setup("overdue.wal", true).await;
        let booking = engine
            .create_booking(request(&vehicle, 10, 12), profile())
            .await
            .unwrap();

        clock.advance(23 * HOUR_MS);
        let report = watch_once(&engine).await;
        assert!(report.expired.transitioned.is_empty());

        clock.advance(HOUR_MS + 1_000);
        let report = watch_once(&engine).await;
        assert_eq!(report.expired.transitioned, vec![booking.id]);

        let after = engine.get_booking(booking.id).await.unwrap();
        assert_eq!(after.status, BookingStatus::Rejected);
        let intent = payments.intent(after.payment_intent_id.as_deref().unwrap()).unwrap();
        assert_eq!(intent.status, IntentStatus::Canceled);
    }

    #[tokio::test]
    async fn pass_expires_unpaid_instant_bookings() {
        let (engine, payments, clock, vehicle) = setup("unpaid.wal", false).await;
        let booking = engine
            .create_booking(request(&vehicle, 10, 11), profile())
            .await
            .unwrap();
        assert_eq!(booking.status, BookingStatus::Pending);

        clock.advance(engine.policy().payment_timeout_ms + 1);
        let report = watch_once(&engine).await;
        assert_eq!(report.unpaid.transitioned, vec![booking.id]);
        assert_eq!(payments.calls(PaymentVerb::CancelAuthorization), 1);
        assert!(engine.check_range(vehicle.id, d(10), d(11), None).await.unwrap());
    }

    #[tokio::test]
    async fn pass_completes_finished_stays() {
        let (engine, _payments, clock, vehicle) = setup("complete.wal", false).await;
        let renter = Ulid::new();
        let mut req = request(&vehicle, 3, 4);
        req.renter_id = renter;
        let booking = engine.create_booking(req, profile()).await.unwrap();
        engine.confirm_payment(booking.id, renter).await.unwrap();

        clock.set(date_start_ms(d(4)) + HOUR_MS);
        assert!(watch_once(&engine).await.completed.transitioned.is_empty());

        clock.set(date_start_ms(d(5)));
        let report = watch_once(&engine).await;
        assert_eq!(report.completed.transitioned, vec![booking.id]);
        let done = engine.get_booking(booking.id).await.unwrap();
        assert_eq!(done.status, BookingStatus::Completed);
        assert_eq!(done.payment_status, PaymentStatus::Captured);
    }

    #[tokio::test]
    async fn watcher_stops_on_shutdown() {
        let (engine, _payments, _clock, _vehicle) = setup("shutdown.wal", true).await;
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(run_deadline_watcher(engine, Duration::from_millis(10), rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("watcher did not stop")
            .unwrap();
    }
}
