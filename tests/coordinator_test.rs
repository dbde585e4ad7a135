use chrono::Local;
use helios::HeliosError;
use helios::config::Config;
use helios::coordinator::{Coordinator, CoordinatorState};
use helios::pstryk::{PriceSource, PriceTable};
use helios::schedule::{OperatingMode, hour_key};
use helios::store::ScheduleStore;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Controllable in-memory price feed
#[derive(Clone)]
struct FakeSource {
    inner: Arc<FakeSourceInner>,
}

struct FakeSourceInner {
    prices: Mutex<PriceTable>,
    fail: AtomicBool,
    fetches: AtomicUsize,
}

impl FakeSource {
    fn new(prices: PriceTable) -> Self {
        Self {
            inner: Arc::new(FakeSourceInner {
                prices: Mutex::new(prices),
                fail: AtomicBool::new(false),
                fetches: AtomicUsize::new(0),
            }),
        }
    }

    fn set_failing(&self, failing: bool) {
        self.inner.fail.store(failing, Ordering::SeqCst);
    }

    fn fetch_count(&self) -> usize {
        self.inner.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl PriceSource for FakeSource {
    async fn fetch_prices(&self) -> helios::Result<PriceTable> {
        self.inner.fetches.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail.load(Ordering::SeqCst) {
            return Err(HeliosError::source("simulated feed outage"));
        }
        Ok(self.inner.prices.lock().unwrap().clone())
    }
}

struct TestRig {
    source: FakeSource,
    handle: helios::CoordinatorHandle,
    schedule_path: String,
    _dir: tempfile::TempDir,
}

/// Spawn a coordinator over a fake feed; returns once the startup refresh ran
async fn spawn_coordinator(prices: PriceTable) -> TestRig {
    let dir = tempfile::tempdir().unwrap();
    let schedule_path = dir.path().join("schedule.json").to_string_lossy().to_string();
    let source = FakeSource::new(prices);

    let store = ScheduleStore::new(&schedule_path);
    let (mut coordinator, handle) =
        Coordinator::with_parts(Config::default(), Box::new(source.clone()), store);
    tokio::spawn(async move {
        let _ = coordinator.run().await;
    });

    // An on-demand refresh doubles as the readiness sync point: it is only
    // answered after the startup refresh completed.
    handle.refresh().await.unwrap();

    TestRig {
        source,
        handle,
        schedule_path,
        _dir: dir,
    }
}

fn single_price_table() -> PriceTable {
    let mut prices = PriceTable::new();
    prices.insert("2024-01-01T10:00:00".to_string(), 0.5);
    prices
}

#[tokio::test]
async fn startup_refresh_failure_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("schedule.json").to_string_lossy().to_string();
    let source = FakeSource::new(PriceTable::new());
    source.set_failing(true);

    let (mut coordinator, handle) = Coordinator::with_parts(
        Config::default(),
        Box::new(source),
        ScheduleStore::new(&path),
    );

    let err = coordinator.run().await.unwrap_err();
    assert!(matches!(err, HeliosError::Refresh { .. }));
    assert_eq!(handle.state(), CoordinatorState::Initializing);
    assert!(handle.latest_snapshot().is_none());
}

#[tokio::test]
async fn set_schedule_applies_to_current_hour() {
    let rig = spawn_coordinator(PriceTable::new()).await;

    let key = hour_key(Local::now().naive_local());
    rig.handle.set_schedule(&key, "Buy").await.unwrap();

    let snapshot = rig.handle.latest_snapshot().unwrap();
    assert_eq!(snapshot.current_mode, OperatingMode::Buy);
    assert_eq!(snapshot.schedule.get(&key), Some(&OperatingMode::Buy));
}

#[tokio::test]
async fn set_schedule_rejects_unknown_mode_before_any_state_change() {
    let rig = spawn_coordinator(PriceTable::new()).await;
    let fetches_before = rig.source.fetch_count();

    let err = rig
        .handle
        .set_schedule("2024-01-01T10:00:00", "Hold")
        .await
        .unwrap_err();
    assert!(matches!(err, HeliosError::Validation { .. }));

    // Rejected before any state change: nothing persisted, no refresh ran
    assert!(!std::path::Path::new(&rig.schedule_path).exists());
    assert_eq!(rig.source.fetch_count(), fetches_before);
}

#[tokio::test]
async fn set_schedule_rejects_malformed_hour() {
    let rig = spawn_coordinator(PriceTable::new()).await;

    for hour in ["garbage", "2024-01-01T10:30:00", ""] {
        let err = rig.handle.set_schedule(hour, "Buy").await.unwrap_err();
        assert!(matches!(err, HeliosError::Validation { .. }), "hour {hour:?}");
    }
}

#[tokio::test]
async fn clear_schedule_on_absent_hour_succeeds_and_refreshes() {
    let rig = spawn_coordinator(PriceTable::new()).await;
    let fetches_before = rig.source.fetch_count();

    rig.handle
        .clear_schedule("2024-01-01T10:00:00")
        .await
        .unwrap();

    // The no-op clear still persisted and still triggered a refresh
    assert!(std::path::Path::new(&rig.schedule_path).exists());
    assert_eq!(rig.source.fetch_count(), fetches_before + 1);
}

#[tokio::test]
async fn clear_schedule_removes_existing_override() {
    let rig = spawn_coordinator(PriceTable::new()).await;

    let key = hour_key(Local::now().naive_local());
    rig.handle.set_schedule(&key, "Sell (All)").await.unwrap();
    assert_eq!(
        rig.handle.latest_snapshot().unwrap().current_mode,
        OperatingMode::SellAll
    );

    rig.handle.clear_schedule(&key).await.unwrap();
    let snapshot = rig.handle.latest_snapshot().unwrap();
    assert_eq!(snapshot.current_mode, OperatingMode::Default);
    assert!(snapshot.schedule.is_empty());
}

#[tokio::test]
async fn failed_refresh_retains_previous_snapshot() {
    let rig = spawn_coordinator(single_price_table()).await;
    let good = rig.handle.latest_snapshot().unwrap();
    assert_eq!(good.prices.len(), 1);

    rig.source.set_failing(true);
    let err = rig.handle.refresh().await.unwrap_err();
    assert!(matches!(err, HeliosError::Refresh { .. }));
    assert_eq!(rig.handle.state(), CoordinatorState::Stale);

    // The previously published snapshot is untouched
    let retained = rig.handle.latest_snapshot().unwrap();
    assert_eq!(retained.prices, good.prices);
    assert_eq!(retained.last_update, good.last_update);

    // The next successful refresh recovers
    rig.source.set_failing(false);
    rig.handle.refresh().await.unwrap();
    assert_eq!(rig.handle.state(), CoordinatorState::Ready);
}

#[tokio::test]
async fn schedule_survives_coordinator_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("schedule.json").to_string_lossy().to_string();

    {
        let source = FakeSource::new(PriceTable::new());
        let (mut coordinator, handle) = Coordinator::with_parts(
            Config::default(),
            Box::new(source),
            ScheduleStore::new(&path),
        );
        tokio::spawn(async move {
            let _ = coordinator.run().await;
        });
        handle
            .set_schedule("2030-06-01T10:00:00", "Buy (Charge car)")
            .await
            .unwrap();
        handle.request_shutdown();
    }

    let source = FakeSource::new(PriceTable::new());
    let (mut coordinator, handle) = Coordinator::with_parts(
        Config::default(),
        Box::new(source),
        ScheduleStore::new(&path),
    );
    tokio::spawn(async move {
        let _ = coordinator.run().await;
    });

    let snapshot = handle.refresh().await.unwrap();
    assert_eq!(
        snapshot.schedule.get("2030-06-01T10:00:00"),
        Some(&OperatingMode::BuyChargeCar)
    );
}

#[tokio::test]
async fn refresh_rebuilds_price_table_wholesale() {
    let rig = spawn_coordinator(single_price_table()).await;
    assert_eq!(rig.handle.latest_snapshot().unwrap().prices.len(), 1);

    let mut fresh = PriceTable::new();
    fresh.insert("2024-01-02T09:00:00".to_string(), 0.7);
    fresh.insert("2024-01-02T10:00:00".to_string(), 0.9);
    *rig.source.inner.prices.lock().unwrap() = fresh.clone();

    let snapshot = rig.handle.refresh().await.unwrap();
    // Stale entries are discarded, not merged
    assert_eq!(snapshot.prices, fresh);
}
