//! Refresh coordinator for Helios
//!
//! This module contains the orchestration core: it runs periodic (or
//! on-demand) refresh cycles that fetch the price feed, reload the persisted
//! schedule, derive the per-hour statistics, and publish a consistent
//! snapshot. All schedule mutations are serialized through the coordinator so
//! at most one refresh is ever in flight.

use crate::config::Config;
use crate::error::{HeliosError, Result};
use crate::logging::get_logger;
use crate::pstryk::{PriceSource, PriceTable, PstrykClient};
use crate::schedule::{OperatingMode, ScheduleTable, hour_key, validate_hour_key};
use crate::store::ScheduleStore;
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Duration, interval};

/// Coordinator lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Startup refresh has not completed yet
    Initializing,
    /// Serving a current snapshot
    Ready,
    /// Last refresh failed; still serving the previous snapshot
    Stale,
    /// Coordinator is shutting down
    ShuttingDown,
}

/// Immutable result of one refresh cycle, replaced wholesale on each refresh
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    /// Hour key → price, rebuilt fully on every successful fetch
    pub prices: PriceTable,
    /// Hour key → mode overrides
    pub schedule: ScheduleTable,
    /// Mode for the current hour (`Default` when no override exists)
    pub current_mode: OperatingMode,
    /// Price for the current hour, if the feed covers it
    pub current_price: Option<f64>,
    /// Price for the next hour, if the feed covers it
    pub next_price: Option<f64>,
    /// Mean over all present prices; 0 when the table is empty
    pub average_price: f64,
    /// Minimum over all present prices; 0 when the table is empty
    pub min_price: f64,
    /// Maximum over all present prices; 0 when the table is empty
    pub max_price: f64,
    /// When this snapshot was published
    pub last_update: DateTime<Utc>,
}

/// Commands accepted by the coordinator from external callers (web, etc.)
enum Command {
    Refresh {
        respond_to: oneshot::Sender<Result<Snapshot>>,
    },
    SetSchedule {
        hour: String,
        mode: String,
        respond_to: oneshot::Sender<Result<()>>,
    },
    ClearSchedule {
        hour: String,
        respond_to: oneshot::Sender<Result<()>>,
    },
}

/// Refresh coordinator: the single owner of the price and schedule tables
pub struct Coordinator {
    /// Configuration
    config: Config,

    /// Price feed
    source: Box<dyn PriceSource>,

    /// Schedule persistence slot
    store: ScheduleStore,

    /// In-memory schedule, reloaded from the store on each refresh
    schedule: ScheduleTable,

    /// Published snapshot (None until the startup refresh succeeds)
    snapshot_tx: watch::Sender<Option<Snapshot>>,

    /// Lifecycle state
    state_tx: watch::Sender<CoordinatorState>,

    /// Command receiver for external control
    commands_rx: mpsc::UnboundedReceiver<Command>,

    /// Shutdown receiver
    shutdown_rx: mpsc::UnboundedReceiver<()>,

    /// Logger with context
    logger: crate::logging::StructuredLogger,
}

/// Cloneable handle for talking to a running coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    commands_tx: mpsc::UnboundedSender<Command>,
    shutdown_tx: mpsc::UnboundedSender<()>,
    snapshot_rx: watch::Receiver<Option<Snapshot>>,
    state_rx: watch::Receiver<CoordinatorState>,
}

impl Coordinator {
    /// Create a coordinator from the on-disk configuration
    pub fn new() -> Result<(Self, CoordinatorHandle)> {
        let config = Config::load().map_err(|e| {
            eprintln!("Failed to load configuration: {}", e);
            e
        })?;
        config.validate()?;

        // Initialize logging
        crate::logging::init_logging(&config.logging)?;

        let source = Box::new(PstrykClient::new(&config.api)?);
        let store = ScheduleStore::new(&config.storage.schedule_file);

        Ok(Self::with_parts(config, source, store))
    }

    /// Create a coordinator from pre-built parts (used by tests to inject a
    /// fake price feed)
    pub fn with_parts(
        config: Config,
        source: Box<dyn PriceSource>,
        store: ScheduleStore,
    ) -> (Self, CoordinatorHandle) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let (state_tx, state_rx) = watch::channel(CoordinatorState::Initializing);

        let coordinator = Self {
            config,
            source,
            store,
            schedule: ScheduleTable::new(),
            snapshot_tx,
            state_tx,
            commands_rx,
            shutdown_rx,
            logger: get_logger("coordinator"),
        };
        let handle = CoordinatorHandle {
            commands_tx,
            shutdown_tx,
            snapshot_rx,
            state_rx,
        };
        (coordinator, handle)
    }

    /// Get configuration reference
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the coordinator loop.
    ///
    /// The startup refresh must succeed before the loop starts; its failure
    /// is fatal and propagates to the caller. Later refresh failures are
    /// logged and the previous snapshot stays published.
    pub async fn run(&mut self) -> Result<()> {
        self.logger.info("Starting refresh coordinator");

        if let Err(e) = self.refresh_cycle().await {
            self.logger
                .error(&format!("Startup refresh failed: {}", e));
            return Err(e);
        }
        self.state_tx.send(CoordinatorState::Ready).ok();

        let mut ticker = interval(Duration::from_secs(
            self.config.refresh_interval_minutes * 60,
        ));
        ticker.tick().await; // skip immediate first tick - the startup refresh already ran

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.refresh_cycle().await {
                        Ok(_) => {
                            self.state_tx.send(CoordinatorState::Ready).ok();
                        }
                        Err(e) => {
                            self.logger.error(&format!(
                                "Periodic refresh failed, serving previous snapshot: {}", e
                            ));
                            self.state_tx.send(CoordinatorState::Stale).ok();
                        }
                    }
                }
                Some(cmd) = self.commands_rx.recv() => {
                    self.handle_command(cmd).await;
                }
                _ = self.shutdown_rx.recv() => {
                    self.logger.info("Shutdown signal received");
                    break;
                }
            }
        }

        self.state_tx.send(CoordinatorState::ShuttingDown).ok();
        self.logger.info("Coordinator shutdown complete");
        Ok(())
    }

    /// One fetch-merge-compute-publish cycle
    async fn refresh_cycle(&mut self) -> Result<Snapshot> {
        self.logger.debug("Starting refresh cycle");

        let prices = self
            .source
            .fetch_prices()
            .await
            .map_err(|e| HeliosError::refresh(format!("price fetch failed: {}", e)))?;

        // A failing reload keeps the in-memory schedule; the refresh proceeds.
        match self.store.load() {
            Ok(schedule) => self.schedule = schedule,
            Err(e) => {
                self.logger.warn(&format!(
                    "Schedule reload failed, keeping in-memory table: {}",
                    e
                ));
            }
        }

        let snapshot = build_snapshot(prices, self.schedule.clone(), Local::now().naive_local());
        self.snapshot_tx.send_replace(Some(snapshot.clone()));

        self.logger.debug(&format!(
            "Published snapshot: {} prices, {} schedule entries, mode {}",
            snapshot.prices.len(),
            snapshot.schedule.len(),
            snapshot.current_mode
        ));
        Ok(snapshot)
    }

    /// Handle external command
    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Refresh { respond_to } => {
                let result = self.refresh_cycle().await;
                match &result {
                    Ok(_) => {
                        self.state_tx.send(CoordinatorState::Ready).ok();
                    }
                    Err(e) => {
                        self.logger.error(&format!(
                            "Requested refresh failed, serving previous snapshot: {}", e
                        ));
                        self.state_tx.send(CoordinatorState::Stale).ok();
                    }
                }
                let _ = respond_to.send(result);
            }
            Command::SetSchedule {
                hour,
                mode,
                respond_to,
            } => {
                let _ = respond_to.send(self.apply_set(&hour, &mode).await);
            }
            Command::ClearSchedule { hour, respond_to } => {
                let _ = respond_to.send(self.apply_clear(&hour).await);
            }
        }
    }

    /// Set the mode for one hour, persist, and refresh
    async fn apply_set(&mut self, hour: &str, mode: &str) -> Result<()> {
        let key = validate_hour_key(hour)?;
        let Some(mode) = OperatingMode::from_label(mode) else {
            return Err(HeliosError::validation(
                "mode",
                format!("unknown mode label: {}", mode),
            ));
        };

        self.schedule.insert(key.clone(), mode);
        self.store.save(&self.schedule)?;
        self.logger
            .info(&format!("Schedule set: {} -> {}", key, mode));

        self.refresh_after_mutation().await;
        Ok(())
    }

    /// Clear the mode for one hour, persist, and refresh.
    ///
    /// Clearing an absent key still succeeds, persists, and refreshes.
    async fn apply_clear(&mut self, hour: &str) -> Result<()> {
        let key = validate_hour_key(hour)?;

        if self.schedule.remove(&key).is_some() {
            self.logger.info(&format!("Schedule cleared: {}", key));
        } else {
            self.logger
                .debug(&format!("Schedule clear for unscheduled hour: {}", key));
        }
        self.store.save(&self.schedule)?;

        self.refresh_after_mutation().await;
        Ok(())
    }

    /// Refresh after a successful mutation; a failure here does not undo the
    /// mutation and is reported like any periodic refresh failure
    async fn refresh_after_mutation(&mut self) {
        match self.refresh_cycle().await {
            Ok(_) => {
                self.state_tx.send(CoordinatorState::Ready).ok();
            }
            Err(e) => {
                self.logger.error(&format!(
                    "Refresh after schedule change failed, serving previous snapshot: {}",
                    e
                ));
                self.state_tx.send(CoordinatorState::Stale).ok();
            }
        }
    }
}

impl CoordinatorHandle {
    /// Latest published snapshot, if the startup refresh has completed
    pub fn latest_snapshot(&self) -> Option<Snapshot> {
        self.snapshot_rx.borrow().clone()
    }

    /// Current lifecycle state
    pub fn state(&self) -> CoordinatorState {
        *self.state_rx.borrow()
    }

    /// Subscribe to snapshot updates (for SSE)
    pub fn subscribe(&self) -> watch::Receiver<Option<Snapshot>> {
        self.snapshot_rx.clone()
    }

    /// Request an on-demand refresh and wait for its result
    pub async fn refresh(&self) -> Result<Snapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Refresh { respond_to: tx })?;
        rx.await
            .map_err(|_| HeliosError::generic("coordinator dropped the request"))?
    }

    /// Set the mode for one hour
    pub async fn set_schedule(&self, hour: &str, mode: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::SetSchedule {
            hour: hour.to_string(),
            mode: mode.to_string(),
            respond_to: tx,
        })?;
        rx.await
            .map_err(|_| HeliosError::generic("coordinator dropped the request"))?
    }

    /// Clear the mode for one hour
    pub async fn clear_schedule(&self, hour: &str) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::ClearSchedule {
            hour: hour.to_string(),
            respond_to: tx,
        })?;
        rx.await
            .map_err(|_| HeliosError::generic("coordinator dropped the request"))?
    }

    /// Request shutdown
    pub fn request_shutdown(&self) {
        self.shutdown_tx.send(()).ok();
    }

    fn send(&self, cmd: Command) -> Result<()> {
        self.commands_tx
            .send(cmd)
            .map_err(|_| HeliosError::generic("coordinator is not running"))
    }
}

/// Assemble a snapshot from the freshly fetched prices and the current
/// schedule, bucketing `now` to its hour key
fn build_snapshot(prices: PriceTable, schedule: ScheduleTable, now: NaiveDateTime) -> Snapshot {
    let current_key = hour_key(now);
    let next_key = hour_key(now + chrono::Duration::hours(1));

    let current_mode = schedule
        .get(&current_key)
        .copied()
        .unwrap_or(OperatingMode::Default);
    let current_price = prices.get(&current_key).copied();
    let next_price = prices.get(&next_key).copied();

    // Statistics over present entries only; zero for an empty table by policy
    let (average_price, min_price, max_price) = if prices.is_empty() {
        (0.0, 0.0, 0.0)
    } else {
        let sum: f64 = prices.values().sum();
        let min = prices.values().copied().fold(f64::INFINITY, f64::min);
        let max = prices.values().copied().fold(f64::NEG_INFINITY, f64::max);
        (sum / prices.len() as f64, min, max)
    };

    Snapshot {
        prices,
        schedule,
        current_mode,
        current_price,
        next_price,
        average_price,
        min_price,
        max_price,
        last_update: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn price_table(entries: &[(&str, f64)]) -> PriceTable {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect()
    }

    #[test]
    fn snapshot_over_empty_table_is_zeroed() {
        let snap = build_snapshot(PriceTable::new(), ScheduleTable::new(), at(10, 0));
        assert_eq!(snap.average_price, 0.0);
        assert_eq!(snap.min_price, 0.0);
        assert_eq!(snap.max_price, 0.0);
        assert_eq!(snap.current_price, None);
        assert_eq!(snap.next_price, None);
        assert_eq!(snap.current_mode, OperatingMode::Default);
    }

    #[test]
    fn snapshot_statistics_over_present_prices() {
        let prices = price_table(&[
            ("2024-01-01T09:00:00", 0.30),
            ("2024-01-01T10:00:00", 0.10),
            ("2024-01-01T11:00:00", 0.20),
        ]);
        let snap = build_snapshot(prices, ScheduleTable::new(), at(10, 25));
        assert!((snap.average_price - 0.20).abs() < 1e-9);
        assert_eq!(snap.min_price, 0.10);
        assert_eq!(snap.max_price, 0.30);
        assert_eq!(snap.current_price, Some(0.10));
        assert_eq!(snap.next_price, Some(0.20));
    }

    #[test]
    fn snapshot_next_price_absent_at_table_edge() {
        let prices = price_table(&[("2024-01-01T10:00:00", 0.10)]);
        let snap = build_snapshot(prices, ScheduleTable::new(), at(10, 59));
        assert_eq!(snap.current_price, Some(0.10));
        assert_eq!(snap.next_price, None);
    }

    #[test]
    fn snapshot_mode_defaults_without_override() {
        let mut schedule = ScheduleTable::new();
        schedule.insert("2024-01-01T10:00:00".to_string(), OperatingMode::Buy);

        let snap = build_snapshot(PriceTable::new(), schedule.clone(), at(10, 5));
        assert_eq!(snap.current_mode, OperatingMode::Buy);

        let snap = build_snapshot(PriceTable::new(), schedule, at(11, 5));
        assert_eq!(snap.current_mode, OperatingMode::Default);
    }

    #[test]
    fn snapshot_bucketing_crosses_midnight() {
        let prices = price_table(&[("2024-01-02T00:00:00", 0.40)]);
        let snap = build_snapshot(prices, ScheduleTable::new(), at(23, 30));
        assert_eq!(snap.next_price, Some(0.40));
    }
}
