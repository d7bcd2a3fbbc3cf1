//! Periodic station tasks on the tokio runtime.

use std::sync::Arc;
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::StationError;
use crate::station::SharedStation;
use crate::track::CheckOutcome;
use crate::traits::{ConfigStore, SignalChannel, SignalLink, TrackHardware};

/// How a station task ended. Only fatal station errors end a task.
pub type TaskResult = Result<(), StationError>;

/// Queue depth for ready notifications; one per channel is enough in practice.
const READY_QUEUE_DEPTH: usize = 8;

/// Handles of the running station tasks.
pub struct StationTasks {
    /// Over-current check loop.
    pub check: JoinHandle<TaskResult>,
    /// Command drain and refresh loop.
    pub refresh: JoinHandle<TaskResult>,
    /// Turnout persistence loop.
    pub persist: JoinHandle<TaskResult>,
    /// Ready notification delivery.
    pub ready: JoinHandle<TaskResult>,
}

impl StationTasks {
    /// Stops every task.
    pub fn abort(&self) {
        self.check.abort();
        self.refresh.abort();
        self.persist.abort();
        self.ready.abort();
    }
}

/// Sender side of the link's ready notifications.
///
/// Given to whatever drives the signal generator; call
/// [`notify`](Self::notify) when a channel that asked for a notification
/// has room again.
#[derive(Clone, Debug)]
pub struct ReadyNotifier {
    tx: mpsc::Sender<SignalChannel>,
}

impl ReadyNotifier {
    /// Queues a ready notification. Returns false if the queue is full or
    /// the station tasks are gone.
    pub fn notify(&self, channel: SignalChannel) -> bool {
        self.tx.try_send(channel).is_ok()
    }
}

/// Spawns the check, refresh, persist and ready tasks.
///
/// Periods come from the station's configuration.
pub fn spawn_station_tasks<H, D, L, S>(
    station: Arc<SharedStation<H, D, L, S>>,
) -> (StationTasks, ReadyNotifier)
where
    H: TrackHardware + Send + 'static,
    D: DelayNs + Send + 'static,
    L: SignalLink + Send + 'static,
    S: ConfigStore + Send + 'static,
{
    let config = station.with_station(|s| s.config().clone());
    let (tx, rx) = mpsc::channel(READY_QUEUE_DEPTH);

    info!(
        "station tasks: check every {} ms, refresh every {} ms, persist every {} ms",
        config.power.check_interval_ms,
        config.turnouts.refresh_interval_ms,
        config.turnouts.persist_interval_ms
    );

    let tasks = StationTasks {
        check: tokio::spawn(run_check_task(
            Arc::clone(&station),
            millis(config.power.check_interval_ms),
        )),
        refresh: tokio::spawn(run_refresh_task(
            Arc::clone(&station),
            millis(config.turnouts.refresh_interval_ms),
        )),
        persist: tokio::spawn(run_persist_task(
            Arc::clone(&station),
            millis(config.turnouts.persist_interval_ms),
        )),
        ready: tokio::spawn(run_ready_task(station, rx)),
    };
    (tasks, ReadyNotifier { tx })
}

fn millis(ms: u32) -> Duration {
    Duration::from_millis(u64::from(ms.max(1)))
}

/// Runs the over-current check on every tick.
///
/// Sampling blocks for the whole averaging window, so each cycle runs on the
/// blocking pool.
pub async fn run_check_task<H, D, L, S>(
    station: Arc<SharedStation<H, D, L, S>>,
    period: Duration,
) -> TaskResult
where
    H: TrackHardware + Send + 'static,
    D: DelayNs + Send + 'static,
    L: SignalLink + Send + 'static,
    S: ConfigStore + Send + 'static,
{
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let shared = Arc::clone(&station);
        match tokio::task::spawn_blocking(move || shared.with_station(|s| s.run_check_cycle())).await
        {
            Ok(outcomes) => {
                if outcomes.contains(&CheckOutcome::Recovered) {
                    debug!("check cycle: output recovered");
                }
            }
            Err(e) => warn!("check cycle did not complete: {}", e),
        }
    }
}

/// Drains queued commands and sends one refresh packet per tick.
pub async fn run_refresh_task<H, D, L, S>(
    station: Arc<SharedStation<H, D, L, S>>,
    period: Duration,
) -> TaskResult
where
    H: TrackHardware,
    D: DelayNs,
    L: SignalLink,
    S: ConfigStore,
{
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        if let Err(e) = station.with_station(|s| s.refresh_tick()) {
            error!("refresh halted: {}", e);
            return Err(e);
        }
    }
}

/// Persists the turnout registry on every tick if it changed.
///
/// Write failures are logged and the task keeps going; the registry stays
/// dirty, so the next tick retries the write.
pub async fn run_persist_task<H, D, L, S>(
    station: Arc<SharedStation<H, D, L, S>>,
    period: Duration,
) -> TaskResult
where
    H: TrackHardware,
    D: DelayNs,
    L: SignalLink,
    S: ConfigStore,
{
    let mut interval = tokio::time::interval(period);
    // first tick completes immediately; nothing to save yet
    interval.tick().await;
    loop {
        interval.tick().await;
        match station.with_station(|s| s.persist_turnouts()) {
            Ok(true) => debug!("turnouts saved"),
            Ok(false) => {}
            Err(StationError::Store(e)) => warn!("turnout save skipped: {}", e),
            Err(e) => return Err(e),
        }
    }
}

/// Delivers ready notifications until every [`ReadyNotifier`] is dropped.
pub async fn run_ready_task<H, D, L, S>(
    station: Arc<SharedStation<H, D, L, S>>,
    mut rx: mpsc::Receiver<SignalChannel>,
) -> TaskResult
where
    H: TrackHardware,
    D: DelayNs,
    L: SignalLink,
    S: ConfigStore,
{
    while let Some(channel) = rx.recv().await {
        if let Err(e) = station.with_station(|s| s.on_link_ready(channel)) {
            error!("[{}] dispatch halted: {}", channel.as_str(), e);
            return Err(e);
        }
    }
    Ok(())
}
