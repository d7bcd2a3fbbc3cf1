//! The command station: power controller, signal router and turnout registry
//! behind one owner.
//!
//! [`CommandStation`] exposes the operations the command surface maps to
//! (power on/off, turnout create/set/toggle/remove, status) and the periodic
//! entry points the scheduler calls ([`run_check_cycle`], [`refresh_tick`],
//! [`persist_turnouts`]). [`SharedStation`] puts the whole station behind a
//! single mutex so that enable state, fault state, the registry's dirty flag
//! and the dispatchers are only ever touched under one lock.
//!
//! [`run_check_cycle`]: CommandStation::run_check_cycle
//! [`refresh_tick`]: CommandStation::refresh_tick
//! [`persist_turnouts`]: CommandStation::persist_turnouts

use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use embedded_hal::delay::DelayNs;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{Config, ShortString};
use crate::dispatch::{DispatchStats, SignalRouter, SubmitOutcome};
use crate::error::StationError;
use crate::power::{PowerController, TrackStatus};
use crate::track::CheckOutcome;
use crate::traits::{ConfigStore, SignalChannel, SignalControl, SignalLink, TrackHardware};
use crate::turnout::{Turnout, TurnoutRegistry, TurnoutType};

/// Full station snapshot for status reporting.
#[derive(Clone, Debug, Serialize)]
pub struct StationStatus {
    /// Station name from the device config.
    pub name: ShortString,
    /// Every track output.
    pub tracks: Vec<TrackStatus>,
    /// Every turnout.
    pub turnouts: Vec<Turnout>,
    /// OPS dispatcher counters.
    pub ops: DispatchStats,
    /// PROG dispatcher counters.
    pub prog: DispatchStats,
    /// Command packets waiting for the dispatcher.
    pub pending_commands: usize,
}

/// Owner of every track-driver component.
///
/// # Type Parameters
///
/// - `H`: track output hardware
/// - `D`: blocking delay for current sampling
/// - `L`: signal generator link
/// - `S`: turnout persistence
pub struct CommandStation<H, D, L, S>
where
    H: TrackHardware,
    D: DelayNs,
    L: SignalLink,
    S: ConfigStore,
{
    config: Config,
    power: PowerController<H, D>,
    router: SignalRouter<L>,
    turnouts: TurnoutRegistry,
    store: S,
    refresh_code: u32,
}

impl<H, D, L, S> CommandStation<H, D, L, S>
where
    H: TrackHardware,
    D: DelayNs,
    L: SignalLink,
    S: ConfigStore,
{
    /// Creates a station with no track outputs and an empty registry.
    ///
    /// Register outputs through [`power_mut`](Self::power_mut) and call
    /// [`load_turnouts`](Self::load_turnouts) to restore stored turnouts.
    pub fn new(config: Config, delay: D, link: L, store: S) -> Self {
        info!("starting command station '{}'", config.device.name);
        Self {
            power: PowerController::new(delay, config.power.clone()),
            router: SignalRouter::new(link),
            turnouts: TurnoutRegistry::new(&config.turnouts),
            store,
            config,
            refresh_code: 0,
        }
    }

    // ------------------------------------------------------------------
    // Power
    // ------------------------------------------------------------------

    /// Powers on every OPS output.
    pub fn power_on_all(&mut self) -> usize {
        self.power.power_on_all(&mut self.router)
    }

    /// Powers off every OPS output.
    pub fn power_off_all(&mut self) -> usize {
        self.power.power_off_all(&mut self.router)
    }

    /// Powers on the named output. Returns false if unknown.
    pub fn power_on(&mut self, name: &str) -> bool {
        self.power.power_on(name, &mut self.router)
    }

    /// Powers off the named output. Returns false if unknown.
    pub fn power_off(&mut self, name: &str) -> bool {
        self.power.power_off(name, &mut self.router)
    }

    /// Last raw current reading of the named output.
    pub fn last_reading(&self, name: &str) -> Option<u16> {
        self.power.get_last_reading(name)
    }

    /// One over-current check of every output.
    pub fn run_check_cycle(&mut self) -> Vec<CheckOutcome> {
        self.power.run_check_cycle(&mut self.router)
    }

    // ------------------------------------------------------------------
    // Turnouts
    // ------------------------------------------------------------------

    /// Creates a turnout or updates the one at that board address.
    pub fn create_or_update_turnout(
        &mut self,
        board_address: u16,
        board_index: i8,
        turnout_type: TurnoutType,
    ) -> Result<u16, StationError> {
        Ok(self
            .turnouts
            .create_or_update(board_address, board_index, turnout_type)?)
    }

    /// Sets a turnout by id and sends the command. Returns false if unknown.
    pub fn set_turnout_by_id(&mut self, id: u16, thrown: bool) -> Result<bool, StationError> {
        let found = self.turnouts.set_by_id(id, thrown, true);
        self.pump_outbox()?;
        Ok(found)
    }

    /// Sets a turnout by linear address and sends the command.
    pub fn set_turnout_by_address(
        &mut self,
        address: u16,
        thrown: bool,
    ) -> Result<bool, StationError> {
        let found = self.turnouts.set_by_address(address, thrown, true);
        self.pump_outbox()?;
        Ok(found)
    }

    /// Flips a turnout by id and sends the command.
    pub fn toggle_turnout_by_id(&mut self, id: u16) -> Result<bool, StationError> {
        let found = self.turnouts.toggle_by_id(id);
        self.pump_outbox()?;
        Ok(found)
    }

    /// Flips a turnout by linear address and sends the command.
    pub fn toggle_turnout_by_address(&mut self, address: u16) -> Result<bool, StationError> {
        let found = self.turnouts.toggle_by_address(address);
        self.pump_outbox()?;
        Ok(found)
    }

    /// Removes a turnout by id.
    pub fn remove_turnout_by_id(&mut self, id: u16) -> bool {
        self.turnouts.remove_by_id(id)
    }

    /// Removes a turnout by linear address.
    pub fn remove_turnout_by_address(&mut self, address: u16) -> bool {
        self.turnouts.remove_by_address(address)
    }

    /// Replaces the registry with the stored turnouts.
    pub fn load_turnouts(&mut self) -> Result<usize, StationError> {
        Ok(self.turnouts.load(&mut self.store)?)
    }

    /// Writes the registry to the store if it changed.
    pub fn persist_turnouts(&mut self) -> Result<bool, StationError> {
        match self.turnouts.persist(&mut self.store) {
            Ok(written) => Ok(written),
            Err(e) => {
                warn!("failed to persist turnouts: {}", e);
                Err(e.into())
            }
        }
    }

    // ------------------------------------------------------------------
    // Packet flow
    // ------------------------------------------------------------------

    /// Moves queued turnout commands into the OPS dispatcher.
    ///
    /// Stops at the first packet the dispatcher cannot take and leaves it at
    /// the head of the outbox. Returns how many packets left the outbox.
    pub fn pump_outbox(&mut self) -> Result<usize, StationError> {
        let mut moved = 0;
        while let Some(packet) = self.turnouts.pop_outgoing() {
            match self.router.submit(packet)? {
                SubmitOutcome::Busy(packet) => {
                    self.turnouts.requeue_front(packet);
                    break;
                }
                SubmitOutcome::Suspended => {
                    moved += 1;
                    break;
                }
                SubmitOutcome::Sent | SubmitOutcome::Dropped => moved += 1,
            }
        }
        Ok(moved)
    }

    /// Sends the next refresh packet.
    ///
    /// Queued commands go first; no refresh packet is generated while any
    /// command is still waiting, or while the OPS signal is stopped.
    pub fn refresh_tick(&mut self) -> Result<Option<SubmitOutcome>, StationError> {
        self.pump_outbox()?;
        if self.turnouts.pending_outgoing() > 0
            || !self.router.is_signal_enabled(SignalChannel::Ops)
        {
            return Ok(None);
        }
        let Some(packet) = self.turnouts.get_next_packet(self.refresh_code) else {
            return Ok(None);
        };
        self.refresh_code = self.refresh_code.wrapping_add(1);
        match self.router.submit(packet)? {
            // Busy refresh packets are regenerated next round
            SubmitOutcome::Busy(_) => Ok(None),
            outcome => Ok(Some(outcome)),
        }
    }

    /// Delivers the link's ready notification for `channel`, then drains any
    /// commands that were waiting behind the suspended packet.
    pub fn on_link_ready(
        &mut self,
        channel: SignalChannel,
    ) -> Result<Option<SubmitOutcome>, StationError> {
        let outcome = self.router.on_ready(channel)?;
        debug!("[{}] link ready, retry: {:?}", channel.as_str(), outcome);
        if channel == SignalChannel::Ops {
            self.pump_outbox()?;
        }
        Ok(outcome)
    }

    // ------------------------------------------------------------------
    // Status and accessors
    // ------------------------------------------------------------------

    /// Snapshot of tracks, turnouts and dispatcher counters.
    pub fn status(&self) -> StationStatus {
        StationStatus {
            name: self.config.device.name.clone(),
            tracks: self.power.status(),
            turnouts: self.turnouts.snapshot().to_vec(),
            ops: self.router.stats(SignalChannel::Ops),
            prog: self.router.stats(SignalChannel::Prog),
            pending_commands: self.turnouts.pending_outgoing(),
        }
    }

    /// Station configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Power controller.
    pub fn power(&self) -> &PowerController<H, D> {
        &self.power
    }

    /// Power controller, for registering outputs.
    pub fn power_mut(&mut self) -> &mut PowerController<H, D> {
        &mut self.power
    }

    /// Signal router.
    pub fn router(&self) -> &SignalRouter<L> {
        &self.router
    }

    /// Signal router, mutably.
    pub fn router_mut(&mut self) -> &mut SignalRouter<L> {
        &mut self.router
    }

    /// Turnout registry.
    pub fn turnouts(&self) -> &TurnoutRegistry {
        &self.turnouts
    }

    /// Config store.
    pub fn store(&self) -> &S {
        &self.store
    }
}

// ============================================================================
// Shared Station
// ============================================================================

/// A [`CommandStation`] behind one mutex, shared between periodic tasks and
/// command handlers.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use rs_dccstation::{CommandStation, Config, SharedStation};
/// use rs_dccstation::hal::{MockConfigStore, MockDelay, MockLink, MockTrack};
/// use rs_dccstation::track::BoardType;
///
/// let station: CommandStation<MockTrack, MockDelay, MockLink, MockConfigStore> =
///     CommandStation::new(Config::default(), MockDelay::new(), MockLink::new(), MockConfigStore::new());
/// let shared = Arc::new(SharedStation::new(station));
///
/// shared.with_station(|s| {
///     s.power_mut().register(BoardType::Pololu, "MAIN", false, MockTrack::new());
///     s.power_on_all();
/// });
/// assert_eq!(shared.status().tracks.len(), 1);
/// ```
pub struct SharedStation<H, D, L, S>
where
    H: TrackHardware,
    D: DelayNs,
    L: SignalLink,
    S: ConfigStore,
{
    station: Mutex<CommandStation<H, D, L, S>>,
    start_time: Instant,
}

impl<H, D, L, S> SharedStation<H, D, L, S>
where
    H: TrackHardware,
    D: DelayNs,
    L: SignalLink,
    S: ConfigStore,
{
    /// Wraps a station.
    pub fn new(station: CommandStation<H, D, L, S>) -> Self {
        Self {
            station: Mutex::new(station),
            start_time: Instant::now(),
        }
    }

    /// Runs `f` with the station locked.
    ///
    /// A panic in an earlier holder does not make the station unusable; the
    /// track state it protects is still the hardware's state.
    pub fn with_station<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&mut CommandStation<H, D, L, S>) -> R,
    {
        let mut guard = self.station.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Status snapshot.
    pub fn status(&self) -> StationStatus {
        self.with_station(|s| s.status())
    }

    /// Milliseconds since the shared station was created.
    #[inline]
    pub fn uptime_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    /// Unwraps the station.
    pub fn into_inner(self) -> CommandStation<H, D, L, S> {
        self.station.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinkError;
    use crate::hal::{MockConfigStore, MockDelay, MockLink, MockTrack};
    use crate::track::{BoardType, FaultState};

    type TestStation = CommandStation<MockTrack, MockDelay, MockLink, MockConfigStore>;

    fn station_with(link: MockLink) -> TestStation {
        let mut station =
            CommandStation::new(Config::default(), MockDelay::new(), link, MockConfigStore::new());
        station
            .power_mut()
            .register(BoardType::ArduinoShield, "MAIN", false, MockTrack::new());
        station
            .power_mut()
            .register(BoardType::ArduinoShield, "PROG", true, MockTrack::new());
        station
    }

    fn station() -> TestStation {
        station_with(MockLink::new())
    }

    #[test]
    fn thrown_turnout_reaches_link() {
        let mut station = station();
        station.power_on_all();

        let id = station
            .create_or_update_turnout(1, 0, TurnoutType::Left)
            .unwrap();
        assert_eq!(id, 1);
        assert!(station.set_turnout_by_id(id, true).unwrap());

        let written = station.router().link().written_on(SignalChannel::Ops);
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].bytes(), &[0x81, 0xF9, 0x78]);
        assert_eq!(written[0].repeat_count(), 3);
    }

    #[test]
    fn unpowered_track_drops_commands() {
        let mut station = station();
        let id = station
            .create_or_update_turnout(1, 0, TurnoutType::Left)
            .unwrap();
        assert!(station.set_turnout_by_id(id, true).unwrap());

        assert!(station.router().link().written.is_empty());
        assert_eq!(station.turnouts().pending_outgoing(), 0);
        assert_eq!(station.router().stats(SignalChannel::Ops).dropped, 1);
        // state still recorded
        assert!(station.turnouts().get_by_id(id).unwrap().is_thrown());
    }

    #[test]
    fn unknown_turnout_returns_false() {
        let mut station = station();
        station.power_on_all();
        assert!(!station.set_turnout_by_id(42, true).unwrap());
        assert!(!station.toggle_turnout_by_address(99).unwrap());
        assert!(!station.remove_turnout_by_id(42));
        assert!(station.router().link().written.is_empty());
    }

    #[test]
    fn backpressure_holds_commands_until_ready() {
        let mut station = station_with(MockLink::new().with_capacity(0));
        station.power_on_all();
        station.create_or_update_turnout(1, 0, TurnoutType::Left).unwrap();
        station.create_or_update_turnout(1, 1, TurnoutType::Left).unwrap();

        station.set_turnout_by_address(1, true).unwrap();
        station.set_turnout_by_address(2, true).unwrap();
        // first is retained by the dispatcher, second waits in the outbox
        assert_eq!(station.turnouts().pending_outgoing(), 1);
        assert_eq!(station.router().link().notify_requests.len(), 1);

        // refresh does nothing while commands are waiting
        assert_eq!(station.refresh_tick().unwrap(), None);

        station.router_mut().link_mut().set_capacity(8);
        assert_eq!(
            station.on_link_ready(SignalChannel::Ops).unwrap(),
            Some(SubmitOutcome::Sent)
        );
        assert_eq!(station.turnouts().pending_outgoing(), 0);
        let written = station.router().link().written_on(SignalChannel::Ops);
        assert_eq!(written.len(), 2);
        assert_eq!(written[0].bytes()[0..2], [0x81, 0xF9]);
        assert_eq!(written[1].bytes()[0..2], [0x81, 0xFB]);
    }

    #[test]
    fn refresh_cycles_through_turnouts() {
        let mut station = station();
        station.power_on_all();
        station.create_or_update_turnout(1, 0, TurnoutType::Left).unwrap();
        station.create_or_update_turnout(2, 0, TurnoutType::Right).unwrap();

        for _ in 0..4 {
            assert_eq!(station.refresh_tick().unwrap(), Some(SubmitOutcome::Sent));
        }
        let addresses: Vec<u8> = station
            .router()
            .link()
            .written
            .iter()
            .map(|(_, p)| p.bytes()[0])
            .collect();
        assert_eq!(addresses, [0x81, 0x82, 0x81, 0x82]);
        assert!(station.router().link().written.iter().all(|(_, p)| p.repeat_count() == 0));
    }

    #[test]
    fn refresh_idle_without_turnouts_or_power() {
        let mut station = station();
        station.create_or_update_turnout(1, 0, TurnoutType::Left).unwrap();
        assert_eq!(station.refresh_tick().unwrap(), None);

        let mut empty = station_with(MockLink::new());
        empty.power_on_all();
        assert_eq!(empty.refresh_tick().unwrap(), None);
    }

    #[test]
    fn over_current_stops_ops_signal() {
        let mut station = station();
        station.power_on_all();
        station
            .power_mut()
            .output_mut("MAIN")
            .unwrap()
            .hardware_mut()
            .set_milliamps(1800, 2000);

        assert_eq!(
            station.run_check_cycle(),
            vec![CheckOutcome::Tripped, CheckOutcome::Idle]
        );
        assert!(!station.router().is_signal_enabled(SignalChannel::Ops));
        assert!(!station.router().link().is_running(SignalChannel::Ops));
        assert!(!station.power_on("MAIN"));
        assert_eq!(
            station.power().output("MAIN").unwrap().fault_state(),
            FaultState::Tripped
        );

        // turnout commands are dropped while tripped
        station.create_or_update_turnout(1, 0, TurnoutType::Left).unwrap();
        station.set_turnout_by_address(1, true).unwrap();
        assert!(station.router().link().written.is_empty());
    }

    #[test]
    fn tripped_output_recovers_and_restarts_signal() {
        let mut station = station();
        station.power_on_all();
        let main = station.power_mut().output_mut("MAIN").unwrap();
        main.hardware_mut().set_milliamps(1800, 2000);
        station.run_check_cycle();

        station
            .power_mut()
            .output_mut("MAIN")
            .unwrap()
            .hardware_mut()
            .set_raw(0);
        for _ in 0..39 {
            station.run_check_cycle();
        }
        assert!(!station.router().is_signal_enabled(SignalChannel::Ops));
        assert_eq!(station.run_check_cycle()[0], CheckOutcome::Recovered);
        assert!(station.router().is_signal_enabled(SignalChannel::Ops));
        assert_eq!(
            station.router().link().starts,
            vec![SignalChannel::Ops, SignalChannel::Ops]
        );
    }

    #[test]
    fn fatal_link_error_escalates() {
        let mut station = station();
        station.power_on_all();
        station.create_or_update_turnout(1, 0, TurnoutType::Left).unwrap();
        station.router_mut().link_mut().fail_with = Some(LinkError::Io(-3));

        let err = station.set_turnout_by_address(1, true).unwrap_err();
        assert!(matches!(err, StationError::Link(LinkError::Io(-3))));
    }

    #[test]
    fn invalid_board_index_escalates() {
        let mut station = station();
        let err = station
            .create_or_update_turnout(1, 9, TurnoutType::Left)
            .unwrap_err();
        assert!(matches!(err, StationError::Address(_)));
    }

    #[test]
    fn persist_and_reload() {
        let mut station = station();
        station.create_or_update_turnout(3, 2, TurnoutType::Wye).unwrap();
        station.set_turnout_by_address(11, true).unwrap();
        assert!(station.persist_turnouts().unwrap());
        assert!(!station.persist_turnouts().unwrap());
        assert_eq!(station.store().store_count, 1);

        let store = std::mem::take(&mut station.store);
        let mut restored: TestStation =
            CommandStation::new(Config::default(), MockDelay::new(), MockLink::new(), store);
        assert_eq!(restored.load_turnouts().unwrap(), 1);
        assert!(restored.turnouts().get_by_address(11).unwrap().is_thrown());
    }

    #[test]
    fn persist_failure_reported() {
        let mut station = station();
        station.create_or_update_turnout(1, 0, TurnoutType::Left).unwrap();
        station.store.fail_writes = true;
        assert!(matches!(
            station.persist_turnouts(),
            Err(StationError::Store(_))
        ));
        assert!(station.turnouts().is_dirty());

        // next attempt with a working store writes the same state
        station.store.fail_writes = false;
        assert!(station.persist_turnouts().unwrap());
        assert!(!station.turnouts().is_dirty());
        assert_eq!(station.store().store_count, 1);
        assert!(station.store().get("turnouts.json").is_some());
    }

    #[test]
    fn status_snapshot() {
        let mut station = station();
        station.power_on("MAIN");
        station.create_or_update_turnout(1, 0, TurnoutType::Left).unwrap();
        station.set_turnout_by_id(1, true).unwrap();

        let status = station.status();
        assert_eq!(status.name.as_str(), "rs-dccstation");
        assert_eq!(status.tracks.len(), 2);
        assert_eq!(status.turnouts.len(), 1);
        assert_eq!(status.ops.sent, 1);
        assert_eq!(status.prog, DispatchStats::default());

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["tracks"][0]["state"], "on");
        assert_eq!(json["turnouts"][0]["state"], true);
    }

    #[test]
    fn shared_station_locks_and_unwraps() {
        let shared = SharedStation::new(station());
        shared.with_station(|s| s.power_on_all());
        assert!(shared.with_station(|s| s.power().is_any_track_powered()));
        assert_eq!(shared.status().tracks[0].state, crate::power::TrackState::On);

        let station = shared.into_inner();
        assert!(station.router().is_signal_enabled(SignalChannel::Ops));
    }
}
