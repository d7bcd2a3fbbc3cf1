//! Mock implementations for testing without hardware.
//!
//! This module provides test doubles for all hardware and storage traits,
//! enabling development and testing on desktop without a command station board.
//!
//! # Available Mocks
//!
//! | Mock | Trait | Purpose |
//! |------|-------|---------|
//! | [`MockTrack`] | [`TrackHardware`] | Enable line state and scripted current readings |
//! | [`MockDelay`] | [`DelayNs`] | Records requested delays without sleeping |
//! | [`MockSignalControl`] | [`SignalControl`] | Records channel start/stop requests |
//! | [`MockLink`] | [`SignalLink`] | Bounded buffer with backpressure and fault injection |
//! | [`MockConfigStore`] | [`ConfigStore`] | In-memory blob store |
//!
//! # Example
//!
//! ```rust
//! use rs_dccstation::{CommandStation, Config, TurnoutType};
//! use rs_dccstation::hal::{MockConfigStore, MockDelay, MockLink, MockTrack};
//! use rs_dccstation::track::BoardType;
//!
//! let mut station: CommandStation<MockTrack, MockDelay, MockLink, MockConfigStore> =
//!     CommandStation::new(Config::default(), MockDelay::new(), MockLink::new(), MockConfigStore::new());
//! station.power_mut().register(BoardType::ArduinoShield, "MAIN", false, MockTrack::new());
//! station.power_on_all();
//!
//! let id = station.create_or_update_turnout(1, 0, TurnoutType::Left).unwrap();
//! station.set_turnout_by_id(id, true).unwrap();
//!
//! assert_eq!(station.router().link().written[0].1.bytes(), &[0x81, 0xF9, 0x78]);
//! ```
//!
//! [`TrackHardware`]: crate::traits::TrackHardware
//! [`DelayNs`]: embedded_hal::delay::DelayNs
//! [`SignalControl`]: crate::traits::SignalControl
//! [`SignalLink`]: crate::traits::SignalLink
//! [`ConfigStore`]: crate::traits::ConfigStore

use std::collections::{HashMap, VecDeque};

use embedded_hal::delay::DelayNs;

use crate::error::{LinkError, StoreError};
use crate::packet::DccPacket;
use crate::traits::{ConfigStore, SignalChannel, SignalControl, SignalLink, TrackHardware, SENSE_FULL_SCALE};

// ============================================================================
// Hardware Mocks
// ============================================================================

/// Mock track output for testing.
///
/// Readings queued with [`push_reading`](Self::push_reading) are returned
/// first, one per read; after that every read returns the level set with
/// [`set_raw`](Self::set_raw) or [`set_milliamps`](Self::set_milliamps).
///
/// # Example
///
/// ```rust
/// use rs_dccstation::hal::MockTrack;
/// use rs_dccstation::traits::TrackHardware;
///
/// let mut track = MockTrack::new();
/// track.set_milliamps(1000, 2000);
/// track.push_reading(5);
///
/// assert_eq!(track.read_raw_current(), 5);
/// assert_eq!(track.read_raw_current(), 2048);
/// assert_eq!(track.reads, 2);
/// ```
#[derive(Debug, Default)]
pub struct MockTrack {
    /// Current state of the enable line.
    pub enabled: bool,
    /// Number of times `set_enable` was called.
    pub enable_calls: usize,
    /// Number of raw readings taken.
    pub reads: usize,
    level: u16,
    queued: VecDeque<u16>,
}

impl MockTrack {
    /// Creates a disabled mock reading zero current.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the steady raw reading.
    pub fn set_raw(&mut self, raw: u16) {
        self.level = raw;
    }

    /// Sets the steady reading from a current in milliamps, scaled against
    /// the board's full-scale current.
    pub fn set_milliamps(&mut self, milliamps: u32, max_milliamps: u32) {
        let raw = (milliamps * SENSE_FULL_SCALE / max_milliamps.max(1)).min(SENSE_FULL_SCALE - 1);
        self.level = raw as u16;
    }

    /// Queues a single reading ahead of the steady level.
    pub fn push_reading(&mut self, raw: u16) {
        self.queued.push_back(raw);
    }
}

impl TrackHardware for MockTrack {
    fn set_enable(&mut self, on: bool) {
        self.enabled = on;
        self.enable_calls += 1;
    }

    fn read_raw_current(&mut self) -> u16 {
        self.reads += 1;
        self.queued.pop_front().unwrap_or(self.level)
    }
}

/// Mock delay that returns immediately.
///
/// # Example
///
/// ```rust
/// use embedded_hal::delay::DelayNs;
/// use rs_dccstation::hal::MockDelay;
///
/// let mut delay = MockDelay::new();
/// delay.delay_us(1000);
/// assert_eq!(delay.calls, 1);
/// assert_eq!(delay.total_ns, 1_000_000);
/// ```
#[derive(Debug, Default)]
pub struct MockDelay {
    /// Number of delay requests.
    pub calls: usize,
    /// Sum of all requested delays in nanoseconds.
    pub total_ns: u64,
}

impl MockDelay {
    /// Creates a delay with no recorded calls.
    pub fn new() -> Self {
        Self::default()
    }
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.calls += 1;
        self.total_ns += u64::from(ns);
    }

    fn delay_us(&mut self, us: u32) {
        self.calls += 1;
        self.total_ns += u64::from(us) * 1_000;
    }

    fn delay_ms(&mut self, ms: u32) {
        self.calls += 1;
        self.total_ns += u64::from(ms) * 1_000_000;
    }
}

/// Mock signal channel control.
///
/// Tracks which channels are running and records every start and stop that
/// changed something.
#[derive(Debug, Default)]
pub struct MockSignalControl {
    /// Channels started, in order.
    pub starts: Vec<SignalChannel>,
    /// Channels stopped, in order.
    pub stops: Vec<SignalChannel>,
    ops: bool,
    prog: bool,
}

impl MockSignalControl {
    /// Creates a control with both channels stopped.
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&mut self, channel: SignalChannel) -> &mut bool {
        match channel {
            SignalChannel::Ops => &mut self.ops,
            SignalChannel::Prog => &mut self.prog,
        }
    }
}

impl SignalControl for MockSignalControl {
    fn is_signal_enabled(&self, channel: SignalChannel) -> bool {
        match channel {
            SignalChannel::Ops => self.ops,
            SignalChannel::Prog => self.prog,
        }
    }

    fn start_signal(&mut self, channel: SignalChannel) {
        let flag = self.flag(channel);
        if !*flag {
            *flag = true;
            self.starts.push(channel);
        }
    }

    fn stop_signal(&mut self, channel: SignalChannel) {
        let flag = self.flag(channel);
        if *flag {
            *flag = false;
            self.stops.push(channel);
        }
    }
}

// ============================================================================
// Signal Generator Mock
// ============================================================================

/// Mock signal generator link.
///
/// Accepts writes while it has free slots, then reports
/// [`LinkError::BufferFull`]. Slots are shared by both channels and never
/// free up on their own: refill them with [`set_capacity`](Self::set_capacity)
/// before delivering a ready notification.
///
/// # Example
///
/// ```rust
/// use rs_dccstation::error::LinkError;
/// use rs_dccstation::hal::MockLink;
/// use rs_dccstation::packet::DccPacket;
/// use rs_dccstation::traits::{SignalChannel, SignalLink};
///
/// let mut link = MockLink::new().with_capacity(1);
/// assert!(link.write(SignalChannel::Ops, &DccPacket::idle()).is_ok());
/// assert_eq!(link.write(SignalChannel::Ops, &DccPacket::idle()), Err(LinkError::BufferFull));
/// assert_eq!(link.written.len(), 1);
/// ```
#[derive(Debug)]
pub struct MockLink {
    /// Packets accepted, with their channel.
    pub written: Vec<(SignalChannel, DccPacket)>,
    /// Channels a ready notification was requested for, in order.
    pub notify_requests: Vec<SignalChannel>,
    /// Channel start calls, in order.
    pub starts: Vec<SignalChannel>,
    /// Channel stop calls, in order.
    pub stops: Vec<SignalChannel>,
    /// Total `write` calls, accepted or not.
    pub write_attempts: usize,
    /// Error returned by every write while set.
    pub fail_with: Option<LinkError>,
    capacity: usize,
    running: HashMap<SignalChannel, bool>,
}

impl MockLink {
    /// Creates a link with room for 1024 packets.
    pub fn new() -> Self {
        Self {
            written: Vec::new(),
            notify_requests: Vec::new(),
            starts: Vec::new(),
            stops: Vec::new(),
            write_attempts: 0,
            fail_with: None,
            capacity: 1024,
            running: HashMap::new(),
        }
    }

    /// Sets the number of free slots.
    pub fn with_capacity(mut self, slots: usize) -> Self {
        self.capacity = slots;
        self
    }

    /// Refills the free slots.
    pub fn set_capacity(&mut self, slots: usize) {
        self.capacity = slots;
    }

    /// True between `start` and `stop` for `channel`.
    pub fn is_running(&self, channel: SignalChannel) -> bool {
        self.running.get(&channel).copied().unwrap_or(false)
    }

    /// Packets accepted on `channel`.
    pub fn written_on(&self, channel: SignalChannel) -> Vec<&DccPacket> {
        self.written
            .iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, p)| p)
            .collect()
    }
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalLink for MockLink {
    fn write(&mut self, channel: SignalChannel, packet: &DccPacket) -> Result<(), LinkError> {
        self.write_attempts += 1;
        if let Some(err) = self.fail_with {
            return Err(err);
        }
        if self.capacity == 0 {
            return Err(LinkError::BufferFull);
        }
        self.capacity -= 1;
        self.written.push((channel, packet.clone()));
        Ok(())
    }

    fn request_ready_notify(&mut self, channel: SignalChannel) {
        self.notify_requests.push(channel);
    }

    fn start(&mut self, channel: SignalChannel) {
        self.starts.push(channel);
        self.running.insert(channel, true);
    }

    fn stop(&mut self, channel: SignalChannel) {
        self.stops.push(channel);
        self.running.insert(channel, false);
    }
}

// ============================================================================
// Storage Mock
// ============================================================================

/// In-memory config store.
#[derive(Debug, Default)]
pub struct MockConfigStore {
    /// Number of successful `store` calls.
    pub store_count: usize,
    /// When set, every `store` fails with [`StoreError::Unavailable`].
    pub fail_writes: bool,
    entries: HashMap<String, Vec<u8>>,
}

impl MockConfigStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw contents of the named entry.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries.get(name).map(Vec::as_slice)
    }
}

impl ConfigStore for MockConfigStore {
    fn load(&mut self, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.get(name).cloned())
    }

    fn store(&mut self, name: &str, data: &[u8]) -> Result<(), StoreError> {
        if self.fail_writes {
            return Err(StoreError::Unavailable);
        }
        self.entries.insert(name.to_owned(), data.to_vec());
        self.store_count += 1;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
