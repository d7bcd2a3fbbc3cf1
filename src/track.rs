//! Track power outputs and their over-current state machine.
//!
//! Each [`TrackOutput`] is one physical H-bridge channel: the main line (OPS)
//! or the programming track (PROG). It owns the enable line, samples the
//! current sense input and trips itself off when the draw crosses the trigger
//! threshold.
//!
//! # Fault handling
//!
//! ```text
//!            reading >= trigger
//!   Normal ─────────────────────▶ Tripped ◀──────────┐
//!     ▲                              │               │ reading >= trigger
//!     │ countdown hits 0             │ reading < trigger
//!     │ (power back on)              ▼               │
//!     └──────────────────────── Clearing(n) ─────────┘
//! ```
//!
//! A single low reading never re-enables a tripped output. It has to stay
//! below the trigger for `fault_clear_cycles` consecutive checks (nominally
//! 40 × 250 ms), so a borderline short does not make the track oscillate.

use embedded_hal::delay::DelayNs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{short_string, PowerConfig, ShortString};
use crate::traits::{SignalChannel, SignalControl, TrackHardware, SENSE_FULL_SCALE};

/// Trigger current forced onto programming track outputs, in milliamps.
///
/// Gives a 20% margin over the RCN-216 service mode limit; decoders being
/// programmed tolerate far less current than running locomotives.
pub const PROG_TRIGGER_MA: u32 = 300;

/// Motor driver boards with known current ratings.
///
/// Board types differ only in their current constants, so they are plain data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardType {
    /// Arduino motor shield (L298).
    ArduinoShield,
    /// Pololu MC33926 shield.
    Pololu,
    /// LMD18200 H-bridge.
    Lmd18200,
    /// BTS7960 limited to 5 A.
    Bts7960b5A,
    /// BTS7960 limited to 10 A.
    Bts7960b10A,
}

impl BoardType {
    /// Full-scale current of the board's sense output, in milliamps.
    pub const fn max_milliamps(&self) -> u32 {
        match self {
            BoardType::ArduinoShield => 2_000,
            BoardType::Pololu => 2_500,
            BoardType::Lmd18200 => 3_000,
            BoardType::Bts7960b5A | BoardType::Bts7960b10A => 43_000,
        }
    }

    /// Over-current trigger for main line use, in milliamps.
    pub const fn trigger_milliamps(&self) -> u32 {
        match self {
            BoardType::ArduinoShield => 1_750,
            BoardType::Pololu => 2_250,
            BoardType::Lmd18200 => 2_750,
            BoardType::Bts7960b5A => 5_000,
            BoardType::Bts7960b10A => 10_000,
        }
    }
}

/// Over-current protection state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultState {
    /// No fault. The output may be on or off.
    #[default]
    Normal,
    /// Shut down by over-current; held off.
    Tripped,
    /// Current is back under the trigger; counting down checks before re-enable.
    Clearing(u16),
}

/// What a single [`TrackOutput::check`] observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Not sampled: output is off without a pending fault, or not monitored.
    Idle,
    /// Sampled under the trigger while running normally.
    Ok,
    /// Over-current detected; output shut down.
    Tripped,
    /// Still over the trigger while tripped.
    FaultPersists {
        /// Consecutive over-trigger checks since the trip.
        recurrences: u32,
    },
    /// Under the trigger; waiting out the clear countdown. Holds the checks
    /// left before re-enable.
    Clearing(u16),
    /// Countdown finished; output powered back on.
    Recovered,
}

/// One track power output.
///
/// # Type Parameter
///
/// - `H`: the enable line and current sense ([`TrackHardware`] trait)
///
/// # Example
///
/// ```rust
/// use rs_dccstation::track::{BoardType, CheckOutcome, FaultState, TrackOutput};
/// use rs_dccstation::hal::{MockDelay, MockTrack, MockSignalControl};
/// use rs_dccstation::config::PowerConfig;
///
/// let config = PowerConfig::default();
/// let mut track = TrackOutput::new("OPS", MockTrack::new(), BoardType::ArduinoShield, false, &config);
/// let mut signals = MockSignalControl::new();
/// let mut delay = MockDelay::new();
///
/// track.power_on(&mut signals);
/// assert!(track.is_enabled());
///
/// // 1800 mA against a 1750 mA trigger
/// track.hardware_mut().set_milliamps(1800, BoardType::ArduinoShield.max_milliamps());
/// assert_eq!(track.check(&mut delay, &mut signals, false), CheckOutcome::Tripped);
/// assert_eq!(track.fault_state(), FaultState::Tripped);
/// assert!(!track.is_enabled());
/// ```
#[derive(Debug)]
pub struct TrackOutput<H: TrackHardware> {
    name: ShortString,
    hardware: H,
    trigger_milliamps: u32,
    max_milliamps: u32,
    trigger_raw: u16,
    is_programming_track: bool,
    monitored: bool,
    enabled: bool,
    fault_state: FaultState,
    last_reading: u16,
    fault_recurrence_count: u32,
    fault_clear_countdown: u16,
    fault_clear_cycles: u16,
    sample_count: u8,
    sample_delay_us: u32,
}

impl<H: TrackHardware> TrackOutput<H> {
    /// Creates a monitored output using the board catalog's current ratings.
    ///
    /// Programming track outputs get `config.prog_trigger_ma` as trigger,
    /// whatever the board is rated for. The enable line starts deasserted.
    pub fn new(
        name: &str,
        mut hardware: H,
        board_type: BoardType,
        is_programming_track: bool,
        config: &PowerConfig,
    ) -> Self {
        let max_milliamps = board_type.max_milliamps();
        let trigger_milliamps = if is_programming_track {
            config.prog_trigger_ma
        } else {
            board_type.trigger_milliamps()
        }
        .min(max_milliamps);
        let trigger_raw = (SENSE_FULL_SCALE * trigger_milliamps / max_milliamps) as u16;

        hardware.set_enable(false);
        info!(
            "[{}] configuring {:?} output, trigger {} mA (raw {}), max {} mA{}",
            name,
            board_type,
            trigger_milliamps,
            trigger_raw,
            max_milliamps,
            if is_programming_track { ", programming track" } else { "" }
        );

        Self {
            name: short_string(name),
            hardware,
            trigger_milliamps,
            max_milliamps,
            trigger_raw,
            is_programming_track,
            monitored: true,
            enabled: false,
            fault_state: FaultState::Normal,
            last_reading: 0,
            fault_recurrence_count: 0,
            fault_clear_countdown: 0,
            fault_clear_cycles: config.fault_clear_cycles.max(1),
            sample_count: config.sample_count.max(1),
            sample_delay_us: config.sample_delay_us,
        }
    }

    /// Creates an OPS output without current sensing. It never trips.
    pub fn non_monitored(name: &str, mut hardware: H, config: &PowerConfig) -> Self {
        hardware.set_enable(false);
        info!("[{}] configuring non-monitored output", name);
        Self {
            name: short_string(name),
            hardware,
            trigger_milliamps: 0,
            max_milliamps: 0,
            trigger_raw: u16::MAX,
            is_programming_track: false,
            monitored: false,
            enabled: false,
            fault_state: FaultState::Normal,
            last_reading: 0,
            fault_recurrence_count: 0,
            fault_clear_countdown: 0,
            fault_clear_cycles: config.fault_clear_cycles.max(1),
            sample_count: config.sample_count.max(1),
            sample_delay_us: config.sample_delay_us,
        }
    }

    /// Turns the output on and starts its signal channel if needed.
    ///
    /// Does nothing if already on, and refuses while a fault is pending.
    /// Returns true if the output was switched on.
    pub fn power_on(&mut self, signals: &mut impl SignalControl) -> bool {
        if self.enabled {
            return false;
        }
        if self.fault_state != FaultState::Normal {
            warn!("[{}] power on refused, over-current fault pending", self.name);
            return false;
        }
        info!("[{}] enabling DCC signal", self.name);
        self.hardware.set_enable(true);
        self.enabled = true;

        let channel = self.channel();
        if !signals.is_signal_enabled(channel) {
            signals.start_signal(channel);
        }
        true
    }

    /// Turns the output off.
    ///
    /// `others_powered` tells whether another output on the same channel stays
    /// on; when none does (always for the programming track) the channel's
    /// signal is stopped so nothing keeps queueing for a dead track.
    ///
    /// A manual power off (`is_fault == false`) also cancels a pending fault
    /// recovery, so the output stays off once the short clears.
    pub fn power_off(
        &mut self,
        is_fault: bool,
        signals: &mut impl SignalControl,
        others_powered: bool,
    ) -> bool {
        let was_enabled = self.enabled;
        if is_fault {
            warn!("[{}] disabling DCC signal (over-current)", self.name);
        } else {
            if was_enabled {
                info!("[{}] disabling DCC signal", self.name);
            }
            if self.fault_state != FaultState::Normal {
                info!("[{}] fault recovery cancelled by power off", self.name);
            }
            self.fault_state = FaultState::Normal;
            self.fault_clear_countdown = 0;
            self.fault_recurrence_count = 0;
        }
        self.hardware.set_enable(false);
        self.enabled = false;

        let channel = self.channel();
        if (self.is_programming_track || !others_powered) && signals.is_signal_enabled(channel) {
            signals.stop_signal(channel);
        }
        was_enabled
    }

    /// Samples the current and advances the fault state machine.
    ///
    /// Runs while the output is on, or while it is tripped and waiting to
    /// clear. Blocks for `sample_count` readings spaced by `sample_delay_us`.
    pub fn check(
        &mut self,
        delay: &mut impl DelayNs,
        signals: &mut impl SignalControl,
        others_powered: bool,
    ) -> CheckOutcome {
        if !self.monitored || (!self.enabled && self.fault_state == FaultState::Normal) {
            return CheckOutcome::Idle;
        }

        let reading = self.capture_sample(delay);
        self.last_reading = reading;
        let over = reading >= self.trigger_raw;

        match (over, self.fault_state) {
            (true, FaultState::Normal) => {
                warn!(
                    "[{}] over-current detected {} mA (raw: {})",
                    self.name,
                    self.current_draw_ma(),
                    reading
                );
                self.power_off(true, signals, others_powered);
                self.fault_state = FaultState::Tripped;
                self.fault_clear_countdown = self.fault_clear_cycles;
                self.fault_recurrence_count = 0;
                CheckOutcome::Tripped
            }
            (true, _) => {
                self.fault_recurrence_count += 1;
                self.fault_state = FaultState::Tripped;
                self.fault_clear_countdown = self.fault_clear_cycles;
                warn!(
                    "[{}] over-current persists ({} checks) {} mA (raw: {})",
                    self.name,
                    self.fault_recurrence_count,
                    self.current_draw_ma(),
                    reading
                );
                CheckOutcome::FaultPersists {
                    recurrences: self.fault_recurrence_count,
                }
            }
            (false, FaultState::Normal) => CheckOutcome::Ok,
            (false, _) => {
                self.fault_clear_countdown = self.fault_clear_countdown.saturating_sub(1);
                if self.fault_clear_countdown == 0 {
                    info!(
                        "[{}] over-current cleared {} mA, enabling (raw: {})",
                        self.name,
                        self.current_draw_ma(),
                        reading
                    );
                    self.fault_state = FaultState::Normal;
                    self.power_on(signals);
                    CheckOutcome::Recovered
                } else {
                    debug!(
                        "[{}] over-current cleared {} mA, {} checks before re-enable (raw: {})",
                        self.name,
                        self.current_draw_ma(),
                        self.fault_clear_countdown,
                        reading
                    );
                    self.fault_state = FaultState::Clearing(self.fault_clear_countdown);
                    CheckOutcome::Clearing(self.fault_clear_countdown)
                }
            }
        }
    }

    /// Averages `sample_count` raw readings taken back to back.
    fn capture_sample(&mut self, delay: &mut impl DelayNs) -> u16 {
        let count = u32::from(self.sample_count);
        let mut total: u32 = 0;
        for i in 0..count {
            if i > 0 {
                delay.delay_us(self.sample_delay_us);
            }
            total += u32::from(self.hardware.read_raw_current());
        }
        (total / count) as u16
    }

    /// Output name as configured.
    #[inline]
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Signal channel this output carries.
    #[inline]
    pub fn channel(&self) -> SignalChannel {
        if self.is_programming_track {
            SignalChannel::Prog
        } else {
            SignalChannel::Ops
        }
    }

    /// True if the enable line is asserted.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// True for the programming track output.
    #[inline]
    pub fn is_programming_track(&self) -> bool {
        self.is_programming_track
    }

    /// True if the output samples its current.
    #[inline]
    pub fn is_monitored(&self) -> bool {
        self.monitored
    }

    /// Current protection state.
    #[inline]
    pub fn fault_state(&self) -> FaultState {
        self.fault_state
    }

    /// True while tripped or clearing.
    #[inline]
    pub fn is_over_current(&self) -> bool {
        self.fault_state != FaultState::Normal
    }

    /// Last averaged raw reading.
    #[inline]
    pub fn last_reading(&self) -> u16 {
        self.last_reading
    }

    /// Effective trigger in milliamps.
    #[inline]
    pub fn trigger_milliamps(&self) -> u32 {
        self.trigger_milliamps
    }

    /// Board full-scale current in milliamps.
    #[inline]
    pub fn max_milliamps(&self) -> u32 {
        self.max_milliamps
    }

    /// Effective trigger in raw sense counts.
    #[inline]
    pub fn trigger_raw(&self) -> u16 {
        self.trigger_raw
    }

    /// Over-trigger checks seen since the last trip. Diagnostic only.
    #[inline]
    pub fn fault_recurrence_count(&self) -> u32 {
        self.fault_recurrence_count
    }

    /// Checks left before a tripped output re-enables.
    #[inline]
    pub fn fault_clear_countdown(&self) -> u16 {
        self.fault_clear_countdown
    }

    /// Last reading converted to milliamps for display.
    pub fn current_draw_ma(&self) -> u32 {
        u32::from(self.last_reading) * self.max_milliamps / SENSE_FULL_SCALE
    }

    /// Access to the underlying hardware.
    #[inline]
    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    /// Mutable access to the underlying hardware.
    #[inline]
    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hardware
    }
}
