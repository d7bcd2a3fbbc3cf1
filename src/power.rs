//! Power controller owning every track output.
//!
//! Outputs are looked up by name, case-insensitively. Bulk operations
//! ([`PowerController::power_on_all`] / [`PowerController::power_off_all`])
//! only touch OPS outputs; the programming track is switched on and off by
//! name, because powering it by accident can wipe a decoder under test.

use embedded_hal::delay::DelayNs;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{short_string, PowerConfig, ShortString};
use crate::track::{BoardType, CheckOutcome, TrackOutput};
use crate::traits::{SignalChannel, SignalControl, TrackHardware};

/// Coarse output state for status reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    /// Enabled and drawing current under the trigger.
    On,
    /// Tripped or clearing.
    Fault,
    /// Disabled.
    Off,
}

/// Snapshot of one output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TrackStatus {
    /// Output name.
    pub name: ShortString,
    /// Signal channel.
    pub channel: SignalChannel,
    /// Current state.
    pub state: TrackState,
    /// Last reading in milliamps.
    pub usage_ma: u32,
    /// Effective trigger in milliamps (0 if not monitored).
    pub trigger_ma: u32,
}

/// Owner of all track outputs and of the blocking delay used for sampling.
///
/// # Type Parameters
///
/// - `H`: hardware behind each output ([`TrackHardware`])
/// - `D`: inter-sample delay ([`DelayNs`])
pub struct PowerController<H: TrackHardware, D: DelayNs> {
    outputs: Vec<TrackOutput<H>>,
    delay: D,
    config: PowerConfig,
}

impl<H: TrackHardware, D: DelayNs> PowerController<H, D> {
    /// Creates a controller with no outputs.
    pub fn new(delay: D, config: PowerConfig) -> Self {
        Self {
            outputs: Vec::new(),
            delay,
            config,
        }
    }

    /// Registers a monitored output from the board catalog.
    pub fn register(
        &mut self,
        board_type: BoardType,
        name: &str,
        is_programming_track: bool,
        hardware: H,
    ) {
        let output = TrackOutput::new(name, hardware, board_type, is_programming_track, &self.config);
        self.outputs.push(output);
    }

    /// Registers an OPS output without current sensing.
    pub fn register_non_monitored(&mut self, name: &str, hardware: H) {
        let output = TrackOutput::non_monitored(name, hardware, &self.config);
        self.outputs.push(output);
    }

    /// Powers on every OPS output. Returns how many were switched on.
    pub fn power_on_all(&mut self, signals: &mut impl SignalControl) -> usize {
        info!("enabling all OPS outputs");
        self.outputs
            .iter_mut()
            .filter(|o| !o.is_programming_track())
            .map(|o| o.power_on(signals))
            .filter(|&changed| changed)
            .count()
    }

    /// Powers off every OPS output. Returns how many were switched off.
    pub fn power_off_all(&mut self, signals: &mut impl SignalControl) -> usize {
        info!("disabling all OPS outputs");
        let mut switched = 0;
        for pos in 0..self.outputs.len() {
            if self.outputs[pos].is_programming_track() {
                continue;
            }
            let others = self.others_powered(pos);
            if self.outputs[pos].power_off(false, signals, others) {
                switched += 1;
            }
        }
        switched
    }

    /// Powers on the named output. Returns false if no output has that name.
    pub fn power_on(&mut self, name: &str, signals: &mut impl SignalControl) -> bool {
        match self.position(name) {
            Some(pos) => {
                self.outputs[pos].power_on(signals);
                true
            }
            None => {
                debug!("power on: unknown output '{}'", name);
                false
            }
        }
    }

    /// Powers off the named output. Returns false if no output has that name.
    pub fn power_off(&mut self, name: &str, signals: &mut impl SignalControl) -> bool {
        match self.position(name) {
            Some(pos) => {
                let others = self.others_powered(pos);
                self.outputs[pos].power_off(false, signals, others);
                true
            }
            None => {
                debug!("power off: unknown output '{}'", name);
                false
            }
        }
    }

    /// Last raw reading of the named output.
    pub fn get_last_reading(&self, name: &str) -> Option<u16> {
        self.output(name).map(TrackOutput::last_reading)
    }

    /// True if any output, programming track included, is enabled.
    pub fn is_any_track_powered(&self) -> bool {
        self.outputs.iter().any(TrackOutput::is_enabled)
    }

    /// Number of registered OPS outputs.
    pub fn count_of_ops_channels(&self) -> usize {
        self.outputs
            .iter()
            .filter(|o| !o.is_programming_track())
            .count()
    }

    /// Runs one check on every output, in registration order.
    pub fn run_check_cycle(&mut self, signals: &mut impl SignalControl) -> Vec<CheckOutcome> {
        let mut outcomes = Vec::with_capacity(self.outputs.len());
        for pos in 0..self.outputs.len() {
            let others = self.others_powered(pos);
            let outcome = self.outputs[pos].check(&mut self.delay, signals, others);
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Names of all outputs in registration order.
    pub fn board_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(TrackOutput::name)
    }

    /// Looks up an output by name.
    pub fn output(&self, name: &str) -> Option<&TrackOutput<H>> {
        self.position(name).map(|pos| &self.outputs[pos])
    }

    /// Looks up an output by name for mutation.
    pub fn output_mut(&mut self, name: &str) -> Option<&mut TrackOutput<H>> {
        self.position(name).map(move |pos| &mut self.outputs[pos])
    }

    /// All outputs in registration order.
    pub fn outputs(&self) -> &[TrackOutput<H>] {
        &self.outputs
    }

    /// Status snapshot of every output.
    pub fn status(&self) -> Vec<TrackStatus> {
        self.outputs
            .iter()
            .map(|o| TrackStatus {
                name: short_string(o.name()),
                channel: o.channel(),
                state: if o.is_over_current() {
                    TrackState::Fault
                } else if o.is_enabled() {
                    TrackState::On
                } else {
                    TrackState::Off
                },
                usage_ma: o.current_draw_ma(),
                trigger_ma: o.trigger_milliamps(),
            })
            .collect()
    }

    /// Monitoring configuration in use.
    pub fn config(&self) -> &PowerConfig {
        &self.config
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.outputs
            .iter()
            .position(|o| o.name().eq_ignore_ascii_case(name))
    }

    /// True if another output on the same channel as `pos` is enabled.
    fn others_powered(&self, pos: usize) -> bool {
        let channel = self.outputs[pos].channel();
        self.outputs
            .iter()
            .enumerate()
            .any(|(i, o)| i != pos && o.is_enabled() && o.channel() == channel)
    }
}
