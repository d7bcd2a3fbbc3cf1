//! DCC waveform output through the RMT peripheral.
//!
//! Each channel drives the H-bridge direction input from one RMT transmitter.
//! Packets wait in a short per-channel queue; a full queue is reported to the
//! dispatcher as backpressure and a ready notification is raised once
//! [`Esp32SignalLink::transmit`] frees a slot.

use esp_idf_hal::gpio::PinState;
use esp_idf_hal::rmt::{Pulse, PulseTicks, TxRmtDriver, VariableLengthSignal};
use esp_idf_hal::sys::EspError;
use heapless::Deque;

use crate::error::LinkError;
use crate::packet::DccPacket;
use crate::traits::{SignalChannel, SignalLink};

/// Packets buffered per channel before writes report `BufferFull`.
pub const LINK_QUEUE_DEPTH: usize = 8;

/// RMT clock divider giving 1 µs ticks from the 80 MHz APB clock.
pub const RMT_CLOCK_DIVIDER: u8 = 80;

/// Half-bit durations in µs (NMRA S-9.1 nominal values).
const ONE_HALF_US: u16 = 58;
const ZERO_HALF_US: u16 = 100;

struct ChannelOutput<'d> {
    tx: TxRmtDriver<'d>,
    queue: Deque<DccPacket, LINK_QUEUE_DEPTH>,
    running: bool,
    notify_requested: bool,
}

impl<'d> ChannelOutput<'d> {
    fn new(tx: TxRmtDriver<'d>) -> Self {
        Self {
            tx,
            queue: Deque::new(),
            running: false,
            notify_requested: false,
        }
    }
}

/// Two-channel signal generator (OPS and PROG).
///
/// # Example
///
/// ```ignore
/// use esp_idf_hal::rmt::{config::TransmitConfig, TxRmtDriver};
/// use rs_dccstation::hal::esp32::{Esp32SignalLink, RMT_CLOCK_DIVIDER};
///
/// let config = TransmitConfig::new().clock_divider(RMT_CLOCK_DIVIDER);
/// let ops = TxRmtDriver::new(peripherals.rmt.channel0, peripherals.pins.gpio19, &config)?;
/// let prog = TxRmtDriver::new(peripherals.rmt.channel1, peripherals.pins.gpio18, &config)?;
/// let mut link = Esp32SignalLink::new(ops, prog)?;
/// ```
pub struct Esp32SignalLink<'d> {
    ops: ChannelOutput<'d>,
    prog: ChannelOutput<'d>,
    one: [Pulse; 2],
    zero: [Pulse; 2],
}

impl<'d> Esp32SignalLink<'d> {
    /// Wraps two transmitters configured with [`RMT_CLOCK_DIVIDER`].
    ///
    /// # Errors
    ///
    /// Returns an error if the bit timings cannot be expressed in RMT ticks.
    pub fn new(ops: TxRmtDriver<'d>, prog: TxRmtDriver<'d>) -> Result<Self, EspError> {
        let half = |state, us| Ok::<_, EspError>(Pulse::new(state, PulseTicks::new(us)?));
        Ok(Self {
            ops: ChannelOutput::new(ops),
            prog: ChannelOutput::new(prog),
            one: [half(PinState::High, ONE_HALF_US)?, half(PinState::Low, ONE_HALF_US)?],
            zero: [half(PinState::High, ZERO_HALF_US)?, half(PinState::Low, ZERO_HALF_US)?],
        })
    }

    fn output(&mut self, channel: SignalChannel) -> &mut ChannelOutput<'d> {
        match channel {
            SignalChannel::Ops => &mut self.ops,
            SignalChannel::Prog => &mut self.prog,
        }
    }

    /// Sends the next queued packet on `channel`, or an idle packet if the
    /// queue is empty. Blocks until the waveform has been clocked out,
    /// repeats included.
    ///
    /// Returns `Some(channel)` when a pending ready notification is due; the
    /// caller passes it on to the dispatcher. Stopped channels send nothing.
    pub fn transmit(&mut self, channel: SignalChannel) -> Result<Option<SignalChannel>, EspError> {
        let Self { ops, prog, one, zero } = self;
        let output = match channel {
            SignalChannel::Ops => ops,
            SignalChannel::Prog => prog,
        };
        if !output.running {
            return Ok(None);
        }

        let packet = output.queue.pop_front().unwrap_or_else(DccPacket::idle);
        let signal = encode_waveform(&packet, one, zero)?;
        for _ in 0..=packet.repeat_count() {
            output.tx.start_blocking(&signal)?;
        }

        if output.notify_requested && !output.queue.is_full() {
            output.notify_requested = false;
            return Ok(Some(channel));
        }
        Ok(None)
    }

    /// Returns true if `channel` is emitting.
    pub fn is_running(&self, channel: SignalChannel) -> bool {
        match channel {
            SignalChannel::Ops => self.ops.running,
            SignalChannel::Prog => self.prog.running,
        }
    }
}

impl SignalLink for Esp32SignalLink<'_> {
    fn write(&mut self, channel: SignalChannel, packet: &DccPacket) -> Result<(), LinkError> {
        self.output(channel)
            .queue
            .push_back(packet.clone())
            .map_err(|_| LinkError::BufferFull)
    }

    fn request_ready_notify(&mut self, channel: SignalChannel) {
        self.output(channel).notify_requested = true;
    }

    fn start(&mut self, channel: SignalChannel) {
        self.output(channel).running = true;
    }

    fn stop(&mut self, channel: SignalChannel) {
        let output = self.output(channel);
        output.running = false;
        output.queue.clear();
        output.notify_requested = false;
    }
}

fn encode_waveform(
    packet: &DccPacket,
    one: &[Pulse; 2],
    zero: &[Pulse; 2],
) -> Result<VariableLengthSignal, EspError> {
    let mut signal = VariableLengthSignal::new();
    for bit in packet.waveform_bits() {
        signal.push(if bit { one } else { zero })?;
    }
    Ok(signal)
}
