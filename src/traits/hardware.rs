//! Hardware abstraction traits for track outputs and the DCC signal generator.
//!
//! These traits let the track driver run unchanged on the ESP32 and on a
//! desktop with mock hardware.
//!
//! # Key Traits
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`TrackHardware`] | Enable line and current sense of one power output |
//! | [`SignalLink`] | Byte channel into the DCC signal generator |
//! | [`SignalControl`] | Start/stop of a signal channel, used by track outputs |
//!
//! The blocking delay used between current samples is
//! [`embedded_hal::delay::DelayNs`].
//!
//! # Example
//!
//! ```rust
//! use rs_dccstation::traits::TrackHardware;
//! use rs_dccstation::hal::MockTrack;
//!
//! let mut track = MockTrack::new();
//! track.set_enable(true);
//! track.push_reading(812);
//!
//! assert!(track.enabled);
//! assert_eq!(track.read_raw_current(), 812);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::LinkError;
use crate::packet::DccPacket;

/// Full-scale value of a raw current sense reading (12-bit ADC).
pub const SENSE_FULL_SCALE: u32 = 4096;

/// The two independent DCC signal paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalChannel {
    /// Operations (main line) signal.
    Ops,
    /// Programming track signal, sent with the extended preamble.
    Prog,
}

impl SignalChannel {
    /// Selects the channel a packet belongs to from its preamble flag.
    #[inline]
    pub fn for_packet(packet: &DccPacket) -> Self {
        if packet.uses_long_preamble() {
            SignalChannel::Prog
        } else {
            SignalChannel::Ops
        }
    }

    /// Returns the channel as a lowercase string.
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SignalChannel::Ops => "ops",
            SignalChannel::Prog => "prog",
        }
    }
}

/// One physical track power output.
///
/// Implementations wrap the enable GPIO of an H-bridge and the ADC channel
/// connected to its current sense output.
///
/// # Implementation Notes
///
/// - `set_enable(true)` drives the DCC signal onto the rails
/// - `read_raw_current` must not fail; return 0 if the ADC read errors
/// - Readings are raw ADC counts on a [`SENSE_FULL_SCALE`] range, not milliamps
pub trait TrackHardware {
    /// Drives the enable output.
    fn set_enable(&mut self, on: bool);

    /// Takes one instantaneous raw current reading.
    fn read_raw_current(&mut self) -> u16;
}

/// Boxed outputs let one controller hold different hardware types.
impl<T: TrackHardware + ?Sized> TrackHardware for Box<T> {
    fn set_enable(&mut self, on: bool) {
        (**self).set_enable(on);
    }

    fn read_raw_current(&mut self) -> u16 {
        (**self).read_raw_current()
    }
}

/// Link into the hardware signal generator.
///
/// Accepts one packet at a time per channel. A full channel buffer is
/// reported as [`LinkError::BufferFull`]; after that the writer asks for a
/// ready notification and waits.
pub trait SignalLink {
    /// Hands one packet to the channel's buffer.
    fn write(&mut self, channel: SignalChannel, packet: &DccPacket) -> Result<(), LinkError>;

    /// Asks to be notified once `channel` can accept data again.
    ///
    /// The notification itself arrives through
    /// [`PacketDispatcher::on_ready`](crate::dispatch::PacketDispatcher::on_ready).
    fn request_ready_notify(&mut self, channel: SignalChannel);

    /// Starts emitting the DCC waveform on `channel`.
    fn start(&mut self, channel: SignalChannel);

    /// Stops emitting the DCC waveform on `channel`.
    fn stop(&mut self, channel: SignalChannel);
}

/// Start/stop control of the signal channels.
///
/// Track outputs use this to request that a channel starts when the first
/// output on it powers up, and stops when the last one powers down.
pub trait SignalControl {
    /// Returns true if `channel` is currently emitting.
    fn is_signal_enabled(&self, channel: SignalChannel) -> bool;

    /// Starts `channel`. Must be idempotent.
    fn start_signal(&mut self, channel: SignalChannel);

    /// Stops `channel`, dropping anything waiting on it. Must be idempotent.
    fn stop_signal(&mut self, channel: SignalChannel);
}
