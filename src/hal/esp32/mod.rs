//! ESP32 track output hardware.
//!
//! Each H-bridge is driven through one enable GPIO; its current sense output
//! is read through an ADC1 oneshot channel at 11 dB attenuation, which maps
//! the sense voltage onto the 12-bit range the over-current thresholds are
//! computed against.
//!
//! The DCC waveform itself comes from the RMT peripheral, one transmitter
//! per channel, through [`Esp32SignalLink`].
//!
//! The blocking sampling delay is `esp_idf_hal::delay::Ets`, which already
//! implements [`embedded_hal::delay::DelayNs`].
//!
//! # Pin Assignments
//!
//! See the [`pins`] module for the default wiring.

mod signal;
mod track;

pub use signal::{Esp32SignalLink, LINK_QUEUE_DEPTH, RMT_CLOCK_DIVIDER};
pub use track::{Esp32EnableOutput, Esp32Track};

/// Default pin assignments for a two-output (OPS + PROG) board.
///
/// Current sense inputs must be on ADC1; ADC2 is unavailable while WiFi runs.
pub mod pins {
    // =========================================================================
    // OPS (main line) H-bridge
    // =========================================================================

    /// OPS enable output
    pub const OPS_ENABLE: i32 = 25;

    /// OPS current sense input (ADC1 channel 0)
    pub const OPS_SENSE: i32 = 36;

    // =========================================================================
    // PROG (programming track) H-bridge
    // =========================================================================

    /// PROG enable output
    pub const PROG_ENABLE: i32 = 23;

    /// PROG current sense input (ADC1 channel 3)
    pub const PROG_SENSE: i32 = 39;

    // =========================================================================
    // Signal outputs (H-bridge direction inputs, RMT driven)
    // =========================================================================

    /// OPS DCC signal output
    pub const OPS_SIGNAL: i32 = 19;

    /// PROG DCC signal output
    pub const PROG_SIGNAL: i32 = 18;
}
