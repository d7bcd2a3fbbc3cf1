//! Error types for the track driver.
//!
//! Only conditions the track driver cannot resolve locally show up here.
//! Backpressure from the signal generator, unknown turnout ids and over-current
//! trips are all handled (or reported) without going through these types.

use thiserror::Error;

/// Accessory address arithmetic produced a value outside the NMRA range.
///
/// Always an invariant violation: the caller handed the codec a board index
/// or linear address that no decoder on the layout can have.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum AddressError {
    /// Board index was neither `0..=3` nor the direct-address sentinel.
    #[error("board index {0} is out of range (expected 0..=3 or -1)")]
    BoardIndexOutOfRange(i8),

    /// Board address does not fit in the 9-bit accessory decoder field.
    #[error("board address {0} exceeds the 9-bit accessory decoder range")]
    BoardAddressOutOfRange(u16),

    /// Linear accessory address beyond the last output of board 511.
    #[error("accessory address {0} exceeds the maximum accessory address")]
    AddressOutOfRange(u16),

    /// Every turnout id is already assigned.
    #[error("no free turnout id left")]
    TurnoutIdsExhausted,
}

/// Errors reported by a [`SignalLink`](crate::traits::SignalLink).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum LinkError {
    /// The channel buffer is full; retry after the ready notification.
    #[error("signal generator buffer full")]
    BufferFull,

    /// Anything else the link reports. The dispatcher treats this as fatal.
    #[error("signal generator link failure (code {0})")]
    Io(i32),
}

impl LinkError {
    /// Returns true for the recoverable backpressure condition.
    #[inline]
    pub const fn is_backpressure(&self) -> bool {
        matches!(self, LinkError::BufferFull)
    }
}

/// Failure reported by a [`ConfigStore`](crate::traits::ConfigStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying storage I/O failed.
    #[error("config store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored content could not be encoded or decoded.
    #[error("config store serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Backend-specific failure without further detail.
    #[error("config store unavailable")]
    Unavailable,
}

/// Fatal conditions escalated out of the command station.
///
/// Every variant means the station cannot safely keep driving the affected
/// channel; the supervisor is expected to halt or restart.
#[derive(Debug, Error)]
pub enum StationError {
    /// Accessory address invariant violated.
    #[error(transparent)]
    Address(#[from] AddressError),

    /// Signal generator failed with something other than backpressure.
    #[error(transparent)]
    Link(#[from] LinkError),

    /// Turnout persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}
