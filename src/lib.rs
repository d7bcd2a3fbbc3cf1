//! # rs-dccstation
//!
//! Track driver of a DCC model railroad command station.
//!
//! ## Features
//!
//! - **Packet dispatch**: Encoded DCC packets handed to the hardware signal
//!   generator one at a time, suspending on backpressure
//! - **Over-current protection**: Averaged current sampling per track output,
//!   immediate trip, debounced auto-recovery
//! - **Turnouts**: NMRA basic accessory addressing, command packets, round-robin
//!   refresh and JSON persistence
//! - **Hardware abstraction**: The same code runs on the ESP32 and on a desktop
//!   with mock hardware
//!
//! ## Architecture
//!
//! - `packet` - DCC packet type and accessory address arithmetic
//! - `track` - One track output and its fault state machine
//! - `power` - All track outputs, by name
//! - `dispatch` - Per-channel writers into the signal generator
//! - `turnout` - Turnout registry, command outbox, refresh and persistence
//! - `station` - The command station owning all of the above
//! - `traits` - Hardware and storage abstractions
//! - `hal` - Concrete implementations (mock for testing, esp32 for hardware)
//!
//! A turnout command only reaches the rails while its channel is running, and
//! a channel only runs while at least one of its track outputs is powered and
//! not tripped.
//!
//! ## Example
//!
//! ```rust
//! use rs_dccstation::{CommandStation, Config, TurnoutType};
//! use rs_dccstation::hal::{MockConfigStore, MockDelay, MockLink, MockTrack};
//! use rs_dccstation::track::{BoardType, CheckOutcome};
//!
//! let mut station: CommandStation<MockTrack, MockDelay, MockLink, MockConfigStore> =
//!     CommandStation::new(Config::default(), MockDelay::new(), MockLink::new(), MockConfigStore::new());
//! station.power_mut().register(BoardType::ArduinoShield, "MAIN", false, MockTrack::new());
//! station.power_mut().register(BoardType::ArduinoShield, "PROG", true, MockTrack::new());
//!
//! // Programming track stays off
//! station.power_on_all();
//!
//! // Throw turnout 1 (board 1, output 0)
//! let id = station.create_or_update_turnout(1, 0, TurnoutType::Left).unwrap();
//! station.set_turnout_by_id(id, true).unwrap();
//! assert_eq!(station.router().link().written.len(), 1);
//!
//! // Periodic work
//! assert_eq!(station.run_check_cycle(), vec![CheckOutcome::Ok, CheckOutcome::Idle]);
//! station.refresh_tick().unwrap();
//! station.persist_turnouts().unwrap();
//! ```

#![warn(missing_docs)]

/// Station configuration with builder-style setters.
pub mod config;
/// Packet dispatch into the signal generator with backpressure handling.
pub mod dispatch;
/// Error types.
pub mod error;
/// Hardware abstraction layer with mock implementations for testing.
pub mod hal;
/// DCC packets and NMRA accessory addressing.
pub mod packet;
/// Power controller owning every track output.
pub mod power;
/// The command station and its shared, locked form.
pub mod station;
/// Track outputs and over-current protection.
pub mod track;
/// Core traits for hardware abstraction and persistence.
pub mod traits;
/// Turnouts and the turnout registry.
pub mod turnout;

/// Desktop runner: periodic tokio tasks and log setup (feature-gated).
#[cfg(feature = "desktop")]
pub mod services;

// Re-exports for convenience
pub use config::{Config, DeviceConfig, PowerConfig, TurnoutConfig};
pub use dispatch::{DispatchStats, PacketDispatcher, SignalRouter, SubmitOutcome};
pub use error::{AddressError, LinkError, StationError, StoreError};
pub use packet::{decode_board_address, encode_accessory_command, encode_board_address, DccPacket};
pub use power::{PowerController, TrackState, TrackStatus};
pub use station::{CommandStation, SharedStation, StationStatus};
pub use track::{BoardType, CheckOutcome, FaultState, TrackOutput};
pub use traits::{ConfigStore, FsConfigStore, SignalChannel, SignalControl, SignalLink, TrackHardware};
pub use turnout::{Turnout, TurnoutRegistry, TurnoutType};
