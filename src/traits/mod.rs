//! Trait definitions for hardware abstraction and persistence.
//!
//! This module defines the seams that allow rs-dccstation to:
//! - Run on different hardware (ESP32, desktop mock)
//! - Drive any signal generator that accepts one packet at a time per channel
//! - Persist turnout state to whatever storage the board provides
//!
//! # Submodules
//!
//! - `hardware`: Track outputs, the signal generator link, signal channel control
//! - `store`: Whole-blob configuration storage
//!
//! # Hardware Abstraction
//!
//! - [`TrackHardware`]: Enable output and raw current sense of one track
//! - [`SignalLink`]: Hardware signal generator with backpressure
//! - [`SignalControl`]: Channel start/stop used by the power controller
//! - [`ConfigStore`]: Load/store of named blobs

pub mod hardware;
pub mod store;

pub use hardware::*;
pub use store::*;
