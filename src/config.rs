//! Command station configuration.
//!
//! Uses `heapless::String` for names so the same structs can be embedded in
//! firmware images, and serde so the whole tree can be loaded from the
//! station's JSON configuration.
//!
//! # Example
//!
//! ```rust
//! use rs_dccstation::config::{Config, PowerConfig, TurnoutConfig};
//!
//! // Use defaults
//! let config = Config::default();
//! assert_eq!(config.power.check_interval_ms, 250);
//!
//! // Or customize
//! let config = Config::default()
//!     .with_power(PowerConfig::default().with_fault_clear_cycles(20))
//!     .with_turnouts(TurnoutConfig::default().with_repeat_count(5));
//! ```

use heapless::String as HString;
use serde::{Deserialize, Serialize};

/// Maximum length for short config strings (track names, store keys)
pub const MAX_SHORT_STRING: usize = 32;

/// Type alias for short config strings
pub type ShortString = HString<MAX_SHORT_STRING>;

/// Create a ShortString from a &str, truncating on a UTF-8 boundary if too long
pub fn short_string(s: &str) -> ShortString {
    let mut hs = ShortString::new();
    let take = s.len().min(MAX_SHORT_STRING);
    let valid_end = s
        .char_indices()
        .take_while(|(i, c)| i + c.len_utf8() <= take)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    let _ = hs.push_str(&s[..valid_end]);
    hs
}

// ============================================================================
// Main Config
// ============================================================================

/// Complete track driver configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Power output monitoring
    pub power: PowerConfig,
    /// Turnout command and persistence settings
    pub turnouts: TurnoutConfig,
    /// Station identification
    pub device: DeviceConfig,
}

impl Config {
    /// Set power configuration
    pub fn with_power(mut self, power: PowerConfig) -> Self {
        self.power = power;
        self
    }

    /// Set turnout configuration
    pub fn with_turnouts(mut self, turnouts: TurnoutConfig) -> Self {
        self.turnouts = turnouts;
        self
    }

    /// Set device configuration
    pub fn with_device(mut self, device: DeviceConfig) -> Self {
        self.device = device;
        self
    }
}

// ============================================================================
// Power Config
// ============================================================================

/// Over-current monitoring configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    /// Interval between check cycles in milliseconds
    pub check_interval_ms: u32,
    /// Raw readings averaged per current sample
    pub sample_count: u8,
    /// Busy-wait between raw readings in microseconds
    pub sample_delay_us: u32,
    /// Below-trigger check cycles required before a tripped output re-enables
    pub fault_clear_cycles: u16,
    /// Trigger current forced onto programming track outputs
    pub prog_trigger_ma: u32,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 250,
            sample_count: 50,
            sample_delay_us: 1_000,
            fault_clear_cycles: 40,
            prog_trigger_ma: crate::track::PROG_TRIGGER_MA,
        }
    }
}

impl PowerConfig {
    /// Set the check interval
    pub fn with_check_interval_ms(mut self, ms: u32) -> Self {
        self.check_interval_ms = ms;
        self
    }

    /// Set the number of readings per sample (at least one)
    pub fn with_sample_count(mut self, count: u8) -> Self {
        self.sample_count = count.max(1);
        self
    }

    /// Set the delay between readings
    pub fn with_sample_delay_us(mut self, us: u32) -> Self {
        self.sample_delay_us = us;
        self
    }

    /// Set the clear countdown length (at least one cycle)
    pub fn with_fault_clear_cycles(mut self, cycles: u16) -> Self {
        self.fault_clear_cycles = cycles.max(1);
        self
    }

    /// Milliseconds a fault must stay clear before re-enable
    pub fn fault_clear_ms(&self) -> u32 {
        u32::from(self.fault_clear_cycles) * self.check_interval_ms
    }
}

// ============================================================================
// Turnout Config
// ============================================================================

/// Turnout command and persistence configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnoutConfig {
    /// Extra on-wire repeats requested for each turnout command
    pub accessory_repeat_count: u8,
    /// Name of the entry the registry is persisted under
    pub store_name: ShortString,
    /// Interval of the low-priority persist task in milliseconds
    pub persist_interval_ms: u32,
    /// Interval between refresh packets in milliseconds
    pub refresh_interval_ms: u32,
}

impl Default for TurnoutConfig {
    fn default() -> Self {
        Self {
            accessory_repeat_count: 3,
            store_name: short_string("turnouts.json"),
            persist_interval_ms: 30_000,
            refresh_interval_ms: 100,
        }
    }
}

impl TurnoutConfig {
    /// Set the command repeat count
    pub fn with_repeat_count(mut self, repeats: u8) -> Self {
        self.accessory_repeat_count = repeats;
        self
    }

    /// Set the store entry name
    pub fn with_store_name(mut self, name: &str) -> Self {
        self.store_name = short_string(name);
        self
    }

    /// Set the persist interval
    pub fn with_persist_interval_ms(mut self, ms: u32) -> Self {
        self.persist_interval_ms = ms;
        self
    }

    /// Set the refresh interval
    pub fn with_refresh_interval_ms(mut self, ms: u32) -> Self {
        self.refresh_interval_ms = ms;
        self
    }
}

// ============================================================================
// Device Config
// ============================================================================

/// Station identification configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Human-readable station name
    pub name: ShortString,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: short_string("rs-dccstation"),
        }
    }
}

impl DeviceConfig {
    /// Set the station name
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = short_string(name);
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
