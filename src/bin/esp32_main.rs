//! ESP32 DCC command station firmware.
//!
//! Drives one main line (OPS) and one programming track (PROG) H-bridge.
//! The main loop:
//! - Clocks one packet per running channel out of the RMT transmitters
//! - Hands ready notifications back to the packet dispatchers
//! - Samples track current and trips/recovers outputs on the check interval
//! - Sends turnout refresh packets on the refresh interval
//! - Saves changed turnout state on the persist interval
//!
//! # Hardware Setup
//!
//! Default wiring is in `rs_dccstation::hal::esp32::pins`. Turnout state is
//! stored under `DCC_DATA_DIR` (default `/spiffs`), which must already be
//! mounted.
//!
//! # Build
//!
//! ```bash
//! cargo build --release --features esp32 --bin esp32_main
//! ```

use std::thread;
use std::time::{Duration, Instant};

use esp_idf_hal::adc::oneshot::AdcDriver;
use esp_idf_hal::delay::Ets;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::rmt::config::TransmitConfig;
use esp_idf_hal::rmt::TxRmtDriver;
use rs_dccstation::hal::esp32::{Esp32SignalLink, Esp32Track, RMT_CLOCK_DIVIDER};
use rs_dccstation::{
    BoardType, CommandStation, Config, DeviceConfig, FsConfigStore, SignalChannel, TrackHardware,
};

/// Pause per loop pass while no track is powered.
const IDLE_LOOP_MS: u64 = 10;

const CHANNELS: [SignalChannel; 2] = [SignalChannel::Ops, SignalChannel::Prog];

fn main() -> anyhow::Result<()> {
    esp_idf_sys::link_patches();

    println!();
    println!("================================");
    println!("  rs-dccstation command station");
    println!("================================");
    println!();

    let config = Config::default().with_device(DeviceConfig::default().with_name("ESP32 Station"));
    let data_dir = option_env!("DCC_DATA_DIR").unwrap_or("/spiffs");

    let peripherals = Peripherals::take()?;

    // =========================================================================
    // Track outputs (enable GPIO + ADC1 current sense)
    // =========================================================================
    let adc1 = AdcDriver::new(peripherals.adc1)?;
    let ops = Esp32Track::new(&adc1, peripherals.pins.gpio25, peripherals.pins.gpio36)?;
    println!("[OK] OPS output (enable GPIO25, sense GPIO36)");
    let prog = Esp32Track::new(&adc1, peripherals.pins.gpio23, peripherals.pins.gpio39)?;
    println!("[OK] PROG output (enable GPIO23, sense GPIO39)");

    // =========================================================================
    // Signal generator (RMT channels 0/1)
    // =========================================================================
    let rmt_config = TransmitConfig::new().clock_divider(RMT_CLOCK_DIVIDER);
    let ops_tx = TxRmtDriver::new(peripherals.rmt.channel0, peripherals.pins.gpio19, &rmt_config)?;
    let prog_tx =
        TxRmtDriver::new(peripherals.rmt.channel1, peripherals.pins.gpio18, &rmt_config)?;
    let link = Esp32SignalLink::new(ops_tx, prog_tx)?;
    println!("[OK] Signal generator (OPS GPIO19, PROG GPIO18)");

    // =========================================================================
    // Command station
    // =========================================================================
    let check_period = Duration::from_millis(u64::from(config.power.check_interval_ms));
    let refresh_period = Duration::from_millis(u64::from(config.turnouts.refresh_interval_ms));
    let persist_period = Duration::from_millis(u64::from(config.turnouts.persist_interval_ms));

    let mut station: CommandStation<Box<dyn TrackHardware + '_>, _, _, _> =
        CommandStation::new(config, Ets, link, FsConfigStore::new(data_dir));
    station
        .power_mut()
        .register(BoardType::Lmd18200, "OPS", false, Box::new(ops));
    station
        .power_mut()
        .register(BoardType::ArduinoShield, "PROG", true, Box::new(prog));

    match station.load_turnouts() {
        Ok(count) => println!("[OK] {} turnouts loaded from {}", count, data_dir),
        Err(e) => println!("[WARN] turnouts not loaded: {}", e),
    }

    station.power_on_all();
    println!();
    println!("Starting station loop...");
    println!();

    // =========================================================================
    // Main Loop
    // =========================================================================
    let mut last_check = Instant::now();
    let mut last_refresh = last_check;
    let mut last_persist = last_check;

    loop {
        for channel in CHANNELS {
            match station.router_mut().link_mut().transmit(channel) {
                Ok(Some(ready)) => {
                    station.on_link_ready(ready)?;
                }
                Ok(None) => {}
                Err(e) => println!("[WARN] {} transmit failed: {}", channel.as_str(), e),
            }
        }

        let now = Instant::now();
        if now.duration_since(last_check) >= check_period {
            last_check = now;
            station.run_check_cycle();
        }
        if now.duration_since(last_refresh) >= refresh_period {
            last_refresh = now;
            station.refresh_tick()?;
        }
        if now.duration_since(last_persist) >= persist_period {
            last_persist = now;
            if let Err(e) = station.persist_turnouts() {
                println!("[WARN] turnout save skipped: {}", e);
            }
        }

        if !station.power().is_any_track_powered() {
            thread::sleep(Duration::from_millis(IDLE_LOOP_MS));
        }
    }
}
