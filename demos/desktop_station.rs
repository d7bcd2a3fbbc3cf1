//! Desktop command station with mock track hardware.
//!
//! Runs the periodic station tasks against a mock signal generator, throws a
//! few turnouts, shorts the main line for a moment and lets the station
//! recover. Turnout state is saved under `./station-data`.
//!
//! # Usage
//!
//! ```sh
//! RUST_LOG=rs_dccstation=debug cargo run --example desktop_station --features desktop
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rs_dccstation::hal::{MockDelay, MockLink, MockTrack};
use rs_dccstation::services::{init_tracing, spawn_station_tasks};
use rs_dccstation::{
    BoardType, CommandStation, Config, DeviceConfig, FsConfigStore, PowerConfig, SharedStation,
    TurnoutType,
};
use tracing::info;

const DATA_DIR: &str = "station-data";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("rs_dccstation=info,desktop_station=info");

    std::fs::create_dir_all(DATA_DIR).with_context(|| format!("creating {DATA_DIR}"))?;

    // Shorter fault window than the 10 s default so the demo recovers quickly
    let config = Config::default()
        .with_power(PowerConfig::default().with_fault_clear_cycles(8))
        .with_device(DeviceConfig::default().with_name("Desktop Station"));

    let mut station = CommandStation::new(
        config,
        MockDelay::new(),
        MockLink::new(),
        FsConfigStore::new(DATA_DIR),
    );
    station
        .power_mut()
        .register(BoardType::Lmd18200, "MAIN", false, MockTrack::new());
    station
        .power_mut()
        .register(BoardType::ArduinoShield, "PROG", true, MockTrack::new());

    let loaded = station.load_turnouts().context("loading turnouts")?;
    if loaded == 0 {
        station.create_or_update_turnout(1, 0, TurnoutType::Left)?;
        station.create_or_update_turnout(1, 1, TurnoutType::Right)?;
        station.create_or_update_turnout(2, 0, TurnoutType::Wye)?;
    }

    let shared = Arc::new(SharedStation::new(station));
    let (tasks, _notifier) = spawn_station_tasks(Arc::clone(&shared));

    shared.with_station(|s| s.power_on_all());
    for address in [1, 2, 5] {
        shared.with_station(|s| s.toggle_turnout_by_address(address))?;
        tokio::time::sleep(Duration::from_millis(300)).await;
    }

    info!("shorting MAIN");
    shared.with_station(|s| {
        if let Some(main) = s.power_mut().output_mut("MAIN") {
            main.hardware_mut().set_milliamps(2900, BoardType::Lmd18200.max_milliamps());
        }
    });
    tokio::time::sleep(Duration::from_millis(600)).await;

    info!("short cleared");
    shared.with_station(|s| {
        if let Some(main) = s.power_mut().output_mut("MAIN") {
            main.hardware_mut().set_milliamps(400, BoardType::Lmd18200.max_milliamps());
        }
    });
    tokio::time::sleep(Duration::from_secs(3)).await;

    let status = shared.status();
    println!("{}", serde_json::to_string_pretty(&status)?);

    tasks.abort();
    shared.with_station(|s| s.persist_turnouts())?;
    info!("uptime {} ms", shared.uptime_ms());
    Ok(())
}
