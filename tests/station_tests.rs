//! End-to-end tests of the command station with mock hardware

use rs_dccstation::hal::{MockConfigStore, MockDelay, MockLink, MockTrack};
use rs_dccstation::{
    BoardType, CheckOutcome, CommandStation, Config, FaultState, FsConfigStore, PowerConfig,
    SignalChannel, SignalControl, SubmitOutcome, TrackState, TurnoutType,
};

type Station = CommandStation<MockTrack, MockDelay, MockLink, MockConfigStore>;

fn station_with(config: Config, link: MockLink) -> Station {
    let mut station = CommandStation::new(config, MockDelay::new(), link, MockConfigStore::new());
    station
        .power_mut()
        .register(BoardType::ArduinoShield, "OPS", false, MockTrack::new());
    station
        .power_mut()
        .register(BoardType::ArduinoShield, "PROG", true, MockTrack::new());
    station
}

fn station() -> Station {
    station_with(Config::default(), MockLink::new())
}

fn set_ops_current(station: &mut Station, milliamps: u32) {
    station
        .power_mut()
        .output_mut("OPS")
        .unwrap()
        .hardware_mut()
        .set_milliamps(milliamps, BoardType::ArduinoShield.max_milliamps());
}

// ============================================================================
// Turnout commands
// ============================================================================

#[test]
fn create_and_throw_first_turnout() {
    let mut station = station();
    station.power_on_all();

    let id = station
        .create_or_update_turnout(1, 0, TurnoutType::Left)
        .unwrap();
    assert_eq!(id, 1);
    assert_eq!(station.turnouts().get_by_id(1).unwrap().address(), 1);

    assert!(station.set_turnout_by_id(1, true).unwrap());
    assert!(station.turnouts().get_by_id(1).unwrap().is_thrown());

    let written = station.router().link().written_on(SignalChannel::Ops);
    assert_eq!(written.len(), 1);
    let bytes = written[0].bytes();
    // address 1, output pair 0, activate, thrown
    assert_eq!(bytes, &[0x81, 0xF9, 0x78]);
    assert_eq!(bytes[1] & 0x08, 0x08);
    assert_eq!(bytes[1] & 0x06, 0x00);
    assert!(written[0].is_valid());
}

#[test]
fn toggle_sends_alternating_commands() {
    let mut station = station();
    station.power_on_all();
    station
        .create_or_update_turnout(4, 2, TurnoutType::Right)
        .unwrap();
    let address = station.turnouts().get_by_id(1).unwrap().address();

    station.toggle_turnout_by_address(address).unwrap();
    station.toggle_turnout_by_address(address).unwrap();

    let written = station.router().link().written_on(SignalChannel::Ops);
    assert_eq!(written.len(), 2);
    assert_eq!(written[0].bytes()[1] & 0x01, 1);
    assert_eq!(written[1].bytes()[1] & 0x01, 0);
    assert!(!station.turnouts().get_by_id(1).unwrap().is_thrown());
}

#[test]
fn command_repeat_count_follows_config() {
    let config = Config::default()
        .with_turnouts(rs_dccstation::TurnoutConfig::default().with_repeat_count(5));
    let mut station = station_with(config, MockLink::new());
    station.power_on_all();
    station
        .create_or_update_turnout(1, 0, TurnoutType::Left)
        .unwrap();
    station.set_turnout_by_id(1, true).unwrap();

    assert_eq!(station.router().link().written[0].1.repeat_count(), 5);
}

#[test]
fn removed_turnout_no_longer_refreshed() {
    let mut station = station();
    station.power_on_all();
    station
        .create_or_update_turnout(1, 0, TurnoutType::Left)
        .unwrap();
    assert!(station.remove_turnout_by_id(1));

    assert_eq!(station.refresh_tick().unwrap(), None);
    assert!(station.router().link().written.is_empty());
}

// ============================================================================
// Power and over-current
// ============================================================================

#[test]
fn over_trigger_reading_trips_output() {
    let mut station = station();
    station.power_on_all();
    set_ops_current(&mut station, 1800);

    let outcomes = station.run_check_cycle();
    assert_eq!(outcomes[0], CheckOutcome::Tripped);

    let ops = station.power().output("OPS").unwrap();
    assert_eq!(ops.trigger_milliamps(), 1750);
    assert_eq!(ops.fault_state(), FaultState::Tripped);
    assert!(!ops.is_enabled());
    assert!(!ops.hardware().enabled);
    assert!(!station.router().is_signal_enabled(SignalChannel::Ops));
    assert_eq!(station.status().tracks[0].state, TrackState::Fault);
}

#[test]
fn hysteresis_sequence() {
    let mut station = station();
    station.power_on_all();

    // above, above
    set_ops_current(&mut station, 1900);
    assert_eq!(station.run_check_cycle()[0], CheckOutcome::Tripped);
    assert!(matches!(
        station.run_check_cycle()[0],
        CheckOutcome::FaultPersists { .. }
    ));

    // below x39: still off
    set_ops_current(&mut station, 100);
    for _ in 0..39 {
        station.run_check_cycle();
        let ops = station.power().output("OPS").unwrap();
        assert!(!ops.is_enabled());
        assert!(matches!(ops.fault_state(), FaultState::Clearing(_)));
    }

    // final below: back on
    assert_eq!(station.run_check_cycle()[0], CheckOutcome::Recovered);
    let ops = station.power().output("OPS").unwrap();
    assert_eq!(ops.fault_state(), FaultState::Normal);
    assert!(ops.is_enabled());
    assert!(station.router().is_signal_enabled(SignalChannel::Ops));
}

#[test]
fn switched_off_track_stays_off_after_short_clears() {
    let mut station = station();
    station.power_on_all();
    set_ops_current(&mut station, 1800);
    assert_eq!(station.run_check_cycle()[0], CheckOutcome::Tripped);

    // operator reacts to the short
    station.power_off_all();
    set_ops_current(&mut station, 0);
    for _ in 0..45 {
        assert_eq!(station.run_check_cycle()[0], CheckOutcome::Idle);
    }

    let ops = station.power().output("OPS").unwrap();
    assert_eq!(ops.fault_state(), FaultState::Normal);
    assert!(!ops.is_enabled());
    assert!(!ops.hardware().enabled);
    assert!(!station.router().is_signal_enabled(SignalChannel::Ops));
    assert_eq!(station.status().tracks[0].state, TrackState::Off);
}

#[test]
fn power_off_by_name_while_clearing() {
    let mut station = station();
    station.power_on_all();
    set_ops_current(&mut station, 1800);
    station.run_check_cycle();
    set_ops_current(&mut station, 0);
    assert_eq!(station.run_check_cycle()[0], CheckOutcome::Clearing(39));

    assert!(station.power_off("ops"));
    for _ in 0..40 {
        station.run_check_cycle();
    }
    assert!(!station.power().output("OPS").unwrap().is_enabled());

    assert!(station.power_on("OPS"));
    assert!(station.power().output("OPS").unwrap().is_enabled());
    assert!(station.router().is_signal_enabled(SignalChannel::Ops));
}

#[test]
fn programming_track_trigger_is_clamped() {
    let mut station = CommandStation::<MockTrack, _, _, _>::new(
        Config::default(),
        MockDelay::new(),
        MockLink::new(),
        MockConfigStore::new(),
    );
    station
        .power_mut()
        .register(BoardType::Bts7960b10A, "PROG", true, MockTrack::new());
    assert_eq!(station.power().output("PROG").unwrap().trigger_milliamps(), 300);

    // 400 mA on a 43 A board trips the programming track
    station.power_on("PROG");
    station
        .power_mut()
        .output_mut("PROG")
        .unwrap()
        .hardware_mut()
        .set_milliamps(400, BoardType::Bts7960b10A.max_milliamps());
    assert_eq!(station.run_check_cycle(), vec![CheckOutcome::Tripped]);
    assert!(!station.router().is_signal_enabled(SignalChannel::Prog));
}

#[test]
fn power_on_is_idempotent() {
    let mut station = station();
    station.power_on("OPS");
    station.power_on("OPS");
    station.power_on_all();

    assert_eq!(station.router().link().starts, vec![SignalChannel::Ops]);
}

#[test]
fn power_off_all_keeps_programming_track() {
    let mut station = station();
    station.power_on_all();
    station.power_on("prog");
    station.power_off_all();

    assert!(!station.power().output("ops").unwrap().is_enabled());
    assert!(station.power().output("prog").unwrap().is_enabled());
    assert!(station.router().is_signal_enabled(SignalChannel::Prog));
    assert!(!station.router().is_signal_enabled(SignalChannel::Ops));
}

#[test]
fn last_reading_reported_by_name() {
    let mut station = station();
    station.power_on_all();
    set_ops_current(&mut station, 1000);
    station.run_check_cycle();

    assert_eq!(station.last_reading("ops"), Some(2048));
    assert_eq!(station.last_reading("PROG"), Some(0));
    assert_eq!(station.last_reading("yard"), None);
}

#[test]
fn shorter_fault_window_from_config() {
    let config =
        Config::default().with_power(PowerConfig::default().with_fault_clear_cycles(3));
    let mut station = station_with(config, MockLink::new());
    station.power_on_all();
    set_ops_current(&mut station, 1900);
    station.run_check_cycle();
    set_ops_current(&mut station, 0);

    let outcomes: Vec<_> = (0..3).map(|_| station.run_check_cycle()[0]).collect();
    assert_eq!(
        outcomes,
        [
            CheckOutcome::Clearing(2),
            CheckOutcome::Clearing(1),
            CheckOutcome::Recovered
        ]
    );
}

// ============================================================================
// Backpressure
// ============================================================================

#[test]
fn full_link_retries_once_per_notification() {
    let mut station = station_with(Config::default(), MockLink::new().with_capacity(0));
    station.power_on_all();
    station
        .create_or_update_turnout(1, 0, TurnoutType::Left)
        .unwrap();
    station.set_turnout_by_id(1, true).unwrap();
    assert_eq!(station.router().link().write_attempts, 1);

    for attempt in 2..=4 {
        assert_eq!(
            station.on_link_ready(SignalChannel::Ops).unwrap(),
            Some(SubmitOutcome::Suspended)
        );
        assert_eq!(station.router().link().write_attempts, attempt);
    }

    station.router_mut().link_mut().set_capacity(1);
    assert_eq!(
        station.on_link_ready(SignalChannel::Ops).unwrap(),
        Some(SubmitOutcome::Sent)
    );
    assert_eq!(station.router().link().written.len(), 1);
}

#[test]
fn trip_discards_suspended_command() {
    let mut station = station_with(Config::default(), MockLink::new().with_capacity(0));
    station.power_on_all();
    station
        .create_or_update_turnout(1, 0, TurnoutType::Left)
        .unwrap();
    station.set_turnout_by_id(1, true).unwrap();
    assert!(station.router().dispatcher(SignalChannel::Ops).pending().is_some());

    set_ops_current(&mut station, 1900);
    station.run_check_cycle();
    assert!(station.router().dispatcher(SignalChannel::Ops).pending().is_none());

    station.router_mut().link_mut().set_capacity(8);
    assert_eq!(station.on_link_ready(SignalChannel::Ops).unwrap(), None);
    assert!(station.router().link().written.is_empty());
}

// ============================================================================
// Persistence
// ============================================================================

#[test]
fn turnouts_survive_restart_on_disk() {
    let dir = tempfile::tempdir().unwrap();

    {
        let mut station = CommandStation::<MockTrack, _, _, _>::new(
            Config::default(),
            MockDelay::new(),
            MockLink::new(),
            FsConfigStore::new(dir.path()),
        );
        station
            .create_or_update_turnout(1, 0, TurnoutType::Left)
            .unwrap();
        station
            .create_or_update_turnout(2, 3, TurnoutType::Multi)
            .unwrap();
        station.set_turnout_by_id(2, true).unwrap();
        assert!(station.persist_turnouts().unwrap());
    }

    let mut station = CommandStation::<MockTrack, _, _, _>::new(
        Config::default(),
        MockDelay::new(),
        MockLink::new(),
        FsConfigStore::new(dir.path()),
    );
    assert_eq!(station.load_turnouts().unwrap(), 2);
    let t = station.turnouts().get_by_id(2).unwrap();
    assert!(t.is_thrown());
    assert_eq!(t.address(), 8);
    assert_eq!(t.turnout_type(), TurnoutType::Multi);
    assert!(!station.turnouts().get_by_id(1).unwrap().is_thrown());

    // new ids continue after the reloaded ones
    assert_eq!(
        station
            .create_or_update_turnout(9, 0, TurnoutType::Left)
            .unwrap(),
        3
    );
}
