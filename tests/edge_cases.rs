//! Edge case and boundary condition tests for the track driver

use rs_dccstation::hal::{MockConfigStore, MockDelay, MockLink, MockTrack};
use rs_dccstation::packet::{DIRECT_ADDRESS, MAX_ACCESSORY_ADDRESS, MAX_BOARD_ADDRESS};
use rs_dccstation::turnout::OUTBOX_CAPACITY;
use rs_dccstation::{
    decode_board_address, encode_board_address, AddressError, BoardType, CommandStation, Config,
    DccPacket, SignalChannel, StationError, Turnout, TurnoutType,
};

type Station = CommandStation<MockTrack, MockDelay, MockLink, MockConfigStore>;

fn powered_station(link: MockLink) -> Station {
    let mut station = CommandStation::new(Config::default(), MockDelay::new(), link, MockConfigStore::new());
    station
        .power_mut()
        .register(BoardType::Lmd18200, "OPS", false, MockTrack::new());
    station.power_on_all();
    station
}

// ============================================================================
// Address Boundary Tests
// ============================================================================

#[test]
fn first_and_last_accessory_addresses() {
    assert_eq!(encode_board_address(1, 0), Ok(1));
    assert_eq!(encode_board_address(MAX_BOARD_ADDRESS, 3), Ok(MAX_ACCESSORY_ADDRESS));
    assert_eq!(decode_board_address(MAX_ACCESSORY_ADDRESS), Ok((511, 3)));
    assert_eq!(
        decode_board_address(MAX_ACCESSORY_ADDRESS + 1),
        Err(AddressError::AddressOutOfRange(2045))
    );
}

#[test]
fn board_zero_index_three_is_linear_zero() {
    assert_eq!(encode_board_address(0, 3), Ok(0));
    assert_eq!(decode_board_address(0), Ok((0, 3)));
    assert!(encode_board_address(0, 0).is_err());
}

#[test]
fn direct_address_passes_through() {
    assert_eq!(encode_board_address(42, DIRECT_ADDRESS), Ok(42));
    assert!(encode_board_address(MAX_ACCESSORY_ADDRESS + 1, DIRECT_ADDRESS).is_err());
}

#[test]
fn board_index_out_of_range() {
    assert_eq!(
        encode_board_address(1, 4),
        Err(AddressError::BoardIndexOutOfRange(4))
    );
    assert_eq!(
        encode_board_address(1, -2),
        Err(AddressError::BoardIndexOutOfRange(-2))
    );
}

#[test]
fn last_board_packet_complements_high_bits() {
    let mut turnout = Turnout::new(1, MAX_ACCESSORY_ADDRESS, TurnoutType::Left).unwrap();
    turnout.set_thrown(true);
    let packet = rs_dccstation::encode_accessory_command(&turnout);
    let bytes = packet.bytes();
    // board 511: low six bits all set, high three bits complemented to zero
    assert_eq!(bytes[0], 0xBF);
    assert_eq!(bytes[1], 0x8F);
    assert_eq!(bytes[2], bytes[0] ^ bytes[1]);
}

#[test]
fn turnout_created_with_direct_address() {
    let mut station = powered_station(MockLink::new());
    let id = station
        .create_or_update_turnout(17, DIRECT_ADDRESS, TurnoutType::Wye)
        .unwrap();
    let t = station.turnouts().get_by_id(id).unwrap();
    assert_eq!(t.address(), 17);
    assert_eq!((t.board_address(), t.board_index()), (5, 0));
}

#[test]
fn create_twice_updates_type_keeps_id() {
    let mut station = powered_station(MockLink::new());
    let first = station
        .create_or_update_turnout(3, 1, TurnoutType::Left)
        .unwrap();
    let second = station
        .create_or_update_turnout(3, 1, TurnoutType::Right)
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(station.turnouts().count(), 1);
    assert_eq!(
        station.turnouts().get_by_id(first).unwrap().turnout_type(),
        TurnoutType::Right
    );
}

#[test]
fn invalid_index_is_fatal_station_error() {
    let mut station = powered_station(MockLink::new());
    assert!(matches!(
        station.create_or_update_turnout(1, 7, TurnoutType::Left),
        Err(StationError::Address(AddressError::BoardIndexOutOfRange(7)))
    ));
    assert_eq!(station.turnouts().count(), 0);
}

// ============================================================================
// Packet Tests
// ============================================================================

#[test]
fn idle_packet_is_valid() {
    let idle = DccPacket::idle();
    assert_eq!(idle.bytes(), &[0xFF, 0x00, 0xFF]);
    assert!(idle.is_valid());
    assert_eq!(SignalChannel::for_packet(&idle), SignalChannel::Ops);
}

#[test]
fn oversized_packet_rejected() {
    assert!(DccPacket::from_data(&[0; 5]).is_some());
    assert!(DccPacket::from_data(&[0; 6]).is_none());
}

// ============================================================================
// Outbox Overflow
// ============================================================================

#[test]
fn outbox_overflow_drops_oldest_command() {
    let mut station = powered_station(MockLink::new().with_capacity(0));
    let count = OUTBOX_CAPACITY as u16 + 2;
    for address in 1..=count {
        station
            .create_or_update_turnout(address, DIRECT_ADDRESS, TurnoutType::Left)
            .unwrap();
    }
    for address in 1..=count {
        station.set_turnout_by_address(address, true).unwrap();
    }
    // first command held by the dispatcher, the rest fill the outbox
    assert_eq!(station.turnouts().pending_outgoing(), OUTBOX_CAPACITY);

    station.router_mut().link_mut().set_capacity(usize::MAX);
    station.on_link_ready(SignalChannel::Ops).unwrap();

    let addresses: Vec<u16> = station
        .router()
        .link()
        .written
        .iter()
        .map(|(_, p)| {
            let b = p.bytes();
            let board = u16::from(b[0] & 0x3F) | (u16::from(!b[1] >> 4 & 0x07) << 6);
            let index = (b[1] >> 1) & 0x03;
            encode_board_address(board, index as i8).unwrap()
        })
        .collect();
    assert_eq!(addresses.len(), OUTBOX_CAPACITY + 1);
    assert_eq!(addresses[0], 1);
    // address 2 was the oldest queued command when the outbox overflowed
    assert!(!addresses.contains(&2));
    assert_eq!(*addresses.last().unwrap(), count);
}

// ============================================================================
// Unknown Names and Ids
// ============================================================================

#[test]
fn unknown_entities_are_not_errors() {
    let mut station = powered_station(MockLink::new());
    assert!(!station.power_on("nowhere"));
    assert!(!station.power_off("nowhere"));
    assert_eq!(station.last_reading("nowhere"), None);
    assert!(!station.set_turnout_by_id(9, true).unwrap());
    assert!(!station.set_turnout_by_address(9, true).unwrap());
    assert!(!station.toggle_turnout_by_id(9).unwrap());
    assert!(!station.remove_turnout_by_address(9));
}

#[test]
fn check_cycle_without_outputs() {
    let mut station = CommandStation::<MockTrack, _, _, _>::new(
        Config::default(),
        MockDelay::new(),
        MockLink::new(),
        MockConfigStore::new(),
    );
    assert!(station.run_check_cycle().is_empty());
    assert_eq!(station.power_on_all(), 0);
    assert!(!station.power().is_any_track_powered());
}
