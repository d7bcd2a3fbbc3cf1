//! DCC packet representation and accessory address arithmetic.
//!
//! Everything here is pure: no hardware, no state. The dispatcher and the
//! turnout registry build on these helpers.
//!
//! # Accessory addressing
//!
//! NMRA basic accessory decoders ("boards") each drive four output pairs. A
//! turnout can therefore be named either by its board address and index on
//! that board, or by a single linear address:
//!
//! ```text
//! linear = (board_address - 1) * 4 + board_index + 1
//! ```
//!
//! ```rust
//! use rs_dccstation::packet::{decode_board_address, encode_board_address};
//!
//! assert_eq!(encode_board_address(1, 0), Ok(1));
//! assert_eq!(encode_board_address(2, 3), Ok(8));
//! assert_eq!(decode_board_address(8), Ok((2, 3)));
//!
//! // -1 means "not a board address, use the number as-is"
//! assert_eq!(encode_board_address(17, -1), Ok(17));
//! ```

use heapless::Vec as HVec;

use crate::error::AddressError;
use crate::turnout::Turnout;

/// Maximum encoded packet length, error byte included.
pub const MAX_PACKET_LEN: usize = 6;

/// Main line preamble length in bits.
pub const SHORT_PREAMBLE_BITS: usize = 14;

/// Programming track preamble length in bits.
pub const LONG_PREAMBLE_BITS: usize = 22;

/// Board index sentinel: the board address is already a linear address.
pub const DIRECT_ADDRESS: i8 = -1;

/// Outputs per accessory decoder board.
pub const OUTPUTS_PER_BOARD: u16 = 4;

/// Largest board address that fits the 9-bit accessory address field.
pub const MAX_BOARD_ADDRESS: u16 = 511;

/// Largest linear accessory address (board 511, index 3).
pub const MAX_ACCESSORY_ADDRESS: u16 = MAX_BOARD_ADDRESS * OUTPUTS_PER_BOARD;

/// Header byte pattern for basic accessory packets (`10AAAAAA`).
const ACCESSORY_PREFIX: u8 = 0b1000_0000;

/// Activate bit (`C`) in the second accessory byte.
const ACCESSORY_ACTIVATE: u8 = 0b0000_1000;

/// One encoded DCC link-layer packet.
///
/// The payload includes the trailing XOR error-detection byte. Packets are
/// built once and then moved into the dispatcher for a single transmission
/// attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DccPacket {
    payload: HVec<u8, MAX_PACKET_LEN>,
    uses_long_preamble: bool,
    repeat_count: u8,
}

impl DccPacket {
    /// Builds a packet from address/instruction bytes, appending the error byte.
    ///
    /// Returns `None` if `data` is empty or too long to fit with its error byte.
    pub fn from_data(data: &[u8]) -> Option<Self> {
        if data.is_empty() || data.len() >= MAX_PACKET_LEN {
            return None;
        }
        let mut payload = HVec::new();
        payload.extend_from_slice(data).ok()?;
        payload.push(xor_checksum(data)).ok()?;
        Some(Self {
            payload,
            uses_long_preamble: false,
            repeat_count: 0,
        })
    }

    /// The DCC idle packet (`FF 00 FF`).
    pub fn idle() -> Self {
        let mut payload = HVec::new();
        // Capacity is 6; three bytes always fit.
        let _ = payload.extend_from_slice(&[0xFF, 0x00, 0xFF]);
        Self {
            payload,
            uses_long_preamble: false,
            repeat_count: 0,
        }
    }

    /// Marks the packet for the programming track (extended preamble).
    #[must_use]
    pub fn with_long_preamble(mut self) -> Self {
        self.uses_long_preamble = true;
        self
    }

    /// Sets how many additional times the signal generator repeats the packet.
    #[must_use]
    pub fn with_repeat_count(mut self, repeats: u8) -> Self {
        self.repeat_count = repeats;
        self
    }

    /// Encoded bytes, error byte last.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.payload
    }

    /// True when the packet must go out on the programming channel.
    #[inline]
    pub fn uses_long_preamble(&self) -> bool {
        self.uses_long_preamble
    }

    /// Additional on-wire repetitions requested for this packet.
    #[inline]
    pub fn repeat_count(&self) -> u8 {
        self.repeat_count
    }

    /// Preamble length in bits: 14 on the main line, 22 for the programming
    /// track.
    pub fn preamble_bits(&self) -> usize {
        if self.uses_long_preamble {
            LONG_PREAMBLE_BITS
        } else {
            SHORT_PREAMBLE_BITS
        }
    }

    /// The bits as they go on the rails, `true` for a one bit.
    ///
    /// Preamble, then each byte MSB first behind a 0 start bit, then the
    /// 1 end bit.
    pub fn waveform_bits(&self) -> impl Iterator<Item = bool> + '_ {
        let preamble = core::iter::repeat(true).take(self.preamble_bits());
        let body = self.payload.iter().flat_map(|&byte| {
            core::iter::once(false).chain((0..8).rev().map(move |bit| (byte >> bit) & 1 == 1))
        });
        preamble.chain(body).chain(core::iter::once(true))
    }

    /// Verifies the trailing error-detection byte.
    pub fn is_valid(&self) -> bool {
        match self.payload.split_last() {
            Some((check, data)) if !data.is_empty() => xor_checksum(data) == *check,
            _ => false,
        }
    }
}

fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |acc, b| acc ^ b)
}

/// Flattens a board address and board index into a linear accessory address.
///
/// A `board_index` of [`DIRECT_ADDRESS`] passes `board_address` through
/// unchanged (after range checking).
///
/// # Errors
///
/// Returns an [`AddressError`] when the index is not `0..=3` or `-1`, or the
/// result falls outside `0..=MAX_ACCESSORY_ADDRESS`.
pub fn encode_board_address(board_address: u16, board_index: i8) -> Result<u16, AddressError> {
    if board_index == DIRECT_ADDRESS {
        if board_address > MAX_ACCESSORY_ADDRESS {
            return Err(AddressError::AddressOutOfRange(board_address));
        }
        return Ok(board_address);
    }
    if !(0..=3).contains(&board_index) {
        return Err(AddressError::BoardIndexOutOfRange(board_index));
    }
    if board_address > MAX_BOARD_ADDRESS {
        return Err(AddressError::BoardAddressOutOfRange(board_address));
    }
    // (b - 1) * 4 + i + 1, rearranged so board 0 does not underflow
    let flat = board_address * OUTPUTS_PER_BOARD + board_index as u16;
    flat.checked_sub(3)
        .ok_or(AddressError::BoardAddressOutOfRange(board_address))
}

/// Splits a linear accessory address into `(board_address, board_index)`.
///
/// The returned index is always in `0..=3`.
///
/// # Errors
///
/// Returns [`AddressError::AddressOutOfRange`] above [`MAX_ACCESSORY_ADDRESS`].
pub fn decode_board_address(linear_address: u16) -> Result<(u16, i8), AddressError> {
    if linear_address > MAX_ACCESSORY_ADDRESS {
        return Err(AddressError::AddressOutOfRange(linear_address));
    }
    let board_address = (linear_address + 3) / OUTPUTS_PER_BOARD;
    let board_index = (linear_address + 3 - board_address * OUTPUTS_PER_BOARD) as i8;
    Ok((board_address, board_index))
}

/// Builds the basic accessory decoder packet for a turnout's current state.
///
/// Layout: `{10AAAAAA} {1AAACDDD} {EEEEEEEE}` where the second `AAA` group holds
/// the ones-complement of the board address high bits, `C` is the activate bit,
/// `DD` the output pair (board index) and the final `D` the thrown/closed output.
///
/// ```rust
/// use rs_dccstation::packet::encode_accessory_command;
/// use rs_dccstation::turnout::{Turnout, TurnoutType};
///
/// let mut turnout = Turnout::new(1, 1, TurnoutType::Left).unwrap();
/// turnout.set_thrown(true);
/// let packet = encode_accessory_command(&turnout);
/// assert_eq!(packet.bytes(), &[0x81, 0xF9, 0x78]);
/// ```
pub fn encode_accessory_command(turnout: &Turnout) -> DccPacket {
    let board = turnout.board_address() & MAX_BOARD_ADDRESS;
    let pair = (turnout.board_index() as u8) & 0b11;

    let first = ACCESSORY_PREFIX | (board & 0x3F) as u8;
    let high = (!(board >> 6) & 0b111) as u8;
    let second = ACCESSORY_PREFIX
        | (high << 4)
        | ACCESSORY_ACTIVATE
        | (pair << 1)
        | u8::from(turnout.is_thrown());

    let mut payload = HVec::new();
    // Three bytes always fit in MAX_PACKET_LEN.
    let _ = payload.extend_from_slice(&[first, second, first ^ second]);
    DccPacket {
        payload,
        uses_long_preamble: false,
        repeat_count: 0,
    }
}
