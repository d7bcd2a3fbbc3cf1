//! Turnouts and the registry that commands and refreshes them.
//!
//! A [`Turnout`] is a stationary accessory addressed through an NMRA basic
//! accessory decoder. The [`TurnoutRegistry`] owns all of them, queues command
//! packets for the dispatcher, hands out refresh packets on request and
//! persists itself through a [`ConfigStore`].
//!
//! # Example
//!
//! ```rust
//! use rs_dccstation::turnout::{TurnoutRegistry, TurnoutType};
//! use rs_dccstation::config::TurnoutConfig;
//!
//! let mut registry = TurnoutRegistry::new(&TurnoutConfig::default());
//! let id = registry.create_or_update(1, 0, TurnoutType::Left).unwrap();
//! assert_eq!(id, 1);
//!
//! assert!(registry.set_by_id(id, true, true));
//! assert!(registry.get_by_id(id).unwrap().is_thrown());
//!
//! // The command packet waits in the outbox for the dispatcher
//! let packet = registry.pop_outgoing().unwrap();
//! assert_eq!(packet.bytes(), &[0x81, 0xF9, 0x78]);
//! ```

use heapless::Deque;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::config::{ShortString, TurnoutConfig};
use crate::error::{AddressError, StoreError};
use crate::packet::{decode_board_address, encode_accessory_command, encode_board_address, DccPacket};
use crate::traits::ConfigStore;

/// Command packets that may wait for the dispatcher at once.
pub const OUTBOX_CAPACITY: usize = 16;

/// Mechanical turnout type. Informational only; all types are driven alike.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TurnoutType {
    /// Left-hand turnout.
    #[default]
    Left,
    /// Right-hand turnout.
    Right,
    /// Wye turnout.
    Wye,
    /// Multi-way turnout.
    Multi,
}

impl From<TurnoutType> for u8 {
    fn from(value: TurnoutType) -> Self {
        match value {
            TurnoutType::Left => 0,
            TurnoutType::Right => 1,
            TurnoutType::Wye => 2,
            TurnoutType::Multi => 3,
        }
    }
}

impl TryFrom<u8> for TurnoutType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TurnoutType::Left),
            1 => Ok(TurnoutType::Right),
            2 => Ok(TurnoutType::Wye),
            3 => Ok(TurnoutType::Multi),
            _ => Err("unknown turnout type"),
        }
    }
}

/// One turnout on the layout.
///
/// `address` and `(board_address, board_index)` always describe the same
/// accessory output; the pair is derived from the linear address whenever the
/// address changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turnout {
    #[serde(rename = "id")]
    turnout_id: u16,
    address: u16,
    #[serde(rename = "boardAddress")]
    board_address: u16,
    #[serde(rename = "boardIndex")]
    board_index: i8,
    #[serde(rename = "type")]
    turnout_type: TurnoutType,
    #[serde(rename = "state")]
    thrown: bool,
}

impl Turnout {
    /// Creates a closed turnout at a linear accessory address.
    ///
    /// # Errors
    ///
    /// Fails if `address` is beyond the accessory address range.
    pub fn new(turnout_id: u16, address: u16, turnout_type: TurnoutType) -> Result<Self, AddressError> {
        let (board_address, board_index) = decode_board_address(address)?;
        Ok(Self {
            turnout_id,
            address,
            board_address,
            board_index,
            turnout_type,
            thrown: false,
        })
    }

    /// Moves the turnout to a new board address/index and type.
    ///
    /// A `board_index` of [`DIRECT_ADDRESS`](crate::packet::DIRECT_ADDRESS)
    /// treats `board_address` as a linear address.
    pub fn update(
        &mut self,
        board_address: u16,
        board_index: i8,
        turnout_type: TurnoutType,
    ) -> Result<(), AddressError> {
        let address = encode_board_address(board_address, board_index)?;
        let (board_address, board_index) = decode_board_address(address)?;
        self.address = address;
        self.board_address = board_address;
        self.board_index = board_index;
        self.turnout_type = turnout_type;
        Ok(())
    }

    /// Stable identifier, independent of the address.
    #[inline]
    pub fn id(&self) -> u16 {
        self.turnout_id
    }

    /// Linear accessory address.
    #[inline]
    pub fn address(&self) -> u16 {
        self.address
    }

    /// Accessory decoder board address.
    #[inline]
    pub fn board_address(&self) -> u16 {
        self.board_address
    }

    /// Output pair on the board (0..=3).
    #[inline]
    pub fn board_index(&self) -> i8 {
        self.board_index
    }

    /// Mechanical type.
    #[inline]
    pub fn turnout_type(&self) -> TurnoutType {
        self.turnout_type
    }

    /// True when thrown, false when closed.
    #[inline]
    pub fn is_thrown(&self) -> bool {
        self.thrown
    }

    /// Sets the thrown state without sending anything.
    #[inline]
    pub fn set_thrown(&mut self, thrown: bool) {
        self.thrown = thrown;
    }

    /// Builds the refresh packet reflecting the current state.
    ///
    /// `refresh_code` identifies the refresh cycle asking for the packet; the
    /// packet content only depends on the turnout itself.
    pub fn get_next_packet(&self, refresh_code: u32) -> DccPacket {
        trace!(
            "turnout {} refresh (code {}) address {} thrown {}",
            self.turnout_id,
            refresh_code,
            self.address,
            self.thrown
        );
        encode_accessory_command(self)
    }

    /// Re-derives the board pair from the address, rejecting stored data
    /// whose two encodings disagree.
    fn validated(self) -> Result<Self, AddressError> {
        let mut checked = Turnout::new(self.turnout_id, self.address, self.turnout_type)?;
        if (checked.board_address, checked.board_index) != (self.board_address, self.board_index) {
            warn!(
                "turnout {} stored board {}/{} disagrees with address {}, using {}/{}",
                self.turnout_id,
                self.board_address,
                self.board_index,
                self.address,
                checked.board_address,
                checked.board_index
            );
        }
        checked.thrown = self.thrown;
        Ok(checked)
    }
}

/// Owner of every turnout on the layout.
///
/// Insertion order is the enumeration order for [`get_by_index`].
/// All lookups are linear scans; layouts have tens to low hundreds of turnouts.
///
/// The registry itself is not synchronized. The command station wraps it,
/// together with the power controller and dispatchers, in one lock.
///
/// [`get_by_index`]: TurnoutRegistry::get_by_index
#[derive(Debug)]
pub struct TurnoutRegistry {
    turnouts: Vec<Turnout>,
    dirty: bool,
    outbox: Deque<DccPacket, OUTBOX_CAPACITY>,
    refresh_cursor: usize,
    repeat_count: u8,
    store_name: ShortString,
}

impl TurnoutRegistry {
    /// Creates an empty registry.
    pub fn new(config: &TurnoutConfig) -> Self {
        Self {
            turnouts: Vec::new(),
            dirty: false,
            outbox: Deque::new(),
            refresh_cursor: 0,
            repeat_count: config.accessory_repeat_count,
            store_name: config.store_name.clone(),
        }
    }

    /// Creates a turnout, or updates the type of the one already at that address.
    ///
    /// Returns the turnout id (existing or newly allocated).
    pub fn create_or_update(
        &mut self,
        board_address: u16,
        board_index: i8,
        turnout_type: TurnoutType,
    ) -> Result<u16, AddressError> {
        let address = encode_board_address(board_address, board_index)?;
        if let Some(turnout) = self.turnouts.iter_mut().find(|t| t.address == address) {
            debug!("turnout {} at address {} updated", turnout.turnout_id, address);
            turnout.turnout_type = turnout_type;
            let id = turnout.turnout_id;
            self.dirty = true;
            return Ok(id);
        }

        let id = self.next_id()?;
        let turnout = Turnout::new(id, address, turnout_type)?;
        info!(
            "turnout {} created at address {} (board {} index {})",
            id, address, turnout.board_address, turnout.board_index
        );
        self.turnouts.push(turnout);
        self.dirty = true;
        Ok(id)
    }

    /// Re-addresses an existing turnout, keeping its id and state.
    ///
    /// Returns `Ok(false)` if no turnout has this id.
    pub fn update_by_id(
        &mut self,
        id: u16,
        board_address: u16,
        board_index: i8,
        turnout_type: TurnoutType,
    ) -> Result<bool, AddressError> {
        let Some(turnout) = self.turnouts.iter_mut().find(|t| t.turnout_id == id) else {
            return Ok(false);
        };
        turnout.update(board_address, board_index, turnout_type)?;
        self.dirty = true;
        Ok(true)
    }

    /// Sets a turnout's state by id.
    ///
    /// With `send_packet`, queues the accessory command for the dispatcher.
    /// Returns false if the id is unknown.
    pub fn set_by_id(&mut self, id: u16, thrown: bool, send_packet: bool) -> bool {
        match self.turnouts.iter().position(|t| t.turnout_id == id) {
            Some(pos) => {
                self.set_at(pos, thrown, send_packet);
                true
            }
            None => false,
        }
    }

    /// Sets a turnout's state by linear address.
    pub fn set_by_address(&mut self, address: u16, thrown: bool, send_packet: bool) -> bool {
        match self.turnouts.iter().position(|t| t.address == address) {
            Some(pos) => {
                self.set_at(pos, thrown, send_packet);
                true
            }
            None => false,
        }
    }

    /// Flips a turnout by id, always sending the command.
    pub fn toggle_by_id(&mut self, id: u16) -> bool {
        match self.get_by_id(id) {
            Some(t) => {
                let thrown = !t.thrown;
                self.set_by_id(id, thrown, true)
            }
            None => false,
        }
    }

    /// Flips a turnout by linear address, always sending the command.
    pub fn toggle_by_address(&mut self, address: u16) -> bool {
        match self.get_by_address(address) {
            Some(t) => {
                let thrown = !t.thrown;
                self.set_by_address(address, thrown, true)
            }
            None => false,
        }
    }

    fn set_at(&mut self, pos: usize, thrown: bool, send_packet: bool) {
        let repeats = self.repeat_count;
        let turnout = &mut self.turnouts[pos];
        turnout.thrown = thrown;
        info!(
            "turnout {} (address {}) {}",
            turnout.turnout_id,
            turnout.address,
            if thrown { "thrown" } else { "closed" }
        );
        let packet = send_packet
            .then(|| encode_accessory_command(turnout).with_repeat_count(repeats));
        self.dirty = true;
        if let Some(packet) = packet {
            self.queue(packet);
        }
    }

    fn queue(&mut self, packet: DccPacket) {
        if self.outbox.is_full() {
            warn!("turnout outbox full, dropping oldest command");
            let _ = self.outbox.pop_front();
        }
        // Room was made above.
        let _ = self.outbox.push_back(packet);
    }

    /// Removes a turnout by id. Returns whether one was found.
    pub fn remove_by_id(&mut self, id: u16) -> bool {
        self.remove_where(|t| t.turnout_id == id)
    }

    /// Removes a turnout by linear address. Returns whether one was found.
    pub fn remove_by_address(&mut self, address: u16) -> bool {
        self.remove_where(|t| t.address == address)
    }

    fn remove_where(&mut self, pred: impl Fn(&Turnout) -> bool) -> bool {
        match self.turnouts.iter().position(pred) {
            Some(pos) => {
                let removed = self.turnouts.remove(pos);
                info!("turnout {} removed", removed.turnout_id);
                if self.refresh_cursor > pos {
                    self.refresh_cursor -= 1;
                }
                self.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Removes every turnout.
    pub fn clear(&mut self) {
        self.turnouts.clear();
        self.refresh_cursor = 0;
        self.dirty = true;
    }

    /// Looks up a turnout by id.
    pub fn get_by_id(&self, id: u16) -> Option<&Turnout> {
        self.turnouts.iter().find(|t| t.turnout_id == id)
    }

    /// Looks up a turnout by linear address.
    pub fn get_by_address(&self, address: u16) -> Option<&Turnout> {
        self.turnouts.iter().find(|t| t.address == address)
    }

    /// Looks up a turnout by insertion position.
    pub fn get_by_index(&self, index: usize) -> Option<&Turnout> {
        self.turnouts.get(index)
    }

    /// Number of registered turnouts.
    #[inline]
    pub fn count(&self) -> usize {
        self.turnouts.len()
    }

    /// All turnouts in insertion order.
    #[inline]
    pub fn snapshot(&self) -> &[Turnout] {
        &self.turnouts
    }

    /// True if state changed since the last successful persist.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Takes the oldest queued command packet.
    pub fn pop_outgoing(&mut self) -> Option<DccPacket> {
        self.outbox.pop_front()
    }

    /// Returns a queued packet to the front of the outbox.
    ///
    /// Used when the dispatcher was busy and could not take it.
    pub fn requeue_front(&mut self, packet: DccPacket) {
        if self.outbox.push_front(packet).is_err() {
            warn!("turnout outbox full, dropping requeued command");
        }
    }

    /// Number of command packets waiting for the dispatcher.
    #[inline]
    pub fn pending_outgoing(&self) -> usize {
        self.outbox.len()
    }

    /// Produces the next refresh packet, cycling through every turnout.
    ///
    /// Returns `None` when no turnouts are registered.
    pub fn get_next_packet(&mut self, refresh_code: u32) -> Option<DccPacket> {
        if self.turnouts.is_empty() {
            return None;
        }
        if self.refresh_cursor >= self.turnouts.len() {
            self.refresh_cursor = 0;
        }
        let packet = self.turnouts[self.refresh_cursor].get_next_packet(refresh_code);
        self.refresh_cursor += 1;
        Some(packet)
    }

    /// Writes the registry to `store` if anything changed.
    ///
    /// The dirty flag is cleared only once the store accepts the data, so a
    /// failed write is retried on the next call. Returns whether a write
    /// happened.
    pub fn persist(&mut self, store: &mut impl ConfigStore) -> Result<bool, StoreError> {
        if !self.dirty {
            return Ok(false);
        }
        let data = serde_json::to_vec(&self.turnouts)?;
        store.store(self.store_name.as_str(), &data)?;
        self.dirty = false;
        debug!("persisted {} turnouts", self.turnouts.len());
        Ok(true)
    }

    /// Replaces the registry contents with what `store` holds.
    ///
    /// A missing entry leaves the registry empty. Returns the number of
    /// turnouts loaded.
    pub fn load(&mut self, store: &mut impl ConfigStore) -> Result<usize, StoreError> {
        let Some(data) = store.load(self.store_name.as_str())? else {
            info!("no stored turnouts");
            return Ok(0);
        };
        let stored: Vec<Turnout> = serde_json::from_slice(&data)?;
        self.turnouts.clear();
        self.refresh_cursor = 0;
        for turnout in stored {
            match turnout.validated() {
                Ok(turnout) if self.get_by_id(turnout.turnout_id).is_none() => {
                    self.turnouts.push(turnout)
                }
                Ok(turnout) => warn!("duplicate stored turnout id {}, skipped", turnout.turnout_id),
                Err(e) => warn!("stored turnout skipped: {}", e),
            }
        }
        self.dirty = false;
        info!("loaded {} turnouts", self.turnouts.len());
        Ok(self.turnouts.len())
    }

    /// One past the highest id in use; once `u16::MAX` is taken, the lowest
    /// free id instead.
    fn next_id(&self) -> Result<u16, AddressError> {
        match self.turnouts.iter().map(|t| t.turnout_id).max() {
            None => Ok(1),
            Some(max) if max < u16::MAX => Ok(max + 1),
            Some(_) => (1..u16::MAX)
                .find(|id| self.get_by_id(*id).is_none())
                .ok_or(AddressError::TurnoutIdsExhausted),
        }
    }
}
