//! Packet dispatch into the hardware signal generator.
//!
//! One [`PacketDispatcher`] exists per signal channel. It hands packets to the
//! [`SignalLink`] one at a time and handles backpressure: when the link
//! reports a full buffer the dispatcher keeps the packet, asks the link for a
//! ready notification and refuses new packets until
//! [`PacketDispatcher::on_ready`] has pushed the retained one through.
//!
//! ```text
//!          submit / write ok
//!   Idle ◀───────────────────┐
//!    │                       │
//!    │ write → BufferFull     │ on_ready → write ok
//!    ▼                       │
//!   Suspended ───────────────┘
//!    │  on_ready → BufferFull: stay, request another notification
//! ```
//!
//! A channel that is not running (its last track output is off or tripped)
//! drops packets instead of queueing them, so stale turnout commands never
//! fire when power comes back.

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::error::LinkError;
use crate::packet::DccPacket;
use crate::traits::{SignalChannel, SignalControl, SignalLink};

/// Dispatcher state between calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DispatchState {
    /// Ready to write.
    #[default]
    Idle,
    /// Holding a packet until the link signals readiness.
    Suspended,
}

/// Result of handing a packet to a dispatcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Written to the link.
    Sent,
    /// Link buffer full; the packet is retained until `on_ready`.
    Suspended,
    /// Channel not running; the packet was discarded.
    Dropped,
    /// A previous packet is still suspended. The packet is handed back
    /// untouched so the caller can keep it.
    Busy(DccPacket),
}

/// Per-channel counters for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Packets accepted by the link.
    pub sent: u32,
    /// Packets discarded because the channel was stopped.
    pub dropped: u32,
    /// Times the link pushed back with a full buffer.
    pub suspensions: u32,
}

/// Writer for one signal channel.
#[derive(Debug)]
pub struct PacketDispatcher {
    channel: SignalChannel,
    enabled: bool,
    state: DispatchState,
    pending: Option<DccPacket>,
    stats: DispatchStats,
}

impl PacketDispatcher {
    /// Creates a stopped dispatcher for `channel`.
    pub fn new(channel: SignalChannel) -> Self {
        Self {
            channel,
            enabled: false,
            state: DispatchState::Idle,
            pending: None,
            stats: DispatchStats::default(),
        }
    }

    /// Hands `packet` to the link.
    ///
    /// # Errors
    ///
    /// Any link failure other than [`LinkError::BufferFull`]. The packet is
    /// lost and the caller should treat the channel as dead.
    pub fn submit<L: SignalLink>(
        &mut self,
        link: &mut L,
        packet: DccPacket,
    ) -> Result<SubmitOutcome, LinkError> {
        if !self.enabled {
            self.stats.dropped += 1;
            trace!("[{}] channel stopped, dropping packet", self.channel.as_str());
            return Ok(SubmitOutcome::Dropped);
        }
        if self.state == DispatchState::Suspended {
            return Ok(SubmitOutcome::Busy(packet));
        }
        self.write(link, packet)
    }

    /// Retries the retained packet after the link's ready notification.
    ///
    /// Makes exactly one write attempt. Returns `Ok(None)` if nothing was
    /// waiting.
    pub fn on_ready<L: SignalLink>(
        &mut self,
        link: &mut L,
    ) -> Result<Option<SubmitOutcome>, LinkError> {
        self.state = DispatchState::Idle;
        let Some(packet) = self.pending.take() else {
            return Ok(None);
        };
        if !self.enabled {
            self.stats.dropped += 1;
            return Ok(Some(SubmitOutcome::Dropped));
        }
        self.write(link, packet).map(Some)
    }

    fn write<L: SignalLink>(
        &mut self,
        link: &mut L,
        packet: DccPacket,
    ) -> Result<SubmitOutcome, LinkError> {
        match link.write(self.channel, &packet) {
            Ok(()) => {
                self.stats.sent += 1;
                self.state = DispatchState::Idle;
                trace!("[{}] sent {:02X?}", self.channel.as_str(), packet.bytes());
                Ok(SubmitOutcome::Sent)
            }
            Err(e) if e.is_backpressure() => {
                self.stats.suspensions += 1;
                self.state = DispatchState::Suspended;
                self.pending = Some(packet);
                debug!("[{}] link buffer full, suspending", self.channel.as_str());
                link.request_ready_notify(self.channel);
                Ok(SubmitOutcome::Suspended)
            }
            Err(e) => {
                warn!("[{}] link write failed: {}", self.channel.as_str(), e);
                self.state = DispatchState::Idle;
                Err(e)
            }
        }
    }

    /// Opens the channel gate and starts the link's waveform. Idempotent.
    pub fn start<L: SignalLink>(&mut self, link: &mut L) {
        if self.enabled {
            return;
        }
        debug!("[{}] starting signal", self.channel.as_str());
        self.enabled = true;
        link.start(self.channel);
    }

    /// Closes the channel gate, drops any retained packet and stops the
    /// link's waveform. Idempotent.
    pub fn stop<L: SignalLink>(&mut self, link: &mut L) {
        if self.pending.take().is_some() {
            self.stats.dropped += 1;
        }
        self.state = DispatchState::Idle;
        if !self.enabled {
            return;
        }
        debug!("[{}] stopping signal", self.channel.as_str());
        self.enabled = false;
        link.stop(self.channel);
    }

    /// Channel served by this dispatcher.
    #[inline]
    pub fn channel(&self) -> SignalChannel {
        self.channel
    }

    /// True while the channel gate is open.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// Packet waiting for `on_ready`, if any.
    #[inline]
    pub fn pending(&self) -> Option<&DccPacket> {
        self.pending.as_ref()
    }

    /// Counters since creation.
    #[inline]
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }
}

/// Owns the signal link and both channel dispatchers.
///
/// Routes packets by preamble (see [`SignalChannel::for_packet`]) and is the
/// [`SignalControl`] the power controller starts and stops channels through.
///
/// # Example
///
/// ```rust
/// use rs_dccstation::dispatch::{SignalRouter, SubmitOutcome};
/// use rs_dccstation::hal::MockLink;
/// use rs_dccstation::packet::DccPacket;
/// use rs_dccstation::traits::{SignalChannel, SignalControl};
///
/// let mut router = SignalRouter::new(MockLink::new());
///
/// // Stopped channel drops
/// assert_eq!(router.submit(DccPacket::idle()).unwrap(), SubmitOutcome::Dropped);
///
/// router.start_signal(SignalChannel::Ops);
/// assert_eq!(router.submit(DccPacket::idle()).unwrap(), SubmitOutcome::Sent);
/// assert_eq!(router.link().written.len(), 1);
/// ```
#[derive(Debug)]
pub struct SignalRouter<L: SignalLink> {
    link: L,
    ops: PacketDispatcher,
    prog: PacketDispatcher,
}

impl<L: SignalLink> SignalRouter<L> {
    /// Creates a router with both channels stopped.
    pub fn new(link: L) -> Self {
        Self {
            link,
            ops: PacketDispatcher::new(SignalChannel::Ops),
            prog: PacketDispatcher::new(SignalChannel::Prog),
        }
    }

    /// Submits `packet` on the channel its preamble selects.
    pub fn submit(&mut self, packet: DccPacket) -> Result<SubmitOutcome, LinkError> {
        let channel = SignalChannel::for_packet(&packet);
        let (dispatcher, link) = self.parts(channel);
        dispatcher.submit(link, packet)
    }

    /// Delivers the link's ready notification for `channel`.
    pub fn on_ready(&mut self, channel: SignalChannel) -> Result<Option<SubmitOutcome>, LinkError> {
        let (dispatcher, link) = self.parts(channel);
        dispatcher.on_ready(link)
    }

    /// Dispatcher of `channel`.
    pub fn dispatcher(&self, channel: SignalChannel) -> &PacketDispatcher {
        match channel {
            SignalChannel::Ops => &self.ops,
            SignalChannel::Prog => &self.prog,
        }
    }

    /// Counters of `channel`.
    pub fn stats(&self, channel: SignalChannel) -> DispatchStats {
        self.dispatcher(channel).stats()
    }

    /// The underlying link.
    pub fn link(&self) -> &L {
        &self.link
    }

    /// The underlying link, mutably.
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    fn parts(&mut self, channel: SignalChannel) -> (&mut PacketDispatcher, &mut L) {
        let dispatcher = match channel {
            SignalChannel::Ops => &mut self.ops,
            SignalChannel::Prog => &mut self.prog,
        };
        (dispatcher, &mut self.link)
    }
}

impl<L: SignalLink> SignalControl for SignalRouter<L> {
    fn is_signal_enabled(&self, channel: SignalChannel) -> bool {
        self.dispatcher(channel).is_enabled()
    }

    fn start_signal(&mut self, channel: SignalChannel) {
        let (dispatcher, link) = self.parts(channel);
        dispatcher.start(link);
    }

    fn stop_signal(&mut self, channel: SignalChannel) {
        let (dispatcher, link) = self.parts(channel);
        dispatcher.stop(link);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockLink;

    fn accessory() -> DccPacket {
        DccPacket::from_data(&[0x81, 0xF9]).unwrap()
    }

    fn running_dispatcher(link: &mut MockLink) -> PacketDispatcher {
        let mut dispatcher = PacketDispatcher::new(SignalChannel::Ops);
        dispatcher.start(link);
        dispatcher
    }

    #[test]
    fn stopped_channel_drops() {
        let mut link = MockLink::new();
        let mut dispatcher = PacketDispatcher::new(SignalChannel::Ops);

        assert_eq!(dispatcher.submit(&mut link, accessory()), Ok(SubmitOutcome::Dropped));
        assert!(link.written.is_empty());
        assert_eq!(dispatcher.stats().dropped, 1);
    }

    #[test]
    fn sends_when_link_has_room() {
        let mut link = MockLink::new();
        let mut dispatcher = running_dispatcher(&mut link);

        assert_eq!(dispatcher.submit(&mut link, accessory()), Ok(SubmitOutcome::Sent));
        assert_eq!(link.written.len(), 1);
        assert_eq!(link.written[0].0, SignalChannel::Ops);
        assert_eq!(link.written[0].1.bytes(), &[0x81, 0xF9, 0x78]);
        assert_eq!(dispatcher.state(), DispatchState::Idle);
    }

    #[test]
    fn buffer_full_suspends_and_requests_notify() {
        let mut link = MockLink::new().with_capacity(0);
        let mut dispatcher = running_dispatcher(&mut link);

        assert_eq!(dispatcher.submit(&mut link, accessory()), Ok(SubmitOutcome::Suspended));
        assert_eq!(dispatcher.state(), DispatchState::Suspended);
        assert_eq!(link.notify_requests, vec![SignalChannel::Ops]);
        assert!(dispatcher.pending().is_some());
        assert_eq!(dispatcher.stats().suspensions, 1);
    }

    #[test]
    fn suspended_dispatcher_hands_back_new_packets() {
        let mut link = MockLink::new().with_capacity(0);
        let mut dispatcher = running_dispatcher(&mut link);
        dispatcher.submit(&mut link, accessory()).unwrap();

        let idle = DccPacket::idle();
        assert_eq!(
            dispatcher.submit(&mut link, idle.clone()),
            Ok(SubmitOutcome::Busy(idle))
        );
        // still only one notify request outstanding
        assert_eq!(link.notify_requests.len(), 1);
    }

    #[test]
    fn on_ready_resends_exactly_once() {
        let mut link = MockLink::new().with_capacity(0);
        let mut dispatcher = running_dispatcher(&mut link);
        dispatcher.submit(&mut link, accessory()).unwrap();

        // Still full: one attempt, re-suspend, re-request
        assert_eq!(dispatcher.on_ready(&mut link), Ok(Some(SubmitOutcome::Suspended)));
        assert_eq!(link.write_attempts, 2);
        assert_eq!(link.notify_requests.len(), 2);

        link.set_capacity(1);
        assert_eq!(dispatcher.on_ready(&mut link), Ok(Some(SubmitOutcome::Sent)));
        assert_eq!(link.written.len(), 1);
        assert_eq!(link.written[0].1.bytes(), &[0x81, 0xF9, 0x78]);
        assert_eq!(dispatcher.state(), DispatchState::Idle);

        // Spurious notification
        assert_eq!(dispatcher.on_ready(&mut link), Ok(None));
    }

    #[test]
    fn fatal_error_propagates() {
        let mut link = MockLink::new();
        link.fail_with = Some(LinkError::Io(-1));
        let mut dispatcher = running_dispatcher(&mut link);

        assert_eq!(dispatcher.submit(&mut link, accessory()), Err(LinkError::Io(-1)));
        assert_eq!(dispatcher.state(), DispatchState::Idle);
        assert!(link.notify_requests.is_empty());
    }

    #[test]
    fn stop_drops_retained_packet() {
        let mut link = MockLink::new().with_capacity(0);
        let mut dispatcher = running_dispatcher(&mut link);
        dispatcher.submit(&mut link, accessory()).unwrap();

        dispatcher.stop(&mut link);
        assert!(dispatcher.pending().is_none());
        assert_eq!(dispatcher.state(), DispatchState::Idle);
        assert_eq!(dispatcher.stats().dropped, 1);
        assert!(!link.is_running(SignalChannel::Ops));

        link.set_capacity(8);
        assert_eq!(dispatcher.on_ready(&mut link), Ok(None));
        assert!(link.written.is_empty());
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let mut link = MockLink::new();
        let mut dispatcher = PacketDispatcher::new(SignalChannel::Prog);
        dispatcher.start(&mut link);
        dispatcher.start(&mut link);
        assert_eq!(link.starts, vec![SignalChannel::Prog]);

        dispatcher.stop(&mut link);
        dispatcher.stop(&mut link);
        assert_eq!(link.stops, vec![SignalChannel::Prog]);
    }

    #[test]
    fn router_routes_by_preamble() {
        let mut router = SignalRouter::new(MockLink::new());
        router.start_signal(SignalChannel::Ops);

        assert_eq!(router.submit(accessory()), Ok(SubmitOutcome::Sent));
        // PROG not running
        assert_eq!(
            router.submit(DccPacket::idle().with_long_preamble()),
            Ok(SubmitOutcome::Dropped)
        );
        assert_eq!(router.stats(SignalChannel::Ops).sent, 1);
        assert_eq!(router.stats(SignalChannel::Prog).dropped, 1);

        router.start_signal(SignalChannel::Prog);
        assert_eq!(
            router.submit(DccPacket::idle().with_long_preamble()),
            Ok(SubmitOutcome::Sent)
        );
        assert_eq!(router.link().written[1].0, SignalChannel::Prog);
    }

    #[test]
    fn router_channels_suspend_independently() {
        let mut router = SignalRouter::new(MockLink::new().with_capacity(1));
        router.start_signal(SignalChannel::Ops);
        router.start_signal(SignalChannel::Prog);

        assert_eq!(router.submit(accessory()), Ok(SubmitOutcome::Sent));
        assert_eq!(router.submit(accessory()), Ok(SubmitOutcome::Suspended));
        assert_eq!(
            router.dispatcher(SignalChannel::Prog).state(),
            DispatchState::Idle
        );
        assert!(router.is_signal_enabled(SignalChannel::Prog));

        router.link_mut().set_capacity(8);
        assert_eq!(
            router.on_ready(SignalChannel::Ops),
            Ok(Some(SubmitOutcome::Sent))
        );
        assert_eq!(router.link().written.len(), 2);
    }
}
