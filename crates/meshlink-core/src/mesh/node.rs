//! Mesh node
//!
//! Ties the codec, the port registry, the node directory and the flood
//! scheduler to a [`Radio`]. One call to [`MeshNode::cycle`] is one pass
//! of the worker loop:
//!
//! 1. arm the receiver and wait up to the RX timeout
//! 2. on a frame: acknowledge, drop as duplicate, or decode, record and
//!    queue a rebroadcast
//! 3. scheduler maintenance
//! 4. transmit at most one frame, or queue a self announcement when the
//!    queue is empty and the announce interval has passed
//!
//! Every reception outcome falls through to steps 3 and 4. Only a radio
//! error ends the loop.

use super::crypto::ChannelKey;
use super::directory::{DirectoryEvent, Message, NodeDirectory};
use super::envelope::{Envelope, NodeInfoPayload, PortRegistry};
use super::packet::{BuildOptions, MeshFrame, NodeId, PacketId};
use super::radio::{MeshStats, Radio, Reception};
use super::scheduler::{FloodScheduler, Sighting, TransmitDecision};
use super::store::NodeStore;
use crate::config::NodeConfig;
use crate::error::{MeshResult, RadioError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::mpsc::UnboundedSender;

/// What happened to one received frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Shorter than a header
    Malformed,
    /// Echo of a queued frame
    Ack,
    /// Already handled
    Duplicate,
    /// First sighting of a frame this node originated
    Own,
    /// First sighting, decoded and passed to the directory
    Accepted { forwarded: bool },
}

/// A mesh node bound to one channel key
pub struct MeshNode {
    address: NodeId,
    identity: NodeInfoPayload,
    key: ChannelKey,
    options: BuildOptions,
    registry: PortRegistry,
    directory: NodeDirectory,
    scheduler: FloodScheduler,
    rx_timeout: Duration,
    stats: MeshStats,
}

impl MeshNode {
    /// Create a node from configuration, restoring the directory from `store`
    pub fn new(config: &NodeConfig, store: Box<dyn NodeStore>) -> MeshResult<Self> {
        config.validate()?;
        let address = config.resolve_address()?;
        let key = config.key()?;
        let identity = config.node_info(address)?;
        let options = BuildOptions {
            hop_limit: config.timing.hop_limit,
            want_ack: false,
            via_mqtt: false,
            channel_hash: key.channel_hash(&config.channel_name),
        };

        let mut directory = NodeDirectory::new(store);
        directory.restore()?;

        tracing::info!(
            address = %address,
            channel = %config.channel_name,
            channel_hash = options.channel_hash,
            key_bits = key.bits(),
            "mesh node ready"
        );

        Ok(Self {
            address,
            identity,
            key,
            options,
            registry: PortRegistry::standard(),
            directory,
            scheduler: FloodScheduler::new(config.timing.scheduler()),
            rx_timeout: config.timing.rx_timeout(),
            stats: MeshStats::default(),
        })
    }

    /// Publish directory changes on `events`
    pub fn with_events(mut self, events: UnboundedSender<DirectoryEvent>) -> Self {
        self.directory = self.directory.with_events(events);
        self
    }

    /// Replace the port registry
    pub fn with_registry(mut self, registry: PortRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn address(&self) -> NodeId {
        self.address
    }

    pub fn identity(&self) -> &NodeInfoPayload {
        &self.identity
    }

    pub fn stats(&self) -> MeshStats {
        self.stats
    }

    pub fn directory(&self) -> &NodeDirectory {
        &self.directory
    }

    pub fn scheduler(&self) -> &FloodScheduler {
        &self.scheduler
    }

    /// One receive, maintain, transmit pass
    pub fn cycle<R: Radio + ?Sized>(&mut self, radio: &mut R) -> Result<(), RadioError> {
        radio.receive()?;
        match radio.await_reception(self.rx_timeout)? {
            Reception::Ok => {
                let bytes = radio.read_payload()?;
                self.handle_frame(&bytes, Instant::now());
            }
            Reception::CrcError => {
                self.stats.crc_errors += 1;
                tracing::trace!("reception failed CRC");
            }
            Reception::Timeout => {}
        }
        self.service(radio, Instant::now())
    }

    /// Maintenance and transmit selection at `now`
    pub fn service<R: Radio + ?Sized>(&mut self, radio: &mut R, now: Instant) -> Result<(), RadioError> {
        self.scheduler.maintain(now);
        match self.scheduler.select_transmit(now) {
            TransmitDecision::Send { packet_id, frame } => {
                radio.send(&frame)?;
                self.stats.frames_tx += 1;
                tracing::debug!(packet_id = %packet_id, len = frame.len(), "frame sent");
            }
            TransmitDecision::Wait => {}
            TransmitDecision::Idle => {
                if self.scheduler.announce_due(now) {
                    self.announce_at(now);
                }
            }
        }
        Ok(())
    }

    /// Run cycles until `stop` is set or the radio fails
    pub fn run<R: Radio + ?Sized>(&mut self, radio: &mut R, stop: &AtomicBool) -> MeshResult<()> {
        tracing::info!(address = %self.address, "node loop started");
        while !stop.load(Ordering::Relaxed) {
            if let Err(e) = self.cycle(radio) {
                tracing::error!(address = %self.address, "radio failure: {}", e);
                return Err(e.into());
            }
        }
        tracing::info!(address = %self.address, stats = ?self.stats, "node loop stopped");
        Ok(())
    }

    /// Process one received frame
    pub fn handle_frame(&mut self, bytes: &[u8], now: Instant) -> FrameOutcome {
        self.stats.frames_rx += 1;
        let frame = match MeshFrame::parse(bytes, &self.key) {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.malformed += 1;
                tracing::trace!("dropping frame: {}", e);
                return FrameOutcome::Malformed;
            }
        };

        let packet_id = frame.packet_id();
        match self.scheduler.on_frame(packet_id, now) {
            Sighting::Ack => {
                self.stats.acks += 1;
                return FrameOutcome::Ack;
            }
            Sighting::RepeatAck | Sighting::Duplicate => {
                self.stats.duplicates += 1;
                tracing::trace!(packet_id = %packet_id, sender = %frame.sender(), "duplicate frame");
                return FrameOutcome::Duplicate;
            }
            Sighting::First => {}
        }

        if frame.sender() == self.address {
            tracing::trace!(packet_id = %packet_id, "ignoring own frame");
            return FrameOutcome::Own;
        }

        if let Some(envelope) = &frame.envelope {
            let payload = self.registry.decode_application(envelope);
            self.directory
                .apply(envelope, payload.as_ref(), frame.sender(), frame.dest(), SystemTime::now());
        } else {
            tracing::trace!(packet_id = %packet_id, sender = %frame.sender(), "no envelope under this key");
        }

        let forwarded = match frame.rebroadcast() {
            Some(fwd) => {
                self.scheduler.enqueue_forward(packet_id, fwd, now);
                self.stats.forwarded += 1;
                true
            }
            None => {
                self.stats.hop_limit_drops += 1;
                tracing::debug!(packet_id = %packet_id, "hop limit spent, not forwarding");
                false
            }
        };
        FrameOutcome::Accepted { forwarded }
    }

    /// Queue an envelope for `dest`, returning its packet id
    pub fn send(&mut self, dest: NodeId, envelope: &Envelope) -> PacketId {
        self.send_at(dest, envelope, Instant::now())
    }

    fn send_at(&mut self, dest: NodeId, envelope: &Envelope, now: Instant) -> PacketId {
        let out = MeshFrame::build(dest, self.address, envelope, &self.key, &self.options);
        self.scheduler.enqueue_origin(out.packet_id, out.bytes, now);
        out.packet_id
    }

    /// Queue a text message and record it on the local node
    pub fn send_text(&mut self, dest: NodeId, text: &str) -> PacketId {
        let packet_id = self.send(dest, &Envelope::text(text));
        self.directory.record_sent(Message {
            sender: self.address,
            dest,
            text: text.to_string(),
            observed_at: SystemTime::now(),
        });
        tracing::info!(packet_id = %packet_id, dest = %dest, "text queued");
        packet_id
    }

    /// Broadcast a position report
    pub fn send_position(&mut self, latitude: f64, longitude: f64, altitude: Option<i32>) -> PacketId {
        self.send(NodeId::BROADCAST, &Envelope::position(latitude, longitude, altitude))
    }

    /// Broadcast this node's identity now
    pub fn announce(&mut self) -> PacketId {
        self.announce_at(Instant::now())
    }

    fn announce_at(&mut self, now: Instant) -> PacketId {
        let envelope = Envelope::node_info(&self.identity);
        let packet_id = self.send_at(NodeId::BROADCAST, &envelope, now);
        self.scheduler.mark_announced(now);
        self.stats.announcements += 1;
        tracing::info!(address = %self.address, packet_id = %packet_id, "self announcement queued");
        packet_id
    }
}

impl std::fmt::Debug for MeshNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshNode")
            .field("address", &self.address)
            .field("key", &self.key)
            .field("directory", &self.directory)
            .field("pending", &self.scheduler.len())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::simulation::MockRadio;
    use crate::mesh::store::MemoryStore;

    const TEXT_FRAME: &str = "ffffffff7087a8bbe0a52f5e63080000018e793d87fc34dcbd23";

    fn node(address: u32) -> MeshNode {
        let config = NodeConfig {
            address: Some(NodeId::from_u32(address).to_string()),
            ..NodeConfig::default()
        };
        MeshNode::new(&config, Box::new(MemoryStore::new())).unwrap()
    }

    #[test]
    fn test_new_node_uses_config_identity() {
        let n = node(0x1234);
        assert_eq!(n.address(), NodeId::from_u32(0x1234));
        assert_eq!(n.identity().id, "!00001234");
        assert!(n.scheduler().is_empty());
    }

    #[test]
    fn test_new_rejects_zero_forward_retries() {
        let mut config = NodeConfig::default();
        config.timing.forward_retries = 0;
        let err = MeshNode::new(&config, Box::new(MemoryStore::new())).unwrap_err();
        assert!(err.to_string().contains("forward_retries"));
    }

    #[test]
    fn test_first_sighting_is_recorded_and_forwarded() {
        let mut n = node(1);
        let bytes = hex::decode(TEXT_FRAME).unwrap();
        let outcome = n.handle_frame(&bytes, Instant::now());
        assert_eq!(outcome, FrameOutcome::Accepted { forwarded: true });

        let sender = NodeId::from_u32(0xbba88770);
        let remote = n.directory().get(&sender).unwrap();
        assert_eq!(remote.messages[0].text, "TEST");
        assert!(remote.messages[0].dest.is_broadcast());

        // Forwarded copy has the decremented hop limit
        let queued = &n.scheduler().pending()[0];
        assert_eq!(queued.frame[12], 0x62);
        assert_eq!(queued.retries_remaining, 2);
    }

    #[test]
    fn test_duplicate_not_reprocessed() {
        let mut n = node(1);
        let bytes = hex::decode(TEXT_FRAME).unwrap();
        let now = Instant::now();
        n.handle_frame(&bytes, now);
        // Hearing the frame again counts as the echo of our queued forward
        assert_eq!(n.handle_frame(&bytes, now), FrameOutcome::Ack);
        assert_eq!(n.handle_frame(&bytes, now), FrameOutcome::Duplicate);

        let sender = NodeId::from_u32(0xbba88770);
        assert_eq!(n.directory().get(&sender).unwrap().messages.len(), 1);
        assert_eq!(n.stats().forwarded, 1);
    }

    #[test]
    fn test_hop_zero_is_not_forwarded() {
        let mut n = node(1);
        let mut bytes = hex::decode(TEXT_FRAME).unwrap();
        bytes[12] = 0x60;
        assert_eq!(n.handle_frame(&bytes, Instant::now()), FrameOutcome::Accepted { forwarded: false });
        assert!(n.scheduler().is_empty());
        assert_eq!(n.stats().hop_limit_drops, 1);
    }

    #[test]
    fn test_short_frame_is_malformed() {
        let mut n = node(1);
        assert_eq!(n.handle_frame(&[0u8; 10], Instant::now()), FrameOutcome::Malformed);
        assert_eq!(n.stats().malformed, 1);
    }

    #[test]
    fn test_send_text_records_local_message() {
        let mut n = node(7);
        let id = n.send_text(NodeId::BROADCAST, "hello mesh");
        assert!(n.scheduler().get(&id).is_some());
        let me = n.directory().get(&NodeId::from_u32(7)).unwrap();
        assert_eq!(me.messages[0].text, "hello mesh");
    }

    #[test]
    fn test_send_position_reaches_peer_directory() {
        let mut a = node(8);
        let mut b = node(9);
        let mut radio = MockRadio::new();
        let now = Instant::now();

        let id = a.send_position(47.5, -122.25, Some(10));
        a.service(&mut radio, now).unwrap();
        assert_eq!(radio.sent().len(), 1);

        let outcome = b.handle_frame(&radio.sent()[0], now);
        assert_eq!(outcome, FrameOutcome::Accepted { forwarded: true });
        assert!(b.scheduler().get(&id).is_some());

        let record = &b.directory().get(&NodeId::from_u32(8)).unwrap().record;
        assert_eq!(record.latitude, Some(47.5));
        assert_eq!(record.longitude, Some(-122.25));
        assert_eq!(record.altitude, Some(10));
    }

    #[test]
    fn test_announce_queues_identity_immediately() {
        let mut n = node(6);
        let id = n.announce();
        assert_eq!(n.stats().announcements, 1);

        let queued = n.scheduler().get(&id).unwrap();
        let frame = MeshFrame::parse(&queued.frame, &ChannelKey::default()).unwrap();
        match PortRegistry::standard().decode_application(frame.envelope.as_ref().unwrap()) {
            Some(crate::mesh::envelope::ApplicationPayload::NodeInfo(user)) => assert_eq!(user.id, "!00000006"),
            other => panic!("expected NodeInfo, got {:?}", other),
        }

        // Counts as this interval's announcement
        assert!(!n.scheduler().announce_due(Instant::now()));
    }

    #[test]
    fn test_empty_registry_skips_directory_updates() {
        let mut n = node(1).with_registry(PortRegistry::empty());
        let bytes = hex::decode(TEXT_FRAME).unwrap();
        assert_eq!(n.handle_frame(&bytes, Instant::now()), FrameOutcome::Accepted { forwarded: true });
        assert!(n.directory().get(&NodeId::from_u32(0xbba88770)).is_none());
    }

    #[test]
    fn test_cycle_announces_then_sends() {
        let mut n = node(5);
        let mut radio = MockRadio::new();

        // Idle queue and no prior announcement: queue a NodeInfo
        n.cycle(&mut radio).unwrap();
        assert_eq!(n.stats().announcements, 1);
        assert!(radio.sent().is_empty());

        // Next cycle puts it on the air
        n.cycle(&mut radio).unwrap();
        assert_eq!(radio.sent().len(), 1);

        let key = ChannelKey::default();
        let frame = MeshFrame::parse(&radio.sent()[0], &key).unwrap();
        assert_eq!(frame.sender(), NodeId::from_u32(5));
        assert_eq!(frame.header.channel_hash, 0x08);
        let payload = PortRegistry::standard().decode_application(frame.envelope.as_ref().unwrap());
        assert!(matches!(payload, Some(crate::mesh::envelope::ApplicationPayload::NodeInfo(_))));
    }

    #[test]
    fn test_crc_error_falls_through_to_transmit() {
        let mut n = node(5);
        let mut radio = MockRadio::new();
        radio.push_crc_error();
        n.send_text(NodeId::BROADCAST, "x");
        n.cycle(&mut radio).unwrap();
        assert_eq!(n.stats().crc_errors, 1);
        assert_eq!(radio.sent().len(), 1);
    }

    #[test]
    fn test_radio_fault_is_fatal() {
        let mut n = node(5);
        let mut radio = MockRadio::new();
        radio.push_fault("spi bus gone");
        let stop = AtomicBool::new(false);
        let err = n.run(&mut radio, &stop).unwrap_err();
        assert!(err.to_string().contains("spi bus gone"));
    }

    #[test]
    fn test_run_honours_stop_flag() {
        let mut n = node(5);
        let mut radio = MockRadio::new();
        let stop = AtomicBool::new(true);
        n.run(&mut radio, &stop).unwrap();
        assert_eq!(n.stats(), MeshStats::default());
    }
}
