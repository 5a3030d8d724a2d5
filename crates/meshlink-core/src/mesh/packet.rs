//! Mesh frame types and framing
//!
//! ## Frame Structure
//!
//! ```text
//! ┌───────────┬───────────┬───────────┬───────┬─────────┬─────────┬─────────┬──────────────┐
//! │ Dest (4B) │ Send (4B) │ PktId (4B)│ Flags │ ChHash  │ NextHop │ Relay   │ Ciphertext   │
//! │           │           │           │ (1B)  │ (1B)    │ (1B)    │ (1B)    │ (0..N B)     │
//! └───────────┴───────────┴───────────┴───────┴─────────┴─────────┴─────────┴──────────────┘
//!
//! Flags:
//! ┌───────────────┬─────────┬─────────┬───────────────┐
//! │ hop_start 7-5 │ mqtt  4 │ ack   3 │ hop_limit 2-0 │
//! └───────────────┴─────────┴─────────┴───────────────┘
//! ```
//!
//! Multi-byte fields are kept as the raw wire bytes. They are only ever
//! compared, copied into the cipher nonce, or rendered for humans.

use super::crypto::ChannelKey;
use super::envelope::{self, Envelope};
use crate::error::FrameError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Size of the fixed frame header
pub const HEADER_SIZE: usize = 16;

/// Hop limit stamped on frames this node originates
pub const DEFAULT_HOP_LIMIT: u8 = 3;

/// Mesh address - 4-byte node identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; 4]);

impl NodeId {
    /// Broadcast address (all 0xFF)
    pub const BROADCAST: NodeId = NodeId([0xFF, 0xFF, 0xFF, 0xFF]);

    /// Create a NodeId from the 4 wire bytes
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        NodeId(bytes)
    }

    /// Create a NodeId from its node number (little-endian on the wire)
    pub fn from_u32(value: u32) -> Self {
        NodeId(value.to_le_bytes())
    }

    /// Node number
    pub fn to_u32(&self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// Generate a random address, never the broadcast one
    pub fn random() -> Self {
        loop {
            let id = NodeId(rand::random());
            if !id.is_broadcast() {
                return id;
            }
        }
    }

    /// Check if this is the broadcast address
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self)
    }
}

/// Canonical `!xxxxxxxx` form of the node number
impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{:08x}", self.to_u32())
    }
}

impl FromStr for NodeId {
    type Err = std::num::ParseIntError;

    /// Accepts `!bba88770`, `0xbba88770` or bare hex
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.trim().trim_start_matches('!').trim_start_matches("0x");
        u32::from_str_radix(hex, 16).map(NodeId::from_u32)
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Packet identifier - random on origination, opaque on receipt
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketId([u8; 4]);

impl PacketId {
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        PacketId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// Fresh random identifier for a frame we originate
    pub fn random() -> Self {
        PacketId(rand::random())
    }
}

impl fmt::Debug for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PacketId({})", self)
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}{:02x}{:02x}{:02x}", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

/// Header flags byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFlags(u8);

impl PacketFlags {
    const HOP_LIMIT_MASK: u8 = 0b0000_0111;
    const WANT_ACK_BIT: u8 = 3;
    const VIA_MQTT_BIT: u8 = 4;
    const HOP_START_SHIFT: u8 = 5;

    /// Assemble flags from their fields; hop counts are truncated to 3 bits
    pub fn new(hop_limit: u8, want_ack: bool, via_mqtt: bool, hop_start: u8) -> Self {
        PacketFlags(
            ((hop_start & 0x07) << Self::HOP_START_SHIFT)
                | ((via_mqtt as u8) << Self::VIA_MQTT_BIT)
                | ((want_ack as u8) << Self::WANT_ACK_BIT)
                | (hop_limit & Self::HOP_LIMIT_MASK),
        )
    }

    /// Remaining permitted forwards
    pub fn hop_limit(&self) -> u8 {
        self.0 & Self::HOP_LIMIT_MASK
    }

    /// Check if acknowledgment is requested
    pub fn want_ack(&self) -> bool {
        (self.0 >> Self::WANT_ACK_BIT) & 1 != 0
    }

    /// Check if frame came through an MQTT gateway
    pub fn via_mqtt(&self) -> bool {
        (self.0 >> Self::VIA_MQTT_BIT) & 1 != 0
    }

    /// Hop count the frame started with
    pub fn hop_start(&self) -> u8 {
        self.0 >> Self::HOP_START_SHIFT
    }

    /// Flags for the forwarded copy of this frame
    ///
    /// The current (pre-decrement) hop limit lands in the hop_start bits.
    /// Nodes on the air pack it this way, so it is kept bit-exact even
    /// though it discards the original hop_start.
    pub fn forwarded(&self) -> Option<PacketFlags> {
        let hop_limit = self.hop_limit();
        if hop_limit == 0 {
            return None;
        }
        Some(PacketFlags::new(hop_limit - 1, self.want_ack(), self.via_mqtt(), hop_limit))
    }

    pub fn as_byte(&self) -> u8 {
        self.0
    }

    pub fn from_byte(byte: u8) -> Self {
        PacketFlags(byte)
    }
}

/// Fixed 16-byte frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub dest: NodeId,
    pub sender: NodeId,
    pub packet_id: PacketId,
    pub flags: PacketFlags,
    pub channel_hash: u8,
    pub next_hop: u8,
    pub relay_node: u8,
}

impl FrameHeader {
    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(self.dest.as_bytes());
        bytes[4..8].copy_from_slice(self.sender.as_bytes());
        bytes[8..12].copy_from_slice(self.packet_id.as_bytes());
        bytes[12] = self.flags.as_byte();
        bytes[13] = self.channel_hash;
        bytes[14] = self.next_hop;
        bytes[15] = self.relay_node;
        bytes
    }

    /// Deserialize header from the start of a frame
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::TooShort { len: bytes.len(), min: HEADER_SIZE });
        }
        let quad = |at: usize| [bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]];
        Ok(Self {
            dest: NodeId::from_bytes(quad(0)),
            sender: NodeId::from_bytes(quad(4)),
            packet_id: PacketId::from_bytes(quad(8)),
            flags: PacketFlags::from_byte(bytes[12]),
            channel_hash: bytes[13],
            next_hop: bytes[14],
            relay_node: bytes[15],
        })
    }
}

/// Options for frames this node originates
#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    pub hop_limit: u8,
    pub want_ack: bool,
    pub via_mqtt: bool,
    pub channel_hash: u8,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            hop_limit: DEFAULT_HOP_LIMIT,
            want_ack: false,
            via_mqtt: false,
            channel_hash: 0,
        }
    }
}

/// A frame ready for the transmit queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub packet_id: PacketId,
    pub bytes: Vec<u8>,
}

/// A received frame with its decrypted payload
#[derive(Debug, Clone)]
pub struct MeshFrame {
    pub header: FrameHeader,
    /// Ciphertext exactly as received, forwarded untouched
    pub encrypted_payload: Vec<u8>,
    /// Keystream applied to the ciphertext
    pub plaintext: Vec<u8>,
    /// Present only when the plaintext parsed as an envelope
    pub envelope: Option<Envelope>,
}

impl MeshFrame {
    /// Slice the header, decrypt the payload and try to decode an envelope
    ///
    /// Only a frame shorter than the header fails. A payload that does not
    /// decode (wrong key, noise, another channel) still yields a frame,
    /// usable for duplicate detection and rebroadcast.
    pub fn parse(bytes: &[u8], key: &ChannelKey) -> Result<Self, FrameError> {
        let header = FrameHeader::from_bytes(bytes)?;
        let encrypted_payload = bytes[HEADER_SIZE..].to_vec();
        let plaintext = key.transform(header.packet_id, header.sender, &encrypted_payload);
        let envelope = envelope::decode(&plaintext);
        if envelope.is_none() {
            tracing::trace!(packet_id = %header.packet_id, sender = %header.sender, "payload did not decode as an envelope");
        }
        Ok(Self { header, encrypted_payload, plaintext, envelope })
    }

    /// Frame a new envelope under a fresh random packet id
    pub fn build(
        dest: NodeId,
        sender: NodeId,
        envelope: &Envelope,
        key: &ChannelKey,
        options: &BuildOptions,
    ) -> OutboundFrame {
        Self::build_with_id(PacketId::random(), dest, sender, envelope, key, options)
    }

    /// Frame a new envelope under a caller-chosen packet id
    pub fn build_with_id(
        packet_id: PacketId,
        dest: NodeId,
        sender: NodeId,
        envelope: &Envelope,
        key: &ChannelKey,
        options: &BuildOptions,
    ) -> OutboundFrame {
        let header = FrameHeader {
            dest,
            sender,
            packet_id,
            flags: PacketFlags::new(options.hop_limit, options.want_ack, options.via_mqtt, options.hop_limit),
            channel_hash: options.channel_hash,
            next_hop: 0,
            relay_node: 0,
        };
        let mut payload = envelope.encode();
        key.apply_keystream(packet_id, sender, &mut payload);

        let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
        bytes.extend_from_slice(&header.to_bytes());
        bytes.extend_from_slice(&payload);
        OutboundFrame { packet_id, bytes }
    }

    /// Forwarded copy of this frame, or `None` once the hop limit is spent
    ///
    /// The ciphertext is carried over byte for byte; only the flags change.
    pub fn rebroadcast(&self) -> Option<Vec<u8>> {
        let flags = self.header.flags.forwarded()?;
        let header = FrameHeader { flags, ..self.header };
        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.encrypted_payload.len());
        bytes.extend_from_slice(&header.to_bytes());
        bytes.extend_from_slice(&self.encrypted_payload);
        Some(bytes)
    }

    /// Re-serialize the frame as received
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.header.to_bytes().to_vec();
        bytes.extend_from_slice(&self.encrypted_payload);
        bytes
    }

    pub fn packet_id(&self) -> PacketId {
        self.header.packet_id
    }

    pub fn sender(&self) -> NodeId {
        self.header.sender
    }

    pub fn dest(&self) -> NodeId {
        self.header.dest
    }

    pub fn hop_limit(&self) -> u8 {
        self.header.flags.hop_limit()
    }
}
