//! Envelope and application payload decoding
//!
//! Decoding is layered. The decrypted frame payload is first parsed as a
//! `Data` envelope; the envelope's port number then selects a decoder for
//! the inner bytes. Either layer may come back empty without affecting the
//! other: a frame with an envelope but an unreadable application payload
//! is still a perfectly good frame for flooding and acknowledgement.

use super::packet::NodeId;
use super::proto::{Data, PortNum, Position, User};
use prost::Message;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Decoded `Data` envelope
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope {
    /// Raw port number; values outside [`PortNum`] are kept as-is
    pub port: i32,
    pub payload: Vec<u8>,
    pub want_response: bool,
    pub dest: u32,
    pub source: u32,
    pub request_id: u32,
    pub reply_id: u32,
    pub emoji: u32,
    pub bitfield: Option<u32>,
}

impl Envelope {
    /// Envelope for a given port with no metadata
    pub fn new(port: PortNum, payload: Vec<u8>) -> Self {
        Self {
            port: port as i32,
            payload,
            ..Default::default()
        }
    }

    /// TEXT_MESSAGE_APP envelope
    pub fn text(text: &str) -> Self {
        Self::new(PortNum::TextMessageApp, text.as_bytes().to_vec())
    }

    /// POSITION_APP envelope from degrees and meters
    pub fn position(latitude: f64, longitude: f64, altitude: Option<i32>) -> Self {
        let position = Position {
            latitude_i: Some(degrees_to_wire(latitude)),
            longitude_i: Some(degrees_to_wire(longitude)),
            altitude,
            time: 0,
        };
        Self::new(PortNum::PositionApp, position.encode_to_vec())
    }

    /// NODEINFO_APP envelope announcing a node's identity
    pub fn node_info(info: &NodeInfoPayload) -> Self {
        let user = User {
            id: info.id.clone(),
            long_name: info.long_name.clone(),
            short_name: info.short_name.clone(),
            macaddr: info.mac_address.clone(),
            hw_model: info.hardware_model,
            is_licensed: false,
            role: 0,
            public_key: info.public_key.clone(),
        };
        Self::new(PortNum::NodeinfoApp, user.encode_to_vec())
    }

    /// Port as a known enumeration value
    pub fn port_num(&self) -> Option<PortNum> {
        PortNum::try_from(self.port).ok()
    }

    /// Serialize to protobuf wire bytes
    pub fn encode(&self) -> Vec<u8> {
        Data {
            portnum: self.port,
            payload: self.payload.clone(),
            want_response: self.want_response,
            dest: self.dest,
            source: self.source,
            request_id: self.request_id,
            reply_id: self.reply_id,
            emoji: self.emoji,
            bitfield: self.bitfield,
        }
        .encode_to_vec()
    }
}

impl From<Data> for Envelope {
    fn from(data: Data) -> Self {
        Self {
            port: data.portnum,
            payload: data.payload,
            want_response: data.want_response,
            dest: data.dest,
            source: data.source,
            request_id: data.request_id,
            reply_id: data.reply_id,
            emoji: data.emoji,
            bitfield: data.bitfield,
        }
    }
}

/// Parse decrypted frame bytes as an envelope
///
/// Returns `None` for anything that is not a well-formed `Data` message,
/// which is the normal outcome for traffic under a different key.
pub fn decode(plaintext: &[u8]) -> Option<Envelope> {
    Data::decode(plaintext).ok().map(Envelope::from)
}

/// Identity fields carried by NODEINFO_APP
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeInfoPayload {
    pub id: String,
    pub long_name: String,
    pub short_name: String,
    pub mac_address: Vec<u8>,
    pub hardware_model: i32,
    pub public_key: Vec<u8>,
}

/// Typed application payload
#[derive(Debug, Clone, PartialEq)]
pub enum ApplicationPayload {
    Position {
        latitude: Option<f64>,
        longitude: Option<f64>,
        altitude: Option<i32>,
    },
    NodeInfo(NodeInfoPayload),
    TextMessage(Vec<u8>),
}

impl ApplicationPayload {
    /// Text content, lossily decoded, for text messages
    pub fn text(&self) -> Option<String> {
        match self {
            ApplicationPayload::TextMessage(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            _ => None,
        }
    }
}

/// Decoder for one application port
pub type PortDecoder = fn(&[u8]) -> Option<ApplicationPayload>;

/// Immutable mapping from port number to payload decoder
///
/// Built once at startup and shared by reference.
#[derive(Debug, Clone)]
pub struct PortRegistry {
    decoders: HashMap<i32, PortDecoder>,
}

impl PortRegistry {
    /// Registry with no decoders
    pub fn empty() -> Self {
        Self { decoders: HashMap::new() }
    }

    /// Registry for the ports a node understands: text, position, nodeinfo
    pub fn standard() -> Self {
        Self::empty()
            .with(PortNum::TextMessageApp, decode_text)
            .with(PortNum::PositionApp, decode_position)
            .with(PortNum::NodeinfoApp, decode_node_info)
    }

    /// Add a decoder, replacing any existing one for the port
    pub fn with(mut self, port: PortNum, decoder: PortDecoder) -> Self {
        self.decoders.insert(port as i32, decoder);
        self
    }

    pub fn handles(&self, port: i32) -> bool {
        self.decoders.contains_key(&port)
    }

    /// Decode the envelope's inner bytes, `None` for unknown ports or bad bytes
    pub fn decode_application(&self, envelope: &Envelope) -> Option<ApplicationPayload> {
        let decoder = self.decoders.get(&envelope.port)?;
        let payload = decoder(&envelope.payload);
        if payload.is_none() {
            tracing::trace!(port = envelope.port, len = envelope.payload.len(), "application payload did not decode");
        }
        payload
    }
}

impl Default for PortRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

fn decode_text(bytes: &[u8]) -> Option<ApplicationPayload> {
    Some(ApplicationPayload::TextMessage(bytes.to_vec()))
}

fn decode_position(bytes: &[u8]) -> Option<ApplicationPayload> {
    let pos = Position::decode(bytes).ok()?;
    Some(ApplicationPayload::Position {
        latitude: pos.latitude_i.map(wire_to_degrees),
        longitude: pos.longitude_i.map(wire_to_degrees),
        altitude: pos.altitude,
    })
}

fn decode_node_info(bytes: &[u8]) -> Option<ApplicationPayload> {
    let user = User::decode(bytes).ok()?;
    Some(ApplicationPayload::NodeInfo(NodeInfoPayload {
        id: user.id,
        long_name: user.long_name,
        short_name: user.short_name,
        mac_address: user.macaddr,
        hardware_model: user.hw_model,
        public_key: user.public_key,
    }))
}

fn wire_to_degrees(value: i32) -> f64 {
    value as f64 * 1e-7
}

fn degrees_to_wire(degrees: f64) -> i32 {
    (degrees * 1e7).round() as i32
}

/// Node id string as carried in `User.id`
pub fn user_id(node: NodeId) -> String {
    node.to_string()
}
