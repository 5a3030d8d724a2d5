//! # meshlink core
//!
//! Node engine for Meshtastic-compatible packet-radio meshes. It frames
//! and encrypts small datagrams, floods them with a hop limit over a
//! half-duplex radio, and keeps a directory of every node it overhears.
//!
//! ## Frame Flow
//!
//! ```text
//! RX: Radio → parse header → AES-CTR → Data envelope → port decoder → directory
//!                                   ↘ scheduler: ack / duplicate / rebroadcast
//! TX: envelope → encode → AES-CTR → header → scheduler queue → Radio
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use meshlink_core::config::NodeConfig;
//! use meshlink_core::mesh::{MeshNode, MemoryStore, MockRadio, NodeId};
//!
//! let config = NodeConfig::default();
//! let mut node = MeshNode::new(&config, Box::new(MemoryStore::new())).unwrap();
//! node.send_text(NodeId::BROADCAST, "hello mesh");
//!
//! let mut radio = MockRadio::new();
//! node.cycle(&mut radio).unwrap();
//! ```

pub mod config;
pub mod error;
pub mod mesh;

pub use config::{NodeConfig, TimingConfig};
pub use error::{MeshError, MeshResult};
pub use mesh::{ChannelKey, Envelope, MeshFrame, MeshNode, NodeId};
