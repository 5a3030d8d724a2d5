//! Mesh Node Engine
//!
//! Everything a node needs to take part in a flooded, channel-encrypted
//! packet-radio mesh:
//!
//! - **Packet**: 16-byte header framing, forwarding flags
//! - **Crypto**: AES-CTR channel keys with the per-packet nonce
//! - **Proto / Envelope**: `Data` envelope and per-port application decoding
//! - **Directory**: table of overheard nodes, persisted through a store
//! - **Scheduler**: retransmission queue, duplicate and ack detection
//! - **Node**: the receive / maintain / transmit loop over a radio
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                               MeshNode                                   │
//! │  send_text / send_position / announce          DirectoryEvent ──▶ readers│
//! └─────────────────────────────────────────────────────────────────────────┘
//!          │ outbound                               ▲ inbound
//!          ▼                                        │
//! ┌──────────────────────┐   ┌──────────────────────┴──────────────────────┐
//! │   MeshFrame::build   │   │  MeshFrame::parse → envelope::decode        │
//! │  (encrypt + frame)   │   │  → PortRegistry → NodeDirectory::apply      │
//! └──────────────────────┘   └─────────────────────────────────────────────┘
//!          │                                        │ first sighting
//!          ▼                                        ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          FloodScheduler                                  │
//! │   on_frame (ack / duplicate / first)   maintain   select_transmit        │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            Radio trait                                   │
//! │    receive      await_reception      read_payload      send              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod crypto;
pub mod directory;
pub mod envelope;
pub mod node;
pub mod packet;
pub mod proto;
pub mod radio;
pub mod scheduler;
pub mod simulation;
pub mod store;

pub use crypto::{ChannelKey, DEFAULT_CHANNEL_NAME, DEFAULT_PSK_BASE64};
pub use directory::{DirectoryEvent, DirectorySnapshot, Message, Node, NodeDirectory, NodeRecord};
pub use envelope::{ApplicationPayload, Envelope, NodeInfoPayload, PortRegistry};
pub use node::{FrameOutcome, MeshNode};
pub use packet::{BuildOptions, FrameHeader, MeshFrame, NodeId, PacketFlags, PacketId, HEADER_SIZE};
pub use proto::PortNum;
pub use radio::{MeshStats, Radio, Reception};
pub use scheduler::{FloodScheduler, SchedulerConfig, Sighting, TransmitDecision, TxState};
pub use simulation::{MockRadio, SharedMedium, SimRadio, Simulation};
pub use store::{JsonFileStore, MemoryStore, NodeStore};
