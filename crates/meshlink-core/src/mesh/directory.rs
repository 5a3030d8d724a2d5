//! Node directory
//!
//! Address-keyed table of every node this node has overheard. Entries are
//! created on first use and never removed. Identity and position changes
//! are written through to a [`NodeStore`]; text messages stay in memory.
//!
//! Readers never touch the table directly. Each change is published as a
//! [`DirectoryEvent`] on an unbounded channel, and a reader (CLI, UI)
//! folds those events into its own snapshot.

use super::envelope::{ApplicationPayload, Envelope};
use super::packet::NodeId;
use super::store::NodeStore;
use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::SystemTime;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Persisted state of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub address: NodeId,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub long_name: Option<String>,
    #[serde(default)]
    pub mac_address: Option<Vec<u8>>,
    #[serde(default)]
    pub hardware_model: Option<i32>,
    #[serde(default)]
    pub public_key: Option<Vec<u8>>,
    /// Degrees
    #[serde(default)]
    pub latitude: Option<f64>,
    /// Degrees
    #[serde(default)]
    pub longitude: Option<f64>,
    /// Meters
    #[serde(default)]
    pub altitude: Option<i32>,
}

impl NodeRecord {
    /// Record with only an address
    pub fn new(address: NodeId) -> Self {
        Self {
            address,
            short_name: None,
            long_name: None,
            mac_address: None,
            hardware_model: None,
            public_key: None,
            latitude: None,
            longitude: None,
            altitude: None,
        }
    }

    /// Best human-readable name available
    pub fn display_name(&self) -> String {
        self.long_name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| self.short_name.clone().filter(|n| !n.is_empty()))
            .unwrap_or_else(|| self.address.to_string())
    }
}

/// A text message heard on the mesh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub sender: NodeId,
    pub dest: NodeId,
    pub text: String,
    pub observed_at: SystemTime,
}

/// A node and the messages it has sent
#[derive(Debug, Clone)]
pub struct Node {
    pub record: NodeRecord,
    /// Oldest first
    pub messages: Vec<Message>,
}

impl Node {
    pub fn new(address: NodeId) -> Self {
        Self {
            record: NodeRecord::new(address),
            messages: Vec::new(),
        }
    }

    pub fn address(&self) -> NodeId {
        self.record.address
    }
}

/// Change notification for directory readers
#[derive(Debug, Clone, PartialEq)]
pub enum DirectoryEvent {
    NodeUpdated(NodeRecord),
    MessageReceived(Message),
}

/// Create the event channel a directory publishes on
pub fn event_channel() -> (UnboundedSender<DirectoryEvent>, UnboundedReceiver<DirectoryEvent>) {
    tokio::sync::mpsc::unbounded_channel()
}

/// Reader-side copy of the directory, rebuilt from events
#[derive(Debug, Default, Clone)]
pub struct DirectorySnapshot {
    pub nodes: HashMap<NodeId, NodeRecord>,
    pub messages: Vec<Message>,
}

impl DirectorySnapshot {
    pub fn apply(&mut self, event: DirectoryEvent) {
        match event {
            DirectoryEvent::NodeUpdated(record) => {
                self.nodes.insert(record.address, record);
            }
            DirectoryEvent::MessageReceived(message) => self.messages.push(message),
        }
    }

    /// Drain every event currently queued on `rx`
    pub fn drain(&mut self, rx: &mut UnboundedReceiver<DirectoryEvent>) -> usize {
        let mut count = 0;
        while let Ok(event) = rx.try_recv() {
            self.apply(event);
            count += 1;
        }
        count
    }
}

/// Address-keyed node table, single writer
pub struct NodeDirectory {
    nodes: HashMap<NodeId, Node>,
    store: Box<dyn NodeStore>,
    events: Option<UnboundedSender<DirectoryEvent>>,
}

impl NodeDirectory {
    pub fn new(store: Box<dyn NodeStore>) -> Self {
        Self {
            nodes: HashMap::new(),
            store,
            events: None,
        }
    }

    /// Publish changes on `events`
    pub fn with_events(mut self, events: UnboundedSender<DirectoryEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Load every stored record into the table, returning how many
    pub fn restore(&mut self) -> Result<usize, StoreError> {
        let records = self.store.load_all()?;
        let count = records.len();
        for record in records {
            let address = record.address;
            self.get_or_create(address).record = record;
        }
        tracing::debug!(records = count, "restored node directory");
        Ok(count)
    }

    /// Entry for `address`, inserted empty if unseen
    pub fn get_or_create(&mut self, address: NodeId) -> &mut Node {
        self.nodes.entry(address).or_insert_with(|| Node::new(address))
    }

    pub fn get(&self, address: &NodeId) -> Option<&Node> {
        self.nodes.get(address)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Fold a decoded frame into the table
    ///
    /// Position and NodeInfo payloads update the sender's record and are
    /// persisted. Text messages are appended to the sender's history. A
    /// missing payload or any other port changes nothing.
    pub fn apply(
        &mut self,
        envelope: &Envelope,
        payload: Option<&ApplicationPayload>,
        sender: NodeId,
        dest: NodeId,
        observed_at: SystemTime,
    ) -> Option<DirectoryEvent> {
        let event = match payload? {
            ApplicationPayload::Position { latitude, longitude, altitude } => {
                let node = self.get_or_create(sender);
                node.record.latitude = *latitude;
                node.record.longitude = *longitude;
                node.record.altitude = *altitude;
                let record = node.record.clone();
                self.persist(&record);
                tracing::info!(sender = %sender, lat = ?latitude, lon = ?longitude, "position update");
                DirectoryEvent::NodeUpdated(record)
            }
            ApplicationPayload::NodeInfo(info) => {
                let node = self.get_or_create(sender);
                node.record.long_name = Some(info.long_name.clone());
                node.record.short_name = Some(info.short_name.clone());
                node.record.mac_address = Some(info.mac_address.clone());
                node.record.hardware_model = Some(info.hardware_model);
                node.record.public_key = Some(info.public_key.clone());
                let record = node.record.clone();
                self.persist(&record);
                tracing::info!(sender = %sender, name = %info.long_name, "node info update");
                DirectoryEvent::NodeUpdated(record)
            }
            ApplicationPayload::TextMessage(bytes) => {
                let message = Message {
                    sender,
                    dest,
                    text: String::from_utf8_lossy(bytes).into_owned(),
                    observed_at,
                };
                tracing::info!(sender = %sender, dest = %dest, port = envelope.port, "text message: {}", message.text);
                self.record_message(message.clone());
                DirectoryEvent::MessageReceived(message)
            }
        };
        self.publish(event.clone());
        Some(event)
    }

    /// Append a message to its sender's history
    pub fn record_message(&mut self, message: Message) {
        self.get_or_create(message.sender).messages.push(message);
    }

    /// Record and publish a message this node originated
    pub fn record_sent(&mut self, message: Message) {
        self.record_message(message.clone());
        self.publish(DirectoryEvent::MessageReceived(message));
    }

    fn persist(&mut self, record: &NodeRecord) {
        if let Err(e) = self.store.upsert(record) {
            tracing::warn!(address = %record.address, "failed to persist node record: {}", e);
        }
    }

    fn publish(&self, event: DirectoryEvent) {
        if let Some(tx) = &self.events {
            // A dropped reader is not an error for the writer
            let _ = tx.send(event);
        }
    }
}

impl std::fmt::Debug for NodeDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeDirectory")
            .field("nodes", &self.nodes.len())
            .field("publishing", &self.events.is_some())
            .finish()
    }
}
