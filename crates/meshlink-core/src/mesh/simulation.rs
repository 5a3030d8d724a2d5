//! In-process mesh simulation
//!
//! Radios that need no hardware:
//!
//! - [`SharedMedium`] + [`SimRadio`]: several nodes on one simulated
//!   channel. A send lands in the inbox of every radio linked to the
//!   sender, either all of them or only the line neighbours.
//! - [`MockRadio`]: a single radio replaying scripted receptions and
//!   recording what was sent, for deterministic node tests.
//!
//! [`Simulation`] drives a set of [`MeshNode`]s over a shared medium one
//! cycle at a time.
//!
//! ## Example
//!
//! ```ignore
//! use meshlink_core::mesh::simulation::Simulation;
//!
//! let mut sim = Simulation::line(4)?;
//! sim.send_text(0, "hello");
//! sim.run(10)?;
//! assert!(sim.node(3).map_or(0, |n| n.directory().len()) > 1);
//! ```

use super::node::MeshNode;
use super::packet::NodeId;
use super::radio::{MeshStats, Radio, Reception};
use super::store::MemoryStore;
use crate::config::NodeConfig;
use crate::error::{MeshResult, RadioError};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct MediumState {
    inboxes: Vec<VecDeque<Vec<u8>>>,
    /// Undirected links; `None` means every radio hears every other
    links: Option<HashSet<(usize, usize)>>,
    transmissions: u64,
}

impl MediumState {
    fn linked(&self, a: usize, b: usize) -> bool {
        match &self.links {
            None => a != b,
            Some(links) => links.contains(&(a.min(b), a.max(b))),
        }
    }
}

/// Simulated broadcast channel
#[derive(Debug, Clone, Default)]
pub struct SharedMedium {
    inner: Arc<Mutex<MediumState>>,
}

impl SharedMedium {
    /// Medium where every radio hears every other
    pub fn new() -> Self {
        Self::default()
    }

    /// Medium where radio `i` hears only `i - 1` and `i + 1`
    pub fn line(count: usize) -> Self {
        let medium = Self::new();
        {
            let mut links = HashSet::new();
            for i in 1..count {
                links.insert((i - 1, i));
            }
            if let Ok(mut state) = medium.inner.lock() {
                state.links = Some(links);
            }
        }
        medium
    }

    /// Add a link between two radios, switching to explicit topology
    pub fn connect(&self, a: usize, b: usize) -> Result<(), RadioError> {
        let mut state = self.lock()?;
        state.links.get_or_insert_with(HashSet::new).insert((a.min(b), a.max(b)));
        Ok(())
    }

    /// New radio on this medium; radios are numbered in attach order
    pub fn attach(&self) -> Result<SimRadio, RadioError> {
        let mut state = self.lock()?;
        state.inboxes.push(VecDeque::new());
        Ok(SimRadio {
            index: state.inboxes.len() - 1,
            medium: self.clone(),
            last: None,
        })
    }

    /// Total sends since creation
    pub fn transmissions(&self) -> u64 {
        self.inner.lock().map(|s| s.transmissions).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, MediumState>, RadioError> {
        self.inner
            .lock()
            .map_err(|_| RadioError::Fault("simulated medium lock poisoned".into()))
    }
}

/// Radio attached to a [`SharedMedium`]
///
/// Never blocks: an empty inbox is an immediate timeout.
#[derive(Debug)]
pub struct SimRadio {
    index: usize,
    medium: SharedMedium,
    last: Option<Vec<u8>>,
}

impl SimRadio {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Radio for SimRadio {
    fn receive(&mut self) -> Result<(), RadioError> {
        Ok(())
    }

    fn await_reception(&mut self, _timeout: Duration) -> Result<Reception, RadioError> {
        let mut state = self.medium.lock()?;
        match state.inboxes.get_mut(self.index).and_then(|q| q.pop_front()) {
            Some(frame) => {
                self.last = Some(frame);
                Ok(Reception::Ok)
            }
            None => Ok(Reception::Timeout),
        }
    }

    fn read_payload(&mut self) -> Result<Vec<u8>, RadioError> {
        self.last
            .take()
            .ok_or_else(|| RadioError::NoPayload(format!("sim radio {} has no reception", self.index)))
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), RadioError> {
        let mut state = self.medium.lock()?;
        state.transmissions += 1;
        for to in 0..state.inboxes.len() {
            if state.linked(self.index, to) {
                state.inboxes[to].push_back(frame.to_vec());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Scripted {
    Frame(Vec<u8>),
    CrcError,
    Fault(String),
}

/// Radio that replays a script of receptions
///
/// Once the script runs out every wait is a timeout.
#[derive(Debug, Default)]
pub struct MockRadio {
    script: VecDeque<Scripted>,
    last: Option<Vec<u8>>,
    sent: Vec<Vec<u8>>,
}

impl MockRadio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successfully received frame
    pub fn push_frame(&mut self, frame: impl Into<Vec<u8>>) {
        self.script.push_back(Scripted::Frame(frame.into()));
    }

    pub fn push_crc_error(&mut self) {
        self.script.push_back(Scripted::CrcError);
    }

    /// Queue a hardware fault
    pub fn push_fault(&mut self, reason: &str) {
        self.script.push_back(Scripted::Fault(reason.to_string()));
    }

    /// Frames sent so far, oldest first
    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl Radio for MockRadio {
    fn receive(&mut self) -> Result<(), RadioError> {
        Ok(())
    }

    fn await_reception(&mut self, _timeout: Duration) -> Result<Reception, RadioError> {
        match self.script.pop_front() {
            None => Ok(Reception::Timeout),
            Some(Scripted::CrcError) => Ok(Reception::CrcError),
            Some(Scripted::Fault(reason)) => Err(RadioError::Fault(reason)),
            Some(Scripted::Frame(frame)) => {
                self.last = Some(frame);
                Ok(Reception::Ok)
            }
        }
    }

    fn read_payload(&mut self) -> Result<Vec<u8>, RadioError> {
        self.last
            .take()
            .ok_or_else(|| RadioError::NoPayload("no scripted frame pending".into()))
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), RadioError> {
        self.sent.push(frame.to_vec());
        Ok(())
    }
}

/// Several nodes cycling over one [`SharedMedium`]
#[derive(Debug)]
pub struct Simulation {
    medium: SharedMedium,
    nodes: Vec<MeshNode>,
    radios: Vec<SimRadio>,
    steps: u64,
}

impl Simulation {
    /// Fully connected simulation with default node settings
    pub fn full(count: usize) -> MeshResult<Self> {
        Self::with_medium(SharedMedium::new(), count, &NodeConfig::default())
    }

    /// Line topology: messages must be relayed hop by hop
    pub fn line(count: usize) -> MeshResult<Self> {
        Self::with_medium(SharedMedium::line(count), count, &NodeConfig::default())
    }

    /// Nodes `!00000001..` built from `base`, one per radio
    pub fn with_medium(medium: SharedMedium, count: usize, base: &NodeConfig) -> MeshResult<Self> {
        let mut nodes = Vec::with_capacity(count);
        let mut radios = Vec::with_capacity(count);
        for i in 0..count {
            let n = i as u32 + 1;
            let config = NodeConfig {
                address: Some(NodeId::from_u32(n).to_string()),
                short_name: format!("N{}", n),
                long_name: format!("sim node {}", n),
                ..base.clone()
            };
            nodes.push(MeshNode::new(&config, Box::new(MemoryStore::new()))?);
            radios.push(medium.attach()?);
        }
        Ok(Self { medium, nodes, radios, steps: 0 })
    }

    /// One cycle of every node, in index order
    pub fn step(&mut self) -> MeshResult<()> {
        for (node, radio) in self.nodes.iter_mut().zip(self.radios.iter_mut()) {
            node.cycle(radio)?;
        }
        self.steps += 1;
        Ok(())
    }

    pub fn run(&mut self, steps: u64) -> MeshResult<()> {
        for _ in 0..steps {
            self.step()?;
        }
        Ok(())
    }

    /// Broadcast a text from node `from`
    pub fn send_text(&mut self, from: usize, text: &str) -> Option<super::packet::PacketId> {
        self.nodes.get_mut(from).map(|n| n.send_text(NodeId::BROADCAST, text))
    }

    pub fn node(&self, index: usize) -> Option<&MeshNode> {
        self.nodes.get(index)
    }

    pub fn nodes(&self) -> &[MeshNode] {
        &self.nodes
    }

    pub fn medium(&self) -> &SharedMedium {
        &self.medium
    }

    pub fn step_count(&self) -> u64 {
        self.steps
    }

    /// Stats of every node, summed
    pub fn total_stats(&self) -> MeshStats {
        self.nodes.iter().map(|n| n.stats()).fold(MeshStats::default(), |mut acc, s| {
            acc.frames_rx += s.frames_rx;
            acc.crc_errors += s.crc_errors;
            acc.malformed += s.malformed;
            acc.duplicates += s.duplicates;
            acc.acks += s.acks;
            acc.forwarded += s.forwarded;
            acc.hop_limit_drops += s.hop_limit_drops;
            acc.frames_tx += s.frames_tx;
            acc.announcements += s.announcements;
            acc
        })
    }
}
