//! Radio transceiver contract and node statistics
//!
//! The node drives any half-duplex packet radio through [`Radio`]. The
//! calls mirror a typical LoRa transceiver: arm the receiver, block until
//! the IRQ reports an outcome, read the FIFO, transmit. Implementations
//! live outside this crate apart from the simulated radios in
//! [`super::simulation`].

use crate::error::RadioError;
use serde::Serialize;
use std::time::Duration;

/// Outcome of waiting for a reception
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reception {
    /// A frame passed the radio's CRC; fetch it with [`Radio::read_payload`]
    Ok,
    /// Something was heard but failed CRC
    CrcError,
    /// Nothing arrived before the timeout
    Timeout,
}

/// Half-duplex packet radio
///
/// Every method may block. An `Err` means the transceiver is unusable and
/// ends the node's processing loop.
pub trait Radio {
    /// Put the transceiver into receive mode
    fn receive(&mut self) -> Result<(), RadioError>;

    /// Block until a frame arrives, a CRC error is flagged or `timeout` passes
    fn await_reception(&mut self, timeout: Duration) -> Result<Reception, RadioError>;

    /// Frame bytes of the last successful reception
    fn read_payload(&mut self) -> Result<Vec<u8>, RadioError>;

    /// Transmit one frame, returning once it is on the air
    fn send(&mut self, frame: &[u8]) -> Result<(), RadioError>;
}

impl<R: Radio + ?Sized> Radio for Box<R> {
    fn receive(&mut self) -> Result<(), RadioError> {
        (**self).receive()
    }

    fn await_reception(&mut self, timeout: Duration) -> Result<Reception, RadioError> {
        (**self).await_reception(timeout)
    }

    fn read_payload(&mut self) -> Result<Vec<u8>, RadioError> {
        (**self).read_payload()
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), RadioError> {
        (**self).send(frame)
    }
}

/// Counters for node operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MeshStats {
    /// Frames read from the radio
    pub frames_rx: u64,
    /// Receptions that failed CRC
    pub crc_errors: u64,
    /// Frames too short to carry a header
    pub malformed: u64,
    /// Frames whose packet id was already known
    pub duplicates: u64,
    /// Pending entries acknowledged by an echo
    pub acks: u64,
    /// Frames queued for rebroadcast
    pub forwarded: u64,
    /// First sightings not forwarded because the hop limit was spent
    pub hop_limit_drops: u64,
    /// Frames put on the air
    pub frames_tx: u64,
    /// Self announcements originated
    pub announcements: u64,
}
