//! Flood scheduler
//!
//! Owns every frame this node still intends to put on the air, both its
//! own and the ones it relays. A frame stays queued until its retry budget
//! is spent or until another node is heard repeating it, which counts as
//! the acknowledgement of a flood.
//!
//! ```text
//!            echo heard              lookback passed
//!  Pending ──────────────▶ Acked ───────────────────▶ (removed)
//!     │
//!     │ retries spent
//!     ▼
//!  Exhausted ─────────────────────────────────────────▶ (removed)
//! ```
//!
//! All timing decisions take `now` from the caller, so the scheduler can
//! be driven deterministically in tests.

use super::packet::PacketId;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Scheduler timing and retry budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Minimum spacing between two sends of the same frame
    pub retry_interval: Duration,
    /// How long an acknowledged entry is kept before removal
    pub ack_lookback: Duration,
    /// Spacing of self NodeInfo announcements
    pub announce_interval: Duration,
    /// Sends allowed for frames this node originates
    pub origin_retries: u8,
    /// Sends allowed for frames this node relays
    pub forward_retries: u8,
    /// How long a packet id is remembered after its entry is gone
    pub seen_ttl: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(5),
            ack_lookback: Duration::from_secs(30),
            announce_interval: Duration::from_secs(3600),
            origin_retries: 3,
            forward_retries: 2,
            seen_ttl: Duration::from_secs(600),
        }
    }
}

/// Lifecycle state of a queued frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Pending,
    Acked,
    Exhausted,
}

/// A frame waiting for (re)transmission
#[derive(Debug, Clone)]
pub struct PendingTransmission {
    pub packet_id: PacketId,
    pub frame: Vec<u8>,
    pub retries_remaining: u8,
    pub last_sent_at: Option<Instant>,
    pub acked_at: Option<Instant>,
    /// Insertion order, breaks ties between equally old entries
    seq: u64,
}

impl PendingTransmission {
    pub fn state(&self) -> TxState {
        if self.acked_at.is_some() {
            TxState::Acked
        } else if self.retries_remaining == 0 {
            TxState::Exhausted
        } else {
            TxState::Pending
        }
    }

    fn is_candidate(&self) -> bool {
        self.state() == TxState::Pending
    }

    fn is_due(&self, now: Instant, retry_interval: Duration) -> bool {
        match self.last_sent_at {
            None => true,
            Some(sent) => now.saturating_duration_since(sent) > retry_interval,
        }
    }
}

/// Packet ids seen recently, each with the time it was first seen
#[derive(Debug)]
pub struct SeenCache {
    seen: HashMap<PacketId, Instant>,
    ttl: Duration,
}

impl SeenCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: HashMap::new(),
            ttl,
        }
    }

    /// Remember `id`. Returns true if it was not already known.
    pub fn insert(&mut self, id: PacketId, now: Instant) -> bool {
        match self.seen.get(&id) {
            Some(first) if now.saturating_duration_since(*first) <= self.ttl => false,
            _ => {
                self.seen.insert(id, now);
                true
            }
        }
    }

    pub fn contains(&self, id: &PacketId, now: Instant) -> bool {
        self.seen
            .get(id)
            .map(|first| now.saturating_duration_since(*first) <= self.ttl)
            .unwrap_or(false)
    }

    /// Forget ids older than the TTL
    pub fn cleanup(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.seen.retain(|_, first| now.saturating_duration_since(*first) <= ttl);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// What a received packet id means to the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sighting {
    /// Echo of a queued frame, which is now acknowledged
    Ack,
    /// Echo of a queued frame that was already acknowledged
    RepeatAck,
    /// Packet id known from earlier, nothing to do
    Duplicate,
    /// Never seen before, decode and consider forwarding
    First,
}

/// Result of transmit selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransmitDecision {
    /// Put this frame on the air
    Send { packet_id: PacketId, frame: Vec<u8> },
    /// Candidates exist but none has waited out the retry interval
    Wait,
    /// Nothing left to send
    Idle,
}

/// Retransmission queue with duplicate and acknowledgement tracking
#[derive(Debug)]
pub struct FloodScheduler {
    config: SchedulerConfig,
    pending: Vec<PendingTransmission>,
    seen: SeenCache,
    next_seq: u64,
    last_announce: Option<Instant>,
}

impl FloodScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            seen: SeenCache::new(config.seen_ttl),
            config,
            pending: Vec::new(),
            next_seq: 0,
            last_announce: None,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Classify a received packet id
    ///
    /// Acknowledgement is checked first, then the seen cache. Anything
    /// else is a first sighting and is remembered from now on.
    pub fn on_frame(&mut self, packet_id: PacketId, now: Instant) -> Sighting {
        if let Some(entry) = self.pending.iter_mut().find(|e| e.packet_id == packet_id) {
            if entry.acked_at.is_some() {
                return Sighting::RepeatAck;
            }
            entry.acked_at = Some(now);
            tracing::debug!(packet_id = %packet_id, "pending frame acknowledged");
            return Sighting::Ack;
        }
        if self.seen.insert(packet_id, now) {
            Sighting::First
        } else {
            Sighting::Duplicate
        }
    }

    /// Queue a frame this node originated
    pub fn enqueue_origin(&mut self, packet_id: PacketId, frame: Vec<u8>, now: Instant) {
        self.enqueue(packet_id, frame, self.config.origin_retries, now);
    }

    /// Queue a rebroadcast of someone else's frame
    pub fn enqueue_forward(&mut self, packet_id: PacketId, frame: Vec<u8>, now: Instant) {
        self.enqueue(packet_id, frame, self.config.forward_retries, now);
    }

    /// Queue a frame with an explicit send budget
    pub fn enqueue(&mut self, packet_id: PacketId, frame: Vec<u8>, retries: u8, now: Instant) {
        self.seen.insert(packet_id, now);
        let seq = self.next_seq;
        self.next_seq += 1;
        tracing::debug!(packet_id = %packet_id, retries, "frame queued");
        self.pending.push(PendingTransmission {
            packet_id,
            frame,
            retries_remaining: retries,
            last_sent_at: None,
            acked_at: None,
            seq,
        });
    }

    /// Drop finished entries. Returns how many were removed.
    ///
    /// Acked entries go once strictly older than the lookback, whatever
    /// their remaining budget. Unacked entries go once exhausted.
    pub fn maintain(&mut self, now: Instant) -> usize {
        let before = self.pending.len();
        let lookback = self.config.ack_lookback;
        self.pending.retain(|e| match e.acked_at {
            Some(acked) => now.saturating_duration_since(acked) <= lookback,
            None => e.retries_remaining > 0,
        });
        self.seen.cleanup(now);
        let removed = before - self.pending.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = self.pending.len(), "scheduler maintenance");
        }
        removed
    }

    /// Pick the next frame to send, if any
    ///
    /// The candidate waiting longest goes first: never-sent entries, then
    /// the oldest send, ties broken by queue order. It is sent only if it
    /// has waited out the retry interval.
    pub fn select_transmit(&mut self, now: Instant) -> TransmitDecision {
        let retry_interval = self.config.retry_interval;
        let next = self
            .pending
            .iter_mut()
            .filter(|e| e.is_candidate())
            .min_by_key(|e| (e.last_sent_at, e.seq));

        match next {
            None => TransmitDecision::Idle,
            Some(entry) if !entry.is_due(now, retry_interval) => TransmitDecision::Wait,
            Some(entry) => {
                entry.last_sent_at = Some(now);
                entry.retries_remaining -= 1;
                tracing::debug!(
                    packet_id = %entry.packet_id,
                    retries_remaining = entry.retries_remaining,
                    "transmit selected"
                );
                TransmitDecision::Send {
                    packet_id: entry.packet_id,
                    frame: entry.frame.clone(),
                }
            }
        }
    }

    /// True when a self announcement should be originated
    ///
    /// Only asked when transmit selection came back idle. A node that has
    /// never announced is always due.
    pub fn announce_due(&self, now: Instant) -> bool {
        match self.last_announce {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.config.announce_interval,
        }
    }

    pub fn mark_announced(&mut self, now: Instant) {
        self.last_announce = Some(now);
    }

    pub fn pending(&self) -> &[PendingTransmission] {
        &self.pending
    }

    pub fn get(&self, packet_id: &PacketId) -> Option<&PendingTransmission> {
        self.pending.iter().find(|e| e.packet_id == *packet_id)
    }

    pub fn is_seen(&self, packet_id: &PacketId, now: Instant) -> bool {
        self.seen.contains(packet_id, now)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for FloodScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> PacketId {
        PacketId::from_bytes([0, 0, 0, n])
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn sent_id(decision: TransmitDecision) -> PacketId {
        match decision {
            TransmitDecision::Send { packet_id, .. } => packet_id,
            other => panic!("expected a send, got {:?}", other),
        }
    }

    #[test]
    fn test_never_sent_goes_first_in_queue_order() {
        let t0 = Instant::now();
        let mut sched = FloodScheduler::default();
        sched.enqueue_origin(id(1), vec![1], t0);
        sched.enqueue_origin(id(2), vec![2], t0);

        assert_eq!(sent_id(sched.select_transmit(t0)), id(1));
        assert_eq!(sent_id(sched.select_transmit(t0)), id(2));
        // Both sent at t0, neither due yet
        assert_eq!(sched.select_transmit(t0 + secs(1)), TransmitDecision::Wait);
    }

    #[test]
    fn test_retry_interval_is_strict() {
        let t0 = Instant::now();
        let mut sched = FloodScheduler::default();
        sched.enqueue_origin(id(1), vec![1], t0);
        sched.select_transmit(t0);

        assert_eq!(sched.select_transmit(t0 + secs(5)), TransmitDecision::Wait);
        assert_eq!(sent_id(sched.select_transmit(t0 + secs(5) + Duration::from_millis(1))), id(1));
    }

    #[test]
    fn test_retry_exhaustion_after_budget() {
        let t0 = Instant::now();
        let mut sched = FloodScheduler::default();
        sched.enqueue_forward(id(9), vec![9], t0);

        let mut sends = 0;
        let mut now = t0;
        for _ in 0..10 {
            sched.maintain(now);
            if let TransmitDecision::Send { .. } = sched.select_transmit(now) {
                sends += 1;
            }
            now += secs(6);
        }
        assert_eq!(sends, 2);
        assert!(sched.is_empty());
    }

    #[test]
    fn test_ack_is_idempotent() {
        let t0 = Instant::now();
        let mut sched = FloodScheduler::default();
        sched.enqueue_origin(id(1), vec![1], t0);
        sched.select_transmit(t0);

        assert_eq!(sched.on_frame(id(1), t0 + secs(1)), Sighting::Ack);
        assert_eq!(sched.on_frame(id(1), t0 + secs(2)), Sighting::RepeatAck);
        let entry = sched.get(&id(1)).unwrap();
        assert_eq!(entry.acked_at, Some(t0 + secs(1)));
        assert_eq!(entry.state(), TxState::Acked);

        // Acked entries are no longer candidates
        assert_eq!(sched.select_transmit(t0 + secs(20)), TransmitDecision::Idle);
    }

    #[test]
    fn test_ack_lookback_eviction_strictly_after() {
        let t0 = Instant::now();
        let mut sched = FloodScheduler::default();
        sched.enqueue_origin(id(1), vec![1], t0);
        sched.on_frame(id(1), t0);

        assert_eq!(sched.maintain(t0 + secs(30)), 0);
        assert_eq!(sched.len(), 1);
        assert_eq!(sched.maintain(t0 + secs(30) + Duration::from_millis(1)), 1);
        assert!(sched.is_empty());
    }

    #[test]
    fn test_unacked_kept_until_exhausted() {
        let t0 = Instant::now();
        let mut sched = FloodScheduler::default();
        sched.enqueue_origin(id(1), vec![1], t0);
        sched.select_transmit(t0);

        assert_eq!(sched.maintain(t0 + secs(3000)), 0);
        assert_eq!(sched.get(&id(1)).unwrap().retries_remaining, 2);
    }

    #[test]
    fn test_duplicate_after_eviction() {
        let t0 = Instant::now();
        let mut sched = FloodScheduler::default();
        assert_eq!(sched.on_frame(id(3), t0), Sighting::First);
        assert_eq!(sched.on_frame(id(3), t0 + secs(1)), Sighting::Duplicate);

        // Own frame, sent to exhaustion and evicted, still recognised
        sched.enqueue(id(4), vec![4], 1, t0);
        sched.select_transmit(t0);
        sched.maintain(t0 + secs(1));
        assert!(sched.get(&id(4)).is_none());
        assert!(sched.is_seen(&id(4), t0 + secs(2)));
        assert_eq!(sched.on_frame(id(4), t0 + secs(2)), Sighting::Duplicate);

        // Forgotten after the seen TTL
        sched.maintain(t0 + secs(601));
        assert!(!sched.is_seen(&id(3), t0 + secs(601)));
        assert_eq!(sched.on_frame(id(3), t0 + secs(602)), Sighting::First);
    }

    #[test]
    fn test_oldest_send_wins() {
        let t0 = Instant::now();
        let mut sched = FloodScheduler::default();
        sched.enqueue_origin(id(1), vec![1], t0);
        sched.select_transmit(t0);
        sched.enqueue_origin(id(2), vec![2], t0 + secs(2));
        sched.select_transmit(t0 + secs(2));

        assert_eq!(sent_id(sched.select_transmit(t0 + secs(10))), id(1));
        assert_eq!(sent_id(sched.select_transmit(t0 + secs(10))), id(2));
    }

    #[test]
    fn test_announce_due() {
        let t0 = Instant::now();
        let mut sched = FloodScheduler::default();
        assert!(sched.announce_due(t0));
        sched.mark_announced(t0);
        assert!(!sched.announce_due(t0 + secs(3599)));
        assert!(sched.announce_due(t0 + secs(3600)));
    }
}
