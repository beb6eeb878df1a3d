//! Sequenced reliable-delivery overlay on top of an unreliable transport:
//! outbound retransmission with an acked-watermark and bounded retries, and
//! inbound ordered delivery with out-of-order buffering and duplicate
//! rejection.
//!
//! This does not talk to any transport directly; it is pure sequencing and
//! timer bookkeeping, driven by whatever feeds it outbound payloads and
//! inbound `(sequence, payload)` pairs and polls it on a tick. The packet
//! envelope that carries `sequence`/`ack` on the wire lives in [`crate::packet`].

use std::collections::{BTreeMap, VecDeque};

use crate::error::ReplicationError;

/// Tunables for [`ReliableChannel`].
#[derive(Debug, Clone, Copy)]
pub struct ReliableChannelConfig {
    /// Milliseconds to wait for an ack before retransmitting.
    pub retransmit_interval_ms: f64,
    /// Maximum retransmit attempts before a message is abandoned.
    pub max_retries: u32,
    /// Out-of-order inbound messages are buffered up to this many entries
    /// ahead of the expected sequence before the oldest buffered entry is
    /// dropped to make room.
    pub max_reorder_buffer: usize,
    /// Size of the recently-delivered sequence set used to reject duplicate
    /// deliveries after the in-order cursor has already passed them.
    pub duplicate_window: usize,
}

impl Default for ReliableChannelConfig {
    fn default() -> Self {
        Self {
            retransmit_interval_ms: 500.0,
            max_retries: 5,
            max_reorder_buffer: 128,
            duplicate_window: 1000,
        }
    }
}

struct OutboundMessage {
    sequence: u64,
    payload: Vec<u8>,
    sent_at_ms: f64,
    retries: u32,
}

/// Outbound half: tracks unacked messages and decides what to retransmit.
pub struct ReliableSender {
    config: ReliableChannelConfig,
    next_sequence: u64,
    in_flight: VecDeque<OutboundMessage>,
}

impl ReliableSender {
    /// Creates a sender with the given configuration.
    #[must_use]
    pub fn new(config: ReliableChannelConfig) -> Self {
        Self { config, next_sequence: 0, in_flight: VecDeque::new() }
    }

    /// Queues `payload` for reliable delivery, returning its assigned
    /// sequence number.
    pub fn send(&mut self, payload: Vec<u8>, now_ms: f64) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.in_flight.push_back(OutboundMessage { sequence, payload, sent_at_ms: now_ms, retries: 0 });
        sequence
    }

    /// Marks every in-flight message with `sequence <= ack` as delivered and
    /// removes it from retransmit tracking (cumulative ack).
    pub fn acknowledge(&mut self, ack: u64) {
        while let Some(front) = self.in_flight.front() {
            if front.sequence <= ack {
                self.in_flight.pop_front();
            } else {
                break;
            }
        }
    }

    /// Returns payloads due for retransmission at `now_ms`, advancing their
    /// retry counters. A message that exceeds `max_retries` is dropped from
    /// tracking and reported as a [`ReplicationError::ReliableTimeout`].
    pub fn poll_retransmits(&mut self, now_ms: f64) -> (Vec<(u64, Vec<u8>)>, Vec<ReplicationError>) {
        let mut due = Vec::new();
        let mut timeouts = Vec::new();

        let mut remaining = VecDeque::with_capacity(self.in_flight.len());
        while let Some(mut message) = self.in_flight.pop_front() {
            if now_ms - message.sent_at_ms < self.config.retransmit_interval_ms {
                remaining.push_back(message);
                continue;
            }

            message.retries += 1;
            if message.retries > self.config.max_retries {
                timeouts.push(ReplicationError::ReliableTimeout { retries: message.retries });
                continue;
            }

            message.sent_at_ms = now_ms;
            due.push((message.sequence, message.payload.clone()));
            remaining.push_back(message);
        }

        self.in_flight = remaining;
        (due, timeouts)
    }

    /// Number of messages still awaiting an ack.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

/// Result of feeding one inbound message to [`ReliableReceiver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// One or more messages became ready for in-order delivery, in
    /// ascending sequence order (may include the just-received message and
    /// any buffered successors it unblocked).
    Delivered(Vec<(u64, Vec<u8>)>),
    /// The message arrived out of order and was buffered; nothing is ready
    /// for delivery yet.
    Buffered,
    /// The message had already been delivered or was pushed out of the
    /// duplicate window; it is dropped.
    Duplicate,
}

/// Inbound half: reorders and de-duplicates, producing strictly ascending,
/// contiguous, exactly-once delivery to the caller.
pub struct ReliableReceiver {
    config: ReliableChannelConfig,
    next_expected: u64,
    reorder_buffer: BTreeMap<u64, Vec<u8>>,
    delivered_window: VecDeque<u64>,
}

impl ReliableReceiver {
    /// Creates a receiver with the given configuration.
    #[must_use]
    pub fn new(config: ReliableChannelConfig) -> Self {
        Self { config, next_expected: 0, reorder_buffer: BTreeMap::new(), delivered_window: VecDeque::new() }
    }

    /// Feeds one inbound `(sequence, payload)` pair.
    pub fn receive(&mut self, sequence: u64, payload: Vec<u8>) -> DeliveryOutcome {
        if sequence < self.next_expected || self.delivered_window.contains(&sequence) {
            return DeliveryOutcome::Duplicate;
        }

        if sequence != self.next_expected {
            if self.reorder_buffer.contains_key(&sequence) {
                return DeliveryOutcome::Duplicate;
            }
            self.reorder_buffer.insert(sequence, payload);
            while self.reorder_buffer.len() > self.config.max_reorder_buffer {
                if let Some((&oldest, _)) = self.reorder_buffer.iter().next() {
                    self.reorder_buffer.remove(&oldest);
                }
            }
            return DeliveryOutcome::Buffered;
        }

        let mut delivered = vec![(sequence, payload)];
        self.mark_delivered(sequence);
        self.next_expected = sequence + 1;

        while let Some(next_payload) = self.reorder_buffer.remove(&self.next_expected) {
            delivered.push((self.next_expected, next_payload));
            self.mark_delivered(self.next_expected);
            self.next_expected += 1;
        }

        DeliveryOutcome::Delivered(delivered)
    }

    fn mark_delivered(&mut self, sequence: u64) {
        self.delivered_window.push_back(sequence);
        while self.delivered_window.len() > self.config.duplicate_window {
            self.delivered_window.pop_front();
        }
    }

    /// Cumulative ack to report back to the sender: the highest contiguous
    /// sequence received so far.
    #[must_use]
    pub fn ack_watermark(&self) -> u64 {
        self.next_expected.saturating_sub(1)
    }

    /// Number of messages currently buffered awaiting their predecessors.
    #[must_use]
    pub fn buffered_count(&self) -> usize {
        self.reorder_buffer.len()
    }
}

/// Pairs a [`ReliableSender`] and [`ReliableReceiver`] under one config, as
/// used per-connection.
pub struct ReliableChannel {
    /// Outbound half.
    pub sender: ReliableSender,
    /// Inbound half.
    pub receiver: ReliableReceiver,
}

impl ReliableChannel {
    /// Creates a channel with both halves sharing `config`.
    #[must_use]
    pub fn new(config: ReliableChannelConfig) -> Self {
        Self { sender: ReliableSender::new(config), receiver: ReliableReceiver::new(config) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_order_delivery_is_immediate() {
        let mut receiver = ReliableReceiver::new(ReliableChannelConfig::default());
        assert_eq!(receiver.receive(0, vec![1]), DeliveryOutcome::Delivered(vec![(0, vec![1])]));
        assert_eq!(receiver.receive(1, vec![2]), DeliveryOutcome::Delivered(vec![(1, vec![2])]));
    }

    #[test]
    fn reordered_messages_buffer_then_flush_contiguously() {
        let mut receiver = ReliableReceiver::new(ReliableChannelConfig::default());
        // Packets 0 and 1 arrive, then 2 arrives before... no, simulate true
        // reordering: 2 arrives before 1.
        assert_eq!(receiver.receive(0, vec![0]), DeliveryOutcome::Delivered(vec![(0, vec![0])]));
        assert_eq!(receiver.receive(2, vec![2]), DeliveryOutcome::Buffered);
        assert_eq!(receiver.receive(1, vec![1]), DeliveryOutcome::Delivered(vec![(1, vec![1]), (2, vec![2])]));
    }

    #[test]
    fn duplicate_messages_are_rejected() {
        let mut receiver = ReliableReceiver::new(ReliableChannelConfig::default());
        receiver.receive(0, vec![0]);
        assert_eq!(receiver.receive(0, vec![0]), DeliveryOutcome::Duplicate);

        receiver.receive(2, vec![2]);
        assert_eq!(receiver.receive(2, vec![2]), DeliveryOutcome::Duplicate);
    }

    #[test]
    fn ack_watermark_tracks_contiguous_cursor() {
        let mut receiver = ReliableReceiver::new(ReliableChannelConfig::default());
        receiver.receive(0, vec![]);
        receiver.receive(2, vec![]);
        assert_eq!(receiver.ack_watermark(), 0);
        receiver.receive(1, vec![]);
        assert_eq!(receiver.ack_watermark(), 2);
    }

    #[test]
    fn sender_retransmits_after_interval_and_stops_on_ack() {
        let config = ReliableChannelConfig { retransmit_interval_ms: 50.0, ..ReliableChannelConfig::default() };
        let mut sender = ReliableSender::new(config);
        let seq = sender.send(vec![9], 0.0);

        let (due, timeouts) = sender.poll_retransmits(10.0);
        assert!(due.is_empty());
        assert!(timeouts.is_empty());

        let (due, _) = sender.poll_retransmits(60.0);
        assert_eq!(due, vec![(seq, vec![9])]);

        sender.acknowledge(seq);
        let (due, _) = sender.poll_retransmits(1000.0);
        assert!(due.is_empty());
        assert_eq!(sender.in_flight_count(), 0);
    }

    #[test]
    fn sender_abandons_after_max_retries() {
        let config = ReliableChannelConfig { retransmit_interval_ms: 10.0, max_retries: 2, ..ReliableChannelConfig::default() };
        let mut sender = ReliableSender::new(config);
        sender.send(vec![1], 0.0);

        sender.poll_retransmits(20.0);
        sender.poll_retransmits(40.0);
        let (_, timeouts) = sender.poll_retransmits(60.0);

        assert_eq!(timeouts.len(), 1);
        assert_eq!(sender.in_flight_count(), 0);
    }

    #[test]
    fn cumulative_ack_clears_multiple_messages() {
        let mut sender = ReliableSender::new(ReliableChannelConfig::default());
        sender.send(vec![1], 0.0);
        sender.send(vec![2], 0.0);
        sender.send(vec![3], 0.0);
        sender.acknowledge(1);
        assert_eq!(sender.in_flight_count(), 1);
    }
}
