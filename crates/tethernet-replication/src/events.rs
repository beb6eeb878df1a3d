//! Typed replacement for the original string-keyed, variadic-argument event
//! emitter. The orchestrator owns one [`EventChannel<ReplicationEvent>`] and
//! pushes to it synchronously from within the same task that triggered the
//! event; there is no cross-thread fan-out here, just a bounded queue a host
//! application drains once per frame.

use crossbeam_channel::{Receiver, RecvError, Sender, TryRecvError};

/// Observable events emitted by the replication orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicationEvent {
    /// A new entity became known to the orchestrator (first registration or
    /// first inbound packet for an unknown id).
    Connected {
        /// Entity id.
        entity_id: String,
    },
    /// An entity was removed, either explicitly or through staleness eviction.
    Disconnected {
        /// Entity id.
        entity_id: String,
    },
    /// An entity's transform changed as a result of local integration,
    /// reconciliation, or an inbound remote snapshot.
    EntityUpdated {
        /// Entity id.
        entity_id: String,
    },
    /// A packet was sent or received; carries no payload, used for metrics.
    NetworkUpdate {
        /// Number of bytes transferred.
        bytes: usize,
    },
    /// An entity's owner changed.
    OwnershipChanged {
        /// Entity id.
        entity_id: String,
        /// New owner id, if any.
        owner_id: Option<String>,
    },
    /// An entity transitioned to `REMOVED`.
    EntityRemoved {
        /// Entity id.
        entity_id: String,
    },
}

/// Bounded or unbounded typed channel wrapping `crossbeam_channel`, used for
/// every event/command queue in this crate.
#[derive(Clone)]
pub struct EventChannel<T> {
    sender: Sender<T>,
    receiver: Receiver<T>,
}

impl<T> EventChannel<T> {
    /// Creates a channel with a fixed capacity. `send` blocks once full.
    #[must_use]
    pub fn bounded(capacity: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        Self { sender, receiver }
    }

    /// Creates a channel with unbounded capacity.
    #[must_use]
    pub fn unbounded() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self { sender, receiver }
    }

    /// Returns a clone of the sending half.
    #[must_use]
    pub fn sender(&self) -> Sender<T> {
        self.sender.clone()
    }

    /// Returns a clone of the receiving half.
    #[must_use]
    pub fn receiver(&self) -> Receiver<T> {
        self.receiver.clone()
    }

    /// Sends a value, blocking if the channel is bounded and full.
    ///
    /// # Errors
    /// Returns the value back if every receiver has been dropped.
    pub fn send(&self, value: T) -> Result<(), crossbeam_channel::SendError<T>> {
        self.sender.send(value)
    }

    /// Sends a value without blocking.
    ///
    /// # Errors
    /// Fails if the channel is full (bounded only) or disconnected.
    pub fn try_send(&self, value: T) -> Result<(), crossbeam_channel::TrySendError<T>> {
        self.sender.try_send(value)
    }

    /// Blocks until a value is available.
    ///
    /// # Errors
    /// Fails once the channel is empty and disconnected.
    pub fn recv(&self) -> Result<T, RecvError> {
        self.receiver.recv()
    }

    /// Returns a value if one is immediately available.
    ///
    /// # Errors
    /// Fails if the channel is empty or disconnected.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Drains every value currently queued, in arrival order.
    pub fn drain(&self) -> Vec<T> {
        let mut out = Vec::new();
        while let Ok(value) = self.receiver.try_recv() {
            out.push(value);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_returns_in_order() {
        let channel = EventChannel::unbounded();
        channel.send(ReplicationEvent::Connected { entity_id: "a".into() }).unwrap();
        channel.send(ReplicationEvent::Connected { entity_id: "b".into() }).unwrap();

        let drained = channel.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0], ReplicationEvent::Connected { entity_id: "a".into() });
    }

    #[test]
    fn bounded_channel_respects_capacity() {
        let channel: EventChannel<i32> = EventChannel::bounded(1);
        assert!(channel.try_send(1).is_ok());
        assert!(channel.try_send(2).is_err());
    }
}
