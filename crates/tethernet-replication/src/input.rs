//! Sequence-stamped input ring used by the local-owned entity path: records
//! what the owner asked for, tracks how much of it the server has
//! acknowledged, and answers the range queries the reconciler needs to
//! replay the unacknowledged tail.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One frame's worth of player intent.
///
/// `extensions` is an open mapping so callers can attach game-specific
/// fields (e.g. an ability key) without the core needing to know about them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputState {
    /// Move forward.
    pub forward: bool,
    /// Move backward.
    pub backward: bool,
    /// Strafe left.
    pub left: bool,
    /// Strafe right.
    pub right: bool,
    /// Jump.
    pub jump: bool,
    /// Sprint modifier.
    pub sprint: bool,
    /// Crouch modifier.
    pub crouch: bool,
    /// Primary action (e.g. fire).
    pub primary: bool,
    /// Secondary action (e.g. aim).
    pub secondary: bool,
    /// Horizontal look axis.
    pub look_x: f64,
    /// Vertical look axis.
    pub look_y: f64,
    /// Game-specific extension fields.
    #[serde(default)]
    pub extensions: HashMap<String, Value>,
}

/// One recorded input, with the bookkeeping the reconciler and the
/// persistence layer need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRecord {
    /// Monotonically increasing per-client sequence number.
    pub sequence: u64,
    /// The recorded input state.
    pub input: InputState,
    /// Time the input was recorded, in milliseconds.
    pub timestamp_ms: f64,
    /// Whether the server has acknowledged processing this input.
    pub processed: bool,
}

/// Tunables for [`InputBuffer`].
#[derive(Debug, Clone, Copy)]
pub struct InputBufferConfig {
    /// Maximum entries retained before the oldest is trimmed.
    pub max_size: usize,
    /// Entries older than `now - expiration_time_ms` are evicted on record.
    pub expiration_time_ms: f64,
}

impl Default for InputBufferConfig {
    fn default() -> Self {
        Self { max_size: 100, expiration_time_ms: 5000.0 }
    }
}

/// Serializable snapshot of an [`InputBuffer`]'s entire state, for
/// persistence or test fixtures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputBufferSnapshot {
    records: Vec<InputRecord>,
    next_sequence: u64,
    last_processed_sequence: u64,
}

/// Sequence-stamped ring of recent inputs.
pub struct InputBuffer {
    config: InputBufferConfig,
    records: Vec<InputRecord>,
    next_sequence: u64,
    last_processed_sequence: u64,
}

impl InputBuffer {
    /// Creates an empty buffer. Sequence numbers start at 1.
    #[must_use]
    pub fn new(config: InputBufferConfig) -> Self {
        Self { config, records: Vec::new(), next_sequence: 1, last_processed_sequence: 0 }
    }

    /// Records a new input at `timestamp_ms`, assigning it the next
    /// sequence number. Trims to `max_size`, then evicts anything older
    /// than `timestamp_ms - expiration_time_ms`.
    pub fn record(&mut self, input: InputState, timestamp_ms: f64) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        self.records.push(InputRecord { sequence, input, timestamp_ms, processed: false });

        while self.records.len() > self.config.max_size {
            self.records.remove(0);
        }

        let cutoff = timestamp_ms - self.config.expiration_time_ms;
        self.records.retain(|r| r.timestamp_ms >= cutoff);

        sequence
    }

    /// Marks every entry with `sequence <= seq` as processed and advances
    /// `last_processed_sequence` (monotonically, never backward). Retains at
    /// least `min(10, max_size / 2)` processed entries even if older ones
    /// would otherwise be candidates for pruning.
    pub fn mark_processed(&mut self, seq: u64) {
        self.last_processed_sequence = self.last_processed_sequence.max(seq);

        for record in &mut self.records {
            if record.sequence <= seq {
                record.processed = true;
            }
        }

        let retain_min = self.config.max_size.div_ceil(2).min(10);
        let processed_count = self.records.iter().filter(|r| r.processed).count();
        let mut excess = processed_count.saturating_sub(retain_min);

        let mut i = 0;
        while excess > 0 && i < self.records.len() {
            if self.records[i].processed {
                self.records.remove(i);
                excess -= 1;
            } else {
                i += 1;
            }
        }
    }

    /// The highest sequence number acknowledged as processed so far.
    #[must_use]
    pub fn last_processed_sequence(&self) -> u64 {
        self.last_processed_sequence
    }

    /// Looks up a single record by sequence number.
    #[must_use]
    pub fn get(&self, seq: u64) -> Option<&InputRecord> {
        self.records.iter().find(|r| r.sequence == seq)
    }

    /// Every record with `sequence > seq`, oldest first.
    #[must_use]
    pub fn get_after(&self, seq: u64) -> Vec<InputRecord> {
        self.records.iter().filter(|r| r.sequence > seq).cloned().collect()
    }

    /// Every record with `t0 <= timestamp_ms <= t1`.
    #[must_use]
    pub fn get_in_range(&self, t0: f64, t1: f64) -> Vec<InputRecord> {
        self.records.iter().filter(|r| r.timestamp_ms >= t0 && r.timestamp_ms <= t1).cloned().collect()
    }

    /// Most recently recorded input, if any.
    #[must_use]
    pub fn latest(&self) -> Option<&InputRecord> {
        self.records.last()
    }

    /// Oldest retained input, if any.
    #[must_use]
    pub fn oldest(&self) -> Option<&InputRecord> {
        self.records.first()
    }

    /// Number of records currently retained.
    #[must_use]
    pub fn count(&self) -> usize {
        self.records.len()
    }

    /// Serializes the entire buffer state, for persistence or test fixtures.
    #[must_use]
    pub fn snapshot(&self) -> InputBufferSnapshot {
        InputBufferSnapshot {
            records: self.records.clone(),
            next_sequence: self.next_sequence,
            last_processed_sequence: self.last_processed_sequence,
        }
    }

    /// Restores a previously captured snapshot, replacing all current state.
    pub fn restore(&mut self, snapshot: InputBufferSnapshot) {
        self.records = snapshot.records;
        self.next_sequence = snapshot.next_sequence;
        self.last_processed_sequence = snapshot.last_processed_sequence;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequences_are_strictly_increasing() {
        let mut buf = InputBuffer::new(InputBufferConfig::default());
        let a = buf.record(InputState::default(), 0.0);
        let b = buf.record(InputState::default(), 16.0);
        assert!(b > a);
    }

    #[test]
    fn mark_processed_is_monotonic() {
        let mut buf = InputBuffer::new(InputBufferConfig::default());
        buf.record(InputState::default(), 0.0);
        buf.record(InputState::default(), 16.0);
        buf.mark_processed(2);
        buf.mark_processed(1);
        assert_eq!(buf.last_processed_sequence(), 2);
    }

    #[test]
    fn get_after_excludes_the_given_sequence() {
        let mut buf = InputBuffer::new(InputBufferConfig::default());
        buf.record(InputState::default(), 0.0);
        buf.record(InputState::default(), 16.0);
        buf.record(InputState::default(), 32.0);
        let after = buf.get_after(1);
        assert_eq!(after.len(), 2);
        assert_eq!(after[0].sequence, 2);
    }

    #[test]
    fn trims_to_max_size() {
        let config = InputBufferConfig { max_size: 4, expiration_time_ms: 1_000_000.0 };
        let mut buf = InputBuffer::new(config);
        for i in 0..10 {
            buf.record(InputState::default(), i as f64 * 16.0);
        }
        assert_eq!(buf.count(), 4);
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let mut buf = InputBuffer::new(InputBufferConfig::default());
        buf.record(InputState::default(), 0.0);
        buf.mark_processed(1);
        let snap = buf.snapshot();

        let mut restored = InputBuffer::new(InputBufferConfig::default());
        restored.restore(snap);
        assert_eq!(restored.last_processed_sequence(), 1);
        assert_eq!(restored.count(), 1);
    }
}
