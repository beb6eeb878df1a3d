//! Ping/pong round-trip estimator: median-filtered latency and offset, with
//! jitter reported as the sample standard deviation of observed round-trip
//! times.
//!
//! The wire shape is PING/PONG packets (§6): a ping carries the sender's
//! local send timestamp; the pong echoes it back alongside the receiver's
//! own receive timestamp, which is enough for the sender to derive RTT,
//! one-way latency, and clock offset without either side needing a shared
//! epoch.

use std::collections::VecDeque;

/// Tunables for [`TimeSync`].
#[derive(Debug, Clone, Copy)]
pub struct TimeSyncConfig {
    /// Maximum number of round-trip samples retained for filtering.
    pub max_samples: usize,
    /// Exponential smoothing factor applied to the reported latency:
    /// `reported = alpha * previous + (1 - alpha) * median(samples)`.
    pub latency_smoothing_alpha: f64,
    /// Pending pings with no matching pong after this many milliseconds are
    /// dropped; a late pong for a pruned sequence is ignored.
    pub pending_ping_expiry_ms: f64,
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self { max_samples: 20, latency_smoothing_alpha: 0.8, pending_ping_expiry_ms: 10_000.0 }
    }
}

/// One round-trip observation.
#[derive(Debug, Clone, Copy)]
pub struct TimeSample {
    /// Round-trip time in milliseconds.
    pub rtt_ms: f64,
    /// Estimated one-way latency (`rtt / 2`).
    pub latency_ms: f64,
    /// Estimated clock offset (`server_ts - (sent_ts + latency)`); positive
    /// means the remote clock reads ahead of ours.
    pub offset_ms: f64,
}

#[derive(Debug, Clone, Copy)]
struct PendingPing {
    sequence: u64,
    sent_ts: f64,
}

/// Round-trip time estimator driven by ping/pong exchanges.
pub struct TimeSync {
    config: TimeSyncConfig,
    next_sequence: u64,
    pending: VecDeque<PendingPing>,
    samples: VecDeque<TimeSample>,
    reported_latency_ms: Option<f64>,
}

impl TimeSync {
    /// Creates a new estimator with the given configuration.
    #[must_use]
    pub fn new(config: TimeSyncConfig) -> Self {
        Self {
            config,
            next_sequence: 1,
            pending: VecDeque::new(),
            samples: VecDeque::new(),
            reported_latency_ms: None,
        }
    }

    /// Records a new outbound ping at `now_ms`, returning its sequence
    /// number and send timestamp (to be placed on the wire). Prunes pings
    /// older than `pending_ping_expiry_ms` that never received a pong.
    pub fn send_ping(&mut self, now_ms: f64) -> (u64, f64) {
        self.prune_pending(now_ms);

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.pending.push_back(PendingPing { sequence, sent_ts: now_ms });
        (sequence, now_ms)
    }

    fn prune_pending(&mut self, now_ms: f64) {
        let cutoff = now_ms - self.config.pending_ping_expiry_ms;
        while let Some(front) = self.pending.front() {
            if front.sent_ts < cutoff {
                self.pending.pop_front();
            } else {
                break;
            }
        }
    }

    /// Processes an inbound pong: `sequence`/`echoed_sent_ts` are the values
    /// the remote echoed back from our ping, `remote_recv_ts` is the
    /// remote's own clock reading when it received the ping, and `now_ms`
    /// is our local clock reading when we received this pong.
    ///
    /// Returns `None` if `sequence` does not match a still-pending ping
    /// (already acknowledged, or pruned past `pending_ping_expiry_ms`).
    pub fn receive_pong(
        &mut self,
        sequence: u64,
        echoed_sent_ts: f64,
        remote_recv_ts: f64,
        now_ms: f64,
    ) -> Option<TimeSample> {
        self.prune_pending(now_ms);

        let position = self.pending.iter().position(|p| p.sequence == sequence)?;
        self.pending.remove(position);

        let rtt_ms = (now_ms - echoed_sent_ts).max(0.0);
        let latency_ms = rtt_ms / 2.0;
        let offset_ms = remote_recv_ts - (echoed_sent_ts + latency_ms);

        let sample = TimeSample { rtt_ms, latency_ms, offset_ms };
        self.samples.push_back(sample);
        while self.samples.len() > self.config.max_samples {
            self.samples.pop_front();
        }

        self.update_reported_latency();
        Some(sample)
    }

    fn update_reported_latency(&mut self) {
        let median = median_of(self.samples.iter().map(|s| s.latency_ms));
        let Some(median) = median else { return };

        self.reported_latency_ms = Some(match self.reported_latency_ms {
            None => median,
            Some(previous) => self.config.latency_smoothing_alpha * previous
                + (1.0 - self.config.latency_smoothing_alpha) * median,
        });
    }

    /// Currently reported (smoothed) one-way latency estimate, in
    /// milliseconds. `None` until at least one sample has been observed.
    #[must_use]
    pub fn latency_ms(&self) -> Option<f64> {
        self.reported_latency_ms
    }

    /// Median clock offset over the retained sample window.
    #[must_use]
    pub fn offset_ms(&self) -> Option<f64> {
        median_of(self.samples.iter().map(|s| s.offset_ms))
    }

    /// Sample standard deviation of round-trip time over the retained
    /// window — a measure of connection jitter.
    #[must_use]
    pub fn jitter_ms(&self) -> Option<f64> {
        if self.samples.len() < 2 {
            return Some(0.0).filter(|_| !self.samples.is_empty());
        }
        let mean = self.samples.iter().map(|s| s.rtt_ms).sum::<f64>() / self.samples.len() as f64;
        let variance = self.samples.iter().map(|s| (s.rtt_ms - mean).powi(2)).sum::<f64>() / (self.samples.len() - 1) as f64;
        Some(variance.sqrt())
    }

    /// Number of samples currently retained.
    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Number of pings awaiting a pong.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

fn median_of(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut values: Vec<f64> = values.collect();
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stabilizes_around_constant_latency() {
        let mut sync = TimeSync::new(TimeSyncConfig::default());
        let true_latency = 25.0;
        let mut client_ts = 0.0;

        for _ in 0..30 {
            let (seq, sent_ts) = sync.send_ping(client_ts);
            let remote_recv_ts = sent_ts + true_latency;
            let pong_arrival = sent_ts + 2.0 * true_latency;
            sync.receive_pong(seq, sent_ts, remote_recv_ts, pong_arrival).unwrap();
            client_ts = pong_arrival + 10.0;
        }

        let reported = sync.latency_ms().unwrap();
        assert!((reported - true_latency).abs() < 1.0, "reported={reported}");
    }

    #[test]
    fn unknown_sequence_is_ignored() {
        let mut sync = TimeSync::new(TimeSyncConfig::default());
        assert!(sync.receive_pong(999, 0.0, 0.0, 10.0).is_none());
    }

    #[test]
    fn pruned_pending_pings_are_ignored() {
        let config = TimeSyncConfig { pending_ping_expiry_ms: 100.0, ..TimeSyncConfig::default() };
        let mut sync = TimeSync::new(config);
        let (seq, sent_ts) = sync.send_ping(0.0);
        // Pong arrives long after the pending entry should have expired.
        assert!(sync.receive_pong(seq, sent_ts, 0.0, 10_000.0).is_none());
    }

    #[test]
    fn jitter_is_zero_for_constant_latency() {
        let mut sync = TimeSync::new(TimeSyncConfig::default());
        for i in 0..5 {
            let ts = i as f64 * 100.0;
            let (seq, sent_ts) = sync.send_ping(ts);
            sync.receive_pong(seq, sent_ts, sent_ts + 10.0, sent_ts + 20.0).unwrap();
        }
        assert!(sync.jitter_ms().unwrap() < 1e-9);
    }
}
