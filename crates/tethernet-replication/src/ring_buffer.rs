//! Fixed-capacity circular buffer with interval statistics, time-keyed reads,
//! and (for blendable payloads) interpolated reads.
//!
//! Capacity is rounded up to the next power of two so indexing can use a
//! bitmask instead of a modulo. The buffer never reallocates after
//! construction.

/// Types that can be linearly blended between two samples, used by
/// [`RingBuffer::read_at`] when interpolation is requested.
pub trait Blend: Copy {
    /// Blends `self` toward `other` by `t` in `[0, 1]`.
    #[must_use]
    fn blend(self, other: Self, t: f64) -> Self;
}

impl Blend for tethernet_shared::Transform {
    fn blend(self, other: Self, t: f64) -> Self {
        self.lerp(other, t)
    }
}

impl Blend for tethernet_shared::Vec3 {
    fn blend(self, other: Self, t: f64) -> Self {
        self.lerp(other, t)
    }
}

impl Blend for f64 {
    fn blend(self, other: Self, t: f64) -> Self {
        self + (other - self) * t
    }
}

/// One stored entry: a payload and the timestamp it was written with.
#[derive(Debug, Clone, Copy)]
struct Entry<T> {
    data: T,
    ts: f64,
}

/// Running statistics over write intervals and buffer usage.
#[derive(Debug, Clone, Copy, Default)]
pub struct RingBufferStats {
    /// Total number of `write` calls.
    pub writes: u64,
    /// Total number of entries consumed via `read_next`.
    pub reads: u64,
    /// Number of writes that overwrote a not-yet-read slot.
    pub overwrites: u64,
    /// Incremental running mean of the interval between consecutive writes.
    pub avg_interval: f64,
    /// Smallest observed interval between consecutive writes.
    pub min_interval: f64,
    /// Largest observed interval between consecutive writes.
    pub max_interval: f64,
    /// Number of intervals folded into `avg_interval`/`min_interval`/`max_interval`
    /// (one less than `writes`, since the first write has no predecessor).
    interval_count: u64,
}

/// Fixed-capacity circular buffer of timestamped values.
pub struct RingBuffer<T> {
    slots: Vec<Option<Entry<T>>>,
    capacity: usize,
    mask: usize,
    write_index: usize,
    read_index: usize,
    len: usize,
    last_write_ts: Option<f64>,
    stats: RingBufferStats,
}

impl<T: Copy> RingBuffer<T> {
    /// Creates a buffer whose capacity is the next power of two `>= requested`
    /// (minimum 1).
    #[must_use]
    pub fn new(requested_capacity: usize) -> Self {
        let capacity = requested_capacity.max(1).next_power_of_two();
        Self {
            slots: vec![None; capacity],
            capacity,
            mask: capacity - 1,
            write_index: 0,
            read_index: 0,
            len: 0,
            last_write_ts: None,
            stats: RingBufferStats::default(),
        }
    }

    /// Actual allocated capacity (a power of two).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live entries currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer currently holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Fraction of capacity currently occupied.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        self.len as f64 / self.capacity as f64
    }

    /// Statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> RingBufferStats {
        self.stats
    }

    /// Writes a new value at timestamp `ts`, advancing the write cursor.
    /// When the buffer is already full, this also advances the read cursor
    /// and counts an overwrite.
    pub fn write(&mut self, data: T, ts: f64) {
        if let Some(prev_ts) = self.last_write_ts {
            let interval = ts - prev_ts;
            self.stats.writes += 1;
            self.stats.interval_count += 1;
            let n = self.stats.interval_count as f64;
            self.stats.avg_interval += (interval - self.stats.avg_interval) / n;
            if self.stats.interval_count == 1 {
                self.stats.min_interval = interval;
                self.stats.max_interval = interval;
            } else {
                self.stats.min_interval = self.stats.min_interval.min(interval);
                self.stats.max_interval = self.stats.max_interval.max(interval);
            }
        } else {
            self.stats.writes += 1;
        }
        self.last_write_ts = Some(ts);

        let was_full = self.len == self.capacity;
        self.slots[self.write_index] = Some(Entry { data, ts });
        self.write_index = (self.write_index + 1) & self.mask;

        if was_full {
            self.stats.overwrites += 1;
            self.read_index = (self.read_index + 1) & self.mask;
        } else {
            self.len += 1;
        }
    }

    /// Consumes and returns the oldest unread entry.
    pub fn read_next(&mut self) -> Option<(T, f64)> {
        if self.len == 0 {
            return None;
        }
        let entry = self.slots[self.read_index].take()?;
        self.read_index = (self.read_index + 1) & self.mask;
        self.len -= 1;
        self.stats.reads += 1;
        Some((entry.data, entry.ts))
    }

    /// Returns the entry `offset` positions ahead of the read cursor without
    /// consuming it. `peek(0)` is the oldest live entry.
    #[must_use]
    pub fn peek(&self, offset: usize) -> Option<(T, f64)> {
        if offset >= self.len {
            return None;
        }
        let idx = (self.read_index + offset) & self.mask;
        self.slots[idx].map(|e| (e.data, e.ts))
    }

    fn live_in_order(&self) -> Vec<Entry<T>> {
        (0..self.len)
            .filter_map(|offset| {
                let idx = (self.read_index + offset) & self.mask;
                self.slots[idx]
            })
            .collect()
    }

    /// Locates the entry at or nearest `ts`. When `interpolate` is true and
    /// `T: Blend`, bracketing entries are blended; exact matches (within
    /// `1e-3`) are returned directly. When `consume` is true, every entry up
    /// to and including the `after` bracket is removed from the buffer.
    pub fn read_at(&mut self, ts: f64, interpolate: bool, consume: bool) -> Option<T>
    where
        T: Blend,
    {
        let live = self.live_in_order();
        if live.is_empty() {
            return None;
        }

        let mut before_idx: Option<usize> = None;
        let mut after_idx: Option<usize> = None;
        for (i, entry) in live.iter().enumerate() {
            if entry.ts <= ts {
                before_idx = Some(i);
            } else if after_idx.is_none() {
                after_idx = Some(i);
            }
        }

        let result = match (before_idx, after_idx) {
            (Some(b), _) if (live[b].ts - ts).abs() < 1e-3 => Some(live[b].data),
            (Some(b), Some(a)) if interpolate => {
                let before = live[b];
                let after = live[a];
                let span = after.ts - before.ts;
                let t = if span.abs() < f64::EPSILON { 0.0 } else { ((ts - before.ts) / span).clamp(0.0, 1.0) };
                Some(before.data.blend(after.data, t))
            }
            (Some(b), _) => Some(live[b].data),
            (None, Some(a)) => Some(live[a].data),
            (None, None) => None,
        };

        if consume {
            let consume_through = after_idx.or(before_idx);
            if let Some(through) = consume_through {
                for _ in 0..=through {
                    self.read_next();
                }
            }
        }

        result
    }

    /// Returns every live entry with `start <= ts <= end`, oldest first.
    #[must_use]
    pub fn get_range(&self, start: f64, end: f64) -> Vec<(T, f64)> {
        self.live_in_order()
            .into_iter()
            .filter(|e| e.ts >= start && e.ts <= end)
            .map(|e| (e.data, e.ts))
            .collect()
    }

    /// Returns every live entry, oldest first.
    #[must_use]
    pub fn all(&self) -> Vec<(T, f64)> {
        self.live_in_order().into_iter().map(|e| (e.data, e.ts)).collect()
    }

    /// Timestamp of the oldest live entry, if any.
    #[must_use]
    pub fn oldest_timestamp(&self) -> Option<f64> {
        self.peek(0).map(|(_, ts)| ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_rounds_up_to_power_of_two() {
        let buf: RingBuffer<f64> = RingBuffer::new(10);
        assert_eq!(buf.capacity(), 16);
    }

    #[test]
    fn size_after_n_writes_caps_at_capacity() {
        let mut buf: RingBuffer<f64> = RingBuffer::new(4);
        for i in 0..10 {
            buf.write(i as f64, i as f64);
        }
        assert_eq!(buf.len(), 4);
        // oldest retrievable timestamp should be the (N - C + 1)-th write: 10-4+1=7 -> index 6 -> ts 6.0
        assert_eq!(buf.oldest_timestamp(), Some(6.0));
    }

    #[test]
    fn read_next_consumes_in_order() {
        let mut buf: RingBuffer<f64> = RingBuffer::new(4);
        buf.write(1.0, 1.0);
        buf.write(2.0, 2.0);
        assert_eq!(buf.read_next(), Some((1.0, 1.0)));
        assert_eq!(buf.read_next(), Some((2.0, 2.0)));
        assert_eq!(buf.read_next(), None);
    }

    #[test]
    fn read_at_interpolates_between_brackets() {
        let mut buf: RingBuffer<f64> = RingBuffer::new(8);
        buf.write(0.0, 0.0);
        buf.write(10.0, 10.0);
        let value = buf.read_at(5.0, true, false).unwrap();
        assert!((value - 5.0).abs() < 1e-9);
    }

    #[test]
    fn read_at_exact_match_bypasses_blend() {
        let mut buf: RingBuffer<f64> = RingBuffer::new(8);
        buf.write(0.0, 0.0);
        buf.write(10.0, 10.0);
        let value = buf.read_at(10.0, true, false).unwrap();
        assert!((value - 10.0).abs() < 1e-9);
    }

    #[test]
    fn stats_track_min_max_avg_interval() {
        let mut buf: RingBuffer<f64> = RingBuffer::new(8);
        buf.write(0.0, 0.0);
        buf.write(0.0, 10.0);
        buf.write(0.0, 30.0);
        let stats = buf.stats();
        assert_eq!(stats.min_interval, 10.0);
        assert_eq!(stats.max_interval, 20.0);
        assert!((stats.avg_interval - 15.0).abs() < 1e-9);
    }
}
