//! Per-entity chronological snapshot store: the remote-entity half of the
//! replication core. Snapshots are inserted in timestamp order, interpolated
//! or bounded-extrapolated for render-time queries, and evicted once past
//! their retention horizon.

use std::collections::HashMap;

use tethernet_shared::{Clock, Quaternion, Transform, Vec3};

use crate::spline;

/// Per-entity identifying and provenance data carried alongside a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotMetadata {
    /// Entity this snapshot describes.
    pub entity_id: String,
    /// Whether this snapshot came from an authoritative source (the server)
    /// as opposed to a speculative/local one.
    pub authoritative: bool,
}

/// A timestamped transform, immutable after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// The transform at this instant.
    pub transform: Transform,
    /// Time the snapshot describes, in milliseconds on the shared clock.
    pub timestamp_ms: f64,
    /// Entity identity and provenance.
    pub metadata: SnapshotMetadata,
}

impl Snapshot {
    /// Creates a new snapshot.
    #[must_use]
    pub fn new(transform: Transform, timestamp_ms: f64, entity_id: impl Into<String>, authoritative: bool) -> Self {
        Self {
            transform,
            timestamp_ms,
            metadata: SnapshotMetadata { entity_id: entity_id.into(), authoritative },
        }
    }
}

/// Selects which interpolation scheme `SnapshotStore::get_advanced_interpolated_transform`
/// uses when four bracketing snapshots are available.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InterpolationMethod {
    /// Two-point lerp/slerp, the always-available fallback.
    Linear,
    /// Hermite with the given tension.
    Hermite {
        /// Tension parameter; 0 is a loose Catmull-Rom-like curve, 1 is
        /// closest to a straight line between the two central points.
        tension: f64,
    },
    /// Centripetal Catmull-Rom with the given alpha (0.5 is the common
    /// "centripetal" choice).
    CatmullRom {
        /// Parameterization exponent.
        alpha: f64,
    },
    /// Squad, for rotation-aware four-point blending.
    Squad,
}

/// Tunables for [`SnapshotStore`].
#[derive(Debug, Clone, Copy)]
pub struct SnapshotConfig {
    /// Maximum snapshots retained per entity before the oldest is dropped.
    pub max_snapshots: usize,
    /// Fixed render-time offset into the past, absorbing jitter.
    pub interpolation_delay_ms: f64,
    /// Whether extrapolation past the latest snapshot is permitted at all.
    pub allow_extrapolation: bool,
    /// Cap, in seconds, on how far past the latest snapshot extrapolation
    /// is allowed to reach.
    pub max_extrapolation_time_s: f64,
    /// Snapshots older than this (relative to the newest write) are evicted,
    /// except the two most recent (needed to seed interpolation/velocity).
    pub snapshot_expiration_time_ms: f64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_snapshots: 30,
            interpolation_delay_ms: 100.0,
            allow_extrapolation: true,
            max_extrapolation_time_s: 1.0,
            snapshot_expiration_time_ms: 10_000.0,
        }
    }
}

/// Per-entity ordered snapshot history plus a cached instantaneous velocity.
struct SnapshotSeries {
    snapshots: Vec<Snapshot>,
    cached_velocity: Vec3,
}

impl SnapshotSeries {
    fn new() -> Self {
        Self { snapshots: Vec::new(), cached_velocity: Vec3::ZERO }
    }

    fn insert(&mut self, snapshot: Snapshot, max_snapshots: usize) {
        let pos = self
            .snapshots
            .iter()
            .position(|existing| existing.timestamp_ms > snapshot.timestamp_ms)
            .unwrap_or(self.snapshots.len());
        self.snapshots.insert(pos, snapshot);

        if self.snapshots.len() > max_snapshots {
            self.snapshots.remove(0);
        }

        self.recompute_velocity();
    }

    fn recompute_velocity(&mut self) {
        if self.snapshots.len() < 2 {
            return;
        }
        let last = &self.snapshots[self.snapshots.len() - 1];
        let prev = &self.snapshots[self.snapshots.len() - 2];
        let dt_s = (last.timestamp_ms - prev.timestamp_ms) / 1000.0;
        if dt_s.abs() > f64::EPSILON {
            self.cached_velocity = (last.transform.position - prev.transform.position).scale(1.0 / dt_s);
        }
    }

    /// Finds the bracketing pair `(before, after)` by index.
    fn bracket(&self, time_ms: f64) -> (Option<usize>, Option<usize>) {
        let mut before = None;
        let mut after = None;
        for (i, s) in self.snapshots.iter().enumerate() {
            if s.timestamp_ms <= time_ms {
                before = Some(i);
            } else if after.is_none() {
                after = Some(i);
            }
        }
        (before, after)
    }
}

/// Owns one [`SnapshotSeries`] per entity and answers render-time queries.
pub struct SnapshotStore {
    config: SnapshotConfig,
    series: HashMap<String, SnapshotSeries>,
}

impl SnapshotStore {
    /// Creates an empty store with the given configuration.
    #[must_use]
    pub fn new(config: SnapshotConfig) -> Self {
        Self { config, series: HashMap::new() }
    }

    /// Inserts a snapshot for `entity_id` in timestamp order, dropping the
    /// oldest entry if the per-entity series is at capacity.
    pub fn add_snapshot(&mut self, entity_id: &str, snapshot: Snapshot) {
        let series = self.series.entry(entity_id.to_string()).or_insert_with(SnapshotSeries::new);
        series.insert(snapshot, self.config.max_snapshots);
    }

    /// Cached instantaneous velocity for `entity_id`, derived from its two
    /// most recent snapshots.
    #[must_use]
    pub fn velocity(&self, entity_id: &str) -> Option<Vec3> {
        self.series.get(entity_id).map(|s| s.cached_velocity)
    }

    /// Number of snapshots currently retained for `entity_id`.
    #[must_use]
    pub fn snapshot_count(&self, entity_id: &str) -> usize {
        self.series.get(entity_id).map_or(0, |s| s.snapshots.len())
    }

    /// Interpolated (or bounded-extrapolated) transform for `entity_id` at
    /// `time_ms`. Returns `None` if the entity has no snapshots at all.
    #[must_use]
    pub fn get_interpolated_transform(&self, entity_id: &str, time_ms: f64) -> Option<Transform> {
        let series = self.series.get(entity_id)?;
        if series.snapshots.is_empty() {
            return None;
        }
        if series.snapshots.len() == 1 {
            return Some(series.snapshots[0].transform);
        }

        let (before_idx, after_idx) = series.bracket(time_ms);

        match (before_idx, after_idx) {
            (Some(b), Some(a)) => {
                let before = &series.snapshots[b];
                let after = &series.snapshots[a];
                if before.timestamp_ms == after.timestamp_ms {
                    return Some(before.transform);
                }
                let t = ((time_ms - before.timestamp_ms) / (after.timestamp_ms - before.timestamp_ms)).clamp(0.0, 1.0);
                Some(before.transform.lerp(after.transform, t))
            }
            (Some(b), None) => {
                let before = &series.snapshots[b];
                if self.config.allow_extrapolation {
                    let delta_s = ((time_ms - before.timestamp_ms) / 1000.0).min(self.config.max_extrapolation_time_s);
                    let delta_s = delta_s.max(0.0);
                    let extrapolated_position = before.transform.position + series.cached_velocity.scale(delta_s);
                    Some(Transform::new(extrapolated_position, before.transform.rotation, before.transform.scale))
                } else {
                    Some(before.transform)
                }
            }
            (None, Some(a)) => Some(series.snapshots[a].transform),
            (None, None) => None,
        }
    }

    /// Convenience wrapper for `get_interpolated_transform` at
    /// `clock.now_millis() - interpolation_delay_ms`.
    #[must_use]
    pub fn get_interpolated_transform_default(&self, entity_id: &str, clock: &dyn Clock) -> Option<Transform> {
        let time_ms = clock.now_millis() - self.config.interpolation_delay_ms;
        self.get_interpolated_transform(entity_id, time_ms)
    }

    /// Spline-based interpolation when four bracketing snapshots exist;
    /// falls back to [`SnapshotStore::get_interpolated_transform`] otherwise,
    /// and when `before == after` (duplicate timestamps at the brackets).
    #[must_use]
    pub fn get_advanced_interpolated_transform(
        &self,
        entity_id: &str,
        time_ms: f64,
        method: InterpolationMethod,
    ) -> Option<Transform> {
        let series = self.series.get(entity_id)?;
        let (before_idx, after_idx) = series.bracket(time_ms);

        let (b, a) = match (before_idx, after_idx) {
            (Some(b), Some(a)) => (b, a),
            _ => return self.get_interpolated_transform(entity_id, time_ms),
        };

        if b == 0 || a + 1 >= series.snapshots.len() {
            return self.get_interpolated_transform(entity_id, time_ms);
        }

        let p0 = &series.snapshots[b - 1];
        let p1 = &series.snapshots[b];
        let p2 = &series.snapshots[a];
        let p3 = &series.snapshots[a + 1];

        if p1.timestamp_ms == p2.timestamp_ms {
            return Some(p1.transform);
        }

        let t = ((time_ms - p1.timestamp_ms) / (p2.timestamp_ms - p1.timestamp_ms)).clamp(0.0, 1.0);

        let position = match method {
            InterpolationMethod::Linear => p1.transform.position.lerp(p2.transform.position, t),
            InterpolationMethod::Hermite { tension } => spline::hermite(
                p0.transform.position,
                p1.transform.position,
                p2.transform.position,
                p3.transform.position,
                t,
                tension,
            ),
            InterpolationMethod::CatmullRom { alpha } => spline::catmull_rom_centripetal(
                p0.transform.position,
                p1.transform.position,
                p2.transform.position,
                p3.transform.position,
                t,
                alpha,
            ),
            InterpolationMethod::Squad => p1.transform.position.lerp(p2.transform.position, t),
        };

        let rotation = match method {
            InterpolationMethod::Squad => spline::squad(
                p0.transform.rotation,
                p1.transform.rotation,
                p2.transform.rotation,
                p3.transform.rotation,
                t,
            ),
            _ => p1.transform.rotation.slerp(p2.transform.rotation, t),
        };

        let scale = p1.transform.scale.lerp(p2.transform.scale, t);

        Some(Transform::new(position, rotation, scale))
    }

    /// Evicts snapshots older than `snapshot_expiration_time_ms` relative to
    /// `now_ms`, always keeping at least the two most recent per entity.
    pub fn update(&mut self, now_ms: f64) {
        let cutoff = now_ms - self.config.snapshot_expiration_time_ms;
        for series in self.series.values_mut() {
            while series.snapshots.len() > 2 && series.snapshots[0].timestamp_ms < cutoff {
                series.snapshots.remove(0);
            }
        }
    }

    /// Removes an entity's entire snapshot history.
    pub fn remove_entity(&mut self, entity_id: &str) {
        self.series.remove(entity_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tethernet_shared::FakeClock;

    fn transform_at(x: f64) -> Transform {
        Transform::new(Vec3::new(x, 0.0, 0.0), Quaternion::IDENTITY, Vec3::ONE)
    }

    #[test]
    fn lerp_between_snapshots_scenario_a() {
        let mut store = SnapshotStore::new(SnapshotConfig::default());
        store.add_snapshot("e1", Snapshot::new(transform_at(0.0), 1000.0, "e1", true));
        store.add_snapshot("e1", Snapshot::new(transform_at(10.0), 2000.0, "e1", true));

        let result = store.get_interpolated_transform("e1", 1500.0).unwrap();
        assert!((result.position.x - 5.0).abs() < 1e-9);
        assert_eq!(result.rotation, Quaternion::IDENTITY);
    }

    #[test]
    fn extrapolation_cap_scenario_b() {
        let config = SnapshotConfig { max_extrapolation_time_s: 0.5, ..SnapshotConfig::default() };
        let mut store = SnapshotStore::new(config);
        store.add_snapshot("e1", Snapshot::new(transform_at(0.0), 0.0, "e1", true));
        store.add_snapshot("e1", Snapshot::new(transform_at(1.0), 100.0, "e1", true));

        let result = store.get_interpolated_transform("e1", 2000.0).unwrap();
        assert!((result.position.x - 6.0).abs() < 1e-9);
    }

    #[test]
    fn single_snapshot_returns_itself() {
        let mut store = SnapshotStore::new(SnapshotConfig::default());
        store.add_snapshot("e1", Snapshot::new(transform_at(3.0), 500.0, "e1", true));
        let result = store.get_interpolated_transform("e1", 9999.0).unwrap();
        assert_eq!(result.position.x, 3.0);
    }

    #[test]
    fn no_snapshots_returns_none() {
        let store = SnapshotStore::new(SnapshotConfig::default());
        assert!(store.get_interpolated_transform("missing", 0.0).is_none());
    }

    #[test]
    fn default_query_uses_interpolation_delay() {
        let mut store = SnapshotStore::new(SnapshotConfig::default());
        store.add_snapshot("e1", Snapshot::new(transform_at(0.0), 0.0, "e1", true));
        store.add_snapshot("e1", Snapshot::new(transform_at(10.0), 1000.0, "e1", true));

        let clock = FakeClock::new(1000.0);
        let result = store.get_interpolated_transform_default("e1", &clock).unwrap();
        // time = 1000 - 100 = 900 -> t = 0.9 -> x = 9
        assert!((result.position.x - 9.0).abs() < 1e-9);
    }

    #[test]
    fn update_evicts_old_snapshots_but_keeps_last_two() {
        let mut store = SnapshotStore::new(SnapshotConfig::default());
        for i in 0..5 {
            store.add_snapshot("e1", Snapshot::new(transform_at(i as f64), i as f64 * 1000.0, "e1", true));
        }
        store.update(50_000.0);
        assert_eq!(store.snapshot_count("e1"), 2);
    }

    #[test]
    fn advanced_interpolation_falls_back_with_fewer_than_four_snapshots() {
        let mut store = SnapshotStore::new(SnapshotConfig::default());
        store.add_snapshot("e1", Snapshot::new(transform_at(0.0), 0.0, "e1", true));
        store.add_snapshot("e1", Snapshot::new(transform_at(10.0), 1000.0, "e1", true));

        let linear = store.get_interpolated_transform("e1", 500.0).unwrap();
        let advanced = store
            .get_advanced_interpolated_transform("e1", 500.0, InterpolationMethod::CatmullRom { alpha: 0.5 })
            .unwrap();
        assert!((linear.position.x - advanced.position.x).abs() < 1e-9);
    }
}
