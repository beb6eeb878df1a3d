//! Per-entity keyframe/delta log built over the ring buffer (C3), with
//! reconstructed time queries and spline interpolation across resolved
//! states. Depends only on [`crate::ring_buffer`] and [`crate::delta`] —
//! it resolves cache entries to transforms itself and hands the resolved
//! values to [`crate::spline`], rather than reaching back into the snapshot
//! engine, to avoid the cyclic dependency a naive port of the source would
//! otherwise introduce.

use std::collections::{HashMap, VecDeque};

use tethernet_shared::Transform;

use crate::delta::{self, DeltaConfig, TransformDelta};
use crate::ring_buffer::RingBuffer;
use crate::spline;

/// One entry in the mixed keyframe/delta log.
#[derive(Debug, Clone, Copy)]
pub enum CacheEntry {
    /// A complete, self-sufficient state.
    Keyframe {
        /// The full transform.
        state: Transform,
    },
    /// A change relative to a keyframe (or, when `anchors` is set, relative
    /// to a predicted transform derived from two history states).
    Delta {
        /// The encoded change.
        delta: TransformDelta,
        /// Timestamp of the keyframe this delta is ultimately anchored to.
        base_time_ms: f64,
        /// For predictive deltas: the two history states the prediction was
        /// extrapolated from (older, newer).
        anchors: Option<(Transform, Transform)>,
    },
}

/// Tunables for [`StateCache`].
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Minimum spacing, in milliseconds, between keyframes; anything sooner
    /// is encoded as a delta instead.
    pub keyframe_interval_ms: f64,
    /// Whether delta encoding is used at all between keyframes.
    pub delta_encoding_enabled: bool,
    /// Capacity of the mixed keyframe/delta ring.
    pub main_buffer_capacity: usize,
    /// Capacity of the keyframes-only ring.
    pub keyframe_buffer_capacity: usize,
    /// Number of recent raw states retained for predictive-delta anchoring.
    pub history_len: usize,
    /// Delta quantization/threshold config.
    pub delta_config: DeltaConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            keyframe_interval_ms: 1000.0,
            delta_encoding_enabled: true,
            main_buffer_capacity: 64,
            keyframe_buffer_capacity: 32,
            history_len: 4,
            delta_config: DeltaConfig::default(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct CacheStats {
    hits: u64,
    misses: u64,
}

struct EntityCache {
    main: RingBuffer<CacheEntry>,
    keyframes: RingBuffer<Transform>,
    history: VecDeque<(f64, Transform)>,
    last_keyframe_time: Option<f64>,
    last_keyframe_transform: Option<Transform>,
    /// Most recently observed `(ts, state)`, recorded on every `update_state`
    /// call regardless of whether it produced a logged entry. A predictive
    /// delta that resolves to no change is never appended to `main` (§4.8),
    /// which would otherwise leave that exact timestamp unreconstructable.
    last_observed: Option<(f64, Transform)>,
    stats: CacheStats,
}

impl EntityCache {
    fn new(config: &CacheConfig) -> Self {
        Self {
            main: RingBuffer::new(config.main_buffer_capacity),
            keyframes: RingBuffer::new(config.keyframe_buffer_capacity),
            history: VecDeque::new(),
            last_keyframe_time: None,
            last_keyframe_transform: None,
            last_observed: None,
            stats: CacheStats::default(),
        }
    }
}

/// Per-entity keyframe/delta cache over a fixed-capacity ring buffer.
pub struct StateCache {
    config: CacheConfig,
    entities: HashMap<String, EntityCache>,
}

impl StateCache {
    /// Creates an empty cache with the given configuration.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self { config, entities: HashMap::new() }
    }

    /// Records a new observed state for `entity_id` at `ts`. Emits a
    /// keyframe when `ts - last_keyframe_time >= keyframe_interval_ms` (or
    /// none has been recorded yet); otherwise, if delta encoding is enabled,
    /// emits a delta — predictive when at least two history states are
    /// available, direct-from-keyframe otherwise. Deltas that resolve to no
    /// change are not appended at all.
    pub fn update_state(&mut self, entity_id: &str, state: Transform, ts: f64) {
        let config = self.config;
        let entity = self.entities.entry(entity_id.to_string()).or_insert_with(|| EntityCache::new(&config));

        let needs_keyframe = match entity.last_keyframe_time {
            None => true,
            Some(last) => ts - last >= config.keyframe_interval_ms,
        };

        if needs_keyframe {
            entity.main.write(CacheEntry::Keyframe { state }, ts);
            entity.keyframes.write(state, ts);
            entity.last_keyframe_time = Some(ts);
            entity.last_keyframe_transform = Some(state);
        } else if config.delta_encoding_enabled {
            if entity.history.len() >= 2 {
                let (_, older) = entity.history[entity.history.len() - 2];
                let (_, newer) = entity.history[entity.history.len() - 1];
                let delta = delta::compute_predictive_delta(older, newer, state, &config.delta_config);
                if delta.changed() {
                    let base_time_ms = entity.last_keyframe_time.unwrap_or(ts);
                    entity.main.write(CacheEntry::Delta { delta, base_time_ms, anchors: Some((older, newer)) }, ts);
                }
            } else if let Some(base) = entity.last_keyframe_transform {
                let delta = delta::compute_delta(base, state, &config.delta_config);
                if delta.changed() {
                    let base_time_ms = entity.last_keyframe_time.unwrap_or(ts);
                    entity.main.write(CacheEntry::Delta { delta, base_time_ms, anchors: None }, ts);
                }
            }
        }

        entity.history.push_back((ts, state));
        while entity.history.len() > config.history_len {
            entity.history.pop_front();
        }
        entity.last_observed = Some((ts, state));
    }

    fn resolve(entity: &EntityCache, entry: CacheEntry) -> Transform {
        match entry {
            CacheEntry::Keyframe { state } => state,
            CacheEntry::Delta { delta, base_time_ms, anchors } => {
                if let Some((older, newer)) = anchors {
                    delta::apply_predictive_delta(older, newer, &delta)
                } else {
                    let base = entity
                        .keyframes
                        .all()
                        .into_iter()
                        .filter(|(_, ts)| *ts <= base_time_ms)
                        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap())
                        .map(|(state, _)| state)
                        .or(entity.last_keyframe_transform)
                        .unwrap_or(Transform::IDENTITY);
                    delta::apply_delta(base, &delta)
                }
            }
        }
    }

    /// Looks up the state at `ts`. If `ts` exactly matches (within `1e-3`)
    /// the most recently observed `update_state` call, that state is
    /// returned directly — this covers observations that produced no log
    /// entry (an unchanged predictive delta). Otherwise, falls back to the
    /// keyframe/delta log: the nearest logged entry at or before `ts` is
    /// used, falling back to the earliest entry after `ts` if nothing
    /// precedes it. Keyframe entries resolve to themselves; delta entries
    /// are reconstructed against their anchoring keyframe (or predictive
    /// anchors).
    #[must_use]
    pub fn get_state(&mut self, entity_id: &str, ts: f64) -> Option<Transform> {
        let entity = self.entities.get_mut(entity_id)?;

        if let Some((observed_ts, observed_state)) = entity.last_observed {
            if (observed_ts - ts).abs() < 1e-3 {
                entity.stats.hits += 1;
                return Some(observed_state);
            }
        }

        let all = entity.main.all();
        if all.is_empty() {
            entity.stats.misses += 1;
            return None;
        }

        let mut before: Option<(CacheEntry, f64)> = None;
        let mut after: Option<(CacheEntry, f64)> = None;
        for (entry, entry_ts) in &all {
            if *entry_ts <= ts {
                before = Some((*entry, *entry_ts));
            } else if after.is_none() {
                after = Some((*entry, *entry_ts));
            }
        }

        let chosen = match (before, after) {
            (Some((e, entry_ts)), _) if (entry_ts - ts).abs() < 1e-3 => Some(e),
            (Some((e, _)), _) => Some(e),
            (None, Some((e, _))) => Some(e),
            (None, None) => None,
        };

        entity.stats.hits += 1;
        chosen.map(|e| Self::resolve(entity, e))
    }

    /// Spline-assisted interpolation. Gathers entries in `[ts-100, ts+100]`;
    /// when at least four resolve with timestamps bracketing `ts`, delegates
    /// to the spline functions in [`crate::spline`]; otherwise falls back to
    /// [`StateCache::get_state`].
    #[must_use]
    pub fn get_interpolated_state(&mut self, entity_id: &str, ts: f64, method: InterpolationMethod) -> Option<Transform> {
        let entity = self.entities.get_mut(entity_id)?;
        let window = entity.main.get_range(ts - 100.0, ts + 100.0);

        if window.len() < 4 {
            drop(window);
            return self.get_state(entity_id, ts);
        }

        let mut resolved: Vec<(Transform, f64)> =
            window.into_iter().map(|(entry, entry_ts)| (Self::resolve(entity, entry), entry_ts)).collect();
        resolved.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());

        let mut before_idx = None;
        let mut after_idx = None;
        for (i, (_, entry_ts)) in resolved.iter().enumerate() {
            if *entry_ts <= ts {
                before_idx = Some(i);
            } else if after_idx.is_none() {
                after_idx = Some(i);
            }
        }

        let (b, a) = match (before_idx, after_idx) {
            (Some(b), Some(a)) if b > 0 && a + 1 < resolved.len() => (b, a),
            _ => return self.get_state(entity_id, ts),
        };

        let p0 = resolved[b - 1].0;
        let p1 = resolved[b].0;
        let p2 = resolved[a].0;
        let p3 = resolved[a + 1].0;

        let span = resolved[a].1 - resolved[b].1;
        let t = if span.abs() < f64::EPSILON { 0.0 } else { ((ts - resolved[b].1) / span).clamp(0.0, 1.0) };

        let position = match method {
            InterpolationMethod::Linear => p1.position.lerp(p2.position, t),
            InterpolationMethod::Hermite { tension } => spline::hermite(p0.position, p1.position, p2.position, p3.position, t, tension),
            InterpolationMethod::CatmullRom { alpha } => {
                spline::catmull_rom_centripetal(p0.position, p1.position, p2.position, p3.position, t, alpha)
            }
            InterpolationMethod::Squad => p1.position.lerp(p2.position, t),
        };
        let rotation = match method {
            InterpolationMethod::Squad => spline::squad(p0.rotation, p1.rotation, p2.rotation, p3.rotation, t),
            _ => p1.rotation.slerp(p2.rotation, t),
        };
        let scale = p1.scale.lerp(p2.scale, t);

        Some(Transform::new(position, rotation, scale))
    }

    /// Hit/miss counters accumulated by `get_state` calls for `entity_id`.
    #[must_use]
    pub fn hit_miss(&self, entity_id: &str) -> (u64, u64) {
        self.entities.get(entity_id).map_or((0, 0), |e| (e.stats.hits, e.stats.misses))
    }

    /// Drops all cached state for `entity_id`.
    pub fn remove_entity(&mut self, entity_id: &str) {
        self.entities.remove(entity_id);
    }
}

/// Re-exported so callers don't need to depend on `crate::snapshot` just to
/// select an interpolation method for the cache.
pub use crate::snapshot::InterpolationMethod;

#[cfg(test)]
mod tests {
    use super::*;
    use tethernet_shared::{Quaternion, Vec3};

    fn transform_at(x: f64) -> Transform {
        Transform::new(Vec3::new(x, 0.0, 0.0), Quaternion::IDENTITY, Vec3::ONE)
    }

    #[test]
    fn first_update_emits_a_keyframe() {
        let mut cache = StateCache::new(CacheConfig::default());
        cache.update_state("e1", transform_at(1.0), 0.0);
        let resolved = cache.get_state("e1", 0.0).unwrap();
        assert_eq!(resolved.position.x, 1.0);
    }

    #[test]
    fn delta_between_keyframes_reconstructs_correctly() {
        let config = CacheConfig { keyframe_interval_ms: 1000.0, ..CacheConfig::default() };
        let mut cache = StateCache::new(config);
        cache.update_state("e1", transform_at(1.0), 0.0);
        cache.update_state("e1", transform_at(1.5), 100.0);

        let resolved = cache.get_state("e1", 100.0).unwrap();
        assert!((resolved.position.x - 1.5).abs() < 1e-6);
    }

    #[test]
    fn predictive_delta_reconstructs_with_anchors() {
        let config = CacheConfig { keyframe_interval_ms: 1_000_000.0, ..CacheConfig::default() };
        let mut cache = StateCache::new(config);
        cache.update_state("e1", transform_at(0.0), 0.0);
        cache.update_state("e1", transform_at(1.0), 100.0);
        cache.update_state("e1", transform_at(2.0), 200.0);

        let resolved = cache.get_state("e1", 200.0).unwrap();
        assert!((resolved.position.x - 2.0).abs() < 1e-6);
    }

    #[test]
    fn missing_entity_returns_none() {
        let mut cache = StateCache::new(CacheConfig::default());
        assert!(cache.get_state("missing", 0.0).is_none());
    }

    #[test]
    fn hit_miss_counters_track_queries() {
        let mut cache = StateCache::new(CacheConfig::default());
        cache.update_state("e1", transform_at(1.0), 0.0);
        cache.get_state("e1", 0.0);
        cache.get_state("missing", 0.0);
        let (hits, _) = cache.hit_miss("e1");
        assert_eq!(hits, 1);
    }
}
