//! Smooths a reconciliation correction over time instead of snapping,
//! except when the error is large enough that smoothing would be more
//! jarring than a hard correction (the safety valve, not an error).

use std::collections::{HashMap, VecDeque};

use tethernet_shared::Transform;

/// Tunables for [`LagCompensator`].
#[derive(Debug, Clone, Copy)]
pub struct LagCompensatorConfig {
    /// Below this positional *and* rotational error, no correction is
    /// stored at all; the client's own transform is kept.
    pub min_correction_threshold: f64,
    /// Above this positional error, the correction is discarded and the
    /// authoritative transform is applied immediately (hard snap).
    pub snap_threshold: f64,
    /// How long, in milliseconds, a stored correction takes to fully blend
    /// into the authoritative transform.
    pub smoothing_duration_ms: f64,
    /// Number of recent `(pos_err, rot_err)` samples retained per entity.
    pub error_history_len: usize,
}

impl Default for LagCompensatorConfig {
    fn default() -> Self {
        Self {
            min_correction_threshold: 0.001,
            snap_threshold: 5.0,
            smoothing_duration_ms: 100.0,
            error_history_len: 10,
        }
    }
}

/// An in-flight correction being smoothed toward the authoritative transform.
#[derive(Debug, Clone, Copy)]
struct CorrectionRecord {
    start: Transform,
    target: Transform,
    start_ts: f64,
    end_ts: f64,
    #[allow(dead_code)]
    pos_err: f64,
    #[allow(dead_code)]
    rot_err: f64,
}

struct EntityState {
    correction: Option<CorrectionRecord>,
    last_transform: Transform,
    error_history: VecDeque<(f64, f64)>,
}

impl EntityState {
    fn new(initial: Transform) -> Self {
        Self { correction: None, last_transform: initial, error_history: VecDeque::new() }
    }
}

/// Per-entity correction smoothing.
pub struct LagCompensator {
    config: LagCompensatorConfig,
    entities: HashMap<String, EntityState>,
}

impl LagCompensator {
    /// Creates a compensator with the given config.
    #[must_use]
    pub fn new(config: LagCompensatorConfig) -> Self {
        Self { config, entities: HashMap::new() }
    }

    fn entity_mut(&mut self, entity_id: &str, fallback: Transform) -> &mut EntityState {
        self.entities.entry(entity_id.to_string()).or_insert_with(|| EntityState::new(fallback))
    }

    /// Registers a new authoritative update for `entity_id`. Computes the
    /// positional and rotational error between `client` (the currently
    /// predicted transform) and `server` (the authoritative one), then
    /// either drops the correction (error negligible), hard-snaps (error
    /// beyond `snap_threshold`), or stores a correction to be smoothed by
    /// subsequent [`LagCompensator::query`] calls.
    ///
    /// Returns the transform to use immediately.
    pub fn apply(&mut self, entity_id: &str, client: Transform, server: Transform, now_ms: f64) -> Transform {
        let pos_err = client.position.distance(server.position);
        let rot_dot = client.rotation.dot(server.rotation).abs().clamp(-1.0, 1.0);
        let rot_err = 2.0 * rot_dot.acos();

        let state = self.entity_mut(entity_id, client);
        state.error_history.push_back((pos_err, rot_err));
        while state.error_history.len() > self.config.error_history_len {
            state.error_history.pop_front();
        }

        if pos_err < self.config.min_correction_threshold && rot_err < self.config.min_correction_threshold {
            state.correction = None;
            state.last_transform = client;
            return client;
        }

        if pos_err > self.config.snap_threshold {
            state.correction = None;
            state.last_transform = server;
            return server;
        }

        state.correction = Some(CorrectionRecord {
            start: client,
            target: server,
            start_ts: now_ms,
            end_ts: now_ms + self.config.smoothing_duration_ms,
            pos_err,
            rot_err,
        });
        state.last_transform = client;
        client
    }

    /// Returns the current compensated transform for `entity_id` at
    /// `now_ms`, advancing and clearing any in-flight correction as it
    /// completes. Ease-out cubic: `1 - (1-t)^3`.
    pub fn query(&mut self, entity_id: &str, now_ms: f64) -> Transform {
        let Some(state) = self.entities.get_mut(entity_id) else {
            return Transform::IDENTITY;
        };

        let Some(correction) = state.correction else {
            return state.last_transform;
        };

        let span = correction.end_ts - correction.start_ts;
        let t = if span.abs() < f64::EPSILON { 1.0 } else { ((now_ms - correction.start_ts) / span).clamp(0.0, 1.0) };
        let eased = 1.0 - (1.0 - t).powi(3);

        let position = correction.start.position.lerp(correction.target.position, eased);
        let rotation = correction.start.rotation.slerp(correction.target.rotation, eased);
        let scale = correction.start.scale.lerp(correction.target.scale, eased);
        let result = Transform::new(position, rotation, scale);

        if t >= 1.0 {
            state.correction = None;
            state.last_transform = correction.target;
        } else {
            state.last_transform = result;
        }

        result
    }

    /// Recent `(pos_err, rot_err)` samples for `entity_id`, oldest first.
    #[must_use]
    pub fn error_history(&self, entity_id: &str) -> Vec<(f64, f64)> {
        self.entities.get(entity_id).map(|s| s.error_history.iter().copied().collect()).unwrap_or_default()
    }

    /// Drops all state for `entity_id`.
    pub fn remove_entity(&mut self, entity_id: &str) {
        self.entities.remove(entity_id);
    }
}
