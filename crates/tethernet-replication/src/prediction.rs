//! Stateless forward-integrator for locally-owned entities. `Predictor`
//! holds no mutable state; it is reused identically by the live prediction
//! path and by the reconciler's replay of unacknowledged inputs, which is
//! what makes reconciliation deterministic.

use tethernet_shared::{Quaternion, Transform, Vec3};

use crate::input::{InputRecord, InputState};

/// Movement tunables consumed by [`Predictor::predict`].
#[derive(Debug, Clone, Copy)]
pub struct PredictorConfig {
    /// Linear movement speed, units per second.
    pub speed: f64,
    /// Turning rate, radians per second, scaled by the `look_x` axis.
    pub rotation_speed: f64,
    /// Timestep used for the first input in a sequence, where no previous
    /// timestamp exists to derive a delta from.
    pub default_dt_s: f64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self { speed: 5.0, rotation_speed: std::f64::consts::PI, default_dt_s: 1.0 / 60.0 }
    }
}

/// Pure forward-integrator: player-relative movement and yaw.
#[derive(Debug, Clone, Copy)]
pub struct Predictor {
    config: PredictorConfig,
}

impl Predictor {
    /// Creates a predictor with the given config.
    #[must_use]
    pub fn new(config: PredictorConfig) -> Self {
        Self { config }
    }

    /// Integrates one input over `dt` seconds starting from `base`.
    ///
    /// Movement is resolved in the entity's local space (forward is `-Z`,
    /// right is `+X`) and rotated by `base.rotation` before being added to
    /// position. Yaw (`look_x`) is applied on top of `base.rotation`
    /// afterward, so this frame's movement uses the orientation the entity
    /// had at the start of the frame.
    #[must_use]
    pub fn predict(&self, input: &InputState, dt: f64, base: Transform) -> Transform {
        let mut local = Vec3::ZERO;
        if input.forward {
            local.z -= 1.0;
        }
        if input.backward {
            local.z += 1.0;
        }
        if input.right {
            local.x += 1.0;
        }
        if input.left {
            local.x -= 1.0;
        }

        let movement = if local.length_squared() > f64::EPSILON {
            base.rotation.rotate_vec3(local.normalize()).scale(self.config.speed * dt)
        } else {
            Vec3::ZERO
        };

        let yaw_delta = Quaternion::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), input.look_x * self.config.rotation_speed * dt);
        let new_rotation = base.rotation.multiply(yaw_delta).normalize();

        Transform::new(base.position + movement, new_rotation, base.scale)
    }

    /// Folds [`Predictor::predict`] over a sequence of inputs, using the
    /// delta between consecutive recorded timestamps as `dt`. `previous_timestamp_ms`
    /// is the timestamp of the last-acknowledged input immediately preceding
    /// `inputs`, used to derive the first input's `dt`; when `None` (no prior
    /// input exists at all, e.g. replaying from the very start of a session),
    /// the first `dt` falls back to `default_dt_s`.
    #[must_use]
    pub fn predict_sequence(&self, inputs: &[InputRecord], start: Transform, previous_timestamp_ms: Option<f64>) -> Transform {
        let mut transform = start;
        let mut prev_ts = previous_timestamp_ms;

        for record in inputs {
            let dt = match prev_ts {
                Some(prev) => ((record.timestamp_ms - prev) / 1000.0).max(0.0),
                None => self.config.default_dt_s,
            };
            transform = self.predict(&record.input, dt, transform);
            prev_ts = Some(record.timestamp_ms);
        }

        transform
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::InputRecord;

    fn forward_input() -> InputState {
        InputState { forward: true, ..InputState::default() }
    }

    #[test]
    fn forward_moves_along_negative_local_z() {
        let predictor = Predictor::new(PredictorConfig { speed: 5.0, ..PredictorConfig::default() });
        let result = predictor.predict(&forward_input(), 0.016, Transform::IDENTITY);
        assert!((result.position.z - (-0.08)).abs() < 1e-9);
    }

    #[test]
    fn reconciliation_replay_scenario_c() {
        let predictor = Predictor::new(PredictorConfig { speed: 5.0, ..PredictorConfig::default() });

        let inputs = vec![
            InputRecord { sequence: 2, input: forward_input(), timestamp_ms: 16.0, processed: false },
            InputRecord { sequence: 3, input: forward_input(), timestamp_ms: 32.0, processed: false },
        ];

        let server_transform = Transform::new(Vec3::new(0.0, 0.0, -0.08), Quaternion::IDENTITY, Vec3::ONE);
        let result = predictor.predict_sequence(&inputs, server_transform, Some(0.0));

        assert!((result.position.z - (-0.24)).abs() < 1e-6);
    }

    #[test]
    fn no_movement_input_leaves_position_unchanged() {
        let predictor = Predictor::new(PredictorConfig::default());
        let result = predictor.predict(&InputState::default(), 0.016, Transform::IDENTITY);
        assert_eq!(result.position, Vec3::ZERO);
    }
}
