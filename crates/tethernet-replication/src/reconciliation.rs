//! Compares a predicted local transform against an authoritative update and
//! either accepts it, quick-blends toward it, or replays the unacknowledged
//! input tail through the predictor to reconverge exactly.

use tethernet_shared::Transform;
use tracing::warn;

use crate::error::ReplicationError;
use crate::input::InputBuffer;
use crate::prediction::Predictor;

/// Which correction strategy [`Reconciler::reconcile`] applies once the
/// error exceeds the threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationMode {
    /// Replay every unacknowledged input through the predictor, starting
    /// from the authoritative transform. Exact, but requires a predictor
    /// and input buffer.
    Full,
    /// Directly blend client toward server with `t = min(error / 5.0, 0.5)`.
    /// Cheaper, approximate, never fails.
    Quick,
}

/// Tunables for [`Reconciler`].
#[derive(Debug, Clone, Copy)]
pub struct ReconcilerConfig {
    /// Below this positional error, the client's own prediction is kept
    /// unchanged.
    pub reconciliation_threshold: f64,
    /// Strategy used once the threshold is exceeded.
    pub mode: ReconciliationMode,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self { reconciliation_threshold: 0.1, mode: ReconciliationMode::Full }
    }
}

/// Running statistics kept by [`Reconciler`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcilerStats {
    /// Number of times a correction was actually applied (error over threshold).
    pub reconciliation_count: u64,
    /// Sum of positional error observed across every `reconcile` call that
    /// exceeded the threshold.
    pub accumulated_error: f64,
}

/// Reconciles locally predicted state against authoritative updates.
pub struct Reconciler {
    config: ReconcilerConfig,
    stats: ReconcilerStats,
}

impl Reconciler {
    /// Creates a reconciler with the given config.
    #[must_use]
    pub fn new(config: ReconcilerConfig) -> Self {
        Self { config, stats: ReconcilerStats::default() }
    }

    /// Current statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> ReconcilerStats {
        self.stats
    }

    /// Reconciles `client_transform` (the locally predicted state) against
    /// `server_transform`, the authoritative update carrying
    /// `last_processed_input_sequence`.
    ///
    /// Returns the reconciled transform on success. Returns
    /// [`ReplicationError::ReconciliationUnsupported`] only when
    /// [`ReconciliationMode::Full`] is selected and either `predictor` or
    /// `input_buffer` is `None`; per policy the caller should then use
    /// `server_transform` unchanged.
    pub fn reconcile(
        &mut self,
        client_transform: Transform,
        server_transform: Transform,
        last_processed_input_sequence: u64,
        predictor: Option<&Predictor>,
        input_buffer: Option<&mut InputBuffer>,
    ) -> Result<Transform, ReplicationError> {
        let error = client_transform.position.distance(server_transform.position);

        if error < self.config.reconciliation_threshold {
            return Ok(client_transform);
        }

        self.stats.reconciliation_count += 1;
        self.stats.accumulated_error += error;

        match self.config.mode {
            ReconciliationMode::Quick => {
                let t = (error / 5.0).min(0.5);
                Ok(client_transform.lerp(server_transform, t))
            }
            ReconciliationMode::Full => {
                let (Some(predictor), Some(input_buffer)) = (predictor, input_buffer) else {
                    warn!("full reconciliation requested without predictor or input buffer");
                    return Err(ReplicationError::ReconciliationUnsupported);
                };

                let previous_timestamp_ms = input_buffer.get(last_processed_input_sequence).map(|r| r.timestamp_ms);
                input_buffer.mark_processed(last_processed_input_sequence);
                let unprocessed = input_buffer.get_after(last_processed_input_sequence);
                Ok(predictor.predict_sequence(&unprocessed, server_transform, previous_timestamp_ms))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{InputBufferConfig, InputRecord, InputState};
    use crate::prediction::PredictorConfig;
    use tethernet_shared::{Quaternion, Vec3};

    fn forward_input() -> InputState {
        InputState { forward: true, ..InputState::default() }
    }

    #[test]
    fn below_threshold_returns_client_unchanged() {
        let mut reconciler = Reconciler::new(ReconcilerConfig::default());
        let client = Transform::new(Vec3::new(0.0, 0.0, 0.01), Quaternion::IDENTITY, Vec3::ONE);
        let server = Transform::IDENTITY;
        let result = reconciler.reconcile(client, server, 0, None, None).unwrap();
        assert_eq!(result, client);
    }

    #[test]
    fn full_reconciliation_replays_scenario_c() {
        let mut reconciler = Reconciler::new(ReconcilerConfig::default());
        let predictor = Predictor::new(PredictorConfig { speed: 5.0, ..PredictorConfig::default() });
        let mut input_buffer = InputBuffer::new(InputBufferConfig::default());

        input_buffer.record(forward_input(), 0.0);
        input_buffer.record(forward_input(), 16.0);
        input_buffer.record(forward_input(), 32.0);

        let client_predicted = Transform::new(Vec3::new(0.0, 0.0, -0.24), Quaternion::IDENTITY, Vec3::ONE);
        let server_transform = Transform::new(Vec3::new(0.0, 0.0, -0.08), Quaternion::IDENTITY, Vec3::ONE);

        let result = reconciler
            .reconcile(client_predicted, server_transform, 1, Some(&predictor), Some(&mut input_buffer))
            .unwrap();

        assert!((result.position.z - (-0.24)).abs() < 1e-6);
        assert_eq!(reconciler.stats().reconciliation_count, 1);
    }

    #[test]
    fn full_mode_without_predictor_is_unsupported() {
        let mut reconciler = Reconciler::new(ReconcilerConfig::default());
        let client = Transform::new(Vec3::new(0.0, 0.0, 5.0), Quaternion::IDENTITY, Vec3::ONE);
        let server = Transform::IDENTITY;
        let result = reconciler.reconcile(client, server, 0, None, None);
        assert!(matches!(result, Err(ReplicationError::ReconciliationUnsupported)));
    }

    #[test]
    fn quick_mode_blends_by_capped_error_ratio() {
        let mut reconciler = Reconciler::new(ReconcilerConfig { mode: ReconciliationMode::Quick, ..ReconcilerConfig::default() });
        let client = Transform::new(Vec3::new(10.0, 0.0, 0.0), Quaternion::IDENTITY, Vec3::ONE);
        let server = Transform::IDENTITY;
        let result = reconciler.reconcile(client, server, 0, None, None).unwrap();
        // error = 10, t capped at 0.5
        assert!((result.position.x - 5.0).abs() < 1e-9);
    }

    #[test]
    fn reconcile_idempotence() {
        let mut reconciler = Reconciler::new(ReconcilerConfig { mode: ReconciliationMode::Quick, ..ReconcilerConfig::default() });
        let client = Transform::new(Vec3::new(10.0, 0.0, 0.0), Quaternion::IDENTITY, Vec3::ONE);
        let server = Transform::IDENTITY;
        let first = reconciler.reconcile(client, server, 0, None, None).unwrap();
        let second = reconciler.reconcile(client, server, 0, None, None).unwrap();
        assert_eq!(first, second);
    }
}
