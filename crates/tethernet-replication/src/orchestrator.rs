//! Replication orchestrator (C13): owns the entity registry and every other
//! component instance, and is the only thing allowed to mutate per-entity
//! state. Per the scheduling model this assumes a single-threaded
//! cooperative event loop — the transport callback, the render callback,
//! and the periodic tickers all post through the same queue upstream of
//! this type, so nothing here needs internal locking.

use std::collections::HashMap;

use tethernet_shared::{Clock, Transform};

use crate::cache::CacheConfig;
use crate::delta::DeltaConfig;
use crate::events::{EventChannel, ReplicationEvent};
use crate::input::{InputBuffer, InputBufferConfig, InputState};
use crate::lag_compensation::{LagCompensator, LagCompensatorConfig};
use crate::packet::{room_state_key, PersistedEntityState, PersistedRoomState, RoomStateStore};
use crate::prediction::{Predictor, PredictorConfig};
use crate::reconciliation::{Reconciler, ReconcilerConfig};
use crate::reliable::{DeliveryOutcome, ReliableChannel, ReliableChannelConfig};
use crate::snapshot::{Snapshot, SnapshotConfig, SnapshotStore};
use crate::time_sync::{TimeSample, TimeSync, TimeSyncConfig};
use crate::ReplicationError;

/// Where an entity sits in the orchestrator's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityPhase {
    /// Referenced (e.g. by id in a room roster) but no state observed yet.
    Pending,
    /// Receiving or producing updates normally.
    Active,
    /// No update observed for `entity_ttl_ms`; eligible for eviction.
    ///
    /// Local-owned entities never enter this phase.
    Stale,
    /// Removed from the registry; the record is kept only transiently for
    /// the caller that triggered the removal, then dropped.
    Removed,
}

/// Per-entity bookkeeping owned by the orchestrator.
#[derive(Debug, Clone)]
pub struct EntityRecord {
    /// Entity identifier.
    pub id: String,
    /// Current owning peer, if any.
    pub owner_id: Option<String>,
    /// Most recently applied transform.
    pub latest: Transform,
    /// Timestamp `latest` was recorded at, in milliseconds.
    pub latest_timestamp_ms: f64,
    /// Whether this entity is integrated and predicted locally (`true`) or
    /// driven by inbound authoritative snapshots (`false`).
    pub is_local_owned: bool,
    /// Current lifecycle phase.
    pub phase: EntityPhase,
}

/// Tunables for [`Orchestrator`], aggregating every subcomponent's config.
pub struct OrchestratorConfig {
    /// Milliseconds without an update before a remote entity goes `Stale`.
    pub entity_ttl_ms: f64,
    /// Event queue capacity; `0` means unbounded.
    pub event_queue_capacity: usize,
    /// Snapshot store config, shared by every remote entity.
    pub snapshot_config: SnapshotConfig,
    /// State cache config.
    pub cache_config: CacheConfig,
    /// Input buffer config, used for every local-owned entity.
    pub input_buffer_config: InputBufferConfig,
    /// Local prediction config.
    pub predictor_config: PredictorConfig,
    /// Reconciliation config.
    pub reconciler_config: ReconcilerConfig,
    /// Lag compensation smoothing config.
    pub lag_compensator_config: LagCompensatorConfig,
    /// Delta/quantization config, shared by cache and packet encoding.
    pub delta_config: DeltaConfig,
    /// Time-sync estimator config.
    pub time_sync_config: TimeSyncConfig,
    /// Reliable-channel config.
    pub reliable_config: ReliableChannelConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            entity_ttl_ms: 60_000.0,
            event_queue_capacity: 0,
            snapshot_config: SnapshotConfig::default(),
            cache_config: CacheConfig::default(),
            input_buffer_config: InputBufferConfig::default(),
            predictor_config: PredictorConfig::default(),
            reconciler_config: ReconcilerConfig::default(),
            lag_compensator_config: LagCompensatorConfig::default(),
            delta_config: DeltaConfig::default(),
            time_sync_config: TimeSyncConfig::default(),
            reliable_config: ReliableChannelConfig::default(),
        }
    }
}

/// Owns the entity registry and drives every other component. Routes
/// inbound packets into the snapshot store (remote entities) or the
/// reconciler/lag compensator (the local entity), and is the single point
/// that emits [`ReplicationEvent`]s.
pub struct Orchestrator {
    config: OrchestratorConfig,
    entities: HashMap<String, EntityRecord>,
    snapshots: SnapshotStore,
    input_buffers: HashMap<String, InputBuffer>,
    predictor: Predictor,
    reconciler: Reconciler,
    lag_compensator: LagCompensator,
    time_sync: TimeSync,
    reliable: ReliableChannel,
    events: EventChannel<ReplicationEvent>,
}

impl Orchestrator {
    /// Creates an orchestrator with the given configuration.
    #[must_use]
    pub fn new(config: OrchestratorConfig) -> Self {
        let events = if config.event_queue_capacity == 0 {
            EventChannel::unbounded()
        } else {
            EventChannel::bounded(config.event_queue_capacity)
        };

        Self {
            snapshots: SnapshotStore::new(config.snapshot_config),
            predictor: Predictor::new(config.predictor_config),
            reconciler: Reconciler::new(config.reconciler_config.clone()),
            lag_compensator: LagCompensator::new(config.lag_compensator_config),
            time_sync: TimeSync::new(config.time_sync_config),
            reliable: ReliableChannel::new(config.reliable_config),
            entities: HashMap::new(),
            input_buffers: HashMap::new(),
            events,
            config,
        }
    }

    /// Read-only access to an entity's current record.
    #[must_use]
    pub fn entity(&self, entity_id: &str) -> Option<&EntityRecord> {
        self.entities.get(entity_id)
    }

    /// The event queue other parts of the host application drain.
    #[must_use]
    pub fn events(&self) -> &EventChannel<ReplicationEvent> {
        &self.events
    }

    fn ensure_entity(&mut self, entity_id: &str, is_local_owned: bool, now_ms: f64) -> bool {
        if self.entities.contains_key(entity_id) {
            return false;
        }
        self.entities.insert(
            entity_id.to_string(),
            EntityRecord {
                id: entity_id.to_string(),
                owner_id: None,
                latest: Transform::IDENTITY,
                latest_timestamp_ms: now_ms,
                is_local_owned,
                phase: EntityPhase::Active,
            },
        );
        true
    }

    /// Registers a locally-owned entity (this peer predicts and integrates
    /// it directly). Emits `Connected`.
    pub fn register_local_entity(&mut self, entity_id: &str, initial: Transform, now_ms: f64) {
        self.entities.insert(
            entity_id.to_string(),
            EntityRecord {
                id: entity_id.to_string(),
                owner_id: None,
                latest: initial,
                latest_timestamp_ms: now_ms,
                is_local_owned: true,
                phase: EntityPhase::Active,
            },
        );
        self.input_buffers.insert(entity_id.to_string(), InputBuffer::new(self.config.input_buffer_config.clone()));
        let _ = self.events.send(ReplicationEvent::Connected { entity_id: entity_id.to_string() });
    }

    /// Records one tick's input for a local-owned entity, predicts its new
    /// transform from it, and stores the result as the entity's latest
    /// transform. Returns the predicted transform.
    ///
    /// # Errors
    /// Returns [`ReplicationError::MalformedPacket`] if `entity_id` is not a
    /// registered local-owned entity.
    pub fn integrate_local_input(
        &mut self,
        entity_id: &str,
        input: InputState,
        dt_s: f64,
        now_ms: f64,
    ) -> Result<Transform, ReplicationError> {
        let base = self
            .entities
            .get(entity_id)
            .filter(|e| e.is_local_owned)
            .map(|e| e.latest)
            .ok_or_else(|| ReplicationError::MalformedPacket { reason: format!("{entity_id} is not a local-owned entity") })?;

        let buffer = self
            .input_buffers
            .get_mut(entity_id)
            .ok_or_else(|| ReplicationError::MalformedPacket { reason: format!("no input buffer for {entity_id}") })?;
        buffer.record(input.clone(), now_ms);

        let predicted = self.predictor.predict(&input, dt_s, base);

        if let Some(record) = self.entities.get_mut(entity_id) {
            record.latest = predicted;
            record.latest_timestamp_ms = now_ms;
        }
        let _ = self.events.send(ReplicationEvent::EntityUpdated { entity_id: entity_id.to_string() });
        Ok(predicted)
    }

    /// Reconciles a local-owned entity's predicted state against an
    /// authoritative server transform, then runs the result through lag
    /// compensation smoothing. Returns the transform to render immediately.
    ///
    /// # Errors
    /// Propagates [`ReplicationError::ReconciliationUnsupported`] if the
    /// entity has no input buffer (i.e. is not local-owned).
    pub fn reconcile_local_entity(
        &mut self,
        entity_id: &str,
        server_transform: Transform,
        last_processed_input_sequence: u64,
        now_ms: f64,
    ) -> Result<Transform, ReplicationError> {
        let client_transform = self
            .entities
            .get(entity_id)
            .map(|e| e.latest)
            .ok_or_else(|| ReplicationError::MalformedPacket { reason: format!("unknown entity {entity_id}") })?;

        let reconciled = {
            let buffer = self.input_buffers.get_mut(entity_id);
            self.reconciler.reconcile(
                client_transform,
                server_transform,
                last_processed_input_sequence,
                Some(&self.predictor),
                buffer,
            )?
        };

        let compensated = self.lag_compensator.apply(entity_id, reconciled, server_transform, now_ms);

        if let Some(record) = self.entities.get_mut(entity_id) {
            record.latest = compensated;
            record.latest_timestamp_ms = now_ms;
        }
        let _ = self.events.send(ReplicationEvent::EntityUpdated { entity_id: entity_id.to_string() });
        Ok(compensated)
    }

    /// Advances lag-compensation smoothing for `entity_id` and returns the
    /// transform to render at `now_ms`.
    pub fn query_rendered_transform(&mut self, entity_id: &str, now_ms: f64) -> Transform {
        self.lag_compensator.query(entity_id, now_ms)
    }

    /// Feeds an inbound authoritative snapshot for a remote entity. Creates
    /// the entity (emitting `Connected`) if this is the first time it has
    /// been seen.
    pub fn handle_remote_snapshot(&mut self, entity_id: &str, transform: Transform, timestamp_ms: f64) {
        let created = self.ensure_entity(entity_id, false, timestamp_ms);
        if created {
            let _ = self.events.send(ReplicationEvent::Connected { entity_id: entity_id.to_string() });
        }

        self.snapshots.add_snapshot(entity_id, Snapshot::new(transform, timestamp_ms, entity_id, true));

        if let Some(record) = self.entities.get_mut(entity_id) {
            if timestamp_ms >= record.latest_timestamp_ms {
                record.latest = transform;
                record.latest_timestamp_ms = timestamp_ms;
            }
            record.phase = EntityPhase::Active;
        }

        let _ = self.events.send(ReplicationEvent::EntityUpdated { entity_id: entity_id.to_string() });
    }

    /// Interpolated (or bounded-extrapolated) transform for a remote entity
    /// at `render_time_ms`, per [`crate::snapshot::SnapshotStore::get_interpolated_transform`].
    #[must_use]
    pub fn interpolated_remote_transform(&self, entity_id: &str, render_time_ms: f64) -> Option<Transform> {
        self.snapshots.get_interpolated_transform(entity_id, render_time_ms)
    }

    /// Changes an entity's owner, emitting `OwnershipChanged`.
    pub fn set_owner(&mut self, entity_id: &str, owner_id: Option<String>) {
        if let Some(record) = self.entities.get_mut(entity_id) {
            record.owner_id = owner_id.clone();
        }
        let _ = self.events.send(ReplicationEvent::OwnershipChanged { entity_id: entity_id.to_string(), owner_id });
    }

    /// Explicitly removes an entity, regardless of its current phase.
    /// Emits `Disconnected` then `EntityRemoved`.
    pub fn remove_entity(&mut self, entity_id: &str) {
        if self.entities.remove(entity_id).is_none() {
            return;
        }
        self.input_buffers.remove(entity_id);
        self.snapshots.remove_entity(entity_id);
        self.lag_compensator.remove_entity(entity_id);

        let _ = self.events.send(ReplicationEvent::Disconnected { entity_id: entity_id.to_string() });
        let _ = self.events.send(ReplicationEvent::EntityRemoved { entity_id: entity_id.to_string() });
    }

    /// Advances time-based bookkeeping: snapshot retention eviction, and
    /// staleness detection/eviction for remote entities that have not
    /// received an update within `entity_ttl_ms`. Local-owned entities are
    /// never marked stale.
    pub fn tick(&mut self, now_ms: f64) {
        self.snapshots.update(now_ms);

        let stale: Vec<String> = self
            .entities
            .values()
            .filter(|e| !e.is_local_owned && e.phase == EntityPhase::Active)
            .filter(|e| now_ms - e.latest_timestamp_ms > self.config.entity_ttl_ms)
            .map(|e| e.id.clone())
            .collect();

        for entity_id in stale {
            if let Some(record) = self.entities.get_mut(&entity_id) {
                record.phase = EntityPhase::Stale;
            }
            self.remove_entity(&entity_id);
        }
    }

    /// Queues an outbound ping and returns its `(sequence, sent_ts)`.
    pub fn send_ping(&mut self, now_ms: f64) -> (u64, f64) {
        self.time_sync.send_ping(now_ms)
    }

    /// Processes an inbound pong.
    pub fn receive_pong(
        &mut self,
        sequence: u64,
        echoed_sent_ts: f64,
        remote_recv_ts: f64,
        now_ms: f64,
    ) -> Option<TimeSample> {
        self.time_sync.receive_pong(sequence, echoed_sent_ts, remote_recv_ts, now_ms)
    }

    /// Current smoothed one-way latency estimate.
    #[must_use]
    pub fn latency_ms(&self) -> Option<f64> {
        self.time_sync.latency_ms()
    }

    /// Queues `payload` for reliable delivery.
    pub fn send_reliable(&mut self, payload: Vec<u8>, now_ms: f64) -> u64 {
        self.reliable.sender.send(payload, now_ms)
    }

    /// Polls for reliable messages due for retransmission, surfacing any
    /// that exhausted their retry budget.
    pub fn poll_reliable_retransmits(&mut self, now_ms: f64) -> (Vec<(u64, Vec<u8>)>, Vec<ReplicationError>) {
        self.reliable.sender.poll_retransmits(now_ms)
    }

    /// Feeds one inbound reliable message.
    pub fn receive_reliable(&mut self, sequence: u64, payload: Vec<u8>) -> DeliveryOutcome {
        self.reliable.receiver.receive(sequence, payload)
    }

    /// Acks every in-flight reliable message up to and including `ack`.
    pub fn acknowledge_reliable(&mut self, ack: u64) {
        self.reliable.sender.acknowledge(ack);
    }

    /// Serializes every currently known entity's latest state into
    /// `store` under `room_id`.
    ///
    /// # Errors
    /// Propagates whatever `store.save` returns.
    pub fn serialize_room_state(
        &self,
        room_id: &str,
        store: &dyn RoomStateStore,
        clock: &dyn Clock,
    ) -> Result<(), ReplicationError> {
        let mut state = PersistedRoomState::default();
        for record in self.entities.values() {
            state.entities.insert(
                record.id.clone(),
                PersistedEntityState {
                    entity_id: record.id.clone(),
                    transform: record.latest,
                    timestamp_ms: record.latest_timestamp_ms,
                },
            );
        }
        state.last_update_ms = clock.now_millis();
        store.save(room_id, &state)
    }

    /// Restores entities from a previously persisted room snapshot,
    /// registering any unknown ids as remote entities.
    ///
    /// # Errors
    /// Propagates whatever `store.load` returns.
    pub fn restore_room_state(&mut self, room_id: &str, store: &dyn RoomStateStore) -> Result<(), ReplicationError> {
        let Some(state) = store.load(room_id)? else { return Ok(()) };

        for (entity_id, persisted) in state.entities {
            self.handle_remote_snapshot(&entity_id, persisted.transform, persisted.timestamp_ms);
        }
        Ok(())
    }

    /// Convenience accessor for the storage key a [`RoomStateStore`]
    /// implementation will see for `room_id`.
    #[must_use]
    pub fn room_state_key(room_id: &str) -> String {
        room_state_key(room_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::MockRoomStateStore;
    use tethernet_shared::FakeClock;

    #[test]
    fn registering_local_entity_emits_connected() {
        let mut orchestrator = Orchestrator::new(OrchestratorConfig::default());
        orchestrator.register_local_entity("player-1", Transform::IDENTITY, 0.0);

        let events = orchestrator.events().drain();
        assert_eq!(events, vec![ReplicationEvent::Connected { entity_id: "player-1".into() }]);
        assert!(orchestrator.entity("player-1").unwrap().is_local_owned);
    }

    #[test]
    fn remote_snapshot_creates_entity_and_updates_latest() {
        let mut orchestrator = Orchestrator::new(OrchestratorConfig::default());
        let transform = Transform::new(tethernet_shared::Vec3::new(1.0, 0.0, 0.0), tethernet_shared::Quaternion::IDENTITY, tethernet_shared::Vec3::ONE);
        orchestrator.handle_remote_snapshot("enemy-1", transform, 10.0);

        let record = orchestrator.entity("enemy-1").unwrap();
        assert!(!record.is_local_owned);
        assert_eq!(record.latest_timestamp_ms, 10.0);

        let events = orchestrator.events().drain();
        assert!(events.contains(&ReplicationEvent::Connected { entity_id: "enemy-1".into() }));
        assert!(events.contains(&ReplicationEvent::EntityUpdated { entity_id: "enemy-1".into() }));
    }

    #[test]
    fn stale_remote_entity_is_evicted_on_tick() {
        let config = OrchestratorConfig { entity_ttl_ms: 1000.0, ..OrchestratorConfig::default() };
        let mut orchestrator = Orchestrator::new(config);
        orchestrator.handle_remote_snapshot("enemy-1", Transform::IDENTITY, 0.0);
        orchestrator.events().drain();

        orchestrator.tick(5000.0);

        assert!(orchestrator.entity("enemy-1").is_none());
        let events = orchestrator.events().drain();
        assert!(events.contains(&ReplicationEvent::EntityRemoved { entity_id: "enemy-1".into() }));
    }

    #[test]
    fn local_owned_entity_never_goes_stale() {
        let config = OrchestratorConfig { entity_ttl_ms: 10.0, ..OrchestratorConfig::default() };
        let mut orchestrator = Orchestrator::new(config);
        orchestrator.register_local_entity("player-1", Transform::IDENTITY, 0.0);

        orchestrator.tick(100_000.0);

        assert!(orchestrator.entity("player-1").is_some());
    }

    #[test]
    fn explicit_removal_emits_both_events() {
        let mut orchestrator = Orchestrator::new(OrchestratorConfig::default());
        orchestrator.register_local_entity("player-1", Transform::IDENTITY, 0.0);
        orchestrator.events().drain();

        orchestrator.remove_entity("player-1");
        let events = orchestrator.events().drain();
        assert_eq!(
            events,
            vec![
                ReplicationEvent::Disconnected { entity_id: "player-1".into() },
                ReplicationEvent::EntityRemoved { entity_id: "player-1".into() },
            ]
        );
    }

    #[test]
    fn room_state_round_trips_through_store() {
        let mut orchestrator = Orchestrator::new(OrchestratorConfig::default());
        let transform = Transform::new(tethernet_shared::Vec3::new(2.0, 0.0, 0.0), tethernet_shared::Quaternion::IDENTITY, tethernet_shared::Vec3::ONE);
        orchestrator.handle_remote_snapshot("enemy-1", transform, 5.0);

        let store = MockRoomStateStore::new();
        let clock = FakeClock::new(42.0);
        orchestrator.serialize_room_state("room-a", &store, &clock).unwrap();

        let mut restored = Orchestrator::new(OrchestratorConfig::default());
        restored.restore_room_state("room-a", &store).unwrap();

        let record = restored.entity("enemy-1").unwrap();
        assert!(record.latest.position.distance(transform.position) < 1e-9);
    }

    #[test]
    fn reliable_and_time_sync_are_driven_through_orchestrator() {
        let mut orchestrator = Orchestrator::new(OrchestratorConfig::default());
        let (seq, sent_ts) = orchestrator.send_ping(0.0);
        orchestrator.receive_pong(seq, sent_ts, 5.0, 10.0);
        assert!(orchestrator.latency_ms().is_some());

        let msg_seq = orchestrator.send_reliable(vec![1, 2, 3], 0.0);
        orchestrator.acknowledge_reliable(msg_seq);
    }
}
