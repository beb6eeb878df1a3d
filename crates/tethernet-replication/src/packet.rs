//! Wire-facing packet layer: the JSON control/event packet used for
//! signaling, the binary header carried by every reliable-channel message,
//! the reliable-channel entity-update envelope (full/delta/position-only
//! payload behind a sequenced header), the literal §6 "super-compressed
//! entity update" format (string id, combined position+rotation, no
//! sequencing), a small LZ77 compressor for the JSON path, and the per-room
//! persisted-state types plus the [`RoomStateStore`] boundary.
//!
//! Binary entity updates never go through LZ77 — they are already packed to
//! near their information-theoretic floor by [`crate::delta`]'s quantized
//! encodings, and re-running a byte-oriented compressor over them wastes
//! cycles for no gain. LZ77 compression is only offered for the JSON packet
//! path, where repeated key names make it worthwhile.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use tethernet_shared::{Quaternion, Transform, Vec3};

use crate::delta::{
    decode_delta_binary, decode_full_transform, decode_position_quantized, decode_smallest_three, encode_delta_binary,
    encode_full_transform, encode_position_quantized, encode_smallest_three, DeltaConfig, TransformDelta,
};
use crate::error::ReplicationError;

/// Discriminates the payload carried by a [`JsonPacket`] or the binary
/// envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacketType {
    /// Client -> server: one tick's input state.
    Input,
    /// Server -> client: full authoritative snapshot for one or more entities.
    Snapshot,
    /// Server -> client: delta-compressed update for one or more entities.
    DeltaSnapshot,
    /// Bidirectional: ownership or lifecycle change for an entity.
    EntityEvent,
    /// Bidirectional: round-trip time probe.
    Ping,
    /// Bidirectional: round-trip time probe reply.
    Pong,
    /// Bidirectional: connection handshake.
    Connect,
    /// Server -> client: handshake accepted.
    ConnectAck,
    /// Bidirectional: keep-alive.
    Heartbeat,
    /// Bidirectional: graceful disconnect notice.
    Disconnect,
}

/// The JSON-encoded control/event packet. Used for anything that isn't
/// high-frequency per-tick entity state: handshake, heartbeats, time sync,
/// lifecycle events. `body` carries type-specific fields as a loosely typed
/// map so new fields can be added without breaking older peers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonPacket {
    /// What kind of packet this is.
    pub packet_type: PacketType,
    /// Sender-local send timestamp in milliseconds, for latency accounting.
    pub sent_at_ms: f64,
    /// Type-specific payload.
    pub body: HashMap<String, Value>,
}

impl JsonPacket {
    /// Creates a packet with an empty body.
    #[must_use]
    pub fn new(packet_type: PacketType, sent_at_ms: f64) -> Self {
        Self { packet_type, sent_at_ms, body: HashMap::new() }
    }

    /// Sets a field on the body, builder-style.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.body.insert(key.into(), value.into());
        self
    }

    /// Serializes to JSON bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ReplicationError> {
        serde_json::to_vec(self).map_err(|e| ReplicationError::MalformedPacket { reason: e.to_string() })
    }

    /// Parses a packet from JSON bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, ReplicationError> {
        serde_json::from_slice(bytes).map_err(|e| ReplicationError::MalformedPacket { reason: e.to_string() })
    }

    /// Serializes to JSON then LZ77-compresses the result, prefixing the
    /// uncompressed length as a little-endian `u32` so the receiver can
    /// preallocate the output buffer.
    pub fn encode_compressed(&self) -> Result<Vec<u8>, ReplicationError> {
        let raw = self.encode()?;
        let compressed = lz77_compress(&raw);
        let mut out = Vec::with_capacity(4 + compressed.len());
        out.extend_from_slice(&(raw.len() as u32).to_le_bytes());
        out.extend_from_slice(&compressed);
        Ok(out)
    }

    /// Inverse of [`JsonPacket::encode_compressed`].
    pub fn decode_compressed(bytes: &[u8]) -> Result<Self, ReplicationError> {
        if bytes.len() < 4 {
            return Err(ReplicationError::MalformedPacket { reason: "compressed packet too short".into() });
        }
        let expected_len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let raw = lz77_decompress(&bytes[4..], expected_len)?;
        Self::decode(&raw)
    }
}

/// 12-byte header prefixing every reliable-channel message on the wire:
/// sequence number, cumulative ack, and a bitmask of the 32 sequences
/// preceding `ack` that have also been received (redundancy against a
/// lost ack packet).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// This message's sequence number.
    pub sequence: u32,
    /// Highest contiguous sequence the sender has received from the peer.
    pub ack: u32,
    /// Bitmask covering `ack-1` through `ack-32`.
    pub ack_bits: u32,
}

impl PacketHeader {
    /// Encoded size in bytes.
    pub const SIZE: usize = 12;

    /// Creates a new header.
    #[must_use]
    pub const fn new(sequence: u32, ack: u32, ack_bits: u32) -> Self {
        Self { sequence, ack, ack_bits }
    }

    /// Encodes to little-endian bytes.
    #[must_use]
    pub fn encode(self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.sequence.to_le_bytes());
        out[4..8].copy_from_slice(&self.ack.to_le_bytes());
        out[8..12].copy_from_slice(&self.ack_bits.to_le_bytes());
        out
    }

    /// Decodes from little-endian bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, ReplicationError> {
        if bytes.len() < Self::SIZE {
            return Err(ReplicationError::MalformedPacket { reason: "header too short".into() });
        }
        Ok(Self {
            sequence: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            ack: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
            ack_bits: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
        })
    }
}

/// Which variant of the compact entity-update encoding follows the header:
/// a full transform, a quantized/masked delta, or a bare quantized
/// position-only update (used for the highest-frequency, least-important
/// traffic, e.g. distant entities).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntityUpdateKind {
    /// Followed by [`crate::delta::encode_full_transform`]'s 40 bytes.
    Full = 0,
    /// Followed by [`crate::delta::encode_delta_binary`]'s variable-length payload.
    Delta = 1,
    /// Followed by [`crate::delta::encode_position_quantized`]'s 6 bytes.
    PositionOnly = 2,
}

impl EntityUpdateKind {
    fn from_u8(value: u8) -> Result<Self, ReplicationError> {
        match value {
            0 => Ok(Self::Full),
            1 => Ok(Self::Delta),
            2 => Ok(Self::PositionOnly),
            other => Err(ReplicationError::MalformedPacket { reason: format!("unknown entity update kind {other}") }),
        }
    }
}

/// One entity's binary state update: a [`PacketHeader`] followed by an
/// entity id, an update kind tag, and that kind's payload. This is the
/// sequenced, reliable-channel-facing sibling of [`SuperCompressedUpdate`] —
/// it carries a numeric entity id and a tick rather than a string id, and
/// its `Delta`/`PositionOnly` variants reuse [`crate::delta`]'s general
/// encodings rather than the fixed pos+rot layout the spec names
/// "super-compressed". Never wrapped in JSON or LZ77.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityUpdate {
    /// Reliable-channel header.
    pub header: PacketHeader,
    /// Entity this update describes.
    pub entity_id: u32,
    /// Server tick (or client-predicted tick) this update corresponds to.
    pub tick: u32,
    /// The update payload.
    pub kind: EntityUpdateBody,
}

/// Payload variants for [`EntityUpdate`].
#[derive(Debug, Clone, PartialEq)]
pub enum EntityUpdateBody {
    /// Full, uncompressed transform.
    Full(Transform),
    /// Quantized delta against a previously agreed base.
    Delta(TransformDelta),
    /// Quantized position only.
    PositionOnly(tethernet_shared::Vec3),
}

impl EntityUpdate {
    /// Encodes this update to its wire form.
    pub fn encode(&self, delta_config: &DeltaConfig) -> Vec<u8> {
        let mut out = Vec::with_capacity(PacketHeader::SIZE + 9 + 40);
        out.extend_from_slice(&self.header.encode());
        out.extend_from_slice(&self.entity_id.to_le_bytes());
        out.extend_from_slice(&self.tick.to_le_bytes());

        match &self.kind {
            EntityUpdateBody::Full(transform) => {
                out.push(EntityUpdateKind::Full as u8);
                out.extend_from_slice(&encode_full_transform(*transform));
            }
            EntityUpdateBody::Delta(delta) => {
                out.push(EntityUpdateKind::Delta as u8);
                out.extend_from_slice(&encode_delta_binary(delta, delta_config));
            }
            EntityUpdateBody::PositionOnly(position) => {
                out.push(EntityUpdateKind::PositionOnly as u8);
                out.extend_from_slice(&encode_position_quantized(*position));
            }
        }

        out
    }

    /// Decodes a wire-form update.
    pub fn decode(bytes: &[u8], delta_config: &DeltaConfig) -> Result<Self, ReplicationError> {
        let header = PacketHeader::decode(bytes)?;
        let mut offset = PacketHeader::SIZE;

        let read_u32 = |bytes: &[u8], offset: usize| -> Result<u32, ReplicationError> {
            bytes
                .get(offset..offset + 4)
                .map(|s| u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
                .ok_or_else(|| ReplicationError::MalformedPacket { reason: "truncated entity update".into() })
        };

        let entity_id = read_u32(bytes, offset)?;
        offset += 4;
        let tick = read_u32(bytes, offset)?;
        offset += 4;

        let kind_tag = *bytes
            .get(offset)
            .ok_or_else(|| ReplicationError::MalformedPacket { reason: "missing entity update kind".into() })?;
        offset += 1;

        let kind = match EntityUpdateKind::from_u8(kind_tag)? {
            EntityUpdateKind::Full => EntityUpdateBody::Full(decode_full_transform(&bytes[offset..])?),
            EntityUpdateKind::Delta => EntityUpdateBody::Delta(decode_delta_binary(&bytes[offset..], delta_config)?),
            EntityUpdateKind::PositionOnly => {
                EntityUpdateBody::PositionOnly(decode_position_quantized(&bytes[offset..])?)
            }
        };

        Ok(Self { header, entity_id, tick, kind })
    }
}

/// Packet type tag for [`SuperCompressedUpdate`], matching spec §6's
/// `ENTITY_UPDATE = 10`.
pub const ENTITY_UPDATE_TYPE: u8 = 10;

/// The literal §6 "super-compressed entity update": `type(1)=ENTITY_UPDATE |
/// id_len:u8 | id:utf-8[id_len] | pos:3×i16 (bounds ±1000) | rot:smallest-three
/// (1+3×i16)`. No sequence header, no tick — this is the unreliable,
/// highest-frequency broadcast form used for entities where an occasional
/// dropped update is cheaper than the bytes a [`PacketHeader`] would add.
#[derive(Debug, Clone, PartialEq)]
pub struct SuperCompressedUpdate {
    /// String entity identifier (up to 255 UTF-8 bytes).
    pub entity_id: String,
    /// Position, quantized against the `±1000` bound.
    pub position: Vec3,
    /// Rotation, smallest-three encoded.
    pub rotation: Quaternion,
}

impl SuperCompressedUpdate {
    /// Encodes to the fixed wire layout.
    ///
    /// # Errors
    /// Returns [`ReplicationError::MalformedPacket`] if `entity_id` is
    /// longer than 255 UTF-8 bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ReplicationError> {
        let id_bytes = self.entity_id.as_bytes();
        if id_bytes.len() > u8::MAX as usize {
            return Err(malformed("entity id too long for super-compressed update"));
        }

        let mut out = Vec::with_capacity(2 + id_bytes.len() + 6 + 7);
        out.push(ENTITY_UPDATE_TYPE);
        out.push(id_bytes.len() as u8);
        out.extend_from_slice(id_bytes);
        out.extend_from_slice(&encode_position_quantized(self.position));
        out.extend_from_slice(&encode_smallest_three(self.rotation));
        Ok(out)
    }

    /// Decodes a buffer produced by [`SuperCompressedUpdate::encode`].
    ///
    /// # Errors
    /// Returns [`ReplicationError::MalformedPacket`] if the type tag isn't
    /// `ENTITY_UPDATE`, the buffer is truncated relative to `id_len`, or the
    /// id bytes aren't valid UTF-8.
    pub fn decode(bytes: &[u8]) -> Result<Self, ReplicationError> {
        let type_tag = *bytes.first().ok_or_else(|| malformed("empty super-compressed update"))?;
        if type_tag != ENTITY_UPDATE_TYPE {
            return Err(malformed(&format!("expected ENTITY_UPDATE type tag, found {type_tag}")));
        }

        let id_len = *bytes.get(1).ok_or_else(|| malformed("missing id_len"))? as usize;
        let id_start = 2;
        let id_end = id_start + id_len;
        let id_bytes = bytes.get(id_start..id_end).ok_or_else(|| malformed("truncated entity id"))?;
        let entity_id = String::from_utf8(id_bytes.to_vec()).map_err(|_| malformed("entity id is not valid utf-8"))?;

        let pos_bytes = bytes.get(id_end..id_end + 6).ok_or_else(|| malformed("truncated position"))?;
        let position = decode_position_quantized(pos_bytes)?;

        let rot_bytes = bytes.get(id_end + 6..id_end + 13).ok_or_else(|| malformed("truncated rotation"))?;
        let rotation = decode_smallest_three(rot_bytes)?;

        Ok(Self { entity_id, position, rotation })
    }
}

/// External collaborator boundary for the message-oriented bidirectional
/// channel the core sends/receives bytes over. Per the transport contract,
/// the core only needs `send` plus callback-delivered events; it never
/// specifies wire framing beyond the packet layer above.
pub trait Transport: Send + Sync {
    /// Sends a raw payload (already packet-encoded) to the peer.
    ///
    /// # Errors
    /// Returns [`ReplicationError::TransportUnavailable`] if no channel is
    /// open.
    fn send(&self, bytes: &[u8]) -> Result<(), ReplicationError>;

    /// Whether the channel is currently open and able to send.
    fn is_open(&self) -> bool;
}

/// In-memory [`Transport`] for tests: records every payload sent and can be
/// toggled closed to exercise the `TransportUnavailable` path.
#[derive(Default)]
pub struct MockTransport {
    open: parking_lot::Mutex<bool>,
    sent: parking_lot::Mutex<Vec<Vec<u8>>>,
}

impl MockTransport {
    /// Creates an open mock transport.
    #[must_use]
    pub fn new() -> Self {
        Self { open: parking_lot::Mutex::new(true), sent: parking_lot::Mutex::new(Vec::new()) }
    }

    /// Closes the channel; subsequent `send` calls fail.
    pub fn close(&self) {
        *self.open.lock() = false;
    }

    /// Every payload sent so far, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }
}

impl Transport for MockTransport {
    fn send(&self, bytes: &[u8]) -> Result<(), ReplicationError> {
        if !*self.open.lock() {
            return Err(ReplicationError::TransportUnavailable);
        }
        self.sent.lock().push(bytes.to_vec());
        Ok(())
    }

    fn is_open(&self) -> bool {
        *self.open.lock()
    }
}

/// One entity's transform plus identifying fields, the unit persisted by
/// [`RoomStateStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntityState {
    /// Entity identifier.
    pub entity_id: String,
    /// Last known transform.
    pub transform: Transform,
    /// Timestamp the transform was captured at, in milliseconds.
    pub timestamp_ms: f64,
}

/// A whole room's persisted entity snapshot, as written to and read from a
/// [`RoomStateStore`]. Mirrors the `{entities, lastUpdate}` shape used by
/// the source client for its local persistence fallback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedRoomState {
    /// Per-entity last-known state, keyed by entity id.
    pub entities: HashMap<String, PersistedEntityState>,
    /// Timestamp of the most recent update folded into this snapshot.
    pub last_update_ms: f64,
}

/// Storage key a [`RoomStateStore`] implementation should use for a given
/// room id, matching the naming convention of the source client's local
/// persistence.
#[must_use]
pub fn room_state_key(room_id: &str) -> String {
    format!("puppeteer_room_state_{room_id}")
}

/// External collaborator boundary for persisting and restoring per-room
/// entity state, so the replication core doesn't hardcode a storage
/// backend (disk, a key-value service, browser local storage on a wasm
/// target, ...).
pub trait RoomStateStore: Send + Sync {
    /// Persists `state` for `room_id`, overwriting any prior snapshot.
    fn save(&self, room_id: &str, state: &PersistedRoomState) -> Result<(), ReplicationError>;

    /// Loads the persisted snapshot for `room_id`, if one exists.
    fn load(&self, room_id: &str) -> Result<Option<PersistedRoomState>, ReplicationError>;

    /// Removes any persisted snapshot for `room_id`.
    fn clear(&self, room_id: &str) -> Result<(), ReplicationError>;
}

/// In-memory [`RoomStateStore`] for tests and single-process deployments.
#[derive(Default)]
pub struct MockRoomStateStore {
    rooms: parking_lot::Mutex<HashMap<String, PersistedRoomState>>,
}

impl MockRoomStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoomStateStore for MockRoomStateStore {
    fn save(&self, room_id: &str, state: &PersistedRoomState) -> Result<(), ReplicationError> {
        self.rooms.lock().insert(room_id.to_string(), state.clone());
        Ok(())
    }

    fn load(&self, room_id: &str) -> Result<Option<PersistedRoomState>, ReplicationError> {
        Ok(self.rooms.lock().get(room_id).cloned())
    }

    fn clear(&self, room_id: &str) -> Result<(), ReplicationError> {
        self.rooms.lock().remove(room_id);
        Ok(())
    }
}

const LZ77_MIN_MATCH: usize = 3;

/// Compresses `input` with a byte-oriented LZ77 variant: a back-reference
/// token is `[0x00, distance as u8, length as u8]` (distance and length
/// both 1-based, capped by [`tethernet_shared::constants::LZ77_WINDOW_SIZE`]
/// and 255 respectively); a literal token is `[0x01, byte]`.
#[must_use]
pub fn lz77_compress(input: &[u8]) -> Vec<u8> {
    let window = tethernet_shared::constants::LZ77_WINDOW_SIZE;
    let mut out = Vec::with_capacity(input.len());
    let mut pos = 0;

    while pos < input.len() {
        let window_start = pos.saturating_sub(window);
        let mut best_len = 0;
        let mut best_distance = 0;

        for candidate in window_start..pos {
            let max_len = (input.len() - pos).min(255).min(pos - candidate);
            let mut len = 0;
            while len < max_len && input[candidate + len] == input[pos + len] {
                len += 1;
            }
            if len > best_len {
                best_len = len;
                best_distance = pos - candidate;
            }
        }

        if best_len >= LZ77_MIN_MATCH {
            out.push(0x00);
            out.push(best_distance as u8);
            out.push(best_len as u8);
            pos += best_len;
        } else {
            out.push(0x01);
            out.push(input[pos]);
            pos += 1;
        }
    }

    out
}

/// Inverse of [`lz77_compress`]. `expected_len` is the uncompressed length
/// recorded out-of-band (see [`JsonPacket::encode_compressed`]'s length
/// prefix) and is used only to preallocate and as a sanity check.
pub fn lz77_decompress(input: &[u8], expected_len: usize) -> Result<Vec<u8>, ReplicationError> {
    let mut out = Vec::with_capacity(expected_len);
    let mut pos = 0;

    while pos < input.len() {
        let tag = input[pos];
        match tag {
            0x00 => {
                let distance = *input.get(pos + 1).ok_or_else(|| malformed("truncated back-reference"))? as usize;
                let length = *input.get(pos + 2).ok_or_else(|| malformed("truncated back-reference"))? as usize;
                if distance == 0 || distance > out.len() {
                    return Err(malformed("back-reference distance out of range"));
                }
                let start = out.len() - distance;
                for i in 0..length {
                    let byte = out[start + i];
                    out.push(byte);
                }
                pos += 3;
            }
            0x01 => {
                let byte = *input.get(pos + 1).ok_or_else(|| malformed("truncated literal"))?;
                out.push(byte);
                pos += 2;
            }
            other => return Err(malformed(&format!("unknown lz77 token {other}"))),
        }
    }

    if out.len() != expected_len {
        return Err(malformed("decompressed length mismatch"));
    }

    Ok(out)
}

fn malformed(reason: &str) -> ReplicationError {
    ReplicationError::MalformedPacket { reason: reason.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tethernet_shared::{Quaternion, Vec3};

    #[test]
    fn json_packet_round_trips() {
        let packet = JsonPacket::new(PacketType::Ping, 123.0).with_field("nonce", 7);
        let bytes = packet.encode().unwrap();
        let decoded = JsonPacket::decode(&bytes).unwrap();
        assert_eq!(decoded.packet_type, PacketType::Ping);
        assert_eq!(decoded.body.get("nonce").unwrap(), &Value::from(7));
    }

    #[test]
    fn json_packet_compressed_round_trips() {
        let packet = JsonPacket::new(PacketType::Heartbeat, 0.0)
            .with_field("room_id", "room-a")
            .with_field("room_id_again", "room-a");
        let compressed = packet.encode_compressed().unwrap();
        let decoded = JsonPacket::decode_compressed(&compressed).unwrap();
        assert_eq!(decoded.packet_type, PacketType::Heartbeat);
        assert_eq!(decoded.body.get("room_id").unwrap(), &Value::from("room-a"));
    }

    #[test]
    fn lz77_round_trips_repetitive_input() {
        let input = b"abcabcabcabcabcabcabc".to_vec();
        let compressed = lz77_compress(&input);
        assert!(compressed.len() < input.len());
        let decompressed = lz77_decompress(&compressed, input.len()).unwrap();
        assert_eq!(decompressed, input);
    }

    #[test]
    fn lz77_round_trips_non_repetitive_input() {
        let input: Vec<u8> = (0..64).collect();
        let compressed = lz77_compress(&input);
        let decompressed = lz77_decompress(&compressed, input.len()).unwrap();
        assert_eq!(decompressed, input);
    }

    #[test]
    fn lz77_round_trips_empty_input() {
        let compressed = lz77_compress(&[]);
        let decompressed = lz77_decompress(&compressed, 0).unwrap();
        assert!(decompressed.is_empty());
    }

    #[test]
    fn packet_header_round_trips() {
        let header = PacketHeader::new(42, 40, 0b1011);
        let bytes = header.encode();
        let decoded = PacketHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn entity_update_full_round_trips() {
        let header = PacketHeader::new(1, 0, 0);
        let transform = Transform::new(Vec3::new(1.0, 2.0, 3.0), Quaternion::IDENTITY, Vec3::ONE);
        let update = EntityUpdate { header, entity_id: 5, tick: 100, kind: EntityUpdateBody::Full(transform) };

        let config = DeltaConfig::default();
        let bytes = update.encode(&config);
        let decoded = EntityUpdate::decode(&bytes, &config).unwrap();
        assert_eq!(decoded.entity_id, 5);
        assert_eq!(decoded.tick, 100);
        match decoded.kind {
            EntityUpdateBody::Full(t) => assert!(t.position.distance(transform.position) < 1e-4),
            _ => panic!("expected full transform"),
        }
    }

    #[test]
    fn entity_update_delta_round_trips() {
        let header = PacketHeader::new(2, 1, 0b1);
        let base = Transform::IDENTITY;
        let current = Transform::new(Vec3::new(0.5, 0.0, 0.0), Quaternion::IDENTITY, Vec3::ONE);
        let config = DeltaConfig::default();
        let delta = crate::delta::compute_delta(base, current, &config);
        let update = EntityUpdate { header, entity_id: 9, tick: 200, kind: EntityUpdateBody::Delta(delta) };

        let bytes = update.encode(&config);
        let decoded = EntityUpdate::decode(&bytes, &config).unwrap();
        match decoded.kind {
            EntityUpdateBody::Delta(d) => assert!(d.changed()),
            _ => panic!("expected delta"),
        }
    }

    #[test]
    fn super_compressed_update_round_trips() {
        let update = SuperCompressedUpdate {
            entity_id: "enemy-42".to_string(),
            position: Vec3::new(12.5, -3.0, 400.0),
            rotation: Quaternion::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), 0.75),
        };

        let bytes = update.encode().unwrap();
        assert_eq!(bytes[0], ENTITY_UPDATE_TYPE);
        assert_eq!(bytes[1] as usize, update.entity_id.len());
        assert_eq!(bytes.len(), 2 + update.entity_id.len() + 6 + 7);

        let decoded = SuperCompressedUpdate::decode(&bytes).unwrap();
        assert_eq!(decoded.entity_id, update.entity_id);
        assert!((decoded.position.x - update.position.x).abs() < 1000.0 / 32767.0 + 1e-6);
        let angular_error = 1.0 - update.rotation.normalize().dot(decoded.rotation).abs();
        assert!(angular_error < 1e-6);
    }

    #[test]
    fn super_compressed_update_rejects_wrong_type_tag() {
        let mut bytes = SuperCompressedUpdate {
            entity_id: "e1".to_string(),
            position: Vec3::ZERO,
            rotation: Quaternion::IDENTITY,
        }
        .encode()
        .unwrap();
        bytes[0] = 99;
        assert!(matches!(SuperCompressedUpdate::decode(&bytes), Err(ReplicationError::MalformedPacket { .. })));
    }

    #[test]
    fn super_compressed_update_rejects_truncated_buffer() {
        let bytes = SuperCompressedUpdate {
            entity_id: "e1".to_string(),
            position: Vec3::ZERO,
            rotation: Quaternion::IDENTITY,
        }
        .encode()
        .unwrap();
        assert!(matches!(SuperCompressedUpdate::decode(&bytes[..bytes.len() - 3]), Err(ReplicationError::MalformedPacket { .. })));
    }

    #[test]
    fn room_state_key_matches_expected_format() {
        assert_eq!(room_state_key("room-42"), "puppeteer_room_state_room-42");
    }

    #[test]
    fn mock_transport_records_sent_payloads() {
        let transport = MockTransport::new();
        transport.send(&[1, 2, 3]).unwrap();
        assert_eq!(transport.sent(), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn closed_mock_transport_rejects_sends() {
        let transport = MockTransport::new();
        transport.close();
        assert!(!transport.is_open());
        assert!(matches!(transport.send(&[1]), Err(ReplicationError::TransportUnavailable)));
    }

    #[test]
    fn mock_room_state_store_round_trips() {
        let store = MockRoomStateStore::new();
        let mut state = PersistedRoomState::default();
        state.entities.insert(
            "e1".to_string(),
            PersistedEntityState { entity_id: "e1".to_string(), transform: Transform::IDENTITY, timestamp_ms: 10.0 },
        );
        state.last_update_ms = 10.0;

        store.save("room-a", &state).unwrap();
        let loaded = store.load("room-a").unwrap().unwrap();
        assert_eq!(loaded.entities.len(), 1);

        store.clear("room-a").unwrap();
        assert!(store.load("room-a").unwrap().is_none());
    }
}
