//! Networked state replication core: snapshot interpolation, client-side
//! prediction with server reconciliation, lag compensation, delta
//! compression, state caching, and the surrounding packet/transport-facing
//! plumbing that ties all of it together for a real-time multiplayer
//! runtime.
//!
//! Modules are layered so dependencies only point "down":
//! [`ring_buffer`] and [`delta`] are leaves; [`cache`] builds on both
//! without reaching into [`snapshot`], avoiding the cyclic reference the
//! source implementation has between its snapshot cache and interpolation
//! engine (see the module docs on [`cache`] for the resulting shape).
//! [`orchestrator`] sits on top and owns one instance of everything else.

pub mod cache;
pub mod delta;
pub mod error;
pub mod events;
pub mod input;
pub mod lag_compensation;
pub mod orchestrator;
pub mod packet;
pub mod prediction;
pub mod reconciliation;
pub mod reliable;
pub mod ring_buffer;
pub mod snapshot;
pub mod spline;
pub mod time_sync;

pub use error::{ReplicationError, ReplicationResult};
pub use events::{EventChannel, ReplicationEvent};
pub use orchestrator::{EntityPhase, EntityRecord, Orchestrator, OrchestratorConfig};
pub use packet::{MockRoomStateStore, MockTransport, RoomStateStore, SuperCompressedUpdate, Transport};
