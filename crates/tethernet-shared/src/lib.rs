//! Math primitives, transform value types, and the injectable clock shared
//! by both halves of the replication core.
//!
//! CRITICAL RULE: this crate must never depend on anything transport- or
//! rendering-related. It is pure value types and pure functions so that both
//! a client and a server binary can share it without pulling in the other
//! side's concerns.

pub mod clock;
pub mod constants;
pub mod math;
pub mod transform;

pub use clock::{Clock, FakeClock, SystemClock};
pub use math::{Matrix4, Quaternion, Vec3};
pub use transform::Transform;
