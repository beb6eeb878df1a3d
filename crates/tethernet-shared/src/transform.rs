//! Rigid-plus-scale transform, the unit of state the replication core moves
//! around: entity position, orientation, and non-uniform scale.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

use crate::math::{Quaternion, Vec3};

/// Position, rotation, and scale of an entity at a single instant.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Transform {
    /// World-space position.
    pub position: Vec3,
    /// Orientation.
    pub rotation: Quaternion,
    /// Non-uniform scale.
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    /// Identity transform: origin, no rotation, unit scale.
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quaternion::IDENTITY,
        scale: Vec3::ONE,
    };

    /// Creates a transform from its three components.
    #[must_use]
    pub const fn new(position: Vec3, rotation: Quaternion, scale: Vec3) -> Self {
        Self { position, rotation, scale }
    }

    /// Componentwise linear interpolation on position and scale, spherical
    /// linear interpolation on rotation. This is the blend used for
    /// straight two-keyframe interpolation; spline-based blends live in
    /// `tethernet_replication::spline`.
    #[must_use]
    pub fn lerp(self, other: Self, t: f64) -> Self {
        Self {
            position: self.position.lerp(other.position, t),
            rotation: self.rotation.slerp(other.rotation, t),
            scale: self.scale.lerp(other.scale, t),
        }
    }

    /// Composes this transform into a 4x4 matrix.
    #[must_use]
    pub fn to_matrix(self) -> crate::math::Matrix4 {
        crate::math::Matrix4::compose(self.position, self.rotation, self.scale)
    }

    /// Rebuilds a transform from a composed matrix.
    #[must_use]
    pub fn from_matrix(m: crate::math::Matrix4) -> Self {
        let (position, rotation, scale) = m.decompose();
        Self { position, rotation, scale }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_identity() {
        assert_eq!(Transform::default(), Transform::IDENTITY);
    }

    #[test]
    fn lerp_at_zero_and_one_returns_endpoints() {
        let a = Transform::new(Vec3::ZERO, Quaternion::IDENTITY, Vec3::ONE);
        let b = Transform::new(
            Vec3::new(10.0, 0.0, 0.0),
            Quaternion::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), 1.0),
            Vec3::new(2.0, 2.0, 2.0),
        );

        assert_eq!(a.lerp(b, 0.0), a);
        assert!(a.lerp(b, 1.0).position.distance(b.position) < 1e-9);
    }

    #[test]
    fn matrix_round_trip_preserves_transform() {
        let t = Transform::new(
            Vec3::new(1.0, 2.0, 3.0),
            Quaternion::from_axis_angle(Vec3::new(0.3, 0.7, 0.1), 0.9),
            Vec3::new(1.5, 1.0, 0.5),
        );
        let round_tripped = Transform::from_matrix(t.to_matrix());
        assert!(round_tripped.position.distance(t.position) < 1e-9);
        assert!(round_tripped.scale.distance(t.scale) < 1e-9);
    }
}
