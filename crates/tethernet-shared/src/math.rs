//! Math primitives shared between client and server.
//!
//! These are the canonical value types used throughout the replication core
//! and in the wire protocol. All operations are functional: they return new
//! values rather than mutating in place.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Tolerance used for unit-length and zero-length checks across this module.
pub const EPSILON: f64 = 1e-6;

/// 3D vector - position, velocity, direction, scale.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Vec3 {
    /// X component.
    pub x: f64,
    /// Y component.
    pub y: f64,
    /// Z component.
    pub z: f64,
}

impl Vec3 {
    /// Zero vector.
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);
    /// Vector of ones, the default scale.
    pub const ONE: Self = Self::new(1.0, 1.0, 1.0);

    /// Creates a new vector.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Componentwise addition.
    #[must_use]
    pub fn add(self, other: Self) -> Self {
        Self::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    /// Componentwise subtraction.
    #[must_use]
    pub fn sub(self, other: Self) -> Self {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    /// Uniform scalar multiply.
    #[must_use]
    pub fn scale(self, s: f64) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }

    /// Dot product.
    #[must_use]
    pub fn dot(self, other: Self) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Cross product.
    #[must_use]
    pub fn cross(self, other: Self) -> Self {
        Self::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    /// Squared length (avoids the sqrt call).
    #[must_use]
    pub fn length_squared(self) -> f64 {
        self.dot(self)
    }

    /// Length.
    #[must_use]
    pub fn length(self) -> f64 {
        self.length_squared().sqrt()
    }

    /// Distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        self.sub(other).length()
    }

    /// Normalizes the vector. Returns the zero vector if length is at or
    /// below `EPSILON`, rather than dividing by a near-zero value.
    #[must_use]
    pub fn normalize(self) -> Self {
        let len = self.length();
        if len <= EPSILON {
            return Self::ZERO;
        }
        self.scale(1.0 / len)
    }

    /// Linear interpolation between two vectors.
    #[must_use]
    pub fn lerp(self, other: Self, t: f64) -> Self {
        Self::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
            self.z + (other.z - self.z) * t,
        )
    }
}

impl std::ops::Add for Vec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::add(self, rhs)
    }
}

impl std::ops::Sub for Vec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::sub(self, rhs)
    }
}

impl std::ops::Mul<f64> for Vec3 {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        Self::scale(self, rhs)
    }
}

impl std::ops::Neg for Vec3 {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// Unit quaternion used for orientation.
///
/// Invariant: after any constructor that claims normalization, `|q|^2` lies
/// within `[1 - EPSILON, 1 + EPSILON]`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Quaternion {
    /// X component.
    pub x: f64,
    /// Y component.
    pub y: f64,
    /// Z component.
    pub z: f64,
    /// W (scalar) component.
    pub w: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quaternion {
    /// Identity rotation.
    pub const IDENTITY: Self = Self::new(0.0, 0.0, 0.0, 1.0);

    /// Creates a new quaternion from raw components.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    /// Creates a rotation of `angle` radians around `axis`.
    #[must_use]
    pub fn from_axis_angle(axis: Vec3, angle: f64) -> Self {
        let axis = axis.normalize();
        let half = angle * 0.5;
        let s = half.sin();
        Self::new(axis.x * s, axis.y * s, axis.z * s, half.cos())
    }

    /// Squared length.
    #[must_use]
    pub fn length_squared(self) -> f64 {
        self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w
    }

    /// Length.
    #[must_use]
    pub fn length(self) -> f64 {
        self.length_squared().sqrt()
    }

    /// Normalizes the quaternion, returning identity if its length is at or
    /// below `EPSILON`.
    #[must_use]
    pub fn normalize(self) -> Self {
        let len = self.length();
        if len <= EPSILON {
            return Self::IDENTITY;
        }
        let inv = 1.0 / len;
        Self::new(self.x * inv, self.y * inv, self.z * inv, self.w * inv)
    }

    /// Hamilton product `self * other`.
    #[must_use]
    pub fn multiply(self, other: Self) -> Self {
        Self::new(
            self.w * other.x + self.x * other.w + self.y * other.z - self.z * other.y,
            self.w * other.y - self.x * other.z + self.y * other.w + self.z * other.x,
            self.w * other.z + self.x * other.y - self.y * other.x + self.z * other.w,
            self.w * other.w - self.x * other.x - self.y * other.y - self.z * other.z,
        )
    }

    /// Conjugate divided by squared length; for a unit quaternion this is
    /// just the conjugate.
    #[must_use]
    pub fn inverse(self) -> Self {
        let len_sq = self.length_squared();
        if len_sq <= EPSILON {
            return Self::IDENTITY;
        }
        let inv = 1.0 / len_sq;
        Self::new(-self.x * inv, -self.y * inv, -self.z * inv, self.w * inv)
    }

    /// Dot product between two quaternions (cosine of the half-angle
    /// between them when both are unit length).
    #[must_use]
    pub fn dot(self, other: Self) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z + self.w * other.w
    }

    /// Rotates a vector by this quaternion. Treats the vector as a pure
    /// quaternion and applies `q * v * q^-1`.
    #[must_use]
    pub fn rotate_vec3(self, v: Vec3) -> Vec3 {
        let qv = Self::new(v.x, v.y, v.z, 0.0);
        let result = self.multiply(qv).multiply(self.inverse());
        Vec3::new(result.x, result.y, result.z)
    }

    /// Spherical linear interpolation.
    ///
    /// Chooses the shorter arc by flipping the sign of `other` when the dot
    /// product is negative, clamps the dot product to `[-1, 1]`, and falls
    /// back to a normalized linear interpolation when the quaternions are
    /// nearly parallel (`dot > 0.9995`) to avoid dividing by a near-zero
    /// `sin(theta)`.
    #[must_use]
    pub fn slerp(self, other: Self, t: f64) -> Self {
        let mut to = other;
        let mut dot = self.dot(other);

        if dot < 0.0 {
            to = Self::new(-to.x, -to.y, -to.z, -to.w);
            dot = -dot;
        }
        dot = dot.clamp(-1.0, 1.0);

        if dot > 0.9995 {
            let result = Self::new(
                self.x + (to.x - self.x) * t,
                self.y + (to.y - self.y) * t,
                self.z + (to.z - self.z) * t,
                self.w + (to.w - self.w) * t,
            );
            return result.normalize();
        }

        let theta_0 = dot.acos();
        let theta = theta_0 * t;
        let sin_theta_0 = theta_0.sin();
        let sin_theta = theta.sin();

        let ratio_b = sin_theta / sin_theta_0;
        let ratio_a = (theta_0 - theta).sin() / sin_theta_0;

        Self::new(
            self.x * ratio_a + to.x * ratio_b,
            self.y * ratio_a + to.y * ratio_b,
            self.z * ratio_a + to.z * ratio_b,
            self.w * ratio_a + to.w * ratio_b,
        )
    }

    /// Quaternion logarithm, used only by Squad. For a unit quaternion
    /// `q = (sin(theta) * axis, cos(theta))`, returns the pure-vector
    /// quaternion `theta * axis` (the `w` component is always zero).
    #[must_use]
    pub fn log(self) -> Self {
        let q = self.normalize();
        let v = Vec3::new(q.x, q.y, q.z);
        let v_len = v.length();

        if v_len <= EPSILON {
            return Self::new(0.0, 0.0, 0.0, 0.0);
        }

        let theta = q.w.clamp(-1.0, 1.0).acos();
        let scale = theta / v_len;
        Self::new(v.x * scale, v.y * scale, v.z * scale, 0.0)
    }

    /// Quaternion exponential, the inverse of [`Quaternion::log`]. Input is
    /// expected to be a pure-vector quaternion (`w == 0`); the `w` component
    /// is otherwise ignored.
    #[must_use]
    pub fn exp(self) -> Self {
        let v = Vec3::new(self.x, self.y, self.z);
        let theta = v.length();

        if theta <= EPSILON {
            return Self::IDENTITY;
        }

        let sin_theta = theta.sin();
        let scale = sin_theta / theta;
        Self::new(v.x * scale, v.y * scale, v.z * scale, theta.cos())
    }
}

/// Row-major 4x4 transformation matrix, stored as 16 `f64` values in
/// column-major memory order (`m[col][row]`) to match standard graphics
/// convention for composing with column vectors.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Matrix4 {
    /// Column-major 4x4 matrix elements.
    pub m: [f64; 16],
}

impl Default for Matrix4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Matrix4 {
    /// Identity matrix.
    pub const IDENTITY: Self = Self {
        #[rustfmt::skip]
        m: [
            1.0, 0.0, 0.0, 0.0,
            0.0, 1.0, 0.0, 0.0,
            0.0, 0.0, 1.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ],
    };

    /// Composes a matrix from a translation, rotation, and non-uniform
    /// scale, in that order (`T * R * S`).
    #[must_use]
    pub fn compose(position: Vec3, rotation: Quaternion, scale: Vec3) -> Self {
        let q = rotation.normalize();
        let (x, y, z, w) = (q.x, q.y, q.z, q.w);

        let x2 = x + x;
        let y2 = y + y;
        let z2 = z + z;
        let xx = x * x2;
        let xy = x * y2;
        let xz = x * z2;
        let yy = y * y2;
        let yz = y * z2;
        let zz = z * z2;
        let wx = w * x2;
        let wy = w * y2;
        let wz = w * z2;

        let mut m = [0.0_f64; 16];

        m[0] = (1.0 - (yy + zz)) * scale.x;
        m[1] = (xy + wz) * scale.x;
        m[2] = (xz - wy) * scale.x;
        m[3] = 0.0;

        m[4] = (xy - wz) * scale.y;
        m[5] = (1.0 - (xx + zz)) * scale.y;
        m[6] = (yz + wx) * scale.y;
        m[7] = 0.0;

        m[8] = (xz + wy) * scale.z;
        m[9] = (yz - wx) * scale.z;
        m[10] = (1.0 - (xx + yy)) * scale.z;
        m[11] = 0.0;

        m[12] = position.x;
        m[13] = position.y;
        m[14] = position.z;
        m[15] = 1.0;

        Self { m }
    }

    /// Decomposes a TRS matrix back into position, rotation, and scale.
    ///
    /// Scale is derived from the length of each basis column, with the sign
    /// of all three flipped together when the determinant of the upper-left
    /// 3x3 block is negative (mirrored geometry). Rotation is extracted with
    /// the standard trace-based branch: when `trace > 0` the `w` component
    /// dominates; otherwise the largest diagonal entry is used as the pivot
    /// to avoid dividing by a small number.
    #[must_use]
    pub fn decompose(self) -> (Vec3, Quaternion, Vec3) {
        let m = self.m;

        let col0 = Vec3::new(m[0], m[1], m[2]);
        let col1 = Vec3::new(m[4], m[5], m[6]);
        let col2 = Vec3::new(m[8], m[9], m[10]);

        let mut sx = col0.length();
        let mut sy = col1.length();
        let mut sz = col2.length();

        let det = Self::determinant3x3(m);
        if det < 0.0 {
            sx = -sx;
        }

        let position = Vec3::new(m[12], m[13], m[14]);

        let inv_sx = if sx.abs() > EPSILON { 1.0 / sx } else { 0.0 };
        let inv_sy = if sy.abs() > EPSILON { 1.0 / sy } else { 0.0 };
        let inv_sz = if sz.abs() > EPSILON { 1.0 / sz } else { 0.0 };

        #[rustfmt::skip]
        let r = [
            m[0] * inv_sx, m[1] * inv_sx, m[2] * inv_sx,
            m[4] * inv_sy, m[5] * inv_sy, m[6] * inv_sy,
            m[8] * inv_sz, m[9] * inv_sz, m[10] * inv_sz,
        ];

        let trace = r[0] + r[4] + r[8];
        let rotation = if trace > 0.0 {
            let s = (trace + 1.0).sqrt() * 2.0;
            Quaternion::new(
                (r[7] - r[5]) / s,
                (r[2] - r[6]) / s,
                (r[3] - r[1]) / s,
                0.25 * s,
            )
        } else if r[0] > r[4] && r[0] > r[8] {
            let s = (1.0 + r[0] - r[4] - r[8]).sqrt() * 2.0;
            Quaternion::new(0.25 * s, (r[1] + r[3]) / s, (r[2] + r[6]) / s, (r[7] - r[5]) / s)
        } else if r[4] > r[8] {
            let s = (1.0 + r[4] - r[0] - r[8]).sqrt() * 2.0;
            Quaternion::new((r[1] + r[3]) / s, 0.25 * s, (r[5] + r[7]) / s, (r[2] - r[6]) / s)
        } else {
            let s = (1.0 + r[8] - r[0] - r[4]).sqrt() * 2.0;
            Quaternion::new((r[2] + r[6]) / s, (r[5] + r[7]) / s, 0.25 * s, (r[3] - r[1]) / s)
        };

        (position, rotation.normalize(), Vec3::new(sx, sy, sz))
    }

    fn determinant3x3(m: [f64; 16]) -> f64 {
        m[0] * (m[5] * m[10] - m[6] * m[9]) - m[4] * (m[1] * m[10] - m[2] * m[9])
            + m[8] * (m[1] * m[6] - m[2] * m[5])
    }
}
