//! Spline interpolation used by the snapshot engine and the state cache when
//! four bracketing samples are available: Hermite, centripetal Catmull-Rom,
//! and Squad for rotations.

use tethernet_shared::{Quaternion, Vec3};

/// Hermite interpolation with tension `tau`, between `p1` and `p2` using the
/// neighboring points `p0`/`p3` to build tangents. `mᵢ = ((1-τ)/2)(p_{i+1}-p_{i-1})`.
#[must_use]
pub fn hermite(p0: Vec3, p1: Vec3, p2: Vec3, p3: Vec3, t: f64, tau: f64) -> Vec3 {
    let m1 = (p2 - p0) * ((1.0 - tau) / 2.0);
    let m2 = (p3 - p1) * ((1.0 - tau) / 2.0);

    let t2 = t * t;
    let t3 = t2 * t;

    let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
    let h10 = t3 - 2.0 * t2 + t;
    let h01 = -2.0 * t3 + 3.0 * t2;
    let h11 = t3 - t2;

    p1 * h00 + m1 * h10 + p2 * h01 + m2 * h11
}

/// Centripetal Catmull-Rom interpolation between `p1` and `p2`, with knot
/// spacing `dtᵢ = |p_{i+1} - pᵢ|^alpha`. Falls back to a plain lerp when the
/// `p1`-`p2` spacing collapses (`dt1 < 1e-4`), since the centripetal
/// parameterization divides by that spacing.
#[must_use]
pub fn catmull_rom_centripetal(p0: Vec3, p1: Vec3, p2: Vec3, p3: Vec3, t: f64, alpha: f64) -> Vec3 {
    let dt0 = p1.distance(p0).powf(alpha);
    let dt1 = p2.distance(p1).powf(alpha);
    let dt2 = p3.distance(p2).powf(alpha);

    if dt1 < 1e-4 {
        return p1.lerp(p2, t);
    }

    // Knot values along the curve parameter (t0 is arbitrary; only
    // differences matter).
    let t0 = 0.0;
    let t1 = t0 + dt0.max(1e-9);
    let t2v = t1 + dt1;
    let t3 = t2v + dt2.max(1e-9);

    let tt = t1 + t * (t2v - t1);

    let a1 = p0 * ((t1 - tt) / (t1 - t0)) + p1 * ((tt - t0) / (t1 - t0));
    let a2 = p1 * ((t2v - tt) / (t2v - t1)) + p2 * ((tt - t1) / (t2v - t1));
    let a3 = p2 * ((t3 - tt) / (t3 - t2v)) + p3 * ((tt - t2v) / (t3 - t2v));

    let b1 = a1 * ((t2v - tt) / (t2v - t0)) + a2 * ((tt - t0) / (t2v - t0));
    let b2 = a2 * ((t3 - tt) / (t3 - t1)) + a3 * ((tt - t1) / (t3 - t1));

    b1 * ((t2v - tt) / (t2v - t1)) + b2 * ((tt - t1) / (t2v - t1))
}

/// Squad (spherical cubic interpolation) between `q1` and `q2`, using
/// neighbors `q0`/`q3` to build the inner control points.
///
/// Control points: `sᵢ = qᵢ · exp(-(log(qᵢ⁻¹·q_{i-1}) + log(qᵢ⁻¹·q_{i+1})) / 4)`.
/// Final value: `slerp(slerp(q1,q2,t), slerp(s1,s2,t), 2·t·(1-t))`.
#[must_use]
pub fn squad(q0: Quaternion, q1: Quaternion, q2: Quaternion, q3: Quaternion, t: f64) -> Quaternion {
    let s1 = squad_control_point(q0, q1, q2);
    let s2 = squad_control_point(q1, q2, q3);

    let slerp_main = q1.slerp(q2, t);
    let slerp_control = s1.slerp(s2, t);
    let h = 2.0 * t * (1.0 - t);

    slerp_main.slerp(slerp_control, h)
}

fn squad_control_point(prev: Quaternion, curr: Quaternion, next: Quaternion) -> Quaternion {
    let inv = curr.inverse();
    let log_prev = inv.multiply(prev).log();
    let log_next = inv.multiply(next).log();

    let sum = Quaternion::new(
        log_prev.x + log_next.x,
        log_prev.y + log_next.y,
        log_prev.z + log_next.z,
        log_prev.w + log_next.w,
    );
    let scaled = Quaternion::new(-sum.x / 4.0, -sum.y / 4.0, -sum.z / 4.0, -sum.w / 4.0);

    curr.multiply(scaled.exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hermite_passes_through_endpoints() {
        let p0 = Vec3::new(-1.0, 0.0, 0.0);
        let p1 = Vec3::new(0.0, 0.0, 0.0);
        let p2 = Vec3::new(1.0, 0.0, 0.0);
        let p3 = Vec3::new(2.0, 0.0, 0.0);

        let at_0 = hermite(p0, p1, p2, p3, 0.0, 0.5);
        let at_1 = hermite(p0, p1, p2, p3, 1.0, 0.5);

        assert!(at_0.distance(p1) < 1e-9);
        assert!(at_1.distance(p2) < 1e-9);
    }

    #[test]
    fn catmull_rom_passes_through_endpoints() {
        let p0 = Vec3::new(-1.0, 0.0, 0.0);
        let p1 = Vec3::new(0.0, 1.0, 0.0);
        let p2 = Vec3::new(1.0, 0.0, 0.0);
        let p3 = Vec3::new(2.0, -1.0, 0.0);

        let at_0 = catmull_rom_centripetal(p0, p1, p2, p3, 0.0, 0.5);
        let at_1 = catmull_rom_centripetal(p0, p1, p2, p3, 1.0, 0.5);

        assert!(at_0.distance(p1) < 1e-6);
        assert!(at_1.distance(p2) < 1e-6);
    }

    #[test]
    fn catmull_rom_degenerate_spacing_falls_back_to_lerp() {
        let p0 = Vec3::new(-1.0, 0.0, 0.0);
        let p1 = Vec3::new(0.0, 0.0, 0.0);
        let p2 = p1; // zero spacing between p1 and p2
        let p3 = Vec3::new(2.0, 0.0, 0.0);

        let mid = catmull_rom_centripetal(p0, p1, p2, p3, 0.5, 0.5);
        assert!(mid.distance(p1) < 1e-9);
    }

    #[test]
    fn squad_passes_through_endpoints() {
        let q0 = Quaternion::IDENTITY;
        let q1 = Quaternion::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), 0.3);
        let q2 = Quaternion::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), 0.8);
        let q3 = Quaternion::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), 1.4);

        let at_0 = squad(q0, q1, q2, q3, 0.0);
        let at_1 = squad(q0, q1, q2, q3, 1.0);

        assert!((1.0 - q1.dot(at_0).abs()) < 1e-6);
        assert!((1.0 - q2.dot(at_1).abs()) < 1e-6);
    }
}
