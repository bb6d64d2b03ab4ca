//! Transform integration helpers layered on top of `glam`.

use glam::{Quat, Vec3};

use crate::core::types::Transform;

/// Largest rotation (radians) a single integration step may apply.
pub const ANGULAR_MOTION_THRESHOLD: f32 = 0.25 * std::f32::consts::PI;

const SQRT_HALF: f32 = std::f32::consts::FRAC_1_SQRT_2;

/// Advances `current` by constant linear and angular velocity over `dt`.
///
/// Rotation uses the exponential map with a Taylor expansion for tiny
/// angles; the rotation per step is clamped to [`ANGULAR_MOTION_THRESHOLD`].
pub fn integrate_transform(current: &Transform, linvel: Vec3, angvel: Vec3, dt: f32) -> Transform {
    let position = current.position + linvel * dt;

    let mut angle = angvel.length();
    if angle * dt > ANGULAR_MOTION_THRESHOLD {
        angle = ANGULAR_MOTION_THRESHOLD / dt;
    }

    let axis = if angle < 0.001 {
        // sin(x/2)/x ~= 1/2 - x^2/48
        angvel * (0.5 * dt - dt * dt * dt * 0.020_833_334 * angle * angle)
    } else {
        angvel * ((0.5 * angle * dt).sin() / angle)
    };
    let delta = Quat::from_xyzw(axis.x, axis.y, axis.z, (angle * dt * 0.5).cos());
    let rotation = (delta * current.rotation).normalize();

    Transform { position, rotation }
}

/// Rotation taking `from` to `to` as a unit axis and an angle in radians.
pub fn calculate_diff_axis_angle(from: &Transform, to: &Transform) -> (Vec3, f32) {
    let mut delta = (to.rotation * from.rotation.inverse()).normalize();
    if delta.w < 0.0 {
        delta = -delta;
    }
    let angle = 2.0 * delta.w.clamp(-1.0, 1.0).acos();
    let axis = Vec3::new(delta.x, delta.y, delta.z);
    let len_sq = axis.length_squared();
    if len_sq < f32::EPSILON * f32::EPSILON {
        (Vec3::X, angle)
    } else {
        (axis / len_sq.sqrt(), angle)
    }
}

/// Linear and angular velocity that carries `from` onto `to` in `dt`.
pub fn calculate_velocity(from: &Transform, to: &Transform, dt: f32) -> (Vec3, Vec3) {
    let linear = (to.position - from.position) / dt;
    let (axis, angle) = calculate_diff_axis_angle(from, to);
    (linear, axis * (angle / dt))
}

/// Two unit vectors spanning the plane orthogonal to the unit vector `n`.
pub fn plane_space(n: Vec3) -> (Vec3, Vec3) {
    if n.z.abs() > SQRT_HALF {
        let a = n.y * n.y + n.z * n.z;
        let k = 1.0 / a.sqrt();
        let p = Vec3::new(0.0, -n.z * k, n.y * k);
        let q = Vec3::new(a * k, -n.x * p.z, n.x * p.y);
        (p, q)
    } else {
        let a = n.x * n.x + n.y * n.y;
        let k = 1.0 / a.sqrt();
        let p = Vec3::new(-n.y * k, n.x * k, 0.0);
        let q = Vec3::new(-n.z * p.y, n.z * p.x, a * k);
        (p, q)
    }
}
