use glam::{Mat3, Vec3};
use serde::{Deserialize, Serialize};

use crate::core::types::Transform;

/// Axis-aligned bounding box in min/max form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::new(Vec3::ZERO, Vec3::ZERO)
    }
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    pub fn from_center_half_extents(center: Vec3, half_extents: Vec3) -> Self {
        Self::new(center - half_extents, center + half_extents)
    }

    pub fn extend(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn from_points(points: &[Vec3]) -> Self {
        let mut bounds = Self::empty();
        for &p in points {
            bounds.extend(p);
        }
        bounds
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    pub fn merged(&self, other: &Aabb) -> Aabb {
        Aabb::new(self.min.min(other.min), self.max.max(other.max))
    }

    /// True when `other` lies completely inside `self`.
    pub fn contains(&self, other: &Aabb) -> bool {
        self.min.cmple(other.min).all() && self.max.cmpge(other.max).all()
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    /// Manhattan distance between the doubled centers; cheap insertion heuristic.
    pub fn proximity(&self, other: &Aabb) -> f32 {
        let d = (self.min + self.max) - (other.min + other.max);
        d.x.abs() + d.y.abs() + d.z.abs()
    }

    pub fn expand(&mut self, amount: Vec3) {
        self.min -= amount;
        self.max += amount;
    }

    /// Grows the box only on the side each component of `motion` points to.
    pub fn signed_expand(&mut self, motion: Vec3) {
        for axis in 0..3 {
            if motion[axis] > 0.0 {
                self.max[axis] += motion[axis];
            } else {
                self.min[axis] += motion[axis];
            }
        }
    }

    /// World box of a local box centred at the origin, inflated by `margin`.
    pub fn from_half_extents(half_extents: Vec3, margin: f32, transform: &Transform) -> Aabb {
        let extent = abs_basis(&transform.basis()) * (half_extents + Vec3::splat(margin));
        Aabb::from_center_half_extents(transform.position, extent)
    }

    /// World box of the local bounds `local`, inflated by `margin`.
    pub fn from_local_bounds(local: &Aabb, margin: f32, transform: &Transform) -> Aabb {
        let center = transform.transform_point(local.center());
        let extent = abs_basis(&transform.basis()) * (local.half_extents() + Vec3::splat(margin));
        Aabb::from_center_half_extents(center, extent)
    }

    fn out_code(point: Vec3, half_extents: Vec3) -> u32 {
        let mut code = 0;
        if point.x < -half_extents.x {
            code |= 0x01;
        }
        if point.y < -half_extents.y {
            code |= 0x02;
        }
        if point.z < -half_extents.z {
            code |= 0x04;
        }
        if point.x > half_extents.x {
            code |= 0x08;
        }
        if point.y > half_extents.y {
            code |= 0x10;
        }
        if point.z > half_extents.z {
            code |= 0x20;
        }
        code
    }

    /// Segment-versus-box test.
    ///
    /// Returns the entry fraction along `from -> to` (clamped by `max_fraction`)
    /// and the face normal that was crossed. A segment starting inside the box
    /// reports fraction 0 and a zero normal.
    pub fn ray_test(&self, from: Vec3, to: Vec3, max_fraction: f32) -> Option<(f32, Vec3)> {
        let half = self.half_extents();
        let center = self.center();
        let source = from - center;
        let target = to - center;
        let source_code = Self::out_code(source, half);
        let target_code = Self::out_code(target, half);
        if source_code & target_code != 0 {
            return None;
        }

        let mut lambda_enter = 0.0_f32;
        let mut lambda_exit = max_fraction;
        let r = target - source;
        let mut normal = Vec3::ZERO;
        let mut bit = 1;
        for sign in [1.0_f32, -1.0] {
            for axis in 0..3 {
                if source_code & bit != 0 {
                    let lambda = (-source[axis] - half[axis] * sign) / r[axis];
                    if lambda_enter <= lambda {
                        lambda_enter = lambda;
                        normal = Vec3::ZERO;
                        normal[axis] = -sign;
                    }
                } else if target_code & bit != 0 {
                    let lambda = (-source[axis] - half[axis] * sign) / r[axis];
                    lambda_exit = lambda_exit.min(lambda);
                }
                bit <<= 1;
            }
        }

        (lambda_enter <= lambda_exit).then_some((lambda_enter, normal))
    }
}

fn abs_basis(basis: &Mat3) -> Mat3 {
    Mat3::from_cols(basis.x_axis.abs(), basis.y_axis.abs(), basis.z_axis.abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Quat;

    #[test]
    fn contain_and_intersect() {
        let outer = Aabb::new(Vec3::splat(-2.0), Vec3::splat(2.0));
        let inner = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let apart = Aabb::new(Vec3::splat(3.0), Vec3::splat(4.0));
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
        assert!(outer.intersects(&inner));
        assert!(!outer.intersects(&apart));
    }

    #[test]
    fn signed_expand_grows_one_side() {
        let mut aabb = Aabb::new(Vec3::ZERO, Vec3::ONE);
        aabb.signed_expand(Vec3::new(2.0, -1.0, 0.0));
        assert_eq!(aabb.max, Vec3::new(3.0, 1.0, 1.0));
        assert_eq!(aabb.min, Vec3::new(0.0, -1.0, 0.0));
    }

    #[test]
    fn rotated_box_bounds_grow() {
        let t = Transform::from_rotation(Quat::from_rotation_z(std::f32::consts::FRAC_PI_4));
        let aabb = Aabb::from_half_extents(Vec3::ONE, 0.0, &t);
        assert_relative_eq!(aabb.max.x, 2.0_f32.sqrt(), epsilon = 1e-5);
        assert_relative_eq!(aabb.max.z, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn ray_hits_near_face() {
        let aabb = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let (fraction, normal) = aabb
            .ray_test(Vec3::new(-5.0, 0.0, 0.0), Vec3::new(5.0, 0.0, 0.0), 1.0)
            .expect("segment crosses the box");
        assert_relative_eq!(fraction, 0.4, epsilon = 1e-5);
        assert_eq!(normal, Vec3::new(-1.0, 0.0, 0.0));

        assert!(aabb
            .ray_test(Vec3::new(-5.0, 3.0, 0.0), Vec3::new(5.0, 3.0, 0.0), 1.0)
            .is_none());
    }
}
