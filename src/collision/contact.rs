use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::{config::CONTACT_BREAKING_THRESHOLD, core::types::Transform, utils::allocator::EntityId};

/// Points kept per manifold.
pub const MANIFOLD_CACHE_SIZE: usize = 4;

/// One cached contact between two bodies.
///
/// Local points are stored in each body's frame so the contact can be
/// re-evaluated after the bodies move. Impulses carry over between steps
/// for warm starting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifoldPoint {
    pub local_point_a: Vec3,
    pub local_point_b: Vec3,
    pub position_world_on_a: Vec3,
    pub position_world_on_b: Vec3,
    /// Points from B towards A.
    pub normal_world_on_b: Vec3,
    /// Signed distance along the normal, negative when penetrating.
    pub distance: f32,
    pub combined_friction: f32,
    pub combined_restitution: f32,
    pub applied_impulse: f32,
    pub applied_impulse_lateral1: f32,
    pub applied_impulse_lateral2: f32,
    pub lateral_friction_initialized: bool,
    pub lateral_friction_dir1: Vec3,
    pub lateral_friction_dir2: Vec3,
    /// Number of refreshes the point survived.
    pub life_time: u32,
}

impl ManifoldPoint {
    pub fn new(local_point_a: Vec3, local_point_b: Vec3, normal: Vec3, distance: f32) -> Self {
        Self {
            local_point_a,
            local_point_b,
            normal_world_on_b: normal,
            distance,
            ..Self::default()
        }
    }

    fn clear_cached_impulses(&mut self) {
        self.applied_impulse = 0.0;
        self.applied_impulse_lateral1 = 0.0;
        self.applied_impulse_lateral2 = 0.0;
        self.lateral_friction_initialized = false;
        self.life_time = 0;
    }
}

/// Up to [`MANIFOLD_CACHE_SIZE`] contact points between one ordered pair of
/// bodies, kept alive while the broadphase pair exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentManifold {
    body0: EntityId,
    body1: EntityId,
    points: [ManifoldPoint; MANIFOLD_CACHE_SIZE],
    len: usize,
    contact_breaking_threshold: f32,
}

impl PersistentManifold {
    pub fn new(body0: EntityId, body1: EntityId) -> Self {
        Self::with_breaking_threshold(body0, body1, CONTACT_BREAKING_THRESHOLD)
    }

    pub fn with_breaking_threshold(body0: EntityId, body1: EntityId, threshold: f32) -> Self {
        Self {
            body0,
            body1,
            points: [ManifoldPoint::default(); MANIFOLD_CACHE_SIZE],
            len: 0,
            contact_breaking_threshold: threshold,
        }
    }

    pub fn body0(&self) -> EntityId {
        self.body0
    }

    pub fn body1(&self) -> EntityId {
        self.body1
    }

    pub fn num_contacts(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn points(&self) -> &[ManifoldPoint] {
        &self.points[..self.len]
    }

    pub fn points_mut(&mut self) -> &mut [ManifoldPoint] {
        &mut self.points[..self.len]
    }

    /// Panics when `index` is past the live points.
    pub fn contact_point(&self, index: usize) -> &ManifoldPoint {
        &self.points()[index]
    }

    pub fn contact_breaking_threshold(&self) -> f32 {
        self.contact_breaking_threshold
    }

    /// Slot of the cached point within the breaking threshold of `point`,
    /// nearest first.
    pub fn cache_entry(&self, point: &ManifoldPoint) -> Option<usize> {
        let mut shortest = self.contact_breaking_threshold * self.contact_breaking_threshold;
        let mut nearest = None;
        for (i, cached) in self.points().iter().enumerate() {
            let dist = (cached.local_point_a - point.local_point_a).length_squared();
            if dist < shortest {
                shortest = dist;
                nearest = Some(i);
            }
        }
        nearest
    }

    /// Picks the slot to overwrite when the cache is full. The deepest point
    /// is never chosen; among the rest, the slot whose replacement spans the
    /// largest area wins.
    fn sort_cached_points(&self, point: &ManifoldPoint) -> usize {
        let mut deepest = None;
        let mut max_penetration = point.distance;
        for (i, cached) in self.points.iter().enumerate() {
            if cached.distance < max_penetration {
                deepest = Some(i);
                max_penetration = cached.distance;
            }
        }

        let p = |i: usize| self.points[i].local_point_a;
        let candidate = point.local_point_a;
        // Area of the quad formed when slot `skip` takes the new point.
        let area = |skip: usize, a: usize, b: usize, c: usize| {
            if deepest == Some(skip) {
                0.0
            } else {
                (candidate - p(a)).cross(p(b) - p(c)).length_squared()
            }
        };
        let areas = [area(0, 1, 3, 2), area(1, 0, 3, 2), area(2, 0, 3, 1), area(3, 0, 2, 1)];

        let mut best = None;
        let mut best_area = f32::MIN;
        for (i, &a) in areas.iter().enumerate() {
            if deepest == Some(i) {
                continue;
            }
            if best.is_none() || a.abs() > best_area {
                best = Some(i);
                best_area = a.abs();
            }
        }
        // Only the deepest slot is ever skipped, so some slot remains.
        best.unwrap_or(if deepest == Some(0) { 1 } else { 0 })
    }

    /// Stores `point`, evicting per [`Self::sort_cached_points`] when full.
    pub fn add_manifold_point(&mut self, point: ManifoldPoint) -> usize {
        let index = if self.len == MANIFOLD_CACHE_SIZE {
            self.sort_cached_points(&point)
        } else {
            self.len += 1;
            self.len - 1
        };
        self.points[index] = point;
        index
    }

    /// Swap-removes the point at `index`.
    pub fn remove_contact_point(&mut self, index: usize) {
        let last = self.len - 1;
        if index != last {
            self.points[index] = self.points[last];
        }
        self.points[last].clear_cached_impulses();
        self.len -= 1;
    }

    /// Overwrites a slot while keeping its warm-start impulses and lifetime.
    pub fn replace_contact_point(&mut self, point: ManifoldPoint, index: usize) {
        let old = self.points[index];
        self.points[index] = ManifoldPoint {
            applied_impulse: old.applied_impulse,
            applied_impulse_lateral1: old.applied_impulse_lateral1,
            applied_impulse_lateral2: old.applied_impulse_lateral2,
            life_time: old.life_time,
            ..point
        };
    }

    /// Re-projects cached points with the current transforms and drops the
    /// ones that separated or slid too far apart.
    pub fn refresh_contact_points(&mut self, transform_a: &Transform, transform_b: &Transform) {
        for point in self.points_mut() {
            point.position_world_on_a = transform_a.transform_point(point.local_point_a);
            point.position_world_on_b = transform_b.transform_point(point.local_point_b);
            point.distance = (point.position_world_on_a - point.position_world_on_b)
                .dot(point.normal_world_on_b);
            point.life_time += 1;
        }

        let threshold = self.contact_breaking_threshold;
        for i in (0..self.len).rev() {
            let point = &self.points[i];
            if point.distance > threshold {
                self.remove_contact_point(i);
                continue;
            }
            let projected = point.position_world_on_a - point.normal_world_on_b * point.distance;
            let drift = (point.position_world_on_b - projected).length_squared();
            if drift > threshold * threshold {
                self.remove_contact_point(i);
            }
        }
    }

    pub fn clear(&mut self) {
        for point in self.points_mut() {
            point.clear_cached_impulses();
        }
        self.len = 0;
    }
}
