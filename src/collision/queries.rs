//! Convex sweeps: time of impact of a moving convex shape and the callbacks
//! that collect sweep hits across the world.

use glam::Vec3;

use super::gjk::{ClosestPointInput, GjkPairDetector, PointCollector};
use super::shapes::ConvexShape;
use crate::{
    core::{
        collision_object::{CollisionFilter, CollisionObject},
        types::Transform,
    },
    utils::allocator::EntityId,
};

/// First contact found by a convex cast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CastResult {
    /// Fraction of the motion at the time of impact, in `[0, 1]`.
    pub fraction: f32,
    /// Contact normal on B, pointing towards A.
    pub normal: Vec3,
    pub hit_point: Vec3,
}

/// Conservative-advancement sweep of shape A against shape B.
///
/// Only the translation part of the motion is swept; both shapes keep their
/// start orientation.
pub struct GjkConvexCast<'a> {
    convex_a: &'a dyn ConvexShape,
    convex_b: &'a dyn ConvexShape,
}

impl<'a> GjkConvexCast<'a> {
    const MAX_ITERATIONS: usize = 32;
    /// Distance at which the shapes count as touching.
    const RADIUS: f32 = 0.001;

    pub fn new(convex_a: &'a dyn ConvexShape, convex_b: &'a dyn ConvexShape) -> Self {
        Self { convex_a, convex_b }
    }

    /// Returns the first time of impact as A moves `from_a -> to_a` and B
    /// moves `from_b -> to_b`. Hits whose normal does not oppose the
    /// relative motion by more than `allowed_penetration` are ignored.
    pub fn calc_time_of_impact(
        &self,
        from_a: &Transform,
        to_a: &Transform,
        from_b: &Transform,
        to_b: &Transform,
        allowed_penetration: f32,
    ) -> Option<CastResult> {
        let r = (to_a.position - from_a.position) - (to_b.position - from_b.position);
        let mut lambda = 0.0_f32;
        let mut last_lambda = lambda;
        let mut iterations = 0;

        let mut input = ClosestPointInput::new(*from_a, *from_b);
        let mut gjk = GjkPairDetector::new(self.convex_a, self.convex_b, None);
        let mut collector = PointCollector::default();
        gjk.get_closest_points(&input, &mut collector);
        if !collector.has_result {
            return None;
        }

        let mut n = collector.normal_on_b;
        let mut c = collector.point_in_world;
        let mut dist = collector.distance;
        while dist > Self::RADIUS {
            iterations += 1;
            if iterations > Self::MAX_ITERATIONS {
                return None;
            }
            lambda -= dist / r.dot(n);
            if !(0.0..=1.0).contains(&lambda) || lambda <= last_lambda {
                return None;
            }
            last_lambda = lambda;

            input.transform_a.position = from_a.position.lerp(to_a.position, lambda);
            input.transform_b.position = from_b.position.lerp(to_b.position, lambda);
            gjk.get_closest_points(&input, &mut collector);
            if !collector.has_result {
                return None;
            }
            if collector.distance < 0.0 {
                return Some(CastResult {
                    fraction: last_lambda,
                    normal: collector.normal_on_b,
                    hit_point: collector.point_in_world,
                });
            }
            c = collector.point_in_world;
            n = collector.normal_on_b;
            dist = collector.distance;
        }

        if n.dot(r) >= -allowed_penetration {
            return None;
        }
        Some(CastResult {
            fraction: lambda,
            normal: n,
            hit_point: c,
        })
    }
}

/// One sweep hit handed to a [`ConvexResultCallback`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalConvexResult {
    pub hit_object: EntityId,
    /// World-space normal on the hit object.
    pub hit_normal: Vec3,
    pub hit_point: Vec3,
    pub hit_fraction: f32,
}

/// Receives hits from [`CollisionWorld::convex_sweep_test`](super::world::CollisionWorld::convex_sweep_test).
pub trait ConvexResultCallback {
    /// Hits at or beyond this fraction are not reported.
    fn closest_hit_fraction(&self) -> f32;

    /// Filter of the swept shape.
    fn filter(&self) -> CollisionFilter {
        CollisionFilter::default()
    }

    fn needs_collision(&self, _id: EntityId, object: &CollisionObject) -> bool {
        self.filter().collides_with(&object.filter)
    }

    /// Records a hit and returns the new closest fraction.
    fn add_single_result(&mut self, result: &LocalConvexResult) -> f32;

    fn has_hit(&self) -> bool {
        self.closest_hit_fraction() < 1.0
    }
}

/// Keeps the hit with the smallest fraction.
#[derive(Debug, Clone)]
pub struct ClosestConvexResultCallback {
    pub convex_from_world: Vec3,
    pub convex_to_world: Vec3,
    pub closest_hit_fraction: f32,
    pub hit_normal_world: Vec3,
    pub hit_point_world: Vec3,
    pub hit_object: Option<EntityId>,
    pub filter: CollisionFilter,
}

impl ClosestConvexResultCallback {
    pub fn new(convex_from_world: Vec3, convex_to_world: Vec3) -> Self {
        Self {
            convex_from_world,
            convex_to_world,
            closest_hit_fraction: 1.0,
            hit_normal_world: Vec3::ZERO,
            hit_point_world: Vec3::ZERO,
            hit_object: None,
            filter: CollisionFilter::default(),
        }
    }
}

impl ConvexResultCallback for ClosestConvexResultCallback {
    fn closest_hit_fraction(&self) -> f32 {
        self.closest_hit_fraction
    }

    fn filter(&self) -> CollisionFilter {
        self.filter
    }

    fn add_single_result(&mut self, result: &LocalConvexResult) -> f32 {
        self.closest_hit_fraction = result.hit_fraction;
        self.hit_object = Some(result.hit_object);
        self.hit_normal_world = result.hit_normal;
        self.hit_point_world = result.hit_point;
        result.hit_fraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::shapes::{BoxShape, SphereShape};
    use approx::assert_relative_eq;

    #[test]
    fn sphere_sweep_stops_at_box_face() {
        let sphere = SphereShape::new(0.5);
        let wall = BoxShape::new(Vec3::new(0.1, 2.0, 2.0));
        let cast = GjkConvexCast::new(&sphere, &wall);

        let from = Transform::from_position(Vec3::new(-5.0, 0.0, 0.0));
        let to = Transform::from_position(Vec3::new(5.0, 0.0, 0.0));
        let hit = cast
            .calc_time_of_impact(&from, &to, &Transform::IDENTITY, &Transform::IDENTITY, 0.0)
            .expect("sweep hits the wall");

        // Contact when the sphere centre reaches x = -0.6.
        assert_relative_eq!(hit.fraction, 0.44, epsilon = 1e-3);
        assert!(hit.normal.abs_diff_eq(Vec3::NEG_X, 1e-3));
        assert_relative_eq!(hit.hit_point.x, -0.1, epsilon = 2e-3);
    }

    #[test]
    fn sweep_moving_away_misses() {
        let a = SphereShape::new(0.5);
        let b = SphereShape::new(0.5);
        let cast = GjkConvexCast::new(&a, &b);
        let from = Transform::from_position(Vec3::new(-2.0, 0.0, 0.0));
        let to = Transform::from_position(Vec3::new(-6.0, 0.0, 0.0));
        assert!(cast
            .calc_time_of_impact(&from, &to, &Transform::IDENTITY, &Transform::IDENTITY, 0.0)
            .is_none());
    }

    #[test]
    fn sweep_passing_beside_misses() {
        let a = SphereShape::new(0.5);
        let b = SphereShape::new(0.5);
        let cast = GjkConvexCast::new(&a, &b);
        let from = Transform::from_position(Vec3::new(-5.0, 3.0, 0.0));
        let to = Transform::from_position(Vec3::new(5.0, 3.0, 0.0));
        assert!(cast
            .calc_time_of_impact(&from, &to, &Transform::IDENTITY, &Transform::IDENTITY, 0.0)
            .is_none());
    }

    #[test]
    fn closest_callback_records_hit() {
        let mut callback = ClosestConvexResultCallback::new(Vec3::ZERO, Vec3::X);
        assert!(!callback.has_hit());
        callback.add_single_result(&LocalConvexResult {
            hit_object: EntityId::from_index(4),
            hit_normal: Vec3::NEG_X,
            hit_point: Vec3::new(0.5, 0.0, 0.0),
            hit_fraction: 0.5,
        });
        assert!(callback.has_hit());
        assert_eq!(callback.hit_object, Some(EntityId::from_index(4)));
    }
}
