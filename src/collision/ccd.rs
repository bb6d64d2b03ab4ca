//! Sweep callback used by swept-sphere continuous collision detection.

use glam::Vec3;

use super::queries::{ClosestConvexResultCallback, ConvexResultCallback, LocalConvexResult};
use crate::{
    core::collision_object::{CollisionFilter, CollisionObject},
    utils::allocator::EntityId,
};

/// Closest-hit sweep that ignores the moving body itself, bodies it already
/// has contact points with, and hits whose normal does not oppose the motion.
#[derive(Debug, Clone)]
pub struct ClosestNotMeConvexResultCallback {
    closest: ClosestConvexResultCallback,
    me: EntityId,
    touching: Vec<EntityId>,
    allowed_penetration: f32,
}

impl ClosestNotMeConvexResultCallback {
    /// `touching` lists the bodies that share a non-empty manifold with `me`.
    pub fn new(
        me: EntityId,
        filter: CollisionFilter,
        from: Vec3,
        to: Vec3,
        touching: Vec<EntityId>,
        allowed_penetration: f32,
    ) -> Self {
        let mut closest = ClosestConvexResultCallback::new(from, to);
        closest.filter = filter;
        Self {
            closest,
            me,
            touching,
            allowed_penetration,
        }
    }

    pub fn hit_object(&self) -> Option<EntityId> {
        self.closest.hit_object
    }

    pub fn hit_normal_world(&self) -> Vec3 {
        self.closest.hit_normal_world
    }

    pub fn hit_point_world(&self) -> Vec3 {
        self.closest.hit_point_world
    }
}

impl ConvexResultCallback for ClosestNotMeConvexResultCallback {
    fn closest_hit_fraction(&self) -> f32 {
        self.closest.closest_hit_fraction
    }

    fn filter(&self) -> CollisionFilter {
        self.closest.filter
    }

    fn needs_collision(&self, id: EntityId, object: &CollisionObject) -> bool {
        id != self.me
            && self.filter().collides_with(&object.filter)
            && !self.touching.contains(&id)
    }

    fn add_single_result(&mut self, result: &LocalConvexResult) -> f32 {
        if result.hit_object == self.me {
            return 1.0;
        }
        let motion = self.closest.convex_to_world - self.closest.convex_from_world;
        if result.hit_normal.dot(motion) >= -self.allowed_penetration {
            return 1.0;
        }
        self.closest.add_single_result(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{collision::shapes::CollisionShape, core::types::Transform};

    fn callback(touching: Vec<EntityId>) -> ClosestNotMeConvexResultCallback {
        ClosestNotMeConvexResultCallback::new(
            EntityId::from_index(0),
            CollisionFilter::dynamic(),
            Vec3::ZERO,
            Vec3::new(2.0, 0.0, 0.0),
            touching,
            0.0,
        )
    }

    fn hit(id: u32, normal: Vec3) -> LocalConvexResult {
        LocalConvexResult {
            hit_object: EntityId::from_index(id),
            hit_normal: normal,
            hit_point: Vec3::X,
            hit_fraction: 0.5,
        }
    }

    #[test]
    fn skips_self_and_touching_objects() {
        let cb = callback(vec![EntityId::from_index(2)]);
        let object = CollisionObject::new(CollisionShape::sphere(1.0), Transform::IDENTITY);
        assert!(!cb.needs_collision(EntityId::from_index(0), &object));
        assert!(!cb.needs_collision(EntityId::from_index(2), &object));
        assert!(cb.needs_collision(EntityId::from_index(1), &object));
    }

    #[test]
    fn ignores_hits_facing_along_motion() {
        let mut cb = callback(Vec::new());
        cb.add_single_result(&hit(1, Vec3::X));
        assert!(!cb.has_hit());

        cb.add_single_result(&hit(1, Vec3::NEG_X));
        assert!(cb.has_hit());
        assert_eq!(cb.hit_object(), Some(EntityId::from_index(1)));
    }
}
