//! Narrowphase dispatch: runs the convex-convex algorithm for each cached
//! broadphase pair and owns the persistent manifolds it produces.

use glam::Vec3;
use log::warn;

use super::{
    contact::{ManifoldPoint, PersistentManifold},
    epa::GjkEpaSolver,
    gjk::{ClosestPointInput, DiscreteCollisionResult, GjkPairDetector},
    pair_cache::HashedOverlappingPairCache,
    shapes::ConvexShape,
};
use crate::{
    config::CONTACT_BREAKING_THRESHOLD,
    core::{
        collision_object::CollisionObject,
        types::{Material, Transform},
    },
    utils::allocator::{Arena, EntityId},
};

/// Feeds GJK output into one persistent manifold.
pub struct ManifoldResult<'a> {
    manifold: &'a mut PersistentManifold,
    body0: EntityId,
    transform_a: Transform,
    transform_b: Transform,
    combined: Material,
}

impl<'a> ManifoldResult<'a> {
    pub fn new(
        manifold: &'a mut PersistentManifold,
        body0: EntityId,
        object0: &CollisionObject,
        object1: &CollisionObject,
    ) -> Self {
        let combined = Material::new(object0.friction, object0.restitution)
            .combine_with(&Material::new(object1.friction, object1.restitution));
        Self {
            manifold,
            body0,
            transform_a: object0.world_transform,
            transform_b: object1.world_transform,
            combined,
        }
    }

    fn is_swapped(&self) -> bool {
        self.manifold.body0() != self.body0
    }

    pub fn refresh_contact_points(&mut self) {
        if self.manifold.is_empty() {
            return;
        }
        if self.is_swapped() {
            self.manifold
                .refresh_contact_points(&self.transform_b, &self.transform_a);
        } else {
            self.manifold
                .refresh_contact_points(&self.transform_a, &self.transform_b);
        }
    }
}

impl DiscreteCollisionResult for ManifoldResult<'_> {
    fn add_contact_point(&mut self, normal_on_b: Vec3, point_in_world: Vec3, depth: f32) {
        if depth > self.manifold.contact_breaking_threshold() {
            return;
        }
        let point_a = point_in_world + normal_on_b * depth;
        let (frame_a, frame_b) = if self.is_swapped() {
            (&self.transform_b, &self.transform_a)
        } else {
            (&self.transform_a, &self.transform_b)
        };
        let mut point = ManifoldPoint::new(
            frame_a.inverse_transform_point(point_a),
            frame_b.inverse_transform_point(point_in_world),
            normal_on_b,
            depth,
        );
        point.position_world_on_a = point_a;
        point.position_world_on_b = point_in_world;
        point.combined_friction = self.combined.friction;
        point.combined_restitution = self.combined.restitution;

        match self.manifold.cache_entry(&point) {
            Some(index) => self.manifold.replace_contact_point(point, index),
            None => {
                self.manifold.add_manifold_point(point);
            }
        }
    }
}

/// Cached narrowphase state of one broadphase pair.
#[derive(Debug, Clone, Default)]
pub struct ConvexConvexAlgorithm {
    manifold: Option<EntityId>,
}

impl ConvexConvexAlgorithm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Manifold created on the first processed step, if any.
    pub fn manifold(&self) -> Option<EntityId> {
        self.manifold
    }

    /// Runs GJK (with EPA fallback) between the two objects and merges the
    /// result into this pair's manifold.
    pub fn process_collision(
        &mut self,
        id0: EntityId,
        object0: &CollisionObject,
        id1: EntityId,
        object1: &CollisionObject,
        dispatcher: &mut CollisionDispatcher,
    ) {
        let manifold_id = *self
            .manifold
            .get_or_insert_with(|| dispatcher.new_manifold(id0, id1));
        let CollisionDispatcher {
            manifolds,
            penetration_solver,
            ..
        } = dispatcher;
        let Some(manifold) = manifolds.get_mut(manifold_id) else {
            self.manifold = None;
            return;
        };

        let shape0 = &object0.shape;
        let shape1 = &object1.shape;
        let reach = shape0.margin() + shape1.margin() + manifold.contact_breaking_threshold();
        let mut input = ClosestPointInput::new(object0.world_transform, object1.world_transform);
        input.maximum_distance_squared = reach * reach;

        let mut result = ManifoldResult::new(manifold, id0, object0, object1);
        let mut detector = GjkPairDetector::new(shape0, shape1, Some(&*penetration_solver));
        detector.get_closest_points(&input, &mut result);
        result.refresh_contact_points();
    }
}

/// Owns every persistent manifold and decides which pairs get narrowphase
/// and contact response.
#[derive(Debug)]
pub struct CollisionDispatcher {
    manifolds: Arena<PersistentManifold>,
    penetration_solver: GjkEpaSolver,
    contact_breaking_threshold: f32,
    static_warning_reported: bool,
}

impl Default for CollisionDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl CollisionDispatcher {
    pub fn new() -> Self {
        Self::with_breaking_threshold(CONTACT_BREAKING_THRESHOLD)
    }

    pub fn with_breaking_threshold(contact_breaking_threshold: f32) -> Self {
        Self {
            manifolds: Arena::new(),
            penetration_solver: GjkEpaSolver::new(),
            contact_breaking_threshold,
            static_warning_reported: false,
        }
    }

    pub fn find_algorithm(&self) -> ConvexConvexAlgorithm {
        ConvexConvexAlgorithm::new()
    }

    /// Releases the manifold owned by `algorithm`.
    pub fn free_collision_algorithm(&mut self, algorithm: ConvexConvexAlgorithm) {
        if let Some(manifold) = algorithm.manifold {
            self.release_manifold(manifold);
        }
    }

    pub fn new_manifold(&mut self, body0: EntityId, body1: EntityId) -> EntityId {
        self.manifolds.insert(PersistentManifold::with_breaking_threshold(
            body0,
            body1,
            self.contact_breaking_threshold,
        ))
    }

    pub fn release_manifold(&mut self, manifold: EntityId) {
        self.manifolds.remove(manifold);
    }

    pub fn clear_manifold(&mut self, manifold: EntityId) {
        if let Some(m) = self.manifolds.get_mut(manifold) {
            m.clear();
        }
    }

    pub fn num_manifolds(&self) -> usize {
        self.manifolds.len()
    }

    pub fn manifold(&self, id: EntityId) -> Option<&PersistentManifold> {
        self.manifolds.get(id)
    }

    pub fn manifold_mut(&mut self, id: EntityId) -> Option<&mut PersistentManifold> {
        self.manifolds.get_mut(id)
    }

    pub fn manifolds(&self) -> impl Iterator<Item = (EntityId, &PersistentManifold)> + '_ {
        self.manifolds.iter()
    }

    pub(crate) fn manifolds_mut(&mut self) -> &mut Arena<PersistentManifold> {
        &mut self.manifolds
    }

    pub fn penetration_solver(&self) -> &GjkEpaSolver {
        &self.penetration_solver
    }

    /// False when both objects sleep. Warns once when two static or
    /// kinematic objects reach the narrowphase.
    pub fn needs_collision(&mut self, a: &CollisionObject, b: &CollisionObject) -> bool {
        if !self.static_warning_reported
            && a.is_static_or_kinematic_object()
            && b.is_static_or_kinematic_object()
        {
            self.static_warning_reported = true;
            warn!("narrowphase reached a pair of static or kinematic objects");
        }
        a.is_active() || b.is_active()
    }

    /// Contacts between the two objects produce solver constraints.
    pub fn needs_response(&self, a: &CollisionObject, b: &CollisionObject) -> bool {
        a.has_contact_response()
            && b.has_contact_response()
            && (!a.is_static_or_kinematic_object() || !b.is_static_or_kinematic_object())
    }

    /// Updates the manifold of every cached pair whose objects are both live.
    pub fn dispatch_all_collision_pairs<T>(
        &mut self,
        pair_cache: &mut HashedOverlappingPairCache,
        objects: &Arena<T>,
    ) where
        T: AsRef<CollisionObject>,
    {
        for pair in pair_cache.overlapping_pairs_mut() {
            let (Some(object0), Some(object1)) =
                (objects.get(pair.client0), objects.get(pair.client1))
            else {
                continue;
            };
            let (object0, object1) = (object0.as_ref(), object1.as_ref());
            if !self.needs_collision(object0, object1) {
                continue;
            }
            let algorithm = pair.algorithm.get_or_insert_with(ConvexConvexAlgorithm::new);
            algorithm.process_collision(pair.client0, object0, pair.client1, object1, self);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::{
        aabb::Aabb,
        broadphase::{BroadphaseProxy, ProxyId},
        shapes::CollisionShape,
    };
    use crate::core::collision_object::{CollisionFilter, CollisionFlags};

    fn sphere_at(x: f32) -> CollisionObject {
        CollisionObject::new(
            CollisionShape::sphere(0.5),
            Transform::from_position(Vec3::new(x, 0.0, 0.0)),
        )
    }

    fn cache_with_pair(a: EntityId, b: EntityId) -> HashedOverlappingPairCache {
        let mut cache = HashedOverlappingPairCache::new();
        let pa = BroadphaseProxy::new(ProxyId(0), a, CollisionFilter::dynamic(), Aabb::default());
        let pb = BroadphaseProxy::new(ProxyId(1), b, CollisionFilter::dynamic(), Aabb::default());
        cache.add_overlapping_pair(&pa, &pb);
        cache
    }

    #[test]
    fn overlapping_spheres_get_one_point() {
        let mut objects = Arena::new();
        let a = objects.insert(sphere_at(0.0));
        let b = objects.insert(sphere_at(0.9));
        let mut cache = cache_with_pair(a, b);
        let mut dispatcher = CollisionDispatcher::new();

        dispatcher.dispatch_all_collision_pairs(&mut cache, &objects);
        assert_eq!(dispatcher.num_manifolds(), 1);

        let id = cache.overlapping_pairs()[0]
            .algorithm
            .as_ref()
            .and_then(ConvexConvexAlgorithm::manifold)
            .expect("manifold created");
        let manifold = dispatcher.manifold(id).expect("live manifold");
        assert_eq!(manifold.num_contacts(), 1);
        let point = manifold.contact_point(0);
        assert!((point.distance + 0.1).abs() < 1e-2);
        assert!(point.normal_world_on_b.abs_diff_eq(Vec3::NEG_X, 1e-3));
    }

    #[test]
    fn repeated_dispatch_keeps_single_cached_point() {
        let mut objects = Arena::new();
        let a = objects.insert(sphere_at(0.0));
        let b = objects.insert(sphere_at(0.95));
        let mut cache = cache_with_pair(a, b);
        let mut dispatcher = CollisionDispatcher::new();
        for _ in 0..5 {
            dispatcher.dispatch_all_collision_pairs(&mut cache, &objects);
        }
        let (_, manifold) = dispatcher.manifolds().next().expect("manifold");
        assert_eq!(manifold.num_contacts(), 1);
        assert_eq!(manifold.contact_point(0).life_time, 5);
    }

    #[test]
    fn distant_pair_creates_empty_manifold() {
        let mut objects = Arena::new();
        let a = objects.insert(sphere_at(0.0));
        let b = objects.insert(sphere_at(3.0));
        let mut cache = cache_with_pair(a, b);
        let mut dispatcher = CollisionDispatcher::new();
        dispatcher.dispatch_all_collision_pairs(&mut cache, &objects);
        let (_, manifold) = dispatcher.manifolds().next().expect("manifold");
        assert!(manifold.is_empty());
    }

    #[test]
    fn freeing_algorithm_releases_manifold() {
        let mut dispatcher = CollisionDispatcher::new();
        let a = dispatcher.find_algorithm();
        dispatcher.free_collision_algorithm(a);

        let mut objects = Arena::new();
        let a = objects.insert(sphere_at(0.0));
        let b = objects.insert(sphere_at(0.5));
        let mut cache = cache_with_pair(a, b);
        dispatcher.dispatch_all_collision_pairs(&mut cache, &objects);
        assert_eq!(dispatcher.num_manifolds(), 1);
        let (p0, p1) = (cache.overlapping_pairs()[0].proxy0, cache.overlapping_pairs()[0].proxy1);
        assert!(cache.remove_overlapping_pair(p0, p1, &mut dispatcher));
        assert_eq!(dispatcher.num_manifolds(), 0);
    }

    #[test]
    fn response_requires_one_dynamic_object() {
        let dispatcher = CollisionDispatcher::new();
        let dynamic = sphere_at(0.0);
        let mut fixed = sphere_at(1.0);
        fixed.flags.insert(CollisionFlags::STATIC_OBJECT);
        assert!(dispatcher.needs_response(&dynamic, &fixed));
        assert!(!dispatcher.needs_response(&fixed, &fixed));

        let mut ghost = sphere_at(0.0);
        ghost.flags.insert(CollisionFlags::NO_CONTACT_RESPONSE);
        assert!(!dispatcher.needs_response(&ghost, &dynamic));
    }
}
