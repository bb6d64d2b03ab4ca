use std::time::Duration;

use glam::Vec3;
use log::debug;

use super::{
    aabb::Aabb,
    broadphase::{Broadphase, DbvtBroadphase},
    dispatcher::CollisionDispatcher,
    pair_cache::HashedOverlappingPairCache,
    queries::{ConvexResultCallback, GjkConvexCast, LocalConvexResult},
    shapes::ConvexShape,
};
use crate::{
    config::WorldConfig,
    core::{
        collision_object::{ActivationState, CollisionFilter, CollisionObject},
        types::Transform,
    },
    error::{PhysicsError, Result},
    utils::{
        allocator::{Arena, EntityId},
        logging::ScopedTimer,
        math::calculate_velocity,
        profiling::StepProfile,
    },
};

/// Bounds larger than this (squared diagonal) mean the object flew off.
const MAX_AABB_EXTENT_SQUARED: f32 = 1e12;

fn contact_aabb(object: &CollisionObject, threshold: f32) -> Aabb {
    let mut aabb = object.world_aabb();
    aabb.expand(Vec3::splat(threshold));
    aabb
}

/// Collision objects, their broadphase proxies and the narrowphase state.
///
/// `T` is the stored object type; the dynamics world stores rigid bodies.
pub struct CollisionWorld<T = CollisionObject> {
    objects: Arena<T>,
    broadphase: Box<dyn Broadphase>,
    dispatcher: CollisionDispatcher,
    config: WorldConfig,
    profile: StepProfile,
}

impl<T> CollisionWorld<T>
where
    T: AsRef<CollisionObject> + AsMut<CollisionObject> + Send + Sync,
{
    /// World backed by a [`DbvtBroadphase`].
    pub fn new(config: WorldConfig) -> Result<Self> {
        let broadphase = DbvtBroadphase::with_config(&config);
        Self::with_broadphase(config, Box::new(broadphase))
    }

    pub fn with_broadphase(config: WorldConfig, broadphase: Box<dyn Broadphase>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            objects: Arena::new(),
            broadphase,
            dispatcher: CollisionDispatcher::with_breaking_threshold(
                config.contact_breaking_threshold,
            ),
            config,
            profile: StepProfile::default(),
        })
    }

    /// Inserts `object` and creates its broadphase proxy.
    pub fn add_collision_object(&mut self, object: T, filter: CollisionFilter) -> EntityId {
        let id = self.objects.insert(object);
        if let Some(object) = self.objects.get_mut(id) {
            let object = object.as_mut();
            object.filter = filter;
            let proxy = self.broadphase.create_proxy(object.world_aabb(), id, filter);
            object.proxy = Some(proxy);
        }
        id
    }

    /// Removes the object, its proxy and every pair and manifold that
    /// references it.
    pub fn remove_collision_object(&mut self, id: EntityId) -> Result<T> {
        let mut object = self.objects.remove(id).ok_or(PhysicsError::UnknownBody(id))?;
        if let Some(proxy) = object.as_mut().proxy.take() {
            self.broadphase.destroy_proxy(proxy, &mut self.dispatcher);
        }
        Ok(object)
    }

    pub fn object(&self, id: EntityId) -> Option<&T> {
        self.objects.get(id)
    }

    pub fn object_mut(&mut self, id: EntityId) -> Option<&mut T> {
        self.objects.get_mut(id)
    }

    pub fn objects(&self) -> &Arena<T> {
        &self.objects
    }

    pub fn num_collision_objects(&self) -> usize {
        self.objects.len()
    }

    pub fn dispatcher(&self) -> &CollisionDispatcher {
        &self.dispatcher
    }

    pub fn broadphase(&self) -> &dyn Broadphase {
        self.broadphase.as_ref()
    }

    pub fn pair_cache(&self) -> &HashedOverlappingPairCache {
        self.broadphase.pair_cache()
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn profile(&self) -> &StepProfile {
        &self.profile
    }

    pub(crate) fn profile_mut(&mut self) -> &mut StepProfile {
        &mut self.profile
    }

    pub(crate) fn config_mut(&mut self) -> &mut WorldConfig {
        &mut self.config
    }

    /// Objects and manifolds borrowed together for the solver.
    pub(crate) fn split_mut(&mut self) -> (&mut Arena<T>, &mut CollisionDispatcher) {
        (&mut self.objects, &mut self.dispatcher)
    }

    pub(crate) fn objects_mut(&mut self) -> &mut Arena<T> {
        &mut self.objects
    }

    /// Objects together with the broadphase pairs, for island building.
    pub(crate) fn objects_and_pairs_mut(&mut self) -> (&mut Arena<T>, &HashedOverlappingPairCache) {
        (&mut self.objects, self.broadphase.pair_cache())
    }

    #[cfg(feature = "parallel")]
    fn active_aabbs(&self, threshold: f32) -> Vec<(EntityId, Aabb)> {
        use rayon::prelude::*;

        let active: Vec<(EntityId, &T)> = self
            .objects
            .iter()
            .filter(|(_, object)| object.as_ref().is_active())
            .collect();
        active
            .par_iter()
            .map(|(id, object)| (*id, contact_aabb(object.as_ref(), threshold)))
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    fn active_aabbs(&self, threshold: f32) -> Vec<(EntityId, Aabb)> {
        self.objects
            .iter()
            .filter(|(_, object)| object.as_ref().is_active())
            .map(|(id, object)| (id, contact_aabb(object.as_ref(), threshold)))
            .collect()
    }

    fn apply_aabb(&mut self, id: EntityId, aabb: Aabb) {
        let Some(object) = self.objects.get_mut(id) else {
            return;
        };
        let object = object.as_mut();
        let Some(proxy) = object.proxy else {
            return;
        };
        let extent = aabb.max - aabb.min;
        if object.is_static_object() || extent.length_squared() < MAX_AABB_EXTENT_SQUARED {
            self.broadphase.set_aabb(proxy, aabb);
        } else {
            object.set_activation_state(ActivationState::DisableSimulation);
            debug!("body {id} has unbounded bounds; simulation disabled");
        }
    }

    pub fn update_single_aabb(&mut self, id: EntityId) {
        let threshold = self.config.contact_breaking_threshold;
        if let Some(object) = self.objects.get(id) {
            let aabb = contact_aabb(object.as_ref(), threshold);
            self.apply_aabb(id, aabb);
        }
    }

    /// Pushes the bounds of every active object to the broadphase.
    pub fn update_aabbs(&mut self) {
        for (id, aabb) in self.active_aabbs(self.config.contact_breaking_threshold) {
            self.apply_aabb(id, aabb);
        }
    }

    /// Broadphase update followed by narrowphase over every cached pair.
    pub fn perform_discrete_collision_detection(&mut self) {
        let mut broad = Duration::ZERO;
        let mut narrow = Duration::ZERO;
        {
            let _timer = ScopedTimer::recording("collision::update_aabbs", &mut broad);
            self.update_aabbs();
        }
        {
            let _timer = ScopedTimer::recording("collision::broadphase", &mut broad);
            self.broadphase
                .calculate_overlapping_pairs(&mut self.dispatcher);
        }
        {
            let _timer = ScopedTimer::recording("collision::dispatch", &mut narrow);
            self.dispatcher
                .dispatch_all_collision_pairs(self.broadphase.pair_cache_mut(), &self.objects);
        }
        self.profile.broad_phase_time += broad;
        self.profile.narrow_phase_time += narrow;
        self.profile.pair_count = self.broadphase.pair_cache().len();
        self.profile.manifold_count = self.dispatcher.num_manifolds();
    }

    /// Objects that share a manifold holding contact points with `id` and
    /// respond to contact with it.
    pub fn touching_objects(&self, id: EntityId) -> Vec<EntityId> {
        let Some(object) = self.objects.get(id).map(AsRef::as_ref) else {
            return Vec::new();
        };
        let Some(proxy) = object.proxy else {
            return Vec::new();
        };
        self.pair_cache()
            .overlapping_pairs()
            .iter()
            .filter(|pair| pair.contains(proxy))
            .filter_map(|pair| {
                let other = if pair.client0 == id {
                    pair.client1
                } else {
                    pair.client0
                };
                let other_object = self.objects.get(other)?.as_ref();
                if !self.dispatcher.needs_response(object, other_object) {
                    return None;
                }
                let manifold = pair.algorithm.as_ref()?.manifold()?;
                let touching = self.dispatcher.manifold(manifold)?.num_contacts() > 0;
                touching.then_some(other)
            })
            .collect()
    }

    /// Sweeps `cast_shape` from `from` to `to` against every object that
    /// `callback` accepts.
    pub fn convex_sweep_test(
        &self,
        cast_shape: &dyn ConvexShape,
        from: &Transform,
        to: &Transform,
        callback: &mut dyn ConvexResultCallback,
    ) {
        let (linvel, angvel) = calculate_velocity(from, to, 1.0);
        let cast_bounds = cast_shape.temporal_aabb(
            &Transform::from_rotation(from.rotation),
            linvel,
            angvel,
            1.0,
        );

        for (id, object) in self.objects.iter() {
            let object = object.as_ref();
            if !callback.needs_collision(id, object) {
                continue;
            }
            let bounds = object.world_aabb();
            let swept = Aabb::new(bounds.min + cast_bounds.min, bounds.max + cast_bounds.max);
            if swept.ray_test(from.position, to.position, 1.0).is_some() {
                Self::object_query_single(
                    cast_shape,
                    from,
                    to,
                    id,
                    object,
                    callback,
                    self.config.allowed_ccd_penetration,
                );
            }
        }
    }

    fn object_query_single(
        cast_shape: &dyn ConvexShape,
        from: &Transform,
        to: &Transform,
        id: EntityId,
        object: &CollisionObject,
        callback: &mut dyn ConvexResultCallback,
        allowed_penetration: f32,
    ) {
        if !object.shape.is_convex() {
            return;
        }
        let cast = GjkConvexCast::new(cast_shape, &object.shape);
        let transform = &object.world_transform;
        let Some(hit) =
            cast.calc_time_of_impact(from, to, transform, transform, allowed_penetration)
        else {
            return;
        };
        if hit.normal.length_squared() > 1e-4 && hit.fraction < callback.closest_hit_fraction() {
            callback.add_single_result(&LocalConvexResult {
                hit_object: id,
                hit_normal: hit.normal.normalize(),
                hit_point: hit.hit_point,
                hit_fraction: hit.fraction,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::{queries::ClosestConvexResultCallback, shapes::{CollisionShape, SphereShape}};
    use crate::core::collision_object::CollisionFlags;

    fn world() -> CollisionWorld {
        CollisionWorld::new(WorldConfig::default()).expect("default config is valid")
    }

    fn sphere_at(position: Vec3) -> CollisionObject {
        CollisionObject::new(CollisionShape::sphere(0.5), Transform::from_position(position))
    }

    #[test]
    fn detection_builds_manifold_for_touching_objects() {
        let mut world = world();
        let a = world.add_collision_object(sphere_at(Vec3::ZERO), CollisionFilter::dynamic());
        let b = world.add_collision_object(
            sphere_at(Vec3::new(0.9, 0.0, 0.0)),
            CollisionFilter::dynamic(),
        );
        world.add_collision_object(
            sphere_at(Vec3::new(10.0, 0.0, 0.0)),
            CollisionFilter::dynamic(),
        );

        world.perform_discrete_collision_detection();
        assert_eq!(world.pair_cache().len(), 1);
        assert_eq!(world.dispatcher().num_manifolds(), 1);
        assert_eq!(world.touching_objects(a), vec![b]);
        assert_eq!(world.profile().pair_count, 1);
    }

    #[test]
    fn removal_releases_pairs_and_manifolds() {
        let mut world = world();
        let a = world.add_collision_object(sphere_at(Vec3::ZERO), CollisionFilter::dynamic());
        world.add_collision_object(
            sphere_at(Vec3::new(0.5, 0.0, 0.0)),
            CollisionFilter::dynamic(),
        );
        world.perform_discrete_collision_detection();
        assert_eq!(world.dispatcher().num_manifolds(), 1);

        let removed = world.remove_collision_object(a).expect("body exists");
        assert_eq!(removed.world_transform.position, Vec3::ZERO);
        assert_eq!(world.num_collision_objects(), 1);
        assert!(world.pair_cache().is_empty());
        assert_eq!(world.dispatcher().num_manifolds(), 0);
        assert!(matches!(
            world.remove_collision_object(a),
            Err(PhysicsError::UnknownBody(_))
        ));
    }

    #[test]
    fn filtered_objects_do_not_pair() {
        let mut world = world();
        let mut fixed = sphere_at(Vec3::ZERO);
        fixed.flags.insert(CollisionFlags::STATIC_OBJECT);
        world.add_collision_object(fixed.clone(), CollisionFilter::fixed());
        world.add_collision_object(fixed, CollisionFilter::fixed());
        world.perform_discrete_collision_detection();
        assert!(world.pair_cache().is_empty());
    }

    #[test]
    fn runaway_object_is_disabled() {
        let mut world = world();
        let id = world.add_collision_object(sphere_at(Vec3::ZERO), CollisionFilter::dynamic());
        if let Some(object) = world.object_mut(id) {
            object.shape = CollisionShape::sphere(1e7);
        }
        world.update_aabbs();
        assert_eq!(
            world.object(id).map(|o| o.activation_state()),
            Some(ActivationState::DisableSimulation)
        );
    }

    #[test]
    fn sweep_reports_closest_object() {
        let mut world = world();
        let near = world.add_collision_object(
            sphere_at(Vec3::new(2.0, 0.0, 0.0)),
            CollisionFilter::dynamic(),
        );
        world.add_collision_object(
            sphere_at(Vec3::new(4.0, 0.0, 0.0)),
            CollisionFilter::dynamic(),
        );

        let cast = SphereShape::new(0.25);
        let from = Transform::IDENTITY;
        let to = Transform::from_position(Vec3::new(6.0, 0.0, 0.0));
        let mut callback = ClosestConvexResultCallback::new(from.position, to.position);
        world.convex_sweep_test(&cast, &from, &to, &mut callback);

        assert!(callback.has_hit());
        assert_eq!(callback.hit_object, Some(near));
        // Surfaces meet when the cast centre reaches x = 1.25.
        approx::assert_relative_eq!(callback.closest_hit_fraction, 1.25 / 6.0, epsilon = 1e-3);
    }
}
