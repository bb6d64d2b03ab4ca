use crate::{
    collision::{dispatcher::CollisionDispatcher, pair_cache::HashedOverlappingPairCache},
    core::collision_object::{ActivationState, CollisionObject},
    utils::allocator::{Arena, EntityId},
};

/// Disjoint-set forest over dense object indices.
#[derive(Debug, Clone, Default)]
pub struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    pub fn new() -> Self {
        Self::default()
    }

    /// `n` singleton sets.
    pub fn reset(&mut self, n: usize) {
        self.parent.clear();
        self.parent.extend(0..n);
        self.size.clear();
        self.size.resize(n, 1);
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Root of `x`, halving the path on the way up.
    pub fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Joins the sets of `p` and `q`; the smaller tree hangs off the larger.
    pub fn unite(&mut self, p: usize, q: usize) {
        let (mut i, mut j) = (self.find(p), self.find(q));
        if i == j {
            return;
        }
        if self.size[i] > self.size[j] {
            std::mem::swap(&mut i, &mut j);
        }
        self.parent[i] = j;
        self.size[j] += self.size[i];
    }

    /// Size of the set containing `x`.
    pub fn set_size(&mut self, x: usize) -> usize {
        let root = self.find(x);
        self.size[root]
    }

    /// `(root, element)` for every element, grouped by root.
    pub fn sorted_islands(&mut self) -> Vec<(usize, usize)> {
        let mut islands: Vec<(usize, usize)> =
            (0..self.len()).map(|element| (self.find(element), element)).collect();
        islands.sort_unstable();
        islands
    }
}

/// Groups objects connected by contact into islands, decides which islands
/// sleep and hands each awake island's manifolds to a solver callback.
#[derive(Debug, Default)]
pub struct SimulationIslandManager {
    union_find: UnionFind,
    /// Dense index to object id for the current step.
    objects: Vec<EntityId>,
    islands: Vec<(usize, usize)>,
    island_manifolds: Vec<(i32, EntityId)>,
}

fn island_id(object0: &CollisionObject, object1: &CollisionObject) -> i32 {
    if object0.island_tag >= 0 {
        object0.island_tag
    } else {
        object1.island_tag
    }
}

impl SimulationIslandManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn union_find(&self) -> &UnionFind {
        &self.union_find
    }

    /// Gives every object its own island and merges the islands of objects
    /// whose broadphase pair can respond to contact.
    pub fn update_activation_state<T>(
        &mut self,
        objects: &mut Arena<T>,
        pair_cache: &HashedOverlappingPairCache,
    ) where
        T: AsRef<CollisionObject> + AsMut<CollisionObject>,
    {
        self.objects.clear();
        for (index, (id, object)) in objects.iter_mut().enumerate() {
            let object = object.as_mut();
            object.island_tag = index as i32;
            object.companion_id = -1;
            object.hit_fraction = 1.0;
            self.objects.push(id);
        }
        self.union_find.reset(self.objects.len());
        self.find_unions(objects, pair_cache);
    }

    pub fn find_unions<T>(&mut self, objects: &Arena<T>, pair_cache: &HashedOverlappingPairCache)
    where
        T: AsRef<CollisionObject>,
    {
        for pair in pair_cache.overlapping_pairs() {
            let (Some(object0), Some(object1)) = (
                objects.get(pair.client0).map(AsRef::as_ref),
                objects.get(pair.client1).map(AsRef::as_ref),
            ) else {
                continue;
            };
            if object0.merges_simulation_islands() && object1.merges_simulation_islands() {
                self.union_find
                    .unite(object0.island_tag as usize, object1.island_tag as usize);
            }
        }
    }

    /// Writes each dynamic object's island root into its tag. Static and
    /// kinematic objects get tag -1.
    pub fn store_island_activation_state<T>(&mut self, objects: &mut Arena<T>)
    where
        T: AsMut<CollisionObject>,
    {
        for (index, &id) in self.objects.iter().enumerate() {
            let Some(object) = objects.get_mut(id).map(AsMut::as_mut) else {
                continue;
            };
            if object.is_static_or_kinematic_object() {
                object.island_tag = -1;
                object.companion_id = -2;
            } else {
                object.island_tag = self.union_find.find(index) as i32;
                object.companion_id = -1;
            }
        }
    }

    /// Puts islands without an awake member to sleep, wakes members of the
    /// others and collects the manifolds that need solving.
    pub fn build_islands<T>(&mut self, dispatcher: &CollisionDispatcher, objects: &mut Arena<T>)
    where
        T: AsRef<CollisionObject> + AsMut<CollisionObject>,
    {
        self.island_manifolds.clear();
        self.islands = self.union_find.sorted_islands();

        let mut start = 0;
        while start < self.islands.len() {
            let root = self.islands[start].0;
            let mut end = start + 1;
            while end < self.islands.len() && self.islands[end].0 == root {
                end += 1;
            }
            let members = &self.islands[start..end];
            let tag = root as i32;

            let all_sleeping = members.iter().all(|&(_, element)| {
                objects
                    .get(self.objects[element])
                    .map(AsRef::as_ref)
                    .filter(|object| object.island_tag == tag)
                    .map_or(true, |object| {
                        !matches!(
                            object.activation_state(),
                            ActivationState::Active | ActivationState::DisableDeactivation
                        )
                    })
            });

            for &(_, element) in members {
                let Some(object) = objects.get_mut(self.objects[element]).map(AsMut::as_mut)
                else {
                    continue;
                };
                if object.island_tag != tag {
                    continue;
                }
                if all_sleeping {
                    object.set_activation_state(ActivationState::IslandSleeping);
                } else if object.activation_state() == ActivationState::IslandSleeping {
                    object.set_activation_state(ActivationState::WantsDeactivation);
                }
            }
            start = end;
        }

        for (manifold_id, manifold) in dispatcher.manifolds() {
            let (id0, id1) = (manifold.body0(), manifold.body1());
            let Some((object0, object1)) = objects.get2_mut(id0, id1) else {
                continue;
            };
            let (object0, object1) = (object0.as_mut(), object1.as_mut());
            let sleeping0 = object0.activation_state() == ActivationState::IslandSleeping;
            let sleeping1 = object1.activation_state() == ActivationState::IslandSleeping;
            if sleeping0 && sleeping1 {
                continue;
            }
            // Moving kinematic bodies wake whatever they touch.
            if object0.is_kinematic_object() && !sleeping0 {
                object1.activate(false);
            }
            if object1.is_kinematic_object() && !sleeping1 {
                object0.activate(false);
            }
            let island = island_id(object0, object1);
            if island >= 0 && dispatcher.needs_response(object0, object1) {
                self.island_manifolds.push((island, manifold_id));
            }
        }
    }

    /// Builds the islands and calls `process(objects, dispatcher, bodies,
    /// manifolds, island_id)` for each island whose members are all active.
    ///
    /// Returns the number of awake islands holding at least one dynamic body.
    pub fn build_and_process_islands<T, F>(
        &mut self,
        dispatcher: &mut CollisionDispatcher,
        objects: &mut Arena<T>,
        mut process: F,
    ) -> usize
    where
        T: AsRef<CollisionObject> + AsMut<CollisionObject>,
        F: FnMut(&mut Arena<T>, &mut CollisionDispatcher, &[EntityId], &[EntityId], i32),
    {
        self.build_islands(dispatcher, objects);
        self.island_manifolds.sort_by_key(|&(island, _)| island);

        let mut awake = 0;
        let mut bodies = Vec::new();
        let mut manifolds = Vec::new();
        let mut manifold_cursor = 0;
        let mut start = 0;
        while start < self.islands.len() {
            let root = self.islands[start].0;
            let tag = root as i32;
            let mut sleeping = false;
            let mut has_dynamic = false;
            bodies.clear();

            let mut end = start;
            while end < self.islands.len() && self.islands[end].0 == root {
                let id = self.objects[self.islands[end].1];
                if let Some(object) = objects.get(id).map(AsRef::as_ref) {
                    sleeping |= !object.is_active();
                    has_dynamic |= object.island_tag == tag;
                    bodies.push(id);
                }
                end += 1;
            }

            manifolds.clear();
            while manifold_cursor < self.island_manifolds.len()
                && self.island_manifolds[manifold_cursor].0 < tag
            {
                manifold_cursor += 1;
            }
            while manifold_cursor < self.island_manifolds.len()
                && self.island_manifolds[manifold_cursor].0 == tag
            {
                manifolds.push(self.island_manifolds[manifold_cursor].1);
                manifold_cursor += 1;
            }

            if !sleeping {
                if has_dynamic {
                    awake += 1;
                }
                process(objects, dispatcher, &bodies, &manifolds, tag);
            }
            start = end;
        }
        awake
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        collision::{broadphase::ProxyId, broadphase::BroadphaseProxy, shapes::CollisionShape},
        core::{
            collision_object::{CollisionFilter, CollisionFlags},
            types::Transform,
        },
    };
    use glam::Vec3;

    #[test]
    fn union_find_merges_transitively() {
        let mut uf = UnionFind::new();
        uf.reset(4);
        uf.unite(0, 1);
        uf.unite(1, 2);
        assert_eq!(uf.find(0), uf.find(2));
        assert_ne!(uf.find(0), uf.find(3));
        assert_eq!(uf.set_size(2), 3);
    }

    #[test]
    fn smaller_set_joins_larger() {
        let mut uf = UnionFind::new();
        uf.reset(4);
        uf.unite(0, 1);
        uf.unite(0, 2);
        let big = uf.find(0);
        uf.unite(3, 0);
        assert_eq!(uf.find(3), big);
    }

    #[test]
    fn sorted_islands_are_grouped() {
        let mut uf = UnionFind::new();
        uf.reset(5);
        uf.unite(4, 0);
        uf.unite(2, 3);
        let islands = uf.sorted_islands();
        assert_eq!(islands.len(), 5);
        assert!(islands.windows(2).all(|w| w[0].0 <= w[1].0));
        let roots: std::collections::HashSet<usize> = islands.iter().map(|e| e.0).collect();
        assert_eq!(roots.len(), 3);
    }

    fn sphere(position: Vec3) -> CollisionObject {
        CollisionObject::new(CollisionShape::sphere(0.5), Transform::from_position(position))
    }

    fn add_pair(
        cache: &mut HashedOverlappingPairCache,
        a: (u32, EntityId),
        b: (u32, EntityId),
    ) {
        let proxy = |(p, id): (u32, EntityId)| {
            BroadphaseProxy::new(ProxyId(p), id, CollisionFilter::dynamic(), Default::default())
        };
        cache.add_overlapping_pair(&proxy(a), &proxy(b));
    }

    #[test]
    fn static_objects_do_not_bridge_islands() {
        let mut objects = Arena::new();
        let a = objects.insert(sphere(Vec3::ZERO));
        let mut ground = sphere(Vec3::Y);
        ground.flags.insert(CollisionFlags::STATIC_OBJECT);
        let g = objects.insert(ground);
        let b = objects.insert(sphere(Vec3::X));

        let mut cache = HashedOverlappingPairCache::new();
        add_pair(&mut cache, (0, a), (1, g));
        add_pair(&mut cache, (2, b), (1, g));

        let mut manager = SimulationIslandManager::new();
        manager.update_activation_state(&mut objects, &cache);
        manager.store_island_activation_state(&mut objects);

        let tag = |id| objects.get(id).map(|o: &CollisionObject| o.island_tag);
        assert_eq!(tag(g), Some(-1));
        assert_ne!(tag(a), tag(b));
    }

    #[test]
    fn resting_island_goes_to_sleep() {
        let mut objects = Arena::new();
        let a = objects.insert(sphere(Vec3::ZERO));
        let b = objects.insert(sphere(Vec3::X));
        for object in objects.values_mut() {
            object.set_activation_state(ActivationState::WantsDeactivation);
        }
        let mut cache = HashedOverlappingPairCache::new();
        add_pair(&mut cache, (0, a), (1, b));

        let mut dispatcher = CollisionDispatcher::new();
        let mut manager = SimulationIslandManager::new();
        manager.update_activation_state(&mut objects, &cache);
        manager.store_island_activation_state(&mut objects);
        let mut processed = 0;
        let awake = manager.build_and_process_islands(
            &mut dispatcher,
            &mut objects,
            |_, _, _, _, _| processed += 1,
        );

        assert_eq!(awake, 0);
        assert_eq!(processed, 0);
        for object in objects.values() {
            assert_eq!(object.activation_state(), ActivationState::IslandSleeping);
        }
    }

    #[test]
    fn inactive_member_keeps_island_out_of_the_solver() {
        let mut objects = Arena::new();
        let a = objects.insert(sphere(Vec3::ZERO));
        let b = objects.insert(sphere(Vec3::X));
        if let Some(object) = objects.get_mut(b) {
            object.force_activation_state(ActivationState::DisableSimulation);
        }
        let mut cache = HashedOverlappingPairCache::new();
        add_pair(&mut cache, (0, a), (1, b));

        let mut dispatcher = CollisionDispatcher::new();
        let manifold = dispatcher.new_manifold(a, b);
        if let Some(m) = dispatcher.manifold_mut(manifold) {
            m.add_manifold_point(crate::collision::contact::ManifoldPoint::new(
                Vec3::ZERO,
                Vec3::ZERO,
                Vec3::Y,
                -0.01,
            ));
        }

        let mut manager = SimulationIslandManager::new();
        manager.update_activation_state(&mut objects, &cache);
        manager.store_island_activation_state(&mut objects);
        let mut processed = 0;
        let awake = manager.build_and_process_islands(
            &mut dispatcher,
            &mut objects,
            |_, _, _, _, _| processed += 1,
        );

        assert_eq!(awake, 0);
        assert_eq!(processed, 0);
        assert_eq!(
            objects.get(a).map(|o| o.activation_state()),
            Some(ActivationState::Active)
        );
    }

    #[test]
    fn one_awake_member_keeps_island_awake() {
        let mut objects = Arena::new();
        let a = objects.insert(sphere(Vec3::ZERO));
        let b = objects.insert(sphere(Vec3::X));
        if let Some(object) = objects.get_mut(b) {
            object.force_activation_state(ActivationState::IslandSleeping);
        }
        let mut cache = HashedOverlappingPairCache::new();
        add_pair(&mut cache, (0, a), (1, b));

        let mut dispatcher = CollisionDispatcher::new();
        let manifold = dispatcher.new_manifold(a, b);
        if let Some(m) = dispatcher.manifold_mut(manifold) {
            m.add_manifold_point(crate::collision::contact::ManifoldPoint::new(
                Vec3::ZERO,
                Vec3::ZERO,
                Vec3::Y,
                -0.01,
            ));
        }

        let mut manager = SimulationIslandManager::new();
        manager.update_activation_state(&mut objects, &cache);
        manager.store_island_activation_state(&mut objects);
        let mut seen = Vec::new();
        let awake = manager.build_and_process_islands(
            &mut dispatcher,
            &mut objects,
            |_, _, bodies, manifolds, _| seen.push((bodies.len(), manifolds.to_vec())),
        );

        assert_eq!(awake, 1);
        assert_eq!(seen, vec![(2, vec![manifold])]);
        assert_eq!(
            objects.get(b).map(|o| o.activation_state()),
            Some(ActivationState::WantsDeactivation)
        );
    }
}
