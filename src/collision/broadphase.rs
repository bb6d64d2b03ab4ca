use glam::Vec3;
use log::trace;
use serde::{Deserialize, Serialize};

use super::{
    aabb::Aabb,
    dbvt::{Dbvt, NodeId, NULL_NODE},
    dispatcher::CollisionDispatcher,
    pair_cache::HashedOverlappingPairCache,
};
use crate::{
    config::{WorldConfig, DBVT_BP_MARGIN},
    core::collision_object::CollisionFilter,
    utils::allocator::EntityId,
};

/// Number of frames a moved proxy spends in the dynamic tree.
pub const STAGECOUNT: usize = 2;

/// Slot index of a broadphase proxy; unique among live proxies and used to
/// order pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProxyId(pub u32);

#[derive(Debug, Clone)]
pub struct BroadphaseProxy {
    pub id: ProxyId,
    /// Body this proxy stands for.
    pub client: EntityId,
    pub filter: CollisionFilter,
    pub aabb: Aabb,
    leaf: NodeId,
    stage: usize,
    links: [Option<ProxyId>; 2],
}

impl BroadphaseProxy {
    pub fn new(id: ProxyId, client: EntityId, filter: CollisionFilter, aabb: Aabb) -> Self {
        Self {
            id,
            client,
            filter,
            aabb,
            leaf: NULL_NODE,
            stage: 0,
            links: [None, None],
        }
    }

    /// Stage list the proxy currently sits in; `STAGECOUNT` means the fixed tree.
    pub fn stage(&self) -> usize {
        self.stage
    }
}

/// Interface between the collision world and its pair finder.
pub trait Broadphase: Send {
    fn create_proxy(&mut self, aabb: Aabb, client: EntityId, filter: CollisionFilter) -> ProxyId;

    /// Removes the proxy along with every cached pair that references it.
    fn destroy_proxy(&mut self, proxy: ProxyId, dispatcher: &mut CollisionDispatcher);

    fn set_aabb(&mut self, proxy: ProxyId, aabb: Aabb);

    fn proxy(&self, proxy: ProxyId) -> Option<&BroadphaseProxy>;

    /// Brings the pair cache up to date with the current proxy bounds.
    fn calculate_overlapping_pairs(&mut self, dispatcher: &mut CollisionDispatcher);

    /// Clients of every proxy whose bounds overlap `aabb`.
    fn aabb_test(&self, aabb: &Aabb, callback: &mut dyn FnMut(&BroadphaseProxy));

    fn pair_cache(&self) -> &HashedOverlappingPairCache;

    fn pair_cache_mut(&mut self) -> &mut HashedOverlappingPairCache;
}

/// Two-tree DBVT broadphase.
///
/// Moved proxies live in tree 0 and are tracked in one of `STAGECOUNT` stage
/// lists. Each update advances one stage list into tree 1, so a proxy that
/// stops moving costs a full re-collide only once.
#[derive(Debug)]
pub struct DbvtBroadphase {
    sets: [Dbvt; 2],
    proxies: Vec<Option<BroadphaseProxy>>,
    free_proxies: Vec<u32>,
    stage_roots: [Option<ProxyId>; STAGECOUNT + 1],
    pair_cache: HashedOverlappingPairCache,
    predicted_frames: f32,
    margin: f32,
    stage_current: usize,
    dynamic_update_percent: usize,
    fixed_update_percent: usize,
    updates: u64,
}

impl Default for DbvtBroadphase {
    fn default() -> Self {
        Self::new()
    }
}

impl DbvtBroadphase {
    pub fn new() -> Self {
        Self {
            sets: [Dbvt::new(), Dbvt::new()],
            proxies: Vec::new(),
            free_proxies: Vec::new(),
            stage_roots: [None; STAGECOUNT + 1],
            pair_cache: HashedOverlappingPairCache::new(),
            predicted_frames: 2.0,
            margin: DBVT_BP_MARGIN,
            stage_current: 0,
            dynamic_update_percent: 1,
            fixed_update_percent: 1,
            updates: 0,
        }
    }

    pub fn with_config(config: &WorldConfig) -> Self {
        Self {
            predicted_frames: config.predicted_frames,
            margin: config.dbvt_margin,
            dynamic_update_percent: config.dynamic_update_percent as usize,
            fixed_update_percent: config.fixed_update_percent as usize,
            ..Self::new()
        }
    }

    pub fn proxy_count(&self) -> usize {
        self.proxies.len() - self.free_proxies.len()
    }

    /// Number of completed `calculate_overlapping_pairs` calls.
    pub fn update_count(&self) -> u64 {
        self.updates
    }

    pub fn dynamic_tree(&self) -> &Dbvt {
        &self.sets[0]
    }

    pub fn fixed_tree(&self) -> &Dbvt {
        &self.sets[1]
    }

    fn slot(&self, id: ProxyId) -> &BroadphaseProxy {
        match &self.proxies[id.0 as usize] {
            Some(proxy) => proxy,
            None => panic!("broadphase proxy {} is not live", id.0),
        }
    }

    fn slot_mut(&mut self, id: ProxyId) -> &mut BroadphaseProxy {
        match &mut self.proxies[id.0 as usize] {
            Some(proxy) => proxy,
            None => panic!("broadphase proxy {} is not live", id.0),
        }
    }

    fn list_append(&mut self, item: ProxyId, stage: usize) {
        let head = self.stage_roots[stage];
        {
            let proxy = self.slot_mut(item);
            proxy.links = [None, head];
        }
        if let Some(head) = head {
            self.slot_mut(head).links[0] = Some(item);
        }
        self.stage_roots[stage] = Some(item);
    }

    fn list_remove(&mut self, item: ProxyId, stage: usize) {
        let [prev, next] = self.slot(item).links;
        match prev {
            Some(prev) => self.slot_mut(prev).links[1] = next,
            None => self.stage_roots[stage] = next,
        }
        if let Some(next) = next {
            self.slot_mut(next).links[0] = prev;
        }
    }

    fn collide(&mut self, dispatcher: &mut CollisionDispatcher) {
        let dynamic_passes = 1 + self.sets[0].leaf_count() * self.dynamic_update_percent / 100;
        let fixed_passes = 1 + self.sets[1].leaf_count() * self.fixed_update_percent / 100;
        self.sets[0].optimize_incremental(dynamic_passes as i32);
        self.sets[1].optimize_incremental(fixed_passes as i32);

        self.stage_current = (self.stage_current + 1) % STAGECOUNT;
        let mut current = self.stage_roots[self.stage_current];
        while let Some(id) = current {
            let (next, stage, leaf, aabb) = {
                let proxy = self.slot(id);
                (proxy.links[1], proxy.stage, proxy.leaf, proxy.aabb)
            };
            self.list_remove(id, stage);
            self.list_append(id, STAGECOUNT);

            let Self {
                sets,
                proxies,
                pair_cache,
                ..
            } = self;
            collide_trees(&sets[1], sets[1].root(), &sets[0], leaf, proxies, pair_cache);

            self.sets[0].remove(leaf);
            let new_leaf = self.sets[1].insert(aabb, id.0);
            let proxy = self.slot_mut(id);
            proxy.leaf = new_leaf;
            proxy.stage = STAGECOUNT;
            current = next;
        }

        {
            let Self {
                sets,
                proxies,
                pair_cache,
                ..
            } = self;
            collide_trees(&sets[0], sets[0].root(), &sets[1], sets[1].root(), proxies, pair_cache);
            collide_trees(&sets[0], sets[0].root(), &sets[0], sets[0].root(), proxies, pair_cache);
        }

        let mut index = 0;
        while index < self.pair_cache.len() {
            let pair = &self.pair_cache.overlapping_pairs()[index];
            let (a, b) = (pair.proxy0, pair.proxy1);
            if self.slot(a).aabb.intersects(&self.slot(b).aabb) {
                index += 1;
            } else {
                self.pair_cache.remove_overlapping_pair(a, b, dispatcher);
            }
        }
        self.updates += 1;
    }
}

/// Adds a cached pair for every overlapping leaf pair of the two subtrees.
fn collide_trees(
    tree_a: &Dbvt,
    root_a: NodeId,
    tree_b: &Dbvt,
    root_b: NodeId,
    proxies: &[Option<BroadphaseProxy>],
    pair_cache: &mut HashedOverlappingPairCache,
) {
    Dbvt::collide_tt(tree_a, root_a, tree_b, root_b, |na, nb| {
        let a = proxies[tree_a.data(na) as usize].as_ref();
        let b = proxies[tree_b.data(nb) as usize].as_ref();
        if let (Some(a), Some(b)) = (a, b) {
            if a.id != b.id && a.aabb.intersects(&b.aabb) {
                pair_cache.add_overlapping_pair(a, b);
            }
        }
    });
}

impl Broadphase for DbvtBroadphase {
    fn create_proxy(&mut self, aabb: Aabb, client: EntityId, filter: CollisionFilter) -> ProxyId {
        let id = match self.free_proxies.pop() {
            Some(slot) => ProxyId(slot),
            None => {
                self.proxies.push(None);
                ProxyId((self.proxies.len() - 1) as u32)
            }
        };
        let mut proxy = BroadphaseProxy::new(id, client, filter, aabb);
        proxy.leaf = self.sets[0].insert(aabb, id.0);
        proxy.stage = self.stage_current;
        self.proxies[id.0 as usize] = Some(proxy);
        self.list_append(id, self.stage_current);
        trace!("broadphase: created proxy {} for body {}", id.0, client);
        id
    }

    fn destroy_proxy(&mut self, proxy: ProxyId, dispatcher: &mut CollisionDispatcher) {
        let Some(Some(slot)) = self.proxies.get(proxy.0 as usize) else {
            return;
        };
        let (leaf, stage) = (slot.leaf, slot.stage);
        if stage == STAGECOUNT {
            self.sets[1].remove(leaf);
        } else {
            self.sets[0].remove(leaf);
        }
        self.list_remove(proxy, stage);
        self.pair_cache.clean_proxy_from_pairs(proxy, dispatcher);
        self.pair_cache
            .remove_overlapping_pairs_containing_proxy(proxy, dispatcher);
        self.proxies[proxy.0 as usize] = None;
        self.free_proxies.push(proxy.0);
    }

    fn set_aabb(&mut self, proxy: ProxyId, aabb: Aabb) {
        let (leaf, stage, old_center) = {
            let slot = self.slot(proxy);
            (slot.leaf, slot.stage, slot.aabb.center())
        };
        let leaf = if stage == STAGECOUNT {
            self.sets[1].remove(leaf);
            self.sets[0].insert(aabb, proxy.0)
        } else {
            if self.sets[0].volume(leaf).intersects(&aabb) {
                let delta: Vec3 = (aabb.center() - old_center) * self.predicted_frames;
                self.sets[0].update_with_velocity(leaf, aabb, delta, self.margin);
            } else {
                self.sets[0].update_volume(leaf, aabb);
            }
            leaf
        };
        self.list_remove(proxy, stage);
        let stage_current = self.stage_current;
        {
            let slot = self.slot_mut(proxy);
            slot.leaf = leaf;
            slot.aabb = aabb;
            slot.stage = stage_current;
        }
        self.list_append(proxy, stage_current);
    }

    fn proxy(&self, proxy: ProxyId) -> Option<&BroadphaseProxy> {
        self.proxies.get(proxy.0 as usize).and_then(Option::as_ref)
    }

    fn calculate_overlapping_pairs(&mut self, dispatcher: &mut CollisionDispatcher) {
        self.collide(dispatcher);
    }

    fn aabb_test(&self, aabb: &Aabb, callback: &mut dyn FnMut(&BroadphaseProxy)) {
        for tree in &self.sets {
            tree.collide_volume(aabb, |node| {
                if let Some(proxy) = self.proxies[tree.data(node) as usize].as_ref() {
                    if proxy.aabb.intersects(aabb) {
                        callback(proxy);
                    }
                }
            });
        }
    }

    fn pair_cache(&self) -> &HashedOverlappingPairCache {
        &self.pair_cache
    }

    fn pair_cache_mut(&mut self) -> &mut HashedOverlappingPairCache {
        &mut self.pair_cache
    }
}
