//! Hash table of overlapping proxy pairs.
//!
//! Pairs are stored densely in one array. Each bucket of `hash_table` points
//! at the first pair with that hash, and `next` chains the rest, so lookups
//! never allocate and removal keeps the array compact by moving the last pair
//! into the hole.

use super::{
    broadphase::{BroadphaseProxy, ProxyId},
    dispatcher::{CollisionDispatcher, ConvexConvexAlgorithm},
};
use crate::utils::allocator::EntityId;

const NULL_PAIR: u32 = u32::MAX;
const INITIAL_CAPACITY: usize = 2;

/// Two overlapping proxies, `proxy0 < proxy1`, plus the cached narrowphase
/// state for them.
#[derive(Debug)]
pub struct BroadphasePair {
    pub proxy0: ProxyId,
    pub proxy1: ProxyId,
    /// Bodies owning `proxy0` and `proxy1`.
    pub client0: EntityId,
    pub client1: EntityId,
    pub algorithm: Option<ConvexConvexAlgorithm>,
}

impl BroadphasePair {
    pub fn contains(&self, proxy: ProxyId) -> bool {
        self.proxy0 == proxy || self.proxy1 == proxy
    }
}

fn pair_hash(id0: u32, id1: u32) -> u32 {
    let mut key = id0 | (id1 << 16);
    key = key.wrapping_add(!(key << 15));
    key ^= key >> 10;
    key = key.wrapping_add(key << 3);
    key ^= key >> 6;
    key = key.wrapping_add(!(key << 11));
    key ^= key >> 16;
    key
}

fn canonical(a: ProxyId, b: ProxyId) -> (ProxyId, ProxyId) {
    if a.0 > b.0 {
        (b, a)
    } else {
        (a, b)
    }
}

#[derive(Debug)]
pub struct HashedOverlappingPairCache {
    pairs: Vec<BroadphasePair>,
    hash_table: Vec<u32>,
    next: Vec<u32>,
    capacity: usize,
}

impl Default for HashedOverlappingPairCache {
    fn default() -> Self {
        Self::new()
    }
}

impl HashedOverlappingPairCache {
    pub fn new() -> Self {
        Self {
            pairs: Vec::with_capacity(INITIAL_CAPACITY),
            hash_table: vec![NULL_PAIR; INITIAL_CAPACITY],
            next: vec![NULL_PAIR; INITIAL_CAPACITY],
            capacity: INITIAL_CAPACITY,
        }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn overlapping_pairs(&self) -> &[BroadphasePair] {
        &self.pairs
    }

    pub fn overlapping_pairs_mut(&mut self) -> &mut [BroadphasePair] {
        &mut self.pairs
    }

    fn bucket(&self, a: ProxyId, b: ProxyId) -> usize {
        (pair_hash(a.0, b.0) as usize) & (self.capacity - 1)
    }

    /// Group/mask test applied before a pair is created.
    pub fn needs_broadphase_collision(a: &BroadphaseProxy, b: &BroadphaseProxy) -> bool {
        a.filter.collides_with(&b.filter)
    }

    /// Registers the pair unless filtering rejects it. Returns the new or
    /// already cached pair.
    pub fn add_overlapping_pair(
        &mut self,
        a: &BroadphaseProxy,
        b: &BroadphaseProxy,
    ) -> Option<&mut BroadphasePair> {
        if !Self::needs_broadphase_collision(a, b) {
            return None;
        }
        let (a, b) = if a.id.0 > b.id.0 { (b, a) } else { (a, b) };

        let mut hash = self.bucket(a.id, b.id);
        if let Some(index) = self.find_index(a.id, b.id, hash) {
            return Some(&mut self.pairs[index]);
        }

        let count = self.pairs.len();
        if count >= self.capacity {
            self.grow();
            hash = self.bucket(a.id, b.id);
        }
        self.pairs.push(BroadphasePair {
            proxy0: a.id,
            proxy1: b.id,
            client0: a.client,
            client1: b.client,
            algorithm: None,
        });
        self.next[count] = self.hash_table[hash];
        self.hash_table[hash] = count as u32;
        Some(&mut self.pairs[count])
    }

    pub fn find_pair(&self, a: ProxyId, b: ProxyId) -> Option<&BroadphasePair> {
        let (a, b) = canonical(a, b);
        let hash = self.bucket(a, b);
        self.find_index(a, b, hash).map(|index| &self.pairs[index])
    }

    fn find_index(&self, a: ProxyId, b: ProxyId, hash: usize) -> Option<usize> {
        let mut index = self.hash_table[hash];
        while index != NULL_PAIR {
            let pair = &self.pairs[index as usize];
            if pair.proxy0 == a && pair.proxy1 == b {
                return Some(index as usize);
            }
            index = self.next[index as usize];
        }
        None
    }

    /// Removes the pair and frees its cached algorithm. Returns false when the
    /// pair was not cached.
    pub fn remove_overlapping_pair(
        &mut self,
        a: ProxyId,
        b: ProxyId,
        dispatcher: &mut CollisionDispatcher,
    ) -> bool {
        let (a, b) = canonical(a, b);
        let hash = self.bucket(a, b);
        let Some(pair_index) = self.find_index(a, b, hash) else {
            return false;
        };
        self.clean_pair_at(pair_index, dispatcher);
        self.unlink(hash, pair_index);

        let last = self.pairs.len() - 1;
        if last != pair_index {
            let moved = &self.pairs[last];
            let last_hash = self.bucket(moved.proxy0, moved.proxy1);
            self.unlink(last_hash, last);
            self.pairs.swap(pair_index, last);
            self.next[pair_index] = self.hash_table[last_hash];
            self.hash_table[last_hash] = pair_index as u32;
        }
        self.pairs.pop();
        true
    }

    fn unlink(&mut self, hash: usize, index: usize) {
        let mut current = self.hash_table[hash];
        let mut previous = NULL_PAIR;
        while current as usize != index {
            previous = current;
            current = self.next[current as usize];
        }
        if previous != NULL_PAIR {
            self.next[previous as usize] = self.next[index];
        } else {
            self.hash_table[hash] = self.next[index];
        }
    }

    fn grow(&mut self) {
        self.capacity *= 2;
        self.hash_table = vec![NULL_PAIR; self.capacity];
        self.next = vec![NULL_PAIR; self.capacity];
        self.pairs.reserve(self.capacity - self.pairs.len());
        for index in 0..self.pairs.len() {
            let pair = &self.pairs[index];
            let hash = self.bucket(pair.proxy0, pair.proxy1);
            self.next[index] = self.hash_table[hash];
            self.hash_table[hash] = index as u32;
        }
    }

    fn clean_pair_at(&mut self, index: usize, dispatcher: &mut CollisionDispatcher) {
        if let Some(algorithm) = self.pairs[index].algorithm.take() {
            dispatcher.free_collision_algorithm(algorithm);
        }
    }

    /// Drops the cached algorithm of the pair but keeps the pair itself.
    pub fn clean_overlapping_pair(
        &mut self,
        a: ProxyId,
        b: ProxyId,
        dispatcher: &mut CollisionDispatcher,
    ) {
        let (a, b) = canonical(a, b);
        let hash = self.bucket(a, b);
        if let Some(index) = self.find_index(a, b, hash) {
            self.clean_pair_at(index, dispatcher);
        }
    }

    /// Drops the cached algorithm of every pair touching `proxy`.
    pub fn clean_proxy_from_pairs(&mut self, proxy: ProxyId, dispatcher: &mut CollisionDispatcher) {
        for index in 0..self.pairs.len() {
            if self.pairs[index].contains(proxy) {
                self.clean_pair_at(index, dispatcher);
            }
        }
    }

    pub fn remove_overlapping_pairs_containing_proxy(
        &mut self,
        proxy: ProxyId,
        dispatcher: &mut CollisionDispatcher,
    ) {
        self.process_all_overlapping_pairs(|pair| pair.contains(proxy), dispatcher);
    }

    /// Visits every pair; pairs for which `callback` returns true are removed.
    /// Removal moves the last pair into the current slot, so the slot is
    /// visited again.
    pub fn process_all_overlapping_pairs<F>(
        &mut self,
        mut callback: F,
        dispatcher: &mut CollisionDispatcher,
    ) where
        F: FnMut(&mut BroadphasePair) -> bool,
    {
        let mut index = 0;
        while index < self.pairs.len() {
            if callback(&mut self.pairs[index]) {
                let (a, b) = (self.pairs[index].proxy0, self.pairs[index].proxy1);
                self.remove_overlapping_pair(a, b, dispatcher);
            } else {
                index += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{collision::aabb::Aabb, core::collision_object::CollisionFilter};

    fn proxy(id: u32, filter: CollisionFilter) -> BroadphaseProxy {
        BroadphaseProxy::new(
            ProxyId(id),
            EntityId::from_index(id),
            filter,
            Aabb::default(),
        )
    }

    fn check_chains(cache: &HashedOverlappingPairCache) {
        for (index, pair) in cache.pairs.iter().enumerate() {
            assert!(pair.proxy0.0 < pair.proxy1.0);
            let hash = cache.bucket(pair.proxy0, pair.proxy1);
            assert_eq!(cache.find_index(pair.proxy0, pair.proxy1, hash), Some(index));
        }
    }

    #[test]
    fn pairs_are_canonical_and_unique() {
        let mut cache = HashedOverlappingPairCache::new();
        let a = proxy(5, CollisionFilter::dynamic());
        let b = proxy(2, CollisionFilter::dynamic());
        cache.add_overlapping_pair(&a, &b);
        cache.add_overlapping_pair(&b, &a);
        assert_eq!(cache.len(), 1);
        let pair = cache.find_pair(ProxyId(5), ProxyId(2)).expect("pair cached");
        assert_eq!((pair.proxy0, pair.proxy1), (ProxyId(2), ProxyId(5)));
        assert_eq!(pair.client0, EntityId::from_index(2));
    }

    #[test]
    fn filtered_pairs_are_rejected() {
        let mut cache = HashedOverlappingPairCache::new();
        let a = proxy(0, CollisionFilter::fixed());
        let b = proxy(1, CollisionFilter::fixed());
        assert!(cache.add_overlapping_pair(&a, &b).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn growth_and_swap_removal_keep_chains_consistent() {
        let mut cache = HashedOverlappingPairCache::new();
        let mut dispatcher = CollisionDispatcher::new();
        let proxies: Vec<_> = (0..12).map(|i| proxy(i, CollisionFilter::dynamic())).collect();
        for i in 0..proxies.len() {
            for j in (i + 1)..proxies.len() {
                cache.add_overlapping_pair(&proxies[i], &proxies[j]);
            }
        }
        assert_eq!(cache.len(), 66);
        check_chains(&cache);

        assert!(cache.remove_overlapping_pair(ProxyId(3), ProxyId(0), &mut dispatcher));
        assert!(!cache.remove_overlapping_pair(ProxyId(3), ProxyId(0), &mut dispatcher));
        check_chains(&cache);

        cache.remove_overlapping_pairs_containing_proxy(ProxyId(7), &mut dispatcher);
        assert_eq!(cache.len(), 65 - 11);
        assert!(cache.overlapping_pairs().iter().all(|p| !p.contains(ProxyId(7))));
        check_chains(&cache);
    }

    #[test]
    fn process_all_removes_requested_pairs() {
        let mut cache = HashedOverlappingPairCache::new();
        let mut dispatcher = CollisionDispatcher::new();
        let proxies: Vec<_> = (0..5).map(|i| proxy(i, CollisionFilter::dynamic())).collect();
        for i in 0..5 {
            for j in (i + 1)..5 {
                cache.add_overlapping_pair(&proxies[i], &proxies[j]);
            }
        }
        let mut visited = 0;
        cache.process_all_overlapping_pairs(
            |pair| {
                visited += 1;
                (pair.proxy0.0 + pair.proxy1.0) % 2 == 0
            },
            &mut dispatcher,
        );
        assert_eq!(visited, 10);
        assert!(cache
            .overlapping_pairs()
            .iter()
            .all(|p| (p.proxy0.0 + p.proxy1.0) % 2 == 1));
        check_chains(&cache);
    }
}
