//! Dynamic bounding-volume tree over AABB leaves.
//!
//! Nodes live in a flat pool addressed by [`NodeId`]; freed nodes are
//! recycled through a free list. Leaves carry a `u32` payload (the
//! broadphase stores proxy ids there).

use glam::Vec3;

use super::aabb::Aabb;

pub type NodeId = u32;

/// Sentinel for "no node".
pub const NULL_NODE: NodeId = u32::MAX;

const STACK_CAPACITY: usize = 128;

#[derive(Debug, Clone)]
struct DbvtNode {
    volume: Aabb,
    parent: NodeId,
    children: [NodeId; 2],
    data: u32,
}

impl DbvtNode {
    fn is_leaf(&self) -> bool {
        self.children[1] == NULL_NODE
    }
}

#[derive(Debug, Clone)]
pub struct Dbvt {
    nodes: Vec<DbvtNode>,
    free: Vec<NodeId>,
    root: NodeId,
    leaves: usize,
    opath: u32,
}

impl Default for Dbvt {
    fn default() -> Self {
        Self::new()
    }
}

impl Dbvt {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: NULL_NODE,
            leaves: 0,
            opath: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root == NULL_NODE
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves
    }

    pub fn volume(&self, node: NodeId) -> &Aabb {
        &self.nodes[node as usize].volume
    }

    pub fn data(&self, node: NodeId) -> u32 {
        self.nodes[node as usize].data
    }

    pub fn is_leaf(&self, node: NodeId) -> bool {
        self.nodes[node as usize].is_leaf()
    }

    fn node(&self, id: NodeId) -> &DbvtNode {
        &self.nodes[id as usize]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut DbvtNode {
        &mut self.nodes[id as usize]
    }

    fn index_of(&self, node: NodeId) -> usize {
        let parent = self.node(node).parent;
        usize::from(self.node(parent).children[1] == node)
    }

    fn create_node(&mut self, parent: NodeId, volume: Aabb, data: u32) -> NodeId {
        let node = DbvtNode {
            volume,
            parent,
            children: [NULL_NODE, NULL_NODE],
            data,
        };
        if let Some(id) = self.free.pop() {
            self.nodes[id as usize] = node;
            id
        } else {
            self.nodes.push(node);
            (self.nodes.len() - 1) as NodeId
        }
    }

    fn delete_node(&mut self, id: NodeId) {
        self.free.push(id);
    }

    fn merged_children(&self, id: NodeId) -> Aabb {
        let [c0, c1] = self.node(id).children;
        self.node(c0).volume.merged(&self.node(c1).volume)
    }

    /// Adds a leaf holding `data` and returns its node.
    pub fn insert(&mut self, volume: Aabb, data: u32) -> NodeId {
        let leaf = self.create_node(NULL_NODE, volume, data);
        let root = self.root;
        self.insert_leaf(root, leaf);
        self.leaves += 1;
        leaf
    }

    pub fn remove(&mut self, leaf: NodeId) {
        self.remove_leaf(leaf);
        self.delete_node(leaf);
        self.leaves -= 1;
    }

    /// Re-inserts `leaf` from the root with its current volume.
    pub fn update(&mut self, leaf: NodeId) {
        let root = self.remove_leaf(leaf);
        let start = if root != NULL_NODE { self.root } else { root };
        self.insert_leaf(start, leaf);
    }

    /// Replaces the volume of `leaf` and re-inserts it.
    pub fn update_volume(&mut self, leaf: NodeId, volume: Aabb) {
        let root = self.remove_leaf(leaf);
        let start = if root != NULL_NODE { self.root } else { root };
        self.node_mut(leaf).volume = volume;
        self.insert_leaf(start, leaf);
    }

    /// Moves `leaf` to `volume` fattened by `margin` and by `velocity` on the
    /// side it points to. Returns false (and leaves the tree untouched) when
    /// the current volume still contains `volume`.
    pub fn update_with_velocity(
        &mut self,
        leaf: NodeId,
        mut volume: Aabb,
        velocity: Vec3,
        margin: f32,
    ) -> bool {
        if self.node(leaf).volume.contains(&volume) {
            return false;
        }
        volume.expand(Vec3::splat(margin));
        volume.signed_expand(velocity);
        self.update_volume(leaf, volume);
        true
    }

    /// Amortised rebalancing: each pass walks one path chosen by the rotating
    /// `opath` bit pattern, rotating nodes on the way, then re-inserts the
    /// leaf it reaches. A negative `passes` runs one pass per leaf.
    pub fn optimize_incremental(&mut self, passes: i32) {
        let mut passes = if passes < 0 {
            self.leaves as i32
        } else {
            passes
        };
        if self.root == NULL_NODE || passes <= 0 {
            return;
        }
        loop {
            let mut node = self.root;
            let mut bit = 0u32;
            while !self.node(node).is_leaf() {
                let sorted = self.sort(node);
                let side = ((self.opath >> bit) & 1) as usize;
                node = self.node(sorted).children[side];
                bit = (bit + 1) & 31;
            }
            self.update(node);
            self.opath = self.opath.wrapping_add(1);
            passes -= 1;
            if passes == 0 {
                break;
            }
        }
    }

    fn insert_leaf(&mut self, root: NodeId, leaf: NodeId) {
        if self.root == NULL_NODE {
            self.root = leaf;
            self.node_mut(leaf).parent = NULL_NODE;
            return;
        }

        let leaf_volume = self.node(leaf).volume;
        let mut root = root;
        while !self.node(root).is_leaf() {
            let [c0, c1] = self.node(root).children;
            root = if self.node(c0).volume.proximity(&leaf_volume)
                < self.node(c1).volume.proximity(&leaf_volume)
            {
                c0
            } else {
                c1
            };
        }

        let prev = self.node(root).parent;
        let merged = leaf_volume.merged(&self.node(root).volume);
        let node = self.create_node(prev, merged, 0);
        self.node_mut(node).children = [root, leaf];
        if prev != NULL_NODE {
            let slot = self.index_of(root);
            self.node_mut(prev).children[slot] = node;
            self.node_mut(root).parent = node;
            self.node_mut(leaf).parent = node;

            let mut node = node;
            let mut prev = prev;
            loop {
                if self.node(prev).volume.contains(&self.node(node).volume) {
                    break;
                }
                let refit = self.merged_children(prev);
                self.node_mut(prev).volume = refit;
                node = prev;
                prev = self.node(node).parent;
                if prev == NULL_NODE {
                    break;
                }
            }
        } else {
            self.node_mut(root).parent = node;
            self.node_mut(leaf).parent = node;
            self.root = node;
        }
    }

    /// Unlinks `leaf`, splicing its sibling into the parent's slot. Returns the
    /// lowest ancestor whose volume stopped changing, or the root.
    fn remove_leaf(&mut self, leaf: NodeId) -> NodeId {
        if leaf == self.root {
            self.root = NULL_NODE;
            return NULL_NODE;
        }

        let parent = self.node(leaf).parent;
        let prev = self.node(parent).parent;
        let sibling = self.node(parent).children[1 - self.index_of(leaf)];
        if prev != NULL_NODE {
            let slot = self.index_of(parent);
            self.node_mut(prev).children[slot] = sibling;
            self.node_mut(sibling).parent = prev;
            self.delete_node(parent);

            let mut prev = prev;
            while prev != NULL_NODE {
                let before = self.node(prev).volume;
                let refit = self.merged_children(prev);
                self.node_mut(prev).volume = refit;
                if before != refit {
                    prev = self.node(prev).parent;
                } else {
                    break;
                }
            }
            if prev != NULL_NODE {
                prev
            } else {
                self.root
            }
        } else {
            self.root = sibling;
            self.node_mut(sibling).parent = NULL_NODE;
            self.delete_node(parent);
            self.root
        }
    }

    /// Rotates `n` above its parent when the parent's id is larger, and
    /// returns the node now occupying `n`'s former position.
    fn sort(&mut self, n: NodeId) -> NodeId {
        let p = self.node(n).parent;
        if p == NULL_NODE || p <= n {
            return n;
        }

        let i = self.index_of(n);
        let j = 1 - i;
        let s = self.node(p).children[j];
        let q = self.node(p).parent;

        if q != NULL_NODE {
            let slot = self.index_of(p);
            self.node_mut(q).children[slot] = n;
        } else {
            self.root = n;
        }
        self.node_mut(s).parent = n;
        self.node_mut(p).parent = n;
        self.node_mut(n).parent = q;

        let [c0, c1] = self.node(n).children;
        self.node_mut(p).children = [c0, c1];
        self.node_mut(c0).parent = p;
        self.node_mut(c1).parent = p;
        self.node_mut(n).children[i] = p;
        self.node_mut(n).children[j] = s;

        let pv = self.node(p).volume;
        let nv = self.node(n).volume;
        self.node_mut(p).volume = nv;
        self.node_mut(n).volume = pv;
        p
    }

    /// Reports every pair of overlapping leaves between the subtree `root_a`
    /// of `tree_a` and the subtree `root_b` of `tree_b`. When both refer to
    /// the same subtree, each unordered pair is reported once.
    pub fn collide_tt<F>(tree_a: &Dbvt, root_a: NodeId, tree_b: &Dbvt, root_b: NodeId, mut policy: F)
    where
        F: FnMut(NodeId, NodeId),
    {
        if root_a == NULL_NODE || root_b == NULL_NODE {
            return;
        }
        let same_tree = std::ptr::eq(tree_a, tree_b);
        let mut stack: Vec<(NodeId, NodeId)> = Vec::with_capacity(STACK_CAPACITY);
        stack.push((root_a, root_b));

        while let Some((a, b)) = stack.pop() {
            let na = tree_a.node(a);
            let nb = tree_b.node(b);
            if same_tree && a == b {
                if !na.is_leaf() {
                    let [c0, c1] = na.children;
                    stack.push((c0, c0));
                    stack.push((c1, c1));
                    stack.push((c0, c1));
                }
            } else if na.volume.intersects(&nb.volume) {
                match (na.is_leaf(), nb.is_leaf()) {
                    (false, false) => {
                        let [a0, a1] = na.children;
                        let [b0, b1] = nb.children;
                        stack.push((a0, b0));
                        stack.push((a1, b0));
                        stack.push((a0, b1));
                        stack.push((a1, b1));
                    }
                    (false, true) => {
                        let [a0, a1] = na.children;
                        stack.push((a0, b));
                        stack.push((a1, b));
                    }
                    (true, false) => {
                        let [b0, b1] = nb.children;
                        stack.push((a, b0));
                        stack.push((a, b1));
                    }
                    (true, true) => policy(a, b),
                }
            }
        }
    }

    /// Visits every leaf whose volume overlaps `volume`.
    pub fn collide_volume<F>(&self, volume: &Aabb, mut policy: F)
    where
        F: FnMut(NodeId),
    {
        if self.root == NULL_NODE {
            return;
        }
        let mut stack = Vec::with_capacity(STACK_CAPACITY / 2);
        stack.push(self.root);
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            if !node.volume.intersects(volume) {
                continue;
            }
            if node.is_leaf() {
                policy(id);
            } else {
                stack.extend(node.children);
            }
        }
    }
}
