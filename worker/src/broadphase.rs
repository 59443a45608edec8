use std::collections::BTreeMap;

use atoll_shared::math::Vec3;
use atoll_shared::{
    Aabb, ComponentKind, Entity, Scalar, Store, TreeView, TreeViewNode, WorldAabb,
    MANIFOLD_SEPARATION_THRESHOLD,
};

/// Extra margin applied to leaf AABBs so slowly moving bodies do not get
/// reinserted every step.
const FAT_MARGIN: Scalar = 0.1;

/// Leaf count above which the pair query is worth running on the pool.
pub const PARALLEL_THRESHOLD: usize = 64;

const NULL: u32 = u32::MAX;

#[derive(Clone)]
struct TreeNode {
    aabb: Aabb,
    parent: u32,
    left: u32,
    right: u32,
    entity: Option<Entity>,
}

impl TreeNode {
    fn is_leaf(&self) -> bool {
        self.entity.is_some()
    }
}

/// Incremental AABB tree. Leaves carry fat AABBs; a leaf is reinserted only
/// when its tight AABB escapes the fat one. Insertion picks the sibling
/// minimizing surface-area growth.
pub struct DynamicAabbTree {
    nodes: Vec<TreeNode>,
    free: Vec<u32>,
    root: u32,
}

impl DynamicAabbTree {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: NULL,
        }
    }

    fn allocate(&mut self, node: TreeNode) -> u32 {
        if let Some(index) = self.free.pop() {
            self.nodes[index as usize] = node;
            index
        } else {
            self.nodes.push(node);
            (self.nodes.len() - 1) as u32
        }
    }

    pub fn insert(&mut self, aabb: Aabb, entity: Entity) -> u32 {
        let fat = aabb.inflated(FAT_MARGIN);
        let leaf = self.allocate(TreeNode {
            aabb: fat,
            parent: NULL,
            left: NULL,
            right: NULL,
            entity: Some(entity),
        });
        self.insert_leaf(leaf);
        leaf
    }

    pub fn remove(&mut self, leaf: u32) {
        self.remove_leaf(leaf);
        self.free.push(leaf);
    }

    /// Updates a leaf's AABB. Returns true when the leaf had to be moved.
    pub fn update(&mut self, leaf: u32, aabb: Aabb) -> bool {
        if self.nodes[leaf as usize].aabb.contains(&aabb) {
            return false;
        }
        self.remove_leaf(leaf);
        self.nodes[leaf as usize].aabb = aabb.inflated(FAT_MARGIN);
        self.insert_leaf(leaf);
        true
    }

    pub fn leaf_aabb(&self, leaf: u32) -> Aabb {
        self.nodes[leaf as usize].aabb
    }

    pub fn query(&self, aabb: &Aabb, mut visitor: impl FnMut(Entity)) {
        if self.root == NULL {
            return;
        }
        let mut stack = vec![self.root];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];
            if !node.aabb.intersects(aabb) {
                continue;
            }
            if let Some(entity) = node.entity {
                visitor(entity);
            } else {
                stack.push(node.left);
                stack.push(node.right);
            }
        }
    }

    /// Frozen snapshot for coordinator-level queries.
    pub fn view(&self) -> TreeView {
        let mut view = TreeView::default();
        if self.root == NULL {
            return view;
        }
        // Compact the live subset; indices are remapped densely.
        let mut remap = BTreeMap::new();
        let mut stack = vec![self.root];
        let mut order = Vec::new();
        while let Some(index) = stack.pop() {
            remap.insert(index, order.len() as u32);
            order.push(index);
            let node = &self.nodes[index as usize];
            if !node.is_leaf() {
                stack.push(node.left);
                stack.push(node.right);
            }
        }
        for index in order {
            let node = &self.nodes[index as usize];
            view.nodes.push(TreeViewNode {
                aabb: node.aabb,
                entity: node.entity,
                left: (node.left != NULL).then(|| remap[&node.left]),
                right: (node.right != NULL).then(|| remap[&node.right]),
            });
        }
        view.root = Some(remap[&self.root]);
        view
    }

    fn insert_leaf(&mut self, leaf: u32) {
        if self.root == NULL {
            self.root = leaf;
            self.nodes[leaf as usize].parent = NULL;
            return;
        }

        let leaf_aabb = self.nodes[leaf as usize].aabb;
        let mut index = self.root;
        while !self.nodes[index as usize].is_leaf() {
            let left = self.nodes[index as usize].left;
            let right = self.nodes[index as usize].right;
            let merged = self.nodes[index as usize].aabb.merged(&leaf_aabb);
            let cost = 2.0 * merged.surface_area();
            let descend_cost = |tree: &Self, child: u32| {
                let child_aabb = tree.nodes[child as usize].aabb;
                let combined = child_aabb.merged(&leaf_aabb);
                if tree.nodes[child as usize].is_leaf() {
                    combined.surface_area()
                } else {
                    combined.surface_area() - child_aabb.surface_area()
                }
            };
            let cost_left = descend_cost(self, left);
            let cost_right = descend_cost(self, right);
            if cost < cost_left && cost < cost_right {
                break;
            }
            index = if cost_left <= cost_right { left } else { right };
        }

        let sibling = index;
        let old_parent = self.nodes[sibling as usize].parent;
        let new_parent = self.allocate(TreeNode {
            aabb: leaf_aabb.merged(&self.nodes[sibling as usize].aabb),
            parent: old_parent,
            left: sibling,
            right: leaf,
            entity: None,
        });
        self.nodes[sibling as usize].parent = new_parent;
        self.nodes[leaf as usize].parent = new_parent;

        if old_parent == NULL {
            self.root = new_parent;
        } else if self.nodes[old_parent as usize].left == sibling {
            self.nodes[old_parent as usize].left = new_parent;
        } else {
            self.nodes[old_parent as usize].right = new_parent;
        }

        self.refit_upwards(new_parent);
    }

    fn remove_leaf(&mut self, leaf: u32) {
        if self.root == leaf {
            self.root = NULL;
            return;
        }
        let parent = self.nodes[leaf as usize].parent;
        let grandparent = self.nodes[parent as usize].parent;
        let sibling = if self.nodes[parent as usize].left == leaf {
            self.nodes[parent as usize].right
        } else {
            self.nodes[parent as usize].left
        };

        if grandparent == NULL {
            self.root = sibling;
            self.nodes[sibling as usize].parent = NULL;
        } else {
            if self.nodes[grandparent as usize].left == parent {
                self.nodes[grandparent as usize].left = sibling;
            } else {
                self.nodes[grandparent as usize].right = sibling;
            }
            self.nodes[sibling as usize].parent = grandparent;
            self.refit_upwards(grandparent);
        }
        self.free.push(parent);
        self.nodes[leaf as usize].parent = NULL;
    }

    fn refit_upwards(&mut self, mut index: u32) {
        while index != NULL {
            let left = self.nodes[index as usize].left;
            let right = self.nodes[index as usize].right;
            self.nodes[index as usize].aabb = self.nodes[left as usize]
                .aabb
                .merged(&self.nodes[right as usize].aabb);
            index = self.nodes[index as usize].parent;
        }
    }
}

impl Default for DynamicAabbTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Broadphase over one island's bodies: keeps the dynamic tree in sync with
/// the store's AABBs and produces candidate pairs for the narrowphase.
pub struct Broadphase {
    tree: DynamicAabbTree,
    leaves: BTreeMap<Entity, u32>,
    /// Pairs produced by the async path, consumed by `finish_update`.
    pending_pairs: Vec<(Entity, Entity)>,
}

impl Broadphase {
    pub fn new() -> Self {
        Self {
            tree: DynamicAabbTree::new(),
            leaves: BTreeMap::new(),
            pending_pairs: Vec::new(),
        }
    }

    pub fn parallelizable(&self) -> bool {
        self.leaves.len() > PARALLEL_THRESHOLD
    }

    /// Synchronizes the tree with the store and returns candidate pairs:
    /// bodies whose separation-inflated AABBs overlap, at least one of them
    /// procedural.
    pub fn update(&mut self, store: &Store) -> Vec<(Entity, Entity)> {
        self.sync_tree(store);
        self.collect_pairs(store)
    }

    pub fn sync_tree(&mut self, store: &Store) {
        // Remove leaves for entities that lost their AABB or died.
        let stale: Vec<Entity> = self
            .leaves
            .keys()
            .copied()
            .filter(|entity| !store.is_alive(*entity) || !store.has::<WorldAabb>(*entity))
            .collect();
        for entity in stale {
            let leaf = self.leaves.remove(&entity).expect("leaf exists");
            self.tree.remove(leaf);
        }

        store.each::<WorldAabb>(|entity, aabb| {
            match self.leaves.get(&entity) {
                Some(leaf) => {
                    self.tree.update(*leaf, aabb.0);
                }
                None => {
                    let leaf = self.tree.insert(aabb.0, entity);
                    self.leaves.insert(entity, leaf);
                }
            }
        });
    }

    pub fn collect_pairs(&self, store: &Store) -> Vec<(Entity, Entity)> {
        let mut pairs = Vec::new();
        for (entity, _) in self.leaves.iter() {
            if !store.has_kind(*entity, ComponentKind::Procedural) {
                continue;
            }
            let aabb = store
                .expect::<WorldAabb>(*entity)
                .0
                .inflated(MANIFOLD_SEPARATION_THRESHOLD);
            self.tree.query(&aabb, |other| {
                if other == *entity {
                    return;
                }
                // Canonical (min, max); duplicates from querying both
                // procedural endpoints collapse below.
                pairs.push((other.min(*entity), other.max(*entity)));
            });
        }
        pairs.sort();
        pairs.dedup();
        pairs
    }

    pub fn set_pending_pairs(&mut self, pairs: Vec<(Entity, Entity)>) {
        self.pending_pairs = pairs;
    }

    pub fn take_pending_pairs(&mut self) -> Vec<(Entity, Entity)> {
        std::mem::take(&mut self.pending_pairs)
    }

    pub fn view(&self) -> TreeView {
        self.tree.view()
    }

    pub fn aabb_of(&self, entity: Entity) -> Option<Aabb> {
        self.leaves.get(&entity).map(|leaf| self.tree.leaf_aabb(*leaf))
    }

    pub fn body_count(&self) -> usize {
        self.leaves.len()
    }
}

impl Default for Broadphase {
    fn default() -> Self {
        Self::new()
    }
}
