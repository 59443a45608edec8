use crate::entity::handle::Entity;
use crate::math::Aabb;

/// Frozen snapshot of a worker's broadphase AABB tree, published on the
/// island entity after every step so the coordinator can run spatial
/// queries without touching the worker's store.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TreeView {
    pub nodes: Vec<TreeViewNode>,
    pub root: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TreeViewNode {
    pub aabb: Aabb,
    /// Body entity for leaves, `None` for internal nodes.
    pub entity: Option<Entity>,
    pub left: Option<u32>,
    pub right: Option<u32>,
}

impl TreeView {
    pub fn root_aabb(&self) -> Option<Aabb> {
        self.root.map(|index| self.nodes[index as usize].aabb)
    }

    /// Visit every leaf whose AABB intersects `aabb`.
    pub fn query(&self, aabb: &Aabb, mut visitor: impl FnMut(Entity, &Aabb)) {
        let Some(root) = self.root else {
            return;
        };
        let mut stack = vec![root];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];
            if !node.aabb.intersects(aabb) {
                continue;
            }
            if let Some(entity) = node.entity {
                visitor(entity, &node.aabb);
            } else {
                if let Some(left) = node.left {
                    stack.push(left);
                }
                if let Some(right) = node.right {
                    stack.push(right);
                }
            }
        }
    }

    /// Visit every leaf pair (one from each view) with intersecting AABBs.
    pub fn query_other(&self, other: &TreeView, mut visitor: impl FnMut(Entity, Entity)) {
        // Tree sizes here are per-island, so leaf-vs-tree is good enough.
        self.for_each_leaf(|entity_a, aabb_a| {
            other.query(aabb_a, |entity_b, _| visitor(entity_a, entity_b));
        });
    }

    pub fn for_each_leaf(&self, mut visitor: impl FnMut(Entity, &Aabb)) {
        for node in &self.nodes {
            if let Some(entity) = node.entity {
                visitor(entity, &node.aabb);
            }
        }
    }
}
