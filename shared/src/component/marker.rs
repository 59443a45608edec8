use crate::graph::{EdgeIndex, NodeIndex};
use crate::math::Aabb;

/// Index of a body's node in the interaction graph. Store-local, never
/// shipped in deltas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GraphNode {
    pub node: NodeIndex,
}

/// Index of the graph edge owned by a constraint or manifold entity.
/// Store-local, never shipped in deltas.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GraphEdge {
    pub edge: EdgeIndex,
}

/// Derived world-space bounding box of a body.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorldAabb(pub Aabb);
