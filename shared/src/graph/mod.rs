use std::collections::VecDeque;
use std::fmt;

use crate::entity::handle::Entity;

/// Generational index into the graph's node table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex {
    index: u32,
    generation: u32,
}

impl fmt::Debug for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "NodeIndex({}v{})", self.index, self.generation)
    }
}

/// Generational index into the graph's edge table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeIndex {
    index: u32,
    generation: u32,
}

impl fmt::Debug for EdgeIndex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "EdgeIndex({}v{})", self.index, self.generation)
    }
}

struct NodeSlot {
    generation: u32,
    node: Option<Node>,
}

struct Node {
    entity: Entity,
    connecting: bool,
    // Incident edge indices, in insertion order.
    edges: Vec<EdgeIndex>,
}

struct EdgeSlot {
    generation: u32,
    edge: Option<Edge>,
}

struct Edge {
    entity: Entity,
    nodes: [NodeIndex; 2],
}

/// One maximal group of interacting bodies. `nodes` contains every
/// connecting node of the group plus the non-connecting nodes adjacent to
/// them; `edges` contains every edge incident to a connecting node of the
/// group.
#[derive(Clone, Debug, Default)]
pub struct ConnectedComponent {
    pub nodes: Vec<Entity>,
    pub edges: Vec<Entity>,
}

impl ConnectedComponent {
    pub fn size(&self) -> usize {
        self.nodes.len() + self.edges.len()
    }
}

/// Undirected multigraph of bodies (nodes) and constraints/manifolds
/// (edges). Nodes are `connecting` (procedural bodies) or `non-connecting`
/// (static/kinematic bodies); connectivity is defined over connecting nodes
/// only, but adjacency through non-connecting nodes is still traversable.
pub struct EntityGraph {
    nodes: Vec<NodeSlot>,
    node_free: Vec<u32>,
    edges: Vec<EdgeSlot>,
    edge_free: Vec<u32>,
    node_count: usize,
    edge_count: usize,
}

impl EntityGraph {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            node_free: Vec::new(),
            edges: Vec::new(),
            edge_free: Vec::new(),
            node_count: 0,
            edge_count: 0,
        }
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn insert_node(&mut self, entity: Entity, connecting: bool) -> NodeIndex {
        let node = Node {
            entity,
            connecting,
            edges: Vec::new(),
        };
        self.node_count += 1;

        if let Some(index) = self.node_free.pop() {
            let slot = &mut self.nodes[index as usize];
            slot.node = Some(node);
            NodeIndex {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.nodes.len() as u32;
            self.nodes.push(NodeSlot {
                generation: 0,
                node: Some(node),
            });
            NodeIndex {
                index,
                generation: 0,
            }
        }
    }

    /// Removes a node along with any incident edges still in the graph.
    /// Owners that need the destroyed edge entities call
    /// `remove_all_edges` first, making the implicit removal here a no-op.
    pub fn remove_node(&mut self, index: NodeIndex) {
        self.node(index);
        self.remove_all_edges(index, |_| {});
        let slot = &mut self.nodes[index.index as usize];
        slot.node = None;
        slot.generation += 1;
        self.node_free.push(index.index);
        self.node_count -= 1;
    }

    /// Removes every edge incident to `index`, invoking `on_remove` with
    /// the owning entity of each removed edge.
    pub fn remove_all_edges(&mut self, index: NodeIndex, mut on_remove: impl FnMut(Entity)) {
        let incident = self.node(index).edges.clone();
        for edge_index in incident {
            // Edges between the node and itself appear once in the list per
            // insertion, and may already be gone if `on_remove` cascaded.
            if self.edge_at(edge_index).is_some() {
                let entity = self.edge_entity(edge_index);
                self.remove_edge(edge_index);
                on_remove(entity);
            }
        }
    }

    pub fn insert_edge(&mut self, entity: Entity, n0: NodeIndex, n1: NodeIndex) -> EdgeIndex {
        // Validate both endpoints up front.
        self.node(n0);
        self.node(n1);

        let edge = Edge {
            entity,
            nodes: [n0, n1],
        };
        self.edge_count += 1;

        let edge_index = if let Some(index) = self.edge_free.pop() {
            let slot = &mut self.edges[index as usize];
            slot.edge = Some(edge);
            EdgeIndex {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.edges.len() as u32;
            self.edges.push(EdgeSlot {
                generation: 0,
                edge: Some(edge),
            });
            EdgeIndex {
                index,
                generation: 0,
            }
        };

        self.node_mut(n0).edges.push(edge_index);
        if n0 != n1 {
            self.node_mut(n1).edges.push(edge_index);
        }
        edge_index
    }

    pub fn remove_edge(&mut self, index: EdgeIndex) {
        let nodes = self.edge(index).nodes;
        for node_index in [nodes[0], nodes[1]] {
            if let Some(node) = self.node_at_mut(node_index) {
                node.edges.retain(|e| *e != index);
            }
        }
        let slot = &mut self.edges[index.index as usize];
        slot.edge = None;
        slot.generation += 1;
        self.edge_free.push(index.index);
        self.edge_count -= 1;
    }

    /// Whether the index refers to a live node (stale generations are not
    /// live).
    pub fn contains_node(&self, index: NodeIndex) -> bool {
        self.node_at(index).is_some()
    }

    pub fn contains_edge(&self, index: EdgeIndex) -> bool {
        self.edge_at(index).is_some()
    }

    pub fn node_entity(&self, index: NodeIndex) -> Entity {
        self.node(index).entity
    }

    pub fn is_connecting(&self, index: NodeIndex) -> bool {
        self.node(index).connecting
    }

    pub fn edge_entity(&self, index: EdgeIndex) -> Entity {
        self.edge(index).entity
    }

    pub fn edge_node_entities(&self, index: EdgeIndex) -> (Entity, Entity) {
        let nodes = self.edge(index).nodes;
        (self.node_entity(nodes[0]), self.node_entity(nodes[1]))
    }

    pub fn edge_nodes(&self, index: EdgeIndex) -> (NodeIndex, NodeIndex) {
        let nodes = self.edge(index).nodes;
        (nodes[0], nodes[1])
    }

    /// Visit the owning entity of every edge incident to `index`.
    pub fn visit_edges(&self, index: NodeIndex, mut visitor: impl FnMut(Entity)) {
        for edge_index in &self.node(index).edges {
            visitor(self.edge_entity(*edge_index));
        }
    }

    /// Visit the entity of every node adjacent to `index`. A neighbour
    /// connected through multiple edges is visited once per edge.
    pub fn visit_neighbours(&self, index: NodeIndex, mut visitor: impl FnMut(Entity)) {
        for edge_index in &self.node(index).edges {
            let nodes = self.edge(*edge_index).nodes;
            let other = if nodes[0] == index { nodes[1] } else { nodes[0] };
            if other != index {
                visitor(self.node_entity(other));
            }
        }
    }

    pub fn has_adjacency(&self, n0: NodeIndex, n1: NodeIndex) -> bool {
        self.node(n0).edges.iter().any(|edge_index| {
            let nodes = self.edge(*edge_index).nodes;
            nodes[0] == n1 || nodes[1] == n1
        })
    }

    /// Partition of the connecting node set. Components are grown by BFS
    /// through connecting nodes only; a non-connecting node is added to
    /// every component that touches it.
    pub fn connected_components(&self) -> Vec<ConnectedComponent> {
        let mut components = Vec::new();
        let mut visited = vec![false; self.nodes.len()];
        let mut edge_visited = vec![false; self.edges.len()];

        for start in self.live_node_indices() {
            if visited[start.index as usize] || !self.is_connecting(start) {
                continue;
            }

            let mut component = ConnectedComponent::default();
            let mut non_connecting = Vec::new();
            let mut queue = VecDeque::new();
            visited[start.index as usize] = true;
            queue.push_back(start);

            while let Some(node_index) = queue.pop_front() {
                component.nodes.push(self.node_entity(node_index));

                for edge_index in &self.node(node_index).edges {
                    if !edge_visited[edge_index.index as usize] {
                        edge_visited[edge_index.index as usize] = true;
                        component.edges.push(self.edge_entity(*edge_index));
                    }

                    let nodes = self.edge(*edge_index).nodes;
                    let other = if nodes[0] == node_index {
                        nodes[1]
                    } else {
                        nodes[0]
                    };
                    if other == node_index {
                        continue;
                    }
                    if self.is_connecting(other) {
                        if !visited[other.index as usize] {
                            visited[other.index as usize] = true;
                            queue.push_back(other);
                        }
                    } else if !non_connecting.contains(&other) {
                        non_connecting.push(other);
                    }
                }
            }

            for node_index in non_connecting {
                component.nodes.push(self.node_entity(node_index));
            }
            components.push(component);
        }

        components
    }

    /// Fast-path connectivity test: true when every connecting node is
    /// reachable from the first one. Bails out as soon as the reachable
    /// count matches the connecting node count.
    pub fn is_single_connected_component(&self) -> bool {
        let mut connecting_total = 0;
        let mut start = None;
        for node_index in self.live_node_indices() {
            if self.is_connecting(node_index) {
                connecting_total += 1;
                if start.is_none() {
                    start = Some(node_index);
                }
            }
        }
        let Some(start) = start else {
            return true;
        };

        let mut visited = vec![false; self.nodes.len()];
        let mut reached = 1;
        let mut queue = VecDeque::new();
        visited[start.index as usize] = true;
        queue.push_back(start);

        while let Some(node_index) = queue.pop_front() {
            if reached == connecting_total {
                return true;
            }
            for edge_index in &self.node(node_index).edges {
                let nodes = self.edge(*edge_index).nodes;
                let other = if nodes[0] == node_index {
                    nodes[1]
                } else {
                    nodes[0]
                };
                if other == node_index
                    || visited[other.index as usize]
                    || !self.is_connecting(other)
                {
                    continue;
                }
                visited[other.index as usize] = true;
                reached += 1;
                queue.push_back(other);
            }
        }

        reached == connecting_total
    }

    fn live_node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.nodes.iter().enumerate().filter_map(|(i, slot)| {
            slot.node.as_ref().map(|_| NodeIndex {
                index: i as u32,
                generation: slot.generation,
            })
        })
    }

    fn node(&self, index: NodeIndex) -> &Node {
        self.node_at(index)
            .unwrap_or_else(|| panic!("Stale or invalid node index: {:?}", index))
    }

    fn node_mut(&mut self, index: NodeIndex) -> &mut Node {
        self.node_at_mut(index)
            .unwrap_or_else(|| panic!("Stale or invalid node index: {:?}", index))
    }

    fn node_at(&self, index: NodeIndex) -> Option<&Node> {
        let slot = self.nodes.get(index.index as usize)?;
        if slot.generation != index.generation {
            return None;
        }
        slot.node.as_ref()
    }

    fn node_at_mut(&mut self, index: NodeIndex) -> Option<&mut Node> {
        let slot = self.nodes.get_mut(index.index as usize)?;
        if slot.generation != index.generation {
            return None;
        }
        slot.node.as_mut()
    }

    fn edge(&self, index: EdgeIndex) -> &Edge {
        self.edge_at(index)
            .unwrap_or_else(|| panic!("Stale or invalid edge index: {:?}", index))
    }

    fn edge_at(&self, index: EdgeIndex) -> Option<&Edge> {
        let slot = self.edges.get(index.index as usize)?;
        if slot.generation != index.generation {
            return None;
        }
        slot.edge.as_ref()
    }
}

impl Default for EntityGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(index: u32) -> Entity {
        Entity::new(index, 0)
    }

    #[test]
    fn components_partition_connecting_nodes() {
        let mut graph = EntityGraph::new();
        let a = graph.insert_node(entity(0), true);
        let b = graph.insert_node(entity(1), true);
        let c = graph.insert_node(entity(2), true);
        let d = graph.insert_node(entity(3), true);
        graph.insert_edge(entity(10), a, b);
        graph.insert_edge(entity(11), c, d);

        let components = graph.connected_components();
        assert_eq!(components.len(), 2);
        let mut all_nodes: Vec<Entity> = components
            .iter()
            .flat_map(|component| component.nodes.iter().copied())
            .collect();
        all_nodes.sort();
        assert_eq!(all_nodes, vec![entity(0), entity(1), entity(2), entity(3)]);
        assert!(!graph.is_single_connected_component());
    }

    #[test]
    fn non_connecting_node_joins_every_touching_component() {
        let mut graph = EntityGraph::new();
        let a = graph.insert_node(entity(0), true);
        let b = graph.insert_node(entity(1), true);
        let floor = graph.insert_node(entity(2), false);
        graph.insert_edge(entity(10), a, floor);
        graph.insert_edge(entity(11), b, floor);

        // The floor does not connect a and b.
        let components = graph.connected_components();
        assert_eq!(components.len(), 2);
        for component in &components {
            assert!(component.nodes.contains(&entity(2)));
            assert_eq!(component.edges.len(), 1);
        }
        assert!(!graph.is_single_connected_component());
    }

    #[test]
    fn bridging_edge_merges_components() {
        let mut graph = EntityGraph::new();
        let a = graph.insert_node(entity(0), true);
        let b = graph.insert_node(entity(1), true);
        let c = graph.insert_node(entity(2), true);
        let d = graph.insert_node(entity(3), true);
        graph.insert_edge(entity(10), a, b);
        graph.insert_edge(entity(11), c, d);
        let bridge = graph.insert_edge(entity(12), b, c);

        assert!(graph.is_single_connected_component());
        assert_eq!(graph.connected_components().len(), 1);

        graph.remove_edge(bridge);
        assert!(!graph.is_single_connected_component());
        assert_eq!(graph.connected_components().len(), 2);
    }

    #[test]
    fn multigraph_edges_are_permitted() {
        let mut graph = EntityGraph::new();
        let a = graph.insert_node(entity(0), true);
        let b = graph.insert_node(entity(1), true);
        let e0 = graph.insert_edge(entity(10), a, b);
        let e1 = graph.insert_edge(entity(11), a, b);
        assert!(graph.has_adjacency(a, b));

        graph.remove_edge(e0);
        assert!(graph.has_adjacency(a, b), "parallel edge keeps adjacency");
        graph.remove_edge(e1);
        assert!(!graph.has_adjacency(a, b));
    }

    #[test]
    fn stale_indices_are_rejected() {
        let mut graph = EntityGraph::new();
        let a = graph.insert_node(entity(0), true);
        graph.remove_node(a);
        let b = graph.insert_node(entity(1), true);
        assert_eq!(graph.node_entity(b), entity(1));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            graph.node_entity(a);
        }));
        assert!(result.is_err(), "stale node index must panic");
    }

    #[test]
    fn removing_node_removes_incident_edges() {
        let mut graph = EntityGraph::new();
        let a = graph.insert_node(entity(0), true);
        let b = graph.insert_node(entity(1), true);
        graph.insert_edge(entity(10), a, b);

        graph.remove_node(a);
        assert_eq!(graph.edge_count(), 0);
        let mut remaining = 0;
        graph.visit_edges(b, |_| remaining += 1);
        assert_eq!(remaining, 0);
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn remove_all_edges_reports_owners() {
        let mut graph = EntityGraph::new();
        let a = graph.insert_node(entity(0), true);
        let b = graph.insert_node(entity(1), true);
        let c = graph.insert_node(entity(2), true);
        graph.insert_edge(entity(10), a, b);
        graph.insert_edge(entity(11), a, c);

        let mut removed = Vec::new();
        graph.remove_all_edges(a, |e| removed.push(e));
        removed.sort();
        assert_eq!(removed, vec![entity(10), entity(11)]);
        assert_eq!(graph.edge_count(), 0);
        graph.remove_node(a);
    }
}
