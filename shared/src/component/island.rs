use std::collections::BTreeSet;

use crate::entity::handle::Entity;

/// Wall-clock instant (on the `performance_time` clock) of the last step an
/// island simulated. Lives on the island entity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IslandTimestamp(pub f64);

/// Authoritative membership of an island: its node entities and edge
/// entities. Maintained by the coordinator only.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Island {
    pub nodes: BTreeSet<Entity>,
    pub edges: BTreeSet<Entity>,
}

/// The single island a procedural body belongs to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IslandResident {
    pub island: Entity,
}

/// The islands a non-procedural body currently appears in. Static and
/// kinematic bodies are replicated into the worker of every island that
/// has a procedural neighbour of theirs.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MultiIslandResident {
    pub islands: BTreeSet<Entity>,
}
