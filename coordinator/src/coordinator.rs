use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, warn};

use atoll_shared::{
    performance_time, ComponentKind, ComponentValue, ContactManifold, DeltaBuilder, Entity,
    EntityGraph, EntityMap, GraphEdge, GraphNode, Island, IslandResident, IslandTimestamp,
    JobDispatcher, MaterialTable, Message, MessageChannel, MultiIslandResident, Settings,
    SleepingTag, Store, StoreEvent,
};
use atoll_worker::{ManifoldMap, WorkerHandle};

use crate::broadphase;

/// One live island from the coordinator's point of view: its worker, the
/// channel to it, the handle bijection and the staged outbound delta.
pub(crate) struct IslandContainer {
    pub worker: Arc<WorkerHandle>,
    pub channel: MessageChannel,
    /// remote = worker-side handles, local = coordinator-side handles.
    pub entity_map: EntityMap,
    pub staged: DeltaBuilder,
}

/// Owns the authoritative side of the simulation: island membership, the
/// global interaction graph, the workers and the delta routing between the
/// caller-provided store and the worker replicas. Attached to the store as
/// its `attachment` and driven by `update`.
pub struct Coordinator {
    pub(crate) settings: Settings,
    pub(crate) material_table: MaterialTable,
    pub(crate) graph: EntityGraph,
    pub(crate) islands: BTreeMap<Entity, IslandContainer>,
    pub(crate) manifold_map: ManifoldMap,
    dispatcher: JobDispatcher,
    pending_splits: Vec<Entity>,
    terminating: Vec<Arc<WorkerHandle>>,
    /// Set to the source island while importing one of its deltas, so
    /// destruction echoes are not staged back to it.
    importing_from: Option<Entity>,
}

impl Coordinator {
    pub fn new(settings: Settings, dispatcher: JobDispatcher) -> Self {
        Self {
            settings,
            material_table: MaterialTable::new(),
            graph: EntityGraph::new(),
            islands: BTreeMap::new(),
            manifold_map: ManifoldMap::new(),
            dispatcher,
            pending_splits: Vec::new(),
            terminating: Vec::new(),
            importing_from: None,
        }
    }

    pub(crate) fn install_watches(store: &mut Store) {
        for kind in [
            ComponentKind::GraphNode,
            ComponentKind::GraphEdge,
            ComponentKind::ContactManifold,
            ComponentKind::IslandResident,
            ComponentKind::MultiIslandResident,
        ] {
            store.watch(kind);
        }
    }

    pub fn island_count(&self) -> usize {
        self.islands.len()
    }

    pub fn island_entities(&self) -> Vec<Entity> {
        self.islands.keys().copied().collect()
    }

    /// The island a procedural entity resides in, if any.
    pub fn island_of(store: &Store, entity: Entity) -> Option<Entity> {
        store.get::<IslandResident>(entity).map(|r| r.island)
    }

    // Update tick ----------------------------------------------------------

    /// Lightweight coordination pass: drains worker inboxes, processes
    /// store events, executes merges and splits, runs the inter-island
    /// broadphase and flushes staged deltas. Physics never runs here.
    pub fn update(&mut self, store: &mut Store) {
        self.process_ingress(store);
        self.drain_store_events(store);
        self.sweep_empty_islands(store);
        self.process_pending_splits(store);
        broadphase::update(self, store);
        self.flush_egress(store);
        self.poll_terminating();
    }

    /// An island dies when its last procedural resident leaves: the worker
    /// is terminated, remaining non-procedural memberships are dropped and
    /// the island entity is destroyed.
    fn sweep_empty_islands(&mut self, store: &mut Store) {
        let empty: Vec<Entity> = self
            .islands
            .keys()
            .copied()
            .filter(|island_entity| {
                let island = store.expect::<Island>(*island_entity);
                !island
                    .nodes
                    .iter()
                    .any(|node| store.has_kind(*node, ComponentKind::Procedural))
            })
            .collect();

        for island_entity in empty {
            let container = self.islands.remove(&island_entity).expect("island exists");
            container.worker.terminate();
            self.terminating.push(container.worker);

            let island = store.expect::<Island>(island_entity).clone();
            for node in island.nodes {
                if let Some(resident) = store.get_mut::<MultiIslandResident>(node) {
                    resident.islands.remove(&island_entity);
                }
            }
            store.destroy(island_entity);
            debug!("Destroyed empty island {:?}", island_entity);
        }
    }

    fn process_ingress(&mut self, store: &mut Store) {
        let island_entities: Vec<Entity> = self.islands.keys().copied().collect();
        for island_entity in island_entities {
            let messages = self.islands[&island_entity].channel.drain();
            for message in messages {
                match message {
                    Message::IslandDelta(delta) => {
                        self.import_worker_delta(store, island_entity, delta)
                    }
                    Message::SplitIsland => {
                        self.pending_splits.push(island_entity);
                    }
                    other => {
                        warn!("Unexpected worker message {:?}; dropped", other);
                    }
                }
            }
        }
    }

    fn import_worker_delta(
        &mut self,
        store: &mut Store,
        island_entity: Entity,
        delta: atoll_shared::IslandDelta,
    ) {
        self.importing_from = Some(island_entity);
        let result = {
            let container = self.islands.get_mut(&island_entity).expect("island exists");
            delta.import(store, &mut container.entity_map)
        };

        for remote in &result.unknown_remotes {
            debug!(
                "Worker delta for island {:?} referenced unknown remote {:?}",
                island_entity, remote
            );
        }

        // Reply with the coordinator handles of worker-created entities and
        // wire them into the authoritative structures.
        for (remote, local) in &result.created {
            {
                let container = self.islands.get_mut(&island_entity).expect("island exists");
                container.staged.insert_entity_mapping(*local, *remote);
            }
            if store.is_alive(*local) {
                self.wire_worker_created_entity(store, island_entity, *local);
            }
        }

        self.drain_store_events(store);
        self.importing_from = None;
    }

    /// Worker-created entities are contact manifolds and contact points.
    /// Both become residents of the worker's island; manifolds also own a
    /// graph edge and an entry in the manifold map.
    fn wire_worker_created_entity(
        &mut self,
        store: &mut Store,
        island_entity: Entity,
        local: Entity,
    ) {
        if !store.has::<IslandResident>(local) {
            store.emplace(
                local,
                IslandResident {
                    island: island_entity,
                },
            );
        }

        if let Some(manifold) = store.get::<ContactManifold>(local).cloned() {
            let [a, b] = manifold.body;
            if !self.manifold_map.contains(a, b) {
                self.manifold_map.insert(a, b, local);
            }
            if !store.has::<GraphEdge>(local) {
                let (Some(node_a), Some(node_b)) = (
                    store.get::<GraphNode>(a).map(|n| n.node),
                    store.get::<GraphNode>(b).map(|n| n.node),
                ) else {
                    panic!(
                        "Worker manifold {:?} references bodies without graph nodes",
                        local
                    );
                };
                let edge = self.graph.insert_edge(local, node_a, node_b);
                store.emplace(local, GraphEdge { edge });
            }
            let island = store.get_mut::<Island>(island_entity).expect("island data");
            island.edges.insert(local);
        }
    }

    // Store events ---------------------------------------------------------

    /// Handles deferred construct/destroy notifications from the
    /// authoritative store: graph upkeep, cascaded constraint destruction
    /// and membership bookkeeping, staging destroy deltas for the affected
    /// islands.
    pub(crate) fn drain_store_events(&mut self, store: &mut Store) {
        while let Some(event) = store.next_event() {
            match event {
                StoreEvent::Destroyed(_, ComponentValue::GraphNode(node)) => {
                    let node = node.node;
                    if self.graph.contains_node(node) {
                        let mut edge_entities = Vec::new();
                        self.graph.visit_edges(node, |edge_entity| {
                            edge_entities.push(edge_entity);
                        });
                        self.graph.remove_all_edges(node, |_| {});
                        for edge_entity in edge_entities {
                            if store.is_alive(edge_entity) {
                                store.destroy(edge_entity);
                            }
                        }
                        self.graph.remove_node(node);
                    }
                }
                StoreEvent::Destroyed(_, ComponentValue::GraphEdge(edge)) => {
                    let edge = edge.edge;
                    if self.graph.contains_edge(edge) {
                        self.graph.remove_edge(edge);
                    }
                }
                StoreEvent::Destroyed(_, ComponentValue::ContactManifold(manifold)) => {
                    let [a, b] = manifold.body;
                    self.manifold_map.remove(a, b);
                    for point in &manifold.points {
                        if store.is_alive(*point) {
                            store.destroy(*point);
                        }
                    }
                }
                StoreEvent::Destroyed(entity, ComponentValue::IslandResident(resident)) => {
                    self.on_resident_destroyed(store, entity, resident.island);
                }
                StoreEvent::Destroyed(entity, ComponentValue::MultiIslandResident(resident)) => {
                    for island_entity in resident.islands.iter() {
                        self.on_resident_destroyed(store, entity, *island_entity);
                    }
                }
                _ => {}
            }
        }
    }

    fn on_resident_destroyed(&mut self, store: &mut Store, entity: Entity, island_entity: Entity) {
        if let Some(island) = store.get_mut::<Island>(island_entity) {
            island.nodes.remove(&entity);
            island.edges.remove(&entity);
        }
        if self.importing_from == Some(island_entity) {
            // The worker destroyed it; no echo.
            return;
        }
        if let Some(container) = self.islands.get_mut(&island_entity) {
            container.staged.destroyed(entity);
        }
    }

    // Placement ------------------------------------------------------------

    /// Placement on create: a fresh procedural body either joins the island
    /// of an adjacent procedural body (merging if there are several) or
    /// founds a new island. Non-procedural bodies wait for edges.
    pub(crate) fn on_body_created(&mut self, store: &mut Store, entity: Entity) {
        let procedural = store.has_kind(entity, ComponentKind::Procedural);
        let node = self.graph.insert_node(entity, procedural);
        store.emplace(entity, GraphNode { node });

        if !procedural {
            store.emplace(entity, MultiIslandResident::default());
            return;
        }

        let mut adjacent_islands = Vec::new();
        self.graph.visit_neighbours(node, |neighbour| {
            if let Some(island) = Self::island_of(store, neighbour) {
                if !adjacent_islands.contains(&island) {
                    adjacent_islands.push(island);
                }
            }
        });

        let island_entity = match adjacent_islands.len() {
            0 => self.new_island(store),
            _ => {
                let mut survivor = adjacent_islands[0];
                for other in adjacent_islands.into_iter().skip(1) {
                    survivor = self.merge_islands(store, survivor, other);
                }
                survivor
            }
        };
        self.add_node_to_island(store, island_entity, entity);
    }

    /// Placement on edge creation: wires the graph edge and routes the edge
    /// entity into the island of its endpoints, merging islands when the
    /// edge bridges two.
    pub(crate) fn on_edge_created(&mut self, store: &mut Store, entity: Entity) {
        let value = atoll_shared::EDGE_OWNER_KINDS
            .iter()
            .find_map(|kind| store.read_value(entity, *kind))
            .unwrap_or_else(|| panic!("Entity {:?} owns no edge component", entity));
        let bodies =
            atoll_shared::constraint_bodies(&value).expect("edge component names two bodies");
        let [a, b] = bodies;

        let (Some(node_a), Some(node_b)) = (
            store.get::<GraphNode>(a).map(|n| n.node),
            store.get::<GraphNode>(b).map(|n| n.node),
        ) else {
            panic!("Edge entity {:?} references bodies without graph nodes", entity);
        };
        let edge = self.graph.insert_edge(entity, node_a, node_b);
        store.emplace(entity, GraphEdge { edge });

        if store.has::<ContactManifold>(entity) && !self.manifold_map.contains(a, b) {
            self.manifold_map.insert(a, b, entity);
        }

        let island_a = Self::island_of(store, a);
        let island_b = Self::island_of(store, b);
        let island_entity = match (island_a, island_b) {
            (Some(i), Some(j)) if i != j => self.merge_islands(store, i, j),
            (Some(i), _) => i,
            (_, Some(j)) => j,
            (None, None) => {
                warn!(
                    "Edge {:?} connects two non-procedural bodies; not simulated",
                    entity
                );
                return;
            }
        };

        // Non-procedural endpoints get replicated into the island.
        for body in [a, b] {
            if Self::island_of(store, body).is_none() {
                self.add_node_to_island(store, island_entity, body);
            }
        }

        store.emplace(
            entity,
            IslandResident {
                island: island_entity,
            },
        );
        let island = store.get_mut::<Island>(island_entity).expect("island data");
        island.edges.insert(entity);
        let container = self.islands.get_mut(&island_entity).expect("container");
        container.staged.created_all_from(store, entity);
    }

    fn add_node_to_island(&mut self, store: &mut Store, island_entity: Entity, entity: Entity) {
        let procedural = store.has_kind(entity, ComponentKind::Procedural);
        if procedural {
            store.emplace_or_replace(
                entity,
                IslandResident {
                    island: island_entity,
                },
            );
        } else {
            let resident = store
                .get_mut::<MultiIslandResident>(entity)
                .expect("non-procedural bodies carry MultiIslandResident");
            if !resident.islands.insert(island_entity) {
                return;
            }
        }
        let island = store.get_mut::<Island>(island_entity).expect("island data");
        island.nodes.insert(entity);
        let container = self.islands.get_mut(&island_entity).expect("container");
        container.staged.created_all_from(store, entity);
    }

    pub(crate) fn new_island(&mut self, store: &mut Store) -> Entity {
        let island_entity = store.create();
        store.emplace(island_entity, IslandTimestamp(performance_time()));
        store.emplace(island_entity, Island::default());
        self.spawn_worker(store, island_entity);
        island_entity
    }

    fn spawn_worker(&mut self, store: &Store, island_entity: Entity) {
        let (coordinator_end, worker_end) = MessageChannel::pair();
        let worker = WorkerHandle::new(
            island_entity,
            self.settings,
            self.material_table.clone(),
            worker_end,
            self.dispatcher.clone(),
        );
        let mut container = IslandContainer {
            worker,
            channel: coordinator_end,
            entity_map: EntityMap::new(),
            staged: DeltaBuilder::new(),
        };
        container.staged.created_all_from(store, island_entity);
        self.islands.insert(island_entity, container);
    }

    // Merge ----------------------------------------------------------------

    /// Merges two islands into the larger one. The smaller worker is
    /// terminated and joined first so its final state is drained before the
    /// authoritative membership moves; merges are serialized on the
    /// coordinator, a worker never observes a partial merge.
    pub(crate) fn merge_islands(
        &mut self,
        store: &mut Store,
        island_a: Entity,
        island_b: Entity,
    ) -> Entity {
        if island_a == island_b {
            return island_a;
        }

        let size = |store: &Store, island_entity: Entity| {
            let island = store.expect::<Island>(island_entity);
            island.nodes.len() + island.edges.len()
        };
        let (keep, gone) = if size(store, island_a) >= size(store, island_b) {
            (island_a, island_b)
        } else {
            (island_b, island_a)
        };

        // Stop the losing worker and import everything it still had queued.
        let gone_container = self.islands.remove(&gone).expect("island exists");
        gone_container.worker.terminate();
        gone_container.worker.join();
        let mut gone_map = gone_container.entity_map;
        self.importing_from = Some(gone);
        for message in gone_container.channel.drain() {
            if let Message::IslandDelta(delta) = message {
                delta.import(store, &mut gone_map);
            }
        }
        self.drain_store_events(store);
        self.importing_from = None;

        // Move membership and replicate everything into the surviving
        // worker from the authoritative store.
        let gone_island = store.expect::<Island>(gone).clone();
        for entity in gone_island.nodes.iter().chain(gone_island.edges.iter()) {
            if !store.is_alive(*entity) {
                continue;
            }
            if let Some(resident) = store.get_mut::<MultiIslandResident>(*entity) {
                resident.islands.remove(&gone);
                resident.islands.insert(keep);
            } else {
                store.emplace_or_replace(*entity, IslandResident { island: keep });
            }
            // Members of a sleeping island wake as part of the merge; the
            // surviving worker receives them as awake bodies and the
            // wake-up message below covers its own sleeping state.
            store.try_remove::<SleepingTag>(*entity);
            self.transfer_into_island(store, keep, *entity);
        }

        // Waking the survivor is the worker's business when the delta
        // arrives; authoritative sleep state follows.
        store.try_remove::<SleepingTag>(gone);
        store.destroy(gone);
        self.drain_store_events(store);
        debug!("Merged island {:?} into {:?}", gone, keep);
        keep
    }

    /// Adds one entity (and, for manifolds, its contact points) to an
    /// island's membership and stages its replication.
    fn transfer_into_island(&mut self, store: &mut Store, island_entity: Entity, entity: Entity) {
        {
            let is_edge = store.has_kind(entity, ComponentKind::GraphEdge);
            let island = store.get_mut::<Island>(island_entity).expect("island data");
            if is_edge {
                island.edges.insert(entity);
            } else {
                island.nodes.insert(entity);
            }
        }
        let container = self.islands.get_mut(&island_entity).expect("container");
        container.staged.created_all_from(store, entity);

        if let Some(manifold) = store.get::<ContactManifold>(entity).cloned() {
            for point in manifold.points {
                if store.is_alive(point) {
                    store.emplace_or_replace(
                        point,
                        IslandResident {
                            island: island_entity,
                        },
                    );
                    let container = self.islands.get_mut(&island_entity).expect("container");
                    container.staged.created_all_from(store, point);
                }
            }
        }
    }

    // Split ----------------------------------------------------------------

    fn process_pending_splits(&mut self, store: &mut Store) {
        let pending = std::mem::take(&mut self.pending_splits);
        for island_entity in pending {
            self.execute_split(store, island_entity);
        }
    }

    /// Executes a split requested by a worker: the largest connected
    /// component stays; every other component moves to a fresh island and
    /// worker. The old worker receives the destroy delta before it is
    /// resumed, so it never simulates the departed entities again.
    fn execute_split(&mut self, store: &mut Store, island_entity: Entity) {
        let Some(container) = self.islands.get(&island_entity) else {
            // The island was merged away while the request was in flight.
            return;
        };
        if !container.worker.is_splitting() {
            return;
        }

        let worker = container.worker.clone();
        let components = worker.split();
        if components.is_empty() {
            return;
        }

        // The worker flushed its pending delta (entity mappings included)
        // during `split`; apply it before resolving component handles.
        let messages = self.islands[&island_entity].channel.drain();
        for message in messages {
            if let Message::IslandDelta(delta) = message {
                self.import_worker_delta(store, island_entity, delta);
            }
        }

        // Map worker-local handles back to coordinator handles. A handle
        // the coordinator cannot resolve here means the bookkeeping between
        // the two stores diverged, which is unrecoverable.
        let map_entities = |map: &EntityMap, entities: &[Entity]| -> Vec<Entity> {
            entities
                .iter()
                .map(|worker_entity| {
                    map.local(*worker_entity).unwrap_or_else(|_| {
                        panic!(
                            "Split component references worker entity {:?} unknown to the coordinator",
                            worker_entity
                        )
                    })
                })
                .collect()
        };

        let container = self.islands.get(&island_entity).expect("island exists");
        let resident_nodes: Vec<Entity> =
            map_entities(&container.entity_map, &components[0].nodes);

        let timestamp = store.expect::<IslandTimestamp>(island_entity).0;

        for component in &components[1..] {
            let nodes = {
                let container = self.islands.get(&island_entity).expect("island exists");
                map_entities(&container.entity_map, &component.nodes)
            };
            let edges = {
                let container = self.islands.get(&island_entity).expect("island exists");
                map_entities(&container.entity_map, &component.edges)
            };

            let new_island = store.create();
            store.emplace(new_island, IslandTimestamp(timestamp));
            store.emplace(new_island, Island::default());
            self.spawn_worker(store, new_island);

            for entity in nodes.iter().chain(edges.iter()) {
                if !store.is_alive(*entity) {
                    continue;
                }
                let procedural = store.has_kind(*entity, ComponentKind::Procedural);
                let non_procedural_shared =
                    !procedural && resident_nodes.contains(entity);

                // Update membership.
                if let Some(resident) = store.get_mut::<MultiIslandResident>(*entity) {
                    if !non_procedural_shared {
                        resident.islands.remove(&island_entity);
                    }
                    resident.islands.insert(new_island);
                } else {
                    store.emplace_or_replace(*entity, IslandResident { island: new_island });
                }

                {
                    let old_island = store.get_mut::<Island>(island_entity).expect("island");
                    if !non_procedural_shared {
                        old_island.nodes.remove(entity);
                        old_island.edges.remove(entity);
                    }
                }
                self.transfer_into_island(store, new_island, *entity);

                // Stage the destroy for the old worker. Cascades take care
                // of the edges when their nodes go.
                if !non_procedural_shared {
                    let container =
                        self.islands.get_mut(&island_entity).expect("island exists");
                    container.staged.destroyed(*entity);
                    container.entity_map.erase_local(*entity);
                }
            }
            debug!(
                "Split island {:?}: moved {} nodes to {:?}",
                island_entity,
                component.nodes.len(),
                new_island
            );
        }

        // Ship the destroy delta before resuming the worker; its next run
        // imports it before stepping.
        let container = self.islands.get_mut(&island_entity).expect("island exists");
        if !container.staged.is_empty() {
            let delta = container.staged.finish();
            container.channel.send(Message::IslandDelta(delta));
        }
        worker.finish_split();
    }

    // Egress ---------------------------------------------------------------

    /// Stage an update of `kind` on `entity` for every island it resides
    /// in, waking sleeping islands.
    pub(crate) fn stage_update(&mut self, store: &mut Store, entity: Entity, kind: ComponentKind) {
        let Some(value) = store.read_value(entity, kind) else {
            return;
        };
        for island_entity in resident_islands(store, entity) {
            if let Some(container) = self.islands.get_mut(&island_entity) {
                container.staged.updated(entity, value.clone());
            }
        }
    }

    fn flush_egress(&mut self, store: &mut Store) {
        for (island_entity, container) in self.islands.iter_mut() {
            if container.staged.is_empty() {
                continue;
            }
            if store.has::<SleepingTag>(*island_entity) {
                container.channel.send(Message::WakeUpIsland);
            }
            let delta = container.staged.finish();
            container.channel.send(Message::IslandDelta(delta));
            container.worker.reschedule();
        }
    }

    /// Broadcast a control message to every worker and wake them.
    pub(crate) fn broadcast(&mut self, make_message: impl Fn() -> Message) {
        for container in self.islands.values() {
            container.channel.send(make_message());
            container.worker.reschedule();
        }
    }

    fn poll_terminating(&mut self) {
        self.terminating.retain(|worker| !worker.is_terminated());
    }

    /// Cooperatively shuts down every worker. Called by detach.
    pub(crate) fn terminate_all(&mut self) {
        for (_, container) in std::mem::take(&mut self.islands) {
            container.worker.terminate();
            container.worker.join();
        }
        for worker in self.terminating.drain(..) {
            worker.join();
        }
    }
}

/// Islands an entity currently resides in (one for procedural bodies, any
/// number for non-procedural ones).
pub(crate) fn resident_islands(store: &Store, entity: Entity) -> Vec<Entity> {
    if let Some(resident) = store.get::<IslandResident>(entity) {
        return vec![resident.island];
    }
    if let Some(resident) = store.get::<MultiIslandResident>(entity) {
        return resident.islands.iter().copied().collect();
    }
    Vec::new()
}
