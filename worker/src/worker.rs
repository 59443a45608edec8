use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, Weak};

use log::{debug, warn};

use atoll_shared::{
    constraint_bodies, performance_time, AngVel, ComponentKind, ComponentValue,
    ConnectedComponent, ContactManifold, Continuous, DeltaBuilder, Dirty, Entity, EntityGraph,
    EntityMap, GraphEdge, GraphNode, Inertial, IslandDelta, IslandTimestamp, Job, JobData,
    JobDispatcher, LinVel, MaterialTable, Message, MessageChannel, Origin, Settings, Shape,
    SleepingTag, Store, StoreEvent, TreeView, WorldAabb, MANIFOLD_SEPARATION_THRESHOLD,
};
use glam::Vec3;

use crate::broadphase::Broadphase;
use crate::narrowphase::{ManifoldMap, Narrowphase, PointChanges};
use crate::solver::{refresh_derived, Solver};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Init,
    Step,
    BeginStep,
    Broadphase,
    BroadphaseAsync,
    Narrowphase,
    NarrowphaseAsync,
    Solve,
    FinishStep,
}

/// Entry point of every worker job. The payload is the worker's handle; a
/// terminating worker signals completion instead of updating, after which
/// the coordinator drops the last strong reference.
pub fn island_worker_job(data: JobData) {
    let handle = data
        .downcast::<WorkerHandle>()
        .expect("island worker job payload must be a WorkerHandle");
    if handle.is_terminating() {
        handle.do_terminate();
    } else {
        handle.update();
    }
}

fn broadphase_async_job(data: JobData) {
    let handle = data
        .downcast::<WorkerHandle>()
        .expect("broadphase job payload must be a WorkerHandle");
    {
        let mut worker = handle.lock_worker();
        worker.broadphase_async_work(&handle);
    }
    handle.reschedule_now();
}

fn narrowphase_async_job(data: JobData) {
    let handle = data
        .downcast::<WorkerHandle>()
        .expect("narrowphase job payload must be a WorkerHandle");
    {
        let mut worker = handle.lock_worker();
        worker.narrowphase_async_work(&handle);
    }
    handle.reschedule_now();
}

/// Shared handle to one island worker. The coordinator owns the `Arc` until
/// termination completes; the dispatcher queue holds transient clones while
/// jobs are in flight. All cross-thread state lives here as atomics, the
/// single-threaded simulation state behind the mutex.
pub struct WorkerHandle {
    inner: Mutex<IslandWorker>,
    splitting: AtomicBool,
    terminating: AtomicBool,
    terminated: Mutex<bool>,
    terminate_cv: Condvar,
    /// Coalesces redundant reschedule requests: multiple external wake-ups
    /// collapse into one extra run.
    reschedule_counter: AtomicUsize,
    dispatcher: JobDispatcher,
    self_ref: OnceLock<Weak<WorkerHandle>>,
}

impl WorkerHandle {
    pub fn new(
        island_entity: Entity,
        settings: Settings,
        material_table: MaterialTable,
        channel: MessageChannel,
        dispatcher: JobDispatcher,
    ) -> Arc<WorkerHandle> {
        let handle = Arc::new(WorkerHandle {
            inner: Mutex::new(IslandWorker::new(
                island_entity,
                settings,
                material_table,
                channel,
            )),
            splitting: AtomicBool::new(false),
            terminating: AtomicBool::new(false),
            terminated: Mutex::new(false),
            terminate_cv: Condvar::new(),
            reschedule_counter: AtomicUsize::new(0),
            dispatcher,
            self_ref: OnceLock::new(),
        });
        handle
            .self_ref
            .set(Arc::downgrade(&handle))
            .expect("self_ref set once");
        handle
    }

    fn this_job(&self) -> Job {
        let strong = self
            .self_ref
            .get()
            .expect("self_ref installed at construction")
            .upgrade()
            .expect("worker alive while scheduling");
        Job::new(island_worker_job, strong)
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, IslandWorker> {
        self.inner.lock().expect("island worker mutex poisoned")
    }

    /// Runs one cooperative slice of the worker's state machine. Called by
    /// the dispatcher; tests may drive it synchronously.
    pub fn update(&self) {
        let mut worker = self.lock_worker();
        worker.update(self);
    }

    pub fn is_splitting(&self) -> bool {
        self.splitting.load(Ordering::Acquire)
    }

    pub fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::Acquire)
    }

    pub fn is_terminated(&self) -> bool {
        *self.terminated.lock().expect("terminate mutex poisoned")
    }

    /// Cooperative termination: cancels any split, flags the worker and
    /// schedules it so the flag is observed.
    pub fn terminate(&self) {
        self.splitting.store(false, Ordering::Release);
        self.terminating.store(true, Ordering::Release);
        if !self.reschedule() {
            // Dispatcher is already gone; complete termination inline.
            self.do_terminate();
        }
    }

    fn do_terminate(&self) {
        {
            let mut terminated = self.terminated.lock().expect("terminate mutex poisoned");
            *terminated = true;
        }
        self.terminate_cv.notify_all();
    }

    /// Blocks until the worker observed `terminate` and shut down.
    pub fn join(&self) {
        let mut terminated = self.terminated.lock().expect("terminate mutex poisoned");
        while !*terminated {
            terminated = self
                .terminate_cv
                .wait(terminated)
                .expect("terminate mutex poisoned");
        }
    }

    /// External wake-up: schedule the worker unless it is awaiting a split.
    /// Returns false when the dispatcher refused the job.
    pub fn reschedule(&self) -> bool {
        if self.is_splitting() {
            return false;
        }
        // Only schedule when no run is already pending.
        if self.reschedule_counter.fetch_add(1, Ordering::AcqRel) > 0 {
            return true;
        }
        self.dispatcher.dispatch(self.this_job()).is_ok()
    }

    fn reschedule_now(&self) {
        if self.dispatcher.dispatch(self.this_job()).is_err() {
            debug!("Dispatcher stopped; worker not rescheduled");
        }
    }

    /// Executes the split on the calling thread (the coordinator's): brings
    /// the worker up to date with pending messages and returns the
    /// connected components of its graph in worker-local handles. The
    /// worker stays suspended (`splitting` remains set) until
    /// `finish_split`; an island that reconnected in the meantime resumes
    /// immediately and returns no components.
    pub fn split(&self) -> Vec<ConnectedComponent> {
        assert!(
            self.is_splitting(),
            "split requested on a worker that is not splitting"
        );
        let mut worker = self.lock_worker();
        worker.process_messages(self);
        // A merge may have just been imported; flush the resulting entity
        // mappings so the coordinator can resolve every component below.
        worker.emit_delta();

        let mut components = worker.graph.connected_components();
        if components.len() <= 1 {
            drop(worker);
            self.finish_split();
            return Vec::new();
        }
        components.sort_by(|a, b| b.size().cmp(&a.size()));
        components
    }

    /// Resumes a worker after the coordinator executed the split (or a
    /// cancelled one).
    pub fn finish_split(&self) {
        self.splitting.store(false, Ordering::Release);
        self.reschedule_counter.store(1, Ordering::Release);
        self.reschedule_now();
    }
}

/// Owns the replica store of one island and runs the fixed-step pipeline
/// over it as a cooperatively scheduled state machine, synchronizing with
/// the coordinator exclusively through deltas on the message channel.
pub struct IslandWorker {
    store: Store,
    graph: EntityGraph,
    entity_map: EntityMap,
    delta_builder: DeltaBuilder,
    channel: MessageChannel,
    settings: Settings,
    material_table: MaterialTable,
    broadphase: Broadphase,
    narrowphase: Narrowphase,
    manifold_map: ManifoldMap,
    solver: Solver,
    state: State,
    island_entity: Entity,
    step_start_time: f64,
    sleep_timestamp: Option<f64>,
    importing_delta: bool,
    clearing_dangling: bool,
    topology_changed: bool,
    pending_split_calculation: bool,
    calculate_split_timestamp: f64,
    new_mesh_shapes: Vec<Entity>,
    possibly_dangling_np_nodes: BTreeSet<Entity>,
}

impl IslandWorker {
    fn new(
        remote_island_entity: Entity,
        settings: Settings,
        material_table: MaterialTable,
        channel: MessageChannel,
    ) -> Self {
        let mut store = Store::new();
        for kind in [
            ComponentKind::GraphNode,
            ComponentKind::GraphEdge,
            ComponentKind::ContactManifold,
            ComponentKind::ContactPoint,
        ] {
            store.watch(kind);
        }

        let island_entity = store.create();
        store.emplace(island_entity, IslandTimestamp(performance_time()));
        let mut entity_map = EntityMap::new();
        entity_map.insert(remote_island_entity, island_entity);
        // The coordinator needs the reverse mapping before it can apply any
        // island-entity update; ship it with the first delta.
        let mut delta_builder = DeltaBuilder::new();
        delta_builder.insert_entity_mapping(island_entity, remote_island_entity);

        Self {
            store,
            graph: EntityGraph::new(),
            entity_map,
            delta_builder,
            channel,
            settings,
            material_table,
            broadphase: Broadphase::new(),
            narrowphase: Narrowphase::new(),
            manifold_map: ManifoldMap::new(),
            solver: Solver::new(),
            state: State::Init,
            island_entity,
            step_start_time: 0.0,
            sleep_timestamp: None,
            importing_delta: false,
            clearing_dangling: false,
            topology_changed: false,
            pending_split_calculation: false,
            calculate_split_timestamp: 0.0,
            new_mesh_shapes: Vec::new(),
            possibly_dangling_np_nodes: BTreeSet::new(),
        }
    }

    fn update(&mut self, handle: &WorkerHandle) {
        match self.state {
            State::Init => {
                self.init(handle);
                self.maybe_reschedule(handle);
            }
            State::Step => {
                self.process_messages(handle);

                if self.should_step() {
                    self.begin_step();
                    if self.run_broadphase(handle) {
                        if self.run_narrowphase(handle) {
                            self.run_solver();
                            self.finish_step(handle);
                            self.maybe_reschedule(handle);
                        }
                    }
                } else {
                    self.maybe_reschedule(handle);
                }
            }
            State::BeginStep => {
                self.begin_step();
                handle.reschedule_now();
            }
            State::Broadphase => {
                if self.run_broadphase(handle) {
                    handle.reschedule_now();
                }
            }
            State::BroadphaseAsync => {
                self.finish_broadphase();
                if self.run_narrowphase(handle) {
                    self.run_solver();
                    self.finish_step(handle);
                    self.maybe_reschedule(handle);
                }
            }
            State::Narrowphase => {
                if self.run_narrowphase(handle) {
                    self.run_solver();
                    self.finish_step(handle);
                    self.maybe_reschedule(handle);
                }
            }
            State::NarrowphaseAsync => {
                self.finish_narrowphase();
                self.run_solver();
                self.finish_step(handle);
                self.maybe_reschedule(handle);
            }
            State::Solve => {
                self.run_solver();
                self.finish_step(handle);
                handle.reschedule_now();
            }
            State::FinishStep => {
                self.finish_step(handle);
                self.maybe_reschedule(handle);
            }
        }
    }

    fn init(&mut self, handle: &WorkerHandle) {
        // Messages enqueued before the worker started include the initial
        // delta with the island's entities.
        self.process_messages(handle);

        if let Some(init) = self.settings.external_system_init {
            init(&mut self.store);
        }

        // First broadphase run seeds the tree from the imported AABBs.
        self.broadphase.sync_tree(&self.store);
        let view = self.broadphase.view();
        self.store
            .emplace_or_replace::<TreeView>(self.island_entity, view);

        self.state = State::Step;
    }

    fn process_messages(&mut self, handle: &WorkerHandle) {
        for message in self.channel.drain() {
            match message {
                Message::IslandDelta(delta) => self.on_island_delta(handle, delta),
                Message::SetPaused(paused) => {
                    self.settings.paused = paused;
                    let now = performance_time();
                    self.store
                        .replace(self.island_entity, IslandTimestamp(now));
                }
                Message::StepSimulation => {
                    if !self.store.has::<SleepingTag>(self.island_entity) {
                        self.state = State::BeginStep;
                    }
                }
                Message::SetSettings(settings) => {
                    self.settings = settings;
                }
                Message::SetMaterialTable(table) => {
                    self.material_table = table;
                }
                Message::SetCenterOfMass { entity, com } => self.on_set_com(entity, com),
                Message::WakeUpIsland => self.on_wake_up_island(),
                Message::SplitIsland => {
                    warn!("Worker received SplitIsland; ignoring coordinator-bound message");
                }
            }
        }
    }

    fn on_island_delta(&mut self, _handle: &WorkerHandle, delta: IslandDelta) {
        self.importing_delta = true;
        let result = delta.import(&mut self.store, &mut self.entity_map);
        for remote in &result.unknown_remotes {
            debug!("Delta referenced unknown remote {:?}; skipped", remote);
        }

        // Tell the coordinator which local handles the created entities
        // received.
        for (remote, local) in &result.created {
            self.delta_builder.insert_entity_mapping(*local, *remote);
        }

        // Seed the graph for created bodies, then for created edges.
        for (_, local) in &result.created {
            if !self.store.is_alive(*local) || self.store.has::<GraphNode>(*local) {
                continue;
            }
            if is_body(&self.store, *local) {
                self.insert_graph_node(*local);
            }
        }
        for (_, local) in &result.created {
            if self.store.is_alive(*local) {
                self.try_insert_graph_edge(*local);
            }
        }

        // Dependent fields for entities whose pose was written manually.
        let mut refreshed = BTreeSet::new();
        for kind in [ComponentKind::Position, ComponentKind::Orientation] {
            for remote in delta.updated_entities_of(kind) {
                if let Ok(local) = self.entity_map.local(remote) {
                    if self.store.is_alive(local) && refreshed.insert(local) {
                        refresh_derived(&mut self.store, local);
                    }
                }
            }
        }

        // Newly imported polyhedron and compound shapes need their rotated
        // mesh caches built before the next broadphase.
        for (_, local) in &result.created {
            if self.store.is_alive(*local) && has_mesh_shape(&self.store, *local) {
                self.new_mesh_shapes.push(*local);
            }
        }

        self.drain_store_events();
        self.importing_delta = false;

        // Any delta touching a sleeping island wakes it.
        if self.store.has::<SleepingTag>(self.island_entity) {
            self.wake_up();
        }
    }

    fn on_wake_up_island(&mut self) {
        if !self.store.has::<SleepingTag>(self.island_entity) {
            return;
        }
        self.wake_up();
        self.emit_delta();
    }

    fn wake_up(&mut self) {
        let now = performance_time();
        self.store
            .replace(self.island_entity, IslandTimestamp(now));
        self.delta_builder
            .updated(self.island_entity, ComponentValue::IslandTimestamp(IslandTimestamp(now)));

        for entity in self.store.entities_with::<SleepingTag>() {
            self.store.try_remove::<SleepingTag>(entity);
            self.delta_builder
                .destroyed_component(entity, ComponentKind::Sleeping);
        }
        self.sleep_timestamp = None;
    }

    fn on_set_com(&mut self, remote: Entity, com: Vec3) {
        let Ok(local) = self.entity_map.local(remote) else {
            debug!("SetCenterOfMass for unknown remote {:?}", remote);
            return;
        };
        if let Some(inertial) = self.store.get_mut::<Inertial>(local) {
            inertial.com = com;
            self.store.mark_updated(local, ComponentKind::Inertial);
            if self.store.has::<Origin>(local) {
                refresh_derived(&mut self.store, local);
                self.store.mark_updated(local, ComponentKind::Origin);
            }
        }
    }

    fn insert_graph_node(&mut self, local: Entity) {
        let connecting = self.store.has_kind(local, ComponentKind::Procedural);
        let node = self.graph.insert_node(local, connecting);
        self.store.emplace(local, GraphNode { node });
        self.topology_changed = true;
    }

    fn try_insert_graph_edge(&mut self, local: Entity) {
        if self.store.has::<GraphEdge>(local) {
            return;
        }
        let Some(bodies) = edge_bodies(&self.store, local) else {
            return;
        };
        let (Some(node_a), Some(node_b)) = (
            self.store.get::<GraphNode>(bodies[0]).map(|n| n.node),
            self.store.get::<GraphNode>(bodies[1]).map(|n| n.node),
        ) else {
            warn!(
                "Edge entity {:?} references bodies without graph nodes",
                local
            );
            return;
        };
        let edge = self.graph.insert_edge(local, node_a, node_b);
        self.store.emplace(local, GraphEdge { edge });
        self.topology_changed = true;

        if let Some(manifold) = self.store.get::<ContactManifold>(local) {
            let [a, b] = manifold.body;
            if !self.manifold_map.contains(a, b) {
                self.manifold_map.insert(a, b, local);
            }
        }
    }

    /// Applies deferred store notifications: graph upkeep for destroyed
    /// nodes and edges, manifold bookkeeping, and delta destruction records
    /// for everything that disappeared for simulation-internal reasons.
    fn drain_store_events(&mut self) {
        while let Some(event) = self.store.next_event() {
            match event {
                StoreEvent::Destroyed(entity, ComponentValue::GraphNode(node)) => {
                    self.on_destroy_graph_node(entity, node.node);
                }
                StoreEvent::Destroyed(entity, ComponentValue::GraphEdge(edge)) => {
                    self.on_destroy_graph_edge(entity, edge.edge);
                }
                StoreEvent::Destroyed(entity, ComponentValue::ContactManifold(manifold)) => {
                    self.on_destroy_contact_manifold(entity, &manifold);
                }
                StoreEvent::Destroyed(entity, ComponentValue::ContactPoint(_)) => {
                    self.record_destroyed(entity);
                }
                _ => {}
            }
        }
    }

    fn on_destroy_graph_node(&mut self, entity: Entity, node: atoll_shared::NodeIndex) {
        if self.graph.contains_node(node) {
            // Cascaded edge removals cannot read their endpoints anymore,
            // so flag non-procedural neighbours for the dangling sweep
            // here.
            self.graph.visit_neighbours(node, |neighbour| {
                if !self.store.has_kind(neighbour, ComponentKind::Procedural) {
                    self.possibly_dangling_np_nodes.insert(neighbour);
                }
            });
            // Incident edge entities go first; their own events will skip
            // the already-detached graph edges.
            let mut edge_entities = Vec::new();
            self.graph.visit_edges(node, |edge_entity| {
                edge_entities.push(edge_entity);
            });
            self.graph.remove_all_edges(node, |_| {});
            for edge_entity in edge_entities {
                if self.store.is_alive(edge_entity) {
                    self.store.destroy(edge_entity);
                }
            }
            self.graph.remove_node(node);
        }
        self.record_destroyed(entity);
        self.topology_changed = true;
    }

    fn on_destroy_graph_edge(&mut self, entity: Entity, edge: atoll_shared::EdgeIndex) {
        if self.graph.contains_edge(edge) {
            let (a, b) = self.graph.edge_node_entities(edge);
            for body in [a, b] {
                if !self.store.has_kind(body, ComponentKind::Procedural) {
                    self.possibly_dangling_np_nodes.insert(body);
                }
            }
            self.graph.remove_edge(edge);
        }
        self.record_destroyed(entity);
        self.topology_changed = true;
    }

    fn on_destroy_contact_manifold(&mut self, entity: Entity, manifold: &ContactManifold) {
        let [a, b] = manifold.body;
        self.manifold_map.remove(a, b);
        // Points belong to the manifold; cascade.
        for point in &manifold.points {
            if self.store.is_alive(*point) {
                self.store.destroy(*point);
            }
        }
        self.record_destroyed(entity);
    }

    /// Destructions triggered by imports, splits or the dangling sweep are
    /// not echoed into the outbound delta.
    fn record_destroyed(&mut self, entity: Entity) {
        if !self.importing_delta && !self.clearing_dangling {
            self.delta_builder.destroyed(entity);
        }
        self.entity_map.erase_local(entity);
    }

    fn should_step(&mut self) -> bool {
        let time = performance_time();

        if self.state == State::BeginStep {
            self.step_start_time = time;
            return true;
        }

        if self.settings.paused || self.store.has::<SleepingTag>(self.island_entity) {
            return false;
        }

        let island_time = self
            .store
            .expect::<IslandTimestamp>(self.island_entity)
            .0;
        if time - island_time < self.settings.fixed_dt as f64 {
            return false;
        }

        self.step_start_time = time;
        self.state = State::BeginStep;
        true
    }

    fn begin_step(&mut self) {
        assert_eq!(self.state, State::BeginStep);

        if let Some(pre_step) = self.settings.external_system_pre_step {
            pre_step(&mut self.store);
        }

        self.init_new_shapes();
        self.state = State::Broadphase;
    }

    fn init_new_shapes(&mut self) {
        let entities = std::mem::take(&mut self.new_mesh_shapes);
        for entity in entities {
            if !self.store.is_alive(entity) || !has_mesh_shape(&self.store, entity) {
                continue;
            }
            let orn = self
                .store
                .expect::<atoll_shared::Orientation>(entity)
                .0;
            let shape = self.store.expect::<Shape>(entity).clone();
            self.store.emplace_or_replace(
                entity,
                atoll_shared::RotatedMeshList::rebuild(&shape, orn),
            );
        }
    }

    fn run_broadphase(&mut self, handle: &WorkerHandle) -> bool {
        assert_eq!(self.state, State::Broadphase);
        self.sync_dirty();

        if self.broadphase.parallelizable() && self.dispatcher_has_helpers(handle) {
            self.state = State::BroadphaseAsync;
            let job = Job::new(broadphase_async_job, handle_payload(handle));
            if handle.dispatcher.dispatch(job).is_ok() {
                return false;
            }
            // Pool refused; fall back to the synchronous path.
            self.state = State::Broadphase;
        }

        let pairs = self.broadphase.update(&self.store);
        self.process_pairs(pairs);
        self.state = State::Narrowphase;
        true
    }

    fn broadphase_async_work(&mut self, _handle: &WorkerHandle) {
        self.broadphase.sync_tree(&self.store);
        let pairs = self.broadphase.collect_pairs(&self.store);
        self.broadphase.set_pending_pairs(pairs);
    }

    fn finish_broadphase(&mut self) {
        assert_eq!(self.state, State::BroadphaseAsync);
        let pairs = self.broadphase.take_pending_pairs();
        self.process_pairs(pairs);
        self.state = State::Narrowphase;
    }

    /// Creates manifolds for fresh candidate pairs and destroys manifolds
    /// whose bodies separated beyond their threshold.
    fn process_pairs(&mut self, pairs: Vec<(Entity, Entity)>) {
        for (a, b) in pairs {
            if self.manifold_map.contains(a, b) {
                continue;
            }
            if !self.store.has::<Shape>(a) || !self.store.has::<Shape>(b) {
                continue;
            }
            let a_procedural = self.store.has_kind(a, ComponentKind::Procedural);
            let b_procedural = self.store.has_kind(b, ComponentKind::Procedural);
            if !a_procedural && !b_procedural {
                continue;
            }
            self.create_manifold(a, b);
        }

        let mut separated = Vec::new();
        self.store.each::<ContactManifold>(|entity, manifold| {
            let [a, b] = manifold.body;
            let (Some(aabb_a), Some(aabb_b)) = (
                self.store.get::<WorldAabb>(a).map(|aabb| aabb.0),
                self.store.get::<WorldAabb>(b).map(|aabb| aabb.0),
            ) else {
                separated.push(entity);
                return;
            };
            if !aabb_a
                .inflated(manifold.separation_threshold)
                .intersects(&aabb_b)
            {
                separated.push(entity);
            }
        });
        for entity in separated {
            self.store.destroy(entity);
        }
        self.drain_store_events();
    }

    fn create_manifold(&mut self, a: Entity, b: Entity) {
        let manifold_entity = self.store.create();
        self.store.emplace(
            manifold_entity,
            ContactManifold::new([a, b], MANIFOLD_SEPARATION_THRESHOLD),
        );
        self.store.mark_new(manifold_entity);
        self.store
            .mark_created(manifold_entity, ComponentKind::ContactManifold);
        self.try_insert_graph_edge(manifold_entity);
        self.drain_store_events();
    }

    fn run_narrowphase(&mut self, handle: &WorkerHandle) -> bool {
        assert_eq!(self.state, State::Narrowphase);

        if self.narrowphase.parallelizable(&self.store) && self.dispatcher_has_helpers(handle) {
            self.state = State::NarrowphaseAsync;
            let job = Job::new(narrowphase_async_job, handle_payload(handle));
            if handle.dispatcher.dispatch(job).is_ok() {
                return false;
            }
            self.state = State::Narrowphase;
        }

        // Separating contact points are destroyed inside the update; flush
        // dirty records first so points created this step are observed by
        // the coordinator before they disappear.
        self.sync_dirty();
        self.narrowphase
            .update(&mut self.store, &self.material_table);
        self.drain_store_events();
        self.state = State::Solve;
        true
    }

    fn narrowphase_async_work(&mut self, handle: &WorkerHandle) {
        let manifolds = self.store.entities_with::<ContactManifold>();
        let results: Mutex<Vec<PointChanges>> = Mutex::new(Vec::with_capacity(manifolds.len()));
        let store = &self.store;
        handle.dispatcher.parallel_for(0, manifolds.len(), 1, |index| {
            let changes = Narrowphase::collide_manifold(store, manifolds[index]);
            results.lock().expect("narrowphase results").push(changes);
        });
        self.narrowphase
            .set_pending(results.into_inner().expect("narrowphase results"));
    }

    fn finish_narrowphase(&mut self) {
        assert_eq!(self.state, State::NarrowphaseAsync);
        self.sync_dirty();
        self.narrowphase
            .finish_update(&mut self.store, &self.material_table);
        self.drain_store_events();
        self.state = State::Solve;
    }

    fn run_solver(&mut self) {
        assert_eq!(self.state, State::Solve);
        self.solver.update(&mut self.store, &self.settings);
        self.state = State::FinishStep;
    }

    fn finish_step(&mut self, handle: &WorkerHandle) {
        assert_eq!(self.state, State::FinishStep);

        let island_time = self
            .store
            .expect::<IslandTimestamp>(self.island_entity)
            .0;
        let dt = self.step_start_time - island_time;
        let fixed_dt = self.settings.fixed_dt as f64;

        // Cap how far the worker may lag behind the wall clock so a stall
        // does not turn into an unbounded catch-up marathon.
        let max_lagging_steps = self.settings.max_lagging_steps as f64;
        let num_steps = (dt / fixed_dt).floor();
        let new_time = if num_steps > max_lagging_steps {
            let remainder = dt - num_steps * fixed_dt;
            self.step_start_time - (remainder + max_lagging_steps * fixed_dt)
        } else {
            island_time + fixed_dt
        };
        self.store
            .replace(self.island_entity, IslandTimestamp(new_time));
        self.delta_builder.updated(
            self.island_entity,
            ComponentValue::IslandTimestamp(IslandTimestamp(new_time)),
        );

        let view = self.broadphase.view();
        self.store
            .emplace_or_replace::<TreeView>(self.island_entity, view.clone());
        self.delta_builder
            .updated(self.island_entity, ComponentValue::TreeView(view));

        self.maybe_go_to_sleep();

        if let Some(post_step) = self.settings.external_system_post_step {
            post_step(&mut self.store);
        }

        self.clear_dangling_non_procedural_nodes();
        self.sync();

        self.state = State::Step;

        // An island cannot split itself: a merge may be racing in the
        // coordinator. Flag, notify, and suspend until the coordinator
        // executes the split.
        if self.should_split() {
            handle.splitting.store(true, Ordering::Release);
            self.channel.send(Message::SplitIsland);
        }
    }

    fn should_split(&mut self) -> bool {
        if !self.topology_changed {
            return false;
        }
        let time = performance_time();

        if self.pending_split_calculation {
            if time - self.calculate_split_timestamp > self.settings.split_delay {
                self.pending_split_calculation = false;
                self.topology_changed = false;
                return !self.graph.is_single_connected_component();
            }
        } else {
            self.pending_split_calculation = true;
            self.calculate_split_timestamp = time;
        }
        false
    }

    fn maybe_go_to_sleep(&mut self) {
        if self.could_go_to_sleep() {
            let island_time = self
                .store
                .expect::<IslandTimestamp>(self.island_entity)
                .0;
            match self.sleep_timestamp {
                None => self.sleep_timestamp = Some(island_time),
                Some(since) => {
                    if island_time - since > self.settings.island_time_to_sleep as f64 {
                        self.go_to_sleep();
                        self.sleep_timestamp = None;
                    }
                }
            }
        } else {
            self.sleep_timestamp = None;
        }
    }

    fn could_go_to_sleep(&self) -> bool {
        if self.store.count::<atoll_shared::SleepingDisabledTag>() > 0 {
            return false;
        }
        let linear_sq = self.settings.island_linear_sleep_threshold
            * self.settings.island_linear_sleep_threshold;
        let angular_sq = self.settings.island_angular_sleep_threshold
            * self.settings.island_angular_sleep_threshold;

        for entity in self.store.kind_entities(ComponentKind::Procedural) {
            if let Some(v) = self.store.get::<LinVel>(entity) {
                if v.0.length_squared() > linear_sq {
                    return false;
                }
            }
            if let Some(w) = self.store.get::<AngVel>(entity) {
                if w.0.length_squared() > angular_sq {
                    return false;
                }
            }
        }
        true
    }

    fn go_to_sleep(&mut self) {
        self.store.emplace(self.island_entity, SleepingTag);
        self.delta_builder.updated(
            self.island_entity,
            ComponentValue::Sleeping(SleepingTag),
        );

        for entity in self.store.kind_entities(ComponentKind::Procedural) {
            if self.store.has::<LinVel>(entity) {
                self.store.replace(entity, LinVel(Vec3::ZERO));
                self.delta_builder
                    .updated(entity, ComponentValue::LinVel(LinVel(Vec3::ZERO)));
            }
            if self.store.has::<AngVel>(entity) {
                self.store.replace(entity, AngVel(Vec3::ZERO));
                self.delta_builder
                    .updated(entity, ComponentValue::AngVel(AngVel(Vec3::ZERO)));
            }
            self.store.emplace_or_replace(entity, SleepingTag);
            self.delta_builder
                .updated(entity, ComponentValue::Sleeping(SleepingTag));
        }
    }

    /// Non-procedural nodes that lost their last procedural neighbour are
    /// only relevant to other islands; delete the local replica without
    /// echoing the destruction.
    fn clear_dangling_non_procedural_nodes(&mut self) {
        self.clearing_dangling = true;
        let candidates = std::mem::take(&mut self.possibly_dangling_np_nodes);
        for entity in candidates {
            if !self.store.is_alive(entity) {
                continue;
            }
            let Some(node) = self.store.get::<GraphNode>(entity).map(|n| n.node) else {
                continue;
            };
            let mut has_procedural_neighbour = false;
            self.graph.visit_neighbours(node, |neighbour| {
                if self.store.has_kind(neighbour, ComponentKind::Procedural) {
                    has_procedural_neighbour = true;
                }
            });
            if !has_procedural_neighbour {
                self.store.destroy(entity);
            }
        }
        self.drain_store_events();
        self.clearing_dangling = false;
    }

    /// Emits the per-step delta: AABBs for all bodies, manifold updates,
    /// continuous components, then the dirty creates/updates/destroys.
    fn sync(&mut self) {
        let mut updates: Vec<(Entity, ComponentValue)> = Vec::new();
        self.store.each::<WorldAabb>(|entity, aabb| {
            updates.push((entity, ComponentValue::Aabb(*aabb)));
        });
        self.store.each::<ContactManifold>(|entity, manifold| {
            updates.push((entity, ComponentValue::ContactManifold(manifold.clone())));
        });
        for (entity, value) in updates {
            self.delta_builder.updated(entity, value);
        }

        let continuous: Vec<(Entity, Continuous)> = {
            let mut list = Vec::new();
            self.store.each::<Continuous>(|entity, continuous| {
                list.push((entity, *continuous));
            });
            list
        };
        for (entity, continuous) in continuous {
            for kind in continuous.iter() {
                self.delta_builder.updated_from(&self.store, entity, kind);
            }
        }

        self.sync_dirty();
        self.emit_delta();
    }

    /// Moves accumulated dirty records into the delta builder. Safe to call
    /// at any time; clears the records.
    fn sync_dirty(&mut self) {
        let dirty_entities: Vec<(Entity, Dirty)> = {
            let mut list = Vec::new();
            self.store.each::<Dirty>(|entity, dirty| {
                list.push((entity, *dirty));
            });
            list
        };

        for (entity, dirty) in dirty_entities {
            if dirty.is_new_entity {
                self.delta_builder.created(entity);
            }
            for kind in dirty.created_kinds() {
                if let Some(value) = self.store.read_value(entity, kind) {
                    self.delta_builder.created_component(entity, value);
                }
            }
            for kind in dirty.updated_kinds() {
                self.delta_builder.updated_from(&self.store, entity, kind);
            }
            for kind in dirty.destroyed_kinds() {
                self.delta_builder.destroyed_component(entity, kind);
            }
        }
        self.store.clear_dirty();
    }

    fn emit_delta(&mut self) {
        let delta = self.delta_builder.finish();
        if !delta.is_empty() {
            self.channel.send(Message::IslandDelta(delta));
        }
    }

    fn maybe_reschedule(&mut self, handle: &WorkerHandle) {
        if handle.is_splitting() {
            return;
        }

        let sleeping = self.store.has::<SleepingTag>(self.island_entity);
        let paused = self.settings.paused;

        // This run is complete; the counter tells whether external requests
        // arrived while it ran.
        let reschedule_count = handle
            .reschedule_counter
            .swap(0, Ordering::AcqRel);

        if reschedule_count > 1 {
            // External wake-ups arrived during this run: go again
            // immediately.
            handle.reschedule();
        } else if !paused && !sleeping {
            self.reschedule_later(handle);
        }
    }

    fn reschedule_later(&mut self, handle: &WorkerHandle) {
        if handle
            .reschedule_counter
            .fetch_add(1, Ordering::AcqRel)
            > 0
        {
            return;
        }

        let island_time = self
            .store
            .expect::<IslandTimestamp>(self.island_entity)
            .0;
        let delta_time = island_time + self.settings.fixed_dt as f64 - performance_time();

        let job = handle.this_job();
        let dispatched = if delta_time > 0.0 {
            handle.dispatcher.dispatch_after(delta_time, job)
        } else {
            handle.dispatcher.dispatch(job)
        };
        if dispatched.is_err() {
            debug!("Dispatcher stopped; worker idle");
        }
    }

    fn dispatcher_has_helpers(&self, handle: &WorkerHandle) -> bool {
        handle.dispatcher.num_workers() > 1
    }
}

fn handle_payload(handle: &WorkerHandle) -> JobData {
    handle
        .self_ref
        .get()
        .expect("self_ref installed")
        .upgrade()
        .expect("worker alive")
}

fn is_body(store: &Store, entity: Entity) -> bool {
    store.has_kind(entity, ComponentKind::Dynamic)
        || store.has_kind(entity, ComponentKind::Static)
        || store.has_kind(entity, ComponentKind::Kinematic)
        || store.has_kind(entity, ComponentKind::External)
}

fn has_mesh_shape(store: &Store, entity: Entity) -> bool {
    matches!(
        store.get::<Shape>(entity),
        Some(Shape::Polyhedron { .. }) | Some(Shape::Compound { .. })
    )
}

/// The endpoint bodies of an edge-owning entity, if it owns one.
fn edge_bodies(store: &Store, entity: Entity) -> Option<[Entity; 2]> {
    for kind in atoll_shared::EDGE_OWNER_KINDS {
        if let Some(value) = store.read_value(entity, *kind) {
            return constraint_bodies(&value);
        }
    }
    None
}
