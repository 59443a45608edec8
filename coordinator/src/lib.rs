//! # Atoll Coordinator
//! The authoritative side of the simulation and the host-facing API.
//! Attach the coordinator to a store, create bodies and constraints, and
//! call `update` regularly; the actual physics runs on island workers
//! driven by the shared job dispatcher.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

pub mod body;
mod broadphase;
pub mod coordinator;
pub mod presentation;

use atoll_shared::{
    dispatcher, performance_time, Component, ComponentKind, Entity, Inertial, Message, Origin,
    Scalar, Settings, Store,
};
use glam::Vec3;

pub use atoll_shared::{
    ComponentValue, DistanceConstraint, HingeConstraint, Material, MaterialTable,
    PointConstraint, SoftDistanceConstraint,
};
pub use body::{make_constraint, make_rigid_body, RigidBodyDef, RigidBodyKind};
pub use coordinator::Coordinator;
pub use presentation::{snap_presentation, update_presentation};

/// Starts the global job dispatcher with one worker per available core
/// (minus one for the caller's thread). Call before attaching any store.
pub fn init() {
    let workers = std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1).max(1))
        .unwrap_or(3);
    init_with_workers(workers);
}

pub fn init_with_workers(workers: usize) {
    dispatcher::init_global(workers);
}

/// Stops the global dispatcher. Detach every store first.
pub fn deinit() {
    dispatcher::deinit_global();
}

/// Attaches a coordinator context to a caller-provided store, making it the
/// authoritative store of a simulation.
pub fn attach(store: &mut Store) {
    attach_with_settings(store, Settings::default());
}

pub fn attach_with_settings(store: &mut Store, settings: Settings) {
    if store.attachment.is_some() {
        panic!("Store already has an attachment");
    }
    Coordinator::install_watches(store);
    store.attachment = Some(Box::new(Coordinator::new(settings, dispatcher::global())));
}

/// Terminates every island worker and removes the coordinator context.
pub fn detach(store: &mut Store) {
    with_coordinator(store, |coordinator, _| {
        coordinator.terminate_all();
    });
    store.attachment = None;
}

/// Runs `f` with the coordinator temporarily detached from the store, so
/// both can be borrowed mutably. Panics when the store has no coordinator.
pub(crate) fn with_coordinator<R>(
    store: &mut Store,
    f: impl FnOnce(&mut Coordinator, &mut Store) -> R,
) -> R {
    let mut attachment = store
        .attachment
        .take()
        .expect("store has no attached coordinator; call attach first");
    let coordinator = attachment
        .downcast_mut::<Coordinator>()
        .expect("store attachment is not an atoll coordinator");
    let result = f(coordinator, store);
    store.attachment = Some(attachment);
    result
}

/// Coordination tick. Drains worker feedback, routes staged deltas,
/// executes merges and splits and refreshes presentation. Never blocks on
/// physics; call it once per frame.
pub fn update(store: &mut Store) {
    let fixed_dt = with_coordinator(store, |coordinator, store| {
        coordinator.update(store);
        coordinator.settings.fixed_dt
    });
    update_presentation(store, performance_time(), fixed_dt);
}

pub fn get_fixed_dt(store: &mut Store) -> Scalar {
    with_coordinator(store, |coordinator, _| coordinator.settings.fixed_dt)
}

pub fn set_fixed_dt(store: &mut Store, fixed_dt: Scalar) {
    with_coordinator(store, |coordinator, _| {
        coordinator.settings.fixed_dt = fixed_dt;
        let settings = coordinator.settings;
        coordinator.broadcast(move || Message::SetSettings(settings));
    });
}

pub fn get_settings(store: &mut Store) -> Settings {
    with_coordinator(store, |coordinator, _| coordinator.settings)
}

pub fn is_paused(store: &mut Store) -> bool {
    with_coordinator(store, |coordinator, _| coordinator.settings.paused)
}

/// Pause gate for every worker. Unpausing resets the islands' timestamps
/// worker-side so no catch-up burst happens.
pub fn set_paused(store: &mut Store, paused: bool) {
    with_coordinator(store, |coordinator, _| {
        coordinator.settings.paused = paused;
        coordinator.broadcast(move || Message::SetPaused(paused));
    });
}

/// Runs a single fixed step while paused.
pub fn step_simulation(store: &mut Store) {
    with_coordinator(store, |coordinator, _| {
        coordinator.broadcast(|| Message::StepSimulation);
    });
}

pub fn set_material_table(store: &mut Store, table: MaterialTable) {
    with_coordinator(store, |coordinator, _| {
        coordinator.material_table = table.clone();
        coordinator.broadcast(move || Message::SetMaterialTable(table.clone()));
    });
}

/// Moves a body's center of mass, updating the authoritative inertial data
/// and notifying the owning worker.
pub fn set_center_of_mass(store: &mut Store, entity: Entity, com: Vec3) {
    with_coordinator(store, |coordinator, store| {
        if let Some(inertial) = store.get_mut::<Inertial>(entity) {
            inertial.com = com;
        }
        if com != Vec3::ZERO || store.has::<Origin>(entity) {
            let pos = store.expect::<atoll_shared::Position>(entity).0;
            let orn = store.expect::<atoll_shared::Orientation>(entity).0;
            store.emplace_or_replace(entity, Origin(pos + orn * -com));
        }
        for island in coordinator::resident_islands(store, entity) {
            if let Some(container) = coordinator.islands.get(&island) {
                container
                    .channel
                    .send(Message::SetCenterOfMass { entity, com });
                container.worker.reschedule();
            }
        }
    });
}

/// A tuple of component types to ship with `refresh`, e.g.
/// `refresh::<(Position,)>` or `refresh::<(Position, LinVel)>`.
pub trait RefreshComponents {
    fn kinds() -> Vec<ComponentKind>;
}

macro_rules! refresh_tuple {
    ($($name:ident),+) => {
        impl<$($name: Component),+> RefreshComponents for ($($name,)+) {
            fn kinds() -> Vec<ComponentKind> {
                vec![$($name::KIND),+]
            }
        }
    };
}

refresh_tuple!(A);
refresh_tuple!(A, B);
refresh_tuple!(A, B, C);
refresh_tuple!(A, B, C, D);

/// Ships user-mutated components of `entity` to the worker(s) of its
/// island(s). The staged delta flushes on the next `update`; dependent
/// fields (AABB, origin, rotated meshes) are recomputed by the worker
/// before its next broadphase.
pub fn refresh<C: RefreshComponents>(store: &mut Store, entity: Entity) {
    with_coordinator(store, |coordinator, store| {
        for kind in C::kinds() {
            coordinator.stage_update(store, entity, kind);
        }
    });
}

/// Whether a contact manifold connects the two bodies.
pub fn manifold_exists(store: &mut Store, a: Entity, b: Entity) -> bool {
    with_coordinator(store, |coordinator, _| coordinator.manifold_map.contains(a, b))
}

pub fn get_manifold_entity(store: &mut Store, a: Entity, b: Entity) -> Option<Entity> {
    with_coordinator(store, |coordinator, _| coordinator.manifold_map.get(a, b))
}

/// Number of live islands.
pub fn island_count(store: &mut Store) -> usize {
    with_coordinator(store, |coordinator, _| coordinator.island_count())
}

pub fn island_entities(store: &mut Store) -> Vec<Entity> {
    with_coordinator(store, |coordinator, _| coordinator.island_entities())
}
