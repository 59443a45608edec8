use atoll_shared::math::{Quat, Scalar, Vec3};
use atoll_shared::{
    AngVel, Component, ComponentKind, Continuous, DynamicTag, ExternalTag, Inertial,
    KinematicTag, LinAcc, LinVel, Material, Orientation, Origin, Position, PresentOrientation,
    PresentPosition, ProceduralTag, Shape, SleepingDisabledTag, StaticTag, Store, WorldAabb,
};

use crate::with_coordinator;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RigidBodyKind {
    Dynamic,
    Static,
    Kinematic,
    /// Simulated elsewhere (e.g. a networked peer) but still participating
    /// in connectivity.
    External,
}

impl RigidBodyKind {
    pub fn is_procedural(self) -> bool {
        matches!(self, RigidBodyKind::Dynamic | RigidBodyKind::External)
    }
}

/// Everything needed to stand up a rigid body in one call.
#[derive(Clone, Debug)]
pub struct RigidBodyDef {
    pub kind: RigidBodyKind,
    pub position: Vec3,
    pub orientation: Quat,
    pub linvel: Vec3,
    pub angvel: Vec3,
    pub mass: Scalar,
    pub shape: Option<Shape>,
    pub material: Material,
    /// `None` picks the settings default for dynamic bodies and no gravity
    /// otherwise.
    pub gravity: Option<Vec3>,
    pub center_of_mass: Vec3,
    pub sleeping_disabled: bool,
    /// Ship pose and velocity back from the worker every step. On by
    /// default for procedural bodies so presentation stays fresh.
    pub continuous: bool,
}

impl Default for RigidBodyDef {
    fn default() -> Self {
        Self {
            kind: RigidBodyKind::Dynamic,
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            linvel: Vec3::ZERO,
            angvel: Vec3::ZERO,
            mass: 1.0,
            shape: None,
            material: Material::default(),
            gravity: None,
            center_of_mass: Vec3::ZERO,
            sleeping_disabled: false,
            continuous: true,
        }
    }
}

/// Creates a body entity with pose, motion, inertia, shape and tags, gives
/// it a graph node and places it in an island. The coordinator must be
/// attached to the store.
pub fn make_rigid_body(store: &mut Store, def: RigidBodyDef) -> atoll_shared::Entity {
    let entity = store.create();
    store.emplace(entity, Position(def.position));
    store.emplace(entity, Orientation(def.orientation));

    if def.kind != RigidBodyKind::Static {
        store.emplace(entity, LinVel(def.linvel));
        store.emplace(entity, AngVel(def.angvel));
    }

    match def.kind {
        RigidBodyKind::Dynamic => {
            let inertia = def
                .shape
                .as_ref()
                .map(|shape| shape.moment_of_inertia(def.mass))
                .unwrap_or(Vec3::splat(def.mass * 0.4));
            let mut inertial = Inertial::new(def.mass, inertia, def.center_of_mass);
            inertial.update_world_inertia(def.orientation);
            store.emplace(entity, inertial);
        }
        _ => {
            store.emplace(
                entity,
                Inertial {
                    com: def.center_of_mass,
                    ..Inertial::fixed()
                },
            );
        }
    }

    if def.center_of_mass != Vec3::ZERO {
        store.emplace(
            entity,
            Origin(def.position + def.orientation * -def.center_of_mass),
        );
    }

    if let Some(shape) = def.shape {
        store.emplace(entity, WorldAabb(shape.aabb(def.position, def.orientation)));
        store.emplace(entity, shape);
    }
    store.emplace(entity, def.material);

    match def.kind {
        RigidBodyKind::Dynamic => store.emplace(entity, DynamicTag),
        RigidBodyKind::Static => store.emplace(entity, StaticTag),
        RigidBodyKind::Kinematic => store.emplace(entity, KinematicTag),
        RigidBodyKind::External => store.emplace(entity, ExternalTag),
    }
    if def.kind.is_procedural() {
        store.emplace(entity, ProceduralTag);
    }
    if def.sleeping_disabled {
        store.emplace(entity, SleepingDisabledTag);
    }

    if def.kind == RigidBodyKind::Dynamic {
        let gravity = def.gravity;
        with_coordinator(store, |coordinator, store| {
            let g = gravity.unwrap_or(coordinator.settings.gravity);
            if g != Vec3::ZERO {
                store.emplace(entity, LinAcc(g));
            }
        });
    }

    if def.kind.is_procedural() {
        store.emplace(entity, PresentPosition(def.position));
        store.emplace(entity, PresentOrientation(def.orientation));

        if def.continuous {
            let mut continuous = Continuous::new();
            continuous.insert(ComponentKind::Position);
            continuous.insert(ComponentKind::Orientation);
            continuous.insert(ComponentKind::LinVel);
            continuous.insert(ComponentKind::AngVel);
            store.emplace(entity, continuous);
        }
    }

    with_coordinator(store, |coordinator, store| {
        coordinator.on_body_created(store, entity);
    });
    entity
}

/// Creates a constraint entity and wires its graph edge; endpoints must be
/// existing bodies. Islands of the endpoints merge if the constraint
/// bridges two.
pub fn make_constraint<T: Component>(store: &mut Store, constraint: T) -> atoll_shared::Entity {
    let entity = store.create();
    store.emplace(entity, constraint);
    with_coordinator(store, |coordinator, store| {
        coordinator.on_edge_created(store, entity);
    });
    entity
}
