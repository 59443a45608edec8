use std::collections::BTreeMap;

use crate::component::body::*;
use crate::component::constraint::*;
use crate::component::contact::*;
use crate::component::continuous::Continuous;
use crate::component::dirty::Dirty;
use crate::component::island::*;
use crate::component::marker::*;
use crate::component::presentation::*;
use crate::component::shape::{RotatedMeshList, Shape};
use crate::component::tree_view::TreeView;
use crate::entity::entity_map::EntityDoesNotExistError;
use crate::entity::handle::Entity;
use crate::material::Material;

/// A type usable as a component of the store. The set of component types is
/// closed and declared once in `components!` below; the declaration order
/// fixes the stable kind indices used as wire identity in deltas and in
/// `Continuous` sets.
pub trait Component: Clone + Send + 'static {
    const KIND: ComponentKind;

    fn column(columns: &Columns) -> &BTreeMap<Entity, Self>;
    fn column_mut(columns: &mut Columns) -> &mut BTreeMap<Entity, Self>;
    fn into_value(self) -> ComponentValue;
    fn from_value(value: ComponentValue) -> Option<Self>;
}

macro_rules! components {
    ($(($kind:ident, $ty:ty, $field:ident, $index:literal, $shippable:literal),)*) => {
        /// Stable identity of a component type. The discriminant is the
        /// wire identity in deltas; coordinator and workers share this
        /// declaration, so they always agree on the numbering.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(u8)]
        pub enum ComponentKind {
            $($kind = $index,)*
        }

        impl ComponentKind {
            pub const ALL: &'static [ComponentKind] = &[$(ComponentKind::$kind,)*];

            pub fn index(self) -> u8 {
                self as u8
            }

            pub fn bit(self) -> u64 {
                1u64 << (self as u8)
            }

            pub fn from_index(index: u8) -> Option<ComponentKind> {
                match index {
                    $($index => Some(ComponentKind::$kind),)*
                    _ => None,
                }
            }

            /// Whether this kind travels in deltas. Store-local bookkeeping
            /// (graph markers, dirtiness, presentation state) never does.
            pub fn is_shippable(self) -> bool {
                match self {
                    $(ComponentKind::$kind => $shippable,)*
                }
            }
        }

        /// An owned component tagged with its kind: the payload of delta
        /// operations.
        #[derive(Clone, Debug)]
        pub enum ComponentValue {
            $($kind($ty),)*
        }

        impl ComponentValue {
            pub fn kind(&self) -> ComponentKind {
                match self {
                    $(ComponentValue::$kind(_) => ComponentKind::$kind,)*
                }
            }
        }

        /// Sparse per-component columns keyed by entity handle. Ordered maps
        /// keep iteration deterministic within a store.
        pub struct Columns {
            $(pub(crate) $field: BTreeMap<Entity, $ty>,)*
        }

        impl Columns {
            pub(crate) fn new() -> Self {
                Self {
                    $($field: BTreeMap::new(),)*
                }
            }

            pub(crate) fn read(&self, entity: Entity, kind: ComponentKind) -> Option<ComponentValue> {
                match kind {
                    $(ComponentKind::$kind => {
                        self.$field.get(&entity).cloned().map(ComponentValue::$kind)
                    })*
                }
            }

            pub(crate) fn contains(&self, entity: Entity, kind: ComponentKind) -> bool {
                match kind {
                    $(ComponentKind::$kind => self.$field.contains_key(&entity),)*
                }
            }

            /// Returns true when the component was newly constructed, false
            /// when an existing one was replaced.
            pub(crate) fn insert(&mut self, entity: Entity, value: ComponentValue) -> bool {
                match value {
                    $(ComponentValue::$kind(component) => {
                        self.$field.insert(entity, component).is_none()
                    })*
                }
            }

            pub(crate) fn remove(&mut self, entity: Entity, kind: ComponentKind) -> Option<ComponentValue> {
                match kind {
                    $(ComponentKind::$kind => {
                        self.$field.remove(&entity).map(ComponentValue::$kind)
                    })*
                }
            }
        }

        $(
            impl Component for $ty {
                const KIND: ComponentKind = ComponentKind::$kind;

                fn column(columns: &Columns) -> &BTreeMap<Entity, Self> {
                    &columns.$field
                }

                fn column_mut(columns: &mut Columns) -> &mut BTreeMap<Entity, Self> {
                    &mut columns.$field
                }

                fn into_value(self) -> ComponentValue {
                    ComponentValue::$kind(self)
                }

                fn from_value(value: ComponentValue) -> Option<Self> {
                    match value {
                        ComponentValue::$kind(component) => Some(component),
                        _ => None,
                    }
                }
            }
        )*
    };
}

components! {
    (Position, Position, position, 0, true),
    (Orientation, Orientation, orientation, 1, true),
    (LinVel, LinVel, linvel, 2, true),
    (AngVel, AngVel, angvel, 3, true),
    (LinAcc, LinAcc, linacc, 4, true),
    (Inertial, Inertial, inertial, 5, true),
    (Origin, Origin, origin, 6, true),
    (Shape, Shape, shape, 7, true),
    (Aabb, WorldAabb, aabb, 8, true),
    (Material, Material, material, 9, true),
    (Dynamic, DynamicTag, dynamic_tag, 10, true),
    (Static, StaticTag, static_tag, 11, true),
    (Kinematic, KinematicTag, kinematic_tag, 12, true),
    (External, ExternalTag, external_tag, 13, true),
    (Procedural, ProceduralTag, procedural_tag, 14, true),
    (Sleeping, SleepingTag, sleeping_tag, 15, true),
    (SleepingDisabled, SleepingDisabledTag, sleeping_disabled_tag, 16, true),
    (Continuous, Continuous, continuous, 17, true),
    (GraphNode, GraphNode, graph_node, 18, false),
    (GraphEdge, GraphEdge, graph_edge, 19, false),
    (IslandResident, IslandResident, island_resident, 20, false),
    (MultiIslandResident, MultiIslandResident, multi_island_resident, 21, false),
    (IslandTimestamp, IslandTimestamp, island_timestamp, 22, true),
    (Island, Island, island, 23, false),
    (TreeView, TreeView, tree_view, 24, true),
    (ContactManifold, ContactManifold, contact_manifold, 25, true),
    (ContactPoint, ContactPoint, contact_point, 26, true),
    (PointConstraint, PointConstraint, point_constraint, 27, true),
    (DistanceConstraint, DistanceConstraint, distance_constraint, 28, true),
    (SoftDistanceConstraint, SoftDistanceConstraint, soft_distance_constraint, 29, true),
    (HingeConstraint, HingeConstraint, hinge_constraint, 30, true),
    (ContactConstraint, ContactConstraint, contact_constraint, 31, true),
    (RotatedMeshList, RotatedMeshList, rotated_mesh_list, 32, false),
    (PresentPosition, PresentPosition, present_position, 33, false),
    (PresentOrientation, PresentOrientation, present_orientation, 34, false),
    (Discontinuity, Discontinuity, discontinuity, 35, false),
    (Dirty, Dirty, dirty, 36, false),
}

/// Constraint kinds in solve order. The most important kinds come last:
/// contacts are solved after everything else so they win the final word on
/// velocities within an iteration.
pub const CONSTRAINT_SOLVE_ORDER: &[ComponentKind] = &[
    ComponentKind::PointConstraint,
    ComponentKind::DistanceConstraint,
    ComponentKind::SoftDistanceConstraint,
    ComponentKind::HingeConstraint,
    ComponentKind::ContactConstraint,
];

/// Kinds whose presence on an entity makes it a graph edge owner, with the
/// endpoint pair readable through `constraint_bodies`.
pub const EDGE_OWNER_KINDS: &[ComponentKind] = &[
    ComponentKind::ContactManifold,
    ComponentKind::PointConstraint,
    ComponentKind::DistanceConstraint,
    ComponentKind::SoftDistanceConstraint,
    ComponentKind::HingeConstraint,
];

/// The endpoint bodies named by an edge-owning component, if the value is
/// one.
pub fn constraint_bodies(value: &ComponentValue) -> Option<[Entity; 2]> {
    match value {
        ComponentValue::ContactManifold(manifold) => Some(manifold.body),
        ComponentValue::PointConstraint(constraint) => Some(constraint.body),
        ComponentValue::DistanceConstraint(constraint) => Some(constraint.body),
        ComponentValue::SoftDistanceConstraint(constraint) => Some(constraint.body),
        ComponentValue::HingeConstraint(constraint) => Some(constraint.body),
        _ => None,
    }
}

/// Remap every entity handle inside a component value through `f`. Values
/// that reference an unmapped handle leave the error to the caller, which
/// normally skips the operation and records the handle.
pub fn map_entities(
    value: &mut ComponentValue,
    f: &mut dyn FnMut(Entity) -> Result<Entity, EntityDoesNotExistError>,
) -> Result<(), EntityDoesNotExistError> {
    match value {
        ComponentValue::IslandResident(resident) => {
            resident.island = f(resident.island)?;
        }
        ComponentValue::MultiIslandResident(resident) => {
            let mut islands = std::collections::BTreeSet::new();
            for island in resident.islands.iter() {
                islands.insert(f(*island)?);
            }
            resident.islands = islands;
        }
        ComponentValue::Island(island) => {
            let mut nodes = std::collections::BTreeSet::new();
            for node in island.nodes.iter() {
                nodes.insert(f(*node)?);
            }
            let mut edges = std::collections::BTreeSet::new();
            for edge in island.edges.iter() {
                edges.insert(f(*edge)?);
            }
            island.nodes = nodes;
            island.edges = edges;
        }
        ComponentValue::TreeView(view) => {
            for node in &mut view.nodes {
                if let Some(entity) = node.entity {
                    node.entity = Some(f(entity)?);
                }
            }
        }
        ComponentValue::ContactManifold(manifold) => {
            manifold.body = [f(manifold.body[0])?, f(manifold.body[1])?];
            for point in &mut manifold.points {
                *point = f(*point)?;
            }
        }
        ComponentValue::ContactPoint(point) => {
            point.body = [f(point.body[0])?, f(point.body[1])?];
        }
        ComponentValue::PointConstraint(constraint) => {
            constraint.body = [f(constraint.body[0])?, f(constraint.body[1])?];
        }
        ComponentValue::DistanceConstraint(constraint) => {
            constraint.body = [f(constraint.body[0])?, f(constraint.body[1])?];
        }
        ComponentValue::SoftDistanceConstraint(constraint) => {
            constraint.body = [f(constraint.body[0])?, f(constraint.body[1])?];
        }
        ComponentValue::HingeConstraint(constraint) => {
            constraint.body = [f(constraint.body[0])?, f(constraint.body[1])?];
        }
        _ => {}
    }
    Ok(())
}
