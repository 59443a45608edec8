//! # Atoll Shared
//! Common functionality shared between the atoll-coordinator & atoll-worker
//! crates: the entity store, interaction graph, delta channel, message
//! queues and the job dispatcher.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

pub mod component;
pub mod delta;
pub mod dispatcher;
pub mod entity;
pub mod graph;
pub mod material;
pub mod math;
pub mod messages;
pub mod settings;
pub mod store;
pub mod time;

pub use component::{
    body::{
        AngVel, DynamicTag, ExternalTag, Inertial, KinematicTag, LinAcc, LinVel, Orientation,
        Origin, Position, ProceduralTag, SleepingDisabledTag, SleepingTag, StaticTag,
    },
    constraint::{DistanceConstraint, HingeConstraint, PointConstraint, SoftDistanceConstraint},
    contact::{ContactConstraint, ContactManifold, ContactPoint, MAX_CONTACT_POINTS},
    continuous::Continuous,
    dirty::Dirty,
    island::{Island, IslandResident, IslandTimestamp, MultiIslandResident},
    marker::{GraphEdge, GraphNode, WorldAabb},
    presentation::{Discontinuity, PresentOrientation, PresentPosition},
    registry::{
        constraint_bodies, map_entities, Component, ComponentKind, ComponentValue,
        CONSTRAINT_SOLVE_ORDER, EDGE_OWNER_KINDS,
    },
    shape::{
        CompoundNode, ConvexMesh, PagedTriangleMesh, RotatedMesh, RotatedMeshList, Shape,
        TriangleMesh,
    },
    tree_view::{TreeView, TreeViewNode},
};
pub use delta::{DeltaBuilder, ImportResult, IslandDelta};
pub use dispatcher::{DispatcherStopped, Job, JobData, JobDispatcher};
pub use entity::{
    entity_map::{EntityDoesNotExistError, EntityMap},
    handle::{Entity, EntityAllocator},
};
pub use graph::{ConnectedComponent, EdgeIndex, EntityGraph, NodeIndex};
pub use material::{ContactMaterial, Material, MaterialTable};
pub use math::{integrate_orientation, to_object_space, to_world_space, Aabb, Scalar};
pub use messages::{Message, MessageChannel};
pub use settings::{Settings, CONTACT_BREAKING_THRESHOLD, MANIFOLD_SEPARATION_THRESHOLD};
pub use store::{Store, StoreEvent};
pub use time::performance_time;
