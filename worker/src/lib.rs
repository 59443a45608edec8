//! # Atoll Worker
//! The island worker: a cooperatively scheduled state machine owning the
//! replica store of one island, running the fixed-step pipeline
//! (broadphase, narrowphase, constraint solve, integration) and
//! synchronizing with the coordinator through deltas.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

pub mod broadphase;
pub mod collision;
pub mod narrowphase;
pub mod solver;
pub mod worker;

pub use broadphase::{Broadphase, DynamicAabbTree};
pub use collision::{collide, CollisionContext, CollisionResult, ResultPoint};
pub use narrowphase::{ManifoldMap, Narrowphase};
pub use solver::{refresh_derived, Solver};
pub use worker::{island_worker_job, IslandWorker, WorkerHandle};
