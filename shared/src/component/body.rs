use crate::math::{Mat3, Quat, Scalar, Vec3};

/// World-space position of a body's origin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Position(pub Vec3);

/// World-space orientation, always a unit quaternion.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Orientation(pub Quat);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinVel(pub Vec3);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AngVel(pub Vec3);

/// Constant linear acceleration (gravity, thrusters). Optional.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinAcc(pub Vec3);

/// Mass and inertia in inverse form. Zero inverse mass makes a body
/// unmovable by the solver. `inv_inertia_world` is derived from the local
/// diagonal after every orientation change.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Inertial {
    pub inv_mass: Scalar,
    pub inv_inertia: Vec3,
    pub inv_inertia_world: Mat3,
    /// Center-of-mass offset in object space.
    pub com: Vec3,
}

impl Inertial {
    pub fn fixed() -> Self {
        Self {
            inv_mass: 0.0,
            inv_inertia: Vec3::ZERO,
            inv_inertia_world: Mat3::ZERO,
            com: Vec3::ZERO,
        }
    }

    pub fn new(mass: Scalar, inertia: Vec3, com: Vec3) -> Self {
        let inv_inertia = Vec3::new(
            if inertia.x > 0.0 { 1.0 / inertia.x } else { 0.0 },
            if inertia.y > 0.0 { 1.0 / inertia.y } else { 0.0 },
            if inertia.z > 0.0 { 1.0 / inertia.z } else { 0.0 },
        );
        Self {
            inv_mass: if mass > 0.0 { 1.0 / mass } else { 0.0 },
            inv_inertia,
            inv_inertia_world: Mat3::from_diagonal(inv_inertia),
            com,
        }
    }

    pub fn update_world_inertia(&mut self, orn: Quat) {
        let basis = Mat3::from_quat(orn);
        self.inv_inertia_world = basis * Mat3::from_diagonal(self.inv_inertia) * basis.transpose();
    }
}

/// Cached world-space center of mass, kept for bodies with a non-zero
/// center-of-mass offset.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Origin(pub Vec3);

// Body class tags. Exactly one of these is present on a body. Dynamic and
// external bodies are procedural; static and kinematic bodies are not.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DynamicTag;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StaticTag;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct KinematicTag;

/// Bodies driven by an external system (e.g. a networked peer) which still
/// participate in connectivity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExternalTag;

/// Present on bodies whose motion is produced by the simulation. Only
/// procedural bodies are connecting nodes in the interaction graph.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProceduralTag;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SleepingTag;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SleepingDisabledTag;
