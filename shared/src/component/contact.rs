use crate::entity::handle::Entity;
use crate::math::{Scalar, Vec3};

pub const MAX_CONTACT_POINTS: usize = 4;

/// Persistent contact record between two bodies. The manifold entity owns
/// the graph edge between its bodies; the points are separate entities so
/// their creation and destruction flow through deltas individually.
#[derive(Clone, Debug, PartialEq)]
pub struct ContactManifold {
    pub body: [Entity; 2],
    /// When the bodies' AABBs separate further than this, the manifold is
    /// destroyed.
    pub separation_threshold: Scalar,
    pub points: Vec<Entity>,
}

impl ContactManifold {
    pub fn new(body: [Entity; 2], separation_threshold: Scalar) -> Self {
        Self {
            body,
            separation_threshold,
            points: Vec::new(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.points.len() >= MAX_CONTACT_POINTS
    }
}

/// One persistent contact point. Pivots are in object space of the
/// respective body, the normal is in world space pointing from body 1
/// towards body 0.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContactPoint {
    pub body: [Entity; 2],
    pub pivot: [Vec3; 2],
    pub normal: Vec3,
    /// Signed separation along the normal, negative when penetrating.
    pub distance: Scalar,
    pub friction: Scalar,
    pub restitution: Scalar,
    /// Feature identifiers used to match result points against persistent
    /// points across steps.
    pub feature: [u32; 2],
    /// Steps this point has persisted.
    pub lifetime: u32,
    pub normal_impulse: Scalar,
    pub friction_impulse: [Scalar; 2],
}

/// Marker making a contact point entity a constraint of the contact kind,
/// solved last in the constraint ordering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContactConstraint;
