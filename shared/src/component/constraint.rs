use crate::entity::handle::Entity;
use crate::math::{Scalar, Vec3};

/// Pins a point of one body to a point of another (3 rows).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointConstraint {
    pub body: [Entity; 2],
    pub pivot: [Vec3; 2],
    pub impulse: [Scalar; 3],
}

impl PointConstraint {
    pub fn new(body: [Entity; 2], pivot: [Vec3; 2]) -> Self {
        Self {
            body,
            pivot,
            impulse: [0.0; 3],
        }
    }
}

/// Keeps two pivots at a fixed distance (1 row, equality).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DistanceConstraint {
    pub body: [Entity; 2],
    pub pivot: [Vec3; 2],
    pub distance: Scalar,
    pub impulse: Scalar,
}

impl DistanceConstraint {
    pub fn new(body: [Entity; 2], pivot: [Vec3; 2], distance: Scalar) -> Self {
        Self {
            body,
            pivot,
            distance,
            impulse: 0.0,
        }
    }
}

/// Spring-damper between two pivots (1 softened row).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SoftDistanceConstraint {
    pub body: [Entity; 2],
    pub pivot: [Vec3; 2],
    pub distance: Scalar,
    pub stiffness: Scalar,
    pub damping: Scalar,
    pub impulse: Scalar,
}

/// Point constraint plus two angular rows restricting rotation to one axis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HingeConstraint {
    pub body: [Entity; 2],
    pub pivot: [Vec3; 2],
    /// Hinge axis in object space of each body.
    pub axis: [Vec3; 2],
    pub impulse: [Scalar; 5],
}

impl HingeConstraint {
    pub fn new(body: [Entity; 2], pivot: [Vec3; 2], axis: [Vec3; 2]) -> Self {
        Self {
            body,
            pivot,
            axis,
            impulse: [0.0; 5],
        }
    }
}
