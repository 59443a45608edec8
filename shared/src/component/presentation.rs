use crate::math::{Quat, Vec3};

/// Render-facing position, extrapolated from the authoritative state by the
/// coordinator on every update. Coordinator-local.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PresentPosition(pub Vec3);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PresentOrientation(pub Quat);

/// Offsets applied on top of the presentation transform after a state
/// discontinuity (e.g. a networked rollback), decayed by the host.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Discontinuity {
    pub position_offset: Vec3,
    pub orientation_offset: Quat,
}

impl Default for Discontinuity {
    fn default() -> Self {
        Self {
            position_offset: Vec3::ZERO,
            orientation_offset: Quat::IDENTITY,
        }
    }
}
