pub use glam::{Mat3, Quat, Vec3};

/// Simulation scalar. Timestamps use f64, spatial quantities f32.
pub type Scalar = f32;

pub const PI: Scalar = std::f32::consts::PI;

/// Integrate an orientation by an angular velocity over `dt` seconds.
pub fn integrate_orientation(orn: Quat, angvel: Vec3, dt: Scalar) -> Quat {
    let speed = angvel.length();
    if speed < 1e-9 {
        return orn;
    }
    let axis = angvel / speed;
    (Quat::from_axis_angle(axis, speed * dt) * orn).normalize()
}

/// Transform a point in body space (relative to the center of mass) into
/// world space.
pub fn to_world_space(point: Vec3, pos: Vec3, orn: Quat) -> Vec3 {
    pos + orn * point
}

/// Inverse of `to_world_space`.
pub fn to_object_space(point: Vec3, pos: Vec3, orn: Quat) -> Vec3 {
    orn.conjugate() * (point - pos)
}

// Aabb
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_center_extents(center: Vec3, half_extents: Vec3) -> Self {
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn inflated(&self, amount: Scalar) -> Self {
        let d = Vec3::splat(amount);
        Self {
            min: self.min - d,
            max: self.max + d,
        }
    }

    pub fn merged(&self, other: &Aabb) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    pub fn contains(&self, other: &Aabb) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && self.min.z <= other.min.z
            && self.max.x >= other.max.x
            && self.max.y >= other.max.y
            && self.max.z >= other.max.z
    }

    pub fn surface_area(&self) -> Scalar {
        let d = (self.max - self.min).max(Vec3::ZERO);
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }
}
