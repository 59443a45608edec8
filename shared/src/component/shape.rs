use std::sync::Arc;

use crate::math::{Aabb, Quat, Scalar, Vec3};

/// Convex point cloud. Collision and AABB computation only need the
/// vertices; face topology is the concern of the collision backend.
#[derive(Debug, PartialEq)]
pub struct ConvexMesh {
    pub vertices: Vec<Vec3>,
}

#[derive(Debug, PartialEq)]
pub struct TriangleMesh {
    pub vertices: Vec<Vec3>,
    pub indices: Vec<[u32; 3]>,
}

/// A triangle mesh split into independently loadable pages.
#[derive(Debug, PartialEq)]
pub struct PagedTriangleMesh {
    pub pages: Vec<TriangleMesh>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompoundNode {
    pub position: Vec3,
    pub orientation: Quat,
    pub shape: Shape,
}

/// Collision geometry of a body. Heavy variants share their mesh data so a
/// shape can be cloned into deltas cheaply.
#[derive(Clone, Debug, PartialEq)]
pub enum Shape {
    Sphere { radius: Scalar },
    Box { half_extents: Vec3 },
    Capsule { radius: Scalar, half_length: Scalar },
    Cylinder { radius: Scalar, half_length: Scalar },
    Polyhedron { mesh: Arc<ConvexMesh> },
    Compound { nodes: Arc<Vec<CompoundNode>> },
    TriangleMesh { mesh: Arc<TriangleMesh> },
    PagedTriangleMesh { mesh: Arc<PagedTriangleMesh> },
    Plane { normal: Vec3, constant: Scalar },
}

const PLANE_EXTENT: Scalar = 1e6;

impl Shape {
    /// World-space AABB of the shape at the given pose.
    pub fn aabb(&self, pos: Vec3, orn: Quat) -> Aabb {
        match self {
            Shape::Sphere { radius } => {
                Aabb::from_center_extents(pos, Vec3::splat(*radius))
            }
            Shape::Box { half_extents } => {
                // Extents of the rotated box along the world axes.
                let basis = glam::Mat3::from_quat(orn);
                let extent = Vec3::new(
                    basis.row(0).abs().dot(*half_extents),
                    basis.row(1).abs().dot(*half_extents),
                    basis.row(2).abs().dot(*half_extents),
                );
                Aabb::from_center_extents(pos, extent)
            }
            Shape::Capsule {
                radius,
                half_length,
            } => {
                let axis = orn * Vec3::new(*half_length, 0.0, 0.0);
                let p0 = pos - axis;
                let p1 = pos + axis;
                Aabb::new(
                    p0.min(p1) - Vec3::splat(*radius),
                    p0.max(p1) + Vec3::splat(*radius),
                )
            }
            Shape::Cylinder {
                radius,
                half_length,
            } => {
                // Conservative: bounding sphere of the cylinder.
                let r = (radius * radius + half_length * half_length).sqrt();
                Aabb::from_center_extents(pos, Vec3::splat(r))
            }
            Shape::Polyhedron { mesh } => aabb_of_points(&mesh.vertices, pos, orn),
            Shape::Compound { nodes } => {
                let mut result: Option<Aabb> = None;
                for node in nodes.iter() {
                    let child = node
                        .shape
                        .aabb(pos + orn * node.position, orn * node.orientation);
                    result = Some(match result {
                        Some(aabb) => aabb.merged(&child),
                        None => child,
                    });
                }
                result.unwrap_or_else(|| Aabb::from_center_extents(pos, Vec3::ZERO))
            }
            Shape::TriangleMesh { mesh } => aabb_of_points(&mesh.vertices, pos, orn),
            Shape::PagedTriangleMesh { mesh } => {
                let mut result: Option<Aabb> = None;
                for page in &mesh.pages {
                    let page_aabb = aabb_of_points(&page.vertices, pos, orn);
                    result = Some(match result {
                        Some(aabb) => aabb.merged(&page_aabb),
                        None => page_aabb,
                    });
                }
                result.unwrap_or_else(|| Aabb::from_center_extents(pos, Vec3::ZERO))
            }
            Shape::Plane { .. } => Aabb::from_center_extents(pos, Vec3::splat(PLANE_EXTENT)),
        }
    }

    /// Diagonal moment of inertia for the shape at unit orientation. Mesh
    /// family shapes use the inertia of their bounding box.
    pub fn moment_of_inertia(&self, mass: Scalar) -> Vec3 {
        match self {
            Shape::Sphere { radius } => {
                Vec3::splat(0.4 * mass * radius * radius)
            }
            Shape::Box { half_extents } => {
                let d = *half_extents * 2.0;
                Vec3::new(
                    mass / 12.0 * (d.y * d.y + d.z * d.z),
                    mass / 12.0 * (d.x * d.x + d.z * d.z),
                    mass / 12.0 * (d.x * d.x + d.y * d.y),
                )
            }
            Shape::Capsule {
                radius,
                half_length,
            } => {
                // Cylinder plus two hemispheres, axis along x.
                let r = *radius;
                let h = *half_length * 2.0;
                let cylinder_volume = std::f32::consts::PI * r * r * h;
                let sphere_volume = 4.0 / 3.0 * std::f32::consts::PI * r * r * r;
                let total = cylinder_volume + sphere_volume;
                let m_cyl = mass * cylinder_volume / total;
                let m_sph = mass * sphere_volume / total;
                let axial = m_cyl * r * r / 2.0 + m_sph * 0.4 * r * r;
                let lateral = m_cyl * (3.0 * r * r + h * h) / 12.0
                    + m_sph * (0.4 * r * r + half_length * half_length);
                Vec3::new(axial, lateral, lateral)
            }
            Shape::Cylinder {
                radius,
                half_length,
            } => {
                let r = *radius;
                let h = *half_length * 2.0;
                let axial = mass * r * r / 2.0;
                let lateral = mass * (3.0 * r * r + h * h) / 12.0;
                Vec3::new(axial, lateral, lateral)
            }
            Shape::Polyhedron { .. }
            | Shape::Compound { .. }
            | Shape::TriangleMesh { .. }
            | Shape::PagedTriangleMesh { .. } => {
                let aabb = self.aabb(Vec3::ZERO, Quat::IDENTITY);
                let half = (aabb.max - aabb.min) * 0.5;
                Shape::Box { half_extents: half }.moment_of_inertia(mass)
            }
            Shape::Plane { .. } => Vec3::ZERO,
        }
    }
}

fn aabb_of_points(points: &[Vec3], pos: Vec3, orn: Quat) -> Aabb {
    let mut min = Vec3::splat(Scalar::MAX);
    let mut max = Vec3::splat(Scalar::MIN);
    for p in points {
        let world = pos + orn * *p;
        min = min.min(world);
        max = max.max(world);
    }
    if points.is_empty() {
        min = pos;
        max = pos;
    }
    Aabb::new(min, max)
}

/// World-oriented vertex cache for polyhedron and compound shapes, rebuilt
/// whenever the orientation changes. One entry per polyhedron in the shape.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RotatedMeshList {
    pub meshes: Vec<RotatedMesh>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RotatedMesh {
    pub vertices: Vec<Vec3>,
}

impl RotatedMeshList {
    pub fn rebuild(shape: &Shape, orn: Quat) -> Self {
        let mut meshes = Vec::new();
        collect_rotated(shape, orn, &mut meshes);
        Self { meshes }
    }
}

fn collect_rotated(shape: &Shape, orn: Quat, out: &mut Vec<RotatedMesh>) {
    match shape {
        Shape::Polyhedron { mesh } => {
            out.push(RotatedMesh {
                vertices: mesh.vertices.iter().map(|v| orn * *v).collect(),
            });
        }
        Shape::Compound { nodes } => {
            for node in nodes.iter() {
                collect_rotated(&node.shape, orn * node.orientation, out);
            }
        }
        _ => {}
    }
}
