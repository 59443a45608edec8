use atoll_shared::math::{Quat, Scalar, Vec3};
use atoll_shared::{to_object_space, Shape, CONTACT_BREAKING_THRESHOLD};

use log::debug;

pub const MAX_RESULT_POINTS: usize = 4;

/// One candidate contact produced by a collision routine. Pivots are in
/// object space of the respective body; the normal is in world space and
/// points from body B towards body A.
#[derive(Clone, Copy, Debug)]
pub struct ResultPoint {
    pub pivot_a: Vec3,
    pub pivot_b: Vec3,
    pub normal: Vec3,
    pub distance: Scalar,
    pub feature_a: u32,
    pub feature_b: u32,
}

#[derive(Clone, Debug, Default)]
pub struct CollisionResult {
    points: Vec<ResultPoint>,
}

impl CollisionResult {
    /// Adds a point, capped at four per manifold. Points co-located with an
    /// existing one (within the breaking threshold) merge, keeping the
    /// deeper of the two; when the result is full the shallowest point is
    /// replaced if the candidate is deeper.
    pub fn maybe_add_point(&mut self, point: ResultPoint) {
        for existing in &mut self.points {
            if (existing.pivot_a - point.pivot_a).length() < CONTACT_BREAKING_THRESHOLD {
                if point.distance < existing.distance {
                    *existing = point;
                }
                return;
            }
        }
        if self.points.len() < MAX_RESULT_POINTS {
            self.points.push(point);
            return;
        }
        let (shallowest, _) = self
            .points
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.distance.total_cmp(&b.distance))
            .expect("result is full");
        if point.distance < self.points[shallowest].distance {
            self.points[shallowest] = point;
        }
    }

    pub fn points(&self) -> &[ResultPoint] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Pose of one body as seen by the collision routines.
#[derive(Clone, Copy, Debug)]
pub struct CollisionContext {
    pub pos_a: Vec3,
    pub orn_a: Quat,
    pub pos_b: Vec3,
    pub orn_b: Quat,
    /// Points further apart than this are not reported.
    pub threshold: Scalar,
}

/// Closest-feature collision between two shapes. The mesh-family pairs are
/// the domain of the external collision backend; for them this returns no
/// points.
pub fn collide(shape_a: &Shape, shape_b: &Shape, ctx: &CollisionContext) -> CollisionResult {
    match (shape_a, shape_b) {
        (Shape::Sphere { radius: ra }, Shape::Sphere { radius: rb }) => {
            collide_sphere_sphere(*ra, *rb, ctx)
        }
        (Shape::Sphere { radius }, Shape::Plane { normal, constant }) => {
            collide_sphere_plane(*radius, *normal, *constant, ctx)
        }
        (Shape::Plane { .. }, Shape::Sphere { .. }) => swapped(shape_b, shape_a, ctx),
        (Shape::Box { half_extents }, Shape::Plane { normal, constant }) => {
            collide_box_plane(*half_extents, *normal, *constant, ctx)
        }
        (Shape::Plane { .. }, Shape::Box { .. }) => swapped(shape_b, shape_a, ctx),
        (Shape::Sphere { radius }, Shape::Box { half_extents }) => {
            collide_sphere_box(*radius, *half_extents, ctx)
        }
        (Shape::Box { .. }, Shape::Sphere { .. }) => swapped(shape_b, shape_a, ctx),
        _ => {
            debug!(
                "No collision routine for shape pair ({:?}, {:?})",
                discriminant_name(shape_a),
                discriminant_name(shape_b)
            );
            CollisionResult::default()
        }
    }
}

fn swapped(shape_a: &Shape, shape_b: &Shape, ctx: &CollisionContext) -> CollisionResult {
    let swapped_ctx = CollisionContext {
        pos_a: ctx.pos_b,
        orn_a: ctx.orn_b,
        pos_b: ctx.pos_a,
        orn_b: ctx.orn_a,
        threshold: ctx.threshold,
    };
    let result = collide(shape_a, shape_b, &swapped_ctx);
    let mut out = CollisionResult::default();
    for point in result.points() {
        out.maybe_add_point(ResultPoint {
            pivot_a: point.pivot_b,
            pivot_b: point.pivot_a,
            normal: -point.normal,
            distance: point.distance,
            feature_a: point.feature_b,
            feature_b: point.feature_a,
        });
    }
    out
}

fn collide_sphere_sphere(ra: Scalar, rb: Scalar, ctx: &CollisionContext) -> CollisionResult {
    let mut result = CollisionResult::default();
    let d = ctx.pos_a - ctx.pos_b;
    let center_distance = d.length();
    let distance = center_distance - ra - rb;
    if distance > ctx.threshold {
        return result;
    }
    let normal = if center_distance > 1e-6 {
        d / center_distance
    } else {
        Vec3::X
    };
    let point_a = ctx.pos_a - normal * ra;
    let point_b = ctx.pos_b + normal * rb;
    result.maybe_add_point(ResultPoint {
        pivot_a: to_object_space(point_a, ctx.pos_a, ctx.orn_a),
        pivot_b: to_object_space(point_b, ctx.pos_b, ctx.orn_b),
        normal,
        distance,
        feature_a: 0,
        feature_b: 0,
    });
    result
}

fn collide_sphere_plane(
    radius: Scalar,
    plane_normal: Vec3,
    constant: Scalar,
    ctx: &CollisionContext,
) -> CollisionResult {
    let mut result = CollisionResult::default();
    let normal = ctx.orn_b * plane_normal;
    let distance = (ctx.pos_a - ctx.pos_b).dot(normal) - constant - radius;
    if distance > ctx.threshold {
        return result;
    }
    let point_a = ctx.pos_a - normal * radius;
    let point_b = point_a - normal * distance;
    result.maybe_add_point(ResultPoint {
        pivot_a: to_object_space(point_a, ctx.pos_a, ctx.orn_a),
        pivot_b: to_object_space(point_b, ctx.pos_b, ctx.orn_b),
        normal,
        distance,
        feature_a: 0,
        feature_b: 0,
    });
    result
}

fn collide_box_plane(
    half_extents: Vec3,
    plane_normal: Vec3,
    constant: Scalar,
    ctx: &CollisionContext,
) -> CollisionResult {
    let mut result = CollisionResult::default();
    let normal = ctx.orn_b * plane_normal;
    for corner_index in 0..8u32 {
        let corner = Vec3::new(
            if corner_index & 1 != 0 { 1.0 } else { -1.0 } * half_extents.x,
            if corner_index & 2 != 0 { 1.0 } else { -1.0 } * half_extents.y,
            if corner_index & 4 != 0 { 1.0 } else { -1.0 } * half_extents.z,
        );
        let world = ctx.pos_a + ctx.orn_a * corner;
        let distance = (world - ctx.pos_b).dot(normal) - constant;
        if distance > ctx.threshold {
            continue;
        }
        let point_b = world - normal * distance;
        result.maybe_add_point(ResultPoint {
            pivot_a: corner,
            pivot_b: to_object_space(point_b, ctx.pos_b, ctx.orn_b),
            normal,
            distance,
            feature_a: corner_index,
            feature_b: 0,
        });
    }
    result
}

fn collide_sphere_box(radius: Scalar, half_extents: Vec3, ctx: &CollisionContext) -> CollisionResult {
    let mut result = CollisionResult::default();
    // Sphere center in the box's object space.
    let center = to_object_space(ctx.pos_a, ctx.pos_b, ctx.orn_b);
    let closest = center.clamp(-half_extents, half_extents);
    let offset = center - closest;
    let outside = offset.length();

    let (normal_obj, distance, point_obj) = if outside > 1e-6 {
        (offset / outside, outside - radius, closest)
    } else {
        // Center inside the box: push out along the axis of least
        // penetration.
        let depths = half_extents - center.abs();
        let (axis, sign) = if depths.x <= depths.y && depths.x <= depths.z {
            (Vec3::X, center.x.signum())
        } else if depths.y <= depths.z {
            (Vec3::Y, center.y.signum())
        } else {
            (Vec3::Z, center.z.signum())
        };
        let n = axis * sign;
        let depth = depths.min_element();
        (n, -(depth + radius), center + n * depth)
    };

    if distance > ctx.threshold {
        return result;
    }
    let normal = ctx.orn_b * normal_obj;
    let point_a = ctx.pos_a - normal * radius;
    result.maybe_add_point(ResultPoint {
        pivot_a: to_object_space(point_a, ctx.pos_a, ctx.orn_a),
        pivot_b: point_obj,
        normal,
        distance,
        feature_a: 0,
        feature_b: 0,
    });
    result
}

fn discriminant_name(shape: &Shape) -> &'static str {
    match shape {
        Shape::Sphere { .. } => "sphere",
        Shape::Box { .. } => "box",
        Shape::Capsule { .. } => "capsule",
        Shape::Cylinder { .. } => "cylinder",
        Shape::Polyhedron { .. } => "polyhedron",
        Shape::Compound { .. } => "compound",
        Shape::TriangleMesh { .. } => "triangle-mesh",
        Shape::PagedTriangleMesh { .. } => "paged-triangle-mesh",
        Shape::Plane { .. } => "plane",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pos_a: Vec3, pos_b: Vec3) -> CollisionContext {
        CollisionContext {
            pos_a,
            orn_a: Quat::IDENTITY,
            pos_b,
            orn_b: Quat::IDENTITY,
            threshold: CONTACT_BREAKING_THRESHOLD,
        }
    }

    #[test]
    fn touching_spheres_produce_one_point() {
        let a = Shape::Sphere { radius: 0.5 };
        let b = Shape::Sphere { radius: 0.5 };
        let result = collide(&a, &b, &ctx(Vec3::new(-0.5, 0.0, 0.0), Vec3::new(0.5, 0.0, 0.0)));
        assert_eq!(result.points().len(), 1);
        let point = result.points()[0];
        assert!((point.distance).abs() < 1e-6);
        assert!((point.normal + Vec3::X).length() < 1e-6, "normal points B to A");
    }

    #[test]
    fn separated_spheres_produce_nothing() {
        let a = Shape::Sphere { radius: 0.5 };
        let b = Shape::Sphere { radius: 0.5 };
        let result = collide(&a, &b, &ctx(Vec3::new(-2.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0)));
        assert!(result.is_empty());
    }

    #[test]
    fn box_resting_on_plane_has_four_points() {
        let a = Shape::Box {
            half_extents: Vec3::splat(0.5),
        };
        let b = Shape::Plane {
            normal: Vec3::Y,
            constant: 0.0,
        };
        let result = collide(&a, &b, &ctx(Vec3::new(0.0, 0.5, 0.0), Vec3::ZERO));
        assert_eq!(result.points().len(), 4);
        for point in result.points() {
            assert!(point.distance.abs() < 1e-5);
            assert!((point.normal - Vec3::Y).length() < 1e-6);
        }
    }

    #[test]
    fn plane_sphere_pair_is_swapped_consistently() {
        let plane = Shape::Plane {
            normal: Vec3::Y,
            constant: 0.0,
        };
        let sphere = Shape::Sphere { radius: 0.5 };
        let result = collide(&plane, &sphere, &ctx(Vec3::ZERO, Vec3::new(0.0, 0.4, 0.0)));
        assert_eq!(result.points().len(), 1);
        let point = result.points()[0];
        assert!(point.distance < 0.0, "penetrating");
        assert!(
            (point.normal + Vec3::Y).length() < 1e-6,
            "normal points from sphere (B) towards plane (A)"
        );
    }

    #[test]
    fn result_caps_at_four_points_keeping_deepest() {
        let mut result = CollisionResult::default();
        for i in 0..5 {
            result.maybe_add_point(ResultPoint {
                pivot_a: Vec3::new(i as Scalar, 0.0, 0.0),
                pivot_b: Vec3::ZERO,
                normal: Vec3::Y,
                distance: -(i as Scalar),
                feature_a: i as u32,
                feature_b: 0,
            });
        }
        assert_eq!(result.points().len(), 4);
        assert!(
            result.points().iter().all(|p| p.distance <= -1.0),
            "shallowest point was replaced"
        );
    }
}
