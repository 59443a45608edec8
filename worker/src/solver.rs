use std::collections::BTreeMap;

use atoll_shared::math::{Mat3, Quat, Scalar, Vec3};
use atoll_shared::{
    integrate_orientation, AngVel, ComponentKind, ContactPoint, DistanceConstraint, DynamicTag,
    Entity, HingeConstraint, Inertial, LinAcc, LinVel, Orientation, Origin, PointConstraint,
    Position, RotatedMeshList, Settings, Shape, SoftDistanceConstraint, Store, WorldAabb,
    CONSTRAINT_SOLVE_ORDER,
};

/// Positional error feedback factor.
const BAUMGARTE: Scalar = 0.2;
/// Penetration allowed before position correction kicks in.
const PENETRATION_SLOP: Scalar = 0.005;
/// Closing speed below which restitution is ignored.
const RESTITUTION_THRESHOLD: Scalar = 0.5;

/// One velocity constraint row. `j` holds the jacobian blocks for
/// (linvel A, angvel A, linvel B, angvel B).
pub struct ConstraintRow {
    pub body: [Entity; 2],
    pub j: [Vec3; 4],
    pub eff_mass: Scalar,
    pub rhs: Scalar,
    pub lower_limit: Scalar,
    pub upper_limit: Scalar,
    pub impulse: Scalar,
    /// Softening term added to the effective-mass denominator and fed back
    /// from the accumulated impulse (soft constraints only).
    pub gamma: Scalar,
    /// For friction rows: the row index of the owning normal row and the
    /// friction coefficient; limits are refreshed from the normal impulse
    /// every iteration.
    pub friction_of: Option<(usize, Scalar)>,
}

struct BodyState {
    inv_mass: Scalar,
    inv_inertia_world: Mat3,
    pos: Vec3,
    orn: Quat,
    linvel: Vec3,
    angvel: Vec3,
    delta_linvel: Vec3,
    delta_angvel: Vec3,
    dynamic: bool,
}

/// Range of rows produced by one constraint entity, used to copy applied
/// impulses back into the component after solving.
struct RowRange {
    entity: Entity,
    kind: ComponentKind,
    start: usize,
    count: usize,
}

/// Sequential-impulse velocity solver plus the integration that follows it.
/// Constraint kinds are prepared and iterated in the fixed solve order,
/// contacts last; rows accumulate clamped impulses across iterations.
pub struct Solver {
    rows: Vec<ConstraintRow>,
    ranges: Vec<RowRange>,
}

impl Solver {
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            ranges: Vec::new(),
        }
    }

    pub fn update(&mut self, store: &mut Store, settings: &Settings) {
        let dt = settings.fixed_dt;
        self.rows.clear();
        self.ranges.clear();

        // Apply accelerations before measuring relative velocities.
        integrate_linacc(store, dt);

        let mut bodies = load_bodies(store);
        self.prepare(store, &mut bodies, dt);

        for _ in 0..settings.num_solver_iterations {
            for index in 0..self.rows.len() {
                if let Some((normal_index, friction)) = self.rows[index].friction_of {
                    let limit = friction * self.rows[normal_index].impulse.abs();
                    self.rows[index].lower_limit = -limit;
                    self.rows[index].upper_limit = limit;
                }
                let row = &mut self.rows[index];
                let delta_impulse = solve_row(row, &bodies);
                apply_impulse(row, delta_impulse, &mut bodies);
            }
        }

        // Velocity correction, then impulses back into components.
        for (entity, body) in bodies.iter_mut() {
            if !body.dynamic {
                continue;
            }
            body.linvel += body.delta_linvel;
            body.angvel += body.delta_angvel;
            body.delta_linvel = Vec3::ZERO;
            body.delta_angvel = Vec3::ZERO;
            store.replace(*entity, LinVel(body.linvel));
            store.replace(*entity, AngVel(body.angvel));
        }
        self.store_impulses(store);

        integrate_velocities(store, dt);
        update_origins(store);
        update_aabbs(store);
        update_rotated_meshes(store);
        update_inertias(store);
    }

    fn prepare(&mut self, store: &Store, bodies: &mut BTreeMap<Entity, BodyState>, dt: Scalar) {
        for kind in CONSTRAINT_SOLVE_ORDER {
            for entity in store.kind_entities(*kind) {
                let start = self.rows.len();
                match kind {
                    ComponentKind::PointConstraint => {
                        self.prepare_point(store.expect::<PointConstraint>(entity), bodies, dt);
                    }
                    ComponentKind::DistanceConstraint => {
                        self.prepare_distance(
                            store.expect::<DistanceConstraint>(entity),
                            bodies,
                            dt,
                        );
                    }
                    ComponentKind::SoftDistanceConstraint => {
                        self.prepare_soft_distance(
                            store.expect::<SoftDistanceConstraint>(entity),
                            bodies,
                            dt,
                        );
                    }
                    ComponentKind::HingeConstraint => {
                        self.prepare_hinge(store.expect::<HingeConstraint>(entity), bodies, dt);
                    }
                    ComponentKind::ContactConstraint => {
                        self.prepare_contact(store.expect::<ContactPoint>(entity), bodies, dt);
                    }
                    _ => unreachable!("not a constraint kind"),
                }
                self.ranges.push(RowRange {
                    entity,
                    kind: *kind,
                    start,
                    count: self.rows.len() - start,
                });
            }
        }
    }

    fn push_row(
        &mut self,
        body: [Entity; 2],
        j: [Vec3; 4],
        rhs: Scalar,
        limits: (Scalar, Scalar),
        gamma: Scalar,
        warm_impulse: Scalar,
        bodies: &BTreeMap<Entity, BodyState>,
    ) -> usize {
        let a = &bodies[&body[0]];
        let b = &bodies[&body[1]];
        let denom = a.inv_mass * j[0].length_squared()
            + j[1].dot(a.inv_inertia_world * j[1])
            + b.inv_mass * j[2].length_squared()
            + j[3].dot(b.inv_inertia_world * j[3]);
        let eff_mass = if denom + gamma > 1e-9 {
            1.0 / (denom + gamma)
        } else {
            0.0
        };
        self.rows.push(ConstraintRow {
            body,
            j,
            eff_mass,
            rhs,
            lower_limit: limits.0,
            upper_limit: limits.1,
            impulse: warm_impulse,
            gamma,
            friction_of: None,
        });
        self.rows.len() - 1
    }

    fn prepare_point(
        &mut self,
        con: &PointConstraint,
        bodies: &mut BTreeMap<Entity, BodyState>,
        dt: Scalar,
    ) {
        let (ra, rb, error) = anchor_frames(con.body, con.pivot, bodies);
        for (axis_index, axis) in [Vec3::X, Vec3::Y, Vec3::Z].iter().enumerate() {
            let j = [*axis, ra.cross(*axis), -*axis, -rb.cross(*axis)];
            let relvel = row_relvel(&j, con.body, bodies);
            let rhs = -relvel - BAUMGARTE / dt * error.dot(*axis);
            self.push_row(
                con.body,
                j,
                rhs,
                (Scalar::NEG_INFINITY, Scalar::INFINITY),
                0.0,
                con.impulse[axis_index],
                bodies,
            );
        }
    }

    fn prepare_distance(
        &mut self,
        con: &DistanceConstraint,
        bodies: &mut BTreeMap<Entity, BodyState>,
        dt: Scalar,
    ) {
        let (ra, rb, separation) = anchor_frames(con.body, con.pivot, bodies);
        let length = separation.length();
        let axis = if length > 1e-6 {
            separation / length
        } else {
            Vec3::X
        };
        let error = length - con.distance;
        let j = [axis, ra.cross(axis), -axis, -rb.cross(axis)];
        let relvel = row_relvel(&j, con.body, bodies);
        let rhs = -relvel - BAUMGARTE / dt * error;
        self.push_row(
            con.body,
            j,
            rhs,
            (Scalar::NEG_INFINITY, Scalar::INFINITY),
            0.0,
            con.impulse,
            bodies,
        );
    }

    fn prepare_soft_distance(
        &mut self,
        con: &SoftDistanceConstraint,
        bodies: &mut BTreeMap<Entity, BodyState>,
        dt: Scalar,
    ) {
        let (ra, rb, separation) = anchor_frames(con.body, con.pivot, bodies);
        let length = separation.length();
        let axis = if length > 1e-6 {
            separation / length
        } else {
            Vec3::X
        };
        let error = length - con.distance;
        // Standard soft-constraint parameters.
        let hk = dt * con.stiffness;
        let denom = con.damping + hk;
        let (gamma, bias) = if denom > 1e-9 {
            (1.0 / (dt * denom), hk / (denom * dt))
        } else {
            (0.0, BAUMGARTE / dt)
        };
        let j = [axis, ra.cross(axis), -axis, -rb.cross(axis)];
        let relvel = row_relvel(&j, con.body, bodies);
        let rhs = -relvel - bias * error;
        self.push_row(
            con.body,
            j,
            rhs,
            (Scalar::NEG_INFINITY, Scalar::INFINITY),
            gamma,
            con.impulse,
            bodies,
        );
    }

    fn prepare_hinge(
        &mut self,
        con: &HingeConstraint,
        bodies: &mut BTreeMap<Entity, BodyState>,
        dt: Scalar,
    ) {
        let (ra, rb, error) = anchor_frames(con.body, con.pivot, bodies);
        for (axis_index, axis) in [Vec3::X, Vec3::Y, Vec3::Z].iter().enumerate() {
            let j = [*axis, ra.cross(*axis), -*axis, -rb.cross(*axis)];
            let relvel = row_relvel(&j, con.body, bodies);
            let rhs = -relvel - BAUMGARTE / dt * error.dot(*axis);
            self.push_row(
                con.body,
                j,
                rhs,
                (Scalar::NEG_INFINITY, Scalar::INFINITY),
                0.0,
                con.impulse[axis_index],
                bodies,
            );
        }

        // Two angular rows keep the hinge axes aligned.
        let axis_a = bodies[&con.body[0]].orn * con.axis[0];
        let axis_b = bodies[&con.body[1]].orn * con.axis[1];
        let (b_axis, c_axis) = orthonormal_basis(axis_a);
        let misalignment = axis_b.cross(axis_a);
        for (row_index, axis) in [b_axis, c_axis].iter().enumerate() {
            let j = [Vec3::ZERO, *axis, Vec3::ZERO, -*axis];
            let relvel = row_relvel(&j, con.body, bodies);
            let rhs = -relvel - BAUMGARTE / dt * misalignment.dot(*axis);
            self.push_row(
                con.body,
                j,
                rhs,
                (Scalar::NEG_INFINITY, Scalar::INFINITY),
                0.0,
                con.impulse[3 + row_index],
                bodies,
            );
        }
    }

    fn prepare_contact(
        &mut self,
        point: &ContactPoint,
        bodies: &mut BTreeMap<Entity, BodyState>,
        dt: Scalar,
    ) {
        let a = &bodies[&point.body[0]];
        let b = &bodies[&point.body[1]];
        let ra = a.orn * point.pivot[0];
        let rb = b.orn * point.pivot[1];
        let normal = point.normal;

        let j = [normal, ra.cross(normal), -normal, -rb.cross(normal)];
        let relvel = row_relvel(&j, point.body, bodies);

        let bounce = if point.restitution > 0.0 && relvel < -RESTITUTION_THRESHOLD {
            -point.restitution * relvel
        } else {
            0.0
        };
        let bias = BAUMGARTE / dt * (-point.distance - PENETRATION_SLOP).max(0.0);
        let rhs = -relvel + bounce.max(bias);
        let normal_row = self.push_row(
            point.body,
            j,
            rhs,
            (0.0, Scalar::INFINITY),
            0.0,
            point.normal_impulse,
            bodies,
        );

        if point.friction > 0.0 {
            let (t0, t1) = orthonormal_basis(normal);
            for (tangent_index, tangent) in [t0, t1].iter().enumerate() {
                let j = [
                    *tangent,
                    ra.cross(*tangent),
                    -*tangent,
                    -rb.cross(*tangent),
                ];
                let relvel = row_relvel(&j, point.body, bodies);
                let row_index = self.push_row(
                    point.body,
                    j,
                    -relvel,
                    (0.0, 0.0),
                    0.0,
                    point.friction_impulse[tangent_index],
                    bodies,
                );
                self.rows[row_index].friction_of = Some((normal_row, point.friction));
            }
        }
    }

    fn store_impulses(&self, store: &mut Store) {
        for range in &self.ranges {
            if !store.is_alive(range.entity) {
                continue;
            }
            let impulses: Vec<Scalar> = self.rows[range.start..range.start + range.count]
                .iter()
                .map(|row| row.impulse)
                .collect();
            match range.kind {
                ComponentKind::PointConstraint => {
                    let con = store.get_mut::<PointConstraint>(range.entity).expect("con");
                    for (i, impulse) in impulses.iter().take(3).enumerate() {
                        con.impulse[i] = *impulse;
                    }
                }
                ComponentKind::DistanceConstraint => {
                    let con = store
                        .get_mut::<DistanceConstraint>(range.entity)
                        .expect("con");
                    con.impulse = impulses[0];
                }
                ComponentKind::SoftDistanceConstraint => {
                    let con = store
                        .get_mut::<SoftDistanceConstraint>(range.entity)
                        .expect("con");
                    con.impulse = impulses[0];
                }
                ComponentKind::HingeConstraint => {
                    let con = store.get_mut::<HingeConstraint>(range.entity).expect("con");
                    for (i, impulse) in impulses.iter().take(5).enumerate() {
                        con.impulse[i] = *impulse;
                    }
                }
                ComponentKind::ContactConstraint => {
                    let point = store.get_mut::<ContactPoint>(range.entity).expect("point");
                    point.normal_impulse = impulses[0];
                    for (i, impulse) in impulses.iter().skip(1).take(2).enumerate() {
                        point.friction_impulse[i] = *impulse;
                    }
                }
                _ => unreachable!("not a constraint kind"),
            }
        }
    }
}

impl Default for Solver {
    fn default() -> Self {
        Self::new()
    }
}

fn load_bodies(store: &Store) -> BTreeMap<Entity, BodyState> {
    let mut bodies = BTreeMap::new();
    store.each::<Inertial>(|entity, inertial| {
        bodies.insert(
            entity,
            BodyState {
                inv_mass: inertial.inv_mass,
                inv_inertia_world: inertial.inv_inertia_world,
                pos: store.expect::<Position>(entity).0,
                orn: store.expect::<Orientation>(entity).0,
                linvel: store.get::<LinVel>(entity).map(|v| v.0).unwrap_or(Vec3::ZERO),
                angvel: store.get::<AngVel>(entity).map(|v| v.0).unwrap_or(Vec3::ZERO),
                delta_linvel: Vec3::ZERO,
                delta_angvel: Vec3::ZERO,
                dynamic: store.has::<DynamicTag>(entity),
            },
        );
    });
    bodies
}

/// World anchor arms and the world-space error vector between the pivots.
fn anchor_frames(
    body: [Entity; 2],
    pivot: [Vec3; 2],
    bodies: &BTreeMap<Entity, BodyState>,
) -> (Vec3, Vec3, Vec3) {
    let a = &bodies[&body[0]];
    let b = &bodies[&body[1]];
    let ra = a.orn * pivot[0];
    let rb = b.orn * pivot[1];
    let error = (a.pos + ra) - (b.pos + rb);
    (ra, rb, error)
}

fn row_relvel(j: &[Vec3; 4], body: [Entity; 2], bodies: &BTreeMap<Entity, BodyState>) -> Scalar {
    let a = &bodies[&body[0]];
    let b = &bodies[&body[1]];
    j[0].dot(a.linvel) + j[1].dot(a.angvel) + j[2].dot(b.linvel) + j[3].dot(b.angvel)
}

fn solve_row(row: &mut ConstraintRow, bodies: &BTreeMap<Entity, BodyState>) -> Scalar {
    let a = &bodies[&row.body[0]];
    let b = &bodies[&row.body[1]];
    let delta_relvel = row.j[0].dot(a.delta_linvel)
        + row.j[1].dot(a.delta_angvel)
        + row.j[2].dot(b.delta_linvel)
        + row.j[3].dot(b.delta_angvel);
    let mut delta_impulse =
        (row.rhs - delta_relvel - row.gamma * row.impulse) * row.eff_mass;
    let impulse = row.impulse + delta_impulse;

    if impulse < row.lower_limit {
        delta_impulse = row.lower_limit - row.impulse;
        row.impulse = row.lower_limit;
    } else if impulse > row.upper_limit {
        delta_impulse = row.upper_limit - row.impulse;
        row.impulse = row.upper_limit;
    } else {
        row.impulse = impulse;
    }
    delta_impulse
}

fn apply_impulse(
    row: &ConstraintRow,
    delta_impulse: Scalar,
    bodies: &mut BTreeMap<Entity, BodyState>,
) {
    {
        let a = bodies.get_mut(&row.body[0]).expect("body");
        if a.dynamic {
            a.delta_linvel += row.j[0] * (delta_impulse * a.inv_mass);
            a.delta_angvel += a.inv_inertia_world * (row.j[1] * delta_impulse);
        }
    }
    let b = bodies.get_mut(&row.body[1]).expect("body");
    if b.dynamic {
        b.delta_linvel += row.j[2] * (delta_impulse * b.inv_mass);
        b.delta_angvel += b.inv_inertia_world * (row.j[3] * delta_impulse);
    }
}

fn orthonormal_basis(normal: Vec3) -> (Vec3, Vec3) {
    let helper = if normal.x.abs() > 0.9 { Vec3::Y } else { Vec3::X };
    let t0 = normal.cross(helper).normalize();
    let t1 = normal.cross(t0);
    (t0, t1)
}

// Systems run around the solve: accelerations first, then velocities to
// transforms, then the derived fields.

pub fn integrate_linacc(store: &mut Store, dt: Scalar) {
    let entities = store
        .view()
        .with(ComponentKind::LinAcc)
        .with(ComponentKind::LinVel)
        .with(ComponentKind::Dynamic)
        .without(ComponentKind::Sleeping)
        .entities();
    for entity in entities {
        let acc = store.expect::<LinAcc>(entity).0;
        let vel = store.expect::<LinVel>(entity).0;
        store.replace(entity, LinVel(vel + acc * dt));
    }
}

pub fn integrate_velocities(store: &mut Store, dt: Scalar) {
    let entities = store
        .view()
        .with(ComponentKind::Procedural)
        .with(ComponentKind::Position)
        .without(ComponentKind::Sleeping)
        .entities();
    for entity in entities {
        if let Some(vel) = store.get::<LinVel>(entity).copied() {
            let pos = store.expect::<Position>(entity).0;
            store.replace(entity, Position(pos + vel.0 * dt));
        }
        if let Some(angvel) = store.get::<AngVel>(entity).copied() {
            let orn = store.expect::<Orientation>(entity).0;
            store.replace(
                entity,
                Orientation(integrate_orientation(orn, angvel.0, dt)),
            );
        }
    }
}

pub fn update_origins(store: &mut Store) {
    let entities = store.entities_with::<Origin>();
    for entity in entities {
        let inertial = store.expect::<Inertial>(entity);
        let com = inertial.com;
        let pos = store.expect::<Position>(entity).0;
        let orn = store.expect::<Orientation>(entity).0;
        store.replace(entity, Origin(pos + orn * -com));
    }
}

pub fn update_aabbs(store: &mut Store) {
    let entities = store
        .view()
        .with(ComponentKind::Shape)
        .with(ComponentKind::Aabb)
        .entities();
    for entity in entities {
        let pos = store.expect::<Position>(entity).0;
        let orn = store.expect::<Orientation>(entity).0;
        let aabb = store.expect::<Shape>(entity).aabb(pos, orn);
        store.replace(entity, WorldAabb(aabb));
    }
}

/// Recompute the AABB and dependent caches of one entity after its pose was
/// written from outside the solver (delta import of a user mutation).
pub fn refresh_derived(store: &mut Store, entity: Entity) {
    if store.has::<Origin>(entity) {
        let inertial = store.expect::<Inertial>(entity);
        let com = inertial.com;
        let pos = store.expect::<Position>(entity).0;
        let orn = store.expect::<Orientation>(entity).0;
        store.replace(entity, Origin(pos + orn * -com));
    }
    if store.has::<Shape>(entity) && store.has::<WorldAabb>(entity) {
        let pos = store.expect::<Position>(entity).0;
        let orn = store.expect::<Orientation>(entity).0;
        let aabb = store.expect::<Shape>(entity).aabb(pos, orn);
        store.replace(entity, WorldAabb(aabb));
    }
    if store.has::<RotatedMeshList>(entity) {
        let orn = store.expect::<Orientation>(entity).0;
        let shape = store.expect::<Shape>(entity).clone();
        store.replace(entity, RotatedMeshList::rebuild(&shape, orn));
    }
    if store.has::<Inertial>(entity) && store.has::<DynamicTag>(entity) {
        let orn = store.expect::<Orientation>(entity).0;
        let inertial = store.get_mut::<Inertial>(entity).expect("inertial");
        inertial.update_world_inertia(orn);
    }
}

pub fn update_rotated_meshes(store: &mut Store) {
    let entities = store.entities_with::<RotatedMeshList>();
    for entity in entities {
        let orn = store.expect::<Orientation>(entity).0;
        let shape = store.expect::<Shape>(entity).clone();
        store.replace(entity, RotatedMeshList::rebuild(&shape, orn));
    }
}

pub fn update_inertias(store: &mut Store) {
    let entities = store
        .view()
        .with(ComponentKind::Inertial)
        .with(ComponentKind::Dynamic)
        .entities();
    for entity in entities {
        let orn = store.expect::<Orientation>(entity).0;
        let inertial = store.get_mut::<Inertial>(entity).expect("inertial");
        inertial.update_world_inertia(orn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atoll_shared::{ContactConstraint, ProceduralTag};
    use glam::Quat;

    fn add_dynamic_sphere(store: &mut Store, pos: Vec3, vel: Vec3) -> Entity {
        let entity = store.create();
        let shape = Shape::Sphere { radius: 0.5 };
        store.emplace(entity, Position(pos));
        store.emplace(entity, Orientation(Quat::IDENTITY));
        store.emplace(entity, LinVel(vel));
        store.emplace(entity, AngVel(Vec3::ZERO));
        store.emplace(entity, Inertial::new(1.0, shape.moment_of_inertia(1.0), Vec3::ZERO));
        store.emplace(entity, WorldAabb(shape.aabb(pos, Quat::IDENTITY)));
        store.emplace(entity, shape);
        store.emplace(entity, DynamicTag);
        store.emplace(entity, ProceduralTag);
        entity
    }

    fn settings() -> Settings {
        Settings {
            gravity: Vec3::ZERO,
            ..Settings::default()
        }
    }

    #[test]
    fn elastic_head_on_contact_swaps_velocities() {
        let mut store = Store::new();
        let a = add_dynamic_sphere(&mut store, Vec3::new(-0.5, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0));
        let b = add_dynamic_sphere(&mut store, Vec3::new(0.5, 0.0, 0.0), Vec3::new(-2.0, 0.0, 0.0));

        let point = store.create();
        store.emplace(
            point,
            ContactPoint {
                body: [a, b],
                pivot: [Vec3::new(0.5, 0.0, 0.0), Vec3::new(-0.5, 0.0, 0.0)],
                normal: -Vec3::X,
                distance: 0.0,
                friction: 0.0,
                restitution: 1.0,
                feature: [0, 0],
                lifetime: 0,
                normal_impulse: 0.0,
                friction_impulse: [0.0; 2],
            },
        );
        store.emplace(point, ContactConstraint);

        let mut solver = Solver::new();
        solver.update(&mut store, &settings());

        let va = store.expect::<LinVel>(a).0;
        let vb = store.expect::<LinVel>(b).0;
        assert!((va.x + 2.0).abs() < 1e-3, "a bounces back, got {}", va.x);
        assert!((vb.x - 2.0).abs() < 1e-3, "b bounces back, got {}", vb.x);
    }

    #[test]
    fn contact_does_not_pull_separating_bodies() {
        let mut store = Store::new();
        let a = add_dynamic_sphere(&mut store, Vec3::new(-0.5, 0.0, 0.0), Vec3::new(-1.0, 0.0, 0.0));
        let b = add_dynamic_sphere(&mut store, Vec3::new(0.5, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0));

        let point = store.create();
        store.emplace(
            point,
            ContactPoint {
                body: [a, b],
                pivot: [Vec3::new(0.5, 0.0, 0.0), Vec3::new(-0.5, 0.0, 0.0)],
                normal: -Vec3::X,
                distance: 0.0,
                friction: 0.0,
                restitution: 0.5,
                feature: [0, 0],
                lifetime: 0,
                normal_impulse: 0.0,
                friction_impulse: [0.0; 2],
            },
        );
        store.emplace(point, ContactConstraint);

        let mut solver = Solver::new();
        solver.update(&mut store, &settings());

        assert!((store.expect::<LinVel>(a).0.x + 1.0).abs() < 1e-4);
        assert!((store.expect::<LinVel>(b).0.x - 1.0).abs() < 1e-4);
    }

    #[test]
    fn distance_constraint_resists_stretching() {
        let mut store = Store::new();
        let a = add_dynamic_sphere(&mut store, Vec3::ZERO, Vec3::ZERO);
        let b = add_dynamic_sphere(&mut store, Vec3::new(2.0, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0));

        let con = store.create();
        store.emplace(
            con,
            DistanceConstraint::new([a, b], [Vec3::ZERO, Vec3::ZERO], 2.0),
        );

        let mut solver = Solver::new();
        solver.update(&mut store, &settings());

        // The pair must not gain net momentum and the stretch rate shrinks.
        let va = store.expect::<LinVel>(a).0.x;
        let vb = store.expect::<LinVel>(b).0.x;
        assert!((va + vb - 1.0).abs() < 1e-4, "momentum conserved");
        assert!((vb - va) < 0.1, "stretch rate mostly removed");
    }

    #[test]
    fn static_body_is_immovable() {
        let mut store = Store::new();
        let a = add_dynamic_sphere(&mut store, Vec3::new(0.0, 0.45, 0.0), Vec3::new(0.0, -1.0, 0.0));
        let floor = store.create();
        store.emplace(floor, Position(Vec3::ZERO));
        store.emplace(floor, Orientation(Quat::IDENTITY));
        store.emplace(floor, Inertial::fixed());

        let point = store.create();
        store.emplace(
            point,
            ContactPoint {
                body: [a, floor],
                pivot: [Vec3::new(0.0, -0.5, 0.0), Vec3::ZERO],
                normal: Vec3::Y,
                distance: -0.05,
                friction: 0.0,
                restitution: 0.0,
                feature: [0, 0],
                lifetime: 0,
                normal_impulse: 0.0,
                friction_impulse: [0.0; 2],
            },
        );
        store.emplace(point, ContactConstraint);

        let mut solver = Solver::new();
        solver.update(&mut store, &settings());

        assert!(store.expect::<LinVel>(a).0.y >= 0.0, "sphere stops or lifts");
        assert!(!store.has::<LinVel>(floor));
    }
}
