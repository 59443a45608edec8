use std::collections::BTreeMap;

use atoll_shared::{
    ComponentKind, ContactConstraint, ContactManifold, ContactPoint, Entity, Material,
    MaterialTable, Orientation, Position, Store, CONTACT_BREAKING_THRESHOLD, MAX_CONTACT_POINTS,
};

use crate::collision::{collide, CollisionContext, CollisionResult};

/// Manifold count above which collision runs on the pool.
pub const PARALLEL_THRESHOLD: usize = 16;

/// Local (body, body) -> manifold entity map, canonical order.
#[derive(Default)]
pub struct ManifoldMap {
    map: BTreeMap<(Entity, Entity), Entity>,
}

impl ManifoldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(a: Entity, b: Entity) -> (Entity, Entity) {
        (a.min(b), a.max(b))
    }

    pub fn insert(&mut self, a: Entity, b: Entity, manifold: Entity) {
        if self.map.insert(Self::key(a, b), manifold).is_some() {
            panic!("Manifold already exists for pair ({:?}, {:?})", a, b);
        }
    }

    pub fn remove(&mut self, a: Entity, b: Entity) -> Option<Entity> {
        self.map.remove(&Self::key(a, b))
    }

    pub fn get(&self, a: Entity, b: Entity) -> Option<Entity> {
        self.map.get(&Self::key(a, b)).copied()
    }

    pub fn contains(&self, a: Entity, b: Entity) -> bool {
        self.map.contains_key(&Self::key(a, b))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Outcome of updating one manifold's points against a fresh collision
/// result.
pub struct PointChanges {
    pub manifold: Entity,
    pub result: CollisionResult,
}

/// Narrowphase: runs the pair-appropriate collision routine for every
/// manifold and maintains persistent contact points with feature matching.
pub struct Narrowphase {
    /// Results computed by the async path, applied in `finish_update`.
    pending: Vec<PointChanges>,
}

impl Narrowphase {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    pub fn parallelizable(&self, store: &Store) -> bool {
        store.count::<ContactManifold>() > PARALLEL_THRESHOLD
    }

    /// Collision for a single manifold. Read-only on the store, safe to run
    /// for many manifolds concurrently.
    pub fn collide_manifold(store: &Store, manifold_entity: Entity) -> PointChanges {
        let manifold = store.expect::<ContactManifold>(manifold_entity);
        let [body_a, body_b] = manifold.body;
        let ctx = CollisionContext {
            pos_a: store.expect::<Position>(body_a).0,
            orn_a: store.expect::<Orientation>(body_a).0,
            pos_b: store.expect::<Position>(body_b).0,
            orn_b: store.expect::<Orientation>(body_b).0,
            threshold: CONTACT_BREAKING_THRESHOLD,
        };
        let shape_a = store.expect::<atoll_shared::Shape>(body_a);
        let shape_b = store.expect::<atoll_shared::Shape>(body_b);
        PointChanges {
            manifold: manifold_entity,
            result: collide(shape_a, shape_b, &ctx),
        }
    }

    /// Synchronous path: collide every manifold and apply the results.
    /// Returns the contact point entities that were destroyed.
    pub fn update(&mut self, store: &mut Store, material_table: &MaterialTable) -> Vec<Entity> {
        let manifolds = store.entities_with::<ContactManifold>();
        let changes: Vec<PointChanges> = manifolds
            .iter()
            .map(|entity| Self::collide_manifold(store, *entity))
            .collect();
        self.apply(store, material_table, changes)
    }

    pub fn set_pending(&mut self, changes: Vec<PointChanges>) {
        self.pending = changes;
    }

    /// Async-path second half: apply parked collision results.
    pub fn finish_update(
        &mut self,
        store: &mut Store,
        material_table: &MaterialTable,
    ) -> Vec<Entity> {
        let changes = std::mem::take(&mut self.pending);
        self.apply(store, material_table, changes)
    }

    fn apply(
        &mut self,
        store: &mut Store,
        material_table: &MaterialTable,
        changes: Vec<PointChanges>,
    ) -> Vec<Entity> {
        let mut destroyed = Vec::new();
        for change in changes {
            if !store.is_alive(change.manifold) {
                continue;
            }
            self.merge_result(store, material_table, change.manifold, &change.result, &mut destroyed);
        }
        destroyed
    }

    /// Matches fresh result points against the persistent points of the
    /// manifold: matched points are refreshed in place, unmatched fresh
    /// points become new point entities, and persistent points that
    /// separated beyond the breaking threshold are destroyed.
    fn merge_result(
        &mut self,
        store: &mut Store,
        material_table: &MaterialTable,
        manifold_entity: Entity,
        result: &CollisionResult,
        destroyed: &mut Vec<Entity>,
    ) {
        let manifold = store.expect::<ContactManifold>(manifold_entity).clone();
        let [body_a, body_b] = manifold.body;
        let contact = {
            let default_material = Material::default();
            let material_a = store.get::<Material>(body_a).unwrap_or(&default_material);
            let material_b = store.get::<Material>(body_b).unwrap_or(&default_material);
            material_table.mix(material_a, material_b)
        };

        let mut remaining: Vec<Entity> = manifold.points.clone();
        let mut kept: Vec<Entity> = Vec::new();
        let mut created = false;

        for fresh in result.points() {
            // Feature match first, proximity match second.
            let matched = remaining.iter().position(|point_entity| {
                let point = store.expect::<ContactPoint>(*point_entity);
                point.feature == [fresh.feature_a, fresh.feature_b]
                    || (point.pivot[0] - fresh.pivot_a).length() < CONTACT_BREAKING_THRESHOLD
            });

            match matched {
                Some(index) => {
                    let point_entity = remaining.remove(index);
                    let point = store.get_mut::<ContactPoint>(point_entity).expect("point");
                    point.pivot = [fresh.pivot_a, fresh.pivot_b];
                    point.normal = fresh.normal;
                    point.distance = fresh.distance;
                    point.feature = [fresh.feature_a, fresh.feature_b];
                    point.friction = contact.friction;
                    point.restitution = contact.restitution;
                    point.lifetime += 1;
                    kept.push(point_entity);
                    store.mark_updated(point_entity, ComponentKind::ContactPoint);
                }
                None => {
                    if kept.len() + remaining.len() >= MAX_CONTACT_POINTS {
                        continue;
                    }
                    let point_entity = store.create();
                    store.emplace(
                        point_entity,
                        ContactPoint {
                            body: [body_a, body_b],
                            pivot: [fresh.pivot_a, fresh.pivot_b],
                            normal: fresh.normal,
                            distance: fresh.distance,
                            friction: contact.friction,
                            restitution: contact.restitution,
                            feature: [fresh.feature_a, fresh.feature_b],
                            lifetime: 0,
                            normal_impulse: 0.0,
                            friction_impulse: [0.0; 2],
                        },
                    );
                    store.emplace(point_entity, ContactConstraint);
                    store.mark_new(point_entity);
                    store.mark_created(point_entity, ComponentKind::ContactPoint);
                    store.mark_created(point_entity, ComponentKind::ContactConstraint);
                    kept.push(point_entity);
                    created = true;
                }
            }
        }

        // Remaining persistent points found no fresh counterpart: destroy
        // the ones whose pivots have separated beyond the breaking
        // threshold, measured at the current poses.
        let pos_a = store.expect::<Position>(body_a).0;
        let orn_a = store.expect::<Orientation>(body_a).0;
        let pos_b = store.expect::<Position>(body_b).0;
        let orn_b = store.expect::<Orientation>(body_b).0;
        for point_entity in remaining {
            let point = *store.expect::<ContactPoint>(point_entity);
            let world_a = pos_a + orn_a * point.pivot[0];
            let world_b = pos_b + orn_b * point.pivot[1];
            let separation = (world_a - world_b).dot(point.normal);
            let drift = (world_a - world_b) - point.normal * separation;
            if separation > CONTACT_BREAKING_THRESHOLD
                || drift.length() > CONTACT_BREAKING_THRESHOLD
                || result.points().is_empty()
            {
                destroyed.push(point_entity);
                store.destroy(point_entity);
            } else {
                kept.push(point_entity);
            }
        }

        kept.sort();
        let manifold_mut = store.get_mut::<ContactManifold>(manifold_entity).expect("manifold");
        if manifold_mut.points != kept {
            manifold_mut.points = kept;
            store.mark_updated(manifold_entity, ComponentKind::ContactManifold);
        } else if created {
            store.mark_updated(manifold_entity, ComponentKind::ContactManifold);
        }
    }
}

impl Default for Narrowphase {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atoll_shared::math::Vec3;
    use atoll_shared::Shape;
    use glam::Quat;

    fn add_sphere(store: &mut Store, pos: Vec3) -> Entity {
        let entity = store.create();
        store.emplace(entity, Position(pos));
        store.emplace(entity, Orientation(Quat::IDENTITY));
        store.emplace(entity, Shape::Sphere { radius: 0.5 });
        entity
    }

    fn add_manifold(store: &mut Store, a: Entity, b: Entity) -> Entity {
        let manifold = store.create();
        store.emplace(manifold, ContactManifold::new([a, b], 0.1));
        manifold
    }

    #[test]
    fn touching_pair_gains_a_persistent_point() {
        let mut store = Store::new();
        let a = add_sphere(&mut store, Vec3::new(-0.49, 0.0, 0.0));
        let b = add_sphere(&mut store, Vec3::new(0.49, 0.0, 0.0));
        let manifold = add_manifold(&mut store, a, b);

        let mut narrowphase = Narrowphase::new();
        let destroyed = narrowphase.update(&mut store, &MaterialTable::new());
        assert!(destroyed.is_empty());

        let points = store.expect::<ContactManifold>(manifold).points.clone();
        assert_eq!(points.len(), 1);
        assert!(store.has::<ContactConstraint>(points[0]));
        assert!(store.expect::<ContactPoint>(points[0]).distance < 0.0);
    }

    #[test]
    fn point_persists_and_ages_across_updates() {
        let mut store = Store::new();
        let a = add_sphere(&mut store, Vec3::new(-0.49, 0.0, 0.0));
        let b = add_sphere(&mut store, Vec3::new(0.49, 0.0, 0.0));
        let manifold = add_manifold(&mut store, a, b);

        let mut narrowphase = Narrowphase::new();
        narrowphase.update(&mut store, &MaterialTable::new());
        let first = store.expect::<ContactManifold>(manifold).points.clone();
        narrowphase.update(&mut store, &MaterialTable::new());
        let second = store.expect::<ContactManifold>(manifold).points.clone();

        assert_eq!(first, second, "point entity persists");
        assert_eq!(store.expect::<ContactPoint>(first[0]).lifetime, 1);
    }

    #[test]
    fn separated_point_is_destroyed() {
        let mut store = Store::new();
        let a = add_sphere(&mut store, Vec3::new(-0.49, 0.0, 0.0));
        let b = add_sphere(&mut store, Vec3::new(0.49, 0.0, 0.0));
        let manifold = add_manifold(&mut store, a, b);

        let mut narrowphase = Narrowphase::new();
        narrowphase.update(&mut store, &MaterialTable::new());
        let point = store.expect::<ContactManifold>(manifold).points[0];

        store.replace(a, Position(Vec3::new(-2.0, 0.0, 0.0)));
        let destroyed = narrowphase.update(&mut store, &MaterialTable::new());
        assert_eq!(destroyed, vec![point]);
        assert!(!store.is_alive(point));
        assert!(store.expect::<ContactManifold>(manifold).points.is_empty());
    }

    #[test]
    fn manifold_map_is_order_insensitive() {
        let mut store = Store::new();
        let a = add_sphere(&mut store, Vec3::ZERO);
        let b = add_sphere(&mut store, Vec3::X);
        let manifold = add_manifold(&mut store, a, b);

        let mut map = ManifoldMap::new();
        map.insert(a, b, manifold);
        assert_eq!(map.get(b, a), Some(manifold));
        assert_eq!(map.remove(b, a), Some(manifold));
        assert!(map.is_empty());
    }
}
