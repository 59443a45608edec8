mod builder;

pub use builder::DeltaBuilder;

use log::{debug, warn};

use crate::component::registry::{map_entities, ComponentKind, ComponentValue};
use crate::entity::entity_map::EntityMap;
use crate::entity::handle::Entity;
use crate::store::Store;

/// Ordered, component-granular change set describing the evolution of one
/// store since the previous delta: entity mappings to install, created
/// entities with their initial components, then updates and destructions.
/// All handles in the payload are source-relative; the importer remaps them
/// through its entity map.
#[derive(Debug, Default)]
pub struct IslandDelta {
    /// (sender-side handle, receiver-side handle) pairs, installed before
    /// the payload is applied.
    pub(crate) mappings: Vec<(Entity, Entity)>,
    /// Created entities with initial components in kind order.
    pub(crate) created: Vec<(Entity, Vec<ComponentValue>)>,
    pub(crate) updated: Vec<(Entity, ComponentValue)>,
    pub(crate) destroyed_components: Vec<(Entity, ComponentKind)>,
    pub(crate) destroyed: Vec<Entity>,
}

/// Outcome of a delta import: which remote handles could not be resolved
/// (the operations referencing them were skipped and may be re-requested),
/// and which entities were created locally.
#[derive(Debug, Default)]
pub struct ImportResult {
    pub unknown_remotes: Vec<Entity>,
    /// (remote, local) pairs for entities created by this import.
    pub created: Vec<(Entity, Entity)>,
    /// (remote, local) pairs for entities destroyed by this import.
    pub destroyed: Vec<(Entity, Entity)>,
}

impl IslandDelta {
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
            && self.created.is_empty()
            && self.updated.is_empty()
            && self.destroyed_components.is_empty()
            && self.destroyed.is_empty()
    }

    pub fn created_entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.created.iter().map(|(entity, _)| *entity)
    }

    pub fn destroyed_entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.destroyed.iter().copied()
    }

    /// Remote entities whose `kind` component is updated by this delta,
    /// including updates folded into creations.
    pub fn updated_entities_of(&self, kind: ComponentKind) -> Vec<Entity> {
        let mut entities: Vec<Entity> = self
            .updated
            .iter()
            .filter(|(_, value)| value.kind() == kind)
            .map(|(entity, _)| *entity)
            .collect();
        for (entity, components) in &self.created {
            if components.iter().any(|value| value.kind() == kind) {
                entities.push(*entity);
            }
        }
        entities
    }

    /// The staged update (or creation payload) of `kind` for `remote`, if
    /// any.
    pub fn updated_value(&self, remote: Entity, kind: ComponentKind) -> Option<&ComponentValue> {
        if let Some(components) = self.created_components(remote) {
            if let Some(value) = components.iter().find(|value| value.kind() == kind) {
                return Some(value);
            }
        }
        self.updated
            .iter()
            .find(|(entity, value)| *entity == remote && value.kind() == kind)
            .map(|(_, value)| value)
    }

    /// Components created for `remote` in this delta, if it is among the
    /// created entities.
    pub fn created_components(&self, remote: Entity) -> Option<&[ComponentValue]> {
        self.created
            .iter()
            .find(|(entity, _)| *entity == remote)
            .map(|(_, components)| components.as_slice())
    }

    /// Apply this delta to `store`, remapping handles through `map`.
    ///
    /// Entity creation happens in two passes (handles first, then
    /// components) so payload references between entities created by the
    /// same delta always resolve, regardless of ordering. The recoverable
    /// anomalies follow the error-handling contract: an unknown remote
    /// handle skips the operation and is recorded; re-creating a mapped
    /// entity degrades to an update; operations on locally destroyed
    /// entities are dropped.
    pub fn import(&self, store: &mut Store, map: &mut EntityMap) -> ImportResult {
        let mut result = ImportResult::default();

        // 1. Entity mappings.
        for (sender, receiver) in &self.mappings {
            if !store.is_alive(*receiver) {
                debug!(
                    "Dropping mapping for {:?}: local {:?} destroyed since emission",
                    sender, receiver
                );
                continue;
            }
            map.insert(*sender, *receiver);
        }

        // 2a. Create local entities and install mappings.
        for (remote, _) in &self.created {
            if map.has_remote(*remote) {
                // DuplicateConstruction: the creation degrades to updates.
                debug!("Remote {:?} already mapped; coercing create to update", remote);
                continue;
            }
            let local = store.create();
            map.insert(*remote, local);
            result.created.push((*remote, local));
        }

        // 2b. Emplace initial components in kind order.
        for (remote, components) in &self.created {
            let Ok(local) = map.local(*remote) else {
                continue;
            };
            if !store.is_alive(local) {
                continue;
            }
            for component in components {
                Self::apply_value(store, map, local, component, &mut result);
            }
        }

        // 3. Updates.
        for (remote, component) in &self.updated {
            let Ok(local) = map.local(*remote) else {
                result.unknown_remotes.push(*remote);
                continue;
            };
            if !store.is_alive(local) {
                // LateArrival: destroyed between emission and import.
                continue;
            }
            Self::apply_value(store, map, local, component, &mut result);
        }

        // 4. Component destructions.
        for (remote, kind) in &self.destroyed_components {
            let Ok(local) = map.local(*remote) else {
                continue;
            };
            if !store.is_alive(local) {
                continue;
            }
            store.remove_value(local, *kind);
        }

        // 5. Entity destructions.
        for remote in &self.destroyed {
            let Some(local) = map.erase_remote(*remote) else {
                debug!("Destroy of unknown remote {:?} dropped", remote);
                continue;
            };
            if store.is_alive(local) {
                store.destroy(local);
                result.destroyed.push((*remote, local));
            }
        }

        result
    }

    fn apply_value(
        store: &mut Store,
        map: &EntityMap,
        local: Entity,
        component: &ComponentValue,
        result: &mut ImportResult,
    ) {
        if !component.kind().is_shippable() {
            warn!(
                "Non-shippable component {:?} in delta; ignored",
                component.kind()
            );
            return;
        }
        let mut value = component.clone();
        let mut unknown = None;
        let remapped = map_entities(&mut value, &mut |remote| {
            map.local(remote).map_err(|err| {
                unknown = Some(remote);
                err
            })
        });
        match remapped {
            Ok(()) => {
                store.write_value(local, value);
            }
            Err(_) => {
                if let Some(remote) = unknown {
                    result.unknown_remotes.push(remote);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::body::{LinVel, Position};
    use crate::component::constraint::DistanceConstraint;
    use crate::component::registry::Component;
    use crate::math::Vec3;

    fn shippable_values(store: &Store, entity: Entity) -> Vec<ComponentValue> {
        ComponentKind::ALL
            .iter()
            .filter(|kind| kind.is_shippable())
            .filter_map(|kind| store.read_value(entity, *kind))
            .collect()
    }

    #[test]
    fn round_trip_preserves_components_and_references() {
        let mut source = Store::new();
        let a = source.create();
        let b = source.create();
        let constraint_entity = source.create();
        source.emplace(a, Position(Vec3::X));
        source.emplace(b, Position(Vec3::Y));
        source.emplace(
            constraint_entity,
            DistanceConstraint::new([a, b], [Vec3::ZERO, Vec3::ZERO], 2.0),
        );

        let mut builder = DeltaBuilder::new();
        for entity in [a, b, constraint_entity] {
            builder.created_with(entity, shippable_values(&source, entity));
        }
        let delta = builder.finish();

        let mut target = Store::new();
        let mut map = EntityMap::new();
        let result = delta.import(&mut target, &mut map);
        assert!(result.unknown_remotes.is_empty());
        assert_eq!(result.created.len(), 3);

        let local_a = map.local(a).unwrap();
        let local_b = map.local(b).unwrap();
        let local_con = map.local(constraint_entity).unwrap();
        assert_eq!(target.get::<Position>(local_a), Some(&Position(Vec3::X)));
        let constraint = target.expect::<DistanceConstraint>(local_con);
        assert_eq!(constraint.body, [local_a, local_b], "bodies remapped");

        // Ship everything back through a reverse map and compare.
        let mut reverse = DeltaBuilder::new();
        for entity in [local_a, local_b, local_con] {
            reverse.created_with(entity, shippable_values(&target, entity));
        }
        let back = reverse.finish();
        let mut round = Store::new();
        let mut round_map = EntityMap::new();
        back.import(&mut round, &mut round_map);

        let round_a = round_map.local(local_a).unwrap();
        assert_eq!(round.get::<Position>(round_a), Some(&Position(Vec3::X)));
    }

    #[test]
    fn unknown_remote_reference_skips_and_records() {
        let mut source = Store::new();
        let a = source.create();
        let ghost = source.create();
        let constraint_entity = source.create();
        source.emplace(a, Position(Vec3::X));
        source.emplace(
            constraint_entity,
            DistanceConstraint::new([a, ghost], [Vec3::ZERO, Vec3::ZERO], 1.0),
        );

        let mut builder = DeltaBuilder::new();
        builder.created_with(a, shippable_values(&source, a));
        // ghost is deliberately not part of the delta.
        builder.created_with(constraint_entity, shippable_values(&source, constraint_entity));
        let delta = builder.finish();

        let mut target = Store::new();
        let mut map = EntityMap::new();
        let result = delta.import(&mut target, &mut map);

        assert_eq!(result.unknown_remotes, vec![ghost]);
        let local_con = map.local(constraint_entity).unwrap();
        assert!(
            !target.has::<DistanceConstraint>(local_con),
            "constraint referencing unknown remote must be skipped"
        );
    }

    #[test]
    fn duplicate_construction_coerces_to_update() {
        let mut source = Store::new();
        let a = source.create();
        source.emplace(a, Position(Vec3::X));

        let mut target = Store::new();
        let mut map = EntityMap::new();

        let mut builder = DeltaBuilder::new();
        builder.created_with(a, shippable_values(&source, a));
        builder.finish().import(&mut target, &mut map);
        let local = map.local(a).unwrap();

        source.replace(a, Position(Vec3::Y));
        let mut builder = DeltaBuilder::new();
        builder.created_with(a, shippable_values(&source, a));
        let result = builder.finish().import(&mut target, &mut map);

        assert!(result.created.is_empty(), "no second entity created");
        assert_eq!(target.get::<Position>(local), Some(&Position(Vec3::Y)));
        assert_eq!(target.alive_count(), 1);
    }

    #[test]
    fn late_arrival_for_destroyed_entity_is_dropped() {
        let mut target = Store::new();
        let mut map = EntityMap::new();
        let remote = Entity::new(0, 0);

        let mut builder = DeltaBuilder::new();
        builder.created_with(remote, vec![Position(Vec3::X).into_value()]);
        builder.finish().import(&mut target, &mut map);
        let local = map.local(remote).unwrap();
        target.destroy(local);

        let mut builder = DeltaBuilder::new();
        builder.updated(remote, Position(Vec3::Y).into_value());
        let result = builder.finish().import(&mut target, &mut map);
        assert!(result.unknown_remotes.is_empty());
        assert_eq!(target.alive_count(), 0);
    }
}
