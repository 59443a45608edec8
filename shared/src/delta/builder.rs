use std::collections::HashMap;

use crate::component::registry::{ComponentKind, ComponentValue};
use crate::delta::IslandDelta;
use crate::entity::handle::Entity;
use crate::store::Store;

/// Accumulates changes into the next `IslandDelta`. Repeated writes for the
/// same (entity, kind) collapse to the latest value, so staging a builder
/// between flushes also merges adjacent deltas for the same destination.
pub struct DeltaBuilder {
    delta: IslandDelta,
    created_index: HashMap<Entity, usize>,
    updated_index: HashMap<(Entity, ComponentKind), usize>,
}

impl DeltaBuilder {
    pub fn new() -> Self {
        Self {
            delta: IslandDelta::default(),
            created_index: HashMap::new(),
            updated_index: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.delta.is_empty()
    }

    pub fn insert_entity_mapping(&mut self, local: Entity, remote: Entity) {
        if !self.delta.mappings.contains(&(local, remote)) {
            self.delta.mappings.push((local, remote));
        }
    }

    pub fn has_mapping_for(&self, local: Entity) -> bool {
        self.delta
            .mappings
            .iter()
            .any(|(l, _)| *l == local)
    }

    /// Registers `entity` as created, without components yet.
    pub fn created(&mut self, entity: Entity) {
        if !self.created_index.contains_key(&entity) {
            self.created_index
                .insert(entity, self.delta.created.len());
            self.delta.created.push((entity, Vec::new()));
        }
    }

    /// Registers `entity` as created along with initial components.
    pub fn created_with(&mut self, entity: Entity, components: Vec<ComponentValue>) {
        self.created(entity);
        for component in components {
            self.created_component(entity, component);
        }
    }

    /// Adds an initial component to a created entity, or records an update
    /// when the entity is not part of the created set.
    pub fn created_component(&mut self, entity: Entity, component: ComponentValue) {
        if !component.kind().is_shippable() {
            return;
        }
        if let Some(index) = self.created_index.get(&entity) {
            let components = &mut self.delta.created[*index].1;
            match components
                .iter_mut()
                .find(|existing| existing.kind() == component.kind())
            {
                Some(existing) => *existing = component,
                None => {
                    components.push(component);
                    components.sort_by_key(|value| value.kind());
                }
            }
        } else {
            self.updated(entity, component);
        }
    }

    pub fn updated(&mut self, entity: Entity, component: ComponentValue) {
        if !component.kind().is_shippable() {
            return;
        }
        if let Some(index) = self.created_index.get(&entity) {
            // Entity is shipped as a create; fold the update into it.
            let index = *index;
            let components = &mut self.delta.created[index].1;
            match components
                .iter_mut()
                .find(|existing| existing.kind() == component.kind())
            {
                Some(existing) => *existing = component,
                None => {
                    components.push(component);
                    components.sort_by_key(|value| value.kind());
                }
            }
            return;
        }
        let key = (entity, component.kind());
        match self.updated_index.get(&key) {
            Some(index) => self.delta.updated[*index] = (entity, component),
            None => {
                self.updated_index.insert(key, self.delta.updated.len());
                self.delta.updated.push((entity, component));
            }
        }
    }

    /// Reads the current value of `kind` on `entity` from `store` and
    /// records it as an update.
    pub fn updated_from(&mut self, store: &Store, entity: Entity, kind: ComponentKind) {
        if let Some(value) = store.read_value(entity, kind) {
            self.updated(entity, value);
        }
    }

    /// Records every shippable component currently on `entity` as part of
    /// its creation payload.
    pub fn created_all_from(&mut self, store: &Store, entity: Entity) {
        self.created(entity);
        for kind in ComponentKind::ALL {
            if !kind.is_shippable() {
                continue;
            }
            if let Some(value) = store.read_value(entity, *kind) {
                self.created_component(entity, value);
            }
        }
    }

    /// Records every shippable component currently on `entity` as updates.
    pub fn updated_all_from(&mut self, store: &Store, entity: Entity) {
        for kind in ComponentKind::ALL {
            if !kind.is_shippable() {
                continue;
            }
            if let Some(value) = store.read_value(entity, *kind) {
                self.updated(entity, value);
            }
        }
    }

    pub fn destroyed_component(&mut self, entity: Entity, kind: ComponentKind) {
        if !kind.is_shippable() {
            return;
        }
        self.delta.destroyed_components.push((entity, kind));
    }

    pub fn destroyed(&mut self, entity: Entity) {
        // A destroy supersedes anything staged for the entity.
        if let Some(index) = self.created_index.remove(&entity) {
            self.delta.created.remove(index);
            for other in self.created_index.values_mut() {
                if *other > index {
                    *other -= 1;
                }
            }
            // Created and destroyed within one delta: the receiver never
            // needs to hear about the entity at all.
            self.drop_updates_for(entity);
            return;
        }
        self.drop_updates_for(entity);
        if !self.delta.destroyed.contains(&entity) {
            self.delta.destroyed.push(entity);
        }
    }

    fn drop_updates_for(&mut self, entity: Entity) {
        let delta = &mut self.delta;
        let mut removed = 0usize;
        delta.updated.retain(|(e, _)| {
            let keep = *e != entity;
            if !keep {
                removed += 1;
            }
            keep
        });
        if removed > 0 {
            self.updated_index.clear();
            for (index, (e, value)) in delta.updated.iter().enumerate() {
                self.updated_index.insert((*e, value.kind()), index);
            }
        } else {
            self.updated_index.retain(|(e, _), _| *e != entity);
        }
        delta
            .destroyed_components
            .retain(|(e, _)| *e != entity);
    }

    /// Consumes the accumulated changes, leaving the builder empty.
    pub fn finish(&mut self) -> IslandDelta {
        self.created_index.clear();
        self.updated_index.clear();
        std::mem::take(&mut self.delta)
    }
}

impl Default for DeltaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::body::Position;
    use crate::component::registry::Component;
    use crate::math::Vec3;

    fn entity(index: u32) -> Entity {
        Entity::new(index, 0)
    }

    #[test]
    fn repeated_updates_collapse_to_latest() {
        let mut builder = DeltaBuilder::new();
        builder.updated(entity(0), Position(Vec3::X).into_value());
        builder.updated(entity(0), Position(Vec3::Y).into_value());
        let delta = builder.finish();
        assert_eq!(delta.updated.len(), 1);
        match &delta.updated[0].1 {
            ComponentValue::Position(Position(v)) => assert_eq!(*v, Vec3::Y),
            other => panic!("unexpected value: {:?}", other),
        }
    }

    #[test]
    fn update_for_created_entity_folds_into_create() {
        let mut builder = DeltaBuilder::new();
        builder.created(entity(0));
        builder.updated(entity(0), Position(Vec3::X).into_value());
        let delta = builder.finish();
        assert!(delta.updated.is_empty());
        assert_eq!(delta.created.len(), 1);
        assert_eq!(delta.created[0].1.len(), 1);
    }

    #[test]
    fn create_then_destroy_cancels_out() {
        let mut builder = DeltaBuilder::new();
        builder.created(entity(0));
        builder.updated(entity(0), Position(Vec3::X).into_value());
        builder.destroyed(entity(0));
        let delta = builder.finish();
        assert!(delta.is_empty());
    }

    #[test]
    fn destroy_drops_pending_updates() {
        let mut builder = DeltaBuilder::new();
        builder.updated(entity(0), Position(Vec3::X).into_value());
        builder.destroyed(entity(0));
        let delta = builder.finish();
        assert!(delta.updated.is_empty());
        assert_eq!(delta.destroyed, vec![entity(0)]);
    }

    #[test]
    fn initial_components_stay_in_kind_order() {
        use crate::component::body::LinVel;
        let mut builder = DeltaBuilder::new();
        builder.created(entity(0));
        builder.created_component(entity(0), LinVel(Vec3::Z).into_value());
        builder.created_component(entity(0), Position(Vec3::X).into_value());
        let delta = builder.finish();
        let kinds: Vec<ComponentKind> = delta.created[0].1.iter().map(|v| v.kind()).collect();
        assert_eq!(kinds, vec![ComponentKind::Position, ComponentKind::LinVel]);
    }
}
