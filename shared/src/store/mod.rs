use std::any::Any;
use std::collections::VecDeque;

use crate::component::registry::{Columns, Component, ComponentKind, ComponentValue};
use crate::entity::handle::{Entity, EntityAllocator};

/// Change notification produced by the store for watched component kinds.
/// Handlers run deferred: the owner drains the queue right after the
/// mutation batch that produced it, which keeps cascading destructions
/// (node -> incident edges) expressible without re-entrant borrows.
#[derive(Debug)]
pub enum StoreEvent {
    Constructed(Entity, ComponentKind),
    /// Carries the removed value so handlers can inspect it (e.g. the graph
    /// index of a destroyed node).
    Destroyed(Entity, ComponentValue),
}

/// Single-threaded columnar entity store. Concurrency in the simulation
/// comes from running one store per island worker plus one authoritative
/// store in the coordinator; stores never share memory.
pub struct Store {
    allocator: EntityAllocator,
    columns: Columns,
    events: VecDeque<StoreEvent>,
    watched: u64,
    /// Slot for the driver attached to this store (the coordinator context
    /// on the authoritative store). A named field rather than a by-type
    /// lookup; the attaching crate downcasts at its API boundary.
    pub attachment: Option<Box<dyn Any + Send + Sync>>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            allocator: EntityAllocator::new(),
            columns: Columns::new(),
            events: VecDeque::new(),
            watched: 0,
            attachment: None,
        }
    }

    // Entities

    pub fn create(&mut self) -> Entity {
        self.allocator.allocate()
    }

    /// Destroys an entity and every component on it, emitting destroy
    /// events for watched kinds.
    pub fn destroy(&mut self, entity: Entity) {
        if !self.is_alive(entity) {
            panic!("Cannot destroy entity which is not alive: {:?}", entity);
        }
        for kind in ComponentKind::ALL {
            if let Some(value) = self.columns.remove(entity, *kind) {
                if self.watched & kind.bit() != 0 {
                    self.events.push_back(StoreEvent::Destroyed(entity, value));
                }
            }
        }
        self.allocator.free(entity);
    }

    pub fn is_alive(&self, entity: Entity) -> bool {
        self.allocator.is_alive(entity)
    }

    pub fn alive_count(&self) -> usize {
        self.allocator.alive_count()
    }

    // Typed component access

    /// Adds a component. Adding a kind the entity already has is a
    /// programmer error; use `emplace_or_replace` when unsure.
    pub fn emplace<T: Component>(&mut self, entity: Entity, component: T) {
        self.assert_alive(entity);
        if T::column_mut(&mut self.columns)
            .insert(entity, component)
            .is_some()
        {
            panic!(
                "Component {:?} already present on {:?}; use replace",
                T::KIND,
                entity
            );
        }
        self.notify_constructed(entity, T::KIND);
    }

    pub fn replace<T: Component>(&mut self, entity: Entity, component: T) {
        self.assert_alive(entity);
        if T::column_mut(&mut self.columns)
            .insert(entity, component)
            .is_none()
        {
            panic!(
                "Component {:?} not present on {:?}; use emplace",
                T::KIND,
                entity
            );
        }
    }

    /// Returns true when the component was newly constructed.
    pub fn emplace_or_replace<T: Component>(&mut self, entity: Entity, component: T) -> bool {
        self.assert_alive(entity);
        let constructed = T::column_mut(&mut self.columns)
            .insert(entity, component)
            .is_none();
        if constructed {
            self.notify_constructed(entity, T::KIND);
        }
        constructed
    }

    pub fn remove<T: Component>(&mut self, entity: Entity) -> T {
        self.try_remove(entity).unwrap_or_else(|| {
            panic!("Component {:?} not present on {:?}", T::KIND, entity)
        })
    }

    pub fn try_remove<T: Component>(&mut self, entity: Entity) -> Option<T> {
        let removed = T::column_mut(&mut self.columns).remove(&entity);
        if let Some(component) = &removed {
            if self.watched & T::KIND.bit() != 0 {
                self.events.push_back(StoreEvent::Destroyed(
                    entity,
                    component.clone().into_value(),
                ));
            }
        }
        removed
    }

    pub fn has<T: Component>(&self, entity: Entity) -> bool {
        T::column(&self.columns).contains_key(&entity)
    }

    pub fn get<T: Component>(&self, entity: Entity) -> Option<&T> {
        T::column(&self.columns).get(&entity)
    }

    pub fn get_mut<T: Component>(&mut self, entity: Entity) -> Option<&mut T> {
        T::column_mut(&mut self.columns).get_mut(&entity)
    }

    pub fn expect<T: Component>(&self, entity: Entity) -> &T {
        self.get(entity).unwrap_or_else(|| {
            panic!("Component {:?} missing on {:?}", T::KIND, entity)
        })
    }

    // Iteration. Entity order is ascending handle order, which is stable
    // within a store.

    pub fn each<T: Component>(&self, mut f: impl FnMut(Entity, &T)) {
        for (entity, component) in T::column(&self.columns).iter() {
            f(*entity, component);
        }
    }

    pub fn each_mut<T: Component>(&mut self, mut f: impl FnMut(Entity, &mut T)) {
        for (entity, component) in T::column_mut(&mut self.columns).iter_mut() {
            f(*entity, component);
        }
    }

    pub fn entities_with<T: Component>(&self) -> Vec<Entity> {
        T::column(&self.columns).keys().copied().collect()
    }

    pub fn count<T: Component>(&self) -> usize {
        T::column(&self.columns).len()
    }

    /// Composable presence filter over entities: intersection of `with`
    /// kinds minus `without` kinds, iterated over the first `with` column.
    pub fn view(&self) -> View<'_> {
        View {
            store: self,
            with: Vec::new(),
            without: Vec::new(),
        }
    }

    // Kind-indexed access, used by deltas and continuous sets.

    pub fn read_value(&self, entity: Entity, kind: ComponentKind) -> Option<ComponentValue> {
        self.columns.read(entity, kind)
    }

    /// Returns true when the component was newly constructed.
    pub fn write_value(&mut self, entity: Entity, value: ComponentValue) -> bool {
        self.assert_alive(entity);
        let kind = value.kind();
        let constructed = self.columns.insert(entity, value);
        if constructed {
            self.notify_constructed(entity, kind);
        }
        constructed
    }

    pub fn remove_value(&mut self, entity: Entity, kind: ComponentKind) -> Option<ComponentValue> {
        let removed = self.columns.remove(entity, kind);
        if let Some(value) = &removed {
            if self.watched & kind.bit() != 0 {
                self.events
                    .push_back(StoreEvent::Destroyed(entity, value.clone()));
            }
        }
        removed
    }

    pub fn has_kind(&self, entity: Entity, kind: ComponentKind) -> bool {
        self.columns.contains(entity, kind)
    }

    // Dirty bookkeeping

    pub fn mark_new(&mut self, entity: Entity) {
        self.dirty_mut(entity).is_new_entity = true;
    }

    pub fn mark_created(&mut self, entity: Entity, kind: ComponentKind) {
        self.dirty_mut(entity).mark_created(kind);
    }

    pub fn mark_updated(&mut self, entity: Entity, kind: ComponentKind) {
        self.dirty_mut(entity).mark_updated(kind);
    }

    pub fn mark_destroyed(&mut self, entity: Entity, kind: ComponentKind) {
        self.dirty_mut(entity).mark_destroyed(kind);
    }

    /// Drops every `Dirty` record, called after the records were flushed
    /// into a delta.
    pub fn clear_dirty(&mut self) {
        crate::component::dirty::Dirty::column_mut(&mut self.columns).clear();
    }

    fn dirty_mut(&mut self, entity: Entity) -> &mut crate::component::dirty::Dirty {
        self.assert_alive(entity);
        crate::component::dirty::Dirty::column_mut(&mut self.columns)
            .entry(entity)
            .or_default()
    }

    // Signals

    /// Start emitting construct/destroy events for a component kind.
    /// Installed at attach time by whoever owns the store.
    pub fn watch(&mut self, kind: ComponentKind) {
        self.watched |= kind.bit();
    }

    pub fn next_event(&mut self) -> Option<StoreEvent> {
        self.events.pop_front()
    }

    fn notify_constructed(&mut self, entity: Entity, kind: ComponentKind) {
        if self.watched & kind.bit() != 0 {
            self.events.push_back(StoreEvent::Constructed(entity, kind));
        }
    }

    fn assert_alive(&self, entity: Entity) {
        if !self.is_alive(entity) {
            panic!("Entity is not alive: {:?}", entity);
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

pub struct View<'a> {
    store: &'a Store,
    with: Vec<ComponentKind>,
    without: Vec<ComponentKind>,
}

impl<'a> View<'a> {
    pub fn with(mut self, kind: ComponentKind) -> Self {
        self.with.push(kind);
        self
    }

    pub fn without(mut self, kind: ComponentKind) -> Self {
        self.without.push(kind);
        self
    }

    pub fn entities(&self) -> Vec<Entity> {
        let Some(first) = self.with.first() else {
            return Vec::new();
        };
        let mut result = Vec::new();
        for entity in self.store.kind_entities(*first) {
            let include = self.with[1..]
                .iter()
                .all(|kind| self.store.has_kind(entity, *kind))
                && self
                    .without
                    .iter()
                    .all(|kind| !self.store.has_kind(entity, *kind));
            if include {
                result.push(entity);
            }
        }
        result
    }
}

impl Store {
    /// Entities carrying a component of `kind`, in handle order.
    pub fn kind_entities(&self, kind: ComponentKind) -> Vec<Entity> {
        macro_rules! keys_for {
            ($($variant:ident => $ty:ty,)*) => {
                match kind {
                    $(ComponentKind::$variant => {
                        <$ty as Component>::column(&self.columns)
                            .keys()
                            .copied()
                            .collect()
                    })*
                }
            };
        }
        use crate::component::body::*;
        use crate::component::constraint::*;
        use crate::component::contact::*;
        use crate::component::continuous::Continuous;
        use crate::component::dirty::Dirty;
        use crate::component::island::*;
        use crate::component::marker::*;
        use crate::component::presentation::*;
        use crate::component::shape::{RotatedMeshList, Shape};
        use crate::component::tree_view::TreeView;
        use crate::material::Material;
        keys_for! {
            Position => Position,
            Orientation => Orientation,
            LinVel => LinVel,
            AngVel => AngVel,
            LinAcc => LinAcc,
            Inertial => Inertial,
            Origin => Origin,
            Shape => Shape,
            Aabb => WorldAabb,
            Material => Material,
            Dynamic => DynamicTag,
            Static => StaticTag,
            Kinematic => KinematicTag,
            External => ExternalTag,
            Procedural => ProceduralTag,
            Sleeping => SleepingTag,
            SleepingDisabled => SleepingDisabledTag,
            Continuous => Continuous,
            GraphNode => GraphNode,
            GraphEdge => GraphEdge,
            IslandResident => IslandResident,
            MultiIslandResident => MultiIslandResident,
            IslandTimestamp => IslandTimestamp,
            Island => Island,
            TreeView => TreeView,
            ContactManifold => ContactManifold,
            ContactPoint => ContactPoint,
            PointConstraint => PointConstraint,
            DistanceConstraint => DistanceConstraint,
            SoftDistanceConstraint => SoftDistanceConstraint,
            HingeConstraint => HingeConstraint,
            ContactConstraint => ContactConstraint,
            RotatedMeshList => RotatedMeshList,
            PresentPosition => PresentPosition,
            PresentOrientation => PresentOrientation,
            Discontinuity => Discontinuity,
            Dirty => Dirty,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::body::{LinVel, Position, SleepingTag};
    use crate::math::Vec3;

    #[test]
    fn emplace_get_replace_remove_roundtrip() {
        let mut store = Store::new();
        let e = store.create();
        store.emplace(e, Position(Vec3::X));
        assert_eq!(store.get::<Position>(e), Some(&Position(Vec3::X)));

        store.replace(e, Position(Vec3::Y));
        assert_eq!(store.get::<Position>(e), Some(&Position(Vec3::Y)));

        let removed: Position = store.remove(e);
        assert_eq!(removed, Position(Vec3::Y));
        assert!(!store.has::<Position>(e));
    }

    #[test]
    #[should_panic]
    fn duplicate_emplace_panics() {
        let mut store = Store::new();
        let e = store.create();
        store.emplace(e, Position(Vec3::X));
        store.emplace(e, Position(Vec3::Y));
    }

    #[test]
    fn destroy_emits_events_for_watched_kinds() {
        let mut store = Store::new();
        store.watch(ComponentKind::Position);
        let e = store.create();
        store.emplace(e, Position(Vec3::X));
        store.emplace(e, LinVel(Vec3::Z));

        // Construct event first.
        match store.next_event() {
            Some(StoreEvent::Constructed(entity, ComponentKind::Position)) => {
                assert_eq!(entity, e)
            }
            other => panic!("unexpected event: {:?}", other),
        }

        store.destroy(e);
        match store.next_event() {
            Some(StoreEvent::Destroyed(entity, value)) => {
                assert_eq!(entity, e);
                assert_eq!(value.kind(), ComponentKind::Position);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        // LinVel was not watched.
        assert!(store.next_event().is_none());
        assert!(!store.is_alive(e));
    }

    #[test]
    fn view_intersects_and_excludes() {
        let mut store = Store::new();
        let a = store.create();
        let b = store.create();
        let c = store.create();
        for e in [a, b, c] {
            store.emplace(e, Position(Vec3::ZERO));
        }
        store.emplace(a, LinVel(Vec3::ZERO));
        store.emplace(b, LinVel(Vec3::ZERO));
        store.emplace(b, SleepingTag);

        let entities = store
            .view()
            .with(ComponentKind::Position)
            .with(ComponentKind::LinVel)
            .without(ComponentKind::Sleeping)
            .entities();
        assert_eq!(entities, vec![a]);
    }
}
