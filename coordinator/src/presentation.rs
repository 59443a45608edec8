use atoll_shared::{
    integrate_orientation, AngVel, ComponentKind, Discontinuity, IslandResident, IslandTimestamp,
    LinVel, Orientation, Position, PresentOrientation, PresentPosition, Scalar, Store,
};

/// Extrapolates the render-facing transform of every awake procedural body
/// from its last simulated state, clamped to one fixed step:
/// `present = state + velocity * min(time - fixed_dt - worker_time, fixed_dt)`.
/// Discontinuity offsets are applied on top.
pub fn update_presentation(store: &mut Store, time: f64, fixed_dt: Scalar) {
    let entities = store
        .view()
        .with(ComponentKind::PresentPosition)
        .with(ComponentKind::Procedural)
        .without(ComponentKind::Sleeping)
        .entities();

    for entity in entities {
        let Some(island) = store.get::<IslandResident>(entity).map(|r| r.island) else {
            continue;
        };
        let Some(worker_time) = store.get::<IslandTimestamp>(island).map(|t| t.0) else {
            continue;
        };
        let dt = ((time - fixed_dt as f64 - worker_time) as Scalar).min(fixed_dt);

        if let (Some(pos), Some(vel)) = (
            store.get::<Position>(entity).copied(),
            store.get::<LinVel>(entity).copied(),
        ) {
            store.replace(entity, PresentPosition(pos.0 + vel.0 * dt));
        }
        if let (Some(orn), Some(angvel)) = (
            store.get::<Orientation>(entity).copied(),
            store.get::<AngVel>(entity).copied(),
        ) {
            store.replace(
                entity,
                PresentOrientation(integrate_orientation(orn.0, angvel.0, dt)),
            );
        }
    }

    let discontinuous = store.entities_with::<Discontinuity>();
    for entity in discontinuous {
        let discontinuity = *store.expect::<Discontinuity>(entity);
        if let Some(present) = store.get::<PresentPosition>(entity).copied() {
            store.replace(
                entity,
                PresentPosition(present.0 + discontinuity.position_offset),
            );
        }
        if let Some(present) = store.get::<PresentOrientation>(entity).copied() {
            store.replace(
                entity,
                PresentOrientation(discontinuity.orientation_offset * present.0),
            );
        }
    }
}

/// Resets the presentation transforms to the authoritative state.
pub fn snap_presentation(store: &mut Store) {
    let entities = store.entities_with::<PresentPosition>();
    for entity in entities {
        if let Some(pos) = store.get::<Position>(entity).copied() {
            store.replace(entity, PresentPosition(pos.0));
        }
        if let (Some(orn), true) = (
            store.get::<Orientation>(entity).copied(),
            store.has::<PresentOrientation>(entity),
        ) {
            store.replace(entity, PresentOrientation(orn.0));
        }
    }
}
