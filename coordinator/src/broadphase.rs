use atoll_shared::{
    ComponentKind, ContactManifold, Entity, Shape, Store, TreeView, WorldAabb,
    MANIFOLD_SEPARATION_THRESHOLD,
};

use crate::coordinator::Coordinator;

/// Inter-island broadphase: bodies of different islands only meet here,
/// since each worker's tree covers its own island. Overlapping cross-island
/// pairs (and non-member non-procedural bodies near an island) get a
/// contact manifold, which inserts a graph edge and thereby merges the
/// islands involved.
pub(crate) fn update(coordinator: &mut Coordinator, store: &mut Store) {
    let candidates = collect_candidates(coordinator, store);
    for (a, b) in candidates {
        if coordinator.manifold_map.contains(a, b) {
            continue;
        }
        if !should_collide(store, a, b) {
            continue;
        }
        let island_a = Coordinator::island_of(store, a);
        let island_b = Coordinator::island_of(store, b);
        match (island_a, island_b) {
            // Same island: the worker's own broadphase handles it.
            (Some(i), Some(j)) if i == j => continue,
            (None, None) => continue,
            _ => {}
        }

        let manifold_entity = store.create();
        store.emplace(
            manifold_entity,
            ContactManifold::new([a, b], MANIFOLD_SEPARATION_THRESHOLD),
        );
        coordinator.on_edge_created(store, manifold_entity);
    }
}

fn collect_candidates(coordinator: &Coordinator, store: &Store) -> Vec<(Entity, Entity)> {
    let island_entities = coordinator.island_entities();
    let mut pairs = Vec::new();

    // Island tree views against each other.
    for (index, island_a) in island_entities.iter().enumerate() {
        let Some(view_a) = store.get::<TreeView>(*island_a) else {
            continue;
        };
        for island_b in island_entities.iter().skip(index + 1) {
            let Some(view_b) = store.get::<TreeView>(*island_b) else {
                continue;
            };
            let (Some(root_a), Some(root_b)) = (view_a.root_aabb(), view_b.root_aabb()) else {
                continue;
            };
            if !root_a
                .inflated(MANIFOLD_SEPARATION_THRESHOLD)
                .intersects(&root_b)
            {
                continue;
            }
            view_a.for_each_leaf(|entity_a, aabb_a| {
                view_b.query(
                    &aabb_a.inflated(MANIFOLD_SEPARATION_THRESHOLD),
                    |entity_b, _| {
                        pairs.push((entity_a.min(entity_b), entity_a.max(entity_b)));
                    },
                );
            });
        }
    }

    // Non-procedural bodies that are not yet members of a nearby island.
    let mut non_procedural = store.kind_entities(ComponentKind::Static);
    non_procedural.extend(store.kind_entities(ComponentKind::Kinematic));
    for entity in non_procedural {
        let Some(aabb) = store.get::<WorldAabb>(entity) else {
            continue;
        };
        let query = aabb.0.inflated(MANIFOLD_SEPARATION_THRESHOLD);
        for island_entity in &island_entities {
            if let Some(resident) = store.get::<atoll_shared::MultiIslandResident>(entity) {
                if resident.islands.contains(island_entity) {
                    continue;
                }
            }
            let Some(view) = store.get::<TreeView>(*island_entity) else {
                continue;
            };
            view.query(&query, |entity_b, _| {
                pairs.push((entity.min(entity_b), entity.max(entity_b)));
            });
        }
    }

    pairs.sort();
    pairs.dedup();
    pairs
}

fn should_collide(store: &Store, a: Entity, b: Entity) -> bool {
    if a == b || !store.is_alive(a) || !store.is_alive(b) {
        return false;
    }
    if !store.has::<Shape>(a) || !store.has::<Shape>(b) {
        return false;
    }
    let a_procedural = store.has_kind(a, ComponentKind::Procedural);
    let b_procedural = store.has_kind(b, ComponentKind::Procedural);
    if !a_procedural && !b_procedural {
        return false;
    }
    // Verify against the authoritative AABBs; tree view leaves carry fat
    // boxes that overreach.
    let (Some(aabb_a), Some(aabb_b)) = (store.get::<WorldAabb>(a), store.get::<WorldAabb>(b))
    else {
        return false;
    };
    aabb_a
        .0
        .inflated(MANIFOLD_SEPARATION_THRESHOLD)
        .intersects(&aabb_b.0)
}
