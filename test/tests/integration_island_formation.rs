//! Island bookkeeping driven purely by constraint topology: disjoint pairs
//! form separate islands, a bridging constraint fuses them, and merging an
//! island with itself is a no-op.

use atoll_coordinator::{make_constraint, DistanceConstraint};
use atoll_shared::math::Vec3;
use atoll_shared::Island;
use atoll_test::SimWorld;

#[test]
fn two_pairs_make_two_islands_and_a_bridge_makes_one() {
    let mut world = SimWorld::with_settings(SimWorld::awake_settings());

    let a0 = world.add_shapeless_body(Vec3::new(-10.0, 0.0, 0.0));
    let a1 = world.add_shapeless_body(Vec3::new(-9.0, 0.0, 0.0));
    let b0 = world.add_shapeless_body(Vec3::new(9.0, 0.0, 0.0));
    let b1 = world.add_shapeless_body(Vec3::new(10.0, 0.0, 0.0));

    make_constraint(
        &mut world.store,
        DistanceConstraint::new([a0, a1], [Vec3::ZERO, Vec3::ZERO], 1.0),
    );
    make_constraint(
        &mut world.store,
        DistanceConstraint::new([b0, b1], [Vec3::ZERO, Vec3::ZERO], 1.0),
    );
    world.update();

    assert_eq!(atoll_coordinator::island_count(&mut world.store), 2);
    for island_entity in atoll_coordinator::island_entities(&mut world.store) {
        let island = world.store.expect::<Island>(island_entity);
        assert_eq!(island.nodes.len(), 2, "two nodes per island");
        assert_eq!(island.edges.len(), 1, "one edge per island");
    }

    // The bridge merges both islands into one.
    make_constraint(
        &mut world.store,
        DistanceConstraint::new([a1, b0], [Vec3::ZERO, Vec3::ZERO], 18.0),
    );
    world.update();

    assert_eq!(atoll_coordinator::island_count(&mut world.store), 1);
    let island_entity = atoll_coordinator::island_entities(&mut world.store)[0];
    let island = world.store.expect::<Island>(island_entity).clone();
    assert_eq!(island.nodes.len(), 4);
    assert_eq!(island.edges.len(), 3);
    for body in [a0, a1, b0, b1] {
        assert!(island.nodes.contains(&body));
        assert_eq!(
            atoll_coordinator::Coordinator::island_of(&world.store, body),
            Some(island_entity),
            "every procedural body resides in exactly the merged island"
        );
    }
}

#[test]
fn constraint_within_one_island_does_not_change_membership() {
    let mut world = SimWorld::with_settings(SimWorld::awake_settings());

    let a = world.add_shapeless_body(Vec3::new(0.0, 0.0, 0.0));
    let b = world.add_shapeless_body(Vec3::new(1.0, 0.0, 0.0));
    make_constraint(
        &mut world.store,
        DistanceConstraint::new([a, b], [Vec3::ZERO, Vec3::ZERO], 1.0),
    );
    world.update();
    assert_eq!(atoll_coordinator::island_count(&mut world.store), 1);
    let before = atoll_coordinator::island_entities(&mut world.store);

    // A second, parallel edge in the same island: merge of an island with
    // itself must be a no-op.
    make_constraint(
        &mut world.store,
        DistanceConstraint::new([a, b], [Vec3::ZERO, Vec3::ZERO], 1.0),
    );
    world.update();

    let after = atoll_coordinator::island_entities(&mut world.store);
    assert_eq!(before, after, "island handle survives self-merge");
    let island = world.store.expect::<Island>(after[0]);
    assert_eq!(island.nodes.len(), 2);
    assert_eq!(island.edges.len(), 2);
}
