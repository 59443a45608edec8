//! Fission: destroying the bridging constraint of a merged island splits it
//! back into its original components, but only after the split debounce has
//! elapsed.

use std::time::Duration;

use atoll_coordinator::{make_constraint, DistanceConstraint};
use atoll_shared::math::Vec3;
use atoll_shared::Island;
use atoll_test::{wait_until, SimWorld};

#[test]
fn split_happens_after_the_debounce_not_before() {
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
    let bridge = make_constraint(
        &mut world.store,
        DistanceConstraint::new([a1, b0], [Vec3::ZERO, Vec3::ZERO], 18.0),
    );
    world.update();
    assert_eq!(atoll_coordinator::island_count(&mut world.store), 1);

    let split_started = std::time::Instant::now();
    world.store.destroy(bridge);
    world.update();

    // Before the debounce elapses the island must stay whole.
    while split_started.elapsed() < Duration::from_millis(450) {
        world.update();
        assert_eq!(
            atoll_coordinator::island_count(&mut world.store),
            1,
            "island split before the debounce elapsed"
        );
        std::thread::sleep(Duration::from_millis(10));
    }

    let split = wait_until(&mut world, Duration::from_secs(5), |store| {
        atoll_coordinator::island_count(store) == 2
    });
    assert!(split, "island never split after the debounce");
    assert!(
        split_started.elapsed() >= Duration::from_millis(600),
        "split cannot precede the debounce"
    );

    // The resulting islands are the pre-merge ones again, up to handles.
    let mut memberships: Vec<Vec<atoll_shared::Entity>> = Vec::new();
    for island_entity in atoll_coordinator::island_entities(&mut world.store) {
        let island = world.store.expect::<Island>(island_entity);
        assert_eq!(island.nodes.len(), 2);
        assert_eq!(island.edges.len(), 1);
        let mut nodes: Vec<atoll_shared::Entity> = island.nodes.iter().copied().collect();
        nodes.sort();
        memberships.push(nodes);
    }
    memberships.sort();
    let mut expected = vec![vec![a0.min(a1), a0.max(a1)], vec![b0.min(b1), b0.max(b1)]];
    expected.sort();
    assert_eq!(memberships, expected);
}
