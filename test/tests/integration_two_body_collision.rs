//! Head-on elastic collision between two unit-mass spheres: after the
//! contact impulse the velocities swap, and the islands that met for the
//! collision were merged on the way in.

use std::time::Duration;

use atoll_shared::math::Vec3;
use atoll_shared::LinVel;
use atoll_test::{wait_until, SimWorld};

#[test]
fn elastic_spheres_swap_velocities() {
    let mut world = SimWorld::with_settings(SimWorld::awake_settings());
    let a = world.add_sphere(Vec3::new(-1.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0), 1.0);
    let b = world.add_sphere(Vec3::new(1.0, 0.0, 0.0), Vec3::new(-2.0, 0.0, 0.0), 1.0);

    // Two disjoint bodies start out as two islands.
    assert_eq!(atoll_coordinator::island_count(&mut world.store), 2);

    let collided = wait_until(&mut world, Duration::from_secs(5), |store| {
        store
            .get::<LinVel>(a)
            .map(|vel| vel.0.x < -1.0)
            .unwrap_or(false)
    });
    assert!(collided, "spheres never exchanged their impulse");

    let vel_a = world.store.get::<LinVel>(a).unwrap().0;
    let vel_b = world.store.get::<LinVel>(b).unwrap().0;
    assert!(
        (vel_a.x + 2.0).abs() < 1e-3,
        "elastic swap for a, got {}",
        vel_a.x
    );
    assert!(
        (vel_b.x - 2.0).abs() < 1e-3,
        "elastic swap for b, got {}",
        vel_b.x
    );
    assert!(vel_a.y.abs() < 1e-3 && vel_a.z.abs() < 1e-3);
}

#[test]
fn approaching_bodies_merge_into_one_island() {
    let mut world = SimWorld::with_settings(SimWorld::awake_settings());
    let a = world.add_sphere(Vec3::new(-1.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0), 1.0);
    let b = world.add_sphere(Vec3::new(1.0, 0.0, 0.0), Vec3::new(-2.0, 0.0, 0.0), 1.0);

    let merged = wait_until(&mut world, Duration::from_secs(5), |store| {
        atoll_coordinator::island_count(store) == 1
    });
    assert!(merged, "islands of approaching bodies must fuse");
    assert!(atoll_coordinator::manifold_exists(&mut world.store, a, b));
    assert!(atoll_coordinator::get_manifold_entity(&mut world.store, b, a).is_some());
}
