//! User mutations reach the owning worker through `refresh`: the staged
//! delta carries the new component, and the worker recomputes dependent
//! fields (AABB here) before its next broadphase, which then flow back.

use std::time::Duration;

use atoll_shared::math::Vec3;
use atoll_shared::{Position, WorldAabb};
use atoll_test::{wait_until, SimWorld};

#[test]
fn refreshed_position_moves_the_worker_side_aabb() {
    let mut world = SimWorld::with_settings(SimWorld::awake_settings());
    let body = world.add_sphere(Vec3::ZERO, Vec3::ZERO, 0.0);

    // Wait for the first round trip so the worker is live.
    let live = wait_until(&mut world, Duration::from_secs(5), |store| {
        store
            .get::<WorldAabb>(body)
            .map(|aabb| aabb.0.center().length() < 0.01)
            .unwrap_or(false)
    });
    assert!(live);

    let target = Vec3::new(5.0, 0.0, 0.0);
    world.store.replace(body, Position(target));
    atoll_coordinator::refresh::<(Position,)>(&mut world.store, body);

    let propagated = wait_until(&mut world, Duration::from_secs(5), |store| {
        store
            .get::<WorldAabb>(body)
            .map(|aabb| (aabb.0.center() - target).length() < 0.01)
            .unwrap_or(false)
    });
    assert!(
        propagated,
        "worker never recomputed the AABB around the refreshed position"
    );
    // The worker ships its pose continuously; the authoritative position
    // settles on the refreshed value.
    let position = world.store.get::<Position>(body).unwrap().0;
    assert!((position - target).length() < 0.01);
}
