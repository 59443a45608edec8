//! Presentation interpolation: the extrapolated transform never strays more
//! than one fixed step of velocity from the authoritative state, and
//! `snap_presentation` collapses the difference.

use std::time::Duration;

use atoll_shared::math::Vec3;
use atoll_shared::{LinVel, Position, PresentPosition};
use atoll_test::{wait_until, SimWorld};

#[test]
fn present_position_stays_within_one_step_of_actual() {
    let mut world = SimWorld::with_settings(SimWorld::awake_settings());
    let speed = 3.0;
    let body = world.add_sphere(Vec3::ZERO, Vec3::new(speed, 0.0, 0.0), 0.0);
    let fixed_dt = atoll_coordinator::get_fixed_dt(&mut world.store);

    let moving = wait_until(&mut world, Duration::from_secs(5), |store| {
        store
            .get::<Position>(body)
            .map(|pos| pos.0.x > 0.1)
            .unwrap_or(false)
    });
    assert!(moving);

    for _ in 0..50 {
        world.update();
        let pos = world.store.get::<Position>(body).unwrap().0;
        let vel = world.store.get::<LinVel>(body).unwrap().0;
        let present = world.store.get::<PresentPosition>(body).unwrap().0;
        assert!(
            (present - pos).length() <= vel.length() * fixed_dt + 1e-4,
            "presentation bound violated: {} > {}",
            (present - pos).length(),
            vel.length() * fixed_dt
        );
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn snap_presentation_resets_present_to_actual() {
    let mut world = SimWorld::with_settings(SimWorld::awake_settings());
    let body = world.add_sphere(Vec3::ZERO, Vec3::new(3.0, 0.0, 0.0), 0.0);

    let moving = wait_until(&mut world, Duration::from_secs(5), |store| {
        store
            .get::<Position>(body)
            .map(|pos| pos.0.x > 0.1)
            .unwrap_or(false)
    });
    assert!(moving);

    atoll_coordinator::snap_presentation(&mut world.store);
    let pos = world.store.get::<Position>(body).unwrap().0;
    let present = world.store.get::<PresentPosition>(body).unwrap().0;
    assert_eq!(pos, present);
}
