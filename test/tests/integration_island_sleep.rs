//! Sleep gate: a resting island acquires the sleeping tag after the
//! configured latency, its velocities are exactly zero and its timestamp
//! stops advancing; a touching delta wakes it again.

use std::time::Duration;

use atoll_shared::math::Vec3;
use atoll_shared::{IslandTimestamp, LinVel, Position, Settings, SleepingTag};
use atoll_test::{wait_until, SimWorld};

fn sleepy_settings() -> Settings {
    Settings {
        gravity: Vec3::ZERO,
        island_time_to_sleep: 0.3,
        ..Settings::default()
    }
}

#[test]
fn resting_island_goes_to_sleep_and_freezes() {
    let mut world = SimWorld::with_settings(sleepy_settings());
    let body = world.add_sphere(Vec3::ZERO, Vec3::ZERO, 0.0);

    let slept = wait_until(&mut world, Duration::from_secs(5), |store| {
        let islands = atoll_coordinator::island_entities(store);
        islands.len() == 1 && store.has::<SleepingTag>(islands[0])
    });
    assert!(slept, "resting island never went to sleep");

    assert!(
        world.store.has::<SleepingTag>(body),
        "sleeping island implies sleeping procedural members"
    );
    assert_eq!(
        world.store.get::<LinVel>(body).unwrap().0,
        Vec3::ZERO,
        "sleeping bodies have exactly zero velocity"
    );

    // The island timestamp must not advance while asleep.
    let island_entity = atoll_coordinator::island_entities(&mut world.store)[0];
    let frozen = world.store.expect::<IslandTimestamp>(island_entity).0;
    let deadline = std::time::Instant::now() + Duration::from_millis(300);
    while std::time::Instant::now() < deadline {
        world.update();
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(
        world.store.expect::<IslandTimestamp>(island_entity).0,
        frozen,
        "sleeping island timestamp advanced"
    );
}

#[test]
fn refresh_wakes_a_sleeping_island() {
    let mut world = SimWorld::with_settings(sleepy_settings());
    let body = world.add_sphere(Vec3::ZERO, Vec3::ZERO, 0.0);

    let slept = wait_until(&mut world, Duration::from_secs(5), |store| {
        let islands = atoll_coordinator::island_entities(store);
        islands.len() == 1 && store.has::<SleepingTag>(islands[0])
    });
    assert!(slept);

    // Push the body; the staged delta plus wake-up message clears the tag.
    world
        .store
        .replace(body, LinVel(Vec3::new(1.0, 0.0, 0.0)));
    atoll_coordinator::refresh::<(LinVel,)>(&mut world.store, body);
    world.update();

    let woke = wait_until(&mut world, Duration::from_secs(5), |store| {
        let islands = atoll_coordinator::island_entities(store);
        islands.len() == 1 && !store.has::<SleepingTag>(islands[0])
    });
    assert!(woke, "island did not wake after a member was refreshed");

    let moved = wait_until(&mut world, Duration::from_secs(5), |store| {
        store
            .get::<Position>(body)
            .map(|pos| pos.0.x > 0.05)
            .unwrap_or(false)
    });
    assert!(moved, "woken body must simulate again");
}
