//! The split handshake between a worker and its coordinator: the worker
//! flags `splitting` (release) and sends the advisory message, suspends
//! rescheduling, and only the coordinator-side `split()` call produces the
//! components and resumes it. Driven synchronously against a stopped
//! dispatcher, with this test standing in for the coordinator.

use std::time::Duration;

use atoll_shared::math::{Quat, Vec3};
use atoll_shared::{
    performance_time, AngVel, DeltaBuilder, DistanceConstraint, DynamicTag, Entity, EntityMap,
    Inertial, Island, IslandTimestamp, JobDispatcher, LinVel, MaterialTable, Message,
    MessageChannel, Orientation, Position, ProceduralTag, Settings, Store,
};
use atoll_worker::WorkerHandle;

fn settings() -> Settings {
    Settings {
        gravity: Vec3::ZERO,
        island_time_to_sleep: 3600.0,
        split_delay: 0.2,
        ..Settings::default()
    }
}

fn add_shapeless_body(store: &mut Store, pos: Vec3) -> Entity {
    let entity = store.create();
    store.emplace(entity, Position(pos));
    store.emplace(entity, Orientation(Quat::IDENTITY));
    store.emplace(entity, LinVel(Vec3::ZERO));
    store.emplace(entity, AngVel(Vec3::ZERO));
    store.emplace(entity, Inertial::new(1.0, Vec3::splat(0.4), Vec3::ZERO));
    store.emplace(entity, DynamicTag);
    store.emplace(entity, ProceduralTag);
    entity
}

#[test]
fn worker_suspends_on_split_and_resumes_after_execution() {
    let mut store = Store::new();
    let island = store.create();
    store.emplace(island, IslandTimestamp(performance_time()));
    store.emplace(island, Island::default());
    let a = add_shapeless_body(&mut store, Vec3::new(-1.0, 0.0, 0.0));
    let b = add_shapeless_body(&mut store, Vec3::new(1.0, 0.0, 0.0));
    let constraint = store.create();
    store.emplace(
        constraint,
        DistanceConstraint::new([a, b], [Vec3::ZERO, Vec3::ZERO], 2.0),
    );

    let (coordinator_end, worker_end) = MessageChannel::pair();
    let handle = WorkerHandle::new(
        island,
        settings(),
        MaterialTable::new(),
        worker_end,
        JobDispatcher::new(),
    );

    let mut builder = DeltaBuilder::new();
    builder.created_all_from(&store, island);
    builder.created_all_from(&store, a);
    builder.created_all_from(&store, b);
    builder.created_all_from(&store, constraint);
    coordinator_end.send(Message::IslandDelta(builder.finish()));
    handle.update(); // init
    assert!(!handle.is_splitting());

    // Sever the constraint; the worker notices the topology change and,
    // after the debounce, requests a split.
    let mut builder = DeltaBuilder::new();
    builder.destroyed(constraint);
    coordinator_end.send(Message::IslandDelta(builder.finish()));

    let mut map = EntityMap::new();
    let mut split_requested = false;
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while std::time::Instant::now() < deadline && !split_requested {
        handle.update();
        for message in coordinator_end.drain() {
            match message {
                Message::IslandDelta(delta) => {
                    delta.import(&mut store, &mut map);
                }
                Message::SplitIsland => split_requested = true,
                _ => {}
            }
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(split_requested, "worker never requested the split");
    assert!(
        handle.is_splitting(),
        "the splitting flag must be visible (release/acquire) once the request is out"
    );

    // Coordinator executes the split: two components, each one body.
    let components = handle.split();
    assert_eq!(components.len(), 2);
    assert!(handle.is_splitting(), "worker stays suspended until resumed");

    let mut component_bodies: Vec<Entity> = components
        .iter()
        .map(|component| {
            assert_eq!(component.nodes.len(), 1);
            assert!(component.edges.is_empty());
            map.local(component.nodes[0])
                .expect("split component maps to a coordinator entity")
        })
        .collect();
    component_bodies.sort();
    let mut expected = vec![a, b];
    expected.sort();
    assert_eq!(component_bodies, expected);

    // Transfer the smaller component out: destroy it in the old worker,
    // then resume.
    let moved = components[1].nodes[0];
    let moved_local = map.local(moved).unwrap();
    let mut builder = DeltaBuilder::new();
    builder.destroyed(moved_local);
    coordinator_end.send(Message::IslandDelta(builder.finish()));
    handle.finish_split();
    assert!(!handle.is_splitting());

    // The worker resumes, imports the destroy first and keeps stepping the
    // remaining body.
    let before = store.expect::<IslandTimestamp>(island).0;
    std::thread::sleep(Duration::from_millis(40));
    for _ in 0..4 {
        handle.update();
        std::thread::sleep(Duration::from_millis(20));
    }
    for message in coordinator_end.drain() {
        if let Message::IslandDelta(delta) = message {
            delta.import(&mut store, &mut map);
        }
    }
    assert!(
        store.expect::<IslandTimestamp>(island).0 > before,
        "worker must keep simulating after the split"
    );

    handle.terminate();
    handle.join();
}
