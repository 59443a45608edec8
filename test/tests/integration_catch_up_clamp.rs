//! A worker that has fallen far behind the wall clock snaps its timestamp
//! forward instead of grinding through every missed step: the lag after one
//! step is bounded by `max_lagging_steps` fixed steps, and the island then
//! converges back to real time.
//!
//! The worker is driven synchronously here (stopped dispatcher), with this
//! test playing the coordinator's role on the other end of the channel.

use atoll_shared::math::{Quat, Vec3};
use atoll_shared::{
    performance_time, AngVel, ComponentValue, DeltaBuilder, DynamicTag, Entity, EntityMap,
    Inertial, Island, IslandTimestamp, JobDispatcher, LinVel, MaterialTable, Message,
    MessageChannel, Orientation, Position, ProceduralTag, Settings, Shape, Store, WorldAabb,
};
use atoll_worker::WorkerHandle;

fn settings() -> Settings {
    Settings {
        gravity: Vec3::ZERO,
        island_time_to_sleep: 3600.0,
        ..Settings::default()
    }
}

fn make_store_with_island() -> (Store, Entity) {
    let mut store = Store::new();
    let island = store.create();
    store.emplace(island, IslandTimestamp(performance_time()));
    store.emplace(island, Island::default());
    (store, island)
}

fn add_body(store: &mut Store, pos: Vec3) -> Entity {
    let entity = store.create();
    let shape = Shape::Sphere { radius: 0.5 };
    store.emplace(entity, Position(pos));
    store.emplace(entity, Orientation(Quat::IDENTITY));
    store.emplace(entity, LinVel(Vec3::ZERO));
    store.emplace(entity, AngVel(Vec3::ZERO));
    store.emplace(
        entity,
        Inertial::new(1.0, shape.moment_of_inertia(1.0), Vec3::ZERO),
    );
    store.emplace(entity, WorldAabb(shape.aabb(pos, Quat::IDENTITY)));
    store.emplace(entity, shape);
    store.emplace(entity, DynamicTag);
    store.emplace(entity, ProceduralTag);
    entity
}

fn drain_into(channel: &MessageChannel, store: &mut Store, map: &mut EntityMap) {
    for message in channel.drain() {
        if let Message::IslandDelta(delta) = message {
            delta.import(store, map);
        }
    }
}

#[test]
fn lagging_island_timestamp_is_clamped_then_converges() {
    let fixed_dt = settings().fixed_dt as f64;
    let (mut store, island) = make_store_with_island();
    let body = add_body(&mut store, Vec3::ZERO);

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
    builder.created_all_from(&store, body);
    coordinator_end.send(Message::IslandDelta(builder.finish()));
    handle.update(); // init

    // Teleport the island 20 steps into the past.
    let lagged = performance_time() - 20.0 * fixed_dt;
    let mut builder = DeltaBuilder::new();
    builder.updated(
        island,
        ComponentValue::IslandTimestamp(IslandTimestamp(lagged)),
    );
    coordinator_end.send(Message::IslandDelta(builder.finish()));
    handle.update(); // processes the lag and runs one step

    let mut map = EntityMap::new();
    drain_into(&coordinator_end, &mut store, &mut map);
    let after_one_step = store.expect::<IslandTimestamp>(island).0;
    let lag = performance_time() - after_one_step;
    assert!(
        lag <= 11.0 * fixed_dt,
        "timestamp must snap to within max_lagging_steps of the clock, lag = {} steps",
        lag / fixed_dt
    );
    assert!(
        lag >= 9.0 * fixed_dt,
        "clamp must not fast-forward beyond the bound, lag = {} steps",
        lag / fixed_dt
    );

    // Catch-up: each synchronous update advances one fixed step until the
    // island is within one step of the wall clock.
    for _ in 0..40 {
        handle.update();
    }
    drain_into(&coordinator_end, &mut store, &mut map);
    let converged = store.expect::<IslandTimestamp>(island).0;
    let lag = performance_time() - converged;
    assert!(
        lag < 2.0 * fixed_dt,
        "island failed to converge, lag = {} steps",
        lag / fixed_dt
    );

    handle.terminate();
    handle.join();
}
