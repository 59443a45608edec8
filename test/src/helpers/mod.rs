use std::sync::Once;
use std::time::Duration;

use atoll_coordinator::{make_rigid_body, RigidBodyDef, RigidBodyKind};
use atoll_shared::math::Vec3;
use atoll_shared::{Entity, Material, Scalar, Settings, Shape, Store};

static DISPATCHER_INIT: Once = Once::new();

/// Starts the global dispatcher exactly once for the whole test binary.
/// It is intentionally never stopped; every test shares the pool.
pub fn ensure_dispatcher() {
    DISPATCHER_INIT.call_once(|| {
        atoll_coordinator::init_with_workers(4);
    });
}

/// A store with an attached coordinator, detached (and its workers joined)
/// on drop so tests cannot leak running islands.
pub struct SimWorld {
    pub store: Store,
}

impl SimWorld {
    pub fn new() -> Self {
        Self::with_settings(Settings::default())
    }

    pub fn with_settings(settings: Settings) -> Self {
        ensure_dispatcher();
        let mut store = Store::new();
        atoll_coordinator::attach_with_settings(&mut store, settings);
        Self { store }
    }

    /// Settings for scenario tests: no gravity and sleep pushed far out so
    /// islands stay awake unless a test asks otherwise.
    pub fn awake_settings() -> Settings {
        Settings {
            gravity: Vec3::ZERO,
            island_time_to_sleep: 3600.0,
            ..Settings::default()
        }
    }

    pub fn update(&mut self) {
        atoll_coordinator::update(&mut self.store);
    }

    pub fn add_sphere(&mut self, pos: Vec3, vel: Vec3, restitution: Scalar) -> Entity {
        make_rigid_body(
            &mut self.store,
            RigidBodyDef {
                position: pos,
                linvel: vel,
                shape: Some(Shape::Sphere { radius: 0.5 }),
                material: Material {
                    restitution,
                    friction: 0.0,
                    id: None,
                },
                gravity: Some(Vec3::ZERO),
                ..RigidBodyDef::default()
            },
        )
    }

    /// A body with no shape: participates in the graph but never collides,
    /// which keeps island topology tests free of incidental contacts.
    pub fn add_shapeless_body(&mut self, pos: Vec3) -> Entity {
        make_rigid_body(
            &mut self.store,
            RigidBodyDef {
                position: pos,
                shape: None,
                gravity: Some(Vec3::ZERO),
                ..RigidBodyDef::default()
            },
        )
    }

    pub fn add_static_plane(&mut self) -> Entity {
        make_rigid_body(
            &mut self.store,
            RigidBodyDef {
                kind: RigidBodyKind::Static,
                shape: Some(Shape::Plane {
                    normal: Vec3::Y,
                    constant: 0.0,
                }),
                ..RigidBodyDef::default()
            },
        )
    }
}

impl Drop for SimWorld {
    fn drop(&mut self) {
        atoll_coordinator::detach(&mut self.store);
    }
}

impl Default for SimWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Repeatedly updates the world until `predicate` holds or `timeout`
/// elapses. Returns whether the predicate held.
pub fn wait_until(
    world: &mut SimWorld,
    timeout: Duration,
    mut predicate: impl FnMut(&mut Store) -> bool,
) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        world.update();
        if predicate(&mut world.store) {
            return true;
        }
        if std::time::Instant::now() > deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}
