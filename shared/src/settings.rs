use crate::math::{Scalar, Vec3, PI};

/// External system hook, invoked by the island worker with its private
/// store. The host installs these to run custom systems inside the fixed
/// step without sharing state across threads.
pub type ExternalSystemFn = fn(&mut crate::store::Store);

/// Simulation tuning shared by the coordinator and every island worker.
/// The coordinator owns the authoritative copy and broadcasts changes via
/// `Message::SetSettings`.
#[derive(Clone, Copy, Debug)]
pub struct Settings {
    /// Fixed timestep in seconds. Workers advance time only in multiples
    /// of this value.
    pub fixed_dt: Scalar,
    pub paused: bool,
    /// Default gravity acceleration assigned to new dynamic bodies.
    pub gravity: Vec3,
    /// Velocity-solver iteration count.
    pub num_solver_iterations: u32,
    /// Steps a worker may lag behind the wall clock before its timestamp is
    /// snapped forward.
    pub max_lagging_steps: u32,
    /// Seconds an island must stay below the sleep thresholds before it is
    /// put to sleep.
    pub island_time_to_sleep: Scalar,
    pub island_linear_sleep_threshold: Scalar,
    pub island_angular_sleep_threshold: Scalar,
    /// Debounce applied between a topology change and the connectivity
    /// recalculation that may request a split.
    pub split_delay: f64,
    pub external_system_init: Option<ExternalSystemFn>,
    pub external_system_pre_step: Option<ExternalSystemFn>,
    pub external_system_post_step: Option<ExternalSystemFn>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fixed_dt: 1.0 / 60.0,
            paused: false,
            gravity: Vec3::new(0.0, -9.8, 0.0),
            num_solver_iterations: 10,
            max_lagging_steps: 10,
            island_time_to_sleep: 2.0,
            island_linear_sleep_threshold: 0.005,
            island_angular_sleep_threshold: PI / 48.0,
            split_delay: 0.6,
            external_system_init: None,
            external_system_pre_step: None,
            external_system_post_step: None,
        }
    }
}

/// Distance at which a persistent contact point is considered broken and
/// gets destroyed, and within which nearby result points are merged.
pub const CONTACT_BREAKING_THRESHOLD: Scalar = 0.02;

/// AABB inflation used when deciding whether a pair of bodies should get a
/// contact manifold. Large enough that a manifold exists before the shapes
/// actually touch at stepped velocities.
pub const MANIFOLD_SEPARATION_THRESHOLD: Scalar = CONTACT_BREAKING_THRESHOLD * 4.0 + 0.06;
