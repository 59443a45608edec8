use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Monotonic time in seconds since the first call in this process. All
/// island timestamps and scheduling decisions are expressed on this clock.
pub fn performance_time() -> f64 {
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_secs_f64()
}
