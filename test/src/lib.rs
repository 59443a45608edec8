//! Shared helpers for the atoll integration test suite.

pub mod helpers;

pub use helpers::{ensure_dispatcher, wait_until, SimWorld};
