//! Time sources, including a manual clock for deterministic tests.

use std::time::{Duration, Instant};

pub use flock_proto::{SystemTimeProvider, TimeProvider};

/// A manually advanced time provider for simulations.
#[derive(Debug)]
pub struct ManualTimeProvider {
    instant: std::sync::RwLock<Instant>,
    system_ms: std::sync::RwLock<i64>,
}

impl ManualTimeProvider {
    pub fn new(instant: Instant, system_ms: i64) -> Self {
        Self {
            instant: std::sync::RwLock::new(instant),
            system_ms: std::sync::RwLock::new(system_ms),
        }
    }

    pub fn advance(&self, duration: Duration) {
        *self.instant.write().unwrap() += duration;
        *self.system_ms.write().unwrap() += duration.as_millis() as i64;
    }
}

impl TimeProvider for ManualTimeProvider {
    fn now_instant(&self) -> Instant {
        *self.instant.read().unwrap()
    }

    fn now_system_ms(&self) -> i64 {
        *self.system_ms.read().unwrap()
    }
}
