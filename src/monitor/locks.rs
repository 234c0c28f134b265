use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;

/// One mutex per device. Heartbeat ingest, the periodic sweep and admin
/// actions all take the device's lock around read-decide-write, so two
/// evaluations of the same device never interleave.
#[derive(Debug, Default)]
pub struct DeviceLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DeviceLocks {
    pub fn handle(&self, device_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(device_id.to_string())
            .or_default()
            .value()
            .clone()
    }
}

/// Locks a handle obtained from [`DeviceLocks::handle`]. The guarded data is
/// `()`, so a poisoned lock carries no broken state and is simply reused.
pub fn lock(handle: &Mutex<()>) -> MutexGuard<'_, ()> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}
