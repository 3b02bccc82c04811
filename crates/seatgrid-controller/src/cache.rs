//! Per-license in-memory state.
//!
//! Each license gets a slot behind its own async mutex. Holding the slot
//! lock for the duration of a pass serializes passes of one license while
//! passes of different licenses run concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use seatgrid_routes::RouteSet;
use seatgrid_switchover::SwitchoverEngine;

/// Cached state of one license.
#[derive(Default)]
pub(crate) struct LicenseSlot {
    /// `None` until hydrated from the directory.
    pub engine: Option<SwitchoverEngine>,
    /// Last route set every sink accepted.
    pub committed: Option<RouteSet>,
    /// `(instance key, address)` currently probed for this license.
    pub probed: Option<(String, String)>,
}

#[derive(Default)]
pub(crate) struct LicenseCache {
    slots: Mutex<HashMap<String, Arc<tokio::sync::Mutex<LicenseSlot>>>>,
}

impl LicenseCache {
    /// The slot for a license, created empty on first use.
    pub fn slot(&self, license_key: &str) -> Arc<tokio::sync::Mutex<LicenseSlot>> {
        let mut slots = self.slots.lock().expect("license cache lock");
        slots
            .entry(license_key.to_string())
            .or_default()
            .clone()
    }

    /// Drop a retired license's slot unless another pass is waiting on it.
    ///
    /// The caller holds one handle to the slot; any further handle belongs to
    /// a queued pass, which must keep serializing on the same mutex.
    pub fn release(&self, license_key: &str) {
        let mut slots = self.slots.lock().expect("license cache lock");
        if slots
            .get(license_key)
            .is_some_and(|slot| Arc::strong_count(slot) <= 2)
        {
            slots.remove(license_key);
        }
    }

    pub fn keys(&self) -> Vec<String> {
        let slots = self.slots.lock().expect("license cache lock");
        let mut keys: Vec<String> = slots.keys().cloned().collect();
        keys.sort();
        keys
    }
}
