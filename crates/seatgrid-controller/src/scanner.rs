//! Registry scanner — the ordered instance list of a license.

use seatgrid_state::{InstanceRecord, StateResult, StateStore};

/// Lists the instances that reference a license.
#[derive(Clone)]
pub struct RegistryScanner {
    state: StateStore,
}

impl RegistryScanner {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    /// Instances of `license_key`, ordered by creation time then name.
    ///
    /// The listing is one read transaction; any error fails the whole scan.
    pub fn scan(&self, license_key: &str) -> StateResult<Vec<InstanceRecord>> {
        let mut instances = self.state.list_instances_for_license(license_key)?;
        sort_roster(&mut instances);
        Ok(instances)
    }
}

/// Order by `created_at`, ties broken by name.
pub fn sort_roster(instances: &mut [InstanceRecord]) {
    instances.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.name.cmp(&b.name))
    });
}
