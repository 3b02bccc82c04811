//! In-memory route table — the committed routes of every license.
//!
//! The table is the sink that is always present. It stores the last
//! committed `RouteSet` per license and answers which backend serves a
//! public hostname within a namespace.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::generator::{BackendRef, RouteSet};
use crate::sink::{ApplyStats, RouteSink, SinkError};

/// Shared, clonable route table keyed by `{namespace}/{license}`.
#[derive(Clone, Default)]
pub struct RouteTable {
    sets: Arc<RwLock<HashMap<String, RouteSet>>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last committed set of a license.
    pub fn routes_for(&self, license_key: &str) -> Option<RouteSet> {
        let sets = self.sets.read().expect("route table lock");
        sets.get(license_key).cloned()
    }

    /// Backend currently serving `hostname` in `namespace`.
    ///
    /// Looked up from the committed sets, so a renamed or removed instance
    /// stops resolving as soon as its license's new set lands.
    pub fn resolve(&self, namespace: &str, hostname: &str) -> Option<BackendRef> {
        let sets = self.sets.read().expect("route table lock");
        sets.values()
            .filter(|set| set.namespace == namespace)
            .flat_map(|set| &set.routes)
            .find(|route| route.hostname == hostname)
            .map(|route| route.backend.clone())
    }
}

impl RouteSink for RouteTable {
    fn apply(&self, routes: &RouteSet) -> Result<ApplyStats, SinkError> {
        let key = routes.license_key();
        let mut sets = self.sets.write().expect("route table lock");
        let mut stats = ApplyStats::default();

        if let Some(previous) = sets.get(&key) {
            for old in &previous.routes {
                match routes.get(&old.instance) {
                    Some(new) if new == old => stats.unchanged += 1,
                    Some(_) => {}
                    None => stats.removed += 1,
                }
            }
        }
        stats.written = routes.routes.len() as u32 - stats.unchanged;
        sets.insert(key.clone(), routes.clone());

        debug!(license = %key, routes = routes.routes.len(), "route table updated");
        Ok(stats)
    }

    fn remove_license(&self, namespace: &str, license: &str) -> Result<u32, SinkError> {
        let key = format!("{namespace}/{license}");
        let mut sets = self.sets.write().expect("route table lock");
        let Some(set) = sets.remove(&key) else {
            return Ok(0);
        };
        debug!(license = %key, "route table entries removed");
        Ok(set.routes.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{generate, RouteConfig};
    use seatgrid_state::{InstanceRecord, LicenseRecord};

    fn route_set(names: &[&str], active: Option<&str>) -> RouteSet {
        let license = LicenseRecord::new("tables", "main", 1);
        let instances: Vec<_> = names
            .iter()
            .map(|n| InstanceRecord::new("tables", n, "main", 1))
            .collect();
        generate(&license, &instances, active, &RouteConfig::default())
    }

    #[test]
    fn resolves_hostnames_to_backends() {
        let table = RouteTable::new();
        table.apply(&route_set(&["alpha", "beta"], Some("alpha"))).unwrap();

        assert_eq!(
            table.resolve("tables", "alpha.seats.local").unwrap().service,
            "instance-alpha"
        );
        assert_eq!(
            table.resolve("tables", "beta.seats.local").unwrap().service,
            "standby-page"
        );
        assert!(table.resolve("tables", "ghost.seats.local").is_none());
    }

    #[test]
    fn switch_updates_resolution() {
        let table = RouteTable::new();
        table.apply(&route_set(&["alpha", "beta"], Some("alpha"))).unwrap();
        let stats = table.apply(&route_set(&["alpha", "beta"], Some("beta"))).unwrap();

        assert_eq!(stats.written, 2);
        assert_eq!(
            table.resolve("tables", "alpha.seats.local").unwrap().service,
            "standby-page"
        );
        assert_eq!(
            table.resolve("tables", "beta.seats.local").unwrap().service,
            "instance-beta"
        );
    }

    #[test]
    fn reapply_counts_unchanged() {
        let table = RouteTable::new();
        let set = route_set(&["alpha", "beta"], None);
        table.apply(&set).unwrap();

        let stats = table.apply(&set).unwrap();
        assert_eq!(stats.unchanged, 2);
        assert_eq!(stats.written, 0);
    }

    #[test]
    fn dropped_instance_hostname_is_removed() {
        let table = RouteTable::new();
        table.apply(&route_set(&["alpha", "beta"], None)).unwrap();
        let stats = table.apply(&route_set(&["alpha"], None)).unwrap();

        assert_eq!(stats.removed, 1);
        assert!(table.resolve("tables", "beta.seats.local").is_none());
    }

    #[test]
    fn remove_license_forgets_everything() {
        let table = RouteTable::new();
        table.apply(&route_set(&["alpha"], Some("alpha"))).unwrap();

        assert_eq!(table.remove_license("tables", "main").unwrap(), 1);
        assert!(table.routes_for("tables/main").is_none());
        assert!(table.resolve("tables", "alpha.seats.local").is_none());
    }

    #[test]
    fn renamed_hostname_stops_resolving() {
        let table = RouteTable::new();
        let mut set = route_set(&["alpha"], Some("alpha"));
        table.apply(&set).unwrap();

        set.routes[0].hostname = "alpha.play.example.com".into();
        let stats = table.apply(&set).unwrap();
        assert_eq!(stats.written, 1);
        assert!(table.resolve("tables", "alpha.seats.local").is_none());
        assert_eq!(
            table.resolve("tables", "alpha.play.example.com").unwrap().service,
            "instance-alpha"
        );
    }

    #[test]
    fn same_hostname_in_other_namespace_is_independent() {
        let table = RouteTable::new();
        table.apply(&route_set(&["alpha"], Some("alpha"))).unwrap();

        let license = LicenseRecord::new("lobby", "main", 1);
        let other = generate(
            &license,
            &[InstanceRecord::new("lobby", "alpha", "main", 1)],
            None,
            &RouteConfig::default(),
        );
        table.apply(&other).unwrap();
        table.remove_license("lobby", "main").unwrap();

        assert_eq!(
            table.resolve("tables", "alpha.seats.local").unwrap().service,
            "instance-alpha"
        );
        assert!(table.resolve("lobby", "alpha.seats.local").is_none());
    }
}
