//! The pure decision step of a reconciliation pass.
//!
//! `resolve` takes a license, its scanned roster (whose records carry the
//! cached session snapshots), a working copy of the license's switchover
//! engine, and the input that triggered the pass. It returns the active
//! instance, the full route set and every status update. Nothing here
//! touches the store, the network or the clock.

use seatgrid_routes::{generate, RouteConfig, RouteSet};
use seatgrid_state::{
    InstanceEntry, InstanceKey, InstanceRecord, InstanceStatus, LicenseRecord, LicenseStatus,
};
use seatgrid_switchover::{
    Promotion, Resolution, RosterChange, SwitchoverEngine, SwitchoverRequest,
};

/// What triggered a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassInput {
    /// Re-derive everything from current state.
    Resync,
    /// A switchover request.
    Request(SwitchoverRequest),
    /// Fresh session snapshot for the named instance.
    SessionUpdate(String),
    /// The named instance was deleted.
    InstanceDeleted(String),
}

/// Output of [`resolve`].
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub active: Option<String>,
    pub routes: RouteSet,
    pub license_status: LicenseStatus,
    pub instance_statuses: Vec<(InstanceKey, InstanceStatus)>,
    /// Set when the input was a switchover request.
    pub resolution: Option<Resolution>,
    pub promotion: Option<Promotion>,
    pub roster_changes: Vec<RosterChange>,
}

/// Decide the license's state for one pass.
///
/// `engine` is mutated in place; callers pass a working copy and commit it
/// only once the outcome is durably recorded.
pub fn resolve(
    license: &LicenseRecord,
    roster: &[InstanceRecord],
    engine: &mut SwitchoverEngine,
    input: &PassInput,
    config: &RouteConfig,
    now: u64,
) -> Resolved {
    engine.sync_license(license);
    // Roster corrections first, so a request never waits on an instance
    // that is already gone or on its way out.
    let mut roster_changes = engine.reconcile_roster(roster);

    let mut resolution = None;
    let mut promotion = None;
    match input {
        PassInput::Resync => {}
        PassInput::Request(request) => {
            resolution = Some(engine.request(request, roster, now));
        }
        PassInput::SessionUpdate(name) => {
            if let Some(reporter) = roster.iter().find(|i| &i.name == name) {
                promotion = engine.on_session_update(reporter, roster, now);
            }
        }
        PassInput::InstanceDeleted(name) => {
            engine.on_instance_deleted(name);
        }
    }
    roster_changes.extend(engine.reconcile_roster(roster));

    let active = engine.active().map(str::to_string);
    let routes = generate(license, roster, active.as_deref(), config);

    let warning = match &resolution {
        Some(Resolution::Rejected(rejection)) => Some(rejection.to_string()),
        Some(Resolution::Applied { .. }) => None,
        _ if promotion.is_some() => None,
        _ => roster_changes
            .iter()
            .find_map(RosterChange::warning)
            .or_else(|| license.status.warning.clone()),
    };

    let active_instance_stats = active
        .as_deref()
        .and_then(|name| roster.iter().find(|i| i.name == name))
        .map(|i| i.session.clone());

    let license_status = LicenseStatus {
        active_instance: active.clone(),
        instances: routes
            .routes
            .iter()
            .map(|r| InstanceEntry {
                name: r.instance.clone(),
                state: r.state,
            })
            .collect(),
        queued: engine.queued().cloned(),
        warning,
        stale: false,
        routes_digest: Some(routes.digest()),
        active_instance_stats,
    };

    let instance_statuses = roster
        .iter()
        .filter_map(|inst| {
            routes.get(&inst.name).map(|route| {
                (
                    inst.table_key(),
                    InstanceStatus {
                        state: route.state,
                        hostname: Some(route.hostname.clone()),
                        error: None,
                    },
                )
            })
        })
        .collect();

    Resolved {
        active,
        routes,
        license_status,
        instance_statuses,
        resolution,
        promotion,
        roster_changes,
    }
}
