//! Switchover engine — the per-license decision state machine.
//!
//! The engine owns the license's view of who is active and what is queued.
//! Every method leaves at most one instance active; there is no
//! intermediate state with two actives because the active slot is a
//! single `Option<String>` that is replaced, never appended to.

use tracing::{debug, info, warn};

use seatgrid_state::{
    InstanceRecord, LicenseRecord, PlayerCount, QueuedSwitchover, SwitchoverMode,
};

use crate::decision::{
    InstanceRole, Promotion, Rejection, Resolution, RosterChange, SwitchoverConflict,
    SwitchoverRequest,
};

/// Decision state for one license.
#[derive(Debug, Clone)]
pub struct SwitchoverEngine {
    license: String,
    active: Option<String>,
    queued: Option<QueuedSwitchover>,
    default_mode: SwitchoverMode,
    /// Snapshots older than this are treated as unknown.
    stale_after_secs: u64,
}

impl SwitchoverEngine {
    /// Create an engine with no active instance.
    pub fn new(license: &str, default_mode: SwitchoverMode, stale_after_secs: u64) -> Self {
        Self {
            license: license.to_string(),
            active: None,
            queued: None,
            default_mode,
            stale_after_secs,
        }
    }

    /// Hydrate from the durable license record.
    pub fn from_license(license: &LicenseRecord, stale_after_secs: u64) -> Self {
        Self {
            license: license.table_key(),
            active: license.active_instance.clone(),
            queued: license.queued.clone(),
            default_mode: license.default_switchover_mode,
            stale_after_secs,
        }
    }

    /// Refresh fields an operator may have edited on the license.
    pub fn sync_license(&mut self, license: &LicenseRecord) {
        self.default_mode = license.default_switchover_mode;
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn queued(&self) -> Option<&QueuedSwitchover> {
        self.queued.as_ref()
    }

    /// Copy the decided state onto a license record for persistence.
    pub fn write_to(&self, license: &mut LicenseRecord) {
        license.active_instance = self.active.clone();
        license.queued = self.queued.clone();
    }

    /// Role of an instance as far as this engine knows.
    pub fn role_of(&self, instance: &str) -> InstanceRole {
        if self.active.as_deref() == Some(instance) {
            InstanceRole::Active
        } else if self.queued.as_ref().is_some_and(|q| q.target == instance) {
            InstanceRole::Queued
        } else {
            InstanceRole::Standby
        }
    }

    /// Decide a switchover request.
    ///
    /// `roster` is the license's current instance list; `now` is used to age
    /// session snapshots.
    pub fn request(
        &mut self,
        request: &SwitchoverRequest,
        roster: &[InstanceRecord],
        now: u64,
    ) -> Resolution {
        let target_name = request.target.as_str();
        let Some(target) = find(roster, target_name) else {
            return Resolution::Rejected(Rejection::UnknownTarget(request.target.clone()));
        };

        if target.is_scheduled_for_deletion() {
            info!(license = %self.license, target = target_name, "rejecting activation of instance scheduled for deletion");
            return Resolution::Rejected(Rejection::ScheduledForDeletion(request.target.clone()));
        }

        debug!(
            license = %self.license,
            target = target_name,
            role = ?InstanceRole::ActivationRequested,
            "switchover requested"
        );

        let current = match self.active.as_deref() {
            None => return self.apply(target_name, false),
            Some(active) if active == target_name => return self.apply(target_name, false),
            Some(active) => match find(roster, active) {
                Some(record) => record,
                // Active points at a record that is gone; nothing to protect.
                None => return self.apply(target_name, false),
            },
        };

        let mode = current.effective_mode(self.default_mode);
        let players = current.session.player_count(now, self.stale_after_secs);
        let drained = matches!(players, PlayerCount::Unprobed | PlayerCount::Known(0));

        match mode {
            SwitchoverMode::Block => {
                if drained {
                    return self.apply(target_name, false);
                }
                let conflict = SwitchoverConflict {
                    target: request.target.clone(),
                    blocking_instance: current.name.clone(),
                    connected_players: match players {
                        PlayerCount::Known(n) => Some(n),
                        _ => None,
                    },
                };
                info!(
                    license = %self.license,
                    target = target_name,
                    blocking = %current.name,
                    players = ?conflict.connected_players,
                    "switchover blocked"
                );
                Resolution::Rejected(Rejection::Conflict(conflict))
            }
            SwitchoverMode::Queue => {
                if drained {
                    return self.apply(target_name, false);
                }
                let replaced = self
                    .queued
                    .replace(QueuedSwitchover {
                        target: request.target.clone(),
                        behind: current.name.clone(),
                        requested_at: request.requested_at,
                    })
                    .map(|q| q.target)
                    .filter(|prev| prev != target_name);
                info!(
                    license = %self.license,
                    target = target_name,
                    behind = %current.name,
                    replaced = ?replaced,
                    "switchover queued"
                );
                Resolution::Queued {
                    behind: current.name.clone(),
                    replaced,
                }
            }
            SwitchoverMode::Force => {
                if !drained {
                    warn!(
                        license = %self.license,
                        target = target_name,
                        displaced = %current.name,
                        players = ?players,
                        "forcing switchover over live sessions"
                    );
                }
                self.apply(target_name, !drained)
            }
        }
    }

    /// React to a fresh session snapshot.
    ///
    /// If `reporter` is the active instance, a request is queued behind it,
    /// and it has drained to zero players, the queued target is promoted.
    pub fn on_session_update(
        &mut self,
        reporter: &InstanceRecord,
        roster: &[InstanceRecord],
        now: u64,
    ) -> Option<Promotion> {
        if self.active.as_deref() != Some(reporter.name.as_str()) {
            return None;
        }
        let queued = self.queued.as_ref()?;
        if reporter.session.player_count(now, self.stale_after_secs) != PlayerCount::Known(0) {
            return None;
        }

        let target = queued.target.clone();
        match find(roster, &target) {
            Some(record) if !record.is_scheduled_for_deletion() => {
                let from = reporter.name.clone();
                self.active = Some(target.clone());
                self.queued = None;
                info!(license = %self.license, %from, to = %target, "queued switchover promoted");
                Some(Promotion { from, to: target })
            }
            _ => {
                debug!(license = %self.license, %target, "queued target no longer eligible, dropping");
                self.queued = None;
                None
            }
        }
    }

    /// Forget an instance that was deleted.
    ///
    /// Returns true if the engine state changed.
    pub fn on_instance_deleted(&mut self, instance: &str) -> bool {
        let mut changed = false;
        if self.queued.as_ref().is_some_and(|q| q.target == instance) {
            debug!(license = %self.license, %instance, "queued target deleted, dropping request");
            self.queued = None;
            changed = true;
        }
        if self.active.as_deref() == Some(instance) {
            info!(license = %self.license, %instance, "active instance deleted, clearing");
            self.active = None;
            changed = true;
        }
        changed
    }

    /// Bring the engine in line with the scanned roster.
    pub fn reconcile_roster(&mut self, roster: &[InstanceRecord]) -> Vec<RosterChange> {
        let mut changes = Vec::new();

        if let Some(active) = self.active.clone() {
            match find(roster, &active) {
                None => {
                    self.active = None;
                    changes.push(RosterChange::ActiveRemoved(active));
                }
                Some(record) if record.is_scheduled_for_deletion() => {
                    warn!(license = %self.license, instance = %active, "active instance scheduled for deletion, forcing standby");
                    self.active = None;
                    changes.push(RosterChange::ActiveDemoted(active));
                }
                Some(_) => {}
            }
        }

        if let Some(queued) = self.queued.clone() {
            let target_ok = find(roster, &queued.target)
                .is_some_and(|r| !r.is_scheduled_for_deletion());
            let waiting_on_active = self.active.as_deref() == Some(queued.behind.as_str());
            if !target_ok || !waiting_on_active {
                self.queued = None;
                changes.push(RosterChange::QueueDropped {
                    target: queued.target,
                });
            }
        }

        changes
    }

    fn apply(&mut self, target: &str, lossy: bool) -> Resolution {
        let previous = self
            .active
            .replace(target.to_string())
            .filter(|prev| prev != target);
        // Any resolved switchover supersedes an outstanding queued request.
        if self.queued.take().is_some() {
            debug!(license = %self.license, "queued request superseded");
        }
        info!(
            license = %self.license,
            active = target,
            previous = ?previous,
            lossy,
            "switchover applied"
        );
        Resolution::Applied { previous, lossy }
    }
}

fn find<'a>(roster: &'a [InstanceRecord], name: &str) -> Option<&'a InstanceRecord> {
    roster.iter().find(|i| i.name == name)
}
