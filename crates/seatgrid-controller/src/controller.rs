//! Controller — runs reconciliation passes for licenses.
//!
//! A pass, always under the license's slot lock:
//! 1. read the license and scan its roster (bounded retries)
//! 2. `resolve` on a working copy of the cached engine
//! 3. persist `active_instance`/`queued` if they moved (version-guarded)
//! 4. commit the engine, push routes to every sink and then the table
//! 5. publish license and instance status
//! 6. point the session prober at the active instance
//!
//! A failure in steps 1–3 abandons the pass: the cached engine and the
//! committed routes stay as they were and the license status is marked
//! stale. A version conflict in step 3 re-runs the pass from a fresh read.
//! A rejected route push keeps the previous routes and marks the status
//! stale until a later pass gets them through.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use seatgrid_probe::SessionProber;
use seatgrid_routes::{RouteConfig, RouteSet, RouteSink, RouteTable, SinkError};
use seatgrid_state::{
    epoch_secs, split_key, InstanceRecord, InstanceStatus, StateError, StateResult, StateStore,
};
use seatgrid_switchover::{Promotion, Resolution, SwitchoverEngine, SwitchoverRequest};

use crate::cache::{LicenseCache, LicenseSlot};
use crate::error::{ControllerError, ControllerResult};
use crate::resolve::{resolve, PassInput};
use crate::retry::RetryPolicy;
use crate::scanner::RegistryScanner;
use crate::status::StatusPublisher;

/// Controller settings.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub routes: RouteConfig,
    /// Session snapshots older than this count as unknown.
    pub stale_after: Duration,
    pub retry: RetryPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            routes: RouteConfig::default(),
            stale_after: Duration::from_secs(180),
            retry: RetryPolicy::default(),
        }
    }
}

/// Summary of one completed pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PassReport {
    pub license: String,
    pub active: Option<String>,
    pub routes_digest: Option<String>,
    pub resolution: Option<Resolution>,
    pub promotion: Option<Promotion>,
    /// The license no longer exists; its routes were removed.
    pub deleted: bool,
}

impl PassReport {
    fn deleted(license: &str) -> Self {
        Self {
            license: license.to_string(),
            active: None,
            routes_digest: None,
            resolution: None,
            promotion: None,
            deleted: true,
        }
    }
}

/// Successful answer to a switchover request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "resolution", rename_all = "snake_case")]
pub enum SwitchoverOutcome {
    Applied {
        active: String,
        previous: Option<String>,
        lossy: bool,
    },
    Queued {
        target: String,
        behind: String,
        replaced: Option<String>,
    },
}

/// Reconciles licenses against the directory.
pub struct Controller {
    state: StateStore,
    scanner: RegistryScanner,
    config: ControllerConfig,
    cache: LicenseCache,
    table: RouteTable,
    sinks: Vec<Arc<dyn RouteSink>>,
    publisher: StatusPublisher,
    prober: Option<Arc<SessionProber>>,
}

impl Controller {
    pub fn new(state: StateStore, config: ControllerConfig) -> Self {
        Self {
            scanner: RegistryScanner::new(state.clone()),
            publisher: StatusPublisher::new(state.clone(), config.retry.clone()),
            state,
            config,
            cache: LicenseCache::default(),
            table: RouteTable::new(),
            sinks: Vec::new(),
            prober: None,
        }
    }

    /// Add an output sink next to the in-memory route table.
    pub fn with_sink(mut self, sink: Arc<dyn RouteSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_prober(mut self, prober: Arc<SessionProber>) -> Self {
        self.prober = Some(prober);
        self
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn route_table(&self) -> &RouteTable {
        &self.table
    }

    pub fn publisher(&self) -> &StatusPublisher {
        &self.publisher
    }

    /// Last committed routes of a license.
    pub fn routes_for(&self, license_key: &str) -> Option<RouteSet> {
        self.table.routes_for(license_key)
    }

    /// Load every license from the directory and run a pass for each.
    ///
    /// Returns the number of licenses reconciled successfully.
    pub async fn hydrate(&self) -> ControllerResult<usize> {
        let licenses = self
            .config
            .retry
            .run("list licenses", || self.state.list_licenses())
            .await?;
        let mut ok = 0;
        for license in &licenses {
            let key = license.table_key();
            match self.reconcile_license(&key).await {
                Ok(_) => ok += 1,
                Err(e) => warn!(license = %key, error = %e, "initial reconcile failed"),
            }
        }
        info!(licenses = licenses.len(), reconciled = ok, "license cache hydrated");
        Ok(ok)
    }

    /// Reconcile every known license and retry pending status writes.
    pub async fn resync_all(&self) -> usize {
        let flushed = self.publisher.flush_pending().await;
        if flushed > 0 {
            debug!(flushed, "pending status writes flushed");
        }

        let mut keys = self.cache.keys();
        match self.state.list_licenses() {
            Ok(licenses) => keys.extend(licenses.iter().map(|l| l.table_key())),
            Err(e) => warn!(error = %e, "resync could not list licenses"),
        }
        keys.sort();
        keys.dedup();

        let mut ok = 0;
        for key in &keys {
            match self.reconcile_license(key).await {
                Ok(_) => ok += 1,
                Err(e) => warn!(license = %key, error = %e, "resync pass failed"),
            }
        }
        ok
    }

    /// Run a pass for a license with no new input.
    pub async fn reconcile_license(&self, license_key: &str) -> ControllerResult<PassReport> {
        self.run_pass(license_key, PassInput::Resync).await
    }

    /// React to an instance being created or updated.
    ///
    /// Instances without a usable license reference get an error in their
    /// status and are skipped; their siblings are unaffected.
    pub async fn reconcile_instance(&self, instance_key: &str) -> ControllerResult<Option<PassReport>> {
        let Some(instance) = self.state.get_instance(instance_key)? else {
            debug!(instance = %instance_key, "instance gone, nothing to reconcile");
            return Ok(None);
        };
        let license_key = self.license_of(&instance).await?;
        self.run_pass(&license_key, PassInput::Resync).await.map(Some)
    }

    /// React to an instance deletion. `license_key` is the reference the
    /// deleted record carried.
    pub async fn instance_deleted(
        &self,
        instance_key: &str,
        license_key: Option<&str>,
    ) -> ControllerResult<Option<PassReport>> {
        self.publisher.forget("instance", instance_key);
        let Some(license_key) = license_key else {
            return Ok(None);
        };
        let name = split_key(instance_key)
            .map(|(_, name)| name.to_string())
            .ok_or_else(|| ControllerError::Validation(format!("malformed instance key '{instance_key}'")))?;
        self.run_pass(license_key, PassInput::InstanceDeleted(name))
            .await
            .map(Some)
    }

    /// React to a fresh session snapshot.
    pub async fn session_updated(&self, instance_key: &str) -> ControllerResult<Option<PassReport>> {
        let Some(instance) = self.state.get_instance(instance_key)? else {
            return Ok(None);
        };
        let Some(license_key) = instance.license_key() else {
            return Ok(None);
        };
        self.run_pass(&license_key, PassInput::SessionUpdate(instance.name))
            .await
            .map(Some)
    }

    /// Ask for `instance_key` to become its license's active instance.
    ///
    /// Decided synchronously under the license lock. A `block` conflict
    /// comes back as [`ControllerError::Conflict`] carrying the blocking
    /// instance and its player count.
    pub async fn request_switchover(&self, instance_key: &str) -> ControllerResult<SwitchoverOutcome> {
        let instance = self
            .state
            .get_instance(instance_key)?
            .ok_or_else(|| ControllerError::NotFound(format!("instance {instance_key}")))?;
        let license_key = self.license_of(&instance).await?;

        let request = SwitchoverRequest::new(&instance.name, epoch_secs());
        let report = self
            .run_pass(&license_key, PassInput::Request(request))
            .await?;

        match report.resolution {
            Some(Resolution::Applied { previous, lossy }) => Ok(SwitchoverOutcome::Applied {
                active: instance.name,
                previous,
                lossy,
            }),
            Some(Resolution::Queued { behind, replaced }) => Ok(SwitchoverOutcome::Queued {
                target: instance.name,
                behind,
                replaced,
            }),
            Some(Resolution::Rejected(rejection)) => Err(rejection.into()),
            None => Err(ControllerError::NotFound(format!("license {license_key}"))),
        }
    }

    /// Stop background probing.
    pub async fn shutdown(&self) {
        if let Some(prober) = &self.prober {
            prober.stop_all().await;
        }
    }

    async fn license_of(&self, instance: &InstanceRecord) -> ControllerResult<String> {
        let instance_key = instance.table_key();
        let Some(license_key) = instance.license_key() else {
            warn!(instance = %instance_key, "instance has no license reference");
            self.publish_instance_error(&instance_key, "no license reference")
                .await;
            return Err(ControllerError::Validation(format!(
                "instance {instance_key} has no license reference"
            )));
        };
        if self.state.get_license(&license_key)?.is_none() {
            warn!(instance = %instance_key, license = %license_key, "instance references a missing license");
            self.publish_instance_error(&instance_key, &format!("license {license_key} not found"))
                .await;
            return Err(ControllerError::NotFound(format!("license {license_key}")));
        }
        Ok(license_key)
    }

    async fn publish_instance_error(&self, instance_key: &str, message: &str) {
        let status = InstanceStatus {
            error: Some(message.to_string()),
            ..Default::default()
        };
        self.publisher.publish_instance(instance_key, &status).await;
    }

    async fn run_pass(&self, license_key: &str, input: PassInput) -> ControllerResult<PassReport> {
        let handle = self.cache.slot(license_key);
        let mut slot = handle.lock().await;

        // A conflicting write means the license moved under us: decide again
        // from a fresh read instead of overwriting it.
        let attempts = self.config.retry.attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.pass(license_key, &input, &mut slot).await {
                Ok(report) => return Ok(report),
                Err(e @ StateError::Conflict { .. }) if attempt + 1 < attempts => {
                    debug!(license = %license_key, error = %e, "license changed during pass, re-running");
                    attempt += 1;
                }
                Err(e) => return Err(self.abandon(license_key, e).await),
            }
        }
    }

    async fn pass(
        &self,
        license_key: &str,
        input: &PassInput,
        slot: &mut LicenseSlot,
    ) -> StateResult<PassReport> {
        let retry = &self.config.retry;

        let Some(license) = retry
            .run("read license", || self.state.get_license(license_key))
            .await?
        else {
            self.retire_license(license_key, slot).await;
            return Ok(PassReport::deleted(license_key));
        };

        let roster = retry
            .run("scan instances", || self.scanner.scan(license_key))
            .await?;

        let stale_after = self.config.stale_after.as_secs();
        let mut working = match &slot.engine {
            Some(engine) => engine.clone(),
            None => {
                debug!(license = %license_key, active = ?license.active_instance, "hydrating engine from directory");
                SwitchoverEngine::from_license(&license, stale_after)
            }
        };

        let resolved = resolve(
            &license,
            &roster,
            &mut working,
            input,
            &self.config.routes,
            epoch_secs(),
        );
        for change in &resolved.roster_changes {
            info!(license = %license_key, ?change, "roster change applied");
        }

        if working.active() != license.active_instance.as_deref()
            || working.queued() != license.queued.as_ref()
        {
            // Guarded by the version the decision was made from.
            retry
                .run_while(
                    "persist active instance",
                    |e| e.is_transient() && !matches!(e, StateError::Conflict { .. }),
                    || {
                        self.state
                            .patch_license(license_key, Some(license.resource_version), |l| {
                                working.write_to(l)
                            })
                    },
                )
                .await?;
            info!(
                license = %license_key,
                active = ?working.active(),
                queued = ?working.queued().map(|q| q.target.as_str()),
                "license state persisted"
            );
        }
        slot.engine = Some(working);

        let mut routes_ok = true;
        if slot.committed.as_ref() != Some(&resolved.routes) {
            match self.push_routes(&resolved.routes) {
                Ok(()) => slot.committed = Some(resolved.routes.clone()),
                Err(e) => {
                    error!(license = %license_key, error = %e, "route sink rejected routes, will retry");
                    routes_ok = false;
                }
            }
        }

        let mut license_status = resolved.license_status.clone();
        license_status.stale = !routes_ok;
        self.publisher
            .publish_license(license_key, &license_status)
            .await;
        for (key, status) in &resolved.instance_statuses {
            self.publisher.publish_instance(key, status).await;
        }

        self.sync_probe(slot, &roster, resolved.active.as_deref())
            .await;

        Ok(PassReport {
            license: license_key.to_string(),
            active: resolved.active,
            routes_digest: resolved.license_status.routes_digest,
            resolution: resolved.resolution,
            promotion: resolved.promotion,
            deleted: false,
        })
    }

    /// Every sink first, then the table, so the table never runs ahead of
    /// what the sinks serve.
    fn push_routes(&self, routes: &RouteSet) -> Result<(), SinkError> {
        for sink in &self.sinks {
            let stats = sink.apply(routes)?;
            debug!(
                license = %routes.license_key(),
                written = stats.written,
                removed = stats.removed,
                "routes applied to sink"
            );
        }
        self.table.apply(routes)?;
        Ok(())
    }

    /// Probe only the active instance, and only if it has an endpoint.
    async fn sync_probe(&self, slot: &mut LicenseSlot, roster: &[InstanceRecord], active: Option<&str>) {
        let Some(prober) = &self.prober else {
            return;
        };
        let desired = active
            .and_then(|name| roster.iter().find(|i| i.name == name))
            .and_then(|inst| inst.endpoint.clone().map(|ep| (inst.table_key(), ep)));

        if slot.probed == desired {
            return;
        }
        if let Some((old_key, _)) = &slot.probed {
            if desired.as_ref().is_none_or(|(key, _)| key != old_key) {
                prober.stop(old_key).await;
            }
        }
        if let Some((key, address)) = &desired {
            prober.start(key, address).await;
        }
        slot.probed = desired;
    }

    async fn retire_license(&self, license_key: &str, slot: &mut LicenseSlot) {
        info!(license = %license_key, "license deleted, removing routes");
        if let Some((namespace, name)) = split_key(license_key) {
            if let Err(e) = self.table.remove_license(namespace, name) {
                error!(license = %license_key, error = %e, "failed to remove routes from table");
            }
            for sink in &self.sinks {
                if let Err(e) = sink.remove_license(namespace, name) {
                    error!(license = %license_key, error = %e, "failed to remove routes from sink");
                }
            }
        }
        if let (Some(prober), Some((key, _))) = (&self.prober, slot.probed.take()) {
            prober.stop(&key).await;
        }

        // Orphaned instances stay, but their status says why they have no route.
        if let Ok(orphans) = self.scanner.scan(license_key) {
            for inst in orphans {
                self.publish_instance_error(&inst.table_key(), &format!("license {license_key} not found"))
                    .await;
            }
        }

        slot.engine = None;
        slot.committed = None;
        self.publisher.forget("license", license_key);
        self.cache.release(license_key);
    }

    async fn abandon(&self, license_key: &str, e: StateError) -> ControllerError {
        warn!(license = %license_key, error = %e, "pass abandoned, previous routes stay in effect");
        self.publisher.mark_stale(license_key).await;
        ControllerError::from(e)
    }
}
