//! Domain types for the SeatGrid directory.
//!
//! A `LicenseRecord` owns the single-active constraint; `InstanceRecord`s
//! reference a license by name within the same namespace. Both carry a
//! status sub-object written by the controller and a `resource_version`
//! maintained by the store.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};

/// `{namespace}/{name}` key of a license.
pub type LicenseKey = String;

/// `{namespace}/{name}` key of an instance.
pub type InstanceKey = String;

/// Sentinel written to `connected_players` when a probe fails.
pub const PLAYERS_UNKNOWN: i64 = -1;

static DNS_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]{0,61}[a-z0-9])?$").expect("valid DNS label pattern")
});

/// Build the `{namespace}/{name}` key used by both tables.
pub fn object_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Split a `{namespace}/{name}` key.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    key.split_once('/')
}

/// Records whose writes are guarded by a store-maintained version.
pub trait Versioned {
    fn resource_version(&self) -> u64;
    fn set_resource_version(&mut self, version: u64);
}

impl Versioned for LicenseRecord {
    fn resource_version(&self) -> u64 {
        self.resource_version
    }

    fn set_resource_version(&mut self, version: u64) {
        self.resource_version = version;
    }
}

impl Versioned for InstanceRecord {
    fn resource_version(&self) -> u64 {
        self.resource_version
    }

    fn set_resource_version(&mut self, version: u64) {
        self.resource_version = version;
    }
}

/// Reject names that cannot be used as a DNS label (they end up in hostnames).
pub fn validate_name(kind: &str, name: &str) -> StateResult<()> {
    if DNS_LABEL.is_match(name) {
        Ok(())
    } else {
        Err(StateError::Invalid(format!(
            "{kind} name '{name}' must be a DNS label (lowercase alphanumerics and '-', max 63)"
        )))
    }
}

// ── Policy ─────────────────────────────────────────────────────────

/// How an active instance may be displaced by a switchover request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchoverMode {
    /// Reject while players are connected.
    #[default]
    Block,
    /// Hold the request until the active instance drains to zero players.
    Queue,
    /// Switch immediately, interrupting sessions.
    Force,
}

impl std::fmt::Display for SwitchoverMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Block => "block",
            Self::Queue => "queue",
            Self::Force => "force",
        };
        f.write_str(s)
    }
}

/// Route state of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteState {
    Active,
    #[default]
    Standby,
}

// ── License ────────────────────────────────────────────────────────

/// A license: the set of instances of which at most one is active.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LicenseRecord {
    pub namespace: String,
    pub name: String,
    /// Authoritative active instance. Written only by the switchover engine.
    pub active_instance: Option<String>,
    /// Policy for instances that don't set their own `switchover_mode`.
    #[serde(default)]
    pub default_switchover_mode: SwitchoverMode,
    /// Per-license override of the routing defaults.
    #[serde(default)]
    pub gateway: Option<GatewayOverride>,
    /// Outstanding queued switchover, at most one.
    #[serde(default)]
    pub queued: Option<QueuedSwitchover>,
    #[serde(default)]
    pub status: LicenseStatus,
    pub created_at: u64,
    /// Bumped by the store on every write.
    #[serde(default)]
    pub resource_version: u64,
}

impl LicenseRecord {
    /// A fresh license with no active instance.
    pub fn new(namespace: &str, name: &str, created_at: u64) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            active_instance: None,
            default_switchover_mode: SwitchoverMode::Block,
            gateway: None,
            queued: None,
            status: LicenseStatus::default(),
            created_at,
            resource_version: 0,
        }
    }

    /// Build the key for the licenses table.
    pub fn table_key(&self) -> LicenseKey {
        object_key(&self.namespace, &self.name)
    }
}

/// Gateway settings a license may override.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GatewayOverride {
    pub base_domain: Option<String>,
    pub dns_target: Option<String>,
}

/// A switchover waiting for the active instance to drain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueuedSwitchover {
    pub target: String,
    /// Instance that was active when the request was queued.
    pub behind: String,
    pub requested_at: u64,
}

/// Externally observable license status.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LicenseStatus {
    pub active_instance: Option<String>,
    #[serde(default)]
    pub instances: Vec<InstanceEntry>,
    #[serde(default)]
    pub queued: Option<QueuedSwitchover>,
    #[serde(default)]
    pub warning: Option<String>,
    /// Set when the last pass was abandoned; routes reflect the prior commit.
    #[serde(default)]
    pub stale: bool,
    #[serde(default)]
    pub routes_digest: Option<String>,
    #[serde(default)]
    pub active_instance_stats: Option<SessionSnapshot>,
}

/// One instance as seen from its license.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceEntry {
    pub name: String,
    pub state: RouteState,
}

// ── Instance ───────────────────────────────────────────────────────

/// An instance sharing a license.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceRecord {
    pub namespace: String,
    pub name: String,
    /// License name in the same namespace.
    pub license: Option<String>,
    /// Falls back to the license's default when unset.
    #[serde(default)]
    pub switchover_mode: Option<SwitchoverMode>,
    /// `host:port` of the instance's live status endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Unix timestamp after which the instance is deleted.
    #[serde(default)]
    pub scheduled_delete_at: Option<u64>,
    #[serde(default)]
    pub session: SessionSnapshot,
    #[serde(default)]
    pub status: InstanceStatus,
    pub created_at: u64,
    #[serde(default)]
    pub resource_version: u64,
}

impl InstanceRecord {
    /// A fresh standby instance referencing `license`.
    pub fn new(namespace: &str, name: &str, license: &str, created_at: u64) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            license: Some(license.to_string()),
            switchover_mode: None,
            endpoint: None,
            scheduled_delete_at: None,
            session: SessionSnapshot::default(),
            status: InstanceStatus::default(),
            created_at,
            resource_version: 0,
        }
    }

    /// Build the key for the instances table.
    pub fn table_key(&self) -> InstanceKey {
        object_key(&self.namespace, &self.name)
    }

    /// Key of the referenced license, if any.
    pub fn license_key(&self) -> Option<LicenseKey> {
        self.license
            .as_deref()
            .map(|license| object_key(&self.namespace, license))
    }

    /// Policy that applies when this instance is the one being displaced.
    pub fn effective_mode(&self, license_default: SwitchoverMode) -> SwitchoverMode {
        self.switchover_mode.unwrap_or(license_default)
    }

    pub fn is_scheduled_for_deletion(&self) -> bool {
        self.scheduled_delete_at.is_some()
    }
}

/// Cached live session data, refreshed by the prober.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// `PLAYERS_UNKNOWN` after a failed probe; `None` if never probed.
    pub connected_players: Option<i64>,
    pub world_active: Option<bool>,
    pub active_world: Option<String>,
    /// Unix timestamp of the last successful probe.
    pub last_probe_time: Option<u64>,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// What the switchover policy may conclude from a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerCount {
    /// No probe has ever completed or failed.
    Unprobed,
    /// Fresh, successful reading.
    Known(u32),
    /// Failed probe or a reading older than the staleness window.
    Unknown,
}

impl SessionSnapshot {
    /// Interpret the snapshot at time `now`.
    pub fn player_count(&self, now: u64, stale_after_secs: u64) -> PlayerCount {
        match (self.connected_players, self.last_probe_time) {
            (None, None) => PlayerCount::Unprobed,
            (Some(n), Some(at)) if n >= 0 => {
                if now.saturating_sub(at) > stale_after_secs {
                    PlayerCount::Unknown
                } else {
                    PlayerCount::Known(u32::try_from(n).unwrap_or(u32::MAX))
                }
            }
            _ => PlayerCount::Unknown,
        }
    }

    /// Player count for external display; `None` when unknown.
    pub fn visible_players(&self) -> Option<i64> {
        self.connected_players.filter(|n| *n >= 0)
    }
}

/// Externally observable instance status.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    pub state: RouteState,
    pub hostname: Option<String>,
    /// Validation problem that blocks reconciliation of this instance.
    #[serde(default)]
    pub error: Option<String>,
}
