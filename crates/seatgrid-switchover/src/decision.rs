//! Switchover requests and their resolutions.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-instance role within a license.
///
/// `Standby → ActivationRequested → (Queued | Active)` and `Active → Standby`.
/// `ActivationRequested` only exists while a request is being decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceRole {
    Standby,
    ActivationRequested,
    Queued,
    Active,
}

/// A request to make `target` the active instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchoverRequest {
    pub target: String,
    pub requested_at: u64,
}

impl SwitchoverRequest {
    pub fn new(target: &str, requested_at: u64) -> Self {
        Self {
            target: target.to_string(),
            requested_at,
        }
    }
}

/// Outcome of a switchover request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The target is now active; `previous` (if any) went to standby.
    Applied {
        previous: Option<String>,
        /// Sessions may have been interrupted (force over live or unknown players).
        lossy: bool,
    },
    /// Waiting for `behind` to drain; `replaced` is the superseded queued target.
    Queued {
        behind: String,
        replaced: Option<String>,
    },
    /// Nothing changed.
    Rejected(Rejection),
}

impl Resolution {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Why a request was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error(transparent)]
    Conflict(#[from] SwitchoverConflict),

    #[error("instance '{0}' is scheduled for deletion and cannot be activated")]
    ScheduledForDeletion(String),

    #[error("instance '{0}' does not belong to this license")]
    UnknownTarget(String),
}

/// A switchover blocked by the active instance's `block` policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(rename_all = "camelCase")]
#[error(
    "switch to '{}' blocked: {}",
    .target,
    blocked_reason(.connected_players, .blocking_instance)
)]
pub struct SwitchoverConflict {
    pub target: String,
    /// The active instance that refused to yield.
    pub blocking_instance: String,
    /// Observed player count; `None` if it could not be verified.
    pub connected_players: Option<u32>,
}

fn blocked_reason(players: &Option<u32>, blocking: &str) -> String {
    match players {
        Some(players) => format!("{players} players connected to '{blocking}'"),
        None => format!("unable to verify player count on '{blocking}'"),
    }
}

/// An automatic promotion of a queued request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Promotion {
    pub from: String,
    pub to: String,
}

/// Corrections applied when the instance roster no longer matches the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterChange {
    /// The active instance no longer exists.
    ActiveRemoved(String),
    /// The active instance was scheduled for deletion and forced to standby.
    ActiveDemoted(String),
    /// The queued request was dropped (target gone, already active, or nothing to wait on).
    QueueDropped { target: String },
}

impl RosterChange {
    /// Warning text for license status, if the change deserves one.
    pub fn warning(&self) -> Option<String> {
        match self {
            Self::ActiveRemoved(_) => None,
            Self::ActiveDemoted(name) => Some(format!(
                "instance '{name}' is scheduled for deletion and cannot be active"
            )),
            Self::QueueDropped { .. } => None,
        }
    }
}
