//! seatgrid-probe — live session data for active instances.
//!
//! Each instance currently believed active gets a background task that
//! periodically asks its status endpoint how many players are connected.
//! Results land in the instance's cached `SessionSnapshot`; the switchover
//! engine reads that cache and never waits on a probe.
//!
//! # Architecture
//!
//! ```text
//! SessionProber
//!   ├── Per-instance background task
//!   │   ├── probe_status() → StatusReport | ProbeError
//!   │   ├── SessionTracker (success → fresh snapshot, failure → sentinel)
//!   │   └── StateStore::update_session
//!   └── Optional SessionCallback for the reconciliation driver
//! ```
//!
//! A failed probe writes `connected_players = -1` and keeps the previous
//! `last_probe_time`, so consumers see "unknown" rather than "zero".

pub mod checker;
pub mod monitor;

pub use checker::{
    parse_duration, probe_status, ProbeConfig, ProbeError, ProbeResult, SessionTracker,
    StatusReport,
};
pub use monitor::{BoxFuture, SessionCallback, SessionProber};
