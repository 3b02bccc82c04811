//! seatgrid-controller — reconciliation of licenses and their instances.
//!
//! Every change (instance created or deleted, switchover requested, new
//! session data, periodic resync) becomes a pass over one license. Passes
//! for the same license never overlap.
//!
//! # Architecture
//!
//! ```text
//! Driver (event channel + resync ticker)
//!   └── Controller
//!       ├── RegistryScanner (license → ordered roster)
//!       ├── resolve() (pure: engine + roster → active, routes, status)
//!       ├── RouteTable + RouteSinks (committed routes)
//!       ├── StatusPublisher (idempotent, version-guarded status writes)
//!       └── SessionProber (follows the active instance)
//! Reaper (expired scheduled deletions → InstanceDeleted events)
//! ```
//!
//! Directory reads and writes retry transient failures with capped
//! exponential backoff. A pass that still fails leaves the previously
//! committed routes in place and flags the license status as stale.

mod cache;
pub mod controller;
pub mod driver;
pub mod error;
pub mod reaper;
pub mod resolve;
pub mod retry;
pub mod scanner;
pub mod status;

pub use controller::{Controller, ControllerConfig, PassReport, SwitchoverOutcome};
pub use driver::{handle, Driver, EventQueue, ReconcileEvent};
pub use error::{ControllerError, ControllerResult};
pub use reaper::{remove_instance, Reaper};
pub use resolve::{resolve, PassInput, Resolved};
pub use retry::RetryPolicy;
pub use scanner::RegistryScanner;
pub use status::StatusPublisher;
