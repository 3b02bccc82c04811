//! seatgrid-state — the license/instance directory for SeatGrid.
//!
//! Backed by [redb](https://docs.rs/redb), stores licenses and the
//! instances that share them. Every record carries a `resource_version`
//! that the store bumps on each write; writers that pass the version they
//! read get optimistic-concurrency protection (a stale write is rejected
//! with [`StateError::Conflict`]).
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Both tables are keyed by `{namespace}/{name}`, so namespace-scoped
//! listings are prefix scans.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
