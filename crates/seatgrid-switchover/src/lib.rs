//! SeatGrid switchover policy — decides which single instance is active.
//!
//! This crate holds the per-license decision state machine. It never
//! touches the network or the directory: callers hand it the instance
//! records they scanned and persist whatever it decides.
//!
//! # Components
//!
//! - **`engine`** — `SwitchoverEngine` (request, session update, roster reconcile)
//! - **`decision`** — request/resolution types and the `SwitchoverConflict` error

pub mod decision;
pub mod engine;

pub use decision::{
    InstanceRole, Promotion, Rejection, Resolution, RosterChange, SwitchoverConflict,
    SwitchoverRequest,
};
pub use engine::SwitchoverEngine;
