//! SeatGrid routing — turns an active/standby assignment into routes.
//!
//! This crate produces the routing descriptors for every instance of a
//! license and hands them to output sinks.
//!
//! # Components
//!
//! - **`generator`** — Pure, deterministic route generation
//! - **`table`** — In-memory route table with hostname resolution
//! - **`sink`** — `RouteSink` trait and the on-disk directory sink

pub mod generator;
pub mod sink;
pub mod table;

pub use generator::{
    generate, BackendRef, DnsMapping, GatewayRef, RouteConfig, RouteDescriptor, RouteSet,
};
pub use sink::{ApplyStats, DirectorySink, RouteSink, SinkError};
pub use table::RouteTable;
