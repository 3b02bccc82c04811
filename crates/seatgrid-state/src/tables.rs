//! redb table definitions for the SeatGrid directory.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).
//! Keys follow the pattern `{namespace}/{name}`.

use redb::TableDefinition;

/// License records keyed by `{namespace}/{name}`.
pub const LICENSES: TableDefinition<&str, &[u8]> = TableDefinition::new("licenses");

/// Instance records keyed by `{namespace}/{name}`.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");
