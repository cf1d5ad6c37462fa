//! redb table definitions for the Patcha cache store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized).
//! Entity keys follow the pattern `{project}/{name}`.

use redb::TableDefinition;

/// Instance descriptors keyed by `{project}/{name}`.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");

/// Deployment records keyed by `{project}/{name}`.
pub const DEPLOYMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("deployments");

/// Instance key → JSON list of covering deployment keys.
pub const INSTANCE_LINKS: TableDefinition<&str, &[u8]> = TableDefinition::new("instance_links");

/// Deployment key → JSON list of selected instance keys.
pub const DEPLOYMENT_LINKS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("deployment_links");

/// Snapshot metadata (see the `META_*` keys).
pub const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

/// Unix seconds of the last successful build; absent while the store is empty.
pub const META_BUILT_AT: &str = "built_at";

/// Unix seconds after which the snapshot is stale.
pub const META_EXPIRES_AT: &str = "expires_at";

/// Unix seconds of the last `clear` that dropped a built snapshot. Lets an
/// empty store tell "cleared" apart from "never built".
pub const META_CLEARED_AT: &str = "cleared_at";
