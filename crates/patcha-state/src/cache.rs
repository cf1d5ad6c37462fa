//! The cache store capability set.

use std::time::{SystemTime, UNIX_EPOCH};

use patcha_core::{Deployment, FleetGraph, Instance};

use crate::error::StateResult;

/// A durable, queryable copy of the reconciled fleet graph with a single
/// expiry timestamp.
///
/// Writes are whole-snapshot only: `build` replaces everything and `clear`
/// removes everything, each atomically. Any backend that honours this
/// contract can stand in for another.
pub trait CacheStore: Send + Sync {
    /// True iff no `build` has succeeded since the last `clear` (or ever).
    fn is_empty(&self) -> StateResult<bool>;

    /// Replace the stored snapshot with `graph`. On error the previous
    /// snapshot (or emptiness) is left as it was.
    fn build(&self, graph: &FleetGraph) -> StateResult<()>;

    /// Drop the stored snapshot. The expiry timestamp is kept, and a
    /// cleared-at marker is written if a snapshot was actually dropped.
    fn clear(&self) -> StateResult<()>;

    /// Rebuild the whole graph from the stored snapshot.
    fn load_graph(&self) -> StateResult<FleetGraph>;

    /// Instances selected by a deployment. Empty for a matchless deployment.
    fn instances_for_deployment(&self, project: &str, deployment: &str)
    -> StateResult<Vec<Instance>>;

    /// Deployments covering an instance. Empty for an unmanaged instance.
    fn deployments_for_instance(&self, project: &str, instance: &str)
    -> StateResult<Vec<Deployment>>;

    /// Instances that no deployment covers.
    fn instances_with_no_deployments(&self) -> StateResult<Vec<Instance>>;

    /// Deployments whose filters select no instance.
    fn deployments_with_no_instances(&self) -> StateResult<Vec<Deployment>>;

    /// Set the unix time (seconds) after which the snapshot is stale.
    fn set_expires_at(&self, expires_at: u64) -> StateResult<()>;

    /// The stored expiry, if one was ever set.
    fn expires_at(&self) -> StateResult<Option<u64>>;

    /// Unix time of the last successful build, `None` while empty.
    fn built_at(&self) -> StateResult<Option<u64>>;

    /// Unix time of the last `clear` that dropped a built snapshot. `None`
    /// means the store has never held one.
    fn cleared_at(&self) -> StateResult<Option<u64>>;

    /// Compare the expiry against `now`. No grace period; an unset expiry
    /// counts as expired.
    fn is_expired_at(&self, now: u64) -> StateResult<bool> {
        Ok(match self.expires_at()? {
            Some(expires_at) => now >= expires_at,
            None => true,
        })
    }

    /// Compare the expiry against the wall clock.
    fn is_expired(&self) -> StateResult<bool> {
        self.is_expired_at(epoch_secs())
    }
}

/// Current Unix epoch in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
