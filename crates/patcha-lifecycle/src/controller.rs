//! Lifecycle controller — the per-invocation cache state machine.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use patcha_core::FleetGraph;
use patcha_reconcile::{Anomaly, FleetSource, Reconciler, SourceFailure};
use patcha_state::{CacheStore, epoch_secs};

use crate::error::{LifecycleError, LifecycleResult};

/// How long a complete refresh stays fresh unless configured otherwise.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Source of "now" in unix seconds.
pub type Clock = Arc<dyn Fn() -> u64 + Send + Sync>;

/// What one invocation does with the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Clear the store, reconcile every project, rebuild.
    Refresh,
    /// First build of an empty store; nothing to clear.
    Bootstrap,
    /// Answer from the stored snapshot.
    Serve,
    /// Leave the store alone; there is nothing to serve.
    Idle(IdleReason),
}

/// Why an empty store was left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleReason {
    /// The store has never held a snapshot.
    NeverBuilt,
    /// A snapshot was cleared and not rebuilt.
    Cleared,
}

/// Operator signals for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Build an empty store.
    pub bootstrap: bool,
    /// Refresh even when the snapshot has not expired.
    pub force_refresh: bool,
}

/// What the controller reads from the store before deciding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreState {
    pub empty: bool,
    pub expired: bool,
    pub expires_at: Option<u64>,
    pub built_at: Option<u64>,
    pub cleared_at: Option<u64>,
}

impl StoreState {
    pub fn read(store: &dyn CacheStore, now: u64) -> LifecycleResult<Self> {
        Ok(Self {
            empty: store.is_empty()?,
            expired: store.is_expired_at(now)?,
            expires_at: store.expires_at()?,
            built_at: store.built_at()?,
            cleared_at: store.cleared_at()?,
        })
    }
}

/// The action table.
pub fn decide(state: &StoreState, options: RunOptions) -> Action {
    match (state.empty, state.expired) {
        (true, _) if options.bootstrap => Action::Bootstrap,
        (true, _) if state.cleared_at.is_none() => Action::Idle(IdleReason::NeverBuilt),
        (true, _) => Action::Idle(IdleReason::Cleared),
        (false, true) => Action::Refresh,
        (false, false) if options.force_refresh => Action::Refresh,
        (false, false) => Action::Serve,
    }
}

/// Summary of a refresh or bootstrap.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub action: Action,
    pub projects: Vec<String>,
    pub instances: usize,
    pub deployments: usize,
    pub unmanaged: usize,
    pub matchless: usize,
    pub anomalies: Vec<Anomaly>,
    pub failures: Vec<SourceFailure>,
    /// New expiry; `None` when the refresh was partial.
    pub expires_at: Option<u64>,
    pub complete: bool,
}

/// Result of [`Controller::run`].
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The stored snapshot was current.
    Served { graph: FleetGraph, expires_at: u64 },
    /// The store was rebuilt.
    Refreshed(RefreshReport),
    /// Nothing was built or served.
    Idle(IdleReason),
}

/// Drives one store through serve/refresh/bootstrap/idle.
pub struct Controller<S> {
    store: Arc<dyn CacheStore>,
    reconciler: Reconciler<S>,
    projects: Vec<String>,
    ttl: Duration,
    clock: Clock,
}

impl<S: FleetSource> Controller<S> {
    pub fn new(store: Arc<dyn CacheStore>, reconciler: Reconciler<S>, projects: Vec<String>) -> Self {
        Self {
            store,
            reconciler,
            projects,
            ttl: DEFAULT_TTL,
            clock: Arc::new(epoch_secs),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Replace the wall clock, e.g. with a fixed time in tests.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Read the store state and the action a run would take, without
    /// running it.
    pub fn plan(&self, options: RunOptions) -> LifecycleResult<(StoreState, Action)> {
        let state = StoreState::read(self.store.as_ref(), (self.clock)())?;
        let action = decide(&state, options);
        Ok((state, action))
    }

    /// Decide and carry out this invocation's action.
    pub async fn run(&self, options: RunOptions) -> LifecycleResult<RunOutcome> {
        let now = (self.clock)();
        let state = StoreState::read(self.store.as_ref(), now)?;
        let action = decide(&state, options);
        info!(
            ?action,
            empty = state.empty,
            expired = state.expired,
            expires_at = ?state.expires_at,
            "lifecycle decision"
        );

        match action {
            Action::Serve => {
                let graph = self.store.load_graph()?;
                info!(
                    instances = graph.instance_count(),
                    deployments = graph.deployment_count(),
                    "serving cached fleet graph"
                );
                Ok(RunOutcome::Served {
                    graph,
                    expires_at: state.expires_at.unwrap_or(now),
                })
            }
            Action::Idle(reason) => {
                info!(?reason, "cache empty; bootstrap not requested");
                Ok(RunOutcome::Idle(reason))
            }
            Action::Refresh => {
                self.ensure_projects()?;
                self.store.clear()?;
                info!("cache cleared");
                self.rebuild(action, now).await.map(RunOutcome::Refreshed)
            }
            Action::Bootstrap => {
                self.ensure_projects()?;
                self.rebuild(action, now).await.map(RunOutcome::Refreshed)
            }
        }
    }

    fn ensure_projects(&self) -> LifecycleResult<()> {
        if self.projects.is_empty() {
            return Err(LifecycleError::NoProjects);
        }
        Ok(())
    }

    /// Reconcile and build. `started` is the expiry base, so time spent
    /// fetching counts against the TTL.
    async fn rebuild(&self, action: Action, started: u64) -> LifecycleResult<RefreshReport> {
        let result = self.reconciler.reconcile_all(&self.projects).await;
        self.store.build(&result.graph)?;

        let complete = result.is_complete();
        let expires_at = if complete {
            let expires_at = started.saturating_add(ttl_secs(self.ttl));
            self.store.set_expires_at(expires_at)?;
            Some(expires_at)
        } else {
            None
        };

        let report = RefreshReport {
            action,
            projects: result.projects,
            instances: result.graph.instance_count(),
            deployments: result.graph.deployment_count(),
            unmanaged: result.graph.unmanaged_instances().len(),
            matchless: result.graph.matchless_deployments().len(),
            anomalies: result.anomalies,
            failures: result.failures,
            expires_at,
            complete,
        };

        if complete {
            info!(
                ?action,
                instances = report.instances,
                deployments = report.deployments,
                unmanaged = report.unmanaged,
                matchless = report.matchless,
                expires_at = ?report.expires_at,
                "cache rebuilt"
            );
        } else {
            warn!(
                ?action,
                failures = report.failures.len(),
                instances = report.instances,
                deployments = report.deployments,
                "partial refresh written; expiry not advanced"
            );
        }
        Ok(report)
    }
}

/// Whole seconds of expiry, rounded up so a fresh snapshot always expires
/// after the refresh that built it.
fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
    secs.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(empty: bool, expired: bool, expires_at: Option<u64>) -> StoreState {
        StoreState {
            empty,
            expired,
            expires_at,
            built_at: (!empty).then_some(1),
            cleared_at: None,
        }
    }

    fn cleared(expires_at: Option<u64>) -> StoreState {
        StoreState {
            cleared_at: Some(5),
            ..state(true, true, expires_at)
        }
    }

    const NONE: RunOptions = RunOptions {
        bootstrap: false,
        force_refresh: false,
    };
    const BOOTSTRAP: RunOptions = RunOptions {
        bootstrap: true,
        force_refresh: false,
    };
    const FORCE: RunOptions = RunOptions {
        bootstrap: false,
        force_refresh: true,
    };

    #[test]
    fn expired_snapshot_refreshes() {
        assert_eq!(decide(&state(false, true, Some(10)), NONE), Action::Refresh);
        assert_eq!(decide(&state(false, true, None), NONE), Action::Refresh);
    }

    #[test]
    fn fresh_snapshot_serves() {
        assert_eq!(decide(&state(false, false, Some(10)), NONE), Action::Serve);
        assert_eq!(decide(&state(false, false, Some(10)), BOOTSTRAP), Action::Serve);
    }

    #[test]
    fn force_refreshes_fresh_snapshot() {
        assert_eq!(decide(&state(false, false, Some(10)), FORCE), Action::Refresh);
    }

    #[test]
    fn empty_store_idles_without_bootstrap() {
        assert_eq!(
            decide(&state(true, true, None), NONE),
            Action::Idle(IdleReason::NeverBuilt)
        );
        assert_eq!(
            decide(&cleared(Some(10)), NONE),
            Action::Idle(IdleReason::Cleared)
        );
        assert_eq!(
            decide(&cleared(Some(10)), FORCE),
            Action::Idle(IdleReason::Cleared)
        );
    }

    #[test]
    fn cleared_partial_build_is_not_never_built() {
        // A partial bootstrap leaves no expiry behind; the clear marker
        // still tells the two apart.
        assert_eq!(decide(&cleared(None), NONE), Action::Idle(IdleReason::Cleared));
        assert_eq!(
            decide(&state(true, true, Some(10)), NONE),
            Action::Idle(IdleReason::NeverBuilt)
        );
    }

    #[test]
    fn ttl_rounds_up_to_whole_seconds() {
        assert_eq!(ttl_secs(Duration::from_millis(500)), 1);
        assert_eq!(ttl_secs(Duration::from_millis(1500)), 2);
        assert_eq!(ttl_secs(Duration::from_secs(3600)), 3600);
        assert_eq!(ttl_secs(Duration::ZERO), 1);
    }

    #[test]
    fn empty_store_bootstraps_on_request() {
        assert_eq!(decide(&state(true, true, None), BOOTSTRAP), Action::Bootstrap);
        assert_eq!(decide(&cleared(Some(10)), BOOTSTRAP), Action::Bootstrap);
    }
}
