//! Reconciler — links instances to the deployments whose filters select them.
//!
//! [`GraphBuilder`] is the synchronous merge for one project: it seeds the
//! graph from the project listings, absorbs each deployment's instance
//! listing, and computes anomalies once everything is in. [`Reconciler`]
//! drives it from a [`FleetAdapter`], fetching deployments concurrently and
//! merging results in the one task that owns the builder.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use patcha_core::{
    DeploymentDescriptor, FleetGraph, InstanceDescriptor, InstanceKey, key_name,
};

use crate::error::SourceError;
use crate::source::{FleetAdapter, FleetSource, Listing};

/// Deployments whose instances are fetched at the same time.
pub const DEFAULT_CONCURRENCY: usize = 8;

// ── Anomalies & failures ──────────────────────────────────────────

/// A suspicious shape in the reconciled data. Logged, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    /// Instance returned by a deployment filter but missing from the
    /// project's instance listing.
    OrphanInstance {
        project: String,
        instance: String,
        deployments: BTreeSet<String>,
    },
    /// Instance selected by more than one deployment.
    OverlappingCoverage {
        project: String,
        instance: String,
        deployments: BTreeSet<String>,
    },
    /// Fully listed deployment whose filter selects nothing.
    MatchlessDeployment { project: String, deployment: String },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::OrphanInstance {
                project,
                instance,
                deployments,
            } => write!(
                f,
                "orphan instance {project}/{instance} (seen only via {})",
                join(deployments)
            ),
            Anomaly::OverlappingCoverage {
                project,
                instance,
                deployments,
            } => write!(
                f,
                "instance {project}/{instance} covered by {} deployments: {}",
                deployments.len(),
                join(deployments)
            ),
            Anomaly::MatchlessDeployment {
                project,
                deployment,
            } => write!(f, "deployment {project}/{deployment} selects no instances"),
        }
    }
}

fn join(names: &BTreeSet<String>) -> String {
    names.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

/// Which listing a source failure interrupted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "listing", content = "deployment", rename_all = "snake_case")]
pub enum FailureScope {
    /// The project's deployment listing.
    DeploymentListing,
    /// The project's independent instance listing.
    InstanceListing,
    /// The instances selected by one deployment.
    Deployment(String),
}

impl fmt::Display for FailureScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureScope::DeploymentListing => f.write_str("deployment listing"),
            FailureScope::InstanceListing => f.write_str("instance listing"),
            FailureScope::Deployment(name) => write!(f, "instances of deployment {name}"),
        }
    }
}

/// A source call that failed during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFailure {
    pub project: String,
    pub scope: FailureScope,
    #[serde(serialize_with = "serialize_error")]
    pub error: SourceError,
}

fn serialize_error<S: serde::Serializer>(error: &SourceError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(error)
}

impl fmt::Display for SourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.project, self.scope, self.error)
    }
}

// ── Result ────────────────────────────────────────────────────────

/// The outcome of reconciling one or more projects.
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    /// Projects folded into this result, in processing order.
    pub projects: Vec<String>,
    pub graph: FleetGraph,
    /// Sorted, so equal inputs give equal reports whatever the fetch order.
    pub anomalies: Vec<Anomaly>,
    /// Sorted by project, then scope.
    pub failures: Vec<SourceFailure>,
}

impl Reconciliation {
    /// No source call failed.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Fold another project's result into this one.
    pub fn merge(&mut self, other: Reconciliation) {
        self.projects.extend(other.projects);
        self.graph.merge(other.graph);
        self.anomalies.extend(other.anomalies);
        self.anomalies.sort();
        self.anomalies.dedup();
        self.failures.extend(other.failures);
        sort_failures(&mut self.failures);
    }
}

fn sort_failures(failures: &mut [SourceFailure]) {
    failures.sort_by(|a, b| (&a.project, &a.scope).cmp(&(&b.project, &b.scope)));
}

// ── GraphBuilder ──────────────────────────────────────────────────

/// Merges one project's listings into a [`FleetGraph`].
#[derive(Debug)]
pub struct GraphBuilder {
    project: String,
    graph: FleetGraph,
    /// Instances that entered the graph through a deployment filter.
    orphans: BTreeSet<InstanceKey>,
    inventory_failed: bool,
    failures: Vec<SourceFailure>,
}

impl GraphBuilder {
    pub fn new(project: &str) -> Self {
        Self {
            project: project.to_string(),
            graph: FleetGraph::new(),
            orphans: BTreeSet::new(),
            inventory_failed: false,
            failures: Vec::new(),
        }
    }

    /// Seed the instance set from the project's own instance listing.
    ///
    /// A failed listing keeps what was listed and turns off orphan
    /// detection for the project, since any instance might be missing.
    pub fn seed_inventory(&mut self, listing: Listing<InstanceDescriptor>) {
        for instance in listing.items {
            let instance = self.normalize_instance(instance);
            self.graph.insert_instance(instance);
        }
        if let Some(error) = listing.failure {
            self.inventory_failed = true;
            self.fail(FailureScope::InstanceListing, error);
        }
    }

    /// Seed the deployment set, each with no instances yet.
    ///
    /// Returns the deployments that still need their instances fetched,
    /// one per identity key.
    pub fn seed_deployments(
        &mut self,
        listing: Listing<DeploymentDescriptor>,
    ) -> Vec<DeploymentDescriptor> {
        let mut pending = Vec::new();
        for deployment in listing.items {
            let deployment = self.normalize_deployment(deployment);
            if self.graph.insert_deployment(deployment.clone()) {
                pending.push(deployment);
            } else {
                debug!(project = %self.project, deployment = %deployment.name, "duplicate deployment ignored");
            }
        }
        if let Some(error) = listing.failure {
            self.fail(FailureScope::DeploymentListing, error);
        }
        pending
    }

    /// Link a deployment to the instances its filter selected.
    ///
    /// Unknown instances are created on first sight. Links from pages
    /// fetched before a failure are kept and the deployment is flagged
    /// incomplete.
    pub fn absorb(&mut self, deployment: &DeploymentDescriptor, listing: Listing<InstanceDescriptor>) {
        let deployment = self.normalize_deployment(deployment.clone());
        let deployment_key = deployment.key();
        if !self.graph.contains_deployment(&deployment_key) {
            self.graph.insert_deployment(deployment.clone());
        }

        for instance in listing.items {
            let instance = self.normalize_instance(instance);
            let instance_key = instance.key();
            if self.graph.insert_instance(instance) {
                self.orphans.insert(instance_key.clone());
            }
            if self.graph.link(&instance_key, &deployment_key) {
                debug!(instance = %instance_key, deployment = %deployment_key, "linked");
            }
        }

        if let Some(error) = listing.failure {
            self.graph.mark_incomplete(&deployment_key);
            self.fail(FailureScope::Deployment(deployment.name), error);
        }
    }

    /// Compute anomalies and hand back the finished graph.
    pub fn finish(self) -> Reconciliation {
        let mut anomalies = Vec::new();

        if !self.inventory_failed {
            for key in &self.orphans {
                let deployments = self.names_of(self.graph.deployment_index().get(key));
                anomalies.push(Anomaly::OrphanInstance {
                    project: self.project.clone(),
                    instance: key_name(key).to_string(),
                    deployments,
                });
            }
        }

        for instance in self.graph.overlapping_instances() {
            anomalies.push(Anomaly::OverlappingCoverage {
                project: instance.project,
                instance: instance.name,
                deployments: instance.deployments,
            });
        }

        for deployment in self.graph.matchless_deployments() {
            if deployment.incomplete {
                continue;
            }
            anomalies.push(Anomaly::MatchlessDeployment {
                project: deployment.project,
                deployment: deployment.name,
            });
        }

        anomalies.sort();
        for anomaly in &anomalies {
            warn!(project = %self.project, %anomaly, "reconciliation anomaly");
        }

        let mut failures = self.failures;
        sort_failures(&mut failures);

        Reconciliation {
            projects: vec![self.project],
            graph: self.graph,
            anomalies,
            failures,
        }
    }

    fn names_of(&self, keys: Option<&BTreeSet<String>>) -> BTreeSet<String> {
        keys.into_iter()
            .flatten()
            .map(|key| key_name(key).to_string())
            .collect()
    }

    fn fail(&mut self, scope: FailureScope, error: SourceError) {
        warn!(project = %self.project, %scope, %error, "fleet source failure");
        self.failures.push(SourceFailure {
            project: self.project.clone(),
            scope,
            error,
        });
    }

    fn normalize_instance(&self, mut instance: InstanceDescriptor) -> InstanceDescriptor {
        if instance.project.is_empty() {
            instance.project = self.project.clone();
        }
        instance
    }

    fn normalize_deployment(&self, mut deployment: DeploymentDescriptor) -> DeploymentDescriptor {
        if deployment.project.is_empty() {
            deployment.project = self.project.clone();
        }
        deployment
    }
}

/// Reconcile already-fetched listings for one project.
///
/// `instances_by_deployment` is keyed by deployment name; a deployment with
/// no entry selects nothing. No independent instance listing is used, so
/// every instance counts as discovered through a filter.
pub fn reconcile(
    project: &str,
    deployments: Vec<DeploymentDescriptor>,
    mut instances_by_deployment: BTreeMap<String, Vec<InstanceDescriptor>>,
) -> Reconciliation {
    let mut builder = GraphBuilder::new(project);
    let pending = builder.seed_deployments(Listing::complete(deployments));
    for deployment in pending {
        let instances = instances_by_deployment
            .remove(&deployment.name)
            .unwrap_or_default();
        builder.absorb(&deployment, Listing::complete(instances));
    }
    builder.finish()
}

// ── Reconciler ────────────────────────────────────────────────────

/// Fetches and reconciles projects through a [`FleetAdapter`].
pub struct Reconciler<S> {
    adapter: FleetAdapter<S>,
    concurrency: usize,
}

impl<S: FleetSource> Reconciler<S> {
    pub fn new(adapter: FleetAdapter<S>) -> Self {
        Self {
            adapter,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn adapter(&self) -> &FleetAdapter<S> {
        &self.adapter
    }

    /// Reconcile one project.
    pub async fn reconcile_project(&self, project: &str) -> Reconciliation {
        let (inventory, deployments) = tokio::join!(
            self.adapter.instances(project),
            self.adapter.deployments(project)
        );

        let mut builder = GraphBuilder::new(project);
        builder.seed_inventory(inventory);
        let pending = builder.seed_deployments(deployments);
        debug!(%project, deployments = pending.len(), "fetching deployment instances");

        let adapter = &self.adapter;
        let mut fetches = stream::iter(pending)
            .map(move |deployment| async move {
                let listing = adapter.instances_for_deployment(&deployment).await;
                (deployment, listing)
            })
            .buffer_unordered(self.concurrency);

        while let Some((deployment, listing)) = fetches.next().await {
            builder.absorb(&deployment, listing);
        }

        builder.finish()
    }

    /// Reconcile every project in order and fold the results together.
    pub async fn reconcile_all(&self, projects: &[String]) -> Reconciliation {
        let mut result = Reconciliation::default();
        for project in projects {
            let part = self.reconcile_project(project).await;
            info!(
                %project,
                instances = part.graph.instance_count(),
                deployments = part.graph.deployment_count(),
                links = part.graph.link_count(),
                anomalies = part.anomalies.len(),
                failures = part.failures.len(),
                "project reconciled"
            );
            result.merge(part);
        }
        result
    }
}
