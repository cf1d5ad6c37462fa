//! FleetGraph — the reconciled instance ↔ deployment association.
//!
//! Entities are owned by the graph and never reference each other. The
//! relation lives in two index maps keyed by identity:
//!
//! ```text
//! deployments_by_instance: instance key   → {deployment key}
//! instances_by_deployment: deployment key → {instance key}
//! ```
//!
//! [`FleetGraph::link`] is the only way to write the relation and always
//! updates both maps, so `d ∈ i.deployments ⟺ i ∈ d.instances` holds for
//! every pair. Ordered collections keep the graph independent of the order
//! in which entities and links were added.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::*;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FleetGraph {
    instances: BTreeMap<InstanceKey, InstanceDescriptor>,
    deployments: BTreeMap<DeploymentKey, DeploymentRecord>,
    deployments_by_instance: BTreeMap<InstanceKey, BTreeSet<DeploymentKey>>,
    instances_by_deployment: BTreeMap<DeploymentKey, BTreeSet<InstanceKey>>,
}

impl FleetGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Insert an instance. Returns false (and keeps the existing entity) if
    /// an instance with the same key is already present.
    pub fn insert_instance(&mut self, instance: InstanceDescriptor) -> bool {
        let key = instance.key();
        if self.instances.contains_key(&key) {
            return false;
        }
        self.deployments_by_instance.entry(key.clone()).or_default();
        self.instances.insert(key, instance);
        true
    }

    /// Insert a deployment with an empty instance set. Returns false if a
    /// deployment with the same key is already present.
    pub fn insert_deployment(&mut self, deployment: DeploymentDescriptor) -> bool {
        self.insert_deployment_record(DeploymentRecord {
            descriptor: deployment,
            incomplete: false,
        })
    }

    /// Insert a stored deployment record, keeping its flags.
    pub fn insert_deployment_record(&mut self, record: DeploymentRecord) -> bool {
        let key = record.key();
        if self.deployments.contains_key(&key) {
            return false;
        }
        self.instances_by_deployment.entry(key.clone()).or_default();
        self.deployments.insert(key, record);
        true
    }

    /// Link an instance and a deployment in both directions.
    ///
    /// Both endpoints must already be in the graph; unknown keys leave the
    /// graph untouched. Returns true only when a new link was added, so
    /// linking the same pair twice is a no-op.
    pub fn link(&mut self, instance_key: &str, deployment_key: &str) -> bool {
        if !self.instances.contains_key(instance_key)
            || !self.deployments.contains_key(deployment_key)
        {
            return false;
        }
        let added = self
            .deployments_by_instance
            .entry(instance_key.to_string())
            .or_default()
            .insert(deployment_key.to_string());
        self.instances_by_deployment
            .entry(deployment_key.to_string())
            .or_default()
            .insert(instance_key.to_string());
        added
    }

    /// Flag a deployment whose instance listing failed part-way.
    pub fn mark_incomplete(&mut self, deployment_key: &str) {
        if let Some(record) = self.deployments.get_mut(deployment_key) {
            record.incomplete = true;
        }
    }

    /// Fold another graph into this one. Entities already present win;
    /// links are unioned.
    pub fn merge(&mut self, other: FleetGraph) {
        for (_, instance) in other.instances {
            self.insert_instance(instance);
        }
        for (_, record) in other.deployments {
            let key = record.key();
            let incomplete = record.incomplete;
            if !self.insert_deployment_record(record) && incomplete {
                self.mark_incomplete(&key);
            }
        }
        for (instance_key, deployment_keys) in other.deployments_by_instance {
            for deployment_key in deployment_keys {
                self.link(&instance_key, &deployment_key);
            }
        }
    }

    // ── Reads ──────────────────────────────────────────────────────

    pub fn contains_instance(&self, key: &str) -> bool {
        self.instances.contains_key(key)
    }

    pub fn contains_deployment(&self, key: &str) -> bool {
        self.deployments.contains_key(key)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn deployment_count(&self) -> usize {
        self.deployments.len()
    }

    pub fn link_count(&self) -> usize {
        self.deployments_by_instance.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty() && self.deployments.is_empty()
    }

    /// Resolve an instance with its covering deployments.
    pub fn instance(&self, key: &str) -> Option<Instance> {
        let desc = self.instances.get(key)?;
        Some(Instance {
            name: desc.name.clone(),
            project: desc.project.clone(),
            region: desc.region.clone(),
            zone: desc.zone.clone(),
            tags: desc.tags.clone(),
            deployments: names(self.deployments_by_instance.get(key)),
        })
    }

    /// Resolve a deployment with its selected instances.
    pub fn deployment(&self, key: &str) -> Option<Deployment> {
        let record = self.deployments.get(key)?;
        Some(Deployment {
            name: record.descriptor.name.clone(),
            project: record.descriptor.project.clone(),
            filter: record.descriptor.filter.clone(),
            instances: names(self.instances_by_deployment.get(key)),
            incomplete: record.incomplete,
        })
    }

    pub fn instances(&self) -> Vec<Instance> {
        self.instances
            .keys()
            .filter_map(|key| self.instance(key))
            .collect()
    }

    pub fn deployments(&self) -> Vec<Deployment> {
        self.deployments
            .keys()
            .filter_map(|key| self.deployment(key))
            .collect()
    }

    /// Instances selected by the given deployment. Empty for a matchless or
    /// unknown deployment.
    pub fn instances_for_deployment(&self, deployment_key: &str) -> Vec<Instance> {
        self.instances_by_deployment
            .get(deployment_key)
            .into_iter()
            .flatten()
            .filter_map(|key| self.instance(key))
            .collect()
    }

    /// Deployments covering the given instance. Empty for an unmanaged or
    /// unknown instance.
    pub fn deployments_for_instance(&self, instance_key: &str) -> Vec<Deployment> {
        self.deployments_by_instance
            .get(instance_key)
            .into_iter()
            .flatten()
            .filter_map(|key| self.deployment(key))
            .collect()
    }

    /// Instances no deployment covers.
    pub fn unmanaged_instances(&self) -> Vec<Instance> {
        self.instances
            .keys()
            .filter(|key| {
                self.deployments_by_instance
                    .get(*key)
                    .is_none_or(BTreeSet::is_empty)
            })
            .filter_map(|key| self.instance(key))
            .collect()
    }

    /// Deployments whose filters select nothing.
    pub fn matchless_deployments(&self) -> Vec<Deployment> {
        self.deployments
            .keys()
            .filter(|key| {
                self.instances_by_deployment
                    .get(*key)
                    .is_none_or(BTreeSet::is_empty)
            })
            .filter_map(|key| self.deployment(key))
            .collect()
    }

    /// Instances covered by more than one deployment.
    pub fn overlapping_instances(&self) -> Vec<Instance> {
        self.deployments_by_instance
            .iter()
            .filter(|(_, deployments)| deployments.len() > 1)
            .filter_map(|(key, _)| self.instance(key))
            .collect()
    }

    // ── Raw access (persistence) ───────────────────────────────────

    pub fn instance_descriptors(&self) -> impl Iterator<Item = &InstanceDescriptor> {
        self.instances.values()
    }

    pub fn deployment_records(&self) -> impl Iterator<Item = &DeploymentRecord> {
        self.deployments.values()
    }

    /// Index of instance key → deployment keys (every instance has an entry).
    pub fn deployment_index(&self) -> &BTreeMap<InstanceKey, BTreeSet<DeploymentKey>> {
        &self.deployments_by_instance
    }

    /// Index of deployment key → instance keys (every deployment has an entry).
    pub fn instance_index(&self) -> &BTreeMap<DeploymentKey, BTreeSet<InstanceKey>> {
        &self.instances_by_deployment
    }

    /// Check that both index maps describe the same relation.
    pub fn is_symmetric(&self) -> bool {
        let forward = self
            .deployments_by_instance
            .iter()
            .all(|(i, ds)| {
                ds.iter().all(|d| {
                    self.instances_by_deployment
                        .get(d)
                        .is_some_and(|is| is.contains(i))
                })
            });
        let backward = self
            .instances_by_deployment
            .iter()
            .all(|(d, is)| {
                is.iter().all(|i| {
                    self.deployments_by_instance
                        .get(i)
                        .is_some_and(|ds| ds.contains(d))
                })
            });
        forward && backward
    }
}

fn names(keys: Option<&BTreeSet<String>>) -> BTreeSet<String> {
    keys.into_iter()
        .flatten()
        .map(|key| key_name(key).to_string())
        .collect()
}
