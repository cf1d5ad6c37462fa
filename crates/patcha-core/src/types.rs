//! Entity types shared across Patcha crates.
//!
//! Descriptors are what a fleet source hands back: attributes only, no
//! relations. [`Instance`] and [`Deployment`] are the reconciled views, with
//! the relation resolved to sets of names on read.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Identity key of an instance: `{project}/{name}`.
pub type InstanceKey = String;

/// Identity key of a patch deployment: `{project}/{name}`.
pub type DeploymentKey = String;

/// Build the composite identity key for an entity.
///
/// Names are unique within one project only, so the project is part of the
/// key and equal names in different projects never collide.
pub fn entity_key(project: &str, name: &str) -> String {
    format!("{project}/{name}")
}

// ── Descriptors ───────────────────────────────────────────────────

/// A compute instance as listed by the fleet source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceDescriptor {
    pub name: String,
    pub project: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl InstanceDescriptor {
    /// A descriptor carrying only a name and project.
    pub fn named(project: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            project: project.to_string(),
            region: String::new(),
            zone: String::new(),
            tags: BTreeSet::new(),
        }
    }

    pub fn key(&self) -> InstanceKey {
        entity_key(&self.project, &self.name)
    }
}

/// A patch deployment as listed by the fleet source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentDescriptor {
    pub name: String,
    pub project: String,
    /// Instance filter, opaque to Patcha and handed back to the source.
    #[serde(default)]
    pub filter: Option<String>,
}

impl DeploymentDescriptor {
    pub fn named(project: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            project: project.to_string(),
            filter: None,
        }
    }

    pub fn key(&self) -> DeploymentKey {
        entity_key(&self.project, &self.name)
    }
}

/// Stored form of a deployment: its descriptor plus reconciliation flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentRecord {
    #[serde(flatten)]
    pub descriptor: DeploymentDescriptor,
    /// Fetching the instances this deployment selects failed part-way.
    #[serde(default)]
    pub incomplete: bool,
}

impl DeploymentRecord {
    pub fn key(&self) -> DeploymentKey {
        self.descriptor.key()
    }
}

// ── Reconciled views ──────────────────────────────────────────────

/// One fleet-managed compute node and the deployments covering it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instance {
    pub name: String,
    pub project: String,
    pub region: String,
    pub zone: String,
    pub tags: BTreeSet<String>,
    /// Names of the deployments whose filters select this instance.
    pub deployments: BTreeSet<String>,
}

impl Instance {
    pub fn key(&self) -> InstanceKey {
        entity_key(&self.project, &self.name)
    }

    /// No deployment covers this instance.
    pub fn is_unmanaged(&self) -> bool {
        self.deployments.is_empty()
    }
}

/// One patch-policy definition and the instances it selects.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Deployment {
    pub name: String,
    pub project: String,
    pub filter: Option<String>,
    /// Names of the instances this deployment selects.
    pub instances: BTreeSet<String>,
    pub incomplete: bool,
}

impl Deployment {
    pub fn key(&self) -> DeploymentKey {
        entity_key(&self.project, &self.name)
    }

    /// The deployment's filter currently selects nothing.
    pub fn is_matchless(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Strip the `{project}/` prefix from an identity key.
pub fn key_name(key: &str) -> &str {
    key.split_once('/').map_or(key, |(_, name)| name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_include_project() {
        let a = InstanceDescriptor::named("staging", "vm-a");
        let b = InstanceDescriptor::named("production", "vm-a");
        assert_eq!(a.key(), "staging/vm-a");
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn key_name_strips_project() {
        assert_eq!(key_name("production/weekly-linux"), "weekly-linux");
        assert_eq!(key_name("bare"), "bare");
    }

    #[test]
    fn deployment_record_flattens_descriptor() {
        let record = DeploymentRecord {
            descriptor: DeploymentDescriptor {
                name: "weekly".to_string(),
                project: "prod".to_string(),
                filter: Some("labels.env=prod".to_string()),
            },
            incomplete: true,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["name"], "weekly");
        assert_eq!(json["incomplete"], true);

        let back: DeploymentRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn instance_descriptor_defaults_optional_fields() {
        let desc: InstanceDescriptor =
            serde_json::from_str(r#"{"name":"vm-a","project":"prod"}"#).unwrap();
        assert!(desc.zone.is_empty());
        assert!(desc.tags.is_empty());
    }
}
