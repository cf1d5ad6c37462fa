//! File-backed fleet source over a JSON inventory export.
//!
//! ```json
//! {
//!   "projects": {
//!     "production": {
//!       "instances": [{ "name": "vm-a", "zone": "europe-west1-b", "tags": ["web"] }],
//!       "deployments": [{ "name": "weekly", "filter": "labels.env=prod", "instances": ["vm-a"] }]
//!     }
//!   }
//! }
//! ```
//!
//! A deployment lists the instance names its filter selected at export
//! time. A selected name missing from the project's `instances` is handed
//! back with only its name and project set.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use patcha_core::{DeploymentDescriptor, InstanceDescriptor};

use crate::error::{SourceError, SourceResult};
use crate::source::{FleetSource, Page, PageFuture};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Inventory {
    #[serde(default)]
    pub projects: BTreeMap<String, ProjectInventory>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProjectInventory {
    #[serde(default)]
    pub instances: Vec<InventoryInstance>,
    #[serde(default)]
    pub deployments: Vec<InventoryDeployment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryInstance {
    pub name: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InventoryDeployment {
    pub name: String,
    #[serde(default)]
    pub filter: Option<String>,
    /// Names of the instances the filter selected.
    #[serde(default)]
    pub instances: Vec<String>,
}

impl Inventory {
    pub fn from_json(json: &str) -> SourceResult<Self> {
        serde_json::from_str(json).map_err(|e| SourceError::Inventory(e.to_string()))
    }

    pub fn from_file(path: &Path) -> SourceResult<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| SourceError::Inventory(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    fn project(&self, project: &str) -> SourceResult<&ProjectInventory> {
        self.projects
            .get(project)
            .ok_or_else(|| SourceError::Unavailable(format!("project {project} not in inventory")))
    }
}

impl InventoryInstance {
    fn descriptor(&self, project: &str) -> InstanceDescriptor {
        InstanceDescriptor {
            name: self.name.clone(),
            project: project.to_string(),
            region: self.region.clone(),
            zone: self.zone.clone(),
            tags: self.tags.clone(),
        }
    }
}

/// Serves an [`Inventory`] page by page.
///
/// Page tokens are item offsets rendered as strings.
#[derive(Debug, Clone)]
pub struct InventorySource {
    inventory: Inventory,
    page_size: usize,
}

impl InventorySource {
    pub fn new(inventory: Inventory, page_size: usize) -> Self {
        Self {
            inventory,
            page_size: page_size.max(1),
        }
    }

    pub fn from_file(path: &Path, page_size: usize) -> SourceResult<Self> {
        Ok(Self::new(Inventory::from_file(path)?, page_size))
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    fn paginate<T>(&self, items: Vec<T>, page_token: Option<String>) -> SourceResult<Page<T>> {
        let offset = match page_token {
            None => 0,
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| SourceError::Pagination(format!("bad page token {token:?}")))?,
        };
        let end = offset.saturating_add(self.page_size).min(items.len());
        let page: Vec<T> = items.into_iter().skip(offset).take(end.saturating_sub(offset)).collect();
        if end < offset.saturating_add(self.page_size) {
            return Ok(Page::last(page));
        }
        Ok(Page {
            items: page,
            next_page_token: Some(end.to_string()),
        })
    }

    fn deployments_page(
        &self,
        project: &str,
        page_token: Option<String>,
    ) -> SourceResult<Page<DeploymentDescriptor>> {
        let deployments = self
            .inventory
            .project(project)?
            .deployments
            .iter()
            .map(|d| DeploymentDescriptor {
                name: d.name.clone(),
                project: project.to_string(),
                filter: d.filter.clone(),
            })
            .collect();
        self.paginate(deployments, page_token)
    }

    fn instances_page(
        &self,
        project: &str,
        page_token: Option<String>,
    ) -> SourceResult<Page<InstanceDescriptor>> {
        let instances = self
            .inventory
            .project(project)?
            .instances
            .iter()
            .map(|i| i.descriptor(project))
            .collect();
        self.paginate(instances, page_token)
    }

    fn selected_page(
        &self,
        deployment: &DeploymentDescriptor,
        page_token: Option<String>,
    ) -> SourceResult<Page<InstanceDescriptor>> {
        let project = self.inventory.project(&deployment.project)?;
        let entry = project
            .deployments
            .iter()
            .find(|d| d.name == deployment.name)
            .ok_or_else(|| {
                SourceError::Unavailable(format!(
                    "deployment {} not in inventory of {}",
                    deployment.name, deployment.project
                ))
            })?;
        let selected = entry
            .instances
            .iter()
            .map(|name| {
                project
                    .instances
                    .iter()
                    .find(|i| &i.name == name)
                    .map(|i| i.descriptor(&deployment.project))
                    .unwrap_or_else(|| InstanceDescriptor::named(&deployment.project, name))
            })
            .collect();
        self.paginate(selected, page_token)
    }
}

impl FleetSource for InventorySource {
    fn list_deployments<'a>(
        &'a self,
        project: &'a str,
        page_token: Option<String>,
    ) -> PageFuture<'a, DeploymentDescriptor> {
        Box::pin(async move { self.deployments_page(project, page_token) })
    }

    fn list_instances<'a>(
        &'a self,
        project: &'a str,
        page_token: Option<String>,
    ) -> PageFuture<'a, InstanceDescriptor> {
        Box::pin(async move { self.instances_page(project, page_token) })
    }

    fn list_instances_for_deployment<'a>(
        &'a self,
        deployment: &'a DeploymentDescriptor,
        page_token: Option<String>,
    ) -> PageFuture<'a, InstanceDescriptor> {
        Box::pin(async move { self.selected_page(deployment, page_token) })
    }
}
