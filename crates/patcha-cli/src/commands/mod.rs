pub mod query;
pub mod store;
pub mod sync;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, anyhow};
use serde::Serialize;

use patcha_core::{Deployment, Instance, PatchaConfig, StoreKind};
use patcha_lifecycle::{Controller, IdleReason};
use patcha_reconcile::{FleetAdapter, InventorySource, Reconciler};
use patcha_state::CacheStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    Text,
    Json,
}

/// Effective settings for one invocation.
pub struct Context {
    pub config: PatchaConfig,
    pub format: Format,
}

impl Context {
    /// Load the config file (or defaults) and apply command-line overrides.
    pub fn load(
        path: &Path,
        store_path: Option<PathBuf>,
        inventory: Option<PathBuf>,
        format: Format,
    ) -> anyhow::Result<Self> {
        let mut config = PatchaConfig::load_or_default(path)
            .with_context(|| format!("loading {}", path.display()))?;
        if let Some(store_path) = store_path {
            config.store.path = Some(store_path);
        }
        if let Some(inventory) = inventory {
            config.source.inventory = Some(inventory);
        }
        config.validate()?;
        Ok(Self { config, format })
    }

    pub fn open_store(&self) -> anyhow::Result<Arc<dyn CacheStore>> {
        if self.config.store.kind == StoreKind::Redb {
            if let Some(parent) = self.config.store.path.as_deref().and_then(Path::parent) {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("creating {}", parent.display()))?;
                }
            }
        }
        let store = patcha_state::open_configured(&self.config.store)?;
        Ok(Arc::from(store))
    }

    /// Assemble the controller over the configured inventory export.
    pub fn controller(
        &self,
        store: Arc<dyn CacheStore>,
    ) -> anyhow::Result<Controller<InventorySource>> {
        let inventory = self.config.source.inventory.as_deref().ok_or_else(|| {
            anyhow!("no fleet source configured; set [source].inventory or pass --inventory")
        })?;
        let source = InventorySource::from_file(inventory, self.config.source.page_size)?;
        let adapter = FleetAdapter::new(source, self.config.call_timeout()?);
        let reconciler = Reconciler::new(adapter).with_concurrency(self.config.source.concurrency);
        Ok(Controller::new(store, reconciler, self.config.projects.clone())
            .with_ttl(self.config.ttl()?))
    }

    /// Print `value` as pretty JSON or through `text`.
    pub fn emit<T: Serialize + ?Sized>(
        &self,
        value: &T,
        text: impl FnOnce(&T) -> String,
    ) -> anyhow::Result<()> {
        match self.format {
            Format::Json => println!("{}", serde_json::to_string_pretty(value)?),
            Format::Text => {
                let rendered = text(value);
                if !rendered.is_empty() {
                    println!("{rendered}");
                }
            }
        }
        Ok(())
    }
}

pub fn idle_message(reason: IdleReason) -> &'static str {
    match reason {
        IdleReason::NeverBuilt => {
            "cache has never been built; run `patcha sync --bootstrap` to build it"
        }
        IdleReason::Cleared => "cache was cleared; run `patcha sync --bootstrap` to rebuild it",
    }
}

pub fn format_instances(instances: &[Instance]) -> String {
    instances
        .iter()
        .map(|i| {
            let mut line = i.key();
            if !i.zone.is_empty() {
                line.push_str(&format!("  zone={}", i.zone));
            }
            if !i.deployments.is_empty() {
                let names: Vec<&str> = i.deployments.iter().map(String::as_str).collect();
                line.push_str(&format!("  deployments={}", names.join(",")));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_deployments(deployments: &[Deployment]) -> String {
    deployments
        .iter()
        .map(|d| {
            let mut line = format!("{}  instances={}", d.key(), d.instances.len());
            if let Some(filter) = &d.filter {
                line.push_str(&format!("  filter={filter:?}"));
            }
            if d.incomplete {
                line.push_str("  (incomplete)");
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}
