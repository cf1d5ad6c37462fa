//! The fleet snapshot in redb.
//!
//! Entities and both directions of the instance/deployment relation are
//! JSON rows keyed by `{project}/{name}`. `build` and `clear` each run in
//! one write transaction, so readers see either the old snapshot or the new
//! one. A failed commit leaves the old snapshot in place.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use patcha_core::{
    Deployment, DeploymentRecord, FleetGraph, Instance, InstanceDescriptor, entity_key, key_name,
};

use crate::cache::{CacheStore, epoch_secs};
use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type Table = TableDefinition<'static, &'static str, &'static [u8]>;

/// Serialized rows ready to be written.
type Rows = Vec<(String, Vec<u8>)>;

/// Thread-safe cache store backed by redb.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open the snapshot file at `path`, creating it on first use.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_database(db)?;
        debug!(?path, "cache store opened");
        Ok(store)
    }

    /// A store that lives only as long as the process.
    pub fn open_in_memory() -> StateResult<Self> {
        let store = Self::open_with_backend(redb::backends::InMemoryBackend::new())?;
        debug!("in-memory cache store opened");
        Ok(store)
    }

    /// Open a store over any redb storage backend. Existing snapshot data
    /// on the backend is kept.
    pub fn open_with_backend(backend: impl redb::StorageBackend) -> StateResult<Self> {
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        Self::from_database(db)
    }

    fn from_database(db: Database) -> StateResult<Self> {
        let store = Self { db: Arc::new(db) };
        store.create_snapshot_tables()?;
        Ok(store)
    }

    /// Entity, link and meta tables must exist before the first read
    /// transaction opens them.
    fn create_snapshot_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for table in [INSTANCES, DEPLOYMENTS, INSTANCE_LINKS, DEPLOYMENT_LINKS, META] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.commit().map_err(map_err!(Transaction))
    }

    fn read_meta(&self, key: &str) -> StateResult<Option<u64>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(META).map_err(map_err!(Table))?;
        get_json(&table, key)
    }

    fn write_meta(&self, key: &str, value: u64) -> StateResult<()> {
        let bytes = to_json(&value)?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(META).map_err(map_err!(Table))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

impl CacheStore for RedbStore {
    fn is_empty(&self) -> StateResult<bool> {
        Ok(self.read_meta(META_BUILT_AT)?.is_none())
    }

    fn build(&self, graph: &FleetGraph) -> StateResult<()> {
        // Serialize everything up front so a bad value never opens a
        // write transaction.
        let instances: Rows = graph
            .instance_descriptors()
            .map(|desc| Ok((desc.key(), to_json(desc)?)))
            .collect::<StateResult<_>>()?;
        let deployments: Rows = graph
            .deployment_records()
            .map(|record| Ok((record.key(), to_json(record)?)))
            .collect::<StateResult<_>>()?;
        let instance_links = link_rows(graph.deployment_index())?;
        let deployment_links = link_rows(graph.instance_index())?;
        let built_at = to_json(&epoch_secs())?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        replace_rows(&txn, INSTANCES, &instances)?;
        replace_rows(&txn, DEPLOYMENTS, &deployments)?;
        replace_rows(&txn, INSTANCE_LINKS, &instance_links)?;
        replace_rows(&txn, DEPLOYMENT_LINKS, &deployment_links)?;
        {
            let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
            meta.insert(META_BUILT_AT, built_at.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            instances = instances.len(),
            deployments = deployments.len(),
            links = graph.link_count(),
            "cache snapshot built"
        );
        Ok(())
    }

    fn clear(&self) -> StateResult<()> {
        let cleared_at = to_json(&epoch_secs())?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        for table in [INSTANCES, DEPLOYMENTS, INSTANCE_LINKS, DEPLOYMENT_LINKS] {
            replace_rows(&txn, table, &[])?;
        }
        let dropped = {
            let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
            let dropped = meta.remove(META_BUILT_AT).map_err(map_err!(Write))?.is_some();
            if dropped {
                meta.insert(META_CLEARED_AT, cleared_at.as_slice())
                    .map_err(map_err!(Write))?;
            }
            dropped
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(dropped, "cache snapshot cleared");
        Ok(())
    }

    fn load_graph(&self) -> StateResult<FleetGraph> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let instances = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        let deployments = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let links = txn.open_table(INSTANCE_LINKS).map_err(map_err!(Table))?;

        let mut graph = FleetGraph::new();
        for (_, desc) in scan_json::<InstanceDescriptor>(&instances)? {
            graph.insert_instance(desc);
        }
        for (_, record) in scan_json::<DeploymentRecord>(&deployments)? {
            graph.insert_deployment_record(record);
        }
        for (instance_key, deployment_keys) in scan_json::<Vec<String>>(&links)? {
            for deployment_key in deployment_keys {
                graph.link(&instance_key, &deployment_key);
            }
        }
        Ok(graph)
    }

    fn instances_for_deployment(
        &self,
        project: &str,
        deployment: &str,
    ) -> StateResult<Vec<Instance>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let instances = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        let instance_links = txn.open_table(INSTANCE_LINKS).map_err(map_err!(Table))?;
        let deployment_links = txn.open_table(DEPLOYMENT_LINKS).map_err(map_err!(Table))?;

        let keys: Vec<String> =
            get_json(&deployment_links, &entity_key(project, deployment))?.unwrap_or_default();
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(desc) = get_json::<InstanceDescriptor>(&instances, &key)? {
                let covering: Vec<String> = get_json(&instance_links, &key)?.unwrap_or_default();
                results.push(instance_view(desc, &covering));
            }
        }
        Ok(results)
    }

    fn deployments_for_instance(
        &self,
        project: &str,
        instance: &str,
    ) -> StateResult<Vec<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let deployments = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let instance_links = txn.open_table(INSTANCE_LINKS).map_err(map_err!(Table))?;
        let deployment_links = txn.open_table(DEPLOYMENT_LINKS).map_err(map_err!(Table))?;

        let keys: Vec<String> =
            get_json(&instance_links, &entity_key(project, instance))?.unwrap_or_default();
        let mut results = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(record) = get_json::<DeploymentRecord>(&deployments, &key)? {
                let selected: Vec<String> =
                    get_json(&deployment_links, &key)?.unwrap_or_default();
                results.push(deployment_view(record, &selected));
            }
        }
        Ok(results)
    }

    fn instances_with_no_deployments(&self) -> StateResult<Vec<Instance>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let instances = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        let links = txn.open_table(INSTANCE_LINKS).map_err(map_err!(Table))?;

        let mut results = Vec::new();
        for (key, desc) in scan_json::<InstanceDescriptor>(&instances)? {
            let covering: Vec<String> = get_json(&links, &key)?.unwrap_or_default();
            if covering.is_empty() {
                results.push(instance_view(desc, &covering));
            }
        }
        Ok(results)
    }

    fn deployments_with_no_instances(&self) -> StateResult<Vec<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let deployments = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let links = txn.open_table(DEPLOYMENT_LINKS).map_err(map_err!(Table))?;

        let mut results = Vec::new();
        for (key, record) in scan_json::<DeploymentRecord>(&deployments)? {
            let selected: Vec<String> = get_json(&links, &key)?.unwrap_or_default();
            if selected.is_empty() {
                results.push(deployment_view(record, &selected));
            }
        }
        Ok(results)
    }

    fn set_expires_at(&self, expires_at: u64) -> StateResult<()> {
        self.write_meta(META_EXPIRES_AT, expires_at)?;
        debug!(expires_at, "cache expiry set");
        Ok(())
    }

    fn expires_at(&self) -> StateResult<Option<u64>> {
        self.read_meta(META_EXPIRES_AT)
    }

    fn built_at(&self) -> StateResult<Option<u64>> {
        self.read_meta(META_BUILT_AT)
    }

    fn cleared_at(&self) -> StateResult<Option<u64>> {
        self.read_meta(META_CLEARED_AT)
    }
}

// ── Internal helpers ────────────────────────────────────────────────

fn to_json<T: Serialize + ?Sized>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

/// Serialize one direction of the relation. Empty sets are not stored.
fn link_rows(
    index: &std::collections::BTreeMap<String, BTreeSet<String>>,
) -> StateResult<Rows> {
    index
        .iter()
        .filter(|(_, keys)| !keys.is_empty())
        .map(|(key, keys)| Ok((key.clone(), to_json(keys)?)))
        .collect()
}

/// Remove every row of `table` and write `rows` in its place, inside `txn`.
fn replace_rows(txn: &WriteTransaction, table: Table, rows: &[(String, Vec<u8>)]) -> StateResult<()> {
    let mut table = txn.open_table(table).map_err(map_err!(Table))?;
    // Collect keys first; the table can't be mutated while iterating.
    let stale: Vec<String> = table
        .iter()
        .map_err(map_err!(Read))?
        .map(|entry| {
            entry
                .map(|(key, _)| key.value().to_string())
                .map_err(map_err!(Read))
        })
        .collect::<StateResult<_>>()?;
    for key in &stale {
        table.remove(key.as_str()).map_err(map_err!(Write))?;
    }
    for (key, value) in rows {
        table
            .insert(key.as_str(), value.as_slice())
            .map_err(map_err!(Write))?;
    }
    Ok(())
}

fn get_json<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
    key: &str,
) -> StateResult<Option<T>> {
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => {
            let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn scan_json<T: DeserializeOwned>(
    table: &impl ReadableTable<&'static str, &'static [u8]>,
) -> StateResult<Vec<(String, T)>> {
    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (key, value) = entry.map_err(map_err!(Read))?;
        let decoded: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
        results.push((key.value().to_string(), decoded));
    }
    Ok(results)
}

fn instance_view(desc: InstanceDescriptor, deployment_keys: &[String]) -> Instance {
    Instance {
        name: desc.name,
        project: desc.project,
        region: desc.region,
        zone: desc.zone,
        tags: desc.tags,
        deployments: deployment_keys
            .iter()
            .map(|key| key_name(key).to_string())
            .collect(),
    }
}

fn deployment_view(record: DeploymentRecord, instance_keys: &[String]) -> Deployment {
    Deployment {
        name: record.descriptor.name,
        project: record.descriptor.project,
        filter: record.descriptor.filter,
        instances: instance_keys
            .iter()
            .map(|key| key_name(key).to_string())
            .collect(),
        incomplete: record.incomplete,
    }
}
